use bytes::Bytes;

use super::{AddResult, FeedbackReport};
use crate::{
    api::{
        transport::EcnMarking,
        units::{TimeDelta, Timestamp},
    },
    Result,
};

/// Receiver side of the feedback loop: accumulates arrivals and produces one
/// serialized report per interval.
///
/// Arrival and report times are milliseconds since the first received packet.
/// The caller owns the timer and calls [FeedbackGenerator::on_interval] once
/// per `interval`, starting after the first arrival.
#[derive(Debug)]
pub struct FeedbackGenerator {
    report: FeedbackReport,
    interval: TimeDelta,
    reference_time: Option<Timestamp>,
}

impl FeedbackGenerator {
    pub const DEFAULT_INTERVAL: TimeDelta = TimeDelta::from_millis(100);

    pub fn new(sender_ssrc: u32, interval: TimeDelta) -> Self {
        let interval = if interval <= TimeDelta::zero() || interval.ms() > u16::MAX as i64 {
            tracing::warn!(?interval, "invalid feedback interval, using default");
            Self::DEFAULT_INTERVAL
        } else {
            interval
        };

        tracing::info!(sender_ssrc, ?interval, "feedback generator created");

        Self {
            report: FeedbackReport::new(sender_ssrc),
            interval,
            reference_time: None,
        }
    }

    pub fn interval(&self) -> TimeDelta {
        self.interval
    }

    /// True once the first packet has arrived and reports are due.
    pub fn is_started(&self) -> bool {
        self.reference_time.is_some()
    }

    pub fn report(&self) -> &FeedbackReport {
        &self.report
    }

    pub fn on_received_packet(
        &mut self,
        at_time: Timestamp,
        ssrc: u32,
        seq: u16,
        ecn: EcnMarking,
    ) -> AddResult {
        if self.reference_time.is_none() {
            tracing::debug!(?at_time, "feedback reference time set");
            self.reference_time = Some(at_time);
        }

        let arrival_time_ms = self.elapsed_ms(at_time);
        let result = self.report.add_feedback(ssrc, seq, arrival_time_ms, ecn.bits());

        let (count, end_seq) = self.report.count_end_seq(ssrc);
        tracing::trace!(ssrc, seq, arrival_time_ms, count, end_seq, ?result, "recorded arrival");

        result
    }

    /// Stamps, serializes and resets the pending report. Returns `None` before
    /// the first arrival. The pending arrivals are discarded even when
    /// serialization fails.
    pub fn on_interval(&mut self, at_time: Timestamp) -> Result<Option<Bytes>> {
        if self.reference_time.is_none() {
            return Ok(None);
        }

        self.report.increase_feedback_seq();
        self.report.set_report_time(self.elapsed_ms(at_time));
        self.report.set_monitored_duration(self.interval.ms() as u16);

        tracing::debug!(
            feedback_seq = self.report.feedback_seq(),
            report_time_ms = self.report.report_time_ms(),
            count = self.report.total_report_count(),
            "sending feedback"
        );

        let result = self.report.encode_to_bytes();
        if let Err(err) = &result {
            tracing::warn!(%err, "failed to serialize feedback report");
        }

        self.report.clean_report_blocks();
        result.map(Some)
    }

    fn elapsed_ms(&self, at_time: Timestamp) -> u64 {
        match self.reference_time {
            Some(reference) => (at_time - reference).us().max(0) as u64 / 1000,
            None => 0,
        }
    }
}

#[cfg(test)]
mod test {
    use test_trace::test;

    use super::*;

    fn at_ms(ms: i64) -> Timestamp {
        Timestamp::from_millis(1_000_000 + ms)
    }

    #[test]
    fn no_report_before_first_arrival() {
        let mut generator = FeedbackGenerator::new(1, FeedbackGenerator::DEFAULT_INTERVAL);
        assert!(!generator.is_started());
        assert_eq!(generator.on_interval(at_ms(100)), Ok(None));
    }

    #[test]
    fn report_per_interval() {
        let mut generator = FeedbackGenerator::new(1, TimeDelta::from_millis(50));

        assert_eq!(
            generator.on_received_packet(at_ms(0), 9, 10, EcnMarking::NotEct),
            AddResult::NewStream
        );
        assert_eq!(
            generator.on_received_packet(at_ms(20), 9, 12, EcnMarking::Ce),
            AddResult::AddedToExisting
        );
        assert_eq!(
            generator.on_received_packet(at_ms(21), 9, 12, EcnMarking::NotEct),
            AddResult::Duplicate
        );

        let bytes = generator.on_interval(at_ms(50)).unwrap().unwrap();
        let report = FeedbackReport::decode(&mut bytes.clone()).unwrap();

        assert_eq!(report.sender_ssrc(), 1);
        assert_eq!(report.feedback_seq(), 1);
        assert_eq!(report.report_time_ms(), 50);
        assert_eq!(report.monitored_duration_ms(), 50);
        assert_eq!(report.count_end_seq(9), (3, 12));
        assert_eq!(report.metric_block(9, 12).unwrap().arrival_time_ms, 20);
        assert_eq!(report.metric_block(9, 12).unwrap().ecn_marking(), EcnMarking::Ce);

        // The next interval starts empty with the next feedback sequence.
        assert_eq!(generator.report().total_report_count(), 0);
        let bytes = generator.on_interval(at_ms(100)).unwrap().unwrap();
        let report = FeedbackReport::decode(&mut bytes.clone()).unwrap();
        assert_eq!(report.feedback_seq(), 2);
        assert_eq!(report.total_report_count(), 0);
    }

    #[test]
    fn failed_report_is_discarded() {
        let mut generator = FeedbackGenerator::new(1, TimeDelta::from_millis(100));
        generator.on_received_packet(at_ms(0), 9, 1, EcnMarking::NotEct);

        // Too late to express the offset in 13 bits.
        assert!(generator.on_interval(at_ms(9000)).is_err());
        assert_eq!(generator.report().total_report_count(), 0);

        generator.on_received_packet(at_ms(9010), 9, 2, EcnMarking::NotEct);
        assert!(generator.on_interval(at_ms(9100)).unwrap().is_some());
    }

    #[test]
    fn invalid_interval_uses_default() {
        let generator = FeedbackGenerator::new(1, TimeDelta::zero());
        assert_eq!(generator.interval(), FeedbackGenerator::DEFAULT_INTERVAL);
    }
}
