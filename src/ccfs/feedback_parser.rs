use super::{SentPacketLedger, SentPacketRecord};
use crate::{
    api::units::{DataSize, TimeDelta, Timestamp},
    rtp_rtcp::FeedbackReport,
    Error, Result,
};

/// The span of the sender's clock a report covers, in whole milliseconds.
/// Sends in `[begin_ms, end_ms)` belong to the period.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReportPeriod {
    pub begin_ms: i64,
    pub end_ms: i64,
}

impl ReportPeriod {
    pub fn duration(&self) -> TimeDelta {
        TimeDelta::from_millis(self.end_ms - self.begin_ms)
    }

    pub fn contains(&self, send_time: Timestamp) -> bool {
        (self.begin_ms..self.end_ms).contains(&send_time.ms_floor())
    }
}

/// One received packet matched with its send record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDelaySample {
    pub ssrc: u32,
    pub seq: u16,
    pub send_time: Timestamp,
    /// On the receiver's clock.
    pub arrival_time_ms: u64,
    pub size: DataSize,
}

impl QueueDelaySample {
    /// One-way delay including the unknown clock offset between the peers.
    pub fn raw_delay_ms(&self) -> i64 {
        self.arrival_time_ms as i64 - self.send_time.ms_floor()
    }
}

/// Totals and samples extracted from one report.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedFeedback {
    /// Bytes of every acknowledged packet.
    pub rxed_bytes: DataSize,
    /// Bytes of acknowledged packets sent within the period.
    pub rxed_sent_bytes: DataSize,
    /// Bytes sent within the period.
    pub txed_bytes: DataSize,
    /// Bytes sent after the last acknowledged packet, up to the last send
    /// within the period.
    pub last_added_bytes: DataSize,
    pub loss_count: u32,
    pub ledger_misses: u32,
    /// Ordered by send time.
    pub samples: Vec<QueueDelaySample>,
}

/// Maps the report's monitored duration onto the sender's clock.
///
/// The most recent arrival anchors the period: its send time plus the time it
/// waited in the report gives the end of the period.
pub fn last_period(report: &FeedbackReport, ledger: &SentPacketLedger) -> Result<ReportPeriod> {
    let mut latest: Option<(u32, u16, u64)> = None;
    for (ssrc, block) in report.report_blocks() {
        for (seq, metric) in block.metric_list() {
            if latest.map_or(true, |(_, _, arrival)| metric.arrival_time_ms > arrival) {
                latest = Some((ssrc, seq, metric.arrival_time_ms));
            }
        }
    }

    let (ssrc, seq, arrival_time_ms) = latest.ok_or(Error::PeriodReconstructionFailed)?;

    let Some(record) = ledger.lookup(ssrc, seq) else {
        tracing::warn!(ssrc, seq, "latest acknowledged packet is not in the ledger");
        return Err(Error::LedgerMiss { ssrc, seq });
    };

    if report.monitored_duration_ms() == 0 {
        tracing::warn!(ssrc, seq, "report monitors an empty period");
        return Err(Error::PeriodReconstructionFailed);
    }

    let offset_ms = report.report_time_ms().saturating_sub(arrival_time_ms) as i64;
    let end_ms = record.send_time_ms() + offset_ms;
    let begin_ms = end_ms - report.monitored_duration_ms() as i64;

    Ok(ReportPeriod { begin_ms, end_ms })
}

pub fn parse_feedback(
    report: &FeedbackReport,
    ledger: &SentPacketLedger,
    period: &ReportPeriod,
) -> ParsedFeedback {
    let mut parsed = ParsedFeedback::default();

    for (ssrc, block) in report.report_blocks() {
        for seq in block.sequence_range() {
            let Some(record) = ledger.lookup(ssrc, seq) else {
                tracing::debug!(ssrc, seq, "acknowledged packet is not in the ledger");
                parsed.ledger_misses += 1;
                continue;
            };

            match block.get(seq) {
                Some(metric) => {
                    parsed.rxed_bytes += record.size;
                    if period.contains(record.send_time) {
                        parsed.rxed_sent_bytes += record.size;
                    }
                    parsed.samples.push(QueueDelaySample {
                        ssrc,
                        seq,
                        send_time: record.send_time,
                        arrival_time_ms: metric.arrival_time_ms,
                        size: record.size,
                    });
                }
                None => parsed.loss_count += 1,
            }
        }

        // First of the latest sends within the period.
        let mut latest_in_period: Option<&SentPacketRecord> = None;
        for (_, record) in ledger.records(ssrc) {
            if !period.contains(record.send_time) {
                continue;
            }
            parsed.txed_bytes += record.size;
            if latest_in_period.map_or(true, |latest| record.send_time_ms() > latest.send_time_ms()) {
                latest_in_period = Some(record);
            }
        }

        if let (Some(latest), Some(end)) = (latest_in_period, ledger.lookup(ssrc, block.end_seq()))
        {
            if latest.total_sent_bytes > end.total_sent_bytes {
                parsed.last_added_bytes += latest.total_sent_bytes - end.total_sent_bytes;
            }
        }
    }

    parsed.samples.sort_by_key(|sample| sample.send_time);

    tracing::debug!(
        rxed = ?parsed.rxed_bytes,
        rxed_sent = ?parsed.rxed_sent_bytes,
        txed = ?parsed.txed_bytes,
        last_added = ?parsed.last_added_bytes,
        losses = parsed.loss_count,
        misses = parsed.ledger_misses,
        samples = parsed.samples.len(),
        "parsed feedback"
    );

    parsed
}
