use super::{BandwidthSettings, ParsedFeedback};
use crate::api::{
    transport::SenderState,
    units::{DataRate, TimeDelta},
};

/// Smoothed estimate of the forward path capacity, from the rate at which
/// the receiver acknowledges bytes.
#[derive(Debug)]
pub struct ForwardBandwidthEstimator {
    smoothing: f64,
    headroom: f64,
    min_bitrate: DataRate,
    max_bitrate: DataRate,

    estimate: Option<DataRate>,
    received_rate: DataRate,
}

impl ForwardBandwidthEstimator {
    pub fn new(settings: &BandwidthSettings, min_bitrate: DataRate, max_bitrate: DataRate) -> Self {
        Self {
            smoothing: settings.smoothing,
            headroom: settings.headroom,
            min_bitrate,
            max_bitrate,
            estimate: None,
            received_rate: DataRate::zero(),
        }
    }

    pub fn estimate(&self) -> Option<DataRate> {
        self.estimate
    }

    /// Rate acknowledged in the last period.
    pub fn received_rate(&self) -> DataRate {
        self.received_rate
    }

    /// Feeds one period and returns how much the estimate moved.
    ///
    /// The estimate only learns from periods that say something about the
    /// capacity: the sender was not backing off, it either sent more than
    /// came back or was held below what came back, and while competing only
    /// loss-free increases count.
    pub fn update(
        &mut self,
        parsed: &ParsedFeedback,
        period_duration: TimeDelta,
        state: SenderState,
        target_rate: DataRate,
        loss_rate: f64,
    ) -> DataRate {
        if period_duration <= TimeDelta::zero() {
            return DataRate::zero();
        }

        self.received_rate = parsed.rxed_bytes / period_duration;
        let sample = self.received_rate * (1.0 - self.headroom);

        let unacknowledged = parsed.txed_bytes > parsed.rxed_sent_bytes;
        let held_back =
            parsed.txed_bytes == parsed.rxed_sent_bytes && target_rate < self.received_rate;
        let competing_increase = self.estimate.map_or(false, |estimate| sample > estimate)
            && loss_rate == 0.0;

        if state == SenderState::Throttled
            || !(unacknowledged || held_back)
            || (state == SenderState::Competing && !competing_increase)
        {
            return DataRate::zero();
        }

        let previous = self.estimate.unwrap_or(DataRate::zero());
        self.set_estimate(sample);
        self.estimate.unwrap_or(DataRate::zero()) - previous
    }

    /// Undoes part of an earlier update.
    pub fn roll_back(&mut self, diff: DataRate) {
        if let Some(estimate) = self.estimate {
            let estimate = (estimate - diff).clamped(self.min_bitrate, self.max_bitrate);
            tracing::debug!(?diff, ?estimate, "bandwidth estimate rolled back");
            self.estimate = Some(estimate);
        }
    }

    pub fn reset(&mut self) {
        self.estimate = None;
        self.received_rate = DataRate::zero();
    }

    fn set_estimate(&mut self, sample: DataRate) {
        let estimate = match self.estimate {
            Some(estimate) if estimate >= self.min_bitrate => {
                estimate * self.smoothing + sample * (1.0 - self.smoothing)
            }
            // Seed from the full received rate.
            _ => sample * (1.0 / (1.0 - self.headroom)),
        };
        let estimate = estimate.clamped(self.min_bitrate, self.max_bitrate);

        tracing::debug!(?sample, previous = ?self.estimate, ?estimate, "bandwidth estimate");
        self.estimate = Some(estimate);
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;
    use crate::api::units::DataSize;

    fn estimator() -> ForwardBandwidthEstimator {
        ForwardBandwidthEstimator::new(
            &BandwidthSettings::default(),
            DataRate::from_kilobits_per_sec(150),
            DataRate::from_kilobits_per_sec(1500),
        )
    }

    // One 100 ms period acknowledging `rx` bytes of `tx` sent.
    fn period(tx: i64, rx: i64) -> ParsedFeedback {
        ParsedFeedback {
            rxed_bytes: DataSize::from_bytes(rx),
            rxed_sent_bytes: DataSize::from_bytes(rx),
            txed_bytes: DataSize::from_bytes(tx),
            ..Default::default()
        }
    }

    fn update(
        estimator: &mut ForwardBandwidthEstimator,
        parsed: &ParsedFeedback,
        state: SenderState,
    ) -> DataRate {
        estimator.update(
            parsed,
            TimeDelta::from_millis(100),
            state,
            DataRate::from_kilobits_per_sec(300),
            0.0,
        )
    }

    #[test]
    fn first_sample_seeds() {
        let mut estimator = estimator();
        // 6250 bytes per 100 ms is 500 kbps.
        let diff = update(&mut estimator, &period(7000, 6250), SenderState::Default);
        assert_eq!(estimator.estimate(), Some(DataRate::from_kilobits_per_sec(500)));
        assert_eq!(diff, DataRate::from_kilobits_per_sec(500));
        assert_eq!(estimator.received_rate(), DataRate::from_kilobits_per_sec(500));
    }

    #[test]
    fn smoothed_with_headroom() {
        let mut estimator = estimator();
        update(&mut estimator, &period(7000, 6250), SenderState::Default);

        // 0.9 * 500 + 0.1 * (0.9 * 1000)
        let diff = update(&mut estimator, &period(13000, 12500), SenderState::Default);
        assert_relative_eq!(estimator.estimate().unwrap().kbps_float(), 540.0);
        assert_relative_eq!(diff.kbps_float(), 40.0);
    }

    #[test]
    fn bounded() {
        let mut estimator = estimator();
        update(&mut estimator, &period(100, 10), SenderState::Default);
        assert_eq!(estimator.estimate(), Some(DataRate::from_kilobits_per_sec(150)));

        for _ in 0..100 {
            update(&mut estimator, &period(200_000, 100_000), SenderState::Default);
        }
        assert_eq!(estimator.estimate(), Some(DataRate::from_kilobits_per_sec(1500)));
    }

    #[test]
    fn fully_acknowledged_needs_headroom() {
        let mut estimator = estimator();

        // Everything came back and the sender was not held below the
        // received rate: nothing learned.
        let diff = update(&mut estimator, &period(1250, 1250), SenderState::Default);
        assert_eq!(diff, DataRate::zero());
        assert_eq!(estimator.estimate(), None);

        // 500 kbps received while targeting 300 kbps.
        update(&mut estimator, &period(6250, 6250), SenderState::Default);
        assert_eq!(estimator.estimate(), Some(DataRate::from_kilobits_per_sec(500)));
    }

    #[test]
    fn throttled_is_frozen() {
        let mut estimator = estimator();
        update(&mut estimator, &period(7000, 6250), SenderState::Default);
        let diff = update(&mut estimator, &period(13000, 12500), SenderState::Throttled);
        assert_eq!(diff, DataRate::zero());
        assert_eq!(estimator.estimate(), Some(DataRate::from_kilobits_per_sec(500)));
    }

    #[test]
    fn competing_only_increases_without_loss() {
        let mut estimator = estimator();
        update(&mut estimator, &period(7000, 6250), SenderState::Default);

        // Below the estimate.
        update(&mut estimator, &period(7000, 2500), SenderState::Competing);
        assert_eq!(estimator.estimate(), Some(DataRate::from_kilobits_per_sec(500)));

        // Above it, but with loss.
        let diff = estimator.update(
            &period(13000, 12500),
            TimeDelta::from_millis(100),
            SenderState::Competing,
            DataRate::from_kilobits_per_sec(300),
            0.01,
        );
        assert_eq!(diff, DataRate::zero());

        let diff = update(&mut estimator, &period(13000, 12500), SenderState::Competing);
        assert!(diff > DataRate::zero());

        estimator.roll_back(diff);
        assert_eq!(estimator.estimate(), Some(DataRate::from_kilobits_per_sec(500)));
    }
}
