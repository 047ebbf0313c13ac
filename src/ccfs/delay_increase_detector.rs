use crate::api::units::TimeDelta;

pub trait DelayIncreaseDetectorInterface {
    // Update the detector with the queue delay of one report period. Returns
    // how long the delay has been growing, or zero while it is not.
    fn update(&mut self, queue_delay: TimeDelta, period_end_ms: i64) -> TimeDelta;

    fn reset(&mut self);
}

/// Detects a queue delay that keeps rising above its smoothed minimum.
#[derive(Debug, Clone)]
pub struct IncreasingDelayDetector {
    min_count: u32,
    min_duration: TimeDelta,

    smoothed_min_ms: i64,
    count: u32,
    start_ms: i64,
}

impl IncreasingDelayDetector {
    // Weight of the old minimum, in percent.
    const SMOOTHING_PERCENT: i64 = 85;

    pub fn new(min_count: u32, min_duration: TimeDelta) -> Self {
        Self {
            min_count,
            min_duration,
            smoothed_min_ms: 0,
            count: 0,
            start_ms: 0,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

impl DelayIncreaseDetectorInterface for IncreasingDelayDetector {
    fn update(&mut self, queue_delay: TimeDelta, period_end_ms: i64) -> TimeDelta {
        let delay_ms = queue_delay.ms();

        if self.smoothed_min_ms >= delay_ms {
            self.count = 0;
            self.start_ms = 0;
            self.smoothed_min_ms = delay_ms;
            return TimeDelta::zero();
        }

        self.count += 1;
        if self.count == 1 {
            self.start_ms = period_end_ms;
        }
        self.smoothed_min_ms = (self.smoothed_min_ms * Self::SMOOTHING_PERCENT
            + delay_ms * (100 - Self::SMOOTHING_PERCENT))
            / 100;

        let duration = TimeDelta::from_millis(period_end_ms - self.start_ms);
        if self.count >= self.min_count && duration >= self.min_duration {
            tracing::trace!(count = self.count, ?duration, "queue delay increasing");
            return duration;
        }
        TimeDelta::zero()
    }

    fn reset(&mut self) {
        self.smoothed_min_ms = 0;
        self.count = 0;
        self.start_ms = 0;
    }
}
