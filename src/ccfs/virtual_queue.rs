use super::{QueueDelaySample, QueueDelaySettings};
use crate::api::units::{DataRate, TimeDelta, Timestamp};

/// Replays the period's sends through a single FIFO link of unknown capacity.
///
/// The capacity is raised from the current estimate until our own packets
/// alone can no longer explain the measured queue delay. What remains is
/// attributed to cross traffic.
#[derive(Debug, Clone)]
pub struct VirtualQueue {
    base_delay: TimeDelta,
    bandwidth_step: DataRate,
    max_steps: usize,
    headroom: f64,

    // Time the last packet spent in the model, queueing plus serialization.
    queue_time: TimeDelta,
    excess_delay: TimeDelta,
    last_send_time: Option<Timestamp>,
    bandwidth: DataRate,
    correlation: f64,
}

struct Replay {
    last_send_time: Option<Timestamp>,
    queue_time: TimeDelta,
    modeled_ms: Vec<i64>,
}

impl VirtualQueue {
    pub fn new(settings: &QueueDelaySettings, headroom: f64) -> Self {
        Self {
            base_delay: settings.virtual_queue_base_delay,
            bandwidth_step: settings.virtual_queue_bandwidth_step,
            max_steps: settings.virtual_queue_max_steps,
            headroom,
            queue_time: TimeDelta::zero(),
            excess_delay: TimeDelta::zero(),
            last_send_time: None,
            bandwidth: DataRate::zero(),
            correlation: 0.0,
        }
    }

    pub fn queue_time(&self) -> TimeDelta {
        self.queue_time
    }

    /// Queue time beyond the assumed propagation delay.
    pub fn excess_delay(&self) -> TimeDelta {
        self.excess_delay
    }

    /// The capacity the search settled on.
    pub fn bandwidth(&self) -> DataRate {
        self.bandwidth
    }

    /// Agreement between measured and modeled delays in the last period.
    pub fn correlation(&self) -> f64 {
        self.correlation
    }

    /// `previous_delay` is the queue delay measured in the prior period, which
    /// seeds the queue the first packet of this period finds.
    pub fn update(
        &mut self,
        samples: &[QueueDelaySample],
        measured_ms: &[i64],
        latest_delay: TimeDelta,
        previous_delay: TimeDelta,
        estimated_bandwidth: Option<DataRate>,
    ) {
        let Some(estimate) = estimated_bandwidth.filter(|rate| *rate > DataRate::zero()) else {
            return;
        };

        if latest_delay <= TimeDelta::zero() {
            self.queue_time = TimeDelta::zero();
            self.excess_delay = TimeDelta::zero();
            self.last_send_time = None;
            return;
        }

        // The seed departure only depends on the previous period.
        let seed_departure = if previous_delay.is_zero() {
            None
        } else {
            self.last_send_time
                .map(|send_time| send_time + previous_delay + self.base_delay)
        };

        let mut bandwidth = estimate * (1.0 / (1.0 - self.headroom));
        let mut replay = Self::replay(samples, bandwidth, seed_departure);
        let mut excess = self.excess_of(replay.queue_time);

        let mut steps = 0;
        while latest_delay.ms() < excess.ms() {
            if steps == self.max_steps {
                tracing::warn!(
                    ?bandwidth,
                    ?excess,
                    ?latest_delay,
                    "virtual queue search did not converge"
                );
                break;
            }
            steps += 1;

            bandwidth += self.bandwidth_step;
            replay = Self::replay(samples, bandwidth, seed_departure);
            excess = self.excess_of(replay.queue_time);
        }

        self.correlation = pearson_correlation(measured_ms, &replay.modeled_ms);
        self.queue_time = replay.queue_time;
        self.excess_delay = excess;
        self.last_send_time = replay.last_send_time;
        self.bandwidth = bandwidth;

        tracing::trace!(
            ?bandwidth,
            steps,
            queue_time = ?self.queue_time,
            correlation = self.correlation,
            "virtual queue"
        );
    }

    pub fn reset(&mut self) {
        self.queue_time = TimeDelta::zero();
        self.excess_delay = TimeDelta::zero();
        self.last_send_time = None;
        self.bandwidth = DataRate::zero();
        self.correlation = 0.0;
    }

    // Whole milliseconds, never negative.
    fn excess_of(&self, queue_time: TimeDelta) -> TimeDelta {
        TimeDelta::from_millis((queue_time - self.base_delay).us().max(0) / 1000)
    }

    fn replay(
        samples: &[QueueDelaySample],
        bandwidth: DataRate,
        seed_departure: Option<Timestamp>,
    ) -> Replay {
        let mut previous_departure = seed_departure;
        let mut replay = Replay {
            last_send_time: None,
            queue_time: TimeDelta::zero(),
            modeled_ms: Vec::with_capacity(samples.len()),
        };

        for sample in samples {
            let mut queue_time = sample.size / bandwidth;
            if let Some(departure) = previous_departure {
                if departure > sample.send_time {
                    queue_time += departure - sample.send_time;
                }
            }
            previous_departure = Some(sample.send_time + queue_time);

            replay.modeled_ms.push(queue_time.us() / 1000);
            replay.last_send_time = Some(sample.send_time);
            replay.queue_time = queue_time;
        }

        replay
    }
}

/// Pearson correlation coefficient, or zero when undefined.
pub fn pearson_correlation(x: &[i64], y: &[i64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }

    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx, mut sum_yy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (&x, &y) in x.iter().zip(y) {
        let (x, y) = (x as f64, y as f64);
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
        sum_yy += y * y;
    }

    let n = n as f64;
    let denominator = ((n * sum_xx - sum_x * sum_x) * (n * sum_yy - sum_y * sum_y)).sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denominator
}
