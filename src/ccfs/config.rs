use crate::api::units::{DataRate, TimeDelta};

/// Queue delay estimation: the sliding window, the sustained increase
/// detector and the virtual queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueDelaySettings {
    // Span of period minimums kept for the window minimum and range.
    pub window: TimeDelta,

    // Consecutive increases and elapsed time before an increase is reported.
    pub increase_min_count: u32,
    pub increase_min_duration: TimeDelta,

    // Propagation delay assumed by the virtual queue.
    pub virtual_queue_base_delay: TimeDelta,
    pub virtual_queue_bandwidth_step: DataRate,
    pub virtual_queue_max_steps: usize,

    // Weight of the old value in the cross traffic delay average.
    pub cross_traffic_smoothing: f64,
}

impl QueueDelaySettings {
    pub fn validate(&mut self) {
        let default = Self::default();

        if self.window <= TimeDelta::zero() {
            tracing::warn!("Queue delay window must be positive, was {:?}", self.window);
            self.window = default.window;
        }
        if self.increase_min_count == 0 {
            tracing::warn!("Increase detection needs at least one increase");
            self.increase_min_count = default.increase_min_count;
        }
        if self.increase_min_duration < TimeDelta::zero() {
            tracing::warn!("Increase duration must not be negative");
            self.increase_min_duration = default.increase_min_duration;
        }
        if self.virtual_queue_base_delay < TimeDelta::zero() {
            tracing::warn!("Virtual queue base delay must not be negative");
            self.virtual_queue_base_delay = default.virtual_queue_base_delay;
        }
        if self.virtual_queue_bandwidth_step <= DataRate::zero() {
            tracing::warn!("Virtual queue bandwidth step must be positive");
            self.virtual_queue_bandwidth_step = default.virtual_queue_bandwidth_step;
        }
        if self.virtual_queue_max_steps == 0 {
            tracing::warn!("Virtual queue search needs at least one step");
            self.virtual_queue_max_steps = default.virtual_queue_max_steps;
        }
        if !(0.0..1.0).contains(&self.cross_traffic_smoothing) {
            tracing::warn!("Cross traffic smoothing must be in [0, 1)");
            self.cross_traffic_smoothing = default.cross_traffic_smoothing;
        }
    }
}

impl Default for QueueDelaySettings {
    fn default() -> Self {
        Self {
            window: TimeDelta::from_millis(4000),
            increase_min_count: 3,
            increase_min_duration: TimeDelta::from_millis(500),
            virtual_queue_base_delay: TimeDelta::from_millis(20),
            virtual_queue_bandwidth_step: DataRate::from_kilobits_per_sec(100),
            virtual_queue_max_steps: 1000,
            cross_traffic_smoothing: 0.9,
        }
    }
}

/// Forward bandwidth estimation and the received/sent byte fraction.
#[derive(Debug, Clone, PartialEq)]
pub struct BandwidthSettings {
    // Weight of the old estimate.
    pub smoothing: f64,
    // Share of the received rate left unused when updating the estimate.
    pub headroom: f64,
    pub fraction_window: TimeDelta,
}

impl BandwidthSettings {
    pub fn validate(&mut self) {
        let default = Self::default();

        if !(0.0..1.0).contains(&self.smoothing) {
            tracing::warn!("Bandwidth smoothing must be in [0, 1)");
            self.smoothing = default.smoothing;
        }
        if !(0.0..1.0).contains(&self.headroom) {
            tracing::warn!("Bandwidth headroom must be in [0, 1)");
            self.headroom = default.headroom;
        }
        if self.fraction_window <= TimeDelta::zero() {
            tracing::warn!("Bitrate fraction window must be positive");
            self.fraction_window = default.fraction_window;
        }
    }
}

impl Default for BandwidthSettings {
    fn default() -> Self {
        Self {
            smoothing: 0.9,
            headroom: 0.1,
            fraction_window: TimeDelta::from_millis(500),
        }
    }
}

/// Thresholds and multipliers of the rate control state machine.
///
/// Fractions compare the latest queue delay to the target queue delay
/// (`qd`) or received to sent bytes (`br`).
#[derive(Debug, Clone, PartialEq)]
pub struct RateControlSettings {
    pub target_queue_delay: TimeDelta,
    pub min_target_queue_delay: TimeDelta,
    pub max_target_queue_delay: TimeDelta,
    pub compete_target_queue_delay: TimeDelta,
    // Normalizes the cross traffic delay.
    pub cross_traffic_target_queue_delay: TimeDelta,

    pub initial_probe_wait: TimeDelta,
    pub compete_maintain_time: TimeDelta,
    pub probing_timeout: TimeDelta,
    pub probing_increment: DataRate,

    pub throttle_qd_fraction: f64,
    pub throttle_br_fraction: f64,

    pub compete_increase_time: TimeDelta,
    pub compete_queue_range: TimeDelta,
    pub compete_queue_delay: TimeDelta,
    pub stop_compete_queue_delay: TimeDelta,
    pub stop_compete_queue_range: TimeDelta,

    pub probe_queue_delay: TimeDelta,
    pub probe_queue_range: TimeDelta,
    pub probe_br_fraction: f64,
    pub probe_loss_rate: f64,
    pub probe_ecn_rate: f64,

    pub stop_probe_qd_fraction: f64,
    pub stop_probe_br_fraction: f64,
    pub stop_probe_loss_rate: f64,
    pub stop_probe_ecn_rate: f64,

    pub compete_rate_up: f64,
    pub throttle_rate: f64,

    pub default_low_qd_fraction: f64,
    pub default_high_qd_fraction: f64,
    pub default_increase_rate: f64,
    pub default_decrease_rate: f64,

    pub competing_low_band: f64,
    pub competing_high_band: f64,
    pub competing_increase_rate: f64,
    pub competing_decrease_rate: f64,

    // While competing, a bandwidth increase is undone at or above this.
    pub competing_rollback_qd_fraction: f64,
}

impl RateControlSettings {
    pub fn validate(&mut self) {
        let default = Self::default();

        if self.min_target_queue_delay < TimeDelta::zero()
            || self.max_target_queue_delay <= self.min_target_queue_delay
        {
            tracing::warn!(
                "Target queue delay bounds [{:?}, {:?}] are invalid",
                self.min_target_queue_delay,
                self.max_target_queue_delay
            );
            self.min_target_queue_delay = default.min_target_queue_delay;
            self.max_target_queue_delay = default.max_target_queue_delay;
        }

        let bounds = self.min_target_queue_delay..=self.max_target_queue_delay;
        if !bounds.contains(&self.target_queue_delay) || self.target_queue_delay.is_zero() {
            tracing::warn!("Target queue delay must be positive and within bounds");
            self.target_queue_delay = default.target_queue_delay.clamped(
                self.min_target_queue_delay,
                self.max_target_queue_delay,
            );
        }
        if !bounds.contains(&self.compete_target_queue_delay)
            || self.compete_target_queue_delay.is_zero()
        {
            tracing::warn!("Compete target queue delay must be positive and within bounds");
            self.compete_target_queue_delay = default.compete_target_queue_delay.clamped(
                self.min_target_queue_delay,
                self.max_target_queue_delay,
            );
        }
        if self.cross_traffic_target_queue_delay <= TimeDelta::zero() {
            tracing::warn!("Cross traffic target queue delay must be positive");
            self.cross_traffic_target_queue_delay = default.cross_traffic_target_queue_delay;
        }
        if self.probing_increment <= DataRate::zero() {
            tracing::warn!("Probing increment must be positive");
            self.probing_increment = default.probing_increment;
        }

        if self.default_increase_rate <= 1.0 || self.competing_increase_rate <= 1.0 {
            tracing::warn!("Increase rates must be above 1");
            self.default_increase_rate = default.default_increase_rate;
            self.competing_increase_rate = default.competing_increase_rate;
        }
        if self.compete_rate_up <= 1.0 {
            tracing::warn!("Compete rate up must be above 1");
            self.compete_rate_up = default.compete_rate_up;
        }
        for (name, rate, fallback) in [
            (
                "default_decrease_rate",
                &mut self.default_decrease_rate,
                default.default_decrease_rate,
            ),
            (
                "competing_decrease_rate",
                &mut self.competing_decrease_rate,
                default.competing_decrease_rate,
            ),
            ("throttle_rate", &mut self.throttle_rate, default.throttle_rate),
        ] {
            if *rate <= 0.0 || *rate >= 1.0 {
                tracing::warn!("{} must be in (0, 1), was {}", name, rate);
                *rate = fallback;
            }
        }

        if self.default_low_qd_fraction >= self.default_high_qd_fraction {
            tracing::warn!("Default queue delay band is empty");
            self.default_low_qd_fraction = default.default_low_qd_fraction;
            self.default_high_qd_fraction = default.default_high_qd_fraction;
        }
        if self.competing_low_band >= self.competing_high_band {
            tracing::warn!("Competing rate band is empty");
            self.competing_low_band = default.competing_low_band;
            self.competing_high_band = default.competing_high_band;
        }
    }
}

impl Default for RateControlSettings {
    fn default() -> Self {
        Self {
            target_queue_delay: TimeDelta::from_millis(50),
            min_target_queue_delay: TimeDelta::zero(),
            max_target_queue_delay: TimeDelta::from_millis(250),
            compete_target_queue_delay: TimeDelta::from_millis(100),
            cross_traffic_target_queue_delay: TimeDelta::from_millis(50),

            initial_probe_wait: TimeDelta::from_millis(4000),
            compete_maintain_time: TimeDelta::from_millis(4000),
            probing_timeout: TimeDelta::from_millis(4000),
            probing_increment: DataRate::from_kilobits_per_sec(200),

            throttle_qd_fraction: 1.5,
            throttle_br_fraction: 0.9,

            compete_increase_time: TimeDelta::from_millis(2000),
            compete_queue_range: TimeDelta::from_millis(150),
            compete_queue_delay: TimeDelta::from_millis(150),
            stop_compete_queue_delay: TimeDelta::from_millis(50),
            stop_compete_queue_range: TimeDelta::from_millis(20),

            probe_queue_delay: TimeDelta::from_millis(20),
            probe_queue_range: TimeDelta::from_millis(15),
            probe_br_fraction: 1.0,
            probe_loss_rate: 0.001,
            probe_ecn_rate: 0.001,

            stop_probe_qd_fraction: 1.3,
            stop_probe_br_fraction: 0.8,
            stop_probe_loss_rate: 0.03,
            stop_probe_ecn_rate: 0.001,

            compete_rate_up: 1.3,
            throttle_rate: 0.5,

            default_low_qd_fraction: 0.5,
            default_high_qd_fraction: 1.05,
            default_increase_rate: 1.005,
            default_decrease_rate: 0.98,

            competing_low_band: 0.95,
            competing_high_band: 1.05,
            competing_increase_rate: 1.02,
            competing_decrease_rate: 0.95,

            competing_rollback_qd_fraction: 1.5,
        }
    }
}

/// Everything tunable about a [CcfsController](super::CcfsController).
#[derive(Debug, Clone, PartialEq)]
pub struct CcfsConfig {
    pub min_bitrate: DataRate,
    pub max_bitrate: DataRate,
    pub start_bitrate: DataRate,

    // Sent packets older than this, relative to the newest send of the same
    // stream, are forgotten.
    pub sent_packet_retention: TimeDelta,

    pub queue_delay: QueueDelaySettings,
    pub bandwidth: BandwidthSettings,
    pub rate_control: RateControlSettings,
}

impl CcfsConfig {
    pub fn validate(&mut self) {
        let default = Self::default();

        if self.min_bitrate <= DataRate::zero()
            || self.max_bitrate < self.min_bitrate
            || !self.max_bitrate.is_finite()
        {
            tracing::warn!(
                "Bitrate bounds [{:?}, {:?}] are invalid",
                self.min_bitrate,
                self.max_bitrate
            );
            self.min_bitrate = default.min_bitrate;
            self.max_bitrate = default.max_bitrate;
        }
        if self.start_bitrate < self.min_bitrate || self.start_bitrate > self.max_bitrate {
            tracing::warn!(
                "Start bitrate {:?} is outside [{:?}, {:?}]",
                self.start_bitrate,
                self.min_bitrate,
                self.max_bitrate
            );
            self.start_bitrate = self.min_bitrate;
        }
        if self.sent_packet_retention <= TimeDelta::zero() {
            tracing::warn!("Sent packet retention must be positive");
            self.sent_packet_retention = default.sent_packet_retention;
        }

        self.queue_delay.validate();
        self.bandwidth.validate();
        self.rate_control.validate();
    }
}

impl Default for CcfsConfig {
    fn default() -> Self {
        Self {
            min_bitrate: DataRate::from_kilobits_per_sec(150),
            max_bitrate: DataRate::from_kilobits_per_sec(1500),
            start_bitrate: DataRate::from_kilobits_per_sec(150),
            sent_packet_retention: TimeDelta::from_millis(10_000),
            queue_delay: QueueDelaySettings::default(),
            bandwidth: BandwidthSettings::default(),
            rate_control: RateControlSettings::default(),
        }
    }
}
