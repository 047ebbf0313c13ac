use std::fmt;

use super::{QueueDelayEstimate, RateControlSettings};
use crate::api::{
    transport::SenderState,
    units::{DataRate, TimeDelta, Timestamp},
};

/// What one report period tells the state machine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlEvent {
    #[default]
    Nothing,
    ResolveThrottle,
    DetectThrottle,
    StartCompete,
    StopCompete,
    StartProbing,
    StopProbing,
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Nothing => "nothing",
            Self::ResolveThrottle => "resolve_throttle",
            Self::DetectThrottle => "detect_throttle",
            Self::StartCompete => "start_compete",
            Self::StopCompete => "stop_compete",
            Self::StartProbing => "start_probing",
            Self::StopProbing => "stop_probing",
        };
        f.write_str(name)
    }
}

/// Congestion indications gathered from one report.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ControlSignals {
    pub queue_delay: QueueDelayEstimate,
    /// How long the queue delay has been rising, zero if it is not.
    pub increasing: TimeDelta,
    /// Received over sent bytes in the recent window, None if nothing was sent.
    pub br_fraction: Option<f64>,
    pub loss_rate: f64,
    pub ecn_rate: f64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ControlDecision {
    pub event: ControlEvent,
    /// Latest queue delay over the target queue delay.
    pub qd_fraction: f64,
    /// Cross traffic delay over its target, zero without cross traffic.
    pub xq_fraction: f64,
}

/// The sender's four-state rate controller.
///
/// Default tracks the target queue delay with small multiplicative steps.
/// Competing raises the target delay to hold its share against
/// queue-building flows. Probing sends above the estimate to look for spare
/// capacity. Throttled halves the rate after the path stopped delivering
/// what was sent.
#[derive(Debug)]
pub struct RateController {
    settings: RateControlSettings,
    min_bitrate: DataRate,
    max_bitrate: DataRate,
    start_bitrate: DataRate,

    state: SenderState,
    target_rate: DataRate,
    target_queue_delay: TimeDelta,
    throttled_estimate: DataRate,
    last_compete: Option<Timestamp>,
    probing_start: Option<Timestamp>,
}

impl RateController {
    pub fn new(
        settings: RateControlSettings,
        min_bitrate: DataRate,
        max_bitrate: DataRate,
        start_bitrate: DataRate,
    ) -> Self {
        Self {
            target_queue_delay: settings.target_queue_delay,
            settings,
            min_bitrate,
            max_bitrate,
            start_bitrate,
            state: SenderState::Default,
            target_rate: start_bitrate,
            throttled_estimate: DataRate::zero(),
            last_compete: None,
            probing_start: None,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn target_rate(&self) -> DataRate {
        self.target_rate
    }

    pub fn target_queue_delay(&self) -> TimeDelta {
        self.target_queue_delay
    }

    /// Picks the event for this period. The first matching rule wins.
    pub fn classify(
        &self,
        at_time: Timestamp,
        session_start: Option<Timestamp>,
        estimate: Option<DataRate>,
        signals: &ControlSignals,
    ) -> ControlDecision {
        let settings = &self.settings;
        let delay = &signals.queue_delay;

        let qd_fraction = delay.latest / self.target_queue_delay;
        let xq_fraction = if delay.cross_traffic > TimeDelta::zero() {
            delay.cross_traffic / settings.cross_traffic_target_queue_delay
        } else {
            0.0
        };

        let mut decision = ControlDecision {
            event: ControlEvent::Nothing,
            qd_fraction,
            xq_fraction,
        };

        if estimate.map_or(true, |estimate| estimate <= DataRate::zero()) {
            return decision;
        }

        // An unknown fraction satisfies neither side of a comparison.
        let br_below = |threshold: f64| signals.br_fraction.map_or(false, |br| br < threshold);
        let br_at_least = |threshold: f64| signals.br_fraction.map_or(false, |br| br >= threshold);
        let increasing = signals.increasing > TimeDelta::zero();

        decision.event = if self.state == SenderState::Throttled && qd_fraction < 1.0 {
            ControlEvent::ResolveThrottle
        } else if increasing
            && qd_fraction >= settings.throttle_qd_fraction
            && br_below(settings.throttle_br_fraction)
        {
            ControlEvent::DetectThrottle
        } else if (delay.window_range > settings.compete_queue_range
            || delay.latest > settings.compete_queue_delay)
            && signals.increasing > settings.compete_increase_time
        {
            ControlEvent::StartCompete
        } else if self.state == SenderState::Competing
            && self.last_compete.map_or(true, |last| {
                at_time - last > settings.compete_maintain_time
            })
            && delay.latest < settings.stop_compete_queue_delay
            && delay.window_range < settings.stop_compete_queue_range
        {
            ControlEvent::StopCompete
        } else if session_start.map_or(false, |start| {
            at_time - start > settings.initial_probe_wait
        }) && self.state != SenderState::Probing
            && delay.latest < settings.probe_queue_delay
            && br_at_least(settings.probe_br_fraction)
            && delay.window_range < settings.probe_queue_range
            && signals.ecn_rate < settings.probe_ecn_rate
            && signals.loss_rate < settings.probe_loss_rate
        {
            ControlEvent::StartProbing
        } else if self.state == SenderState::Probing
            && (increasing
                || qd_fraction > settings.stop_probe_qd_fraction
                || br_below(settings.stop_probe_br_fraction)
                || signals.ecn_rate > settings.stop_probe_ecn_rate
                || signals.loss_rate > settings.stop_probe_loss_rate)
        {
            ControlEvent::StopProbing
        } else {
            ControlEvent::Nothing
        };

        decision
    }

    /// Runs the state machine for one event.
    pub fn apply(
        &mut self,
        at_time: Timestamp,
        decision: &ControlDecision,
        estimate: Option<DataRate>,
    ) {
        let estimate_or_zero = estimate.unwrap_or(DataRate::zero());

        match (self.state, decision.event) {
            (SenderState::Default, ControlEvent::Nothing) => {
                // Nothing to track before the first estimate.
                let Some(estimate) = estimate.filter(|rate| *rate > DataRate::zero()) else {
                    return;
                };
                let settings = &self.settings;
                let rate = if decision.qd_fraction < settings.default_low_qd_fraction
                    && self.target_rate < estimate
                {
                    self.target_rate * settings.default_increase_rate
                } else if decision.qd_fraction > settings.default_high_qd_fraction {
                    self.target_rate * settings.default_decrease_rate
                } else {
                    return;
                };
                self.update_target_rate(rate);
            }
            (SenderState::Default, ControlEvent::StartProbing) => {
                self.update_target_rate(estimate_or_zero + self.settings.probing_increment);
                self.probing_start = Some(at_time);
                self.transition(SenderState::Probing, decision);
            }
            (SenderState::Default | SenderState::Probing, ControlEvent::StartCompete) => {
                self.enter_competing(at_time, decision);
            }
            (SenderState::Default, ControlEvent::DetectThrottle) => {
                self.update_target_rate(self.target_rate * self.settings.throttle_rate);
                self.throttled_estimate = estimate_or_zero;
                self.transition(SenderState::Throttled, decision);
            }

            (SenderState::Competing, ControlEvent::Nothing) => {
                let Some(estimate) = estimate else {
                    return;
                };
                let settings = &self.settings;
                let mut rate = self.target_rate;
                if rate < estimate * settings.competing_low_band {
                    rate = rate * settings.competing_increase_rate;
                }
                if rate > estimate * settings.competing_high_band {
                    rate = rate * settings.competing_decrease_rate;
                }
                self.update_target_rate(rate);
            }
            (SenderState::Competing, ControlEvent::StartCompete) => {
                self.last_compete = Some(at_time);
            }
            (SenderState::Competing, ControlEvent::StopCompete) => {
                self.update_target_queue_delay(self.settings.target_queue_delay);
                self.last_compete = None;
                self.transition(SenderState::Default, decision);
            }

            (SenderState::Probing, ControlEvent::Nothing) => {
                let timed_out = self.probing_start.map_or(true, |start| {
                    at_time > start + self.settings.probing_timeout
                });
                if timed_out {
                    self.probing_start = None;
                    self.transition(SenderState::Default, decision);
                }
            }
            (SenderState::Probing, ControlEvent::StopProbing) => {
                self.update_target_rate(estimate_or_zero);
                self.probing_start = None;
                self.transition(SenderState::Default, decision);
            }
            (SenderState::Probing, ControlEvent::DetectThrottle) => {
                self.update_target_rate(estimate_or_zero * self.settings.throttle_rate);
                self.throttled_estimate = estimate_or_zero;
                self.probing_start = None;
                self.transition(SenderState::Throttled, decision);
            }

            (SenderState::Throttled, ControlEvent::ResolveThrottle) => {
                self.update_target_rate(self.throttled_estimate);
                self.transition(SenderState::Default, decision);
            }
            (SenderState::Throttled, ControlEvent::StartCompete) => {
                self.update_target_rate(self.throttled_estimate);
                self.enter_competing(at_time, decision);
            }
            (SenderState::Throttled, ControlEvent::DetectThrottle) => {
                self.throttled_estimate = estimate_or_zero;
            }

            // Competing stays put on throttling, and everything else has no
            // effect in the current state.
            _ => {}
        }
    }

    pub fn reset(&mut self) {
        self.state = SenderState::Default;
        self.target_rate = self.start_bitrate;
        self.target_queue_delay = self.settings.target_queue_delay;
        self.throttled_estimate = DataRate::zero();
        self.last_compete = None;
        self.probing_start = None;
    }

    fn enter_competing(&mut self, at_time: Timestamp, decision: &ControlDecision) {
        self.update_target_rate(self.target_rate * self.settings.compete_rate_up);
        self.update_target_queue_delay(self.settings.compete_target_queue_delay);
        self.last_compete = Some(at_time);
        self.probing_start = None;
        self.transition(SenderState::Competing, decision);
    }

    fn transition(&mut self, state: SenderState, decision: &ControlDecision) {
        tracing::info!(
            from = %self.state,
            to = %state,
            event = %decision.event,
            qd_fraction = decision.qd_fraction,
            target_rate = ?self.target_rate,
            "sender state changed"
        );
        self.state = state;
    }

    fn update_target_rate(&mut self, rate: DataRate) {
        let rate = rate.clamped(self.min_bitrate, self.max_bitrate);
        if rate != self.target_rate {
            tracing::debug!(previous = ?self.target_rate, ?rate, "target rate");
        }
        self.target_rate = rate;
    }

    fn update_target_queue_delay(&mut self, delay: TimeDelta) {
        self.target_queue_delay = delay.clamped(
            self.settings.min_target_queue_delay,
            self.settings.max_target_queue_delay,
        );
    }
}
