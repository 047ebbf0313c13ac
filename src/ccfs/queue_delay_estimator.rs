use std::collections::VecDeque;

use super::{ParsedFeedback, QueueDelaySettings, ReportPeriod, VirtualQueue};
use crate::api::units::{DataRate, TimeDelta};

/// Queue delay figures of one report period, all in whole milliseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueDelayEstimate {
    /// Smallest relative delay seen in the period.
    pub latest: TimeDelta,
    pub window_min: TimeDelta,
    /// Spread between the largest and smallest period delay in the window.
    pub window_range: TimeDelta,
    /// Delay the virtual queue attributes to other flows, smoothed.
    pub cross_traffic: TimeDelta,
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    delay: TimeDelta,
    period_end_ms: i64,
}

/// Turns one-way delays into queueing delays relative to the smallest delay
/// of the session.
///
/// The sender and receiver clocks are not synchronized, so the smallest
/// observed delay stands in for the propagation delay plus clock offset.
#[derive(Debug)]
pub struct QueueDelayEstimator {
    window: TimeDelta,
    cross_traffic_smoothing: f64,

    base_delay_ms: Option<i64>,
    delay_window: VecDeque<WindowEntry>,
    last_queue_delay: TimeDelta,
    cross_traffic_ms: f64,
    virtual_queue: VirtualQueue,
}

impl QueueDelayEstimator {
    pub fn new(settings: &QueueDelaySettings, headroom: f64) -> Self {
        Self {
            window: settings.window,
            cross_traffic_smoothing: settings.cross_traffic_smoothing,
            base_delay_ms: None,
            delay_window: VecDeque::new(),
            last_queue_delay: TimeDelta::zero(),
            cross_traffic_ms: 0.0,
            virtual_queue: VirtualQueue::new(settings, headroom),
        }
    }

    pub fn update(
        &mut self,
        period: &ReportPeriod,
        parsed: &ParsedFeedback,
        estimated_bandwidth: Option<DataRate>,
    ) -> QueueDelayEstimate {
        while let Some(front) = self.delay_window.front() {
            if front.period_end_ms + self.window.ms() >= period.end_ms {
                break;
            }
            self.delay_window.pop_front();
        }

        let mut window_min = self.delay_window.iter().map(|entry| entry.delay).min();
        let mut window_max = self.delay_window.iter().map(|entry| entry.delay).max();

        let mut measured_ms = Vec::with_capacity(parsed.samples.len());
        for sample in &parsed.samples {
            let raw_ms = sample.raw_delay_ms();
            if self.base_delay_ms.map_or(true, |base| raw_ms < base) {
                tracing::debug!(raw_ms, previous = ?self.base_delay_ms, "base delay updated");
                self.base_delay_ms = Some(raw_ms);
            }
            measured_ms.push(raw_ms - self.base_delay_ms.unwrap_or(raw_ms));
        }

        let latest = match measured_ms.iter().min() {
            Some(&min_ms) => {
                let latest = TimeDelta::from_millis(min_ms);
                window_min = Some(window_min.map_or(latest, |min| min.min(latest)));
                window_max = Some(window_max.map_or(latest, |max| max.max(latest)));
                self.delay_window.push_back(WindowEntry {
                    delay: latest,
                    period_end_ms: period.end_ms,
                });
                latest
            }
            None => window_min.unwrap_or(self.last_queue_delay),
        };

        let window_min = window_min.unwrap_or(latest);
        let window_range = window_max.map_or(TimeDelta::zero(), |max| max - window_min);

        self.virtual_queue.update(
            &parsed.samples,
            &measured_ms,
            latest,
            self.last_queue_delay,
            estimated_bandwidth,
        );

        // Queue time is truncated to whole milliseconds.
        let cross_traffic_ms = (latest.ms() - self.virtual_queue.queue_time().us() / 1000) as f64;
        if cross_traffic_ms > 0.0 {
            self.cross_traffic_ms = if self.cross_traffic_ms == 0.0 {
                cross_traffic_ms
            } else {
                self.cross_traffic_smoothing * self.cross_traffic_ms
                    + (1.0 - self.cross_traffic_smoothing) * cross_traffic_ms
            };
        } else {
            self.cross_traffic_ms = 0.0;
        }

        self.last_queue_delay = latest;

        let estimate = QueueDelayEstimate {
            latest,
            window_min,
            window_range,
            cross_traffic: TimeDelta::from_millis_float(self.cross_traffic_ms),
        };
        tracing::debug!(?estimate, base_delay_ms = ?self.base_delay_ms, "queue delay");

        estimate
    }

    pub fn last_queue_delay(&self) -> TimeDelta {
        self.last_queue_delay
    }

    pub fn base_delay_ms(&self) -> Option<i64> {
        self.base_delay_ms
    }

    pub fn window_len(&self) -> usize {
        self.delay_window.len()
    }

    pub fn virtual_queue(&self) -> &VirtualQueue {
        &self.virtual_queue
    }

    pub fn reset(&mut self) {
        self.base_delay_ms = None;
        self.delay_window.clear();
        self.last_queue_delay = TimeDelta::zero();
        self.cross_traffic_ms = 0.0;
        self.virtual_queue.reset();
    }
}
