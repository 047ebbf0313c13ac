use std::collections::VecDeque;

use super::ReportPeriod;
use crate::api::units::{DataSize, TimeDelta};

#[derive(Debug, Clone, Copy)]
struct PeriodBytes {
    begin_ms: i64,
    sent: DataSize,
    received: DataSize,
}

/// Received over sent bytes across the recent periods.
///
/// A fraction well below one means the path is not delivering what is sent.
#[derive(Debug)]
pub struct BitrateFractionWindow {
    window: TimeDelta,
    periods: VecDeque<PeriodBytes>,
    total_sent: DataSize,
    total_received: DataSize,
}

impl BitrateFractionWindow {
    pub fn new(window: TimeDelta) -> Self {
        Self {
            window,
            periods: VecDeque::new(),
            total_sent: DataSize::zero(),
            total_received: DataSize::zero(),
        }
    }

    /// Adds a period and returns the fraction over the window, or None when
    /// nothing was sent within it.
    pub fn update(
        &mut self,
        period: &ReportPeriod,
        received: DataSize,
        sent: DataSize,
    ) -> Option<f64> {
        self.periods.push_back(PeriodBytes {
            begin_ms: period.begin_ms,
            sent,
            received,
        });
        self.total_sent += sent;
        self.total_received += received;

        while let Some(front) = self.periods.front() {
            if front.begin_ms + self.window.ms() >= period.end_ms {
                break;
            }
            self.total_sent -= front.sent;
            self.total_received -= front.received;
            self.periods.pop_front();
        }

        self.fraction()
    }

    pub fn fraction(&self) -> Option<f64> {
        if self.total_sent <= DataSize::zero() {
            return None;
        }
        Some(self.total_received / self.total_sent)
    }

    pub fn reset(&mut self) {
        self.periods.clear();
        self.total_sent = DataSize::zero();
        self.total_received = DataSize::zero();
    }
}
