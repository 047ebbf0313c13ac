use crate::rtp_rtcp::FeedbackReport;

/// Loss and ECN-CE rates fed into the rate controller.
///
/// Both are fractions in `[0, 1]`. Implementations may derive them from the
/// reports themselves or from another source, such as receiver reports.
pub trait CongestionSignals {
    fn on_feedback(&mut self, _report: &FeedbackReport) {}
    fn loss_rate(&self) -> f64;
    fn ecn_rate(&self) -> f64;
}

/// Reports constant rates, zero unless configured otherwise.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FixedCongestionSignals {
    pub loss_rate: f64,
    pub ecn_rate: f64,
}

impl CongestionSignals for FixedCongestionSignals {
    fn loss_rate(&self) -> f64 {
        self.loss_rate
    }

    fn ecn_rate(&self) -> f64 {
        self.ecn_rate
    }
}
