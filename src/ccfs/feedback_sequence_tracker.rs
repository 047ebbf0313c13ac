use crate::api::units::{latest_sequence_number, SequenceNumberUnwrapper};

/// Where a report's feedback sequence number falls relative to the ones
/// already seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackSequenceStatus {
    First,
    InOrder,
    /// Reports in between never arrived.
    Gap(u64),
    Duplicate,
    /// Older than the newest report seen.
    Reordered,
}

/// Watches the feedback sequence numbers for lost and reordered reports.
/// Reports are processed either way.
#[derive(Debug, Default)]
pub struct FeedbackSequenceTracker {
    unwrapper: SequenceNumberUnwrapper,
    highest: Option<i64>,
    latest_seq: u16,
    lost: u64,
    duplicates: u64,
    reordered: u64,
}

impl FeedbackSequenceTracker {
    pub fn on_feedback(&mut self, feedback_seq: u16) -> FeedbackSequenceStatus {
        let unwrapped = self.unwrapper.unwrap(feedback_seq);

        let Some(highest) = self.highest else {
            self.highest = Some(unwrapped);
            self.latest_seq = feedback_seq;
            return FeedbackSequenceStatus::First;
        };

        self.latest_seq = latest_sequence_number(self.latest_seq, feedback_seq);

        let status = if unwrapped == highest {
            self.duplicates += 1;
            FeedbackSequenceStatus::Duplicate
        } else if unwrapped < highest {
            self.reordered += 1;
            FeedbackSequenceStatus::Reordered
        } else if unwrapped > highest + 1 {
            let missing = (unwrapped - highest - 1) as u64;
            self.lost += missing;
            FeedbackSequenceStatus::Gap(missing)
        } else {
            FeedbackSequenceStatus::InOrder
        };
        self.highest = Some(highest.max(unwrapped));

        match status {
            FeedbackSequenceStatus::InOrder => {}
            FeedbackSequenceStatus::Gap(missing) => {
                tracing::warn!(feedback_seq, missing, "feedback reports lost")
            }
            _ => tracing::debug!(feedback_seq, latest = self.latest_seq, ?status, "feedback out of order"),
        }

        status
    }

    /// The newest feedback sequence number seen.
    pub fn latest_seq(&self) -> Option<u16> {
        self.highest.map(|_| self.latest_seq)
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn reordered(&self) -> u64 {
        self.reordered
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
