use std::collections::{btree_map, BTreeMap};

use crate::api::transport::EcnMarking;

/// The receive state of one acknowledged packet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricBlock {
    /// Two-bit ECN codepoint, 0..=3.
    pub ecn: u8,
    /// Arrival time on the receiver's clock.
    pub arrival_time_ms: u64,
}

impl MetricBlock {
    pub fn ecn_marking(&self) -> EcnMarking {
        EcnMarking::from_bits(self.ecn).unwrap_or_default()
    }
}

/// Outcome of recording one arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    /// First arrival of a new stream.
    NewStream,
    AddedToExisting,
    /// (ssrc, seq) was already recorded; the first arrival is kept.
    Duplicate,
    /// The ECN value does not fit two bits.
    BadMark,
}

/// Sequences at or below this belong to the front half of the 16-bit space.
const HALF_SEQUENCE_SPACE: u16 = 32768;

/// A front half starting below this is taken as having wrapped past 65535.
// TODO: derive the threshold from the report interval and send rate instead
// of a fixed distance from zero.
const WRAPAROUND_THRESHOLD: u16 = 100;

/// All arrivals recorded for one stream, with the acknowledged sequence range.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReportBlock {
    metrics: BTreeMap<u16, MetricBlock>,
    count: u32,
    end_seq: u16,
}

impl ReportBlock {
    pub(crate) fn insert(&mut self, seq: u16, metric: MetricBlock) -> bool {
        match self.metrics.entry(seq) {
            btree_map::Entry::Occupied(_) => false,
            btree_map::Entry::Vacant(entry) => {
                entry.insert(metric);
                (self.count, self.end_seq) = self.calc_count_end_seq();
                true
            }
        }
    }

    /// Number of sequence numbers covered, received or not. Can reach 65536.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn end_seq(&self) -> u16 {
        self.end_seq
    }

    pub fn begin_seq(&self) -> u16 {
        self.end_seq.wrapping_sub(self.count.saturating_sub(1) as u16)
    }

    /// Every sequence number in the range, oldest first.
    pub fn sequence_range(&self) -> impl Iterator<Item = u16> {
        let begin = self.begin_seq();
        (0..self.count).map(move |i| begin.wrapping_add(i as u16))
    }

    pub fn get(&self, seq: u16) -> Option<&MetricBlock> {
        self.metrics.get(&seq)
    }

    /// Received entries in range order, which differs from numeric order
    /// after a wraparound.
    pub fn metric_list(&self) -> Vec<(u16, MetricBlock)> {
        self.sequence_range()
            .filter_map(|seq| self.metrics.get(&seq).map(|metric| (seq, *metric)))
            .collect()
    }

    pub fn received(&self) -> usize {
        self.metrics.len()
    }

    // Splits the recorded numbers into a front half (<= 32768) and a rear half.
    // With both halves present, a front half starting near zero means the
    // stream wrapped: the range runs from the rear low end through 65535 into
    // the front. Otherwise the range simply spans both halves.
    fn calc_count_end_seq(&self) -> (u32, u16) {
        let mut front = self.metrics.range(..=HALF_SEQUENCE_SPACE);
        let mut rear = self.metrics.range(HALF_SEQUENCE_SPACE + 1..);

        let front_lo = front.next().map(|(seq, _)| *seq as u32);
        let front_hi = front.next_back().map(|(seq, _)| *seq as u32).or(front_lo);
        let rear_lo = rear.next().map(|(seq, _)| *seq as u32);
        let rear_hi = rear.next_back().map(|(seq, _)| *seq as u32).or(rear_lo);

        let (lo, hi) = match (front_lo, front_hi, rear_lo, rear_hi) {
            (None, _, None, _) => return (0, 0),
            (Some(lo), Some(hi), None, _) | (None, _, Some(lo), Some(hi)) => (lo, hi),
            (Some(front_lo), Some(front_hi), Some(rear_lo), Some(rear_hi)) => {
                if front_lo < WRAPAROUND_THRESHOLD as u32 {
                    tracing::trace!(front_lo, front_hi, rear_lo, rear_hi, "sequence wraparound");
                    (rear_lo, front_hi + 65536)
                } else {
                    (front_lo, rear_hi)
                }
            }
            _ => return (0, 0),
        };

        (hi - lo + 1, (hi % 65536) as u16)
    }
}
