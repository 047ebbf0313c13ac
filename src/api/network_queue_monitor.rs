use super::units::{DataSize, TimeDelta, Timestamp};

/// Occupancy of the bottleneck queue when a packet was enqueued.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub at_time: Timestamp,
    pub packets: u32,
    pub bytes: DataSize,
    /// Time the packet is expected to wait before departure.
    pub delay: TimeDelta,
}

/// A sensor with a view of the bottleneck queue, such as a simulator or a
/// router exporting its queue state. Only used for diagnostics; estimates never
/// depend on it.
pub trait NetworkQueueMonitor {
    fn query(&self, ssrc: u32, seq: u16) -> Option<QueueSnapshot>;
    // Drops snapshots taken before `oldest`.
    fn prune(&mut self, oldest: Timestamp);
}
