use std::fmt;

use crate::api::units::{DataRate, DataSize, TimeDelta, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentPacket {
    pub ssrc: u32,
    /// RTP sequence number, unique within the stream modulo 2^16.
    pub sequence_number: u16,
    pub send_time: Timestamp,
    /// Size of packet with overhead up to IP layer.
    pub size: DataSize,
}

impl Default for SentPacket {
    fn default() -> Self {
        Self {
            ssrc: 0,
            sequence_number: 0,
            send_time: Timestamp::plus_infinity(),
            size: DataSize::zero(),
        }
    }
}

/// The mode of the sender's rate controller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SenderState {
    #[default]
    Default,
    /// Sharing the bottleneck with queue-building cross traffic.
    Competing,
    /// Temporarily sending above the estimate to discover headroom.
    Probing,
    /// Backed off after the path stopped delivering what was sent.
    Throttled,
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Default => "default",
            Self::Competing => "competing",
            Self::Probing => "probing",
            Self::Throttled => "throttled",
        };
        f.write_str(name)
    }
}

/// Packets and bytes sent but not yet covered by any feedback report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NetRemains {
    pub packets: u32,
    pub bytes: DataSize,
}

/// The controller's output after processing one feedback report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlUpdate {
    pub at_time: Timestamp,
    pub target_rate: DataRate,
    pub target_queue_delay: TimeDelta,
    /// None until the first usable report has been received.
    pub estimated_bandwidth: Option<DataRate>,
    pub state: SenderState,
}

impl Default for ControlUpdate {
    fn default() -> Self {
        Self {
            at_time: Timestamp::plus_infinity(),
            target_rate: DataRate::zero(),
            target_queue_delay: TimeDelta::zero(),
            estimated_bandwidth: None,
            state: SenderState::Default,
        }
    }
}
