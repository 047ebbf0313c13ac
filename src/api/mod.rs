/// Pluggable loss and ECN inputs: [CongestionSignals](congestion_signals::CongestionSignals).
pub mod congestion_signals;

/// A generic congestion control interface: [NetworkControllerInterface](network_control::NetworkControllerInterface).
pub mod network_control;

/// An optional bottleneck queue sensor used for diagnostics.
pub mod network_queue_monitor;

/// Network structs and types.
pub mod transport;

/// Some unit types, such as [DataSize](units::DataSize) and [DataRate](units::DataRate).
pub mod units;
