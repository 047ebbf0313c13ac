mod bitrate_fraction_window;
mod ccfs_controller;
mod config;
mod delay_increase_detector;
mod feedback_parser;
mod feedback_sequence_tracker;
mod forward_bandwidth_estimator;
mod queue_delay_estimator;
mod rate_control;
mod sent_packet_ledger;
mod virtual_queue;

pub use bitrate_fraction_window::*;
pub use ccfs_controller::*;
pub use config::*;
pub use delay_increase_detector::*;
pub use feedback_parser::*;
pub use feedback_sequence_tracker::*;
pub use forward_bandwidth_estimator::*;
pub use queue_delay_estimator::*;
pub use rate_control::*;
pub use sent_packet_ledger::*;
pub use virtual_queue::*;
