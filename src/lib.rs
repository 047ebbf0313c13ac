//! Congestion Control with Feedback Signals (CCFS) for real-time media.
//!
//! The receiver summarizes arrivals into RTCP feedback reports with a
//! [FeedbackGenerator](rtp_rtcp::FeedbackGenerator); the sender matches them
//! against its sent packets in a [CcfsController](ccfs::CcfsController), which
//! estimates forward bandwidth and queueing delay and picks a send rate.

pub mod api;
pub mod ccfs;
pub mod rtp_rtcp;

mod error;
pub use error::{Error, Result};
