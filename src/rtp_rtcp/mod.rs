mod feedback_generator;
mod feedback_report;
mod report_block;
mod rtcp_header;
mod rtcp_packet;

pub use feedback_generator::*;
pub use feedback_report::*;
pub use report_block::*;
pub use rtcp_header::*;
pub use rtcp_packet::*;
