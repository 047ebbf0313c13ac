//! The RTCP common header (RFC 3550, section 6.4.1).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|  FMT    |      PT       |            length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{Buf, BufMut};

use crate::{Error, Result};

pub const RTCP_VERSION: u8 = 2;

/// Transport layer feedback (RFC 4585).
pub const RTCP_RTPFB: u8 = 205;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpHeader {
    pub padding: bool,
    /// Feedback message type, or the report count for non-feedback packets.
    pub format: u8,
    pub packet_type: u8,
    /// Packet length in 32-bit words minus one.
    pub length: u16,
}

impl RtcpHeader {
    pub const SIZE: usize = 4;

    /// Size of the whole packet this header announces, header included.
    pub fn packet_size(&self) -> usize {
        (self.length as usize + 1) * 4
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if buf.remaining_mut() < Self::SIZE {
            return Err(Error::Truncated);
        }
        let padding = if self.padding { 0x20 } else { 0 };
        buf.put_u8((RTCP_VERSION << 6) | padding | (self.format & 0x1f));
        buf.put_u8(self.packet_type);
        buf.put_u16(self.length);
        Ok(())
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(Error::Truncated);
        }

        let first = buf.get_u8();
        if first >> 6 != RTCP_VERSION {
            return Err(Error::InvalidHeader("unsupported RTCP version"));
        }

        Ok(Self {
            padding: first & 0x20 != 0,
            format: first & 0x1f,
            packet_type: buf.get_u8(),
            length: buf.get_u16(),
        })
    }
}
