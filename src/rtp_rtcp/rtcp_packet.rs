use bytes::{Buf, BufMut, Bytes};

use super::{FeedbackReport, RtcpHeader, RTCP_RTPFB, RTCP_RTPFB_RFB};
use crate::{Error, Result};

/// A single packet of a (possibly compound) RTCP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    ReceiverFeedback(FeedbackReport),
    /// Anything else is carried through untouched.
    Other { header: RtcpHeader, payload: Bytes },
}

impl RtcpPacket {
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = RtcpHeader::decode(buf)?;

        let body_len = header.packet_size() - RtcpHeader::SIZE;
        if buf.remaining() < body_len {
            return Err(Error::Truncated);
        }
        let mut body = buf.copy_to_bytes(body_len);

        match (header.packet_type, header.format) {
            (RTCP_RTPFB, RTCP_RTPFB_RFB) => {
                FeedbackReport::decode_body(&mut body).map(Self::ReceiverFeedback)
            }
            _ => Ok(Self::Other {
                header,
                payload: body,
            }),
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            Self::ReceiverFeedback(report) => report.encode(buf),
            Self::Other { header, payload } => {
                if buf.remaining_mut() < RtcpHeader::SIZE + payload.len() {
                    return Err(Error::Truncated);
                }
                header.encode(buf)?;
                buf.put_slice(payload);
                Ok(())
            }
        }
    }

    pub fn wire_len(&self) -> usize {
        match self {
            Self::ReceiverFeedback(report) => report.wire_len(),
            Self::Other { payload, .. } => RtcpHeader::SIZE + payload.len(),
        }
    }
}

/// Splits a compound RTCP datagram into its packets.
pub fn parse_compound(mut datagram: Bytes) -> Result<Vec<RtcpPacket>> {
    let mut packets = Vec::new();
    while datagram.has_remaining() {
        packets.push(RtcpPacket::decode(&mut datagram)?);
    }
    Ok(packets)
}

/// The receiver feedback reports of a compound datagram, in order.
pub fn feedback_reports(datagram: Bytes) -> Result<Vec<FeedbackReport>> {
    Ok(parse_compound(datagram)?
        .into_iter()
        .filter_map(|packet| match packet {
            RtcpPacket::ReceiverFeedback(report) => Some(report),
            RtcpPacket::Other { header, .. } => {
                tracing::trace!(packet_type = header.packet_type, format = header.format, "skipping RTCP packet");
                None
            }
        })
        .collect())
}
