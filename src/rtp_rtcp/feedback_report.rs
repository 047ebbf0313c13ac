//! RTCP receiver feedback report (RFB): acknowledges every packet of every
//! stream seen during the last monitored interval.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|  FMT=13 |   PT=205      |          length               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 SSRC of RTCP packet sender                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           SSRC = 0                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 report time (ms, low 32 bits)                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         feedback seq          |    monitored duration (ms)    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   SSRC of 1st RTP stream                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |             count             |            end_seq            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |L|ECN|  Arrival time offset    | ...                           .
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! .              (16-bit zero pad when count is odd)              .
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                   SSRC of 2nd RTP stream ...                  |
//! ```

use std::collections::BTreeMap;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{AddResult, MetricBlock, ReportBlock, RtcpHeader, RTCP_RTPFB};
use crate::{Error, Result};

/// Feedback message type of the report within RTPFB.
pub const RTCP_RTPFB_RFB: u8 = 13;

const FIXED_SIZE: usize = 20;
const STREAM_HEADER_SIZE: usize = 8;
const RECEIVED_BIT: u16 = 0x8000;
const MAX_ARRIVAL_OFFSET_MS: u64 = 0x1fff;

#[derive(Default, Clone, PartialEq, Eq)]
pub struct FeedbackReport {
    sender_ssrc: u32,
    report_time_ms: u64,
    feedback_seq: u16,
    monitored_duration_ms: u16,
    blocks: BTreeMap<u32, ReportBlock>,
}

impl FeedbackReport {
    pub fn new(sender_ssrc: u32) -> Self {
        Self {
            sender_ssrc,
            ..Default::default()
        }
    }

    pub fn add_feedback(&mut self, ssrc: u32, seq: u16, arrival_time_ms: u64, ecn: u8) -> AddResult {
        if ecn > 0x03 {
            return AddResult::BadMark;
        }

        let metric = MetricBlock {
            ecn,
            arrival_time_ms,
        };

        let new_stream = !self.blocks.contains_key(&ssrc);
        if !self.blocks.entry(ssrc).or_default().insert(seq, metric) {
            return AddResult::Duplicate;
        }

        if new_stream {
            AddResult::NewStream
        } else {
            AddResult::AddedToExisting
        }
    }

    pub fn clean_report_blocks(&mut self) {
        self.blocks.clear();
    }

    pub fn increase_feedback_seq(&mut self) {
        self.feedback_seq = self.feedback_seq.wrapping_add(1);
    }

    pub fn set_report_time(&mut self, report_time_ms: u64) {
        self.report_time_ms = report_time_ms;
    }

    pub fn set_monitored_duration(&mut self, duration_ms: u16) {
        self.monitored_duration_ms = duration_ms;
    }

    pub fn set_sender_ssrc(&mut self, sender_ssrc: u32) {
        self.sender_ssrc = sender_ssrc;
    }

    pub fn sender_ssrc(&self) -> u32 {
        self.sender_ssrc
    }

    pub fn report_time_ms(&self) -> u64 {
        self.report_time_ms
    }

    pub fn feedback_seq(&self) -> u16 {
        self.feedback_seq
    }

    pub fn monitored_duration_ms(&self) -> u16 {
        self.monitored_duration_ms
    }

    /// Sequence numbers covered across all streams, received or not.
    pub fn total_report_count(&self) -> u32 {
        self.blocks.values().map(ReportBlock::count).sum()
    }

    /// `(count, end_seq)` of a stream, `(0, 0)` if it is not in the report.
    pub fn count_end_seq(&self, ssrc: u32) -> (u32, u16) {
        self.blocks
            .get(&ssrc)
            .map_or((0, 0), |block| (block.count(), block.end_seq()))
    }

    pub fn report_count(&self, ssrc: u32) -> u32 {
        self.count_end_seq(ssrc).0
    }

    pub fn end_seq(&self, ssrc: u32) -> u16 {
        self.count_end_seq(ssrc).1
    }

    pub fn metric_block(&self, ssrc: u32, seq: u16) -> Option<&MetricBlock> {
        self.blocks.get(&ssrc)?.get(seq)
    }

    /// Received entries of a stream in range order.
    pub fn metric_list(&self, ssrc: u32) -> Vec<(u16, MetricBlock)> {
        self.blocks
            .get(&ssrc)
            .map(ReportBlock::metric_list)
            .unwrap_or_default()
    }

    /// Streams in ascending SSRC order, the order they are serialized in.
    pub fn ssrc_list(&self) -> impl Iterator<Item = u32> + '_ {
        self.blocks.keys().copied()
    }

    pub fn report_block(&self, ssrc: u32) -> Option<&ReportBlock> {
        self.blocks.get(&ssrc)
    }

    pub fn report_blocks(&self) -> impl Iterator<Item = (u32, &ReportBlock)> {
        self.blocks.iter().map(|(ssrc, block)| (*ssrc, block))
    }

    /// Serialized size in bytes, header included.
    pub fn wire_len(&self) -> usize {
        FIXED_SIZE
            + self
                .blocks
                .values()
                .map(|block| {
                    let count = block.count() as usize;
                    STREAM_HEADER_SIZE + (count + count % 2) * 2
                })
                .sum::<usize>()
    }

    fn header(&self) -> Result<RtcpHeader> {
        let wire_len = self.wire_len();
        let length = u16::try_from(wire_len / 4 - 1).map_err(|_| Error::LengthOverflow(wire_len))?;

        Ok(RtcpHeader {
            padding: false,
            format: RTCP_RTPFB_RFB,
            packet_type: RTCP_RTPFB,
            length,
        })
    }

    /// Writes the report. Nothing is written on error.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let header = self.header()?;
        self.validate_entries()?;

        if buf.remaining_mut() < header.packet_size() {
            return Err(Error::Truncated);
        }

        header.encode(buf)?;
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(0);
        // Only the low 32 bits of the report time travel.
        buf.put_u32(self.report_time_ms as u32);
        buf.put_u16(self.feedback_seq);
        buf.put_u16(self.monitored_duration_ms);

        for (ssrc, block) in &self.blocks {
            buf.put_u32(*ssrc);
            buf.put_u16(block.count() as u16);
            buf.put_u16(block.end_seq());

            for seq in block.sequence_range() {
                let entry = match block.get(seq) {
                    Some(metric) => {
                        let offset = self.report_time_ms - metric.arrival_time_ms;
                        RECEIVED_BIT | ((metric.ecn as u16 & 0x03) << 13) | (offset as u16)
                    }
                    None => 0,
                };
                buf.put_u16(entry);
            }

            if block.count() % 2 == 1 {
                buf.put_u16(0);
            }
        }

        Ok(())
    }

    pub fn encode_to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    // Everything that could fail mid-write is checked up front.
    fn validate_entries(&self) -> Result<()> {
        for (ssrc, block) in &self.blocks {
            if block.count() > u16::MAX as u32 {
                return Err(Error::SequenceSpanOverflow {
                    ssrc: *ssrc,
                    count: block.count(),
                });
            }

            for (seq, metric) in block.metric_list() {
                let offset_ms = self.report_time_ms as i64 - metric.arrival_time_ms as i64;
                if !(0..=MAX_ARRIVAL_OFFSET_MS as i64).contains(&offset_ms) {
                    return Err(Error::ArrivalOffsetOverflow {
                        ssrc: *ssrc,
                        seq,
                        offset_ms,
                    });
                }
            }
        }
        Ok(())
    }

    /// Reads one report, header included, consuming exactly its announced length.
    ///
    /// Only the low 32 bits of the report time are on the wire. Arrival times
    /// are rebuilt from it, moved one 2^32 ms epoch up when the report time
    /// wrapped after an arrival, so only their offsets are meaningful.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let header = RtcpHeader::decode(buf)?;
        if header.packet_type != RTCP_RTPFB || header.format != RTCP_RTPFB_RFB {
            return Err(Error::InvalidHeader("not a receiver feedback report"));
        }

        let body_len = header.packet_size() - RtcpHeader::SIZE;
        if buf.remaining() < body_len {
            return Err(Error::Truncated);
        }
        let mut body = buf.copy_to_bytes(body_len);
        Self::decode_body(&mut body)
    }

    pub(crate) fn decode_body(body: &mut Bytes) -> Result<Self> {
        if body.remaining() < FIXED_SIZE - RtcpHeader::SIZE {
            return Err(Error::Truncated);
        }

        let mut report = Self::new(body.get_u32());
        if body.get_u32() != 0 {
            return Err(Error::InvalidHeader("reserved SSRC must be zero"));
        }
        report.report_time_ms = body.get_u32() as u64;
        report.feedback_seq = body.get_u16();
        report.monitored_duration_ms = body.get_u16();

        // (ssrc, seq, ecn, offset) of every received entry.
        let mut entries = Vec::new();
        while body.has_remaining() {
            if body.remaining() < STREAM_HEADER_SIZE {
                return Err(Error::Truncated);
            }

            let ssrc = body.get_u32();
            let count = body.get_u16();
            let end_seq = body.get_u16();

            let padding = count as usize % 2;
            if body.remaining() < (count as usize + padding) * 2 {
                return Err(Error::Truncated);
            }

            let begin_seq = end_seq.wrapping_sub(count.wrapping_sub(1));
            for i in 0..count {
                let entry = body.get_u16();
                if entry & RECEIVED_BIT == 0 {
                    continue;
                }

                let ecn = ((entry >> 13) & 0x03) as u8;
                let offset = (entry & MAX_ARRIVAL_OFFSET_MS as u16) as u64;
                entries.push((ssrc, begin_seq.wrapping_add(i), ecn, offset));
            }

            body.advance(padding * 2);
        }

        // The receiver's clock crossed a 2^32 ms boundary after an arrival.
        if entries
            .iter()
            .any(|&(_, _, _, offset)| offset > report.report_time_ms)
        {
            report.report_time_ms += 1 << 32;
        }

        for (ssrc, seq, ecn, offset) in entries {
            let arrival_time_ms = report.report_time_ms - offset;
            if report.add_feedback(ssrc, seq, arrival_time_ms, ecn) == AddResult::Duplicate {
                tracing::warn!(ssrc, seq, "duplicate entry in feedback report");
            }
        }

        Ok(report)
    }
}

impl fmt::Debug for FeedbackReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "FeedbackReport {{ sender_ssrc: {}, report_time: {} ms, feedback_seq: {}, monitored: {} ms }}",
            self.sender_ssrc, self.report_time_ms, self.feedback_seq, self.monitored_duration_ms
        )?;

        for (ssrc, block) in &self.blocks {
            write!(
                f,
                "  ssrc={} count={} end_seq={}:",
                ssrc,
                block.count(),
                block.end_seq()
            )?;
            for seq in block.sequence_range() {
                match block.get(seq) {
                    Some(metric) => write!(
                        f,
                        " <{}:ecn={},ato={}>",
                        seq,
                        metric.ecn,
                        self.report_time_ms.saturating_sub(metric.arrival_time_ms)
                    )?,
                    None => write!(f, " <{}:lost>", seq)?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_report(entries: &[(u32, u16, u64, u8)]) -> FeedbackReport {
        let mut report = FeedbackReport::new(0x1122_3344);
        report.set_report_time(10_000);
        report.set_monitored_duration(100);
        report.increase_feedback_seq();
        for (ssrc, seq, arrival, ecn) in entries {
            report.add_feedback(*ssrc, *seq, *arrival, *ecn);
        }
        report
    }

    #[test]
    fn add_results() {
        let mut report = FeedbackReport::new(1);
        assert_eq!(report.add_feedback(7, 1, 5, 0), AddResult::NewStream);
        assert_eq!(report.add_feedback(7, 2, 6, 1), AddResult::AddedToExisting);
        assert_eq!(report.add_feedback(7, 2, 9, 0), AddResult::Duplicate);
        assert_eq!(report.add_feedback(7, 3, 6, 4), AddResult::BadMark);
        assert_eq!(report.add_feedback(8, 3, 6, 4), AddResult::BadMark);
        assert_eq!(report.ssrc_list().collect::<Vec<_>>(), [7]);
        assert_eq!(report.metric_block(7, 2).unwrap().arrival_time_ms, 6);
    }

    #[test]
    fn header_only() {
        let report = make_report(&[]);
        let bytes = report.encode_to_bytes().unwrap();
        assert_eq!(
            bytes.as_ref(),
            [
                0x8d, 205, 0x00, 0x04, // header, 5 words
                0x11, 0x22, 0x33, 0x44, // sender
                0x00, 0x00, 0x00, 0x00, // reserved
                0x00, 0x00, 0x27, 0x10, // report time
                0x00, 0x01, 0x00, 0x64, // feedback seq, monitored
            ]
        );
        assert_eq!(FeedbackReport::decode(&mut bytes.clone()).unwrap(), report);
    }

    #[test]
    fn entry_layout() {
        // seq 5 lost, 6 received with CE after 0x123 ms.
        let report = make_report(&[(9, 4, 10_000, 0), (9, 6, 10_000 - 0x123, 3)]);
        let bytes = report.encode_to_bytes().unwrap();

        assert_eq!(bytes.len(), 20 + 8 + 4 * 2);
        assert_eq!(&bytes[2..4], [0x00, 0x08]);
        assert_eq!(
            &bytes[20..],
            [
                0x00, 0x00, 0x00, 0x09, // ssrc
                0x00, 0x03, 0x00, 0x06, // count, end_seq
                0x80, 0x00, // seq 4
                0x00, 0x00, // seq 5
                0xe1, 0x23, // seq 6
                0x00, 0x00, // pad
            ]
        );
    }

    #[test]
    fn round_trip_odd_and_even_counts() {
        let report = make_report(&[
            (3, 100, 9_990, 0),
            (3, 102, 9_995, 1),
            (1, 7, 9_900, 0),
            (1, 8, 9_901, 2),
        ]);

        let bytes = report.encode_to_bytes().unwrap();
        assert_eq!(bytes.len(), report.wire_len());

        let decoded = FeedbackReport::decode(&mut bytes.clone()).unwrap();
        assert_eq!(decoded, report);
        assert_eq!(decoded.count_end_seq(3), (3, 102));
        assert_eq!(decoded.count_end_seq(1), (2, 8));
        assert_eq!(decoded.total_report_count(), 5);
        assert_eq!(decoded.metric_block(3, 101), None);
    }

    #[test]
    fn round_trip_wraparound() {
        let report = make_report(&[(5, 65534, 9_000, 0), (5, 65535, 9_001, 0), (5, 1, 9_003, 1)]);
        assert_eq!(report.count_end_seq(5), (4, 1));

        let decoded = FeedbackReport::decode(&mut report.encode_to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, report);

        let seqs: Vec<u16> = decoded.metric_list(5).iter().map(|(seq, _)| *seq).collect();
        assert_eq!(seqs, [65534, 65535, 1]);
    }

    #[test]
    fn round_trip_wide_spread() {
        let report = make_report(&[(5, 100, 9_000, 0), (5, 33000, 9_500, 0)]);
        assert_eq!(report.count_end_seq(5), (32901, 33000));

        let decoded = FeedbackReport::decode(&mut report.encode_to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn decode_skips_padding_between_streams() {
        let report = make_report(&[(1, 10, 9_999, 0), (2, 20, 9_998, 0), (2, 21, 9_997, 0)]);
        let decoded = FeedbackReport::decode(&mut report.encode_to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.metric_block(2, 20).unwrap().arrival_time_ms, 9_998);
        assert_eq!(decoded.metric_block(2, 21).unwrap().arrival_time_ms, 9_997);
    }

    #[test]
    fn decode_consumes_only_its_packet() {
        let report = make_report(&[(1, 10, 9_999, 0)]);
        let mut buf = BytesMut::new();
        report.encode(&mut buf).unwrap();
        buf.put_slice(&[0xde, 0xad]);

        let mut bytes = buf.freeze();
        FeedbackReport::decode(&mut bytes).unwrap();
        assert_eq!(bytes.as_ref(), [0xde, 0xad]);
    }

    #[test]
    fn arrival_offset_overflow() {
        let report = make_report(&[(1, 10, 10_000 - 0x2000, 0)]);
        assert_eq!(
            report.encode_to_bytes(),
            Err(Error::ArrivalOffsetOverflow {
                ssrc: 1,
                seq: 10,
                offset_ms: 0x2000
            })
        );

        let report = make_report(&[(1, 10, 10_001, 0)]);
        assert!(matches!(
            report.encode_to_bytes(),
            Err(Error::ArrivalOffsetOverflow { offset_ms: -1, .. })
        ));
    }

    #[test]
    fn sequence_span_overflow() {
        let report = make_report(&[
            (4, 0, 9_999, 0),
            (4, 32768, 9_999, 0),
            (4, 32769, 9_999, 0),
            (4, 65535, 9_999, 0),
        ]);
        assert_eq!(report.report_count(4), 65536);
        assert_eq!(
            report.encode_to_bytes(),
            Err(Error::SequenceSpanOverflow {
                ssrc: 4,
                count: 65536
            })
        );
    }

    #[test]
    fn length_overflow() {
        let mut report = make_report(&[]);
        // Eight streams each spanning 40000 numbers need about 640 KB.
        for ssrc in 0..8 {
            report.add_feedback(ssrc, 100, 9_999, 0);
            report.add_feedback(ssrc, 40000, 9_999, 0);
        }
        assert!(report.wire_len() / 4 - 1 > u16::MAX as usize);
        assert_eq!(report.encode_to_bytes(), Err(Error::LengthOverflow(report.wire_len())));
    }

    #[test]
    fn truncated_input() {
        let report = make_report(&[(1, 10, 9_999, 0), (1, 11, 9_999, 0)]);
        let bytes = report.encode_to_bytes().unwrap();
        let mut short = bytes.slice(..bytes.len() - 2);
        assert_eq!(FeedbackReport::decode(&mut short), Err(Error::Truncated));
    }

    #[test]
    fn report_time_wraps() {
        let mut report = FeedbackReport::new(1);
        report.set_report_time((1 << 32) + 5);
        report.set_monitored_duration(100);
        report.add_feedback(7, 1, (1 << 32) - 20, 0);
        report.add_feedback(7, 2, (1 << 32) + 3, 0);

        let mut bytes = report.encode_to_bytes().unwrap();
        let decoded = FeedbackReport::decode(&mut bytes).unwrap();

        // Only the low 32 bits travel; offsets are preserved.
        assert_eq!(decoded.report_time_ms(), (1 << 32) + 5);
        assert_eq!(decoded.metric_block(7, 1).unwrap().arrival_time_ms, (1 << 32) - 20);
        assert_eq!(decoded.metric_block(7, 2).unwrap().arrival_time_ms, (1 << 32) + 3);
    }

    #[test]
    fn wrong_packet_type() {
        let mut bytes = make_report(&[]).encode_to_bytes().unwrap().to_vec();
        bytes[1] = 206;
        assert!(matches!(
            FeedbackReport::decode(&mut bytes.as_slice()),
            Err(Error::InvalidHeader(_))
        ));
    }
}
