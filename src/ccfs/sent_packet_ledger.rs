use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::{
    api::{
        transport::{NetRemains, SentPacket},
        units::{DataSize, TimeDelta, Timestamp},
    },
    rtp_rtcp::FeedbackReport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentPacketRecord {
    pub send_time: Timestamp,
    pub size: DataSize,
    /// Bytes sent on the stream up to and including this packet.
    pub total_sent_bytes: DataSize,
}

impl SentPacketRecord {
    pub fn send_time_ms(&self) -> i64 {
        self.send_time.ms_floor()
    }
}

#[derive(Debug, Default)]
struct SentStream {
    records: HashMap<u16, SentPacketRecord>,
    // Send order, for eviction and window scans.
    order: VecDeque<(u16, Timestamp)>,
    last_sent: Option<u16>,
    total_sent: DataSize,
}

impl SentStream {
    fn evict(&mut self, now_ms: i64, retention: TimeDelta) {
        while let Some(&(seq, send_time)) = self.order.front() {
            if send_time.ms_floor() + retention.ms() >= now_ms {
                break;
            }
            self.order.pop_front();

            // A later send of the same sequence number replaced the record.
            if self.records.get(&seq).map(|record| record.send_time) == Some(send_time) {
                self.records.remove(&seq);
            }
        }
    }
}

/// Every packet sent per stream within the retention horizon.
#[derive(Debug)]
pub struct SentPacketLedger {
    streams: BTreeMap<u32, SentStream>,
    retention: TimeDelta,
    session_start: Option<Timestamp>,
    in_flight_packets: u32,
}

impl SentPacketLedger {
    pub fn new(retention: TimeDelta) -> Self {
        Self {
            streams: BTreeMap::new(),
            retention,
            session_start: None,
            in_flight_packets: 0,
        }
    }

    pub fn record(&mut self, packet: &SentPacket) -> SentPacketRecord {
        if self.session_start.is_none() {
            tracing::debug!(send_time = ?packet.send_time, "session started");
            self.session_start = Some(packet.send_time);
        }

        let stream = self.streams.entry(packet.ssrc).or_default();
        stream.total_sent += packet.size;

        let record = SentPacketRecord {
            send_time: packet.send_time,
            size: packet.size,
            total_sent_bytes: stream.total_sent,
        };

        if stream
            .records
            .insert(packet.sequence_number, record)
            .is_some()
        {
            tracing::debug!(
                ssrc = packet.ssrc,
                seq = packet.sequence_number,
                "sequence number sent again"
            );
        }
        stream
            .order
            .push_back((packet.sequence_number, packet.send_time));
        stream.last_sent = Some(packet.sequence_number);
        stream.evict(packet.send_time.ms_floor(), self.retention);

        self.in_flight_packets = self.in_flight_packets.saturating_add(1);

        record
    }

    pub fn lookup(&self, ssrc: u32, seq: u16) -> Option<&SentPacketRecord> {
        self.streams.get(&ssrc)?.records.get(&seq)
    }

    /// The stream's retained records in send order.
    pub fn records(&self, ssrc: u32) -> impl Iterator<Item = (u16, &SentPacketRecord)> {
        self.streams.get(&ssrc).into_iter().flat_map(|stream| {
            stream.order.iter().filter_map(move |(seq, send_time)| {
                stream
                    .records
                    .get(seq)
                    .filter(|record| record.send_time == *send_time)
                    .map(|record| (*seq, record))
            })
        })
    }

    pub fn last_sent(&self, ssrc: u32) -> Option<(u16, &SentPacketRecord)> {
        let stream = self.streams.get(&ssrc)?;
        let seq = stream.last_sent?;
        stream.records.get(&seq).map(|record| (seq, record))
    }

    pub fn session_start(&self) -> Option<Timestamp> {
        self.session_start
    }

    /// The next send starts a new session.
    pub fn restart_session(&mut self) {
        self.session_start = None;
    }

    pub fn in_flight_packets(&self) -> u32 {
        self.in_flight_packets
    }

    pub fn len(&self) -> usize {
        self.streams.values().map(|stream| stream.records.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Settles the report's packets against the in-flight counter and returns
    /// what is still unaccounted for.
    pub fn net_remains(&mut self, report: &FeedbackReport) -> NetRemains {
        let acknowledged: DataSize = report
            .report_blocks()
            .map(|(ssrc, block)| {
                self.lookup(ssrc, block.end_seq())
                    .map_or(DataSize::zero(), |record| record.total_sent_bytes)
            })
            .fold(DataSize::zero(), |total, bytes| total + bytes);

        let sent = self
            .streams
            .values()
            .map(|stream| stream.total_sent)
            .fold(DataSize::zero(), |total, bytes| total + bytes);

        let count = report.total_report_count();
        self.in_flight_packets = self.in_flight_packets.saturating_sub(count);

        NetRemains {
            packets: self.in_flight_packets,
            bytes: (sent - acknowledged).max(DataSize::zero()),
        }
    }
}
