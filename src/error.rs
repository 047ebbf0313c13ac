use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The report would need more than 65535 words after the first one.
    #[error("feedback report of {0} bytes overflows the RTCP length field")]
    LengthOverflow(usize),

    #[error("arrival offset {offset_ms} ms of ssrc={ssrc} seq={seq} does not fit 13 bits")]
    ArrivalOffsetOverflow { ssrc: u32, seq: u16, offset_ms: i64 },

    #[error("ssrc={ssrc} spans {count} sequence numbers")]
    SequenceSpanOverflow { ssrc: u32, count: u32 },

    #[error("buffer too short")]
    Truncated,

    #[error("invalid RTCP packet: {0}")]
    InvalidHeader(&'static str),

    #[error("no sent record for ssrc={ssrc} seq={seq}")]
    LedgerMiss { ssrc: u32, seq: u16 },

    #[error("feedback report acknowledges no packets")]
    EmptyFeedback,

    #[error("cannot reconstruct the reported period")]
    PeriodReconstructionFailed,
}
