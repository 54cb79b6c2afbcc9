//! Error types for the COPPER codec
//!
//! # Design Principles (KISS)
//! - Integrity failures are never repaired locally: they surface as
//!   `CopperError::Corrupted` carrying a dump of the offending block
//! - Caller mistakes (bad channel/block index) are distinct variants
//! - Use thiserror for ergonomic error handling

use std::fmt;

use thiserror::Error;
use tracing::error;

use crate::format::dump::BlockDump;

/// One optional word per FINESSE slot, printed as `A 0x.. B 0x.. C - D -`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelWords(pub [Option<u32>; 4]);

impl fmt::Display for ChannelWords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, word) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            let slot = (b'A' + i as u8) as char;
            match word {
                Some(w) => write!(f, "{} 0x{:08x}", slot, w)?,
                None => write!(f, "{} -", slot)?,
            }
        }
        Ok(())
    }
}

/// Kind of data corruption detected in a block
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    #[error("block at word {pos} has zero length")]
    ZeroLengthBlock { pos: usize },

    #[error("block at word {pos} declares {nwords} words but only {available} remain")]
    BufferOverrun {
        pos: usize,
        nwords: usize,
        available: usize,
    },

    #[error("buffer holds {found} blocks, expected {expected}")]
    BlockCountMismatch { expected: usize, found: usize },

    #[error("block needs at least {needed} words, has {available}")]
    TruncatedBlock { needed: usize, available: usize },

    #[error("stream ends {bytes} bytes into word {pos}")]
    PartialWord { pos: usize, bytes: usize },

    #[error("block length {nwords} exceeds the limit of {max} words")]
    BlockTooLarge { nwords: usize, max: usize },

    #[error(
        "invalid COPPER magic words: driver header 0x{driver_header:08x} fpga header 0x{fpga_header:08x} \
         fpga trailer 0x{fpga_trailer:08x} driver trailer 0x{driver_trailer:08x}"
    )]
    CopperMagic {
        driver_header: u32,
        fpga_header: u32,
        fpga_trailer: u32,
        driver_trailer: u32,
    },

    #[error("invalid RawHeader magic in version word 0x{word:08x}")]
    HeaderMagic { word: u32 },

    #[error("invalid RawTrailer terminal word 0x{word:08x}")]
    TermWord { word: u32 },

    #[error("no FINESSE buffer carries data")]
    NoFinesseData,

    #[error("different event number over HSLBs: {tags}")]
    EventTagMismatch { tags: ChannelWords },

    #[error("event number in RawHeader 0x{header:08x} differs from FEE header 0x{fee:08x}")]
    HeaderEventMismatch { header: u32, fee: u32 },

    #[error("ctime/utime mismatch over FINESSEs: ctime_trgtype [{ctime_trgtype}] utime [{utime}]")]
    TimeMismatch {
        ctime_trgtype: ChannelWords,
        utime: ChannelWords,
    },

    #[error("invalid B2LHSLB magic words 0x{header:08x} 0x{trailer:08x}")]
    B2lHslbMagic { header: u32, trailer: u32 },

    #[error("FINESSE {channel}: B2LCRC16 0x{stored:04x} differs from calculated 0x{calculated:04x}")]
    Crc16Mismatch {
        channel: usize,
        stored: u16,
        calculated: u16,
    },

    #[error("COPPER driver checksum 0x{stored:08x} differs from calculated 0x{calculated:08x}")]
    DriverChecksum { stored: u32, calculated: u32 },

    #[error("RawTrailer checksum 0x{stored:08x} differs from calculated 0x{calculated:08x}")]
    BlockChecksum { stored: u32, calculated: u32 },

    #[error("FINESSE {channel} buffer too small ({nwords} words < {minimum} words)")]
    FinesseTooSmall {
        channel: usize,
        nwords: usize,
        minimum: usize,
    },

    #[error("FINESSE {channel} ({nwords} words at block offset {offset}) overruns block of {block_nwords} words")]
    FinesseOverrun {
        channel: usize,
        offset: usize,
        nwords: usize,
        block_nwords: usize,
    },

    #[error("declared block length {declared} differs from calculated {calculated}")]
    LengthMismatch { declared: usize, calculated: usize },

    #[error("reduced block written with {written} words, expected {expected}")]
    ReducedLengthMismatch { written: usize, expected: usize },
}

/// COPPER codec errors
#[derive(Error, Debug)]
pub enum CopperError {
    /// Data corruption; processing of the block cannot continue
    #[error("CORRUPTED DATA in block {block}: {kind}")]
    Corrupted {
        block: usize,
        kind: Corruption,
        dump: BlockDump,
    },

    /// FINESSE slot outside 0..=3
    #[error("Invalid FINESSE number {0} (valid: 0-3)")]
    InvalidChannel(usize),

    /// Block index outside the buffer
    #[error("Invalid COPPER block No. {index} (max {count})")]
    InvalidBlock { index: usize, count: usize },

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CopperError {
    /// Create a corruption error, logging it with a dump of `words`
    pub fn corrupted(block: usize, kind: Corruption, offset: usize, words: &[u32]) -> Self {
        error!(block = block, nwords = words.len(), "CORRUPTED DATA: {}", kind);
        Self::Corrupted {
            block,
            kind,
            dump: BlockDump::new(offset, words),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Corruption kind, if this is a corruption error
    pub fn corruption(&self) -> Option<&Corruption> {
        match self {
            Self::Corrupted { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Diagnostic dump, if this is a corruption error
    pub fn dump(&self) -> Option<&BlockDump> {
        match self {
            Self::Corrupted { dump, .. } => Some(dump),
            _ => None,
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }
}

/// Result type alias using CopperError
pub type CopperResult<T> = Result<T, CopperError>;
