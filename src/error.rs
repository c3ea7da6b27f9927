use crate::walk::ChainKind;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A read would leave the 4096-byte space, or uses a width outside `1..=4`.
    #[error("read of {width} byte(s) at {offset:#05x} is out of range")]
    OutOfRange { offset: usize, width: usize },

    #[error("invalid bit range [{high}:{low}]")]
    InvalidRange { low: u8, high: u8 },

    /// Bits [6:0] of the Header Type register name a layout other than Type 0 or Type 1.
    #[error("unsupported header layout {0:#04x}")]
    UnsupportedHeaderLayout(u8),

    /// The chain revisited an offset or pointed outside its window. `offset` is the record
    /// holding the bad pointer, or 0 for the list head.
    #[error("malformed {chain} capability chain: entry at {offset:#05x} points to {next:#05x}")]
    MalformedChain {
        chain: ChainKind,
        offset: u16,
        next: u16,
    },

    /// A recognized capability could not be decoded. Only that instance is lost.
    #[error("failed to decode capability {id:#06x} at {offset:#05x}: {source}")]
    CapabilityDecode {
        id: u16,
        offset: u16,
        #[source]
        source: Box<Error>,
    },

    #[error("configuration space must be 4096 bytes, got {0}")]
    BufferLength(usize),

    #[error("dump jumps to offset {found:#010x}, expected {expected:#010x}")]
    DumpDiscontinuity { found: usize, expected: usize },

    #[error("dump line {line}: {reason}")]
    DumpLine { line: usize, reason: String },

    #[error("invalid schema: {reason}")]
    InvalidSchema { reason: String },

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_schema(reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error ended a chain walk.
    pub fn is_malformed_chain(&self) -> bool {
        matches!(self, Self::MalformedChain { .. })
    }
}
