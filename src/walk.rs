//! Capability list traversal
//!
//! PCI defines two singly-linked lists of capability structures: the standard list, headed by
//! the 8-bit pointer at `0x34`, and the PCIe extended list, which always starts at `0x100`.
//! Both are walked by the same [`walk`] routine, parameterized over a [`Chain`].

use crate::{ConfigSpace, Error, Result, CONFIG_SPACE_SIZE};
use core::{fmt, ops::Range};

pub mod extended;
pub mod standard;

pub use extended::Extended;
pub use standard::Standard;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChainKind {
    Standard,
    Extended,
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Standard => "standard",
            Self::Extended => "extended",
        })
    }
}

/// One record found while walking a capability list
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ChainEntry {
    /// Capability ID (8 bits for standard capabilities, 16 for extended ones)
    pub id: u16,
    /// Capability version; only extended capabilities carry one
    pub version: Option<u8>,
    /// Absolute offset of the capability within configuration space
    pub offset: u16,
}

/// A linked list of records within configuration space
pub trait Chain {
    const KIND: ChainKind;

    /// Offsets a record may legally live at
    ///
    /// Any pointer outside this window, other than the terminating `0`, makes the chain
    /// malformed.
    const WINDOW: Range<u16>;

    /// Returns the offset of the first record, or `0` for an empty list
    fn head(space: &ConfigSpace) -> Result<u16>;

    /// Decode the record at `offset`, returning it along with the offset of the next one
    fn record(space: &ConfigSpace, offset: u16) -> Result<(ChainEntry, u16)>;
}

/// Returns an iterator over every record of the chain `C`
///
/// The walk stops after the record whose next pointer is `0`. A pointer that revisits an
/// offset or leaves [`Chain::WINDOW`] yields a final [`Error::MalformedChain`]; a failing
/// read yields that error instead. Records emitted before an error remain valid. Since
/// no offset is visited twice, the walk takes at most `WINDOW.len()` steps.
pub fn walk<C: Chain>(space: &ConfigSpace) -> impl Iterator<Item = Result<ChainEntry>> + '_ {
    let mut visited = [false; CONFIG_SPACE_SIZE];
    let mut state = match C::head(space) {
        Ok(0) => State::Done,
        Ok(head) if !C::WINDOW.contains(&head) => State::Failed(Error::MalformedChain {
            chain: C::KIND,
            offset: 0,
            next: head,
        }),
        Ok(head) => State::At(head),
        Err(err) => State::Failed(err),
    };

    core::iter::from_fn(move || {
        let offset = match core::mem::replace(&mut state, State::Done) {
            State::Done => return None,
            State::Failed(err) => {
                log::error!("{err}");
                return Some(Err(err));
            }
            State::At(offset) => offset,
        };
        visited[offset as usize] = true;

        let (entry, next) = match C::record(space, offset) {
            Ok(record) => record,
            Err(err) => return Some(Err(err)),
        };
        log::info!("{entry:?}");

        state = if next == 0 {
            State::Done
        } else if !C::WINDOW.contains(&next) || visited[next as usize] {
            State::Failed(Error::MalformedChain {
                chain: C::KIND,
                offset,
                next,
            })
        } else {
            State::At(next)
        };

        Some(Ok(entry))
    })
}

/// Walk the standard capability list
pub fn standard(space: &ConfigSpace) -> impl Iterator<Item = Result<ChainEntry>> + '_ {
    walk::<Standard>(space)
}

/// Walk the PCIe extended capability list
pub fn extended(space: &ConfigSpace) -> impl Iterator<Item = Result<ChainEntry>> + '_ {
    walk::<Extended>(space)
}

enum State {
    At(u16),
    Failed(Error),
    Done,
}
