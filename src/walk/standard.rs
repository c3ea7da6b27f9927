//! Standard (conventional PCI) capability list

use super::{Chain, ChainEntry, ChainKind};
use crate::{ConfigSpace, Result};
use core::ops::Range;

/// Offset of the Capabilities Pointer register in every header layout
pub const CAPABILITIES_POINTER: usize = 0x34;

/// Standard capability list
///
/// Each record starts with an 8-bit capability ID followed by an 8-bit pointer to the next
/// record. Records live in the device-specific region `0x40..0x100`, after the header.
pub struct Standard;

impl Chain for Standard {
    const KIND: ChainKind = ChainKind::Standard;
    const WINDOW: Range<u16> = 0x40..0x100;

    fn head(space: &ConfigSpace) -> Result<u16> {
        space.read_u8(CAPABILITIES_POINTER).map(u16::from)
    }

    fn record(space: &ConfigSpace, offset: u16) -> Result<(ChainEntry, u16)> {
        let offset_usize = offset as usize;
        let id = space.read_u8(offset_usize)?;
        let next = space.read_u8(offset_usize + 1)?;
        let entry = ChainEntry {
            id: id as u16,
            version: None,
            offset,
        };
        Ok((entry, next as u16))
    }
}
