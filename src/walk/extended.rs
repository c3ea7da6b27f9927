//! PCI Express extended capability list

use super::{Chain, ChainEntry, ChainKind};
use crate::{bit_field, ConfigSpace, Result};
use core::ops::Range;

/// Offset of the first extended capability
pub const EXTENDED_CAPABILITIES: u16 = 0x100;

/// Extended capability list
///
/// Each record starts with a 32-bit header:
///
/// | Bits    | Field                  |
/// |---------|------------------------|
/// | [15:0]  | Extended Capability ID |
/// | [19:16] | Capability Version     |
/// | [31:20] | Next Capability Offset |
pub struct Extended;

impl Chain for Extended {
    const KIND: ChainKind = ChainKind::Extended;
    // The whole 32-bit header must fit within configuration space.
    const WINDOW: Range<u16> = EXTENDED_CAPABILITIES..0xFFD;

    fn head(_space: &ConfigSpace) -> Result<u16> {
        Ok(EXTENDED_CAPABILITIES)
    }

    fn record(space: &ConfigSpace, offset: u16) -> Result<(ChainEntry, u16)> {
        let header = space.read_u32(offset as usize)?;
        let entry = ChainEntry {
            id: bit_field(header, 0, 15)? as u16,
            version: Some(bit_field(header, 16, 19)? as u8),
            offset,
        };
        let next = bit_field(header, 20, 31)? as u16;
        Ok((entry, next))
    }
}
