//! PCI Express configuration space image

use crate::{Error, Result, CONFIG_SPACE_SIZE};
use core::fmt;

/// A captured 4096-byte PCIe configuration space
///
/// The buffer is immutable once constructed, so a single `ConfigSpace` may be shared by
/// reference between any number of independent decode passes.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigSpace {
    bytes: Box<[u8; CONFIG_SPACE_SIZE]>,
}

impl ConfigSpace {
    /// Create a `ConfigSpace` from a complete 4096-byte image
    pub fn new(bytes: [u8; CONFIG_SPACE_SIZE]) -> ConfigSpace {
        ConfigSpace {
            bytes: Box::new(bytes),
        }
    }

    /// Create a `ConfigSpace` from a byte slice, which must be exactly 4096 bytes long
    pub fn from_bytes(bytes: &[u8]) -> Result<ConfigSpace> {
        let bytes: Box<[u8; CONFIG_SPACE_SIZE]> = bytes
            .to_vec()
            .into_boxed_slice()
            .try_into()
            .map_err(|bytes: Box<[u8]>| Error::BufferLength(bytes.len()))?;
        Ok(ConfigSpace { bytes })
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; CONFIG_SPACE_SIZE] {
        &self.bytes
    }

    /// Read a little-endian value of `width` bytes at `offset`
    ///
    /// `width` must be between 1 and 4, and the whole value must lie within the space.
    pub fn read(&self, offset: usize, width: usize) -> Result<u32> {
        let bytes = Some(width)
            .filter(|width| (1..=4).contains(width))
            .and_then(|width| offset.checked_add(width))
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(Error::OutOfRange { offset, width })?;
        Ok(bytes
            .iter()
            .enumerate()
            .fold(0, |value, (i, &byte)| value | (byte as u32) << (8 * i)))
    }

    #[inline]
    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        self.read(offset, 1).map(|value| value as u8)
    }

    #[inline]
    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        self.read(offset, 2).map(|value| value as u16)
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        self.read(offset, 4)
    }
}

impl fmt::Debug for ConfigSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigSpace")
            .field("vendor_id", &format_args!("{:02x}{:02x}", self.bytes[1], self.bytes[0]))
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Extract the inclusive bit range `[low, high]` of `value`, shifted down to bit 0
pub fn bit_field(value: u32, low: u8, high: u8) -> Result<u32> {
    if low > high || high >= u32::BITS as u8 {
        return Err(Error::InvalidRange { low, high });
    }
    let mask = (u64::MAX >> (63 - high)) & !((1u64 << low) - 1);
    Ok(((value as u64 & mask) >> low) as u32)
}
