//! Configuration space header (offsets `0x00..0x40`)

use crate::{
    bit_field,
    decode::{decode_register, DecodedRegister},
    schema::{validate_registers, RegisterSpec},
    ConfigSpace, Error, Result,
};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};

/// Offset of the Header Type register
pub const HEADER_TYPE: usize = 0x0E;

bitflags::bitflags! {
    /// Header Type register
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct HeaderType : u8 {
        /// Header layout, bits [6:0]
        const LAYOUT = 0x7f;
        /// Multi-Function Device
        const MULTI_FUNCTION = 1 << 7;
    }
}

impl HeaderType {
    pub fn read(space: &ConfigSpace) -> Result<HeaderType> {
        space.read_u8(HEADER_TYPE).map(HeaderType::from_bits_retain)
    }

    #[inline]
    pub fn is_multi_function(self) -> bool {
        self.contains(HeaderType::MULTI_FUNCTION)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum HeaderLayout {
    /// Type 0, implemented by endpoints
    Type0,
    /// Type 1, implemented by PCI-to-PCI bridges and root/switch ports
    Type1,
}

impl HeaderLayout {
    /// Select the header layout from bits [6:0] of the Header Type register
    pub fn select(space: &ConfigSpace) -> Result<HeaderLayout> {
        let layout = bit_field(space.read(HEADER_TYPE, 1)?, 0, 6)? as u8;
        match layout {
            0 => Ok(HeaderLayout::Type0),
            1 => Ok(HeaderLayout::Type1),
            _ => Err(Error::UnsupportedHeaderLayout(layout)),
        }
    }
}

impl fmt::Display for HeaderLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Type0 => "Type 0",
            Self::Type1 => "Type 1",
        })
    }
}

/// Register layouts for both header types, keyed by absolute offset
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderSchema {
    #[serde(rename = "Type0")]
    pub type0: BTreeMap<u16, RegisterSpec>,
    #[serde(rename = "Type1")]
    pub type1: BTreeMap<u16, RegisterSpec>,
}

impl HeaderSchema {
    pub fn from_yaml(yaml: &str) -> Result<HeaderSchema> {
        let schema: HeaderSchema = serde_yaml::from_str(yaml)?;
        validate_registers(&schema.type0)?;
        validate_registers(&schema.type1)?;
        Ok(schema)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<HeaderSchema> {
        let yaml = std::fs::read_to_string(path)?;
        HeaderSchema::from_yaml(&yaml)
    }

    pub fn registers(&self, layout: HeaderLayout) -> &BTreeMap<u16, RegisterSpec> {
        match layout {
            HeaderLayout::Type0 => &self.type0,
            HeaderLayout::Type1 => &self.type1,
        }
    }
}

impl Default for HeaderSchema {
    /// The register layouts defined by the PCI Local Bus and PCI-to-PCI Bridge
    /// specifications
    fn default() -> HeaderSchema {
        let mut type0 = common_registers();
        let mut type1 = common_registers();

        for (bar, offset) in (0x10..0x28).step_by(4).enumerate() {
            type0.insert(offset, RegisterSpec::new(format!("Base Address {bar}"), 4));
        }
        type0.extend([
            (0x28, RegisterSpec::new("Cardbus CIS Pointer", 4)),
            (0x2c, RegisterSpec::new("Subsystem Vendor ID", 2)),
            (0x2e, RegisterSpec::new("Subsystem ID", 2)),
            (0x30, RegisterSpec::new("Expansion ROM Base Address", 4)),
            (0x3e, RegisterSpec::new("Min_Gnt", 1)),
            (0x3f, RegisterSpec::new("Max_Lat", 1)),
        ]);

        type1.extend([
            (0x10, RegisterSpec::new("Base Address 0", 4)),
            (0x14, RegisterSpec::new("Base Address 1", 4)),
            (0x18, RegisterSpec::new("Primary Bus Number", 1)),
            (0x19, RegisterSpec::new("Secondary Bus Number", 1)),
            (0x1a, RegisterSpec::new("Subordinate Bus Number", 1)),
            (0x1b, RegisterSpec::new("Secondary Latency Timer", 1)),
            (0x1c, RegisterSpec::new("I/O Base", 1)),
            (0x1d, RegisterSpec::new("I/O Limit", 1)),
            (0x1e, status_register("Secondary Status")),
            (0x20, RegisterSpec::new("Memory Base", 2)),
            (0x22, RegisterSpec::new("Memory Limit", 2)),
            (0x24, RegisterSpec::new("Prefetchable Memory Base", 2)),
            (0x26, RegisterSpec::new("Prefetchable Memory Limit", 2)),
            (0x28, RegisterSpec::new("Prefetchable Base Upper 32 Bits", 4)),
            (0x2c, RegisterSpec::new("Prefetchable Limit Upper 32 Bits", 4)),
            (0x30, RegisterSpec::new("I/O Base Upper 16 Bits", 2)),
            (0x32, RegisterSpec::new("I/O Limit Upper 16 Bits", 2)),
            (0x38, RegisterSpec::new("Expansion ROM Base Address", 4)),
            (
                0x3e,
                RegisterSpec::new("Bridge Control", 2)
                    .field(0, 0, "Parity Error Response Enable")
                    .field(1, 1, "SERR# Enable")
                    .field(2, 2, "ISA Enable")
                    .field(3, 3, "VGA Enable")
                    .field(4, 4, "VGA 16-bit Decode")
                    .field(5, 5, "Master Abort Mode")
                    .field(6, 6, "Secondary Bus Reset")
                    .field(7, 7, "Fast Back-to-Back Transactions Enable"),
            ),
        ]);

        HeaderSchema { type0, type1 }
    }
}

fn status_register(name: &str) -> RegisterSpec {
    RegisterSpec::new(name, 2)
        .field(3, 3, "Interrupt Status")
        .field(4, 4, "Capabilities List")
        .field(5, 5, "66 MHz Capable")
        .field(7, 7, "Fast Back-to-Back Transactions Capable")
        .field(8, 8, "Master Data Parity Error")
        .field(9, 10, "DEVSEL Timing")
        .field(11, 11, "Signaled Target Abort")
        .field(12, 12, "Received Target Abort")
        .field(13, 13, "Received Master Abort")
        .field(14, 14, "Signaled System Error")
        .field(15, 15, "Detected Parity Error")
}

/// Registers shared by both header layouts
fn common_registers() -> BTreeMap<u16, RegisterSpec> {
    BTreeMap::from([
        (0x00, RegisterSpec::new("Vendor ID", 2)),
        (0x02, RegisterSpec::new("Device ID", 2)),
        (
            0x04,
            RegisterSpec::new("Command", 2)
                .field(0, 0, "I/O Space Enable")
                .field(1, 1, "Memory Space Enable")
                .field(2, 2, "Bus Master Enable")
                .field(3, 3, "Special Cycle Enable")
                .field(4, 4, "Memory Write and Invalidate")
                .field(5, 5, "VGA Palette Snoop")
                .field(6, 6, "Parity Error Response")
                .field(8, 8, "SERR# Enable")
                .field(9, 9, "Fast Back-to-Back Transactions Enable")
                .field(10, 10, "Interrupt Disable"),
        ),
        (0x06, status_register("Status")),
        (0x08, RegisterSpec::new("Revision ID", 1)),
        (
            0x09,
            RegisterSpec::new("Class Code", 3)
                .field(0, 7, "Programming Interface")
                .field(8, 15, "Sub-Class Code")
                .field(16, 23, "Base Class Code"),
        ),
        (0x0c, RegisterSpec::new("Cache Line Size", 1)),
        (0x0d, RegisterSpec::new("Latency Timer", 1)),
        (
            0x0e,
            RegisterSpec::new("Header Type", 1)
                .field(0, 6, "Header Layout")
                .field(7, 7, "Multi-Function Device"),
        ),
        (0x0f, RegisterSpec::new("BIST", 1)),
        (0x34, RegisterSpec::new("Capabilities Pointer", 1)),
        (0x3c, RegisterSpec::new("Interrupt Line", 1)),
        (0x3d, RegisterSpec::new("Interrupt Pin", 1)),
    ])
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodedHeader {
    pub layout: HeaderLayout,
    pub header_type: HeaderType,
    pub registers: Vec<DecodedRegister>,
}

impl DecodedHeader {
    pub fn register(&self, name: &str) -> Option<&DecodedRegister> {
        self.registers.iter().find(|register| register.name == name)
    }
}

/// Select the header layout of `space` and decode its registers, anchored at offset 0
pub fn decode(space: &ConfigSpace, schema: &HeaderSchema) -> Result<DecodedHeader> {
    let layout = HeaderLayout::select(space)?;
    let header_type = HeaderType::read(space)?;
    log::debug!("{layout} header, {header_type:?}");

    let registers = schema
        .registers(layout)
        .iter()
        .map(|(&offset, register)| decode_register(space, 0, offset, register))
        .collect::<Result<Vec<_>>>()?;

    Ok(DecodedHeader {
        layout,
        header_type,
        registers,
    })
}
