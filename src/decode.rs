//! Schema-driven decoding of capability structures
//!
//! A decode pass never touches its schema. Results are returned as new values
//! ([`CapabilityPass`], [`DecodedHeader`]) which can be re-shaped into the schema's own
//! layout with [`CapabilityPass::populate`] for archival.

use crate::{
    bit_field,
    header::{self, DecodedHeader, HeaderSchema},
    schema::{CapabilitySchema, CapabilitySpec, RegisterSpec},
    walk::{self, Chain, ChainEntry, ChainKind, Extended, Standard},
    ConfigSpace, Error, Result,
};
use core::fmt;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// A value read from configuration space, along with the number of hex digits it is
/// displayed with
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DecodedValue {
    value: u32,
    digits: u8,
}

impl DecodedValue {
    /// A register value, padded to two digits per byte
    fn register(value: u32, width: u8) -> DecodedValue {
        DecodedValue {
            value,
            digits: 2 * width,
        }
    }

    /// A field value, padded to one digit per started nibble
    fn field(value: u32, low: u8, high: u8) -> DecodedValue {
        DecodedValue {
            value,
            digits: (high - low + 1).div_ceil(4),
        }
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.value
    }

    #[inline]
    pub fn digits(self) -> usize {
        self.digits as usize
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:0width$X}", self.value, width = self.digits())
    }
}

impl Serialize for DecodedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodedField {
    pub name: String,
    pub low_bit: u8,
    pub high_bit: u8,
    pub value: DecodedValue,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodedRegister {
    pub name: String,
    /// Offset relative to the capability or header
    pub offset: u16,
    /// Absolute offset within configuration space
    pub address: usize,
    /// Width in bytes
    pub width: u8,
    pub value: DecodedValue,
    pub fields: Vec<DecodedField>,
}

impl DecodedRegister {
    #[inline]
    pub fn bits(&self) -> u8 {
        self.width * 8
    }

    /// Returns the state of bit `n` of the register value
    #[inline]
    pub fn bit(&self, n: u8) -> bool {
        n < self.bits() && self.value.get() >> n & 1 != 0
    }
}

/// One instance of a capability found in the chain and described by the schema
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecodedCapability {
    pub id: u16,
    pub version: Option<u8>,
    pub name: String,
    /// Absolute offset of the capability
    pub offset: u16,
    pub registers: Vec<DecodedRegister>,
}

impl DecodedCapability {
    pub fn register(&self, name: &str) -> Option<&DecodedRegister> {
        self.registers.iter().find(|register| register.name == name)
    }
}

/// Read the register described by `spec` at `anchor + offset`, along with its fields
pub fn decode_register(
    space: &ConfigSpace,
    anchor: usize,
    offset: u16,
    spec: &RegisterSpec,
) -> Result<DecodedRegister> {
    let address = anchor + offset as usize;
    let raw = space.read(address, spec.width as usize)?;
    let fields = spec
        .fields
        .iter()
        .map(|(&low, field)| {
            let value = bit_field(raw, low, field.high_bit)?;
            Ok(DecodedField {
                name: field.name.clone(),
                low_bit: low,
                high_bit: field.high_bit,
                value: DecodedValue::field(value, low, field.high_bit),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let register = DecodedRegister {
        name: spec.name.clone(),
        offset,
        address,
        width: spec.width,
        value: DecodedValue::register(raw, spec.width),
        fields,
    };
    log::debug!("{} @ {address:#05x} = {}", register.name, register.value);
    Ok(register)
}

/// Decode every register of `spec` for the capability instance at `entry`
///
/// Any failure is reported as [`Error::CapabilityDecode`] for this instance alone.
pub fn decode_capability(
    space: &ConfigSpace,
    spec: &CapabilitySpec,
    entry: ChainEntry,
) -> Result<DecodedCapability> {
    let registers = spec
        .registers
        .iter()
        .map(|(&offset, register)| decode_register(space, entry.offset as usize, offset, register))
        .collect::<Result<Vec<_>>>()
        .map_err(|err| Error::CapabilityDecode {
            id: entry.id,
            offset: entry.offset,
            source: Box::new(err),
        })?;

    Ok(DecodedCapability {
        id: entry.id,
        version: entry.version,
        name: spec.name.clone(),
        offset: entry.offset,
        registers,
    })
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Outcome {
    /// The chain terminated normally and every recognized capability decoded
    Complete,
    /// The chain terminated normally, but some capabilities failed to decode
    Partial,
    /// The walk was aborted; entries before the fault are still valid
    Malformed,
}

/// Result of walking one capability chain against a schema
#[derive(Debug)]
pub struct CapabilityPass {
    pub kind: ChainKind,
    /// Every chain entry in traversal order, recognized or not
    pub log: Vec<ChainEntry>,
    /// Recognized capability instances in traversal order
    pub capabilities: Vec<DecodedCapability>,
    /// Capability instances which could not be decoded
    pub failures: Vec<Error>,
    /// The error that ended the walk early, if any
    pub chain_error: Option<Error>,
}

impl CapabilityPass {
    pub fn outcome(&self) -> Outcome {
        if self.chain_error.is_some() {
            Outcome::Malformed
        } else if !self.failures.is_empty() {
            Outcome::Partial
        } else {
            Outcome::Complete
        }
    }

    /// Returns the last decoded instance of capability `id`
    pub fn find(&self, id: u16) -> Option<&DecodedCapability> {
        self.capabilities.iter().rev().find(|cap| cap.id == id)
    }

    pub fn instances(&self, id: u16) -> impl DoubleEndedIterator<Item = &DecodedCapability> + '_ {
        self.capabilities.iter().filter(move |cap| cap.id == id)
    }

    /// Re-shape `schema` with the offsets and values found by this pass
    ///
    /// Capabilities absent from the chain carry no `Offset`. When a capability occurs more
    /// than once, the last instance is recorded.
    pub fn populate(&self, schema: &CapabilitySchema) -> PopulatedSchema {
        let populated = schema
            .iter()
            .map(|(id, spec)| {
                let mut instances = self.instances(id);
                let found = instances.next_back();
                if instances.next().is_some() {
                    log::warn!("{} occurs more than once, archiving the last instance", spec.name);
                }
                (id, PopulatedCapability::new(spec, found))
            })
            .collect();
        PopulatedSchema(populated)
    }
}

/// A schema annotated with decoded values, in the same shape as its YAML input
#[derive(Clone, Debug, Serialize)]
#[serde(transparent)]
pub struct PopulatedSchema(pub BTreeMap<u16, PopulatedCapability>);

impl PopulatedSchema {
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PopulatedCapability {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,
    pub registers: BTreeMap<u16, PopulatedRegister>,
}

impl PopulatedCapability {
    fn new(spec: &CapabilitySpec, found: Option<&DecodedCapability>) -> PopulatedCapability {
        let registers = spec
            .registers
            .iter()
            .map(|(&offset, register)| {
                let decoded = found.and_then(|cap| cap.registers.iter().find(|r| r.offset == offset));
                (offset, PopulatedRegister::new(register, decoded))
            })
            .collect();
        PopulatedCapability {
            name: spec.name.clone(),
            offset: found.map(|cap| format!("0x{:X}", cap.offset)),
            version: found.and_then(|cap| cap.version),
            registers,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PopulatedRegister {
    pub name: String,
    pub width: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<DecodedValue>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<u8, PopulatedField>,
}

impl PopulatedRegister {
    fn new(spec: &RegisterSpec, decoded: Option<&DecodedRegister>) -> PopulatedRegister {
        let fields = spec
            .fields
            .iter()
            .map(|(&low, field)| {
                let value = decoded
                    .and_then(|reg| reg.fields.iter().find(|f| f.low_bit == low))
                    .map(|f| f.value);
                let populated = PopulatedField {
                    name: field.name.clone(),
                    high_bit: field.high_bit,
                    value,
                };
                (low, populated)
            })
            .collect();
        PopulatedRegister {
            name: spec.name.clone(),
            width: spec.width,
            value: decoded.map(|reg| reg.value),
            fields,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PopulatedField {
    pub name: String,
    #[serde(rename = "HiBit")]
    pub high_bit: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<DecodedValue>,
}

/// Decodes a single configuration space
///
/// Each pass borrows the space immutably, so passes are independent and may be repeated
/// with identical results.
#[derive(Clone, Copy, Debug)]
pub struct Decoder<'a> {
    space: &'a ConfigSpace,
}

impl<'a> Decoder<'a> {
    pub fn new(space: &'a ConfigSpace) -> Decoder<'a> {
        Decoder { space }
    }

    #[inline]
    pub fn space(&self) -> &'a ConfigSpace {
        self.space
    }

    /// Select the header layout and decode its registers
    pub fn header(&self, schema: &HeaderSchema) -> Result<DecodedHeader> {
        header::decode(self.space, schema)
    }

    /// Walk the standard capability list
    pub fn standard(&self, schema: &CapabilitySchema) -> CapabilityPass {
        self.pass::<Standard>(schema)
    }

    /// Walk the extended capability list
    pub fn extended(&self, schema: &CapabilitySchema) -> CapabilityPass {
        self.pass::<Extended>(schema)
    }

    pub fn pass<C: Chain>(&self, schema: &CapabilitySchema) -> CapabilityPass {
        let mut pass = CapabilityPass {
            kind: C::KIND,
            log: Vec::new(),
            capabilities: Vec::new(),
            failures: Vec::new(),
            chain_error: None,
        };

        for entry in walk::walk::<C>(self.space) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    pass.chain_error = Some(err);
                    break;
                }
            };
            pass.log.push(entry);

            let Some(spec) = schema.get(entry.id) else {
                log::debug!("no schema for {} capability {:#x}", C::KIND, entry.id);
                continue;
            };
            match decode_capability(self.space, spec, entry) {
                Ok(capability) => pass.capabilities.push(capability),
                Err(err) => {
                    log::warn!("{err}");
                    pass.failures.push(err);
                }
            }
        }

        pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CONFIG_SPACE_SIZE;

    fn power_management() -> CapabilitySpec {
        CapabilitySpec::new("Power Management")
            .register(
                0x00,
                RegisterSpec::new("Capability Header", 2)
                    .field(0, 7, "Capability ID")
                    .field(8, 15, "Next Pointer"),
            )
            .register(
                0x02,
                RegisterSpec::new("PMC", 2)
                    .field(0, 2, "Version")
                    .field(11, 15, "PME Support"),
            )
    }

    fn space() -> ConfigSpace {
        let mut bytes = [0u8; CONFIG_SPACE_SIZE];
        bytes[0x34] = 0x40;
        bytes[0x40..0x44].copy_from_slice(&[0x01, 0x00, 0x03, 0xC8]);
        ConfigSpace::new(bytes)
    }

    #[test]
    fn value_display_pads_to_digits() {
        assert_eq!(DecodedValue::register(0x3, 2).to_string(), "0x0003");
        assert_eq!(DecodedValue::register(0xABCDEF, 3).to_string(), "0xABCDEF");
        assert_eq!(DecodedValue::field(1, 7, 7).to_string(), "0x1");
        assert_eq!(DecodedValue::field(0x19, 11, 15).to_string(), "0x19");
        assert_eq!(DecodedValue::field(0x5, 0, 8).to_string(), "0x005");
    }

    #[test]
    fn decodes_registers_and_fields() {
        let space = space();
        let entry = ChainEntry {
            id: 1,
            version: None,
            offset: 0x40,
        };
        let cap = decode_capability(&space, &power_management(), entry).unwrap();
        assert_eq!(cap.offset, 0x40);

        let pmc = cap.register("PMC").unwrap();
        assert_eq!(pmc.address, 0x42);
        assert_eq!(pmc.value.get(), 0xC803);
        assert_eq!(pmc.fields[0].name, "Version");
        assert_eq!(pmc.fields[0].value.get(), 0x3);
        assert_eq!(pmc.fields[1].value.get(), 0x19);
        assert!(pmc.bit(15));
        assert!(!pmc.bit(2));
        assert!(!pmc.bit(16));
    }

    #[test]
    fn register_past_the_end_fails_only_that_capability() {
        let space = space();
        let spec = CapabilitySpec::new("Huge").register(0x0FFF, RegisterSpec::new("Tail", 4));
        let entry = ChainEntry {
            id: 1,
            version: None,
            offset: 0x40,
        };
        let err = decode_capability(&space, &spec, entry).unwrap_err();
        assert!(matches!(
            err,
            Error::CapabilityDecode { id: 1, offset: 0x40, ref source }
                if matches!(**source, Error::OutOfRange { offset: 0x103F, width: 4 })
        ));
    }

    #[test]
    fn pass_is_idempotent() {
        let space = space();
        let schema = CapabilitySchema::new().with(0x01, power_management());
        let decoder = Decoder::new(&space);

        let first = decoder.standard(&schema);
        let second = decoder.standard(&schema);
        assert_eq!(first.outcome(), Outcome::Complete);
        assert_eq!(first.log, second.log);
        assert_eq!(first.capabilities, second.capabilities);
        assert_eq!(
            first.populate(&schema).to_yaml().unwrap(),
            second.populate(&schema).to_yaml().unwrap()
        );
    }

    #[test]
    fn populate_marks_missing_capabilities() {
        let space = space();
        let schema = CapabilitySchema::new()
            .with(0x01, power_management())
            .with(0x05, CapabilitySpec::new("MSI"));
        let populated = Decoder::new(&space).standard(&schema).populate(&schema);

        let pm = &populated.0[&0x01];
        assert_eq!(pm.offset.as_deref(), Some("0x40"));
        assert_eq!(pm.registers[&0x02].value.map(DecodedValue::get), Some(0xC803));
        assert_eq!(
            pm.registers[&0x02].fields[&11].value.map(|v| v.to_string()),
            Some("0x19".to_owned())
        );
        assert!(populated.0[&0x05].offset.is_none());
    }
}
