//! Capability, register, and field definitions
//!
//! A schema is plain data loaded from YAML. Registers are keyed by their offset relative to
//! the capability (or header) they belong to, and fields are keyed by their low bit:
//!
//! ```yaml
//! 0x01:
//!   Name: Power Management
//!   Registers:
//!     0x02:
//!       Name: Power Management Capabilities
//!       Width: 2
//!       Fields:
//!         0: { Name: Version, HiBit: 2 }
//! ```
//!
//! The flat layout, with registers and fields keyed by integer directly beside `Name`, is
//! accepted as well and may be mixed with the tagged one. Any other key is an error.

use crate::{walk::ChainKind, Error, Result};
use core::fmt;
use serde::{
    de::{Error as _, MapAccess, Visitor},
    Deserialize, Deserializer, Serialize,
};
use std::{collections::BTreeMap, path::Path};

/// A named, inclusive bit range of a register; the low bit is its key in [`RegisterSpec`]
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "HiBit")]
    pub high_bit: u8,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterSpec {
    pub name: String,
    /// Width in bytes, between 1 and 4
    pub width: u8,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<u8, FieldSpec>,
}

impl RegisterSpec {
    pub fn new(name: impl Into<String>, width: u8) -> RegisterSpec {
        RegisterSpec {
            name: name.into(),
            width,
            fields: BTreeMap::new(),
        }
    }

    /// Add the field `[low, high]` to this register
    pub fn field(mut self, low: u8, high: u8, name: impl Into<String>) -> RegisterSpec {
        self.fields.insert(
            low,
            FieldSpec {
                name: name.into(),
                high_bit: high,
            },
        );
        self
    }

    #[inline]
    pub fn bits(&self) -> u8 {
        self.width.saturating_mul(8)
    }

    fn validate(&self, offset: u16) -> Result<()> {
        if !(1..=4).contains(&self.width) {
            return Err(Error::invalid_schema(format!(
                "register {:?} at {offset:#x} has width {}",
                self.name, self.width
            )));
        }
        for (&low, field) in &self.fields {
            if low > field.high_bit || field.high_bit >= self.bits() {
                return Err(Error::invalid_schema(format!(
                    "field {:?} of register {:?} spans bits [{}:{low}] of a {}-bit register",
                    field.name,
                    self.name,
                    field.high_bit,
                    self.bits()
                )));
            }
        }
        Ok(())
    }
}

/// Validate a set of registers keyed by relative offset
pub(crate) fn validate_registers(registers: &BTreeMap<u16, RegisterSpec>) -> Result<()> {
    registers
        .iter()
        .try_for_each(|(&offset, register)| register.validate(offset))
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitySpec {
    pub name: String,
    pub registers: BTreeMap<u16, RegisterSpec>,
}

impl CapabilitySpec {
    pub fn new(name: impl Into<String>) -> CapabilitySpec {
        CapabilitySpec {
            name: name.into(),
            registers: BTreeMap::new(),
        }
    }

    /// Add a register at `offset`, relative to the start of the capability
    pub fn register(mut self, offset: u16, register: RegisterSpec) -> CapabilitySpec {
        self.registers.insert(offset, register);
        self
    }
}

/// A key of a register or capability mapping: an attribute name, or the integer offset or
/// low bit of a flat-layout entry
#[derive(Deserialize)]
#[serde(untagged)]
enum Key {
    Index(u16),
    Name(String),
}

fn insert_entry<K: Ord + fmt::Display, V>(
    map: &mut BTreeMap<K, V>,
    key: K,
    value: V,
) -> core::result::Result<(), String> {
    if map.contains_key(&key) {
        return Err(format!("{key} is defined twice"));
    }
    map.insert(key, value);
    Ok(())
}

const REGISTER_KEYS: &[&str] = &["Name", "Width", "Fields", "<low bit>"];

impl<'de> Deserialize<'de> for RegisterSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        struct RegisterVisitor;

        impl<'de> Visitor<'de> for RegisterVisitor {
            type Value = RegisterSpec;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a register with Name, Width and fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> core::result::Result<RegisterSpec, A::Error> {
                let mut name: Option<String> = None;
                let mut width: Option<u8> = None;
                let mut fields: BTreeMap<u8, FieldSpec> = BTreeMap::new();
                while let Some(key) = map.next_key::<Key>()? {
                    match key {
                        Key::Index(low) => {
                            let low = u8::try_from(low).map_err(|_| {
                                A::Error::custom(format_args!("field low bit {low} out of range"))
                            })?;
                            insert_entry(&mut fields, low, map.next_value()?).map_err(A::Error::custom)?;
                        }
                        Key::Name(key) => match key.as_str() {
                            "Name" => name = Some(map.next_value()?),
                            "Width" => width = Some(map.next_value()?),
                            "Fields" => {
                                for (low, field) in map.next_value::<BTreeMap<u8, FieldSpec>>()? {
                                    insert_entry(&mut fields, low, field).map_err(A::Error::custom)?;
                                }
                            }
                            _ => return Err(A::Error::unknown_field(&key, REGISTER_KEYS)),
                        },
                    }
                }
                Ok(RegisterSpec {
                    name: name.ok_or_else(|| A::Error::missing_field("Name"))?,
                    width: width.ok_or_else(|| A::Error::missing_field("Width"))?,
                    fields,
                })
            }
        }

        deserializer.deserialize_map(RegisterVisitor)
    }
}

const CAPABILITY_KEYS: &[&str] = &["Name", "Registers", "<offset>"];

impl<'de> Deserialize<'de> for CapabilitySpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        struct CapabilityVisitor;

        impl<'de> Visitor<'de> for CapabilityVisitor {
            type Value = CapabilitySpec;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a capability with a Name and registers")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> core::result::Result<CapabilitySpec, A::Error> {
                let mut name: Option<String> = None;
                let mut registers: BTreeMap<u16, RegisterSpec> = BTreeMap::new();
                while let Some(key) = map.next_key::<Key>()? {
                    match key {
                        Key::Index(offset) => {
                            insert_entry(&mut registers, offset, map.next_value()?).map_err(A::Error::custom)?
                        }
                        Key::Name(key) => match key.as_str() {
                            "Name" => name = Some(map.next_value()?),
                            "Registers" => {
                                for (offset, register) in map.next_value::<BTreeMap<u16, RegisterSpec>>()? {
                                    insert_entry(&mut registers, offset, register).map_err(A::Error::custom)?;
                                }
                            }
                            _ => return Err(A::Error::unknown_field(&key, CAPABILITY_KEYS)),
                        },
                    }
                }
                Ok(CapabilitySpec {
                    name: name.ok_or_else(|| A::Error::missing_field("Name"))?,
                    registers,
                })
            }
        }

        deserializer.deserialize_map(CapabilityVisitor)
    }
}

/// The capabilities of interest for one chain, keyed by capability ID
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CapabilitySchema {
    capabilities: BTreeMap<u16, CapabilitySpec>,
}

impl CapabilitySchema {
    pub fn new() -> CapabilitySchema {
        CapabilitySchema::default()
    }

    /// Parse and validate a schema for the chain `kind`
    pub fn from_yaml(yaml: &str, kind: ChainKind) -> Result<CapabilitySchema> {
        let schema: CapabilitySchema = serde_yaml::from_str(yaml)?;
        schema.validate(kind)?;
        Ok(schema)
    }

    pub fn load(path: impl AsRef<Path>, kind: ChainKind) -> Result<CapabilitySchema> {
        let yaml = std::fs::read_to_string(path)?;
        CapabilitySchema::from_yaml(&yaml, kind)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check IDs against the chain `kind` and every register and field for a sane layout
    pub fn validate(&self, kind: ChainKind) -> Result<()> {
        for (&id, capability) in &self.capabilities {
            if kind == ChainKind::Standard && id > u8::MAX as u16 {
                return Err(Error::invalid_schema(format!(
                    "standard capability {:?} has 16-bit id {id:#x}",
                    capability.name
                )));
            }
            validate_registers(&capability.registers)?;
        }
        Ok(())
    }

    pub fn insert(&mut self, id: u16, capability: CapabilitySpec) -> Option<CapabilitySpec> {
        self.capabilities.insert(id, capability)
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, id: u16, capability: CapabilitySpec) -> CapabilitySchema {
        self.insert(id, capability);
        self
    }

    #[inline]
    pub fn get(&self, id: u16) -> Option<&CapabilitySpec> {
        self.capabilities.get(&id)
    }

    #[inline]
    pub fn contains(&self, id: u16) -> bool {
        self.capabilities.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &CapabilitySpec)> + '_ {
        self.capabilities.iter().map(|(&id, spec)| (id, spec))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POWER_MANAGEMENT: &str = r#"
0x01:
  Name: Power Management
  Registers:
    0x00:
      Name: Capability Header
      Width: 2
      Fields:
        0: { Name: Capability ID, HiBit: 7 }
        8: { Name: Next Pointer, HiBit: 15 }
    0x04:
      Name: Control/Status
      Width: 2
"#;

    #[test]
    fn parses_tagged_layout() {
        let schema = CapabilitySchema::from_yaml(POWER_MANAGEMENT, ChainKind::Standard).unwrap();
        assert_eq!(schema.len(), 1);

        let pm = schema.get(0x01).unwrap();
        assert_eq!(pm.name, "Power Management");
        assert_eq!(pm.registers.len(), 2);

        let header = &pm.registers[&0x00];
        assert_eq!(header.width, 2);
        assert_eq!(header.fields[&8].name, "Next Pointer");
        assert_eq!(header.fields[&8].high_bit, 15);
        assert!(pm.registers[&0x04].fields.is_empty());
    }

    #[test]
    fn yaml_round_trips() {
        let schema = CapabilitySchema::from_yaml(POWER_MANAGEMENT, ChainKind::Standard).unwrap();
        let yaml = schema.to_yaml().unwrap();
        assert_eq!(CapabilitySchema::from_yaml(&yaml, ChainKind::Standard).unwrap(), schema);
    }

    #[test]
    fn rejects_bad_width() {
        let yaml = "1: { Name: X, Registers: { 0: { Name: R, Width: 5 } } }";
        assert!(matches!(
            CapabilitySchema::from_yaml(yaml, ChainKind::Standard),
            Err(Error::InvalidSchema { .. })
        ));
    }

    #[test]
    fn rejects_field_past_register_end() {
        let schema = CapabilitySchema::new().with(
            0x10,
            CapabilitySpec::new("PCI Express")
                .register(0x02, RegisterSpec::new("Capabilities", 2).field(9, 16, "Interrupt")),
        );
        assert!(matches!(
            schema.validate(ChainKind::Standard),
            Err(Error::InvalidSchema { .. })
        ));
    }

    #[test]
    fn rejects_inverted_field() {
        let schema = CapabilitySchema::new().with(
            0x10,
            CapabilitySpec::new("PCI Express")
                .register(0x02, RegisterSpec::new("Capabilities", 2).field(8, 3, "Backwards")),
        );
        assert!(schema.validate(ChainKind::Extended).is_err());
    }

    #[test]
    fn parses_flat_layout() {
        let yaml = "\
0x01:
  Name: Power Management
  0x02:
    Name: PMC
    Width: 2
    0: { Name: Version, HiBit: 2 }
    11: { Name: PME Support, HiBit: 15 }
  0x04:
    Name: Control/Status
    Width: 2
";
        let schema = CapabilitySchema::from_yaml(yaml, ChainKind::Standard).unwrap();
        let pm = schema.get(0x01).unwrap();
        assert_eq!(pm.registers.len(), 2);

        let pmc = &pm.registers[&0x02];
        assert_eq!(pmc.name, "PMC");
        assert_eq!(pmc.width, 2);
        assert_eq!(pmc.fields[&0].high_bit, 2);
        assert_eq!(pmc.fields[&11].name, "PME Support");
    }

    #[test]
    fn flat_and_tagged_layouts_agree() {
        let flat = "1: { Name: X, 0: { Name: R, Width: 2, 8: { Name: F, HiBit: 15 } } }";
        let tagged = "1: { Name: X, Registers: { 0: { Name: R, Width: 2, Fields: { 8: { Name: F, HiBit: 15 } } } } }";
        assert_eq!(
            CapabilitySchema::from_yaml(flat, ChainKind::Standard).unwrap(),
            CapabilitySchema::from_yaml(tagged, ChainKind::Standard).unwrap()
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        for yaml in [
            "1: { Name: X, Regsters: { 0: { Name: R, Width: 2 } } }",
            "1: { Name: X, 0: { Name: R, Width: 2, Feilds: { 0: { Name: F, HiBit: 1 } } } }",
            "1: { Name: X, 0: { Name: R, Width: 2, 0: { Name: F, HiBit: 1, Lo: 0 } } }",
        ] {
            assert!(matches!(
                CapabilitySchema::from_yaml(yaml, ChainKind::Standard),
                Err(Error::Yaml(_))
            ));
        }
    }

    #[test]
    fn rejects_register_defined_twice() {
        let yaml = "1: { Name: X, 0: { Name: A, Width: 1 }, Registers: { 0: { Name: B, Width: 1 } } }";
        assert!(CapabilitySchema::from_yaml(yaml, ChainKind::Standard).is_err());
    }

    #[test]
    fn register_requires_width() {
        let yaml = "1: { Name: X, 0: { Name: R } }";
        assert!(matches!(
            CapabilitySchema::from_yaml(yaml, ChainKind::Standard),
            Err(Error::Yaml(_))
        ));
    }

    #[test]
    fn wide_ids_only_for_extended_chain() {
        let schema = CapabilitySchema::new().with(0x0019, CapabilitySpec::new("Secondary PCIe"));
        assert!(schema.validate(ChainKind::Standard).is_ok());

        let schema = schema.with(0x0100, CapabilitySpec::new("Too Wide"));
        assert!(schema.validate(ChainKind::Standard).is_err());
        assert!(schema.validate(ChainKind::Extended).is_ok());
    }
}
