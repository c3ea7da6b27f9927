//! Text rendering of decode results
//!
//! Every renderer is a [`Display`](fmt::Display) adapter over decoded data; nothing here
//! reads configuration space.

use crate::{
    decode::{CapabilityPass, DecodedCapability, DecodedRegister},
    header::DecodedHeader,
    schema::CapabilitySchema,
    walk::ChainKind,
    ConfigSpace, Error,
};
use core::fmt;

/// Display width of one bit cell in a register diagram
const BIT_CELL: usize = 4;

/// The raw configuration space, 16 bytes per line
pub struct HexDump<'a>(pub &'a ConfigSpace);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (line, chunk) in self.0.as_bytes().chunks(16).enumerate() {
            write!(f, "{:08X}:", line * 16)?;
            for (i, byte) in chunk.iter().enumerate() {
                let sep = if i == 8 { '-' } else { ' ' };
                write!(f, "{sep}{byte:02X}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Every chain entry of a pass in traversal order, including unrecognized IDs
pub struct ChainListing<'a>(pub &'a CapabilityPass);

impl fmt::Display for ChainListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.0.log {
            match self.0.kind {
                ChainKind::Standard => writeln!(f, "{:02X}h @ {:02X}h", entry.id, entry.offset)?,
                ChainKind::Extended => writeln!(
                    f,
                    "{:04X}h of v{:X} @ {:03X}h",
                    entry.id,
                    entry.version.unwrap_or(0),
                    entry.offset
                )?,
            }
        }
        if let Some(err) = &self.0.chain_error {
            writeln!(f, "!! {err}")?;
        }
        Ok(())
    }
}

/// A capability drawn register by register, one boxed cell per bit
///
/// Each register line reads `[RRRh] name @ 0xAAA = 0xVVVV`: the offset relative to the
/// capability, then the absolute address in configuration space, then the value padded to
/// the register's width.
pub struct Diagram<'a>(pub &'a DecodedCapability);

impl fmt::Display for Diagram<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = capability_title(self.0);
        writeln!(f, "{title}")?;
        rule(f, title.len())?;

        for register in &self.0.registers {
            register_line(f, register)?;

            let bits = register.bits();
            write!(f, "  ")?;
            for bit in (0..bits).rev() {
                write!(f, "{bit:<width$}", width = BIT_CELL)?;
            }
            writeln!(f)?;

            rule(f, bits as usize * BIT_CELL + 1)?;
            write!(f, "|")?;
            for bit in (0..bits).rev() {
                write!(f, " {} |", register.bit(bit) as u8)?;
            }
            writeln!(f)?;
            rule(f, bits as usize * BIT_CELL + 1)?;
        }
        writeln!(f)
    }
}

/// A capability's registers and their fields
///
/// Register lines use the same relative offset, absolute address and padded value as
/// [`Diagram`]. Field values are padded to `ceil(bits / 4)` digits.
pub struct FieldListing<'a>(pub &'a DecodedCapability);

impl fmt::Display for FieldListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", capability_title(self.0))?;
        self.0
            .registers
            .iter()
            .try_for_each(|register| register_with_fields(f, register))
    }
}

pub struct HeaderListing<'a>(pub &'a DecodedHeader);

impl fmt::Display for HeaderListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let multi = if self.0.header_type.is_multi_function() {
            ", multi-function"
        } else {
            ""
        };
        writeln!(f, "[{} header{multi}]", self.0.layout)?;
        self.0
            .registers
            .iter()
            .try_for_each(|register| register_with_fields(f, register))
    }
}

/// For every capability in the schema: its diagram and fields if it was found, otherwise a
/// note that it is missing
pub struct Summary<'a> {
    pub pass: &'a CapabilityPass,
    pub schema: &'a CapabilitySchema,
}

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, spec) in self.schema.iter() {
            if let Some(capability) = self.pass.find(id) {
                write!(f, "{}{}", Diagram(capability), FieldListing(capability))?;
                continue;
            }
            let failure = self.pass.failures.iter().find(
                |err| matches!(err, Error::CapabilityDecode { id: failed, .. } if *failed == id),
            );
            match failure {
                Some(err) => writeln!(f, "Cap decode failed: {}: {err}", spec.name)?,
                None => writeln!(f, "Cap Not found: {}", spec.name)?,
            }
        }
        Ok(())
    }
}

fn capability_title(capability: &DecodedCapability) -> String {
    format!(
        "[0x{:03X}: {} @ 0x{:X}]",
        capability.id, capability.name, capability.offset
    )
}

fn rule(f: &mut fmt::Formatter<'_>, len: usize) -> fmt::Result {
    writeln!(f, "{:-<len$}", "")
}

fn register_line(f: &mut fmt::Formatter<'_>, register: &DecodedRegister) -> fmt::Result {
    writeln!(
        f,
        "[{:03X}h] {} @ 0x{:X} = {}",
        register.offset, register.name, register.address, register.value
    )
}

fn register_with_fields(f: &mut fmt::Formatter<'_>, register: &DecodedRegister) -> fmt::Result {
    write!(f, "  ")?;
    register_line(f, register)?;
    for field in &register.fields {
        writeln!(
            f,
            "    [{:02}:{:02}] - {}: {}",
            field.high_bit, field.low_bit, field.name, field.value
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decode::Decoder,
        schema::{CapabilitySpec, RegisterSpec},
        CONFIG_SPACE_SIZE,
    };

    fn space() -> ConfigSpace {
        let mut bytes = [0u8; CONFIG_SPACE_SIZE];
        bytes[0x34] = 0x40;
        bytes[0x40..0x44].copy_from_slice(&[0x05, 0x50, 0x81, 0x00]);
        bytes[0x50..0x52].copy_from_slice(&[0x09, 0x00]);
        ConfigSpace::new(bytes)
    }

    fn schema() -> CapabilitySchema {
        CapabilitySchema::new()
            .with(
                0x05,
                CapabilitySpec::new("MSI").register(
                    0x02,
                    RegisterSpec::new("Message Control", 2)
                        .field(0, 0, "MSI Enable")
                        .field(7, 7, "64 bit address capable"),
                ),
            )
            .with(0x10, CapabilitySpec::new("PCI Express"))
    }

    #[test]
    fn hex_dump_round_trips_through_parser() {
        let space = space();
        let text = HexDump(&space).to_string();
        assert_eq!(text.lines().count(), 256);
        assert!(text.starts_with("00000000: 00 00"));
        assert!(text.contains("00000040: 05 50 81 00 00 00 00 00-00"));
        assert_eq!(crate::dump::parse(&text).unwrap(), space);
    }

    #[test]
    fn chain_listing_includes_unknown_ids() {
        let space = space();
        let pass = Decoder::new(&space).standard(&schema());
        assert_eq!(ChainListing(&pass).to_string(), "05h @ 40h\n09h @ 50h\n");
    }

    #[test]
    fn field_listing_format() {
        let space = space();
        let pass = Decoder::new(&space).standard(&schema());
        let listing = FieldListing(pass.find(0x05).unwrap()).to_string();
        assert_eq!(
            listing,
            "[0x005: MSI @ 0x40]\n\
             \x20 [002h] Message Control @ 0x42 = 0x0081\n\
             \x20   [00:00] - MSI Enable: 0x1\n\
             \x20   [07:07] - 64 bit address capable: 0x1\n"
        );
    }

    #[test]
    fn diagram_draws_every_bit() {
        let space = space();
        let pass = Decoder::new(&space).standard(&schema());
        let diagram = Diagram(pass.find(0x05).unwrap()).to_string();
        let lines: Vec<&str> = diagram.lines().collect();

        assert_eq!(lines[0], "[0x005: MSI @ 0x40]");
        assert_eq!(lines[1], "-".repeat(lines[0].len()));
        assert!(lines[3].starts_with("  15  14  13"));
        assert_eq!(lines[4].len(), 16 * BIT_CELL + 1);
        assert_eq!(
            lines[5],
            "| 0 | 0 | 0 | 0 | 0 | 0 | 0 | 0 | 1 | 0 | 0 | 0 | 0 | 0 | 0 | 1 |"
        );
    }

    #[test]
    fn summary_reports_missing_capabilities() {
        let space = space();
        let schema = schema();
        let pass = Decoder::new(&space).standard(&schema);
        let summary = Summary { pass: &pass, schema: &schema }.to_string();
        assert!(summary.contains("[0x005: MSI @ 0x40]"));
        assert!(summary.ends_with("Cap Not found: PCI Express\n"));
    }
}
