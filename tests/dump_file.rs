//! Dump files on disk, from ingest to decode

use pcicfg::{dump, render::HexDump, walk::ChainKind, CapabilitySchema, Decoder, Error};
use std::io::Write;
use tempfile::NamedTempFile;

fn timestamped(space_text: &str) -> String {
    space_text
        .lines()
        .map(|line| format!("2023-10-12 09:10:54\t  {line}  *................*\n"))
        .collect()
}

#[test]
fn load_decodes_written_dump() {
    let mut bytes = [0u8; pcicfg::CONFIG_SPACE_SIZE];
    bytes[0x34] = 0x40;
    bytes[0x40..0x44].copy_from_slice(&[0x01, 0x00, 0x03, 0x00]);
    let original = pcicfg::ConfigSpace::new(bytes);

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(timestamped(&HexDump(&original).to_string()).as_bytes())
        .unwrap();

    let space = dump::load(file.path()).unwrap();
    assert_eq!(space, original);

    let schema = CapabilitySchema::from_yaml(
        "0x01: { Name: Power Management, Registers: { 2: { Name: PMC, Width: 2, Fields: { 0: { Name: Version, HiBit: 2 } } } } }",
        ChainKind::Standard,
    )
    .unwrap();
    let pass = Decoder::new(&space).standard(&schema);
    let pm = pass.find(0x01).unwrap();
    assert_eq!(pm.registers[0].fields[0].value.get(), 3);
}

#[test]
fn load_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.dump");
    assert!(matches!(dump::load(missing), Err(Error::Io(_))));
}

#[test]
fn load_rejects_truncated_file() {
    let original = pcicfg::ConfigSpace::new([0xff; pcicfg::CONFIG_SPACE_SIZE]);
    let text: String = HexDump(&original)
        .to_string()
        .lines()
        .take(128)
        .map(|line| format!("{line}\n"))
        .collect();

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    assert!(matches!(dump::load(file.path()), Err(Error::BufferLength(2048))));
}
