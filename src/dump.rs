//! Text hex dumps of configuration space
//!
//! Dumps are expected to contain one line per 16 bytes, each carrying an 8-digit hex offset
//! followed by a colon and the bytes in hex, e.g.
//!
//! ```text
//! 2023-10-12 09:10:54	  00000040: 01 50 03 c8 08 00 00 00-00 00 00 00 00 00 00 00  *.P..............*
//! ```
//!
//! Anything before the offset (timestamps, prefixes) and after the sixteenth byte (an ASCII
//! column) is ignored, as are lines without an offset.

use crate::{ConfigSpace, Error, Result, CONFIG_SPACE_SIZE};
use std::path::Path;

const LINE_BYTES: usize = 16;
const LAST_LINE: usize = CONFIG_SPACE_SIZE - LINE_BYTES;

/// Parse a text dump into a [`ConfigSpace`]
///
/// Collection starts at the first line with offset `0` and ends after offset `0xff0`.
/// Lines in between must be contiguous.
pub fn parse(text: &str) -> Result<ConfigSpace> {
    let mut bytes = Vec::with_capacity(CONFIG_SPACE_SIZE);
    let mut collecting = false;

    for (index, line) in text.lines().enumerate() {
        let Some((offset, data)) = split_line(line) else {
            continue;
        };
        if offset == 0 {
            collecting = true;
        }
        if !collecting {
            continue;
        }
        if offset != bytes.len() {
            return Err(Error::DumpDiscontinuity {
                found: offset,
                expected: bytes.len(),
            });
        }

        let before = bytes.len();
        bytes.extend(
            data.split(|c: char| c.is_whitespace() || c == '-')
                .filter(|token| !token.is_empty())
                .map_while(parse_byte)
                .take(LINE_BYTES),
        );
        if bytes.len() - before != LINE_BYTES {
            return Err(Error::DumpLine {
                line: index + 1,
                reason: format!("expected {LINE_BYTES} bytes, found {}", bytes.len() - before),
            });
        }

        if offset == LAST_LINE {
            break;
        }
    }

    log::debug!("collected {} bytes of configuration space", bytes.len());
    ConfigSpace::from_bytes(&bytes)
}

/// Read and parse the text dump at `path`
pub fn load(path: impl AsRef<Path>) -> Result<ConfigSpace> {
    let text = std::fs::read_to_string(path)?;
    parse(&text)
}

/// Returns the offset of a dump line and the text following its colon
fn split_line(line: &str) -> Option<(usize, &str)> {
    let bytes = line.as_bytes();
    bytes
        .iter()
        .enumerate()
        .filter(|&(colon, &byte)| byte == b':' && colon >= 8)
        .find_map(|(colon, _)| {
            let start = colon - 8;
            let digits = &bytes[start..colon];
            let preceded_by_hex = start > 0 && bytes[start - 1].is_ascii_hexdigit();
            if preceded_by_hex || !digits.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            let offset = usize::from_str_radix(&line[start..colon], 16).ok()?;
            Some((offset, &line[colon + 1..]))
        })
}

fn parse_byte(token: &str) -> Option<u8> {
    if token.len() != 2 {
        return None;
    }
    u8::from_str_radix(token, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump_lines(prefix: &str, patch: impl Fn(usize) -> u8) -> String {
        let mut text = String::from("PCI config space dump\n\n");
        for offset in (0..CONFIG_SPACE_SIZE).step_by(LINE_BYTES) {
            let hex: Vec<String> = (offset..offset + LINE_BYTES)
                .map(|i| format!("{:02x}", patch(i)))
                .collect();
            text.push_str(&format!(
                "{prefix}{offset:08X}: {}-{}  *................*\n",
                hex[..8].join(" "),
                hex[8..].join(" ")
            ));
        }
        text
    }

    #[test]
    fn parses_timestamped_dump() {
        let text = dump_lines("2023-10-12 09:10:54\t  ", |i| (i % 251) as u8);
        let space = parse(&text).unwrap();
        assert_eq!(space.read_u8(0x00).unwrap(), 0);
        assert_eq!(space.read_u8(0xfa).unwrap(), 250);
        assert_eq!(space.read_u8(0xfb).unwrap(), 0);
        assert_eq!(space.read_u8(0xfff).unwrap(), (0xfff % 251) as u8);
    }

    #[test]
    fn ignores_lines_before_offset_zero() {
        let text = format!(
            "00000ff0: ff ff ff ff ff ff ff ff-ff ff ff ff ff ff ff ff\n{}",
            dump_lines("", |_| 0x11)
        );
        let space = parse(&text).unwrap();
        assert_eq!(space.read_u32(0xff0).unwrap(), 0x1111_1111);
    }

    #[test]
    fn rejects_gap() {
        let text: String = dump_lines("", |_| 0)
            .lines()
            .filter(|line| !line.starts_with("00000020"))
            .map(|line| format!("{line}\n"))
            .collect();
        assert!(matches!(
            parse(&text),
            Err(Error::DumpDiscontinuity {
                found: 0x30,
                expected: 0x20
            })
        ));
    }

    #[test]
    fn rejects_short_line() {
        let text = dump_lines("", |_| 0).replacen(
            "00000010: 00 00 00 00 00 00 00 00-00 00 00 00 00 00 00 00",
            "00000010: 00 00 00 00 00 00 00 00-00 00 00",
            1,
        );
        assert!(matches!(parse(&text), Err(Error::DumpLine { line: 4, .. })));
    }

    #[test]
    fn rejects_truncated_dump() {
        let text: String = dump_lines("", |_| 0).lines().take(18).map(|l| format!("{l}\n")).collect();
        assert!(matches!(parse(&text), Err(Error::BufferLength(256))));
    }

    #[test]
    fn split_line_requires_eight_digits() {
        assert_eq!(split_line("00000040: 01"), Some((0x40, " 01")));
        assert_eq!(split_line("09:10:54 x"), None);
        assert_eq!(split_line("100000040: 01"), None);
        assert_eq!(split_line("no offset here"), None);
    }
}
