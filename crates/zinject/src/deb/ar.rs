//! Unix `ar` container parsing.
//!
//! A `.deb` is an `ar` archive holding `debian-binary`, `control.tar.*`
//! and `data.tar.*`. The format has a global magic followed by members,
//! each with a 60-byte text header:
//!
//! | Field | Offset | Size |
//! |-------|--------|------|
//! | name | 0 | 16 |
//! | mtime | 16 | 12 |
//! | uid | 28 | 6 |
//! | gid | 34 | 6 |
//! | mode | 40 | 8 |
//! | size (decimal) | 48 | 10 |
//! | terminator `` `\n `` | 58 | 2 |
//!
//! Member content is padded to an even offset. There is no checksum.

use crate::{Error, Result};
use std::fs;
use std::path::Path;

/// Global archive magic.
pub const AR_MAGIC: &[u8; 8] = b"!<arch>\n";

const HEADER_SIZE: usize = 60;
const HEADER_TERMINATOR: &[u8; 2] = b"`\n";

/// A named member of an `ar` archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    pub name: String,
    pub content: Vec<u8>,
}

/// Reads and parses an `ar` archive from disk.
pub fn read_ar(path: impl AsRef<Path>) -> Result<Vec<ArchiveMember>> {
    let data = fs::read(path.as_ref())?;
    parse_ar(&data)
}

/// Parses an `ar` archive into its members, in archive order.
///
/// GNU symbol and long-name tables are skipped. GNU `name/` names lose
/// their trailing slash; BSD `#1/<len>` names are read from the start of
/// the member content.
///
/// # Errors
///
/// Returns [`Error::Format`] on a bad magic, a bad header terminator, a
/// non-decimal size, or a member running past the end of the data.
pub fn parse_ar(data: &[u8]) -> Result<Vec<ArchiveMember>> {
    if data.len() < AR_MAGIC.len() || &data[..AR_MAGIC.len()] != AR_MAGIC {
        return Err(Error::Format("missing ar magic".into()));
    }

    let mut members = Vec::new();
    let mut pos = AR_MAGIC.len();

    while pos < data.len() {
        let header = data
            .get(pos..pos + HEADER_SIZE)
            .ok_or_else(|| Error::Format(format!("truncated member header at {}", pos)))?;

        if &header[58..60] != HEADER_TERMINATOR {
            return Err(Error::Format(format!("bad member header terminator at {}", pos)));
        }

        let size = parse_decimal(&header[48..58])
            .ok_or_else(|| Error::Format(format!("bad member size at {}", pos)))?;

        let start = pos + HEADER_SIZE;
        let mut content = data
            .get(start..start + size)
            .ok_or_else(|| Error::Format(format!("member at {} runs past end of archive", pos)))?;

        let raw_name = String::from_utf8_lossy(&header[..16]).trim_end().to_string();
        let name = if let Some(len) = raw_name.strip_prefix("#1/") {
            let len: usize = len
                .trim()
                .parse()
                .map_err(|_| Error::Format(format!("bad BSD name length at {}", pos)))?;
            if len > content.len() {
                return Err(Error::Format(format!("BSD name longer than member at {}", pos)));
            }
            let name = String::from_utf8_lossy(&content[..len])
                .trim_end_matches('\0')
                .to_string();
            content = &content[len..];
            name
        } else {
            raw_name
        };

        if !is_symbol_table(&name) {
            let name = name.strip_suffix('/').unwrap_or(&name).to_string();
            members.push(ArchiveMember {
                name,
                content: content.to_vec(),
            });
        }

        pos = start + size;
        pos += pos % 2;
    }

    Ok(members)
}

/// GNU `/` symbol index, `//` long-name table and BSD `__.SYMDEF`.
fn is_symbol_table(name: &str) -> bool {
    name == "/" || name == "//" || name.starts_with("__.SYMDEF")
}

fn parse_decimal(bytes: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
