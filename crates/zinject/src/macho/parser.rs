//! Mach-O header parsing using goblin.
//!
//! Only the parts of the header the patcher needs are kept: the load
//! command area bounds, the dependency records and the file offset where
//! segment content begins.

use crate::{Error, Result};
use goblin::mach::load_command::CommandVariant;
use goblin::mach::{Mach, MachO};
use std::path::Path;

/// Size of `mach_header`.
const MACH_HEADER_SIZE: usize = 28;

/// Size of `mach_header_64`.
const MACH_HEADER_64_SIZE: usize = 32;

/// Size of `segment_command` / `segment_command_64` without sections.
const SEGMENT_COMMAND_SIZE: usize = 56;
const SEGMENT_COMMAND_64_SIZE: usize = 72;

/// Size of `section` / `section_64`.
const SECTION_SIZE: usize = 68;
const SECTION_64_SIZE: usize = 80;

/// Section types whose content occupies no file space.
const S_ZEROFILL: u32 = 0x1;
const S_GB_ZEROFILL: u32 = 0xc;
const S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;

/// Represents a parsed Mach-O file
pub struct MachOFile {
    /// Raw file data
    data: Vec<u8>,
    /// Is FAT binary
    is_fat: bool,
    /// Architecture slices
    slices: Vec<ArchSlice>,
}

/// A single architecture slice
#[derive(Debug, Clone)]
pub struct ArchSlice {
    /// Offset in file
    pub offset: usize,
    /// Size of slice
    pub size: usize,
    /// CPU type
    pub cpu_type: u32,
    /// Is 64-bit
    pub is_64: bool,
    /// Header fields are stored big-endian
    pub big_endian: bool,
    /// Number of load commands
    pub ncmds: u32,
    /// Total size of the load commands
    pub sizeofcmds: u32,
    /// End of the load command area, relative to the slice
    pub load_commands_end: usize,
    /// First byte used by segment or section content, relative to the slice
    pub content_start: usize,
    /// Dependency records in load command order
    pub dependencies: Vec<DylibRecord>,
}

/// One dylib load command naming a library the slice depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DylibRecord {
    /// Load command type (`LC_LOAD_DYLIB`, `LC_LOAD_WEAK_DYLIB`, ...)
    pub cmd: u32,
    /// Offset of the load command, relative to the slice
    pub offset: usize,
    /// Size of the load command
    pub cmdsize: usize,
    /// Offset of the path string inside the load command
    pub name_offset: usize,
    /// Stored dependency path
    pub path: String,
}

impl DylibRecord {
    /// Bytes available for the path string, terminator included.
    pub fn path_capacity(&self) -> usize {
        self.cmdsize.saturating_sub(self.name_offset)
    }
}

impl ArchSlice {
    /// Zero-padding gap between the load commands and the first content byte.
    pub fn header_padding(&self) -> usize {
        self.content_start.saturating_sub(self.load_commands_end)
    }
}

impl MachOFile {
    /// Open and parse a Mach-O file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::parse(data)
    }

    /// Parse Mach-O from bytes
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if !has_macho_magic(&data) {
            return Err(Error::NotABinary("unrecognized magic".into()));
        }

        let mach = Mach::parse(&data)
            .map_err(|e| Error::NotABinary(format!("Failed to parse: {}", e)))?;

        let (is_fat, slices) = match mach {
            Mach::Binary(macho) => {
                let slice = Self::parse_single(&data, &macho)?;
                (false, vec![slice])
            }
            Mach::Fat(fat) => {
                let mut slices = Vec::new();
                for (i, arch) in fat.iter_arches().enumerate() {
                    let arch =
                        arch.map_err(|e| Error::NotABinary(format!("Fat arch {}: {}", i, e)))?;
                    let offset = arch.offset as usize;
                    let size = arch.size as usize;
                    let slice_data = offset
                        .checked_add(size)
                        .and_then(|end| data.get(offset..end))
                        .ok_or_else(|| {
                            Error::NotABinary(format!("Slice {} lies outside the file", i))
                        })?;

                    let macho = MachO::parse(slice_data, 0)
                        .map_err(|e| Error::NotABinary(format!("Slice {}: {}", i, e)))?;

                    let mut slice = Self::parse_single(slice_data, &macho)?;
                    slice.offset = offset;
                    slices.push(slice);
                }
                if slices.is_empty() {
                    return Err(Error::NotABinary("Empty FAT binary".into()));
                }
                (true, slices)
            }
        };

        Ok(Self { data, is_fat, slices })
    }

    fn parse_single(data: &[u8], macho: &MachO) -> Result<ArchSlice> {
        let is_64 = macho.is_64;
        let big_endian = !macho.little_endian;
        let header_size = if is_64 {
            MACH_HEADER_64_SIZE
        } else {
            MACH_HEADER_SIZE
        };
        let sizeofcmds = macho.header.sizeofcmds;
        let load_commands_end = header_size + sizeofcmds as usize;
        if load_commands_end > data.len() {
            return Err(Error::NotABinary(
                "Load commands extend past the end of the file".into(),
            ));
        }

        let mut dependencies = Vec::new();
        let mut content_start = data.len();

        for lc in &macho.load_commands {
            let cmdsize = lc.command.cmdsize();
            match &lc.command {
                CommandVariant::LoadDylib(dylib)
                | CommandVariant::LoadWeakDylib(dylib)
                | CommandVariant::ReexportDylib(dylib)
                | CommandVariant::LoadUpwardDylib(dylib)
                | CommandVariant::LazyLoadDylib(dylib) => {
                    let name_offset = dylib.dylib.name as usize;
                    let path = read_lc_str(data, lc.offset, cmdsize, name_offset)?;
                    dependencies.push(DylibRecord {
                        cmd: dylib.cmd,
                        offset: lc.offset,
                        cmdsize,
                        name_offset,
                        path,
                    });
                }
                CommandVariant::Segment64(seg) => {
                    if seg.filesize > 0 && seg.fileoff > 0 {
                        content_start = content_start.min(seg.fileoff as usize);
                    }
                    let first = first_section_offset(data, lc.offset, seg.nsects, true, big_endian);
                    if let Some(off) = first {
                        content_start = content_start.min(off);
                    }
                }
                CommandVariant::Segment32(seg) => {
                    if seg.filesize > 0 && seg.fileoff > 0 {
                        content_start = content_start.min(seg.fileoff as usize);
                    }
                    let first =
                        first_section_offset(data, lc.offset, seg.nsects, false, big_endian);
                    if let Some(off) = first {
                        content_start = content_start.min(off);
                    }
                }
                _ => {}
            }
        }

        Ok(ArchSlice {
            offset: 0,
            size: data.len(),
            cpu_type: macho.header.cputype as u32,
            is_64,
            big_endian,
            ncmds: macho.header.ncmds as u32,
            sizeofcmds,
            load_commands_end,
            content_start: content_start.max(load_commands_end),
            dependencies,
        })
    }

    /// Get raw data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take ownership of the raw data
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Is FAT binary
    pub fn is_fat(&self) -> bool {
        self.is_fat
    }

    /// Get architecture slices
    pub fn slices(&self) -> &[ArchSlice] {
        &self.slices
    }

    /// Dependency paths of the first slice, in load command order.
    pub fn dependencies(&self) -> Vec<&str> {
        self.slices
            .first()
            .map(|s| s.dependencies.iter().map(|d| d.path.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Check the first four bytes for a thin or fat Mach-O magic.
pub fn has_macho_magic(data: &[u8]) -> bool {
    matches!(
        data.get(0..4),
        Some(
            [0xfe, 0xed, 0xfa, 0xce]
                | [0xfe, 0xed, 0xfa, 0xcf]
                | [0xce, 0xfa, 0xed, 0xfe]
                | [0xcf, 0xfa, 0xed, 0xfe]
                | [0xca, 0xfe, 0xba, 0xbe]
                | [0xbe, 0xba, 0xfe, 0xca]
                | [0xca, 0xfe, 0xba, 0xbf]
                | [0xbf, 0xba, 0xfe, 0xca]
        )
    )
}

/// Read the NUL-terminated path stored inside a load command.
fn read_lc_str(data: &[u8], lc_offset: usize, cmdsize: usize, name_offset: usize) -> Result<String> {
    if name_offset >= cmdsize {
        return Err(Error::NotABinary(format!(
            "Dylib name offset {} outside load command at {:#x}",
            name_offset, lc_offset
        )));
    }
    let raw = data
        .get(lc_offset + name_offset..lc_offset + cmdsize)
        .ok_or_else(|| Error::NotABinary(format!("Truncated load command at {:#x}", lc_offset)))?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// Lowest file offset of a section with file content in a segment command.
fn first_section_offset(
    data: &[u8],
    lc_offset: usize,
    nsects: u32,
    is_64: bool,
    big_endian: bool,
) -> Option<usize> {
    let (header, stride, offset_field, flags_field) = if is_64 {
        (SEGMENT_COMMAND_64_SIZE, SECTION_64_SIZE, 48, 64)
    } else {
        (SEGMENT_COMMAND_SIZE, SECTION_SIZE, 40, 56)
    };

    let mut min: Option<usize> = None;
    for i in 0..nsects as usize {
        let sect = lc_offset + header + i * stride;
        let (Some(offset), Some(flags)) = (
            read_u32_at(data, sect + offset_field, big_endian),
            read_u32_at(data, sect + flags_field, big_endian),
        ) else {
            break;
        };
        let section_type = flags & 0xff;
        if offset == 0
            || matches!(
                section_type,
                S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
            )
        {
            continue;
        }
        let offset = offset as usize;
        min = Some(min.map_or(offset, |m| m.min(offset)));
    }
    min
}

fn read_u32_at(data: &[u8], offset: usize, big_endian: bool) -> Option<u32> {
    let bytes: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
    Some(if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    })
}
