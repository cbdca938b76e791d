//! In-place dependency patching for Mach-O binaries.
//!
//! Two mutations are supported:
//! - Rewriting the path of an existing dylib load command
//! - Appending a new `LC_LOAD_DYLIB` / `LC_LOAD_WEAK_DYLIB` command into the
//!   zero padding that follows the load commands
//!
//! Both work on a copy of the file. Every slice of a FAT binary is patched
//! and validated before the result is handed back, so a failure in any slice
//! leaves the file on disk untouched. Segments are never moved; if the
//! padding is too small the patch fails with [`Error::PatchSpaceExhausted`].
//!
//! Any mutation invalidates an existing code signature. The bundle must be
//! re-signed afterwards.

use crate::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use super::parser::MachOFile;
use super::{LC_LOAD_DYLIB, LC_LOAD_WEAK_DYLIB};

/// Size of `dylib_command` without the path string.
const DYLIB_COMMAND_SIZE: usize = 24;

/// `ncmds` and `sizeofcmds` offsets, identical for 32 and 64-bit headers.
const NCMDS_OFFSET: usize = 16;
const SIZEOFCMDS_OFFSET: usize = 20;

/// Version written into new dylib commands (1.0.0).
const DYLIB_VERSION: u32 = 0x10000;

/// One Mach-O mutation.
///
/// With `old_dependency` set this is a rewrite of that record, otherwise a
/// new load command for `new_dependency` is inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyPatch {
    pub binary: PathBuf,
    pub old_dependency: Option<String>,
    pub new_dependency: String,
    pub weak: bool,
}

impl DependencyPatch {
    pub fn rewrite(binary: impl Into<PathBuf>, old: &str, new: &str) -> Self {
        Self {
            binary: binary.into(),
            old_dependency: Some(old.to_string()),
            new_dependency: new.to_string(),
            weak: false,
        }
    }

    pub fn insert(binary: impl Into<PathBuf>, path: &str, weak: bool) -> Self {
        Self {
            binary: binary.into(),
            old_dependency: None,
            new_dependency: path.to_string(),
            weak,
        }
    }
}

/// Applies a patch to the binary on disk.
///
/// The file is read and fully parsed first; the patched image replaces the
/// original through a rename, keeping its permissions.
pub fn apply(patch: &DependencyPatch) -> Result<()> {
    let macho = MachOFile::open(&patch.binary)?;

    let output = match &patch.old_dependency {
        Some(old) => {
            let (output, count) = rewrite_dependency(&macho, old, &patch.new_dependency)?;
            debug!(
                binary = %patch.binary.display(),
                "Rewrote {} record(s) {} -> {}",
                count,
                old,
                patch.new_dependency
            );
            output
        }
        None => {
            let output = inject_load_command(&macho, &patch.new_dependency, patch.weak)?;
            debug!(
                binary = %patch.binary.display(),
                weak = patch.weak,
                "Inserted load command for {}",
                patch.new_dependency
            );
            output
        }
    };

    write_in_place(&patch.binary, &output)
}

/// Rewrites every dependency record equal to `old` with `new`.
///
/// Returns the patched image and the number of records changed across all
/// slices. The path string is overwritten inside its existing load command,
/// so `new` may not be longer than `old`; the unused tail is zero-filled.
///
/// # Errors
///
/// - [`Error::PathTooLong`] if `new` is longer than `old`
/// - [`Error::DependencyNotFound`] if no slice references `old`
pub fn rewrite_dependency(macho: &MachOFile, old: &str, new: &str) -> Result<(Vec<u8>, usize)> {
    if new.len() > old.len() {
        return Err(Error::PathTooLong {
            old: old.to_string(),
            new: new.to_string(),
        });
    }

    let mut output = macho.data().to_vec();
    let mut count = 0;

    for slice in macho.slices() {
        for record in slice.dependencies.iter().filter(|d| d.path == old) {
            let start = slice.offset + record.offset + record.name_offset;
            // The old string plus its terminator already fit in the command.
            output[start..start + new.len()].copy_from_slice(new.as_bytes());
            output[start + new.len()..start + old.len()].fill(0);
            count += 1;
        }
    }

    if count == 0 {
        return Err(Error::DependencyNotFound(old.to_string()));
    }

    Ok((output, count))
}

/// Appends a dylib load command for `path` to every slice.
///
/// # Errors
///
/// - [`Error::AlreadyExists`] if a slice already depends on `path`
/// - [`Error::PatchSpaceExhausted`] if a slice has too little zero padding
///   between its load commands and its first section
pub fn inject_load_command(macho: &MachOFile, path: &str, weak: bool) -> Result<Vec<u8>> {
    let mut output = macho.data().to_vec();
    let cmd = if weak { LC_LOAD_WEAK_DYLIB } else { LC_LOAD_DYLIB };

    for slice in macho.slices() {
        if slice.dependencies.iter().any(|d| d.path == path) {
            return Err(Error::AlreadyExists(PathBuf::from(path)));
        }

        let alignment = if slice.is_64 { 8 } else { 4 };
        let cmdsize = align_to(DYLIB_COMMAND_SIZE + path.len() + 1, alignment);

        let start = slice.offset + slice.load_commands_end;
        let gap = &output[start..slice.offset + slice.content_start];
        let available = gap.iter().position(|&b| b != 0).unwrap_or(gap.len());
        if cmdsize > available {
            return Err(Error::PatchSpaceExhausted {
                needed: cmdsize,
                available,
            });
        }

        let be = slice.big_endian;
        write_u32(&mut output, start, cmd, be);
        write_u32(&mut output, start + 4, cmdsize as u32, be);
        write_u32(&mut output, start + 8, DYLIB_COMMAND_SIZE as u32, be);
        write_u32(&mut output, start + 12, 2, be);
        write_u32(&mut output, start + 16, DYLIB_VERSION, be);
        write_u32(&mut output, start + 20, DYLIB_VERSION, be);
        let name = start + DYLIB_COMMAND_SIZE;
        output[name..name + path.len()].copy_from_slice(path.as_bytes());

        let header = slice.offset;
        let ncmds = read_u32(&output, header + NCMDS_OFFSET, be);
        let sizeofcmds = read_u32(&output, header + SIZEOFCMDS_OFFSET, be);
        write_u32(&mut output, header + NCMDS_OFFSET, ncmds + 1, be);
        write_u32(
            &mut output,
            header + SIZEOFCMDS_OFFSET,
            sizeofcmds + cmdsize as u32,
            be,
        );
    }

    Ok(output)
}

/// Rewrites `path` with `data` through a temporary file in the same directory.
fn write_in_place(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let permissions = fs::metadata(path)?.permissions();

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Aligns a value up to the specified alignment.
fn align_to(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Reads a u32 from a byte slice at the given offset.
fn read_u32(data: &[u8], offset: usize, big_endian: bool) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    }
}

/// Writes a u32 to a byte slice at the given offset.
fn write_u32(data: &mut [u8], offset: usize, value: u32, big_endian: bool) {
    let bytes = if big_endian {
        value.to_be_bytes()
    } else {
        value.to_le_bytes()
    };
    data[offset..offset + 4].copy_from_slice(&bytes);
}
