//! Mach-O dependency patching.
//!
//! [`MachOFile`] parses thin and fat binaries; [`patcher`] rewrites or
//! inserts dylib load commands without moving any segment content.

pub mod parser;
pub mod patcher;

#[cfg(test)]
pub(crate) mod testutil;

pub use parser::{ArchSlice, DylibRecord, MachOFile};
pub use patcher::{apply, inject_load_command, rewrite_dependency, DependencyPatch};

/// Load command type for LC_LOAD_DYLIB
pub const LC_LOAD_DYLIB: u32 = 0xc;

/// Load command type for LC_LOAD_WEAK_DYLIB
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | 0x8000_0000;
