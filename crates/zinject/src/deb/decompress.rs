//! Nested decompression of tar payloads.
//!
//! Packages are expected to carry one compression layer around the tar
//! stream, but some are wrapped twice. [`decompress_layers`] keeps peeling
//! layers while the buffer still starts with a known compression signature
//! and stops at the first one that does not, or as soon as the buffer reads
//! as a `ustar` archive. A tar whose first entry name happens to begin with
//! a compression signature is therefore never decompressed again.

use crate::{Error, Result};
use std::borrow::Cow;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Upper bound on stacked compression layers.
pub const MAX_LAYERS: usize = 4;

/// Compression formats found around `data.tar` members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Xz,
    Bzip2,
    /// Legacy LZMA-alone streams (`.lzma`)
    Lzma,
}

impl Compression {
    /// Detects the compression of a buffer by its leading signature.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0x1f, 0x8b]) {
            Some(Compression::Gzip)
        } else if data.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Some(Compression::Xz)
        } else if data.starts_with(b"BZh") {
            Some(Compression::Bzip2)
        } else if data.starts_with(&[0x5d, 0x00, 0x00]) {
            Some(Compression::Lzma)
        } else {
            None
        }
    }

    /// Decompresses a complete buffer.
    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let read = match self {
            Compression::Gzip => flate2::read::MultiGzDecoder::new(data).read_to_end(&mut out),
            Compression::Xz => xz2::read::XzDecoder::new_multi_decoder(data).read_to_end(&mut out),
            Compression::Bzip2 => bzip2::read::MultiBzDecoder::new(data).read_to_end(&mut out),
            Compression::Lzma => {
                let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX)
                    .map_err(|e| Error::Format(format!("lzma decoder: {}", e)))?;
                xz2::read::XzDecoder::new_stream(data, stream).read_to_end(&mut out)
            }
        };
        read.map_err(|e| Error::Format(format!("{:?} stream: {}", self, e)))?;
        Ok(out)
    }
}

/// Result of peeling every compression layer off a buffer.
#[derive(Debug)]
pub struct Unwrapped {
    /// The innermost, uncompressed data
    pub data: Vec<u8>,
    /// Number of layers removed
    pub layers: usize,
}

/// Decompresses until the data is a tar stream or carries no compression
/// signature.
///
/// Uncompressed input comes back unchanged with `layers == 0`.
pub fn decompress_layers(input: &[u8]) -> Result<Unwrapped> {
    let mut current = Cow::Borrowed(input);
    let mut layers = 0;

    while !is_ustar(&current) {
        let Some(compression) = Compression::detect(&current) else {
            break;
        };
        if layers == MAX_LAYERS {
            return Err(Error::Format(format!(
                "more than {} compression layers",
                MAX_LAYERS
            )));
        }
        debug!("Decompressing layer {} ({:?})", layers + 1, compression);
        current = Cow::Owned(compression.decompress(&current)?);
        layers += 1;
    }

    Ok(Unwrapped {
        data: current.into_owned(),
        layers,
    })
}

/// Whether an `ar` member name is the package's tar payload.
pub fn is_tar_payload(name: &str) -> bool {
    name == "data.tar" || name.starts_with("data.tar.")
}

/// Rejects payload names whose compression suffix cannot be decoded.
pub fn check_payload_suffix(name: &str) -> Result<()> {
    match name.strip_prefix("data.tar").unwrap_or(name) {
        "" | ".gz" | ".xz" | ".bz2" | ".lzma" => Ok(()),
        other => Err(Error::Format(format!(
            "unsupported payload compression '{}'",
            other
        ))),
    }
}

/// Whether the buffer carries a POSIX `ustar` header.
pub fn is_ustar(data: &[u8]) -> bool {
    data.get(257..262) == Some(b"ustar")
}

/// Unpacks a plain tar stream into `dest`.
///
/// Entries that would land outside `dest`, and symlinks pointing outside
/// it, are skipped with a warning. Returns `dest`, which exists even when
/// the archive is empty.
pub fn unpack_tar(data: &[u8], dest: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest)?;

    if !data.is_empty() && !is_ustar(data) {
        debug!("Tar stream has no ustar header, reading as v7");
    }

    let mut archive = tar::Archive::new(Cursor::new(data));
    archive.set_preserve_permissions(true);

    let entries = archive
        .entries()
        .map_err(|e| Error::Format(format!("tar stream: {}", e)))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| Error::Format(format!("tar entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| Error::Format(format!("tar entry path: {}", e)))?
            .into_owned();

        if entry.header().entry_type().is_symlink() {
            let target = entry
                .link_name()
                .map_err(|e| Error::Format(format!("tar link name: {}", e)))?;
            if let Some(target) = target {
                if symlink_escapes(&path, &target) {
                    warn!(
                        "Skipping symlink {} -> {} escaping the package root",
                        path.display(),
                        target.display()
                    );
                    continue;
                }
            }
        }

        if !entry.unpack_in(dest)? {
            warn!("Skipping tar entry outside the package root: {}", path.display());
        }
    }

    Ok(dest.to_path_buf())
}

/// Whether a symlink at `entry` pointing to `target` resolves outside the root.
fn symlink_escapes(entry: &Path, target: &Path) -> bool {
    let mut depth = entry
        .parent()
        .map(|p| {
            p.components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .count() as isize
        })
        .unwrap_or(0);

    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return true,
        }
    }
    false
}
