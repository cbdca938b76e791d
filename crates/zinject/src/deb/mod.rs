//! Debian package handling.
//!
//! Turns a jailbreak-style `.deb` into a directory tree:
//! - [`ar`] splits the package into its members
//! - [`decompress`] unwraps the `data.tar.*` payload and unpacks it
//!
//! Each package lands in its own uniquely named directory under the
//! session's temporary root.

pub mod ar;
pub mod decompress;

pub use ar::{parse_ar, read_ar, ArchiveMember};
pub use decompress::{decompress_layers, unpack_tar, Compression};

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Root of an unpacked package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTree {
    pub root: PathBuf,
}

/// Extracts the payload of a `.deb` into a fresh directory under `session_root`.
///
/// # Errors
///
/// Returns [`Error::Format`] if the package is not an `ar` archive, has no
/// `data.tar*` member, or the payload cannot be decompressed or read as tar.
pub fn extract_package(package: &Path, session_root: &Path) -> Result<ExtractedTree> {
    let members = read_ar(package)?;

    let stem = package
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("package");
    let root = tempfile::Builder::new()
        .prefix(&format!("{}-", stem))
        .tempdir_in(session_root)?
        .keep();

    let mut found = false;
    for member in members.iter().filter(|m| decompress::is_tar_payload(&m.name)) {
        decompress::check_payload_suffix(&member.name)?;
        let unwrapped = decompress_layers(&member.content)?;
        debug!(
            "{}: {} unwrapped through {} layer(s)",
            package.display(),
            member.name,
            unwrapped.layers
        );
        unpack_tar(&unwrapped.data, &root)?;
        found = true;
    }

    if !found {
        return Err(Error::Format(format!(
            "{} has no data.tar member",
            package.display()
        )));
    }

    info!("Extracted {} to {}", package.display(), root.display());
    Ok(ExtractedTree { root })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::deb::ar::tests::build_ar;
    use crate::deb::decompress::tests::{build_tar, gzip};
    use std::fs;
    use tempfile::TempDir;

    /// Builds a `.deb` whose payload is a gzip'd tar of `files`.
    pub(crate) fn build_deb(files: &[(&str, &[u8])]) -> Vec<u8> {
        let data = gzip(&build_tar(files));
        let control = gzip(&build_tar(&[("control", b"Package: test\n")]));
        build_ar(&[
            ("debian-binary", b"2.0\n"),
            ("control.tar.gz", &control),
            ("data.tar.gz", &data),
        ])
    }

    #[test]
    fn test_extract_package() {
        let temp_dir = TempDir::new().unwrap();
        let deb = temp_dir.path().join("tweak.deb");
        fs::write(
            &deb,
            build_deb(&[("Library/MobileSubstrate/DynamicLibraries/Tweak.dylib", b"bin")]),
        )
        .unwrap();

        let tree = extract_package(&deb, temp_dir.path()).unwrap();

        assert!(tree.root.starts_with(temp_dir.path()));
        assert!(tree
            .root
            .join("Library/MobileSubstrate/DynamicLibraries/Tweak.dylib")
            .is_file());
        // Control archive is not unpacked.
        assert!(!tree.root.join("control").exists());
    }

    #[test]
    fn test_extract_same_package_twice_uses_distinct_roots() {
        let temp_dir = TempDir::new().unwrap();
        let deb = temp_dir.path().join("tweak.deb");
        fs::write(&deb, build_deb(&[("a", b"b")])).unwrap();

        let first = extract_package(&deb, temp_dir.path()).unwrap();
        let second = extract_package(&deb, temp_dir.path()).unwrap();
        assert_ne!(first.root, second.root);
    }

    #[test]
    fn test_extract_without_payload() {
        let temp_dir = TempDir::new().unwrap();
        let deb = temp_dir.path().join("empty.deb");
        fs::write(&deb, build_ar(&[("debian-binary", b"2.0\n")])).unwrap();

        let result = extract_package(&deb, temp_dir.path());
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn test_extract_not_an_archive() {
        let temp_dir = TempDir::new().unwrap();
        let deb = temp_dir.path().join("bogus.deb");
        fs::write(&deb, b"not a deb").unwrap();

        assert!(matches!(
            extract_package(&deb, temp_dir.path()),
            Err(Error::Format(_))
        ));
    }
}
