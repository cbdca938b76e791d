//! App bundle handling for tweak injection.
//!
//! This module provides:
//! - [`TargetApp`], the unpacked `.app` being modified and its main executable
//! - [`installer`], which moves artifacts into the bundle and decides which
//!   dependency patches they need
//!
//! The main executable is named by `CFBundleExecutable` in the bundle's
//! `Info.plist`. Frameworks use the same key and fall back to the framework
//! name when it is absent.

pub mod installer;

pub use installer::{ArtifactInstaller, InstallOutcome};

use crate::{Error, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Name of the bundle descriptor.
pub const INFO_PLIST: &str = "Info.plist";

/// Directory holding embedded frameworks and dylibs.
pub const FRAMEWORKS_DIR: &str = "Frameworks";

/// An unpacked application bundle.
#[derive(Debug, Clone)]
pub struct TargetApp {
    bundle_root: PathBuf,
    main_executable: PathBuf,
}

impl TargetApp {
    /// Opens a bundle and resolves its main executable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the bundle has no `Info.plist`, the
    /// plist has no `CFBundleExecutable`, or the executable does not exist.
    pub fn open(bundle_root: impl AsRef<Path>) -> Result<Self> {
        let bundle_root = bundle_root.as_ref().to_path_buf();

        let name = read_bundle_executable(&bundle_root)?.ok_or_else(|| {
            Error::NotFound(format!(
                "CFBundleExecutable in {}",
                bundle_root.join(INFO_PLIST).display()
            ))
        })?;

        let main_executable = bundle_root.join(name);
        if !main_executable.is_file() {
            return Err(Error::NotFound(format!(
                "main executable {}",
                main_executable.display()
            )));
        }

        Ok(Self {
            bundle_root,
            main_executable,
        })
    }

    pub fn bundle_root(&self) -> &Path {
        &self.bundle_root
    }

    pub fn main_executable(&self) -> &Path {
        &self.main_executable
    }

    pub fn frameworks_dir(&self) -> PathBuf {
        self.bundle_root.join(FRAMEWORKS_DIR)
    }

    /// Whether `Frameworks/<name>` already exists.
    pub fn has_framework(&self, name: &str) -> bool {
        self.frameworks_dir().join(name).exists()
    }
}

/// Reads `CFBundleExecutable` from `<bundle>/Info.plist`.
///
/// Returns `Ok(None)` when the plist exists but lacks the key.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if there is no `Info.plist`, and
/// [`Error::Plist`] if it cannot be parsed.
pub fn read_bundle_executable(bundle_path: &Path) -> Result<Option<String>> {
    let info_plist_path = bundle_path.join(INFO_PLIST);

    if !info_plist_path.is_file() {
        return Err(Error::NotFound(format!(
            "{} not found in bundle: {}",
            INFO_PLIST,
            bundle_path.display()
        )));
    }

    let data = fs::read(&info_plist_path)?;
    let plist: plist::Value = plist::from_bytes(&data)?;

    Ok(plist
        .as_dictionary()
        .and_then(|d| d.get("CFBundleExecutable"))
        .and_then(|v| v.as_string())
        .map(|s| s.to_string()))
}

/// Resolves the executable inside a `.framework` directory.
///
/// Uses the framework's `Info.plist` when present, otherwise the framework
/// name without its extension.
///
/// # Errors
///
/// Returns [`Error::Format`] if the name is not a single plain path
/// component, and [`Error::NotFound`] if the executable does not exist.
pub fn framework_executable(framework: &Path) -> Result<PathBuf> {
    let name = match read_bundle_executable(framework) {
        Ok(Some(name)) => name,
        Ok(None) | Err(Error::NotFound(_)) => framework
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string(),
        Err(e) => return Err(e),
    };

    let mut components = Path::new(&name).components();
    if !matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) {
        return Err(Error::Format(format!(
            "framework executable {:?} in {} is not a plain file name",
            name,
            framework.display()
        )));
    }

    let executable = framework.join(name);
    if !executable.is_file() {
        return Err(Error::NotFound(format!(
            "framework executable {}",
            executable.display()
        )));
    }
    Ok(executable)
}
