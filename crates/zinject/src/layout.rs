//! Discovery of injectable artifacts in an unpacked package.
//!
//! Tweak packages follow jailbreak filesystem conventions. Only six
//! locations are looked at, the rootful and rootless (`var/jb`) variants of:
//!
//! | Location | Listing | Keeps |
//! |----------|---------|-------|
//! | `Library/MobileSubstrate/DynamicLibraries` | flat | `*.dylib` files |
//! | `Library/Frameworks` | flat | `*.framework` directories |
//! | `Library/Application Support` | recursive | `*.bundle` directories |
//!
//! Symlinks are never returned and never followed, so a package cannot point
//! the installer at files outside its own tree.

use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Rootful and rootless filesystem prefixes.
const PREFIXES: [&str; 2] = ["", "var/jb"];

const FRAMEWORKS_DIR: &str = "Library/Frameworks";
const DYNAMIC_LIBRARIES_DIR: &str = "Library/MobileSubstrate/DynamicLibraries";
const APPLICATION_SUPPORT_DIR: &str = "Library/Application Support";

/// Something that can be installed into an app bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InjectableArtifact {
    /// A standalone dynamic library
    Dylib(PathBuf),
    /// A `.framework` directory
    Framework(PathBuf),
    /// A `.bundle` resource directory
    Bundle(PathBuf),
}

impl InjectableArtifact {
    pub fn path(&self) -> &Path {
        match self {
            InjectableArtifact::Dylib(p)
            | InjectableArtifact::Framework(p)
            | InjectableArtifact::Bundle(p) => p,
        }
    }

    /// File name used as the install destination.
    pub fn name(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InjectableArtifact::Dylib(_) => "dylib",
            InjectableArtifact::Framework(_) => "framework",
            InjectableArtifact::Bundle(_) => "bundle",
        }
    }
}

/// Scans every root and returns all artifacts found.
///
/// The result may contain the same artifact name more than once when
/// several roots ship it; installation handles that.
pub fn scan(roots: &[PathBuf]) -> Result<Vec<InjectableArtifact>> {
    let mut artifacts = Vec::new();
    for root in roots {
        artifacts.extend(scan_tree(root)?);
    }
    Ok(artifacts)
}

/// Scans the six convention paths of one extracted tree.
pub fn scan_tree(root: &Path) -> Result<Vec<InjectableArtifact>> {
    let mut artifacts = Vec::new();

    for prefix in PREFIXES {
        let base = root.join(prefix);

        let dylibs = base.join(DYNAMIC_LIBRARIES_DIR);
        for entry in list_dir(root, &dylibs)? {
            let file_type = entry.file_type()?;
            if file_type.is_file() && has_extension(&entry.path(), "dylib") {
                artifacts.push(InjectableArtifact::Dylib(entry.path()));
            }
        }

        let frameworks = base.join(FRAMEWORKS_DIR);
        for entry in list_dir(root, &frameworks)? {
            let file_type = entry.file_type()?;
            if file_type.is_dir() && has_extension(&entry.path(), "framework") {
                artifacts.push(InjectableArtifact::Framework(entry.path()));
            }
        }

        let support = base.join(APPLICATION_SUPPORT_DIR);
        if support.is_dir() && !linked_below(root, &support)? {
            let bundles = depth_first(&support, is_hidden_or_symlink, |e| {
                e.file_type().is_dir() && has_extension(e.path(), "bundle")
            })?;
            artifacts.extend(bundles.into_iter().map(InjectableArtifact::Bundle));
        }
    }

    debug!("{}: {} artifact(s)", root.display(), artifacts.len());
    Ok(artifacts)
}

/// Non-recursive listing sorted by name.
///
/// A missing directory, or one reached through a symlink below `root`, is
/// empty. `fs::DirEntry::file_type` does not follow symlinks, so callers
/// checking `is_file`/`is_dir` on it never accept a link.
fn list_dir(root: &Path, dir: &Path) -> Result<Vec<fs::DirEntry>> {
    if !dir.is_dir() || linked_below(root, dir)? {
        return Ok(Vec::new());
    }
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

/// Whether any path component between `root` and `dir` is a symlink.
fn linked_below(root: &Path, dir: &Path) -> Result<bool> {
    let Ok(relative) = dir.strip_prefix(root) else {
        return Ok(false);
    };
    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        if fs::symlink_metadata(&current)?.file_type().is_symlink() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Depth-first traversal below `root`.
///
/// Entries matching `exclude` are neither returned nor descended into.
/// Entries matching `keep` are returned and not descended into; everything
/// else is recursed.
fn depth_first(
    root: &Path,
    exclude: impl Fn(&DirEntry) -> bool,
    keep: impl Fn(&DirEntry) -> bool,
) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !exclude(e));

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(std::io::Error::from)?;
        if keep(&entry) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            found.push(entry.into_path());
        }
    }

    Ok(found)
}

fn is_hidden_or_symlink(entry: &DirEntry) -> bool {
    entry.path_is_symlink() || entry.file_name().to_string_lossy().starts_with('.')
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
}
