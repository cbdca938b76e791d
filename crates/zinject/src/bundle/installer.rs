//! Moves injectable artifacts into the target bundle.
//!
//! | Artifact | Destination |
//! |----------|-------------|
//! | dylib | `<bundle>/Frameworks/<name>` |
//! | framework | `<bundle>/Frameworks/<name>` |
//! | bundle | `<bundle>/<name>` |
//!
//! An existing destination is never overwritten. Installed dylibs and
//! frameworks come back with the [`DependencyPatch`]es that make them load:
//! stale absolute references to the substrate framework are pointed into the
//! app, and the artifact is added to the main executable's dependencies.

use crate::bundle::{framework_executable, TargetApp};
use crate::layout::InjectableArtifact;
use crate::macho::DependencyPatch;
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Framework that provides the hooking runtime.
pub const SUBSTRATE_FRAMEWORK: &str = "CydiaSubstrate.framework";

/// Install names tweaks are linked against on jailbroken devices.
pub const LEGACY_SUBSTRATE_PATHS: [&str; 2] = [
    "/Library/Frameworks/CydiaSubstrate.framework/CydiaSubstrate",
    "/var/jb/Library/Frameworks/CydiaSubstrate.framework/CydiaSubstrate",
];

/// Where the substrate framework is found once it is inside the app.
///
/// Must stay no longer than every entry in [`LEGACY_SUBSTRATE_PATHS`].
pub const SUBSTRATE_RELATIVE_PATH: &str = "@rpath/CydiaSubstrate.framework/CydiaSubstrate";

/// Prefix of the dependency paths registered in the main executable.
const EXECUTABLE_FRAMEWORKS: &str = "@executable_path/Frameworks";

/// What happened to one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Moved into the bundle; the patches still have to be applied in order.
    Installed {
        destination: PathBuf,
        patches: Vec<DependencyPatch>,
    },
    /// The destination already existed and was left alone.
    AlreadyPresent(PathBuf),
}

/// Installs artifacts into one target app.
pub struct ArtifactInstaller<'a> {
    app: &'a TargetApp,
    weak: bool,
}

impl<'a> ArtifactInstaller<'a> {
    pub fn new(app: &'a TargetApp) -> Self {
        Self { app, weak: false }
    }

    /// Register new dependencies as `LC_LOAD_WEAK_DYLIB`.
    pub fn weak(mut self, weak: bool) -> Self {
        self.weak = weak;
        self
    }

    /// Moves an artifact into the bundle.
    ///
    /// Installing the same destination name twice is not an error: the
    /// second call returns [`InstallOutcome::AlreadyPresent`].
    pub fn install(&self, artifact: &InjectableArtifact) -> Result<InstallOutcome> {
        let name = artifact.name();
        if name.is_empty() {
            return Err(Error::NotFound(format!(
                "file name of {}",
                artifact.path().display()
            )));
        }

        let destination = match artifact {
            InjectableArtifact::Dylib(_) | InjectableArtifact::Framework(_) => {
                self.app.frameworks_dir().join(&name)
            }
            InjectableArtifact::Bundle(_) => self.app.bundle_root().join(&name),
        };

        if destination.symlink_metadata().is_ok() {
            info!(
                "{} already present at {}",
                name,
                destination.display()
            );
            return Ok(InstallOutcome::AlreadyPresent(destination));
        }

        // Resolved before anything moves so a bad framework leaves no trace.
        let framework_exe = match artifact {
            InjectableArtifact::Framework(source) => {
                let executable = framework_executable(source)?;
                Some(
                    executable
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                )
            }
            _ => None,
        };

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        move_path(artifact.path(), &destination)?;
        info!("Installed {} {}", artifact.kind(), name);

        let patches = match (artifact, framework_exe) {
            (InjectableArtifact::Dylib(_), _) => {
                let dependency = format!("{}/{}", EXECUTABLE_FRAMEWORKS, name);
                self.schedule(&destination, &name, dependency)
            }
            (InjectableArtifact::Framework(_), Some(exe_name)) => {
                let dependency = format!("{}/{}/{}", EXECUTABLE_FRAMEWORKS, name, exe_name);
                self.schedule(&destination.join(&exe_name), &name, dependency)
            }
            _ => Vec::new(),
        };

        Ok(InstallOutcome::Installed {
            destination,
            patches,
        })
    }

    /// Removes an installed artifact whose patches could not be applied.
    ///
    /// Only paths inside the bundle are touched.
    pub fn uninstall(&self, destination: &Path) -> Result<()> {
        if !destination.starts_with(self.app.bundle_root()) {
            return Err(Error::NotFound(format!(
                "{} inside {}",
                destination.display(),
                self.app.bundle_root().display()
            )));
        }
        let metadata = match destination.symlink_metadata() {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            fs::remove_dir_all(destination)?;
        } else {
            fs::remove_file(destination)?;
        }
        info!("Removed {}", destination.display());
        Ok(())
    }

    /// Rewrite patches for the artifact's own binary, then its registration.
    fn schedule(&self, executable: &Path, name: &str, dependency: String) -> Vec<DependencyPatch> {
        let mut patches = Vec::new();

        if name != SUBSTRATE_FRAMEWORK {
            for legacy in LEGACY_SUBSTRATE_PATHS {
                patches.push(DependencyPatch::rewrite(
                    executable,
                    legacy,
                    SUBSTRATE_RELATIVE_PATH,
                ));
            }
        }

        patches.push(DependencyPatch::insert(
            self.app.main_executable(),
            &dependency,
            self.weak,
        ));

        debug!("{}: {} patch(es) scheduled", name, patches.len());
        patches
    }
}

/// Renames `from` to `to`, copying when the rename is refused (for example
/// across filesystems).
fn move_path(from: &Path, to: &Path) -> Result<()> {
    if let Err(e) = fs::rename(from, to) {
        debug!("rename {} failed ({}), copying", from.display(), e);
        copy_recursive(from, to)?;
        if from.is_dir() {
            fs::remove_dir_all(from)?;
        } else {
            fs::remove_file(from)?;
        }
    }
    Ok(())
}

/// Copies a file or directory tree, recreating symlinks as symlinks.
fn copy_recursive(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;
        let relative = entry.path().strip_prefix(from).unwrap_or(Path::new(""));
        let target = if relative.as_os_str().is_empty() {
            to.to_path_buf()
        } else {
            to.join(relative)
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
