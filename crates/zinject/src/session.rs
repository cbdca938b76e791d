//! Injection session.
//!
//! A session runs strictly in order:
//!
//! ```text
//! Idle -> EnsuringBaseline -> Classifying -> ExtractingArchives
//!      -> PatchingDirectDylibs -> ScanningExtracted -> InstallingArtifacts -> Done
//! ```
//!
//! and ends in `Failed` on a session-fatal error. Each stage hands its output
//! to the next as a value. Artifacts are installed and patched one at a
//! time because every registration rewrites the same main executable.

use crate::builder::Injector;
use crate::bundle::installer::SUBSTRATE_FRAMEWORK;
use crate::bundle::{ArtifactInstaller, InstallOutcome, TargetApp};
use crate::deb::{extract_package, ExtractedTree};
use crate::layout::{scan_tree, InjectableArtifact};
use crate::macho::{self, DependencyPatch, MachOFile};
use crate::{Error, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

/// Input kinds, decided by file extension only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Dylib,
    Deb,
    Unsupported,
}

impl InputKind {
    pub fn classify(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "dylib" => InputKind::Dylib,
            "deb" => InputKind::Deb,
            _ => InputKind::Unsupported,
        }
    }
}

/// A caller-supplied input and its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputReference {
    pub locator: PathBuf,
    pub kind: InputKind,
}

impl InputReference {
    pub fn new(locator: impl Into<PathBuf>) -> Self {
        let locator = locator.into();
        let kind = InputKind::classify(&locator);
        Self { locator, kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    EnsuringBaseline,
    Classifying,
    ExtractingArchives,
    PatchingDirectDylibs,
    ScanningExtracted,
    InstallingArtifacts,
    Done,
    Failed,
}

/// Final state of one artifact or input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactStatus {
    Installed,
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactOutcome {
    pub name: String,
    pub source: PathBuf,
    pub status: ArtifactStatus,
}

/// Summary of a session.
#[derive(Debug, Clone, Default)]
pub struct InjectionReport {
    pub outcomes: Vec<ArtifactOutcome>,
}

impl InjectionReport {
    pub fn installed(&self) -> impl Iterator<Item = &ArtifactOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == ArtifactStatus::Installed)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ArtifactOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status != ArtifactStatus::Installed)
    }

    fn push(&mut self, name: String, source: &Path, status: ArtifactStatus) {
        self.outcomes.push(ArtifactOutcome {
            name,
            source: source.to_path_buf(),
            status,
        });
    }

    fn skip(&mut self, name: String, source: &Path, reason: impl fmt::Display) {
        warn!("Skipping {}: {}", name, reason);
        self.push(name, source, ArtifactStatus::Skipped(reason.to_string()));
    }
}

impl fmt::Display for InjectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Installed {}, skipped {}",
            self.installed().count(),
            self.skipped().count()
        )?;
        for outcome in &self.outcomes {
            match &outcome.status {
                ArtifactStatus::Installed => writeln!(f, "  + {}", outcome.name)?,
                ArtifactStatus::Skipped(reason) => {
                    writeln!(f, "  - {} ({})", outcome.name, reason)?
                }
            }
        }
        Ok(())
    }
}

/// Inputs split by kind.
#[derive(Debug, Default)]
struct Classified {
    debs: Vec<PathBuf>,
    dylibs: Vec<PathBuf>,
}

/// One injection run against one bundle.
pub(crate) struct Session<'a> {
    config: &'a Injector,
    state: SessionState,
    report: InjectionReport,
}

impl<'a> Session<'a> {
    pub(crate) fn new(config: &'a Injector) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            report: InjectionReport::default(),
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub(crate) fn run(mut self, bundle: &Path, inputs: Vec<InputReference>) -> Result<InjectionReport> {
        let session_root = tempfile::Builder::new()
            .prefix("zinject-")
            .tempdir_in(self.config.temp_root())?;
        debug!("Session root {}", session_root.path().display());

        let result = self.run_stages(bundle, inputs, session_root.path());

        if self.config.keeps_extracted() {
            let kept = session_root.keep();
            info!("Extracted packages kept in {}", kept.display());
        } else {
            close_root(session_root);
        }

        match result {
            Ok(()) => {
                self.transition(SessionState::Done);
                Ok(self.report)
            }
            Err(e) => {
                self.transition(SessionState::Failed);
                error!("Injection failed: {}", e);
                Err(e)
            }
        }
    }

    fn run_stages(&mut self, bundle: &Path, inputs: Vec<InputReference>, root: &Path) -> Result<()> {
        self.transition(SessionState::EnsuringBaseline);
        let app = TargetApp::open(bundle)?;
        MachOFile::open(app.main_executable())?;
        let baseline = self.ensure_baseline(&app)?;

        self.transition(SessionState::Classifying);
        let classified = self.classify(inputs);

        self.transition(SessionState::ExtractingArchives);
        let trees = self.extract_archives(baseline.as_deref(), &classified.debs, root)?;

        self.transition(SessionState::PatchingDirectDylibs);
        let direct = self.stage_direct_dylibs(&classified.dylibs, root)?;

        self.transition(SessionState::ScanningExtracted);
        let mut artifacts = Vec::new();
        for (source, tree) in &trees {
            match scan_tree(&tree.root) {
                Ok(found) if found.is_empty() => {
                    self.report.skip(file_name(source), source, "no injectable artifacts")
                }
                Ok(found) => artifacts.extend(found.into_iter().map(|a| (source.clone(), a))),
                Err(e) => self.report.skip(file_name(source), source, e),
            }
        }
        artifacts.extend(direct);

        self.transition(SessionState::InstallingArtifacts);
        let installer = ArtifactInstaller::new(&app).weak(self.config.is_weak());
        for (source, artifact) in &artifacts {
            self.install_one(&installer, source, artifact);
        }

        Ok(())
    }

    /// Returns the baseline package to prepend, if the app lacks substrate.
    fn ensure_baseline(&self, app: &TargetApp) -> Result<Option<PathBuf>> {
        if app.has_framework(SUBSTRATE_FRAMEWORK) {
            debug!("{} already present", SUBSTRATE_FRAMEWORK);
            return Ok(None);
        }

        match self.config.baseline() {
            Some(path) if path.is_file() => {
                info!("Adding baseline package {}", path.display());
                Ok(Some(path.to_path_buf()))
            }
            Some(path) => Err(Error::NotFound(format!(
                "baseline package {}",
                path.display()
            ))),
            None => Err(Error::NotFound(format!(
                "baseline package providing {}",
                SUBSTRATE_FRAMEWORK
            ))),
        }
    }

    fn classify(&mut self, inputs: Vec<InputReference>) -> Classified {
        let mut classified = Classified::default();
        for input in inputs {
            match input.kind {
                InputKind::Deb => classified.debs.push(input.locator),
                InputKind::Dylib => classified.dylibs.push(input.locator),
                InputKind::Unsupported => {
                    self.report
                        .skip(file_name(&input.locator), &input.locator, "unsupported input type")
                }
            }
        }
        classified
    }

    /// Extracts the baseline first, then every other package.
    ///
    /// A baseline that cannot be extracted fails the session; any other
    /// package is skipped.
    fn extract_archives(
        &mut self,
        baseline: Option<&Path>,
        debs: &[PathBuf],
        root: &Path,
    ) -> Result<Vec<(PathBuf, ExtractedTree)>> {
        let mut trees = Vec::new();

        if let Some(baseline) = baseline {
            let tree = extract_package(baseline, root)?;
            trees.push((baseline.to_path_buf(), tree));
        }

        for deb in debs {
            match extract_package(deb, root) {
                Ok(tree) => trees.push((deb.clone(), tree)),
                Err(e) => self.report.skip(file_name(deb), deb, e),
            }
        }

        Ok(trees)
    }

    /// Copies raw dylib inputs into the session so the caller's files stay put.
    fn stage_direct_dylibs(
        &mut self,
        dylibs: &[PathBuf],
        root: &Path,
    ) -> Result<Vec<(PathBuf, InjectableArtifact)>> {
        let staging = root.join("direct");
        fs::create_dir_all(&staging)?;
        let mut artifacts = Vec::new();

        for dylib in dylibs {
            let name = file_name(dylib);
            if !dylib.is_file() {
                self.report.skip(name, dylib, Error::NotFound(dylib.display().to_string()));
                continue;
            }
            let dir = tempfile::Builder::new()
                .prefix("dylib-")
                .tempdir_in(&staging)?
                .keep();
            let staged = dir.join(&name);
            if let Err(e) = fs::copy(dylib, &staged) {
                self.report.skip(name, dylib, Error::Io(e));
                continue;
            }
            artifacts.push((dylib.clone(), InjectableArtifact::Dylib(staged)));
        }

        Ok(artifacts)
    }

    fn install_one(&mut self, installer: &ArtifactInstaller, source: &Path, artifact: &InjectableArtifact) {
        let name = artifact.name();

        let (destination, patches) = match installer.install(artifact) {
            Ok(InstallOutcome::Installed {
                destination,
                patches,
            }) => (destination, patches),
            Ok(InstallOutcome::AlreadyPresent(_)) => {
                let reason = Error::AlreadyExists(PathBuf::from(&name));
                self.report.skip(name, source, reason);
                return;
            }
            Err(e) => {
                self.report.skip(name, source, e);
                return;
            }
        };

        // The registration is the last patch and is atomic, so removing the
        // installed copy undoes everything a failed artifact changed.
        for patch in &patches {
            if let Err(e) = apply_patch(patch) {
                if let Err(cleanup) = installer.uninstall(&destination) {
                    warn!("Failed to remove {}: {}", destination.display(), cleanup);
                }
                self.report.skip(name, source, e);
                return;
            }
        }

        self.report.push(name, source, ArtifactStatus::Installed);
    }
}

/// Applies one patch, absorbing outcomes that leave the binary correct.
fn apply_patch(patch: &DependencyPatch) -> Result<()> {
    match macho::apply(patch) {
        Ok(()) => Ok(()),
        Err(Error::DependencyNotFound(old)) if patch.old_dependency.is_some() => {
            debug!("{} does not reference {}", patch.binary.display(), old);
            Ok(())
        }
        Err(Error::AlreadyExists(path)) if patch.old_dependency.is_none() => {
            info!("{} already loads {}", patch.binary.display(), path.display());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn close_root(root: TempDir) {
    let path = root.path().to_path_buf();
    if let Err(e) = root.close() {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
