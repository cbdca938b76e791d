//! Injector builder API
//!
//! Configures and runs an injection session against an unpacked app bundle.

use crate::session::{InjectionReport, InputReference, Session};
use crate::Result;
use std::path::{Path, PathBuf};

/// Tweak injector with builder pattern API.
///
/// # Example
///
/// ```ignore
/// use zinject::Injector;
///
/// let report = Injector::new()
///     .baseline_package("ellekit.deb")
///     .weak(true)
///     .inject("Payload/App.app", &["tweak.deb", "Extra.dylib"])?;
/// println!("{}", report);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Injector {
    baseline: Option<PathBuf>,
    weak: bool,
    keep_extracted: bool,
    temp_dir: Option<PathBuf>,
}

impl Injector {
    /// Create a new Injector builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the package that provides `CydiaSubstrate.framework`.
    ///
    /// It is only used when the bundle does not already embed the framework.
    pub fn baseline_package(mut self, path: impl AsRef<Path>) -> Self {
        self.baseline = Some(path.as_ref().to_path_buf());
        self
    }

    /// Register artifacts with `LC_LOAD_WEAK_DYLIB` instead of `LC_LOAD_DYLIB`.
    pub fn weak(mut self, weak: bool) -> Self {
        self.weak = weak;
        self
    }

    /// Keep the extracted package trees after the session ends.
    pub fn keep_extracted(mut self, keep: bool) -> Self {
        self.keep_extracted = keep;
        self
    }

    /// Directory in which the session's temporary root is created.
    ///
    /// Defaults to the system temporary directory.
    pub fn temp_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.temp_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub(crate) fn baseline(&self) -> Option<&Path> {
        self.baseline.as_deref()
    }

    pub(crate) fn is_weak(&self) -> bool {
        self.weak
    }

    pub(crate) fn keeps_extracted(&self) -> bool {
        self.keep_extracted
    }

    pub(crate) fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Inject `inputs` into the bundle at `bundle`.
    ///
    /// Inputs are `.deb` packages and `.dylib` files; anything else is
    /// reported as skipped. The bundle is modified in place.
    ///
    /// # Errors
    ///
    /// Returns an error only for session-fatal problems:
    /// - The bundle or its main executable cannot be resolved
    /// - The baseline package is needed but missing or unreadable
    /// - The session's temporary directory cannot be created
    ///
    /// Per-artifact failures are recorded in the returned report.
    pub fn inject<P: AsRef<Path>>(
        &self,
        bundle: impl AsRef<Path>,
        inputs: &[P],
    ) -> Result<InjectionReport> {
        let inputs = inputs
            .iter()
            .map(|p| InputReference::new(p.as_ref()))
            .collect();
        Session::new(self).run(bundle.as_ref(), inputs)
    }
}
