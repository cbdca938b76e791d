//! Error types for zinject operations.
//!
//! This module defines the [`enum@Error`] enum covering every failure case of
//! an injection session: archive and compression parsing, bundle layout,
//! and Mach-O patching.
//!
//! Some variants only ever affect a single artifact. The session skips the
//! artifact, logs the cause and carries on; see [`Error::is_recoverable`].
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use std::path::PathBuf;
use thiserror::Error;

/// Error type for zinject operations.
///
/// # Examples
///
/// ```no_run
/// use zinject::{Error, Injector};
///
/// let result = Injector::new()
///     .baseline_package("substrate.deb")
///     .inject("Payload/App.app", &["tweak.deb"]);
/// match result {
///     Ok(report) => println!("{report}"),
///     Err(Error::NotFound(what)) => eprintln!("Missing: {what}"),
///     Err(e) => eprintln!("Session failed: {e}"),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed `ar` container or compressed/tar stream.
    #[error("Malformed archive: {0}")]
    Format(String),

    /// A required file, resource or key does not exist.
    ///
    /// Raised for a missing baseline package, a missing main executable,
    /// or a bundle descriptor without `CFBundleExecutable`.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The install destination or dependency record is already present.
    #[error("Already present: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// No zero padding left between the load commands and the first section.
    #[error("Not enough header padding for a {needed}-byte load command ({available} bytes free)")]
    PatchSpaceExhausted { needed: usize, available: usize },

    /// The file is not a Mach-O (thin or fat) binary.
    #[error("Not a Mach-O binary: {0}")]
    NotABinary(String),

    /// No dependency record matched the requested path.
    #[error("Dependency not found: {0}")]
    DependencyNotFound(String),

    /// The replacement path does not fit in the space of the old one.
    #[error("Replacement path {new:?} is longer than {old:?}")]
    PathTooLong { old: String, new: String },

    /// Property list parsing failed.
    ///
    /// Failed to parse an `Info.plist` of the target app or a framework.
    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),
}

impl Error {
    /// Whether the error only affects the artifact being processed.
    ///
    /// Recoverable errors are logged and the artifact is skipped. Everything
    /// else is session-fatal when it hits the baseline package or the
    /// target's main executable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::AlreadyExists(_)
                | Error::PatchSpaceExhausted { .. }
                | Error::NotABinary(_)
                | Error::DependencyNotFound(_)
                | Error::PathTooLong { .. }
        )
    }
}
