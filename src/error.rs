//! Failure kinds surfaced by the build pipeline.
//!
//! Operations return `anyhow::Result` and wrap failures in context as they
//! propagate. The kinds a caller may want to tell apart are raised as
//! [`BuildError`] and can be recovered anywhere up the chain with
//! `err.downcast_ref::<BuildError>()`.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// The computed digest disagrees with the manifest. Never retried.
    #[error("failed blake2b checksum for '{name}' (expected {expected}, got {actual})")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("failed to fetch '{uri}': {message}")]
    Fetch { uri: String, message: String },

    #[error("invalid distfile '{uri}': {reason}")]
    InvalidDistfile { uri: String, reason: String },

    #[error("distfile '{name}' is not in the cache at {}", .path.display())]
    MissingDistfile { name: String, path: PathBuf },

    #[error("{step} exited with {status}")]
    NonZeroExit { step: String, status: ExitStatus },

    #[error("dependency cycle: {}", .chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    #[error("no manifest for package '{name}' at {}", .path.display())]
    ManifestNotFound { name: String, path: PathBuf },
}

/// Find the first [`BuildError`] in an error chain.
pub fn build_error(err: &anyhow::Error) -> Option<&BuildError> {
    err.chain().find_map(|cause| cause.downcast_ref::<BuildError>())
}
