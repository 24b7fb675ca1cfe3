//! Dependency resolution.
//!
//! The closure of a build is the toolchain (sandboxed builds only) followed
//! by the manifest's `depends`, in order. Each entry is materialized by
//! extracting its artifact over the consumer's workspace root; a missing
//! artifact is built first. There is no deduplication and no version
//! solving, and later extractions overwrite files from earlier ones.
//!
//! Artifact presence is the only cache signal. A changed build script with
//! an unchanged version keeps reusing the old artifact.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use super::Builder;
use crate::manifest::Manifest;
use crate::package;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    /// Toolchain package required by every sandboxed build.
    Implied,
    /// Named in the manifest's `depends`.
    Explicit,
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyKind::Implied => f.write_str("implied"),
            DependencyKind::Explicit => f.write_str("explicit"),
        }
    }
}

/// One entry of a build's dependency closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDependency {
    pub name: String,
    pub kind: DependencyKind,
}

/// A dependency that has been extracted into a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    pub name: String,
    pub artifact: PathBuf,
    /// Whether the artifact had to be built first.
    pub built: bool,
}

impl Builder {
    /// The ordered dependency closure of `manifest`.
    pub fn closure(&self, manifest: &Manifest, sandbox: bool) -> Vec<PlannedDependency> {
        let implied: &[String] = if sandbox {
            self.toolchain.packages()
        } else {
            &[]
        };
        implied
            .iter()
            .map(|name| PlannedDependency {
                name: name.clone(),
                kind: DependencyKind::Implied,
            })
            .chain(manifest.depends.iter().map(|name| PlannedDependency {
                name: name.clone(),
                kind: DependencyKind::Explicit,
            }))
            .collect()
    }

    /// Materialize a toolchain package into `root`, building it through the
    /// full sandboxed pipeline when its artifact is missing.
    pub fn ensure_implied(&mut self, root: &Path, name: &str) -> Result<ResolvedDependency> {
        let manifest = self.load(name)?;
        let mut artifact = self.roots.artifact_for(&manifest);
        let built = !artifact.is_file();
        if built {
            info!(package = %name, "implied dependency not built yet");
            artifact = self.fetch_and_build(&manifest, true)?;
        }
        extract_into(name, &artifact, root, built)
    }

    /// Materialize a declared dependency into `root`, running a top-level
    /// sandboxed build of it when its artifact is missing.
    pub fn ensure_explicit(&mut self, root: &Path, name: &str) -> Result<ResolvedDependency> {
        let manifest = self.load(name)?;
        let mut artifact = self.roots.artifact_for(&manifest);
        let built = !artifact.is_file();
        if built {
            info!(package = %name, "dependency not built yet");
            artifact = self.build(name, true)?;
        }
        extract_into(name, &artifact, root, built)
    }

    pub(crate) fn ensure_dependency(
        &mut self,
        root: &Path,
        name: &str,
        kind: DependencyKind,
    ) -> Result<ResolvedDependency> {
        let resolved = match kind {
            DependencyKind::Implied => self.ensure_implied(root, name),
            DependencyKind::Explicit => self.ensure_explicit(root, name),
        };
        resolved.with_context(|| format!("resolving {kind} dependency '{name}'"))
    }
}

fn extract_into(name: &str, artifact: &Path, root: &Path, built: bool) -> Result<ResolvedDependency> {
    package::extract(artifact, root)?;
    info!(package = %name, "extracted {}", artifact.display());
    Ok(ResolvedDependency {
        name: name.to_string(),
        artifact: artifact.to_path_buf(),
        built,
    })
}
