//! Build orchestration.
//!
//! A top-level build runs: fetch distfiles, prepare the workspace, resolve
//! dependencies, run the build script, package `out/`. Any failure aborts
//! the whole pipeline and leaves the workspace behind for inspection.
//!
//! Dependencies are built on demand through the same pipeline, always
//! sandboxed. The chain of packages currently being built is tracked so a
//! package that (transitively) depends on itself fails with
//! [`BuildError::DependencyCycle`] instead of recursing forever.

pub mod resolve;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::Config;
use crate::distfile::{self, HttpTransport, Transport};
use crate::error::BuildError;
use crate::executor::{self, BuildMode, ChrootExecutor, SandboxExecutor};
use crate::lock::PackageLock;
use crate::manifest::{Manifest, ManifestDir, ManifestSource};
use crate::package;
use crate::record::{BuildRecord, Step};
use crate::toolchain::Toolchain;
use crate::workspace::Workspace;

pub use resolve::{DependencyKind, PlannedDependency, ResolvedDependency};

/// Filesystem roots shared by every build of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roots {
    pub distfile_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub artifact_dir: PathBuf,
}

impl Roots {
    pub fn from_config(config: &Config) -> Self {
        Self {
            distfile_dir: config.distfile_dir.clone(),
            workspace_dir: config.workspace_dir.clone(),
            artifact_dir: config.artifact_dir.clone(),
        }
    }

    pub fn artifact_for(&self, manifest: &Manifest) -> PathBuf {
        package::artifact_path(&self.artifact_dir, &manifest.name, &manifest.version)
    }
}

/// Drives builds and the dependency builds they trigger.
pub struct Builder {
    manifests: Box<dyn ManifestSource>,
    transport: Box<dyn Transport>,
    sandbox: Box<dyn SandboxExecutor>,
    toolchain: Toolchain,
    roots: Roots,
    shell: String,
    in_progress: Vec<String>,
}

impl Builder {
    pub fn new(
        manifests: Box<dyn ManifestSource>,
        transport: Box<dyn Transport>,
        sandbox: Box<dyn SandboxExecutor>,
        toolchain: Toolchain,
        roots: Roots,
        shell: impl Into<String>,
    ) -> Self {
        Self {
            manifests,
            transport,
            sandbox,
            toolchain,
            roots,
            shell: shell.into(),
            in_progress: Vec::new(),
        }
    }

    /// Production wiring: manifests from disk, HTTP fetches, chroot sandbox.
    pub fn from_config(config: &Config) -> Result<Self> {
        let toolchain = match &config.toolchain {
            Some(path) => Toolchain::load(path)?,
            None => Toolchain::builtin()?,
        };
        Ok(Self::new(
            Box::new(ManifestDir::new(&config.manifest_dir)),
            Box::new(HttpTransport::new()?),
            Box::new(ChrootExecutor::new(config.sandbox_command.clone())),
            toolchain,
            Roots::from_config(config),
            config.shell.clone(),
        ))
    }

    pub fn roots(&self) -> &Roots {
        &self.roots
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn load(&self, name: &str) -> Result<Manifest> {
        self.manifests
            .load(name)
            .with_context(|| format!("loading manifest for '{name}'"))
    }

    /// Fetch and verify the distfiles of `name` without building.
    pub fn fetch(&self, name: &str) -> Result<()> {
        let manifest = self.load(name)?;
        self.fetch_manifest(&manifest)
    }

    /// Top-level build of `name`. Always rebuilds, even when an artifact
    /// for this version already exists.
    pub fn build(&mut self, name: &str, sandbox: bool) -> Result<PathBuf> {
        let manifest = self.load(name)?;
        self.fetch_and_build(&manifest, sandbox)
    }

    pub(crate) fn fetch_and_build(&mut self, manifest: &Manifest, sandbox: bool) -> Result<PathBuf> {
        self.fetch_manifest(manifest)
            .with_context(|| format!("{} failed for '{}'", Step::Fetch, manifest.name))?;
        self.build_fetched(manifest, sandbox)
    }

    fn fetch_manifest(&self, manifest: &Manifest) -> Result<()> {
        if manifest.distfiles.is_empty() {
            return Ok(());
        }
        info!(package = %manifest.name, "fetching {} distfile(s)", manifest.distfiles.len());
        distfile::ensure_all(self.transport.as_ref(), manifest, &self.roots.distfile_dir)
    }

    /// Build a manifest whose distfiles are already in the cache.
    fn build_fetched(&mut self, manifest: &Manifest, sandbox: bool) -> Result<PathBuf> {
        if self.in_progress.iter().any(|n| n == &manifest.name) {
            let mut chain = self.in_progress.clone();
            chain.push(manifest.name.clone());
            let err = anyhow::Error::new(BuildError::DependencyCycle { chain });
            if self.toolchain.contains(&manifest.name) {
                return Err(err.context(format!(
                    "'{}' is a toolchain package; build it without the sandbox or seed its artifact first",
                    manifest.name
                )));
            }
            return Err(err);
        }

        self.in_progress.push(manifest.name.clone());
        let result = self.build_locked(manifest, sandbox);
        self.in_progress.pop();
        result
    }

    fn build_locked(&mut self, manifest: &Manifest, sandbox: bool) -> Result<PathBuf> {
        let _lock = PackageLock::acquire(&self.roots.workspace_dir, &manifest.name)?;
        let workspace = Workspace::new(&self.roots.workspace_dir, &manifest.name);
        let mut record = BuildRecord::start(&manifest.name, &manifest.version, sandbox);

        info!(
            package = %manifest.name,
            version = %manifest.version,
            sandbox,
            "building"
        );
        match self.run_steps(manifest, sandbox, &workspace, &mut record) {
            Ok(artifact) => {
                record.succeed(&artifact);
                record.write(&workspace.record_path())?;
                Ok(artifact)
            }
            Err((step, err)) => {
                record.fail(step, &err);
                if workspace.root().is_dir() {
                    if let Err(e) = record.write(&workspace.record_path()) {
                        warn!("could not record failure of '{}': {e:#}", manifest.name);
                    }
                }
                Err(err.context(format!("{step} failed for '{}'", manifest.name)))
            }
        }
    }

    fn run_steps(
        &mut self,
        manifest: &Manifest,
        sandbox: bool,
        workspace: &Workspace,
        record: &mut BuildRecord,
    ) -> std::result::Result<PathBuf, (Step, anyhow::Error)> {
        let name = &manifest.name;
        info!(package = %name, step = %Step::Prepare, "{}", workspace.root().display());
        workspace
            .prepare(manifest, &self.roots.distfile_dir, sandbox)
            .map_err(at(Step::Prepare))?;
        record
            .write(&workspace.record_path())
            .map_err(at(Step::Prepare))?;

        let closure = self.closure(manifest, sandbox);
        info!(package = %name, step = %Step::Resolve, "{} dependencies", closure.len());
        for dep in closure {
            let resolved = self
                .ensure_dependency(workspace.root(), &dep.name, dep.kind)
                .map_err(at(Step::Resolve))?;
            record.dependencies.push(resolved.name);
        }

        let mode = if sandbox {
            BuildMode::Sandbox(self.sandbox.as_ref())
        } else {
            BuildMode::Host
        };
        info!(package = %name, step = %Step::Build, sandbox);
        executor::run(workspace, name, &self.shell, mode).map_err(at(Step::Build))?;

        info!(package = %name, step = %Step::Package, "{}", workspace.out_dir().display());
        package::pack(
            &workspace.out_dir(),
            &self.roots.artifact_dir,
            name,
            &manifest.version,
        )
        .map_err(at(Step::Package))
    }
}

fn at(step: Step) -> impl FnOnce(anyhow::Error) -> (Step, anyhow::Error) {
    move |err| (step, err)
}

/// Whether an artifact already satisfies `manifest`.
pub fn is_cached(roots: &Roots, manifest: &Manifest) -> bool {
    roots.artifact_for(manifest).is_file()
}
