//! Per-package build workspaces.
//!
//! A workspace lives at `{workspace_dir}/{name}` and holds:
//! - `work/` - the build script's working directory, seeded with distfiles
//! - `out/` - where the build script installs its outputs
//! - `build` - the materialized build script
//!
//! Sandboxed workspaces are also the chroot root, so they carry a minimal
//! filesystem skeleton that dependency artifacts are extracted over.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::BuildError;
use crate::manifest::Manifest;

/// Directories of the sandbox skeleton.
///
/// `proc`, `dev`, `sys` and `run` are mount points for whoever enters the
/// sandbox; they are left empty here.
pub const SKELETON_DIRS: &[&str] = &["usr/bin", "usr/lib", "proc", "dev", "sys", "tmp", "run"];

/// Symlinks of the sandbox skeleton as `(link, target)`, created in order.
pub const SKELETON_SYMLINKS: &[(&str, &str)] = &[
    ("usr/sbin", "bin"),
    ("bin", "usr/bin"),
    ("sbin", "bin"),
    ("lib", "usr/lib"),
    ("usr/lib64", "lib"),
    ("lib64", "lib"),
];

/// Paths of one package's workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(workspace_dir: &Path, package_name: &str) -> Self {
        Self {
            root: workspace_dir.join(package_name),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.join("work")
    }

    pub fn out_dir(&self) -> PathBuf {
        self.root.join("out")
    }

    pub fn script_path(&self) -> PathBuf {
        self.root.join("build")
    }

    pub fn record_path(&self) -> PathBuf {
        self.root.join("record.json")
    }

    /// Tear down and recreate the workspace for `manifest`.
    ///
    /// Files written inside a sandbox entered through `sudo chroot` belong
    /// to root, so a non-root rebuild of the same package cannot remove them.
    ///
    /// Distfiles are copied from `distfile_dir` and must already have been
    /// fetched. With `sandbox`, the root filesystem skeleton is laid out too.
    pub fn prepare(&self, manifest: &Manifest, distfile_dir: &Path, sandbox: bool) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => debug!("removed previous workspace {}", self.root.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(e).with_context(|| {
                    format!(
                        "removing previous workspace '{}'; an elevated sandbox build leaves \
                         root-owned files behind, so rerun as root or remove it by hand",
                        self.root.display()
                    )
                })
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("removing previous workspace '{}'", self.root.display())
                })
            }
        }

        for dir in [self.root.clone(), self.work_dir(), self.out_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("creating workspace directory '{}'", dir.display()))?;
        }

        if sandbox {
            create_sandbox_skeleton(&self.root)?;
        }

        let work = self.work_dir();
        for distfile in &manifest.distfiles {
            let name = distfile.resolved_name()?;
            let src = distfile_dir.join(&name);
            if !src.is_file() {
                bail!(BuildError::MissingDistfile { name, path: src });
            }
            let dst = work.join(&name);
            fs::copy(&src, &dst).with_context(|| {
                format!("copying distfile '{}' to '{}'", src.display(), dst.display())
            })?;
        }

        write_executable(&self.script_path(), &manifest.build)
    }
}

/// Lay out the minimal root filesystem used as a chroot.
pub fn create_sandbox_skeleton(root: &Path) -> Result<()> {
    for dir in SKELETON_DIRS {
        let path = root.join(dir);
        fs::create_dir_all(&path)
            .with_context(|| format!("creating sandbox directory '{}'", path.display()))?;
    }
    fs::set_permissions(root.join("tmp"), fs::Permissions::from_mode(0o1777))
        .context("setting sandbox /tmp permissions")?;

    for (link, target) in SKELETON_SYMLINKS {
        let link_path = root.join(link);
        std::os::unix::fs::symlink(target, &link_path)
            .with_context(|| format!("creating sandbox symlink /{link} -> {target}"))?;
    }
    Ok(())
}

fn write_executable(path: &Path, content: &str) -> Result<()> {
    let mut body = content.to_string();
    if !body.ends_with('\n') {
        body.push('\n');
    }
    fs::write(path, body).with_context(|| format!("writing build script '{}'", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("setting permissions on '{}'", path.display()))?;
    Ok(())
}
