//! Builder configuration.
//!
//! Layers, lowest to highest precedence:
//! 1. Defaults (legacy layout: manifests and artifacts in the current
//!    directory, distfiles and workspaces under the temp directory)
//! 2. `adamantite.toml` in the current directory, or an explicit file
//! 3. `ADAMANTITE_*` environment variables
//! 4. Command-line flags (applied by the binary)
//!
//! Relative paths in a config file are resolved against the file's directory.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Config file looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = "adamantite.toml";

pub const ENV_MANIFEST_DIR: &str = "ADAMANTITE_MANIFEST_DIR";
pub const ENV_DISTFILE_DIR: &str = "ADAMANTITE_DISTFILE_DIR";
pub const ENV_WORKSPACE_DIR: &str = "ADAMANTITE_WORKSPACE_DIR";
pub const ENV_ARTIFACT_DIR: &str = "ADAMANTITE_ARTIFACT_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Where `{name}.toml` manifests are read from.
    pub manifest_dir: PathBuf,
    /// Shared, flat distfile cache.
    pub distfile_dir: PathBuf,
    /// Parent of the per-package workspaces.
    pub workspace_dir: PathBuf,
    /// Where artifacts are written and looked up.
    pub artifact_dir: PathBuf,
    pub sandbox: bool,
    /// Argv that enters a root directory, e.g. `["sudo", "chroot"]`.
    pub sandbox_command: Vec<String>,
    /// Overrides the built-in toolchain list.
    pub toolchain: Option<PathBuf>,
    pub shell: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    manifest_dir: Option<String>,
    distfile_dir: Option<String>,
    workspace_dir: Option<String>,
    artifact_dir: Option<String>,
    sandbox: Option<bool>,
    sandbox_command: Option<Vec<String>>,
    toolchain: Option<String>,
    shell: Option<String>,
}

impl Config {
    /// Defaults relative to `cwd`.
    pub fn defaults(cwd: &Path) -> Self {
        let tmp = std::env::temp_dir();
        Self {
            manifest_dir: cwd.to_path_buf(),
            distfile_dir: tmp.join("distfiles"),
            workspace_dir: tmp.join("build"),
            artifact_dir: cwd.to_path_buf(),
            sandbox: true,
            sandbox_command: vec!["chroot".to_string()],
            toolchain: None,
            shell: "bash".to_string(),
        }
    }

    /// Load defaults, the config file and the process environment.
    ///
    /// `explicit` must exist when given; otherwise `adamantite.toml` in
    /// `cwd` is used if present.
    pub fn load(cwd: &Path, explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::defaults(cwd);

        let file = match explicit {
            Some(path) => {
                let path = resolve_path(cwd, &path.to_string_lossy());
                if !path.is_file() {
                    bail!("config file not found: {}", path.display());
                }
                Some(path)
            }
            None => Some(cwd.join(CONFIG_FILE_NAME)).filter(|p| p.is_file()),
        };
        if let Some(path) = file {
            config.apply_file(&path)?;
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        let parsed: ConfigToml = toml::from_str(&source)
            .with_context(|| format!("parsing config '{}'", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        if let Some(dir) = parsed.manifest_dir {
            self.manifest_dir = resolve_path(base, &dir);
        }
        if let Some(dir) = parsed.distfile_dir {
            self.distfile_dir = resolve_path(base, &dir);
        }
        if let Some(dir) = parsed.workspace_dir {
            self.workspace_dir = resolve_path(base, &dir);
        }
        if let Some(dir) = parsed.artifact_dir {
            self.artifact_dir = resolve_path(base, &dir);
        }
        if let Some(sandbox) = parsed.sandbox {
            self.sandbox = sandbox;
        }
        if let Some(command) = parsed.sandbox_command {
            if command.is_empty() {
                bail!(
                    "invalid config '{}': sandbox_command must not be empty",
                    path.display()
                );
            }
            self.sandbox_command = command;
        }
        if let Some(toolchain) = parsed.toolchain {
            self.toolchain = Some(resolve_path(base, &toolchain));
        }
        if let Some(shell) = parsed.shell {
            self.shell = shell;
        }
        Ok(())
    }

    /// Apply `ADAMANTITE_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let dirs = [
            (ENV_MANIFEST_DIR, &mut self.manifest_dir),
            (ENV_DISTFILE_DIR, &mut self.distfile_dir),
            (ENV_WORKSPACE_DIR, &mut self.workspace_dir),
            (ENV_ARTIFACT_DIR, &mut self.artifact_dir),
        ];
        for (key, slot) in dirs {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *slot = PathBuf::from(value);
            }
        }
    }
}

fn resolve_path(base: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}
