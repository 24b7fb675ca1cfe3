//! Build records.
//!
//! Every build writes `record.json` into its workspace and rewrites it when
//! the build finishes. Workspaces of failed builds are left in place, so the
//! record names the step that failed next to the partial state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Running,
    Succeeded,
    Failed,
}

/// A pipeline step, as named in records and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Fetch,
    Prepare,
    Resolve,
    Build,
    Package,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::Fetch => "fetch",
            Step::Prepare => "prepare",
            Step::Resolve => "resolve",
            Step::Build => "build",
            Step::Package => "package",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    pub package: String,
    pub version: String,
    pub sandboxed: bool,
    /// Artifacts extracted into the workspace, in extraction order.
    pub dependencies: Vec<String>,
    pub status: BuildStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at_utc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at_utc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

impl BuildRecord {
    pub fn start(package: &str, version: &str, sandboxed: bool) -> Self {
        Self {
            package: package.to_string(),
            version: version.to_string(),
            sandboxed,
            dependencies: Vec::new(),
            status: BuildStatus::Running,
            failed_step: None,
            error: None,
            started_at_utc: now_utc(),
            finished_at_utc: None,
            artifact: None,
        }
    }

    pub fn succeed(&mut self, artifact: &Path) {
        self.status = BuildStatus::Succeeded;
        self.artifact = Some(artifact.to_path_buf());
        self.finished_at_utc = Some(now_utc());
    }

    pub fn fail(&mut self, step: Step, error: &anyhow::Error) {
        self.status = BuildStatus::Failed;
        self.failed_step = Some(step);
        self.error = Some(format!("{error:#}"));
        self.finished_at_utc = Some(now_utc());
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes)
            .with_context(|| format!("writing build record '{}'", path.display()))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("reading build record '{}'", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing build record '{}'", path.display()))
    }
}

fn now_utc() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}
