//! Build script execution.
//!
//! The build script runs under a strict-mode shell (`-e`). On the host it
//! runs in `work/` with the inherited environment plus `PACKAGE_OUT`. In a
//! sandbox the workspace root becomes `/`, so the script sees `/work` and
//! `PACKAGE_OUT=/out`. Any non-zero exit aborts the pipeline.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use tracing::{debug, info};

use crate::error::BuildError;
use crate::workspace::Workspace;

/// Environment variable naming the directory a build script installs into.
pub const OUT_ENV: &str = "PACKAGE_OUT";

/// `PATH` inside the sandbox; the skeleton aliases every bin dir to `/usr/bin`.
pub const SANDBOX_PATH: &str = "/usr/bin";

/// A command to run with `root` as its filesystem root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxCommand {
    pub root: PathBuf,
    /// Working directory, as seen from inside the sandbox.
    pub workdir: PathBuf,
    /// The complete environment; nothing is inherited.
    pub env: BTreeMap<String, String>,
    pub argv: Vec<String>,
}

/// Runs commands inside a filesystem root.
pub trait SandboxExecutor {
    fn run(&self, command: &SandboxCommand) -> Result<ExitStatus>;
}

/// Enters the sandbox with `chroot`, optionally behind an elevation
/// command such as `sudo`.
#[derive(Debug, Clone)]
pub struct ChrootExecutor {
    prefix: Vec<String>,
}

impl ChrootExecutor {
    /// `prefix` is the argv that precedes the root path, e.g.
    /// `["sudo", "chroot"]`. An empty prefix means plain `chroot`.
    pub fn new(prefix: Vec<String>) -> Self {
        let prefix = if prefix.is_empty() {
            vec!["chroot".to_string()]
        } else {
            prefix
        };
        Self { prefix }
    }

    /// Whether the prefix elevates privileges before calling `chroot`.
    pub fn is_elevated(&self) -> bool {
        self.prefix.len() > 1
    }

    pub fn program(&self) -> &str {
        &self.prefix[0]
    }

    /// The full host argv that enters the sandbox for `command`.
    ///
    /// The change into `workdir` runs through the command's own shell
    /// (`argv[0]`), so the sandbox needs nothing beyond `env` and that shell.
    pub fn host_argv(&self, command: &SandboxCommand) -> Vec<String> {
        let shell = command.argv.first().map(String::as_str).unwrap_or("sh");
        let mut argv = self.prefix.clone();
        argv.push(command.root.display().to_string());
        argv.push("/usr/bin/env".to_string());
        argv.push("-i".to_string());
        for (key, value) in &command.env {
            argv.push(format!("{key}={value}"));
        }
        argv.push(shell.to_string());
        argv.push("-c".to_string());
        argv.push(r#"cd "$1" && shift && exec "$@""#.to_string());
        argv.push(shell.to_string());
        argv.push(command.workdir.display().to_string());
        argv.extend(command.argv.iter().cloned());
        argv
    }
}

impl SandboxExecutor for ChrootExecutor {
    fn run(&self, command: &SandboxCommand) -> Result<ExitStatus> {
        let argv = self.host_argv(command);
        debug!("sandbox: {}", argv.join(" "));
        Command::new(&argv[0])
            .args(&argv[1..])
            .status()
            .with_context(|| format!("running '{}' for '{}'", argv[0], command.root.display()))
    }
}

/// Where a build script runs.
#[derive(Clone, Copy)]
pub enum BuildMode<'a> {
    Host,
    Sandbox(&'a dyn SandboxExecutor),
}

impl BuildMode<'_> {
    pub fn is_sandboxed(&self) -> bool {
        matches!(self, BuildMode::Sandbox(_))
    }
}

/// Run the materialized build script of `workspace`.
pub fn run(workspace: &Workspace, package: &str, shell: &str, mode: BuildMode<'_>) -> Result<()> {
    let status = match mode {
        BuildMode::Host => run_on_host(workspace, shell)?,
        BuildMode::Sandbox(executor) => {
            info!("building {package} in sandbox {}", workspace.root().display());
            executor.run(&sandbox_command(workspace, shell))?
        }
    };

    if !status.success() {
        bail!(BuildError::NonZeroExit {
            step: format!("build script for '{package}'"),
            status,
        });
    }
    Ok(())
}

/// The sandbox invocation for `workspace`'s build script.
pub fn sandbox_command(workspace: &Workspace, shell: &str) -> SandboxCommand {
    let env = BTreeMap::from([
        (OUT_ENV.to_string(), "/out".to_string()),
        ("PATH".to_string(), SANDBOX_PATH.to_string()),
        ("HOME".to_string(), "/tmp".to_string()),
    ]);
    SandboxCommand {
        root: workspace.root().to_path_buf(),
        workdir: PathBuf::from("/work"),
        env,
        argv: vec![shell.to_string(), "-e".to_string(), "/build".to_string()],
    }
}

fn run_on_host(workspace: &Workspace, shell: &str) -> Result<ExitStatus> {
    let out = absolute(&workspace.out_dir())?;
    let script = absolute(&workspace.script_path())?;
    info!("building in {} (no sandbox)", workspace.root().display());

    Command::new(shell)
        .arg("-e")
        .arg(&script)
        .current_dir(workspace.work_dir())
        .env(OUT_ENV, &out)
        .status()
        .with_context(|| format!("running {shell} -e {}", script.display()))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).with_context(|| format!("resolving '{}'", path.display()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::build_error;
    use crate::manifest::Manifest;
    use std::cell::RefCell;
    use std::os::unix::process::ExitStatusExt;
    use tempfile::TempDir;

    /// Records sandbox invocations and simulates a build by writing a marker
    /// into the sandbox's `/out`.
    #[derive(Default)]
    pub(crate) struct RecordingSandbox {
        pub(crate) runs: RefCell<Vec<SandboxCommand>>,
        pub(crate) fail_for: Option<String>,
    }

    impl SandboxExecutor for RecordingSandbox {
        fn run(&self, command: &SandboxCommand) -> Result<ExitStatus> {
            self.runs.borrow_mut().push(command.clone());
            let name = command
                .root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.fail_for.as_deref() == Some(name.as_str()) {
                return Ok(ExitStatus::from_raw(1 << 8));
            }
            let out = command.root.join("out/usr/share").join(&name);
            fs::create_dir_all(&out)?;
            fs::write(out.join("built"), name.as_bytes())?;
            Ok(ExitStatus::from_raw(0))
        }
    }

    fn workspace_with_script(temp: &TempDir, script: &str) -> Workspace {
        let ws = Workspace::new(temp.path(), "pkg");
        let manifest = Manifest {
            name: "pkg".to_string(),
            version: "1".to_string(),
            build: script.to_string(),
            distfiles: vec![],
            depends: vec![],
        };
        ws.prepare(&manifest, temp.path(), false).unwrap();
        ws
    }

    #[test]
    fn test_host_build_sees_out_and_work() {
        let temp = TempDir::new().unwrap();
        let ws = workspace_with_script(
            &temp,
            "pwd > \"$PACKAGE_OUT/cwd\"\necho hi > \"$PACKAGE_OUT/hello\"",
        );

        run(&ws, "pkg", "sh", BuildMode::Host).unwrap();

        assert_eq!(fs::read_to_string(ws.out_dir().join("hello")).unwrap(), "hi\n");
        let cwd = fs::read_to_string(ws.out_dir().join("cwd")).unwrap();
        assert_eq!(
            Path::new(cwd.trim()),
            fs::canonicalize(ws.work_dir()).unwrap()
        );
    }

    #[test]
    fn test_host_build_is_strict() {
        let temp = TempDir::new().unwrap();
        let ws = workspace_with_script(&temp, "false\ntouch \"$PACKAGE_OUT/after\"");

        let err = run(&ws, "pkg", "sh", BuildMode::Host).unwrap_err();

        assert!(matches!(
            build_error(&err),
            Some(BuildError::NonZeroExit { .. })
        ));
        assert!(!ws.out_dir().join("after").exists());
    }

    #[test]
    fn test_sandbox_command_contract() {
        let temp = TempDir::new().unwrap();
        let ws = workspace_with_script(&temp, "true");
        let sandbox = RecordingSandbox::default();

        run(&ws, "pkg", "bash", BuildMode::Sandbox(&sandbox)).unwrap();

        let runs = sandbox.runs.borrow();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].root, ws.root());
        assert_eq!(runs[0].workdir, Path::new("/work"));
        assert_eq!(runs[0].env.get(OUT_ENV).map(String::as_str), Some("/out"));
        assert_eq!(runs[0].argv, vec!["bash", "-e", "/build"]);
    }

    #[test]
    fn test_sandbox_failure_is_fatal() {
        let temp = TempDir::new().unwrap();
        let ws = workspace_with_script(&temp, "true");
        let sandbox = RecordingSandbox {
            fail_for: Some("pkg".to_string()),
            ..Default::default()
        };

        let err = run(&ws, "pkg", "bash", BuildMode::Sandbox(&sandbox)).unwrap_err();
        assert!(matches!(
            build_error(&err),
            Some(BuildError::NonZeroExit { .. })
        ));
    }

    #[test]
    fn test_chroot_argv() {
        let executor = ChrootExecutor::new(vec!["sudo".to_string(), "chroot".to_string()]);
        assert!(executor.is_elevated());

        let command = SandboxCommand {
            root: PathBuf::from("/tmp/build/zlib"),
            workdir: PathBuf::from("/work"),
            env: BTreeMap::from([(OUT_ENV.to_string(), "/out".to_string())]),
            argv: vec!["bash".to_string(), "-e".to_string(), "/build".to_string()],
        };
        let argv = executor.host_argv(&command);
        assert_eq!(&argv[..5], ["sudo", "chroot", "/tmp/build/zlib", "/usr/bin/env", "-i"]);
        assert_eq!(argv[5], "PACKAGE_OUT=/out");
        assert_eq!(
            &argv[6..],
            [
                "bash",
                "-c",
                r#"cd "$1" && shift && exec "$@""#,
                "bash",
                "/work",
                "bash",
                "-e",
                "/build"
            ]
        );
        assert!(!argv.iter().any(|a| a == "/bin/sh"));

        assert!(!ChrootExecutor::new(vec![]).is_elevated());
        assert_eq!(ChrootExecutor::new(vec![]).program(), "chroot");
    }
}
