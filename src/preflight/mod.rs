//! Host checks run before a build.
//!
//! Catches missing tools and missing privileges up front instead of halfway
//! through a dependency closure.

use anyhow::{bail, Result};

/// Check if a command exists in `PATH`.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// Each tuple is (command_name, package_name). All missing tools are
/// reported together.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Host tools needed for a build with the given shell and sandbox entry.
pub fn required_tools<'a>(shell: &'a str, sandbox_program: Option<&'a str>) -> Vec<(&'a str, &'a str)> {
    let mut tools = vec![(shell, shell)];
    if let Some(program) = sandbox_program {
        let package = if program == "chroot" { "coreutils" } else { program };
        tools.push((program, package));
        if program != "chroot" {
            tools.push(("chroot", "coreutils"));
        }
    }
    tools
}

pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Entering a chroot needs root, either directly or through an elevation
/// command in front of `chroot`.
///
/// With an elevation command the build script runs as root, so its
/// workspace ends up root-owned and a later non-root build of the same
/// package cannot reset it. Repeated elevated builds should run as root.
pub fn check_sandbox_privilege(elevated: bool) -> Result<()> {
    if elevated || is_root() {
        return Ok(());
    }
    bail!(
        "sandboxed builds need root to chroot.\n\
         Run as root, set sandbox_command = [\"sudo\", \"chroot\"] in adamantite.toml, \
         or build with --no-sandbox"
    )
}
