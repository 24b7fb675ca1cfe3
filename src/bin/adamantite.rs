use std::path::PathBuf;
use std::process::ExitCode;

use adamantite::executor::ChrootExecutor;
use adamantite::pipeline::is_cached;
use adamantite::preflight::{check_required_tools, check_sandbox_privilege, required_tools};
use adamantite::{build_error, BuildError, Builder, Config};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Build packages from source into compressed artifacts
#[derive(Parser)]
#[command(name = "adamantite")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ./adamantite.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding {name}.toml manifests
    #[arg(long, global = true)]
    manifest_dir: Option<PathBuf>,

    /// Distfile cache directory
    #[arg(long, global = true)]
    distfile_dir: Option<PathBuf>,

    /// Parent directory of build workspaces
    #[arg(long, global = true)]
    workspace_dir: Option<PathBuf>,

    /// Directory where artifacts are written and looked up
    #[arg(long, global = true)]
    artifact_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, build and package a package
    Build {
        name: String,

        /// Run the build script on the host instead of in a chroot
        #[arg(long)]
        no_sandbox: bool,
    },

    /// Fetch and verify a package's distfiles
    Fetch { name: String },

    /// Show the dependencies a build would extract, in order
    Closure {
        name: String,

        /// Show the closure of a host build (no toolchain)
        #[arg(long)]
        no_sandbox: bool,
    },

    /// Check that the host has the tools a build needs
    Check,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(BuildError::ChecksumMismatch { .. }) = build_error(&err) {
                error!("distfile verification failed; the cached or downloaded file is not what the manifest expects");
            }
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("resolving current directory")?;
    let mut config = Config::load(&cwd, cli.config.as_deref())?;
    if let Some(dir) = cli.manifest_dir {
        config.manifest_dir = dir;
    }
    if let Some(dir) = cli.distfile_dir {
        config.distfile_dir = dir;
    }
    if let Some(dir) = cli.workspace_dir {
        config.workspace_dir = dir;
    }
    if let Some(dir) = cli.artifact_dir {
        config.artifact_dir = dir;
    }

    match cli.command {
        Commands::Build { name, no_sandbox } => {
            let sandbox = config.sandbox && !no_sandbox;
            preflight(&config, sandbox)?;
            let mut builder = Builder::from_config(&config)?;
            let artifact = builder.build(&name, sandbox)?;
            println!("{}", artifact.display());
            Ok(())
        }
        Commands::Fetch { name } => Builder::from_config(&config)?.fetch(&name),
        Commands::Closure { name, no_sandbox } => {
            let builder = Builder::from_config(&config)?;
            let manifest = builder.load(&name)?;
            for dep in builder.closure(&manifest, config.sandbox && !no_sandbox) {
                let state = match builder.load(&dep.name) {
                    Ok(dep_manifest) if is_cached(builder.roots(), &dep_manifest) => "cached",
                    Ok(_) => "missing",
                    Err(_) => "no manifest",
                };
                println!("{}\t{}\t{}", dep.name, dep.kind, state);
            }
            Ok(())
        }
        Commands::Check => preflight(&config, config.sandbox),
    }
}

fn preflight(config: &Config, sandbox: bool) -> Result<()> {
    if sandbox {
        let chroot = ChrootExecutor::new(config.sandbox_command.clone());
        check_required_tools(&required_tools(&config.shell, Some(chroot.program())))?;
        check_sandbox_privilege(chroot.is_elevated())
    } else {
        check_required_tools(&required_tools(&config.shell, None))
    }
}
