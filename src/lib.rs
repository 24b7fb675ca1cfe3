//! From-source package builder for bootstrapping a small Linux distribution.
//!
//! Given a package manifest, adamantite fetches and verifies the package's
//! source files, assembles a build workspace (optionally a chroot with a
//! minimal root filesystem and the toolchain extracted into it), runs the
//! package's build script and archives what the script installed.
//!
//! - **Distfiles** - BLAKE2b-verified, content-checked download cache
//! - **Workspaces** - per-package `work/`, `out/` and sandbox skeleton
//! - **Resolution** - toolchain and declared dependencies, built on demand
//! - **Execution** - build scripts on the host or inside a chroot
//! - **Artifacts** - `{name}_{version}.tar.zst`, doubling as the build cache
//!
//! # Architecture
//!
//! ```text
//! Builder::build(name)
//!     │
//!     ├── distfile::ensure_all     fetch → verify → cache
//!     ├── Workspace::prepare       reset work/ out/ build (+ skeleton)
//!     ├── Builder::closure         toolchain, then depends
//!     │     └── ensure_implied / ensure_explicit
//!     │           └── Builder::build(dep)   when no artifact exists
//!     ├── executor::run            sh -e build, PACKAGE_OUT=out/
//!     └── package::pack            out/ → name_version.tar.zst
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use adamantite::{Builder, Config};
//!
//! let config = Config::load(&std::env::current_dir()?, None)?;
//! let mut builder = Builder::from_config(&config)?;
//! let artifact = builder.build("zlib", config.sandbox)?;
//! println!("built {}", artifact.display());
//! ```

pub mod config;
pub mod distfile;
pub mod error;
pub mod executor;
mod io;
pub mod lock;
pub mod manifest;
pub mod package;
pub mod pipeline;
pub mod preflight;
pub mod record;
pub mod toolchain;
pub mod workspace;

pub use config::Config;
pub use error::{build_error, BuildError};
pub use manifest::{Distfile, Manifest, ManifestDir, ManifestSource};
pub use pipeline::{Builder, DependencyKind, Roots};
pub use workspace::Workspace;
