//! The implied dependencies of sandboxed builds.
//!
//! The list is data: `toolchain.toml` at the crate root is compiled in, and
//! a different file can be supplied through the configuration.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::manifest::validate_package_name;

const BUILTIN_TOOLCHAIN: &str = include_str!("../toolchain.toml");

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolchainToml {
    packages: Vec<String>,
}

/// Ordered toolchain package list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    packages: Vec<String>,
}

impl Toolchain {
    /// The list shipped with this crate.
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_TOOLCHAIN).context("parsing built-in toolchain list")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("reading toolchain list '{}'", path.display()))?;
        Self::parse(&source)
            .with_context(|| format!("parsing toolchain list '{}'", path.display()))
    }

    pub fn parse(source: &str) -> Result<Self> {
        let parsed: ToolchainToml = toml::from_str(source)?;
        Self::from_packages(parsed.packages)
    }

    pub fn from_packages(packages: Vec<String>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for package in &packages {
            validate_package_name(package)?;
            if !seen.insert(package.as_str()) {
                bail!("toolchain lists '{package}' more than once");
            }
        }
        Ok(Self { packages })
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.iter().any(|p| p == name)
    }
}
