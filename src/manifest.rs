//! Package manifests.
//!
//! A manifest lives at `{manifest_dir}/{name}.toml`; the package name is the
//! file stem, not a field:
//!
//! ```toml
//! version = "1.3"
//! depends = ["musl"]
//! build = """
//! tar xf zlib-1.3.tar.gz
//! cd zlib-1.3 && ./configure --prefix=/usr && make && make DESTDIR=$PACKAGE_OUT install
//! """
//!
//! [[distfiles]]
//! uri = "https://zlib.net/zlib-1.3.tar.gz"
//! blake2b = "..."
//! ```

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::distfile::verify::digest_size;
use crate::error::BuildError;

/// One package's sources, dependencies and build script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub build: String,
    pub distfiles: Vec<Distfile>,
    /// Explicit dependencies, in manifest order.
    pub depends: Vec<String>,
}

/// An externally hosted source file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Distfile {
    pub uri: String,
    #[serde(alias = "checksum")]
    pub blake2b: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestToml {
    version: String,
    build: String,
    distfiles: Option<Vec<Distfile>>,
    depends: Option<Vec<String>>,
}

impl Manifest {
    /// Parse a manifest body for the package `name`.
    ///
    /// Distfile names and checksums are validated here so later steps never
    /// start a download they cannot verify.
    pub fn parse(name: &str, source: &str) -> Result<Self> {
        validate_package_name(name)?;
        let parsed: ManifestToml =
            toml::from_str(source).with_context(|| format!("parsing manifest for '{name}'"))?;

        validate_version(&parsed.version)
            .with_context(|| format!("invalid version of '{name}'"))?;

        let distfiles = parsed.distfiles.unwrap_or_default();
        for distfile in &distfiles {
            distfile.resolved_name()?;
            if let Err(reason) = digest_size(&distfile.blake2b) {
                bail!(BuildError::InvalidDistfile {
                    uri: distfile.uri.clone(),
                    reason,
                });
            }
        }

        let depends = parsed.depends.unwrap_or_default();
        for dep in &depends {
            validate_package_name(dep)
                .with_context(|| format!("invalid dependency of '{name}'"))?;
        }

        Ok(Self {
            name: name.to_string(),
            version: parsed.version,
            build: parsed.build,
            distfiles,
            depends,
        })
    }
}

impl Distfile {
    /// File name used in the distfile cache and the build's `work/`.
    ///
    /// The explicit `name` wins; otherwise the last path segment of the URI.
    pub fn resolved_name(&self) -> Result<String> {
        let name = match &self.name {
            Some(name) => name.clone(),
            None => {
                let url = Url::parse(&self.uri).map_err(|e| BuildError::InvalidDistfile {
                    uri: self.uri.clone(),
                    reason: e.to_string(),
                })?;
                url.path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| BuildError::InvalidDistfile {
                        uri: self.uri.clone(),
                        reason: "URI has no file name; set `name`".to_string(),
                    })?
            }
        };

        if name.contains('/') || name == "." || name == ".." || name.is_empty() {
            bail!(BuildError::InvalidDistfile {
                uri: self.uri.clone(),
                reason: format!("unsafe file name '{name}'"),
            });
        }
        Ok(name)
    }
}

/// Package names double as file stems and directory names.
pub fn validate_package_name(name: &str) -> Result<()> {
    validate_segment("package name", name)
}

/// Versions end up in artifact file names.
pub fn validate_version(version: &str) -> Result<()> {
    validate_segment("version", version)
}

fn validate_segment(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        bail!("{what} must not be empty");
    }
    if value.contains('/') || value.contains('\\') || value.contains("..") || value.starts_with('.')
    {
        bail!("{what} must be a safe filename segment: '{value}'");
    }
    Ok(())
}

/// Anything that can hand the pipeline a manifest by package name.
pub trait ManifestSource {
    fn load(&self, name: &str) -> Result<Manifest>;
}

/// Manifests stored as `{dir}/{name}.toml`.
#[derive(Debug, Clone)]
pub struct ManifestDir {
    dir: PathBuf,
}

impl ManifestDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.toml"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ManifestSource for ManifestDir {
    fn load(&self, name: &str) -> Result<Manifest> {
        validate_package_name(name)?;
        let path = self.path_for(name);
        if !path.is_file() {
            bail!(BuildError::ManifestNotFound {
                name: name.to_string(),
                path,
            });
        }
        let source = fs::read_to_string(&path)
            .with_context(|| format!("reading manifest '{}'", path.display()))?;
        Manifest::parse(name, &source)
            .with_context(|| format!("loading manifest '{}'", path.display()))
    }
}

/// In-memory manifests, keyed by package name.
#[derive(Debug, Clone, Default)]
pub struct ManifestMap {
    manifests: BTreeMap<String, Manifest>,
}

impl ManifestMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, manifest: Manifest) {
        self.manifests.insert(manifest.name.clone(), manifest);
    }
}

impl ManifestSource for ManifestMap {
    fn load(&self, name: &str) -> Result<Manifest> {
        match self.manifests.get(name) {
            Some(manifest) => Ok(manifest.clone()),
            None => bail!(BuildError::ManifestNotFound {
                name: name.to_string(),
                path: PathBuf::from(format!("{name}.toml")),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::build_error;
    use tempfile::TempDir;

    const ZLIB: &str = r#"
version = "1.3"
build = "tar xf zlib-1.3.tar.gz"
depends = ["musl", "make"]

[[distfiles]]
uri = "https://zlib.net/zlib-1.3.tar.gz"
blake2b = "ab12ab12ab12ab12ab12ab12ab12ab12ab12ab12ab12ab12ab12ab12ab12ab12"

[[distfiles]]
uri = "https://example.org/download?id=7"
checksum = "cd34"
name = "patch-7.diff"
"#;

    #[test]
    fn test_parse_full_manifest() {
        let manifest = Manifest::parse("zlib", ZLIB).unwrap();
        assert_eq!(manifest.name, "zlib");
        assert_eq!(manifest.version, "1.3");
        assert_eq!(manifest.depends, vec!["musl", "make"]);
        assert_eq!(manifest.distfiles.len(), 2);
        assert_eq!(
            manifest.distfiles[0].resolved_name().unwrap(),
            "zlib-1.3.tar.gz"
        );
        assert_eq!(manifest.distfiles[1].blake2b, "cd34");
        assert_eq!(
            manifest.distfiles[1].resolved_name().unwrap(),
            "patch-7.diff"
        );
    }

    #[test]
    fn test_parse_minimal_manifest() {
        let manifest = Manifest::parse("hello", "version = \"1\"\nbuild = \"true\"\n").unwrap();
        assert!(manifest.distfiles.is_empty());
        assert!(manifest.depends.is_empty());
    }

    #[test]
    fn test_uri_without_file_name_is_rejected() {
        let distfile = Distfile {
            uri: "https://example.org/".to_string(),
            blake2b: "ab".to_string(),
            name: None,
        };
        let err = distfile.resolved_name().unwrap_err();
        assert!(matches!(
            build_error(&err),
            Some(BuildError::InvalidDistfile { .. })
        ));
    }

    #[test]
    fn test_bad_checksum_is_rejected_at_parse() {
        let source = r#"
version = "1"
build = "true"
[[distfiles]]
uri = "https://example.org/a.tar"
blake2b = "xyz"
"#;
        let err = Manifest::parse("a", source).unwrap_err();
        assert!(matches!(
            build_error(&err),
            Some(BuildError::InvalidDistfile { .. })
        ));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let source = "version = \"1\"\nbuild = \"true\"\nlicense = \"MIT\"\n";
        assert!(Manifest::parse("a", source).is_err());
    }

    #[test]
    fn test_manifest_dir_loads_by_name() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("zlib.toml"), ZLIB).unwrap();

        let source = ManifestDir::new(temp.path());
        let manifest = source.load("zlib").unwrap();
        assert_eq!(manifest.version, "1.3");

        let err = source.load("missing").unwrap_err();
        assert!(matches!(
            build_error(&err),
            Some(BuildError::ManifestNotFound { .. })
        ));
    }

    #[test]
    fn test_unsafe_versions_are_rejected_at_parse() {
        for version in ["1.0/rc1", "", "..1", ".1", "1\\\\0"] {
            let source = format!("version = \"{version}\"\nbuild = \"true\"\n");
            assert!(
                Manifest::parse("app", &source).is_err(),
                "version {version:?} should be rejected"
            );
        }
        let manifest =
            Manifest::parse("app", "version = \"1.0-rc1\"\nbuild = \"true\"\n").unwrap();
        assert_eq!(manifest.version, "1.0-rc1");
    }

    #[test]
    fn test_unsafe_name_overrides_are_rejected() {
        for name in ["..", ".", "a/b", ""] {
            let distfile = Distfile {
                uri: "https://example.org/a.tar".to_string(),
                blake2b: "ab".to_string(),
                name: Some(name.to_string()),
            };
            let err = distfile.resolved_name().unwrap_err();
            assert!(
                matches!(build_error(&err), Some(BuildError::InvalidDistfile { .. })),
                "name {name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_unsafe_package_names() {
        assert!(validate_package_name("zlib").is_ok());
        assert!(validate_package_name("").is_err());
        assert!(validate_package_name("../etc").is_err());
        assert!(validate_package_name("a/b").is_err());
        assert!(validate_package_name(".hidden").is_err());
    }
}
