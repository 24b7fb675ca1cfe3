//! Distfile fetcher.
//!
//! The cache directory is a single flat namespace keyed by resolved distfile
//! name. Anything stored there has passed verification: downloads are
//! verified in memory, written to a temporary file and renamed into place.
//! A cached file that fails verification is an error, never re-fetched.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use super::verify::verify;
use crate::error::BuildError;
use crate::io::tmp_name;
use crate::manifest::{Distfile, Manifest};

/// Identifies the fetcher to remote servers.
pub const USER_AGENT: &str = "Adamantite/0.1 (reqwest)";

/// Retrieves the full body of a remote resource.
pub trait Transport {
    fn get(&self, uri: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP(S) transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(None::<std::time::Duration>)
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, uri: &str) -> Result<Vec<u8>> {
        let fetch_error = |message: String| BuildError::Fetch {
            uri: uri.to_string(),
            message,
        };

        let mut response = self
            .client
            .get(uri)
            .send()
            .map_err(|e| fetch_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            bail!(fetch_error(format!("server returned {status}")));
        }

        let mut body = Vec::new();
        response
            .read_to_end(&mut body)
            .map_err(|e| fetch_error(format!("reading response body: {e}")))?;
        Ok(body)
    }
}

/// What [`ensure`] had to do to make a distfile available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Already cached and verified; no network I/O.
    Cached,
    /// Downloaded, verified and stored.
    Fetched,
}

/// Make sure `distfile` is present and valid in `cache_dir`.
pub fn ensure(
    transport: &dyn Transport,
    distfile: &Distfile,
    cache_dir: &Path,
) -> Result<FetchOutcome> {
    let name = distfile.resolved_name()?;
    let path = cache_dir.join(&name);

    if path.is_file() {
        let bytes = fs::read(&path)
            .with_context(|| format!("reading cached distfile '{}'", path.display()))?;
        verify(&name, &distfile.blake2b, &bytes)
            .with_context(|| format!("verifying cached distfile '{}'", path.display()))?;
        info!("distfile {} -> {name} (already downloaded) OK", distfile.uri);
        return Ok(FetchOutcome::Cached);
    }

    debug!("fetching {} into {}", distfile.uri, cache_dir.display());
    let bytes = transport.get(&distfile.uri)?;
    verify(&name, &distfile.blake2b, &bytes)
        .with_context(|| format!("verifying download of '{}'", distfile.uri))?;

    fs::create_dir_all(cache_dir)
        .with_context(|| format!("creating distfile cache '{}'", cache_dir.display()))?;
    let tmp = cache_dir.join(tmp_name(&format!(".{name}.part")));
    fs::write(&tmp, &bytes).with_context(|| format!("writing '{}'", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, &path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("storing distfile '{}'", path.display()));
    }

    info!("distfile {} -> {name} (fetch) OK", distfile.uri);
    Ok(FetchOutcome::Fetched)
}

/// Fetch every distfile of `manifest`, in manifest order.
pub fn ensure_all(transport: &dyn Transport, manifest: &Manifest, cache_dir: &Path) -> Result<()> {
    for distfile in &manifest.distfiles {
        ensure(transport, distfile, cache_dir)
            .with_context(|| format!("fetching distfiles for '{}'", manifest.name))?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::distfile::verify::blake2b_hex;
    use crate::error::build_error;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// Serves fixed bodies and counts requests.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub(crate) bodies: BTreeMap<String, Vec<u8>>,
        pub(crate) requests: RefCell<Vec<String>>,
    }

    impl FakeTransport {
        pub(crate) fn serving(uri: &str, body: &[u8]) -> Self {
            let mut transport = Self::default();
            transport.bodies.insert(uri.to_string(), body.to_vec());
            transport
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl Transport for FakeTransport {
        fn get(&self, uri: &str) -> Result<Vec<u8>> {
            self.requests.borrow_mut().push(uri.to_string());
            match self.bodies.get(uri) {
                Some(body) => Ok(body.clone()),
                None => bail!(BuildError::Fetch {
                    uri: uri.to_string(),
                    message: "server returned 404 Not Found".to_string(),
                }),
            }
        }
    }

    const URI: &str = "https://example.org/zlib-1.3.tar.gz";

    fn distfile_for(body: &[u8]) -> Distfile {
        Distfile {
            uri: URI.to_string(),
            blake2b: blake2b_hex(body, 32).unwrap(),
            name: None,
        }
    }

    #[test]
    fn test_second_ensure_uses_cache() {
        let temp = TempDir::new().unwrap();
        let body = b"zlib source tarball";
        let transport = FakeTransport::serving(URI, body);
        let distfile = distfile_for(body);

        let first = ensure(&transport, &distfile, temp.path()).unwrap();
        let second = ensure(&transport, &distfile, temp.path()).unwrap();

        assert_eq!(first, FetchOutcome::Fetched);
        assert_eq!(second, FetchOutcome::Cached);
        assert_eq!(transport.request_count(), 1);
        assert_eq!(fs::read(temp.path().join("zlib-1.3.tar.gz")).unwrap(), body);
    }

    #[test]
    fn test_mismatched_download_is_not_cached() {
        let temp = TempDir::new().unwrap();
        let transport = FakeTransport::serving(URI, b"tampered bytes");
        let distfile = distfile_for(b"expected bytes");

        let err = ensure(&transport, &distfile, temp.path()).unwrap_err();

        assert!(matches!(
            build_error(&err),
            Some(BuildError::ChecksumMismatch { .. })
        ));
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_corrupted_cache_entry_fails_without_refetch() {
        let temp = TempDir::new().unwrap();
        let body = b"zlib source tarball";
        let transport = FakeTransport::serving(URI, body);
        let distfile = distfile_for(body);

        ensure(&transport, &distfile, temp.path()).unwrap();
        fs::write(temp.path().join("zlib-1.3.tar.gz"), &body[..4]).unwrap();

        let err = ensure(&transport, &distfile, temp.path()).unwrap_err();
        assert!(matches!(
            build_error(&err),
            Some(BuildError::ChecksumMismatch { .. })
        ));
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn test_name_override_selects_cache_file() {
        let temp = TempDir::new().unwrap();
        let body = b"patch";
        let transport = FakeTransport::serving(URI, body);
        let mut distfile = distfile_for(body);
        distfile.name = Some("renamed.diff".to_string());

        ensure(&transport, &distfile, temp.path()).unwrap();
        assert!(temp.path().join("renamed.diff").is_file());
        assert!(!temp.path().join("zlib-1.3.tar.gz").exists());
    }

    #[test]
    fn test_transport_failure_is_fetch_error() {
        let temp = TempDir::new().unwrap();
        let transport = FakeTransport::default();
        let err = ensure(&transport, &distfile_for(b"x"), temp.path()).unwrap_err();
        assert!(matches!(build_error(&err), Some(BuildError::Fetch { .. })));
    }

    #[test]
    fn test_http_transport_sends_user_agent() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/zlib-1.3.tar.gz")
            .match_header("user-agent", USER_AGENT)
            .with_status(200)
            .with_body("zlib over http")
            .create();

        let temp = TempDir::new().unwrap();
        let distfile = Distfile {
            uri: format!("{}/zlib-1.3.tar.gz", server.url()),
            blake2b: blake2b_hex(b"zlib over http", 32).unwrap(),
            name: None,
        };
        let transport = HttpTransport::new().unwrap();

        let outcome = ensure(&transport, &distfile, temp.path()).unwrap();
        assert_eq!(outcome, FetchOutcome::Fetched);
        mock.assert();
    }

    #[test]
    fn test_http_transport_reports_status() {
        let mut server = mockito::Server::new();
        let _mock = server.mock("GET", "/gone.tar").with_status(404).create();

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .get(&format!("{}/gone.tar", server.url()))
            .unwrap_err();
        assert!(matches!(build_error(&err), Some(BuildError::Fetch { .. })));
    }
}
