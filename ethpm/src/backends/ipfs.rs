//! IPFS backends: HTTP API nodes, public gateways and in-memory fixtures.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::{http_body, http_send, BackendError, BackendKind, UriBackend};
use crate::hash::{ipfs_hash, HashError};
use crate::uri::{create_ipfs_uri, extract_ipfs_path, is_ipfs_uri};

pub const DEFAULT_INFURA_API: &str = "https://ipfs.infura.io:5001";
pub const DEFAULT_LOCAL_IPFS_API: &str = "http://127.0.0.1:5001";
pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";

/// Boundary of the multipart body sent to `/api/v0/add`.
const MULTIPART_BOUNDARY: &str = "ethpm-ipfs-add-boundary";

/// An IPFS node reached through its HTTP API (`/api/v0/cat`, `/api/v0/add`).
#[derive(Debug, Clone)]
pub struct IpfsApiBackend {
    kind: BackendKind,
    base: String,
    timeout: Duration,
}

/// One line of an `/api/v0/add` response.
#[derive(Debug, Deserialize)]
struct AddedObject {
    #[serde(rename = "Hash")]
    hash: String,
}

impl IpfsApiBackend {
    /// The Infura public API.
    pub fn infura(base: impl Into<String>, timeout: Duration) -> Self {
        IpfsApiBackend {
            kind: BackendKind::InfuraIpfs,
            base: base.into(),
            timeout,
        }
    }

    /// A node on this machine. An unreachable node declines instead of failing.
    pub fn local(base: impl Into<String>, timeout: Duration) -> Self {
        IpfsApiBackend {
            kind: BackendKind::LocalIpfs,
            base: base.into(),
            timeout,
        }
    }

    /// `<base>/api/v0/<command>`, with `args` form-encoded into the query.
    fn api_url(&self, command: &str, args: &[(&str, &str)]) -> Result<Url, BackendError> {
        let endpoint = format!("{}/api/v0/{}", self.base.trim_end_matches('/'), command);
        let mut url = Url::parse(&endpoint).map_err(|e| BackendError::Endpoint {
            base: self.base.clone(),
            reason: e.to_string(),
        })?;
        if !args.is_empty() {
            url.query_pairs_mut().extend_pairs(args);
        }
        Ok(url)
    }

    fn cat_url(&self, path: &str) -> Result<Url, BackendError> {
        self.api_url("cat", &[("arg", path)])
    }

    fn add_url(&self) -> Result<Url, BackendError> {
        self.api_url("add", &[("pin", "true")])
    }

    fn offline_declines(
        &self,
        uri: &str,
        result: Result<Vec<u8>, BackendError>,
    ) -> Result<Vec<u8>, BackendError> {
        match result {
            Err(BackendError::Network { message, .. }) if self.kind == BackendKind::LocalIpfs => {
                Err(BackendError::not_handled(self.kind, uri, message))
            }
            other => other,
        }
    }
}

impl UriBackend for IpfsApiBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn can_resolve(&self, uri: &str) -> bool {
        is_ipfs_uri(uri)
    }

    fn can_translate(&self, _uri: &str) -> bool {
        false
    }

    fn fetch(&self, uri: &str) -> Result<Vec<u8>, BackendError> {
        let path = extract_ipfs_path(uri)?;
        let url = self.cat_url(&path)?;
        debug!(backend = %self.kind, %url, "ipfs cat");

        let result = http_body(ureq::post(url.as_str()).timeout(self.timeout), url.as_str());
        self.offline_declines(uri, result)
    }

    fn pin_content(&self, content: &[u8]) -> Result<String, BackendError> {
        let url = self.add_url()?;
        debug!(backend = %self.kind, %url, size = content.len(), "ipfs add");

        let request = ureq::post(url.as_str())
            .timeout(self.timeout)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY),
            );
        let result = http_send(request, &multipart_body(content), url.as_str());
        let response = self.offline_declines(&self.base, result)?;
        let hash = parse_add_response(&response, url.as_str())?;

        // Content past one chunk is laid out by the node; only single-block
        // content can be checked here.
        if let Ok(expected) = ipfs_hash(content) {
            if expected != hash {
                return Err(HashError::IpfsMismatch {
                    expected,
                    actual: hash,
                }
                .into());
            }
        }

        let uri = create_ipfs_uri(&hash);
        info!(backend = %self.kind, %uri, "pinned content");
        Ok(uri)
    }

    fn base_locator(&self) -> &str {
        &self.base
    }
}

/// A single-file `multipart/form-data` body.
fn multipart_body(content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"; filename=\"file\"\r\n");
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    body
}

/// The hash of the last object listed. The API streams one JSON object per line.
fn parse_add_response(response: &[u8], url: &str) -> Result<String, BackendError> {
    let malformed = |reason: String| BackendError::Response {
        url: url.to_string(),
        reason,
    };
    let text = std::str::from_utf8(response).map_err(|e| malformed(e.to_string()))?;
    let line = text
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| malformed("empty add response".to_string()))?;
    let added: AddedObject = serde_json::from_str(line).map_err(|e| malformed(e.to_string()))?;
    Ok(added.hash)
}

/// A read-only HTTP gateway (`<gateway>/<hash>[/path]`).
#[derive(Debug, Clone)]
pub struct IpfsGatewayBackend {
    base: String,
    timeout: Duration,
}

impl IpfsGatewayBackend {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Self {
        IpfsGatewayBackend {
            base: base.into(),
            timeout,
        }
    }
}

impl UriBackend for IpfsGatewayBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::IpfsGateway
    }

    fn can_resolve(&self, uri: &str) -> bool {
        is_ipfs_uri(uri)
    }

    fn can_translate(&self, _uri: &str) -> bool {
        false
    }

    fn fetch(&self, uri: &str) -> Result<Vec<u8>, BackendError> {
        let path = extract_ipfs_path(uri)?;
        let url = format!("{}/{}", self.base.trim_end_matches('/'), path);
        debug!(%url, "ipfs gateway get");
        http_body(ureq::get(&url).timeout(self.timeout), &url)
    }

    fn base_locator(&self) -> &str {
        &self.base
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Deterministic in-memory IPFS store.
///
/// Clones share storage, so content pinned after the backend has been handed
/// to a dispatcher is still served.
#[derive(Debug, Clone, Default)]
pub struct FixtureBackend {
    assets: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl FixtureBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store every regular file in `dir` under its IPFS address.
    pub fn from_dir(dir: &Path) -> Result<Self, BackendError> {
        let backend = Self::new();
        let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.path());

        for entry in entries {
            if entry.file_type()?.is_file() {
                let content = fs::read(entry.path())?;
                let uri = backend.pin(&content)?;
                debug!(path = %entry.path().display(), %uri, "seeded fixture");
            }
        }
        Ok(backend)
    }

    /// Store `content` under its computed address and return its `ipfs://` URI.
    pub fn pin(&self, content: &[u8]) -> Result<String, HashError> {
        let hash = ipfs_hash(content)?;
        self.assets.write().insert(hash.clone(), content.to_vec());
        Ok(create_ipfs_uri(&hash))
    }

    /// Store `content` under `hash` (or `hash/path`) without checking it.
    pub fn insert_unchecked(&self, hash: impl Into<String>, content: Vec<u8>) {
        self.assets.write().insert(hash.into(), content);
    }

    pub fn len(&self) -> usize {
        self.assets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.read().is_empty()
    }
}

impl UriBackend for FixtureBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fixture
    }

    fn can_resolve(&self, uri: &str) -> bool {
        extract_ipfs_path(uri)
            .map(|path| self.assets.read().contains_key(&path))
            .unwrap_or(false)
    }

    fn can_translate(&self, _uri: &str) -> bool {
        false
    }

    /// Content is keyed by the full `hash[/path]`; a miss declines so another
    /// store can serve it.
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, BackendError> {
        let path = extract_ipfs_path(uri)?;
        let assets = self.assets.read();
        assets
            .get(&path)
            .cloned()
            .ok_or_else(|| BackendError::not_handled(BackendKind::Fixture, uri, "not pinned"))
    }

    fn pin_content(&self, content: &[u8]) -> Result<String, BackendError> {
        Ok(self.pin(content)?)
    }

    fn base_locator(&self) -> &str {
        "fixture://"
    }
}
