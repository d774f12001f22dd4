//! URI backends.
//!
//! Each backend claims URIs by scheme and either fetches bytes for them
//! (resolvable) or maps them to another URI (translatable):
//!
//! ```text
//!                      ┌─ IpfsApiBackend (Infura, local node) ─┐
//! ipfs://Qm...  ───────┼─ IpfsGatewayBackend                   ├──> bytes
//!                      └─ FixtureBackend                       ┘
//! https://raw...#sha1 ──── GithubBlobBackend ──────────────────────> bytes
//! erc1319://...  ───────── RegistryBackend ────────────────────────> ipfs://...
//! ```
//!
//! A backend that is asked for something it cannot serve returns
//! [`BackendError::NotHandled`]; the dispatcher moves on to the next
//! candidate. Every other error is final.

pub mod github;
pub mod ipfs;
pub mod registry;

pub use github::GithubBlobBackend;
pub use ipfs::{FixtureBackend, IpfsApiBackend, IpfsGatewayBackend};
pub use registry::{AbiError, RegistryBackend, ReleaseData};

use std::fmt;
use std::io::Read;

use thiserror::Error;

use crate::chain::ChainError;
use crate::hash::HashError;
use crate::uri::UriError;

/// Upper bound on a single HTTP response body.
const MAX_RESPONSE_BYTES: u64 = 64 * 1024 * 1024;

/// Identity of a backend implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    InfuraIpfs,
    IpfsGateway,
    LocalIpfs,
    Fixture,
    GithubBlob,
    Registry,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::InfuraIpfs => "infura",
            BackendKind::IpfsGateway => "gateway",
            BackendKind::LocalIpfs => "local",
            BackendKind::Fixture => "fixture",
            BackendKind::GithubBlob => "github",
            BackendKind::Registry => "registry",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// Recoverable: the dispatcher tries the next backend.
    #[error("{backend} backend cannot handle '{uri}': {reason}")]
    NotHandled {
        backend: BackendKind,
        uri: String,
        reason: String,
    },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("invalid endpoint '{base}': {reason}")]
    Endpoint { base: String, reason: String },

    #[error("unexpected response from {url}: {reason}")]
    Response { url: String, reason: String },

    #[error("no content stored for '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Uri(#[from] UriError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error("registry lookup for '{uri}' failed: {reason}")]
    Registry { uri: String, reason: String },

    #[error("malformed registry response: {0}")]
    Abi(#[from] AbiError),

    #[error("chain query failed: {0}")]
    Chain(#[from] ChainError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub fn not_handled(backend: BackendKind, uri: &str, reason: impl Into<String>) -> Self {
        BackendError::NotHandled {
            backend,
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_not_handled(&self) -> bool {
        matches!(self, BackendError::NotHandled { .. })
    }
}

/// Capability contract shared by every backend.
pub trait UriBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Whether `fetch` yields the content `uri` names.
    fn can_resolve(&self, uri: &str) -> bool;

    /// Whether `translate` maps `uri` to another URI.
    fn can_translate(&self, uri: &str) -> bool;

    fn fetch(&self, uri: &str) -> Result<Vec<u8>, BackendError>;

    fn translate(&self, uri: &str) -> Result<String, BackendError> {
        Err(BackendError::not_handled(
            self.kind(),
            uri,
            "backend does not translate URIs",
        ))
    }

    /// Store `content` and return the content URI it is reachable under.
    fn pin_content(&self, _content: &[u8]) -> Result<String, BackendError> {
        Err(BackendError::not_handled(
            self.kind(),
            self.base_locator(),
            "backend does not store content",
        ))
    }

    /// Where this backend fetches from.
    fn base_locator(&self) -> &str;
}

/// Send a request and read the whole body.
pub(crate) fn http_body(request: ureq::Request, url: &str) -> Result<Vec<u8>, BackendError> {
    read_body(request.call(), url)
}

/// Send `body` with a request and read the whole response body.
pub(crate) fn http_send(
    request: ureq::Request,
    body: &[u8],
    url: &str,
) -> Result<Vec<u8>, BackendError> {
    read_body(request.send_bytes(body), url)
}

fn read_body(
    result: Result<ureq::Response, ureq::Error>,
    url: &str,
) -> Result<Vec<u8>, BackendError> {
    let response = result.map_err(|e| match e {
        ureq::Error::Status(status, _) => BackendError::Http {
            url: url.to_string(),
            status,
        },
        ureq::Error::Transport(transport) => BackendError::Network {
            url: url.to_string(),
            message: transport.to_string(),
        },
    })?;

    let mut body = Vec::new();
    response
        .into_reader()
        .take(MAX_RESPONSE_BYTES)
        .read_to_end(&mut body)
        .map_err(|e| BackendError::Network {
            url: url.to_string(),
            message: format!("failed to read response: {}", e),
        })?;
    Ok(body)
}
