//! # Backend Dispatch
//!
//! Resolves a URI to bytes through an ordered list of backends.
//!
//! ```text
//! resolve(uri)
//!   │
//!   ├─ resolvable backends (default kind first, then registration order)
//!   │     fetch ── Ok ──────────────> bytes
//!   │        └── NotHandled ──> next backend
//!   │        └── other error ──> fail
//!   │
//!   ├─ translatable backends (only at depth 0)
//!   │     translate ──> uri' ──> resolve(uri') at depth 1
//!   │
//!   └─ CannotHandleUri
//! ```
//!
//! A translated URI must itself be resolvable; a second translation is a
//! configuration error and fails with [`ResolveError::TranslationDepthExceeded`].

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backends::{
    BackendError, BackendKind, FixtureBackend, GithubBlobBackend, IpfsApiBackend,
    IpfsGatewayBackend, RegistryBackend, UriBackend,
};
use crate::chain::ChainQuery;
use crate::config::{Config, ConfigError};
use crate::hash::{verify_git_blob_hash, verify_ipfs_hash, HashError};
use crate::uri::{extract_ipfs_path, github_blob_parts, is_github_blob_uri, is_ipfs_uri};

/// Number of registry hops allowed before content must be reached.
pub const MAX_TRANSLATION_DEPTH: usize = 1;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no backend can handle URI '{0}'")]
    CannotHandleUri(String),

    #[error("'{uri}' needs more than {limit} translation hop(s); chained registries are not supported")]
    TranslationDepthExceeded { uri: String, limit: usize },

    #[error("{backend} backend failed on '{uri}': {source}")]
    Backend {
        backend: BackendKind,
        uri: String,
        #[source]
        source: BackendError,
    },

    #[error("content fetched for '{uri}' failed verification: {source}")]
    Verification {
        uri: String,
        #[source]
        source: HashError,
    },
}

/// The process-wide backend registry. Read-only once built.
#[derive(Debug)]
pub struct BackendDispatcher {
    backends: Vec<Box<dyn UriBackend>>,
    default_kind: BackendKind,
}

impl BackendDispatcher {
    /// An empty dispatcher that prefers `default_kind`.
    pub fn new(default_kind: BackendKind) -> Self {
        BackendDispatcher {
            backends: Vec::new(),
            default_kind,
        }
    }

    /// The standard backend set for `config`.
    ///
    /// The registry backend is only available when a chain is supplied.
    pub fn from_config(
        config: &Config,
        chain: Option<Arc<dyn ChainQuery>>,
    ) -> Result<Self, ConfigError> {
        let timeout = config.http_timeout;
        let mut dispatcher = Self::new(config.default_backend);

        dispatcher.register(IpfsApiBackend::infura(config.infura_api.clone(), timeout));
        if let Some(dir) = &config.fixture_dir {
            let fixture = FixtureBackend::from_dir(dir).map_err(|e| ConfigError::Fixture {
                path: dir.clone(),
                reason: e.to_string(),
            })?;
            dispatcher.register(fixture);
        }
        dispatcher.register(IpfsApiBackend::local(config.local_ipfs_api.clone(), timeout));
        dispatcher.register(IpfsGatewayBackend::new(config.ipfs_gateway.clone(), timeout));
        dispatcher.register(GithubBlobBackend::new(timeout));
        if let Some(chain) = chain {
            dispatcher.register(RegistryBackend::new(chain));
        }

        debug!(
            default = %dispatcher.default_kind,
            backends = dispatcher.backends.len(),
            "backend dispatcher configured"
        );
        Ok(dispatcher)
    }

    pub fn register(&mut self, backend: impl UriBackend + 'static) -> &mut Self {
        self.backends.push(Box::new(backend));
        self
    }

    pub fn with_backend(mut self, backend: impl UriBackend + 'static) -> Self {
        self.register(backend);
        self
    }

    pub fn default_kind(&self) -> BackendKind {
        self.default_kind
    }

    /// Backends that claim `uri` as resolvable, default kind first.
    pub fn resolvable_backends(&self, uri: &str) -> Vec<&dyn UriBackend> {
        self.ordered(|b| b.can_resolve(uri))
    }

    /// Backends that claim `uri` as translatable, default kind first.
    pub fn translatable_backends(&self, uri: &str) -> Vec<&dyn UriBackend> {
        self.ordered(|b| b.can_translate(uri))
    }

    fn ordered(&self, claims: impl Fn(&dyn UriBackend) -> bool) -> Vec<&dyn UriBackend> {
        let (mut preferred, rest): (Vec<&dyn UriBackend>, Vec<&dyn UriBackend>) = self
            .backends
            .iter()
            .map(|b| b.as_ref())
            .filter(|b| claims(*b))
            .partition(|b| b.kind() == self.default_kind);
        preferred.extend(rest);
        preferred
    }

    /// Fetch the bytes `uri` names.
    pub fn resolve(&self, uri: &str) -> Result<Vec<u8>, ResolveError> {
        self.resolve_at_depth(uri, 0).map(|(content, _)| content)
    }

    /// [`resolve`](Self::resolve), then check the bytes against the digest
    /// carried by the content URI that was finally fetched.
    pub fn fetch_and_verify(&self, uri: &str) -> Result<Vec<u8>, ResolveError> {
        let (content, content_uri) = self.resolve_at_depth(uri, 0)?;
        verify_content(&content_uri, &content)?;
        Ok(content)
    }

    /// Returns the content and the URI it was fetched under.
    fn resolve_at_depth(&self, uri: &str, depth: usize) -> Result<(Vec<u8>, String), ResolveError> {
        for backend in self.resolvable_backends(uri) {
            debug!(backend = %backend.kind(), %uri, "fetching");
            match backend.fetch(uri) {
                Ok(content) => return Ok((content, uri.to_string())),
                Err(e) if e.is_not_handled() => {
                    debug!(backend = %backend.kind(), %uri, reason = %e, "backend declined, trying next");
                }
                Err(source) => {
                    return Err(ResolveError::Backend {
                        backend: backend.kind(),
                        uri: uri.to_string(),
                        source,
                    })
                }
            }
        }

        let translators = self.translatable_backends(uri);
        if translators.is_empty() {
            return Err(ResolveError::CannotHandleUri(uri.to_string()));
        }
        if depth >= MAX_TRANSLATION_DEPTH {
            warn!(%uri, "translated URI is itself a registry URI");
            return Err(ResolveError::TranslationDepthExceeded {
                uri: uri.to_string(),
                limit: MAX_TRANSLATION_DEPTH,
            });
        }

        for backend in translators {
            match backend.translate(uri) {
                Ok(next) => {
                    info!(backend = %backend.kind(), from = %uri, to = %next, "translated URI");
                    return self.resolve_at_depth(&next, depth + 1);
                }
                Err(e) if e.is_not_handled() => {
                    debug!(backend = %backend.kind(), %uri, reason = %e, "translator declined, trying next");
                }
                Err(source) => {
                    return Err(ResolveError::Backend {
                        backend: backend.kind(),
                        uri: uri.to_string(),
                        source,
                    })
                }
            }
        }

        Err(ResolveError::CannotHandleUri(uri.to_string()))
    }
}

/// Check `content` against the digest embedded in `uri`.
///
/// IPFS URIs with a sub-path name a file inside a directory whose hash
/// covers the directory node, so only bare-hash URIs are checked locally.
pub fn verify_content(uri: &str, content: &[u8]) -> Result<(), ResolveError> {
    let verification = |source| ResolveError::Verification {
        uri: uri.to_string(),
        source,
    };

    if is_ipfs_uri(uri) {
        let path = extract_ipfs_path(uri).map_err(|_| ResolveError::CannotHandleUri(uri.to_string()))?;
        if path.contains('/') {
            debug!(%uri, "sub-path IPFS content is not verified locally");
            return Ok(());
        }
        verify_ipfs_hash(content, &path).map_err(verification)?;
    } else if is_github_blob_uri(uri) {
        let (_, blob_hash) =
            github_blob_parts(uri).map_err(|_| ResolveError::CannotHandleUri(uri.to_string()))?;
        verify_git_blob_hash(content, &blob_hash).map_err(verification)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records fetch order into a shared log.
    #[derive(Debug)]
    struct Scripted {
        kind: BackendKind,
        declines: bool,
        log: Arc<Mutex<Vec<BackendKind>>>,
    }

    impl UriBackend for Scripted {
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
            self.log.lock().push(self.kind);
            if self.declines {
                Err(BackendError::not_handled(self.kind, uri, "scripted"))
            } else {
                Ok(self.kind.name().as_bytes().to_vec())
            }
        }

        fn base_locator(&self) -> &str {
            "scripted://"
        }
    }

    /// Translates every registry URI to a fixed target.
    #[derive(Debug)]
    struct Redirect(String);

    impl UriBackend for Redirect {
        fn kind(&self) -> BackendKind {
            BackendKind::Registry
        }

        fn can_resolve(&self, _uri: &str) -> bool {
            false
        }

        fn can_translate(&self, uri: &str) -> bool {
            uri.starts_with("erc1319://")
        }

        fn fetch(&self, uri: &str) -> Result<Vec<u8>, BackendError> {
            Ok(self.translate(uri)?.into_bytes())
        }

        fn translate(&self, _uri: &str) -> Result<String, BackendError> {
            Ok(self.0.clone())
        }

        fn base_locator(&self) -> &str {
            "redirect://"
        }
    }

    const URI: &str = "ipfs://QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o";

    fn scripted(kind: BackendKind, declines: bool, log: &Arc<Mutex<Vec<BackendKind>>>) -> Scripted {
        Scripted {
            kind,
            declines,
            log: Arc::clone(log),
        }
    }

    #[test]
    fn test_default_backend_is_tried_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = BackendDispatcher::new(BackendKind::IpfsGateway)
            .with_backend(scripted(BackendKind::InfuraIpfs, false, &log))
            .with_backend(scripted(BackendKind::IpfsGateway, false, &log));

        assert_eq!(dispatcher.resolve(URI).unwrap(), b"gateway");
        assert_eq!(*log.lock(), vec![BackendKind::IpfsGateway]);
    }

    #[test]
    fn test_declining_default_falls_back() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = BackendDispatcher::new(BackendKind::LocalIpfs)
            .with_backend(scripted(BackendKind::InfuraIpfs, false, &log))
            .with_backend(scripted(BackendKind::LocalIpfs, true, &log));

        assert_eq!(dispatcher.resolve(URI).unwrap(), b"infura");
        assert_eq!(
            *log.lock(),
            vec![BackendKind::LocalIpfs, BackendKind::InfuraIpfs]
        );
    }

    #[test]
    fn test_all_declining_is_unhandled() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = BackendDispatcher::new(BackendKind::LocalIpfs)
            .with_backend(scripted(BackendKind::LocalIpfs, true, &log));

        assert!(matches!(
            dispatcher.resolve(URI),
            Err(ResolveError::CannotHandleUri(_))
        ));
        assert!(matches!(
            dispatcher.resolve("https://example.com/owned.json"),
            Err(ResolveError::CannotHandleUri(_))
        ));
    }

    #[test]
    fn test_sub_path_falls_through_to_store_holding_it() {
        let primary = FixtureBackend::new();
        let root = primary.pin(b"hello world\n").unwrap();
        let secondary = FixtureBackend::new();
        let hash = root.trim_start_matches("ipfs://");
        secondary.insert_unchecked(format!("{}/owned.json", hash), b"{}".to_vec());

        let dispatcher = BackendDispatcher::new(BackendKind::Fixture)
            .with_backend(primary)
            .with_backend(secondary);
        let nested = format!("{}/owned.json", root);

        assert_eq!(dispatcher.resolvable_backends(&nested).len(), 1);
        assert_eq!(dispatcher.fetch_and_verify(&nested).unwrap(), b"{}");
        assert_eq!(dispatcher.resolve(&root).unwrap(), b"hello world\n");
    }

    #[test]
    fn test_fetch_and_verify_rejects_tampered_content() {
        let fixture = FixtureBackend::new();
        let hash = "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o";
        fixture.insert_unchecked(hash, b"tampered".to_vec());
        let dispatcher = BackendDispatcher::new(BackendKind::Fixture).with_backend(fixture);

        // Plain resolve does not check content.
        assert_eq!(dispatcher.resolve(URI).unwrap(), b"tampered");
        assert!(matches!(
            dispatcher.fetch_and_verify(URI),
            Err(ResolveError::Verification { .. })
        ));
    }

    #[test]
    fn test_translation_single_hop() {
        let fixture = FixtureBackend::new();
        let target = fixture.pin(b"hello world\n").unwrap();
        let dispatcher = BackendDispatcher::new(BackendKind::Fixture)
            .with_backend(fixture)
            .with_backend(Redirect(target));

        assert_eq!(
            dispatcher
                .fetch_and_verify("erc1319://packages.eth/owned?version=1.0.0")
                .unwrap(),
            b"hello world\n"
        );
    }

    #[test]
    fn test_translation_chain_is_rejected() {
        let dispatcher = BackendDispatcher::new(BackendKind::Fixture).with_backend(Redirect(
            "erc1319://other.eth/owned?version=1.0.0".to_string(),
        ));

        assert!(matches!(
            dispatcher.resolve("erc1319://packages.eth/owned?version=1.0.0"),
            Err(ResolveError::TranslationDepthExceeded { limit: 1, .. })
        ));
    }

    #[test]
    fn test_from_config_registration_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("owned.json"), b"hello world\n").unwrap();
        let config = Config {
            default_backend: BackendKind::Fixture,
            fixture_dir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };

        let dispatcher = BackendDispatcher::from_config(&config, None).unwrap();
        let kinds: Vec<BackendKind> = dispatcher
            .resolvable_backends(URI)
            .iter()
            .map(|b| b.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                BackendKind::Fixture,
                BackendKind::InfuraIpfs,
                BackendKind::LocalIpfs,
                BackendKind::IpfsGateway,
            ]
        );
        assert!(dispatcher
            .translatable_backends("erc1319://packages.eth/owned?version=1.0.0")
            .is_empty());
        assert_eq!(dispatcher.fetch_and_verify(URI).unwrap(), b"hello world\n");
    }

    #[test]
    fn test_verify_content() {
        assert!(verify_content(URI, b"hello world\n").is_ok());
        assert!(verify_content(URI, b"hello").is_err());
        // Sub-paths cannot be checked against the root hash.
        assert!(verify_content(&format!("{}/owned.json", URI), b"anything").is_ok());

        let blob = "https://raw.githubusercontent.com/ethpm/a.json#3b18e512dba79e4c8300dd08aeb37f8e728b8dad";
        assert!(verify_content(blob, b"hello world\n").is_ok());
        assert!(matches!(
            verify_content(blob, b"hello"),
            Err(ResolveError::Verification { .. })
        ));
    }
}
