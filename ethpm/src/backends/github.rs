//! Raw GitHub content, verified against the git blob id in the URI fragment.

use std::time::Duration;

use tracing::debug;

use super::{http_body, BackendError, BackendKind, UriBackend};
use crate::hash::verify_git_blob_hash;
use crate::uri::{github_blob_parts, is_github_blob_uri};

#[derive(Debug, Clone)]
pub struct GithubBlobBackend {
    timeout: Duration,
}

impl GithubBlobBackend {
    pub fn new(timeout: Duration) -> Self {
        GithubBlobBackend { timeout }
    }
}

impl UriBackend for GithubBlobBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::GithubBlob
    }

    fn can_resolve(&self, uri: &str) -> bool {
        is_github_blob_uri(uri)
    }

    fn can_translate(&self, _uri: &str) -> bool {
        false
    }

    fn fetch(&self, uri: &str) -> Result<Vec<u8>, BackendError> {
        let (url, blob_hash) = github_blob_parts(uri)?;
        debug!(%url, "github raw get");
        let content = http_body(ureq::get(&url).timeout(self.timeout), &url)?;
        verify_git_blob_hash(&content, &blob_hash)?;
        Ok(content)
    }

    fn base_locator(&self) -> &str {
        "https://raw.githubusercontent.com"
    }
}
