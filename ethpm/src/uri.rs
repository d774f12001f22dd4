//! URI classification for the addressing schemes a package can live at.
//!
//! ```text
//! ipfs://QmHash[/path]                                   content-addressed
//! https://raw.githubusercontent.com/<path>#<blob sha1>   hash-verified mirror
//! erc1319://<ens name | checksum address>/<name>?version=<v>   registry
//! ```
//!
//! The scheme alone decides which backend family may claim a URI.

use std::fmt;

use thiserror::Error;
use url::Url;

use crate::address::{is_checksum_address, parse_address, Address};
use crate::validation::is_valid_package_name;

pub const IPFS_SCHEME: &str = "ipfs";
pub const REGISTRY_URI_SCHEME: &str = "erc1319";
pub const GITHUB_RAW_AUTHORITY: &str = "raw.githubusercontent.com";

/// Top-level label of ENS names accepted as registry authorities.
const ENS_TLD: &str = "eth";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriError {
    #[error("'{uri}' is not a valid {kind} URI: {reason}")]
    Invalid {
        uri: String,
        kind: &'static str,
        reason: String,
    },
}

impl UriError {
    fn invalid(uri: &str, kind: &'static str, reason: impl Into<String>) -> Self {
        UriError::Invalid {
            uri: uri.to_string(),
            kind,
            reason: reason.into(),
        }
    }
}

/// Split `scheme://rest`, matching the scheme case-insensitively.
fn strip_scheme<'a>(uri: &'a str, scheme: &str) -> Option<&'a str> {
    let (found, rest) = uri.split_once("://")?;
    found.eq_ignore_ascii_case(scheme).then_some(rest)
}

// ============================================================================
// IPFS
// ============================================================================

pub fn is_ipfs_uri(uri: &str) -> bool {
    extract_ipfs_path(uri).is_ok()
}

/// The `hash[/path]` part of an IPFS URI, without trailing slashes.
pub fn extract_ipfs_path(uri: &str) -> Result<String, UriError> {
    let rest = strip_scheme(uri, IPFS_SCHEME)
        .ok_or_else(|| UriError::invalid(uri, "IPFS", "scheme must be ipfs://"))?;
    let path = rest.trim_end_matches('/');
    let hash = path.split('/').next().unwrap_or_default();
    if hash.is_empty() {
        return Err(UriError::invalid(uri, "IPFS", "missing content hash"));
    }
    if path.contains(['?', '#']) {
        return Err(UriError::invalid(uri, "IPFS", "query and fragment are not allowed"));
    }
    Ok(path.to_string())
}

pub fn create_ipfs_uri(hash: &str) -> String {
    format!("{}://{}", IPFS_SCHEME, hash)
}

// ============================================================================
// GitHub blobs
// ============================================================================

pub fn is_github_blob_uri(uri: &str) -> bool {
    github_blob_parts(uri).is_ok()
}

/// Split a GitHub blob URI into its fetchable URL and expected blob hash.
pub fn github_blob_parts(uri: &str) -> Result<(String, String), UriError> {
    let mut parsed =
        Url::parse(uri).map_err(|e| UriError::invalid(uri, "GitHub blob", e.to_string()))?;

    if parsed.scheme() != "https" {
        return Err(UriError::invalid(uri, "GitHub blob", "scheme must be https"));
    }
    if parsed.host_str() != Some(GITHUB_RAW_AUTHORITY) {
        return Err(UriError::invalid(
            uri,
            "GitHub blob",
            format!("authority must be {}", GITHUB_RAW_AUTHORITY),
        ));
    }
    if parsed.path().trim_matches('/').is_empty() {
        return Err(UriError::invalid(uri, "GitHub blob", "missing file path"));
    }

    let digest = parsed
        .fragment()
        .filter(|f| f.len() == 40 && f.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_string)
        .ok_or_else(|| {
            UriError::invalid(uri, "GitHub blob", "fragment must be a 40-character blob hash")
        })?;

    parsed.set_fragment(None);
    Ok((parsed.to_string(), digest))
}

// ============================================================================
// Registry
// ============================================================================

/// Where a registry contract lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryAuthority {
    Ens(String),
    Address(Address),
}

impl fmt::Display for RegistryAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryAuthority::Ens(name) => f.write_str(name),
            RegistryAuthority::Address(address) => write!(f, "{}", address),
        }
    }
}

/// A parsed `erc1319://authority/name?version=v` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryUri {
    pub authority: RegistryAuthority,
    pub package_name: String,
    pub version: Option<String>,
}

impl fmt::Display for RegistryUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{}",
            REGISTRY_URI_SCHEME, self.authority, self.package_name
        )?;
        if let Some(version) = &self.version {
            write!(f, "?version={}", version)?;
        }
        Ok(())
    }
}

/// Whether `authority` is an ENS name under `.eth` with two or three labels.
pub fn is_ens_domain(authority: &str) -> bool {
    let labels: Vec<&str> = authority.split('.').collect();
    (2..=3).contains(&labels.len())
        && labels.last() == Some(&ENS_TLD)
        && labels.iter().all(|l| !l.is_empty())
}

pub fn is_registry_uri(uri: &str) -> bool {
    parse_registry_uri(uri).is_ok()
}

pub fn parse_registry_uri(uri: &str) -> Result<RegistryUri, UriError> {
    const KIND: &str = "registry";

    let rest = strip_scheme(uri, REGISTRY_URI_SCHEME)
        .ok_or_else(|| UriError::invalid(uri, KIND, "scheme must be erc1319://"))?;
    if rest.contains('#') {
        return Err(UriError::invalid(uri, KIND, "fragments are not allowed"));
    }

    let (location, query) = match rest.split_once('?') {
        Some((location, query)) => (location, Some(query)),
        None => (rest, None),
    };
    let (authority, path) = location.split_once('/').unwrap_or((location, ""));

    let authority = if is_ens_domain(authority) {
        RegistryAuthority::Ens(authority.to_string())
    } else if is_checksum_address(authority) {
        RegistryAuthority::Address(
            parse_address(authority).map_err(|e| UriError::invalid(uri, KIND, e.to_string()))?,
        )
    } else {
        return Err(UriError::invalid(
            uri,
            KIND,
            format!(
                "authority '{}' is neither an ENS name nor a checksummed address",
                authority
            ),
        ));
    };

    let package_name = path.trim_end_matches('/');
    if !is_valid_package_name(package_name) {
        return Err(UriError::invalid(
            uri,
            KIND,
            format!("invalid package name '{}'", package_name),
        ));
    }

    let version = match query {
        Some(query) => {
            let version = url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "version")
                .map(|(_, value)| value.into_owned())
                .ok_or_else(|| UriError::invalid(uri, KIND, "query must carry version="))?;
            if version.is_empty() {
                return Err(UriError::invalid(uri, KIND, "version is empty"));
            }
            Some(version)
        }
        None => None,
    };

    Ok(RegistryUri {
        authority,
        package_name: package_name.to_string(),
        version,
    })
}

/// Whether `uri` names content by its hash (IPFS or GitHub blob).
pub fn is_supported_content_addressed_uri(uri: &str) -> bool {
    is_ipfs_uri(uri) || is_github_blob_uri(uri)
}
