//! On-chain package registry (ERC-1319) lookups.
//!
//! The registry translates `erc1319://authority/name?version=v` into the
//! manifest URI recorded on chain:
//!
//! ```text
//! authority ──resolve_name──> registry address
//!     getReleaseId(bytes32 name, bytes32 version)  ──> bytes32 release id
//!     getReleaseData(bytes32 release id)           ──> (bytes32, bytes32, string uri)
//! ```
//!
//! Calls go through [`ChainQuery::call`]; payloads are encoded with the
//! `sol!` bindings below.

use std::sync::Arc;

use alloy_primitives::B256;
use alloy_sol_types::{sol, SolCall, SolValue};
use thiserror::Error;
use tracing::{debug, info};

use super::{BackendError, BackendKind, UriBackend};
use crate::address::Address;
use crate::chain::ChainQuery;
use crate::uri::{is_registry_uri, parse_registry_uri, RegistryAuthority};

sol! {
    /// Read side of an ERC-1319 package registry.
    interface PackageRegistry {
        function getReleaseId(bytes32 packageName, bytes32 version) external view returns (bytes32 releaseId);
        function getReleaseData(bytes32 releaseId) external view returns (bytes32 packageName, bytes32 version, string manifestURI);
    }
}

pub use PackageRegistry::{getReleaseDataCall, getReleaseIdCall};

const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("'{0}' does not fit in bytes32")]
    ValueTooLong(String),

    #[error("bytes32 value is not UTF-8")]
    InvalidUtf8,

    #[error("{0}")]
    Decode(String),
}

/// Decoded `getReleaseData` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseData {
    pub package_name: String,
    pub version: String,
    pub manifest_uri: String,
}

/// Right-pad `value` into a bytes32 word.
pub fn encode_bytes32(value: &str) -> Result<B256, AbiError> {
    let bytes = value.as_bytes();
    if bytes.len() > WORD {
        return Err(AbiError::ValueTooLong(value.to_string()));
    }
    Ok(B256::right_padding_from(bytes))
}

fn decode_bytes32_string(word: &B256) -> Result<String, AbiError> {
    let end = word.iter().position(|&b| b == 0).unwrap_or(WORD);
    String::from_utf8(word[..end].to_vec()).map_err(|_| AbiError::InvalidUtf8)
}

pub fn encode_get_release_id(package_name: &str, version: &str) -> Result<Vec<u8>, AbiError> {
    Ok(getReleaseIdCall {
        packageName: encode_bytes32(package_name)?,
        version: encode_bytes32(version)?,
    }
    .abi_encode())
}

pub fn encode_get_release_data(release_id: B256) -> Vec<u8> {
    getReleaseDataCall {
        releaseId: release_id,
    }
    .abi_encode()
}

pub fn decode_release_id(output: &[u8]) -> Result<B256, AbiError> {
    getReleaseIdCall::abi_decode_returns(output).map_err(|e| AbiError::Decode(e.to_string()))
}

pub fn decode_release_data(output: &[u8]) -> Result<ReleaseData, AbiError> {
    let release = getReleaseDataCall::abi_decode_returns(output)
        .map_err(|e| AbiError::Decode(e.to_string()))?;
    Ok(ReleaseData {
        package_name: decode_bytes32_string(&release.packageName)?,
        version: decode_bytes32_string(&release.version)?,
        manifest_uri: release.manifestURI,
    })
}

/// ABI-encode a `getReleaseData` return value.
pub fn encode_release_data(
    package_name: &str,
    version: &str,
    manifest_uri: &str,
) -> Result<Vec<u8>, AbiError> {
    Ok((
        encode_bytes32(package_name)?,
        encode_bytes32(version)?,
        manifest_uri.to_string(),
    )
        .abi_encode_params())
}

/// Translator from registry URIs to manifest URIs.
#[derive(Debug, Clone)]
pub struct RegistryBackend {
    chain: Arc<dyn ChainQuery>,
}

impl RegistryBackend {
    pub fn new(chain: Arc<dyn ChainQuery>) -> Self {
        RegistryBackend { chain }
    }

    fn registry_address(&self, authority: &RegistryAuthority) -> Result<Address, BackendError> {
        match authority {
            RegistryAuthority::Address(address) => Ok(*address),
            RegistryAuthority::Ens(name) => {
                let address = self.chain.resolve_name(name)?;
                debug!(ens = %name, %address, "resolved registry name");
                Ok(address)
            }
        }
    }
}

impl UriBackend for RegistryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Registry
    }

    fn can_resolve(&self, _uri: &str) -> bool {
        false
    }

    fn can_translate(&self, uri: &str) -> bool {
        is_registry_uri(uri)
    }

    /// The bytes of the translated manifest URI.
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, BackendError> {
        Ok(self.translate(uri)?.into_bytes())
    }

    fn translate(&self, uri: &str) -> Result<String, BackendError> {
        let parsed = parse_registry_uri(uri)?;
        let version = parsed.version.as_deref().ok_or_else(|| BackendError::Registry {
            uri: uri.to_string(),
            reason: "a version is required to look up a release".to_string(),
        })?;
        let registry = self.registry_address(&parsed.authority)?;

        let call = encode_get_release_id(&parsed.package_name, version)?;
        let release_id = decode_release_id(&self.chain.call(&registry, &call)?)?;
        if release_id.is_zero() {
            return Err(BackendError::Registry {
                uri: uri.to_string(),
                reason: format!(
                    "no release of {}@{} in registry {}",
                    parsed.package_name, version, registry
                ),
            });
        }

        let output = self
            .chain
            .call(&registry, &encode_get_release_data(release_id))?;
        let release = decode_release_data(&output)?;
        info!(%uri, manifest_uri = %release.manifest_uri, "registry release found");
        Ok(release.manifest_uri)
    }

    fn base_locator(&self) -> &str {
        "erc1319://"
    }
}
