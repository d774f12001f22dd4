//! Typed view of a v2 package manifest.
//!
//! Maps are `BTreeMap`s so that serializing a manifest is deterministic and
//! [`Manifest::to_canonical_json`] can be content-addressed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::address::Address;
use crate::backends::{BackendError, UriBackend};
use crate::chain::B256;
use crate::hash::{ipfs_hash, HashError};
use crate::linker::LinkReference;
use crate::uri::create_ipfs_uri;

/// The root manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub manifest_version: String,
    pub package_name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    /// Relative path to inline source text or a content-addressed URI.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contract_types: BTreeMap<String, ContractType>,

    /// Chain URI -> instance name -> record.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deployments: BTreeMap<String, BTreeMap<String, DeploymentRecord>>,

    /// Dependency name -> content-addressed manifest URI.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub build_dependencies: BTreeMap<String, String>,
}

/// Package metadata. Unrecognized keys must carry the `x-` prefix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natspec: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler: Option<CompilerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_bytecode: Option<BytecodeObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_bytecode: Option<BytecodeObject>,
}

impl ContractType {
    /// Whether the type carries what a deployable factory needs.
    pub fn is_deployable(&self) -> bool {
        self.abi.is_some()
            && self
                .deployment_bytecode
                .as_ref()
                .is_some_and(|b| b.bytecode.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
}

/// Hex bytecode plus the placeholder regions still to be linked, or the
/// values a deployed instance was linked with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytecodeObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytecode: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link_references: Vec<LinkReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link_dependencies: Vec<LinkValue>,
}

impl BytecodeObject {
    pub fn from_bytes(bytes: &[u8], link_references: Vec<LinkReference>) -> Self {
        BytecodeObject {
            bytecode: Some(format!("0x{}", hex::encode(bytes))),
            link_references,
            link_dependencies: Vec::new(),
        }
    }

    /// Decode the hex bytecode, `None` when the object carries none.
    pub fn decode(&self) -> Result<Option<Vec<u8>>, String> {
        let Some(bytecode) = &self.bytecode else {
            return Ok(None);
        };
        let digits = bytecode.strip_prefix("0x").unwrap_or(bytecode);
        hex::decode(digits).map(Some).map_err(|e| e.to_string())
    }
}

/// The value a deployed instance was linked with at `offsets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkValue {
    pub offsets: Vec<usize>,
    #[serde(rename = "type")]
    pub kind: LinkValueKind,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkValueKind {
    /// A hex address.
    Literal,
    /// An instance name, possibly `dependency:instance`.
    Reference,
}

/// A contract instance deployed on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub contract_type: String,
    #[serde(with = "crate::address::checksummed")]
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_bytecode: Option<BytecodeObject>,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error("failed to pin manifest: {0}")]
    Pin(#[from] BackendError),
}

impl Manifest {
    /// Compact JSON with sorted keys at every level.
    pub fn to_canonical_json(&self) -> Result<String, ManifestError> {
        let value = sort_keys(serde_json::to_value(self)?);
        Ok(serde_json::to_string(&value)?)
    }

    /// The `ipfs://` URI of the canonical serialization.
    pub fn content_uri(&self) -> Result<String, ManifestError> {
        let json = self.to_canonical_json()?;
        Ok(create_ipfs_uri(&ipfs_hash(json.as_bytes())?))
    }

    /// Store the canonical serialization through `backend`; returns the
    /// URI a dependent manifest can list as a build dependency.
    pub fn pin_to(&self, backend: &dyn UriBackend) -> Result<String, ManifestError> {
        let json = self.to_canonical_json()?;
        let uri = backend.pin_content(json.as_bytes())?;
        info!(package = %self.package_name, version = %self.version, %uri, "pinned manifest");
        Ok(uri)
    }
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
