//! Programmatic manifest construction.
//!
//! ```rust,ignore
//! let manifest = ManifestBuilder::new("owned", "1.0.0")
//!     .license("MIT")
//!     .inline_source("./contracts/Owned.sol", OWNED_SOL)
//!     .contract_type("Owned", ContractType::from_compiler_output(&solc["Owned"])?)
//!     .build()?;
//! ```
//!
//! `build` runs the same validation gate as loading a manifest from bytes.
//! Sources can be uploaded while building with
//! [`pin_source`](ManifestBuilder::pin_source), and the finished manifest
//! with [`Manifest::pin_to`].

use serde_json::{Map, Value};
use tracing::debug;

use crate::backends::{BackendError, UriBackend};
use crate::hash::{ipfs_hash, HashError};
use crate::linker::LinkReference;
use crate::manifest::{BytecodeObject, ContractType, DeploymentRecord, Manifest, Meta};
use crate::uri::create_ipfs_uri;
use crate::validation::{validate_manifest, ValidationError, MANIFEST_VERSION};

#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    manifest: Manifest,
}

impl ManifestBuilder {
    pub fn new(package_name: impl Into<String>, version: impl Into<String>) -> Self {
        ManifestBuilder {
            manifest: Manifest {
                manifest_version: MANIFEST_VERSION.to_string(),
                package_name: package_name.into(),
                version: version.into(),
                meta: None,
                sources: Default::default(),
                contract_types: Default::default(),
                deployments: Default::default(),
                build_dependencies: Default::default(),
            },
        }
    }

    fn meta(&mut self) -> &mut Meta {
        self.manifest.meta.get_or_insert_with(Meta::default)
    }

    pub fn license(mut self, license: impl Into<String>) -> Self {
        self.meta().license = Some(license.into());
        self
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta().authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.meta().description = Some(description.into());
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta().keywords = Some(keywords.into_iter().map(Into::into).collect());
        self
    }

    pub fn link(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.meta()
            .links
            .get_or_insert_with(Default::default)
            .insert(name.into(), url.into());
        self
    }

    /// Add a non-standard meta key; it must start with `x-` to validate.
    pub fn meta_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta().extra.insert(key.into(), value);
        self
    }

    pub fn inline_source(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.manifest.sources.insert(path.into(), text.into());
        self
    }

    pub fn source_uri(mut self, path: impl Into<String>, uri: impl Into<String>) -> Self {
        self.manifest.sources.insert(path.into(), uri.into());
        self
    }

    /// Reference `content` by its IPFS address. Uploading it is up to the caller.
    pub fn hashed_source(self, path: impl Into<String>, content: &[u8]) -> Result<Self, HashError> {
        let uri = create_ipfs_uri(&ipfs_hash(content)?);
        Ok(self.source_uri(path, uri))
    }

    /// Store `content` through `backend` and reference it by the returned URI.
    pub fn pin_source(
        self,
        path: impl Into<String>,
        content: &[u8],
        backend: &dyn UriBackend,
    ) -> Result<Self, BackendError> {
        let path = path.into();
        let uri = backend.pin_content(content)?;
        debug!(%path, %uri, backend = %backend.kind(), "pinned source");
        Ok(self.source_uri(path, uri))
    }

    pub fn contract_type(mut self, name: impl Into<String>, contract_type: ContractType) -> Self {
        self.manifest.contract_types.insert(name.into(), contract_type);
        self
    }

    pub fn deployment(
        mut self,
        chain_uri: impl Into<String>,
        instance: impl Into<String>,
        record: DeploymentRecord,
    ) -> Self {
        self.manifest
            .deployments
            .entry(chain_uri.into())
            .or_default()
            .insert(instance.into(), record);
        self
    }

    pub fn build_dependency(mut self, name: impl Into<String>, uri: impl Into<String>) -> Self {
        self.manifest.build_dependencies.insert(name.into(), uri.into());
        self
    }

    /// Validate and return the manifest.
    pub fn build(self) -> Result<Manifest, ValidationError> {
        let raw = serde_json::to_value(&self.manifest)
            .map_err(|e| ValidationError::Json(e.to_string()))?;
        validate_manifest(&raw)
    }
}

// ============================================================================
// Compiler Output
// ============================================================================

impl ContractType {
    /// Convert one contract entry of solc standard-JSON output.
    ///
    /// Placeholders (`__$...$__`) are zeroed and `linkReferences` become
    /// [`LinkReference`]s named by library. `userdoc` and `devdoc` merge
    /// into `natspec`, devdoc winning on conflicts.
    pub fn from_compiler_output(output: &Value) -> Result<ContractType, ValidationError> {
        let evm = output.get("evm");
        let deployment_bytecode = evm
            .and_then(|e| e.get("bytecode"))
            .map(normalize_bytecode)
            .transpose()?
            .flatten();
        let runtime_bytecode = evm
            .and_then(|e| e.get("deployedBytecode"))
            .map(normalize_bytecode)
            .transpose()?
            .flatten();

        let mut natspec = Map::new();
        for doc in ["userdoc", "devdoc"] {
            if let Some(Value::Object(entries)) = output.get(doc) {
                natspec.extend(entries.clone());
            }
        }

        Ok(ContractType {
            contract_name: None,
            abi: output.get("abi").cloned(),
            natspec: (!natspec.is_empty()).then_some(Value::Object(natspec)),
            compiler: None,
            deployment_bytecode,
            runtime_bytecode,
        })
    }
}

/// `{object, linkReferences}` to a bytecode object; `None` if `object` is empty.
fn normalize_bytecode(section: &Value) -> Result<Option<BytecodeObject>, ValidationError> {
    let object = section
        .get("object")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let object = object.strip_prefix("0x").unwrap_or(object);
    if object.is_empty() {
        return Ok(None);
    }

    let link_references = match section.get("linkReferences") {
        Some(refs) => convert_link_references(refs)?,
        None => Vec::new(),
    };

    let mut digits = object.as_bytes().to_vec();
    for reference in &link_references {
        for &offset in &reference.offsets {
            let outside = || {
                ValidationError::CompilerOutput(format!(
                    "link reference '{}' at {} lies outside the bytecode",
                    reference.name, offset
                ))
            };
            let start = offset.checked_mul(2).ok_or_else(outside)?;
            let end = offset
                .checked_add(reference.length)
                .and_then(|end| end.checked_mul(2))
                .ok_or_else(outside)?;
            let slot = digits.get_mut(start..end).ok_or_else(outside)?;
            slot.fill(b'0');
        }
    }

    let bytes = hex::decode(&digits).map_err(|e| {
        ValidationError::CompilerOutput(format!("bytecode is not hex after placeholder removal: {}", e))
    })?;
    Ok(Some(BytecodeObject::from_bytes(&bytes, link_references)))
}

/// `{file: {Lib: [{start, length}]}}` to references sorted by name.
fn convert_link_references(refs: &Value) -> Result<Vec<LinkReference>, ValidationError> {
    let files = refs
        .as_object()
        .ok_or_else(|| ValidationError::CompilerOutput("linkReferences must be an object".into()))?;

    let mut converted: Vec<LinkReference> = Vec::new();
    for libraries in files.values() {
        let libraries = libraries.as_object().ok_or_else(|| {
            ValidationError::CompilerOutput("linkReferences entries must be objects".into())
        })?;
        for (name, positions) in libraries {
            let positions = positions.as_array().ok_or_else(|| {
                ValidationError::CompilerOutput(format!("positions of '{}' must be an array", name))
            })?;

            let mut offsets = Vec::with_capacity(positions.len());
            let mut length = None;
            for position in positions {
                let field = |key: &str| {
                    position
                        .get(key)
                        .and_then(Value::as_u64)
                        .and_then(|v| usize::try_from(v).ok())
                        .ok_or_else(|| {
                            ValidationError::CompilerOutput(format!(
                                "position of '{}' lacks '{}'",
                                name, key
                            ))
                        })
                };
                offsets.push(field("start")?);
                let this_length = field("length")?;
                if length.is_some_and(|l| l != this_length) {
                    return Err(ValidationError::CompilerOutput(format!(
                        "positions of '{}' disagree on length",
                        name
                    )));
                }
                length = Some(this_length);
            }
            offsets.sort_unstable();

            if let Some(length) = length {
                converted.push(LinkReference {
                    offsets,
                    length,
                    name: name.clone(),
                });
            }
        }
    }
    converted.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(converted)
}
