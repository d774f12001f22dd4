//! # Packages
//!
//! A [`Package`] is a validated manifest bound to a backend dispatcher and,
//! optionally, a chain.
//!
//! ```text
//!               ┌──────────── Package ────────────┐
//! bytes/URI ──> │ Manifest (validated once)       │
//!               │ dispatcher ──> build deps (lazy)│──> Dependencies
//!               │ chain ───────> deployments (lazy)──> Deployments
//!               └─────────────────────────────────┘
//!                        │
//!                        ├─ contract_factory / link_factory
//!                        └─ contract_instance / deployed_instance
//! ```
//!
//! Both lazy views are cached together. [`Package::rebind_chain`] replaces
//! the cache in one assignment, so nothing matched against a previous chain
//! survives the switch.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::address::Address;
use crate::chain::{ChainError, ChainQuery};
use crate::contract::{ContractFactory, ContractInstance};
use crate::dependencies::Dependencies;
use crate::deployments::{
    select_matching_chain_uri, validate_deployment_receipt, verify_link_dependencies,
    DeploymentError, Deployments,
};
use crate::dispatch::{BackendDispatcher, ResolveError};
use crate::linker::{resolve_nested, LinkContext, LinkError};
use crate::manifest::{DeploymentRecord, Manifest};
use crate::uri::is_supported_content_addressed_uri;
use crate::validation::{
    validate_contract_name, validate_manifest, validate_package_name, ValidationError,
};

#[derive(Debug, Error)]
pub enum PackageError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to fetch manifest from '{uri}': {source}")]
    Fetch {
        uri: String,
        #[source]
        source: ResolveError,
    },

    #[error("contract type '{0}' not found in package")]
    ContractNotFound(String),

    #[error("contract type '{name}' has insufficient assets: missing {missing}")]
    InsufficientAssets { name: String, missing: &'static str },

    #[error("failed to fetch build dependency '{name}': {source}")]
    BuildDependency {
        name: String,
        #[source]
        source: Box<PackageError>,
    },

    #[error("build dependency '{0}' not found")]
    DependencyNotFound(String),

    #[error("package '{0}' is not bound to a chain")]
    NoChain(String),

    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Lazily built views that depend on the bound chain.
#[derive(Debug, Default)]
struct PackageCache {
    dependencies: OnceCell<Dependencies>,
    deployments: OnceCell<Deployments>,
}

#[derive(Debug)]
pub struct Package {
    manifest: Manifest,
    uri: Option<String>,
    dispatcher: Arc<BackendDispatcher>,
    chain: Option<Arc<dyn ChainQuery>>,
    cache: PackageCache,
}

impl Package {
    /// Validate a raw manifest value.
    pub fn from_value(raw: &Value, dispatcher: Arc<BackendDispatcher>) -> Result<Self, PackageError> {
        let manifest = validate_manifest(raw)?;
        debug!(package = %manifest.package_name, version = %manifest.version, "manifest validated");
        Ok(Package {
            manifest,
            uri: None,
            dispatcher,
            chain: None,
            cache: PackageCache::default(),
        })
    }

    /// Parse and validate manifest bytes.
    pub fn from_bytes(bytes: &[u8], dispatcher: Arc<BackendDispatcher>) -> Result<Self, PackageError> {
        let raw: Value =
            serde_json::from_slice(bytes).map_err(|e| ValidationError::Json(e.to_string()))?;
        Self::from_value(&raw, dispatcher)
    }

    /// Fetch, verify and validate the manifest at `uri`.
    pub fn from_uri(uri: &str, dispatcher: Arc<BackendDispatcher>) -> Result<Self, PackageError> {
        let bytes = dispatcher
            .fetch_and_verify(uri)
            .map_err(|source| PackageError::Fetch {
                uri: uri.to_string(),
                source,
            })?;
        let mut package = Self::from_bytes(&bytes, dispatcher)?;
        package.uri = Some(uri.to_string());
        Ok(package)
    }

    /// Bind to `chain`, consuming the package.
    pub fn with_chain(mut self, chain: Arc<dyn ChainQuery>) -> Self {
        self.rebind_chain(chain);
        self
    }

    /// Switch chains, discarding dependencies and deployments matched so far.
    pub fn rebind_chain(&mut self, chain: Arc<dyn ChainQuery>) {
        self.chain = Some(chain);
        self.cache = PackageCache::default();
        info!(package = %self.manifest.package_name, "chain rebound, caches cleared");
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn name(&self) -> &str {
        &self.manifest.package_name
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// The URI this package was loaded from, if any.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn chain(&self) -> Option<&Arc<dyn ChainQuery>> {
        self.chain.as_ref()
    }

    pub fn dispatcher(&self) -> &Arc<BackendDispatcher> {
        &self.dispatcher
    }

    // ========================================================================
    // Contract types
    // ========================================================================

    /// A deployable factory for contract type `name`.
    ///
    /// Needs both `abi` and `deployment_bytecode.bytecode`.
    pub fn contract_factory(&self, name: &str) -> Result<ContractFactory, PackageError> {
        validate_contract_name(name)?;
        let contract_type = self
            .manifest
            .contract_types
            .get(name)
            .ok_or_else(|| PackageError::ContractNotFound(name.to_string()))?;

        let insufficient = |missing| PackageError::InsufficientAssets {
            name: name.to_string(),
            missing,
        };
        let abi = contract_type.abi.clone().ok_or_else(|| insufficient("abi"))?;
        let deployment = contract_type
            .deployment_bytecode
            .as_ref()
            .ok_or_else(|| insufficient("deployment_bytecode"))?;
        let bytecode = decode_bytecode(name, "deployment", deployment.decode())?
            .ok_or_else(|| insufficient("deployment_bytecode.bytecode"))?;

        let mut factory = ContractFactory::new(name, abi, bytecode)
            .with_link_references(deployment.link_references.clone());
        if let Some(runtime) = &contract_type.runtime_bytecode {
            if let Some(code) = decode_bytecode(name, "runtime", runtime.decode())? {
                factory = factory.with_runtime(code, runtime.link_references.clone());
            }
        }
        Ok(factory)
    }

    /// An instance of contract type `name` at `address`. Needs only `abi`.
    pub fn contract_instance(&self, name: &str, address: Address) -> Result<ContractInstance, PackageError> {
        validate_contract_name(name)?;
        let contract_type = self
            .manifest
            .contract_types
            .get(name)
            .ok_or_else(|| PackageError::ContractNotFound(name.to_string()))?;
        let abi = contract_type
            .abi
            .clone()
            .ok_or_else(|| PackageError::InsufficientAssets {
                name: name.to_string(),
                missing: "abi",
            })?;
        Ok(ContractInstance {
            name: name.to_string(),
            address,
            abi,
        })
    }

    /// Link contract type `name`, resolving each reference's value
    /// (literal, local instance or `dependency:instance`).
    pub fn link_factory(
        &self,
        name: &str,
        references: &BTreeMap<String, String>,
    ) -> Result<ContractFactory, PackageError> {
        let factory = self.contract_factory(name)?;
        let mut values = BTreeMap::new();
        for (reference, value) in references {
            let address = resolve_nested(value, self)?;
            debug!(contract = %name, %reference, %value, %address, "resolved link value");
            values.insert(reference.clone(), address);
        }
        Ok(factory.link(&values)?)
    }

    // ========================================================================
    // Build dependencies
    // ========================================================================

    /// Resolve every declared build dependency. Cached until the chain changes.
    pub fn build_dependencies(&self) -> Result<&Dependencies, PackageError> {
        self.cache
            .dependencies
            .get_or_try_init(|| self.resolve_dependencies())
    }

    fn resolve_dependencies(&self) -> Result<Dependencies, PackageError> {
        let mut packages = BTreeMap::new();
        for (name, uri) in &self.manifest.build_dependencies {
            let package = self
                .load_dependency(name, uri)
                .map_err(|source| PackageError::BuildDependency {
                    name: name.clone(),
                    source: Box::new(source),
                })?;
            packages.insert(name.clone(), package);
        }
        Ok(Dependencies::new(packages))
    }

    fn load_dependency(&self, name: &str, uri: &str) -> Result<Package, PackageError> {
        validate_package_name(name)?;
        if !is_supported_content_addressed_uri(uri) {
            return Err(ValidationError::ContentUri(uri.to_string()).into());
        }

        info!(package = %self.name(), dependency = %name, %uri, "fetching build dependency");
        let mut package = Package::from_uri(uri, Arc::clone(&self.dispatcher))?;
        if let Some(chain) = &self.chain {
            package.rebind_chain(Arc::clone(chain));
        }
        Ok(package)
    }

    // ========================================================================
    // Deployments
    // ========================================================================

    /// This package's deployments on the bound chain. Cached until the chain
    /// changes.
    pub fn deployments(&self) -> Result<&Deployments, PackageError> {
        self.cache
            .deployments
            .get_or_try_init(|| self.match_deployments())
    }

    fn match_deployments(&self) -> Result<Deployments, PackageError> {
        let chain = self
            .chain
            .as_deref()
            .ok_or_else(|| PackageError::NoChain(self.name().to_string()))?;

        let chain_uri = select_matching_chain_uri(
            self.manifest.deployments.keys().map(String::as_str),
            chain,
        )?;
        let records = self
            .manifest
            .deployments
            .get(&chain_uri)
            .cloned()
            .unwrap_or_default();
        info!(package = %self.name(), %chain_uri, instances = records.len(), "matched deployments");

        let ctx = MatchedDeployments {
            records: &records,
            package: self,
        };
        for (instance, record) in &records {
            validate_deployment_receipt(instance, record, chain)?;
            verify_link_dependencies(instance, record, &ctx, chain)?;
        }

        Ok(Deployments::new(chain_uri, records))
    }

    /// A contract instance for deployment `instance` on the bound chain.
    ///
    /// A `dependency:Type` contract type is looked up in that dependency.
    pub fn deployed_instance(&self, instance: &str) -> Result<ContractInstance, PackageError> {
        let record = self.deployments()?.get(instance)?;
        match record.contract_type.split_once(':') {
            Some((dependency, contract_type)) => self
                .build_dependencies()?
                .package(dependency)?
                .contract_instance(contract_type, record.address),
            None => self.contract_instance(&record.contract_type, record.address),
        }
    }
}

fn decode_bytecode(
    name: &str,
    kind: &str,
    decoded: Result<Option<Vec<u8>>, String>,
) -> Result<Option<Vec<u8>>, PackageError> {
    decoded.map_err(|reason| {
        ValidationError::Bytecode {
            location: format!("{} {}", name, kind),
            reason,
        }
        .into()
    })
}

fn lookup_error(value: &str, err: PackageError) -> LinkError {
    LinkError::Lookup {
        value: value.to_string(),
        reason: err.to_string(),
    }
}

impl LinkContext for Package {
    fn local_address(&self, instance: &str) -> Result<Option<Address>, LinkError> {
        if self.manifest.deployments.is_empty() {
            return Ok(None);
        }
        match self.deployments() {
            Ok(deployments) => Ok(deployments.address(instance)),
            Err(PackageError::Deployment(DeploymentError::NoMatchingDeployments)) => Ok(None),
            Err(e) => Err(lookup_error(instance, e)),
        }
    }

    fn dependency(&self, name: &str) -> Result<Option<&dyn LinkContext>, LinkError> {
        if !self.manifest.build_dependencies.contains_key(name) {
            return Ok(None);
        }
        let dependencies = self
            .build_dependencies()
            .map_err(|e| lookup_error(name, e))?;
        Ok(dependencies.get(name).map(|p| p as &dyn LinkContext))
    }
}

/// Link context used while deployments are being matched: local names come
/// from the records under review rather than the (not yet built) cache.
struct MatchedDeployments<'a> {
    records: &'a BTreeMap<String, DeploymentRecord>,
    package: &'a Package,
}

impl LinkContext for MatchedDeployments<'_> {
    fn local_address(&self, instance: &str) -> Result<Option<Address>, LinkError> {
        Ok(self.records.get(instance).map(|r| r.address))
    }

    fn dependency(&self, name: &str) -> Result<Option<&dyn LinkContext>, LinkError> {
        self.package.dependency(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{BackendKind, FixtureBackend};
    use serde_json::json;

    fn dispatcher() -> Arc<BackendDispatcher> {
        Arc::new(BackendDispatcher::new(BackendKind::Fixture).with_backend(FixtureBackend::new()))
    }

    fn raw() -> Value {
        json!({
            "manifest_version": "2",
            "package_name": "wallet",
            "version": "1.0.0",
            "contract_types": {
                "Wallet": {
                    "abi": [],
                    "deployment_bytecode": { "bytecode": "0x6080" }
                },
                "AbiOnly": { "abi": [] },
                "BytecodeOnly": {
                    "deployment_bytecode": { "bytecode": "0x6080" }
                }
            }
        })
    }

    #[test]
    fn test_from_bytes_rejects_bad_json() {
        assert!(matches!(
            Package::from_bytes(b"{not json", dispatcher()),
            Err(PackageError::Validation(ValidationError::Json(_)))
        ));
        assert!(matches!(
            Package::from_bytes(b"[]", dispatcher()),
            Err(PackageError::Validation(ValidationError::NotAnObject { .. }))
        ));
    }

    #[test]
    fn test_contract_factory_assets() {
        let package = Package::from_value(&raw(), dispatcher()).unwrap();

        let factory = package.contract_factory("Wallet").unwrap();
        assert_eq!(factory.bytecode(), &[0x60, 0x80]);
        assert!(!factory.needs_bytecode_linking());

        assert!(matches!(
            package.contract_factory("Missing"),
            Err(PackageError::ContractNotFound(_))
        ));
        assert!(matches!(
            package.contract_factory("AbiOnly"),
            Err(PackageError::InsufficientAssets { missing: "deployment_bytecode", .. })
        ));
        assert!(matches!(
            package.contract_factory("BytecodeOnly"),
            Err(PackageError::InsufficientAssets { missing: "abi", .. })
        ));
        assert!(matches!(
            package.contract_factory("Wallet Contract"),
            Err(PackageError::Validation(ValidationError::ContractName(_)))
        ));
    }

    #[test]
    fn test_contract_instance_needs_only_abi() {
        let package = Package::from_value(&raw(), dispatcher()).unwrap();
        let instance = package.contract_instance("AbiOnly", Address::ZERO).unwrap();
        assert_eq!(instance.address, Address::ZERO);
        assert!(matches!(
            package.contract_instance("BytecodeOnly", Address::ZERO),
            Err(PackageError::InsufficientAssets { missing: "abi", .. })
        ));
        assert!(matches!(
            package.contract_instance("", Address::ZERO),
            Err(PackageError::Validation(ValidationError::ContractName(_)))
        ));
    }

    #[test]
    fn test_deployments_need_a_chain() {
        let package = Package::from_value(&raw(), dispatcher()).unwrap();
        assert!(matches!(package.deployments(), Err(PackageError::NoChain(_))));
    }

    #[test]
    fn test_invalid_build_dependency_is_wrapped() {
        let mut manifest = raw();
        manifest["build_dependencies"] = json!({ "owned": "https://example.com/owned.json" });
        let package = Package::from_value(&manifest, dispatcher()).unwrap();

        match package.build_dependencies() {
            Err(PackageError::BuildDependency { name, source }) => {
                assert_eq!(name, "owned");
                assert!(matches!(
                    *source,
                    PackageError::Validation(ValidationError::ContentUri(_))
                ));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
