//! Manifest validation gate.
//!
//! A raw manifest passes through three checks, in order, before a
//! [`Manifest`](crate::manifest::Manifest) value is produced:
//!
//! ```text
//! raw JSON ──> is object? ──> v2 package schema ──> typed decode ──> cross-references
//!                                                                    ├─ deployment contract types exist
//!                                                                    ├─ meta extension keys are x-
//!                                                                    └─ bytecode is valid hex
//! ```
//!
//! Nothing downstream re-validates these invariants.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::manifest::Manifest;

/// The only manifest version this crate understands.
pub const MANIFEST_VERSION: &str = "2";

const PACKAGE_SCHEMA_SOURCE: &str = include_str!("../schema/v2.package.json");

static PACKAGE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z][-_a-zA-Z0-9]{0,255}$").expect("package name pattern is valid")
});

static CONTRACT_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z][-a-zA-Z0-9_]{0,255}$").expect("contract name pattern is valid")
});

/// Compiled once; a broken embedded schema surfaces as a validation error.
static PACKAGE_SCHEMA: Lazy<Result<jsonschema::Validator, String>> = Lazy::new(|| {
    let schema: Value =
        serde_json::from_str(PACKAGE_SCHEMA_SOURCE).map_err(|e| e.to_string())?;
    jsonschema::options()
        .build(&schema)
        .map_err(|e| e.to_string())
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("manifest must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    #[error("manifest is not valid JSON: {0}")]
    Json(String),

    #[error("package schema could not be loaded: {0}")]
    SchemaUnavailable(String),

    #[error("manifest is invalid for the v2 package schema: {message}")]
    Schema { message: String },

    #[error("unsupported manifest_version '{0}'")]
    ManifestVersion(String),

    #[error("invalid package name '{0}'")]
    PackageName(String),

    #[error("invalid contract name '{0}'")]
    ContractName(String),

    #[error("deployment '{instance}' on {chain_uri} references missing contract type '{contract_type}'")]
    MissingContractType {
        chain_uri: String,
        instance: String,
        contract_type: String,
    },

    #[error("meta key '{0}' is not recognized; extension keys must start with 'x-'")]
    MetaKey(String),

    #[error("{location} bytecode is not valid hex: {reason}")]
    Bytecode { location: String, reason: String },

    #[error("'{0}' is not a supported content-addressed URI")]
    ContentUri(String),

    #[error("invalid compiler output: {0}")]
    CompilerOutput(String),
}

pub fn is_valid_package_name(name: &str) -> bool {
    PACKAGE_NAME_RE.is_match(name)
}

pub fn is_valid_contract_name(name: &str) -> bool {
    CONTRACT_NAME_RE.is_match(name)
}

pub fn validate_package_name(name: &str) -> Result<(), ValidationError> {
    if !is_valid_package_name(name) {
        return Err(ValidationError::PackageName(name.to_string()));
    }
    Ok(())
}

pub fn validate_contract_name(name: &str) -> Result<(), ValidationError> {
    if !is_valid_contract_name(name) {
        return Err(ValidationError::ContractName(name.to_string()));
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Validate `raw` against the embedded v2 package schema.
pub fn validate_against_schema(raw: &Value) -> Result<(), ValidationError> {
    let validator = PACKAGE_SCHEMA
        .as_ref()
        .map_err(|e| ValidationError::SchemaUnavailable(e.clone()))?;
    validator
        .validate(raw)
        .map_err(|e| ValidationError::Schema {
            message: e.to_string(),
        })
}

/// Run the full validation gate and produce a typed manifest.
pub fn validate_manifest(raw: &Value) -> Result<Manifest, ValidationError> {
    if !raw.is_object() {
        return Err(ValidationError::NotAnObject {
            found: json_kind(raw),
        });
    }

    // Checked ahead of the schema so the error names the offending value.
    if let Some(version) = raw.get("manifest_version").and_then(Value::as_str) {
        if version != MANIFEST_VERSION {
            return Err(ValidationError::ManifestVersion(version.to_string()));
        }
    }

    validate_against_schema(raw)?;

    let manifest: Manifest = serde_json::from_value(raw.clone()).map_err(|e| {
        ValidationError::Schema {
            message: e.to_string(),
        }
    })?;
    validate_manifest_invariants(&manifest)?;
    Ok(manifest)
}

/// Cross-reference checks that the schema cannot express.
pub fn validate_manifest_invariants(manifest: &Manifest) -> Result<(), ValidationError> {
    validate_package_name(&manifest.package_name)?;

    if let Some(meta) = &manifest.meta {
        if let Some(key) = meta.extra.keys().find(|k| !k.starts_with("x-")) {
            return Err(ValidationError::MetaKey(key.clone()));
        }
    }

    for (name, contract_type) in &manifest.contract_types {
        let bytecodes = [
            ("deployment", &contract_type.deployment_bytecode),
            ("runtime", &contract_type.runtime_bytecode),
        ];
        for (kind, bytecode) in bytecodes {
            if let Some(bytecode) = bytecode {
                bytecode
                    .decode()
                    .map_err(|reason| ValidationError::Bytecode {
                        location: format!("{} {}", name, kind),
                        reason,
                    })?;
            }
        }
    }

    for (chain_uri, instances) in &manifest.deployments {
        for (instance, record) in instances {
            let known = match record.contract_type.split_once(':') {
                // Lives in a build dependency; checked when that package loads.
                Some((dependency, _)) => manifest.build_dependencies.contains_key(dependency),
                None => manifest.contract_types.contains_key(&record.contract_type),
            };
            if !known {
                return Err(ValidationError::MissingContractType {
                    chain_uri: chain_uri.clone(),
                    instance: instance.clone(),
                    contract_type: record.contract_type.clone(),
                });
            }

            if let Some(runtime) = &record.runtime_bytecode {
                runtime.decode().map_err(|reason| ValidationError::Bytecode {
                    location: format!("{} runtime", instance),
                    reason,
                })?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "manifest_version": "2",
            "package_name": "owned",
            "version": "1.0.0"
        })
    }

    #[test]
    fn test_minimal_manifest_is_valid() {
        let manifest = validate_manifest(&minimal()).unwrap();
        assert_eq!(manifest.package_name, "owned");
        assert!(manifest.contract_types.is_empty());
    }

    #[test]
    fn test_rejects_non_object() {
        assert_eq!(
            validate_manifest(&json!(["owned"])).unwrap_err(),
            ValidationError::NotAnObject { found: "an array" }
        );
    }

    #[test]
    fn test_rejects_wrong_manifest_version() {
        let mut raw = minimal();
        raw["manifest_version"] = json!("1");
        assert_eq!(
            validate_manifest(&raw).unwrap_err(),
            ValidationError::ManifestVersion("1".to_string())
        );
    }

    #[test]
    fn test_rejects_schema_violations() {
        let mut missing_version = minimal();
        missing_version.as_object_mut().unwrap().remove("version");
        assert!(matches!(
            validate_manifest(&missing_version),
            Err(ValidationError::Schema { .. })
        ));

        let mut unknown_key = minimal();
        unknown_key["publisher"] = json!("me");
        assert!(matches!(
            validate_manifest(&unknown_key),
            Err(ValidationError::Schema { .. })
        ));

        let mut bad_name = minimal();
        bad_name["package_name"] = json!("1owned");
        assert!(matches!(
            validate_manifest(&bad_name),
            Err(ValidationError::Schema { .. })
        ));
    }

    #[test]
    fn test_meta_extension_keys() {
        let mut raw = minimal();
        raw["meta"] = json!({ "license": "MIT", "x-audited": true });
        let manifest = validate_manifest(&raw).unwrap();
        assert_eq!(manifest.meta.unwrap().extra["x-audited"], json!(true));

        let mut raw = minimal();
        raw["meta"] = json!({ "publisher": "me" });
        assert!(validate_manifest(&raw).is_err());
    }

    #[test]
    fn test_deployment_must_reference_known_contract_type() {
        let chain_uri = format!("blockchain://{}/block/{}", "a".repeat(64), "b".repeat(64));
        let mut raw = minimal();
        raw["deployments"] = json!({
            chain_uri.clone(): {
                "Owned": {
                    "contract_type": "Owned",
                    "address": "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
                }
            }
        });
        assert_eq!(
            validate_manifest(&raw).unwrap_err(),
            ValidationError::MissingContractType {
                chain_uri,
                instance: "Owned".to_string(),
                contract_type: "Owned".to_string(),
            }
        );

        raw["contract_types"] = json!({ "Owned": { "abi": [] } });
        assert!(validate_manifest(&raw).is_ok());
    }

    #[test]
    fn test_name_patterns() {
        assert!(is_valid_package_name("safe-math-lib"));
        assert!(is_valid_package_name("Wallet_2"));
        assert!(!is_valid_package_name("-owned"));
        assert!(!is_valid_package_name(""));
        assert!(!is_valid_package_name(&"a".repeat(257)));

        assert!(is_valid_contract_name("SafeMathLib"));
        assert!(!is_valid_contract_name("Safe Math"));
        assert!(validate_contract_name("9Lives").is_err());
    }
}
