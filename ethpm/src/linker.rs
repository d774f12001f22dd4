//! # Bytecode Linking
//!
//! Compiled contracts that call libraries carry zeroed placeholder regions
//! where the library address belongs. Linking writes concrete addresses into
//! those regions.
//!
//! ```text
//! template:  60 80 | 00 00 .. 00 | 60 40 ... | 00 00 .. 00 | ...
//!                  └─ Lib @ 2 ──┘            └─ Lib @ 40 ─┘
//!
//! linked:    60 80 | 5a ae .. ed | 60 40 ... | 5a ae .. ed | ...
//! ```
//!
//! ## Guarantees
//!
//! - The template is never modified; a new buffer is returned.
//! - Every slot of every reference is checked before the first byte is
//!   written, so a failed link leaves nothing half-patched.
//! - The supplied names must match the declared names exactly.
//!
//! ## Nested Values
//!
//! A link value is resolved by [`resolve_nested`] in this order:
//!
//! 1. a literal `0x` address is used as-is;
//! 2. a deployment instance of the current package on the bound chain;
//! 3. `dependency:rest` recurses into that build dependency with `rest`;
//! 4. anything else is unresolvable.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::{is_literal_address, parse_address, Address, ADDRESS_LENGTH};

/// Recursion limit for `dependency:...` chains.
pub const MAX_LINK_DEPTH: usize = 16;

/// Byte value that fills an unlinked slot.
pub const PLACEHOLDER_BYTE: u8 = 0x00;

/// A named placeholder region, repeated at each offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkReference {
    pub offsets: Vec<usize>,
    pub length: usize,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("contract type '{0}' has no linkable bytecode")]
    NothingToLink(String),

    #[error("contract type '{0}' is already linked")]
    AlreadyLinked(String),

    #[error("no value supplied for link references: {}", names.join(", "))]
    MissingValues { names: Vec<String> },

    #[error("values supplied for undeclared link references: {}", names.join(", "))]
    UnexpectedValues { names: Vec<String> },

    #[error("link reference '{name}' has length {length}, expected {expected}")]
    LengthMismatch {
        name: String,
        length: usize,
        expected: usize,
    },

    #[error("segment [{offset}:{end}] is outside bytecode of {bytecode_length} bytes")]
    OutOfBounds {
        offset: usize,
        end: usize,
        bytecode_length: usize,
    },

    #[error("bytecode segment [{offset}:{end}] is not comprised of empty bytes")]
    NotEmpty { offset: usize, end: usize },

    #[error("link segments overlap at [{offset}:{end}]")]
    Overlap { offset: usize, end: usize },

    #[error("invalid literal address '{value}': {reason}")]
    InvalidAddress { value: String, reason: String },

    #[error("build dependency '{dependency}' not found while resolving '{value}'")]
    DependencyNotFound { dependency: String, value: String },

    #[error("'{0}' not found in deployment data")]
    ReferenceNotFound(String),

    #[error("resolving '{value}' exceeded {limit} levels of dependency nesting")]
    DepthExceeded { value: String, limit: usize },

    #[error("failed to resolve '{value}': {reason}")]
    Lookup { value: String, reason: String },
}

/// Check that `bytecode[offset..offset + length]` exists and is all placeholder.
pub fn validate_empty_bytes(bytecode: &[u8], offset: usize, length: usize) -> Result<(), LinkError> {
    let end = offset.saturating_add(length);
    let slot = bytecode.get(offset..end).ok_or(LinkError::OutOfBounds {
        offset,
        end,
        bytecode_length: bytecode.len(),
    })?;
    if slot.iter().any(|&b| b != PLACEHOLDER_BYTE) {
        return Err(LinkError::NotEmpty { offset, end });
    }
    Ok(())
}

fn declared_names(refs: &[LinkReference]) -> BTreeSet<&str> {
    refs.iter().map(|r| r.name.as_str()).collect()
}

/// Write `values` into every placeholder slot declared by `refs`.
///
/// Returns a new buffer; on any error `bytecode` is left untouched.
pub fn apply_link_references(
    bytecode: &[u8],
    refs: &[LinkReference],
    values: &BTreeMap<String, Address>,
) -> Result<Vec<u8>, LinkError> {
    let declared = declared_names(refs);
    let supplied: BTreeSet<&str> = values.keys().map(String::as_str).collect();

    let missing: Vec<String> = declared.difference(&supplied).map(|s| s.to_string()).collect();
    if !missing.is_empty() {
        return Err(LinkError::MissingValues { names: missing });
    }
    let unexpected: Vec<String> = supplied.difference(&declared).map(|s| s.to_string()).collect();
    if !unexpected.is_empty() {
        return Err(LinkError::UnexpectedValues { names: unexpected });
    }

    let mut slots: Vec<(usize, usize, &Address)> = Vec::new();
    for reference in refs {
        if reference.length != ADDRESS_LENGTH {
            return Err(LinkError::LengthMismatch {
                name: reference.name.clone(),
                length: reference.length,
                expected: ADDRESS_LENGTH,
            });
        }
        let Some(address) = values.get(&reference.name) else {
            return Err(LinkError::MissingValues {
                names: vec![reference.name.clone()],
            });
        };
        for &offset in &reference.offsets {
            validate_empty_bytes(bytecode, offset, reference.length)?;
            slots.push((offset, offset + reference.length, address));
        }
    }

    slots.sort_by_key(|&(offset, _, _)| offset);
    if let Some(pair) = slots.windows(2).find(|w| w[1].0 < w[0].1) {
        return Err(LinkError::Overlap {
            offset: pair[1].0,
            end: pair[1].1,
        });
    }

    let mut linked = bytecode.to_vec();
    for (offset, end, address) in slots {
        linked[offset..end].copy_from_slice(address.as_slice());
    }
    Ok(linked)
}

/// True iff every declared slot exists and none still holds the placeholder.
pub fn is_fully_linked(bytecode: &[u8], refs: &[LinkReference]) -> bool {
    refs.iter().all(|reference| {
        reference.offsets.iter().all(|&offset| {
            bytecode
                .get(offset..offset.saturating_add(reference.length))
                .is_some_and(|slot| slot.iter().any(|&b| b != PLACEHOLDER_BYTE))
        })
    })
}

// ============================================================================
// Nested Resolution
// ============================================================================

/// What [`resolve_nested`] needs from a package.
pub trait LinkContext {
    /// Address of deployment instance `instance` on the bound chain, if any.
    fn local_address(&self, instance: &str) -> Result<Option<Address>, LinkError>;

    /// The build dependency declared as `name`, if any.
    fn dependency(&self, name: &str) -> Result<Option<&dyn LinkContext>, LinkError>;
}

/// Resolve a link value to an address.
pub fn resolve_nested(value: &str, ctx: &dyn LinkContext) -> Result<Address, LinkError> {
    resolve_at_depth(value, value, ctx, 0)
}

fn resolve_at_depth(
    original: &str,
    value: &str,
    ctx: &dyn LinkContext,
    depth: usize,
) -> Result<Address, LinkError> {
    if depth > MAX_LINK_DEPTH {
        return Err(LinkError::DepthExceeded {
            value: original.to_string(),
            limit: MAX_LINK_DEPTH,
        });
    }

    if is_literal_address(value) {
        return parse_address(value).map_err(|e| LinkError::InvalidAddress {
            value: value.to_string(),
            reason: e.to_string(),
        });
    }

    if let Some(address) = ctx.local_address(value)? {
        return Ok(address);
    }

    if let Some((dependency, rest)) = value.split_once(':') {
        let package = ctx
            .dependency(dependency)?
            .ok_or_else(|| LinkError::DependencyNotFound {
                dependency: dependency.to_string(),
                value: original.to_string(),
            })?;
        return resolve_at_depth(original, rest, package, depth + 1);
    }

    Err(LinkError::ReferenceNotFound(original.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lib_address() -> Address {
        Address::new([0xaa; 20])
    }

    fn values(pairs: &[(&str, Address)]) -> BTreeMap<String, Address> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn reference(name: &str, offsets: &[usize]) -> LinkReference {
        LinkReference {
            offsets: offsets.to_vec(),
            length: 20,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_apply_single_reference_two_offsets() {
        let bytecode = vec![0u8; 60];
        let refs = [reference("Lib", &[1, 31])];
        let a = lib_address();

        let linked = apply_link_references(&bytecode, &refs, &values(&[("Lib", a)])).unwrap();

        let mut expected = vec![0x00];
        expected.extend_from_slice(a.as_slice());
        expected.extend_from_slice(&[0x00; 10]);
        expected.extend_from_slice(a.as_slice());
        expected.extend_from_slice(&[0x00; 9]);
        assert_eq!(linked.len(), 60);
        assert_eq!(linked, expected);
        assert_eq!(bytecode, vec![0u8; 60]);
    }

    #[test]
    fn test_apply_multiple_references() {
        let bytecode = vec![0u8; 80];
        let safe_send = Address::new([0x11; 20]);
        let safe_math = Address::new([0x22; 20]);
        let refs = [reference("SafeSendLib", &[1, 50]), reference("SafeMathLib", &[25])];

        let linked = apply_link_references(
            &bytecode,
            &refs,
            &values(&[("SafeSendLib", safe_send), ("SafeMathLib", safe_math)]),
        )
        .unwrap();

        let mut expected = vec![0x00];
        expected.extend_from_slice(safe_send.as_slice());
        expected.extend_from_slice(&[0x00; 4]);
        expected.extend_from_slice(safe_math.as_slice());
        expected.extend_from_slice(&[0x00; 5]);
        expected.extend_from_slice(safe_send.as_slice());
        expected.extend_from_slice(&[0x00; 10]);
        assert_eq!(linked, expected);
        assert!(is_fully_linked(&linked, &refs));
        assert!(!is_fully_linked(&bytecode, &refs));
    }

    #[test]
    fn test_apply_rejects_name_mismatch() {
        let bytecode = vec![0u8; 40];
        let refs = [reference("Lib", &[0])];

        assert_eq!(
            apply_link_references(&bytecode, &refs, &BTreeMap::new()).unwrap_err(),
            LinkError::MissingValues {
                names: vec!["Lib".to_string()]
            }
        );
        assert_eq!(
            apply_link_references(
                &bytecode,
                &refs,
                &values(&[("Lib", lib_address()), ("Other", lib_address())])
            )
            .unwrap_err(),
            LinkError::UnexpectedValues {
                names: vec!["Other".to_string()]
            }
        );
    }

    #[test]
    fn test_apply_rejects_non_empty_slot() {
        let mut bytecode = vec![0u8; 60];
        bytecode[35] = 0xff;
        let refs = [reference("Lib", &[1, 31])];

        assert_eq!(
            apply_link_references(&bytecode, &refs, &values(&[("Lib", lib_address())]))
                .unwrap_err(),
            LinkError::NotEmpty { offset: 31, end: 51 }
        );
    }

    #[test]
    fn test_apply_rejects_bad_geometry() {
        let bytecode = vec![0u8; 30];

        let out_of_bounds = [reference("Lib", &[15])];
        assert!(matches!(
            apply_link_references(&bytecode, &out_of_bounds, &values(&[("Lib", lib_address())])),
            Err(LinkError::OutOfBounds { offset: 15, end: 35, bytecode_length: 30 })
        ));

        let short = [LinkReference {
            offsets: vec![0],
            length: 8,
            name: "Lib".to_string(),
        }];
        assert!(matches!(
            apply_link_references(&bytecode, &short, &values(&[("Lib", lib_address())])),
            Err(LinkError::LengthMismatch { length: 8, .. })
        ));

        let bytecode = vec![0u8; 60];
        let overlapping = [reference("A", &[0]), reference("B", &[10])];
        assert!(matches!(
            apply_link_references(
                &bytecode,
                &overlapping,
                &values(&[("A", lib_address()), ("B", lib_address())])
            ),
            Err(LinkError::Overlap { offset: 10, end: 30 })
        ));
    }

    #[test]
    fn test_validate_empty_bytes() {
        let bytecode = [0x00, 0x00, 0x01];
        assert!(validate_empty_bytes(&bytecode, 0, 2).is_ok());
        assert_eq!(
            validate_empty_bytes(&bytecode, 1, 2),
            Err(LinkError::NotEmpty { offset: 1, end: 3 })
        );
        assert!(validate_empty_bytes(&bytecode, 2, 5).is_err());
    }

    #[derive(Default)]
    struct FakePackage {
        instances: HashMap<String, Address>,
        dependencies: HashMap<String, FakePackage>,
    }

    impl LinkContext for FakePackage {
        fn local_address(&self, instance: &str) -> Result<Option<Address>, LinkError> {
            Ok(self.instances.get(instance).copied())
        }

        fn dependency(&self, name: &str) -> Result<Option<&dyn LinkContext>, LinkError> {
            Ok(self.dependencies.get(name).map(|d| d as &dyn LinkContext))
        }
    }

    #[test]
    fn test_resolve_nested_rules() {
        let local = Address::new([0x01; 20]);
        let nested = Address::new([0x03; 20]);

        let mut grandchild = FakePackage::default();
        grandchild.instances.insert("Math".to_string(), nested);
        let mut child = FakePackage::default();
        child.dependencies.insert("math".to_string(), grandchild);
        let mut root = FakePackage::default();
        root.instances.insert("Owned".to_string(), local);
        root.dependencies.insert("wallet".to_string(), child);

        let literal = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        assert_eq!(resolve_nested(literal, &root).unwrap().to_checksum(None), literal);
        assert_eq!(resolve_nested("Owned", &root).unwrap(), local);
        assert_eq!(resolve_nested("wallet:math:Math", &root).unwrap(), nested);

        assert_eq!(
            resolve_nested("escrow:Lib", &root).unwrap_err(),
            LinkError::DependencyNotFound {
                dependency: "escrow".to_string(),
                value: "escrow:Lib".to_string(),
            }
        );
        assert_eq!(
            resolve_nested("Missing", &root).unwrap_err(),
            LinkError::ReferenceNotFound("Missing".to_string())
        );
        assert!(matches!(
            resolve_nested("wallet:Nope", &root),
            Err(LinkError::ReferenceNotFound(_))
        ));
    }

    struct Cycle;

    impl LinkContext for Cycle {
        fn local_address(&self, _instance: &str) -> Result<Option<Address>, LinkError> {
            Ok(None)
        }

        fn dependency(&self, _name: &str) -> Result<Option<&dyn LinkContext>, LinkError> {
            Ok(Some(self))
        }
    }

    #[test]
    fn test_resolve_nested_is_bounded() {
        let value = vec!["dep"; MAX_LINK_DEPTH + 2].join(":");
        assert!(matches!(
            resolve_nested(&value, &Cycle),
            Err(LinkError::DepthExceeded { .. })
        ));
    }
}
