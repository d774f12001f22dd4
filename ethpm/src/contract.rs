//! Contract factories and deployed instances.
//!
//! A factory is a value: linking produces a new factory and leaves the
//! template untouched, so the same template can be linked concurrently with
//! different libraries.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::address::Address;
use crate::linker::{apply_link_references, is_fully_linked, LinkError, LinkReference};

/// Deployable bytecode plus ABI for one contract type.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractFactory {
    name: String,
    abi: Value,
    bytecode: Vec<u8>,
    link_references: Vec<LinkReference>,
    runtime_bytecode: Option<Vec<u8>>,
    runtime_link_references: Vec<LinkReference>,
    linked: bool,
}

impl ContractFactory {
    pub fn new(name: impl Into<String>, abi: Value, bytecode: Vec<u8>) -> Self {
        ContractFactory {
            name: name.into(),
            abi,
            bytecode,
            link_references: Vec::new(),
            runtime_bytecode: None,
            runtime_link_references: Vec::new(),
            linked: false,
        }
    }

    pub fn with_link_references(mut self, refs: Vec<LinkReference>) -> Self {
        self.link_references = refs;
        self
    }

    pub fn with_runtime(mut self, bytecode: Vec<u8>, refs: Vec<LinkReference>) -> Self {
        self.runtime_bytecode = Some(bytecode);
        self.runtime_link_references = refs;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abi(&self) -> &Value {
        &self.abi
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn runtime_bytecode(&self) -> Option<&[u8]> {
        self.runtime_bytecode.as_deref()
    }

    pub fn link_references(&self) -> &[LinkReference] {
        &self.link_references
    }

    pub fn runtime_link_references(&self) -> &[LinkReference] {
        &self.runtime_link_references
    }

    /// Whether any placeholder regions are declared.
    pub fn has_linkable_bytecode(&self) -> bool {
        !self.link_references.is_empty() || !self.runtime_link_references.is_empty()
    }

    /// Whether this factory was produced by [`link`](Self::link).
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn needs_bytecode_linking(&self) -> bool {
        self.has_linkable_bytecode() && !self.linked
    }

    /// Names across deployment and runtime references.
    pub fn unlinked_references(&self) -> BTreeSet<&str> {
        self.link_references
            .iter()
            .chain(&self.runtime_link_references)
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Produce a linked copy with `values` written into every placeholder.
    ///
    /// `values` must name exactly the references declared across deployment
    /// and runtime bytecode.
    pub fn link(&self, values: &BTreeMap<String, Address>) -> Result<ContractFactory, LinkError> {
        if !self.has_linkable_bytecode() {
            return Err(LinkError::NothingToLink(self.name.clone()));
        }
        if self.linked {
            return Err(LinkError::AlreadyLinked(self.name.clone()));
        }

        let declared = self.unlinked_references();
        let missing: Vec<String> = declared
            .iter()
            .filter(|n| !values.contains_key(**n))
            .map(|n| n.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(LinkError::MissingValues { names: missing });
        }
        let unexpected: Vec<String> = values
            .keys()
            .filter(|k| !declared.contains(k.as_str()))
            .cloned()
            .collect();
        if !unexpected.is_empty() {
            return Err(LinkError::UnexpectedValues { names: unexpected });
        }

        let bytecode = apply_link_references(
            &self.bytecode,
            &self.link_references,
            &subset(values, &self.link_references),
        )?;
        let runtime_bytecode = match &self.runtime_bytecode {
            Some(runtime) => Some(apply_link_references(
                runtime,
                &self.runtime_link_references,
                &subset(values, &self.runtime_link_references),
            )?),
            None => None,
        };

        Ok(ContractFactory {
            bytecode,
            runtime_bytecode,
            linked: true,
            ..self.clone()
        })
    }

    /// Whether every declared deployment slot holds a non-placeholder value.
    pub fn is_fully_linked(&self) -> bool {
        is_fully_linked(&self.bytecode, &self.link_references)
    }
}

fn subset(values: &BTreeMap<String, Address>, refs: &[LinkReference]) -> BTreeMap<String, Address> {
    values
        .iter()
        .filter(|(name, _)| refs.iter().any(|r| &r.name == *name))
        .map(|(name, address)| (name.clone(), *address))
        .collect()
}

/// A contract already deployed at `address`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractInstance {
    pub name: String,
    pub address: Address,
    pub abi: Value,
}
