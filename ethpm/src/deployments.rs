//! Deployment matching against a live chain.
//!
//! A manifest may record deployments on many chains. Exactly one chain URI
//! must match the bound chain; zero or several matches are errors, never a
//! silent pick.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::address::{parse_address, Address, ADDRESS_LENGTH};
use crate::chain::{ChainError, ChainQuery, ChainUri, B256};
use crate::linker::{resolve_nested, LinkContext, LinkError};
use crate::manifest::{DeploymentRecord, LinkValueKind};
use crate::validation::{validate_contract_name, ValidationError};

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("package has no deployments")]
    NoDeployments,

    #[error("no matching URIs: none of the package's deployments are on the connected chain")]
    NoMatchingDeployments,

    #[error("too many ({}) matching URIs: [{}]", uris.len(), uris.join(", "))]
    TooManyMatches { uris: Vec<String> },

    #[error("deployment instance '{0}' not found")]
    InstanceNotFound(String),

    #[error("transaction {transaction} of deployment '{instance}' has no receipt")]
    ReceiptNotFound { instance: String, transaction: B256 },

    #[error("deployment '{instance}' is at {expected} but its transaction created {}", actual.map(|a| a.to_string()).unwrap_or_else(|| "no contract".to_string()))]
    AddressMismatch {
        instance: String,
        expected: Address,
        actual: Option<Address>,
    },

    #[error("deployment '{instance}' names block {expected} but its transaction is in block {actual}")]
    BlockMismatch {
        instance: String,
        expected: B256,
        actual: B256,
    },

    #[error("deployment '{0}' lists itself as a link dependency")]
    SelfReference(String),

    #[error("on-chain code of '{instance}' at offset {offset} does not contain {expected}")]
    BytecodeMismatch {
        instance: String,
        offset: usize,
        expected: Address,
    },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Pick the single chain URI among `uris` that identifies `chain`.
pub fn select_matching_chain_uri<'a, I>(uris: I, chain: &dyn ChainQuery) -> Result<String, DeploymentError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidates = 0usize;
    let mut matching = Vec::new();
    for uri in uris {
        candidates += 1;
        if ChainUri::parse(uri)?.matches(chain)? {
            matching.push(uri.to_string());
        }
    }

    match matching.len() {
        _ if candidates == 0 => Err(DeploymentError::NoDeployments),
        0 => Err(DeploymentError::NoMatchingDeployments),
        1 => Ok(matching.remove(0)),
        _ => Err(DeploymentError::TooManyMatches { uris: matching }),
    }
}

/// Check a record's transaction receipt against its address and block.
pub fn validate_deployment_receipt(
    instance: &str,
    record: &DeploymentRecord,
    chain: &dyn ChainQuery,
) -> Result<(), DeploymentError> {
    let Some(transaction) = record.transaction else {
        return Ok(());
    };
    let receipt = chain
        .get_transaction_receipt(&transaction)?
        .ok_or_else(|| DeploymentError::ReceiptNotFound {
            instance: instance.to_string(),
            transaction,
        })?;

    if receipt.contract_address != Some(record.address) {
        return Err(DeploymentError::AddressMismatch {
            instance: instance.to_string(),
            expected: record.address,
            actual: receipt.contract_address,
        });
    }
    if let Some(block) = record.block {
        if receipt.block_hash != block {
            return Err(DeploymentError::BlockMismatch {
                instance: instance.to_string(),
                expected: block,
                actual: receipt.block_hash,
            });
        }
    }
    Ok(())
}

/// Check that the code deployed at `record.address` carries each linked
/// address at the offsets the record claims.
pub fn verify_link_dependencies(
    instance: &str,
    record: &DeploymentRecord,
    ctx: &dyn LinkContext,
    chain: &dyn ChainQuery,
) -> Result<(), DeploymentError> {
    let Some(runtime) = &record.runtime_bytecode else {
        return Ok(());
    };
    if runtime.link_dependencies.is_empty() {
        return Ok(());
    }

    let code = chain.get_code(&record.address)?;
    for link in &runtime.link_dependencies {
        let expected = match link.kind {
            LinkValueKind::Literal => {
                parse_address(&link.value).map_err(|e| LinkError::InvalidAddress {
                    value: link.value.clone(),
                    reason: e.to_string(),
                })?
            }
            LinkValueKind::Reference => {
                if link.value == instance {
                    return Err(DeploymentError::SelfReference(instance.to_string()));
                }
                resolve_nested(&link.value, ctx)?
            }
        };

        for &offset in &link.offsets {
            let on_chain = code.get(offset..offset.saturating_add(ADDRESS_LENGTH));
            if on_chain != Some(expected.as_slice()) {
                return Err(DeploymentError::BytecodeMismatch {
                    instance: instance.to_string(),
                    offset,
                    expected,
                });
            }
        }
        debug!(%instance, value = %link.value, %expected, "link dependency verified");
    }
    Ok(())
}

/// The deployments of one package on the bound chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployments {
    chain_uri: String,
    records: BTreeMap<String, DeploymentRecord>,
}

impl Deployments {
    pub fn new(chain_uri: String, records: BTreeMap<String, DeploymentRecord>) -> Self {
        Deployments { chain_uri, records }
    }

    /// The chain URI these deployments were matched under.
    pub fn chain_uri(&self) -> &str {
        &self.chain_uri
    }

    pub fn get(&self, instance: &str) -> Result<&DeploymentRecord, DeploymentError> {
        validate_contract_name(instance)?;
        self.records
            .get(instance)
            .ok_or_else(|| DeploymentError::InstanceNotFound(instance.to_string()))
    }

    pub fn address(&self, instance: &str) -> Option<Address> {
        self.records.get(instance).map(|r| r.address)
    }

    pub fn contains(&self, instance: &str) -> bool {
        self.records.contains_key(instance)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeploymentRecord)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{StaticChain, TransactionReceipt};
    use crate::manifest::{BytecodeObject, LinkValue};

    fn hash(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    fn record(address: Address) -> DeploymentRecord {
        DeploymentRecord {
            contract_type: "Owned".to_string(),
            address,
            transaction: None,
            block: None,
            runtime_bytecode: None,
        }
    }

    #[test]
    fn test_select_single_match() {
        let chain = StaticChain::new(hash(1)).with_block(hash(2));
        let here = ChainUri::block(hash(1), hash(2)).to_string();
        let elsewhere = ChainUri::block(hash(9), hash(2)).to_string();

        let selected =
            select_matching_chain_uri([elsewhere.as_str(), here.as_str()], &chain).unwrap();
        assert_eq!(selected, here);
    }

    #[test]
    fn test_select_no_deployments_or_matches() {
        let chain = StaticChain::new(hash(1));
        assert!(matches!(
            select_matching_chain_uri(Vec::<&str>::new(), &chain),
            Err(DeploymentError::NoDeployments)
        ));

        let elsewhere = ChainUri::block(hash(9), hash(9)).to_string();
        assert!(matches!(
            select_matching_chain_uri([elsewhere.as_str()], &chain),
            Err(DeploymentError::NoMatchingDeployments)
        ));
    }

    #[test]
    fn test_select_ambiguous_names_all_matches() {
        let chain = StaticChain::new(hash(1)).with_block(hash(2));
        let first = ChainUri::block(hash(1), hash(1)).to_string();
        let second = ChainUri::block(hash(1), hash(2)).to_string();

        let err = select_matching_chain_uri([first.as_str(), second.as_str()], &chain).unwrap_err();
        match &err {
            DeploymentError::TooManyMatches { uris } => assert_eq!(uris, &vec![first, second]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with("too many (2) matching URIs"));
    }

    #[test]
    fn test_select_rejects_malformed_chain_uri() {
        let chain = StaticChain::new(hash(1));
        assert!(matches!(
            select_matching_chain_uri(["blockchain://nope"], &chain),
            Err(DeploymentError::Chain(ChainError::InvalidChainUri { .. }))
        ));
    }

    #[test]
    fn test_receipt_validation() {
        let address = Address::new([0x42; 20]);
        let chain = StaticChain::new(hash(1)).with_receipt(TransactionReceipt {
            transaction_hash: hash(7),
            block_hash: hash(1),
            contract_address: Some(address),
        });

        let mut rec = record(address);
        assert!(validate_deployment_receipt("Owned", &rec, &chain).is_ok());

        rec.transaction = Some(hash(7));
        rec.block = Some(hash(1));
        assert!(validate_deployment_receipt("Owned", &rec, &chain).is_ok());

        rec.block = Some(hash(3));
        assert!(matches!(
            validate_deployment_receipt("Owned", &rec, &chain),
            Err(DeploymentError::BlockMismatch { .. })
        ));

        let mut wrong = record(Address::new([0x43; 20]));
        wrong.transaction = Some(hash(7));
        assert!(matches!(
            validate_deployment_receipt("Owned", &wrong, &chain),
            Err(DeploymentError::AddressMismatch { .. })
        ));

        wrong.transaction = Some(hash(8));
        assert!(matches!(
            validate_deployment_receipt("Owned", &wrong, &chain),
            Err(DeploymentError::ReceiptNotFound { .. })
        ));
    }

    struct Records(BTreeMap<String, DeploymentRecord>);

    impl LinkContext for Records {
        fn local_address(&self, instance: &str) -> Result<Option<Address>, LinkError> {
            Ok(self.0.get(instance).map(|r| r.address))
        }

        fn dependency(&self, _name: &str) -> Result<Option<&dyn LinkContext>, LinkError> {
            Ok(None)
        }
    }

    fn linked_record(address: Address, kind: LinkValueKind, value: &str) -> DeploymentRecord {
        DeploymentRecord {
            runtime_bytecode: Some(BytecodeObject {
                link_dependencies: vec![LinkValue {
                    offsets: vec![1],
                    kind,
                    value: value.to_string(),
                }],
                ..BytecodeObject::default()
            }),
            ..record(address)
        }
    }

    #[test]
    fn test_link_dependencies_checked_on_chain() {
        let wallet = Address::new([0x10; 20]);
        let math = Address::new([0x20; 20]);
        let mut code = vec![0x73];
        code.extend_from_slice(math.as_slice());
        code.push(0x00);

        let chain = StaticChain::new(hash(1)).with_code(wallet, code);
        let mut records = BTreeMap::new();
        records.insert("SafeMathLib".to_string(), record(math));
        let ctx = Records(records);

        let by_reference = linked_record(wallet, LinkValueKind::Reference, "SafeMathLib");
        assert!(verify_link_dependencies("Wallet", &by_reference, &ctx, &chain).is_ok());

        let by_literal = linked_record(wallet, LinkValueKind::Literal, &math.to_checksum(None));
        assert!(verify_link_dependencies("Wallet", &by_literal, &ctx, &chain).is_ok());

        let stale = linked_record(wallet, LinkValueKind::Literal, &wallet.to_checksum(None));
        assert!(matches!(
            verify_link_dependencies("Wallet", &stale, &ctx, &chain),
            Err(DeploymentError::BytecodeMismatch { offset: 1, .. })
        ));

        let own = linked_record(wallet, LinkValueKind::Reference, "Wallet");
        assert!(matches!(
            verify_link_dependencies("Wallet", &own, &ctx, &chain),
            Err(DeploymentError::SelfReference(_))
        ));
    }

    #[test]
    fn test_deployments_view() {
        let address = Address::new([0x42; 20]);
        let mut records = BTreeMap::new();
        records.insert("Owned".to_string(), record(address));
        let deployments = Deployments::new("blockchain://x".to_string(), records);

        assert_eq!(deployments.address("Owned"), Some(address));
        assert!(deployments.contains("Owned"));
        assert_eq!(deployments.names().collect::<Vec<_>>(), vec!["Owned"]);
        assert!(matches!(
            deployments.get("Missing"),
            Err(DeploymentError::InstanceNotFound(_))
        ));
        assert!(matches!(
            deployments.get("9Owned"),
            Err(DeploymentError::Validation(ValidationError::ContractName(_)))
        ));
    }
}
