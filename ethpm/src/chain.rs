//! Chain-query collaborator and BIP-122 chain URIs.
//!
//! The package model never talks to a node directly. Everything it needs
//! from a live chain goes through [`ChainQuery`]:
//!
//! ```text
//! DeploymentMatcher ──> get_block(earliest / hash), get_transaction_receipt
//! Package           ──> get_code (linked bytecode cross-check)
//! RegistryBackend   ──> call (release lookup), resolve_name (ENS)
//! ```
//!
//! A chain URI binds a genesis hash to a block or transaction:
//!
//! ```text
//! blockchain://<genesis hash>/block/<block hash>
//! blockchain://<genesis hash>/transaction/<tx hash>
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub use alloy_primitives::B256;

use crate::address::Address;

/// Scheme of BIP-122 chain URIs.
pub const BLOCKCHAIN_URI_SCHEME: &str = "blockchain";

static CHAIN_URI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^blockchain://([0-9a-fA-F]{64})/(block|transaction)/([0-9a-fA-F]{64})$")
        .expect("chain URI pattern is valid")
});

/// Errors reported by a chain collaborator or while reading chain URIs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("invalid chain URI '{uri}': {reason}")]
    InvalidChainUri { uri: String, reason: String },

    #[error("invalid 32-byte hash: {0}")]
    InvalidHash(String),

    #[error("contract call to {to} failed: {reason}")]
    CallFailed { to: Address, reason: String },

    #[error("name '{0}' does not resolve to an address")]
    NameNotFound(String),

    #[error("unsupported chain operation: {0}")]
    Unsupported(String),

    #[error("chain transport error: {0}")]
    Transport(String),
}

/// Parse a 32-byte hash: 64 hex characters, with or without a `0x` prefix.
pub fn parse_hash(value: &str) -> Result<B256, ChainError> {
    B256::from_str(value).map_err(|_| ChainError::InvalidHash(value.to_string()))
}

/// Block selector for [`ChainQuery::get_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    /// The genesis block.
    Earliest,
    Number(u64),
    Hash(B256),
}

/// The subset of a block the package model reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub hash: B256,
    pub number: u64,
}

/// The subset of a transaction receipt the package model reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub block_hash: B256,
    /// Address of the contract created by this transaction, if any.
    pub contract_address: Option<Address>,
}

/// Read-only view of the chain a package is bound to.
///
/// Timeouts and retries are the implementor's concern.
pub trait ChainQuery: Send + Sync + fmt::Debug {
    /// Fetch a block. A missing block is [`ChainError::BlockNotFound`].
    fn get_block(&self, id: BlockId) -> Result<Block, ChainError>;

    /// Fetch a receipt, `None` if the transaction is unknown.
    fn get_transaction_receipt(&self, hash: &B256)
        -> Result<Option<TransactionReceipt>, ChainError>;

    /// Runtime code at `address`; empty for accounts without code.
    fn get_code(&self, address: &Address) -> Result<Vec<u8>, ChainError>;

    /// Execute a read-only contract call and return the raw ABI output.
    fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, ChainError>;

    /// Resolve an ENS name to an address.
    fn resolve_name(&self, name: &str) -> Result<Address, ChainError> {
        Err(ChainError::Unsupported(format!("ENS resolution of '{}'", name)))
    }
}

/// Kind of resource a chain URI points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Block,
    Transaction,
}

impl ResourceKind {
    fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Block => "block",
            ResourceKind::Transaction => "transaction",
        }
    }
}

/// A parsed BIP-122 chain URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainUri {
    /// Genesis block hash.
    pub chain_id: B256,
    pub resource: ResourceKind,
    pub resource_hash: B256,
}

impl ChainUri {
    /// Chain URI pointing at a block.
    pub fn block(chain_id: B256, block_hash: B256) -> Self {
        ChainUri {
            chain_id,
            resource: ResourceKind::Block,
            resource_hash: block_hash,
        }
    }

    pub fn parse(uri: &str) -> Result<Self, ChainError> {
        let caps = CHAIN_URI_RE
            .captures(uri)
            .ok_or_else(|| ChainError::InvalidChainUri {
                uri: uri.to_string(),
                reason: "expected blockchain://<64 hex>/<block|transaction>/<64 hex>".to_string(),
            })?;

        let resource = match &caps[2] {
            "block" => ResourceKind::Block,
            _ => ResourceKind::Transaction,
        };

        Ok(ChainUri {
            chain_id: parse_hash(&caps[1])?,
            resource,
            resource_hash: parse_hash(&caps[3])?,
        })
    }

    /// Whether this URI identifies the chain behind `chain`.
    ///
    /// The genesis hash must match and the named resource must exist there.
    pub fn matches(&self, chain: &dyn ChainQuery) -> Result<bool, ChainError> {
        let genesis = chain.get_block(BlockId::Earliest)?;
        if genesis.hash != self.chain_id {
            return Ok(false);
        }

        match self.resource {
            ResourceKind::Block => match chain.get_block(BlockId::Hash(self.resource_hash)) {
                Ok(block) => Ok(block.hash == self.resource_hash),
                Err(ChainError::BlockNotFound(_)) => Ok(false),
                Err(e) => Err(e),
            },
            ResourceKind::Transaction => Ok(chain
                .get_transaction_receipt(&self.resource_hash)?
                .is_some()),
        }
    }
}

/// Whether `value` is a well-formed chain URI.
pub fn is_chain_uri(value: &str) -> bool {
    CHAIN_URI_RE.is_match(value)
}

impl fmt::Display for ChainUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{}/{}",
            BLOCKCHAIN_URI_SCHEME,
            hex::encode(self.chain_id),
            self.resource.as_str(),
            hex::encode(self.resource_hash)
        )
    }
}

impl FromStr for ChainUri {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ============================================================================
// Static Chain
// ============================================================================

/// A fixed, in-memory chain for deterministic tests and offline tooling.
///
/// Block numbers are assigned in insertion order starting at genesis (0).
#[derive(Debug, Clone)]
pub struct StaticChain {
    blocks: Vec<Block>,
    receipts: HashMap<B256, TransactionReceipt>,
    code: HashMap<Address, Vec<u8>>,
    calls: HashMap<(Address, Vec<u8>), Vec<u8>>,
    names: HashMap<String, Address>,
}

impl StaticChain {
    /// Create a chain containing only its genesis block.
    pub fn new(genesis: B256) -> Self {
        StaticChain {
            blocks: vec![Block {
                hash: genesis,
                number: 0,
            }],
            receipts: HashMap::new(),
            code: HashMap::new(),
            calls: HashMap::new(),
            names: HashMap::new(),
        }
    }

    pub fn genesis(&self) -> B256 {
        self.blocks[0].hash
    }

    /// Append a block with the given hash.
    pub fn with_block(mut self, hash: B256) -> Self {
        let number = self.blocks.len() as u64;
        self.blocks.push(Block { hash, number });
        self
    }

    pub fn with_receipt(mut self, receipt: TransactionReceipt) -> Self {
        self.receipts.insert(receipt.transaction_hash, receipt);
        self
    }

    pub fn with_code(mut self, address: Address, code: Vec<u8>) -> Self {
        self.code.insert(address, code);
        self
    }

    /// Answer `call(to, calldata)` with `output`.
    pub fn with_call(mut self, to: Address, calldata: Vec<u8>, output: Vec<u8>) -> Self {
        self.calls.insert((to, calldata), output);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>, address: Address) -> Self {
        self.names.insert(name.into(), address);
        self
    }
}

impl ChainQuery for StaticChain {
    fn get_block(&self, id: BlockId) -> Result<Block, ChainError> {
        let found = match id {
            BlockId::Earliest => self.blocks.first(),
            BlockId::Number(n) => self.blocks.get(n as usize),
            BlockId::Hash(hash) => self.blocks.iter().find(|b| b.hash == hash),
        };
        found
            .cloned()
            .ok_or_else(|| ChainError::BlockNotFound(format!("{:?}", id)))
    }

    fn get_transaction_receipt(
        &self,
        hash: &B256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        Ok(self.receipts.get(hash).cloned())
    }

    fn get_code(&self, address: &Address) -> Result<Vec<u8>, ChainError> {
        Ok(self.code.get(address).cloned().unwrap_or_default())
    }

    fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, ChainError> {
        self.calls
            .get(&(*to, data.to_vec()))
            .cloned()
            .ok_or_else(|| ChainError::CallFailed {
                to: *to,
                reason: "execution reverted".to_string(),
            })
    }

    fn resolve_name(&self, name: &str) -> Result<Address, ChainError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| ChainError::NameNotFound(name.to_string()))
    }
}
