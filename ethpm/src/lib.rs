//! # ethpm
//!
//! A package manager for Ethereum smart contracts, built around three parts:
//!
//! - **URI resolution**: content-addressed URIs (`ipfs://`, GitHub blob URLs,
//!   `erc1319://` registry URIs) are fetched through interchangeable backends
//!   and verified against their embedded hash.
//! - **Bytecode linking**: library addresses are written into placeholder
//!   regions of unlinked bytecode, with values resolved through nested build
//!   dependencies.
//! - **Packages**: validated v2 manifests, their build dependencies, and the
//!   deployments that match the chain a package is bound to.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                              ETHPM                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐          │
//! │  │   Package    │──>│  Dispatcher  │──>│   Backends   │          │
//! │  │ (package.rs) │   │(dispatch.rs) │   │ ipfs/github/ │          │
//! │  └──────────────┘   └──────────────┘   │   registry   │          │
//! │     │       │                          └──────────────┘          │
//! │     │       └─────────────┐                    │                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐          │
//! │  │   Linker     │   │ Deployments  │──>│ ChainQuery   │          │
//! │  │ (linker.rs)  │   │(deployments) │   │  (chain.rs)  │          │
//! │  └──────────────┘   └──────────────┘   └──────────────┘          │
//! │                                                                  │
//! │  manifest.rs · validation.rs · builder.rs · hash.rs · uri.rs     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let config = Config::from_env()?;
//! let dispatcher = Arc::new(BackendDispatcher::from_config(&config, None)?);
//! let package = Package::from_uri("ipfs://Qm...", dispatcher)?
//!     .with_chain(chain);
//! let wallet = package.link_factory("Wallet", &references)?;
//! ```

#![warn(rust_2018_idioms)]

pub mod address;
pub mod backends;
pub mod builder;
pub mod chain;
pub mod config;
pub mod contract;
pub mod dependencies;
pub mod deployments;
pub mod dispatch;
pub mod hash;
pub mod linker;
pub mod manifest;
pub mod package;
pub mod uri;
pub mod validation;

// Re-exports
pub use address::{Address, AddressError};
pub use backends::{BackendError, BackendKind, UriBackend};
pub use builder::ManifestBuilder;
pub use chain::{ChainError, ChainQuery, ChainUri, StaticChain, B256};
pub use config::{Config, ConfigError};
pub use contract::{ContractFactory, ContractInstance};
pub use dependencies::Dependencies;
pub use deployments::{DeploymentError, Deployments};
pub use dispatch::{BackendDispatcher, ResolveError};
pub use hash::HashError;
pub use linker::{LinkContext, LinkError, LinkReference};
pub use manifest::{BytecodeObject, ContractType, DeploymentRecord, LinkValue, LinkValueKind, Manifest};
pub use package::{Package, PackageError};
pub use uri::UriError;
pub use validation::ValidationError;
