//! # Kryptohash Consensus
//!
//! Consensus core of the Kryptohash chain: SHAKE320 hashing and the
//! memory-hard KryptoHash proof of work, the transaction and block data model
//! with its wire format, Merkle commitments, per-network chain parameters, the
//! transaction memory pool and the block assembler used by miners.
//!
//! ## Architecture
//!
//! - `hash`, `merkle`, `serialize`: identities and encodings
//! - `transaction`, `script`, `block`, `pow`, `economic`: consensus rules
//! - `coins`, `mempool`, `mining`: UTXO views, pool admission, templates and the nonce search
//! - `chain`: tip, coins and pool behind one lock
//! - `chainparams`, `checkpoints`, `network`, `address`, `message`: per-network data and encodings
//!
//! ## Design Principles
//!
//! 1. **Explicit results**: rule violations are `ValidationResult` values, faults are `ConsensusError`
//! 2. **Exact Version Pinning**: the secp256k1 backend is pinned to an exact version
//! 3. **One lock order**: chain state before mempool
//!
//! ## Usage
//!
//! ```rust
//! use kryptohash_consensus::chain::ChainState;
//! use kryptohash_consensus::chainparams::{ChainParams, Network};
//!
//! let chain = ChainState::new(ChainParams::new(Network::Regtest));
//! let (height, tip) = chain.tip();
//! assert_eq!(height, 0);
//! assert_eq!(tip, *chain.params().genesis_hash());
//! ```

pub mod address;
pub mod block;
pub mod chain;
pub mod chainparams;
pub mod checkpoints;
pub mod coins;
pub mod constants;
pub mod economic;
pub mod error;
pub mod hash;
pub mod mempool;
pub mod merkle;
pub mod message;
pub mod mining;
pub mod network;
pub mod pow;
pub mod script;
pub mod serialize;
pub mod transaction;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{ConsensusError, Result};
pub use chain::ChainState;
pub use chainparams::{ChainParams, Network};
pub use mempool::TxMemPool;
pub use mining::{AssemblerConfig, BlockAssembler, BlockTemplate};
pub use validation::{RejectCode, ValidationResult};
