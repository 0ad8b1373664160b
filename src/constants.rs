//! Kryptohash consensus constants

/// Smallest units per coin
pub const COIN: i64 = 100_000;

/// One hundredth of a coin
pub const CENT: i64 = 1_000;

/// Maximum money supply: 10,000,000,000,000 coins in base units
pub const MAX_MONEY: i64 = 10_000_000_000_000 * COIN;

/// Default transaction version
pub const CURRENT_TX_VERSION: i32 = 2;

/// Default block header version
pub const CURRENT_BLOCK_VERSION: i32 = 1;

/// Header versions at or above this use the reversed scratchpad KryptoHash
pub const REVERSED_SCRATCHPAD_VERSION: i32 = 2;

/// Maximum serialized block size
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Maximum signature operations per block
pub const MAX_BLOCK_SIGOPS: usize = MAX_BLOCK_SIZE / 50;

/// Default upper bound for assembled blocks
pub const DEFAULT_BLOCK_MAX_SIZE: usize = 750_000;

/// Bytes reserved for high-priority transactions in a template
pub const DEFAULT_BLOCK_PRIORITY_SIZE: usize = 50_000;

/// Size floor below which free transactions are still admitted to a template
pub const DEFAULT_BLOCK_MIN_SIZE: usize = 0;

/// Minimum relay fee per kilobyte
pub const DEFAULT_MIN_RELAY_TX_FEE: i64 = 1_000;

/// Maximum standard transaction size
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;

/// Maximum script length
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum script element size
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;

/// Maximum stack size during script execution
pub const MAX_STACK_SIZE: usize = 1000;

/// Maximum number of non-push operations in a script
pub const MAX_SCRIPT_OPS: usize = 201;

/// Maximum public keys in one CHECKMULTISIG
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// Blocks before a coinbase output can be spent
pub const COINBASE_MATURITY: i64 = 100;

/// Lock times below this are block heights, otherwise millisecond timestamps
pub const LOCKTIME_THRESHOLD: i64 = 500_000_000;

/// Sequence number for final inputs
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Height assigned to coins that only exist in the mempool
pub const MEMPOOL_HEIGHT: i64 = 0x7FFF_FFFF;

/// Largest length accepted by a compact size prefix
pub const MAX_SIZE: u64 = 0x0200_0000;

/// Number of prior blocks used for the median time past
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Transaction times older than this (ms) are clamped in template headers
pub const MAX_TX_TIME_AGE_MS: i64 = 600_000;

/// Sponge rate of SHAKE320 in bytes
pub const SHAKE320_RATE: usize = 120;

/// KryptoHash scratchpad size in bytes
pub const KPROOF_OF_WORK_SZ: usize = SHAKE320_RATE * 546;

/// Serialized block header size
pub const BLOCK_HEADER_SIZE: usize = 120;

/// Header bytes that stay constant during the nonce search
pub const BLOCK_HEADER_STABLE_SIZE: usize = 112;
