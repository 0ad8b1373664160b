//! Core Kryptohash types for consensus validation

use crate::constants::{MAX_MONEY, SEQUENCE_FINAL};
use crate::error::{ConsensusError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// 256-bit digest (double SHA3-256)
pub type Hash256 = [u8; 32];

/// 160-bit digest (SHA3-256 then RIPEMD-160)
pub type Hash160 = [u8; 20];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Amount in base units
pub type Amount = i64;

/// Block height
pub type Height = i64;

/// 320-bit digest: ℍ = {0,1}³²⁰
///
/// Stored little-endian like the integer it represents; displayed
/// most-significant byte first.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash320(pub [u8; 40]);

impl Hash320 {
    pub const ZERO: Hash320 = Hash320([0u8; 40]);

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 40] = bytes.try_into().map_err(|_| {
            ConsensusError::Serialization(format!("expected 40 digest bytes, got {}", bytes.len()))
        })?;
        Ok(Hash320(array))
    }

    /// Parse the display form (byte-reversed hex).
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = hex::decode(s)
            .map_err(|e| ConsensusError::Serialization(format!("bad digest hex: {e}")))?;
        bytes.reverse();
        Self::from_slice(&bytes)
    }

    /// Compile-time variant of [`Hash320::from_hex`] for digest literals.
    pub const fn from_display_hex(s: &str) -> Hash320 {
        let bytes = s.as_bytes();
        assert!(bytes.len() == 80, "digest literal must be 80 hex characters");
        let mut out = [0u8; 40];
        let mut i = 0;
        while i < 40 {
            out[39 - i] = (hex_nibble(bytes[2 * i]) << 4) | hex_nibble(bytes[2 * i + 1]);
            i += 1;
        }
        Hash320(out)
    }

    pub fn to_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode_upper(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; 40] {
        &self.0
    }

    /// Low 64 bits of the digest read as an integer.
    pub fn low_u64(&self) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(word)
    }
}

const fn hex_nibble(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => panic!("invalid hex digit in digest literal"),
    }
}

impl Default for Hash320 {
    fn default() -> Self {
        Hash320::ZERO
    }
}

impl Ord for Hash320 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.iter().rev().cmp(other.0.iter().rev())
    }
}

impl PartialOrd for Hash320 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Hash320 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash320 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash320({})", self.to_hex())
    }
}

impl Serialize for Hash320 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash320 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash320::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// OutPoint: 𝒪 = ℍ × ℕ₃₂
///
/// Ordered by (digest, index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash320,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash320, index: u32) -> Self {
        OutPoint { hash, index }
    }

    /// Coinbase input marker.
    pub fn null() -> Self {
        OutPoint { hash: Hash320::ZERO, index: u32::MAX }
    }

    /// One-time coin-share input referencing the genesis allocation.
    pub fn genesis() -> Self {
        OutPoint { hash: Hash320::ZERO, index: u32::MAX - 1 }
    }

    pub fn is_null(&self) -> bool {
        self.hash.is_zero() && self.index == u32::MAX
    }

    pub fn is_genesis(&self) -> bool {
        self.hash.is_zero() && self.index == u32::MAX - 1
    }
}

/// Transaction Input: ℐ = 𝒪 × 𝕊 × ℕ₃₂
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: ByteString,
    pub sequence: u32,
}

impl TxIn {
    pub fn new(prevout: OutPoint, script_sig: ByteString) -> Self {
        TxIn { prevout, script_sig, sequence: SEQUENCE_FINAL }
    }

    pub fn is_final(&self) -> bool {
        self.sequence == SEQUENCE_FINAL
    }
}

/// Transaction Output: 𝒯 = ℤ × 𝕊
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: ByteString,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: ByteString) -> Self {
        TxOut { value, script_pubkey }
    }

    /// Unset output (value -1).
    pub fn null() -> Self {
        TxOut { value: -1, script_pubkey: Vec::new() }
    }

    pub fn is_null(&self) -> bool {
        self.value == -1
    }

    /// Stake marker: zero value and empty script.
    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.is_empty()
    }

    /// An output is dust when spending it costs more than a third of its value
    /// at the given relay fee per kilobyte.
    pub fn is_dust(&self, min_relay_fee: Amount) -> bool {
        let size = crate::serialize::serialized_size(self) as i64 + 148;
        (self.value * 1000) / (3 * size) < min_relay_fee
    }
}

/// Transaction: 𝒯𝒳 = ℤ × ℐ* × 𝒯* × ℤ × ℤ × ℕ₆₄
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    /// Milliseconds since the epoch.
    pub tx_time: i64,
    pub lock_time: i64,
    /// Reserved for side chains; zero outside coinbase.
    pub hash_coin: u64,
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction {
            version: crate::constants::CURRENT_TX_VERSION,
            inputs: Vec::new(),
            outputs: Vec::new(),
            tx_time: 0,
            lock_time: 0,
            hash_coin: 0,
        }
    }
}

impl Transaction {
    pub fn is_null(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    pub fn is_coin_base(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    pub fn is_coin_share(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_genesis()
    }

    pub fn is_coin_stake(&self) -> bool {
        !self.inputs.is_empty()
            && !self.inputs[0].prevout.is_null()
            && self.outputs.len() >= 2
            && self.outputs[0].is_empty()
    }

    /// Sum of output values; errors when any partial sum leaves the money range.
    pub fn value_out(&self) -> Result<Amount> {
        let mut total: Amount = 0;
        for output in &self.outputs {
            total = total
                .checked_add(output.value)
                .filter(|sum| output.value >= 0 && (0..=MAX_MONEY).contains(sum))
                .ok_or_else(|| {
                    ConsensusError::TransactionValidation("value out of range".to_string())
                })?;
        }
        Ok(total)
    }
}

/// Block Header: ℋ, 120 bytes on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub region: i32,
    pub prev_block_hash: Hash320,
    pub merkle_root: Hash320,
    /// Time of the oldest transaction in the body, in milliseconds.
    pub tx_time: i64,
    pub hash_coin: u64,
    pub sig_checksum: u32,
    pub bits: u32,
    /// Offset in milliseconds from `tx_time`.
    pub time: u32,
    pub nonce: u32,
}

impl Default for BlockHeader {
    fn default() -> Self {
        BlockHeader {
            version: crate::constants::CURRENT_BLOCK_VERSION,
            region: 0,
            prev_block_hash: Hash320::ZERO,
            merkle_root: Hash320::ZERO,
            tx_time: 0,
            hash_coin: 0,
            sig_checksum: 0,
            bits: 0,
            time: 0,
            nonce: 0,
        }
    }
}

impl BlockHeader {
    pub fn is_null(&self) -> bool {
        self.bits == 0
    }

    /// Absolute block time in milliseconds.
    pub fn block_time_ms(&self) -> i64 {
        self.tx_time + i64::from(self.time)
    }
}

/// Block: ℬ = ℋ × 𝒯𝒳* × 𝕊
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// Optional stake or coinbase signature.
    pub signature: ByteString,
}

impl Block {
    pub fn is_proof_of_stake(&self) -> bool {
        self.transactions.len() > 1 && self.transactions[1].is_coin_stake()
    }

    pub fn is_proof_of_work(&self) -> bool {
        !self.is_proof_of_stake()
    }
}

/// Unspent output together with the facts needed to spend it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub output: TxOut,
    pub height: Height,
    pub is_coinbase: bool,
    pub version: i32,
}

impl Coin {
    pub fn new(output: TxOut, height: Height, is_coinbase: bool, version: i32) -> Self {
        Coin { output, height, is_coinbase, version }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spend(prevout: OutPoint) -> TxIn {
        TxIn::new(prevout, vec![0x51])
    }

    #[test]
    fn test_outpoint_markers() {
        assert!(OutPoint::null().is_null());
        assert!(!OutPoint::null().is_genesis());
        assert!(OutPoint::genesis().is_genesis());
        assert!(!OutPoint::genesis().is_null());
        assert!(!OutPoint::new(Hash320([1; 40]), u32::MAX).is_null());
    }

    #[test]
    fn test_outpoint_ordering() {
        let mut low = [0u8; 40];
        low[0] = 0xff;
        let mut high = [0u8; 40];
        high[39] = 0x01;
        assert!(OutPoint::new(Hash320(low), 9) < OutPoint::new(Hash320(high), 0));
        assert!(OutPoint::new(Hash320(low), 1) < OutPoint::new(Hash320(low), 2));
    }

    #[test]
    fn test_coinbase_and_coinshare_are_exclusive() {
        let coinbase = Transaction { inputs: vec![spend(OutPoint::null())], ..Default::default() };
        let coinshare = Transaction { inputs: vec![spend(OutPoint::genesis())], ..Default::default() };
        assert!(coinbase.is_coin_base() && !coinbase.is_coin_share());
        assert!(coinshare.is_coin_share() && !coinshare.is_coin_base());
    }

    #[test]
    fn test_coinstake_requires_empty_first_output() {
        let prevout = OutPoint::new(Hash320([7; 40]), 0);
        let mut tx = Transaction {
            inputs: vec![spend(prevout)],
            outputs: vec![TxOut::new(0, Vec::new()), TxOut::new(500, vec![0x51])],
            ..Default::default()
        };
        assert!(tx.is_coin_stake());
        tx.outputs[0].value = 1;
        assert!(!tx.is_coin_stake());
        tx.outputs = vec![TxOut::new(0, Vec::new())];
        assert!(!tx.is_coin_stake());
    }

    #[test]
    fn test_value_out_range() {
        let tx = Transaction {
            outputs: vec![TxOut::new(MAX_MONEY, vec![]), TxOut::new(1, vec![])],
            ..Default::default()
        };
        assert!(tx.value_out().is_err());
        let tx = Transaction { outputs: vec![TxOut::new(5, vec![]), TxOut::new(6, vec![])], ..Default::default() };
        assert_eq!(tx.value_out().unwrap(), 11);
    }

    #[test]
    fn test_hash_display_round_trip() {
        let text = "000000AA3109C4FA8691DDF8F96FCFBBEDBB8B1F3BE7675B875CD1552468A58F4F8997BF6636DB9F";
        let parsed = Hash320::from_hex(text).unwrap();
        assert_eq!(parsed, Hash320::from_display_hex(text));
        assert_eq!(parsed.to_hex(), text);
        assert_eq!(parsed.0[39], 0x00);
        assert_eq!(parsed.0[0], 0x9F);
    }

    #[test]
    fn test_header_null_and_block_kind() {
        let header = BlockHeader::default();
        assert!(header.is_null());
        let block = Block::default();
        assert!(block.is_proof_of_work());
    }
}
