//! Base58Check addresses and keys

use crate::chainparams::{Base58Type, ChainParams};
use crate::error::{ConsensusError, Result};
use crate::hash::{hash, hash160};
use crate::script::{is_pay_to_script_hash, pay_to_pubkey_hash};
use crate::script::opcodes::*;
use crate::types::Hash160;

const CHECKSUM_LEN: usize = 4;

/// Base58 of `version || payload || checksum`, with the checksum taken from
/// the first four bytes of the SHAKE320 digest of `version || payload`.
pub fn encode_check(version: &[u8], payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(version.len() + payload.len() + CHECKSUM_LEN);
    data.extend_from_slice(version);
    data.extend_from_slice(payload);
    let checksum = hash(&data);
    data.extend_from_slice(&checksum.0[..CHECKSUM_LEN]);
    bs58::encode(data).into_string()
}

/// Decode and verify; returns `version || payload`.
pub fn decode_check(s: &str) -> Result<Vec<u8>> {
    let mut data = bs58::decode(s)
        .into_vec()
        .map_err(|e| ConsensusError::Serialization(format!("invalid base58: {e}")))?;
    if data.len() < CHECKSUM_LEN {
        return Err(ConsensusError::Serialization("base58 data too short".to_string()));
    }
    let split = data.len() - CHECKSUM_LEN;
    let checksum = hash(&data[..split]);
    if checksum.0[..CHECKSUM_LEN] != data[split..] {
        return Err(ConsensusError::Serialization("base58 checksum mismatch".to_string()));
    }
    data.truncate(split);
    Ok(data)
}

/// Payment destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    PubkeyHash(Hash160),
    ScriptHash(Hash160),
}

impl Address {
    pub fn from_pubkey(pubkey: &[u8]) -> Self {
        Address::PubkeyHash(hash160(pubkey))
    }

    pub fn from_redeem_script(script: &[u8]) -> Self {
        Address::ScriptHash(hash160(script))
    }

    /// Recognise P2PKH and P2SH output scripts.
    pub fn from_script_pubkey(script: &[u8]) -> Option<Self> {
        let mut hash = [0u8; 20];
        if is_pay_to_script_hash(script) {
            hash.copy_from_slice(&script[2..22]);
            return Some(Address::ScriptHash(hash));
        }
        if script.len() == 25
            && script[0] == OP_DUP
            && script[1] == OP_HASH160
            && script[2] == 20
            && script[23] == OP_EQUALVERIFY
            && script[24] == OP_CHECKSIG
        {
            hash.copy_from_slice(&script[3..23]);
            return Some(Address::PubkeyHash(hash));
        }
        None
    }

    pub fn script_pubkey(&self) -> Vec<u8> {
        match self {
            Address::PubkeyHash(hash) => pay_to_pubkey_hash(hash),
            Address::ScriptHash(hash) => {
                let mut script = vec![OP_HASH160, 20];
                script.extend_from_slice(hash);
                script.push(OP_EQUAL);
                debug_assert!(is_pay_to_script_hash(&script));
                script
            }
        }
    }

    pub fn encode(&self, params: &ChainParams) -> String {
        match self {
            Address::PubkeyHash(hash) => encode_check(params.base58_prefix(Base58Type::PubkeyAddress), hash),
            Address::ScriptHash(hash) => encode_check(params.base58_prefix(Base58Type::ScriptAddress), hash),
        }
    }

    pub fn decode(s: &str, params: &ChainParams) -> Result<Self> {
        let data = decode_check(s)?;
        for (kind, make) in [
            (Base58Type::PubkeyAddress, Address::PubkeyHash as fn(Hash160) -> Address),
            (Base58Type::ScriptAddress, Address::ScriptHash as fn(Hash160) -> Address),
        ] {
            let prefix = params.base58_prefix(kind);
            if data.len() == prefix.len() + 20 && data.starts_with(prefix) {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&data[prefix.len()..]);
                return Ok(make(hash));
            }
        }
        Err(ConsensusError::Serialization(format!("{s} is not an address on {}", params.network())))
    }
}

/// Wallet import form of a secret key; `compressed` appends the 0x01 marker.
pub fn encode_secret(params: &ChainParams, secret: &[u8; 32], compressed: bool) -> String {
    let mut payload = secret.to_vec();
    if compressed {
        payload.push(1);
    }
    encode_check(params.base58_prefix(Base58Type::SecretKey), &payload)
}

/// Returns the secret and whether it marks a compressed public key.
pub fn decode_secret(params: &ChainParams, s: &str) -> Result<([u8; 32], bool)> {
    let data = decode_check(s)?;
    let prefix = params.base58_prefix(Base58Type::SecretKey);
    let body = data
        .strip_prefix(prefix)
        .ok_or_else(|| ConsensusError::Serialization("wrong secret key prefix".to_string()))?;
    let compressed = match body.len() {
        32 => false,
        33 if body[32] == 1 => true,
        _ => return Err(ConsensusError::Serialization("malformed secret key".to_string())),
    };
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&body[..32]);
    Ok((secret, compressed))
}
