//! Signed-message payloads
//!
//! A payload carries a 64-byte signature and a 32-byte public key behind a
//! 4-byte header. Two layouts exist:
//!
//! * 104 bytes, header `0xA0 | n, 0x40, 0x20, 0x04`: with `n = 0` the suffix is
//!   a checksum; otherwise it is a nonce and the KryptoHash of the payload
//!   must start with `n` zero bytes.
//! * 108 bytes, header `0xA8, 0x40, 0x20, 0x08`: the suffix holds compact
//!   difficulty bits and a nonce; the payload KryptoHash must meet that target.

use crate::address::Address;
use crate::error::{ConsensusError, Result};
use crate::hash::{hash160, hash256, krypto_hash};
use crate::pow::{expand_target, U320};
use crate::serialize::write_var_bytes;
use crate::types::Hash256;
use secp256k1::{schnorr, Message, Secp256k1, VerifyOnly, XOnlyPublicKey};

/// Prefix hashed in front of every signed message.
pub const MESSAGE_MAGIC: &str = "Kryptohash Signed Message:\n";

pub const CHECKSUM_PAYLOAD_LEN: usize = 104;
pub const DIFFICULTY_PAYLOAD_LEN: usize = 108;
/// Largest accepted `min_difficulty` for the difficulty layout.
pub const MAX_MIN_VERIFY_DIFFICULTY: u32 = 128;

const SIGNATURE_RANGE: std::ops::Range<usize> = 4..68;
const PUBKEY_RANGE: std::ops::Range<usize> = 68..100;

/// Digest a signer commits to: hash256 of the magic and the message, each length prefixed.
pub fn message_digest(message: &str) -> Hash256 {
    let mut data = Vec::new();
    // Writing into a Vec cannot fail
    let _ = write_var_bytes(&mut data, MESSAGE_MAGIC.as_bytes());
    let _ = write_var_bytes(&mut data, message.as_bytes());
    hash256(&data)
}

/// Verification of 64-byte signatures by 32-byte public keys.
pub trait PayloadVerifier {
    fn verify(&self, digest: &Hash256, signature: &[u8; 64], pubkey: &[u8; 32]) -> bool;
}

/// BIP340 Schnorr over secp256k1 with x-only public keys.
pub struct SchnorrPayloadVerifier {
    secp: Secp256k1<VerifyOnly>,
}

impl Default for SchnorrPayloadVerifier {
    fn default() -> Self {
        SchnorrPayloadVerifier { secp: Secp256k1::verification_only() }
    }
}

impl PayloadVerifier for SchnorrPayloadVerifier {
    fn verify(&self, digest: &Hash256, signature: &[u8; 64], pubkey: &[u8; 32]) -> bool {
        let (Ok(signature), Ok(pubkey)) = (schnorr::Signature::from_slice(signature), XOnlyPublicKey::from_slice(pubkey))
        else {
            return false;
        };
        let Ok(message) = Message::from_digest_slice(digest) else {
            return false;
        };
        self.secp.verify_schnorr(&signature, &message, &pubkey).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// 104-byte layout with `zero_bytes` leading zero bytes of work (0 means checksum).
    Checksum { zero_bytes: u8 },
    /// 108-byte layout with explicit compact difficulty.
    Difficulty { bits: u32 },
}

/// A parsed payload; the raw bytes are kept for hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    bytes: Vec<u8>,
    kind: PayloadKind,
}

impl SignedPayload {
    /// Check the header and length and classify the layout.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let Some(&first) = bytes.first() else {
            return Err(ConsensusError::InvalidSignature("empty payload".to_string()));
        };
        let kind = if first & 0xF8 == 0xA0 {
            if bytes.len() != CHECKSUM_PAYLOAD_LEN {
                return Err(ConsensusError::InvalidSignature("signature length is incorrect".to_string()));
            }
            if bytes[1..4] != [0x40, 0x20, 0x04] {
                return Err(ConsensusError::InvalidSignature("malformed header".to_string()));
            }
            PayloadKind::Checksum { zero_bytes: first & 0x07 }
        } else if first == 0xA8 {
            if bytes.len() != DIFFICULTY_PAYLOAD_LEN {
                return Err(ConsensusError::InvalidSignature("signature length is incorrect".to_string()));
            }
            if bytes[1..4] != [0x40, 0x20, 0x08] {
                return Err(ConsensusError::InvalidSignature("malformed header".to_string()));
            }
            let at = bytes.len() - 8;
            let bits = u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
            PayloadKind::Difficulty { bits }
        } else {
            return Err(ConsensusError::InvalidSignature("invalid header magic".to_string()));
        };
        Ok(SignedPayload { bytes: bytes.to_vec(), kind })
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    pub fn signature(&self) -> [u8; 64] {
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&self.bytes[SIGNATURE_RANGE]);
        signature
    }

    pub fn pubkey(&self) -> [u8; 32] {
        let mut pubkey = [0u8; 32];
        pubkey.copy_from_slice(&self.bytes[PUBKEY_RANGE]);
        pubkey
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Check the suffix: checksum, leading zero bytes or explicit difficulty.
    ///
    /// `min_difficulty` is the number of leading zero bits the verifier demands.
    pub fn check_work(&self, min_difficulty: u32) -> Result<()> {
        match self.kind {
            PayloadKind::Checksum { zero_bytes: 0 } => {
                let split = self.bytes.len() - 4;
                let digest = hash256(&self.bytes[..split]);
                if digest[..4] != self.bytes[split..] {
                    return Err(ConsensusError::InvalidSignature("checksum mismatch".to_string()));
                }
                Ok(())
            }
            PayloadKind::Checksum { zero_bytes } => {
                let zero_bits = u32::from(zero_bytes) * 8;
                if min_difficulty > zero_bits {
                    return Err(ConsensusError::InvalidProofOfWork("higher difficulty is needed".to_string()));
                }
                self.meets(&U320::MAX.shr(zero_bits))
            }
            PayloadKind::Difficulty { bits } => {
                if min_difficulty > MAX_MIN_VERIFY_DIFFICULTY {
                    return Err(ConsensusError::InvalidProofOfWork("minimum difficulty too high".to_string()));
                }
                let target = expand_target(bits)?;
                if target > U320::MAX.shr(min_difficulty) {
                    return Err(ConsensusError::InvalidProofOfWork("higher difficulty is needed".to_string()));
                }
                self.meets(&target)
            }
        }
    }

    fn meets(&self, target: &U320) -> Result<()> {
        if U320::from_hash(&krypto_hash(&self.bytes)) > *target {
            return Err(ConsensusError::InvalidProofOfWork("insufficient proof of work".to_string()));
        }
        Ok(())
    }

    /// Full verification: suffix, key ownership of `address` and the signature over `message`.
    pub fn verify(
        &self,
        address: &Address,
        message: &str,
        min_difficulty: u32,
        verifier: &dyn PayloadVerifier,
    ) -> Result<bool> {
        self.check_work(min_difficulty)?;
        let pubkey = self.pubkey();
        if *address != Address::PubkeyHash(hash160(&pubkey)) {
            return Ok(false);
        }
        Ok(verifier.verify(&message_digest(message), &self.signature(), &pubkey))
    }
}
