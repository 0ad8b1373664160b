//! Proof of work: 320-bit targets, difficulty retargeting and the nonce search buffers

use crate::chainparams::ChainParams;
use crate::constants::{BLOCK_HEADER_SIZE, BLOCK_HEADER_STABLE_SIZE};
use crate::error::{ConsensusError, Result};
use crate::hash::{krypto_from_sponge, ScratchpadOrder, Shake320};
use crate::serialize::serialize;
use crate::types::*;
use std::cmp::Ordering;

/// 320-bit unsigned integer for target arithmetic, least significant word first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct U320(pub [u64; 5]);

impl U320 {
    pub const ZERO: U320 = U320([0; 5]);
    pub const MAX: U320 = U320([u64::MAX; 5]);

    pub fn from_u64(value: u64) -> Self {
        U320([value, 0, 0, 0, 0])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&x| x == 0)
    }

    pub fn low_u64(&self) -> u64 {
        self.0[0]
    }

    /// Number of significant bits.
    pub fn bits(&self) -> u32 {
        for (i, word) in self.0.iter().enumerate().rev() {
            if *word != 0 {
                return 64 * i as u32 + (64 - word.leading_zeros());
            }
        }
        0
    }

    pub fn shl(&self, shift: u32) -> Self {
        if shift >= 320 {
            return U320::ZERO;
        }
        let mut result = U320::ZERO;
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in 0..5 {
            if i + word_shift < 5 {
                result.0[i + word_shift] |= self.0[i] << bit_shift;
                if bit_shift > 0 && i + word_shift + 1 < 5 {
                    result.0[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
                }
            }
        }
        result
    }

    pub fn shr(&self, shift: u32) -> Self {
        if shift >= 320 {
            return U320::ZERO;
        }
        let mut result = U320::ZERO;
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in word_shift..5 {
            result.0[i - word_shift] |= self.0[i] >> bit_shift;
            if bit_shift > 0 && i > word_shift {
                result.0[i - word_shift - 1] |= self.0[i] << (64 - bit_shift);
            }
        }
        result
    }

    /// Multiply by a word, `None` on overflow.
    pub fn checked_mul_u64(&self, rhs: u64) -> Option<Self> {
        let mut result = U320::ZERO;
        let mut carry: u128 = 0;
        for i in 0..5 {
            let product = u128::from(self.0[i]) * u128::from(rhs) + carry;
            result.0[i] = product as u64;
            carry = product >> 64;
        }
        if carry == 0 {
            Some(result)
        } else {
            None
        }
    }

    /// Divide by a non-zero word.
    pub fn div_u64(&self, rhs: u64) -> Self {
        debug_assert!(rhs != 0);
        let mut result = U320::ZERO;
        let mut remainder: u128 = 0;
        for i in (0..5).rev() {
            let current = (remainder << 64) | u128::from(self.0[i]);
            result.0[i] = (current / u128::from(rhs)) as u64;
            remainder = current % u128::from(rhs);
        }
        result
    }

    pub fn from_hash(hash: &Hash320) -> Self {
        let mut words = [0u64; 5];
        for (word, chunk) in words.iter_mut().zip(hash.0.chunks_exact(8)) {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            *word = u64::from_le_bytes(bytes);
        }
        U320(words)
    }

    pub fn to_hash(&self) -> Hash320 {
        let mut bytes = [0u8; 40];
        for (chunk, word) in bytes.chunks_exact_mut(8).zip(self.0.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Hash320(bytes)
    }

    /// SetCompact: ℕ₃₂ → U320 × 𝔹 × 𝔹
    ///
    /// Returns `(value, negative, overflow)`.
    pub fn from_compact(compact: u32) -> (Self, bool, bool) {
        let size = compact >> 24;
        let mut word = compact & 0x007f_ffff;
        let value = if size <= 3 {
            word >>= 8 * (3 - size);
            U320::from_u64(u64::from(word))
        } else {
            U320::from_u64(u64::from(word)).shl(8 * (size - 3))
        };
        let negative = word != 0 && (compact & 0x0080_0000) != 0;
        let overflow = word != 0
            && (size > 42 || (word > 0xff && size > 41) || (word > 0xffff && size > 40));
        (value, negative, overflow)
    }

    /// GetCompact: U320 → ℕ₃₂
    pub fn to_compact(&self) -> u32 {
        let mut size = (self.bits() + 7) / 8;
        let mut compact = if size <= 3 {
            (self.low_u64() << (8 * (3 - size))) as u32
        } else {
            self.shr(8 * (size - 3)).low_u64() as u32
        };
        // The sign bit is set, shift the mantissa into the next byte
        if compact & 0x0080_0000 != 0 {
            compact >>= 8;
            size += 1;
        }
        compact | (size << 24)
    }
}

impl PartialOrd for U320 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U320 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.iter().rev().cmp(other.0.iter().rev())
    }
}

/// Expand `bits` into a target, rejecting negative, overflowing and zero forms.
pub fn expand_target(bits: u32) -> Result<U320> {
    let (target, negative, overflow) = U320::from_compact(bits);
    if negative || overflow || target.is_zero() {
        return Err(ConsensusError::InvalidProofOfWork(format!("invalid compact target {bits:#010x}")));
    }
    Ok(target)
}

/// CheckProofOfWork: ℍ × ℕ₃₂ → {true, false}
///
/// 1. Expand `bits`; malformed targets and targets above the network limit are errors
/// 2. Return hash ≤ target
pub fn check_proof_of_work(hash: &Hash320, bits: u32, params: &ChainParams) -> Result<bool> {
    let target = expand_target(bits)?;
    if target > *params.pow_limit() {
        return Err(ConsensusError::InvalidProofOfWork("target above the proof-of-work limit".to_string()));
    }
    Ok(U320::from_hash(hash) <= target)
}

/// GetNextWorkRequired: ℋ* → ℕ₃₂
///
/// Windowed retarget over block times. For headers prev ending at the tip:
/// 1. If prev is empty: return the proof-of-work limit
/// 2. If the network does not retarget: return tip.bits
/// 3. Let w = min(|prev| - 1, window); if w = 0 return tip.bits
/// 4. Let actual = tip.time - prev[|prev|-1-w].time, clamped to [expected/4, expected×4]
///    with expected = w × spacing
/// 5. Return min(target(tip.bits) × actual / expected, limit)
pub fn get_next_work_required(prev_headers: &[BlockHeader], params: &ChainParams) -> Result<u32> {
    let limit = *params.pow_limit();
    let Some(tip) = prev_headers.last() else {
        return Ok(limit.to_compact());
    };
    if params.no_retargeting() {
        return Ok(tip.bits);
    }

    let window = (prev_headers.len() - 1).min(params.retarget_window());
    if window == 0 {
        return Ok(tip.bits);
    }
    let first = &prev_headers[prev_headers.len() - 1 - window];

    let expected = window as i64 * params.target_spacing_ms();
    let actual = (tip.block_time_ms() - first.block_time_ms()).clamp(expected / 4, expected * 4);

    let target = expand_target(tip.bits)?;
    let retargeted = match target.checked_mul_u64(actual as u64) {
        Some(scaled) => scaled.div_u64(expected as u64),
        None => limit,
    };
    Ok(retargeted.min(limit).to_compact())
}

/// Fixed header layout for the nonce search.
///
/// The first 112 bytes (everything but time and nonce) are absorbed once;
/// each trial only absorbs the last 8 bytes.
#[derive(Clone)]
pub struct KryptoHashBuffers {
    data: [u8; BLOCK_HEADER_SIZE],
    midstate: Shake320,
    order: ScratchpadOrder,
}

impl KryptoHashBuffers {
    /// FormatKryptoHashBuffers
    pub fn format(header: &BlockHeader) -> Self {
        let mut data = [0u8; BLOCK_HEADER_SIZE];
        data.copy_from_slice(&serialize(header));
        let mut midstate = Shake320::new();
        midstate.update(&data[..BLOCK_HEADER_STABLE_SIZE]);
        KryptoHashBuffers { data, midstate, order: header_scratchpad_order(header.version) }
    }

    pub fn data(&self) -> &[u8; BLOCK_HEADER_SIZE] {
        &self.data
    }

    pub fn time(&self) -> u32 {
        u32::from_le_bytes([self.data[112], self.data[113], self.data[114], self.data[115]])
    }

    pub fn set_time(&mut self, time: u32) {
        self.data[112..116].copy_from_slice(&time.to_le_bytes());
    }

    pub fn hash_with_nonce(&self, nonce: u32) -> Hash320 {
        let mut ctx = self.midstate.clone();
        ctx.update(&self.data[112..116]);
        ctx.update(&nonce.to_le_bytes());
        krypto_from_sponge(ctx, self.order)
    }
}

pub fn header_scratchpad_order(version: i32) -> ScratchpadOrder {
    if version >= crate::constants::REVERSED_SCRATCHPAD_VERSION {
        ScratchpadOrder::Reversed
    } else {
        ScratchpadOrder::Forward
    }
}

/// Outcome of one bounded nonce scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    Found { nonce: u32, hash: Hash320 },
    /// The scan reached a nonce-mask boundary; resume from `next_nonce`.
    Exhausted { next_nonce: u32 },
    /// Every nonce up to `u32::MAX` was tried.
    Wrapped,
}

/// Try nonces from `start_nonce` until a hit or until the nonce crosses a
/// `nonce_mask` boundary.
pub fn scan_krypto_hash(buffers: &KryptoHashBuffers, start_nonce: u32, nonce_mask: u32, target: &U320) -> ScanResult {
    let mut nonce = start_nonce;
    loop {
        let hash = buffers.hash_with_nonce(nonce);
        if U320::from_hash(&hash) <= *target {
            return ScanResult::Found { nonce, hash };
        }
        nonce = match nonce.checked_add(1) {
            Some(next) => next,
            None => return ScanResult::Wrapped,
        };
        if nonce & nonce_mask == 0 {
            return ScanResult::Exhausted { next_nonce: nonce };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow_limit_compact() {
        let limit = U320::MAX.shr(24);
        assert_eq!(limit.to_compact(), 0x2600ffff);
        let (expanded, negative, overflow) = U320::from_compact(0x2600ffff);
        assert!(!negative && !overflow);
        assert_eq!(expanded, U320::from_u64(0xffff).shl(280));
        assert!(expanded <= limit);
    }

    #[test]
    fn test_compact_round_trip_small_values() {
        assert_eq!(U320::from_compact(0x01120000).0, U320::from_u64(0x12));
        assert_eq!(U320::from_compact(0x02123400).0, U320::from_u64(0x1234));
        assert_eq!(U320::from_compact(0x05009234).0, U320::from_u64(0x92340000));
        assert_eq!(U320::from_u64(0x12).to_compact(), 0x01120000);
        assert_eq!(U320::from_u64(0x80).to_compact(), 0x02008000);
    }

    #[test]
    fn test_compact_flags() {
        assert!(U320::from_compact(0x04923456).1);
        assert!(U320::from_compact(0xff123456).2);
        assert!(expand_target(0).is_err());
        assert!(expand_target(0x04923456).is_err());
    }

    #[test]
    fn test_mul_div() {
        let value = U320::from_u64(u64::MAX).shl(200);
        let doubled = value.checked_mul_u64(2).unwrap();
        assert_eq!(doubled, value.shl(1));
        assert_eq!(doubled.div_u64(2), value);
        assert!(U320::MAX.checked_mul_u64(2).is_none());
        assert_eq!(value.bits(), 264);
    }

    #[test]
    fn test_hash_conversion() {
        let mut bytes = [0u8; 40];
        bytes[39] = 0x80;
        bytes[0] = 1;
        let value = U320::from_hash(&Hash320(bytes));
        assert_eq!(value.bits(), 320);
        assert_eq!(value.low_u64(), 1);
        assert_eq!(value.to_hash(), Hash320(bytes));
    }

    #[test]
    fn test_buffers_match_header_hash() {
        let header = BlockHeader {
            bits: 0x2600ffff,
            tx_time: 0x149ABA00000,
            time: 300_000,
            nonce: 17,
            ..Default::default()
        };
        let buffers = KryptoHashBuffers::format(&header);
        assert_eq!(buffers.time(), 300_000);
        assert_eq!(buffers.hash_with_nonce(17), header.hash());
    }

    #[test]
    fn test_scan_finds_with_trivial_target() {
        let buffers = KryptoHashBuffers::format(&BlockHeader::default());
        match scan_krypto_hash(&buffers, 5, 0xff, &U320::MAX) {
            ScanResult::Found { nonce, hash } => {
                assert_eq!(nonce, 5);
                assert_eq!(hash, buffers.hash_with_nonce(5));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_scan_stops_at_mask_boundary() {
        let buffers = KryptoHashBuffers::format(&BlockHeader::default());
        let result = scan_krypto_hash(&buffers, 0xfd, 0xff, &U320::ZERO);
        assert_eq!(result, ScanResult::Exhausted { next_nonce: 0x100 });
        assert_eq!(scan_krypto_hash(&buffers, u32::MAX, 0xff, &U320::ZERO), ScanResult::Wrapped);
    }
}
