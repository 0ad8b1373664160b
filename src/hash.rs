//! SHAKE320 sponge, the two-stage KryptoHash and auxiliary digests
//!
//! SHAKE320 is Keccak-f[1600] with a 120-byte rate (640-bit capacity) and
//! the SHAKE domain suffix. Every object identity and every proof-of-work
//! digest in the chain is produced here.

use crate::constants::{KPROOF_OF_WORK_SZ, SHAKE320_RATE};
use crate::types::{Hash160, Hash256, Hash320};
use ripemd::Ripemd160;
use sha3::{Digest, Sha3_256};
use std::io;

const SHAKE320_SUFFIX: u8 = 0x1f;

/// Absorbing half of the SHAKE320 sponge.
#[derive(Clone)]
pub struct Shake320 {
    state: [u64; 25],
    buffer: [u8; SHAKE320_RATE],
    filled: usize,
}

impl Default for Shake320 {
    fn default() -> Self {
        Self::new()
    }
}

impl Shake320 {
    pub fn new() -> Self {
        Shake320 { state: [0u64; 25], buffer: [0u8; SHAKE320_RATE], filled: 0 }
    }

    pub fn update(&mut self, mut data: &[u8]) {
        if self.filled > 0 {
            let take = (SHAKE320_RATE - self.filled).min(data.len());
            self.buffer[self.filled..self.filled + take].copy_from_slice(&data[..take]);
            self.filled += take;
            data = &data[take..];
            if self.filled < SHAKE320_RATE {
                return;
            }
            let block = self.buffer;
            absorb_block(&mut self.state, &block);
            self.filled = 0;
        }

        let mut blocks = data.chunks_exact(SHAKE320_RATE);
        for block in &mut blocks {
            absorb_block(&mut self.state, block);
        }
        let rest = blocks.remainder();
        self.buffer[..rest.len()].copy_from_slice(rest);
        self.filled = rest.len();
    }

    /// Pad, absorb the final block and switch to squeezing.
    pub fn finalize_xof(mut self) -> Shake320Reader {
        let mut block = [0u8; SHAKE320_RATE];
        block[..self.filled].copy_from_slice(&self.buffer[..self.filled]);
        block[self.filled] ^= SHAKE320_SUFFIX;
        block[SHAKE320_RATE - 1] ^= 0x80;
        absorb_block(&mut self.state, &block);
        Shake320Reader { state: self.state, offset: 0 }
    }
}

fn absorb_block(state: &mut [u64; 25], block: &[u8]) {
    for (lane, chunk) in state.iter_mut().zip(block.chunks_exact(8)) {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        *lane ^= u64::from_le_bytes(word);
    }
    keccak::f1600(state);
}

/// Squeezing half of the SHAKE320 sponge.
pub struct Shake320Reader {
    state: [u64; 25],
    offset: usize,
}

impl Shake320Reader {
    pub fn squeeze(&mut self, mut out: &mut [u8]) {
        while !out.is_empty() {
            if self.offset == SHAKE320_RATE {
                keccak::f1600(&mut self.state);
                self.offset = 0;
            }
            let mut rate = [0u8; SHAKE320_RATE];
            for (chunk, lane) in rate.chunks_exact_mut(8).zip(self.state.iter()) {
                chunk.copy_from_slice(&lane.to_le_bytes());
            }
            let take = (SHAKE320_RATE - self.offset).min(out.len());
            out[..take].copy_from_slice(&rate[self.offset..self.offset + take]);
            self.offset += take;
            out = &mut out[take..];
        }
    }
}

/// Order in which the KryptoHash scratchpad is re-absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchpadOrder {
    Forward,
    /// 120-byte chunks last to first; block headers from version 2 on.
    Reversed,
}

/// Streaming hash writer.
///
/// Every terminal consumes the writer, so a context can be squeezed once.
#[derive(Clone, Default)]
pub struct HashWriter {
    sponge: Shake320,
}

impl HashWriter {
    pub fn new() -> Self {
        HashWriter { sponge: Shake320::new() }
    }

    pub fn write(&mut self, bytes: &[u8]) -> &mut Self {
        self.sponge.update(bytes);
        self
    }

    /// Single-stage SHAKE320 digest.
    pub fn finalize(self) -> Hash320 {
        squeeze_320(self.sponge)
    }

    /// Two-stage KryptoHash digest.
    pub fn finalize_krypto(self) -> Hash320 {
        krypto_from_sponge(self.sponge, ScratchpadOrder::Forward)
    }

    pub fn finalize_krypto_reversed(self) -> Hash320 {
        krypto_from_sponge(self.sponge, ScratchpadOrder::Reversed)
    }

    pub fn finalize_krypto_with(self, order: ScratchpadOrder) -> Hash320 {
        krypto_from_sponge(self.sponge, order)
    }

    /// 256 bits squeezed from the same sponge.
    pub fn finalize_256(self) -> Hash256 {
        let mut out = [0u8; 32];
        self.sponge.finalize_xof().squeeze(&mut out);
        out
    }
}

impl io::Write for HashWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sponge.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn squeeze_320(sponge: Shake320) -> Hash320 {
    let mut out = [0u8; 40];
    sponge.finalize_xof().squeeze(&mut out);
    Hash320(out)
}

pub(crate) fn krypto_from_sponge(sponge: Shake320, order: ScratchpadOrder) -> Hash320 {
    let mut scratchpad = vec![0u8; KPROOF_OF_WORK_SZ];
    sponge.finalize_xof().squeeze(&mut scratchpad);

    let mut second = Shake320::new();
    match order {
        ScratchpadOrder::Forward => second.update(&scratchpad),
        ScratchpadOrder::Reversed => {
            for chunk in scratchpad.chunks(SHAKE320_RATE).rev() {
                second.update(chunk);
            }
        }
    }
    squeeze_320(second)
}

/// Hash: 𝕊 → ℍ
pub fn hash(data: &[u8]) -> Hash320 {
    let mut sponge = Shake320::new();
    sponge.update(data);
    squeeze_320(sponge)
}

/// Hash of two concatenated inputs.
pub fn hash_pair(first: &[u8], second: &[u8]) -> Hash320 {
    let mut sponge = Shake320::new();
    sponge.update(first);
    sponge.update(second);
    squeeze_320(sponge)
}

/// Hash of three concatenated inputs.
pub fn hash_triple(first: &[u8], second: &[u8], third: &[u8]) -> Hash320 {
    let mut sponge = Shake320::new();
    sponge.update(first);
    sponge.update(second);
    sponge.update(third);
    squeeze_320(sponge)
}

/// KryptoHash: 𝕊 → ℍ
pub fn krypto_hash(data: &[u8]) -> Hash320 {
    let mut sponge = Shake320::new();
    sponge.update(data);
    krypto_from_sponge(sponge, ScratchpadOrder::Forward)
}

/// Double SHA3-256, used by message signing and checksums.
pub fn hash256(data: &[u8]) -> Hash256 {
    let first = Sha3_256::digest(data);
    Sha3_256::digest(first).into()
}

/// SHA3-256 followed by RIPEMD-160, used for key and script hashes.
pub fn hash160(data: &[u8]) -> Hash160 {
    let first = Sha3_256::digest(data);
    Ripemd160::digest(first).into()
}
