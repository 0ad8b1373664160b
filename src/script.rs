//! Script parsing, signature-operation counting and the verification engine
//!
//! Signature checking is delegated to a [`SignatureVerifier`], the key-store
//! capability. [`Secp256k1Verifier`] is the default verifier and
//! [`MemoryKeyStore`] the default signer.

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::hash::{hash160, hash256};
use crate::serialize::{write_compact_size, Encodable};
use crate::types::*;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey, VerifyOnly};
use std::collections::HashMap;

pub mod opcodes {
    pub const OP_0: u8 = 0x00;
    pub const OP_PUSHDATA1: u8 = 0x4c;
    pub const OP_PUSHDATA2: u8 = 0x4d;
    pub const OP_PUSHDATA4: u8 = 0x4e;
    pub const OP_1NEGATE: u8 = 0x4f;
    pub const OP_1: u8 = 0x51;
    pub const OP_16: u8 = 0x60;
    pub const OP_NOP: u8 = 0x61;
    pub const OP_VERIFY: u8 = 0x69;
    pub const OP_RETURN: u8 = 0x6a;
    pub const OP_DROP: u8 = 0x75;
    pub const OP_DUP: u8 = 0x76;
    pub const OP_SWAP: u8 = 0x7c;
    pub const OP_SIZE: u8 = 0x82;
    pub const OP_EQUAL: u8 = 0x87;
    pub const OP_EQUALVERIFY: u8 = 0x88;
    pub const OP_HASH160: u8 = 0xa9;
    pub const OP_HASH256: u8 = 0xaa;
    pub const OP_CHECKSIG: u8 = 0xac;
    pub const OP_CHECKSIGVERIFY: u8 = 0xad;
    pub const OP_CHECKMULTISIG: u8 = 0xae;
    pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;
    pub const OP_NOP1: u8 = 0xb0;
    pub const OP_NOP10: u8 = 0xb9;
}

use opcodes::*;

/// No optional rules
pub const SCRIPT_VERIFY_NONE: u32 = 0;
/// Evaluate pay-to-script-hash redeem scripts
pub const SCRIPT_VERIFY_P2SH: u32 = 1 << 0;
/// Flags every block must satisfy
pub const MANDATORY_SCRIPT_VERIFY_FLAGS: u32 = SCRIPT_VERIFY_P2SH;

pub const SIGHASH_ALL: u8 = 1;
pub const SIGHASH_NONE: u8 = 2;
pub const SIGHASH_SINGLE: u8 = 3;
pub const SIGHASH_ANYONECANPAY: u8 = 0x80;

/// Iterator over `(opcode, pushed data)` pairs.
pub struct Instructions<'a> {
    script: &'a [u8],
    pos: usize,
}

impl<'a> Instructions<'a> {
    pub fn new(script: &'a [u8]) -> Self {
        Instructions { script, pos: 0 }
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<(u8, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        let opcode = *self.script.get(self.pos)?;
        self.pos += 1;
        if opcode > OP_PUSHDATA4 {
            return Some(Ok((opcode, &[])));
        }

        let len = match opcode {
            OP_PUSHDATA1 => self.read_len(1),
            OP_PUSHDATA2 => self.read_len(2),
            OP_PUSHDATA4 => self.read_len(4),
            n => Some(n as usize),
        };
        let data = len.and_then(|len| {
            let end = self.pos.checked_add(len)?;
            let data = self.script.get(self.pos..end)?;
            self.pos = end;
            Some(data)
        });
        match data {
            Some(data) => Some(Ok((opcode, data))),
            None => {
                self.pos = self.script.len();
                Some(Err(ConsensusError::ScriptExecution("truncated push".to_string())))
            }
        }
    }
}

impl<'a> Instructions<'a> {
    fn read_len(&mut self, width: usize) -> Option<usize> {
        let bytes = self.script.get(self.pos..self.pos + width)?;
        self.pos += width;
        let mut word = [0u8; 4];
        word[..width].copy_from_slice(bytes);
        Some(u32::from_le_bytes(word) as usize)
    }
}

/// Append a minimal push of `data`.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        n if n < OP_PUSHDATA1 as usize => script.push(n as u8),
        n if n <= 0xff => {
            script.push(OP_PUSHDATA1);
            script.push(n as u8);
        }
        n if n <= 0xffff => {
            script.push(OP_PUSHDATA2);
            script.extend_from_slice(&(n as u16).to_le_bytes());
        }
        n => {
            script.push(OP_PUSHDATA4);
            script.extend_from_slice(&(n as u32).to_le_bytes());
        }
    }
    script.extend_from_slice(data);
}

/// Append a script number, using the small-integer opcodes where possible.
pub fn push_int(script: &mut Vec<u8>, n: i64) {
    match n {
        0 => script.push(OP_0),
        -1 => script.push(OP_1NEGATE),
        1..=16 => script.push(OP_1 + (n as u8) - 1),
        _ => push_data(script, &encode_script_num(n)),
    }
}

pub fn encode_script_num(n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let negative = n < 0;
    let mut abs = n.unsigned_abs();
    let mut out = Vec::new();
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    let last = out.len() - 1;
    if out[last] & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        out[last] |= 0x80;
    }
    out
}

fn cast_to_bool(value: &[u8]) -> bool {
    for (i, byte) in value.iter().enumerate() {
        if *byte != 0 {
            // Negative zero is false
            return !(i == value.len() - 1 && *byte == 0x80);
        }
    }
    false
}

fn decode_small_int(opcode: u8) -> usize {
    if opcode == OP_0 {
        0
    } else {
        (opcode - OP_1 + 1) as usize
    }
}

pub fn is_pay_to_script_hash(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 20 && script[22] == OP_EQUAL
}

pub fn is_push_only(script: &[u8]) -> bool {
    Instructions::new(script).all(|item| matches!(item, Ok((op, _)) if op <= OP_16))
}

/// Outputs starting with OP_RETURN can never be spent.
pub fn is_unspendable(script: &[u8]) -> bool {
    script.first() == Some(&OP_RETURN)
}

pub fn pay_to_pubkey_hash(pubkey_hash: &Hash160) -> Vec<u8> {
    let mut script = vec![OP_DUP, OP_HASH160];
    push_data(&mut script, pubkey_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

pub fn pay_to_pubkey(pubkey: &[u8]) -> Vec<u8> {
    let mut script = Vec::new();
    push_data(&mut script, pubkey);
    script.push(OP_CHECKSIG);
    script
}

pub fn pay_to_script_hash(redeem_script: &[u8]) -> Vec<u8> {
    let mut script = vec![OP_HASH160];
    push_data(&mut script, &hash160(redeem_script));
    script.push(OP_EQUAL);
    script
}

// ============================================================================
// SIGNATURE OPERATION COUNTING
// ============================================================================

/// GetSigOpCount: 𝕊 × 𝔹 → ℕ
///
/// CHECKSIG counts 1. CHECKMULTISIG counts its key count when `accurate`
/// and the preceding opcode is a small integer, otherwise 20.
pub fn count_sigops(script: &[u8], accurate: bool) -> usize {
    let mut count = 0;
    let mut last_opcode = 0xff;
    for item in Instructions::new(script) {
        let Ok((opcode, _)) = item else { break };
        match opcode {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                if accurate && (OP_1..=OP_16).contains(&last_opcode) {
                    count += decode_small_int(last_opcode);
                } else {
                    count += MAX_PUBKEYS_PER_MULTISIG;
                }
            }
            _ => {}
        }
        last_opcode = opcode;
    }
    count
}

/// Sig-ops of the redeem script a P2SH output is spent with.
pub fn count_p2sh_sigops(script_pubkey: &[u8], script_sig: &[u8]) -> usize {
    if !is_pay_to_script_hash(script_pubkey) {
        return count_sigops(script_pubkey, true);
    }
    let mut redeem: &[u8] = &[];
    for item in Instructions::new(script_sig) {
        match item {
            Ok((opcode, data)) if opcode <= OP_16 => redeem = data,
            _ => return 0,
        }
    }
    count_sigops(redeem, true)
}

// ============================================================================
// SIGNATURE HASHING
// ============================================================================

/// SignatureHash: 𝒯𝒳 × ℕ × 𝕊 × ℕ → ℍ₂₅₆
///
/// Serialize a copy of the transaction with every scriptSig cleared except
/// the signed input (which carries `script_code`), apply the hash-type
/// masking, append the hash type and hash with double SHA3-256.
pub fn signature_hash(tx: &Transaction, input_index: usize, script_code: &[u8], hash_type: u8) -> Hash256 {
    let mut one = [0u8; 32];
    one[0] = 1;
    if input_index >= tx.inputs.len() {
        return one;
    }

    let mut copy = tx.clone();
    for input in copy.inputs.iter_mut() {
        input.script_sig.clear();
    }
    copy.inputs[input_index].script_sig = script_code.to_vec();

    match hash_type & 0x1f {
        SIGHASH_NONE => {
            copy.outputs.clear();
            zero_other_sequences(&mut copy, input_index);
        }
        SIGHASH_SINGLE => {
            if input_index >= copy.outputs.len() {
                return one;
            }
            copy.outputs.truncate(input_index + 1);
            for output in copy.outputs.iter_mut().take(input_index) {
                *output = TxOut::null();
            }
            zero_other_sequences(&mut copy, input_index);
        }
        _ => {}
    }

    if hash_type & SIGHASH_ANYONECANPAY != 0 {
        let input = copy.inputs.swap_remove(input_index);
        copy.inputs = vec![input];
    }

    let mut bytes = Vec::new();
    let _ = copy.encode(&mut bytes);
    bytes.extend_from_slice(&u32::from(hash_type).to_le_bytes());
    hash256(&bytes)
}

fn zero_other_sequences(tx: &mut Transaction, keep: usize) {
    for (i, input) in tx.inputs.iter_mut().enumerate() {
        if i != keep {
            input.sequence = 0;
        }
    }
}

/// Remove every push of `data` from `script`.
fn find_and_delete(script: &[u8], data: &[u8]) -> Vec<u8> {
    let mut needle = Vec::new();
    push_data(&mut needle, data);
    let mut out = Vec::with_capacity(script.len());
    let mut pos = 0;
    while pos < script.len() {
        if script[pos..].starts_with(&needle) {
            pos += needle.len();
            continue;
        }
        let start = pos;
        match Instructions::new(&script[pos..]).next() {
            Some(Ok((opcode, data))) => {
                pos += 1 + data.len();
                pos += match opcode {
                    OP_PUSHDATA1 => 1,
                    OP_PUSHDATA2 => 2,
                    OP_PUSHDATA4 => 4,
                    _ => 0,
                };
            }
            _ => pos = script.len(),
        }
        out.extend_from_slice(&script[start..pos.min(script.len())]);
    }
    out
}

// ============================================================================
// KEY-STORE CAPABILITY
// ============================================================================

/// Verifies a signature over a 256-bit digest.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, digest: &Hash256, signature: &[u8], pubkey: &[u8]) -> bool;
}

/// DER-encoded ECDSA over secp256k1.
pub struct Secp256k1Verifier {
    secp: Secp256k1<VerifyOnly>,
}

impl Default for Secp256k1Verifier {
    fn default() -> Self {
        Secp256k1Verifier { secp: Secp256k1::verification_only() }
    }
}

impl SignatureVerifier for Secp256k1Verifier {
    fn verify(&self, digest: &Hash256, signature: &[u8], pubkey: &[u8]) -> bool {
        let Ok(pubkey) = PublicKey::from_slice(pubkey) else {
            return false;
        };
        let Ok(mut signature) = Signature::from_der(signature) else {
            return false;
        };
        signature.normalize_s();
        let Ok(message) = Message::from_digest_slice(digest) else {
            return false;
        };
        self.secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
    }
}

/// Signs digests for the keys it holds.
pub trait KeyStore {
    /// DER signature by the key behind `pubkey`, if held.
    fn sign_digest(&self, pubkey: &[u8], digest: &Hash256) -> Option<Vec<u8>>;

    /// Public key whose hash160 is `pubkey_hash`, if held.
    fn pubkey_for_hash(&self, pubkey_hash: &Hash160) -> Option<Vec<u8>>;
}

/// In-memory secp256k1 key store.
pub struct MemoryKeyStore {
    secp: Secp256k1<secp256k1::All>,
    keys: HashMap<Vec<u8>, SecretKey>,
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        MemoryKeyStore { secp: Secp256k1::new(), keys: HashMap::new() }
    }
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key and return its compressed public key.
    pub fn add_key(&mut self, secret: &[u8; 32]) -> Result<Vec<u8>> {
        let secret = SecretKey::from_slice(secret)
            .map_err(|e| ConsensusError::InvalidSignature(format!("bad secret key: {e}")))?;
        let pubkey = PublicKey::from_secret_key(&self.secp, &secret).serialize().to_vec();
        self.keys.insert(pubkey.clone(), secret);
        Ok(pubkey)
    }
}

impl KeyStore for MemoryKeyStore {
    fn sign_digest(&self, pubkey: &[u8], digest: &Hash256) -> Option<Vec<u8>> {
        let secret = self.keys.get(pubkey)?;
        let message = Message::from_digest_slice(digest).ok()?;
        Some(self.secp.sign_ecdsa(&message, secret).serialize_der().to_vec())
    }

    fn pubkey_for_hash(&self, pubkey_hash: &Hash160) -> Option<Vec<u8>> {
        self.keys.keys().find(|key| hash160(key) == *pubkey_hash).cloned()
    }
}

/// Build the scriptSig spending a pay-to-pubkey or pay-to-pubkey-hash output.
pub fn sign_input(
    keystore: &dyn KeyStore,
    tx: &Transaction,
    input_index: usize,
    script_pubkey: &[u8],
    hash_type: u8,
) -> Result<Vec<u8>> {
    let digest = signature_hash(tx, input_index, script_pubkey, hash_type);
    let missing = || ConsensusError::InvalidSignature("key not available".to_string());

    let (pubkey, include_pubkey) = if script_pubkey.len() == 25 && script_pubkey[0] == OP_DUP {
        let mut pubkey_hash = [0u8; 20];
        pubkey_hash.copy_from_slice(&script_pubkey[3..23]);
        (keystore.pubkey_for_hash(&pubkey_hash).ok_or_else(missing)?, true)
    } else {
        match Instructions::new(script_pubkey).next() {
            Some(Ok((_, key))) if !key.is_empty() => (key.to_vec(), false),
            _ => return Err(ConsensusError::ScriptExecution("unsupported output script".to_string())),
        }
    };

    let mut signature = keystore.sign_digest(&pubkey, &digest).ok_or_else(missing)?;
    signature.push(hash_type);
    let mut script_sig = Vec::new();
    push_data(&mut script_sig, &signature);
    if include_pubkey {
        push_data(&mut script_sig, &pubkey);
    }
    Ok(script_sig)
}

/// Checks signatures on behalf of one input of one transaction.
pub struct TransactionSignatureChecker<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    pub verifier: &'a dyn SignatureVerifier,
}

impl<'a> TransactionSignatureChecker<'a> {
    pub fn new(tx: &'a Transaction, input_index: usize, verifier: &'a dyn SignatureVerifier) -> Self {
        TransactionSignatureChecker { tx, input_index, verifier }
    }

    fn check_sig(&self, signature: &[u8], pubkey: &[u8], script_code: &[u8]) -> bool {
        let Some((&hash_type, der)) = signature.split_last() else {
            return false;
        };
        let digest = signature_hash(self.tx, self.input_index, script_code, hash_type);
        self.verifier.verify(&digest, der, pubkey)
    }
}

// ============================================================================
// INTERPRETER
// ============================================================================

fn pop(stack: &mut Vec<ByteString>) -> Result<ByteString> {
    stack
        .pop()
        .ok_or_else(|| ConsensusError::ScriptExecution("stack underflow".to_string()))
}

/// EvalScript: 𝕊 × 𝒮𝒯 × ℕ → {true, false}
///
/// Script execution follows a stack-based virtual machine:
/// 1. For each instruction: enforce element size and operation limits
/// 2. Execute it against the stack; a failed VERIFY-style check returns false
/// 3. After each instruction: enforce the stack size limit
///
/// Malformed scripts and limit violations are errors.
pub fn eval_script(
    script: &[u8],
    stack: &mut Vec<ByteString>,
    checker: &TransactionSignatureChecker<'_>,
) -> Result<bool> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ConsensusError::ScriptExecution("script too large".to_string()));
    }
    let mut op_count = 0;

    for item in Instructions::new(script) {
        let (opcode, data) = item?;
        if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
            return Err(ConsensusError::ScriptExecution("push exceeds element size".to_string()));
        }
        if opcode > OP_16 {
            op_count += 1;
            if op_count > MAX_SCRIPT_OPS {
                return Err(ConsensusError::ScriptExecution("operation limit exceeded".to_string()));
            }
        }

        match opcode {
            OP_0..=OP_PUSHDATA4 => stack.push(data.to_vec()),
            OP_1NEGATE => stack.push(vec![0x81]),
            OP_1..=OP_16 => stack.push(vec![opcode - OP_1 + 1]),
            OP_NOP | OP_NOP1..=OP_NOP10 => {}
            OP_VERIFY => {
                if !cast_to_bool(&pop(stack)?) {
                    return Ok(false);
                }
            }
            OP_RETURN => return Ok(false),
            OP_DROP => {
                pop(stack)?;
            }
            OP_DUP => {
                let top = stack
                    .last()
                    .cloned()
                    .ok_or_else(|| ConsensusError::ScriptExecution("stack underflow".to_string()))?;
                stack.push(top);
            }
            OP_SWAP => {
                if stack.len() < 2 {
                    return Err(ConsensusError::ScriptExecution("stack underflow".to_string()));
                }
                let len = stack.len();
                stack.swap(len - 1, len - 2);
            }
            OP_SIZE => {
                let len = stack
                    .last()
                    .map(|top| top.len())
                    .ok_or_else(|| ConsensusError::ScriptExecution("stack underflow".to_string()))?;
                stack.push(encode_script_num(len as i64));
            }
            OP_EQUAL | OP_EQUALVERIFY => {
                let a = pop(stack)?;
                let b = pop(stack)?;
                let equal = a == b;
                if opcode == OP_EQUALVERIFY {
                    if !equal {
                        return Ok(false);
                    }
                } else {
                    stack.push(if equal { vec![1] } else { Vec::new() });
                }
            }
            OP_HASH160 => {
                let item = pop(stack)?;
                stack.push(hash160(&item).to_vec());
            }
            OP_HASH256 => {
                let item = pop(stack)?;
                stack.push(hash256(&item).to_vec());
            }
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let pubkey = pop(stack)?;
                let signature = pop(stack)?;
                let script_code = find_and_delete(script, &signature);
                let valid = checker.check_sig(&signature, &pubkey, &script_code);
                if opcode == OP_CHECKSIGVERIFY {
                    if !valid {
                        return Ok(false);
                    }
                } else {
                    stack.push(if valid { vec![1] } else { Vec::new() });
                }
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let valid = eval_multisig(script, stack, checker, &mut op_count)?;
                if opcode == OP_CHECKMULTISIGVERIFY {
                    if !valid {
                        return Ok(false);
                    }
                } else {
                    stack.push(if valid { vec![1] } else { Vec::new() });
                }
            }
            _ => {
                return Err(ConsensusError::ScriptExecution(format!("unsupported opcode {opcode:#04x}")));
            }
        }

        if stack.len() > MAX_STACK_SIZE {
            return Err(ConsensusError::ScriptExecution("stack overflow".to_string()));
        }
    }
    Ok(true)
}

fn pop_count(stack: &mut Vec<ByteString>, max: usize) -> Result<usize> {
    let raw = pop(stack)?;
    if raw.len() > 4 {
        return Err(ConsensusError::ScriptExecution("count out of range".to_string()));
    }
    let mut value: i64 = 0;
    for (i, byte) in raw.iter().enumerate() {
        value |= i64::from(*byte) << (8 * i);
    }
    if let Some(last) = raw.last() {
        if last & 0x80 != 0 {
            value = -(value & !(0x80i64 << (8 * (raw.len() - 1))));
        }
    }
    if value < 0 || value as usize > max {
        return Err(ConsensusError::ScriptExecution("count out of range".to_string()));
    }
    Ok(value as usize)
}

fn eval_multisig(
    script: &[u8],
    stack: &mut Vec<ByteString>,
    checker: &TransactionSignatureChecker<'_>,
    op_count: &mut usize,
) -> Result<bool> {
    let key_count = pop_count(stack, MAX_PUBKEYS_PER_MULTISIG)?;
    *op_count += key_count;
    if *op_count > MAX_SCRIPT_OPS {
        return Err(ConsensusError::ScriptExecution("operation limit exceeded".to_string()));
    }
    let mut keys = Vec::with_capacity(key_count);
    for _ in 0..key_count {
        keys.push(pop(stack)?);
    }
    let sig_count = pop_count(stack, key_count)?;
    let mut signatures = Vec::with_capacity(sig_count);
    for _ in 0..sig_count {
        signatures.push(pop(stack)?);
    }
    // Historical extra element consumed by CHECKMULTISIG
    pop(stack)?;

    let mut script_code = script.to_vec();
    for signature in &signatures {
        script_code = find_and_delete(&script_code, signature);
    }

    // Keys and signatures were popped top first, which is the order they are matched in
    let mut key_iter = keys.iter();
    for signature in &signatures {
        loop {
            match key_iter.next() {
                Some(key) if checker.check_sig(signature, key, &script_code) => break,
                Some(_) => continue,
                None => return Ok(false),
            }
        }
    }
    Ok(true)
}

/// VerifyScript: 𝕊 × 𝕊 × ℕ → {true, false}
///
/// For scriptSig ss, scriptPubKey spk and flags f:
/// 1. Execute ss on an empty stack, then spk on the result
/// 2. Require a true top element
/// 3. If f has P2SH and spk is pay-to-script-hash: ss must be push-only;
///    execute the last pushed element as a script on the stack ss left behind
pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    flags: u32,
    checker: &TransactionSignatureChecker<'_>,
) -> Result<bool> {
    let mut stack = Vec::new();
    if !eval_script(script_sig, &mut stack, checker)? {
        return Ok(false);
    }
    let stack_copy = if flags & SCRIPT_VERIFY_P2SH != 0 { stack.clone() } else { Vec::new() };

    if !eval_script(script_pubkey, &mut stack, checker)? {
        return Ok(false);
    }
    match stack.last() {
        Some(top) if cast_to_bool(top) => {}
        _ => return Ok(false),
    }

    if flags & SCRIPT_VERIFY_P2SH != 0 && is_pay_to_script_hash(script_pubkey) {
        if !is_push_only(script_sig) {
            return Err(ConsensusError::ScriptExecution("P2SH scriptSig is not push-only".to_string()));
        }
        let mut stack = stack_copy;
        let redeem_script = pop(&mut stack)?;
        if !eval_script(&redeem_script, &mut stack, checker)? {
            return Ok(false);
        }
        match stack.last() {
            Some(top) if cast_to_bool(top) => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

/// Serialized length of a script including its length prefix.
pub fn script_serialized_len(script: &[u8]) -> usize {
    let mut prefix = Vec::new();
    let _ = write_compact_size(&mut prefix, script.len() as u64);
    prefix.len() + script.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RejectAll;

    impl SignatureVerifier for RejectAll {
        fn verify(&self, _: &Hash256, _: &[u8], _: &[u8]) -> bool {
            false
        }
    }

    fn spending_tx() -> Transaction {
        Transaction {
            inputs: vec![TxIn::new(OutPoint::new(Hash320([9; 40]), 0), Vec::new())],
            outputs: vec![TxOut::new(1000, vec![OP_1])],
            tx_time: 1_415_000_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_eval_script_simple() {
        let tx = spending_tx();
        let checker = TransactionSignatureChecker::new(&tx, 0, &RejectAll);
        let mut stack = Vec::new();
        assert!(eval_script(&[OP_1], &mut stack, &checker).unwrap());
        assert_eq!(stack, vec![vec![1]]);
    }

    #[test]
    fn test_eval_script_overflow() {
        let tx = spending_tx();
        let checker = TransactionSignatureChecker::new(&tx, 0, &RejectAll);
        let script = vec![OP_1; MAX_STACK_SIZE + 1];
        let mut stack = Vec::new();
        assert!(eval_script(&script, &mut stack, &checker).is_err());
    }

    #[test]
    fn test_truncated_push_is_error() {
        let items: Vec<_> = Instructions::new(&[0x05, 0x01, 0x02]).collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
        assert!(!is_push_only(&[0x05, 0x01]));
    }

    #[test]
    fn test_sigop_counting() {
        let p2pkh = pay_to_pubkey_hash(&[0u8; 20]);
        assert_eq!(count_sigops(&p2pkh, false), 1);

        let mut multisig = vec![OP_1 + 1];
        push_data(&mut multisig, &[2u8; 33]);
        push_data(&mut multisig, &[3u8; 33]);
        multisig.extend_from_slice(&[OP_1 + 2, OP_CHECKMULTISIG]);
        assert_eq!(count_sigops(&multisig, false), 20);
        assert_eq!(count_sigops(&multisig, true), 3);

        let p2sh = pay_to_script_hash(&multisig);
        let mut script_sig = vec![OP_0];
        push_data(&mut script_sig, &multisig);
        assert_eq!(count_p2sh_sigops(&p2sh, &script_sig), 3);
        assert_eq!(count_p2sh_sigops(&p2sh, &[OP_NOP]), 0);
    }

    #[test]
    fn test_script_num_encoding() {
        assert_eq!(encode_script_num(0), Vec::<u8>::new());
        assert_eq!(encode_script_num(127), vec![0x7f]);
        assert_eq!(encode_script_num(128), vec![0x80, 0x00]);
        assert_eq!(encode_script_num(-1), vec![0x81]);
        assert_eq!(encode_script_num(-128), vec![0x80, 0x80]);
    }

    #[test]
    fn test_p2pkh_signature_round_trip() {
        let mut keystore = MemoryKeyStore::new();
        let pubkey = keystore.add_key(&[0x42; 32]).unwrap();
        let script_pubkey = pay_to_pubkey_hash(&hash160(&pubkey));

        let mut tx = spending_tx();
        tx.inputs[0].script_sig = sign_input(&keystore, &tx, 0, &script_pubkey, SIGHASH_ALL).unwrap();

        let verifier = Secp256k1Verifier::default();
        let checker = TransactionSignatureChecker::new(&tx, 0, &verifier);
        assert!(verify_script(&tx.inputs[0].script_sig, &script_pubkey, MANDATORY_SCRIPT_VERIFY_FLAGS, &checker).unwrap());

        let mut tampered = tx.clone();
        tampered.outputs[0].value += 1;
        let checker = TransactionSignatureChecker::new(&tampered, 0, &verifier);
        assert!(!verify_script(&tx.inputs[0].script_sig, &script_pubkey, MANDATORY_SCRIPT_VERIFY_FLAGS, &checker).unwrap());
    }

    #[test]
    fn test_p2sh_redeem_script_executes() {
        let redeem = vec![OP_1];
        let script_pubkey = pay_to_script_hash(&redeem);
        let mut script_sig = Vec::new();
        push_data(&mut script_sig, &redeem);

        let tx = spending_tx();
        let checker = TransactionSignatureChecker::new(&tx, 0, &RejectAll);
        assert!(verify_script(&script_sig, &script_pubkey, SCRIPT_VERIFY_P2SH, &checker).unwrap());

        let mut failing = Vec::new();
        push_data(&mut failing, &[OP_0]);
        let script_pubkey = pay_to_script_hash(&[OP_0]);
        assert!(!verify_script(&failing, &script_pubkey, SCRIPT_VERIFY_P2SH, &checker).unwrap());
    }

    #[test]
    fn test_signature_hash_single_out_of_range() {
        let tx = spending_tx();
        let mut one = [0u8; 32];
        one[0] = 1;
        assert_eq!(signature_hash(&tx, 5, &[], SIGHASH_ALL), one);
        let mut two_inputs = tx.clone();
        two_inputs.inputs.push(tx.inputs[0].clone());
        assert_eq!(signature_hash(&two_inputs, 1, &[], SIGHASH_SINGLE), one);
    }
}
