//! Transaction memory pool
//!
//! The pool holds transactions that are valid against the current best chain
//! and may go into the next block. `map_next_tx` indexes every outpoint spent
//! by a pooled transaction so conflicts and descendants are found without
//! scanning.

use crate::chainparams::ChainParams;
use crate::coins::{CoinsView, MempoolCoinsView};
use crate::constants::*;
use crate::economic::min_fee;
use crate::error::{ConsensusError, Result};
use crate::script::{is_push_only, Instructions, SignatureVerifier, MANDATORY_SCRIPT_VERIFY_FLAGS};
use crate::script::opcodes::*;
use crate::transaction::{allow_free, check_transaction, is_final_tx, legacy_sigop_count, p2sh_sigop_count};
use crate::types::*;
use crate::validation::{check_inputs, RejectCode, ValidationResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, trace};

/// Largest scriptSig relayed: a 3-of-3 CHECKMULTISIG P2SH redemption with compressed keys.
pub const MAX_STANDARD_SCRIPT_SIG_SIZE: usize = 1650;

/// Largest data carried by a relayed OP_RETURN output.
pub const MAX_OP_RETURN_RELAY: usize = 40;

/// Sig-op limit for relayed transactions.
pub const MAX_STANDARD_TX_SIGOPS: usize = MAX_BLOCK_SIGOPS / 5;

// ============================================================================
// ENTRIES
// ============================================================================

/// A pooled transaction with the facts cached when it entered.
#[derive(Debug, Clone, PartialEq)]
pub struct MempoolEntry {
    tx: Transaction,
    txid: Hash320,
    fee: Amount,
    size: usize,
    modified_size: usize,
    /// Local time (ms) the transaction entered the pool.
    time: i64,
    priority: f64,
    /// Chain height when the transaction entered the pool.
    height: Height,
}

impl MempoolEntry {
    pub fn new(tx: Transaction, fee: Amount, time: i64, priority: f64, height: Height) -> Self {
        let txid = tx.txid();
        let size = tx.serialized_size();
        let modified_size = tx.modified_size(size);
        MempoolEntry { tx, txid, fee, size, modified_size, time, priority, height }
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn txid(&self) -> &Hash320 {
        &self.txid
    }

    pub fn fee(&self) -> Amount {
        self.fee
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn height(&self) -> Height {
        self.height
    }

    /// Priority at `current_height`: inputs keep aging while the entry waits.
    pub fn priority_at(&self, current_height: Height) -> f64 {
        if self.modified_size == 0 {
            return self.priority;
        }
        let value_in = self.tx.outputs.iter().map(|o| o.value).sum::<Amount>() + self.fee;
        let delta = (current_height - self.height) as f64 * value_in as f64 / self.modified_size as f64;
        self.priority + delta
    }
}

/// Input `index` of pooled transaction `txid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InPoint {
    pub txid: Hash320,
    pub index: u32,
}

// ============================================================================
// POOL STATE
// ============================================================================

/// Maps guarded by the pool lock.
#[derive(Debug, Default)]
pub struct PoolState {
    map_tx: BTreeMap<Hash320, MempoolEntry>,
    map_next_tx: BTreeMap<OutPoint, InPoint>,
}

impl PoolState {
    pub fn get(&self, txid: &Hash320) -> Option<&MempoolEntry> {
        self.map_tx.get(txid)
    }

    pub fn contains(&self, txid: &Hash320) -> bool {
        self.map_tx.contains_key(txid)
    }

    pub fn len(&self) -> usize {
        self.map_tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map_tx.is_empty()
    }

    /// Entries in txid order.
    pub fn entries(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.map_tx.values()
    }

    /// Pooled input spending `outpoint`, if any.
    pub fn spender(&self, outpoint: &OutPoint) -> Option<&InPoint> {
        self.map_next_tx.get(outpoint)
    }

    pub fn map_tx(&self) -> &BTreeMap<Hash320, MempoolEntry> {
        &self.map_tx
    }

    pub fn map_next_tx(&self) -> &BTreeMap<OutPoint, InPoint> {
        &self.map_next_tx
    }

    /// Insert without validation; refuses entries that double-spend the pool.
    fn insert(&mut self, entry: MempoolEntry) -> bool {
        let txid = entry.txid;
        if self.map_tx.contains_key(&txid) {
            return false;
        }
        if entry.tx.inputs.iter().any(|input| self.map_next_tx.contains_key(&input.prevout)) {
            return false;
        }
        for (index, input) in entry.tx.inputs.iter().enumerate() {
            self.map_next_tx.insert(input.prevout, InPoint { txid, index: index as u32 });
        }
        self.map_tx.insert(txid, entry);
        true
    }

    /// Remove `tx` and, when `recursive`, every pooled transaction that spends
    /// its outputs. `tx` itself need not be pooled.
    fn remove(&mut self, tx: &Transaction, recursive: bool) -> Vec<Transaction> {
        let mut removed = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = VecDeque::from([(tx.txid(), tx.outputs.len())]);
        while let Some((txid, output_count)) = pending.pop_front() {
            if !visited.insert(txid) {
                continue;
            }
            if recursive {
                for index in 0..output_count {
                    let Some(spender) = self.map_next_tx.get(&OutPoint::new(txid, index as u32)) else {
                        continue;
                    };
                    if let Some(child) = self.map_tx.get(&spender.txid) {
                        pending.push_back((spender.txid, child.tx.outputs.len()));
                    }
                }
            }
            if let Some(entry) = self.map_tx.remove(&txid) {
                for input in &entry.tx.inputs {
                    self.map_next_tx.remove(&input.prevout);
                }
                trace!(%txid, "removed from mempool");
                removed.push(entry.tx);
            }
        }
        removed
    }
}

// ============================================================================
// TRANSACTION MEMORY POOL
// ============================================================================

/// Thread-safe pool. Every operation holds the lock for its whole duration;
/// callers that also hold the chain-state lock must take it first.
#[derive(Debug, Default)]
pub struct TxMemPool {
    inner: Mutex<PoolState>,
    transactions_updated: AtomicU64,
    sanity_check: AtomicBool,
}

impl TxMemPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the consistency audit run by [`TxMemPool::check`].
    pub fn set_sanity_check(&self, enabled: bool) {
        self.sanity_check.store(enabled, Ordering::Relaxed);
    }

    /// Run `f` with the pool locked.
    pub fn with_state<R>(&self, f: impl FnOnce(&PoolState) -> R) -> R {
        f(&self.inner.lock())
    }

    /// AddUnchecked: insert an already validated entry.
    ///
    /// Returns false, leaving the pool unchanged, when the entry is already
    /// present or spends an outpoint another entry spends.
    pub fn add_unchecked(&self, entry: MempoolEntry) -> bool {
        let txid = entry.txid;
        let added = self.inner.lock().insert(entry);
        if added {
            self.transactions_updated.fetch_add(1, Ordering::Relaxed);
            debug!(%txid, "added to mempool");
        }
        added
    }

    /// Remove `tx`; with `recursive`, also every descendant. Returns what was removed.
    pub fn remove(&self, tx: &Transaction, recursive: bool) -> Vec<Transaction> {
        let removed = self.inner.lock().remove(tx, recursive);
        self.transactions_updated.fetch_add(removed.len() as u64, Ordering::Relaxed);
        removed
    }

    /// Evict pooled transactions that spend any input of `tx`, with their descendants.
    ///
    /// Called when `tx` is confirmed in a connected block.
    pub fn remove_conflicts(&self, tx: &Transaction) -> Vec<Transaction> {
        let txid = tx.txid();
        let mut state = self.inner.lock();
        let mut removed = Vec::new();
        for input in &tx.inputs {
            let Some(spender) = state.map_next_tx.get(&input.prevout).copied() else {
                continue;
            };
            if spender.txid == txid {
                continue;
            }
            let Some(conflict) = state.map_tx.get(&spender.txid).map(|e| e.tx.clone()) else {
                continue;
            };
            debug!(conflict = %spender.txid, confirmed = %txid, "evicting conflicting transaction");
            removed.extend(state.remove(&conflict, true));
        }
        drop(state);
        self.transactions_updated.fetch_add(removed.len() as u64, Ordering::Relaxed);
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.map_tx.clear();
        state.map_next_tx.clear();
        self.transactions_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn query_hashes(&self) -> Vec<Hash320> {
        self.inner.lock().map_tx.keys().copied().collect()
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<MempoolEntry> {
        self.inner.lock().map_tx.values().cloned().collect()
    }

    pub fn lookup(&self, txid: &Hash320) -> Option<Transaction> {
        self.inner.lock().map_tx.get(txid).map(|entry| entry.tx.clone())
    }

    pub fn exists(&self, txid: &Hash320) -> bool {
        self.inner.lock().map_tx.contains_key(txid)
    }

    pub fn size(&self) -> usize {
        self.inner.lock().map_tx.len()
    }

    /// Output indices of `txid` already spent inside the pool.
    pub fn prune_spent(&self, txid: &Hash320) -> Vec<u32> {
        let state = self.inner.lock();
        state
            .map_next_tx
            .range(OutPoint::new(*txid, 0)..=OutPoint::new(*txid, u32::MAX))
            .map(|(outpoint, _)| outpoint.index)
            .collect()
    }

    pub fn get_transactions_updated(&self) -> u64 {
        self.transactions_updated.load(Ordering::Relaxed)
    }

    pub fn add_transactions_updated(&self, n: u64) {
        self.transactions_updated.fetch_add(n, Ordering::Relaxed);
    }

    /// Check: full consistency audit, a no-op unless sanity checking is on.
    ///
    /// 1. Every input of every entry spends a pooled output or a coin in `view`
    /// 2. `map_next_tx` records exactly those inputs
    /// 3. No two entries spend the same outpoint
    pub fn check(&self, view: &dyn CoinsView) -> Result<()> {
        if !self.sanity_check.load(Ordering::Relaxed) {
            return Ok(());
        }
        let state = self.inner.lock();
        trace!(entries = state.map_tx.len(), inputs = state.map_next_tx.len(), "checking mempool");

        let mut input_count = 0usize;
        for (txid, entry) in &state.map_tx {
            for (index, input) in entry.tx.inputs.iter().enumerate() {
                let funded = match state.map_tx.get(&input.prevout.hash) {
                    Some(parent) => (input.prevout.index as usize) < parent.tx.outputs.len(),
                    None => view.have_coin(&input.prevout),
                };
                if !funded {
                    return Err(ConsensusError::Mempool(format!("{txid} input {index} spends an unknown output")));
                }
                let expected = InPoint { txid: *txid, index: index as u32 };
                if state.map_next_tx.get(&input.prevout) != Some(&expected) {
                    return Err(ConsensusError::Mempool(format!("{txid} input {index} missing from spent index")));
                }
                input_count += 1;
            }
        }
        if input_count != state.map_next_tx.len() {
            return Err(ConsensusError::Mempool(format!(
                "spent index holds {} outpoints for {input_count} inputs",
                state.map_next_tx.len()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// STANDARDNESS
// ============================================================================

/// Output script templates relayed by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    PubKey,
    PubKeyHash,
    ScriptHash,
    MultiSig,
    NullData,
}

/// Classify `script` as one of the standard templates.
pub fn standard_output_type(script: &[u8]) -> Option<OutputType> {
    if crate::script::is_pay_to_script_hash(script) {
        return Some(OutputType::ScriptHash);
    }
    if script.len() == 25
        && script[..3] == [OP_DUP, OP_HASH160, 20]
        && script[23..] == [OP_EQUALVERIFY, OP_CHECKSIG]
    {
        return Some(OutputType::PubKeyHash);
    }
    if script.first() == Some(&OP_RETURN) {
        let rest = &script[1..];
        return (is_push_only(rest) && rest.len() <= MAX_OP_RETURN_RELAY + 2).then_some(OutputType::NullData);
    }

    let ops: Vec<(u8, &[u8])> = Instructions::new(script).collect::<Result<_>>().ok()?;
    match ops.as_slice() {
        [(_, key), (OP_CHECKSIG, _)] if key.len() == 33 || key.len() == 65 => Some(OutputType::PubKey),
        [(m, _), keys @ .., (n, _), (OP_CHECKMULTISIG, _)]
            if (OP_1..=OP_16).contains(m) && (OP_1..=OP_16).contains(n) =>
        {
            let required = (m - OP_1 + 1) as usize;
            let total = (n - OP_1 + 1) as usize;
            let keys_ok = keys.len() == total && keys.iter().all(|(_, k)| k.len() == 33 || k.len() == 65);
            (keys_ok && required <= total && total <= 3).then_some(OutputType::MultiSig)
        }
        _ => None,
    }
}

/// Reason `tx` would not be relayed, if any.
pub fn non_standard_reason(tx: &Transaction) -> Option<&'static str> {
    if tx.version < 1 || tx.version > CURRENT_TX_VERSION {
        return Some("version");
    }
    if tx.serialized_size() >= MAX_STANDARD_TX_SIZE {
        return Some("tx-size");
    }
    for input in &tx.inputs {
        if input.script_sig.len() > MAX_STANDARD_SCRIPT_SIG_SIZE {
            return Some("scriptsig-size");
        }
        if !is_push_only(&input.script_sig) {
            return Some("scriptsig-not-pushonly");
        }
    }
    let mut null_data = 0;
    for output in &tx.outputs {
        match standard_output_type(&output.script_pubkey) {
            None => return Some("scriptpubkey"),
            Some(OutputType::NullData) => null_data += 1,
            Some(_) if output.is_dust(DEFAULT_MIN_RELAY_TX_FEE) => return Some("dust"),
            Some(_) => {}
        }
    }
    if null_data > 1 {
        return Some("multi-op-return");
    }
    None
}

/// IsStandardTx: 𝒯𝒳 → {true, false}
pub fn is_standard_tx(tx: &Transaction) -> bool {
    non_standard_reason(tx).is_none()
}

// ============================================================================
// ADMISSION
// ============================================================================

/// AcceptToMemoryPool: 𝒯𝒳 × 𝒰𝒱 → {accepted, rejected}
///
/// For transaction tx, confirmed view us and next block height h:
/// 1. tx passes CheckTransaction and is not a coinbase
/// 2. If the network requires it, tx is standard
/// 3. tx is final at h and now
/// 4. tx is not pooled and spends nothing a pooled transaction spends
/// 5. Every input is in us or in the outputs of a pooled transaction
/// 6. Inputs and scripts pass CheckInputs, which yields the fee
/// 7. Fee ≥ MinFee(size) unless the priority allows free relay
///
/// Checks and insertion happen under one pool lock.
pub fn accept_to_memory_pool(
    pool: &TxMemPool,
    view: &dyn CoinsView,
    tx: &Transaction,
    height: Height,
    now_ms: i64,
    params: &ChainParams,
    verifier: &dyn SignatureVerifier,
) -> Result<ValidationResult> {
    // 1. Context-free rules
    let result = check_transaction(tx);
    if !result.is_valid() {
        return Ok(result);
    }
    if tx.is_coin_base() {
        return Ok(ValidationResult::invalid(100, RejectCode::Invalid, "coinbase"));
    }

    // 2. Standardness
    if params.require_standard() {
        if let Some(reason) = non_standard_reason(tx) {
            return Ok(ValidationResult::invalid(0, RejectCode::NonStandard, reason));
        }
    }

    // 3. Finality
    if !is_final_tx(tx, height, now_ms) {
        return Ok(ValidationResult::invalid(0, RejectCode::NonStandard, "non-final"));
    }

    let txid = tx.txid();
    let mut state = pool.inner.lock();

    // 4. Duplicates and conflicts
    if state.contains(&txid) {
        return Ok(ValidationResult::invalid(0, RejectCode::Duplicate, "txn-already-in-mempool"));
    }
    if tx.inputs.iter().any(|input| state.map_next_tx.contains_key(&input.prevout)) {
        return Ok(ValidationResult::invalid(0, RejectCode::Duplicate, "txn-mempool-conflict"));
    }

    let (fee, priority) = {
        let pool_view = MempoolCoinsView::new(view, &state);

        // 5. Inputs
        if tx.inputs.iter().any(|input| !pool_view.have_coin(&input.prevout)) {
            return Ok(ValidationResult::invalid(0, RejectCode::Invalid, "bad-txns-inputs-missingorspent"));
        }
        if params.require_standard() {
            let sigops = legacy_sigop_count(tx) + p2sh_sigop_count(tx, &pool_view);
            if sigops > MAX_STANDARD_TX_SIGOPS {
                return Ok(ValidationResult::invalid(0, RejectCode::NonStandard, "bad-txns-too-many-sigops"));
            }
        }

        // 6. Inputs and scripts, which also price the fee
        let (result, fee) = check_inputs(tx, &pool_view, height, MANDATORY_SCRIPT_VERIFY_FLAGS, verifier)?;
        if !result.is_valid() {
            return Ok(result);
        }

        // Priority from confirmed inputs only
        let chain_height = height - 1;
        let input_priority: f64 = tx
            .inputs
            .iter()
            .filter_map(|input| pool_view.get_coin(&input.prevout))
            .filter(|coin| coin.height < chain_height)
            .map(|coin| coin.output.value as f64 * (chain_height - coin.height) as f64)
            .sum();
        let priority = tx.compute_priority(input_priority, 0);

        // 7. Relay fee
        let required = min_fee(tx.serialized_size(), DEFAULT_MIN_RELAY_TX_FEE);
        if fee < required && !allow_free(priority) {
            return Ok(ValidationResult::invalid(0, RejectCode::InsufficientFee, "insufficient fee"));
        }
        (fee, priority)
    };

    let entry = MempoolEntry::new(tx.clone(), fee, now_ms, priority, height - 1);
    if !state.insert(entry) {
        return Err(ConsensusError::Internal(format!("{txid} passed conflict checks but was not inserted")));
    }
    drop(state);
    pool.transactions_updated.fetch_add(1, Ordering::Relaxed);
    debug!(%txid, fee, priority, "accepted to mempool");
    Ok(ValidationResult::Valid)
}
