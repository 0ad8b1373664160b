//! Block template assembly and the proof-of-work search loop

use crate::block::{connect_block, median_time_past, BlockContext};
use crate::chainparams::ChainParams;
use crate::coins::{CoinsView, CoinsViewCache};
use crate::constants::*;
use crate::economic::{fee_per_kb, get_block_value};
use crate::error::{ConsensusError, Result};
use crate::mempool::{PoolState, TxMemPool};
use crate::merkle::block_merkle_root;
use crate::pow::{expand_target, get_next_work_required, scan_krypto_hash, KryptoHashBuffers, ScanResult};
use crate::script::opcodes::OP_0;
use crate::script::{push_data, push_int, SignatureVerifier, SCRIPT_VERIFY_P2SH};
use crate::transaction::{allow_free, is_final_tx, legacy_sigop_count, p2sh_sigop_count};
use crate::types::*;
use crate::validation::check_inputs;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Block size charged up front for the header and coinbase.
const RESERVED_BLOCK_SIZE: usize = 1000;
/// Sig-ops charged up front for the coinbase.
const RESERVED_BLOCK_SIGOPS: usize = 100;
/// Marker appended to the coinbase scriptSig.
const COINBASE_FLAGS: &[u8] = b"/P2SH/";
/// Nonces above this trigger a template rebuild.
const NONCE_REBUILD_THRESHOLD: u32 = 0xffff_0000;
/// Mempool changes only force a rebuild once a template is this old.
const MEMPOOL_REBUILD_AGE_MS: i64 = 60_000;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Template limits, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Largest block to create.
    pub block_max_size: usize,
    /// Bytes filled by priority regardless of fee.
    pub block_priority_size: usize,
    /// Free transactions fill the block up to this size.
    pub block_min_size: usize,
    /// Fee per kilobyte below which a transaction counts as free.
    pub min_relay_tx_fee: Amount,
    /// Log priority and fee rate of every selected transaction.
    pub print_priority: bool,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        AssemblerConfig {
            block_max_size: DEFAULT_BLOCK_MAX_SIZE,
            block_priority_size: DEFAULT_BLOCK_PRIORITY_SIZE,
            block_min_size: DEFAULT_BLOCK_MIN_SIZE,
            min_relay_tx_fee: DEFAULT_MIN_RELAY_TX_FEE,
            print_priority: false,
        }
    }
}

impl AssemblerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: AssemblerConfig = serde_json::from_str(json)
            .map_err(|e| ConsensusError::Serialization(format!("invalid assembler config: {e}")))?;
        Ok(config.clamped())
    }

    /// Max size within [1000, MAX_BLOCK_SIZE - 1000]; priority and min sizes at most max size.
    pub fn clamped(mut self) -> Self {
        self.block_max_size = self.block_max_size.clamp(1000, MAX_BLOCK_SIZE - 1000);
        self.block_priority_size = self.block_priority_size.min(self.block_max_size);
        self.block_min_size = self.block_min_size.min(self.block_max_size);
        self
    }
}

// ============================================================================
// TEMPLATE
// ============================================================================

/// Assembled block with per-transaction fees and sig-ops.
///
/// `tx_fees[0]` is the negated total fee, so the column sums to zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTemplate {
    pub block: Block,
    pub tx_fees: Vec<Amount>,
    pub tx_sigops: Vec<usize>,
    /// Serialized size counted during selection, reserve included.
    pub block_size: usize,
}

impl BlockTemplate {
    pub fn total_fees(&self) -> Amount {
        -self.tx_fees.first().copied().unwrap_or(0)
    }
}

/// The block a template builds on.
#[derive(Debug, Clone, Copy)]
pub struct ChainTip<'a> {
    pub height: Height,
    pub hash: Hash320,
    /// Active chain headers, genesis first, ending at the tip.
    pub headers: &'a [BlockHeader],
}

/// Heap order for selection. A build starts with `Priority` and may switch
/// to `Fee` once; it never switches back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOrder {
    Priority,
    Fee,
}

#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    priority: f64,
    fee_per_kb: f64,
    order: SelectionOrder,
    txid: Hash320,
    tx: &'a Transaction,
}

impl Candidate<'_> {
    fn with_order(mut self, order: SelectionOrder) -> Self {
        self.order = order;
        self
    }
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_priority = self.priority.total_cmp(&other.priority);
        let by_fee = self.fee_per_kb.total_cmp(&other.fee_per_kb);
        let primary = match self.order {
            SelectionOrder::Priority => by_priority.then(by_fee),
            SelectionOrder::Fee => by_fee.then(by_priority),
        };
        // Lower txid wins ties
        primary.then_with(|| other.txid.cmp(&self.txid))
    }
}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

/// A candidate waiting for pooled parents to be selected first.
struct Orphan<'a> {
    candidate: Candidate<'a>,
    depends_on: HashSet<Hash320>,
}

/// Outcome of transaction selection.
#[derive(Default)]
struct Selection {
    transactions: Vec<Transaction>,
    fees: Vec<Amount>,
    sigops: Vec<usize>,
    total_fees: Amount,
    block_size: usize,
    min_tx_time: i64,
}

// ============================================================================
// ASSEMBLER
// ============================================================================

pub struct BlockAssembler<'a> {
    params: &'a ChainParams,
    config: AssemblerConfig,
    verifier: &'a dyn SignatureVerifier,
}

impl<'a> BlockAssembler<'a> {
    pub fn new(params: &'a ChainParams, config: AssemblerConfig, verifier: &'a dyn SignatureVerifier) -> Self {
        BlockAssembler { params, config: config.clamped(), verifier }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// CreateNewBlock at the current wall-clock time.
    pub fn create_new_block(
        &self,
        payout_script: &[u8],
        tip: &ChainTip<'_>,
        view: &dyn CoinsView,
        pool: &TxMemPool,
    ) -> Result<BlockTemplate> {
        self.create_new_block_at(payout_script, tip, view, pool, now_ms()?)
    }

    /// CreateNewBlock: 𝕊 × 𝒰𝒱 × 𝒫 → ℬ
    ///
    /// For payout script s, confirmed view us (at the tip) and pool P:
    /// 1. Coinbase: one null input, one output paying s, tx_time = now
    /// 2. Candidates: final pool transactions with priority and fee rate;
    ///    those spending pooled outputs wait as orphans
    /// 3. Pop by priority, then by fee rate once the priority budget is spent
    ///    or priority drops below the free threshold
    /// 4. Skip candidates over the size or sig-op budget, and free ones past
    ///    the minimum size
    /// 5. Re-check inputs, apply to the running view, release dependents
    /// 6. Header: prev hash, Merkle root, next bits, tx_time = oldest
    ///    clamped transaction time, time = now - tx_time
    /// 7. Coinbase pays GetBlockValue(h + 1, fees)
    /// 8. Dry-run ConnectBlock on a throwaway view; failure is an internal error
    pub fn create_new_block_at(
        &self,
        payout_script: &[u8],
        tip: &ChainTip<'_>,
        view: &dyn CoinsView,
        pool: &TxMemPool,
        now_ms: i64,
    ) -> Result<BlockTemplate> {
        let height = tip.height + 1;
        let median_time = median_time_past(tip.headers);

        // 1. Coinbase
        let mut coinbase = Transaction {
            inputs: vec![TxIn::new(OutPoint::null(), Vec::new())],
            outputs: vec![TxOut::new(0, payout_script.to_vec())],
            tx_time: now_ms,
            hash_coin: 0,
            ..Default::default()
        };

        // 2-5. Selection under the pool lock
        let selection = pool.with_state(|state| self.select(state, tip, view, median_time, now_ms))?;

        // 6. Header
        coinbase.inputs[0].script_sig = vec![OP_0, OP_0];
        coinbase.outputs[0].value = get_block_value(height, selection.total_fees, &tip.hash, self.params);
        let coinbase_sigops = legacy_sigop_count(&coinbase);

        let mut transactions = Vec::with_capacity(selection.transactions.len() + 1);
        transactions.push(coinbase);
        transactions.extend(selection.transactions);

        let bits = get_next_work_required(tip.headers, self.params)?;
        let tx_time = selection.min_tx_time;
        let mut block = Block {
            header: BlockHeader {
                version: CURRENT_BLOCK_VERSION,
                region: self.params.region(),
                prev_block_hash: tip.hash,
                merkle_root: Hash320::ZERO,
                tx_time,
                hash_coin: 0,
                sig_checksum: 0,
                bits,
                time: u32::try_from(now_ms - tx_time).unwrap_or(u32::MAX),
                nonce: 0,
            },
            transactions,
            signature: Vec::new(),
        };
        block.header.merkle_root = block_merkle_root(&block).0;

        let mut tx_fees = vec![-selection.total_fees];
        tx_fees.extend(selection.fees);
        let mut tx_sigops = vec![coinbase_sigops];
        tx_sigops.extend(selection.sigops);

        info!(
            height,
            size = selection.block_size,
            transactions = block.transactions.len(),
            fees = selection.total_fees,
            "created block template"
        );

        // 8. Dry run
        let ctx = BlockContext { height, median_time_past: median_time, expected_bits: Some(bits) };
        let mut dry_run = CoinsViewCache::new(view);
        match connect_block(&block, &mut dry_run, &ctx, self.params, self.verifier, true) {
            Ok((result, _)) if result.is_valid() => {}
            Ok((result, _)) => {
                error!(?result, "block template failed to connect");
                return Err(ConsensusError::Internal(format!("template does not connect: {result:?}")));
            }
            Err(e) => {
                error!(error = %e, "block template failed to connect");
                return Err(ConsensusError::Internal(format!("template does not connect: {e}")));
            }
        }

        Ok(BlockTemplate { block, tx_fees, tx_sigops, block_size: selection.block_size })
    }

    fn select(
        &self,
        state: &PoolState,
        tip: &ChainTip<'_>,
        base: &dyn CoinsView,
        median_time: i64,
        now_ms: i64,
    ) -> Result<Selection> {
        let height = tip.height + 1;
        let mut view = CoinsViewCache::new(base);

        // 2. Candidates and orphans
        let mut heap = BinaryHeap::new();
        let mut orphans: Vec<Orphan<'_>> = Vec::new();
        let mut dependers: HashMap<Hash320, Vec<usize>> = HashMap::new();
        for entry in state.entries() {
            let tx = entry.tx();
            if tx.is_coin_base() || !is_final_tx(tx, height, now_ms) {
                continue;
            }

            let mut input_priority = 0.0;
            let mut total_in: Amount = 0;
            let mut depends_on = HashSet::new();
            let mut missing_inputs = false;
            for input in &tx.inputs {
                if let Some(coin) = view.get_coin(&input.prevout) {
                    total_in += coin.output.value;
                    let confirmations = tip.height - coin.height + 1;
                    input_priority += coin.output.value as f64 * confirmations as f64;
                    continue;
                }
                let parent_output = state
                    .get(&input.prevout.hash)
                    .and_then(|parent| parent.tx().outputs.get(input.prevout.index as usize));
                match parent_output {
                    Some(output) => {
                        total_in += output.value;
                        depends_on.insert(input.prevout.hash);
                    }
                    None => {
                        warn!(txid = %entry.txid(), "mempool transaction missing input");
                        missing_inputs = true;
                        break;
                    }
                }
            }
            if missing_inputs {
                continue;
            }

            let size = entry.size();
            let candidate = Candidate {
                priority: tx.compute_priority(input_priority, size),
                fee_per_kb: fee_per_kb(total_in - tx.value_out()?, size),
                order: SelectionOrder::Priority,
                txid: *entry.txid(),
                tx,
            };
            if depends_on.is_empty() {
                heap.push(candidate);
            } else {
                for parent in &depends_on {
                    dependers.entry(*parent).or_default().push(orphans.len());
                }
                orphans.push(Orphan { candidate, depends_on });
            }
        }

        // 3-5. Greedy selection
        let mut order = if self.config.block_priority_size == 0 {
            SelectionOrder::Fee
        } else {
            SelectionOrder::Priority
        };
        if order == SelectionOrder::Fee {
            heap = heap.into_iter().map(|c| c.with_order(order)).collect();
        }

        let mut selection = Selection { block_size: RESERVED_BLOCK_SIZE, min_tx_time: now_ms, ..Default::default() };
        let mut block_sigops = RESERVED_BLOCK_SIGOPS;
        let tx_time_limit = median_time.max(now_ms - MAX_TX_TIME_AGE_MS);

        while let Some(candidate) = heap.pop() {
            let tx = candidate.tx;

            // Size and sig-op budgets
            let tx_size = tx.serialized_size();
            if selection.block_size + tx_size >= self.config.block_max_size {
                continue;
            }
            let mut tx_sigops = legacy_sigop_count(tx);
            if block_sigops + tx_sigops >= MAX_BLOCK_SIGOPS {
                continue;
            }

            // Free transactions only fill the block up to the minimum size
            if order == SelectionOrder::Fee
                && candidate.fee_per_kb < self.config.min_relay_tx_fee as f64
                && selection.block_size + tx_size >= self.config.block_min_size
            {
                continue;
            }

            // One-way switch to fee ordering
            if order == SelectionOrder::Priority
                && (selection.block_size + tx_size >= self.config.block_priority_size || !allow_free(candidate.priority))
            {
                order = SelectionOrder::Fee;
                heap = heap.into_iter().map(|c| c.with_order(order)).collect();
            }

            if !view.have_inputs(tx) {
                continue;
            }
            let tx_fee = view.value_in(tx)? - tx.value_out()?;

            tx_sigops += p2sh_sigop_count(tx, &view);
            if block_sigops + tx_sigops >= MAX_BLOCK_SIGOPS {
                continue;
            }

            let (result, _) = check_inputs(tx, &view, height, SCRIPT_VERIFY_P2SH, self.verifier)?;
            if !result.is_valid() {
                debug!(txid = %candidate.txid, ?result, "skipping transaction with invalid inputs");
                continue;
            }
            view.update_coins(tx, &candidate.txid, height)?;

            // Stale transaction times are clamped
            selection.min_tx_time = selection.min_tx_time.min(tx.tx_time.max(tx_time_limit));

            selection.transactions.push(tx.clone());
            selection.fees.push(tx_fee);
            selection.sigops.push(tx_sigops);
            selection.block_size += tx_size;
            selection.total_fees += tx_fee;
            block_sigops += tx_sigops;

            if self.config.print_priority {
                info!(
                    priority = candidate.priority,
                    fee_per_kb = candidate.fee_per_kb,
                    txid = %candidate.txid,
                    "selected transaction"
                );
            }

            // Release dependents whose last parent was just selected
            if let Some(waiting) = dependers.remove(&candidate.txid) {
                for index in waiting {
                    let orphan = &mut orphans[index];
                    if orphan.depends_on.remove(&candidate.txid) && orphan.depends_on.is_empty() {
                        heap.push(orphan.candidate.with_order(order));
                    }
                }
            }
        }

        Ok(selection)
    }
}

fn now_ms() -> Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ConsensusError::Internal(format!("system clock before epoch: {e}")))?;
    Ok(elapsed.as_millis() as i64)
}

// ============================================================================
// EXTRA NONCE
// ============================================================================

/// Coinbase extra-nonce counter, reset whenever the previous block changes.
#[derive(Debug, Clone, Default)]
pub struct ExtraNonce {
    prev_block: Hash320,
    counter: u32,
}

impl ExtraNonce {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> u32 {
        self.counter
    }
}

/// IncrementExtraNonce: put `height || extra nonce || flags` into the coinbase
/// scriptSig and recompute the Merkle root.
pub fn increment_extra_nonce(block: &mut Block, height: Height, extra_nonce: &mut ExtraNonce) -> Result<()> {
    if extra_nonce.prev_block != block.header.prev_block_hash {
        extra_nonce.counter = 0;
        extra_nonce.prev_block = block.header.prev_block_hash;
    }
    extra_nonce.counter += 1;

    let mut script_sig = Vec::new();
    push_int(&mut script_sig, height);
    push_int(&mut script_sig, i64::from(extra_nonce.counter));
    push_data(&mut script_sig, COINBASE_FLAGS);
    if script_sig.len() > 100 {
        return Err(ConsensusError::Internal("coinbase scriptSig too long".to_string()));
    }

    let coinbase = block
        .transactions
        .first_mut()
        .filter(|tx| tx.is_coin_base())
        .ok_or_else(|| ConsensusError::BlockValidation("block has no coinbase".to_string()))?;
    coinbase.inputs[0].script_sig = script_sig;
    block.header.merkle_root = block_merkle_root(block).0;
    Ok(())
}

// ============================================================================
// PROOF-OF-WORK SEARCH
// ============================================================================

/// What the search loop polls between nonce batches.
pub trait MiningMonitor {
    /// Hash of the current best block.
    fn tip(&self) -> Hash320;

    fn peer_count(&self) -> usize;

    /// Mempool change counter.
    fn transactions_updated(&self) -> u64;

    fn now_ms(&self) -> i64;

    /// Stop request from the owner of the mining thread.
    fn interrupted(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    TipChanged,
    NoPeers,
    MempoolChanged,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// `block` now carries the winning nonce and time.
    Found(Hash320),
    /// The template is stale; build a new one.
    Rebuild(RebuildReason),
    /// The nonce space ran out; bump the extra nonce and retry.
    Exhausted,
}

/// Search nonces for `block`, polling `monitor` every `nonce_mask + 1` nonces.
///
/// Between batches the header time is refreshed to `now - tx_time`.
pub fn search_block(
    block: &mut Block,
    params: &ChainParams,
    monitor: &dyn MiningMonitor,
    nonce_mask: u32,
) -> Result<SearchOutcome> {
    let target = expand_target(block.header.bits)?;
    let started_ms = monitor.now_ms();
    let updated_at_start = monitor.transactions_updated();
    let mut buffers = KryptoHashBuffers::format(&block.header);
    let mut nonce = block.header.nonce;

    loop {
        match scan_krypto_hash(&buffers, nonce, nonce_mask, &target) {
            ScanResult::Found { nonce, hash } => {
                block.header.nonce = nonce;
                block.header.time = buffers.time();
                info!(%hash, nonce, "proof-of-work found");
                return Ok(SearchOutcome::Found(hash));
            }
            ScanResult::Wrapped => return Ok(SearchOutcome::Exhausted),
            ScanResult::Exhausted { next_nonce } => nonce = next_nonce,
        }

        if monitor.interrupted() {
            return Ok(SearchOutcome::Rebuild(RebuildReason::Interrupted));
        }
        if monitor.peer_count() == 0 && !params.mine_blocks_on_demand() {
            return Ok(SearchOutcome::Rebuild(RebuildReason::NoPeers));
        }
        if nonce >= NONCE_REBUILD_THRESHOLD {
            return Ok(SearchOutcome::Exhausted);
        }
        let now = monitor.now_ms();
        if monitor.transactions_updated() != updated_at_start && now - started_ms > MEMPOOL_REBUILD_AGE_MS {
            return Ok(SearchOutcome::Rebuild(RebuildReason::MempoolChanged));
        }
        if monitor.tip() != block.header.prev_block_hash {
            return Ok(SearchOutcome::Rebuild(RebuildReason::TipChanged));
        }

        let time = u32::try_from(now - block.header.tx_time).unwrap_or(u32::MAX);
        buffers.set_time(time);
        block.header.time = time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chainparams::Network;
    use crate::coins::UtxoSet;
    use crate::economic::get_block_subsidy;
    use crate::mempool::MempoolEntry;
    use crate::script::Secp256k1Verifier;
    use std::cell::Cell;

    const NOW: i64 = 1_700_000_000_000;

    struct Fixture {
        params: ChainParams,
        headers: Vec<BlockHeader>,
        view: UtxoSet,
        funding: OutPoint,
    }

    impl Fixture {
        fn new() -> Self {
            let params = ChainParams::new(Network::Regtest);
            let genesis = params.genesis_block().header.clone();
            let mut view = UtxoSet::new();
            view.set_best_block(*params.genesis_hash());
            let funding = OutPoint::new(Hash320([3; 40]), 0);
            view.insert(funding, Coin::new(TxOut::new(1_000 * COIN, vec![0x51]), 0, false, 2));
            Fixture { params, headers: vec![genesis], view, funding }
        }

        fn tip(&self) -> ChainTip<'_> {
            ChainTip { height: 0, hash: *self.params.genesis_hash(), headers: &self.headers }
        }
    }

    fn spend(prevout: OutPoint, value: Amount, tx_time: i64) -> Transaction {
        Transaction {
            inputs: vec![TxIn::new(prevout, vec![])],
            outputs: vec![TxOut::new(value, vec![0x51])],
            tx_time,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_clamps_and_parses() {
        let config = AssemblerConfig { block_max_size: 10, block_priority_size: 50_000, ..Default::default() }.clamped();
        assert_eq!(config.block_max_size, 1000);
        assert_eq!(config.block_priority_size, 1000);

        let config = AssemblerConfig::from_json(r#"{"block_max_size": 2000000, "print_priority": true}"#).unwrap();
        assert_eq!(config.block_max_size, MAX_BLOCK_SIZE - 1000);
        assert_eq!(config.block_priority_size, DEFAULT_BLOCK_PRIORITY_SIZE);
        assert!(config.print_priority);
        assert!(AssemblerConfig::from_json("{").is_err());
    }

    #[test]
    fn test_empty_pool_gives_coinbase_only() {
        let fixture = Fixture::new();
        let verifier = Secp256k1Verifier::default();
        let assembler = BlockAssembler::new(&fixture.params, AssemblerConfig::default(), &verifier);
        let pool = TxMemPool::new();
        let template = assembler.create_new_block_at(&[0x51], &fixture.tip(), &fixture.view, &pool, NOW).unwrap();

        assert_eq!(template.block.transactions.len(), 1);
        let coinbase = &template.block.transactions[0];
        assert!(coinbase.is_coin_base());
        let subsidy = get_block_subsidy(1, fixture.params.genesis_hash(), &fixture.params);
        assert_eq!(coinbase.outputs[0].value, subsidy);
        assert_eq!(template.block.header.tx_time, NOW);
        assert_eq!(template.block.header.time, 0);
        assert_eq!(template.block.header.prev_block_hash, *fixture.params.genesis_hash());
        assert_eq!(template.tx_fees, vec![0]);
    }

    #[test]
    fn test_stale_transaction_time_is_clamped() {
        let fixture = Fixture::new();
        let verifier = Secp256k1Verifier::default();
        let assembler = BlockAssembler::new(&fixture.params, AssemblerConfig::default(), &verifier);
        let pool = TxMemPool::new();
        let tx = spend(fixture.funding, 999 * COIN, 1_000);
        pool.add_unchecked(MempoolEntry::new(tx, COIN, NOW, 0.0, 0));

        let template = assembler.create_new_block_at(&[0x51], &fixture.tip(), &fixture.view, &pool, NOW).unwrap();
        assert_eq!(template.block.transactions.len(), 2);
        assert_eq!(template.block.header.tx_time, NOW - MAX_TX_TIME_AGE_MS);
        assert_eq!(template.block.header.time as i64, MAX_TX_TIME_AGE_MS);
        let subsidy = get_block_subsidy(1, fixture.params.genesis_hash(), &fixture.params);
        assert_eq!(template.block.transactions[0].outputs[0].value, subsidy + COIN);
        assert_eq!(template.total_fees(), COIN);
    }

    #[test]
    fn test_extra_nonce_resets_per_parent() {
        let fixture = Fixture::new();
        let verifier = Secp256k1Verifier::default();
        let assembler = BlockAssembler::new(&fixture.params, AssemblerConfig::default(), &verifier);
        let pool = TxMemPool::new();
        let mut template = assembler.create_new_block_at(&[0x51], &fixture.tip(), &fixture.view, &pool, NOW).unwrap();
        let root = template.block.header.merkle_root;

        let mut extra = ExtraNonce::new();
        increment_extra_nonce(&mut template.block, 1, &mut extra).unwrap();
        increment_extra_nonce(&mut template.block, 1, &mut extra).unwrap();
        assert_eq!(extra.value(), 2);
        assert_ne!(template.block.header.merkle_root, root);
        assert_eq!(template.block.header.merkle_root, block_merkle_root(&template.block).0);

        template.block.header.prev_block_hash = Hash320([1; 40]);
        increment_extra_nonce(&mut template.block, 1, &mut extra).unwrap();
        assert_eq!(extra.value(), 1);
    }

    struct StaticMonitor {
        tip: Hash320,
        peers: usize,
        polls: Cell<u32>,
    }

    impl MiningMonitor for StaticMonitor {
        fn tip(&self) -> Hash320 {
            self.tip
        }

        fn peer_count(&self) -> usize {
            self.peers
        }

        fn transactions_updated(&self) -> u64 {
            0
        }

        fn now_ms(&self) -> i64 {
            self.polls.set(self.polls.get() + 1);
            NOW
        }
    }

    #[test]
    fn test_search_finds_regtest_block() {
        let fixture = Fixture::new();
        let verifier = Secp256k1Verifier::default();
        let assembler = BlockAssembler::new(&fixture.params, AssemblerConfig::default(), &verifier);
        let pool = TxMemPool::new();
        let mut template = assembler.create_new_block_at(&[0x51], &fixture.tip(), &fixture.view, &pool, NOW).unwrap();
        // Any hash meets this target
        template.block.header.bits = 0x2900ffff;

        let monitor = StaticMonitor { tip: *fixture.params.genesis_hash(), peers: 0, polls: Cell::new(0) };
        let outcome = search_block(&mut template.block, &fixture.params, &monitor, 0xf).unwrap();
        assert_eq!(outcome, SearchOutcome::Found(template.block.hash()));
    }

    #[test]
    fn test_search_rebuilds_when_tip_moves() {
        let fixture = Fixture::new();
        let verifier = Secp256k1Verifier::default();
        let assembler = BlockAssembler::new(&fixture.params, AssemblerConfig::default(), &verifier);
        let pool = TxMemPool::new();
        let mut template = assembler.create_new_block_at(&[0x51], &fixture.tip(), &fixture.view, &pool, NOW).unwrap();
        template.block.header.bits = 0x01010000;

        let monitor = StaticMonitor { tip: Hash320([8; 40]), peers: 1, polls: Cell::new(0) };
        let outcome = search_block(&mut template.block, &fixture.params, &monitor, 0x3).unwrap();
        assert_eq!(outcome, SearchOutcome::Rebuild(RebuildReason::TipChanged));
    }
}
