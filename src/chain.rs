//! Chain state: the active chain, its UTXO set and the mempool
//!
//! The chain-state lock guards tip, headers and coins together. Operations
//! that also touch the mempool take the pool lock while holding it, never the
//! other way round.

use crate::block::{check_block, check_block_header_context, connect_block, median_time_past, BlockContext};
use crate::chainparams::ChainParams;
use crate::coins::{CoinsViewCache, CoinsViewMut, UtxoSet};
use crate::error::{ConsensusError, Result};
use crate::mempool::{accept_to_memory_pool, TxMemPool};
use crate::mining::{AssemblerConfig, BlockAssembler, BlockTemplate, ChainTip, MiningMonitor};
use crate::network::{BlockLocator, Inventory, InvType, NetworkBroadcast};
use crate::pow::get_next_work_required;
use crate::script::{Secp256k1Verifier, SignatureVerifier};
use crate::serialize::BlockUndo;
use crate::types::*;
use crate::validation::{RejectCode, ValidationResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Blocks timed further than this (ms) into the future are not accepted yet.
pub const MAX_FUTURE_BLOCK_TIME_MS: i64 = 2 * 60 * 60 * 1000;

struct ChainInner {
    headers: Vec<BlockHeader>,
    hashes: Vec<Hash320>,
    undo: Vec<BlockUndo>,
    coins: UtxoSet,
}

impl ChainInner {
    fn height(&self) -> Height {
        self.hashes.len() as Height - 1
    }

    fn tip_hash(&self) -> Hash320 {
        self.hashes.last().copied().unwrap_or(Hash320::ZERO)
    }
}

pub struct ChainState {
    params: ChainParams,
    inner: Mutex<ChainInner>,
    mempool: Arc<TxMemPool>,
    verifier: Box<dyn SignatureVerifier>,
    network: Option<Arc<dyn NetworkBroadcast>>,
}

impl ChainState {
    /// Chain holding only the genesis block, with an empty coin set.
    pub fn new(params: ChainParams) -> Self {
        let mut coins = UtxoSet::new();
        coins.set_best_block(*params.genesis_hash());
        Self::load(params, coins)
    }

    /// Chain at genesis over a previously persisted coin set.
    ///
    /// The coin set's best block is moved to the genesis block.
    pub fn load(params: ChainParams, mut coins: UtxoSet) -> Self {
        let genesis_hash = *params.genesis_hash();
        coins.set_best_block(genesis_hash);
        let inner = ChainInner {
            headers: vec![params.genesis_block().header.clone()],
            hashes: vec![genesis_hash],
            undo: Vec::new(),
            coins,
        };
        ChainState {
            params,
            inner: Mutex::new(inner),
            mempool: Arc::new(TxMemPool::new()),
            verifier: Box::new(Secp256k1Verifier::default()),
            network: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Box<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_network(mut self, network: Arc<dyn NetworkBroadcast>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn mempool(&self) -> &Arc<TxMemPool> {
        &self.mempool
    }

    /// Height and hash of the best block.
    pub fn tip(&self) -> (Height, Hash320) {
        let inner = self.inner.lock();
        (inner.height(), inner.tip_hash())
    }

    pub fn median_time_past(&self) -> i64 {
        median_time_past(&self.inner.lock().headers)
    }

    pub fn block_locator(&self) -> BlockLocator {
        BlockLocator::from_chain(&self.inner.lock().hashes)
    }

    /// Run `f` against the confirmed coin set.
    pub fn with_coins<R>(&self, f: impl FnOnce(&UtxoSet) -> R) -> R {
        f(&self.inner.lock().coins)
    }

    /// Validate `tx` against the tip and the pool and add it to the pool.
    ///
    /// Accepted transactions are relayed when a network is attached.
    pub fn accept_transaction(&self, tx: &Transaction, now_ms: i64) -> Result<ValidationResult> {
        let inner = self.inner.lock();
        let result = accept_to_memory_pool(
            &self.mempool,
            &inner.coins,
            tx,
            inner.height() + 1,
            now_ms,
            &self.params,
            self.verifier.as_ref(),
        )?;
        drop(inner);

        if result.is_valid() {
            if let Some(network) = &self.network {
                network.relay_transaction(&tx.txid(), tx);
            }
        }
        Ok(result)
    }

    /// Validate `block` on top of the tip and connect it.
    ///
    /// 1. The block must extend the current tip
    /// 2. CheckBlock with proof of work and Merkle root
    /// 3. Contextual header rules: difficulty, median time, checkpoints, future time
    /// 4. ConnectBlock on an overlay, committed only when valid
    /// 5. Confirmed transactions and their conflicts leave the mempool
    pub fn accept_block(&self, block: &Block, now_ms: i64) -> Result<ValidationResult> {
        self.connect_tip(block, now_ms, true)
    }

    /// Shared by `accept_block`; tests connect regtest blocks without the hash check.
    fn connect_tip(&self, block: &Block, now_ms: i64, check_pow: bool) -> Result<ValidationResult> {
        let mut inner = self.inner.lock();

        // 1. Parent
        if block.header.prev_block_hash != inner.tip_hash() {
            return Ok(ValidationResult::invalid(0, RejectCode::Invalid, "bad-prevblk"));
        }

        // 2. Context-free rules
        let result = check_block(block, &self.params, check_pow, true)?;
        if !result.is_valid() {
            return Ok(result);
        }

        // 3. Context
        let ctx = BlockContext {
            height: inner.height() + 1,
            median_time_past: median_time_past(&inner.headers),
            expected_bits: Some(get_next_work_required(&inner.headers, &self.params)?),
        };
        let result = check_block_header_context(&block.header, &ctx, &self.params);
        if !result.is_valid() {
            return Ok(result);
        }
        if block.header.block_time_ms() > now_ms + MAX_FUTURE_BLOCK_TIME_MS {
            return Ok(ValidationResult::invalid(0, RejectCode::Invalid, "time-too-new"));
        }

        // 4. Connect
        let (changes, undo) = {
            let mut view = CoinsViewCache::new(&inner.coins);
            let (result, undo) = connect_block(block, &mut view, &ctx, &self.params, self.verifier.as_ref(), false)?;
            if !result.is_valid() {
                debug!(?result, "block failed to connect");
                return Ok(result);
            }
            (view.into_changes(), undo)
        };
        inner.coins.batch_write(changes)?;
        let hash = block.hash();
        inner.headers.push(block.header.clone());
        inner.hashes.push(hash);
        inner.undo.push(undo);

        // 5. Mempool
        for tx in &block.transactions {
            self.mempool.remove(tx, false);
            self.mempool.remove_conflicts(tx);
        }
        self.mempool.check(&inner.coins)?;
        info!(height = ctx.height, %hash, transactions = block.transactions.len(), "connected block");
        drop(inner);

        if let Some(network) = &self.network {
            network.relay_inventory(Inventory::new(InvType::Block, hash));
        }
        Ok(ValidationResult::Valid)
    }

    /// Undo record of the block at `height`.
    pub fn block_undo(&self, height: Height) -> Option<BlockUndo> {
        let index = usize::try_from(height.checked_sub(1)?).ok()?;
        self.inner.lock().undo.get(index).cloned()
    }

    /// Template on top of the current tip.
    pub fn create_new_block(&self, payout_script: &[u8], config: AssemblerConfig, now_ms: i64) -> Result<BlockTemplate> {
        let inner = self.inner.lock();
        let tip = ChainTip { height: inner.height(), hash: inner.tip_hash(), headers: &inner.headers };
        let assembler = BlockAssembler::new(&self.params, config, self.verifier.as_ref());
        assembler.create_new_block_at(payout_script, &tip, &inner.coins, &self.mempool, now_ms)
    }
}

impl MiningMonitor for ChainState {
    fn tip(&self) -> Hash320 {
        self.inner.lock().tip_hash()
    }

    fn peer_count(&self) -> usize {
        self.network.as_ref().map_or(0, |network| network.peer_count())
    }

    fn transactions_updated(&self) -> u64 {
        self.mempool.get_transactions_updated()
    }

    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (height, hash) = self.tip();
        f.debug_struct("ChainState")
            .field("network", &self.params.network())
            .field("height", &height)
            .field("tip", &hash)
            .field("mempool", &self.mempool.size())
            .finish()
    }
}

/// Convenience error for callers that treat a rejection as fatal.
pub fn require_valid(result: ValidationResult) -> Result<()> {
    match result {
        ValidationResult::Valid => Ok(()),
        ValidationResult::Invalid(rejection) => Err(ConsensusError::ConsensusRuleViolation(rejection.reason)),
    }
}
