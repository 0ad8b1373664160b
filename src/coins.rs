//! UTXO views
//!
//! [`CoinsView`] is the persistent-view capability. [`CoinsViewCache`] is a
//! copy-on-write overlay: speculative work (template building, dry runs,
//! block connection) writes only to the overlay and commits to the base with
//! [`CoinsViewMut::batch_write`] once it succeeded.

use crate::constants::MEMPOOL_HEIGHT;
use crate::error::{ConsensusError, Result};
use crate::mempool::PoolState;
use crate::script::is_unspendable;
use crate::serialize::{TxInUndo, TxUndo};
use crate::transaction::money_range;
use crate::types::*;
use std::collections::HashMap;

/// Read access to unspent outputs.
pub trait CoinsView {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin>;

    fn have_coin(&self, outpoint: &OutPoint) -> bool {
        self.get_coin(outpoint).is_some()
    }

    /// Block whose state this view reflects.
    fn best_block(&self) -> Hash320 {
        Hash320::ZERO
    }
}

/// Pending modifications; `None` marks a spent output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoinsChanges {
    pub coins: HashMap<OutPoint, Option<Coin>>,
    pub best_block: Option<Hash320>,
}

/// Views that accept a batch of changes.
pub trait CoinsViewMut: CoinsView {
    fn batch_write(&mut self, changes: CoinsChanges) -> Result<()>;
}

/// UTXO Set: 𝒰𝒮 = 𝒪 → 𝒰, held in memory
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    coins: HashMap<OutPoint, Coin>,
    best_block: Hash320,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, outpoint: OutPoint, coin: Coin) -> Option<Coin> {
        self.coins.insert(outpoint, coin)
    }

    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.remove(outpoint)
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &Coin)> {
        self.coins.iter()
    }

    pub fn set_best_block(&mut self, hash: Hash320) {
        self.best_block = hash;
    }

    /// Sum of all unspent values.
    pub fn total_value(&self) -> Amount {
        self.coins.values().map(|coin| coin.output.value).sum()
    }
}

impl CoinsView for UtxoSet {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.get(outpoint).cloned()
    }

    fn best_block(&self) -> Hash320 {
        self.best_block
    }
}

impl CoinsViewMut for UtxoSet {
    fn batch_write(&mut self, changes: CoinsChanges) -> Result<()> {
        for (outpoint, coin) in changes.coins {
            match coin {
                Some(coin) => {
                    self.coins.insert(outpoint, coin);
                }
                None => {
                    self.coins.remove(&outpoint);
                }
            }
        }
        if let Some(best_block) = changes.best_block {
            self.best_block = best_block;
        }
        Ok(())
    }
}

/// Copy-on-write overlay over another view.
pub struct CoinsViewCache<'a> {
    base: &'a dyn CoinsView,
    changes: CoinsChanges,
}

impl<'a> CoinsViewCache<'a> {
    pub fn new(base: &'a dyn CoinsView) -> Self {
        CoinsViewCache { base, changes: CoinsChanges::default() }
    }

    pub fn add_coin(&mut self, outpoint: OutPoint, coin: Coin) {
        self.changes.coins.insert(outpoint, Some(coin));
    }

    /// Mark an output spent and return what it held.
    pub fn spend_coin(&mut self, outpoint: &OutPoint) -> Option<Coin> {
        let coin = self.get_coin(outpoint)?;
        self.changes.coins.insert(*outpoint, None);
        Some(coin)
    }

    pub fn have_inputs(&self, tx: &Transaction) -> bool {
        tx.is_coin_base() || tx.inputs.iter().all(|input| self.have_coin(&input.prevout))
    }

    /// Sum of the values spent by `tx`; zero for a coinbase.
    pub fn value_in(&self, tx: &Transaction) -> Result<Amount> {
        if tx.is_coin_base() {
            return Ok(0);
        }
        let mut total: Amount = 0;
        for input in &tx.inputs {
            let coin = self
                .get_coin(&input.prevout)
                .ok_or_else(|| ConsensusError::UtxoNotFound(format!("{}:{}", input.prevout.hash, input.prevout.index)))?;
            total += coin.output.value;
            if !money_range(total) {
                return Err(ConsensusError::EconomicValidation("input values out of range".to_string()));
            }
        }
        Ok(total)
    }

    /// UpdateCoins: spend the inputs of `tx` and add its outputs under `txid`.
    ///
    /// Returns the undo record for the spent inputs.
    pub fn update_coins(&mut self, tx: &Transaction, txid: &Hash320, height: Height) -> Result<TxUndo> {
        let mut undo = TxUndo::default();
        if !tx.is_coin_base() {
            for input in &tx.inputs {
                let coin = self.spend_coin(&input.prevout).ok_or_else(|| {
                    ConsensusError::UtxoNotFound(format!("{}:{}", input.prevout.hash, input.prevout.index))
                })?;
                undo.prevouts.push(TxInUndo::from(coin));
            }
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            if is_unspendable(&output.script_pubkey) {
                continue;
            }
            self.add_coin(
                OutPoint::new(*txid, index as u32),
                Coin::new(output.clone(), height, tx.is_coin_base(), tx.version),
            );
        }
        Ok(undo)
    }

    pub fn set_best_block(&mut self, hash: Hash320) {
        self.changes.best_block = Some(hash);
    }

    pub fn modified_count(&self) -> usize {
        self.changes.coins.len()
    }

    /// Detach the pending changes for committing to the base view.
    pub fn into_changes(self) -> CoinsChanges {
        self.changes
    }
}

impl CoinsView for CoinsViewCache<'_> {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        match self.changes.coins.get(outpoint) {
            Some(entry) => entry.clone(),
            None => self.base.get_coin(outpoint),
        }
    }

    fn best_block(&self) -> Hash320 {
        self.changes.best_block.unwrap_or_else(|| self.base.best_block())
    }
}

impl CoinsViewMut for CoinsViewCache<'_> {
    fn batch_write(&mut self, changes: CoinsChanges) -> Result<()> {
        self.changes.coins.extend(changes.coins);
        if changes.best_block.is_some() {
            self.changes.best_block = changes.best_block;
        }
        Ok(())
    }
}

/// Confirmed coins plus the outputs of transactions in the mempool.
///
/// Mempool outputs appear at `MEMPOOL_HEIGHT`.
pub struct MempoolCoinsView<'a> {
    base: &'a dyn CoinsView,
    pool: &'a PoolState,
}

impl<'a> MempoolCoinsView<'a> {
    pub fn new(base: &'a dyn CoinsView, pool: &'a PoolState) -> Self {
        MempoolCoinsView { base, pool }
    }
}

impl CoinsView for MempoolCoinsView<'_> {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        if let Some(coin) = self.base.get_coin(outpoint) {
            return Some(coin);
        }
        let entry = self.pool.get(&outpoint.hash)?;
        let output = entry.tx().outputs.get(outpoint.index as usize)?;
        Some(Coin::new(output.clone(), MEMPOOL_HEIGHT, false, entry.tx().version))
    }

    fn best_block(&self) -> Hash320 {
        self.base.best_block()
    }
}
