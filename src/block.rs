//! Block identity and block validation: CheckBlock and ConnectBlock

use crate::chainparams::ChainParams;
use crate::checkpoints;
use crate::coins::{CoinsView, CoinsViewCache};
use crate::constants::*;
use crate::economic::get_block_value;
use crate::error::{ConsensusError, Result};
use crate::hash::HashWriter;
use crate::merkle::block_merkle_root;
use crate::pow::{check_proof_of_work, header_scratchpad_order};
use crate::script::{SignatureVerifier, SCRIPT_VERIFY_P2SH};
use crate::serialize::{serialized_size, BlockUndo, Encodable, TxUndo};
use crate::transaction::{check_transaction, is_final_tx, legacy_sigop_count, p2sh_sigop_count};
use crate::types::*;
use crate::validation::{check_inputs, RejectCode, ValidationResult};
use tracing::{debug, warn};

impl BlockHeader {
    /// Block identity: KryptoHash of the 120-byte header layout.
    ///
    /// Version 2 and later headers re-absorb the scratchpad in reverse chunk order.
    pub fn hash(&self) -> Hash320 {
        let mut writer = HashWriter::new();
        // Writing into a hash context cannot fail
        let _ = self.encode(&mut writer);
        writer.finalize_krypto_with(header_scratchpad_order(self.version))
    }
}

impl Block {
    pub fn hash(&self) -> Hash320 {
        self.header.hash()
    }

    pub fn serialized_size(&self) -> usize {
        serialized_size(self)
    }
}

/// Chain position a block is connected at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    pub height: Height,
    /// Median block time (ms) of the previous MEDIAN_TIME_SPAN blocks.
    pub median_time_past: i64,
    /// Target the difficulty rule demands, when known.
    pub expected_bits: Option<u32>,
}

/// CheckBlock: ℬ → {valid, invalid}
///
/// Context-free block rules. A block b is valid if and only if:
/// 1. 0 < |txs| and |b| ≤ MAX_BLOCK_SIZE
/// 2. If check_pow: KryptoHash(header) ≤ target(bits)
/// 3. txs[0] is the only coinbase
/// 4. Every transaction passes CheckTransaction
/// 5. Legacy sig-ops ≤ MAX_BLOCK_SIGOPS
/// 6. If check_merkle: Merkle root matches and the tree is not mutated
pub fn check_block(block: &Block, params: &ChainParams, check_pow: bool, check_merkle: bool) -> Result<ValidationResult> {
    // 1. Size limits
    if block.transactions.is_empty()
        || block.transactions.len() > MAX_BLOCK_SIZE
        || block.serialized_size() > MAX_BLOCK_SIZE
    {
        return Ok(ValidationResult::invalid(100, RejectCode::Invalid, "bad-blk-length"));
    }

    // 2. Proof of work
    if check_pow {
        let hash = block.hash();
        let meets_target = match check_proof_of_work(&hash, block.header.bits, params) {
            Ok(meets_target) => meets_target,
            Err(e) => {
                debug!(%hash, error = %e, "malformed proof-of-work target");
                false
            }
        };
        if !meets_target {
            return Ok(ValidationResult::invalid(50, RejectCode::Invalid, "high-hash"));
        }
    }

    // 3. Coinbase placement
    if !block.transactions[0].is_coin_base() {
        return Ok(ValidationResult::invalid(100, RejectCode::Invalid, "bad-cb-missing"));
    }
    if block.transactions[1..].iter().any(Transaction::is_coin_base) {
        return Ok(ValidationResult::invalid(100, RejectCode::Invalid, "bad-cb-multiple"));
    }

    // 4. Transactions
    for tx in &block.transactions {
        let result = check_transaction(tx);
        if !result.is_valid() {
            return Ok(result);
        }
    }

    // 5. Legacy sig-op budget
    let sigops: usize = block.transactions.iter().map(legacy_sigop_count).sum();
    if sigops > MAX_BLOCK_SIGOPS {
        return Ok(ValidationResult::invalid(100, RejectCode::Invalid, "bad-blk-sigops"));
    }

    // 6. Merkle commitment
    if check_merkle {
        let (root, mutated) = block_merkle_root(block);
        if root != block.header.merkle_root {
            return Ok(ValidationResult::corrupted(RejectCode::Invalid, "bad-txnmrklroot"));
        }
        // Equal siblings mean a duplicated transaction list has the same root
        if mutated {
            return Ok(ValidationResult::corrupted(RejectCode::Invalid, "bad-txns-duplicate"));
        }
    }

    Ok(ValidationResult::Valid)
}

/// Header rules that depend on the previous blocks.
pub fn check_block_header_context(
    header: &BlockHeader,
    ctx: &BlockContext,
    params: &ChainParams,
) -> ValidationResult {
    if let Some(bits) = ctx.expected_bits {
        if header.bits != bits {
            return ValidationResult::invalid(100, RejectCode::Invalid, "bad-diffbits");
        }
    }
    if header.block_time_ms() <= ctx.median_time_past {
        return ValidationResult::invalid(0, RejectCode::Invalid, "time-too-old");
    }
    if !checkpoints::check_block(params.network(), ctx.height, &header.hash()) {
        return ValidationResult::invalid(100, RejectCode::Checkpoint, "checkpoint mismatch");
    }
    ValidationResult::Valid
}

/// ConnectBlock: ℬ × 𝒰𝒱 × ℕ → {valid, invalid} × 𝒰𝒱
///
/// For block b = (h, txs) on top of view us at height h':
/// 1. CheckBlock(b) without the proof of work, which acceptance already checked
/// 2. h.prev_block_hash must be the best block of us
/// 3. For each tx ∈ txs:
///    - tx must be final at (h', block time)
///    - legacy + P2SH sig-ops stay within MAX_BLOCK_SIGOPS
///    - CheckInputs(tx, us, h') contributes its fee
///    - us = ApplyTransaction(tx, us)
/// 4. Coinbase value out ≤ GetBlockValue(h', fees)
/// 5. Unless just_check, the best block of us becomes hash(b)
///
/// On an invalid result the view holds partial changes and must be discarded.
pub fn connect_block(
    block: &Block,
    view: &mut CoinsViewCache<'_>,
    ctx: &BlockContext,
    params: &ChainParams,
    verifier: &dyn SignatureVerifier,
    just_check: bool,
) -> Result<(ValidationResult, BlockUndo)> {
    let mut undo = BlockUndo::default();

    // 1. Context-free checks
    let result = check_block(block, params, false, true)?;
    if !result.is_valid() {
        return Ok((result, undo));
    }

    // 2. The view must sit on the previous block
    if view.best_block() != block.header.prev_block_hash {
        return Err(ConsensusError::Internal(format!(
            "view is at {} but block builds on {}",
            view.best_block(),
            block.header.prev_block_hash
        )));
    }

    // 3. Transactions
    let block_time = block.header.block_time_ms();
    let mut fees: Amount = 0;
    let mut sigops = 0usize;
    for (index, tx) in block.transactions.iter().enumerate() {
        if !is_final_tx(tx, ctx.height, block_time) {
            return Ok((ValidationResult::invalid(10, RejectCode::Invalid, "bad-txns-nonfinal"), undo));
        }

        sigops += legacy_sigop_count(tx);
        if sigops > MAX_BLOCK_SIGOPS {
            return Ok((ValidationResult::invalid(100, RejectCode::Invalid, "bad-blk-sigops"), undo));
        }

        if !tx.is_coin_base() {
            if !view.have_inputs(tx) {
                return Ok((ValidationResult::invalid(100, RejectCode::Invalid, "bad-txns-inputs-missingorspent"), undo));
            }
            sigops += p2sh_sigop_count(tx, view);
            if sigops > MAX_BLOCK_SIGOPS {
                return Ok((ValidationResult::invalid(100, RejectCode::Invalid, "bad-blk-sigops"), undo));
            }

            let (result, fee) = check_inputs(tx, view, ctx.height, SCRIPT_VERIFY_P2SH, verifier)?;
            if !result.is_valid() {
                debug!(index, "transaction inputs rejected while connecting block");
                return Ok((result, undo));
            }
            fees += fee;
        }

        let tx_undo = apply_transaction(tx, view, ctx.height)?;
        if !tx.is_coin_base() {
            undo.tx_undo.push(tx_undo);
        }
    }

    // 4. Coinbase value
    let block_value = get_block_value(ctx.height, fees, &block.header.prev_block_hash, params);
    let coinbase_value = block.transactions[0].value_out()?;
    if coinbase_value > block_value {
        warn!(coinbase_value, block_value, "coinbase pays too much");
        return Ok((ValidationResult::invalid(100, RejectCode::Invalid, "bad-cb-amount"), undo));
    }

    // 5. Move the view forward
    if !just_check {
        view.set_best_block(block.hash());
    }

    Ok((ValidationResult::Valid, undo))
}

/// ApplyTransaction: 𝒯𝒳 × 𝒰𝒱 → 𝒰𝒱
///
/// For transaction tx and view us:
/// 1. If tx is not coinbase: us' = us \ {i.prevout : i ∈ tx.inputs}
/// 2. us' = us' ∪ {(txid, i) ↦ tx.outputs[i]}
/// 3. Return the undo record of the spent coins
pub fn apply_transaction(tx: &Transaction, view: &mut CoinsViewCache<'_>, height: Height) -> Result<TxUndo> {
    view.update_coins(tx, &tx.txid(), height)
}

/// Median of the last MEDIAN_TIME_SPAN block times (ms).
pub fn median_time_past(headers: &[BlockHeader]) -> i64 {
    let start = headers.len().saturating_sub(MEDIAN_TIME_SPAN);
    let mut times: Vec<i64> = headers[start..].iter().map(BlockHeader::block_time_ms).collect();
    if times.is_empty() {
        return 0;
    }
    times.sort_unstable();
    times[times.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chainparams::Network;
    use crate::coins::UtxoSet;
    use crate::merkle::block_merkle_root;
    use crate::script::Secp256k1Verifier;

    fn create_coinbase(value: Amount) -> Transaction {
        Transaction {
            inputs: vec![TxIn::new(OutPoint::null(), vec![0x00, 0x00])],
            outputs: vec![TxOut::new(value, vec![0x51])],
            tx_time: 1_500_000_000_000,
            ..Default::default()
        }
    }

    fn create_block(prev: Hash320, transactions: Vec<Transaction>) -> Block {
        let mut block = Block {
            header: BlockHeader {
                prev_block_hash: prev,
                tx_time: 1_500_000_000_000,
                time: 1_000,
                bits: 0x2600ffff,
                ..Default::default()
            },
            transactions,
            signature: Vec::new(),
        };
        block.header.merkle_root = block_merkle_root(&block).0;
        block
    }

    fn context(height: Height) -> BlockContext {
        BlockContext { height, median_time_past: 0, expected_bits: None }
    }

    #[test]
    fn test_check_block_requires_coinbase_first() {
        let params = ChainParams::new(Network::Regtest);
        let spend = Transaction {
            inputs: vec![TxIn::new(OutPoint::new(Hash320([1; 40]), 0), vec![])],
            outputs: vec![TxOut::new(1, vec![0x51])],
            ..Default::default()
        };
        let block = create_block(Hash320::ZERO, vec![spend]);
        let result = check_block(&block, &params, false, true).unwrap();
        assert_eq!(result.rejection().unwrap().reason, "bad-cb-missing");

        let block = create_block(Hash320::ZERO, vec![create_coinbase(1), create_coinbase(2)]);
        let result = check_block(&block, &params, false, true).unwrap();
        assert_eq!(result.rejection().unwrap().reason, "bad-cb-multiple");
    }

    #[test]
    fn test_check_block_merkle_mismatch() {
        let params = ChainParams::new(Network::Regtest);
        let mut block = create_block(Hash320::ZERO, vec![create_coinbase(1)]);
        block.header.merkle_root = Hash320([3; 40]);
        let result = check_block(&block, &params, false, true).unwrap();
        let rejection = result.rejection().unwrap();
        assert_eq!(rejection.reason, "bad-txnmrklroot");
        assert!(rejection.corruption_possible);
        assert!(check_block(&block, &params, false, false).unwrap().is_valid());
    }

    #[test]
    fn test_check_block_proof_of_work() {
        let params = ChainParams::new(Network::Main);
        let genesis = params.genesis_block();
        let coinbase_block = create_block(Hash320::ZERO, vec![create_coinbase(1)]);
        let mut hard = coinbase_block.clone();
        hard.header.bits = 0x01010000;
        let result = check_block(&hard, &params, true, true).unwrap();
        assert_eq!(result.rejection().unwrap().reason, "high-hash");
        assert!(check_proof_of_work(&genesis.hash(), genesis.header.bits, &params).unwrap());
    }

    #[test]
    fn test_connect_block_coinbase_value() {
        let params = ChainParams::new(Network::Regtest);
        let verifier = Secp256k1Verifier::default();
        let prev = Hash320([8; 40]);
        let mut base = UtxoSet::new();
        base.set_best_block(prev);

        let limit = get_block_value(1, 0, &prev, &params);
        let block = create_block(prev, vec![create_coinbase(limit)]);
        let mut view = CoinsViewCache::new(&base);
        let (result, undo) = connect_block(&block, &mut view, &context(1), &params, &verifier, true).unwrap();
        assert!(result.is_valid());
        assert!(undo.tx_undo.is_empty());
        assert_eq!(view.best_block(), prev, "dry run leaves the best block alone");

        let greedy = create_block(prev, vec![create_coinbase(limit + 1)]);
        let mut view = CoinsViewCache::new(&base);
        let (result, _) = connect_block(&greedy, &mut view, &context(1), &params, &verifier, true).unwrap();
        assert_eq!(result.rejection().unwrap().reason, "bad-cb-amount");
    }

    #[test]
    fn test_connect_block_spends_and_collects_fees() {
        let params = ChainParams::new(Network::Regtest);
        let verifier = Secp256k1Verifier::default();
        let prev = Hash320([8; 40]);
        let funding = OutPoint::new(Hash320([2; 40]), 0);
        let mut base = UtxoSet::new();
        base.set_best_block(prev);
        base.insert(funding, Coin::new(TxOut::new(50_000, vec![0x51]), 1, false, 2));

        let spend = Transaction {
            inputs: vec![TxIn::new(funding, vec![])],
            outputs: vec![TxOut::new(45_000, vec![0x51])],
            tx_time: 1_500_000_000_000,
            ..Default::default()
        };
        let value = get_block_value(5, 5_000, &prev, &params);
        let block = create_block(prev, vec![create_coinbase(value), spend.clone()]);

        let changes = {
            let mut view = CoinsViewCache::new(&base);
            let (result, undo) = connect_block(&block, &mut view, &context(5), &params, &verifier, false).unwrap();
            assert!(result.is_valid());
            assert_eq!(undo.tx_undo.len(), 1);
            assert_eq!(view.best_block(), block.hash());
            view.into_changes()
        };
        use crate::coins::CoinsViewMut;
        base.batch_write(changes).unwrap();
        assert!(!base.have_coin(&funding));
        assert!(base.have_coin(&OutPoint::new(spend.txid(), 0)));
        assert_eq!(base.best_block(), block.hash());
    }

    #[test]
    fn test_connect_block_rejects_wrong_view() {
        let params = ChainParams::new(Network::Regtest);
        let verifier = Secp256k1Verifier::default();
        let base = UtxoSet::new();
        let block = create_block(Hash320([4; 40]), vec![create_coinbase(1)]);
        let mut view = CoinsViewCache::new(&base);
        let result = connect_block(&block, &mut view, &context(1), &params, &verifier, true);
        assert!(matches!(result, Err(ConsensusError::Internal(_))));
    }

    #[test]
    fn test_median_time_past() {
        let headers: Vec<BlockHeader> = (0..15)
            .map(|i| BlockHeader { tx_time: i * 1_000, ..Default::default() })
            .collect();
        assert_eq!(median_time_past(&headers), 9_000);
        assert_eq!(median_time_past(&[]), 0);
    }

    #[test]
    fn test_header_context_time_and_bits() {
        let params = ChainParams::new(Network::Regtest);
        let header = BlockHeader { tx_time: 10_000, bits: 0x2600ffff, ..Default::default() };
        let ctx = BlockContext { height: 1, median_time_past: 10_000, expected_bits: Some(0x2600ffff) };
        assert_eq!(check_block_header_context(&header, &ctx, &params).rejection().unwrap().reason, "time-too-old");
        let ctx = BlockContext { median_time_past: 0, expected_bits: Some(0x2500ffff), ..ctx };
        assert_eq!(check_block_header_context(&header, &ctx, &params).rejection().unwrap().reason, "bad-diffbits");
    }
}
