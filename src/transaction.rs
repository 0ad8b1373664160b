//! Transaction identity and context-free transaction rules

use crate::coins::CoinsView;
use crate::constants::*;
use crate::hash::HashWriter;
use crate::script::{count_p2sh_sigops, count_sigops, is_pay_to_script_hash};
use crate::serialize::{serialized_size, Encodable};
use crate::types::*;
use crate::validation::{RejectCode, ValidationResult};
use std::collections::BTreeSet;

/// Bytes of a serialized input that carry no script: outpoint, sequence and script length.
const INPUT_OVERHEAD: usize = 44 + 4 + 1;

impl Transaction {
    fn hash_writer(&self) -> HashWriter {
        let mut writer = HashWriter::new();
        // Writing into a hash context cannot fail
        let _ = self.encode(&mut writer);
        writer
    }

    /// Single-stage SHAKE320 digest; the Merkle leaf of this transaction.
    pub fn hash(&self) -> Hash320 {
        self.hash_writer().finalize()
    }

    /// Two-stage KryptoHash digest of the serialized transaction.
    pub fn krypto_hash(&self) -> Hash320 {
        self.hash_writer().finalize_krypto()
    }

    /// Canonical identity used by the mempool, the UTXO view and outpoints.
    pub fn txid(&self) -> Hash320 {
        self.krypto_hash()
    }

    pub fn serialized_size(&self) -> usize {
        serialized_size(self)
    }

    /// Size with the per-input overhead and up to 110 bytes of each
    /// scriptSig discounted, so spending many small outputs is not penalised.
    pub fn modified_size(&self, tx_size: usize) -> usize {
        let mut size = if tx_size == 0 { self.serialized_size() } else { tx_size };
        for input in &self.inputs {
            let offset = INPUT_OVERHEAD + input.script_sig.len().min(110);
            if size > offset {
                size -= offset;
            }
        }
        size
    }

    /// ComputePriority: ℝ × ℕ → ℝ
    ///
    /// priority = Σ(value × age) / modified_size
    pub fn compute_priority(&self, input_priority: f64, tx_size: usize) -> f64 {
        let size = self.modified_size(tx_size);
        if size == 0 {
            return 0.0;
        }
        input_priority / size as f64
    }
}

/// Priority above which a transaction may be relayed and mined without a fee.
pub fn allow_free(priority: f64) -> bool {
    priority > (COIN * 144) as f64 / 250.0
}

/// CheckTransaction: 𝒯𝒳 → {valid, invalid}
///
/// A transaction tx is valid if and only if:
/// 1. |ins| > 0 ∧ |outs| > 0
/// 2. |tx| ≤ MAX_BLOCK_SIZE
/// 3. ∀o ∈ outs: 0 ≤ o.value ≤ M_max and Σ o.value ≤ M_max
/// 4. No outpoint is spent twice
/// 5. Coinbase: 2 ≤ |scriptSig| ≤ 100; otherwise no input is null
/// 6. hash_coin = 0 unless tx is coinbase
pub fn check_transaction(tx: &Transaction) -> ValidationResult {
    // 1. Check inputs and outputs are not empty
    if tx.inputs.is_empty() {
        return ValidationResult::invalid(10, RejectCode::Invalid, "bad-txns-vin-empty");
    }
    if tx.outputs.is_empty() {
        return ValidationResult::invalid(10, RejectCode::Invalid, "bad-txns-vout-empty");
    }

    // 2. Size limit
    if tx.serialized_size() > MAX_BLOCK_SIZE {
        return ValidationResult::invalid(100, RejectCode::Invalid, "bad-txns-oversize");
    }

    // 3. Output values
    let mut value_out: Amount = 0;
    for output in &tx.outputs {
        if output.value < 0 {
            return ValidationResult::invalid(100, RejectCode::Invalid, "bad-txns-vout-negative");
        }
        if output.value > MAX_MONEY {
            return ValidationResult::invalid(100, RejectCode::Invalid, "bad-txns-vout-toolarge");
        }
        value_out += output.value;
        if !money_range(value_out) {
            return ValidationResult::invalid(100, RejectCode::Invalid, "bad-txns-txouttotal-toolarge");
        }
    }

    // 4. Duplicate inputs
    let mut seen = BTreeSet::new();
    for input in &tx.inputs {
        if !seen.insert(input.prevout) {
            return ValidationResult::invalid(100, RejectCode::Invalid, "bad-txns-inputs-duplicate");
        }
    }

    // 5. Coinbase script size / null prevouts
    if tx.is_coin_base() {
        let len = tx.inputs[0].script_sig.len();
        if !(2..=100).contains(&len) {
            return ValidationResult::invalid(100, RejectCode::Invalid, "bad-cb-length");
        }
    } else {
        if tx.inputs.iter().any(|input| input.prevout.is_null()) {
            return ValidationResult::invalid(10, RejectCode::Invalid, "bad-txns-prevout-null");
        }
        // 6. Side-chain field is reserved
        if tx.hash_coin != 0 {
            return ValidationResult::invalid(100, RejectCode::Invalid, "bad-txns-hashcoin-nonzero");
        }
    }

    ValidationResult::Valid
}

pub fn money_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

/// IsFinalTx: 𝒯𝒳 × ℕ × ℤ → {true, false}
///
/// Lock times below LOCKTIME_THRESHOLD are heights, otherwise millisecond
/// timestamps. A transaction whose inputs are all final ignores its lock time.
pub fn is_final_tx(tx: &Transaction, height: Height, block_time_ms: i64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let limit = if tx.lock_time < LOCKTIME_THRESHOLD { height } else { block_time_ms };
    if tx.lock_time < limit {
        return true;
    }
    tx.inputs.iter().all(|input| input.is_final())
}

/// Sig-ops counted without looking at the outputs being spent.
pub fn legacy_sigop_count(tx: &Transaction) -> usize {
    let inputs: usize = tx.inputs.iter().map(|i| count_sigops(&i.script_sig, false)).sum();
    let outputs: usize = tx.outputs.iter().map(|o| count_sigops(&o.script_pubkey, false)).sum();
    inputs + outputs
}

/// Sig-ops in the redeem scripts of P2SH outputs spent by `tx`.
///
/// Inputs missing from `view` contribute nothing; callers check inputs first.
pub fn p2sh_sigop_count(tx: &Transaction, view: &dyn CoinsView) -> usize {
    if tx.is_coin_base() {
        return 0;
    }
    tx.inputs
        .iter()
        .filter_map(|input| {
            let coin = view.get_coin(&input.prevout)?;
            is_pay_to_script_hash(&coin.output.script_pubkey)
                .then(|| count_p2sh_sigops(&coin.output.script_pubkey, &input.script_sig))
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coins::UtxoSet;
    use crate::script::{pay_to_script_hash, push_data};

    fn create_valid_transaction() -> Transaction {
        Transaction {
            inputs: vec![TxIn::new(OutPoint::new(Hash320([1; 40]), 0), vec![0x51])],
            outputs: vec![TxOut::new(1000, vec![0x51])],
            tx_time: 1_415_000_000_000,
            ..Default::default()
        }
    }

    fn reason(result: ValidationResult) -> String {
        match result {
            ValidationResult::Invalid(rejection) => rejection.reason,
            ValidationResult::Valid => "valid".to_string(),
        }
    }

    #[test]
    fn test_check_transaction_valid() {
        assert!(check_transaction(&create_valid_transaction()).is_valid());
    }

    #[test]
    fn test_check_transaction_empty_inputs() {
        let mut tx = create_valid_transaction();
        tx.inputs.clear();
        let result = check_transaction(&tx);
        assert_eq!(result.dos_score(), 10);
        assert_eq!(reason(result), "bad-txns-vin-empty");
    }

    #[test]
    fn test_check_transaction_value_ranges() {
        let mut tx = create_valid_transaction();
        tx.outputs[0].value = -1;
        assert_eq!(reason(check_transaction(&tx)), "bad-txns-vout-negative");
        tx.outputs[0].value = MAX_MONEY + 1;
        assert_eq!(reason(check_transaction(&tx)), "bad-txns-vout-toolarge");
        tx.outputs = vec![TxOut::new(MAX_MONEY, vec![]), TxOut::new(1, vec![])];
        assert_eq!(reason(check_transaction(&tx)), "bad-txns-txouttotal-toolarge");
    }

    #[test]
    fn test_check_transaction_duplicate_inputs() {
        let mut tx = create_valid_transaction();
        tx.inputs.push(tx.inputs[0].clone());
        assert_eq!(reason(check_transaction(&tx)), "bad-txns-inputs-duplicate");
    }

    #[test]
    fn test_coinbase_script_length() {
        let mut tx = create_valid_transaction();
        tx.inputs[0] = TxIn::new(OutPoint::null(), vec![0x00]);
        assert_eq!(reason(check_transaction(&tx)), "bad-cb-length");
        tx.inputs[0].script_sig = vec![0x00, 0x00];
        assert!(check_transaction(&tx).is_valid());
    }

    #[test]
    fn test_hash_coin_reserved_outside_coinbase() {
        let mut tx = create_valid_transaction();
        tx.hash_coin = 1;
        assert_eq!(reason(check_transaction(&tx)), "bad-txns-hashcoin-nonzero");
    }

    #[test]
    fn test_is_final_tx() {
        let mut tx = create_valid_transaction();
        assert!(is_final_tx(&tx, 10, 0));
        tx.lock_time = 20;
        assert!(is_final_tx(&tx, 10, 0), "final sequence overrides lock time");
        tx.inputs[0].sequence = 0;
        assert!(!is_final_tx(&tx, 10, 0));
        assert!(is_final_tx(&tx, 21, 0));
        tx.lock_time = LOCKTIME_THRESHOLD + 5;
        assert!(!is_final_tx(&tx, 1_000, LOCKTIME_THRESHOLD));
        assert!(is_final_tx(&tx, 1_000, LOCKTIME_THRESHOLD + 6));
    }

    #[test]
    fn test_identity_hashes_differ() {
        let tx = create_valid_transaction();
        assert_ne!(tx.hash(), tx.txid());
        assert_eq!(tx.txid(), tx.krypto_hash());
    }

    #[test]
    fn test_priority_uses_modified_size() {
        let tx = create_valid_transaction();
        let size = tx.serialized_size();
        let modified = tx.modified_size(0);
        assert_eq!(modified, size - (INPUT_OVERHEAD + 1));
        assert_eq!(tx.compute_priority(modified as f64 * 3.0, size), 3.0);
        assert!(allow_free(COIN as f64 * 144.0 / 250.0 + 1.0));
        assert!(!allow_free(1.0));
    }

    #[test]
    fn test_p2sh_sigops_from_view() {
        let redeem = vec![0x51, 0xac, 0xac];
        let funding = OutPoint::new(Hash320([4; 40]), 1);
        let mut view = UtxoSet::new();
        view.insert(funding, Coin::new(TxOut::new(5000, pay_to_script_hash(&redeem)), 1, false, 2));

        let mut script_sig = Vec::new();
        push_data(&mut script_sig, &redeem);
        let tx = Transaction {
            inputs: vec![TxIn::new(funding, script_sig)],
            outputs: vec![TxOut::new(1000, vec![0xac])],
            ..Default::default()
        };
        assert_eq!(legacy_sigop_count(&tx), 1);
        assert_eq!(p2sh_sigop_count(&tx, &view), 2);
    }
}
