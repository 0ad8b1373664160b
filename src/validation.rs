//! Validation outcomes and input checking
//!
//! A consensus violation is not an error: it is a [`ValidationResult::Invalid`]
//! carrying a reject code, a reason and a denial-of-service score. Callers
//! that track peers fold results into a [`ValidationState`].

use crate::coins::CoinsView;
use crate::constants::COINBASE_MATURITY;
use crate::error::{ConsensusError, Result};
use crate::script::{verify_script, SignatureVerifier, TransactionSignatureChecker};
use crate::transaction::money_range;
use crate::types::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Reject codes relayed to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RejectCode {
    Malformed = 0x01,
    Invalid = 0x10,
    Obsolete = 0x11,
    Duplicate = 0x12,
    NonStandard = 0x40,
    Dust = 0x41,
    InsufficientFee = 0x42,
    Checkpoint = 0x43,
}

/// Why an object was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: RejectCode,
    pub dos: u32,
    pub reason: String,
    /// The object may be corrupted in transit rather than invalid.
    pub corruption_possible: bool,
}

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(Rejection),
}

impl ValidationResult {
    pub fn invalid(dos: u32, code: RejectCode, reason: impl Into<String>) -> Self {
        ValidationResult::Invalid(Rejection { code, dos, reason: reason.into(), corruption_possible: false })
    }

    /// Rejection that does not prove the sender misbehaved.
    pub fn corrupted(code: RejectCode, reason: impl Into<String>) -> Self {
        ValidationResult::Invalid(Rejection { code, dos: 100, reason: reason.into(), corruption_possible: true })
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn dos_score(&self) -> u32 {
        match self {
            ValidationResult::Valid => 0,
            ValidationResult::Invalid(rejection) => rejection.dos,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ValidationResult::Valid => None,
            ValidationResult::Invalid(rejection) => Some(rejection),
        }
    }
}

/// Cumulative validation record for one peer or object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationState {
    dos_score: u32,
    rejections: Vec<Rejection>,
}

impl ValidationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a result in; returns whether it was valid.
    pub fn record(&mut self, result: &ValidationResult) -> bool {
        match result {
            ValidationResult::Valid => true,
            ValidationResult::Invalid(rejection) => {
                self.dos_score = self.dos_score.saturating_add(rejection.dos);
                self.rejections.push(rejection.clone());
                false
            }
        }
    }

    pub fn dos_score(&self) -> u32 {
        self.dos_score
    }

    pub fn last_rejection(&self) -> Option<&Rejection> {
        self.rejections.last()
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    /// Whether the score has reached the given ban threshold.
    pub fn should_ban(&self, threshold: u32) -> bool {
        self.dos_score >= threshold
    }
}

/// CheckInputs: 𝒯𝒳 × 𝒰𝒱 × ℕ × ℕ → {valid, invalid} × ℤ
///
/// For a non-coinbase transaction tx against view us at spend height h:
/// 1. Every prevout must be in us
/// 2. Coinbase outputs must have COINBASE_MATURITY confirmations
/// 3. Input values and their sum stay in the money range
/// 4. Σ in ≥ Σ out; the difference is the fee
/// 5. Every scriptSig satisfies its scriptPubKey under `flags`
pub fn check_inputs(
    tx: &Transaction,
    view: &dyn CoinsView,
    spend_height: Height,
    flags: u32,
    verifier: &dyn SignatureVerifier,
) -> Result<(ValidationResult, Amount)> {
    if tx.is_coin_base() {
        return Ok((ValidationResult::Valid, 0));
    }

    let mut value_in: Amount = 0;
    let mut coins = Vec::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        let Some(coin) = view.get_coin(&input.prevout) else {
            return Ok((
                ValidationResult::invalid(0, RejectCode::Invalid, "bad-txns-inputs-missingorspent"),
                0,
            ));
        };
        if coin.is_coinbase && spend_height - coin.height < COINBASE_MATURITY {
            return Ok((
                ValidationResult::invalid(0, RejectCode::Invalid, "bad-txns-premature-spend-of-coinbase"),
                0,
            ));
        }
        value_in += coin.output.value;
        if !money_range(coin.output.value) || !money_range(value_in) {
            return Ok((ValidationResult::invalid(100, RejectCode::Invalid, "bad-txns-inputvalues-outofrange"), 0));
        }
        coins.push(coin);
    }

    let value_out = match tx.value_out() {
        Ok(value) => value,
        Err(_) => {
            return Ok((ValidationResult::invalid(100, RejectCode::Invalid, "bad-txns-txouttotal-toolarge"), 0));
        }
    };
    if value_in < value_out {
        return Ok((ValidationResult::invalid(100, RejectCode::Invalid, "bad-txns-in-belowout"), 0));
    }
    let fee = value_in - value_out;

    for (index, (input, coin)) in tx.inputs.iter().zip(&coins).enumerate() {
        let checker = TransactionSignatureChecker::new(tx, index, verifier);
        let verified = match verify_script(&input.script_sig, &coin.output.script_pubkey, flags, &checker) {
            Ok(verified) => verified,
            Err(ConsensusError::ScriptExecution(reason)) => {
                debug!(input = index, %reason, "script evaluation error");
                false
            }
            Err(other) => return Err(other),
        };
        if !verified {
            return Ok((
                ValidationResult::invalid(100, RejectCode::Invalid, format!("mandatory-script-verify-flag-failed (input {index})")),
                0,
            ));
        }
    }

    Ok((ValidationResult::Valid, fee))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coins::UtxoSet;
    use crate::script::Secp256k1Verifier;

    fn funded_view(value: Amount, is_coinbase: bool, height: Height) -> (UtxoSet, OutPoint) {
        let outpoint = OutPoint::new(Hash320([5; 40]), 0);
        let mut view = UtxoSet::new();
        view.insert(outpoint, Coin::new(TxOut::new(value, vec![0x51]), height, is_coinbase, 2));
        (view, outpoint)
    }

    fn spend(outpoint: OutPoint, value: Amount) -> Transaction {
        Transaction {
            inputs: vec![TxIn::new(outpoint, Vec::new())],
            outputs: vec![TxOut::new(value, vec![0x51])],
            ..Default::default()
        }
    }

    #[test]
    fn test_check_inputs_returns_fee() {
        let (view, outpoint) = funded_view(10_000, false, 1);
        let verifier = Secp256k1Verifier::default();
        let (result, fee) = check_inputs(&spend(outpoint, 9_000), &view, 2, 0, &verifier).unwrap();
        assert!(result.is_valid());
        assert_eq!(fee, 1_000);
    }

    #[test]
    fn test_check_inputs_rejects_overspend() {
        let (view, outpoint) = funded_view(10_000, false, 1);
        let verifier = Secp256k1Verifier::default();
        let (result, _) = check_inputs(&spend(outpoint, 10_001), &view, 2, 0, &verifier).unwrap();
        assert_eq!(result.dos_score(), 100);
        assert_eq!(result.rejection().unwrap().reason, "bad-txns-in-belowout");
    }

    #[test]
    fn test_check_inputs_coinbase_maturity() {
        let (view, outpoint) = funded_view(10_000, true, 5);
        let verifier = Secp256k1Verifier::default();
        let (result, _) = check_inputs(&spend(outpoint, 1), &view, 5 + COINBASE_MATURITY - 1, 0, &verifier).unwrap();
        assert!(!result.is_valid());
        let (result, _) = check_inputs(&spend(outpoint, 1), &view, 5 + COINBASE_MATURITY, 0, &verifier).unwrap();
        assert!(result.is_valid());
    }

    #[test]
    fn test_check_inputs_missing_coin() {
        let (view, _) = funded_view(10_000, false, 1);
        let verifier = Secp256k1Verifier::default();
        let missing = OutPoint::new(Hash320([6; 40]), 3);
        let (result, _) = check_inputs(&spend(missing, 1), &view, 2, 0, &verifier).unwrap();
        assert_eq!(result.rejection().unwrap().reason, "bad-txns-inputs-missingorspent");
        assert_eq!(result.dos_score(), 0);
    }

    #[test]
    fn test_state_accumulates_dos() {
        let mut state = ValidationState::new();
        assert!(state.record(&ValidationResult::Valid));
        assert!(!state.record(&ValidationResult::invalid(10, RejectCode::Invalid, "a")));
        assert!(!state.record(&ValidationResult::invalid(90, RejectCode::Invalid, "b")));
        assert_eq!(state.dos_score(), 100);
        assert!(state.should_ban(100));
        assert_eq!(state.last_rejection().unwrap().reason, "b");
        assert_eq!(state.rejections().len(), 2);
    }
}
