//! Coin issuance and fees

use crate::chainparams::ChainParams;
use crate::coins::CoinsView;
use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::types::*;

/// Blocks between halvings of the tail subsidy.
pub const TAIL_HALVING_INTERVAL: Height = 125_000;

/// GetBlockSubsidy: ℕ × ℍ → ℤ
///
/// Let b = random_subsidy_begins, e = random_subsidy_ends, m = max_subsidy:
/// 1. h < b: subsidy = C
/// 2. b ≤ h < e: subsidy = (1 + prev mod m) × C, where prev is the low 64 bits
///    of the previous block hash
/// 3. h ≥ e: subsidy = max(C, (m × C / 2) >> ⌊(h - e) / T⌋) with T = TAIL_HALVING_INTERVAL
pub fn get_block_subsidy(height: Height, prev_hash: &Hash320, params: &ChainParams) -> Amount {
    let max_subsidy = params.max_subsidy().max(1);
    if height < params.random_subsidy_begins() {
        return COIN;
    }
    if height < params.random_subsidy_ends() {
        let multiplier = 1 + (prev_hash.low_u64() % max_subsidy as u64) as i64;
        return multiplier * COIN;
    }
    let halvings = (height - params.random_subsidy_ends()) / TAIL_HALVING_INTERVAL;
    if halvings >= 63 {
        return COIN;
    }
    ((max_subsidy * COIN / 2) >> halvings).max(COIN)
}

/// GetBlockValue: ℕ × ℤ × ℍ → ℤ
///
/// Subsidy plus the fees of the included transactions.
pub fn get_block_value(height: Height, fees: Amount, prev_hash: &Hash320, params: &ChainParams) -> Amount {
    get_block_subsidy(height, prev_hash, params) + fees
}

/// Calculate transaction fee
///
/// Fee = sum of input values - sum of output values
pub fn calculate_fee(tx: &Transaction, view: &dyn CoinsView) -> Result<Amount> {
    if tx.is_coin_base() {
        return Ok(0);
    }

    let mut total_input: Amount = 0;
    for input in &tx.inputs {
        let coin = view
            .get_coin(&input.prevout)
            .ok_or_else(|| ConsensusError::UtxoNotFound(format!("{}:{}", input.prevout.hash, input.prevout.index)))?;
        total_input += coin.output.value;
    }
    let total_output = tx.value_out()?;

    let fee = total_input - total_output;
    if fee < 0 {
        return Err(ConsensusError::EconomicValidation("Negative fee".to_string()));
    }
    Ok(fee)
}

/// Fee per 1000 bytes of serialized size.
pub fn fee_per_kb(fee: Amount, size: usize) -> f64 {
    if size == 0 {
        return 0.0;
    }
    fee as f64 * 1000.0 / size as f64
}

/// Minimum fee for a transaction of `size` bytes at `rate` per kilobyte.
pub fn min_fee(size: usize, rate: Amount) -> Amount {
    let fee = rate * (1 + size as i64 / 1000);
    fee.min(MAX_MONEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chainparams::Network;
    use crate::coins::UtxoSet;

    fn prev_with_low(value: u64) -> Hash320 {
        let mut bytes = [0xAAu8; 40];
        bytes[..8].copy_from_slice(&value.to_le_bytes());
        Hash320(bytes)
    }

    #[test]
    fn test_subsidy_before_random_window() {
        let params = ChainParams::new(Network::Main);
        assert_eq!(get_block_subsidy(1, &prev_with_low(399), &params), COIN);
        assert_eq!(get_block_subsidy(99, &prev_with_low(399), &params), COIN);
    }

    #[test]
    fn test_subsidy_random_window() {
        let params = ChainParams::new(Network::Main);
        assert_eq!(get_block_subsidy(100, &prev_with_low(0), &params), COIN);
        assert_eq!(get_block_subsidy(100, &prev_with_low(399), &params), 400 * COIN);
        assert_eq!(get_block_subsidy(124_999, &prev_with_low(401), &params), 2 * COIN);
    }

    #[test]
    fn test_subsidy_tail() {
        let params = ChainParams::new(Network::Regtest);
        assert_eq!(get_block_subsidy(125_000, &prev_with_low(7), &params), 200 * COIN);
        assert_eq!(get_block_subsidy(250_000, &prev_with_low(7), &params), 100 * COIN);
        assert_eq!(get_block_subsidy(125_000 * 20, &prev_with_low(7), &params), COIN);
    }

    #[test]
    fn test_block_value_adds_fees() {
        let params = ChainParams::new(Network::Regtest);
        let prev = prev_with_low(9);
        assert_eq!(get_block_value(10, 1234, &prev, &params), 10 * COIN + 1234);
    }

    #[test]
    fn test_calculate_fee() {
        let funding = OutPoint::new(Hash320([1; 40]), 0);
        let mut view = UtxoSet::new();
        view.insert(funding, Coin::new(TxOut::new(10_000, vec![0x51]), 1, false, 2));
        let tx = Transaction {
            inputs: vec![TxIn::new(funding, vec![])],
            outputs: vec![TxOut::new(7_500, vec![0x51])],
            ..Default::default()
        };
        assert_eq!(calculate_fee(&tx, &view).unwrap(), 2_500);

        let overspend = Transaction { outputs: vec![TxOut::new(10_001, vec![])], ..tx.clone() };
        assert!(calculate_fee(&overspend, &view).is_err());
    }

    #[test]
    fn test_fee_rates() {
        assert_eq!(fee_per_kb(500, 250), 2000.0);
        assert_eq!(fee_per_kb(500, 0), 0.0);
        assert_eq!(min_fee(999, 1000), 1000);
        assert_eq!(min_fee(1000, 1000), 2000);
    }
}
