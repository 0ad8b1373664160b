//! Hard-coded block hashes at fixed heights

use crate::chainparams::Network;
use crate::types::{Hash320, Height};

/// Verification of blocks after the last checkpoint costs this much more per transaction.
const SIGCHECK_VERIFICATION_FACTOR: f64 = 5.0;

/// Checkpoint table of one network plus the statistics of its last entry.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointData {
    pub checkpoints: &'static [(Height, Hash320)],
    /// Transaction time (ms) of the last checkpoint block.
    pub time_last_checkpoint: i64,
    pub transactions_last_checkpoint: u64,
    pub transactions_per_day: f64,
}

const MAIN_CHECKPOINTS: &[(Height, Hash320)] = &[(
    99,
    Hash320::from_display_hex("00000018CE97B434F8396CB989C61190BB72B8CD2A7352C48C91AEDB2E0F8AFCE8CDB7A59334E95B"),
)];

const MAIN_DATA: CheckpointData = CheckpointData {
    checkpoints: MAIN_CHECKPOINTS,
    time_last_checkpoint: 0x1538_AEB7_4C0,
    transactions_last_checkpoint: 394_327,
    transactions_per_day: 10_000.0,
};

const TESTNET_DATA: CheckpointData = CheckpointData {
    checkpoints: &[],
    time_last_checkpoint: 0x1488_DDBA_3EE,
    transactions_last_checkpoint: 0,
    transactions_per_day: 300.0,
};

const REGTEST_DATA: CheckpointData = CheckpointData {
    checkpoints: &[],
    time_last_checkpoint: 0,
    transactions_last_checkpoint: 0,
    transactions_per_day: 0.0,
};

pub fn checkpoint_data(network: Network) -> &'static CheckpointData {
    match network {
        Network::Main => &MAIN_DATA,
        Network::Testnet => &TESTNET_DATA,
        Network::Regtest => &REGTEST_DATA,
    }
}

/// True unless a checkpoint exists at `height` with a different hash.
pub fn check_block(network: Network, height: Height, hash: &Hash320) -> bool {
    checkpoint_data(network)
        .checkpoints
        .iter()
        .find(|(h, _)| *h == height)
        .map_or(true, |(_, expected)| expected == hash)
}

/// Height of the last checkpoint, zero when there is none.
pub fn total_blocks_estimate(network: Network) -> Height {
    checkpoint_data(network).checkpoints.last().map_or(0, |(h, _)| *h)
}

/// Highest checkpoint whose hash is among `known` blocks.
pub fn last_checkpoint(network: Network, known: impl Fn(&Hash320) -> bool) -> Option<(Height, Hash320)> {
    checkpoint_data(network).checkpoints.iter().rev().find(|(_, hash)| known(hash)).copied()
}

/// Guess how far verification has progressed, in [0, 1].
///
/// `chain_tx` is the transaction count up to the block at `tx_time_ms`.
pub fn guess_verification_progress(
    network: Network,
    chain_tx: u64,
    tx_time_ms: i64,
    now_ms: i64,
    sigchecks: bool,
) -> f64 {
    let data = checkpoint_data(network);
    let factor = if sigchecks { SIGCHECK_VERIFICATION_FACTOR } else { 1.0 };
    let days_since = |ms: i64| ((now_ms - ms) / 1000) as f64 / 86_400.0;

    let (work_before, work_after) = if chain_tx <= data.transactions_last_checkpoint {
        let cheap_before = chain_tx as f64;
        let cheap_after = (data.transactions_last_checkpoint - chain_tx) as f64;
        let expensive_after = days_since(data.time_last_checkpoint) * data.transactions_per_day;
        (cheap_before, cheap_after + expensive_after * factor)
    } else {
        let cheap_before = data.transactions_last_checkpoint as f64;
        let expensive_before = (chain_tx - data.transactions_last_checkpoint) as f64;
        let expensive_after = days_since(tx_time_ms) * data.transactions_per_day;
        (cheap_before + expensive_before * factor, expensive_after * factor)
    };

    if work_before + work_after <= 0.0 {
        return 1.0;
    }
    work_before / (work_before + work_after)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_checkpoint() {
        let (height, hash) = MAIN_CHECKPOINTS[0];
        assert!(check_block(Network::Main, height, &hash));
        assert!(!check_block(Network::Main, height, &Hash320::ZERO));
        assert!(check_block(Network::Main, height + 1, &Hash320::ZERO));
        assert_eq!(total_blocks_estimate(Network::Main), 99);
    }

    #[test]
    fn test_test_networks_have_no_checkpoints() {
        assert!(check_block(Network::Testnet, 0, &Hash320([1; 40])));
        assert!(check_block(Network::Regtest, 0, &Hash320([1; 40])));
        assert_eq!(total_blocks_estimate(Network::Regtest), 0);
        assert_eq!(last_checkpoint(Network::Testnet, |_| true), None);
    }

    #[test]
    fn test_last_checkpoint_requires_known_hash() {
        assert_eq!(last_checkpoint(Network::Main, |_| false), None);
        assert_eq!(last_checkpoint(Network::Main, |_| true).map(|(h, _)| h), Some(99));
    }

    #[test]
    fn test_verification_progress_bounds() {
        let now = MAIN_DATA.time_last_checkpoint + 86_400_000;
        let start = guess_verification_progress(Network::Main, 0, 0, now, true);
        assert_eq!(start, 0.0);
        let at_checkpoint = guess_verification_progress(Network::Main, 394_327, 0, now, false);
        assert!(at_checkpoint > 0.9 && at_checkpoint < 1.0);
        assert_eq!(guess_verification_progress(Network::Regtest, 0, 0, now, true), 1.0);
    }
}
