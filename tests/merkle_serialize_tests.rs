//! Merkle commitments and the wire format

use kryptohash_consensus::hash::hash;
use kryptohash_consensus::merkle::{
    compute_merkle_branch, compute_merkle_root, compute_merkle_root_from_branch, MerkleTree,
};
use kryptohash_consensus::serialize::{deserialize, serialize, serialized_size};
use kryptohash_consensus::*;
use proptest::prelude::*;

fn leaves(count: usize) -> Vec<Hash320> {
    (0..count).map(|i| hash(&(i as u64).to_le_bytes())).collect()
}

fn arb_transaction() -> impl Strategy<Value = Transaction> {
    let input = (any::<u8>(), any::<u32>(), prop::collection::vec(any::<u8>(), 0..80), any::<u32>())
        .prop_map(|(seed, index, script_sig, sequence)| TxIn {
            prevout: OutPoint::new(Hash320([seed; 40]), index),
            script_sig,
            sequence,
        });
    let output = (0..MAX_MONEY, prop::collection::vec(any::<u8>(), 0..40))
        .prop_map(|(value, script_pubkey)| TxOut::new(value, script_pubkey));
    (
        prop::collection::vec(input, 1..4),
        prop::collection::vec(output, 1..4),
        any::<i64>(),
        any::<i64>(),
        any::<u64>(),
    )
        .prop_map(|(inputs, outputs, tx_time, lock_time, hash_coin)| Transaction {
            inputs,
            outputs,
            tx_time,
            lock_time,
            hash_coin,
            ..Default::default()
        })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, failure_persistence: None, .. ProptestConfig::default() })]

    #[test]
    fn prop_every_branch_replays_to_root(count in 1usize..40, pick in any::<u32>()) {
        let leaves = leaves(count);
        let position = pick % count as u32;
        let (root, _) = compute_merkle_root(&leaves);
        let branch = compute_merkle_branch(&leaves, position);
        prop_assert_eq!(compute_merkle_root_from_branch(&leaves[position as usize], &branch, position), root);

        let tree = MerkleTree::build(&leaves);
        prop_assert_eq!(tree.root(), root);
        prop_assert_eq!(tree.branch(position as usize), Some(branch));
    }

    #[test]
    fn prop_transaction_wire_format_is_stable(tx in arb_transaction()) {
        let bytes = serialize(&tx);
        prop_assert_eq!(bytes.len(), serialized_size(&tx));
        prop_assert_eq!(bytes.len(), tx.serialized_size());
        let decoded: Transaction = deserialize(&bytes).unwrap();
        prop_assert_eq!(decoded.txid(), tx.txid());
        prop_assert_eq!(decoded, tx);
    }
}

#[test]
fn test_root_changes_with_any_leaf() {
    let mut leaves = leaves(7);
    let (root, mutated) = compute_merkle_root(&leaves);
    assert!(!mutated);
    leaves[6] = Hash320([9; 40]);
    assert_ne!(compute_merkle_root(&leaves).0, root);
}

#[test]
fn test_mutated_flag_across_tree_shapes() {
    for count in 1..=70 {
        let distinct = leaves(count);
        let (root, mutated) = compute_merkle_root(&distinct);
        assert!(!mutated, "{count} distinct leaves flagged");

        if count % 2 == 1 {
            let mut padded = distinct.clone();
            padded.push(distinct[count - 1]);
            let (padded_root, mutated) = compute_merkle_root(&padded);
            assert!(mutated, "duplicated tail of {count} leaves not flagged");
            assert_eq!(padded_root, root);
        }
    }
}

#[test]
fn test_duplicated_subtree_is_flagged() {
    // Six leaves fold [e, f] against itself, so eight with [e, f] repeated commit identically
    let six = leaves(6);
    let mut eight = six.clone();
    eight.extend_from_slice(&six[4..]);
    let (root, mutated) = compute_merkle_root(&six);
    assert!(!mutated);
    assert_eq!(compute_merkle_root(&eight), (root, true));

    // Equal leaves anywhere in a pair are flagged too
    let mut inner = leaves(9);
    inner[3] = inner[2];
    assert!(compute_merkle_root(&inner).1);
}

#[test]
fn test_genesis_block_round_trips() {
    let params = ChainParams::new(Network::Main);
    let bytes = serialize(params.genesis_block());
    let block: Block = deserialize(&bytes).unwrap();
    assert_eq!(&block, params.genesis_block());
    assert_eq!(block.header.hash(), *params.genesis_hash());
    assert_eq!(serialize(&block.header).len(), BLOCK_HEADER_SIZE);
}

#[test]
fn test_trailing_bytes_are_rejected() {
    let params = ChainParams::new(Network::Regtest);
    let mut bytes = serialize(&params.genesis_block().transactions[0]);
    bytes.push(0);
    assert!(deserialize::<Transaction>(&bytes).is_err());
}
