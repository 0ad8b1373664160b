//! Network parameters: identity, genesis block, proof-of-work limit and address prefixes
//!
//! One [`ChainParams`] value is selected at startup and passed by reference to
//! everything that needs it. The only mutation is [`ChainParams::update_params`],
//! which is gated on the candidate reproducing its claimed genesis hash.

use crate::constants::{COIN, COINBASE_MATURITY};
use crate::error::{ConsensusError, Result};
use crate::merkle::block_merkle_root;
use crate::pow::U320;
use crate::script::{pay_to_pubkey, push_data};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::{info, warn};

pub const MAX_NUM_OF_REGIONS: i32 = 256;
pub const MAX_NUM_OF_TEST_REGIONS: i32 = 8;
pub const RPC_PORT_BASE: u16 = 38912;
pub const P2P_PORT_BASE: u16 = RPC_PORT_BASE + MAX_NUM_OF_REGIONS as u16;
pub const RPC_PORT_TESTNET_BASE: u16 = 39424;
pub const P2P_PORT_TESTNET_BASE: u16 = RPC_PORT_TESTNET_BASE + MAX_NUM_OF_TEST_REGIONS as u16;
pub const P2P_PORT_REGRESSION: u16 = 39440;

/// Text committed to by the genesis coinbase.
pub const GENESIS_TIMESTAMP: &str =
    "The Guardian 11/13/2014: Comet 67P becomes landing site for Philae in historic touchdown";
const GENESIS_TX_TIME: i64 = 0x149A_BA00_000;
const GENESIS_BLOCK_TIME: u32 = 300_000;
const GENESIS_PUBKEY: &str = "020DC9A10284FDA30C3749C308390BE2B0E2DF56BE836D136D37679F63B258EC13";
const GENESIS_MERKLE_ROOT: Hash320 = Hash320::from_display_hex(
    "D34068077BFD951BF202CA7E31D928B7B27599D65429DA5839E1338F023D85BB45115E8C8F720882",
);

const MAIN_GENESIS: GenesisData = GenesisData {
    tx_time: 0x149A_BA00_000,
    nonce: 0x0006_261B,
    hash: Hash320::from_display_hex(
        "000000AA3109C4FA8691DDF8F96FCFBBEDBB8B1F3BE7675B875CD1552468A58F4F8997BF6636DB9F",
    ),
};
const TESTNET_GENESIS: GenesisData = GenesisData {
    tx_time: 0x149A_BA02_710,
    nonce: 0x0221_FBD1,
    hash: Hash320::from_display_hex(
        "000000071BFA8530EFDDBF308A70BA52F06402AB2223C95A6FDD21FE64B25128DB9EB171D04F4DB0",
    ),
};
const REGTEST_GENESIS: GenesisData = GenesisData {
    tx_time: 0x149A_BA04_E20,
    nonce: 0x0037_AAB9,
    hash: Hash320::from_display_hex(
        "00000051E60392D4DCEB99C06A62FD23EBE1981D51854DE5614050EAE39ABEBACB770BDDEC466B94",
    ),
};

/// Seed node addresses, stored the way they appear in memory (little-endian octets).
const MAIN_FIXED_SEEDS: [u32; 1] = [0x9225_0d45];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Main,
    Testnet,
    Regtest,
}

impl Network {
    pub fn name(&self) -> &'static str {
        match self {
            Network::Main => "main",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pick the network from the `-testnet` / `-regtest` switches; both at once is an error.
pub fn select_network(testnet: bool, regtest: bool) -> Result<Network> {
    match (testnet, regtest) {
        (true, true) => Err(ConsensusError::InvalidNetwork("-testnet and -regtest are mutually exclusive".to_string())),
        (true, false) => Ok(Network::Testnet),
        (false, true) => Ok(Network::Regtest),
        (false, false) => Ok(Network::Main),
    }
}

/// Base58 version prefix classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Base58Type {
    PubkeyAddress,
    ScriptAddress,
    SecretKey,
    ExtPublicKey,
    ExtSecretKey,
}

impl Base58Type {
    pub const ALL: [Base58Type; 5] = [
        Base58Type::PubkeyAddress,
        Base58Type::ScriptAddress,
        Base58Type::SecretKey,
        Base58Type::ExtPublicKey,
        Base58Type::ExtSecretKey,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsSeed {
    pub name: &'static str,
    pub host: &'static str,
}

/// Genesis variant for one zone: header time, nonce and the hash they must produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisData {
    pub tx_time: i64,
    pub nonce: u32,
    pub hash: Hash320,
}

/// Compiled-in genesis variants, keyed by zone.
pub fn genesis_data(network: Network, zone: i32) -> Option<GenesisData> {
    match (network, zone) {
        (Network::Main, 0) => Some(MAIN_GENESIS),
        (Network::Testnet, 0) => Some(TESTNET_GENESIS),
        (Network::Regtest, 0) => Some(REGTEST_GENESIS),
        _ => None,
    }
}

pub fn p2p_port(network: Network, zone: i32) -> u16 {
    match network {
        Network::Main => P2P_PORT_BASE + zone.rem_euclid(MAX_NUM_OF_REGIONS) as u16,
        Network::Testnet => P2P_PORT_TESTNET_BASE + zone.rem_euclid(MAX_NUM_OF_TEST_REGIONS) as u16,
        Network::Regtest => P2P_PORT_REGRESSION,
    }
}

pub fn rpc_port(network: Network, zone: i32) -> u16 {
    match network {
        Network::Main => RPC_PORT_BASE + zone.rem_euclid(MAX_NUM_OF_REGIONS) as u16,
        Network::Testnet | Network::Regtest => RPC_PORT_TESTNET_BASE + zone.rem_euclid(MAX_NUM_OF_TEST_REGIONS) as u16,
    }
}

/// Parameters of one network instance.
#[derive(Debug, Clone)]
pub struct ChainParams {
    network: Network,
    message_start: [u8; 4],
    alert_key: Vec<u8>,
    genesis_pubkey: Vec<u8>,
    region: i32,
    default_port: u16,
    rpc_port: u16,
    data_dir: String,
    sidechain_mask: u64,
    pow_limit: U320,
    max_subsidy: i64,
    random_subsidy_begins: Height,
    random_subsidy_ends: Height,
    target_spacing_ms: i64,
    retarget_window: usize,
    no_retargeting: bool,
    mine_blocks_on_demand: bool,
    require_standard: bool,
    genesis: Block,
    genesis_hash: Hash320,
    genesis_merkle_root: Hash320,
    dns_seeds: Vec<DnsSeed>,
    fixed_seeds: Vec<u32>,
    base58_prefixes: [Vec<u8>; 5],
}

impl ChainParams {
    /// Build the parameters of `network`.
    ///
    /// Panics if a compiled-in key is not valid hex or the compiled-in
    /// genesis block does not hash to its compiled-in digest.
    pub fn new(network: Network) -> Self {
        let genesis_pubkey = hex::decode(GENESIS_PUBKEY).expect("genesis pubkey is valid hex");
        let pow_limit = U320::MAX.shr(24);
        let data = match network {
            Network::Main => MAIN_GENESIS,
            Network::Testnet => TESTNET_GENESIS,
            Network::Regtest => REGTEST_GENESIS,
        };

        let genesis = build_genesis_block(&genesis_pubkey, pow_limit.to_compact(), &data);
        let genesis_merkle_root = genesis.header.merkle_root;
        assert_eq!(genesis_merkle_root, GENESIS_MERKLE_ROOT, "genesis merkle root mismatch");
        let genesis_hash = genesis.hash();
        assert_eq!(genesis_hash, data.hash, "{network} genesis hash mismatch");

        let (message_start, alert_key, dns_seeds, fixed_seeds, base58_prefixes) = match network {
            Network::Main => (
                [0xf1, 0xeb, 0xb4, 0x9d],
                "027C8D760AFB55F6B999AFE2CC8F659D63BB5FBD118750FE369D485B2F4C74D8A2",
                vec![
                    DnsSeed { name: "seed0.kryptohash.org", host: "seed0.kryptohash.org" },
                    DnsSeed { name: "seed1.kryptohash.org", host: "seed1.kryptohash.org" },
                ],
                MAIN_FIXED_SEEDS.to_vec(),
                [vec![45], vec![5], vec![0], vec![4, 136, 178, 30], vec![4, 136, 173, 228]],
            ),
            Network::Testnet | Network::Regtest => (
                if network == Network::Testnet { [0xf1, 0x11, 0x09, 0x07] } else { [0xf1, 0xfb, 0xb5, 0xad] },
                "02666664A1C0FD043653111261115CD51A74D37CB7814E45846718067173C94E24",
                if network == Network::Testnet {
                    vec![DnsSeed { name: "testnet.kryptohash.org", host: "testnet.kryptohash.org" }]
                } else {
                    Vec::new()
                },
                Vec::new(),
                [vec![107], vec![196], vec![3], vec![4, 53, 135, 207], vec![4, 53, 131, 148]],
            ),
        };

        let mut params = ChainParams {
            network,
            message_start,
            alert_key: hex::decode(alert_key).expect("alert key is valid hex"),
            genesis_pubkey,
            region: 0,
            default_port: 0,
            rpc_port: 0,
            data_dir: String::new(),
            sidechain_mask: 0,
            pow_limit,
            max_subsidy: 400,
            random_subsidy_begins: if network == Network::Main { 100 } else { 0 },
            random_subsidy_ends: 125_000,
            target_spacing_ms: 300_000,
            retarget_window: 36,
            no_retargeting: network == Network::Regtest,
            mine_blocks_on_demand: network == Network::Regtest,
            require_standard: network == Network::Main,
            genesis,
            genesis_hash,
            genesis_merkle_root,
            dns_seeds,
            fixed_seeds,
            base58_prefixes,
        };
        params.set_region_code(0);
        params
    }

    fn set_region_code(&mut self, zone: i32) {
        self.region = zone.rem_euclid(MAX_NUM_OF_REGIONS);
        self.default_port = p2p_port(self.network, zone);
        self.rpc_port = rpc_port(self.network, zone);
        let prefix = match self.network {
            Network::Main => "region",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        self.data_dir = format!("{prefix}{}", self.region);
    }

    /// UpdateParams: ℤ × 𝒢 → {ok, rejected}
    ///
    /// 1. Clone the genesis block with region = zone and the candidate's tx time and nonce
    /// 2. Recompute its KryptoHash
    /// 3. If it equals candidate.hash: commit region, ports, data dir and genesis fields
    /// 4. Otherwise reject and leave every field untouched
    pub fn update_params(&mut self, zone: i32, candidate: &GenesisData) -> Result<()> {
        let mut header = self.genesis.header.clone();
        header.region = zone;
        header.tx_time = candidate.tx_time;
        header.nonce = candidate.nonce;

        let hash = header.hash();
        if hash != candidate.hash {
            warn!(network = %self.network, zone, computed = %hash, claimed = %candidate.hash, "zone activation rejected");
            return Err(ConsensusError::ZoneActivation(format!(
                "genesis for zone {zone} hashes to {hash}, not {}",
                candidate.hash
            )));
        }

        self.set_region_code(zone);
        self.genesis.header = header;
        self.genesis_hash = hash;
        info!(network = %self.network, zone, genesis = %hash, "zone activated");
        Ok(())
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn message_start(&self) -> &[u8; 4] {
        &self.message_start
    }

    pub fn alert_key(&self) -> &[u8] {
        &self.alert_key
    }

    pub fn genesis_pubkey(&self) -> &[u8] {
        &self.genesis_pubkey
    }

    pub fn region(&self) -> i32 {
        self.region
    }

    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    pub fn rpc_port(&self) -> u16 {
        self.rpc_port
    }

    pub fn data_dir(&self) -> &str {
        &self.data_dir
    }

    pub fn sidechain_mask(&self) -> u64 {
        self.sidechain_mask
    }

    pub fn set_sidechain_mask(&mut self, mask: u64) {
        self.sidechain_mask = mask;
    }

    pub fn pow_limit(&self) -> &U320 {
        &self.pow_limit
    }

    pub fn max_subsidy(&self) -> i64 {
        self.max_subsidy
    }

    pub fn random_subsidy_begins(&self) -> Height {
        self.random_subsidy_begins
    }

    pub fn random_subsidy_ends(&self) -> Height {
        self.random_subsidy_ends
    }

    pub fn target_spacing_ms(&self) -> i64 {
        self.target_spacing_ms
    }

    pub fn retarget_window(&self) -> usize {
        self.retarget_window
    }

    pub fn no_retargeting(&self) -> bool {
        self.no_retargeting
    }

    pub fn mine_blocks_on_demand(&self) -> bool {
        self.mine_blocks_on_demand
    }

    pub fn require_standard(&self) -> bool {
        self.require_standard
    }

    pub fn coinbase_maturity(&self) -> Height {
        COINBASE_MATURITY
    }

    pub fn genesis_block(&self) -> &Block {
        &self.genesis
    }

    pub fn genesis_hash(&self) -> &Hash320 {
        &self.genesis_hash
    }

    pub fn genesis_merkle_root(&self) -> &Hash320 {
        &self.genesis_merkle_root
    }

    pub fn dns_seeds(&self) -> &[DnsSeed] {
        &self.dns_seeds
    }

    /// Hard-coded seed nodes at the current default port.
    pub fn fixed_seeds(&self) -> Vec<SocketAddrV4> {
        self.fixed_seeds
            .iter()
            .map(|seed| {
                let [a, b, c, d] = seed.to_le_bytes();
                SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), self.default_port)
            })
            .collect()
    }

    pub fn base58_prefix(&self, kind: Base58Type) -> &[u8] {
        &self.base58_prefixes[kind.index()]
    }
}

fn build_genesis_block(pubkey: &[u8], bits: u32, data: &GenesisData) -> Block {
    let mut script_sig = Vec::new();
    push_data(&mut script_sig, &0x2600_ffffu32.to_le_bytes());
    push_data(&mut script_sig, &[4]);
    push_data(&mut script_sig, GENESIS_TIMESTAMP.as_bytes());

    let coinshare = Transaction {
        inputs: vec![TxIn::new(OutPoint::genesis(), script_sig)],
        outputs: vec![TxOut::new(COIN, pay_to_pubkey(pubkey))],
        tx_time: GENESIS_TX_TIME,
        ..Default::default()
    };

    let mut block = Block {
        header: BlockHeader {
            version: 1,
            region: 0,
            prev_block_hash: Hash320::ZERO,
            merkle_root: Hash320::ZERO,
            tx_time: data.tx_time,
            hash_coin: 0,
            sig_checksum: 0,
            bits,
            time: GENESIS_BLOCK_TIME,
            nonce: data.nonce,
        },
        transactions: vec![coinshare],
        signature: Vec::new(),
    };
    block.header.merkle_root = block_merkle_root(&block).0;
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_network() {
        assert_eq!(select_network(false, false).unwrap(), Network::Main);
        assert_eq!(select_network(true, false).unwrap(), Network::Testnet);
        assert_eq!(select_network(false, true).unwrap(), Network::Regtest);
        assert!(matches!(select_network(true, true), Err(ConsensusError::InvalidNetwork(_))));
    }

    #[test]
    fn test_ports_per_zone() {
        assert_eq!(p2p_port(Network::Main, 0), 39168);
        assert_eq!(rpc_port(Network::Main, 0), 38912);
        assert_eq!(p2p_port(Network::Main, 257), 39169);
        assert_eq!(p2p_port(Network::Testnet, 9), 39433);
        assert_eq!(rpc_port(Network::Testnet, 3), 39427);
        assert_eq!(p2p_port(Network::Regtest, 5), P2P_PORT_REGRESSION);
        assert_eq!(rpc_port(Network::Regtest, 5), 39429);
    }

    #[test]
    fn test_regtest_defaults() {
        let params = ChainParams::new(Network::Regtest);
        assert_eq!(params.message_start(), &[0xf1, 0xfb, 0xb5, 0xad]);
        assert_eq!(params.data_dir(), "regtest0");
        assert!(params.dns_seeds().is_empty());
        assert!(params.fixed_seeds().is_empty());
        assert!(params.no_retargeting());
        assert_eq!(params.genesis_block().header.bits, 0x2600ffff);
        assert_eq!(params.base58_prefix(Base58Type::ExtSecretKey), &[4, 53, 131, 148]);
    }

    #[test]
    fn test_main_fixed_seed_address() {
        let params = ChainParams::new(Network::Main);
        let seeds = params.fixed_seeds();
        assert_eq!(seeds, vec![SocketAddrV4::new(Ipv4Addr::new(69, 13, 37, 146), 39168)]);
    }

    #[test]
    fn test_update_params_mismatch_leaves_params_unchanged() {
        let mut params = ChainParams::new(Network::Testnet);
        let before_hash = *params.genesis_hash();
        let before_header = params.genesis_block().header.clone();
        let candidate = GenesisData { hash: Hash320([0x11; 40]), ..TESTNET_GENESIS };

        let result = params.update_params(3, &candidate);
        assert!(matches!(result, Err(ConsensusError::ZoneActivation(_))));
        assert_eq!(params.region(), 0);
        assert_eq!(params.default_port(), 39432);
        assert_eq!(params.data_dir(), "testnet0");
        assert_eq!(*params.genesis_hash(), before_hash);
        assert_eq!(params.genesis_block().header, before_header);
    }

    #[test]
    fn test_update_params_commits_matching_candidate() {
        let mut params = ChainParams::new(Network::Testnet);
        let mut header = params.genesis_block().header.clone();
        header.region = 3;
        header.nonce = 42;
        let candidate = GenesisData { tx_time: header.tx_time, nonce: 42, hash: header.hash() };

        params.update_params(3, &candidate).unwrap();
        assert_eq!(params.region(), 3);
        assert_eq!(params.default_port(), 39435);
        assert_eq!(params.rpc_port(), 39427);
        assert_eq!(params.data_dir(), "testnet3");
        assert_eq!(*params.genesis_hash(), candidate.hash);
        assert_eq!(params.genesis_block().header.nonce, 42);
    }
}
