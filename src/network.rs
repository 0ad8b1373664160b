//! Wire framing: message header, inventory vectors and block locators
//!
//! Peer handshaking and message dispatch live outside this crate; it only
//! fixes the byte layouts and the broadcast capability it relies on.

use crate::chainparams::ChainParams;
use crate::constants::MAX_SIZE;
use crate::error::{ConsensusError, Result};
use crate::hash::hash256;
use crate::serialize::{Decodable, Encodable};
use crate::types::*;
use std::fmt;
use std::io::{self, Read, Write};

pub const MESSAGE_HEADER_VERSION: i32 = 1;
pub const CURRENT_SIDECHAIN: u64 = 0;
pub const COMMAND_SIZE: usize = 12;
/// magic(4) + version(4) + zone(4) + sidechain(8) + command(12) + size(4) + checksum(4)
pub const MESSAGE_HEADER_SIZE: usize = 40;

/// Service flag: the node serves full blocks.
pub const NODE_NETWORK: u64 = 1 << 0;

/// Message header: 40 bytes preceding every payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: [u8; 4],
    pub version: i32,
    pub zone: i32,
    pub sidechain: u64,
    pub command: [u8; COMMAND_SIZE],
    pub payload_size: u32,
    pub checksum: u32,
}

/// First four bytes of hash256(payload), little-endian.
pub fn payload_checksum(payload: &[u8]) -> u32 {
    let digest = hash256(payload);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

impl MessageHeader {
    /// Header for `payload` on the network and zone of `params`.
    pub fn new(params: &ChainParams, command: &str, payload: &[u8]) -> Result<Self> {
        let bytes = command.as_bytes();
        if bytes.len() > COMMAND_SIZE || bytes.contains(&0) {
            return Err(ConsensusError::Serialization(format!("invalid command name {command:?}")));
        }
        let mut padded = [0u8; COMMAND_SIZE];
        padded[..bytes.len()].copy_from_slice(bytes);
        let payload_size = u32::try_from(payload.len())
            .map_err(|_| ConsensusError::Serialization("payload too large".to_string()))?;
        Ok(MessageHeader {
            magic: *params.message_start(),
            version: MESSAGE_HEADER_VERSION,
            zone: params.region(),
            sidechain: params.sidechain_mask(),
            command: padded,
            payload_size,
            checksum: payload_checksum(payload),
        })
    }

    /// Command name without the NUL padding.
    pub fn command(&self) -> String {
        let end = self.command.iter().position(|&b| b == 0).unwrap_or(COMMAND_SIZE);
        String::from_utf8_lossy(&self.command[..end]).into_owned()
    }

    /// Magic matches, the command is NUL padded printable ASCII and the size is bounded.
    pub fn is_valid(&self, params: &ChainParams) -> bool {
        if &self.magic != params.message_start() {
            return false;
        }
        let end = self.command.iter().position(|&b| b == 0).unwrap_or(COMMAND_SIZE);
        if self.command[end..].iter().any(|&b| b != 0) {
            return false;
        }
        if self.command[..end].iter().any(|&b| !(b' '..=0x7e).contains(&b)) {
            return false;
        }
        u64::from(self.payload_size) <= MAX_SIZE
    }

    pub fn is_valid_zone(&self, zone: i32) -> bool {
        self.zone == zone
    }

    pub fn verify_checksum(&self, payload: &[u8]) -> bool {
        payload.len() == self.payload_size as usize && payload_checksum(payload) == self.checksum
    }
}

impl Encodable for MessageHeader {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        writer.write_all(&self.magic)?;
        self.version.encode(writer)?;
        self.zone.encode(writer)?;
        self.sidechain.encode(writer)?;
        writer.write_all(&self.command)?;
        self.payload_size.encode(writer)?;
        self.checksum.encode(writer)?;
        Ok(MESSAGE_HEADER_SIZE)
    }
}

impl Decodable for MessageHeader {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        let version = i32::decode(reader)?;
        let zone = i32::decode(reader)?;
        let sidechain = u64::decode(reader)?;
        let mut command = [0u8; COMMAND_SIZE];
        reader.read_exact(&mut command)?;
        Ok(MessageHeader {
            magic,
            version,
            zone,
            sidechain,
            command,
            payload_size: u32::decode(reader)?,
            checksum: u32::decode(reader)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InvType {
    Tx,
    Block,
    FilteredBlock,
    Unknown(i32),
}

impl InvType {
    pub fn code(self) -> i32 {
        match self {
            InvType::Tx => 1,
            InvType::Block => 2,
            InvType::FilteredBlock => 3,
            InvType::Unknown(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => InvType::Tx,
            2 => InvType::Block,
            3 => InvType::FilteredBlock,
            other => InvType::Unknown(other),
        }
    }
}

/// Inventory vector: (type, hash)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Inventory {
    pub kind: InvType,
    pub hash: Hash320,
}

impl Inventory {
    pub fn new(kind: InvType, hash: Hash320) -> Self {
        Inventory { kind, hash }
    }

    pub fn is_known_type(&self) -> bool {
        !matches!(self.kind, InvType::Unknown(_))
    }

    /// Command that carries the object itself.
    pub fn command(&self) -> Option<&'static str> {
        match self.kind {
            InvType::Tx => Some("tx"),
            InvType::Block => Some("block"),
            InvType::FilteredBlock => Some("merkleblock"),
            InvType::Unknown(_) => None,
        }
    }
}

impl fmt::Display for Inventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.command().unwrap_or("unknown"), self.hash)
    }
}

impl Encodable for Inventory {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        Ok(self.kind.code().encode(writer)? + self.hash.encode(writer)?)
    }
}

impl Decodable for Inventory {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let kind = InvType::from_code(i32::decode(reader)?);
        Ok(Inventory { kind, hash: Hash320::decode(reader)? })
    }
}

/// Sparse list of block hashes from the tip back to genesis.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockLocator {
    pub version: i32,
    pub have: Vec<Hash320>,
}

impl BlockLocator {
    /// Build from the active chain, genesis first: the last ten blocks, then
    /// doubling steps back, always ending with genesis.
    pub fn from_chain(chain: &[Hash320]) -> Self {
        let mut have = Vec::new();
        let mut step = 1usize;
        let mut index = chain.len().checked_sub(1);
        while let Some(i) = index {
            have.push(chain[i]);
            if i == 0 {
                break;
            }
            if have.len() >= 10 {
                step *= 2;
            }
            index = Some(i.saturating_sub(step));
        }
        BlockLocator { version: crate::constants::CURRENT_BLOCK_VERSION, have }
    }

    pub fn is_null(&self) -> bool {
        self.have.is_empty()
    }
}

impl Encodable for BlockLocator {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        Ok(self.version.encode(writer)? + self.have.encode(writer)?)
    }
}

impl Decodable for BlockLocator {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let version = i32::decode(reader)?;
        Ok(BlockLocator { version, have: Vec::<Hash320>::decode(reader)? })
    }
}

/// Relay capability provided by the networking layer.
pub trait NetworkBroadcast: Send + Sync {
    fn relay_transaction(&self, txid: &Hash320, tx: &Transaction);

    fn relay_inventory(&self, inv: Inventory);

    /// Connected peers; the miner stops when this drops to zero.
    fn peer_count(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chainparams::Network;
    use crate::serialize::{deserialize, serialize};

    #[test]
    fn test_message_header_layout() {
        let params = ChainParams::new(Network::Main);
        let header = MessageHeader::new(&params, "inv", b"payload").unwrap();
        let bytes = serialize(&header);
        assert_eq!(bytes.len(), MESSAGE_HEADER_SIZE);
        assert_eq!(&bytes[..4], &[0xf1, 0xeb, 0xb4, 0x9d]);
        assert_eq!(&bytes[4..8], &1i32.to_le_bytes());
        assert_eq!(&bytes[20..23], b"inv");
        assert!(bytes[23..32].iter().all(|&b| b == 0));
        assert_eq!(&bytes[32..36], &7u32.to_le_bytes());

        let decoded: MessageHeader = deserialize(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.command(), "inv");
        assert!(decoded.is_valid(&params));
        assert!(decoded.verify_checksum(b"payload"));
        assert!(!decoded.verify_checksum(b"payloaD"));
    }

    #[test]
    fn test_message_header_rejects_foreign_magic_and_padding() {
        let main = ChainParams::new(Network::Main);
        let regtest = ChainParams::new(Network::Regtest);
        let mut header = MessageHeader::new(&main, "tx", &[]).unwrap();
        assert!(!header.is_valid(&regtest));
        header.command[5] = b'x';
        assert!(!header.is_valid(&main));
        assert!(MessageHeader::new(&main, "thirteen-char", &[]).is_err());
    }

    #[test]
    fn test_inventory_codes() {
        let inv = Inventory::new(InvType::Block, Hash320([2; 40]));
        let bytes = serialize(&inv);
        assert_eq!(bytes.len(), 44);
        assert_eq!(&bytes[..4], &2i32.to_le_bytes());
        assert_eq!(deserialize::<Inventory>(&bytes).unwrap(), inv);
        assert_eq!(InvType::from_code(7), InvType::Unknown(7));
        assert!(!Inventory::new(InvType::Unknown(7), Hash320::ZERO).is_known_type());
        assert_eq!(Inventory::new(InvType::FilteredBlock, Hash320::ZERO).command(), Some("merkleblock"));
    }

    #[test]
    fn test_block_locator_steps() {
        let chain: Vec<Hash320> = (0..100u8).map(|i| Hash320([i; 40])).collect();
        let locator = BlockLocator::from_chain(&chain);
        assert_eq!(locator.have[0], chain[99]);
        assert_eq!(locator.have[9], chain[90]);
        assert_eq!(locator.have[10], chain[88]);
        assert_eq!(*locator.have.last().unwrap(), chain[0]);
        assert!(BlockLocator::from_chain(&[]).is_null());
    }
}
