//! Binary serialization contract
//!
//! The same byte layout is used on the wire, on disk and as hash input.
//! All integers are little-endian. Collections and scripts carry a
//! CompactSize length prefix; undo records use the MSB base-128 VarInt.

use crate::constants::MAX_SIZE;
use crate::error::{ConsensusError, Result};
use crate::types::*;
use std::io::{self, Cursor, Read, Write};

/// Types with a canonical binary encoding.
pub trait Encodable {
    /// Write the encoding and return the number of bytes written.
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize>;
}

/// Types that can be read back from their canonical encoding.
pub trait Decodable: Sized {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self>;
}

/// Serialize: 𝒳 → 𝕊
pub fn serialize<T: Encodable + ?Sized>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail
    let _ = value.encode(&mut out);
    out
}

/// Deserialize: 𝕊 → 𝒳, rejecting trailing bytes.
pub fn deserialize<T: Decodable>(bytes: &[u8]) -> Result<T> {
    let mut cursor = Cursor::new(bytes);
    let value = T::decode(&mut cursor)?;
    if cursor.position() as usize != bytes.len() {
        return Err(ConsensusError::Serialization(format!(
            "{} trailing bytes after value",
            bytes.len() - cursor.position() as usize
        )));
    }
    Ok(value)
}

pub fn serialized_size<T: Encodable + ?Sized>(value: &T) -> usize {
    value.encode(&mut io::sink()).unwrap_or(0)
}

macro_rules! impl_int_encodable {
    ($($ty:ty),*) => {$(
        impl Encodable for $ty {
            fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
                writer.write_all(&self.to_le_bytes())?;
                Ok(std::mem::size_of::<$ty>())
            }
        }

        impl Decodable for $ty {
            fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                read_exact(reader, &mut buf)?;
                Ok(<$ty>::from_le_bytes(buf))
            }
        }
    )*};
}

impl_int_encodable!(u8, u16, u32, u64, i32, i64);

fn read_exact<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            ConsensusError::Serialization("unexpected end of data".to_string())
        }
        _ => ConsensusError::from(e),
    })
}

// ============================================================================
// LENGTH PREFIXES
// ============================================================================

pub fn write_compact_size<W: Write + ?Sized>(writer: &mut W, n: u64) -> io::Result<usize> {
    match n {
        0..=0xfc => {
            writer.write_all(&[n as u8])?;
            Ok(1)
        }
        0xfd..=0xffff => {
            writer.write_all(&[0xfd])?;
            writer.write_all(&(n as u16).to_le_bytes())?;
            Ok(3)
        }
        0x1_0000..=0xffff_ffff => {
            writer.write_all(&[0xfe])?;
            writer.write_all(&(n as u32).to_le_bytes())?;
            Ok(5)
        }
        _ => {
            writer.write_all(&[0xff])?;
            writer.write_all(&n.to_le_bytes())?;
            Ok(9)
        }
    }
}

/// Read a CompactSize, rejecting non-canonical forms and lengths above `MAX_SIZE`.
pub fn read_compact_size<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    let n = match u8::decode(reader)? {
        0xfd => {
            let n = u64::from(u16::decode(reader)?);
            if n < 0xfd {
                return Err(non_canonical());
            }
            n
        }
        0xfe => {
            let n = u64::from(u32::decode(reader)?);
            if n < 0x1_0000 {
                return Err(non_canonical());
            }
            n
        }
        0xff => {
            let n = u64::decode(reader)?;
            if n < 0x1_0000_0000 {
                return Err(non_canonical());
            }
            n
        }
        small => u64::from(small),
    };
    if n > MAX_SIZE {
        return Err(ConsensusError::Serialization("size too large".to_string()));
    }
    Ok(n)
}

fn non_canonical() -> ConsensusError {
    ConsensusError::Serialization("non-canonical compact size".to_string())
}

pub fn compact_size_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// MSB base-128 VarInt with the "minus one" continuation rule.
pub fn write_varint<W: Write + ?Sized>(writer: &mut W, mut n: u64) -> io::Result<usize> {
    let mut tmp = [0u8; 10];
    let mut len = 0;
    loop {
        tmp[len] = (n & 0x7f) as u8 | if len > 0 { 0x80 } else { 0x00 };
        if n <= 0x7f {
            break;
        }
        n = (n >> 7) - 1;
        len += 1;
    }
    let encoded: Vec<u8> = tmp[..=len].iter().rev().copied().collect();
    writer.write_all(&encoded)?;
    Ok(encoded.len())
}

pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    let mut n: u64 = 0;
    loop {
        let byte = u8::decode(reader)?;
        if n > (u64::MAX >> 7) {
            return Err(ConsensusError::Serialization("varint too large".to_string()));
        }
        n = (n << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 != 0 {
            n = n
                .checked_add(1)
                .ok_or_else(|| ConsensusError::Serialization("varint too large".to_string()))?;
        } else {
            return Ok(n);
        }
    }
}

pub fn write_var_bytes<W: Write + ?Sized>(writer: &mut W, bytes: &[u8]) -> io::Result<usize> {
    let len = write_compact_size(writer, bytes.len() as u64)?;
    writer.write_all(bytes)?;
    Ok(len + bytes.len())
}

pub fn read_var_bytes<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let len = read_compact_size(reader)? as usize;
    let mut bytes = vec![0u8; len];
    read_exact(reader, &mut bytes)?;
    Ok(bytes)
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        let mut len = write_compact_size(writer, self.len() as u64)?;
        for item in self {
            len += item.encode(writer)?;
        }
        Ok(len)
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let count = read_compact_size(reader)? as usize;
        // Cap the preallocation; the length prefix is untrusted
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(T::decode(reader)?);
        }
        Ok(items)
    }
}

// ============================================================================
// CONSENSUS STRUCTURES
// ============================================================================

impl Encodable for Hash320 {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        writer.write_all(&self.0)?;
        Ok(40)
    }
}

impl Decodable for Hash320 {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut bytes = [0u8; 40];
        read_exact(reader, &mut bytes)?;
        Ok(Hash320(bytes))
    }
}

impl Encodable for OutPoint {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        Ok(self.hash.encode(writer)? + self.index.encode(writer)?)
    }
}

impl Decodable for OutPoint {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Ok(OutPoint { hash: Hash320::decode(reader)?, index: u32::decode(reader)? })
    }
}

impl Encodable for TxIn {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        let mut len = self.prevout.encode(writer)?;
        len += write_var_bytes(writer, &self.script_sig)?;
        len += self.sequence.encode(writer)?;
        Ok(len)
    }
}

impl Decodable for TxIn {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Ok(TxIn {
            prevout: OutPoint::decode(reader)?,
            script_sig: read_var_bytes(reader)?,
            sequence: u32::decode(reader)?,
        })
    }
}

impl Encodable for TxOut {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        Ok(self.value.encode(writer)? + write_var_bytes(writer, &self.script_pubkey)?)
    }
}

impl Decodable for TxOut {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Ok(TxOut { value: i64::decode(reader)?, script_pubkey: read_var_bytes(reader)? })
    }
}

impl Encodable for Transaction {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        let mut len = self.version.encode(writer)?;
        len += self.inputs.encode(writer)?;
        len += self.outputs.encode(writer)?;
        len += self.tx_time.encode(writer)?;
        len += self.lock_time.encode(writer)?;
        len += self.hash_coin.encode(writer)?;
        Ok(len)
    }
}

impl Decodable for Transaction {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Ok(Transaction {
            version: i32::decode(reader)?,
            inputs: Vec::decode(reader)?,
            outputs: Vec::decode(reader)?,
            tx_time: i64::decode(reader)?,
            lock_time: i64::decode(reader)?,
            hash_coin: u64::decode(reader)?,
        })
    }
}

impl Encodable for BlockHeader {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        let mut len = self.version.encode(writer)?;
        len += self.region.encode(writer)?;
        len += self.prev_block_hash.encode(writer)?;
        len += self.merkle_root.encode(writer)?;
        len += self.tx_time.encode(writer)?;
        len += self.hash_coin.encode(writer)?;
        len += self.sig_checksum.encode(writer)?;
        len += self.bits.encode(writer)?;
        len += self.time.encode(writer)?;
        len += self.nonce.encode(writer)?;
        Ok(len)
    }
}

impl Decodable for BlockHeader {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Ok(BlockHeader {
            version: i32::decode(reader)?,
            region: i32::decode(reader)?,
            prev_block_hash: Hash320::decode(reader)?,
            merkle_root: Hash320::decode(reader)?,
            tx_time: i64::decode(reader)?,
            hash_coin: u64::decode(reader)?,
            sig_checksum: u32::decode(reader)?,
            bits: u32::decode(reader)?,
            time: u32::decode(reader)?,
            nonce: u32::decode(reader)?,
        })
    }
}

impl Encodable for Block {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        let mut len = self.header.encode(writer)?;
        len += self.transactions.encode(writer)?;
        len += write_var_bytes(writer, &self.signature)?;
        Ok(len)
    }
}

impl Decodable for Block {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Ok(Block {
            header: BlockHeader::decode(reader)?,
            transactions: Vec::decode(reader)?,
            signature: read_var_bytes(reader)?,
        })
    }
}

// ============================================================================
// COMPRESSION
// ============================================================================

/// Compress an amount by stripping trailing decimal zeros.
pub fn compress_amount(mut n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let mut e = 0;
    while n % 10 == 0 && e < 9 {
        n /= 10;
        e += 1;
    }
    if e < 9 {
        let d = n % 10;
        n /= 10;
        1 + (n * 9 + d - 1) * 10 + e
    } else {
        1 + (n - 1) * 10 + 9
    }
}

pub fn decompress_amount(mut x: u64) -> u64 {
    if x == 0 {
        return 0;
    }
    x -= 1;
    let mut e = x % 10;
    x /= 10;
    let mut n = if e < 9 {
        let d = (x % 9) + 1;
        x /= 9;
        x.wrapping_mul(10).wrapping_add(d)
    } else {
        x + 1
    };
    while e > 0 {
        n = n.wrapping_mul(10);
        e -= 1;
    }
    n
}

const SPECIAL_SCRIPTS: u64 = 6;

/// Compact form of common output scripts, or `None` when stored raw.
fn compress_script(script: &[u8]) -> Option<Vec<u8>> {
    use crate::script::opcodes::*;

    if script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 20
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
    {
        let mut out = vec![0x00];
        out.extend_from_slice(&script[3..23]);
        return Some(out);
    }
    if script.len() == 23 && script[0] == OP_HASH160 && script[1] == 20 && script[22] == OP_EQUAL {
        let mut out = vec![0x01];
        out.extend_from_slice(&script[2..22]);
        return Some(out);
    }
    if script.len() == 35
        && script[0] == 33
        && script[34] == OP_CHECKSIG
        && (script[1] == 0x02 || script[1] == 0x03)
    {
        return Some(script[1..34].to_vec());
    }
    if script.len() == 67 && script[0] == 65 && script[66] == OP_CHECKSIG && script[1] == 0x04 {
        // Only fully valid keys can be rebuilt from the x coordinate
        if secp256k1::PublicKey::from_slice(&script[1..66]).is_ok() {
            let mut out = vec![0x04 | (script[65] & 0x01)];
            out.extend_from_slice(&script[2..34]);
            return Some(out);
        }
    }
    None
}

fn decompress_script(kind: u64, payload: &[u8]) -> Result<Vec<u8>> {
    use crate::script::opcodes::*;

    match kind {
        0x00 => {
            let mut script = vec![OP_DUP, OP_HASH160, 20];
            script.extend_from_slice(payload);
            script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
            Ok(script)
        }
        0x01 => {
            let mut script = vec![OP_HASH160, 20];
            script.extend_from_slice(payload);
            script.push(OP_EQUAL);
            Ok(script)
        }
        0x02 | 0x03 => {
            let mut script = vec![33, kind as u8];
            script.extend_from_slice(payload);
            script.push(OP_CHECKSIG);
            Ok(script)
        }
        0x04 | 0x05 => {
            let mut compressed = vec![(kind as u8) - 2];
            compressed.extend_from_slice(payload);
            let key = secp256k1::PublicKey::from_slice(&compressed).map_err(|e| {
                ConsensusError::Serialization(format!("bad compressed public key: {e}"))
            })?;
            let mut script = vec![65];
            script.extend_from_slice(&key.serialize_uncompressed());
            script.push(OP_CHECKSIG);
            Ok(script)
        }
        _ => Err(ConsensusError::Serialization(format!("unknown script kind {kind}"))),
    }
}

fn write_compressed_script<W: Write + ?Sized>(writer: &mut W, script: &[u8]) -> io::Result<usize> {
    match compress_script(script) {
        Some(compact) => {
            writer.write_all(&compact)?;
            Ok(compact.len())
        }
        None => {
            let len = write_varint(writer, script.len() as u64 + SPECIAL_SCRIPTS)?;
            writer.write_all(script)?;
            Ok(len + script.len())
        }
    }
}

fn read_compressed_script<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let kind = read_varint(reader)?;
    if kind < SPECIAL_SCRIPTS {
        let payload_len = if kind == 0x00 || kind == 0x01 { 20 } else { 32 };
        let mut payload = vec![0u8; payload_len];
        read_exact(reader, &mut payload)?;
        return decompress_script(kind, &payload);
    }
    let len = (kind - SPECIAL_SCRIPTS) as usize;
    if len > crate::constants::MAX_SCRIPT_SIZE {
        return Err(ConsensusError::Serialization("compressed script too large".to_string()));
    }
    let mut script = vec![0u8; len];
    read_exact(reader, &mut script)?;
    Ok(script)
}

/// Compact storage form of a [`TxOut`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutCompressor(pub TxOut);

impl Encodable for TxOutCompressor {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        let amount = compress_amount(self.0.value as u64);
        Ok(write_varint(writer, amount)? + write_compressed_script(writer, &self.0.script_pubkey)?)
    }
}

impl Decodable for TxOutCompressor {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let value = decompress_amount(read_varint(reader)?) as i64;
        let script_pubkey = read_compressed_script(reader)?;
        Ok(TxOutCompressor(TxOut { value, script_pubkey }))
    }
}

// ============================================================================
// UNDO RECORDS
// ============================================================================

/// Undo information for one spent input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInUndo {
    pub output: TxOut,
    pub is_coinbase: bool,
    pub height: Height,
    pub version: i32,
}

impl From<Coin> for TxInUndo {
    fn from(coin: Coin) -> Self {
        TxInUndo {
            output: coin.output,
            is_coinbase: coin.is_coinbase,
            height: coin.height,
            version: coin.version,
        }
    }
}

impl Encodable for TxInUndo {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        let code = (self.height as u64) * 2 + u64::from(self.is_coinbase);
        let mut len = write_varint(writer, code)?;
        if self.height > 0 {
            len += write_varint(writer, self.version as u32 as u64)?;
        }
        len += TxOutCompressor(self.output.clone()).encode(writer)?;
        Ok(len)
    }
}

impl Decodable for TxInUndo {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let code = read_varint(reader)?;
        let height = (code / 2) as Height;
        let version = if height > 0 { read_varint(reader)? as u32 as i32 } else { 0 };
        let TxOutCompressor(output) = TxOutCompressor::decode(reader)?;
        Ok(TxInUndo { output, is_coinbase: code & 1 == 1, height, version })
    }
}

/// Undo information for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxUndo {
    pub prevouts: Vec<TxInUndo>,
}

impl Encodable for TxUndo {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        let mut len = write_compact_size(writer, self.prevouts.len() as u64)?;
        for undo in &self.prevouts {
            len += undo.encode(writer)?;
        }
        Ok(len)
    }
}

impl Decodable for TxUndo {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Ok(TxUndo { prevouts: Vec::decode(reader)? })
    }
}

/// Undo information for every non-coinbase transaction of a block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockUndo {
    pub tx_undo: Vec<TxUndo>,
}

impl Encodable for BlockUndo {
    fn encode<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<usize> {
        self.tx_undo.encode(writer)
    }
}

impl Decodable for BlockUndo {
    fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Ok(BlockUndo { tx_undo: Vec::decode(reader)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;

    #[test]
    fn test_compact_size_boundaries() {
        for (n, len) in [(0u64, 1), (252, 1), (253, 3), (0xffff, 3), (0x10000, 5), (0x0200_0000, 5)] {
            let mut buf = Vec::new();
            assert_eq!(write_compact_size(&mut buf, n).unwrap(), len);
            assert_eq!(compact_size_len(n), len);
            assert_eq!(read_compact_size(&mut Cursor::new(&buf)).unwrap(), n);
        }
    }

    #[test]
    fn test_compact_size_rejects_non_canonical() {
        let buf = [0xfd, 0x10, 0x00];
        assert!(read_compact_size(&mut Cursor::new(&buf[..])).is_err());
        let buf = [0xfe, 0x00, 0x00, 0x00, 0x10];
        assert!(read_compact_size(&mut Cursor::new(&buf[..])).is_err());
    }

    #[test]
    fn test_varint_known_encodings() {
        let cases: [(u64, &[u8]); 5] = [
            (0, &[0x00]),
            (127, &[0x7f]),
            (128, &[0x80, 0x00]),
            (255, &[0x80, 0x7f]),
            (16511, &[0xff, 0x7f]),
        ];
        for (n, expected) in cases {
            let mut buf = Vec::new();
            write_varint(&mut buf, n).unwrap();
            assert_eq!(buf, expected);
            assert_eq!(read_varint(&mut Cursor::new(&buf)).unwrap(), n);
        }
    }

    #[test]
    fn test_header_is_120_bytes() {
        let header = BlockHeader { bits: 0x2600ffff, nonce: 7, ..Default::default() };
        let bytes = serialize(&header);
        assert_eq!(bytes.len(), 120);
        assert_eq!(&bytes[112..116], &0u32.to_le_bytes());
        assert_eq!(&bytes[116..120], &7u32.to_le_bytes());
        assert_eq!(&bytes[108..112], &0x2600ffffu32.to_le_bytes());
    }

    #[test]
    fn test_truncated_transaction_is_rejected() {
        let tx = Transaction {
            inputs: vec![TxIn::new(OutPoint::null(), vec![0, 0])],
            outputs: vec![TxOut::new(COIN, vec![0x51])],
            tx_time: 1_415_000_000_000,
            ..Default::default()
        };
        let bytes = serialize(&tx);
        assert!(deserialize::<Transaction>(&bytes[..bytes.len() - 1]).is_err());
        let mut extended = bytes.clone();
        extended.push(0);
        assert!(deserialize::<Transaction>(&extended).is_err());
        assert_eq!(deserialize::<Transaction>(&bytes).unwrap(), tx);
    }

    #[test]
    fn test_amount_compression() {
        for amount in [0u64, 1, 10, 100_000, 50 * 100_000, 123_456_789, 21_000_000 * 100_000] {
            assert_eq!(decompress_amount(compress_amount(amount)), amount);
        }
        assert_eq!(compress_amount(0), 0);
        assert_eq!(compress_amount(1), 1);
        assert_eq!(compress_amount(1_000_000_000), 10);
    }

    #[test]
    fn test_p2pkh_compresses_to_21_bytes() {
        let mut script = vec![0x76, 0xa9, 20];
        script.extend_from_slice(&[0x11; 20]);
        script.extend_from_slice(&[0x88, 0xac]);
        let out = TxOutCompressor(TxOut::new(5 * COIN, script));
        let bytes = serialize(&out);
        assert_eq!(bytes.len(), 1 + 21);
        assert_eq!(deserialize::<TxOutCompressor>(&bytes).unwrap(), out);
    }

    #[test]
    fn test_raw_script_round_trip() {
        let out = TxOutCompressor(TxOut::new(1234, vec![0x6a, 0x01, 0x02]));
        assert_eq!(deserialize::<TxOutCompressor>(&serialize(&out)).unwrap(), out);
    }

    #[test]
    fn test_undo_round_trip() {
        let undo = TxUndo {
            prevouts: vec![
                TxInUndo { output: TxOut::new(COIN, vec![0x51]), is_coinbase: true, height: 12, version: 2 },
                TxInUndo { output: TxOut::new(7, vec![]), is_coinbase: false, height: 0, version: 0 },
            ],
        };
        let block_undo = BlockUndo { tx_undo: vec![undo] };
        assert_eq!(deserialize::<BlockUndo>(&serialize(&block_undo)).unwrap(), block_undo);
    }
}
