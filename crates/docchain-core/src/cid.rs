//! Content identifiers.
//!
//! A [`Cid`] is a pure function of content: the Blake3 digest of a block plus
//! the codec describing how the block is interpreted. The text form is a
//! self-describing CIDv1 string:
//!
//! `b` + base32lower(`0x01` || codec || `0x1e` || `0x20` || digest)
//!
//! where `0x1e` is the multihash code for Blake3 and `0x20` its digest length.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::Blake3Hash;
use crate::error::CoreError;

/// CID version byte.
const CID_VERSION: u8 = 0x01;

/// Multihash code for Blake3-256.
const MULTIHASH_BLAKE3: u8 = 0x1e;

/// Digest length in the multihash prefix.
const DIGEST_LEN: u8 = 0x20;

/// Multibase prefix for base32 lower, no padding.
const MULTIBASE_BASE32: char = 'b';

const BASE32_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";

/// How the bytes addressed by a CID are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Codec {
    /// Raw chunk bytes (a leaf).
    Raw = 0x55,
    /// A canonical-CBOR DAG node linking to child blocks.
    DagCbor = 0x71,
}

impl Codec {
    /// Convert to the multicodec byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Try to parse from a multicodec byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x55 => Some(Self::Raw),
            0x71 => Some(Self::DagCbor),
            _ => None,
        }
    }
}

/// A content identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cid {
    codec: Codec,
    hash: Blake3Hash,
}

impl Cid {
    /// Compute the CID of a block.
    pub fn of(codec: Codec, block: &[u8]) -> Self {
        Self {
            codec,
            hash: Blake3Hash::hash(block),
        }
    }

    /// Construct from parts.
    pub const fn new(codec: Codec, hash: Blake3Hash) -> Self {
        Self { codec, hash }
    }

    /// The codec of the addressed block.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// The Blake3 digest of the addressed block.
    pub fn hash(&self) -> &Blake3Hash {
        &self.hash
    }

    /// Whether `block` hashes to this CID.
    pub fn matches(&self, block: &[u8]) -> bool {
        Blake3Hash::hash(block) == self.hash
    }

    /// Binary form: version || codec || multihash code || length || digest.
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut out = [0u8; 36];
        out[0] = CID_VERSION;
        out[1] = self.codec.to_u8();
        out[2] = MULTIHASH_BLAKE3;
        out[3] = DIGEST_LEN;
        out[4..].copy_from_slice(self.hash.as_bytes());
        out
    }

    /// Parse the binary form.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() != 36 {
            return Err(CoreError::InvalidCid(format!(
                "expected 36 bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0] != CID_VERSION {
            return Err(CoreError::InvalidCid(format!(
                "unsupported CID version {}",
                bytes[0]
            )));
        }
        let codec = Codec::from_u8(bytes[1])
            .ok_or_else(|| CoreError::InvalidCid(format!("unknown codec 0x{:02x}", bytes[1])))?;
        if bytes[2] != MULTIHASH_BLAKE3 || bytes[3] != DIGEST_LEN {
            return Err(CoreError::InvalidCid("unsupported multihash".into()));
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[4..]);
        Ok(Self {
            codec,
            hash: Blake3Hash(digest),
        })
    }

    /// Parse the multibase text form.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let body = s
            .strip_prefix(MULTIBASE_BASE32)
            .ok_or_else(|| CoreError::InvalidCid("missing multibase prefix 'b'".into()))?;
        let bytes = base32_decode(body)
            .ok_or_else(|| CoreError::InvalidCid("invalid base32 body".into()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", MULTIBASE_BASE32, base32_encode(&self.to_bytes()))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.to_string();
        write!(f, "Cid({}…{})", &text[..8], &text[text.len() - 8..])
    }
}

impl FromStr for Cid {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Base32 lower, RFC 4648 alphabet, no padding.
fn base32_encode(data: &[u8]) -> String {
    let mut result = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u64 = 0;
    let mut bits_in_buffer = 0;

    for &byte in data {
        buffer = (buffer << 8) | (byte as u64);
        bits_in_buffer += 8;

        while bits_in_buffer >= 5 {
            bits_in_buffer -= 5;
            let index = ((buffer >> bits_in_buffer) & 0x1f) as usize;
            result.push(BASE32_ALPHABET[index] as char);
        }
    }

    if bits_in_buffer > 0 {
        let index = ((buffer << (5 - bits_in_buffer)) & 0x1f) as usize;
        result.push(BASE32_ALPHABET[index] as char);
    }

    result
}

fn base32_decode(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits_in_buffer = 0;

    for c in text.bytes() {
        let value = BASE32_ALPHABET.iter().position(|&a| a == c)? as u64;
        buffer = (buffer << 5) | value;
        bits_in_buffer += 5;

        if bits_in_buffer >= 8 {
            bits_in_buffer -= 8;
            out.push(((buffer >> bits_in_buffer) & 0xff) as u8);
        }
    }

    // Leftover bits are padding and must be zero.
    if bits_in_buffer >= 5 || (buffer & ((1 << bits_in_buffer) - 1)) != 0 {
        return None;
    }

    Some(out)
}
