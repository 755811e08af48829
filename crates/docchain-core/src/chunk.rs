//! Chunking and Merkle DAG construction.
//!
//! Large payloads are split into chunks, each stored as a [`Codec::Raw`]
//! block. Chunks are linked by [`DagNode`]s (canonical CBOR, at most
//! `max_links` children each) built bottom-up; the CID of the whole payload
//! is the CID of the root node. A payload that fits into a single chunk is
//! addressed directly by its raw block CID.
//!
//! Two chunking strategies are supported:
//!
//! - **Fixed**: every chunk is `size` bytes except the last.
//! - **ContentDefined**: boundaries are chosen by a gear rolling hash, so an
//!   edit only perturbs the chunks around it and overlapping files share blocks.

use bytes::Bytes;
use ciborium::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::canonical::{decode_canonical, encode_canonical, MapBuilder, MapReader};
use crate::cid::{Cid, Codec};
use crate::error::CoreError;

/// Default fixed chunk size: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Default maximum number of links per DAG node.
pub const DEFAULT_MAX_LINKS: usize = 174;

/// DAG node schema version.
const NODE_VERSION: u64 = 1;

mod keys {
    pub const VERSION: u64 = 0;
    pub const SIZE: u64 = 1;
    pub const LINKS: u64 = 2;
}

/// How payloads are split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Fixed-size chunks.
    Fixed { size: usize },
    /// Gear-hash content-defined chunks with normalized boundaries.
    ContentDefined { min: usize, avg: usize, max: usize },
}

/// Chunking configuration. Store and verifier must agree on it, since it
/// determines the CID of every multi-chunk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub strategy: ChunkStrategy,
    pub max_links: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Fixed {
                size: DEFAULT_CHUNK_SIZE,
            },
            max_links: DEFAULT_MAX_LINKS,
        }
    }
}

impl ChunkingConfig {
    /// Fixed-size chunking with the default fan-out.
    pub fn fixed(size: usize) -> Self {
        Self {
            strategy: ChunkStrategy::Fixed { size },
            max_links: DEFAULT_MAX_LINKS,
        }
    }

    /// Content-defined chunking with the default fan-out.
    pub fn content_defined(min: usize, avg: usize, max: usize) -> Self {
        Self {
            strategy: ChunkStrategy::ContentDefined { min, avg, max },
            max_links: DEFAULT_MAX_LINKS,
        }
    }

    /// Set the maximum number of links per node.
    pub fn with_max_links(mut self, max_links: usize) -> Self {
        self.max_links = max_links;
        self
    }

    /// Check that the configuration can produce a DAG.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_links < 2 {
            return Err(CoreError::InvalidChunking("max_links must be at least 2".into()));
        }
        match self.strategy {
            ChunkStrategy::Fixed { size } if size == 0 => {
                Err(CoreError::InvalidChunking("chunk size must be positive".into()))
            }
            ChunkStrategy::ContentDefined { min, avg, max } => {
                if min == 0 || !(min < avg && avg < max) {
                    return Err(CoreError::InvalidChunking(
                        "content-defined sizes must satisfy 0 < min < avg < max".into(),
                    ));
                }
                if avg < 64 {
                    return Err(CoreError::InvalidChunking("avg must be at least 64".into()));
                }
                Ok(())
            }
            ChunkStrategy::Fixed { .. } => Ok(()),
        }
    }

    /// Split a payload into chunk boundaries (exclusive end offsets).
    pub fn boundaries(&self, data: &[u8]) -> Vec<usize> {
        let mut ends = Vec::new();
        match self.strategy {
            ChunkStrategy::Fixed { size } => {
                let mut offset = 0;
                while offset < data.len() {
                    offset = (offset + size).min(data.len());
                    ends.push(offset);
                }
            }
            ChunkStrategy::ContentDefined { min, avg, max } => {
                let masks = CutMasks::for_avg(avg);
                let mut offset = 0;
                while offset < data.len() {
                    offset += next_cut(&data[offset..], min, avg, max, &masks);
                    ends.push(offset);
                }
            }
        }
        ends
    }
}

/// A block of a DAG: its CID and bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub cid: Cid,
    pub data: Bytes,
}

/// The result of chunking a payload.
#[derive(Debug, Clone)]
pub struct Dag {
    /// CID of the whole payload.
    pub root: Cid,
    /// Payload size in bytes.
    pub size: u64,
    /// Number of raw chunks.
    pub leaves: usize,
    /// Every distinct block, leaves first, root last.
    pub blocks: Vec<Block>,
}

/// A link from a DAG node to a child block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub cid: Cid,
    /// Payload bytes reachable through this link.
    pub size: u64,
}

/// An internal Merkle node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagNode {
    pub links: Vec<Link>,
}

impl DagNode {
    /// Total payload size below this node, saturating at `u64::MAX`.
    pub fn size(&self) -> u64 {
        self.links.iter().fold(0u64, |total, l| total.saturating_add(l.size))
    }

    fn checked_size(&self) -> Option<u64> {
        self.links.iter().try_fold(0u64, |total, l| total.checked_add(l.size))
    }

    /// Encode to canonical CBOR.
    pub fn encode(&self) -> Vec<u8> {
        let links = self
            .links
            .iter()
            .map(|l| {
                Value::Array(vec![
                    Value::Bytes(l.cid.to_bytes().to_vec()),
                    Value::Integer(l.size.into()),
                ])
            })
            .collect();
        let value = MapBuilder::new()
            .field(keys::VERSION, Value::Integer(NODE_VERSION.into()))
            .field(keys::SIZE, Value::Integer(self.size().into()))
            .field(keys::LINKS, Value::Array(links))
            .build();
        encode_canonical(&value)
    }

    /// Decode and validate a node.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        let value = decode_canonical(bytes).map_err(|e| CoreError::MalformedNode(e.to_string()))?;
        let map = MapReader::new(&value, "dag node")?;

        let version = map.u64(keys::VERSION)?;
        if version != NODE_VERSION {
            return Err(CoreError::MalformedNode(format!("unsupported version {version}")));
        }
        let declared = map.u64(keys::SIZE)?;

        let raw_links = map.array(keys::LINKS)?;
        if raw_links.is_empty() {
            return Err(CoreError::MalformedNode("node has no links".into()));
        }

        let mut links = Vec::with_capacity(raw_links.len());
        for item in raw_links {
            let pair = match item {
                Value::Array(pair) if pair.len() == 2 => pair,
                _ => return Err(CoreError::MalformedNode("link must be [cid, size]".into())),
            };
            let cid = match &pair[0] {
                Value::Bytes(b) => Cid::from_slice(b)?,
                _ => return Err(CoreError::MalformedNode("link cid must be bytes".into())),
            };
            let size = match &pair[1] {
                Value::Integer(i) => u64::try_from(i128::from(*i))
                    .map_err(|_| CoreError::MalformedNode("link size out of range".into()))?,
                _ => return Err(CoreError::MalformedNode("link size must be an integer".into())),
            };
            links.push(Link { cid, size });
        }

        let node = Self { links };
        let total = node
            .checked_size()
            .ok_or_else(|| CoreError::MalformedNode("link sizes overflow u64".into()))?;
        if total != declared {
            return Err(CoreError::MalformedNode(format!(
                "declared size {declared} does not match links total {total}"
            )));
        }
        Ok(node)
    }
}

/// Chunk a payload and build its Merkle DAG.
pub fn build_dag(data: impl Into<Bytes>, config: &ChunkingConfig) -> Result<Dag, CoreError> {
    config.validate()?;
    let data: Bytes = data.into();
    let size = data.len() as u64;

    let ends = config.boundaries(&data);
    if ends.len() <= 1 {
        let cid = Cid::of(Codec::Raw, &data);
        return Ok(Dag {
            root: cid,
            size,
            leaves: 1,
            blocks: vec![Block { cid, data }],
        });
    }

    let mut blocks = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |block: Block, blocks: &mut Vec<Block>| {
        if seen.insert(block.cid) {
            blocks.push(block);
        }
    };

    let mut level: Vec<Link> = Vec::with_capacity(ends.len());
    let mut start = 0;
    for &end in &ends {
        let chunk = data.slice(start..end);
        let cid = Cid::of(Codec::Raw, &chunk);
        level.push(Link {
            cid,
            size: chunk.len() as u64,
        });
        push(Block { cid, data: chunk }, &mut blocks);
        start = end;
    }
    let leaves = level.len();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(config.max_links));
        for group in level.chunks(config.max_links) {
            let node = DagNode {
                links: group.to_vec(),
            };
            let encoded = Bytes::from(node.encode());
            let cid = Cid::of(Codec::DagCbor, &encoded);
            next.push(Link {
                cid,
                size: node.size(),
            });
            push(Block { cid, data: encoded }, &mut blocks);
        }
        level = next;
    }

    Ok(Dag {
        root: level[0].cid,
        size,
        leaves,
        blocks,
    })
}

/// Compute the CID a payload would be stored under, without keeping blocks.
pub fn compute_cid(data: &[u8], config: &ChunkingConfig) -> Result<Cid, CoreError> {
    build_dag(Bytes::copy_from_slice(data), config).map(|dag| dag.root)
}

// ─────────────────────────────────────────────────────────────────────────────
// Gear rolling hash
// ─────────────────────────────────────────────────────────────────────────────

/// 256 pseudo-random 64-bit values, generated with splitmix64 from a fixed seed.
static GEAR: [u64; 256] = gear_table();

const fn gear_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut state: u64 = 0x646f_6363_6861_696e; // "docchain"
    let mut i = 0;
    while i < 256 {
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        table[i] = z ^ (z >> 31);
        i += 1;
    }
    table
}

/// Cut masks for normalized chunking: a stricter mask before the average
/// size and a looser one after it pull chunk sizes towards `avg`.
struct CutMasks {
    strict: u64,
    loose: u64,
}

impl CutMasks {
    fn for_avg(avg: usize) -> Self {
        let bits = (usize::BITS - 1 - avg.leading_zeros()).max(2);
        Self {
            strict: !0u64 << (64 - (bits + 1)),
            loose: !0u64 << (64 - (bits - 1)),
        }
    }
}

fn next_cut(data: &[u8], min: usize, avg: usize, max: usize, masks: &CutMasks) -> usize {
    let len = data.len();
    if len <= min {
        return len;
    }
    let max = max.min(len);
    let normal = avg.min(max);

    let mut hash: u64 = 0;
    let mut i = min;
    while i < normal {
        hash = (hash << 1).wrapping_add(GEAR[data[i] as usize]);
        if hash & masks.strict == 0 {
            return i + 1;
        }
        i += 1;
    }
    while i < max {
        hash = (hash << 1).wrapping_add(GEAR[data[i] as usize]);
        if hash & masks.loose == 0 {
            return i + 1;
        }
        i += 1;
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    }

    #[test]
    fn test_small_payload_is_single_raw_block() {
        let dag = build_dag(b"hello".to_vec(), &ChunkingConfig::default()).unwrap();
        assert_eq!(dag.root, Cid::of(Codec::Raw, b"hello"));
        assert_eq!(dag.blocks.len(), 1);
        assert_eq!(dag.size, 5);
    }

    #[test]
    fn test_empty_payload() {
        let dag = build_dag(Vec::new(), &ChunkingConfig::default()).unwrap();
        assert_eq!(dag.root, Cid::of(Codec::Raw, b""));
        assert_eq!(dag.size, 0);
    }

    #[test]
    fn test_multi_chunk_root_is_dag_node() {
        let config = ChunkingConfig::fixed(1024).with_max_links(4);
        let data = pseudo_random(10 * 1024 + 17, 1);
        let dag = build_dag(data.clone(), &config).unwrap();

        assert_eq!(dag.root.codec(), Codec::DagCbor);
        assert_eq!(dag.leaves, 11);
        // 11 leaves -> 3 nodes -> 1 root
        let nodes = dag
            .blocks
            .iter()
            .filter(|b| b.cid.codec() == Codec::DagCbor)
            .count();
        assert_eq!(nodes, 4);
        assert_eq!(dag.blocks.last().unwrap().cid, dag.root);

        let root = DagNode::decode(&dag.blocks.last().unwrap().data).unwrap();
        assert_eq!(root.size(), data.len() as u64);
    }

    #[test]
    fn test_cid_is_deterministic() {
        let config = ChunkingConfig::fixed(512);
        let data = pseudo_random(4000, 2);
        assert_eq!(
            compute_cid(&data, &config).unwrap(),
            compute_cid(&data, &config).unwrap()
        );
    }

    #[test]
    fn test_single_bit_flip_changes_cid() {
        let config = ChunkingConfig::fixed(512);
        let data = pseudo_random(4000, 3);
        let original = compute_cid(&data, &config).unwrap();
        for byte in [0, 1999, 3999] {
            let mut flipped = data.clone();
            flipped[byte] ^= 0x01;
            assert_ne!(compute_cid(&flipped, &config).unwrap(), original);
        }
    }

    #[test]
    fn test_repeated_chunks_are_deduplicated() {
        let config = ChunkingConfig::fixed(256);
        let data = vec![0xabu8; 256 * 8];
        let dag = build_dag(data, &config).unwrap();
        assert_eq!(dag.leaves, 8);
        // one distinct leaf + one root node
        assert_eq!(dag.blocks.len(), 2);
    }

    #[test]
    fn test_content_defined_respects_bounds() {
        let config = ChunkingConfig::content_defined(256, 1024, 4096);
        let data = pseudo_random(64 * 1024, 4);
        let ends = config.boundaries(&data);
        let mut start = 0;
        for (i, &end) in ends.iter().enumerate() {
            let len = end - start;
            assert!(len <= 4096);
            if i + 1 < ends.len() {
                assert!(len > 256);
            }
            start = end;
        }
        assert_eq!(start, data.len());
    }

    #[test]
    fn test_content_defined_resynchronizes_after_insert() {
        let config = ChunkingConfig::content_defined(256, 1024, 4096);
        let data = pseudo_random(64 * 1024, 5);
        let mut edited = data.clone();
        edited.splice(100..100, [1, 2, 3, 4, 5]);

        let original: HashSet<Cid> = build_dag(data, &config)
            .unwrap()
            .blocks
            .into_iter()
            .filter(|b| b.cid.codec() == Codec::Raw)
            .map(|b| b.cid)
            .collect();
        let shifted: Vec<Cid> = build_dag(edited, &config)
            .unwrap()
            .blocks
            .into_iter()
            .filter(|b| b.cid.codec() == Codec::Raw)
            .map(|b| b.cid)
            .collect();

        let shared = shifted.iter().filter(|c| original.contains(c)).count();
        assert!(shared * 2 > shifted.len(), "most chunks should be shared");
    }

    #[test]
    fn test_node_decode_rejects_bad_size() {
        let node = DagNode {
            links: vec![Link {
                cid: Cid::of(Codec::Raw, b"x"),
                size: 1,
            }],
        };
        let mut bytes = node.encode();
        assert_eq!(DagNode::decode(&bytes).unwrap(), node);

        // a3 | 00 01 | 01 <size> | 02 [...]: corrupt the declared total size.
        assert_eq!(bytes[3], 0x01);
        bytes[4] = 0x02;
        assert!(DagNode::decode(&bytes).is_err());
    }

    #[test]
    fn test_node_decode_rejects_overflowing_sizes() {
        let node = DagNode {
            links: vec![
                Link {
                    cid: Cid::of(Codec::Raw, b"a"),
                    size: u64::MAX,
                },
                Link {
                    cid: Cid::of(Codec::Raw, b"b"),
                    size: 2,
                },
            ],
        };
        assert_eq!(node.size(), u64::MAX);

        // Declared size 1 is what the link sizes wrap around to.
        let bytes = encode_canonical(
            &MapBuilder::new()
                .field(keys::VERSION, Value::Integer(NODE_VERSION.into()))
                .field(keys::SIZE, Value::Integer(1u64.into()))
                .field(
                    keys::LINKS,
                    Value::Array(
                        node.links
                            .iter()
                            .map(|l| {
                                Value::Array(vec![
                                    Value::Bytes(l.cid.to_bytes().to_vec()),
                                    Value::Integer(l.size.into()),
                                ])
                            })
                            .collect(),
                    ),
                )
                .build(),
        );
        assert!(matches!(
            DagNode::decode(&bytes),
            Err(CoreError::MalformedNode(reason)) if reason.contains("overflow")
        ));
        assert!(DagNode::decode(&node.encode()).is_err());
    }

    #[test]
    fn test_invalid_config() {
        assert!(ChunkingConfig::fixed(0).validate().is_err());
        assert!(ChunkingConfig::fixed(16).with_max_links(1).validate().is_err());
        assert!(ChunkingConfig::content_defined(512, 256, 1024).validate().is_err());
    }

    proptest::proptest! {
        #[test]
        fn test_boundaries_cover_payload(
            data in proptest::collection::vec(proptest::prelude::any::<u8>(), 1..8192),
            size in 1usize..2048,
        ) {
            let ends = ChunkingConfig::fixed(size).boundaries(&data);
            proptest::prop_assert_eq!(ends.last().copied(), Some(data.len()));
            proptest::prop_assert!(ends.windows(2).all(|w| w[0] < w[1]));
            proptest::prop_assert!(ends[0] > 0);
        }

        #[test]
        fn test_dag_size_matches_payload(
            data in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..6000),
        ) {
            let config = ChunkingConfig::fixed(512);
            let dag = build_dag(data.clone(), &config).unwrap();
            proptest::prop_assert_eq!(dag.size, data.len() as u64);
            proptest::prop_assert_eq!(dag.root, compute_cid(&data, &config).unwrap());
        }
    }
}
