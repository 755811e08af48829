//! Deterministic test vectors.
//!
//! Chunking vectors pin the DAG shape each payload must produce; record
//! vectors build a small attested chain from fixed seeds. The computed
//! CIDs and hashes can be exported as JSON for comparison between builds.

use serde::Serialize;

use docchain_core::{
    build_dag, validate_chain, Blake3Hash, ChunkingConfig, Cid, Codec, Keypair, LedgerRecord,
    Metadata, RecordBody,
};

/// A chunking vector: a payload, a configuration, and the expected DAG shape.
#[derive(Debug, Clone)]
pub struct ChunkVector {
    pub name: &'static str,
    pub payload: Vec<u8>,
    pub chunking: ChunkingConfig,
    pub expected_codec: Codec,
    pub expected_leaves: usize,
    /// Distinct blocks written, after deduplication.
    pub expected_blocks: usize,
}

/// Bytes `i % 251`: never repeats at power-of-two chunk sizes.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Get all chunking vectors.
pub fn chunk_vectors() -> Vec<ChunkVector> {
    vec![
        ChunkVector {
            name: "empty payload",
            payload: Vec::new(),
            chunking: ChunkingConfig::default(),
            expected_codec: Codec::Raw,
            expected_leaves: 1,
            expected_blocks: 1,
        },
        ChunkVector {
            name: "hello in one block",
            payload: b"hello".to_vec(),
            chunking: ChunkingConfig::default(),
            expected_codec: Codec::Raw,
            expected_leaves: 1,
            expected_blocks: 1,
        },
        ChunkVector {
            name: "exactly one chunk",
            payload: pattern(1024),
            chunking: ChunkingConfig::fixed(1024),
            expected_codec: Codec::Raw,
            expected_leaves: 1,
            expected_blocks: 1,
        },
        ChunkVector {
            name: "four chunks under one node",
            payload: pattern(4096),
            chunking: ChunkingConfig::fixed(1024),
            expected_codec: Codec::DagCbor,
            expected_leaves: 4,
            expected_blocks: 5,
        },
        ChunkVector {
            name: "short tail chunk",
            payload: pattern(4097),
            chunking: ChunkingConfig::fixed(1024),
            expected_codec: Codec::DagCbor,
            expected_leaves: 5,
            expected_blocks: 6,
        },
        ChunkVector {
            name: "two-level tree",
            payload: pattern(10 * 1024),
            chunking: ChunkingConfig::fixed(1024).with_max_links(4),
            expected_codec: Codec::DagCbor,
            expected_leaves: 10,
            // 10 leaves, 3 inner nodes (4 + 4 + 2), 1 root
            expected_blocks: 14,
        },
        ChunkVector {
            name: "repeated chunks deduplicated",
            payload: vec![0u8; 4096],
            chunking: ChunkingConfig::fixed(1024),
            expected_codec: Codec::DagCbor,
            expected_leaves: 4,
            expected_blocks: 2,
        },
    ]
}

/// Computed output of a chunking vector.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkOutcome {
    pub name: &'static str,
    pub cid: String,
    pub size: u64,
    pub passed: bool,
    pub detail: String,
}

/// Check every chunking vector against its expected shape.
pub fn verify_chunk_vectors() -> Vec<ChunkOutcome> {
    chunk_vectors()
        .iter()
        .map(|v| match build_dag(v.payload.clone(), &v.chunking) {
            Ok(dag) => {
                let shape = (dag.root.codec(), dag.leaves, dag.blocks.len());
                let expected = (v.expected_codec, v.expected_leaves, v.expected_blocks);
                ChunkOutcome {
                    name: v.name,
                    cid: dag.root.to_string(),
                    size: dag.size,
                    passed: shape == expected && dag.size == v.payload.len() as u64,
                    detail: format!("got {shape:?}, expected {expected:?}"),
                }
            }
            Err(e) => ChunkOutcome {
                name: v.name,
                cid: String::new(),
                size: 0,
                passed: false,
                detail: e.to_string(),
            },
        })
        .collect()
}

/// A fixed three-record chain: register, grant, revoke.
pub fn record_chain() -> Vec<LedgerRecord> {
    let operator = Keypair::from_seed(&[0x42; 32]);
    let owner = Keypair::from_seed(&[0x0a; 32]).identity();
    let reader = Keypair::from_seed(&[0x0b; 32]).identity();
    let cid = Cid::of(Codec::Raw, b"hello");

    let bodies = [
        RecordBody::Register {
            cid,
            owner,
            metadata: Metadata::new("Greeting").mime_type("text/plain").size(5),
        },
        RecordBody::Grant {
            cid,
            grantor: owner,
            grantee: reader,
            expires_at: Some(1_736_870_460_000),
        },
        RecordBody::Revoke {
            cid,
            owner,
            target_seq: 1,
        },
    ];

    let mut chain: Vec<LedgerRecord> = Vec::with_capacity(bodies.len());
    for (i, body) in bodies.into_iter().enumerate() {
        let prev_hash = chain.last().map_or(Blake3Hash::ZERO, |r| r.hash());
        let timestamp = 1_736_870_400_000 + i as i64 * 1_000; // 2025-01-14T16:00:00Z
        chain.push(LedgerRecord::attest(
            i as u64 + 1,
            prev_hash,
            timestamp,
            body,
            &operator,
        ));
    }
    chain
}

/// Computed output of a record vector.
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub seq: u64,
    pub hash: String,
    pub encoded_len: usize,
}

pub fn record_outcomes() -> Vec<RecordOutcome> {
    record_chain()
        .iter()
        .map(|r| RecordOutcome {
            seq: r.seq,
            hash: r.hash().to_hex(),
            encoded_len: r.encode().len(),
        })
        .collect()
}

/// All computed vector outputs as pretty JSON.
pub fn export_json() -> serde_json::Result<String> {
    #[derive(Serialize)]
    struct Export {
        chunks: Vec<ChunkOutcome>,
        records: Vec<RecordOutcome>,
        operator: String,
    }
    serde_json::to_string_pretty(&Export {
        chunks: verify_chunk_vectors(),
        records: record_outcomes(),
        operator: hex::encode(Keypair::from_seed(&[0x42; 32]).identity().as_bytes()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_vectors() {
        for outcome in verify_chunk_vectors() {
            assert!(outcome.passed, "{}: {}", outcome.name, outcome.detail);
        }
    }

    #[test]
    fn test_chunk_vectors_deterministic() {
        let first: Vec<String> = verify_chunk_vectors().into_iter().map(|o| o.cid).collect();
        let second: Vec<String> = verify_chunk_vectors().into_iter().map(|o| o.cid).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_record_chain_valid() {
        let chain = record_chain();
        let head = validate_chain(&chain).unwrap().unwrap();
        assert_eq!(head.seq, 3);
        assert_eq!(head.hash, chain[2].hash());
        for record in &chain {
            record.verify_attestation().unwrap();
            assert_eq!(&LedgerRecord::decode(&record.encode()).unwrap(), record);
        }
    }

    #[test]
    fn test_record_chain_reordered_fails() {
        let mut chain = record_chain();
        chain.swap(1, 2);
        assert!(validate_chain(&chain).is_err());
    }

    #[test]
    fn test_export_json() {
        let json = export_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["records"].as_array().unwrap().len(), 3);
        assert_eq!(value["chunks"].as_array().unwrap().len(), chunk_vectors().len());
    }
}
