//! Property tests for content addressing and file verification.

mod common;

use std::sync::Arc;

use proptest::prelude::*;

use common::{identity, soon};
use docchain::core::{compute_cid, ChunkingConfig};
use docchain::store::{BlockStore, ContentStore, MemoryBlockStore, StoreConfig};
use docchain::{DocChainConfig, Metadata};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn chunking() -> ChunkingConfig {
    ChunkingConfig::fixed(512).with_max_links(4)
}

fn store() -> ContentStore {
    let backends: Vec<Arc<dyn BlockStore>> = vec![
        Arc::new(MemoryBlockStore::named("a")),
        Arc::new(MemoryBlockStore::named("b")),
    ];
    let config = StoreConfig {
        chunking: chunking(),
        min_write_replicas: 2,
    };
    ContentStore::new(backends, config).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_put_get_round_trip(data in prop::collection::vec(any::<u8>(), 0..8_192)) {
        let rt = runtime();
        let store = store();
        let fetched = rt.block_on(async {
            let cid = store.put(data.clone(), soon()).await?;
            prop_assert_eq!(cid, store.cid_of(&data)?);
            Ok::<_, TestCaseError>(store.get(&cid, soon()).await?)
        })?;
        prop_assert_eq!(fetched.as_ref(), data.as_slice());
    }

    #[test]
    fn prop_single_bit_flip_changes_cid(
        data in prop::collection::vec(any::<u8>(), 1..4_096),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut flipped = data.clone();
        let i = index.index(flipped.len());
        flipped[i] ^= 1 << bit;
        let original = compute_cid(&data, &chunking()).unwrap();
        let modified = compute_cid(&flipped, &chunking()).unwrap();
        prop_assert_ne!(original, modified);
    }

    #[test]
    fn prop_modified_file_never_verifies(
        data in prop::collection::vec(any::<u8>(), 1..4_096),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let rt = runtime();
        let (verified, forged_verified) = rt.block_on(async {
            let config = DocChainConfig {
                chunking: chunking(),
                ..DocChainConfig::default()
            };
            let (docs, _clock) = common::open(config).await.unwrap();
            docs.upload(identity(1), data.clone(), Metadata::new("doc"), soon())
                .await
                .unwrap();

            let mut forged = data.clone();
            let i = index.index(forged.len());
            forged[i] ^= 1 << bit;
            let verified = docs.verify_by_file(&data, soon()).await.unwrap().verified;
            let forged_verified = docs.verify_by_file(&forged, soon()).await.unwrap().verified;
            (verified, forged_verified)
        });
        prop_assert!(verified);
        prop_assert!(!forged_verified);
    }
}

#[test]
fn test_many_distinct_payloads_distinct_cids() {
    let mut seen = std::collections::HashSet::new();
    let base = vec![0u8; 64];
    for i in 0..base.len() * 8 {
        let mut payload = base.clone();
        payload[i / 8] ^= 1 << (i % 8);
        assert!(seen.insert(compute_cid(&payload, &chunking()).unwrap()));
    }
    assert!(seen.insert(compute_cid(&base, &chunking()).unwrap()));
}
