//! Proptest generators for property-based testing.

use proptest::prelude::*;

use docchain_core::{
    Blake3Hash, ChunkingConfig, Cid, Codec, Identity, Keypair, LedgerRecord, Metadata,
    RecordBody, Visibility,
};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

pub fn identity() -> impl Strategy<Value = Identity> {
    keypair().prop_map(|kp| kp.identity())
}

/// Generate a CID of a random raw block.
pub fn cid() -> impl Strategy<Value = Cid> {
    prop::collection::vec(any::<u8>(), 0..64).prop_map(|block| Cid::of(Codec::Raw, &block))
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

pub fn metadata() -> impl Strategy<Value = Metadata> {
    (
        "[A-Za-z][A-Za-z0-9 ]{0,39}",
        ".{0,80}",
        prop_oneof![Just("application/pdf"), Just("image/png"), Just("")],
        any::<u32>(),
        prop_oneof![Just(Visibility::Private), Just(Visibility::Public)],
        prop::collection::btree_map("[a-z_]{1,12}", "[ -~]{0,24}", 0..4),
    )
        .prop_map(|(title, description, mime, size, visibility, extra)| {
            let mut metadata = Metadata::new(title)
                .description(description)
                .mime_type(mime)
                .size(u64::from(size))
                .visibility(visibility);
            metadata.extra = extra;
            metadata
        })
}

/// Generate a valid chunking configuration with small chunks.
pub fn chunking_config() -> impl Strategy<Value = ChunkingConfig> {
    let fixed = (1usize..=4096).prop_map(ChunkingConfig::fixed);
    let content_defined = (16usize..=256, 64usize..=1024).prop_map(|(min, span)| {
        let avg = min.max(64) + span;
        ChunkingConfig::content_defined(min, avg, avg * 4)
    });
    (prop_oneof![fixed, content_defined], 2usize..=16)
        .prop_map(|(config, max_links)| config.with_max_links(max_links))
}

pub fn record_body() -> impl Strategy<Value = RecordBody> {
    prop_oneof![
        (cid(), identity(), metadata()).prop_map(|(cid, owner, metadata)| RecordBody::Register {
            cid,
            owner,
            metadata
        }),
        (cid(), identity(), 1u64..10_000).prop_map(|(cid, owner, target_seq)| {
            RecordBody::Revoke {
                cid,
                owner,
                target_seq,
            }
        }),
        (cid(), identity(), identity(), any::<Option<i64>>()).prop_map(
            |(cid, grantor, grantee, expires_at)| RecordBody::Grant {
                cid,
                grantor,
                grantee,
                expires_at,
            }
        ),
        (cid(), identity(), identity()).prop_map(|(cid, grantor, grantee)| {
            RecordBody::Ungrant {
                cid,
                grantor,
                grantee,
            }
        }),
    ]
}

/// Parameters for generating an attested ledger record.
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub operator_seed: [u8; 32],
    pub seq: u64,
    pub prev_hash: [u8; 32],
    pub timestamp: i64,
    pub body: RecordBody,
}

impl Arbitrary for RecordParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            any::<[u8; 32]>(),
            1u64..=1_000_000,
            any::<[u8; 32]>(),
            0i64..=4_102_444_800_000, // up to 2100-01-01
            record_body(),
        )
            .prop_map(|(operator_seed, seq, prev_hash, timestamp, body)| RecordParams {
                operator_seed,
                seq,
                prev_hash,
                timestamp,
                body,
            })
            .boxed()
    }
}

/// Attest a record from parameters.
pub fn record_from_params(params: &RecordParams) -> LedgerRecord {
    LedgerRecord::attest(
        params.seq,
        Blake3Hash::from_bytes(params.prev_hash),
        params.timestamp,
        params.body.clone(),
        &Keypair::from_seed(&params.operator_seed),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchain_core::compute_cid;

    proptest! {
        #[test]
        fn test_record_hash_deterministic(params: RecordParams) {
            let r1 = record_from_params(&params);
            let r2 = record_from_params(&params);
            prop_assert_eq!(r1.hash(), r2.hash());
            prop_assert_eq!(r1.encode(), r2.encode());
        }

        #[test]
        fn test_decoded_record_still_attested(params: RecordParams) {
            let record = record_from_params(&params);
            let decoded = LedgerRecord::decode(&record.encode()).unwrap();
            prop_assert!(decoded.verify_attestation().is_ok());
            prop_assert_eq!(decoded, record);
        }

        #[test]
        fn test_record_hash_covers_timestamp(params: RecordParams) {
            let original = record_from_params(&params);
            let mut backdated = original.clone();
            backdated.timestamp = original.timestamp - 1;
            prop_assert_ne!(original.hash(), backdated.hash());
            prop_assert!(backdated.verify_attestation().is_err());
        }

        #[test]
        fn test_cid_deterministic_under_any_chunking(
            config in chunking_config(),
            data in payload(20_000),
        ) {
            let c1 = compute_cid(&data, &config).unwrap();
            let c2 = compute_cid(&data, &config).unwrap();
            prop_assert_eq!(c1, c2);
        }
    }
}
