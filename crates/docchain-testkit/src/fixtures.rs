//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use docchain::{DocChain, DocChainConfig, Result};
use docchain_core::{ChunkingConfig, Clock, Deadline, Identity, Keypair, ManualClock, Metadata};

/// Ledger time a fresh fixture starts at (2023-11-14T22:13:20Z).
pub const FIXTURE_START: i64 = 1_700_000_000_000;

/// An in-memory DocChain on a manual clock.
pub struct TestFixture {
    pub docs: DocChain,
    pub clock: Arc<ManualClock>,
    pub operator: Keypair,
}

impl TestFixture {
    /// In-memory stores and logs with 1 KiB fixed chunks.
    pub async fn new() -> Result<Self> {
        Self::with_config(DocChainConfig {
            chunking: ChunkingConfig::fixed(1024),
            ..DocChainConfig::default()
        })
        .await
    }

    pub async fn with_config(config: DocChainConfig) -> Result<Self> {
        let operator = Keypair::from_seed(&[0x0d; 32]);
        let clock = Arc::new(ManualClock::new(FIXTURE_START));
        let ledger_clock: Arc<dyn Clock> = clock.clone();
        let docs = DocChain::open(config, operator.clone(), ledger_clock).await?;
        Ok(Self {
            docs,
            clock,
            operator,
        })
    }

    /// Move ledger time forward.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Upload `payload` as `owner` with a generated title.
    pub async fn upload(&self, owner: Identity, payload: &[u8]) -> Result<docchain::RegistryEntry> {
        let title = format!("document-{}", payload.len());
        self.docs
            .upload(owner, payload.to_vec(), Metadata::new(title), deadline())
            .await
    }
}

/// A generous deadline for fixture operations.
pub fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(30))
}

/// Deterministic identities for multi-party tests.
pub fn parties(count: usize) -> Vec<Keypair> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            seed[31] = 0x5a;
            Keypair::from_seed(&seed)
        })
        .collect()
}

/// Pseudo-random payload, reproducible from `seed`.
pub fn payload(seed: u64, len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parties_distinct_and_stable() {
        let a = parties(4);
        let b = parties(4);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.identity(), y.identity());
        }
        assert_ne!(a[0].identity(), a[1].identity());
    }

    #[test]
    fn test_payload_reproducible() {
        assert_eq!(payload(7, 100), payload(7, 100));
        assert_ne!(payload(7, 100), payload(8, 100));
    }

    #[tokio::test]
    async fn test_fixture_upload_and_share() {
        let fixture = TestFixture::new().await.unwrap();
        let people = parties(2);
        let (owner, reader) = (people[0].identity(), people[1].identity());

        let entry = fixture.upload(owner, &payload(1, 5000)).await.unwrap();
        assert_eq!(entry.timestamp, FIXTURE_START);

        fixture
            .docs
            .share(entry.cid, owner, reader, Some(fixture.now() + 1_000), deadline())
            .await
            .unwrap();
        assert!(fixture.docs.can_access(&entry.cid, &reader, deadline()).await.unwrap());

        fixture.advance(Duration::from_secs(2));
        assert!(!fixture.docs.can_access(&entry.cid, &reader, deadline()).await.unwrap());
    }
}
