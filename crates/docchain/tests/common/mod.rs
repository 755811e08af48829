//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use docchain::core::{ChunkingConfig, Clock, ManualClock};
use docchain::{DocChain, DocChainConfig, Deadline, Identity, Keypair};

/// Ledger time the tests start at.
pub const START: i64 = 1_700_000_000_000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn operator() -> Keypair {
    Keypair::from_seed(&[0x0d; 32])
}

pub fn identity(seed: u8) -> Identity {
    Keypair::from_seed(&[seed; 32]).identity()
}

pub fn soon() -> Deadline {
    Deadline::after(Duration::from_secs(10))
}

/// Small fixed chunks so modest payloads span several blocks.
pub fn small_chunks() -> DocChainConfig {
    DocChainConfig {
        chunking: ChunkingConfig::fixed(1024).with_max_links(8),
        ..DocChainConfig::default()
    }
}

pub async fn open(config: DocChainConfig) -> anyhow::Result<(DocChain, Arc<ManualClock>)> {
    init_tracing();
    let clock = Arc::new(ManualClock::new(START));
    let ledger_clock: Arc<dyn Clock> = clock.clone();
    let docs = DocChain::open(config, operator(), ledger_clock).await?;
    Ok((docs, clock))
}

/// A stand-in PDF: header plus deterministic filler.
pub fn income_pdf() -> Vec<u8> {
    let mut bytes = b"%PDF-1.7\n% Income Certificate\n".to_vec();
    bytes.extend((0..12_000u32).map(|i| (i.wrapping_mul(31) % 251) as u8));
    bytes
}
