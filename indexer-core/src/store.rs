// Collaborator contracts the engine is written against. Production adapters
// live in db.rs / cache.rs / rpc.rs / scheduler.rs; tests supply mocks.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::Address;

use crate::models::{
    ExchangeCheckpoint, ExchangeInfo, RawLog, TickerCacheEntry, TradeRecord,
};

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn latest_block_number(&self) -> Result<u64>;

    /// Logs for one contract over a bounded, inclusive block range, in block
    /// order then log-index order.
    async fn get_logs(&self, from_block: u64, to_block: u64, address: Address)
        -> Result<Vec<RawLog>>;
}

#[async_trait]
pub trait TimestampSource: Send + Sync {
    /// Unix timestamps for the requested blocks. Absent entries are legal;
    /// logs for such blocks are dropped upstream.
    async fn get_timestamps(&self, blocks: &BTreeSet<u64>) -> Result<HashMap<u64, i64>>;
}

#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn append_rows(&self, exchange: Address, rows: &[TradeRecord]) -> Result<()>;

    /// Trades with `start <= timestamp <= end`, ordered by timestamp
    /// ascending with transaction hash ascending as the tie-break.
    async fn query_window(&self, exchange: Address, start: i64, end: i64)
        -> Result<Vec<TradeRecord>>;
}

#[async_trait]
pub trait ExchangeStore: Send + Sync {
    async fn get_exchange(&self, address: Address) -> Result<Option<ExchangeInfo>>;

    async fn get_checkpoint(&self, address: Address) -> Result<Option<ExchangeCheckpoint>>;

    /// Advance the checkpoint from `current` to `next`. Must fail if the
    /// stored cursor no longer matches `current` so that two crawls for the
    /// same exchange cannot double-advance the running totals.
    async fn put_checkpoint(
        &self,
        current: &ExchangeCheckpoint,
        next: &ExchangeCheckpoint,
    ) -> Result<()>;
}

#[async_trait]
pub trait TickerCacheStore: Send + Sync {
    async fn get_cache(&self, exchange: Address) -> Result<Option<TickerCacheEntry>>;

    /// Last-writer-wins overwrite; concurrent recomputations may race and
    /// that is accepted, staleness stays bounded either way.
    async fn put_cache(&self, entry: &TickerCacheEntry) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlRequest {
    pub exchange: Address,
    pub recrawl_secs: u64,
}

/// One-shot deferred crawl trigger. Fire-and-forget: delivery is neither
/// awaited nor verified, and there is no cancellation.
pub trait Scheduler: Send + Sync {
    fn schedule_delayed(&self, delay: Duration, request: CrawlRequest);
}
