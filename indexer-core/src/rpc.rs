// JSON-RPC collaborators: the ledger client and a block-timestamp source
// that reads Postgres first and falls back to block headers over RPC.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Filter};
use tracing::warn;

use crate::db::PgStore;
use crate::models::RawLog;
use crate::store::{LedgerClient, TimestampSource};

#[derive(Clone)]
pub struct EthLedgerClient {
    provider: Provider<Http>,
}

impl EthLedgerClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        Ok(Self {
            provider: Provider::<Http>::try_from(rpc_url)?,
        })
    }

    pub fn provider(&self) -> Provider<Http> {
        self.provider.clone()
    }
}

#[async_trait]
impl LedgerClient for EthLedgerClient {
    async fn latest_block_number(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: Address,
    ) -> Result<Vec<RawLog>> {
        let filter = Filter::new()
            .from_block(from_block)
            .to_block(to_block)
            .address(address);

        let logs = self.provider.get_logs(&filter).await?;

        // Pending logs lack block/transaction positions; the crawl range ends
        // well behind the head, so none are expected here.
        Ok(logs
            .into_iter()
            .filter_map(|log| {
                Some(RawLog {
                    topics: log.topics,
                    block_number: log.block_number?.as_u64(),
                    transaction_hash: log.transaction_hash?,
                    transaction_index: log.transaction_index?.as_u64(),
                })
            })
            .collect())
    }
}

/// Block timestamps from the local table, with an RPC header fallback that
/// writes back what it finds. A block that cannot be resolved stays absent;
/// its logs are dropped upstream rather than failing the crawl.
#[derive(Clone)]
pub struct CachingTimestampSource {
    store: PgStore,
    provider: Provider<Http>,
}

impl CachingTimestampSource {
    pub fn new(store: PgStore, provider: Provider<Http>) -> Self {
        Self { store, provider }
    }
}

#[async_trait]
impl TimestampSource for CachingTimestampSource {
    async fn get_timestamps(&self, blocks: &BTreeSet<u64>) -> Result<HashMap<u64, i64>> {
        let mut found = self.store.get_timestamps(blocks).await?;

        for &block in blocks {
            if found.contains_key(&block) {
                continue;
            }
            match self.provider.get_block(block).await {
                Ok(Some(header)) => {
                    let timestamp = header.timestamp.as_u64() as i64;
                    self.store.put_block_timestamp(block, timestamp).await?;
                    found.insert(block, timestamp);
                }
                Ok(None) => {
                    warn!(block, "block not found while resolving timestamp");
                }
                Err(e) => {
                    warn!(block, error = %e, "timestamp lookup failed, leaving block absent");
                }
            }
        }

        Ok(found)
    }
}
