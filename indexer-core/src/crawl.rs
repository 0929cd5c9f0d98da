// Crawl engine: advances one exchange's checkpoint over a bounded block
// range, decoding logs into trade records and folding the signed amounts into
// the running reserve totals. Idle -> Fetching -> Decoding -> Persisting ->
// Rescheduled, with any failure terminal for the invocation; retries are the
// external scheduler's job.

use std::collections::BTreeSet;
use std::time::Duration;

use ethers::types::Address;
use tracing::{debug, info, warn};

use crate::abi::SchemaRegistry;
use crate::decoder::{decode_log, Decoded};
use crate::error::CrawlError;
use crate::models::{ExchangeCheckpoint, TradeRecord};
use crate::store::{
    CrawlRequest, ExchangeStore, LedgerClient, Scheduler, TimestampSource, TradeStore,
};

pub const DEFAULT_GENESIS_BLOCK: u64 = 6_627_917;
pub const DEFAULT_MAX_BLOCKS_TO_CRAWL: u64 = 10_000;
pub const DEFAULT_SAFETY_MARGIN_BLOCKS: u64 = 5;

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Used in place of a checkpoint's `last_updated_block == 0` sentinel.
    pub genesis_block: u64,
    pub max_blocks_to_crawl: u64,
    /// Blocks held back from the chain head; logs near the head are unstable.
    pub safety_margin_blocks: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            genesis_block: DEFAULT_GENESIS_BLOCK,
            max_blocks_to_crawl: DEFAULT_MAX_BLOCKS_TO_CRAWL,
            safety_margin_blocks: DEFAULT_SAFETY_MARGIN_BLOCKS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlOutcome {
    pub from_block: u64,
    pub to_block: u64,
    pub rows_inserted: usize,
    pub last_updated_block: u64,
}

pub struct CrawlEngine<L, T, H, X, S> {
    ledger: L,
    timestamps: T,
    history: H,
    exchanges: X,
    scheduler: S,
    registry: SchemaRegistry,
    config: CrawlConfig,
}

impl<L, T, H, X, S> CrawlEngine<L, T, H, X, S>
where
    L: LedgerClient,
    T: TimestampSource,
    H: TradeStore,
    X: ExchangeStore,
    S: Scheduler,
{
    pub fn new(
        ledger: L,
        timestamps: T,
        history: H,
        exchanges: X,
        scheduler: S,
        registry: SchemaRegistry,
        config: CrawlConfig,
    ) -> Self {
        Self {
            ledger,
            timestamps,
            history,
            exchanges,
            scheduler,
            registry,
            config,
        }
    }

    /// One full crawl cycle for `exchange`. On success the next cycle is
    /// scheduled `recrawl_secs` out; on any failure the checkpoint is left
    /// untouched and the periodic chain stops until re-triggered externally.
    pub async fn crawl_once(
        &self,
        exchange: Address,
        recrawl_secs: u64,
    ) -> Result<CrawlOutcome, CrawlError> {
        let checkpoint = self
            .exchanges
            .get_checkpoint(exchange)
            .await
            .map_err(CrawlError::Store)?
            .ok_or(CrawlError::UnknownExchange(exchange))?;

        // Fetching.
        let from_block = if checkpoint.last_updated_block == 0 {
            self.config.genesis_block
        } else {
            checkpoint.last_updated_block
        };

        let head = self
            .ledger
            .latest_block_number()
            .await
            .map_err(CrawlError::Fetch)?;
        let to_block = (from_block + self.config.max_blocks_to_crawl)
            .min(head.saturating_sub(self.config.safety_margin_blocks));

        if to_block < from_block {
            // Caught up with the safe head; moving the cursor to to_block + 1
            // would rewind it, so this cycle is a no-op.
            debug!(%exchange, from_block, to_block, "caught up with chain head");
            self.reschedule(exchange, recrawl_secs);
            return Ok(CrawlOutcome {
                from_block,
                to_block,
                rows_inserted: 0,
                last_updated_block: checkpoint.last_updated_block,
            });
        }

        debug!(%exchange, from_block, to_block, "fetching exchange logs");
        let logs = self
            .ledger
            .get_logs(from_block, to_block, exchange)
            .await
            .map_err(CrawlError::Fetch)?;
        debug!(%exchange, count = logs.len(), "received exchange logs");

        if logs.is_empty() {
            // A quiet range still advances the cursor so the exchange keeps
            // pace with the chain; the reserve totals are unchanged.
            let next = ExchangeCheckpoint {
                last_updated_block: to_block + 1,
                ..checkpoint.clone()
            };
            self.exchanges
                .put_checkpoint(&checkpoint, &next)
                .await
                .map_err(CrawlError::Persist)?;
            info!(%exchange, last_updated_block = next.last_updated_block, "no logs in range, cursor advanced");
            self.reschedule(exchange, recrawl_secs);
            return Ok(CrawlOutcome {
                from_block,
                to_block,
                rows_inserted: 0,
                last_updated_block: next.last_updated_block,
            });
        }

        // Decoding. Any decode error aborts the whole batch before anything
        // is persisted; the checkpoint never advances past a block whose logs
        // were only partially processed.
        let blocks: BTreeSet<u64> = logs.iter().map(|log| log.block_number).collect();
        let timestamps = self
            .timestamps
            .get_timestamps(&blocks)
            .await
            .map_err(CrawlError::Fetch)?;

        let mut cur_eth_total = checkpoint.cur_eth_total;
        let mut cur_tokens_total = checkpoint.cur_tokens_total;
        let mut latest_block_encountered = 0u64;
        let mut records: Vec<TradeRecord> = Vec::new();

        for log in &logs {
            let timestamp = timestamps.get(&log.block_number).copied();
            if timestamp.is_none() {
                warn!(block = log.block_number, "no timestamp for block, dropping log");
                continue;
            }

            match decode_log(&self.registry, log, timestamp)? {
                Decoded::Skip => continue,
                Decoded::Trade(mut record) => {
                    cur_eth_total = cur_eth_total + record.eth;
                    cur_tokens_total = cur_tokens_total + record.tokens;
                    record.cur_eth_total = cur_eth_total;
                    record.cur_tokens_total = cur_tokens_total;
                    latest_block_encountered = latest_block_encountered.max(record.block);
                    records.push(record);
                }
            }
        }

        if records.is_empty() {
            // Logs were present but every one was skipped; nothing to append
            // and the cursor stays put for this range.
            debug!(%exchange, "0 rows to insert, skipping");
            self.reschedule(exchange, recrawl_secs);
            return Ok(CrawlOutcome {
                from_block,
                to_block,
                rows_inserted: 0,
                last_updated_block: checkpoint.last_updated_block,
            });
        }

        // Persisting. Append and checkpoint advance are one logical unit:
        // the cursor only moves after the rows are durably stored.
        self.history
            .append_rows(exchange, &records)
            .await
            .map_err(CrawlError::Persist)?;

        let next = ExchangeCheckpoint {
            address: exchange,
            last_updated_block: latest_block_encountered + 1,
            cur_eth_total,
            cur_tokens_total,
        };
        self.exchanges
            .put_checkpoint(&checkpoint, &next)
            .await
            .map_err(CrawlError::Persist)?;

        info!(
            %exchange,
            rows = records.len(),
            last_updated_block = next.last_updated_block,
            cur_eth_total = %next.cur_eth_total,
            cur_tokens_total = %next.cur_tokens_total,
            "crawl cycle persisted"
        );

        self.reschedule(exchange, recrawl_secs);
        Ok(CrawlOutcome {
            from_block,
            to_block,
            rows_inserted: records.len(),
            last_updated_block: next.last_updated_block,
        })
    }

    fn reschedule(&self, exchange: Address, recrawl_secs: u64) {
        self.scheduler.schedule_delayed(
            Duration::from_secs(recrawl_secs),
            CrawlRequest {
                exchange,
                recrawl_secs,
            },
        );
    }
}
