use std::collections::{BTreeSet, HashMap};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ethers::types::{Address, I256};
use ethers::utils::to_checksum;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::models::{EventKind, ExchangeCheckpoint, ExchangeInfo, TradeRecord};
use crate::store::{ExchangeStore, TimestampSource, TradeStore};

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    // Embed migrations from the workspace `migrations` directory.
    sqlx::migrate!("../migrations").run(pool).await?;
    Ok(())
}

/// Postgres adapter for trade history, exchange metadata, checkpoints and
/// block timestamps. Amounts are stored as decimal TEXT; addresses as
/// checksummed strings.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Register an exchange if it is not known yet; the checkpoint starts at
    /// block 0 (the "use genesis" sentinel) with zero reserves.
    pub async fn register_exchange(
        &self,
        address: Address,
        symbol: &str,
        theme: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO exchanges (address, symbol, theme)
            VALUES ($1, $2, $3)
            ON CONFLICT (address) DO NOTHING
            "#,
        )
        .bind(to_checksum(&address, None))
        .bind(symbol)
        .bind(theme)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn put_block_timestamp(&self, block: u64, timestamp: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO block_timestamps (block, block_timestamp)
            VALUES ($1, $2)
            ON CONFLICT (block) DO NOTHING
            "#,
        )
        .bind(block as i64)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_amount(raw: &str, column: &str) -> Result<I256> {
    I256::from_dec_str(raw).map_err(|e| anyhow!("bad {column} amount `{raw}`: {e}"))
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<TradeRecord> {
    let event_name: String = row.get("event");
    let event = EventKind::from_name(&event_name)
        .ok_or_else(|| anyhow!("unknown event `{event_name}` in trade history"))?;

    Ok(TradeRecord {
        event,
        tx_hash: row.get("tx_hash"),
        tx_index: row.get::<i64, _>("tx_index") as u64,
        tx_order: row.get("tx_order"),
        eth: parse_amount(&row.get::<String, _>("eth"), "eth")?,
        tokens: parse_amount(&row.get::<String, _>("tokens"), "tokens")?,
        cur_eth_total: parse_amount(&row.get::<String, _>("cur_eth_total"), "cur_eth_total")?,
        cur_tokens_total: parse_amount(
            &row.get::<String, _>("cur_tokens_total"),
            "cur_tokens_total",
        )?,
        user: row.get("trader"),
        block: row.get::<i64, _>("block") as u64,
        timestamp: row.get("block_timestamp"),
        day: row.get("day"),
        month: row.get("month"),
        year: row.get("year"),
    })
}

#[async_trait]
impl TradeStore for PgStore {
    async fn append_rows(&self, exchange: Address, rows: &[TradeRecord]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let exchange = to_checksum(&exchange, None);
        for record in rows {
            sqlx::query(
                r#"
                INSERT INTO exchange_trades (
                    exchange,
                    event,
                    tx_hash,
                    tx_index,
                    tx_order,
                    eth,
                    tokens,
                    cur_eth_total,
                    cur_tokens_total,
                    trader,
                    block,
                    block_timestamp,
                    day,
                    month,
                    year
                ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
                ON CONFLICT (exchange, tx_order, event) DO NOTHING
                "#,
            )
            .bind(&exchange)
            .bind(record.event.as_str())
            .bind(&record.tx_hash)
            .bind(record.tx_index as i64)
            .bind(record.tx_order)
            .bind(record.eth.to_string())
            .bind(record.tokens.to_string())
            .bind(record.cur_eth_total.to_string())
            .bind(record.cur_tokens_total.to_string())
            .bind(&record.user)
            .bind(record.block as i64)
            .bind(record.timestamp)
            .bind(&record.day)
            .bind(&record.month)
            .bind(&record.year)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn query_window(
        &self,
        exchange: Address,
        start: i64,
        end: i64,
    ) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT
                event,
                tx_hash,
                tx_index,
                tx_order,
                eth,
                tokens,
                cur_eth_total,
                cur_tokens_total,
                trader,
                block,
                block_timestamp,
                day,
                month,
                year
            FROM exchange_trades
            WHERE exchange = $1
              AND block_timestamp >= $2
              AND block_timestamp <= $3
            ORDER BY block_timestamp ASC, tx_hash ASC
            "#,
        )
        .bind(to_checksum(&exchange, None))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

#[async_trait]
impl ExchangeStore for PgStore {
    async fn get_exchange(&self, address: Address) -> Result<Option<ExchangeInfo>> {
        let row = sqlx::query(
            r#"
            SELECT symbol, theme FROM exchanges
            WHERE address = $1
            "#,
        )
        .bind(to_checksum(&address, None))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ExchangeInfo {
            address,
            symbol: row.get("symbol"),
            theme: row.get("theme"),
        }))
    }

    async fn get_checkpoint(&self, address: Address) -> Result<Option<ExchangeCheckpoint>> {
        let row = sqlx::query(
            r#"
            SELECT last_updated_block, cur_eth_total, cur_tokens_total
            FROM exchanges
            WHERE address = $1
            "#,
        )
        .bind(to_checksum(&address, None))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(ExchangeCheckpoint {
                address,
                last_updated_block: row.get::<i64, _>("last_updated_block") as u64,
                cur_eth_total: parse_amount(
                    &row.get::<String, _>("cur_eth_total"),
                    "cur_eth_total",
                )?,
                cur_tokens_total: parse_amount(
                    &row.get::<String, _>("cur_tokens_total"),
                    "cur_tokens_total",
                )?,
            })
        })
        .transpose()
    }

    async fn put_checkpoint(
        &self,
        current: &ExchangeCheckpoint,
        next: &ExchangeCheckpoint,
    ) -> Result<()> {
        // Conditional update keyed on the cursor we read; a concurrent crawl
        // for the same exchange loses here instead of double-advancing.
        let result = sqlx::query(
            r#"
            UPDATE exchanges
            SET last_updated_block = $2,
                cur_eth_total = $3,
                cur_tokens_total = $4
            WHERE address = $1
              AND last_updated_block = $5
            "#,
        )
        .bind(to_checksum(&next.address, None))
        .bind(next.last_updated_block as i64)
        .bind(next.cur_eth_total.to_string())
        .bind(next.cur_tokens_total.to_string())
        .bind(current.last_updated_block as i64)
        .execute(&self.pool)
        .await
        .context("checkpoint update failed")?;

        if result.rows_affected() == 0 {
            bail!(
                "checkpoint for {} moved concurrently (expected block {})",
                to_checksum(&next.address, None),
                current.last_updated_block
            );
        }
        Ok(())
    }
}

#[async_trait]
impl TimestampSource for PgStore {
    async fn get_timestamps(&self, blocks: &BTreeSet<u64>) -> Result<HashMap<u64, i64>> {
        if blocks.is_empty() {
            return Ok(HashMap::new());
        }

        let wanted: Vec<i64> = blocks.iter().map(|b| *b as i64).collect();
        let rows = sqlx::query(
            r#"
            SELECT block, block_timestamp
            FROM block_timestamps
            WHERE block = ANY($1)
            "#,
        )
        .bind(&wanted)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get::<i64, _>("block") as u64,
                    row.get::<i64, _>("block_timestamp"),
                )
            })
            .collect())
    }
}
