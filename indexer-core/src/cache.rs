// Redis-backed ticker cache: one JSON document per exchange under a prefixed
// key. The gate checks freshness itself, so entries carry no redis TTL and a
// put is a plain last-writer-wins SET.

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::Address;
use ethers::utils::to_checksum;
use redis::{aio::ConnectionManager, Client};
use tracing::info;

use crate::models::TickerCacheEntry;
use crate::store::TickerCacheStore;

#[derive(Clone)]
pub struct RedisCacheStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisCacheStore {
    pub async fn new(
        host: &str,
        port: u16,
        db: u8,
        password: &str,
        key_prefix: String,
    ) -> Result<Self> {
        let connection_string = if password.is_empty() {
            format!("redis://{}:{}/{}", host, port, db)
        } else {
            format!("redis://:{}@{}:{}/{}", password, host, port, db)
        };

        let client = Client::open(connection_string)?;
        let conn = ConnectionManager::new(client).await?;

        info!("Connected to Redis at {}:{}", host, port);

        Ok(Self { conn, key_prefix })
    }

    fn key(&self, exchange: Address) -> String {
        cache_key(&self.key_prefix, exchange)
    }
}

fn cache_key(prefix: &str, exchange: Address) -> String {
    format!("{}ticker:{}", prefix, to_checksum(&exchange, None))
}

#[async_trait]
impl TickerCacheStore for RedisCacheStore {
    async fn get_cache(&self, exchange: Address) -> Result<Option<TickerCacheEntry>> {
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(exchange))
            .query_async(&mut self.conn.clone())
            .await?;

        raw.map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }

    async fn put_cache(&self, entry: &TickerCacheEntry) -> Result<()> {
        let address: Address = entry.exchange.parse()?;
        let json = serde_json::to_string(entry)?;

        let _: () = redis::cmd("SET")
            .arg(self.key(address))
            .arg(json)
            .query_async(&mut self.conn.clone())
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TickerStats;
    use ethers::types::I256;

    #[test]
    fn cache_key_includes_prefix_and_checksummed_address() {
        let exchange = Address::from_low_u64_be(0xe1);
        let key = cache_key("indexer:", exchange);
        assert!(key.starts_with("indexer:ticker:0x"));
        assert_eq!(key, format!("indexer:ticker:{}", to_checksum(&exchange, None)));
    }

    #[test]
    fn cache_entry_json_round_trips() {
        let entry = TickerCacheEntry {
            exchange: to_checksum(&Address::from_low_u64_be(0xe1), None),
            last_updated: 100_000,
            start_time: 13_600,
            end_time: 100_000,
            stats: TickerStats {
                start_rate: 1.0,
                end_rate: 0.857,
                high_price: 1.1,
                low_price: 0.8,
                weighted_avg_price: 0.95,
                eth_volume: I256::from(12345),
                last_trade_price: 0.9,
                last_trade_eth_qty: I256::from(-100),
                last_trade_erc20_qty: I256::from(50),
                num_transactions: 7,
            },
        };

        let json = serde_json::to_string(&entry).unwrap();
        let back: TickerCacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);

        // Amounts are decimal strings on the wire.
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["eth_volume"], "12345");
        assert_eq!(value["last_trade_eth_qty"], "-100");
    }
}
