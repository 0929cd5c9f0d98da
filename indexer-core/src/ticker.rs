// Rolling-window ticker: a pure fold over decoded trades plus a time-bound
// cache gate in front of it. Pricing is an injected reserve-ratio function,
// never computed here.

use ethers::types::Address;
use ethers::utils::to_checksum;
use tracing::debug;

use crate::error::TickerError;
use crate::models::{i256_to_f64, TickerCacheEntry, TickerStats, TradeRecord};
use crate::store::{TickerCacheStore, TradeStore};

pub const CACHE_DURATION_SECONDS: i64 = 600;
pub const TICKER_WINDOW_HOURS: i64 = 24;

/// Marginal rate implied by the current reserve ratio. The default pricing
/// function; callers may inject their own.
pub fn marginal_rate(eth_reserve: f64, token_reserve: f64) -> f64 {
    eth_reserve / token_reserve
}

/// Windowed summary over `trades`, ordered oldest to newest. Swaps drive
/// volume, the weighted average and the last-trade fields; liquidity events
/// still move the rate and count toward `num_transactions`.
pub fn aggregate<F>(trades: &[TradeRecord], price_fn: &F) -> TickerStats
where
    F: Fn(f64, f64) -> f64,
{
    let mut stats = TickerStats::empty();
    let mut weighted_total = 0.0;

    for trade in trades {
        let eth_after = i256_to_f64(trade.cur_eth_total);
        let tokens_after = i256_to_f64(trade.cur_tokens_total);
        let rate_after = price_fn(eth_after, tokens_after);
        let rate_before = price_fn(
            i256_to_f64(trade.cur_eth_total - trade.eth),
            i256_to_f64(trade.cur_tokens_total - trade.tokens),
        );

        if rate_after > stats.high_price {
            stats.high_price = rate_after;
        }
        if rate_after < stats.low_price {
            stats.low_price = rate_after;
        }

        if stats.num_transactions == 0 {
            stats.start_rate = rate_before;
        }
        stats.end_rate = rate_after;
        stats.num_transactions += 1;

        if trade.event.is_swap() {
            let eth_abs = trade.eth.abs();
            stats.eth_volume = stats.eth_volume + eth_abs;
            stats.last_trade_price = rate_before;
            stats.last_trade_eth_qty = trade.eth;
            stats.last_trade_erc20_qty = trade.tokens;
            weighted_total += i256_to_f64(eth_abs) * rate_before;
        }
    }

    if !stats.eth_volume.is_zero() {
        stats.weighted_avg_price = weighted_total / i256_to_f64(stats.eth_volume);
    }

    stats
}

/// Cache gate in front of the aggregator. A fresh entry is returned verbatim,
/// recorded window included; a stale or missing one triggers a full recompute
/// and a last-writer-wins cache put.
pub struct TickerService<H, C, F> {
    history: H,
    cache: C,
    price_fn: F,
    window_hours: i64,
    cache_duration_secs: i64,
}

impl<H, C, F> TickerService<H, C, F>
where
    H: TradeStore,
    C: TickerCacheStore,
    F: Fn(f64, f64) -> f64 + Send + Sync,
{
    pub fn new(
        history: H,
        cache: C,
        price_fn: F,
        window_hours: i64,
        cache_duration_secs: i64,
    ) -> Self {
        Self {
            history,
            cache,
            price_fn,
            window_hours,
            cache_duration_secs,
        }
    }

    pub async fn refresh_if_stale(
        &self,
        exchange: Address,
        now: i64,
    ) -> Result<TickerCacheEntry, TickerError> {
        if let Some(entry) = self
            .cache
            .get_cache(exchange)
            .await
            .map_err(TickerError::Store)?
        {
            if now - entry.last_updated <= self.cache_duration_secs {
                debug!(%exchange, "ticker cache hit");
                return Ok(entry);
            }
        }

        let end_time = now;
        let start_time = now - self.window_hours * 3600;
        let trades = self
            .history
            .query_window(exchange, start_time, end_time)
            .await
            .map_err(TickerError::Store)?;

        let entry = TickerCacheEntry {
            exchange: to_checksum(&exchange, None),
            last_updated: now,
            start_time,
            end_time,
            stats: aggregate(&trades, &self.price_fn),
        };

        self.cache
            .put_cache(&entry)
            .await
            .map_err(TickerError::Store)?;

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventKind, NO_HIGH_PRICE, NO_LOW_PRICE, NO_RATE};
    use anyhow::Result;
    use async_trait::async_trait;
    use ethers::types::I256;
    use std::sync::{Arc, Mutex};

    fn trade(
        event: EventKind,
        eth: i64,
        tokens: i64,
        cur_eth: i64,
        cur_tokens: i64,
        timestamp: i64,
    ) -> TradeRecord {
        TradeRecord {
            event,
            tx_hash: format!("0x{timestamp:x}"),
            tx_index: 0,
            tx_order: timestamp * 10_000,
            eth: I256::from(eth),
            tokens: I256::from(tokens),
            cur_eth_total: I256::from(cur_eth),
            cur_tokens_total: I256::from(cur_tokens),
            user: String::new(),
            block: timestamp as u64,
            timestamp,
            day: "2019-01-01".to_string(),
            month: "2019-01".to_string(),
            year: "2019".to_string(),
        }
    }

    #[test]
    fn single_swap_worked_example() {
        // eth -100, tokens +50, reserves after 900/1050; priceFn = e/t.
        let trades = vec![trade(EventKind::EthPurchase, -100, 50, 900, 1050, 1)];
        let stats = aggregate(&trades, &marginal_rate);

        let rate_after = 900.0 / 1050.0;
        assert_eq!(stats.eth_volume, I256::from(100));
        // rateBefore = (900 + 100) / (1050 - 50) = 1.0
        assert_eq!(stats.weighted_avg_price, 1.0);
        assert_eq!(stats.start_rate, 1.0);
        assert_eq!(stats.end_rate, rate_after);
        assert_eq!(stats.high_price, rate_after);
        assert_eq!(stats.low_price, rate_after);
        assert_eq!(stats.last_trade_price, 1.0);
        assert_eq!(stats.last_trade_eth_qty, I256::from(-100));
        assert_eq!(stats.last_trade_erc20_qty, I256::from(50));
        assert_eq!(stats.num_transactions, 1);
    }

    #[test]
    fn empty_window_returns_sentinels() {
        let stats = aggregate(&[], &marginal_rate);
        assert_eq!(stats.num_transactions, 0);
        assert_eq!(stats.eth_volume, I256::zero());
        assert_eq!(stats.start_rate, NO_RATE);
        assert_eq!(stats.end_rate, NO_RATE);
        assert_eq!(stats.high_price, NO_HIGH_PRICE);
        assert_eq!(stats.low_price, NO_LOW_PRICE);
        assert_eq!(stats.weighted_avg_price, 0.0);
    }

    #[test]
    fn liquidity_events_move_rates_but_not_volume() {
        let trades = vec![
            trade(EventKind::AddLiquidity, 1000, 1000, 2000, 2000, 1),
            trade(EventKind::TokenPurchase, 100, -50, 2100, 1950, 2),
        ];
        let stats = aggregate(&trades, &marginal_rate);

        assert_eq!(stats.num_transactions, 2);
        assert_eq!(stats.eth_volume, I256::from(100));
        // start rate comes from the liquidity event's before-state.
        assert_eq!(stats.start_rate, 1.0);
        assert_eq!(stats.end_rate, 2100.0 / 1950.0);
        // last trade fields belong to the swap only.
        assert_eq!(stats.last_trade_eth_qty, I256::from(100));
    }

    #[test]
    fn last_qualifying_swap_wins() {
        let trades = vec![
            trade(EventKind::TokenPurchase, 100, -50, 1100, 950, 1),
            trade(EventKind::EthPurchase, -60, 30, 1040, 980, 2),
            trade(EventKind::RemoveLiquidity, -100, -100, 940, 880, 3),
        ];
        let stats = aggregate(&trades, &marginal_rate);

        assert_eq!(stats.last_trade_eth_qty, I256::from(-60));
        assert_eq!(stats.last_trade_erc20_qty, I256::from(30));
        assert_eq!(stats.eth_volume, I256::from(160));
        assert_eq!(stats.num_transactions, 3);
    }

    #[test]
    fn weighted_average_weighs_by_eth_quantity() {
        // Swap 1: 100 eth at before-rate 1000/1000; swap 2: 300 eth at
        // before-rate 1100/950.
        let trades = vec![
            trade(EventKind::TokenPurchase, 100, -50, 1100, 950, 1),
            trade(EventKind::TokenPurchase, 300, -150, 1400, 800, 2),
        ];
        let stats = aggregate(&trades, &marginal_rate);

        let rate1 = 1000.0 / 1000.0;
        let rate2 = 1100.0 / 950.0;
        let expected = (100.0 * rate1 + 300.0 * rate2) / 400.0;
        assert!((stats.weighted_avg_price - expected).abs() < 1e-12);
        assert_eq!(stats.eth_volume, I256::from(400));
    }

    #[test]
    fn aggregation_is_deterministic() {
        let trades = vec![
            trade(EventKind::TokenPurchase, 100, -50, 1100, 950, 1),
            trade(EventKind::EthPurchase, -60, 30, 1040, 980, 2),
        ];
        assert_eq!(
            aggregate(&trades, &marginal_rate),
            aggregate(&trades, &marginal_rate)
        );
    }

    #[derive(Clone, Default)]
    struct MockHistory {
        rows: Arc<Mutex<Vec<TradeRecord>>>,
        queries: Arc<Mutex<Vec<(i64, i64)>>>,
    }

    #[async_trait]
    impl TradeStore for MockHistory {
        async fn append_rows(&self, _exchange: Address, rows: &[TradeRecord]) -> Result<()> {
            self.rows.lock().unwrap().extend_from_slice(rows);
            Ok(())
        }

        async fn query_window(
            &self,
            _exchange: Address,
            start: i64,
            end: i64,
        ) -> Result<Vec<TradeRecord>> {
            self.queries.lock().unwrap().push((start, end));
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.timestamp >= start && t.timestamp <= end)
                .cloned()
                .collect())
        }
    }

    #[derive(Clone, Default)]
    struct MockCache {
        entry: Arc<Mutex<Option<TickerCacheEntry>>>,
    }

    #[async_trait]
    impl TickerCacheStore for MockCache {
        async fn get_cache(&self, _exchange: Address) -> Result<Option<TickerCacheEntry>> {
            Ok(self.entry.lock().unwrap().clone())
        }

        async fn put_cache(&self, entry: &TickerCacheEntry) -> Result<()> {
            *self.entry.lock().unwrap() = Some(entry.clone());
            Ok(())
        }
    }

    fn service(
        history: MockHistory,
        cache: MockCache,
    ) -> TickerService<MockHistory, MockCache, fn(f64, f64) -> f64> {
        TickerService::new(history, cache, marginal_rate, 24, 600)
    }

    fn exchange() -> Address {
        Address::from_low_u64_be(0xe1)
    }

    #[tokio::test]
    async fn fresh_cache_is_returned_verbatim() {
        let history = MockHistory::default();
        let cache = MockCache::default();
        let gate = service(history.clone(), cache.clone());

        let now = 100_000;
        history
            .append_rows(
                exchange(),
                &[trade(EventKind::TokenPurchase, 100, -50, 1100, 950, now - 10)],
            )
            .await
            .unwrap();

        let first = gate.refresh_if_stale(exchange(), now).await.unwrap();
        assert_eq!(first.last_updated, now);
        assert_eq!(first.stats.num_transactions, 1);

        // New trades arrive, but the cache is still fresh at now + 300.
        history
            .append_rows(
                exchange(),
                &[trade(EventKind::TokenPurchase, 200, -90, 1300, 860, now + 200)],
            )
            .await
            .unwrap();

        let second = gate.refresh_if_stale(exchange(), now + 300).await.unwrap();
        assert_eq!(second, first);
        // Exactly one recompute happened.
        assert_eq!(history.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_cache_triggers_recompute_with_new_trades() {
        let history = MockHistory::default();
        let cache = MockCache::default();
        let gate = service(history.clone(), cache.clone());

        let now = 100_000;
        history
            .append_rows(
                exchange(),
                &[trade(EventKind::TokenPurchase, 100, -50, 1100, 950, now - 10)],
            )
            .await
            .unwrap();
        gate.refresh_if_stale(exchange(), now).await.unwrap();

        history
            .append_rows(
                exchange(),
                &[trade(EventKind::TokenPurchase, 200, -90, 1300, 860, now + 200)],
            )
            .await
            .unwrap();

        let later = now + 601;
        let refreshed = gate.refresh_if_stale(exchange(), later).await.unwrap();
        assert_eq!(refreshed.last_updated, later);
        assert_eq!(refreshed.end_time, later);
        assert_eq!(refreshed.start_time, later - 24 * 3600);
        assert_eq!(refreshed.stats.num_transactions, 2);
    }

    #[tokio::test]
    async fn empty_window_entry_is_cacheable() {
        let gate = service(MockHistory::default(), MockCache::default());
        let entry = gate.refresh_if_stale(exchange(), 50_000).await.unwrap();
        assert_eq!(entry.stats.num_transactions, 0);
        assert_eq!(entry.stats.start_rate, NO_RATE);

        // And survives the JSON round trip the cache store performs.
        let json = serde_json::to_string(&entry).unwrap();
        let back: TickerCacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
