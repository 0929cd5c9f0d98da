use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use ethers::types::Address;
use indexer_core::{
    abi::SchemaRegistry,
    cache::RedisCacheStore,
    config::AppConfig,
    crawl::{CrawlConfig, CrawlEngine},
    db::{create_pool, run_migrations, PgStore},
    error::{CrawlError, TickerError},
    models::{i256_to_f64, ExchangeCheckpoint, TickerCacheEntry, NO_RATE},
    rpc::{CachingTimestampSource, EthLedgerClient},
    scheduler::DelayedCrawlScheduler,
    store::ExchangeStore,
    ticker::{marginal_rate, TickerService},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

type Engine = CrawlEngine<
    EthLedgerClient,
    CachingTimestampSource,
    PgStore,
    PgStore,
    DelayedCrawlScheduler,
>;

type Ticker = TickerService<PgStore, RedisCacheStore, fn(f64, f64) -> f64>;

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    ticker: Arc<Ticker>,
    store: PgStore,
    default_recrawl_secs: u64,
}

async fn health() -> &'static str {
    "ok"
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({ "error": message })))
}

#[derive(Debug, Deserialize)]
struct CrawlQuery {
    exchange: Option<String>,
    #[serde(rename = "recrawlTime")]
    recrawl_time: Option<String>,
}

async fn crawl_handler(
    State(state): State<AppState>,
    Query(q): Query<CrawlQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let Some(raw_address) = q.exchange else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "missing parameter: exchange",
        ));
    };

    let exchange: Address = raw_address.parse().map_err(|_| {
        error_response(StatusCode::BAD_REQUEST, "invalid exchange address")
    })?;

    let recrawl_secs = match q.recrawl_time {
        Some(raw) => raw.parse::<u64>().map_err(|_| {
            error_response(StatusCode::BAD_REQUEST, "invalid parameter: recrawlTime")
        })?,
        None => state.default_recrawl_secs,
    };

    let outcome = state
        .engine
        .crawl_once(exchange, recrawl_secs)
        .await
        .map_err(|e| match e {
            CrawlError::UnknownExchange(_) => error_response(
                StatusCode::NOT_FOUND,
                "no exchange found for this address",
            ),
            other => {
                tracing::error!(%exchange, error = %other, "crawl failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &other.to_string())
            }
        })?;

    Ok(Json(json!({
        "fromBlock": outcome.from_block,
        "toBlock": outcome.to_block,
        "rowsInserted": outcome.rows_inserted,
        "lastUpdatedBlock": outcome.last_updated_block,
    })))
}

#[derive(Debug, Deserialize)]
struct TickerQuery {
    #[serde(rename = "exchangeAddress")]
    exchange_address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TickerResponse {
    symbol: String,
    start_time: i64,
    end_time: i64,
    price: f64,
    inv_price: f64,
    high_price: f64,
    low_price: f64,
    weighted_avg_price: f64,
    price_change: f64,
    price_change_percent: f64,
    eth_liquidity: String,
    erc20_liquidity: String,
    last_trade_price: f64,
    last_trade_eth_qty: String,
    last_trade_erc20_qty: String,
    trade_volume: String,
    count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    theme: Option<String>,
}

fn ticker_response(
    symbol: String,
    theme: Option<String>,
    checkpoint: &ExchangeCheckpoint,
    entry: &TickerCacheEntry,
) -> TickerResponse {
    let eth_liquidity = i256_to_f64(checkpoint.cur_eth_total);
    let erc20_liquidity = i256_to_f64(checkpoint.cur_tokens_total);

    // Spot price from the current reserve ratio; meaningless (and division by
    // zero) while an exchange has no token reserve, so fall back to the
    // no-data sentinel.
    let (price, inv_price) = if erc20_liquidity > 0.0 && eth_liquidity > 0.0 {
        let rate = marginal_rate(eth_liquidity, erc20_liquidity);
        (rate, 1.0 / rate)
    } else {
        (NO_RATE, NO_RATE)
    };

    let stats = &entry.stats;
    let price_change = stats.end_rate - stats.start_rate;
    let price_change_percent = if stats.start_rate > 0.0 {
        price_change / stats.start_rate
    } else {
        0.0
    };

    TickerResponse {
        symbol,
        start_time: entry.start_time,
        end_time: entry.end_time,
        price,
        inv_price,
        high_price: stats.high_price,
        low_price: stats.low_price,
        weighted_avg_price: stats.weighted_avg_price,
        price_change,
        price_change_percent,
        eth_liquidity: checkpoint.cur_eth_total.to_string(),
        erc20_liquidity: checkpoint.cur_tokens_total.to_string(),
        last_trade_price: stats.last_trade_price,
        last_trade_eth_qty: stats.last_trade_eth_qty.to_string(),
        last_trade_erc20_qty: stats.last_trade_erc20_qty.to_string(),
        trade_volume: stats.eth_volume.to_string(),
        count: stats.num_transactions,
        theme,
    }
}

async fn ticker_handler(
    State(state): State<AppState>,
    Query(q): Query<TickerQuery>,
) -> Result<Json<TickerResponse>, (StatusCode, Json<serde_json::Value>)> {
    let Some(raw_address) = q.exchange_address else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "missing parameter: exchangeAddress",
        ));
    };

    let exchange: Address = raw_address.parse().map_err(|_| {
        error_response(StatusCode::BAD_REQUEST, "invalid exchange address")
    })?;

    let info = state
        .store
        .get_exchange(exchange)
        .await
        .map_err(|e| {
            tracing::error!(%exchange, error = %e, "exchange lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "exchange lookup failed")
        })?
        .ok_or_else(|| {
            error_response(StatusCode::NOT_FOUND, "no exchange found for this address")
        })?;

    let checkpoint = state
        .store
        .get_checkpoint(exchange)
        .await
        .map_err(|e| {
            tracing::error!(%exchange, error = %e, "checkpoint lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "checkpoint lookup failed")
        })?
        .ok_or_else(|| {
            error_response(StatusCode::NOT_FOUND, "no exchange found for this address")
        })?;

    let now = Utc::now().timestamp();
    let entry = state
        .ticker
        .refresh_if_stale(exchange, now)
        .await
        .map_err(|e| match e {
            TickerError::UnknownExchange(_) => error_response(
                StatusCode::NOT_FOUND,
                "no exchange found for this address",
            ),
            TickerError::Store(err) => {
                tracing::error!(%exchange, error = %err, "ticker refresh failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "ticker refresh failed")
            }
        })?;

    Ok(Json(ticker_response(info.symbol, info.theme, &checkpoint, &entry)))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.db.url, config.db.max_connections).await?;
    run_migrations(&pool).await?;
    let store = PgStore::new(pool);

    let cache = RedisCacheStore::new(
        &config.redis.host,
        config.redis.port,
        config.redis.db,
        &config.redis.password,
        config.redis.key_prefix.clone(),
    )
    .await?;

    let ledger = EthLedgerClient::new(&config.ledger.rpc_url)?;
    let timestamps = CachingTimestampSource::new(store.clone(), ledger.provider());
    let (scheduler, mut crawl_rx) = DelayedCrawlScheduler::new(1024);

    let engine = Arc::new(CrawlEngine::new(
        ledger,
        timestamps,
        store.clone(),
        store.clone(),
        scheduler,
        SchemaRegistry::uniswap_v1()?,
        CrawlConfig {
            genesis_block: config.ledger.genesis_block,
            max_blocks_to_crawl: config.ledger.max_blocks_to_crawl,
            safety_margin_blocks: config.ledger.safety_margin_blocks,
        },
    ));

    let ticker = Arc::new(TickerService::new(
        store.clone(),
        cache,
        marginal_rate as fn(f64, f64) -> f64,
        config.ticker.window_hours,
        config.ticker.cache_duration_secs,
    ));

    // Background worker: drains the scheduler channel so crawls triggered via
    // the endpoint keep re-crawling on their own cadence.
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            while let Some(request) = crawl_rx.recv().await {
                if let Err(e) = engine.crawl_once(request.exchange, request.recrawl_secs).await {
                    tracing::error!(
                        exchange = %request.exchange,
                        error = %e,
                        "scheduled crawl failed; chain for this exchange stops"
                    );
                }
            }
        });
    }

    let state = AppState {
        engine,
        ticker,
        store,
        default_recrawl_secs: config.crawler.default_recrawl_secs,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/tasks/crawl", get(crawl_handler))
        .route("/ticker", get(ticker_handler))
        .with_state(state);

    let addr: SocketAddr = config.api.bind_addr.parse()?;
    tracing::info!("Starting API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
