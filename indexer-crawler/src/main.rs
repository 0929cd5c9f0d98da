use anyhow::{Context, Result};
use ethers::types::Address;
use indexer_core::{
    abi::SchemaRegistry,
    config::AppConfig,
    crawl::{CrawlConfig, CrawlEngine},
    db::{create_pool, run_migrations, PgStore},
    rpc::{CachingTimestampSource, EthLedgerClient},
    scheduler::DelayedCrawlScheduler,
    store::{CrawlRequest, Scheduler},
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env()?;

    tracing::info!("Starting crawler with config: {:?}", config.runtime);

    let pool = create_pool(&config.db.url, config.db.max_connections).await?;
    run_migrations(&pool).await?;
    let store = PgStore::new(pool);

    let ledger = EthLedgerClient::new(&config.ledger.rpc_url)?;
    let timestamps = CachingTimestampSource::new(store.clone(), ledger.provider());
    let (scheduler, mut crawl_rx) = DelayedCrawlScheduler::new(1024);

    let engine = CrawlEngine::new(
        ledger,
        timestamps,
        store.clone(),
        store.clone(),
        scheduler.clone(),
        SchemaRegistry::uniswap_v1()?,
        CrawlConfig {
            genesis_block: config.ledger.genesis_block,
            max_blocks_to_crawl: config.ledger.max_blocks_to_crawl,
            safety_margin_blocks: config.ledger.safety_margin_blocks,
        },
    );

    // Register the configured exchanges and kick off their crawl chains. The
    // symbol defaults to the address until a proper listing is attached.
    for raw in &config.crawler.exchanges {
        let exchange: Address = raw
            .parse()
            .with_context(|| format!("invalid exchange address in config: {raw}"))?;

        store.register_exchange(exchange, raw, None).await?;
        scheduler.schedule_delayed(
            Duration::from_secs(0),
            CrawlRequest {
                exchange,
                recrawl_secs: config.crawler.default_recrawl_secs,
            },
        );
    }

    tracing::info!(
        exchanges = config.crawler.exchanges.len(),
        "crawl worker running"
    );

    while let Some(request) = crawl_rx.recv().await {
        match engine
            .crawl_once(request.exchange, request.recrawl_secs)
            .await
        {
            Ok(outcome) => {
                tracing::info!(
                    exchange = %request.exchange,
                    from_block = outcome.from_block,
                    to_block = outcome.to_block,
                    rows = outcome.rows_inserted,
                    "crawl cycle complete"
                );
            }
            Err(e) => {
                tracing::error!(
                    exchange = %request.exchange,
                    error = %e,
                    "crawl failed; re-trigger via the crawl endpoint to resume"
                );
            }
        }
    }

    Ok(())
}
