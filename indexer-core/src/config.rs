use anyhow::Result;
use serde::Deserialize;

use crate::crawl::{
    DEFAULT_GENESIS_BLOCK, DEFAULT_MAX_BLOCKS_TO_CRAWL, DEFAULT_SAFETY_MARGIN_BLOCKS,
};
use crate::ticker::{CACHE_DURATION_SECONDS, TICKER_WINDOW_HOURS};

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    pub environment: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub rpc_url: String,
    #[serde(default = "default_genesis_block")]
    pub genesis_block: u64,
    #[serde(default = "default_max_blocks_to_crawl")]
    pub max_blocks_to_crawl: u64,
    #[serde(default = "default_safety_margin_blocks")]
    pub safety_margin_blocks: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    #[serde(default = "default_recrawl_secs")]
    pub default_recrawl_secs: u64,
    /// Exchange addresses seeded into the crawl loop at startup.
    #[serde(default)]
    pub exchanges: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: u8,
    pub password: String,
    pub key_prefix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TickerConfig {
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
    #[serde(default = "default_cache_duration_secs")]
    pub cache_duration_secs: i64,
}

fn default_genesis_block() -> u64 {
    DEFAULT_GENESIS_BLOCK
}

fn default_max_blocks_to_crawl() -> u64 {
    DEFAULT_MAX_BLOCKS_TO_CRAWL
}

fn default_safety_margin_blocks() -> u64 {
    DEFAULT_SAFETY_MARGIN_BLOCKS
}

fn default_recrawl_secs() -> u64 {
    300
}

fn default_window_hours() -> i64 {
    TICKER_WINDOW_HOURS
}

fn default_cache_duration_secs() -> i64 {
    CACHE_DURATION_SECONDS
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub runtime: RuntimeConfig,
    pub api: ApiConfig,
    pub db: DbConfig,
    pub ledger: LedgerConfig,
    pub crawler: CrawlerConfig,
    pub redis: RedisConfig,
    pub ticker: TickerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        // Load base config from `config/default.(toml|yaml|json)` relative to
        // the working directory (the workspace root), then override with
        // `TICKER__...` environment variables.
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("TICKER").separator("__"))
            .build()?;

        settings.try_deserialize().map_err(Into::into)
    }
}
