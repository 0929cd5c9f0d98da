use ethers::types::{Address, H256, I256};
use serde::{Deserialize, Serialize};

/// Decimal-string serde for signed 256-bit amounts. Wei-scale values overflow
/// i64 and `I256`'s own `FromStr` parses hex, so amounts travel as decimal
/// strings (the same representation the trade-history store uses).
pub mod i256_dec {
    use ethers::types::I256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &I256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<I256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        I256::from_dec_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// Lossy conversion for rate math; exact integer arithmetic stays in I256.
pub fn i256_to_f64(value: I256) -> f64 {
    value.to_string().parse().unwrap_or(f64::NAN)
}

/// The closed set of events an exchange contract emits. `Transfer` and
/// `Approval` are recognized only to be skipped; they never become trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    TokenPurchase,
    EthPurchase,
    AddLiquidity,
    RemoveLiquidity,
    Transfer,
    Approval,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "TokenPurchase" => Some(Self::TokenPurchase),
            "EthPurchase" => Some(Self::EthPurchase),
            "AddLiquidity" => Some(Self::AddLiquidity),
            "RemoveLiquidity" => Some(Self::RemoveLiquidity),
            "Transfer" => Some(Self::Transfer),
            "Approval" => Some(Self::Approval),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenPurchase => "TokenPurchase",
            Self::EthPurchase => "EthPurchase",
            Self::AddLiquidity => "AddLiquidity",
            Self::RemoveLiquidity => "RemoveLiquidity",
            Self::Transfer => "Transfer",
            Self::Approval => "Approval",
        }
    }

    /// Actual swaps, as opposed to liquidity add/remove.
    pub fn is_swap(&self) -> bool {
        matches!(self, Self::TokenPurchase | Self::EthPurchase)
    }
}

/// One raw log entry as returned by the ledger. Topic 0 is the event's topic
/// hash; topics 1.. are the indexed arguments, left-padded to 32 bytes.
#[derive(Debug, Clone)]
pub struct RawLog {
    pub topics: Vec<H256>,
    pub block_number: u64,
    pub transaction_hash: H256,
    pub transaction_index: u64,
}

/// A decoded trade row. `eth`/`tokens` are signed pool deltas; the
/// `cur_*_total` snapshots are filled in by the crawl engine, which is the
/// only place the running totals live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub event: EventKind,
    pub tx_hash: String,
    pub tx_index: u64,
    /// block * 10000 + tx_index; unique and monotonic within a crawl since
    /// transaction indexes stay below 10000.
    pub tx_order: i64,
    #[serde(with = "i256_dec")]
    pub eth: I256,
    #[serde(with = "i256_dec")]
    pub tokens: I256,
    #[serde(with = "i256_dec")]
    pub cur_eth_total: I256,
    #[serde(with = "i256_dec")]
    pub cur_tokens_total: I256,
    pub user: String,
    pub block: u64,
    pub timestamp: i64,
    pub day: String,
    pub month: String,
    pub year: String,
}

/// Per-exchange crawl cursor plus running reserve totals. Read-modify-write
/// is serialized by a conditional update keyed on `last_updated_block`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeCheckpoint {
    pub address: Address,
    /// 0 means "never crawled"; the engine substitutes the genesis block.
    pub last_updated_block: u64,
    pub cur_eth_total: I256,
    pub cur_tokens_total: I256,
}

impl ExchangeCheckpoint {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            last_updated_block: 0,
            cur_eth_total: I256::zero(),
            cur_tokens_total: I256::zero(),
        }
    }
}

/// Exchange metadata surfaced alongside ticker stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeInfo {
    pub address: Address,
    pub symbol: String,
    pub theme: Option<String>,
}

/// No-data sentinels for a window with zero trades. Callers must treat these
/// as "no data", not as prices. IEEE infinities are avoided so cached entries
/// survive a JSON round trip.
pub const NO_RATE: f64 = -1.0;
pub const NO_HIGH_PRICE: f64 = -1.0;
pub const NO_LOW_PRICE: f64 = f64::MAX;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerStats {
    pub start_rate: f64,
    pub end_rate: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub weighted_avg_price: f64,
    #[serde(with = "i256_dec")]
    pub eth_volume: I256,
    pub last_trade_price: f64,
    #[serde(with = "i256_dec")]
    pub last_trade_eth_qty: I256,
    #[serde(with = "i256_dec")]
    pub last_trade_erc20_qty: I256,
    pub num_transactions: u64,
}

impl TickerStats {
    pub fn empty() -> Self {
        Self {
            start_rate: NO_RATE,
            end_rate: NO_RATE,
            high_price: NO_HIGH_PRICE,
            low_price: NO_LOW_PRICE,
            weighted_avg_price: 0.0,
            eth_volume: I256::zero(),
            last_trade_price: 0.0,
            last_trade_eth_qty: I256::zero(),
            last_trade_erc20_qty: I256::zero(),
            num_transactions: 0,
        }
    }
}

/// Cached ticker computation, valid for the configured cache duration from
/// `last_updated`. Stale entries are recomputed from scratch, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerCacheEntry {
    pub exchange: String,
    pub last_updated: i64,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(flatten)]
    pub stats: TickerStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_name_round_trip() {
        for kind in [
            EventKind::TokenPurchase,
            EventKind::EthPurchase,
            EventKind::AddLiquidity,
            EventKind::RemoveLiquidity,
            EventKind::Transfer,
            EventKind::Approval,
        ] {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_name("Swap"), None);
    }

    #[test]
    fn only_purchases_are_swaps() {
        assert!(EventKind::TokenPurchase.is_swap());
        assert!(EventKind::EthPurchase.is_swap());
        assert!(!EventKind::AddLiquidity.is_swap());
        assert!(!EventKind::RemoveLiquidity.is_swap());
    }

    #[test]
    fn trade_record_amounts_serialize_as_decimal_strings() {
        let record = TradeRecord {
            event: EventKind::EthPurchase,
            tx_hash: "0xabc".to_string(),
            tx_index: 3,
            tx_order: 70_000_003,
            eth: I256::from(-125),
            tokens: I256::from(50),
            cur_eth_total: I256::from(875),
            cur_tokens_total: I256::from(1050),
            user: "0x0000000000000000000000000000000000000001".to_string(),
            block: 7000,
            timestamp: 1_546_300_800,
            day: "2019-01-01".to_string(),
            month: "2019-01".to_string(),
            year: "2019".to_string(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["eth"], "-125");
        assert_eq!(json["tokens"], "50");
        assert_eq!(json["cur_eth_total"], "875");

        let back: TradeRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn i256_to_f64_handles_sign() {
        assert_eq!(i256_to_f64(I256::from(-1000)), -1000.0);
        assert_eq!(i256_to_f64(I256::from(900)), 900.0);
    }
}
