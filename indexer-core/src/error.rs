use ethers::types::Address;
use thiserror::Error;

/// Fatal interface-description problems, raised once at registry build time.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("duplicate topic hash {0}")]
    DuplicateTopic(String),
    #[error("event `{0}` is not part of the exchange interface")]
    UnknownEvent(String),
    #[error("unsupported input type `{0}`")]
    UnsupportedType(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingTopics,
    #[error("unknown topic hash {0}")]
    UnknownTopic(String),
    #[error("expected {expected} indexed arguments, got {got}")]
    ArityMismatch { expected: usize, got: usize },
    #[error("uint256 argument does not fit a signed 256-bit amount")]
    ValueOutOfRange,
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("no exchange found for address {0:?}")]
    UnknownExchange(Address),
    #[error("ledger fetch failed: {0}")]
    Fetch(anyhow::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("persist failed: {0}")]
    Persist(anyhow::Error),
    #[error("store error: {0}")]
    Store(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum TickerError {
    #[error("no exchange found for address {0:?}")]
    UnknownExchange(Address),
    #[error("store error: {0}")]
    Store(anyhow::Error),
}
