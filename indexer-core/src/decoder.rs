// Log decoder: one raw log plus the schema registry in, one typed trade
// record (or a skip signal) out. Pure; the block timestamp is injected by the
// caller since only the crawl engine has the batched lookup.

use chrono::{TimeZone, Utc};
use ethers::types::{Address, I256, U256};
use ethers::utils::to_checksum;

use crate::abi::{FieldType, SchemaRegistry, SemanticField};
use crate::error::DecodeError;
use crate::models::{EventKind, RawLog, TradeRecord};

/// Transaction indexes are assumed to stay below this, which makes
/// `block * 10000 + tx_index` a total order key.
pub const TX_ORDER_BLOCK_FACTOR: i64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Trade(TradeRecord),
    /// Non-trade event (Transfer/Approval) or a log whose block has no
    /// timestamp yet; never an error.
    Skip,
}

/// Sign policy as a closed table: a field is negated exactly when the pool's
/// balance of that asset decreases for the event.
fn negates(kind: EventKind, field: &SemanticField) -> bool {
    matches!(
        (kind, field),
        (EventKind::EthPurchase, SemanticField::Eth)
            | (EventKind::RemoveLiquidity, SemanticField::Eth)
            | (EventKind::TokenPurchase, SemanticField::Tokens)
            | (EventKind::RemoveLiquidity, SemanticField::Tokens)
    )
}

pub fn decode_log(
    registry: &SchemaRegistry,
    log: &RawLog,
    block_timestamp: Option<i64>,
) -> Result<Decoded, DecodeError> {
    let event_topic = log.topics.first().ok_or(DecodeError::MissingTopics)?;
    let topic = format!("{:x}", event_topic);
    let schema = registry
        .lookup(&topic)
        .ok_or(DecodeError::UnknownTopic(topic))?;

    if matches!(schema.kind, EventKind::Transfer | EventKind::Approval) {
        return Ok(Decoded::Skip);
    }

    let Some(timestamp) = block_timestamp else {
        return Ok(Decoded::Skip);
    };
    let Some(block_date) = Utc.timestamp_opt(timestamp, 0).single() else {
        return Ok(Decoded::Skip);
    };

    let args = &log.topics[1..];
    if args.len() != schema.fields.len() {
        return Err(DecodeError::ArityMismatch {
            expected: schema.fields.len(),
            got: args.len(),
        });
    }

    let mut eth = I256::zero();
    let mut tokens = I256::zero();
    let mut user = String::new();

    for (word, (field_type, field)) in args.iter().zip(&schema.fields) {
        match field_type {
            FieldType::Address => {
                // Addresses occupy the low 20 bytes of the 32-byte word.
                let address = Address::from_slice(&word.as_bytes()[12..]);
                if *field == SemanticField::User {
                    user = to_checksum(&address, None);
                }
            }
            FieldType::Uint256 => {
                let raw = U256::from_big_endian(word.as_bytes());
                let mut value =
                    I256::try_from(raw).map_err(|_| DecodeError::ValueOutOfRange)?;
                if negates(schema.kind, field) {
                    value = -value;
                }
                match field {
                    SemanticField::Eth => eth = value,
                    SemanticField::Tokens => tokens = value,
                    _ => {}
                }
            }
        }
    }

    Ok(Decoded::Trade(TradeRecord {
        event: schema.kind,
        tx_hash: format!("{:#x}", log.transaction_hash),
        tx_index: log.transaction_index,
        tx_order: log.block_number as i64 * TX_ORDER_BLOCK_FACTOR
            + log.transaction_index as i64,
        eth,
        tokens,
        // Running totals are filled in by the crawl engine.
        cur_eth_total: I256::zero(),
        cur_tokens_total: I256::zero(),
        user,
        block: log.block_number,
        timestamp,
        day: block_date.format("%Y-%m-%d").to_string(),
        month: block_date.format("%Y-%m").to_string(),
        year: block_date.format("%Y").to_string(),
    }))
}
