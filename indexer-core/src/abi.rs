// Event schema registry: maps topic hashes to typed, semantically-named
// field lists for one exchange contract interface. Built once at startup and
// treated as read-only shared data from then on.

use std::collections::HashMap;

use ethers::types::H256;
use ethers::utils::keccak256;
use serde::Deserialize;

use crate::error::SchemaError;
use crate::models::EventKind;

/// One event input as it appears in a JSON ABI.
#[derive(Debug, Clone, Deserialize)]
pub struct EventInput {
    #[serde(rename = "type")]
    pub solidity_type: String,
    pub name: String,
}

/// One event of the interface description, in declaration order. Field order
/// must match topic order since decoding is positional.
#[derive(Debug, Clone, Deserialize)]
pub struct EventDescriptor {
    pub name: String,
    pub inputs: Vec<EventInput>,
}

impl EventDescriptor {
    pub fn new(name: &str, inputs: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            inputs: inputs
                .iter()
                .map(|(solidity_type, name)| EventInput {
                    solidity_type: solidity_type.to_string(),
                    name: name.to_string(),
                })
                .collect(),
        }
    }

    /// Canonical signature string, e.g. `RemoveLiquidity(address,uint256,uint256)`.
    pub fn signature(&self) -> String {
        let types: Vec<&str> = self
            .inputs
            .iter()
            .map(|input| input.solidity_type.as_str())
            .collect();
        format!("{}({})", self.name, types.join(","))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Address,
    Uint256,
}

impl FieldType {
    fn parse(raw: &str) -> Result<Self, SchemaError> {
        match raw {
            "address" => Ok(Self::Address),
            "uint256" => Ok(Self::Uint256),
            other => Err(SchemaError::UnsupportedType(other.to_string())),
        }
    }
}

/// Semantic field name after normalization of the raw ABI argument name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticField {
    Eth,
    Tokens,
    User,
    Other(String),
}

fn normalize_name(raw: &str) -> SemanticField {
    if raw.contains("eth") {
        SemanticField::Eth
    } else if raw.contains("token") {
        SemanticField::Tokens
    } else if raw.contains("buyer") || raw.contains("provider") {
        SemanticField::User
    } else {
        SemanticField::Other(raw.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct EventSchema {
    pub kind: EventKind,
    pub fields: Vec<(FieldType, SemanticField)>,
}

/// Immutable topic-hash lookup table. Keys are lowercase hex digests of the
/// canonical signature string, without the `0x` prefix.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    by_topic: HashMap<String, EventSchema>,
}

impl SchemaRegistry {
    pub fn from_events(events: &[EventDescriptor]) -> Result<Self, SchemaError> {
        let mut by_topic = HashMap::new();

        for descriptor in events {
            let kind = EventKind::from_name(&descriptor.name)
                .ok_or_else(|| SchemaError::UnknownEvent(descriptor.name.clone()))?;

            let mut fields = Vec::with_capacity(descriptor.inputs.len());
            for input in &descriptor.inputs {
                fields.push((
                    FieldType::parse(&input.solidity_type)?,
                    normalize_name(&input.name),
                ));
            }

            let topic = topic_hash(&descriptor.signature());
            if by_topic.insert(topic.clone(), EventSchema { kind, fields }).is_some() {
                return Err(SchemaError::DuplicateTopic(topic));
            }
        }

        Ok(Self { by_topic })
    }

    /// The Uniswap V1 exchange interface. Every event argument is indexed, so
    /// all values arrive as topics and decoding is purely positional.
    pub fn uniswap_v1() -> Result<Self, SchemaError> {
        Self::from_events(&[
            EventDescriptor::new(
                "TokenPurchase",
                &[
                    ("address", "buyer"),
                    ("uint256", "eth_sold"),
                    ("uint256", "tokens_bought"),
                ],
            ),
            EventDescriptor::new(
                "EthPurchase",
                &[
                    ("address", "buyer"),
                    ("uint256", "tokens_sold"),
                    ("uint256", "eth_bought"),
                ],
            ),
            EventDescriptor::new(
                "AddLiquidity",
                &[
                    ("address", "provider"),
                    ("uint256", "eth_amount"),
                    ("uint256", "token_amount"),
                ],
            ),
            EventDescriptor::new(
                "RemoveLiquidity",
                &[
                    ("address", "provider"),
                    ("uint256", "eth_amount"),
                    ("uint256", "token_amount"),
                ],
            ),
            EventDescriptor::new(
                "Transfer",
                &[
                    ("address", "_from"),
                    ("address", "_to"),
                    ("uint256", "_value"),
                ],
            ),
            EventDescriptor::new(
                "Approval",
                &[
                    ("address", "_owner"),
                    ("address", "_spender"),
                    ("uint256", "_value"),
                ],
            ),
        ])
    }

    pub fn lookup(&self, topic: &str) -> Option<&EventSchema> {
        self.by_topic.get(topic)
    }

    pub fn len(&self) -> usize {
        self.by_topic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_topic.is_empty()
    }
}

/// Lowercase hex keccak-256 digest of a canonical signature, no `0x` prefix.
pub fn topic_hash(signature: &str) -> String {
    format!("{:x}", H256::from(keccak256(signature.as_bytes())))
}
