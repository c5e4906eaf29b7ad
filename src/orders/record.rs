use crate::market::types::{ProtocolData, RawOrder};
use crate::orders::parser::ParsedOrder;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSource {
    OpenSea,
}

impl RecordSource {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordSource::OpenSea => "opensea",
        }
    }
}

/// Row written to the order store, derived from every well-formed listing
/// whether or not it parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistableRecord {
    pub hash: String,
    pub target_contract: String,
    pub maker: String,
    pub created_at: DateTime<Utc>,
    pub raw_data: ProtocolData,
    pub source: RecordSource,
}

impl PersistableRecord {
    /// Uses the parsed contract when available, otherwise the first offered
    /// token.
    pub fn derive(raw: &RawOrder, parsed: Option<&ParsedOrder>, source: RecordSource) -> Self {
        let target_contract = parsed
            .map(|order| order.info().contract.as_str())
            .unwrap_or_else(|| raw.first_offer_token())
            .to_ascii_lowercase();

        Self {
            hash: raw.hash().to_ascii_lowercase(),
            target_contract,
            maker: raw.maker().to_ascii_lowercase(),
            created_at: raw.created_at(),
            raw_data: raw.protocol_data().clone(),
            source,
        }
    }

    pub fn raw_json(&self) -> Result<String> {
        serde_json::to_string(&self.raw_data)
            .with_context(|| format!("failed to encode protocol data for order {}", self.hash))
    }
}
