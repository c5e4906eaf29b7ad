//! Typed view of the marketplace listings endpoint: page queries, cursors, and
//! the order payload fields the sync engine depends on.
//!
//! Wire payloads are decoded into [`RawOrder`] one order at a time so a single
//! malformed listing never poisons the rest of its page.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Unix timestamp in seconds.
pub type Timestamp = i64;

/// Largest page the listings endpoint serves.
pub const MAX_PAGE_SIZE: usize = 50;

/// Opaque pagination token handed out by the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Cursor {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    CreatedDate,
}

impl OrderBy {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderBy::CreatedDate => "created_date",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderDirection::Asc => "asc",
            OrderDirection::Desc => "desc",
        }
    }
}

/// Parameters of a single listings request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub order_by: OrderBy,
    pub direction: OrderDirection,
    pub limit: usize,
    pub cursor: Option<Cursor>,
    pub listed_after: Option<Timestamp>,
    pub listed_before: Option<Timestamp>,
}

impl PageQuery {
    /// Newest listings first, ordered by creation date.
    pub fn newest_first(limit: usize) -> Self {
        Self {
            order_by: OrderBy::CreatedDate,
            direction: OrderDirection::Desc,
            limit: limit.clamp(1, MAX_PAGE_SIZE),
            cursor: None,
            listed_after: None,
            listed_before: None,
        }
    }

    pub fn with_cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn listed_between(mut self, after: Option<Timestamp>, before: Option<Timestamp>) -> Self {
        self.listed_after = after;
        self.listed_before = before;
        self
    }

    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("order_by", self.order_by.as_str().to_owned()),
            ("order_direction", self.direction.as_str().to_owned()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(cursor) = &self.cursor {
            pairs.push(("cursor", cursor.as_str().to_owned()));
        }
        if let Some(after) = self.listed_after {
            pairs.push(("listed_after", after.to_string()));
        }
        if let Some(before) = self.listed_before {
            pairs.push(("listed_before", before.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferItem {
    pub item_type: u8,
    pub token: String,
    #[serde(deserialize_with = "string_or_number")]
    pub identifier_or_criteria: String,
    #[serde(deserialize_with = "string_or_number")]
    pub start_amount: String,
    #[serde(deserialize_with = "string_or_number")]
    pub end_amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsiderationItem {
    pub item_type: u8,
    pub token: String,
    #[serde(deserialize_with = "string_or_number")]
    pub identifier_or_criteria: String,
    #[serde(deserialize_with = "string_or_number")]
    pub start_amount: String,
    #[serde(deserialize_with = "string_or_number")]
    pub end_amount: String,
    pub recipient: String,
}

/// Seaport order parameters as published by the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderParameters {
    pub offerer: String,
    #[serde(default)]
    pub zone: String,
    pub offer: Vec<OfferItem>,
    #[serde(default)]
    pub consideration: Vec<ConsiderationItem>,
    #[serde(default)]
    pub order_type: u8,
    #[serde(default, deserialize_with = "string_or_number")]
    pub start_time: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub end_time: String,
    #[serde(default)]
    pub zone_hash: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub salt: String,
    #[serde(default)]
    pub conduit_key: String,
    #[serde(default)]
    pub total_original_consideration_items: u32,
    #[serde(default, deserialize_with = "string_or_number")]
    pub counter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolData {
    pub parameters: OrderParameters,
    #[serde(default)]
    pub signature: Option<String>,
}

/// A well-formed listing as returned by the marketplace.
///
/// Hash and maker are lowercased on construction and the offer is guaranteed
/// non-empty, so a persistable record can always be derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOrder {
    hash: String,
    maker: String,
    created_at: DateTime<Utc>,
    protocol_data: ProtocolData,
}

impl RawOrder {
    pub fn new(
        hash: impl Into<String>,
        maker: impl Into<String>,
        created_at: DateTime<Utc>,
        protocol_data: ProtocolData,
    ) -> Result<Self> {
        let hash = hash.into().trim().to_ascii_lowercase();
        let maker = maker.into().trim().to_ascii_lowercase();

        if hash.is_empty() {
            bail!("order hash cannot be empty");
        }
        if maker.is_empty() {
            bail!("order {hash} has no maker address");
        }
        if protocol_data.parameters.offer.is_empty() {
            bail!("order {hash} offers no items");
        }

        Ok(Self {
            hash,
            maker,
            created_at,
            protocol_data,
        })
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn maker(&self) -> &str {
        &self.maker
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn protocol_data(&self) -> &ProtocolData {
        &self.protocol_data
    }

    pub fn parameters(&self) -> &OrderParameters {
        &self.protocol_data.parameters
    }

    /// Token address of the first offered item, as published.
    pub fn first_offer_token(&self) -> &str {
        self.protocol_data
            .parameters
            .offer
            .first()
            .map(|item| item.token.as_str())
            .unwrap_or_default()
    }
}

/// One page of listings after wire decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderPage {
    pub orders: Vec<RawOrder>,
    pub next: Option<Cursor>,
    /// Wire orders dropped because they could not be turned into a [`RawOrder`].
    pub malformed: usize,
}

impl OrderPage {
    pub fn new(orders: Vec<RawOrder>, next: Option<Cursor>) -> Self {
        Self {
            orders,
            next,
            malformed: 0,
        }
    }

    pub(crate) fn from_wire(page: WirePage) -> Self {
        let mut orders = Vec::with_capacity(page.orders.len());
        let mut malformed = 0usize;

        for (index, value) in page.orders.into_iter().enumerate() {
            match decode_wire_order(value) {
                Ok(order) => orders.push(order),
                Err(err) => {
                    malformed += 1;
                    tracing::warn!(index, error = %err, "dropping malformed listing from page");
                }
            }
        }

        let next = page
            .next
            .filter(|token| !token.trim().is_empty())
            .map(Cursor::new);

        Self {
            orders,
            next,
            malformed,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WirePage {
    #[serde(default)]
    orders: Vec<Value>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireOrder {
    order_hash: String,
    created_date: String,
    maker: WireAccount,
    protocol_data: ProtocolData,
}

#[derive(Debug, Deserialize)]
struct WireAccount {
    address: String,
}

fn decode_wire_order(value: Value) -> Result<RawOrder> {
    let wire: WireOrder = serde_json::from_value(value).context("listing does not match schema")?;
    let created_at = parse_created_date(&wire.created_date)?;
    RawOrder::new(
        wire.order_hash,
        wire.maker.address,
        created_at,
        wire.protocol_data,
    )
}

/// Parses the marketplace `created_date`, which is either RFC 3339 or a naive
/// UTC timestamp with fractional seconds.
pub fn parse_created_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .with_context(|| format!("invalid created_date {value:?}"))?;
    Ok(Utc.from_utc_datetime(&naive))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire_order(hash: &str) -> Value {
        json!({
            "order_hash": hash,
            "created_date": "2022-06-14T17:44:45.543224",
            "maker": { "address": "0xABCDEFabcdefABCDEFabcdefABCDEFabcdefABCD" },
            "protocol_data": {
                "parameters": {
                    "offerer": "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd",
                    "offer": [{
                        "itemType": 2,
                        "token": "0x1111111111111111111111111111111111111111",
                        "identifierOrCriteria": "42",
                        "startAmount": "1",
                        "endAmount": 1
                    }],
                    "consideration": [],
                    "orderType": 0,
                    "startTime": 1655228685,
                    "endTime": "1657820685",
                    "counter": 0
                },
                "signature": null
            }
        })
    }

    #[test]
    fn query_pairs_include_optional_filters() {
        let query = PageQuery::newest_first(50)
            .with_cursor(Some(Cursor::from("abc")))
            .listed_between(Some(999), Some(1061));
        let pairs = query.to_query_pairs();
        assert!(pairs.contains(&("order_by", "created_date".to_owned())));
        assert!(pairs.contains(&("order_direction", "desc".to_owned())));
        assert!(pairs.contains(&("cursor", "abc".to_owned())));
        assert!(pairs.contains(&("listed_after", "999".to_owned())));
        assert!(pairs.contains(&("listed_before", "1061".to_owned())));
    }

    #[test]
    fn tip_query_omits_window_and_cursor() {
        let pairs = PageQuery::newest_first(500).to_query_pairs();
        assert_eq!(pairs.len(), 3);
        assert!(pairs.contains(&("limit", MAX_PAGE_SIZE.to_string())));
    }

    #[test]
    fn decodes_page_and_lowercases_identifiers() {
        let page: WirePage = serde_json::from_value(json!({
            "orders": [wire_order("0xDEADBEEF")],
            "next": "cursor-2"
        }))
        .unwrap();
        let page = OrderPage::from_wire(page);

        assert_eq!(page.malformed, 0);
        assert_eq!(page.next, Some(Cursor::from("cursor-2")));
        let order = &page.orders[0];
        assert_eq!(order.hash(), "0xdeadbeef");
        assert_eq!(order.maker(), "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd");
        assert_eq!(order.parameters().start_time, "1655228685");
        assert_eq!(order.parameters().offer[0].end_amount, "1");
    }

    #[test]
    fn malformed_orders_are_dropped_without_failing_page() {
        let mut missing_offer = wire_order("0x02");
        missing_offer["protocol_data"]["parameters"]["offer"] = json!([]);
        let mut bad_date = wire_order("0x03");
        bad_date["created_date"] = json!("yesterday");

        let page: WirePage = serde_json::from_value(json!({
            "orders": [wire_order("0x01"), missing_offer, bad_date, {"unexpected": true}],
            "next": null
        }))
        .unwrap();
        let page = OrderPage::from_wire(page);

        assert_eq!(page.orders.len(), 1);
        assert_eq!(page.malformed, 3);
        assert!(page.next.is_none());
    }

    #[test]
    fn blank_next_cursor_means_exhausted() {
        let page: WirePage = serde_json::from_value(json!({ "orders": [], "next": "  " })).unwrap();
        assert!(OrderPage::from_wire(page).next.is_none());
    }

    #[test]
    fn created_date_accepts_naive_and_rfc3339() {
        let naive = parse_created_date("2022-06-14T17:44:45.543224").unwrap();
        let zoned = parse_created_date("2022-06-14T17:44:45.543224Z").unwrap();
        assert_eq!(naive, zoned);
        assert!(parse_created_date("not a date").is_err());
    }
}
