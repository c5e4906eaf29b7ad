//! Parser seam between raw marketplace payloads and structured Seaport orders.

use crate::market::types::{OrderParameters, RawOrder};
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;

pub type ParseFuture<'a> = BoxFuture<'a, Result<ParsedOrder, ParseFailure>>;

/// Turns a raw listing into a structured order, or explains why it cannot.
///
/// A failure never drops the listing: the caller persists a fallback record.
pub trait OrderParser: Send + Sync {
    fn parse<'a>(&'a self, raw: &'a RawOrder) -> ParseFuture<'a>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Seaport,
}

impl OrderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderKind::Seaport => "seaport",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    /// NFTs offered in exchange for payment.
    Sell,
    /// Payment offered in exchange for NFTs.
    Buy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Native,
    Erc20,
    Erc721,
    Erc1155,
    Erc721WithCriteria,
    Erc1155WithCriteria,
}

impl ItemType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ItemType::Native),
            1 => Some(ItemType::Erc20),
            2 => Some(ItemType::Erc721),
            3 => Some(ItemType::Erc1155),
            4 => Some(ItemType::Erc721WithCriteria),
            5 => Some(ItemType::Erc1155WithCriteria),
            _ => None,
        }
    }

    pub fn is_nft(self) -> bool {
        !matches!(self, ItemType::Native | ItemType::Erc20)
    }
}

/// Information extracted while validating an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderInfo {
    pub contract: String,
    pub side: OrderSide,
    pub nft_items: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOrder {
    kind: OrderKind,
    hash: String,
    info: OrderInfo,
    params: OrderParameters,
}

impl ParsedOrder {
    pub fn new(kind: OrderKind, hash: impl Into<String>, info: OrderInfo, params: OrderParameters) -> Self {
        Self {
            kind,
            hash: hash.into(),
            info,
            params,
        }
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn info(&self) -> &OrderInfo {
        &self.info
    }

    pub fn params(&self) -> &OrderParameters {
        &self.params
    }

    pub fn into_params(self) -> OrderParameters {
        self.params
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    InvalidAddress { field: &'static str, value: String },
    UnknownItemType(u8),
    OffererMismatch { offerer: String, maker: String },
    EmptyConsideration,
    NoNftItems,
    MixedCollections,
    Rejected(String),
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailure::InvalidAddress { field, value } => {
                write!(f, "{field} is not a valid address: {value:?}")
            }
            ParseFailure::UnknownItemType(code) => write!(f, "unknown item type {code}"),
            ParseFailure::OffererMismatch { offerer, maker } => {
                write!(f, "offerer {offerer} does not match maker {maker}")
            }
            ParseFailure::EmptyConsideration => write!(f, "order has no consideration items"),
            ParseFailure::NoNftItems => write!(f, "order trades no NFT items"),
            ParseFailure::MixedCollections => {
                write!(f, "order spans more than one NFT collection")
            }
            ParseFailure::Rejected(reason) => write!(f, "order rejected: {reason}"),
        }
    }
}

impl std::error::Error for ParseFailure {}

/// Structural Seaport validation. Signatures and on-chain state are not
/// checked here.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeaportParser;

impl OrderParser for SeaportParser {
    fn parse<'a>(&'a self, raw: &'a RawOrder) -> ParseFuture<'a> {
        let result = self.parse_sync(raw);
        Box::pin(async move { result })
    }
}

impl SeaportParser {
    pub fn parse_sync(&self, raw: &RawOrder) -> Result<ParsedOrder, ParseFailure> {
        let params = raw.parameters();

        let offerer = checked_address("offerer", &params.offerer)?;
        if offerer != raw.maker() {
            return Err(ParseFailure::OffererMismatch {
                offerer,
                maker: raw.maker().to_owned(),
            });
        }
        if params.consideration.is_empty() {
            return Err(ParseFailure::EmptyConsideration);
        }

        let mut offered = Vec::new();
        for item in &params.offer {
            let token = checked_address("offer token", &item.token)?;
            if item_type(item.item_type)?.is_nft() {
                offered.push(token);
            }
        }

        let mut requested = Vec::new();
        for item in &params.consideration {
            checked_address("consideration recipient", &item.recipient)?;
            let token = checked_address("consideration token", &item.token)?;
            if item_type(item.item_type)?.is_nft() {
                requested.push(token);
            }
        }

        let (side, nfts) = if !offered.is_empty() {
            (OrderSide::Sell, offered)
        } else if !requested.is_empty() {
            (OrderSide::Buy, requested)
        } else {
            return Err(ParseFailure::NoNftItems);
        };

        let contract = nfts[0].clone();
        if nfts.iter().any(|token| *token != contract) {
            return Err(ParseFailure::MixedCollections);
        }

        Ok(ParsedOrder::new(
            OrderKind::Seaport,
            raw.hash(),
            OrderInfo {
                contract,
                side,
                nft_items: nfts.len(),
            },
            params.clone(),
        ))
    }
}

fn item_type(code: u8) -> Result<ItemType, ParseFailure> {
    ItemType::from_code(code).ok_or(ParseFailure::UnknownItemType(code))
}

fn checked_address(field: &'static str, value: &str) -> Result<String, ParseFailure> {
    let lowered = value.trim().to_ascii_lowercase();
    let valid = lowered.len() == 42
        && lowered.starts_with("0x")
        && lowered[2..].bytes().all(|b| b.is_ascii_hexdigit());
    if valid {
        Ok(lowered)
    } else {
        Err(ParseFailure::InvalidAddress {
            field,
            value: value.to_owned(),
        })
    }
}
