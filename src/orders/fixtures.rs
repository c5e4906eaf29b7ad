use crate::market::types::{
    ConsiderationItem, OfferItem, OrderParameters, ProtocolData, RawOrder,
};
use chrono::{TimeZone, Utc};

pub(crate) const MAKER: &str = "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd";
pub(crate) const COLLECTION: &str = "0x1111111111111111111111111111111111111111";
pub(crate) const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
const NATIVE: &str = "0x0000000000000000000000000000000000000000";

pub(crate) fn parameters() -> OrderParameters {
    OrderParameters {
        offerer: MAKER.to_owned(),
        zone: NATIVE.to_owned(),
        offer: vec![OfferItem {
            item_type: 2,
            token: COLLECTION.to_owned(),
            identifier_or_criteria: "7".to_owned(),
            start_amount: "1".to_owned(),
            end_amount: "1".to_owned(),
        }],
        consideration: vec![ConsiderationItem {
            item_type: 0,
            token: NATIVE.to_owned(),
            identifier_or_criteria: "0".to_owned(),
            start_amount: "975000000000000000".to_owned(),
            end_amount: "975000000000000000".to_owned(),
            recipient: MAKER.to_owned(),
        }],
        order_type: 0,
        start_time: "1655228685".to_owned(),
        end_time: "1657820685".to_owned(),
        zone_hash: format!("0x{}", "0".repeat(64)),
        salt: "1".to_owned(),
        conduit_key: format!("0x{}", "0".repeat(64)),
        total_original_consideration_items: 1,
        counter: "0".to_owned(),
    }
}

pub(crate) fn listing(hash: &str) -> RawOrder {
    listing_with(hash, |_| {})
}

pub(crate) fn listing_with(hash: &str, edit: impl FnOnce(&mut OrderParameters)) -> RawOrder {
    let mut params = parameters();
    edit(&mut params);
    RawOrder::new(
        hash,
        MAKER,
        Utc.with_ymd_and_hms(2023, 3, 1, 12, 0, 0).unwrap(),
        ProtocolData {
            parameters: params,
            signature: Some("0x".to_owned()),
        },
    )
    .unwrap()
}
