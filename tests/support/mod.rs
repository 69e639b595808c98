use std::sync::Arc;

use dashmap::DashMap;
use edgefeed::discovery::KnownAssets;
use edgefeed::market::MarketInfo;

#[allow(dead_code)]
pub fn known_assets(markets: &[MarketInfo]) -> KnownAssets {
    let map: KnownAssets = Arc::new(DashMap::new());
    for info in markets {
        map.insert(info.asset_id.clone(), Arc::new(info.clone()));
    }
    map
}

#[allow(dead_code)]
pub fn market(asset_id: &str, event_slug: &str, market_title: &str, outcome: &str) -> MarketInfo {
    MarketInfo::new(asset_id, event_slug, market_title, "Some Event", "cond-1", outcome)
}
