//! Market discovery (C2): resolves query prefixes into a growing set of
//! `(asset_id -> MarketInfo)`, published as a read-mostly snapshot other
//! components can query concurrently.

mod response;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client as HttpClient;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::market::MarketInfo;
use response::{normalize_outcome, EventDetail, GammaEvent, SearchResponse};

const GAMMA_BASE: &str = "https://gamma-api.polymarket.com";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);
const DETAIL_TIMEOUT: Duration = Duration::from_secs(8);
const MAX_PAGES: u32 = 3;

/// Read-mostly, concurrently-readable view of known markets. Cheap to clone
/// (it's an `Arc` around a `DashMap`); shared between Discovery, Aggregator
/// and Writer.
pub type KnownAssets = Arc<DashMap<String, Arc<MarketInfo>>>;

/// Resolves `market_queries` into tracked `(asset_id, MarketInfo)` pairs.
///
/// Intended to be driven from a single task (the orchestrator); `discover`
/// is idempotent and safe to call repeatedly on a timer.
pub struct MarketDiscovery {
    http: HttpClient,
    known_assets: KnownAssets,
    /// `(event lookup key, slugified market title) -> cached clobTokenIds`.
    detail_cache: DashMap<(String, String), Option<Vec<String>>>,
}

impl MarketDiscovery {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
            known_assets: Arc::new(DashMap::new()),
            detail_cache: DashMap::new(),
        }
    }

    /// A cheap, cloneable read-mostly snapshot handle shared with other
    /// components.
    pub fn known_assets(&self) -> KnownAssets {
        self.known_assets.clone()
    }

    /// Run discovery for every query, returning newly added `MarketInfo`s.
    /// Per-query network failures are logged and skipped; they never abort
    /// discovery for the remaining queries.
    pub async fn discover(&self, queries: &[String]) -> Vec<MarketInfo> {
        let mut discovered = Vec::new();

        for query in queries {
            let events = match self.search_events(query).await {
                Ok(events) => events,
                Err(e) => {
                    warn!(query = %query, error = %e, "discovery query failed, skipping");
                    continue;
                }
            };

            for event in events {
                if !event.has_open_market() {
                    continue;
                }
                let new_from_event = self.extract_tokens(&event).await;
                discovered.extend(new_from_event);
            }
        }

        discovered
    }

    /// Walk up to [`MAX_PAGES`] pages of the public-search endpoint, stopping
    /// early once any page yields an event with an open market.
    async fn search_events(&self, query: &str) -> Result<Vec<GammaEvent>> {
        let mut open_events = Vec::new();

        for page in 1..=MAX_PAGES {
            let url = format!("{GAMMA_BASE}/public-search");
            let query_params: Vec<(&str, String)> = vec![
                ("q", query.to_string()),
                ("limit_per_type", "50".to_string()),
                ("optimized", "true".to_string()),
                ("sort", "startTime".to_string()),
                ("ascending", "false".to_string()),
                ("events_status", "active".to_string()),
                ("keep_closed_markets", "0".to_string()),
                ("page", page.to_string()),
            ];
            let response = self
                .http
                .get(&url)
                .timeout(SEARCH_TIMEOUT)
                .query(&query_params)
                .send()
                .await?
                .error_for_status()?;

            let parsed: SearchResponse = response.json().await?;
            for event in parsed.events {
                if event.has_open_market() {
                    open_events.push(event);
                }
            }

            if !open_events.is_empty() {
                break;
            }
        }

        Ok(open_events)
    }

    async fn extract_tokens(&self, event: &GammaEvent) -> Vec<MarketInfo> {
        let mut new_markets = Vec::new();

        for market in &event.markets {
            if market.is_closed() {
                continue;
            }

            let market_title = market.title();
            let mut token_ids: Vec<String> = market
                .clob_token_ids
                .as_ref()
                .map(|v| v.clone().into_values())
                .unwrap_or_default()
                .into_iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect();

            let outcome_values = market
                .outcomes
                .as_ref()
                .map(|v| v.clone().into_values())
                .unwrap_or_default();

            if token_ids.is_empty() {
                match self.fetch_market_details(&event.lookup_key(), &market_title).await {
                    Ok(Some(ids)) => token_ids = ids,
                    Ok(None) => {}
                    Err(e) => {
                        debug!(event = %event.slug, error = %e, "detail fetch failed");
                    }
                }
            }

            for (i, token_id) in token_ids.into_iter().enumerate() {
                let token_id = token_id.trim().to_string();
                if token_id.is_empty() || self.known_assets.contains_key(&token_id) {
                    continue;
                }

                let outcome = outcome_values
                    .get(i)
                    .map(normalize_outcome)
                    .unwrap_or_default();

                let info = Arc::new(MarketInfo::new(
                    token_id.clone(),
                    event.slug.clone(),
                    market_title.clone(),
                    event.title.clone(),
                    market.condition_id.clone(),
                    outcome,
                ));

                info!(
                    event = %info.event_title,
                    market = %info.market_title,
                    outcome = %info.outcome_label,
                    "discovered market"
                );

                self.known_assets.insert(token_id, info.clone());
                new_markets.push((*info).clone());
            }
        }

        new_markets
    }

    /// `GET <gamma>/events/<slug-or-id>`, returning the `clobTokenIds` for
    /// the market matching `market_title` (or the event's first market).
    /// Cached for the process lifetime.
    async fn fetch_market_details(
        &self,
        event_key: &str,
        market_title: &str,
    ) -> Result<Option<Vec<String>>> {
        let cache_key = (event_key.to_string(), crate::market::slugify(market_title));
        if let Some(cached) = self.detail_cache.get(&cache_key) {
            return Ok(cached.clone());
        }

        let url = format!("{GAMMA_BASE}/events/{event_key}");
        let detail: EventDetail = self
            .http
            .get(&url)
            .timeout(DETAIL_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let target_slug = crate::market::slugify(market_title);
        let found = detail
            .markets
            .iter()
            .find(|m| crate::market::slugify(&m.title()) == target_slug)
            .or_else(|| detail.markets.first());

        let token_ids = found.and_then(|m| m.clob_token_ids.as_ref()).map(|v| {
            v.clone()
                .into_values()
                .into_iter()
                .map(|val| match val {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect()
        });

        self.detail_cache.insert(cache_key, token_ids.clone());
        Ok(token_ids)
    }
}

impl Default for MarketDiscovery {
    fn default() -> Self {
        Self::new()
    }
}
