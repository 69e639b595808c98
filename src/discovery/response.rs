//! Gamma `/public-search` and `/events/<slug>` response shapes.
//!
//! `clobTokenIds` and `outcomes` arrive from the upstream API either as a
//! JSON array or as a JSON-encoded string containing one; the leniency for
//! that lives entirely in [`StringOrList::into_values`], keeping the rest of
//! the discovery pipeline working with plain `Vec<String>`/`Vec<Value>`.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub events: Vec<GammaEvent>,
}

#[derive(Debug, Deserialize)]
pub struct GammaEvent {
    pub slug: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(rename = "eventId", default)]
    pub event_id: Option<Value>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub markets: Vec<GammaMarket>,
}

impl GammaEvent {
    /// Identifier used to key the detail-fetch endpoint: numeric id if
    /// present, else the slug.
    pub fn lookup_key(&self) -> String {
        self.id
            .as_ref()
            .or(self.event_id.as_ref())
            .map(value_to_string)
            .unwrap_or_else(|| self.slug.clone())
    }

    pub fn has_open_market(&self) -> bool {
        self.markets.iter().any(|m| !m.closed.unwrap_or(false) && !m.archived.unwrap_or(false))
    }
}

#[derive(Debug, Deserialize)]
pub struct GammaMarket {
    pub question: Option<String>,
    #[serde(rename = "groupItemTitle")]
    pub group_item_title: Option<String>,
    #[serde(rename = "conditionId", default)]
    pub condition_id: String,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default)]
    pub archived: Option<bool>,
    #[serde(rename = "clobTokenIds", default)]
    pub clob_token_ids: Option<StringOrList>,
    #[serde(default)]
    pub outcomes: Option<StringOrList>,
}

impl GammaMarket {
    pub fn is_closed(&self) -> bool {
        self.closed.unwrap_or(false) || self.archived.unwrap_or(false)
    }

    pub fn title(&self) -> String {
        self.group_item_title
            .clone()
            .or_else(|| self.question.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct EventDetail {
    #[serde(default)]
    pub markets: Vec<GammaMarket>,
}

/// A field that the upstream API may send as a bare array, a JSON-encoded
/// string containing an array, a scalar, or omit entirely.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    List(Vec<Value>),
    Encoded(String),
    Scalar(Value),
}

impl StringOrList {
    /// Decode leniently into a flat `Vec<Value>`. A string is parsed as JSON;
    /// on parse failure it becomes a one-element list of the raw string. A
    /// non-list value (after decode) is wrapped into a singleton.
    pub fn into_values(self) -> Vec<Value> {
        match self {
            StringOrList::List(values) => values,
            StringOrList::Encoded(s) => match serde_json::from_str::<Value>(&s) {
                Ok(Value::Array(values)) => values,
                Ok(other) => vec![other],
                Err(_) => vec![Value::String(s)],
            },
            StringOrList::Scalar(v) => vec![v],
        }
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Normalize a decoded outcome value into its lowercased label.
///
/// Objects reduce to `label`/`name`/`value`/`id`; booleans become
/// `true`/`false`; numbers become their decimal form.
pub fn normalize_outcome(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Object(map) => {
            let label = map
                .get("label")
                .or_else(|| map.get("name"))
                .or_else(|| map.get("value"))
                .or_else(|| map.get("id"));
            match label {
                Some(v) => value_to_string(v).trim().to_lowercase(),
                None => value.to_string().trim().to_lowercase(),
            }
        }
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_lowercase(),
        Value::Array(_) => value.to_string().trim().to_lowercase(),
    }
}
