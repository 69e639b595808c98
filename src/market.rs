//! Shared market metadata: `MarketInfo` and the slug derivation it relies on.

/// Immutable descriptor of one tradable outcome (one CLOB token).
///
/// Once inserted into [`crate::discovery::MarketDiscovery::known_assets`]
/// under an `asset_id`, a record is never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketInfo {
    pub asset_id: String,
    pub event_slug: String,
    pub market_title: String,
    pub event_title: String,
    pub condition_id: String,
    pub outcome_label: String,
    pub market_slug: String,
}

impl MarketInfo {
    pub fn new(
        asset_id: impl Into<String>,
        event_slug: impl Into<String>,
        market_title: impl Into<String>,
        event_title: impl Into<String>,
        condition_id: impl Into<String>,
        outcome_label: impl Into<String>,
    ) -> Self {
        let market_title = market_title.into();
        let market_slug = slugify(&market_title);
        Self {
            asset_id: asset_id.into(),
            event_slug: event_slug.into(),
            market_title,
            event_title: event_title.into(),
            condition_id: condition_id.into(),
            outcome_label: outcome_label.into(),
            market_slug,
        }
    }

    /// Relative path under the data directory this market's candles live at,
    /// e.g. `<event_slug>/<market_slug>.parquet`.
    pub fn relative_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.event_slug).join(format!("{}.parquet", self.market_slug))
    }
}

/// Lowercase `text`, replace every run of non-`[a-z0-9-]` with `-`, collapse
/// repeated `-`, trim *trailing* `-` only; an empty result becomes
/// `unknown`. A leading `-` is preserved when the source title starts with
/// a non-alphanumeric run, matching the original `_slugify`'s `rstrip("-")`.
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_was_dash = false;
    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// The first 16 characters of an asset id, used for the `unknown/` fallback
/// file name when no [`MarketInfo`] is known for it.
pub fn asset_id_prefix(asset_id: &str) -> String {
    asset_id.chars().take(16).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("Will it rain tomorrow?"), "will-it-rain-tomorrow");
    }

    #[test]
    fn slugify_collapses_runs() {
        assert_eq!(slugify("A  --  B"), "a-b");
    }

    #[test]
    fn slugify_trims_trailing_dash() {
        assert_eq!(slugify("Hello!!!"), "hello");
    }

    #[test]
    fn slugify_empty_becomes_unknown() {
        assert_eq!(slugify(""), "unknown");
        assert_eq!(slugify("???"), "unknown");
    }

    #[test]
    fn market_slug_matches_invariant() {
        let re_chars = |s: &str| {
            s == "unknown"
                || (!s.is_empty()
                    && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                    && !s.ends_with('-')
                    && !s.contains("--"))
        };
        for title in ["Will X happen?", "", "???", "Multi   Word   Title---"] {
            let info = MarketInfo::new("a1", "evt", title, "Event", "cond1", "yes");
            assert!(re_chars(&info.market_slug), "bad slug: {}", info.market_slug);
        }
    }

    #[test]
    fn slugify_preserves_leading_dash_from_nonalnum_prefix() {
        assert_eq!(slugify("!!!Rain tomorrow"), "-rain-tomorrow");
    }
}
