//! Configuration loaded from environment variables.

use anyhow::Context;

use stockcount_counting::StockFilter;

pub const SEQUENCE_PREFIX_ENV: &str = "STOCKCOUNT_SEQUENCE_PREFIX";
pub const SEQUENCE_PADDING_ENV: &str = "STOCKCOUNT_SEQUENCE_PADDING";
pub const DEFAULT_STOCK_FILTER_ENV: &str = "STOCKCOUNT_DEFAULT_STOCK_FILTER";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockCountConfig {
    /// Prefix of generated session names (`SC/00001`).
    pub sequence_prefix: String,
    /// Zero-padded width of the sequence number.
    pub sequence_padding: usize,
    /// Filter policy for sessions created without an explicit one.
    pub default_stock_filter: StockFilter,
}

impl Default for StockCountConfig {
    fn default() -> Self {
        Self {
            sequence_prefix: "SC/".to_string(),
            sequence_padding: 5,
            default_stock_filter: StockFilter::Available,
        }
    }
}

impl StockCountConfig {
    /// Read the process environment; unset variables keep their defaults.
    ///
    /// - `STOCKCOUNT_SEQUENCE_PREFIX` (default `SC/`)
    /// - `STOCKCOUNT_SEQUENCE_PADDING` (default `5`)
    /// - `STOCKCOUNT_DEFAULT_STOCK_FILTER`: `available` | `include_zero` (default `available`)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(prefix) = lookup(SEQUENCE_PREFIX_ENV) {
            config.sequence_prefix = prefix;
        }

        if let Some(raw) = lookup(SEQUENCE_PADDING_ENV) {
            config.sequence_padding = raw
                .trim()
                .parse()
                .with_context(|| format!("{SEQUENCE_PADDING_ENV} must be a non-negative integer, got '{raw}'"))?;
        }

        if let Some(raw) = lookup(DEFAULT_STOCK_FILTER_ENV) {
            config.default_stock_filter = raw
                .parse()
                .with_context(|| format!("invalid {DEFAULT_STOCK_FILTER_ENV}"))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = StockCountConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StockCountConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = StockCountConfig::from_lookup(lookup(&[
            (SEQUENCE_PREFIX_ENV, "INV-"),
            (SEQUENCE_PADDING_ENV, "3"),
            (DEFAULT_STOCK_FILTER_ENV, "include_zero"),
        ]))
        .unwrap();
        assert_eq!(config.sequence_prefix, "INV-");
        assert_eq!(config.sequence_padding, 3);
        assert_eq!(config.default_stock_filter, StockFilter::IncludeZero);
    }

    #[test]
    fn malformed_values_are_reported() {
        let err = StockCountConfig::from_lookup(lookup(&[(SEQUENCE_PADDING_ENV, "five")])).unwrap_err();
        assert!(err.to_string().contains(SEQUENCE_PADDING_ENV));

        let err = StockCountConfig::from_lookup(lookup(&[(DEFAULT_STOCK_FILTER_ENV, "all")])).unwrap_err();
        assert!(err.to_string().contains(DEFAULT_STOCK_FILTER_ENV));
    }
}
