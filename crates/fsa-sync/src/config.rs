use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use fsa_adapters::{UnhandledInputPolicy, PROSECUTION_OUTCOMES_URL};
use fsa_core::KeyColumn;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub source_url: String,
    pub database_path: PathBuf,
    pub key_column: KeyColumn,
    pub unhandled_input: UnhandledInputPolicy,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub google_api_key: Option<String>,
    pub schedule_cron: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_url: PROSECUTION_OUTCOMES_URL.to_string(),
            database_path: PathBuf::from("./data.sqlite"),
            key_column: KeyColumn::Link,
            unhandled_input: UnhandledInputPolicy::Abort,
            user_agent: "fsa-prosecutions/0.1".to_string(),
            http_timeout_secs: 30,
            google_api_key: None,
            schedule_cron: "0 0 6 * * *".to_string(),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable lookup; unset or blank variables keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let key_column = match var("FSA_KEY_COLUMN") {
            Some(v) => v
                .parse::<KeyColumn>()
                .map_err(|e| anyhow!(e))
                .context("FSA_KEY_COLUMN")?,
            None => defaults.key_column,
        };
        let unhandled_input = match var("FSA_UNHANDLED_INPUT") {
            Some(v) => v
                .parse::<UnhandledInputPolicy>()
                .map_err(|e| anyhow!(e))
                .context("FSA_UNHANDLED_INPUT")?,
            None => defaults.unhandled_input,
        };
        let http_timeout_secs = match var("FSA_HTTP_TIMEOUT_SECS") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .with_context(|| format!("FSA_HTTP_TIMEOUT_SECS={v}"))?,
            None => defaults.http_timeout_secs,
        };

        Ok(Self {
            source_url: var("FSA_SOURCE_URL").unwrap_or(defaults.source_url),
            database_path: var("FSA_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            key_column,
            unhandled_input,
            user_agent: var("FSA_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs,
            google_api_key: var("MORPH_GOOGLE_API_KEY"),
            schedule_cron: var("FSA_SCHEDULE_CRON").unwrap_or(defaults.schedule_cron),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<IngestConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IngestConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.source_url, PROSECUTION_OUTCOMES_URL);
        assert_eq!(config.key_column, KeyColumn::Link);
        assert_eq!(config.unhandled_input, UnhandledInputPolicy::Abort);
        assert!(config.google_api_key.is_none());
    }

    #[test]
    fn variables_override_defaults() {
        let config = from_pairs(&[
            ("FSA_KEY_COLUMN", "identifier"),
            ("FSA_UNHANDLED_INPUT", "skip"),
            ("FSA_DATABASE_PATH", "/var/lib/fsa/data.sqlite"),
            ("FSA_HTTP_TIMEOUT_SECS", "5"),
            ("MORPH_GOOGLE_API_KEY", "secret"),
        ])
        .unwrap();
        assert_eq!(config.key_column, KeyColumn::Identifier);
        assert_eq!(config.unhandled_input, UnhandledInputPolicy::SkipField);
        assert_eq!(config.database_path, PathBuf::from("/var/lib/fsa/data.sqlite"));
        assert_eq!(config.http_timeout_secs, 5);
        assert_eq!(config.google_api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(from_pairs(&[("FSA_KEY_COLUMN", "rowid")]).is_err());
        assert!(from_pairs(&[("FSA_UNHANDLED_INPUT", "maybe")]).is_err());
        assert!(from_pairs(&[("FSA_HTTP_TIMEOUT_SECS", "soon")]).is_err());
    }
}
