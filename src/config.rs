use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct Config {
    pub table_name: String,
    pub region: Option<String>,
    /// Overrides the DynamoDB endpoint, e.g. `http://localhost:8000`.
    pub endpoint: Option<String>,
    pub bucket: Option<String>,
    pub ipify_key: Option<String>,
    pub idle_threshold: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |name: &str| get(name).filter(|v| !v.trim().is_empty());

        let table_name =
            non_empty("TABLE_NAME").ok_or_else(|| Error::Config("TABLE_NAME is not set".into()))?;

        let idle_threshold = match non_empty("IDLE_THRESHOLD_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| Error::Config(format!("IDLE_THRESHOLD_SECS={raw} is not a number")))?,
            None => DEFAULT_IDLE_THRESHOLD,
        };

        Ok(Self {
            table_name,
            region: non_empty("REGION_NAME"),
            endpoint: non_empty("DYNAMO_ENDPOINT"),
            bucket: non_empty("BUCKET_NAME"),
            ipify_key: non_empty("IPIFY_KEY"),
            idle_threshold,
        })
    }

    pub fn for_table(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            region: None,
            endpoint: None,
            bucket: None,
            ipify_key: None,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn table_name_is_required() {
        let err = Config::from_lookup(env(&[("REGION_NAME", "us-east-1")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(env(&[("TABLE_NAME", "analytics")])).unwrap();
        assert_eq!(config.table_name, "analytics");
        assert_eq!(config.idle_threshold, Duration::from_secs(1800));
        assert!(config.endpoint.is_none());
    }

    #[test]
    fn idle_threshold_must_be_numeric() {
        let err = Config::from_lookup(env(&[
            ("TABLE_NAME", "analytics"),
            ("IDLE_THRESHOLD_SECS", "half an hour"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config = Config::from_lookup(env(&[
            ("TABLE_NAME", "analytics"),
            ("IDLE_THRESHOLD_SECS", "600"),
            ("DYNAMO_ENDPOINT", "http://localhost:8000"),
        ]))
        .unwrap();
        assert_eq!(config.idle_threshold, Duration::from_secs(600));
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:8000"));
    }
}
