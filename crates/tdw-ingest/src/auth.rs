//! Source credentials
//!
//! Source configuration files reference the API key as the literal
//! `{api_key}`. Before a source is ingested, every occurrence is replaced with
//! the value of `<SOURCE_NAME>_KEY` from the environment.

use crate::config::SourceConfig;
use crate::error::{IngestError, Result};
use crate::fetch::HttpSettings;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Placeholder substituted with the source API key
pub const API_KEY_PLACEHOLDER: &str = "{api_key}";

/// Replace `{api_key}` in every string, recursively through objects and arrays.
pub fn replace_api_key(value: Value, api_key: &str) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace(API_KEY_PLACEHOLDER, api_key)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| replace_api_key(item, api_key))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, replace_api_key(v, api_key)))
                .collect(),
        ),
        other => other,
    }
}

/// Environment variable holding a source's API key, e.g. `RAPID_YAHOO_KEY`
pub fn api_key_env_var(source: &str) -> String {
    format!("{}_KEY", source.to_uppercase())
}

/// Look up a source's API key. Unset and empty are both errors.
pub fn resolve_api_key(source: &str) -> Result<String> {
    let var = api_key_env_var(source);
    match std::env::var(&var) {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(IngestError::config(format!(
            "Variable {} not found in environment variables",
            var
        ))),
    }
}

/// A source configuration bound to its runtime credentials
#[derive(Debug, Clone, PartialEq)]
pub struct ApiAuth {
    source: String,
    config: SourceConfig,
}

impl ApiAuth {
    /// Substitute `api_key` into a raw configuration document and type it.
    pub fn bind(source: impl Into<String>, raw: Value, api_key: &str) -> Result<Self> {
        let source = source.into();
        let config = SourceConfig::from_value(replace_api_key(raw, api_key))?;
        debug!(source = %source, "Bound source credentials");
        Ok(Self { source, config })
    }

    /// Load `<datasets_dir>/<source>/config.yaml` and bind the key from the
    /// environment.
    pub fn from_env(datasets_dir: impl AsRef<Path>, source: &str) -> Result<Self> {
        let raw = SourceConfig::load_raw(datasets_dir, source)?;
        let api_key = resolve_api_key(source)?;
        Self::bind(source, raw, &api_key)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn get_config(&self) -> &SourceConfig {
        &self.config
    }

    /// A named header set; missing or empty sets are a configuration error.
    pub fn header_set(&self, name: &str) -> Result<&BTreeMap<String, String>> {
        self.config
            .headers
            .get(name)
            .filter(|set| !set.is_empty())
            .ok_or_else(|| {
                IngestError::config(format!(
                    "Missing headers '{}' in source configuration for {}",
                    name, self.source
                ))
            })
    }

    /// HTTP settings for the source using the named header set.
    pub fn http_settings(&self, header_set: &str) -> Result<HttpSettings> {
        let base_url = self
            .config
            .variables
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                IngestError::config(format!(
                    "Missing 'variables.base_url' in source configuration for {}",
                    self.source
                ))
            })?;

        Ok(HttpSettings {
            base_url: base_url.to_string(),
            headers: self.header_set(header_set)?.clone(),
            timeout: Duration::from_secs(self.config.variables.timeout),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;

    fn raw_config() -> Value {
        json!({
            "variables": {"base_url": "https://yahoo.example.com", "timeout": 12},
            "headers": {
                "rapidapi": {
                    "x-rapidapi-key": "{api_key}",
                    "x-rapidapi-host": "yahoo.example.com"
                }
            }
        })
    }

    #[test]
    fn test_replace_api_key_is_recursive() {
        let value = json!({
            "a": "{api_key}",
            "b": ["x-{api_key}-y", {"c": "{api_key}{api_key}"}],
            "d": 1,
            "e": null
        });

        assert_eq!(
            replace_api_key(value, "K"),
            json!({"a": "K", "b": ["x-K-y", {"c": "KK"}], "d": 1, "e": null})
        );
    }

    #[test]
    fn test_api_key_env_var() {
        assert_eq!(api_key_env_var("rapid_yahoo"), "RAPID_YAHOO_KEY");
    }

    #[test]
    #[serial]
    fn test_resolve_api_key() {
        std::env::set_var("TESTSRC_KEY", "secret");
        assert_eq!(resolve_api_key("testsrc").unwrap(), "secret");

        std::env::set_var("TESTSRC_KEY", "");
        assert!(resolve_api_key("testsrc").unwrap_err().is_configuration());

        std::env::remove_var("TESTSRC_KEY");
        let err = resolve_api_key("testsrc").unwrap_err();
        assert!(err.to_string().contains("TESTSRC_KEY"));
    }

    #[test]
    fn test_http_settings_from_bound_config() {
        let auth = ApiAuth::bind("rapid_yahoo", raw_config(), "secret").unwrap();
        let settings = auth.http_settings("rapidapi").unwrap();

        assert_eq!(auth.source(), "rapid_yahoo");
        assert_eq!(auth.get_config().variables.timeout, 12);

        assert_eq!(settings.base_url, "https://yahoo.example.com");
        assert_eq!(settings.headers["x-rapidapi-key"], "secret");
        assert_eq!(settings.timeout, Duration::from_secs(12));
    }

    #[test]
    fn test_missing_header_set_is_configuration_error() {
        let auth = ApiAuth::bind("rapid_yahoo", raw_config(), "secret").unwrap();
        assert!(auth.http_settings("other").unwrap_err().is_configuration());
    }

    #[test]
    fn test_empty_header_set_is_configuration_error() {
        let raw = json!({
            "variables": {"base_url": "https://yahoo.example.com"},
            "headers": {"rapidapi": {}}
        });
        let auth = ApiAuth::bind("rapid_yahoo", raw, "secret").unwrap();

        assert!(auth.header_set("rapidapi").unwrap_err().is_configuration());
        assert!(auth.http_settings("rapidapi").unwrap_err().is_configuration());
    }

    #[test]
    fn test_missing_base_url_is_configuration_error() {
        let raw = json!({"headers": {"rapidapi": {"k": "v"}}});
        let auth = ApiAuth::bind("rapid_yahoo", raw, "secret").unwrap();
        assert!(auth.http_settings("rapidapi").unwrap_err().is_configuration());
    }

    #[test]
    #[serial]
    fn test_from_env_loads_and_binds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("rapid_yahoo")).unwrap();
        std::fs::write(
            SourceConfig::path(dir.path(), "rapid_yahoo"),
            serde_yaml::to_string(&raw_config()).unwrap(),
        )
        .unwrap();

        std::env::set_var("RAPID_YAHOO_KEY", "from-env");
        let auth = ApiAuth::from_env(dir.path(), "rapid_yahoo");
        std::env::remove_var("RAPID_YAHOO_KEY");

        let auth = auth.unwrap();
        assert_eq!(auth.header_set("rapidapi").unwrap()["x-rapidapi-key"], "from-env");
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        fn json_without_placeholder() -> impl Strategy<Value = Value> {
            let leaf = prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(Value::from),
                "[a-z_ -]{0,12}".prop_map(Value::String),
            ];

            leaf.prop_recursive(4, 64, 6, |inner| {
                prop_oneof![
                    proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                    proptest::collection::btree_map("[a-z]{1,6}", inner, 0..6)
                        .prop_map(|m| Value::Object(m.into_iter().collect())),
                ]
            })
        }

        proptest! {
            #[test]
            fn replace_without_placeholder_is_identity(value in json_without_placeholder()) {
                prop_assert_eq!(replace_api_key(value.clone(), "secret"), value);
            }

            #[test]
            fn replace_is_idempotent(value in json_without_placeholder()) {
                let once = replace_api_key(value, "secret");
                prop_assert_eq!(replace_api_key(once.clone(), "secret"), once);
            }
        }
    }
}
