use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{BridgeError, BridgeResult};

/// Per-bridge settings.
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct BridgeConfig {
    /// Registry key for the bridge. Must be unique within a registry.
    pub name: String,
    /// Value of `navigator.userAgent` in the guest's global object.
    pub user_agent: String,
    /// Value of `document.cookie` in the guest's global object.
    pub cookie: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            user_agent: concat!("wasmgo/", env!("CARGO_PKG_VERSION")).to_string(),
            cookie: String::new(),
        }
    }
}

impl BridgeConfig {
    /// Parse a config from JSON text.
    pub fn from_json_str(text: &str) -> BridgeResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| BridgeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    fn validate(&self) -> BridgeResult<()> {
        if self.name.trim().is_empty() {
            return Err(BridgeError::Config("bridge name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = BridgeConfig::from_json_str("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert!(config.user_agent.starts_with("wasmgo/"));
    }

    #[test]
    fn fields_are_camel_case() {
        let config =
            BridgeConfig::from_json_str(r#"{"name":"ticket","userAgent":"Blabla","cookie":"test=1"}"#)
                .unwrap();
        assert_eq!(config.name, "ticket");
        assert_eq!(config.user_agent, "Blabla");
        assert_eq!(config.cookie, "test=1");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = BridgeConfig::from_json_str(r#"{"agent":"x"}"#).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = BridgeConfig::from_json_str(r#"{"name":"  "}"#).unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = BridgeConfig::from_json_file("/nonexistent/wasmgo.json").unwrap_err();
        assert!(matches!(err, BridgeError::Io { .. }));
    }
}
