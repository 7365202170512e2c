//! Provider configuration.
//!
//! Every default lives in the `default_*` functions below.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// Shared settings for a rate limiter provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Prefix applied to every key
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Tag telling apart providers that share a codec registry
    #[serde(default)]
    pub transformer_name: String,

    /// Count only failed operations instead of every call
    #[serde(default)]
    pub only_error: bool,

    /// Record failures in the background in `only_error` mode
    #[serde(default = "default_async_tracking")]
    pub async_tracking: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            transformer_name: String::new(),
            only_error: false,
            async_tracking: default_async_tracking(),
        }
    }
}

fn default_namespace() -> String {
    "@rate-limiter".to_string()
}

fn default_async_tracking() -> bool {
    true
}

impl ProviderConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading provider configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}
