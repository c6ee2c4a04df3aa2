// Configuration structs

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::{McpError, McpResult};
use crate::mcp::config::ProviderConfig;

/// Gateway HTTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl GatewaySettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4000
}

/// Root configuration: the gateway and its provider list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: GatewaySettings,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Settings {
    /// Validate every provider entry and reject duplicate ids up front, so
    /// a bad file fails at load time rather than mid-registration.
    pub fn validate(&self) -> McpResult<()> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !seen.insert(provider.id.as_str()) {
                return Err(McpError::Configuration(format!(
                    "duplicate provider id '{}'",
                    provider.id
                )));
            }
        }
        Ok(())
    }
}
