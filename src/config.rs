//! Layered settings: built-in defaults, then an optional `gasledger.toml`,
//! then `GASLEDGER__*` environment variables.

use crate::application::dispatch::FundingOrder;
use crate::domain::rates::RateTable;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

pub const CONFIG_FILE: &str = "gasledger";
pub const CONFIG_ENV_PREFIX: &str = "GASLEDGER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Upper bound on one collection request. A slower answer fails the
    /// payment.
    pub timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            api_key: None,
            timeout_ms: 10_000,
        }
    }
}

impl GatewaySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// RocksDB directory. In-memory storage when unset.
    pub db_path: Option<PathBuf>,
}

/// A buyer allowed to order from a counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApprovedPair {
    pub buyer_id: Uuid,
    pub counterparty_id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationSettings {
    /// Approves every buyer/counterparty pair. Off unless set.
    pub allow_all: bool,
    pub approved: Vec<ApprovedPair>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub gateway: GatewaySettings,
    pub rates: RateTable,
    pub funding: FundingOrder,
    pub storage: StorageSettings,
    pub authorization: AuthorizationSettings,
}

impl Settings {
    /// Loads settings, reading `path` instead of `gasledger.toml` when given.
    ///
    /// A `.env` file in the working directory is applied to the process
    /// environment first.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        use config::{Config, Environment, File};

        dotenv::dotenv().ok();

        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(CONFIG_FILE).required(false),
        };
        let settings: Settings = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        self.rates.validate().map_err(config::ConfigError::Message)?;
        if self.gateway.timeout_ms == 0 {
            return Err(config::ConfigError::Message(
                "gateway.timeout_ms must be positive".to_string(),
            ));
        }
        if self.funding.card_primary == self.funding.card_secondary {
            return Err(config::ConfigError::Message(
                "funding.card_primary and funding.card_secondary must differ".to_string(),
            ));
        }
        Ok(())
    }
}
