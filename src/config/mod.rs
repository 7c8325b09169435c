//! Cache settings on disk
//!
//! Settings live in `config.toml` under the platform config dir. A missing
//! file means defaults; a present but malformed file is an error naming the
//! file.

pub mod schema;

pub use schema::CacheConfig;

use crate::billing::service::BillingService;
use crate::error::{BillingError, BillingResult};
use crate::logging;
use crate::queries::BillingQueries;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

/// Reads and writes one `config.toml`
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Settings file of the current user
    pub fn user() -> Self {
        Self::at(Self::default_config_path())
    }

    pub fn at(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// `<config dir>/billing-cache/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("billing-cache")
            .join("config.toml")
    }

    /// Current settings; defaults when the file does not exist
    pub async fn load(&self) -> BillingResult<CacheConfig> {
        let content = match fs::read_to_string(&self.config_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "No cache settings at {}, using defaults",
                    self.config_path.display()
                );
                return Ok(CacheConfig::default());
            }
            Err(e) => {
                let context = format!("reading cache settings from {}", self.config_path.display());
                return Err(BillingError::io(context, e));
            }
        };

        toml::from_str(&content).map_err(|e| BillingError::ConfigInvalid {
            path: self.config_path.clone(),
            reason: e.to_string(),
        })
    }

    /// Write `config`, creating the parent directory as needed
    pub async fn save(&self, config: &CacheConfig) -> BillingResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BillingError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            let context = format!("writing cache settings to {}", self.config_path.display());
            BillingError::io(context, e)
        })?;

        info!("Cache settings saved to {}", self.config_path.display());
        Ok(())
    }

    /// Load settings, install logging, and start a query session on `service`
    ///
    /// Logging is only installed if the host has no global subscriber yet.
    pub async fn open_session(
        &self,
        service: Arc<dyn BillingService>,
    ) -> BillingResult<BillingQueries> {
        let config = self.load().await?;
        logging::init(&config.logging);
        info!(
            "Billing cache session on {} ({} read attempts)",
            service.service_name(),
            config.retry.max_attempts
        );
        Ok(BillingQueries::from_config(service, &config))
    }
}
