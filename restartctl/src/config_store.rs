//! Access to the live configuration for the restart sequence.
//!
//! The orchestrator needs four things from wherever configuration lives: a snapshot to fall back
//! on, a reload from source, validation of what was loaded, and restoring the snapshot. The
//! [`ConfigStore`] trait captures exactly that; [`LiveConfig`] implements it over the same
//! figment sources the process was started with.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{Args, Config};

/// A fully materialized copy of the configuration, taken before an attempt mutates anything.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    taken_at: DateTime<Utc>,
    config: Arc<Config>,
}

impl ConfigSnapshot {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            taken_at: Utc::now(),
            config,
        }
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// The configuration currently in effect.
    fn current(&self) -> Arc<Config>;

    fn snapshot(&self) -> anyhow::Result<ConfigSnapshot> {
        Ok(ConfigSnapshot::new(self.current()))
    }

    /// Re-read configuration from its source and make it current. Does not validate.
    async fn reload(&self) -> anyhow::Result<()>;

    /// Validate the configuration currently in effect.
    fn validate(&self) -> anyhow::Result<()> {
        self.current().validate().map_err(anyhow::Error::from)
    }

    /// Make `snapshot` current again.
    async fn restore(&self, snapshot: &ConfigSnapshot) -> anyhow::Result<()>;
}

/// Configuration held in an [`ArcSwap`] and reloaded from the YAML file and environment.
pub struct LiveConfig {
    current: ArcSwap<Config>,
    source: Args,
}

impl LiveConfig {
    pub fn new(config: Config, source: Args) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            source,
        }
    }

    pub fn source(&self) -> &Args {
        &self.source
    }
}

#[async_trait]
impl ConfigStore for LiveConfig {
    fn current(&self) -> Arc<Config> {
        self.current.load_full()
    }

    async fn reload(&self) -> anyhow::Result<()> {
        let source = self.source.clone();
        // figment reads the file synchronously
        let config = tokio::task::spawn_blocking(move || Config::figment(&source).extract::<Config>()).await??;

        debug!(config_file = %self.source.config, "Reloaded configuration from source");
        self.current.store(Arc::new(config));
        Ok(())
    }

    async fn restore(&self, snapshot: &ConfigSnapshot) -> anyhow::Result<()> {
        self.current.store(snapshot.config().clone());
        info!(taken_at = %snapshot.taken_at(), "Restored configuration snapshot");
        Ok(())
    }
}
