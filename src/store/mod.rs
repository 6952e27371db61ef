//! Durable bot state: orderbook mirror, configuration, intent log, TSP rows
//!
//! All tables live in one JSON snapshot persisted with an atomic
//! write-to-temp-then-rename after every mutation. The engine is the only
//! writer; repeated startup reconciliation is the recovery mechanism for a
//! crash between two related writes.

pub mod configuration;
pub mod intents;
pub mod orderbook;
pub mod tsp;

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::BotResult;

pub use configuration::ConfigRecord;
pub use intents::UnsoldRecord;
pub use orderbook::OrderRecord;
pub use tsp::TspRecord;

/// Snapshot of every table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreData {
    pub(crate) orderbook: Vec<OrderRecord>,
    pub(crate) configuration: Option<ConfigRecord>,
    pub(crate) pending_txids: Vec<String>,
    pub(crate) unsold_buy_orders: Vec<UnsoldRecord>,
    pub(crate) future_orders: Vec<f64>,
    pub(crate) tsp_states: Vec<TspRecord>,
}

/// Keyed-table store scoped to one `userref`
pub struct Store {
    pub(crate) userref: u32,
    path: Option<PathBuf>,
    pub(crate) data: StoreData,
    /// In-memory configuration cache, invalidated on every write
    pub(crate) config_cache: Option<ConfigRecord>,
}

impl Store {
    /// Load the snapshot from `path` or start empty; `None` keeps the store
    /// in memory only (tests, dry runs).
    ///
    /// Creates the configuration row on first use and bumps its recorded
    /// version when the crate version changed.
    pub fn open(path: Option<PathBuf>, userref: u32) -> BotResult<Self> {
        let data = match &path {
            Some(p) if p.exists() => {
                info!("Loading existing state from {p:?}");
                match Self::load_from_file(p) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("Failed to load state: {e}, starting with empty state");
                        StoreData::default()
                    }
                }
            }
            _ => StoreData::default(),
        };

        let mut store = Self {
            userref,
            path,
            data,
            config_cache: None,
        };
        store.init_configuration()?;
        Ok(store)
    }

    fn load_from_file(path: &Path) -> BotResult<StoreData> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Persist the snapshot atomically (write to temp, then rename).
    pub(crate) fn save(&self) -> BotResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let temp_path = path.with_extension("tmp");
        let content = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;
        debug!("State saved to {path:?}");
        Ok(())
    }

    fn init_configuration(&mut self) -> BotResult<()> {
        let current_version = env!("CARGO_PKG_VERSION");
        match &mut self.data.configuration {
            None => {
                self.data.configuration = Some(ConfigRecord::new(self.userref, current_version));
                self.save()?;
            }
            Some(config) if config.version != current_version => {
                info!(
                    "Updating recorded version from {} to {current_version}",
                    config.version
                );
                config.version = current_version.to_string();
                self.save()?;
            }
            Some(_) => {}
        }
        Ok(())
    }
}
