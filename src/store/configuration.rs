//! Persisted per-instance tunables and running totals

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::{BotError, BotResult};

use super::Store;

/// Configuration row, one per instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub userref: u32,
    /// Crate version that last wrote this row
    pub version: String,
    /// Base volume left over from cancelled, partially filled buy orders
    pub vol_of_unfilled_remaining: f64,
    /// Highest buy price among the accumulated leftovers
    pub vol_of_unfilled_remaining_max_price: f64,
    pub price_of_highest_buy: f64,
    /// Last applied tunables; `None` until the first run recorded them
    pub amount_per_grid: Option<f64>,
    pub interval: Option<f64>,
    pub trailing_stop_profit: Option<f64>,
}

impl ConfigRecord {
    pub(crate) fn new(userref: u32, version: &str) -> Self {
        Self {
            userref,
            version: version.to_string(),
            vol_of_unfilled_remaining: 0.0,
            vol_of_unfilled_remaining_max_price: 0.0,
            price_of_highest_buy: 0.0,
            amount_per_grid: None,
            interval: None,
            trailing_stop_profit: None,
        }
    }
}

impl Store {
    /// Get the configuration row, from cache when available.
    pub fn get_config(&mut self) -> BotResult<ConfigRecord> {
        if let Some(cached) = &self.config_cache {
            debug!("Using cached configuration data");
            return Ok(cached.clone());
        }

        let config = self
            .data
            .configuration
            .clone()
            .ok_or_else(|| BotError::Persistence("No configuration row found".into()))?;
        self.config_cache = Some(config.clone());
        Ok(config)
    }

    /// Update the configuration row and invalidate the cache.
    pub fn update_config(&mut self, apply: impl FnOnce(&mut ConfigRecord)) -> BotResult<()> {
        let config = self
            .data
            .configuration
            .as_mut()
            .ok_or_else(|| BotError::Persistence("No configuration row found".into()))?;
        apply(config);
        self.config_cache = None;
        self.save()
    }
}
