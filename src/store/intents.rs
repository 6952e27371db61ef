//! Durable intent log: crash-safe markers for in-flight order placements
//!
//! Contract: write-before-act, delete-after-confirm. A pending txid exists
//! from the moment placement returns until the order is confirmed in the
//! orderbook; an unsold entry exists from just before a sell attempt until
//! that sell is placed; future orders are drained once per reconciliation
//! pass.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::BotResult;

use super::Store;

/// A filled buy whose corresponding sell placement is still outstanding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsoldRecord {
    /// Txid of the executed buy order
    pub txid: String,
    /// Price at which to sell
    pub price: f64,
}

impl Store {
    // ------------------------------------------------------------------
    // Pending txids

    pub fn pending_add(&mut self, txid: &str) -> BotResult<()> {
        debug!("Adding txid to the pending table: '{txid}'");
        self.data.pending_txids.push(txid.to_string());
        self.save()
    }

    pub fn pending_remove(&mut self, txid: &str) -> BotResult<()> {
        debug!("Removing txid from the pending table: '{txid}'");
        self.data.pending_txids.retain(|t| t != txid);
        self.save()
    }

    pub fn pending_contains(&self, txid: &str) -> bool {
        self.data.pending_txids.iter().any(|t| t == txid)
    }

    pub fn pending_count(&self) -> usize {
        self.data.pending_txids.len()
    }

    pub fn pending_txids(&self) -> Vec<String> {
        self.data.pending_txids.clone()
    }

    // ------------------------------------------------------------------
    // Unsold buy orders

    /// Record a buy whose sell still has to be placed. Replays keep the
    /// existing entry instead of inserting a duplicate.
    pub fn unsold_add(&mut self, txid: &str, price: f64) -> BotResult<()> {
        if self.data.unsold_buy_orders.iter().any(|u| u.txid == txid) {
            return Ok(());
        }
        debug!("Adding unsold buy order: '{txid}' @ {price}");
        self.data.unsold_buy_orders.push(UnsoldRecord {
            txid: txid.to_string(),
            price,
        });
        self.save()
    }

    pub fn unsold_remove(&mut self, txid: &str) -> BotResult<()> {
        debug!("Removing unsold buy order: '{txid}'");
        self.data.unsold_buy_orders.retain(|u| u.txid != txid);
        self.save()
    }

    pub fn unsold_count(&self) -> usize {
        self.data.unsold_buy_orders.len()
    }

    pub fn unsold_entries(&self) -> Vec<UnsoldRecord> {
        self.data.unsold_buy_orders.clone()
    }

    // ------------------------------------------------------------------
    // Future orders

    /// Enqueue a sell to be created on the next reconciliation pass.
    pub fn future_add(&mut self, price: f64) -> BotResult<()> {
        debug!("Adding future order at price {price}");
        self.data.future_orders.push(price);
        self.save()
    }

    /// Remove one future order entry at `price`.
    pub fn future_remove(&mut self, price: f64) -> BotResult<()> {
        debug!("Removing future order at price {price}");
        if let Some(pos) = self.data.future_orders.iter().position(|p| *p == price) {
            self.data.future_orders.remove(pos);
        }
        self.save()
    }

    pub fn future_order_prices(&self) -> Vec<f64> {
        self.data.future_orders.clone()
    }
}
