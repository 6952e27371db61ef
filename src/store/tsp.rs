//! Trailing-stop-profit rows, one per open position
//!
//! Tracked independently of orders so the state survives the sell order
//! being cancelled and replaced during shifts.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::BotResult;

use super::Store;

/// Trailing-stop state of one position, keyed by the originating buy txid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TspRecord {
    pub userref: u32,
    pub original_buy_txid: String,
    /// Never changes after creation
    pub original_buy_price: f64,
    /// Ratchets upwards while the position trails
    pub current_stop_price: f64,
    pub tsp_active: bool,
    /// Unlinked (`None`) while the sell order is being shifted
    pub current_sell_order_txid: Option<String>,
}

impl Store {
    /// Add a TSP row for a new position. A row that already exists for the
    /// buy txid is left untouched (replay safety).
    pub fn tsp_add(&mut self, record: TspRecord) -> BotResult<()> {
        if self
            .data
            .tsp_states
            .iter()
            .any(|t| t.original_buy_txid == record.original_buy_txid)
        {
            return Ok(());
        }
        debug!(
            "Adding TSP state: buy_txid={}, buy_price={}, stop_price={}",
            record.original_buy_txid, record.original_buy_price, record.current_stop_price
        );
        self.data.tsp_states.push(record);
        self.save()
    }

    pub fn tsp_by_buy_txid(&self, original_buy_txid: &str) -> Option<TspRecord> {
        self.data
            .tsp_states
            .iter()
            .find(|t| t.original_buy_txid == original_buy_txid)
            .cloned()
    }

    pub fn tsp_by_sell_txid(&self, sell_txid: &str) -> Option<TspRecord> {
        self.data
            .tsp_states
            .iter()
            .find(|t| t.current_sell_order_txid.as_deref() == Some(sell_txid))
            .cloned()
    }

    /// Rows currently not linked to any sell order
    pub fn tsp_unlinked(&self) -> Vec<TspRecord> {
        self.data
            .tsp_states
            .iter()
            .filter(|t| t.current_sell_order_txid.is_none())
            .cloned()
            .collect()
    }

    /// Link or unlink the sell order of a position.
    pub fn tsp_set_sell_txid(
        &mut self,
        original_buy_txid: &str,
        sell_txid: Option<String>,
    ) -> BotResult<()> {
        debug!("Updating sell order txid for buy {original_buy_txid} to {sell_txid:?}");
        if let Some(record) = self
            .data
            .tsp_states
            .iter_mut()
            .find(|t| t.original_buy_txid == original_buy_txid)
        {
            record.current_sell_order_txid = sell_txid;
        }
        self.save()
    }

    /// Flip a position to active and set its first trailing stop.
    pub fn tsp_activate(&mut self, original_buy_txid: &str, stop_price: f64) -> BotResult<()> {
        debug!("Activating TSP for buy_txid {original_buy_txid} with stop {stop_price}");
        if let Some(record) = self
            .data
            .tsp_states
            .iter_mut()
            .find(|t| t.original_buy_txid == original_buy_txid)
        {
            record.tsp_active = true;
            record.current_stop_price = stop_price;
        }
        self.save()
    }

    /// Ratchet the trailing stop of an active position.
    pub fn tsp_update_stop(&mut self, original_buy_txid: &str, stop_price: f64) -> BotResult<()> {
        debug!("Updating trailing stop for buy_txid {original_buy_txid} to {stop_price}");
        if let Some(record) = self
            .data
            .tsp_states
            .iter_mut()
            .find(|t| t.original_buy_txid == original_buy_txid)
        {
            record.current_stop_price = stop_price;
        }
        self.save()
    }

    /// Drop the row once the position is closed.
    pub fn tsp_remove_by_buy_txid(&mut self, original_buy_txid: &str) -> BotResult<()> {
        debug!("Removing TSP state for buy txid {original_buy_txid}");
        self.data
            .tsp_states
            .retain(|t| t.original_buy_txid != original_buy_txid);
        self.save()
    }
}
