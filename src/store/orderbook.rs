//! Local mirror of the bot's own open orders

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::BotResult;
use crate::exchange::{OrderInfo, OrderSide};

use super::Store;

/// One row per open order owned by this instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub userref: u32,
    pub txid: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub volume: f64,
}

impl OrderRecord {
    pub fn from_info(info: &OrderInfo) -> Self {
        Self {
            userref: info.userref,
            txid: info.txid.clone(),
            symbol: info.pair.clone(),
            side: info.side,
            price: info.price,
            volume: info.volume,
        }
    }
}

impl Store {
    /// Append an order to the orderbook.
    pub fn add_order(&mut self, record: OrderRecord) -> BotResult<()> {
        debug!("Adding order to the orderbook: {record:?}");
        self.data.orderbook.push(record);
        self.save()
    }

    /// Refresh side/price/volume of a tracked order.
    pub fn update_order(&mut self, info: &OrderInfo) -> BotResult<()> {
        debug!("Updating order in the orderbook: {}", info.txid);
        if let Some(record) = self
            .data
            .orderbook
            .iter_mut()
            .find(|o| o.txid == info.txid)
        {
            record.side = info.side;
            record.price = info.price;
            record.volume = info.volume;
        }
        self.save()
    }

    /// Remove an order by txid; reports whether a row was deleted.
    pub fn remove_order(&mut self, txid: &str) -> BotResult<bool> {
        let before = self.data.orderbook.len();
        self.data.orderbook.retain(|o| o.txid != txid);
        let removed = self.data.orderbook.len() != before;
        if removed {
            debug!("Removed order from the orderbook: {txid}");
            self.save()?;
        }
        Ok(removed)
    }

    pub fn contains_order(&self, txid: &str) -> bool {
        self.data.orderbook.iter().any(|o| o.txid == txid)
    }

    /// Orders of the given side, or all orders when `side` is `None`.
    pub fn orders(&self, side: Option<OrderSide>) -> Vec<OrderRecord> {
        self.data
            .orderbook
            .iter()
            .filter(|o| side.map_or(true, |s| o.side == s))
            .cloned()
            .collect()
    }

    pub fn count_orders(&self, side: Option<OrderSide>) -> usize {
        self.data
            .orderbook
            .iter()
            .filter(|o| side.map_or(true, |s| o.side == s))
            .count()
    }

    /// Count orders of `side`, excluding one txid.
    pub fn count_orders_excluding(&self, side: OrderSide, exclude_txid: &str) -> usize {
        self.data
            .orderbook
            .iter()
            .filter(|o| o.side == side && o.txid != exclude_txid)
            .count()
    }

    /// Prices of all open buy orders, in no particular order.
    pub fn buy_prices(&self) -> Vec<f64> {
        self.data
            .orderbook
            .iter()
            .filter(|o| o.side == OrderSide::Buy)
            .map(|o| o.price)
            .collect()
    }

    /// The open buy order with the highest price.
    pub fn highest_buy(&self) -> Option<OrderRecord> {
        self.data
            .orderbook
            .iter()
            .filter(|o| o.side == OrderSide::Buy)
            .max_by(|a, b| a.price.total_cmp(&b.price))
            .cloned()
    }

    /// The `limit` lowest-priced open buy orders, cheapest first.
    pub fn lowest_buys(&self, limit: usize) -> Vec<OrderRecord> {
        let mut buys = self.orders(Some(OrderSide::Buy));
        buys.sort_by(|a, b| a.price.total_cmp(&b.price));
        buys.truncate(limit);
        buys
    }

    /// Open sell orders cheapest first, at most `limit`.
    pub fn sells_price_asc(&self, limit: usize) -> Vec<OrderRecord> {
        let mut sells = self.orders(Some(OrderSide::Sell));
        sells.sort_by(|a, b| a.price.total_cmp(&b.price));
        sells.truncate(limit);
        sells
    }

    /// Open buy orders most expensive first, at most `limit`.
    pub fn buys_price_desc(&self, limit: usize) -> Vec<OrderRecord> {
        let mut buys = self.orders(Some(OrderSide::Buy));
        buys.sort_by(|a, b| b.price.total_cmp(&a.price));
        buys.truncate(limit);
        buys
    }

    /// Overall quote value bound in open orders.
    pub fn total_order_value(&self) -> f64 {
        self.data
            .orderbook
            .iter()
            .map(|o| o.price * o.volume)
            .sum()
    }
}
