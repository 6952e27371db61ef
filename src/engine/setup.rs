//! One-time trading setup: asset info, intent replay, orderbook sync and
//! the configuration-change policy

use std::collections::HashSet;

use log::{debug, info};

use crate::errors::BotResult;
use crate::exchange::{OrderInfo, OrderSide, OrderStatus};
use crate::state_machine::BotState;
use crate::store::OrderRecord;

use super::GridEngine;

impl GridEngine {
    /// Prepare the engine for live trading. Runs exactly once, after both
    /// stream channels are confirmed connected, and must complete before any
    /// execution event is processed.
    pub(crate) async fn prepare_for_trading(&mut self) -> BotResult<()> {
        info!("Preparing for trading by initializing and updating the local orderbook...");

        self.publish_notification(format!("✅ {} is starting!", self.config.name));

        // Fee, cost precision and the per-grid amount including fee.
        self.retrieve_asset_information().await?;

        // Append orders to the local orderbook in case they are not saved yet.
        self.assign_all_pending_transactions().await?;

        // Try to place sell orders that did not get through earlier, e.g.
        // because of missing funds.
        self.add_missed_sell_orders().await?;

        // Compare the local orderbook against upstream, handle closed and
        // cancelled orders, place new ones where fills require it.
        self.sync_order_book().await?;

        // A changed amount per grid or interval requires cancelling all open
        // buy orders.
        self.check_configuration_changes().await?;

        self.ready_to_trade = true;
        info!("Algorithm is ready to trade!");

        // The heart of the algorithm; from now on it runs on every ticker.
        self.check_price_range().await?;
        self.state_machine.transition_to(BotState::Running)?;
        Ok(())
    }

    async fn retrieve_asset_information(&mut self) -> BotResult<()> {
        info!("- Retrieving asset pair information...");
        let pair_info = self.rest.get_asset_pair_info().await?;
        debug!("{pair_info:?}");

        self.fee = match self.config.fee {
            Some(fee) => fee,
            // No '--fee' configured: assume the highest maker fee.
            None => pair_info.maker_fee / 100.0,
        };
        self.cost_decimals = pair_info.cost_decimals;
        self.amount_per_grid_plus_fee = self.config.amount_per_grid * (1.0 + self.fee);
        Ok(())
    }

    /// Open orders from upstream that belong to this trading pair.
    async fn fetch_owned_open_orders(&self) -> BotResult<Vec<OrderInfo>> {
        info!("  - Retrieving open orders from upstream...");
        Ok(self
            .rest
            .get_open_orders(self.config.userref)
            .await?
            .into_iter()
            .filter(|order| order.pair == self.rest.rest_symbol())
            .collect())
    }

    /// Bring the local orderbook in line with upstream. Runs only during
    /// setup; afterwards the execution channel keeps both sides in sync.
    pub(crate) async fn sync_order_book(&mut self) -> BotResult<()> {
        info!("- Syncing the orderbook with upstream...");

        let open_orders = self.fetch_owned_open_orders().await?;
        let open_txids: HashSet<&str> = open_orders.iter().map(|o| o.txid.as_str()).collect();

        // Upstream orders not yet tracked locally.
        for order in &open_orders {
            if !self.store.contains_order(&order.txid) {
                info!(
                    "  - Adding upstream order to local orderbook: {}",
                    order.txid
                );
                self.store.add_order(OrderRecord::from_info(order))?;
            }
        }

        // Local orders that upstream no longer lists as open: filled orders
        // trigger their counter-order, cancelled ones are dropped, anything
        // still pending stays untouched.
        for record in self.store.orders(None) {
            if open_txids.contains(record.txid.as_str()) {
                continue;
            }
            let closed_order = self.rest.get_order_with_retry(&record.txid, true).await?;
            match closed_order.status {
                OrderStatus::Closed => self.handle_closed_order(&closed_order).await?,
                OrderStatus::Canceled | OrderStatus::Expired => {
                    self.store.remove_order(&record.txid)?;
                }
                // Pending or open - still active.
                _ => continue,
            }
        }

        info!("- Orderbook initialized!");
        Ok(())
    }

    /// An order of the local orderbook was closed upstream while the engine
    /// was away. Mirrors the fill handler branching by side.
    async fn handle_closed_order(&mut self, closed_order: &OrderInfo) -> BotResult<()> {
        info!("Handling executed order: {}", closed_order.txid);

        self.notify_executed_order(closed_order);

        match closed_order.side {
            // A filled buy needs its sell order.
            OrderSide::Buy => {
                let sell_price = self.get_sell_order_price(closed_order.price)?;
                self.handle_arbitrage(OrderSide::Sell, sell_price, Some(&closed_order.txid))
                    .await?;
                if self.config.trailing_stop_profit.is_some() {
                    self.initialize_tsp_for_new_position(&closed_order.txid, closed_order.price)?;
                }
            }
            // A filled sell may need a replacement buy - but only if another
            // sell order remains. If the last sell was filled, the price is
            // so high that all buys get cancelled and re-placed by the
            // shift-up check anyway.
            OrderSide::Sell => {
                if self.config.trailing_stop_profit.is_some() {
                    self.cleanup_tsp_for_filled_sell(&closed_order.txid)?;
                }
                if self
                    .store
                    .count_orders_excluding(OrderSide::Sell, &closed_order.txid)
                    != 0
                {
                    let buy_price = self.get_buy_order_price(closed_order.price)?;
                    self.handle_arbitrage(OrderSide::Buy, buy_price, Some(&closed_order.txid))
                        .await?;
                } else {
                    self.store.remove_order(&closed_order.txid)?;
                }
            }
        }
        Ok(())
    }

    /// Cancel all open buys when the grid geometry changed since the last
    /// run; a changed TSP flag is only persisted.
    async fn check_configuration_changes(&mut self) -> BotResult<()> {
        info!("- Checking configuration changes...");
        let mut cancel_all_orders = false;
        let stored = self.store.get_config()?;

        if stored.amount_per_grid != Some(self.config.amount_per_grid) {
            info!(" - Amount per grid changed => cancel open buy orders soon...");
            let amount = self.config.amount_per_grid;
            self.store
                .update_config(|c| c.amount_per_grid = Some(amount))?;
            cancel_all_orders = true;
        }

        if stored.interval != Some(self.config.interval) {
            info!(" - Interval changed => cancel open buy orders soon...");
            let interval = self.config.interval;
            self.store.update_config(|c| c.interval = Some(interval))?;
            cancel_all_orders = true;
        }

        if stored.trailing_stop_profit != self.config.trailing_stop_profit {
            info!(" - Trailing stop profit changed => updating configuration...");
            let tsp = self.config.trailing_stop_profit;
            self.store
                .update_config(|c| c.trailing_stop_profit = tsp)?;
        }

        if cancel_all_orders {
            self.cancel_all_open_buy_orders().await?;
        }

        info!("- Configuration checked and up-to-date!");
        Ok(())
    }
}
