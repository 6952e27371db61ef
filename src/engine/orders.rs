//! Order placement and the fill/cancel handlers

use log::{debug, info, warn};

use crate::errors::{BotError, BotResult};
use crate::exchange::{ExecType, NewOrder, OrderInfo, OrderSide, OrderStatus, StreamEvent};
use crate::store::OrderRecord;

use super::GridEngine;

/// Extra polls of a fetched-but-not-yet-closed order before the event is
/// handed back to the engine
const FILL_FETCH_RETRIES: u32 = 3;

impl GridEngine {
    /// Route a buy or sell placement to the right implementation and pause
    /// afterwards to stay below the exchange rate limits.
    pub(crate) async fn handle_arbitrage(
        &mut self,
        side: OrderSide,
        order_price: f64,
        txid_to_delete: Option<&str>,
    ) -> BotResult<()> {
        debug!(
            "Handle arbitrage for {side} order with order price {order_price} \
             and txid_to_delete {txid_to_delete:?}"
        );

        if self.config.dry_run {
            info!("Dry run, not placing {side} order.");
            return Ok(());
        }

        match side {
            OrderSide::Buy => self.new_buy_order(order_price, txid_to_delete).await?,
            OrderSide::Sell => {
                let behavior = self.sell_behavior.clone();
                behavior
                    .new_sell_order(self, order_price, txid_to_delete)
                    .await?;
            }
        }

        tokio::time::sleep(super::RATE_LIMIT_PAUSE).await;
        Ok(())
    }

    /// Place a new buy order unless the ladder is already full, the maximum
    /// investment is reached, or the quote balance does not cover it.
    pub(crate) async fn new_buy_order(
        &mut self,
        order_price: f64,
        txid_to_delete: Option<&str>,
    ) -> BotResult<()> {
        if let Some(txid) = txid_to_delete {
            self.store.remove_order(txid)?;
        }

        if self.store.count_orders(Some(OrderSide::Buy)) >= self.config.n_open_buy_orders {
            return Ok(());
        }
        if self.max_investment_reached() {
            return Ok(());
        }

        let order_price = self.truncate_price(order_price)?;
        // The fee is respected while placing the sell order.
        let volume = self.truncate_volume(self.config.amount_per_grid / order_price)?;

        let current_balances = self.rest.get_pair_balance().await?;
        if current_balances.quote_available > self.amount_per_grid_plus_fee {
            info!(
                "Placing order to buy {volume} {} @ {order_price} {}.",
                self.config.base_currency, self.config.quote_currency
            );

            let txid = self
                .rest
                .create_order(&NewOrder {
                    side: OrderSide::Buy,
                    volume,
                    price: order_price,
                    userref: self.config.userref,
                    post_only: true,
                })
                .await?;

            self.store.pending_add(&txid)?;
            self.assign_order_by_txid(&txid).await?;
            return Ok(());
        }

        let message = format!(
            "⚠️ {}\n├ Not enough {}\n├ to buy {volume} {}\n└ for {order_price} {}",
            self.rest.rest_symbol(),
            self.config.quote_currency,
            self.config.base_currency,
            self.config.quote_currency
        );
        self.publish_notification(message);
        warn!("Current balances: {current_balances:?}");
        Ok(())
    }

    /// Replay every pending placement into the orderbook.
    pub(crate) async fn assign_all_pending_transactions(&mut self) -> BotResult<()> {
        info!("- Checking pending transactions...");
        for txid in self.store.pending_txids() {
            self.assign_order_by_txid(&txid).await?;
        }
        Ok(())
    }

    /// Move a placed order from the pending table into the orderbook, or
    /// refresh it when it is already tracked. There is no need to check the
    /// order status here: closed orders are handled by later events.
    pub(crate) async fn assign_order_by_txid(&mut self, txid: &str) -> BotResult<()> {
        info!("Processing order '{txid}' ...");
        let order_details = self.rest.get_order_with_retry(txid, true).await?;
        debug!("- Order information: {order_details:?}");

        if !self.owns_order(&order_details) {
            info!("Order '{txid}' does not belong to this instance.");
            return Ok(());
        }

        if self.store.pending_contains(&order_details.txid) {
            self.store.add_order(OrderRecord::from_info(&order_details))?;
            self.store.pending_remove(&order_details.txid)?;
        } else {
            self.store.update_order(&order_details)?;
            info!("Updated order '{}' in orderbook.", order_details.txid);
        }

        info!(
            "Current investment: {} / {} {}",
            self.investment(),
            self.config.max_investment,
            self.config.quote_currency
        );
        Ok(())
    }

    /// Handle a filled-order event from the executions channel.
    pub(crate) async fn handle_filled_order_event(&mut self, txid: &str) -> BotResult<()> {
        debug!("Handling a new filled order event for txid: {txid}");

        let mut order_details = self.rest.get_order_with_retry(txid, true).await?;

        if !self.owns_order(&order_details) {
            debug!("Filled order {txid} was not from this bot or pair.");
            return Ok(());
        }

        // The streaming channel can be faster than the REST backend, so the
        // order may not be marked closed yet. Poll a few times with growing
        // backoff before giving the event back to the engine.
        let mut tries = 1;
        while order_details.status != OrderStatus::Closed && tries <= FILL_FETCH_RETRIES {
            let wait_time = 2 + u64::from(tries);
            warn!("Order '{txid}' is not closed! Retry {tries}/{FILL_FETCH_RETRIES} in {wait_time} seconds...");
            tokio::time::sleep(std::time::Duration::from_secs(wait_time)).await;
            order_details = self.rest.get_order_with_retry(txid, false).await?;
            tries += 1;
        }

        if order_details.status != OrderStatus::Closed {
            warn!(
                "Cannot handle filled order, since the fetched order is not \
                 closed in upstream! Handing the event back for a later pass..."
            );
            self.requeue_event(StreamEvent::execution_update(ExecType::Filled, txid));
            return Ok(());
        }

        if self.config.dry_run {
            info!("Dry run, not handling filled order event.");
            return Ok(());
        }

        self.notify_executed_order(&order_details);

        match order_details.side {
            // Create a sell order for the executed buy order.
            OrderSide::Buy => {
                let sell_price = self.get_sell_order_price(order_details.price)?;
                self.handle_arbitrage(OrderSide::Sell, sell_price, Some(txid))
                    .await?;

                if self.config.trailing_stop_profit.is_some() {
                    self.initialize_tsp_for_new_position(txid, order_details.price)?;
                }
            }
            // Create a buy order for the executed sell order - unless it was
            // the last sell, in which case the shift-up check rebuilds the
            // grid on the next ticker anyway.
            OrderSide::Sell => {
                if self.config.trailing_stop_profit.is_some() {
                    self.cleanup_tsp_for_filled_sell(txid)?;
                }

                if self.store.count_orders_excluding(OrderSide::Sell, txid) != 0 {
                    let buy_price = self.get_buy_order_price(order_details.price)?;
                    self.handle_arbitrage(OrderSide::Buy, buy_price, Some(txid))
                        .await?;
                } else {
                    self.store.remove_order(txid)?;
                }
            }
        }
        Ok(())
    }

    /// Cancel an order by txid and remove it locally. The orderbook is the
    /// gatekeeper: a txid not tracked locally is ignored, which also covers
    /// the stream echo of cancellations the engine itself requested.
    pub(crate) async fn handle_cancel_order(&mut self, txid: &str) -> BotResult<()> {
        if !self.store.contains_order(txid) {
            return Ok(());
        }

        let order_details = self.rest.get_order_with_retry(txid, true).await?;

        if !self.owns_order(&order_details) {
            debug!("Not handling cancellation for order '{txid}' - not from this instance.");
            return Ok(());
        }

        if self.config.dry_run {
            info!("Dry run, not cancelling order: {txid}");
            return Ok(());
        }

        info!("Cancelling order: '{txid}'");
        match self.rest.cancel_order(txid).await {
            Ok(()) => {}
            Err(BotError::UnknownOrder(_)) => {
                info!("Order '{txid}' is already closed. Removing from orderbook...");
            }
            Err(err) => return Err(err),
        }

        self.store.remove_order(txid)?;

        // A partially filled buy leaves executed volume behind; collect it
        // until it is worth a consolidated sell order.
        if order_details.vol_exec != 0.0 && order_details.side == OrderSide::Buy {
            self.save_partially_filled_volume(&order_details).await?;
        }
        Ok(())
    }

    async fn save_partially_filled_volume(&mut self, order_details: &OrderInfo) -> BotResult<()> {
        info!(
            "Order '{}' is partly filled - saving those funds.",
            order_details.txid
        );

        let vol_exec = order_details.vol_exec;
        let price = order_details.price;
        self.store.update_config(|c| {
            c.vol_of_unfilled_remaining += vol_exec;
            if c.vol_of_unfilled_remaining_max_price < price {
                c.vol_of_unfilled_remaining_max_price = price;
            }
        })?;

        // Sell the leftovers once they are worth a full grid amount. Not
        // perfect - some dust may stay behind - but better than nothing.
        let config_row = self.store.get_config()?;
        if config_row.vol_of_unfilled_remaining * config_row.vol_of_unfilled_remaining_max_price
            >= self.config.amount_per_grid
        {
            info!(
                "Collected enough funds via partly filled buy orders to \
                 create a new sell order..."
            );
            let sell_price =
                self.get_sell_order_price(config_row.vol_of_unfilled_remaining_max_price)?;
            self.handle_arbitrage(OrderSide::Sell, sell_price, None)
                .await?;

            self.store.update_config(|c| {
                c.vol_of_unfilled_remaining = 0.0;
                c.vol_of_unfilled_remaining_max_price = 0.0;
            })?;
        }
        Ok(())
    }

    /// Create sell orders for executed buys whose sell never made it out,
    /// e.g. because funds were missing at the time.
    pub(crate) async fn add_missed_sell_orders(&mut self) -> BotResult<()> {
        info!("- Create sell orders based on unsold buy orders...");
        for entry in self.store.unsold_entries() {
            info!("  - {entry:?}");
            self.handle_arbitrage(OrderSide::Sell, entry.price, Some(&entry.txid))
                .await?;
        }
        Ok(())
    }

    /// Notify about an executed order.
    pub(crate) fn notify_executed_order(&self, order: &OrderInfo) {
        let side = match order.side {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        };
        let cost = order.price * order.vol_exec;
        let factor = 10f64.powi(self.cost_decimals as i32);
        let message = format!(
            "✅ {}: {side} order executed\
             \n ├ Price » {} {}\
             \n ├ Size » {} {}\
             \n └ Size in {} » {}",
            self.rest.rest_symbol(),
            order.price,
            self.config.quote_currency,
            order.vol_exec,
            self.config.base_currency,
            self.config.quote_currency,
            (cost * factor).round() / factor,
        );
        self.publish_notification(message);
    }
}
