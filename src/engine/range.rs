//! The price-range algorithm
//!
//! Runs on every accepted ticker update while the engine is running. Keeps
//! the ladder of buy orders spaced, sized and positioned relative to the
//! current price, and shifts the whole grid up when the price has run away.

use log::{debug, info, warn};

use crate::errors::BotResult;
use crate::exchange::OrderSide;

use super::GridEngine;

impl GridEngine {
    /// Check that the open orders match the configured grid with respect to
    /// the current price; cancel and place orders as needed.
    pub(crate) async fn check_price_range(&mut self) -> BotResult<()> {
        if self.config.dry_run {
            debug!("Dry run, not checking price range.");
            return Ok(());
        }

        debug!("Check conditions for upgrading the grid...");

        loop {
            // All pending placements must be assigned first, anything else
            // could lead to double trades.
            if self.check_pending_txids().await? {
                return Ok(());
            }

            // Remove buy orders that are too close to each other.
            self.check_near_buy_orders().await?;

            // Ensure n open buy orders.
            self.check_n_open_buy_orders().await?;

            // Resume on the next ticker if step 3 left placements pending.
            if self.store.pending_count() != 0 {
                return Ok(());
            }

            // More than n buy orders: cancel the lowest.
            self.check_lowest_cancel_of_more_than_n_buy_orders().await?;

            // Price ran away: cancel all buys and rebuild the ladder.
            if self.shift_buy_orders_up().await? {
                continue;
            }
            break;
        }

        // Extra sell order (only the SWING strategy does anything here).
        let behavior = self.sell_behavior.clone();
        behavior.extra_sell_check(self).await?;

        if self.config.trailing_stop_profit.is_some() {
            self.process_future_orders().await?;
            self.associate_sell_orders_with_tsp()?;
            self.check_tsp().await?;
        }
        Ok(())
    }

    /// Returns true if the price-range pass must be skipped because
    /// placements are still pending; replays them on the way.
    async fn check_pending_txids(&mut self) -> BotResult<bool> {
        if self.store.pending_count() != 0 {
            info!("check_price_range... skip because pending txids != 0");
            self.assign_all_pending_transactions().await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Cancel buy orders that sit closer than half an interval below their
    /// upper neighbor; the higher-priced order of an offending pair wins.
    async fn check_near_buy_orders(&mut self) -> BotResult<()> {
        debug!("Checking if distance between buy orders is too low...");

        let mut buy_prices = self.store.buy_prices();
        if buy_prices.is_empty() {
            return Ok(());
        }
        buy_prices.sort_by(|a, b| b.total_cmp(a));

        for i in 1..buy_prices.len() {
            let higher = buy_prices[i - 1];
            let lower = buy_prices[i];
            if lower == higher || higher / lower - 1.0 < self.config.interval / 2.0 {
                let offending = self
                    .store
                    .orders(Some(OrderSide::Buy))
                    .into_iter()
                    .find(|order| order.price == lower);
                if let Some(order) = offending {
                    self.handle_cancel_order(&order.txid).await?;
                }
            }
        }
        Ok(())
    }

    /// Place buy orders until n are open, the balance runs out, or the
    /// maximum investment is reached.
    async fn check_n_open_buy_orders(&mut self) -> BotResult<()> {
        debug!(
            "Checking if there are {} open buy orders...",
            self.config.n_open_buy_orders
        );

        let mut can_place_buy_order = true;
        while self.store.count_orders(Some(OrderSide::Buy)) < self.config.n_open_buy_orders
            && can_place_buy_order
            && self.store.pending_count() == 0
            && !self.max_investment_reached()
        {
            let fetched_balances = self.rest.get_pair_balance().await?;
            if fetched_balances.quote_available > self.amount_per_grid_plus_fee {
                let buy_prices = self.store.buy_prices();
                let last_price = match buy_prices
                    .iter()
                    .copied()
                    .min_by(|a, b| a.total_cmp(b))
                {
                    Some(min_buy) => min_buy,
                    None => self.current_ticker()?,
                };
                let order_price = self.get_buy_order_price(last_price)?;

                self.handle_arbitrage(OrderSide::Buy, order_price, None)
                    .await?;
                debug!(
                    "Length of active buy orders: {}",
                    self.store.count_orders(Some(OrderSide::Buy))
                );
            } else {
                warn!("Not enough quote currency available to place buy order!");
                can_place_buy_order = false;
            }
        }
        Ok(())
    }

    /// Cancel the lowest buy orders if there are more than n, e.g. after an
    /// executed sell placed a new higher buy.
    async fn check_lowest_cancel_of_more_than_n_buy_orders(&mut self) -> BotResult<()> {
        debug!("Checking if the lowest buy order needs to be canceled...");

        let n_to_cancel = self
            .store
            .count_orders(Some(OrderSide::Buy))
            .saturating_sub(self.config.n_open_buy_orders);
        if n_to_cancel > 0 {
            for order in self.store.lowest_buys(n_to_cancel) {
                self.handle_cancel_order(&order.txid).await?;
            }
        }
        Ok(())
    }

    /// Cancel every open buy order of this instance, via upstream so that
    /// orders not tracked locally are caught as well.
    pub(crate) async fn cancel_all_open_buy_orders(&mut self) -> BotResult<()> {
        info!("Cancelling all open buy orders...");
        for order in self.rest.get_open_orders(self.config.userref).await? {
            if order.side == OrderSide::Buy && order.pair == self.rest.rest_symbol() {
                self.handle_cancel_order(&order.txid).await?;
                tokio::time::sleep(super::RATE_LIMIT_PAUSE).await;
            }
        }
        Ok(())
    }

    /// The grid's defense against the price running away: when even the
    /// highest buy is more than two intervals below the ticker, cancel the
    /// whole ladder. Returns true when that happened so the caller rebuilds.
    async fn shift_buy_orders_up(&mut self) -> BotResult<bool> {
        debug!("Checking if buy orders need to be shifted up...");

        if let Some(max_buy_order) = self.store.highest_buy() {
            let interval = self.config.interval;
            let threshold = max_buy_order.price * (1.0 + interval) * (1.0 + interval) * 1.001;
            if self.current_ticker()? > threshold {
                self.cancel_all_open_buy_orders().await?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}
