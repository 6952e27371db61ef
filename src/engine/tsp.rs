//! Trailing stop profit: per-position activation, ratcheting and triggering
//!
//! Sell orders are never replaced in place during a shift. The old order is
//! cancelled, the replacement is recorded as a future order, and the TSP row
//! is unlinked; the next reconciliation pass drains the future orders and
//! re-associates the new sell with its position. This two-phase detour
//! avoids re-entrant placement while the order it replaces is still being
//! cancelled.

use log::{debug, info, warn};

use crate::errors::BotResult;
use crate::exchange::OrderSide;
use crate::store::TspRecord;

use super::GridEngine;

/// Relative price tolerance when matching an unlinked position to a sell
/// order
const ASSOCIATION_TOLERANCE: f64 = 0.01;

impl GridEngine {
    /// Turn queued future orders into real sell orders. Each entry produces
    /// exactly one sell attempt and then deletes itself.
    pub(crate) async fn process_future_orders(&mut self) -> BotResult<()> {
        if self.config.dry_run {
            debug!("Dry run, not processing future orders.");
            return Ok(());
        }

        for price in self.store.future_order_prices() {
            info!("Processing future order at price {price}");
            let behavior = self.sell_behavior.clone();
            behavior.new_sell_order(self, price, None).await?;
            self.store.future_remove(price)?;
        }
        Ok(())
    }

    /// Set up TSP tracking when a position is opened (buy filled, sell
    /// placed). The sell txid is linked later by the association pass.
    pub(crate) fn initialize_tsp_for_new_position(
        &mut self,
        original_buy_txid: &str,
        buy_price: f64,
    ) -> BotResult<()> {
        debug!(
            "Initializing TSP for position: buy_txid={original_buy_txid}, buy_price={buy_price}"
        );

        self.store.tsp_add(TspRecord {
            userref: self.config.userref,
            original_buy_txid: original_buy_txid.to_string(),
            original_buy_price: buy_price,
            // Minimum profit level until the trailing stop takes over.
            current_stop_price: buy_price * (1.0 + self.config.interval),
            tsp_active: false,
            current_sell_order_txid: None,
        })
    }

    /// Drop the TSP row when its sell order filled; the position is closed.
    pub(crate) fn cleanup_tsp_for_filled_sell(&mut self, sell_txid: &str) -> BotResult<()> {
        debug!("Cleaning up TSP state for filled sell order: {sell_txid}");

        if let Some(state) = self.store.tsp_by_sell_txid(sell_txid) {
            info!(
                "Removing TSP state for position {} after sell order {sell_txid} filled",
                state.original_buy_txid
            );
            self.store
                .tsp_remove_by_buy_txid(&state.original_buy_txid)?;
        } else {
            debug!("No TSP state found for sell order {sell_txid}");
        }
        Ok(())
    }

    /// Link unlinked positions to their sell orders. Sell orders appear
    /// unlinked right after a buy fill and after every shift, because the
    /// new txid only exists once the future order was drained.
    pub(crate) fn associate_sell_orders_with_tsp(&mut self) -> BotResult<()> {
        let unlinked_states = self.store.tsp_unlinked();
        if unlinked_states.is_empty() {
            return Ok(());
        }

        let tsp = self.config.trailing_stop_profit.unwrap_or_default();
        let sell_orders = self.store.orders(Some(OrderSide::Sell));

        for state in unlinked_states {
            let expected_sell_price =
                state.original_buy_price * (1.0 + self.config.interval + 2.0 * tsp);

            let matching_sell_order = sell_orders.iter().find(|sell| {
                let price_diff = (sell.price - expected_sell_price).abs() / expected_sell_price;
                price_diff <= ASSOCIATION_TOLERANCE
                    && self.store.tsp_by_sell_txid(&sell.txid).is_none()
            });

            match matching_sell_order {
                Some(sell) => {
                    debug!(
                        "Associating sell order {} with TSP state for buy {}",
                        sell.txid, state.original_buy_txid
                    );
                    self.store
                        .tsp_set_sell_txid(&state.original_buy_txid, Some(sell.txid.clone()))?;
                }
                None => warn!(
                    "Could not find matching sell order for TSP state with buy \
                     txid {} (expected price: {expected_sell_price})",
                    state.original_buy_txid
                ),
            }
        }
        Ok(())
    }

    /// Check every tracked position against the current price: activate,
    /// ratchet, or trigger its trailing stop.
    pub(crate) async fn check_tsp(&mut self) -> BotResult<()> {
        let Some(tsp) = self.config.trailing_stop_profit else {
            return Ok(());
        };
        if self.config.dry_run {
            return Ok(());
        }
        let Some(ticker) = self.ticker else {
            return Ok(());
        };

        debug!("Checking TSP conditions at price: {ticker}");
        let interval = self.config.interval;

        for sell_order in self.store.orders(Some(OrderSide::Sell)) {
            let Some(state) = self.store.tsp_by_sell_txid(&sell_order.txid) else {
                // Sell orders from shift-ups or the SWING extra sell have no
                // position of their own.
                debug!(
                    "No TSP state found for sell order '{}', skipping TSP check",
                    sell_order.txid
                );
                continue;
            };

            if state.original_buy_price > ticker {
                continue;
            }

            let tsp_activation_price = state.original_buy_price * (1.0 + interval + tsp);

            if !state.tsp_active && ticker >= tsp_activation_price {
                info!(
                    "Activating TSP for position {} (buy_price={}) at current price {ticker}",
                    state.original_buy_txid, state.original_buy_price
                );
                self.store
                    .tsp_activate(&state.original_buy_txid, ticker * (1.0 - tsp))?;
                self.shift_sell_order_up(&state, &sell_order.txid, sell_order.price, tsp)
                    .await?;
                continue;
            }

            if state.tsp_active {
                if ticker >= sell_order.price - state.original_buy_price * tsp {
                    // Price keeps climbing: ratchet the stop and move the
                    // leading sell order further up.
                    self.store
                        .tsp_update_stop(&state.original_buy_txid, ticker * (1.0 - tsp))?;
                    debug!(
                        "Updated trailing stop for position '{}' to new level",
                        state.original_buy_txid
                    );
                    self.shift_sell_order_up(&state, &sell_order.txid, sell_order.price, tsp)
                        .await?;
                } else if ticker <= state.current_stop_price {
                    self.trigger_tsp(&state, &sell_order.txid, ticker).await?;
                }
            }
        }
        Ok(())
    }

    /// Cancel the current sell order and queue its replacement one TSP step
    /// higher; the position stays unlinked until the association pass.
    async fn shift_sell_order_up(
        &mut self,
        state: &TspRecord,
        sell_txid: &str,
        sell_price: f64,
        tsp: f64,
    ) -> BotResult<()> {
        let new_sell_price = sell_price + state.original_buy_price * tsp;
        info!("Try shifting sell order from {sell_price} to {new_sell_price}");

        self.handle_cancel_order(sell_txid).await?;
        self.store.future_add(new_sell_price)?;
        self.store
            .tsp_set_sell_txid(&state.original_buy_txid, None)?;

        self.publish_notification(format!(
            "↗️ Shifting up sell order from {sell_price} {quote} to {new_sell_price} {quote}, \
             trailing stop at {stop} {quote}",
            quote = self.config.quote_currency,
            stop = self
                .store
                .tsp_by_buy_txid(&state.original_buy_txid)
                .map(|s| s.current_stop_price)
                .unwrap_or(state.current_stop_price),
        ));
        Ok(())
    }

    /// The price fell back to the trailing stop: close the position with an
    /// immediate sell, never below the minimum profitable level.
    async fn trigger_tsp(
        &mut self,
        state: &TspRecord,
        sell_txid: &str,
        ticker: f64,
    ) -> BotResult<()> {
        info!(
            "TSP triggered! Selling position '{}' at trailing stop level {}",
            state.original_buy_txid, state.current_stop_price
        );
        self.publish_notification(format!(
            "⚠️ Trailing stop profit triggered at {}",
            state.current_stop_price
        ));

        self.handle_cancel_order(sell_txid).await?;

        let min_profitable_price =
            state.original_buy_price * (1.0 + self.config.interval + 2.0 * self.fee);
        let actual_sell_price = ticker.max(min_profitable_price);

        info!(
            "Placing TSP sell order at price {actual_sell_price} for position {}",
            state.original_buy_txid
        );
        self.handle_arbitrage(OrderSide::Sell, actual_sell_price, None)
            .await?;

        self.store
            .tsp_remove_by_buy_txid(&state.original_buy_txid)?;

        info!(
            "TSP sell executed at {actual_sell_price} for position {}",
            state.original_buy_txid
        );
        Ok(())
    }
}
