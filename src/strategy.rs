//! Grid strategy variants
//!
//! The four variants share all buy-side and reconciliation logic in the
//! engine and differ only in how a sell order is produced (and, for SWING,
//! in the extra sell check). They are composed into the engine as trait
//! objects.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::config::StrategyKind;
use crate::engine::GridEngine;
use crate::errors::{BotError, BotResult};
use crate::exchange::{NewOrder, OrderSide};

/// The strategy-specific part of a grid variant
#[async_trait]
pub trait SellBehavior: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Produce the sell order pairing a filled buy (or a consolidated /
    /// future sell when `txid_to_delete` is `None`).
    ///
    /// Implementations follow the intent-log discipline: when a buy txid is
    /// involved, an unsold marker is written before the attempt and removed
    /// only after the placement succeeded.
    async fn new_sell_order(
        &self,
        engine: &mut GridEngine,
        order_price: f64,
        txid_to_delete: Option<&str>,
    ) -> BotResult<()>;

    /// Hook for variants that may place sell orders outside the buy-fill
    /// path. Only SWING implements this.
    async fn extra_sell_check(&self, _engine: &mut GridEngine) -> BotResult<()> {
        Ok(())
    }
}

/// Build the behavior for a configured strategy variant.
pub fn behavior_for(kind: StrategyKind) -> Arc<dyn SellBehavior> {
    match kind {
        StrategyKind::GridHodl => Arc::new(GridHodl),
        StrategyKind::GridSell => Arc::new(GridSell),
        StrategyKind::Swing => Arc::new(Swing),
        StrategyKind::Cdca => Arc::new(Cdca),
    }
}

/// Place a sell order sized as `amount_per_grid / sell_price`.
///
/// Selling at a higher price than the paired buy means slightly less base is
/// sold than was bought, so base currency accumulates over round trips. A
/// missing base balance is not fatal here: the unsold marker stays behind
/// and the sell is retried on a later pass.
async fn place_accumulating_sell(
    engine: &mut GridEngine,
    order_price: f64,
    txid_to_delete: Option<&str>,
) -> BotResult<()> {
    if let Some(txid) = txid_to_delete {
        engine.store.unsold_add(txid, order_price)?;
    }

    let order_price = engine.truncate_price(order_price)?;
    let volume = engine.truncate_volume(engine.config.amount_per_grid / order_price)?;

    let balances = engine.rest.get_pair_balance().await?;
    if balances.base_available >= volume {
        info!(
            "Placing order to sell {volume} {} @ {order_price} {}.",
            engine.config.base_currency, engine.config.quote_currency
        );
        let txid = engine
            .rest
            .create_order(&NewOrder {
                side: OrderSide::Sell,
                volume,
                price: order_price,
                userref: engine.config.userref,
                post_only: false,
            })
            .await?;

        engine.store.pending_add(&txid)?;
        if let Some(buy_txid) = txid_to_delete {
            engine.store.remove_order(buy_txid)?;
            engine.store.unsold_remove(buy_txid)?;
        }
        engine.assign_order_by_txid(&txid).await?;
        return Ok(());
    }

    let message = format!(
        "⚠️ {}\n├ Not enough {}\n├ to sell {volume} {}\n└ for {order_price} {}",
        engine.rest.rest_symbol(),
        engine.config.base_currency,
        engine.config.base_currency,
        engine.config.quote_currency
    );
    engine.publish_notification(message);
    warn!("Current balances: {balances:?}");
    Ok(())
}

// ============================================================================
// GridHODL - accumulate and hold
// ============================================================================

/// Accumulates base currency: each sell is sized at the sell price, leaving
/// a little of every bought amount behind.
pub struct GridHodl;

#[async_trait]
impl SellBehavior for GridHodl {
    fn kind(&self) -> StrategyKind {
        StrategyKind::GridHodl
    }

    async fn new_sell_order(
        &self,
        engine: &mut GridEngine,
        order_price: f64,
        txid_to_delete: Option<&str>,
    ) -> BotResult<()> {
        place_accumulating_sell(engine, order_price, txid_to_delete).await
    }
}

// ============================================================================
// GridSell - sell for profit
// ============================================================================

/// Sells exactly the executed volume of the originating buy, realizing the
/// profit in quote currency. Its correctness guarantee requires the base
/// funds to always be available, so a missing balance is fatal.
pub struct GridSell;

#[async_trait]
impl SellBehavior for GridSell {
    fn kind(&self) -> StrategyKind {
        StrategyKind::GridSell
    }

    async fn new_sell_order(
        &self,
        engine: &mut GridEngine,
        order_price: f64,
        txid_to_delete: Option<&str>,
    ) -> BotResult<()> {
        if let Some(txid) = txid_to_delete {
            engine.store.unsold_add(txid, order_price)?;
        }

        let order_price = engine.truncate_price(order_price)?;

        // Sell what the buy actually executed; consolidated sells without an
        // originating order fall back to the grid amount plus fee.
        let raw_volume = match txid_to_delete {
            Some(buy_txid) => {
                let buy_order = engine.rest.get_order_with_retry(buy_txid, true).await?;
                if buy_order.vol_exec > 0.0 {
                    buy_order.vol_exec
                } else {
                    engine.config.amount_per_grid / order_price * (1.0 + engine.fee)
                }
            }
            None => engine.config.amount_per_grid / order_price * (1.0 + engine.fee),
        };
        let volume = engine.truncate_volume(raw_volume)?;

        let balances = engine.rest.get_pair_balance().await?;
        if balances.base_available < volume {
            return Err(BotError::InsufficientFunds {
                currency: engine.config.base_currency.clone(),
                required: volume,
                available: balances.base_available,
            });
        }

        info!(
            "Placing order to sell {volume} {} @ {order_price} {}.",
            engine.config.base_currency, engine.config.quote_currency
        );
        let txid = engine
            .rest
            .create_order(&NewOrder {
                side: OrderSide::Sell,
                volume,
                price: order_price,
                userref: engine.config.userref,
                post_only: false,
            })
            .await?;

        engine.store.pending_add(&txid)?;
        if let Some(buy_txid) = txid_to_delete {
            engine.store.remove_order(buy_txid)?;
            engine.store.unsold_remove(buy_txid)?;
        }
        engine.assign_order_by_txid(&txid).await?;
        Ok(())
    }
}

// ============================================================================
// SWING
// ============================================================================

/// GridHODL plus an extra sell: once no sell order is open and enough
/// unreserved base has accumulated, it is offered one interval above the
/// highest known buy.
pub struct Swing;

#[async_trait]
impl SellBehavior for Swing {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Swing
    }

    async fn new_sell_order(
        &self,
        engine: &mut GridEngine,
        order_price: f64,
        txid_to_delete: Option<&str>,
    ) -> BotResult<()> {
        place_accumulating_sell(engine, order_price, txid_to_delete).await
    }

    async fn extra_sell_check(&self, engine: &mut GridEngine) -> BotResult<()> {
        if engine.store.count_orders(Some(OrderSide::Sell)) != 0 {
            return Ok(());
        }

        let ticker = engine.current_ticker()?;
        let config_row = engine.store.get_config()?;
        let order_price =
            config_row.price_of_highest_buy.max(ticker) * (1.0 + engine.config.interval);

        let balances = engine.rest.get_pair_balance().await?;
        // Leftovers from partially filled buys are reserved for the
        // consolidated sell and do not count here.
        let usable_base = balances.base_available - config_row.vol_of_unfilled_remaining;

        if usable_base * order_price >= engine.amount_per_grid_plus_fee {
            info!("Placing extra sell order at {order_price}");
            engine.publish_notification(format!(
                "ℹ️ Placing extra sell order at {order_price} {}",
                engine.config.quote_currency
            ));
            engine
                .handle_arbitrage(OrderSide::Sell, order_price, None)
                .await?;
        } else {
            debug!("Not enough free base currency for an extra sell order");
        }
        Ok(())
    }
}

// ============================================================================
// cDCA - cost averaging
// ============================================================================

/// Pure cost averaging: buys are never paired with sells, the position just
/// accumulates. The sell hook only clears the consumed intent markers.
pub struct Cdca;

#[async_trait]
impl SellBehavior for Cdca {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Cdca
    }

    async fn new_sell_order(
        &self,
        engine: &mut GridEngine,
        _order_price: f64,
        txid_to_delete: Option<&str>,
    ) -> BotResult<()> {
        if let Some(txid) = txid_to_delete {
            engine.store.remove_order(txid)?;
            engine.store.unsold_remove(txid)?;
        }
        debug!("cDCA keeps the position, no sell order placed.");
        Ok(())
    }
}
