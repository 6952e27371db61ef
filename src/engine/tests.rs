//! Engine scenario tests against the mock gateway
//!
//! The numbers follow one concrete setup throughout: interval 1%, 100 quote
//! per grid, 0.25% fee, pair precision of 1 price decimal and 8 volume
//! decimals.

use tokio::sync::mpsc;

use crate::config::StrategyKind;
use crate::errors::BotError;
use crate::event_bus::Notification;
use crate::exchange::mock::MockStream;
use crate::exchange::{OrderInfo, OrderSide, OrderStatus, Subscription};
use crate::state_machine::BotState;

use super::test_support::*;
use super::GridEngine;

fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n.message);
    }
    out
}

fn sorted_prices(engine: &GridEngine, side: OrderSide) -> Vec<f64> {
    let mut prices: Vec<f64> = engine
        .store
        .orders(Some(side))
        .iter()
        .map(|o| o.price)
        .collect();
    prices.sort_by(|a, b| b.total_cmp(a));
    prices
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

fn upstream_buy(txid: &str, price: f64, status: OrderStatus) -> OrderInfo {
    OrderInfo {
        txid: txid.into(),
        userref: 1,
        pair: SYMBOL.into(),
        side: OrderSide::Buy,
        status,
        price,
        volume: 100.0 / price,
        vol_exec: if status == OrderStatus::Closed {
            100.0 / price
        } else {
            0.0
        },
    }
}

// ----------------------------------------------------------------------
// Startup and grid placement

#[tokio::test(start_paused = true)]
async fn test_startup_places_initial_grid() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;

    let buys = sorted_prices(&rig.engine, OrderSide::Buy);
    let expected = [49504.9, 49014.7, 48529.4, 48048.9, 47573.1];
    assert_eq!(buys.len(), expected.len());
    for (actual, expected) in buys.iter().zip(expected) {
        assert_close(*actual, expected);
    }

    // First buy: 100 / 49504.9, truncated to 8 volume decimals.
    let top = rig
        .engine
        .store
        .highest_buy()
        .expect("top buy order present");
    assert_close(top.volume, 0.00202000);

    // Nothing left pending once the pass completed.
    assert_eq!(rig.engine.store.pending_count(), 0);

    let messages = drain(&mut rig.notifications);
    assert!(messages.iter().any(|m| m.contains("is starting")));
}

#[tokio::test(start_paused = true)]
async fn test_shift_up_rebuilds_the_grid() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;

    rig.engine.on_message(ticker_event(60000.0)).await;
    assert_eq!(rig.engine.state_machine.state(), BotState::Running);

    let buys = sorted_prices(&rig.engine, OrderSide::Buy);
    let expected = [59405.9, 58817.7, 58235.3, 57658.7, 57087.8];
    assert_eq!(buys.len(), expected.len());
    for (actual, expected) in buys.iter().zip(expected) {
        assert_close(*actual, expected);
    }

    // The old ladder was cancelled upstream.
    assert_eq!(rig.mock.cancelled_txids.lock().await.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_count_invariant_cancels_lowest_excess_buys() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;

    for (txid, price) in [("EXTRA1", 46000.0), ("EXTRA2", 45000.0)] {
        rig.mock
            .seed_order(upstream_buy(txid, price, OrderStatus::Open))
            .await;
        rig.engine
            .store
            .add_order(crate::store::OrderRecord::from_info(&upstream_buy(
                txid,
                price,
                OrderStatus::Open,
            )))
            .unwrap();
    }
    assert_eq!(rig.engine.store.count_orders(Some(OrderSide::Buy)), 7);

    rig.engine.on_message(ticker_event(50000.0)).await;

    assert_eq!(rig.engine.store.count_orders(Some(OrderSide::Buy)), 5);
    let cancelled = rig.mock.cancelled_txids.lock().await.clone();
    assert!(cancelled.contains(&"EXTRA1".to_string()));
    assert!(cancelled.contains(&"EXTRA2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_spacing_invariant_after_near_buy_check() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;

    // A second buy order right below the top of the ladder.
    rig.mock
        .seed_order(upstream_buy("NEAR", 49500.0, OrderStatus::Open))
        .await;
    rig.engine
        .store
        .add_order(crate::store::OrderRecord::from_info(&upstream_buy(
            "NEAR",
            49500.0,
            OrderStatus::Open,
        )))
        .unwrap();

    rig.engine.on_message(ticker_event(50000.0)).await;

    assert!(!rig.engine.store.contains_order("NEAR"));
    let buys = sorted_prices(&rig.engine, OrderSide::Buy);
    for pair in buys.windows(2) {
        assert!(
            pair[0] / pair[1] - 1.0 >= 0.01 / 2.0,
            "buy orders too close: {} and {}",
            pair[0],
            pair[1]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_max_investment_gate() {
    let mut config = base_config(StrategyKind::GridHodl);
    config.max_investment = 150.0;
    let mut rig = rig(config);
    start_running(&mut rig, 50000.0).await;

    // One grid (~100) fits; a second would pass the limit.
    assert_eq!(rig.engine.store.count_orders(Some(OrderSide::Buy)), 1);

    // No price movement changes that.
    rig.engine.on_message(ticker_event(48000.0)).await;
    rig.engine.on_message(ticker_event(52000.0)).await;
    assert_eq!(rig.engine.store.count_orders(Some(OrderSide::Buy)), 1);
}

// ----------------------------------------------------------------------
// Reconciliation

#[tokio::test(start_paused = true)]
async fn test_sync_adopts_upstream_and_resolves_closed_orders() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    // Pretend a previous run recorded the same tunables.
    rig.engine
        .store
        .update_config(|c| {
            c.amount_per_grid = Some(100.0);
            c.interval = Some(0.01);
        })
        .unwrap();

    // Upstream knows an open order the local book is missing.
    rig.mock
        .seed_order(upstream_buy("U1", 49000.0, OrderStatus::Open))
        .await;
    // A locally tracked buy filled while the engine was away...
    rig.mock
        .seed_order(upstream_buy("GONE", 48000.0, OrderStatus::Closed))
        .await;
    rig.engine
        .store
        .add_order(crate::store::OrderRecord::from_info(&upstream_buy(
            "GONE",
            48000.0,
            OrderStatus::Open,
        )))
        .unwrap();
    // ...and another one was cancelled.
    rig.mock
        .seed_order(upstream_buy("CXL", 47000.0, OrderStatus::Canceled))
        .await;
    rig.engine
        .store
        .add_order(crate::store::OrderRecord::from_info(&upstream_buy(
            "CXL",
            47000.0,
            OrderStatus::Open,
        )))
        .unwrap();

    start_running(&mut rig, 50000.0).await;

    assert!(rig.engine.store.contains_order("U1"));
    assert!(!rig.engine.store.contains_order("GONE"));
    assert!(!rig.engine.store.contains_order("CXL"));
    // The filled buy produced its sell: 48000 * 1.01 < ticker, so the sell
    // lands at ticker * 1.01 = 50500.
    let sells = sorted_prices(&rig.engine, OrderSide::Sell);
    assert_eq!(sells.len(), 1);
    assert_close(sells[0], 50500.0);
}

#[tokio::test(start_paused = true)]
async fn test_reconciliation_is_idempotent() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;

    let mut before: Vec<String> = rig
        .engine
        .store
        .orders(None)
        .iter()
        .map(|o| o.txid.clone())
        .collect();
    before.sort();

    rig.engine.sync_order_book().await.unwrap();

    let mut after: Vec<String> = rig
        .engine
        .store
        .orders(None)
        .iter()
        .map(|o| o.txid.clone())
        .collect();
    after.sort();
    assert_eq!(before, after);
}

#[tokio::test(start_paused = true)]
async fn test_changed_grid_settings_cancel_open_buys() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    rig.engine
        .store
        .update_config(|c| {
            // The previous run used a different grid size.
            c.amount_per_grid = Some(50.0);
            c.interval = Some(0.01);
        })
        .unwrap();

    rig.mock
        .seed_order(upstream_buy("OLD", 49000.0, OrderStatus::Open))
        .await;
    rig.engine
        .store
        .add_order(crate::store::OrderRecord::from_info(&upstream_buy(
            "OLD",
            49000.0,
            OrderStatus::Open,
        )))
        .unwrap();

    start_running(&mut rig, 50000.0).await;

    assert!(rig
        .mock
        .cancelled_txids
        .lock()
        .await
        .contains(&"OLD".to_string()));
    assert_eq!(
        rig.engine.store.get_config().unwrap().amount_per_grid,
        Some(100.0)
    );
}

#[tokio::test(start_paused = true)]
async fn test_pending_intents_block_the_range_pass() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;

    // A placement from a crashed pass: txid known upstream, not yet local.
    rig.mock
        .seed_order(upstream_buy("PEND", 46500.0, OrderStatus::Open))
        .await;
    rig.engine.store.pending_add("PEND").unwrap();

    rig.engine.on_message(ticker_event(50000.0)).await;

    // The pass only replayed the intent and stopped: the order is adopted,
    // and despite now exceeding n buys nothing was cancelled or placed.
    assert!(rig.engine.store.contains_order("PEND"));
    assert_eq!(rig.engine.store.pending_count(), 0);
    assert_eq!(rig.engine.store.count_orders(Some(OrderSide::Buy)), 6);
}

// ----------------------------------------------------------------------
// Fill handling and arbitrage

#[tokio::test(start_paused = true)]
async fn test_buy_fill_places_the_paired_sell() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;

    let top = rig.mock.open_txids(OrderSide::Buy).await[0].clone();
    rig.mock.fill_order(&top).await;
    rig.engine.on_message(filled_event(&top)).await;

    assert!(!rig.engine.store.contains_order(&top));
    let sells = sorted_prices(&rig.engine, OrderSide::Sell);
    assert_eq!(sells.len(), 1);
    // 49504.9 * 1.01 = 50000.949..., truncated to 50000.9.
    assert_close(sells[0], 50000.9);

    let messages = drain(&mut rig.notifications);
    assert!(messages.iter().any(|m| m.contains("Buy order executed")));
}

#[tokio::test(start_paused = true)]
async fn test_grid_scenario_sell_price_after_rally() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;

    rig.engine.on_message(ticker_event(60000.0)).await;
    rig.engine.on_message(ticker_event(59405.9)).await;

    let top = rig.mock.open_txids(OrderSide::Buy).await[0].clone();
    rig.mock.fill_order(&top).await;
    rig.engine.on_message(filled_event(&top)).await;

    // 59405.9 * 1.01 = 59999.959..., truncated to 59999.9.
    let sells = sorted_prices(&rig.engine, OrderSide::Sell);
    assert_eq!(sells.len(), 1);
    assert_close(sells[0], 59999.9);
}

#[tokio::test(start_paused = true)]
async fn test_last_sell_fill_relies_on_shift_up() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;

    let top = rig.mock.open_txids(OrderSide::Buy).await[0].clone();
    rig.mock.fill_order(&top).await;
    rig.engine.on_message(filled_event(&top)).await;

    let sell = rig.mock.open_txids(OrderSide::Sell).await[0].clone();
    rig.mock.fill_order(&sell).await;
    let buys_before = rig.engine.store.count_orders(Some(OrderSide::Buy));
    rig.engine.on_message(filled_event(&sell)).await;

    // The last open sell was filled: no replacement buy, the shift-up check
    // covers the rebuild on the next ticker.
    assert!(!rig.engine.store.contains_order(&sell));
    assert_eq!(
        rig.engine.store.count_orders(Some(OrderSide::Buy)),
        buys_before
    );
    assert_eq!(rig.engine.store.count_orders(Some(OrderSide::Sell)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sell_fill_places_replacement_buy_when_sells_remain() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;

    // Two positions -> two sells.
    for _ in 0..2 {
        let top = rig.mock.open_txids(OrderSide::Buy).await[0].clone();
        rig.mock.fill_order(&top).await;
        rig.engine.on_message(filled_event(&top)).await;
    }
    assert_eq!(rig.engine.store.count_orders(Some(OrderSide::Sell)), 2);

    let sells = rig.mock.open_txids(OrderSide::Sell).await;
    let highest_sell = sells[0].clone();
    let buys_before = rig.engine.store.count_orders(Some(OrderSide::Buy));
    rig.mock.fill_order(&highest_sell).await;
    rig.engine.on_message(filled_event(&highest_sell)).await;

    assert_eq!(rig.engine.store.count_orders(Some(OrderSide::Sell)), 1);
    assert_eq!(
        rig.engine.store.count_orders(Some(OrderSide::Buy)),
        buys_before + 1
    );
}

#[tokio::test(start_paused = true)]
async fn test_unclosed_fill_event_is_requeued() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;

    // Fill event arrives but upstream still reports the order as open.
    let top = rig.mock.open_txids(OrderSide::Buy).await[0].clone();
    rig.engine.on_message(filled_event(&top)).await;

    assert_eq!(rig.engine.state_machine.state(), BotState::Running);
    assert_eq!(rig.engine.requeued_events.len(), 1);
    assert!(rig.engine.store.contains_order(&top));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_event_for_unknown_txid_is_ignored() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;

    let orders_before = rig.engine.store.count_orders(None);
    rig.engine.on_message(canceled_event("SOMEONE-ELSES")).await;

    assert_eq!(rig.engine.state_machine.state(), BotState::Running);
    assert_eq!(rig.engine.store.count_orders(None), orders_before);
}

// ----------------------------------------------------------------------
// Partial fills

#[tokio::test(start_paused = true)]
async fn test_partial_fill_consolidation_fires_and_resets() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;

    // First cancelled buy leaves 0.001 BTC behind: not enough for a sell.
    let first = rig.mock.open_txids(OrderSide::Buy).await[0].clone();
    rig.mock.partially_fill_order(&first, 0.001).await;
    rig.engine.on_message(canceled_event(&first)).await;

    let config_row = rig.engine.store.get_config().unwrap();
    assert_close(config_row.vol_of_unfilled_remaining, 0.001);
    assert_close(config_row.vol_of_unfilled_remaining_max_price, 49504.9);
    assert_eq!(rig.engine.store.count_orders(Some(OrderSide::Sell)), 0);

    // Second leftover pushes the accumulated value over amount_per_grid:
    // 0.0021 * 49504.9 = 103.96 >= 100.
    let second = rig.mock.open_txids(OrderSide::Buy).await[0].clone();
    rig.mock.partially_fill_order(&second, 0.0011).await;
    rig.engine.on_message(canceled_event(&second)).await;

    assert_eq!(rig.engine.store.count_orders(Some(OrderSide::Sell)), 1);
    let config_row = rig.engine.store.get_config().unwrap();
    assert_eq!(config_row.vol_of_unfilled_remaining, 0.0);
    assert_eq!(config_row.vol_of_unfilled_remaining_max_price, 0.0);
}

// ----------------------------------------------------------------------
// Unsold intent replay and variant behavior

#[tokio::test(start_paused = true)]
async fn test_unsold_intent_survives_and_replays() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;

    // No base available: the sell for a filled buy cannot be placed.
    rig.mock
        .set_balances(crate::exchange::PairBalance {
            base_balance: 0.0,
            base_available: 0.0,
            quote_balance: 1_000_000.0,
            quote_available: 1_000_000.0,
        })
        .await;

    let top = rig.mock.open_txids(OrderSide::Buy).await[0].clone();
    rig.mock.fill_order(&top).await;
    rig.engine.on_message(filled_event(&top)).await;

    assert_eq!(rig.engine.state_machine.state(), BotState::Running);
    assert_eq!(rig.engine.store.unsold_count(), 1);
    assert_eq!(rig.engine.store.count_orders(Some(OrderSide::Sell)), 0);
    // The consumed buy stays tracked until its sell goes through.
    assert!(rig.engine.store.contains_order(&top));

    // Funds arrive; the next ticker drains the unsold intents.
    rig.mock
        .set_balances(crate::exchange::PairBalance {
            base_balance: 1.0,
            base_available: 1.0,
            quote_balance: 1_000_000.0,
            quote_available: 1_000_000.0,
        })
        .await;
    rig.engine.on_message(ticker_event(50000.0)).await;

    assert_eq!(rig.engine.store.unsold_count(), 0);
    assert_eq!(rig.engine.store.count_orders(Some(OrderSide::Sell)), 1);
    assert!(!rig.engine.store.contains_order(&top));
}

#[tokio::test(start_paused = true)]
async fn test_gridsell_missing_base_is_fatal() {
    let mut rig = rig(base_config(StrategyKind::GridSell));
    start_running(&mut rig, 50000.0).await;

    rig.mock
        .set_balances(crate::exchange::PairBalance {
            base_balance: 0.0,
            base_available: 0.0,
            quote_balance: 1_000_000.0,
            quote_available: 1_000_000.0,
        })
        .await;

    let top = rig.mock.open_txids(OrderSide::Buy).await[0].clone();
    rig.mock.fill_order(&top).await;
    rig.engine.on_message(filled_event(&top)).await;

    assert_eq!(rig.engine.state_machine.state(), BotState::Error);
}

#[tokio::test(start_paused = true)]
async fn test_gridsell_sells_the_executed_buy_volume() {
    let mut rig = rig(base_config(StrategyKind::GridSell));
    start_running(&mut rig, 50000.0).await;

    let top = rig.mock.open_txids(OrderSide::Buy).await[0].clone();
    rig.mock.fill_order(&top).await;
    let executed = rig.mock.order(&top).await.unwrap().vol_exec;
    rig.engine.on_message(filled_event(&top)).await;

    let sell = rig.engine.store.orders(Some(OrderSide::Sell))[0].clone();
    assert!((sell.volume - executed).abs() < 1e-8);
}

#[tokio::test(start_paused = true)]
async fn test_cdca_never_sells() {
    let mut rig = rig(base_config(StrategyKind::Cdca));
    start_running(&mut rig, 50000.0).await;

    let top = rig.mock.open_txids(OrderSide::Buy).await[0].clone();
    rig.mock.fill_order(&top).await;
    rig.engine.on_message(filled_event(&top)).await;

    assert_eq!(rig.engine.state_machine.state(), BotState::Running);
    assert_eq!(rig.engine.store.count_orders(Some(OrderSide::Sell)), 0);
    assert!(!rig.engine.store.contains_order(&top));
}

#[tokio::test(start_paused = true)]
async fn test_swing_places_extra_sell_from_free_base() {
    let mut rig = rig(base_config(StrategyKind::Swing));
    start_running(&mut rig, 50000.0).await;

    // 100 BTC of free base and no open sell: the extra sell goes one
    // interval above the ticker.
    let sells = sorted_prices(&rig.engine, OrderSide::Sell);
    assert_eq!(sells.len(), 1);
    assert_close(sells[0], 50500.0);

    let messages = drain(&mut rig.notifications);
    assert!(messages.iter().any(|m| m.contains("extra sell order")));
}

// ----------------------------------------------------------------------
// Status and run loop

#[tokio::test(start_paused = true)]
async fn test_status_update_renders_the_ladder() {
    let mut rig = rig(base_config(StrategyKind::GridHodl));
    start_running(&mut rig, 50000.0).await;
    drain(&mut rig.notifications);

    rig.engine.send_status_update().await.unwrap();

    let messages = drain(&mut rig.notifications);
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("👑 test-bot"));
    assert!(messages[0].contains("Open orders » 5"));
    assert!(messages[0].contains("49504.9"));
    assert!(rig.engine.last_status_update.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_shuts_down_cleanly() {
    let rig = rig(base_config(StrategyKind::GridHodl));
    let mut engine = rig.engine;
    let state_machine = engine.state_machine();
    let (mut stream, events) = MockStream::new();

    events.send(ticker_event(50000.0)).unwrap();
    events.send(snapshot_event()).unwrap();
    state_machine
        .transition_to(BotState::ShutdownRequested)
        .unwrap();

    let handle = tokio::spawn(async move {
        let result = engine.run(&mut stream).await;
        (result, stream)
    });
    let (result, stream) = handle.await.unwrap();

    result.unwrap();
    assert_eq!(state_machine.state(), BotState::Shutdown);
    assert!(stream.closed);
    assert!(stream.subscriptions.iter().any(|s| matches!(
        s,
        Subscription::Executions { snapshots: true }
    )));
}

// ----------------------------------------------------------------------
// Trailing stop profit

fn tsp_config() -> crate::config::BotConfig {
    let mut config = base_config(StrategyKind::GridHodl);
    config.trailing_stop_profit = Some(0.01);
    config
}

/// Open a position: fill the top buy and let the next ticker associate the
/// TSP row with its sell order. Returns the original buy txid.
async fn open_tsp_position(rig: &mut TestRig) -> String {
    let top = rig.mock.open_txids(OrderSide::Buy).await[0].clone();
    rig.mock.fill_order(&top).await;
    rig.engine.on_message(filled_event(&top)).await;
    rig.engine.on_message(ticker_event(50000.0)).await;
    top
}

#[tokio::test(start_paused = true)]
async fn test_tsp_initial_sell_sits_two_steps_higher() {
    let mut rig = rig(tsp_config());
    start_running(&mut rig, 50000.0).await;

    let buy_txid = open_tsp_position(&mut rig).await;

    // Sell target is interval + 2x TSP above the buy:
    // 49504.9 * 1.03 = 50990.047 -> 50990.0.
    let sells = sorted_prices(&rig.engine, OrderSide::Sell);
    assert_close(sells[0], 50990.0);

    // The row exists, is inactive, and got linked to the sell order.
    let state = rig.engine.store.tsp_by_buy_txid(&buy_txid).unwrap();
    assert!(!state.tsp_active);
    assert_close(state.original_buy_price, 49504.9);
    assert!(state.current_sell_order_txid.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_tsp_stays_inactive_below_the_activation_price() {
    let mut rig = rig(tsp_config());
    start_running(&mut rig, 50000.0).await;
    let buy_txid = open_tsp_position(&mut rig).await;

    // Activation sits at 49504.9 * (1 + 0.01 + 0.01) = 50494.998.
    for price in [49800.0, 50200.0, 50490.0] {
        rig.engine.on_message(ticker_event(price)).await;
        let state = rig.engine.store.tsp_by_buy_txid(&buy_txid).unwrap();
        assert!(!state.tsp_active, "TSP must stay inactive at {price}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_tsp_activation_shifts_the_sell_order() {
    let mut rig = rig(tsp_config());
    start_running(&mut rig, 50000.0).await;
    let buy_txid = open_tsp_position(&mut rig).await;
    let sell_txid = rig
        .engine
        .store
        .tsp_by_buy_txid(&buy_txid)
        .unwrap()
        .current_sell_order_txid
        .unwrap();

    rig.engine.on_message(ticker_event(50495.0)).await;

    let state = rig.engine.store.tsp_by_buy_txid(&buy_txid).unwrap();
    assert!(state.tsp_active);
    // Stop follows the ticker one TSP below.
    assert_close(state.current_stop_price, 50495.0 * (1.0 - 0.01));
    // The old sell was cancelled, its replacement queued one TSP step up
    // (50990.0 + 49504.9 * 0.01), and the row unlinked until the drain.
    assert!(!rig.engine.store.contains_order(&sell_txid));
    assert_eq!(rig.engine.store.future_order_prices().len(), 1);
    assert_close(
        rig.engine.store.future_order_prices()[0],
        50990.0 + 49504.9 * 0.01,
    );
    assert!(state.current_sell_order_txid.is_none());

    // The next pass drains the future order into a real sell and
    // re-associates it with the position.
    rig.engine.on_message(ticker_event(50495.0)).await;
    let state = rig.engine.store.tsp_by_buy_txid(&buy_txid).unwrap();
    assert!(state.current_sell_order_txid.is_some());
    assert!(rig.engine.store.future_order_prices().is_empty());
    let sells = sorted_prices(&rig.engine, OrderSide::Sell);
    assert_close(sells[0], 51485.0);

    // Activation happens exactly once: the flag simply stays set.
    rig.engine.on_message(ticker_event(50495.0)).await;
    assert!(rig.engine.store.tsp_by_buy_txid(&buy_txid).unwrap().tsp_active);
}

#[tokio::test(start_paused = true)]
async fn test_tsp_trigger_closes_the_position() {
    let mut rig = rig(tsp_config());
    start_running(&mut rig, 50000.0).await;
    let buy_txid = open_tsp_position(&mut rig).await;

    // Activate and let the shifted sell get re-associated.
    rig.engine.on_message(ticker_event(50495.0)).await;
    rig.engine.on_message(ticker_event(50495.0)).await;
    let state = rig.engine.store.tsp_by_buy_txid(&buy_txid).unwrap();
    let leading_sell = state.current_sell_order_txid.clone().unwrap();
    assert_close(state.current_stop_price, 50495.0 * (1.0 - 0.01));

    // Price falls back onto the stop: the leading sell is cancelled and the
    // position closes at max(ticker, buy * (1 + interval + 2 * fee)) =
    // 49504.9 * 1.015 = 50247.4735 -> 50247.4.
    rig.engine.on_message(ticker_event(49990.0)).await;

    assert!(rig.engine.store.tsp_by_buy_txid(&buy_txid).is_none());
    assert!(!rig.engine.store.contains_order(&leading_sell));
    let sells = sorted_prices(&rig.engine, OrderSide::Sell);
    assert!(sells.iter().any(|p| (p - 50247.4).abs() < 1e-9));

    let messages = drain(&mut rig.notifications);
    assert!(messages
        .iter()
        .any(|m| m.contains("Trailing stop profit triggered")));
}

#[tokio::test(start_paused = true)]
async fn test_tsp_row_is_dropped_when_the_sell_fills() {
    let mut rig = rig(tsp_config());
    start_running(&mut rig, 50000.0).await;
    let buy_txid = open_tsp_position(&mut rig).await;
    let sell_txid = rig
        .engine
        .store
        .tsp_by_buy_txid(&buy_txid)
        .unwrap()
        .current_sell_order_txid
        .unwrap();

    rig.mock.fill_order(&sell_txid).await;
    rig.engine.on_message(filled_event(&sell_txid)).await;

    assert!(rig.engine.store.tsp_by_buy_txid(&buy_txid).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_fails_when_stream_dies() {
    let rig = rig(base_config(StrategyKind::GridHodl));
    let mut engine = rig.engine;
    let state_machine = engine.state_machine();
    let (mut stream, events) = MockStream::new();
    drop(events);

    let result = engine.run(&mut stream).await;

    assert!(matches!(result, Err(BotError::State(_))));
    assert_eq!(state_machine.state(), BotState::Error);
}
