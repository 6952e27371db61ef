//! Shared fixtures for engine tests

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::{BotConfig, StrategyKind};
use crate::event_bus::{EventBus, Notification, NOTIFICATION_TOPIC};
use crate::exchange::mock::MockExchange;
use crate::exchange::{ExecType, ExecutionKind, StreamEvent, TickerUpdate};
use crate::state_machine::BotState;
use crate::store::Store;

use super::GridEngine;

pub(crate) const SYMBOL: &str = "BTC/USD";

/// The concrete scenario configuration: interval 1%, 100 per grid, 0.25% fee
pub(crate) fn base_config(strategy: StrategyKind) -> BotConfig {
    BotConfig {
        name: "test-bot".into(),
        userref: 1,
        strategy,
        base_currency: "BTC".into(),
        quote_currency: "USD".into(),
        amount_per_grid: 100.0,
        interval: 0.01,
        n_open_buy_orders: 5,
        max_investment: f64::INFINITY,
        fee: Some(0.0025),
        trailing_stop_profit: None,
        skip_price_timeout: false,
        dry_run: false,
        state_file: None,
    }
}

pub(crate) struct TestRig {
    pub(crate) engine: GridEngine,
    pub(crate) mock: Arc<MockExchange>,
    pub(crate) notifications: mpsc::UnboundedReceiver<Notification>,
}

pub(crate) fn rig(config: BotConfig) -> TestRig {
    let mock = Arc::new(MockExchange::new(SYMBOL));
    let bus = EventBus::new();
    let notifications = bus.subscribe(NOTIFICATION_TOPIC);
    let store = Store::open(None, config.userref).unwrap();
    let engine = GridEngine::new(config, mock.clone(), bus, store).unwrap();
    TestRig {
        engine,
        mock,
        notifications,
    }
}

pub(crate) fn ticker_event(price: f64) -> StreamEvent {
    StreamEvent::Ticker(TickerUpdate {
        symbol: SYMBOL.into(),
        last: price,
    })
}

pub(crate) fn snapshot_event() -> StreamEvent {
    StreamEvent::Executions {
        kind: ExecutionKind::Snapshot,
        executions: Vec::new(),
    }
}

pub(crate) fn filled_event(txid: &str) -> StreamEvent {
    StreamEvent::execution_update(ExecType::Filled, txid)
}

pub(crate) fn canceled_event(txid: &str) -> StreamEvent {
    StreamEvent::execution_update(ExecType::Canceled, txid)
}

/// Drive the engine through channel confirmation and setup into `Running`.
pub(crate) async fn start_running(rig: &mut TestRig, price: f64) {
    rig.engine.on_message(ticker_event(price)).await;
    rig.engine.on_message(snapshot_event()).await;
    assert_eq!(rig.engine.state_machine.state(), BotState::Running);
}
