//! Grid strategy engine
//!
//! Orchestrates the orderbook mirror, the intent log, the TSP tracker and
//! the exchange gateway. The engine is the only writer of all local state;
//! stream events and timer ticks are processed strictly one at a time by a
//! single `tokio::select!` loop, so every order decision observes a
//! consistent snapshot.

mod orders;
mod range;
mod setup;
mod status;
mod tsp;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use tokio::time::MissedTickBehavior;

use crate::config::BotConfig;
use crate::errors::{BotError, BotResult};
use crate::event_bus::{EventBus, Notification, NOTIFICATION_TOPIC};
use crate::exchange::{
    AmountKind, ExchangeRest, ExchangeStream, ExecType, ExecutionKind, OrderInfo, StreamEvent,
    Subscription, TickerUpdate,
};
use crate::state_machine::{BotState, StateMachine};
use crate::store::Store;
use crate::strategy::{self, SellBehavior};

/// Seconds between run-loop ticks
const TICK_INTERVAL_SECS: u64 = 6;
/// Ticker silence that is considered a dead connection
const PRICE_TIMEOUT_SECS: i64 = 600;
/// Pause after every order placement or cancellation
pub(crate) const RATE_LIMIT_PAUSE: Duration = Duration::from_millis(200);

/// The grid strategy engine
pub struct GridEngine {
    pub(crate) config: BotConfig,
    pub(crate) rest: Arc<dyn ExchangeRest>,
    pub(crate) bus: EventBus,
    pub(crate) state_machine: StateMachine,
    pub(crate) store: Store,
    pub(crate) sell_behavior: Arc<dyn SellBehavior>,

    pub(crate) ticker: Option<f64>,
    last_price_time: Option<DateTime<Utc>>,
    pub(crate) last_status_update: Option<DateTime<Utc>>,

    /// Maker fee as a fraction, resolved during setup
    pub(crate) fee: f64,
    pub(crate) cost_decimals: u32,
    pub(crate) amount_per_grid_plus_fee: f64,

    /// Execution events received before the engine is ready to trade
    missed_events: Vec<StreamEvent>,
    /// Events the engine handed back to itself, drained on the next tick
    requeued_events: VecDeque<StreamEvent>,
    ticker_channel_connected: bool,
    executions_channel_connected: bool,
    pub(crate) ready_to_trade: bool,
}

impl GridEngine {
    pub fn new(
        config: BotConfig,
        rest: Arc<dyn ExchangeRest>,
        bus: EventBus,
        store: Store,
    ) -> BotResult<Self> {
        config.validate()?;
        let sell_behavior = strategy::behavior_for(config.strategy);
        let amount_per_grid_plus_fee = config.amount_per_grid * (1.0 + config.fee.unwrap_or(0.0));

        Ok(Self {
            fee: config.fee.unwrap_or(0.0),
            amount_per_grid_plus_fee,
            config,
            rest,
            bus,
            state_machine: StateMachine::new(),
            store,
            sell_behavior,
            ticker: None,
            last_price_time: None,
            last_status_update: None,
            cost_decimals: 0,
            missed_events: Vec::new(),
            requeued_events: VecDeque::new(),
            ticker_channel_connected: false,
            executions_channel_connected: false,
            ready_to_trade: false,
        })
    }

    /// Handle to the lifecycle state machine (shared, cloneable)
    pub fn state_machine(&self) -> StateMachine {
        self.state_machine.clone()
    }

    /// Main entry point: connect, subscribe, then loop until a terminal
    /// state is reached.
    pub async fn run<S: ExchangeStream>(&mut self, stream: &mut S) -> BotResult<()> {
        self.rest.check_exchange_status().await?;
        self.rest.check_api_key_permissions().await?;

        if self.state_machine.state() == BotState::Error {
            return Err(BotError::State(
                "The algorithm was shut down by error during initialization".into(),
            ));
        }

        info!("Starting the stream connection...");
        let mut events = stream.connect().await?;
        info!("Stream connection established!");

        info!("Subscribing to channels...");
        stream
            .subscribe(Subscription::Ticker {
                symbol: self.rest.ws_symbol(),
            })
            .await?;
        stream
            .subscribe(Subscription::Executions { snapshots: true })
            .await?;

        let mut tick = tokio::time::interval(Duration::from_secs(TICK_INTERVAL_SECS));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            match self.state_machine.state() {
                BotState::Error => {
                    let _ = stream.close().await;
                    return Err(BotError::State(
                        "The algorithm was shut down by an error".into(),
                    ));
                }
                BotState::ShutdownRequested => {
                    info!("Shutdown requested, winding down...");
                    self.state_machine.transition_to(BotState::Shutdown)?;
                    break;
                }
                BotState::Shutdown => break,
                _ => {}
            }

            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => self.on_message(event).await,
                    None => {
                        error!("Stream channel closed unexpectedly");
                        let _ = self.state_machine.transition_to(BotState::Error);
                    }
                },
                _ = tick.tick() => self.on_tick().await,
            }
        }

        stream.close().await?;
        Ok(())
    }

    /// Handle one inbound stream event. Any error is fatal: it is logged and
    /// the engine transitions to the terminal error state.
    pub async fn on_message(&mut self, event: StreamEvent) {
        if let Err(err) = self.dispatch(event).await {
            error!("Exception while processing message: {err}");
            if let Err(transition_err) = self.state_machine.transition_to(BotState::Error) {
                error!("Failed to enter error state: {transition_err}");
            }
            return;
        }

        // Once setup completed, replay the executions that were buffered
        // while the engine was not yet ready to trade, in arrival order.
        while self.ready_to_trade && !self.missed_events.is_empty() {
            let missed = std::mem::take(&mut self.missed_events);
            for buffered in missed {
                if let Err(err) = self.dispatch(buffered).await {
                    error!("Exception while replaying buffered message: {err}");
                    let _ = self.state_machine.transition_to(BotState::Error);
                    return;
                }
            }
        }
    }

    async fn dispatch(&mut self, event: StreamEvent) -> BotResult<()> {
        if self.state_machine.state() != BotState::Running
            && !self.handle_setup_phase(&event).await?
        {
            return Ok(());
        }

        match event {
            StreamEvent::Ticker(ticker) => self.on_ticker_update(&ticker).await,
            StreamEvent::Executions { kind, executions } => {
                if kind != ExecutionKind::Update {
                    // Snapshots only signal channel readiness.
                    return Ok(());
                }
                for execution in executions {
                    debug!("Got execution: {execution:?}");
                    match execution.exec_type {
                        ExecType::New => {
                            debug!("Processing new order: '{}'", execution.order_id);
                            self.assign_order_by_txid(&execution.order_id).await?;
                        }
                        ExecType::Filled => {
                            debug!("Processing filled order: '{}'", execution.order_id);
                            self.handle_filled_order_event(&execution.order_id).await?;
                        }
                        ExecType::Canceled | ExecType::Expired => {
                            debug!("Processing cancelled order: '{}'", execution.order_id);
                            self.handle_cancel_order(&execution.order_id).await?;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Track channel readiness and run the one-time setup once both channels
    /// are confirmed. Returns whether `event` should continue into normal
    /// handling: tickers are applied here already (to have a price available
    /// during setup), executions are buffered until the engine is ready.
    async fn handle_setup_phase(&mut self, event: &StreamEvent) -> BotResult<bool> {
        match event {
            StreamEvent::Ticker(ticker) => {
                if !self.ticker_channel_connected {
                    self.ticker_channel_connected = true;
                    info!("- Subscribed to ticker channel successfully!");
                }
                self.on_ticker_update(ticker).await?;
            }
            StreamEvent::Executions { .. } => {
                if !self.executions_channel_connected {
                    self.executions_channel_connected = true;
                    info!("- Subscribed to executions channel successfully!");
                }
            }
        }

        if self.ticker_channel_connected
            && self.executions_channel_connected
            && !self.ready_to_trade
        {
            // Buffered executions are replayed by `on_message` right after
            // the current event completes.
            self.prepare_for_trading().await?;
        }

        if !self.ready_to_trade {
            if matches!(event, StreamEvent::Executions { .. }) {
                self.missed_events.push(event.clone());
            }
            return Ok(false);
        }

        // The ticker was already applied above; executions continue into
        // normal handling.
        Ok(matches!(event, StreamEvent::Executions { .. }))
    }

    async fn on_ticker_update(&mut self, ticker: &TickerUpdate) -> BotResult<()> {
        if ticker.symbol != self.rest.ws_symbol() {
            debug!(
                "Ignoring ticker update for different symbol: {}",
                ticker.symbol
            );
            return Ok(());
        }

        self.ticker = Some(ticker.last);
        self.last_price_time = Some(Utc::now());

        if self.state_machine.state() == BotState::Running {
            if self.store.unsold_count() != 0 {
                self.add_missed_sell_orders().await?;
            }
            self.check_price_range().await?;
        }
        Ok(())
    }

    /// Periodic housekeeping: drain requeued events, send the hourly status
    /// notification, watch for a dead price feed.
    async fn on_tick(&mut self) {
        // Replay what was requeued before this tick; an event that requeues
        // itself again waits for the next one.
        for _ in 0..self.requeued_events.len() {
            let Some(event) = self.requeued_events.pop_front() else {
                break;
            };
            self.on_message(event).await;
            if self.state_machine.state().is_terminal() {
                return;
            }
        }

        let now = Utc::now();

        if self.state_machine.state() == BotState::Running
            && self.last_price_time.is_some()
            && self
                .last_status_update
                .map_or(true, |last| last < now - chrono::Duration::hours(1))
        {
            if let Err(err) = self.send_status_update().await {
                error!("Exception in main loop: {err}");
                let _ = self.state_machine.transition_to(BotState::Error);
                return;
            }
        }

        if !self.config.skip_price_timeout {
            if let Some(last) = self.last_price_time {
                if last + chrono::Duration::seconds(PRICE_TIMEOUT_SECS) < now {
                    error!("No price update since 10 minutes - exiting!");
                    let _ = self.state_machine.transition_to(BotState::Error);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Shared helpers

    pub(crate) fn publish_notification(&self, message: String) {
        self.bus
            .publish(NOTIFICATION_TOPIC, Notification::new(message));
    }

    /// Hand an event back to the engine; it is replayed on a later tick.
    pub(crate) fn requeue_event(&mut self, event: StreamEvent) {
        self.requeued_events.push_back(event);
    }

    pub(crate) fn current_ticker(&self) -> BotResult<f64> {
        self.ticker
            .ok_or_else(|| BotError::State("No ticker price available yet".into()))
    }

    pub(crate) fn owns_order(&self, order: &OrderInfo) -> bool {
        order.pair == self.rest.rest_symbol() && order.userref == self.config.userref
    }

    /// Quote value currently bound in open orders
    pub(crate) fn investment(&self) -> f64 {
        self.store.total_order_value()
    }

    pub(crate) fn max_investment_reached(&self) -> bool {
        let investment = self.investment();
        self.config.max_investment <= investment + self.amount_per_grid_plus_fee
            || self.config.max_investment <= investment
    }

    pub(crate) fn truncate_price(&self, price: f64) -> BotResult<f64> {
        self.rest
            .truncate(price, AmountKind::Price)
            .parse::<f64>()
            .map_err(|e| BotError::State(format!("Gateway returned a non-numeric price: {e}")))
    }

    pub(crate) fn truncate_volume(&self, volume: f64) -> BotResult<f64> {
        self.rest
            .truncate(volume, AmountKind::Volume)
            .parse::<f64>()
            .map_err(|e| BotError::State(format!("Gateway returned a non-numeric volume: {e}")))
    }

    /// Price for the next buy order below `last_price`, never above the
    /// current ticker.
    pub(crate) fn get_buy_order_price(&self, last_price: f64) -> BotResult<f64> {
        let ticker = self.current_ticker()?;
        let factor = 100.0 / (100.0 + 100.0 * self.config.interval);
        let mut order_price = last_price * factor;
        if order_price > ticker {
            order_price = ticker * factor;
        }
        Ok(order_price)
    }

    /// Price for the sell order pairing a buy at `last_price`. Also records
    /// a new highest buy when `last_price` exceeds the stored one.
    pub(crate) fn get_sell_order_price(&mut self, last_price: f64) -> BotResult<f64> {
        debug!("Computing the sell order price...");
        let ticker = self.current_ticker()?;

        let price_of_highest_buy = self.store.get_config()?.price_of_highest_buy;
        if last_price > price_of_highest_buy {
            self.store
                .update_config(|c| c.price_of_highest_buy = last_price)?;
        }

        let factor = match self.config.trailing_stop_profit {
            // With TSP the initial sell target sits interval + 2x TSP above.
            Some(tsp) => 1.0 + self.config.interval + 2.0 * tsp,
            None => 1.0 + self.config.interval,
        };

        let mut order_price = last_price * factor;
        if order_price < ticker {
            order_price = ticker * factor;
        }
        Ok(order_price)
    }
}

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod tests;
