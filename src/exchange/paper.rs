//! Paper trading gateway
//!
//! Simulates order execution locally by checking the driven price against
//! resting limit orders. Fills and ticker moves are delivered through the
//! same streaming channel a live gateway would use, so the engine cannot
//! tell the difference.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::{mpsc, Mutex};

use crate::errors::{BotError, BotResult};

use super::gateway::{truncate_decimals, ExchangeRest, ExchangeStream, Subscription};
use super::types::{
    AmountKind, AssetPairInfo, ExecType, NewOrder, OrderInfo, OrderSide, OrderStatus, PairBalance,
    StreamEvent, TickerUpdate,
};

struct PaperBook {
    orders: HashMap<String, OrderInfo>,
    balances: PairBalance,
    price: f64,
    events: Option<mpsc::UnboundedSender<StreamEvent>>,
    next_seq: u64,
}

impl PaperBook {
    fn emit(&self, event: StreamEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn should_fill(order: &OrderInfo, price: f64) -> bool {
        if order.status != OrderStatus::Open {
            return false;
        }
        match order.side {
            OrderSide::Buy => price <= order.price,
            OrderSide::Sell => price >= order.price,
        }
    }

    /// Execute `txid` at its limit price and adjust balances.
    fn fill(&mut self, txid: &str) {
        let Some(order) = self.orders.get_mut(txid) else {
            return;
        };
        order.status = OrderStatus::Closed;
        order.vol_exec = order.volume;
        let cost = order.price * order.volume;
        match order.side {
            OrderSide::Buy => {
                self.balances.quote_balance -= cost;
                self.balances.base_balance += order.volume;
                self.balances.base_available += order.volume;
            }
            OrderSide::Sell => {
                self.balances.base_balance -= order.volume;
                self.balances.quote_balance += cost;
                self.balances.quote_available += cost;
            }
        }
        debug!("Paper fill: {txid} ({} @ {})", order.side, order.price);
        self.emit(StreamEvent::execution_update(ExecType::Filled, txid));
    }
}

/// Simulated exchange gateway
///
/// Clones share the same book; [`PaperExchange::stream`] hands out the
/// matching [`ExchangeStream`] half.
#[derive(Clone)]
pub struct PaperExchange {
    symbol: String,
    price_decimals: u32,
    volume_decimals: u32,
    pair_info: AssetPairInfo,
    book: Arc<Mutex<PaperBook>>,
}

impl PaperExchange {
    pub fn new(symbol: &str, start_price: f64, initial_quote: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            price_decimals: 1,
            volume_decimals: 8,
            pair_info: AssetPairInfo {
                maker_fee: 0.25,
                cost_decimals: 1,
            },
            book: Arc::new(Mutex::new(PaperBook {
                orders: HashMap::new(),
                balances: PairBalance {
                    base_balance: 0.0,
                    base_available: 0.0,
                    quote_balance: initial_quote,
                    quote_available: initial_quote,
                },
                price: start_price,
                events: None,
                next_seq: 1,
            })),
        }
    }

    /// The stream half feeding the engine
    pub fn stream(&self) -> PaperStream {
        PaperStream {
            symbol: self.symbol.clone(),
            book: Arc::clone(&self.book),
        }
    }

    /// Drive the simulated price: emits a ticker update and executes every
    /// resting order the new price crosses.
    pub async fn set_price(&self, price: f64) {
        let mut book = self.book.lock().await;
        book.price = price;
        book.emit(StreamEvent::Ticker(TickerUpdate {
            symbol: self.symbol.clone(),
            last: price,
        }));

        let crossed: Vec<String> = book
            .orders
            .values()
            .filter(|o| PaperBook::should_fill(o, price))
            .map(|o| o.txid.clone())
            .collect();
        for txid in crossed {
            book.fill(&txid);
        }
    }

    pub async fn current_price(&self) -> f64 {
        self.book.lock().await.price
    }
}

#[async_trait]
impl ExchangeRest for PaperExchange {
    fn rest_symbol(&self) -> String {
        self.symbol.clone()
    }

    fn ws_symbol(&self) -> String {
        self.symbol.clone()
    }

    async fn check_exchange_status(&self) -> BotResult<()> {
        Ok(())
    }

    async fn check_api_key_permissions(&self) -> BotResult<()> {
        Ok(())
    }

    async fn get_asset_pair_info(&self) -> BotResult<AssetPairInfo> {
        Ok(self.pair_info)
    }

    async fn get_open_orders(&self, userref: u32) -> BotResult<Vec<OrderInfo>> {
        let book = self.book.lock().await;
        Ok(book
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Open && o.userref == userref)
            .cloned()
            .collect())
    }

    async fn get_order_with_retry(&self, txid: &str, _exit_on_fail: bool) -> BotResult<OrderInfo> {
        self.book
            .lock()
            .await
            .orders
            .get(txid)
            .cloned()
            .ok_or_else(|| BotError::OrderFetchFailed {
                txid: txid.to_string(),
                attempts: 3,
            })
    }

    async fn cancel_order(&self, txid: &str) -> BotResult<()> {
        let mut book = self.book.lock().await;
        let Some(order) = book.orders.get_mut(txid) else {
            return Err(BotError::UnknownOrder(txid.to_string()));
        };
        if order.status != OrderStatus::Open {
            return Err(BotError::UnknownOrder(txid.to_string()));
        }
        order.status = OrderStatus::Canceled;

        // Release the reserved balance for the unexecuted remainder.
        let (side, price, remaining) = (order.side, order.price, order.volume - order.vol_exec);
        match side {
            OrderSide::Buy => book.balances.quote_available += price * remaining,
            OrderSide::Sell => book.balances.base_available += remaining,
        }
        book.emit(StreamEvent::execution_update(ExecType::Canceled, txid));
        Ok(())
    }

    async fn create_order(&self, order: &NewOrder) -> BotResult<String> {
        let mut book = self.book.lock().await;

        match order.side {
            OrderSide::Buy => {
                let cost = order.price * order.volume;
                if book.balances.quote_available < cost {
                    return Err(BotError::InsufficientFunds {
                        currency: "quote".into(),
                        required: cost,
                        available: book.balances.quote_available,
                    });
                }
                book.balances.quote_available -= cost;
            }
            OrderSide::Sell => {
                if book.balances.base_available < order.volume {
                    return Err(BotError::InsufficientFunds {
                        currency: "base".into(),
                        required: order.volume,
                        available: book.balances.base_available,
                    });
                }
                book.balances.base_available -= order.volume;
            }
        }

        let txid = format!("PAPER{}", book.next_seq);
        book.next_seq += 1;
        let info = OrderInfo {
            txid: txid.clone(),
            userref: order.userref,
            pair: self.symbol.clone(),
            side: order.side,
            status: OrderStatus::Open,
            price: order.price,
            volume: order.volume,
            vol_exec: 0.0,
        };
        book.orders.insert(txid.clone(), info);
        info!(
            "Paper order placed: {txid} {} {} @ {}",
            order.side, order.volume, order.price
        );
        book.emit(StreamEvent::execution_update(ExecType::New, &txid));

        // Marketable orders execute right away.
        let price = book.price;
        if book
            .orders
            .get(&txid)
            .is_some_and(|o| PaperBook::should_fill(o, price))
        {
            book.fill(&txid);
        }

        Ok(txid)
    }

    async fn get_pair_balance(&self) -> BotResult<PairBalance> {
        Ok(self.book.lock().await.balances)
    }

    fn truncate(&self, amount: f64, kind: AmountKind) -> String {
        let decimals = match kind {
            AmountKind::Price => self.price_decimals,
            AmountKind::Volume => self.volume_decimals,
        };
        truncate_decimals(amount, decimals)
    }
}

/// Stream half of [`PaperExchange`]
pub struct PaperStream {
    symbol: String,
    book: Arc<Mutex<PaperBook>>,
}

#[async_trait]
impl ExchangeStream for PaperStream {
    async fn connect(&mut self) -> BotResult<mpsc::UnboundedReceiver<StreamEvent>> {
        let mut book = self.book.lock().await;
        if book.events.is_some() {
            return Err(BotError::Stream("Paper stream already connected".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        book.events = Some(tx);
        Ok(rx)
    }

    async fn subscribe(&mut self, subscription: Subscription) -> BotResult<()> {
        let book = self.book.lock().await;
        match subscription {
            Subscription::Ticker { .. } => {
                book.emit(StreamEvent::Ticker(TickerUpdate {
                    symbol: self.symbol.clone(),
                    last: book.price,
                }));
            }
            Subscription::Executions { snapshots } => {
                if snapshots {
                    book.emit(StreamEvent::Executions {
                        kind: super::types::ExecutionKind::Snapshot,
                        executions: Vec::new(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> BotResult<()> {
        self.book.lock().await.events = None;
        Ok(())
    }
}
