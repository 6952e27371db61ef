//! Exchange gateway traits - enable mocking for tests
//!
//! [`ExchangeRest`] covers the request/response surface the engine needs,
//! [`ExchangeStream`] the ticker/executions channels. Wire-level protocol
//! adapters implementing these traits live outside this crate.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::BotResult;

use super::types::{
    AmountKind, AssetPairInfo, NewOrder, OrderInfo, PairBalance, StreamEvent,
};

/// Channel subscription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    Ticker { symbol: String },
    /// `snapshots` requests the initial executions dump, which the engine
    /// only uses to detect that the channel is connected.
    Executions { snapshots: bool },
}

/// REST operations of the exchange - can be mocked for testing
#[async_trait]
pub trait ExchangeRest: Send + Sync {
    /// Trading pair spelling used by REST order info (e.g. "XBTUSD")
    fn rest_symbol(&self) -> String;

    /// Trading pair spelling used on the streaming channels (e.g. "BTC/USD")
    fn ws_symbol(&self) -> String;

    /// Verify the exchange is operational
    async fn check_exchange_status(&self) -> BotResult<()>;

    /// Verify the API key has the required permissions
    async fn check_api_key_permissions(&self) -> BotResult<()>;

    /// Static pair metadata: maker fee and cost precision
    async fn get_asset_pair_info(&self) -> BotResult<AssetPairInfo>;

    /// All open orders tagged with `userref`
    async fn get_open_orders(&self, userref: u32) -> BotResult<Vec<OrderInfo>>;

    /// Fetch full order info, retrying transient failures internally.
    ///
    /// With `exit_on_fail` the gateway fails hard once its retries are
    /// exhausted; without it the last error is returned to the caller.
    async fn get_order_with_retry(&self, txid: &str, exit_on_fail: bool) -> BotResult<OrderInfo>;

    /// Cancel an order. Fails with [`crate::BotError::UnknownOrder`] if the
    /// order is already closed.
    async fn cancel_order(&self, txid: &str) -> BotResult<()>;

    /// Place a limit order and return its txid
    async fn create_order(&self, order: &NewOrder) -> BotResult<String>;

    /// Balances of the traded pair
    async fn get_pair_balance(&self) -> BotResult<PairBalance>;

    /// Truncate `amount` to the pair's price or volume precision
    fn truncate(&self, amount: f64, kind: AmountKind) -> String;
}

/// Streaming side of the exchange gateway
#[async_trait]
pub trait ExchangeStream: Send {
    /// Open the connection and return the event channel
    async fn connect(&mut self) -> BotResult<mpsc::UnboundedReceiver<StreamEvent>>;

    /// Subscribe to a channel
    async fn subscribe(&mut self, subscription: Subscription) -> BotResult<()>;

    /// Close the connection
    async fn close(&mut self) -> BotResult<()>;
}

/// Truncate (round towards zero) to a fixed number of decimals and render as
/// a decimal string, the way exchanges expect prices and volumes.
pub(crate) fn truncate_decimals(amount: f64, decimals: u32) -> String {
    let factor = 10f64.powi(decimals as i32);
    let truncated = (amount * factor).floor() / factor;
    format!("{:.*}", decimals as usize, truncated)
}

// ============================================================================
// Mock implementation for testing
// ============================================================================

/// Mock gateway for exercising the engine without an exchange connection.
pub mod mock {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    use tokio::sync::Mutex;
    use uuid::Uuid;

    use crate::errors::BotError;
    use crate::exchange::types::{OrderSide, OrderStatus};

    use super::*;

    /// Mock REST gateway backed by an in-memory upstream order map
    pub struct MockExchange {
        pub symbol: String,
        pub price_decimals: u32,
        pub volume_decimals: u32,
        /// Every order the mock has ever seen, keyed by txid
        pub orders: Mutex<HashMap<String, OrderInfo>>,
        /// Order of placement, for tests that need the txid sequence
        pub placed_txids: Mutex<Vec<String>>,
        pub cancelled_txids: Mutex<Vec<String>>,
        pub balances: Mutex<PairBalance>,
        pub pair_info: Mutex<AssetPairInfo>,
        pub should_fail_create: Mutex<bool>,
        next_seq: AtomicU64,
    }

    impl MockExchange {
        pub fn new(symbol: &str) -> Self {
            Self {
                symbol: symbol.to_string(),
                price_decimals: 1,
                volume_decimals: 8,
                orders: Mutex::new(HashMap::new()),
                placed_txids: Mutex::new(Vec::new()),
                cancelled_txids: Mutex::new(Vec::new()),
                balances: Mutex::new(PairBalance {
                    base_balance: 100.0,
                    base_available: 100.0,
                    quote_balance: 1_000_000.0,
                    quote_available: 1_000_000.0,
                }),
                pair_info: Mutex::new(AssetPairInfo {
                    maker_fee: 0.25,
                    cost_decimals: 1,
                }),
                should_fail_create: Mutex::new(false),
                next_seq: AtomicU64::new(1),
            }
        }

        pub async fn set_balances(&self, balances: PairBalance) {
            *self.balances.lock().await = balances;
        }

        pub async fn set_should_fail_create(&self, fail: bool) {
            *self.should_fail_create.lock().await = fail;
        }

        /// Mark an upstream order as fully executed
        pub async fn fill_order(&self, txid: &str) {
            let mut orders = self.orders.lock().await;
            if let Some(order) = orders.get_mut(txid) {
                order.status = OrderStatus::Closed;
                order.vol_exec = order.volume;
            }
        }

        /// Record a partial execution without closing the order
        pub async fn partially_fill_order(&self, txid: &str, vol_exec: f64) {
            let mut orders = self.orders.lock().await;
            if let Some(order) = orders.get_mut(txid) {
                order.vol_exec = vol_exec;
            }
        }

        /// Inject an order as if it had been placed by a previous run
        pub async fn seed_order(&self, order: OrderInfo) {
            self.orders.lock().await.insert(order.txid.clone(), order);
        }

        /// Open txids of the given side, sorted by price descending
        pub async fn open_txids(&self, side: OrderSide) -> Vec<String> {
            let orders = self.orders.lock().await;
            let mut open: Vec<&OrderInfo> = orders
                .values()
                .filter(|o| o.status == OrderStatus::Open && o.side == side)
                .collect();
            open.sort_by(|a, b| b.price.total_cmp(&a.price));
            open.iter().map(|o| o.txid.clone()).collect()
        }

        pub async fn order(&self, txid: &str) -> Option<OrderInfo> {
            self.orders.lock().await.get(txid).cloned()
        }

        fn mint_txid(&self) -> String {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            format!("TX{seq}-{}", Uuid::new_v4().simple())
        }
    }

    #[async_trait]
    impl ExchangeRest for MockExchange {
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
            Ok(*self.pair_info.lock().await)
        }

        async fn get_open_orders(&self, userref: u32) -> BotResult<Vec<OrderInfo>> {
            let orders = self.orders.lock().await;
            Ok(orders
                .values()
                .filter(|o| o.status == OrderStatus::Open && o.userref == userref)
                .cloned()
                .collect())
        }

        async fn get_order_with_retry(&self, txid: &str, _exit_on_fail: bool) -> BotResult<OrderInfo> {
            self.orders
                .lock()
                .await
                .get(txid)
                .cloned()
                .ok_or_else(|| BotError::OrderFetchFailed {
                    txid: txid.to_string(),
                    attempts: 3,
                })
        }

        async fn cancel_order(&self, txid: &str) -> BotResult<()> {
            let mut orders = self.orders.lock().await;
            match orders.get_mut(txid) {
                Some(order) if order.status == OrderStatus::Open => {
                    order.status = OrderStatus::Canceled;
                    self.cancelled_txids.lock().await.push(txid.to_string());
                    Ok(())
                }
                _ => Err(BotError::UnknownOrder(txid.to_string())),
            }
        }

        async fn create_order(&self, order: &NewOrder) -> BotResult<String> {
            if *self.should_fail_create.lock().await {
                return Err(BotError::Exchange("Mock order placement failure".into()));
            }

            let txid = self.mint_txid();
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
            self.orders.lock().await.insert(txid.clone(), info);
            self.placed_txids.lock().await.push(txid.clone());
            Ok(txid)
        }

        async fn get_pair_balance(&self) -> BotResult<PairBalance> {
            Ok(*self.balances.lock().await)
        }

        fn truncate(&self, amount: f64, kind: AmountKind) -> String {
            let decimals = match kind {
                AmountKind::Price => self.price_decimals,
                AmountKind::Volume => self.volume_decimals,
            };
            truncate_decimals(amount, decimals)
        }
    }

    /// Mock stream: tests push events through the returned sender
    pub struct MockStream {
        rx: Option<mpsc::UnboundedReceiver<StreamEvent>>,
        pub subscriptions: Vec<Subscription>,
        pub closed: bool,
    }

    impl MockStream {
        pub fn new() -> (Self, mpsc::UnboundedSender<StreamEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    rx: Some(rx),
                    subscriptions: Vec::new(),
                    closed: false,
                },
                tx,
            )
        }
    }

    #[async_trait]
    impl ExchangeStream for MockStream {
        async fn connect(&mut self) -> BotResult<mpsc::UnboundedReceiver<StreamEvent>> {
            self.rx
                .take()
                .ok_or_else(|| BotError::Stream("Stream already connected".into()))
        }

        async fn subscribe(&mut self, subscription: Subscription) -> BotResult<()> {
            self.subscriptions.push(subscription);
            Ok(())
        }

        async fn close(&mut self) -> BotResult<()> {
            self.closed = true;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockExchange;
    use super::*;
    use crate::exchange::types::OrderSide;

    #[test]
    fn test_truncate_decimals() {
        assert_eq!(truncate_decimals(49504.9504, 1), "49504.9");
        assert_eq!(truncate_decimals(0.00202020202, 8), "0.00202020");
        assert_eq!(truncate_decimals(100.0, 1), "100.0");
    }

    #[tokio::test]
    async fn test_mock_order_lifecycle() {
        let mock = MockExchange::new("BTC/USD");

        let txid = mock
            .create_order(&NewOrder {
                side: OrderSide::Buy,
                volume: 0.002,
                price: 49504.9,
                userref: 1,
                post_only: true,
            })
            .await
            .unwrap();

        assert_eq!(mock.get_open_orders(1).await.unwrap().len(), 1);

        mock.fill_order(&txid).await;
        assert!(mock.get_open_orders(1).await.unwrap().is_empty());

        let info = mock.get_order_with_retry(&txid, true).await.unwrap();
        assert_eq!(info.status, crate::exchange::OrderStatus::Closed);
        assert_eq!(info.vol_exec, info.volume);

        // Cancelling a closed order reports it as unknown.
        assert!(matches!(
            mock.cancel_order(&txid).await,
            Err(crate::BotError::UnknownOrder(_))
        ));
    }
}
