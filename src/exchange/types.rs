//! Core data types shared between the engine and exchange gateways

use serde::{Deserialize, Serialize};

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream lifecycle status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted but not yet resting on the book
    Pending,
    /// Resting on the book
    Open,
    /// Fully executed
    Closed,
    Canceled,
    Expired,
}

/// Full order information as returned by the REST gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub txid: String,
    pub userref: u32,
    /// Trading pair in the gateway's REST spelling
    pub pair: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub price: f64,
    /// Total order volume in base currency
    pub volume: f64,
    /// Executed volume in base currency
    pub vol_exec: f64,
}

/// Static asset pair metadata
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetPairInfo {
    /// Highest maker fee tier, in percent (0.25 means 0.25%)
    pub maker_fee: f64,
    /// Decimal places of the quote currency for cost values
    pub cost_decimals: u32,
}

/// Account balances for the traded pair
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PairBalance {
    pub base_balance: f64,
    pub base_available: f64,
    pub quote_balance: f64,
    pub quote_available: f64,
}

/// Which precision rule to apply when truncating an amount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountKind {
    Price,
    Volume,
}

/// Request to place a limit order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub side: OrderSide,
    pub volume: f64,
    pub price: f64,
    pub userref: u32,
    /// Reject instead of taking liquidity (used for all grid buys)
    pub post_only: bool,
}

/// Ticker update from the streaming channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerUpdate {
    pub symbol: String,
    pub last: f64,
}

/// Execution event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecType {
    New,
    Filled,
    Canceled,
    Expired,
}

/// Single entry of an executions message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub exec_type: ExecType,
    pub order_id: String,
}

/// Whether an executions message is the initial snapshot or an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    /// Initial dump; only signals that the channel is connected
    Snapshot,
    Update,
}

/// Message received from the streaming channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum StreamEvent {
    Ticker(TickerUpdate),
    Executions {
        #[serde(rename = "type")]
        kind: ExecutionKind,
        executions: Vec<Execution>,
    },
}

impl StreamEvent {
    /// Convenience constructor for a single-execution update
    pub fn execution_update(exec_type: ExecType, order_id: impl Into<String>) -> Self {
        StreamEvent::Executions {
            kind: ExecutionKind::Update,
            executions: vec![Execution {
                exec_type,
                order_id: order_id.into(),
            }],
        }
    }
}
