//! Exchange gateway abstraction
//!
//! The engine talks to the exchange exclusively through the [`ExchangeRest`]
//! and [`ExchangeStream`] traits; concrete wire adapters live outside this
//! crate. A [`mock`] gateway for tests and a [`paper`] gateway for simulated
//! trading are provided here.

pub mod gateway;
pub mod paper;
pub mod types;

pub use gateway::{mock, ExchangeRest, ExchangeStream, Subscription};
pub use paper::{PaperExchange, PaperStream};
pub use types::{
    AmountKind, AssetPairInfo, ExecType, Execution, ExecutionKind, NewOrder, OrderInfo, OrderSide,
    OrderStatus, PairBalance, StreamEvent, TickerUpdate,
};
