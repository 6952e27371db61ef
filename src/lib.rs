#![deny(unreachable_pub)]
pub mod config;
pub mod engine;
pub mod errors;
pub mod event_bus;
pub mod exchange;
pub mod state_machine;
pub mod store;
pub mod strategy;

pub use config::{BotConfig, Settings, StrategyKind};
pub use engine::GridEngine;
pub use errors::{BotError, BotResult};
pub use event_bus::{EventBus, Notification, NOTIFICATION_TOPIC};
pub use state_machine::{BotState, StateMachine};
