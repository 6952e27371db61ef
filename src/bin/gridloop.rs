//! Grid trading bot binary
//!
//! Runs the grid strategy engine against the built-in paper exchange with a
//! synthetic price feed. Wire-level exchange adapters implement the gateway
//! traits and plug in the same way.
//!
//! ## Setup
//!
//! 1. Create a settings file, e.g. `gridloop.toml`:
//!    ```toml
//!    [bot]
//!    name = "gridloop-demo"
//!    userref = 1001
//!    strategy = "GridHODL"
//!    base_currency = "BTC"
//!    quote_currency = "USD"
//!    amount_per_grid = 100.0
//!    interval = 0.01
//!    ```
//!
//! 2. Run the bot:
//!    ```bash
//!    cargo run --bin gridloop -- --config gridloop.toml
//!    ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use gridloop::exchange::PaperExchange;
use gridloop::store::Store;
use gridloop::{BotState, EventBus, GridEngine, Settings, NOTIFICATION_TOPIC};

/// Starting price of the synthetic feed
const PAPER_START_PRICE: f64 = 50000.0;
/// Quote balance the paper account starts with
const PAPER_START_QUOTE: f64 = 100_000.0;

#[tokio::main]
async fn main() {
    // Load .env file before anything reads the environment.
    match dotenvy::dotenv() {
        Ok(path) => println!("Loaded environment from: {}", path.display()),
        Err(_) => println!("No .env file found, using system environment variables"),
    }

    let args: Vec<String> = env::args().collect();
    let config_path = if args.len() > 2 && args[1] == "--config" {
        args[2].clone()
    } else {
        "gridloop".to_string()
    };

    let settings = match Settings::new(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load settings from '{config_path}': {e}");
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.log.level.as_str()),
    )
    .init();

    let config = settings.bot;
    info!("Starting {} ({})", config.name, config.strategy);
    info!(
        "Pair: {}/{}, amount per grid: {}, interval: {}",
        config.base_currency, config.quote_currency, config.amount_per_grid, config.interval
    );

    let symbol = format!("{}/{}", config.base_currency, config.quote_currency);
    let paper = PaperExchange::new(&symbol, PAPER_START_PRICE, PAPER_START_QUOTE);
    let mut stream = paper.stream();

    let bus = EventBus::new();
    let mut notifications = bus.subscribe(NOTIFICATION_TOPIC);
    tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            info!("[notification] {}", notification.message);
        }
    });

    let store = match Store::open(config.state_file.clone(), config.userref) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open the state store: {e}");
            std::process::exit(1);
        }
    };

    let mut engine = match GridEngine::new(config, Arc::new(paper.clone()), bus, store) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to build the engine: {e}");
            std::process::exit(1);
        }
    };

    // Ctrl-C requests a clean shutdown; the run loop winds down on its next
    // iteration.
    let state_machine = engine.state_machine();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, requesting shutdown...");
            let _ = state_machine.transition_to(BotState::ShutdownRequested);
        }
    });

    // Synthetic price feed: a slow oscillation around the starting price,
    // enough to exercise fills, shift-ups and TSP.
    let driver = paper.clone();
    tokio::spawn(async move {
        let mut t = 0.0f64;
        let mut tick = tokio::time::interval(Duration::from_secs(2));
        loop {
            tick.tick().await;
            t += 0.05;
            let price = PAPER_START_PRICE * (1.0 + 0.03 * t.sin());
            driver.set_price((price * 10.0).round() / 10.0).await;
        }
    });

    match engine.run(&mut stream).await {
        Ok(()) => info!("Engine stopped cleanly"),
        Err(e) => {
            error!("Engine stopped: {e}");
            std::process::exit(1);
        }
    }
}
