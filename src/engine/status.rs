//! Hourly status notification

use std::fmt::Write as _;

use chrono::Utc;

use crate::errors::BotResult;

use super::GridEngine;

/// How many orders per side the ladder rendering lists
const MAX_ORDERS_TO_LIST: usize = 5;

impl GridEngine {
    /// Publish a status notification with balances, investment, and a small
    /// rendering of the order ladder around the current price.
    pub(crate) async fn send_status_update(&mut self) -> BotResult<()> {
        let balances = self.rest.get_pair_balance().await?;
        let ticker = self.current_ticker()?;
        let config_row = self.store.get_config()?;
        let cost_factor = 10f64.powi(self.cost_decimals as i32);

        let wealth =
            ((balances.base_balance * ticker + balances.quote_balance) * cost_factor).round()
                / cost_factor;
        let investment = (self.investment() * cost_factor).round() / cost_factor;

        let mut message = format!("👑 {}\n", self.config.name);
        let _ = writeln!(
            message,
            "└ Price » {ticker} {}\n",
            self.config.quote_currency
        );

        message.push_str("⚜️ Account\n");
        let _ = writeln!(
            message,
            "├ Total {} » {}",
            self.config.base_currency, balances.base_balance
        );
        let _ = writeln!(
            message,
            "├ Total {} » {}",
            self.config.quote_currency, balances.quote_balance
        );
        let _ = writeln!(
            message,
            "├ Available {} » {}",
            self.config.quote_currency, balances.quote_available
        );
        let _ = writeln!(
            message,
            "├ Available {} » {}",
            self.config.base_currency,
            balances.base_available - config_row.vol_of_unfilled_remaining
        );
        let _ = writeln!(
            message,
            "├ Unfilled surplus of {} » {}",
            self.config.base_currency, config_row.vol_of_unfilled_remaining
        );
        let _ = writeln!(
            message,
            "├ Wealth » {wealth} {}",
            self.config.quote_currency
        );
        let _ = writeln!(
            message,
            "└ Investment » {investment} / {} {}\n",
            self.config.max_investment, self.config.quote_currency
        );

        message.push_str("💠 Orders\n");
        let _ = writeln!(
            message,
            "├ Amount per Grid » {} {}",
            self.config.amount_per_grid, self.config.quote_currency
        );
        let _ = writeln!(message, "└ Open orders » {}", self.store.count_orders(None));

        message.push_str("\n```\n");
        let _ = writeln!(message, " 🏷️ Price in {}", self.config.quote_currency);
        message.push_str(&self.render_order_ladder(ticker));
        message.push_str("\n```");

        self.publish_notification(message);
        self.last_status_update = Some(Utc::now());
        Ok(())
    }

    /// Render the next sell orders above and buy orders below the ticker.
    fn render_order_ladder(&self, ticker: f64) -> String {
        let mut out = String::new();

        let mut next_sells: Vec<f64> = self
            .store
            .sells_price_asc(MAX_ORDERS_TO_LIST)
            .iter()
            .map(|o| o.price)
            .collect();
        next_sells.reverse();
        let next_buys: Vec<f64> = self
            .store
            .buys_price_desc(MAX_ORDERS_TO_LIST)
            .iter()
            .map(|o| o.price)
            .collect();
        let n_buys = next_buys.len();
        let n_sells = next_sells.len();

        if n_sells == 0 {
            if n_buys == 0 {
                // Only happens without funds for a single buy order or in
                // dry-run mode.
                let _ = writeln!(out, "└────> {ticker}");
            } else {
                let _ = writeln!(out, "└───┬> {ticker}");
            }
        } else {
            for (index, sell_price) in next_sells.iter().enumerate() {
                let change = (sell_price / ticker - 1.0) * 100.0;
                if index == 0 {
                    let _ = writeln!(out, " │  ┌[ {sell_price} (+{change:.2}%)");
                } else if index <= n_sells - 1 && index != MAX_ORDERS_TO_LIST {
                    let _ = writeln!(out, " │  ├[ {sell_price} (+{change:.2}%)");
                }
            }
            let _ = writeln!(out, " └──┼> {ticker}");
        }

        for (index, buy_price) in next_buys.iter().enumerate() {
            let change = (buy_price / ticker - 1.0) * 100.0;
            if index < n_buys - 1 && index != MAX_ORDERS_TO_LIST {
                let _ = writeln!(out, "    ├[ {buy_price} ({change:.2}%)");
            } else {
                let _ = write!(out, "    └[ {buy_price} ({change:.2}%)");
            }
        }
        out
    }
}
