//! Exchange collaborator seams
//!
//! The engine never talks to an exchange directly; it consumes these two
//! traits. `BinanceClient` implements them against the live REST API and
//! `PaperExchange` implements them in memory for paper trading and tests.

pub mod binance;
pub mod paper;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use binance::BinanceClient;
pub use paper::PaperExchange;
pub use types::{AccountBalances, Candle, OrderReceipt, OrderRequest, OrderSide, OrderType};

/// Market data collaborator: candles and last-traded prices.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Fetch up to `limit` candles for `symbol` at `interval`, ascending by
    /// open time.
    async fn get_candles(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>>;

    /// Last traded price for `symbol`.
    async fn get_current_price(&self, symbol: &str) -> Result<f64>;
}

/// Trading collaborator: order placement and account state.
#[async_trait]
pub trait TradingApi: Send + Sync {
    /// Submit an order. A returned receipt means the exchange accepted it.
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt>;

    /// Current account balances.
    async fn get_account_balances(&self) -> Result<AccountBalances>;
}
