//! In-memory paper exchange
//!
//! Implements both exchange traits against seeded state. Paper runs wire
//! this in for `TradingApi` so orders never leave the process; tests use
//! it for `MarketData` as well by seeding candles and prices.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{Error, Result};
use crate::exchange::types::{
    AccountBalances, Candle, OrderReceipt, OrderRequest, OrderSide,
};
use crate::exchange::{MarketData, TradingApi};

/// Fill-at-mark exchange with a single quote-asset ledger.
pub struct PaperExchange {
    prices: RwLock<HashMap<String, f64>>,
    candles: RwLock<HashMap<String, Vec<Candle>>>,
    balances: RwLock<AccountBalances>,
    order_seq: AtomicU64,
}

impl PaperExchange {
    pub fn new(starting_balance: f64) -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            candles: RwLock::new(HashMap::new()),
            balances: RwLock::new(AccountBalances {
                available: starting_balance,
                total: starting_balance,
            }),
            order_seq: AtomicU64::new(0),
        }
    }

    /// Seed or move the mark price for a symbol.
    pub async fn set_price(&self, symbol: &str, price: f64) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    /// Seed the candle history returned by `get_candles`.
    pub async fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.candles
            .write()
            .await
            .insert(symbol.to_string(), candles);
    }

    async fn mark_price(&self, symbol: &str) -> Result<f64> {
        if let Some(price) = self.prices.read().await.get(symbol) {
            return Ok(*price);
        }
        // Fall back to the last seeded close.
        if let Some(series) = self.candles.read().await.get(symbol) {
            if let Some(last) = series.last() {
                return Ok(last.close);
            }
        }
        Err(Error::data_unavailable(symbol, "no paper price seeded"))
    }
}

#[async_trait]
impl MarketData for PaperExchange {
    async fn get_candles(&self, symbol: &str, _interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let candles = self.candles.read().await;
        let series = candles
            .get(symbol)
            .ok_or_else(|| Error::data_unavailable(symbol, "no paper candles seeded"))?;
        let skip = series.len().saturating_sub(limit as usize);
        Ok(series[skip..].to_vec())
    }

    async fn get_current_price(&self, symbol: &str) -> Result<f64> {
        self.mark_price(symbol).await
    }
}

#[async_trait]
impl TradingApi for PaperExchange {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
        let price = match request.price {
            Some(p) => p,
            None => self.mark_price(&request.symbol).await?,
        };
        let cost = request.quantity * price;

        {
            let mut balances = self.balances.write().await;
            match request.side {
                OrderSide::Buy => {
                    if cost > balances.available {
                        return Err(Error::ExecutionFailed {
                            symbol: request.symbol.clone(),
                            reason: format!(
                                "insufficient paper balance: need {:.2}, have {:.2}",
                                cost, balances.available
                            ),
                        });
                    }
                    balances.available -= cost;
                    balances.total -= cost;
                }
                OrderSide::Sell => {
                    balances.available += cost;
                    balances.total += cost;
                }
            }
        }

        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Paper fill: {} {} {:.8} @ {:.8}",
            request.side, request.symbol, request.quantity, price
        );

        Ok(OrderReceipt {
            order_id: format!("PAPER-{}", seq),
            symbol: request.symbol.clone(),
            side: request.side,
            executed_quantity: request.quantity,
            price,
            status: "FILLED".to_string(),
            timestamp: Utc::now(),
        })
    }

    async fn get_account_balances(&self) -> Result<AccountBalances> {
        Ok(*self.balances.read().await)
    }
}
