//! Stop-loss / take-profit monitoring for open positions
//!
//! Polls current prices on a fixed interval and closes positions whose
//! PnL crosses the levels frozen at open time.
//!
//! WARNING: triggers are best-effort, not guaranteed. At 10-second
//! polling a fast move can gap through a stop before detection.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::exchange::{MarketData, TradingApi};
use crate::exchange::types::OrderRequest;
use crate::position::book::{CloseReason, Position, PositionBook};
use crate::store::records::PositionCloseRecord;
use crate::store::Journal;

/// Event emitted when the monitor acts on a position.
#[derive(Debug, Clone)]
pub enum PositionEvent {
    Closed { position: Position },
    CloseFailed {
        position_id: String,
        symbol: String,
        reason: String,
    },
}

/// Decide whether a position's frozen thresholds have fired.
pub fn check_trigger(position: &Position) -> Option<CloseReason> {
    let pnl_percent = position.unrealized_pnl_percent();
    if pnl_percent <= -position.stop_loss_percent {
        Some(CloseReason::StopLoss)
    } else if pnl_percent >= position.take_profit_percent {
        Some(CloseReason::TakeProfit)
    } else {
        None
    }
}

pub struct PositionMonitor {
    market: Arc<dyn MarketData>,
    trading: Arc<dyn TradingApi>,
    book: Arc<PositionBook>,
    closes: Arc<Journal>,
    config: MonitorConfig,
    shutdown: tokio::sync::broadcast::Sender<()>,
}

impl PositionMonitor {
    pub fn new(
        market: Arc<dyn MarketData>,
        trading: Arc<dyn TradingApi>,
        book: Arc<PositionBook>,
        closes: Arc<Journal>,
        config: MonitorConfig,
    ) -> Self {
        let (shutdown, _) = tokio::sync::broadcast::channel(1);
        Self {
            market,
            trading,
            book,
            closes,
            config,
            shutdown,
        }
    }

    /// Start the polling loop. Emits a [`PositionEvent`] per close
    /// attempt over `event_tx`.
    pub async fn start(&self, event_tx: mpsc::Sender<PositionEvent>) -> Result<()> {
        if !self.config.enabled {
            info!("Position monitor disabled");
            return Ok(());
        }

        info!(
            "Starting position monitor with {}ms poll interval",
            self.config.poll_interval_ms
        );

        let market = self.market.clone();
        let trading = self.trading.clone();
        let book = self.book.clone();
        let closes = self.closes.clone();
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut interval = interval(poll_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let open = book.open_positions().await;
                        if open.is_empty() {
                            continue;
                        }

                        for position in open {
                            let price = match market.get_current_price(&position.symbol).await {
                                Ok(price) => price,
                                Err(e) => {
                                    warn!(
                                        "Price fetch failed for {}: {}",
                                        position.symbol, e
                                    );
                                    continue;
                                }
                            };
                            book.mark_price(&position.id, price).await;

                            let mut marked = position.clone();
                            marked.current_price = price;
                            let Some(reason) = check_trigger(&marked) else {
                                continue;
                            };

                            info!(
                                "Trigger {} on {} at {} (pnl {:.2}%)",
                                reason.as_str(),
                                marked.symbol,
                                price,
                                marked.unrealized_pnl_percent()
                            );

                            let event = Self::close_position(
                                &*trading, &book, &closes, &marked, price, reason,
                            )
                            .await;

                            if event_tx.send(event).await.is_err() {
                                debug!("Position event channel closed");
                                return;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Position monitor shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    /// Close one position with an exchange order, then record the exit.
    /// The order goes out first; if it fails the position stays open and
    /// the next poll retries. Used by the polling loop and by manual
    /// closes.
    pub async fn close_position(
        trading: &dyn TradingApi,
        book: &PositionBook,
        closes: &Journal,
        position: &Position,
        price: f64,
        reason: CloseReason,
    ) -> PositionEvent {
        let request = OrderRequest::market(
            position.symbol.clone(),
            position.side.opposite(),
            position.quantity,
        );

        let receipt = match trading.place_order(&request).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(
                    "Close order failed for {} ({}): {}",
                    position.symbol, position.id, e
                );
                return PositionEvent::CloseFailed {
                    position_id: position.id.clone(),
                    symbol: position.symbol.clone(),
                    reason: e.to_string(),
                };
            }
        };

        let fill_price = if receipt.price > 0.0 {
            receipt.price
        } else {
            price
        };

        let Some(closed) = book
            .close(
                &position.id,
                fill_price,
                reason,
                Some(receipt.order_id.clone()),
            )
            .await
        else {
            return PositionEvent::CloseFailed {
                position_id: position.id.clone(),
                symbol: position.symbol.clone(),
                reason: "position vanished from book".to_string(),
            };
        };

        let record = PositionCloseRecord {
            id: closes.next_id().await,
            timestamp: chrono::Utc::now(),
            position_id: closed.id.clone(),
            symbol: closed.symbol.clone(),
            open_price: closed.open_price,
            close_price: fill_price,
            quantity: closed.quantity,
            pnl: closed.pnl.unwrap_or(0.0),
            pnl_percent: closed.pnl_percent.unwrap_or(0.0),
            reason: reason.as_str().to_string(),
            order_id: receipt.order_id,
        };
        if let Err(e) = closes.append_with_id(record.id, &record).await {
            // The exit itself succeeded; losing the record is logged,
            // not fatal.
            warn!("Failed to journal close of {}: {}", closed.symbol, e);
        }

        PositionEvent::Closed { position: closed }
    }
}
