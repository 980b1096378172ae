//! Open-position ledger with JSON snapshot persistence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::exchange::types::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::TakeProfit => "TAKE_PROFIT",
            CloseReason::Manual => "MANUAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeOutcome {
    Win,
    Loss,
    Breakeven,
}

/// One tracked position. Stop and take levels, and the percents they
/// were derived from, are captured at open time and never re-read from
/// live risk parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub open_price: f64,
    pub current_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub status: PositionStatus,
    pub order_id: String,
    pub open_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<CloseReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TradeOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_order_id: Option<String>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        symbol: String,
        side: OrderSide,
        quantity: f64,
        open_price: f64,
        stop_loss: f64,
        take_profit: f64,
        stop_loss_percent: f64,
        take_profit_percent: f64,
        order_id: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol,
            side,
            quantity,
            open_price,
            current_price: open_price,
            stop_loss,
            take_profit,
            stop_loss_percent,
            take_profit_percent,
            status: PositionStatus::Open,
            order_id,
            open_time: Utc::now(),
            close_time: None,
            pnl: None,
            pnl_percent: None,
            close_reason: None,
            outcome: None,
            close_order_id: None,
        }
    }

    /// PnL at the current mark, sign-adjusted for direction.
    pub fn unrealized_pnl(&self) -> f64 {
        let delta = (self.current_price - self.open_price) * self.quantity;
        match self.side {
            OrderSide::Buy => delta,
            OrderSide::Sell => -delta,
        }
    }

    pub fn unrealized_pnl_percent(&self) -> f64 {
        if self.open_price == 0.0 {
            return 0.0;
        }
        let raw = (self.current_price - self.open_price) / self.open_price * 100.0;
        match self.side {
            OrderSide::Buy => raw,
            OrderSide::Sell => -raw,
        }
    }

    pub fn notional(&self) -> f64 {
        (self.quantity * self.current_price).abs()
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// All positions, open and closed, keyed by id. Optionally snapshotted
/// to a JSON file after every mutation so a restart resumes monitoring
/// where it left off.
pub struct PositionBook {
    positions: RwLock<HashMap<String, Position>>,
    snapshot_path: Option<String>,
}

impl PositionBook {
    pub fn new(snapshot_path: Option<String>) -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            snapshot_path,
        }
    }

    /// Load the snapshot from disk, if one exists.
    pub async fn load(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        if !std::path::Path::new(path).exists() {
            return Ok(());
        }
        let data = tokio::fs::read_to_string(path).await?;
        let loaded: HashMap<String, Position> = serde_json::from_str(&data)?;
        let open = loaded.values().filter(|p| p.is_open()).count();
        info!(
            "Loaded {} positions from {} ({} open)",
            loaded.len(),
            path,
            open
        );
        *self.positions.write().await = loaded;
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let positions = self.positions.read().await;
        let data = serde_json::to_string_pretty(&*positions)?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    /// Record a freshly opened position.
    pub async fn open(&self, position: Position) -> Result<Position> {
        {
            let mut positions = self.positions.write().await;
            positions.insert(position.id.clone(), position.clone());
        }
        info!(
            "Position opened: {} {} {} @ {} (sl {} / tp {})",
            position.symbol,
            position.side,
            position.quantity,
            position.open_price,
            position.stop_loss,
            position.take_profit
        );
        if let Err(e) = self.save().await {
            warn!("Position snapshot write failed: {}", e);
        }
        Ok(position)
    }

    /// Update the mark price of an open position. A closed position is
    /// left untouched.
    pub async fn mark_price(&self, id: &str, price: f64) {
        let mut positions = self.positions.write().await;
        if let Some(position) = positions.get_mut(id) {
            if position.is_open() {
                position.current_price = price;
            }
        }
    }

    /// Close a position. Closing an already closed position is a no-op
    /// that returns the terminal record unchanged, so duplicate trigger
    /// and manual closes cannot rewrite history.
    pub async fn close(
        &self,
        id: &str,
        close_price: f64,
        reason: CloseReason,
        close_order_id: Option<String>,
    ) -> Option<Position> {
        let mut positions = self.positions.write().await;
        let position = positions.get_mut(id)?;
        if position.status == PositionStatus::Closed {
            debug!("Close ignored, position {} already closed", id);
            return Some(position.clone());
        }

        position.current_price = close_price;
        let pnl = position.unrealized_pnl();
        let pnl_percent = position.unrealized_pnl_percent();

        position.status = PositionStatus::Closed;
        position.close_time = Some(Utc::now());
        position.pnl = Some(pnl);
        position.pnl_percent = Some(pnl_percent);
        position.close_reason = Some(reason);
        position.outcome = Some(if pnl > 0.0 {
            TradeOutcome::Win
        } else if pnl < 0.0 {
            TradeOutcome::Loss
        } else {
            TradeOutcome::Breakeven
        });
        position.close_order_id = close_order_id;

        let closed = position.clone();
        drop(positions);

        info!(
            "Position closed: {} {} @ {} pnl={:.4} ({:.2}%) reason={}",
            closed.symbol,
            closed.side,
            close_price,
            pnl,
            pnl_percent,
            reason.as_str()
        );
        if let Err(e) = self.save().await {
            warn!("Position snapshot write failed: {}", e);
        }
        Some(closed)
    }

    pub async fn get(&self, id: &str) -> Option<Position> {
        self.positions.read().await.get(id).cloned()
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        self.positions
            .read()
            .await
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect()
    }

    pub async fn open_count(&self) -> usize {
        self.positions
            .read()
            .await
            .values()
            .filter(|p| p.is_open())
            .count()
    }

    pub async fn open_for_symbol(&self, symbol: &str) -> Vec<Position> {
        self.positions
            .read()
            .await
            .values()
            .filter(|p| p.is_open() && p.symbol == symbol)
            .cloned()
            .collect()
    }

    /// Sum of open notionals at current marks.
    pub async fn total_exposure(&self) -> f64 {
        self.positions
            .read()
            .await
            .values()
            .filter(|p| p.is_open())
            .map(|p| p.notional())
            .sum()
    }
}
