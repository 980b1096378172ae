//! Risk-based position sizing and trade validation
//!
//! Sizing turns the account balance and the configured risk parameters
//! into a quantity plus protective stop/take prices. Validation recomputes
//! every risk metric from live account and position state on each call;
//! nothing is cached across ticks, so a stale drawdown can never wave a
//! trade through. Hard reasons reject the trade outright; soft warnings
//! let it pass with a reduced quantity offered.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::exchange::types::{AccountBalances, OrderSide};
use crate::position::book::Position;

/// Global risk limits. Hot-reloadable; read fresh by every sizing and
/// validation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskParameters {
    /// Percent of the available balance committed per position.
    #[serde(default = "default_max_position_size_percent")]
    pub max_position_size_percent: f64,
    /// Adverse move that forces a close, percent of entry.
    #[serde(default = "default_stop_loss_percent")]
    pub stop_loss_percent: f64,
    /// Favorable move that takes profit, percent of entry.
    #[serde(default = "default_take_profit_percent")]
    pub take_profit_percent: f64,
    /// Daily loss at which no new trades are accepted.
    #[serde(default = "default_max_daily_loss_percent")]
    pub max_daily_loss_percent: f64,
    /// Decline from the tracked peak balance at which trading halts.
    #[serde(default = "default_max_drawdown_percent")]
    pub max_drawdown_percent: f64,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,
    /// Minimum configured take/stop ratio accepted by validation.
    #[serde(default = "default_min_risk_reward_ratio")]
    pub min_risk_reward_ratio: f64,
}

fn default_max_position_size_percent() -> f64 {
    5.0
}
fn default_stop_loss_percent() -> f64 {
    2.0
}
fn default_take_profit_percent() -> f64 {
    6.0
}
fn default_max_daily_loss_percent() -> f64 {
    10.0
}
fn default_max_drawdown_percent() -> f64 {
    20.0
}
fn default_max_leverage() -> f64 {
    20.0
}
fn default_min_risk_reward_ratio() -> f64 {
    2.0
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            max_position_size_percent: default_max_position_size_percent(),
            stop_loss_percent: default_stop_loss_percent(),
            take_profit_percent: default_take_profit_percent(),
            max_daily_loss_percent: default_max_daily_loss_percent(),
            max_drawdown_percent: default_max_drawdown_percent(),
            max_leverage: default_max_leverage(),
            min_risk_reward_ratio: default_min_risk_reward_ratio(),
        }
    }
}

/// Partial update with merge semantics: only the set fields change.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RiskParametersUpdate {
    pub max_position_size_percent: Option<f64>,
    pub stop_loss_percent: Option<f64>,
    pub take_profit_percent: Option<f64>,
    pub max_daily_loss_percent: Option<f64>,
    pub max_drawdown_percent: Option<f64>,
    pub max_leverage: Option<f64>,
    pub min_risk_reward_ratio: Option<f64>,
}

impl RiskParametersUpdate {
    fn apply(&self, params: &mut RiskParameters) {
        if let Some(v) = self.max_position_size_percent {
            params.max_position_size_percent = v;
        }
        if let Some(v) = self.stop_loss_percent {
            params.stop_loss_percent = v;
        }
        if let Some(v) = self.take_profit_percent {
            params.take_profit_percent = v;
        }
        if let Some(v) = self.max_daily_loss_percent {
            params.max_daily_loss_percent = v;
        }
        if let Some(v) = self.max_drawdown_percent {
            params.max_drawdown_percent = v;
        }
        if let Some(v) = self.max_leverage {
            params.max_leverage = v;
        }
        if let Some(v) = self.min_risk_reward_ratio {
            params.min_risk_reward_ratio = v;
        }
    }
}

/// Output of one sizing call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizedPosition {
    pub quantity: f64,
    /// Quantity times entry price, leverage applied.
    pub notional: f64,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    /// Loss at the stop, in quote currency.
    pub risk_amount: f64,
    /// Gain at the take, in quote currency.
    pub potential_profit: f64,
    pub risk_reward_ratio: f64,
    /// Leverage after clamping to the configured maximum.
    pub leverage: f64,
}

/// Trade proposed for validation.
#[derive(Debug, Clone)]
pub struct TradeProposal {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub leverage: f64,
}

/// Metrics recomputed from live state for one validation call.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskMetrics {
    /// Decline from the tracked peak balance, percent.
    pub drawdown_percent: f64,
    /// Change versus today's anchor balance, percent. Negative is a loss.
    pub daily_pnl_percent: f64,
    /// Sum of absolute open notionals at mark prices.
    pub exposure: f64,
    pub exposure_percent: f64,
    /// Sum of open notionals times the stop distance.
    pub amount_at_risk: f64,
    /// Composite 0-1 score from drawdown, exposure and daily loss.
    pub risk_score: f64,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
    /// Reduced quantity that would satisfy the size cap, when the
    /// proposal exceeded it.
    pub adjusted_quantity: Option<f64>,
    pub metrics: RiskMetrics,
}

/// Daily anchor and peak balance used for drawdown/daily-loss metrics.
#[derive(Debug, Clone, Copy)]
struct BalanceTracker {
    peak_balance: f64,
    daily_anchor: f64,
    anchor_date: NaiveDate,
}

impl BalanceTracker {
    fn new() -> Self {
        Self {
            peak_balance: 0.0,
            daily_anchor: 0.0,
            anchor_date: Utc::now().date_naive(),
        }
    }

    /// Fold a fresh total balance in: raise the peak, seed the anchors,
    /// and re-anchor daily tracking when the UTC day rolled over.
    fn observe(&mut self, total_balance: f64) {
        let today = Utc::now().date_naive();
        if today != self.anchor_date || self.daily_anchor == 0.0 {
            self.anchor_date = today;
            self.daily_anchor = total_balance;
        }
        if total_balance > self.peak_balance {
            self.peak_balance = total_balance;
        }
    }
}

/// Owns the risk parameters and the balance anchors. All metric inputs
/// (balances, open positions) are passed in fresh by the caller.
pub struct RiskManager {
    params: RwLock<RiskParameters>,
    tracker: RwLock<BalanceTracker>,
}

impl RiskManager {
    pub fn new(params: RiskParameters) -> Self {
        Self {
            params: RwLock::new(params),
            tracker: RwLock::new(BalanceTracker::new()),
        }
    }

    pub async fn params(&self) -> RiskParameters {
        *self.params.read().await
    }

    /// Merge a partial update into the live parameters. Takes effect on
    /// the next sizing/validation call; open positions keep the stops
    /// captured at entry.
    pub async fn update_params(&self, update: RiskParametersUpdate) -> RiskParameters {
        let mut params = self.params.write().await;
        update.apply(&mut params);
        info!(
            "Risk parameters updated: size={}% sl={}% tp={}% daily={}% dd={}% lev={}x rr={}",
            params.max_position_size_percent,
            params.stop_loss_percent,
            params.take_profit_percent,
            params.max_daily_loss_percent,
            params.max_drawdown_percent,
            params.max_leverage,
            params.min_risk_reward_ratio,
        );
        *params
    }

    /// Restart daily-PnL tracking from the next observed balance.
    pub async fn reset_daily_tracking(&self) {
        let mut tracker = self.tracker.write().await;
        tracker.daily_anchor = 0.0;
        tracker.anchor_date = Utc::now().date_naive();
        info!("Daily risk tracking reset");
    }

    /// Size a position at `entry_price` with the requested leverage
    /// (clamped to the configured maximum).
    pub async fn size_position(
        &self,
        available_balance: f64,
        entry_price: f64,
        side: OrderSide,
        leverage: f64,
    ) -> SizedPosition {
        let params = *self.params.read().await;
        let leverage = leverage.clamp(1.0, params.max_leverage);

        let notional = available_balance * params.max_position_size_percent / 100.0 * leverage;
        let quantity = if entry_price > 0.0 {
            notional / entry_price
        } else {
            0.0
        };

        let sl = params.stop_loss_percent / 100.0;
        let tp = params.take_profit_percent / 100.0;
        let (stop_loss_price, take_profit_price) = match side {
            OrderSide::Buy => (entry_price * (1.0 - sl), entry_price * (1.0 + tp)),
            OrderSide::Sell => (entry_price * (1.0 + sl), entry_price * (1.0 - tp)),
        };

        let risk_amount = notional * sl;
        let potential_profit = notional * tp;
        let risk_reward_ratio = if risk_amount > 0.0 {
            potential_profit / risk_amount
        } else {
            0.0
        };

        SizedPosition {
            quantity,
            notional,
            stop_loss_price,
            take_profit_price,
            risk_amount,
            potential_profit,
            risk_reward_ratio,
            leverage,
        }
    }

    /// Compute the live risk metrics for the given account and position
    /// snapshot. Also advances the peak/daily anchors.
    pub async fn metrics(
        &self,
        balances: AccountBalances,
        open_positions: &[Position],
    ) -> RiskMetrics {
        let params = *self.params.read().await;
        let mut tracker = self.tracker.write().await;
        tracker.observe(balances.total);

        let drawdown_percent = if tracker.peak_balance > 0.0 {
            ((tracker.peak_balance - balances.total) / tracker.peak_balance * 100.0).max(0.0)
        } else {
            0.0
        };
        let daily_pnl_percent = if tracker.daily_anchor > 0.0 {
            (balances.total - tracker.daily_anchor) / tracker.daily_anchor * 100.0
        } else {
            0.0
        };

        let exposure: f64 = open_positions
            .iter()
            .map(|p| (p.quantity * p.current_price).abs())
            .sum();
        let exposure_percent = if balances.total > 0.0 {
            exposure / balances.total * 100.0
        } else {
            0.0
        };
        let amount_at_risk = exposure * params.stop_loss_percent / 100.0;

        let risk_score = (0.4 * drawdown_percent / params.max_drawdown_percent
            + 0.3 * exposure_percent / 100.0
            + 0.3 * daily_pnl_percent.min(0.0).abs() / params.max_daily_loss_percent)
            .min(1.0);

        RiskMetrics {
            drawdown_percent,
            daily_pnl_percent,
            exposure,
            exposure_percent,
            amount_at_risk,
            risk_score,
        }
    }

    /// Validate one proposed trade against the limits. Metrics are
    /// recomputed here from the passed-in live state, never cached.
    pub async fn validate_trade(
        &self,
        proposal: &TradeProposal,
        balances: AccountBalances,
        open_positions: &[Position],
    ) -> ValidationReport {
        let params = *self.params.read().await;
        let metrics = self.metrics(balances, open_positions).await;

        let mut reasons = Vec::new();
        let mut warnings = Vec::new();
        let mut adjusted_quantity = None;

        if proposal.leverage > params.max_leverage {
            reasons.push(format!(
                "Requested leverage {:.1}x exceeds maximum {:.1}x",
                proposal.leverage, params.max_leverage
            ));
            // Scale the quantity down so the notional matches what the
            // allowed leverage would have supported.
            adjusted_quantity =
                Some(proposal.quantity * params.max_leverage / proposal.leverage);
        }

        if metrics.daily_pnl_percent <= -params.max_daily_loss_percent {
            reasons.push(format!(
                "Daily loss limit breached: {:.2}% (limit -{:.2}%)",
                metrics.daily_pnl_percent, params.max_daily_loss_percent
            ));
        }

        if metrics.drawdown_percent >= params.max_drawdown_percent {
            reasons.push(format!(
                "Maximum drawdown breached: {:.2}% (limit {:.2}%)",
                metrics.drawdown_percent, params.max_drawdown_percent
            ));
        }

        // Take/stop ratio is enforced as a hard gate here, not merely
        // reported by sizing.
        let configured_rr = if params.stop_loss_percent > 0.0 {
            params.take_profit_percent / params.stop_loss_percent
        } else {
            0.0
        };
        if configured_rr < params.min_risk_reward_ratio {
            reasons.push(format!(
                "Configured risk/reward {:.2} below minimum {:.2}",
                configured_rr, params.min_risk_reward_ratio
            ));
        }

        // Position size cap: soft, with a reduced quantity offered.
        let effective_leverage = proposal.leverage.clamp(1.0, params.max_leverage);
        let position_value = proposal.quantity * proposal.price;
        let max_value =
            balances.total * params.max_position_size_percent / 100.0 * effective_leverage;
        if balances.total > 0.0 && position_value > max_value {
            let reduced = max_value / proposal.price;
            warnings.push(format!(
                "Position value {:.2} exceeds cap {:.2}; quantity reduced to {:.8}",
                position_value, max_value, reduced
            ));
            adjusted_quantity = Some(reduced);
        }

        if balances.total > 0.0
            && (metrics.exposure + position_value) > balances.total
        {
            warnings.push(format!(
                "Combined exposure {:.2} exceeds account balance {:.2}",
                metrics.exposure + position_value,
                balances.total
            ));
        }

        if metrics.risk_score > 0.8 {
            warnings.push(format!(
                "Elevated composite risk score {:.2}",
                metrics.risk_score
            ));
        }

        let valid = reasons.is_empty();
        debug!(
            "Trade validation for {} {}: valid={} reasons={} warnings={} score={:.2}",
            proposal.symbol,
            proposal.side,
            valid,
            reasons.len(),
            warnings.len(),
            metrics.risk_score
        );

        ValidationReport {
            valid,
            reasons,
            warnings,
            adjusted_quantity,
            metrics,
        }
    }
}
