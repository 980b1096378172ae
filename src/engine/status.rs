//! Engine status snapshot

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of the engine, safe to serialize for operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub running: bool,
    pub watchlist: Vec<String>,
    pub cycles_completed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Per-symbol error count from the most recent cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_errors: Option<usize>,
    pub total_executions: u64,
    pub open_positions: usize,
    /// Symbols currently blocked from re-entry, with seconds remaining.
    pub active_cooldowns: Vec<CooldownStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownStatus {
    pub symbol: String,
    pub seconds_remaining: i64,
}
