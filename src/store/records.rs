//! Persisted record shapes
//!
//! These structs are written to disk as JSON and read back by the CLI
//! and the dashboard exporter. Field names are part of the on-disk
//! format; changing them breaks every archive already written.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::strategies::{SignalDirection, StrategySignal};

/// One strategy's verdict for one market inside a cycle table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyCell {
    pub direction: SignalDirection,
    pub strength: f64,
}

/// Per-market row of a cycle's analysis table, keyed by strategy id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub market: String,
    pub strategies: BTreeMap<String, StrategyCell>,
}

/// Summary of one full pass over the watch-list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleRecord {
    pub cycle_number: u64,
    pub timestamp: DateTime<Utc>,
    pub signals_generated: u32,
    pub executions_performed: u32,
    pub signals_by_market: BTreeMap<String, u32>,
    pub table: Vec<TableRow>,
    /// Per-symbol failures observed during the cycle. A non-empty list
    /// still counts as a completed cycle.
    pub errors: Vec<String>,
}

/// Exchange-side facts of a filled entry order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDetails {
    pub order_id: String,
    pub quantity: f64,
    pub price: f64,
}

/// Protective price levels computed at entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopWinLoss {
    pub take_profit_price: f64,
    pub stop_loss_price: f64,
}

/// Audit record of one executed trade decision: the strategy signals
/// that backed it plus the resulting order and protective levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub market: String,
    pub signals: Vec<StrategySignal>,
    pub position_value: f64,
    pub status: String,
    pub execution_details: ExecutionDetails,
    pub stop_win_loss: StopWinLoss,
}

/// Terminal record written when a monitored position closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionCloseRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub position_id: String,
    pub symbol: String,
    pub open_price: f64,
    pub close_price: f64,
    pub quantity: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub reason: String,
    pub order_id: String,
}

/// Index sidecar tracking the newest ID and the lifetime record count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaIndex {
    pub last_id: u64,
    pub total_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_record_field_names_are_stable() {
        let mut signals_by_market = BTreeMap::new();
        signals_by_market.insert("BTCUSDT".to_string(), 2u32);
        let record = CycleRecord {
            cycle_number: 7,
            timestamp: Utc::now(),
            signals_generated: 2,
            executions_performed: 1,
            signals_by_market,
            table: vec![],
            errors: vec!["ETHUSDT: timeout".to_string()],
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"cycleNumber\":7"));
        assert!(json.contains("\"signalsGenerated\":2"));
        assert!(json.contains("\"executionsPerformed\":1"));
        assert!(json.contains("\"signalsByMarket\""));
        assert!(json.contains("\"errors\""));
    }

    #[test]
    fn test_execution_record_field_names_are_stable() {
        let record = ExecutionRecord {
            id: 3,
            timestamp: Utc::now(),
            market: "BTCUSDT".to_string(),
            signals: vec![],
            position_value: 1000.0,
            status: "EXECUTED".to_string(),
            execution_details: ExecutionDetails {
                order_id: "12345".to_string(),
                quantity: 0.02,
                price: 50000.0,
            },
            stop_win_loss: StopWinLoss {
                take_profit_price: 53000.0,
                stop_loss_price: 49000.0,
            },
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"positionValue\":1000.0"));
        assert!(json.contains("\"executionDetails\""));
        assert!(json.contains("\"orderId\":\"12345\""));
        assert!(json.contains("\"stopWinLoss\""));
        assert!(json.contains("\"takeProfitPrice\":53000.0"));
        assert!(json.contains("\"stopLossPrice\":49000.0"));
    }

    #[test]
    fn test_execution_record_with_signals_round_trips_equal() {
        let record = ExecutionRecord {
            id: 4,
            timestamp: Utc::now(),
            market: "ETHUSDT".to_string(),
            signals: vec![StrategySignal {
                strategy_id: "rsi_reversion".to_string(),
                symbol: "ETHUSDT".to_string(),
                direction: SignalDirection::Long,
                strength: 90.0,
                confidence: 0.9,
                weight: 1.0,
                timestamp: Utc::now(),
            }],
            position_value: 500.0,
            status: "EXECUTED".to_string(),
            execution_details: ExecutionDetails {
                order_id: "98765".to_string(),
                quantity: 0.2,
                price: 2500.0,
            },
            stop_win_loss: StopWinLoss {
                take_profit_price: 2650.0,
                stop_loss_price: 2450.0,
            },
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: ExecutionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_meta_index_round_trip() {
        let meta = MetaIndex {
            last_id: 42,
            total_count: 42,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, "{\"lastId\":42,\"totalCount\":42}");
        let back: MetaIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
