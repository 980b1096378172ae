//! Position tracking and stop/take monitoring

pub mod book;
pub mod monitor;

pub use book::{CloseReason, Position, PositionBook, PositionStatus, TradeOutcome};
pub use monitor::{check_trigger, PositionEvent, PositionMonitor};
