//! Persistent record store
//!
//! Three journals share the data directory: `cycle` for per-cycle
//! analysis tables, `execution` for entries, `close` for position exits.

pub mod journal;
pub mod records;

pub use journal::Journal;
pub use records::{
    CycleRecord, ExecutionDetails, ExecutionRecord, MetaIndex, PositionCloseRecord, StopWinLoss,
    StrategyCell, TableRow,
};

/// Journal file prefixes.
pub const CYCLE_PREFIX: &str = "cycle";
pub const EXECUTION_PREFIX: &str = "execution";
pub const CLOSE_PREFIX: &str = "close";
