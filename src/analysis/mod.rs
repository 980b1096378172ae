//! Indicator math, composite signal synthesis and per-strategy evaluators

pub mod indicators;
pub mod signal;
pub mod strategies;

pub use indicators::IndicatorSnapshot;
pub use signal::{generate_signal, Signal, SignalAction};
pub use strategies::{SignalDirection, StrategyKind, StrategySignal};
