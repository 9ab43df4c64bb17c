// Technical indicators module
// Implements an incremental Wilder RSI for the alert pipeline

pub mod rsi;

pub use rsi::{calculate_rsi, RsiEngine, NEUTRAL_RSI};
