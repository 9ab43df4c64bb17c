// Signal classification and alert suppression
pub mod signals;

pub use signals::{large_move_pct, DedupState, LevelCrossing, SignalEvaluator};
