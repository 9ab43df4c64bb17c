use crate::config::SignalConfig;
use crate::models::{Signal, SignalKind};

/// Classifies an RSI reading into BUY / SELL / HOLD
#[derive(Debug, Clone)]
pub struct SignalEvaluator {
    oversold_level: f64,
    overbought_level: f64,
}

impl SignalEvaluator {
    pub fn new(oversold_level: f64, overbought_level: f64) -> Self {
        Self {
            oversold_level,
            overbought_level,
        }
    }

    pub fn from_config(config: &SignalConfig) -> Self {
        Self::new(config.oversold_level, config.overbought_level)
    }

    pub fn evaluate(&self, indicator_value: f64, price: f64) -> Signal {
        let kind = if indicator_value < self.oversold_level {
            SignalKind::Buy
        } else if indicator_value > self.overbought_level {
            SignalKind::Sell
        } else {
            SignalKind::Hold
        };

        Signal {
            kind,
            indicator_value,
            price,
        }
    }

    /// Edge-triggered crossing back through a level
    ///
    /// Fires when the RSI leaves overbought downward or oversold upward.
    pub fn crossing(&self, previous: f64, current: f64) -> Option<LevelCrossing> {
        if previous > self.overbought_level && current <= self.overbought_level {
            return Some(LevelCrossing::BelowOverbought);
        }
        if previous < self.oversold_level && current >= self.oversold_level {
            return Some(LevelCrossing::AboveOversold);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelCrossing {
    BelowOverbought,
    AboveOversold,
}

/// Percentage change versus the previous cycle's price when it reaches `threshold_pct`
pub fn large_move_pct(previous: Option<f64>, current: f64, threshold_pct: f64) -> Option<f64> {
    let previous = previous.filter(|p| *p > 0.0)?;
    let change_pct = (current - previous) / previous * 100.0;

    if change_pct.is_finite() && change_pct.abs() >= threshold_pct {
        Some(change_pct)
    } else {
        None
    }
}

/// Last emitted actionable signal, used to suppress repeat alerts
#[derive(Debug, Clone)]
pub struct DedupState {
    last_emitted_kind: SignalKind,
}

impl Default for DedupState {
    fn default() -> Self {
        Self {
            last_emitted_kind: SignalKind::Hold,
        }
    }
}

impl DedupState {
    /// Returns true when `signal` should be forwarded as a notification
    ///
    /// HOLD re-arms the state without notifying; an actionable signal is
    /// forwarded only when its kind differs from the last emitted one.
    pub fn should_emit(&mut self, signal: &Signal) -> bool {
        if !signal.is_actionable() {
            self.last_emitted_kind = SignalKind::Hold;
            return false;
        }

        if signal.kind == self.last_emitted_kind {
            return false;
        }

        self.last_emitted_kind = signal.kind;
        true
    }

    pub fn last_emitted_kind(&self) -> SignalKind {
        self.last_emitted_kind
    }
}
