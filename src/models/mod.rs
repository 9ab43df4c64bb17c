use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder rendered for status fields that were never populated
pub const STATUS_PLACEHOLDER: &str = "N/A";

/// A single observed price
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl PricePoint {
    /// Build a point from an upstream `[timestamp_ms, price]` pair
    pub fn from_millis(timestamp_ms: i64, price: f64) -> Option<Self> {
        let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp_ms)?;
        Some(Self { timestamp, price })
    }
}

/// Price series sorted by timestamp, without duplicate timestamps
///
/// Upstream order is not guaranteed, so construction always sorts.
/// An empty series is valid and means "no data".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Sort points chronologically and drop duplicate timestamps (last one wins)
    pub fn from_unsorted(mut points: Vec<PricePoint>) -> Self {
        // Stable sort keeps payload order among equal timestamps
        points.sort_by_key(|p| p.timestamp);

        let mut deduped: Vec<PricePoint> = Vec::with_capacity(points.len());
        for point in points {
            match deduped.last_mut() {
                Some(last) if last.timestamp == point.timestamp => *last = point,
                _ => deduped.push(point),
            }
        }

        Self { points: deduped }
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    pub fn prices(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.price).collect()
    }

    /// Points strictly newer than `since` (all points when `since` is None)
    pub fn newer_than(&self, since: Option<DateTime<Utc>>) -> &[PricePoint] {
        match since {
            None => &self.points,
            Some(ts) => {
                let start = self.points.partition_point(|p| p.timestamp <= ts);
                &self.points[start..]
            }
        }
    }

    /// Keep only points within `hours` of the newest point
    pub fn trim_to_hours(self, hours: u64) -> Self {
        let Some(newest) = self.latest().map(|p| p.timestamp) else {
            return self;
        };
        let cutoff = newest - chrono::Duration::hours(hours as i64);
        let points = self
            .points
            .into_iter()
            .filter(|p| p.timestamp >= cutoff)
            .collect();
        Self { points }
    }
}

/// Trading signal classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
}

impl SignalKind {
    /// Anything other than HOLD is actionable
    pub fn is_actionable(&self) -> bool {
        !matches!(self, SignalKind::Hold)
    }

    /// Display text used in alert templates
    pub fn label(&self) -> &'static str {
        match self {
            SignalKind::Buy => "🟢 STRONG BUY - RSI oversold",
            SignalKind::Sell => "🔴 STRONG SELL - RSI overbought",
            SignalKind::Hold => "⚪ HOLD - no signal",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Buy => "BUY",
            SignalKind::Sell => "SELL",
            SignalKind::Hold => "HOLD",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal recomputed every cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub indicator_value: f64,
    pub price: f64,
}

impl Signal {
    pub fn hold(indicator_value: f64, price: f64) -> Self {
        Self {
            kind: SignalKind::Hold,
            indicator_value,
            price,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.kind.is_actionable()
    }
}

/// The only state visible outside the pipeline, published once per cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub last_price: Option<f64>,
    pub last_indicator_value: Option<f64>,
    pub last_signal_kind: Option<SignalKind>,
    pub last_execution_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    /// Read-only view with placeholders for never-populated fields
    pub fn render(&self) -> Vec<(&'static str, String)> {
        fn or_placeholder<T>(value: Option<T>, f: impl FnOnce(T) -> String) -> String {
            value.map(f).unwrap_or_else(|| STATUS_PLACEHOLDER.to_string())
        }

        vec![
            ("price", or_placeholder(self.last_price, |p| format!("{:.2}", p))),
            (
                "indicatorValue",
                or_placeholder(self.last_indicator_value, |v| format!("{:.2}", v)),
            ),
            (
                "signalKind",
                or_placeholder(self.last_signal_kind, |k| k.to_string()),
            ),
            (
                "lastExecutionTime",
                or_placeholder(self.last_execution_time, |t| t.to_rfc3339()),
            ),
            (
                "lastSuccessTime",
                or_placeholder(self.last_success_time, |t| t.to_rfc3339()),
            ),
        ]
    }
}
