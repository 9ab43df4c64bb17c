use crate::config::IndicatorConfig;
use std::collections::VecDeque;

/// Value reported while the indicator is warming up or has no valid reading
pub const NEUTRAL_RSI: f64 = 50.0;

/// Incremental Relative Strength Index (Wilder smoothing)
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// Every call to [`RsiEngine::update`] permanently advances the smoothing
/// state, so each observed price must be fed exactly once, oldest first.
#[derive(Debug, Clone)]
pub struct RsiEngine {
    period: usize,
    warmup: usize,
    capacity: usize,
    recent: VecDeque<f64>,
    observed: usize,
    avg_gain: Option<f64>,
    avg_loss: Option<f64>,
    last_value: Option<f64>,
}

impl RsiEngine {
    /// # Arguments
    /// * `period` - Smoothing period P
    /// * `warmup` - Observations W (>= P + 1) required before a value is produced
    /// * `capacity` - Ring buffer size (>= W)
    pub fn new(period: usize, warmup: usize, capacity: usize) -> Self {
        let period = period.max(1);
        let warmup = warmup.max(period + 1);
        let capacity = capacity.max(warmup);

        Self {
            period,
            warmup,
            capacity,
            recent: VecDeque::with_capacity(capacity),
            observed: 0,
            avg_gain: None,
            avg_loss: None,
            last_value: None,
        }
    }

    pub fn from_config(config: &IndicatorConfig) -> Self {
        Self::new(
            config.period,
            config.min_data_points,
            config.recent_prices_limit,
        )
    }

    /// Feed the next price and return the current RSI in [0, 100]
    ///
    /// Returns [`NEUTRAL_RSI`] until the warm-up window is filled.
    pub fn update(&mut self, price: f64) -> f64 {
        if !price.is_finite() {
            tracing::warn!(price, "Ignoring non-finite price");
            return self.value();
        }

        let previous = self.recent.back().copied();

        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(price);
        self.observed += 1;

        if self.observed < self.warmup {
            return NEUTRAL_RSI;
        }

        match (self.avg_gain, self.avg_loss, previous) {
            (Some(avg_gain), Some(avg_loss), Some(previous)) => {
                let (gain, loss) = split_delta(price - previous);
                let p = self.period as f64;
                self.avg_gain = Some((avg_gain * (p - 1.0) + gain) / p);
                self.avg_loss = Some((avg_loss * (p - 1.0) + loss) / p);
            }
            _ => self.seed(),
        }

        self.last_value = rsi_from_averages(self.avg_gain, self.avg_loss);
        self.value()
    }

    /// Seed averages from the first P deltas in the buffer, then smooth the rest
    fn seed(&mut self) {
        let prices: Vec<f64> = self.recent.iter().copied().collect();
        let (avg_gain, avg_loss) = wilder_averages(&prices, self.period);
        self.avg_gain = avg_gain;
        self.avg_loss = avg_loss;
    }

    /// Latest RSI, or [`NEUTRAL_RSI`] while warming up
    pub fn value(&self) -> f64 {
        self.last_value.unwrap_or(NEUTRAL_RSI)
    }

    /// Latest RSI only once the warm-up window has been filled
    pub fn last_value(&self) -> Option<f64> {
        self.last_value
    }

    pub fn is_ready(&self) -> bool {
        self.last_value.is_some()
    }

    pub fn observed(&self) -> usize {
        self.observed
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

fn split_delta(delta: f64) -> (f64, f64) {
    (delta.max(0.0), (-delta).max(0.0))
}

/// Simple average over the first `period` deltas, Wilder-smoothed over the remainder
fn wilder_averages(prices: &[f64], period: usize) -> (Option<f64>, Option<f64>) {
    if prices.len() < period + 1 {
        return (None, None);
    }

    let p = period as f64;
    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = deltas[..period].iter().map(|d| d.max(0.0)).sum::<f64>() / p;
    let mut avg_loss = deltas[..period].iter().map(|d| (-d).max(0.0)).sum::<f64>() / p;

    for delta in &deltas[period..] {
        let (gain, loss) = split_delta(*delta);
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
    }

    (Some(avg_gain), Some(avg_loss))
}

fn rsi_from_averages(avg_gain: Option<f64>, avg_loss: Option<f64>) -> Option<f64> {
    let (avg_gain, avg_loss) = (avg_gain?, avg_loss?);

    let rsi = if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    };

    // NaN is treated as insufficient data
    if rsi.is_finite() {
        Some(rsi.clamp(0.0, 100.0))
    } else {
        None
    }
}

/// Calculate Wilder RSI over a whole price slice (oldest first)
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 {
        return None;
    }
    let (avg_gain, avg_loss) = wilder_averages(prices, period);
    rsi_from_averages(avg_gain, avg_loss)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Wilder's classic 14-period worksheet
    const REFERENCE_PRICES: [f64; 20] = [
        44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08, 45.89, 46.03,
        45.61, 46.28, 46.28, 46.00, 46.03, 46.41, 46.22, 45.64,
    ];
    const REFERENCE_RSI_AT_15: f64 = 70.46413502109705;
    const REFERENCE_RSI_AT_20: f64 = 57.91502067008556;

    #[test]
    fn test_rsi_calculation() {
        let rsi = calculate_rsi(&REFERENCE_PRICES, 14).unwrap();
        assert!((rsi - REFERENCE_RSI_AT_20).abs() < 1e-6, "got {}", rsi);

        let rsi = calculate_rsi(&REFERENCE_PRICES[..15], 14).unwrap();
        assert!((rsi - REFERENCE_RSI_AT_15).abs() < 1e-6, "got {}", rsi);
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let prices = vec![100.0, 102.0, 101.0];
        let rsi = calculate_rsi(&prices, 14);
        assert!(rsi.is_none());
    }

    #[test]
    fn test_rsi_all_gains() {
        let prices = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0];
        let rsi = calculate_rsi(&prices, 5);
        assert_eq!(rsi, Some(100.0)); // All gains = RSI 100
    }

    #[test]
    fn test_engine_matches_reference() {
        let mut engine = RsiEngine::new(14, 15, 20);
        let mut last = NEUTRAL_RSI;

        for (i, price) in REFERENCE_PRICES.iter().enumerate() {
            last = engine.update(*price);
            if i == 14 {
                assert!((last - REFERENCE_RSI_AT_15).abs() < 1e-6, "got {}", last);
            }
        }

        assert!((last - REFERENCE_RSI_AT_20).abs() < 1e-6, "got {}", last);
    }

    #[test]
    fn test_engine_neutral_during_warmup() {
        let mut engine = RsiEngine::new(14, 15, 20);

        for price in &REFERENCE_PRICES[..14] {
            let value = engine.update(*price);
            assert_eq!(value, NEUTRAL_RSI);
            assert!(!value.is_nan());
        }

        assert!(!engine.is_ready());
        assert_eq!(engine.last_value(), None);
        assert_eq!(engine.observed(), 14);
    }

    #[test]
    fn test_engine_longer_warmup_smooths_remaining_deltas() {
        // W > P + 1: seeding smooths the deltas beyond the first P
        let mut engine = RsiEngine::new(14, 20, 20);
        let mut last = NEUTRAL_RSI;
        for price in REFERENCE_PRICES {
            last = engine.update(price);
        }

        assert!((last - REFERENCE_RSI_AT_20).abs() < 1e-6, "got {}", last);
    }

    #[test]
    fn test_engine_rising_series_converges_to_100() {
        let mut engine = RsiEngine::new(14, 15, 20);

        for i in 0..100 {
            let value = engine.update(100.0 + i as f64);
            assert!((0.0..=100.0).contains(&value));
        }

        assert_eq!(engine.value(), 100.0);
    }

    #[test]
    fn test_engine_falling_series_approaches_zero() {
        let mut engine = RsiEngine::new(14, 15, 20);

        // One early gain keeps avg_gain positive so the value approaches 0 from above
        engine.update(100.0);
        engine.update(101.0);
        for i in 0..200 {
            let value = engine.update(100.0 - i as f64 * 0.1);
            assert!((0.0..=100.0).contains(&value));
        }

        assert!(engine.value() < 1.0);
    }

    #[test]
    fn test_engine_flat_series_is_100_not_nan() {
        let mut engine = RsiEngine::new(14, 15, 20);

        for _ in 0..30 {
            let value = engine.update(50_000.0);
            assert!(!value.is_nan());
        }

        // No losses at all => RSI 100
        assert_eq!(engine.value(), 100.0);
    }

    #[test]
    fn test_engine_ignores_non_finite_prices() {
        let mut engine = RsiEngine::new(14, 15, 20);

        for price in REFERENCE_PRICES {
            engine.update(price);
        }
        let before = engine.value();

        assert_eq!(engine.update(f64::NAN), before);
        assert_eq!(engine.update(f64::INFINITY), before);
        assert_eq!(engine.observed(), 20);
    }

    #[test]
    fn test_ring_buffer_is_bounded() {
        let mut engine = RsiEngine::new(14, 15, 20);
        for i in 0..500 {
            engine.update(100.0 + (i % 7) as f64);
        }

        assert_eq!(engine.recent.len(), 20);
    }
}
