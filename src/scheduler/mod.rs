// Timer-driven orchestration of the alert pipeline
pub mod failures;

pub use failures::FailureTracker;

use crate::api::CoinGeckoClient;
use crate::config::{BotConfig, SchedulerConfig};
use crate::indicators::{RsiEngine, NEUTRAL_RSI};
use crate::models::{PriceSeries, Signal, StatusSnapshot};
use crate::notification::{AlertTemplates, DeliveryOutcome, NotifierClosed, NotifierHandle};
use crate::strategy::{large_move_pct, DedupState, SignalEvaluator};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("no price data available")]
    NoData,
    #[error(transparent)]
    NotifierClosed(#[from] NotifierClosed),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Jittering,
    Fetching,
    Computing,
    Notifying,
}

/// What one completed cycle produced
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub price: f64,
    pub indicator_value: Option<f64>,
    pub signal: Signal,
    pub new_points: usize,
    pub alerts_sent: usize,
    pub alerts_delivered: usize,
}

#[derive(Debug)]
pub enum TickOutcome {
    SkippedFirstRun,
    SkippedCooldown(Duration),
    Completed(CycleReport),
    Failed(CycleError),
}

/// Owns every piece of mutable pipeline state and runs one cycle at a time
///
/// fetch -> compute -> notify -> publish status. Only the
/// [`StatusSnapshot`] leaves this struct, through a watch channel.
pub struct Orchestrator {
    config: SchedulerConfig,
    lookback_hours: u64,
    price_change_threshold_pct: f64,
    feed: CoinGeckoClient,
    engine: RsiEngine,
    evaluator: SignalEvaluator,
    dedup: DedupState,
    templates: AlertTemplates,
    notifier: NotifierHandle,
    failures: FailureTracker,
    status_tx: watch::Sender<StatusSnapshot>,
    phase: CyclePhase,
    first_run: bool,
    last_fed: Option<DateTime<Utc>>,
    last_price: Option<f64>,
    last_indicator: Option<f64>,
}

impl Orchestrator {
    pub fn new(config: &BotConfig, feed: CoinGeckoClient, notifier: NotifierHandle) -> Self {
        let (status_tx, _) = watch::channel(StatusSnapshot::default());

        Self {
            config: config.scheduler.clone(),
            lookback_hours: config.coingecko.lookback_hours,
            price_change_threshold_pct: config.signal.price_change_threshold_pct,
            feed,
            engine: RsiEngine::from_config(&config.indicator),
            evaluator: SignalEvaluator::from_config(&config.signal),
            dedup: DedupState::default(),
            templates: AlertTemplates::new(config.templates.clone()),
            notifier,
            failures: FailureTracker::default(),
            status_tx,
            phase: CyclePhase::Idle,
            first_run: true,
            last_fed: None,
            last_price: None,
            last_indicator: None,
        }
    }

    /// Read-only view for status surfaces; always holds a complete snapshot
    pub fn status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    /// One timer firing: first-run skip, cooldown, jitter, then the cycle
    pub async fn tick(&mut self) -> TickOutcome {
        if self.first_run {
            self.first_run = false;
            if self.config.skip_first_run {
                tracing::info!("⏭️  Skipping first run after startup");
                return TickOutcome::SkippedFirstRun;
            }
        }

        if let Some(remaining) = self.failures.cooldown_remaining(
            Instant::now(),
            self.config.base_cooldown(),
            self.config.max_cooldown_multiplier,
        ) {
            tracing::info!(
                remaining_mins = remaining.as_secs() / 60,
                failures = self.failures.consecutive_failures(),
                "⏳ Cooldown active, skipping cycle"
            );
            return TickOutcome::SkippedCooldown(remaining);
        }

        self.phase = CyclePhase::Jittering;
        let jitter = jitter_delay(self.config.max_jitter_secs);
        tracing::debug!(jitter_ms = jitter.as_millis() as u64, "Applying jitter");
        tokio::time::sleep(jitter).await;

        let outcome = match self.run_cycle().await {
            Ok(report) => {
                self.failures.record_success(Instant::now());
                tracing::info!(
                    price = report.price,
                    rsi = ?report.indicator_value,
                    signal = %report.signal.kind,
                    alerts = report.alerts_sent,
                    "✅ Cycle complete"
                );
                TickOutcome::Completed(report)
            }
            Err(e) => {
                let failures = self.failures.record_failure(Instant::now());
                tracing::error!(failures, error = %e, "❌ Cycle failed");
                self.publish_failed_execution(Utc::now());
                if failures == 1 && self.config.report_failures {
                    self.report_failure(&e).await;
                }
                TickOutcome::Failed(e)
            }
        };

        self.phase = CyclePhase::Idle;
        outcome
    }

    /// fetch -> compute -> notify -> publish, without the timer bookkeeping
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        self.phase = CyclePhase::Fetching;
        let series = self.feed.fetch(self.lookback_hours).await;
        let Some(latest) = series.latest().copied() else {
            return Err(CycleError::NoData);
        };

        self.phase = CyclePhase::Computing;
        let new_points = self.feed_engine(&series);
        let price = latest.price;
        let indicator = self.engine.last_value();

        // Insufficient data is a neutral HOLD, not an error
        let signal = match indicator {
            Some(value) => self.evaluator.evaluate(value, price),
            None => Signal::hold(NEUTRAL_RSI, price),
        };

        self.phase = CyclePhase::Notifying;
        let pending = self.notifier.flush().await?;
        if !pending.delivered.is_empty() || !pending.dropped.is_empty() {
            tracing::info!(
                delivered = pending.delivered.len(),
                dropped = pending.dropped.len(),
                "Flushed queued notifications"
            );
        }

        let alerts = self.collect_alerts(price, indicator, &signal);
        let alerts_sent = alerts.len();
        let mut alerts_delivered = 0;
        for text in alerts {
            if self.notifier.send(text).await? == DeliveryOutcome::Delivered {
                alerts_delivered += 1;
            }
        }

        self.last_price = Some(price);
        if indicator.is_some() {
            self.last_indicator = indicator;
        }

        let now = Utc::now();
        self.status_tx.send_replace(StatusSnapshot {
            last_price: Some(price),
            last_indicator_value: indicator,
            last_signal_kind: Some(signal.kind),
            last_execution_time: Some(now),
            last_success_time: Some(now),
        });

        Ok(CycleReport {
            price,
            indicator_value: indicator,
            signal,
            new_points,
            alerts_sent,
            alerts_delivered,
        })
    }

    /// A failed cycle still counts as an execution; the last good values stay
    fn publish_failed_execution(&self, now: DateTime<Utc>) {
        self.status_tx.send_modify(|status| {
            status.last_execution_time = Some(now);
        });
    }

    /// Feed only prices newer than the last one fed, oldest first
    fn feed_engine(&mut self, series: &PriceSeries) -> usize {
        let fresh = series.newer_than(self.last_fed);
        for point in fresh {
            self.engine.update(point.price);
            self.last_fed = Some(point.timestamp);
        }

        if fresh.is_empty() {
            tracing::debug!("No new prices since last cycle");
        } else {
            tracing::debug!(
                points = fresh.len(),
                observed = self.engine.observed(),
                "Fed new prices to RSI"
            );
        }
        fresh.len()
    }

    fn collect_alerts(&mut self, price: f64, indicator: Option<f64>, signal: &Signal) -> Vec<String> {
        let mut alerts = Vec::new();
        let shown_rsi = indicator.unwrap_or(NEUTRAL_RSI);

        if self.templates.periodic_enabled() {
            alerts.push(self.templates.periodic(price, shown_rsi));
        }

        if let Some(change) =
            large_move_pct(self.last_price, price, self.price_change_threshold_pct)
        {
            tracing::info!(change_pct = change, "Large price move");
            alerts.push(self.templates.price_change(change, price));
        }

        if let (Some(previous), Some(current)) = (self.last_indicator, indicator) {
            if let Some(crossing) = self.evaluator.crossing(previous, current) {
                tracing::info!(?crossing, previous, current, "RSI level crossing");
                alerts.push(self.templates.crossing(crossing, price, current));
            }
        }

        if self.dedup.should_emit(signal) {
            tracing::info!(signal = %signal.kind, rsi = signal.indicator_value, "New trading signal");
            alerts.push(self.templates.classic_signal(signal));
        }

        alerts
    }

    /// Best-effort self-report; its own failure is only logged
    async fn report_failure(&self, error: &CycleError) {
        let text = self.templates.cycle_failure(&error.to_string());
        match self.notifier.send(text).await {
            Ok(outcome) => tracing::debug!(?outcome, "Failure report handed to dispatcher"),
            Err(e) => tracing::warn!(error = %e, "Could not report cycle failure"),
        }
    }

    /// Secondary cycle: log staleness and clear an old failure streak
    pub fn health_check(&mut self) {
        let now = Instant::now();

        let status = self.status_tx.borrow().render();
        let fields = status
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::info!(
            failures = self.failures.consecutive_failures(),
            minutes_since_success = ?self
                .failures
                .since_last_success(now)
                .map(|since| since.as_secs() / 60),
            "🏥 Health check: {}",
            fields
        );

        if self
            .failures
            .reset_if_stale(now, self.config.reset_failures_after())
        {
            tracing::info!("🔄 Resetting consecutive failure counter");
        }
    }

    /// Run forever: clock-aligned cycle timer plus the health-check timer
    ///
    /// Both timers are polled by this one task, so cycles never overlap.
    pub async fn run(mut self) {
        let period = self.config.interval();
        let start = next_aligned_start(period);
        tracing::info!(
            interval_secs = period.as_secs(),
            first_tick_in_secs = start.saturating_duration_since(Instant::now()).as_secs(),
            "🔄 Scheduler starting"
        );

        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let health_period = self.config.health_check_interval();
        let mut health = interval_at(Instant::now() + health_period, health_period);
        health.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::info!("🚀 [CYCLE] Tick at {}", Utc::now().format("%H:%M:%S"));
                    self.tick().await;
                }
                _ = health.tick() => {
                    self.health_check();
                }
            }
        }
    }
}

/// Uniform jitter in [0, max_secs]
fn jitter_delay(max_secs: u64) -> Duration {
    if max_secs == 0 {
        return Duration::ZERO;
    }
    let millis = rand::thread_rng().gen_range(0..=max_secs * 1000);
    Duration::from_millis(millis)
}

/// Seconds until the next wall-clock multiple of `period_secs`
fn secs_until_boundary(now_secs: u64, period_secs: u64) -> u64 {
    let period_secs = period_secs.max(1);
    match now_secs % period_secs {
        0 => 0,
        into_period => period_secs - into_period,
    }
}

/// Calculate when the next period boundary will occur (e.g. XX:00, XX:30 for 30 minutes)
fn next_aligned_start(period: Duration) -> Instant {
    let now_secs = Utc::now().timestamp().max(0) as u64;
    let wait = secs_until_boundary(now_secs, period.as_secs());
    Instant::now() + Duration::from_secs(wait)
}
