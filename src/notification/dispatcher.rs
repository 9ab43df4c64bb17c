use super::gateway::{GatewayClient, GatewayError};
use crate::config::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::time::Instant;
use uuid::Uuid;

/// Message waiting in the outbound queue
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub text: String,
    pub enqueued_at: Instant,
}

impl OutboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            enqueued_at: Instant::now(),
        }
    }
}

/// Why a message stayed in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueReason {
    WindowQuotaExhausted,
    GatewayThrottled,
}

/// Final or current state of one `send` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Dropped,
    Queued(QueueReason),
}

/// Result of draining the queue once
#[derive(Debug, Default)]
pub struct FlushReport {
    pub delivered: Vec<Uuid>,
    pub dropped: Vec<Uuid>,
    pub blocked: Option<QueueReason>,
}

#[derive(Debug)]
struct DispatchState {
    window_start: Instant,
    sent_in_window: u32,
    last_send_at: Option<Instant>,
    throttle_cooldown_until: Option<Instant>,
}

enum AttemptChain {
    Delivered,
    Throttled,
    Exhausted,
}

/// Queued, rate-limited, retrying delivery to the messaging gateway
///
/// Per message: Queued -> Sending -> Delivered | Dropped. Delivery is
/// at-most-once and best-effort; failures are logged, never returned as errors.
pub struct NotificationDispatcher {
    gateway: GatewayClient,
    config: GatewayConfig,
    queue: VecDeque<OutboundMessage>,
    state: DispatchState,
}

impl NotificationDispatcher {
    pub fn new(gateway: GatewayClient, config: GatewayConfig) -> Self {
        Self {
            gateway,
            config,
            queue: VecDeque::new(),
            state: DispatchState {
                window_start: Instant::now(),
                sent_in_window: 0,
                last_send_at: None,
                throttle_cooldown_until: None,
            },
        }
    }

    /// Enqueue `text` and try to drain the queue right away
    pub async fn send(&mut self, text: impl Into<String>) -> DeliveryOutcome {
        let message = OutboundMessage::new(text);
        let id = message.id;
        self.enqueue(message);

        let report = self.flush().await;
        if report.delivered.contains(&id) {
            DeliveryOutcome::Delivered
        } else if report.dropped.contains(&id) || !self.is_queued(id) {
            DeliveryOutcome::Dropped
        } else {
            DeliveryOutcome::Queued(report.blocked.unwrap_or(QueueReason::WindowQuotaExhausted))
        }
    }

    fn enqueue(&mut self, message: OutboundMessage) {
        while self.queue.len() >= self.config.max_queue_len.max(1) {
            if let Some(oldest) = self.queue.pop_front() {
                tracing::warn!(message_id = %oldest.id, "Outbound queue full, dropping oldest message");
            }
        }
        tracing::debug!(message_id = %message.id, queued = self.queue.len() + 1, "Message queued");
        self.queue.push_back(message);
    }

    /// Deliver queued messages in order until the queue is empty or a limit blocks it
    pub async fn flush(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        self.expire_stale(&mut report);

        while let Some(message) = self.queue.front().cloned() {
            if let Some(reason) = self.blocked_reason() {
                tracing::info!(
                    ?reason,
                    queued = self.queue.len(),
                    "Gateway send limit reached, leaving messages queued"
                );
                report.blocked = Some(reason);
                break;
            }

            self.wait_for_cooldown().await;

            match self.deliver_with_retry(&message).await {
                AttemptChain::Delivered => {
                    self.queue.pop_front();
                    self.state.last_send_at = Some(Instant::now());
                    self.state.sent_in_window += 1;
                    tracing::info!(message_id = %message.id, "Notification delivered");
                    report.delivered.push(message.id);
                }
                AttemptChain::Throttled => {
                    self.state.throttle_cooldown_until =
                        Some(Instant::now() + self.config.throttle_cooldown());
                    tracing::warn!(
                        message_id = %message.id,
                        cooldown_ms = self.config.throttle_cooldown_ms,
                        "Gateway rate limit hit, pausing sends"
                    );
                    report.blocked = Some(QueueReason::GatewayThrottled);
                    break;
                }
                AttemptChain::Exhausted => {
                    self.queue.pop_front();
                    tracing::error!(
                        message_id = %message.id,
                        attempts = self.config.retry.max_attempts,
                        "All delivery attempts failed, dropping message"
                    );
                    report.dropped.push(message.id);
                }
            }
        }

        report
    }

    /// Sending state: attempts with exponential backoff; a 429 ends the chain
    async fn deliver_with_retry(&self, message: &OutboundMessage) -> AttemptChain {
        let max_attempts = self.config.retry.max_attempts.max(1);

        for attempt in 0..max_attempts {
            match self.gateway.send_text(&message.text).await {
                Ok(()) => return AttemptChain::Delivered,
                Err(GatewayError::Throttled) => return AttemptChain::Throttled,
                Err(e) => {
                    tracing::warn!(
                        message_id = %message.id,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "Delivery attempt failed"
                    );
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(self.config.retry.delay_for(attempt)).await;
                    }
                }
            }
        }

        AttemptChain::Exhausted
    }

    fn blocked_reason(&mut self) -> Option<QueueReason> {
        let now = Instant::now();

        if let Some(until) = self.state.throttle_cooldown_until {
            if now < until {
                return Some(QueueReason::GatewayThrottled);
            }
            self.state.throttle_cooldown_until = None;
        }

        if now.duration_since(self.state.window_start) >= self.config.window() {
            self.state.window_start = now;
            self.state.sent_in_window = 0;
        }
        if self.state.sent_in_window >= self.config.max_per_window {
            return Some(QueueReason::WindowQuotaExhausted);
        }

        None
    }

    async fn wait_for_cooldown(&self) {
        if let Some(last) = self.state.last_send_at {
            let cooldown = self.config.cooldown();
            let since = last.elapsed();
            if since < cooldown {
                let wait = cooldown - since;
                tracing::debug!(wait_ms = wait.as_millis() as u64, "Waiting out send cooldown");
                tokio::time::sleep(wait).await;
            }
        }
    }

    fn expire_stale(&mut self, report: &mut FlushReport) {
        let max_age = self.config.max_message_age();
        self.queue.retain(|message| {
            let fresh = message.enqueued_at.elapsed() <= max_age;
            if !fresh {
                tracing::warn!(message_id = %message.id, "Queued message expired, dropping");
                report.dropped.push(message.id);
            }
            fresh
        });
    }

    fn is_queued(&self, id: Uuid) -> bool {
        self.queue.iter().any(|m| m.id == id)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn sent_in_window(&self) -> u32 {
        self.state.sent_in_window
    }
}
