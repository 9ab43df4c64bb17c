// Outbound alerts to the messaging gateway
pub mod dispatcher;
pub mod gateway;
pub mod templates;

pub use dispatcher::{DeliveryOutcome, FlushReport, NotificationDispatcher, QueueReason};
pub use gateway::{GatewayClient, GatewayError};
pub use templates::AlertTemplates;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, thiserror::Error)]
#[error("notification dispatcher task has stopped")]
pub struct NotifierClosed;

enum Command {
    Send {
        text: String,
        reply: oneshot::Sender<DeliveryOutcome>,
    },
    Flush {
        reply: oneshot::Sender<FlushReport>,
    },
}

/// Cloneable handle to the task that owns the [`NotificationDispatcher`]
///
/// Requests are served one at a time, so queue and quota state is never
/// touched concurrently.
#[derive(Clone)]
pub struct NotifierHandle {
    tx: mpsc::Sender<Command>,
}

impl NotifierHandle {
    /// Hand `text` to the dispatcher and wait for its delivery attempt chain
    pub async fn send(&self, text: impl Into<String>) -> Result<DeliveryOutcome, NotifierClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Send {
                text: text.into(),
                reply,
            })
            .await
            .map_err(|_| NotifierClosed)?;
        rx.await.map_err(|_| NotifierClosed)
    }

    /// Retry whatever is still queued
    pub async fn flush(&self) -> Result<FlushReport, NotifierClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Flush { reply })
            .await
            .map_err(|_| NotifierClosed)?;
        rx.await.map_err(|_| NotifierClosed)
    }
}

/// Spawn the dispatcher task; it exits once every handle is dropped
pub fn spawn_dispatcher(mut dispatcher: NotificationDispatcher) -> (NotifierHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(COMMAND_BUFFER);

    let task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Send { text, reply } => {
                    let outcome = dispatcher.send(text).await;
                    let _ = reply.send(outcome);
                }
                Command::Flush { reply } => {
                    let report = dispatcher.flush().await;
                    let _ = reply.send(report);
                }
            }
        }
        tracing::debug!(
            queued = dispatcher.queue_len(),
            "Notification dispatcher stopped"
        );
    });

    (NotifierHandle { tx }, task)
}
