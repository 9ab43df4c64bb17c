// Local control socket for the running service
//
// One JSON object per line in each direction. Manual messages go through the
// service's own NotifierHandle, so they share its quota and cooldowns.

use crate::notification::{DeliveryOutcome, NotifierHandle};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DeliveryOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotifyResponse {
    fn delivered(outcome: DeliveryOutcome) -> Self {
        Self {
            ok: true,
            outcome: Some(outcome),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            outcome: None,
            error: Some(error.into()),
        }
    }
}

pub struct ControlServer {
    listener: TcpListener,
    notifier: NotifierHandle,
}

impl ControlServer {
    pub async fn bind(addr: &str, notifier: NotifierHandle) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind control socket on {}", addr))?;
        Ok(Self { listener, notifier })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until the task is dropped
    pub async fn serve(self) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let notifier = self.notifier.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(stream, notifier).await {
                    tracing::warn!(%peer, error = %e, "Control client failed");
                }
            });
        }
    }
}

async fn handle_client(stream: TcpStream, notifier: NotifierHandle) -> anyhow::Result<()> {
    let (r, mut w) = stream.into_split();
    let mut lines = BufReader::new(r).lines();

    while let Some(line) = lines.next_line().await? {
        let response = match serde_json::from_str::<NotifyRequest>(&line) {
            Err(e) => NotifyResponse::failed(format!("bad json: {}", e)),
            Ok(req) if req.text.trim().is_empty() => NotifyResponse::failed("message text is empty"),
            Ok(req) => match notifier.send(req.text).await {
                Ok(outcome) => {
                    tracing::info!(?outcome, "Manual notification handled");
                    NotifyResponse::delivered(outcome)
                }
                Err(e) => NotifyResponse::failed(e.to_string()),
            },
        };
        write_line(&mut w, &response).await?;
    }

    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin, T: Serialize>(w: &mut W, value: &T) -> anyhow::Result<()> {
    let line = serde_json::to_string(value)? + "\n";
    w.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Hand `text` to the service listening on `addr` and return its delivery outcome
pub async fn send_manual(addr: &str, text: &str) -> anyhow::Result<DeliveryOutcome> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Is the service running? Could not reach {}", addr))?;
    let (r, mut w) = stream.into_split();

    write_line(
        &mut w,
        &NotifyRequest {
            text: text.to_string(),
        },
    )
    .await?;

    let mut lines = BufReader::new(r).lines();
    let line = lines
        .next_line()
        .await?
        .context("control socket closed without a reply")?;
    let response: NotifyResponse =
        serde_json::from_str(&line).context("Failed to parse control reply")?;

    match (response.ok, response.outcome) {
        (true, Some(outcome)) => Ok(outcome),
        _ => anyhow::bail!(
            "service rejected the message: {}",
            response.error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}
