//! Observer session: relays one connection's requests into the registry and
//! every lifecycle event back out.
//!
//! Sessions own no process state. Transports feed decoded requests in over
//! an mpsc channel and drain outbound messages from another, so the same
//! relay serves WebSocket and local IPC connections alike.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::models::message::{ClientRequest, NoticeLevel, ServerMessage};
use crate::supervisor::{Delivery, ProcessRegistry, Subscription};
use crate::AppError;

/// Decode one inbound JSON message, or produce the notice explaining why not.
///
/// # Errors
///
/// Returns an error-level [`ServerMessage::Notice`] if `text` is not a
/// valid request.
pub fn parse_request(text: &str) -> Result<ClientRequest, ServerMessage> {
    serde_json::from_str(text.trim()).map_err(|err| {
        ServerMessage::notice(NoticeLevel::Error, format!("invalid request: {err}"))
    })
}

/// Encode one outbound message as JSON text.
///
/// A message that fails to serialise is logged and yields `None`; transports
/// skip it and keep the connection open.
#[must_use]
pub fn encode_message(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(err) => {
            warn!(%err, "failed to serialise outbound message");
            None
        }
    }
}

/// One connected observer.
#[derive(Debug)]
pub struct Session {
    id: String,
    registry: Arc<ProcessRegistry>,
    subscription: Subscription,
}

impl Session {
    /// Open a session and subscribe it to the registry's event bus.
    ///
    /// Only events published after this call are relayed.
    #[must_use]
    pub fn open(registry: Arc<ProcessRegistry>) -> Self {
        let subscription = registry.bus().subscribe();
        let id = Uuid::new_v4().to_string();
        info!(session_id = %id, "observer connected");
        Self {
            id,
            registry,
            subscription,
        }
    }

    /// Session identifier used in logs.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Execute one request. Returns the direct reply to the requester, if
    /// any. A successful terminate has none: its result arrives as the
    /// `process-terminated` broadcast.
    pub async fn handle(&self, request: ClientRequest) -> Option<ServerMessage> {
        match request {
            ClientRequest::StartProcess => match self.registry.start().await {
                Ok(pid) => {
                    debug!(session_id = %self.id, pid, "start request completed");
                    Some(ServerMessage::StartAccepted { pid })
                }
                Err(err) => Some(self.reject(&err)),
            },
            ClientRequest::TerminateProcess { pid } => {
                match self.registry.terminate(pid).await {
                    Ok(()) => None,
                    Err(err) => Some(self.reject(&err)),
                }
            }
            ClientRequest::ListProcesses => Some(ServerMessage::ProcessList {
                processes: self.registry.list().await,
            }),
        }
    }

    fn reject(&self, err: &AppError) -> ServerMessage {
        if err.is_recoverable() {
            debug!(session_id = %self.id, %err, "request rejected");
        } else {
            error!(session_id = %self.id, %err, "request failed");
        }
        ServerMessage::from_error(err)
    }

    /// Relay until the inbound side closes, the outbound side is dropped, or
    /// `cancel` fires. Dropping out of the loop unsubscribes from the bus;
    /// processes started by this session keep running.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<ClientRequest>,
        outbound: mpsc::Sender<ServerMessage>,
        cancel: CancellationToken,
    ) {
        let span = info_span!("session", session_id = %self.id);
        async move {
            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => {
                        debug!("session cancelled");
                        break;
                    }

                    request = inbound.recv() => {
                        let Some(request) = request else {
                            break;
                        };
                        if let Some(reply) = self.handle(request).await {
                            if outbound.send(reply).await.is_err() {
                                break;
                            }
                        }
                    }

                    delivery = self.subscription.recv() => {
                        let message = match delivery {
                            Some(Delivery::Event(event)) => ServerMessage::from(event),
                            Some(Delivery::Lagged(skipped)) => ServerMessage::notice(
                                NoticeLevel::Warning,
                                format!("{skipped} lifecycle events were dropped because this observer fell behind"),
                            ),
                            None => break,
                        };
                        if outbound.send(message).await.is_err() {
                            break;
                        }
                    }
                }
            }

            self.subscription.unsubscribe();
            info!("observer disconnected");
        }
        .instrument(span)
        .await;
    }
}
