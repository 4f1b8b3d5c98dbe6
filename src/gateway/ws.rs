//! HTTP/WebSocket gateway.
//!
//! - `GET /ws`: upgrade to a WebSocket carrying one JSON message per text
//!   frame; each connection becomes one [`Session`].
//! - `GET /health`: liveness probe, returns `ok`.
//! - `GET /processes`: JSON snapshot of the active process table.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::session::{encode_message, parse_request, Session};
use crate::config::GlobalConfig;
use crate::models::message::ServerMessage;
use crate::models::process::ProcessSummary;
use crate::supervisor::ProcessRegistry;
use crate::{AppError, Result};

/// Shared state handed to every route.
#[derive(Debug, Clone)]
pub struct GatewayState {
    /// Registry every session drives.
    pub registry: Arc<ProcessRegistry>,
    /// Per-session outbound queue length.
    pub outbound_buffer: usize,
    /// Fires on server shutdown; ends every open session.
    pub cancel: CancellationToken,
}

/// Build the gateway router.
#[must_use]
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .route("/processes", get(processes))
        .with_state(state)
}

/// Bind `config.bind_address:config.http_port` and serve until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Transport` if the listener cannot bind or the server
/// fails.
pub async fn serve_http(
    registry: Arc<ProcessRegistry>,
    config: &GlobalConfig,
    ct: CancellationToken,
) -> Result<()> {
    let bind = SocketAddr::new(config.bind_address, config.http_port);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Transport(format!("failed to bind http on {bind}: {err}")))?;

    info!(%bind, "starting HTTP/WebSocket gateway");

    let state = GatewayState {
        registry,
        outbound_buffer: config.outbound_buffer,
        cancel: ct.clone(),
    };

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Transport(format!("http server error: {err}")))?;

    info!("HTTP/WebSocket gateway shut down");
    Ok(())
}

/// Handler for `GET /health`.
async fn health() -> &'static str {
    "ok"
}

/// Handler for `GET /processes`.
async fn processes(State(state): State<GatewayState>) -> Json<Vec<ProcessSummary>> {
    Json(state.registry.list().await)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Bridge one WebSocket to a [`Session`].
async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let session = Session::open(Arc::clone(&state.registry));
    let (mut sink, mut stream) = socket.split();
    let (in_tx, in_rx) = mpsc::channel(state.outbound_buffer);
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(state.outbound_buffer);

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let Some(text) = encode_message(&message) else {
                continue;
            };
            if let Err(err) = sink.send(Message::Text(text.into())).await {
                debug!(%err, "websocket send failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let notices = out_tx.clone();
    let reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match parse_request(text.as_str()) {
                    Ok(request) => {
                        if in_tx.send(request).await.is_err() {
                            break;
                        }
                    }
                    Err(notice) => {
                        if notices.send(notice).await.is_err() {
                            break;
                        }
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    debug!(%err, "websocket read failed");
                    break;
                }
            }
        }
    });

    session.run(in_rx, out_tx, state.cancel.clone()).await;

    reader.abort();
    let _ = writer.await;
}
