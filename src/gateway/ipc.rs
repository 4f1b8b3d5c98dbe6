//! Local IPC gateway for `process-relay-ctl`.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Each connection is one [`Session`]
//! speaking the observer contract as line-delimited JSON.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"event": "start-process"}
//! {"event": "terminate-process", "pid": 4242}
//! {"event": "list-processes"}
//! ```
//!
//! Every lifecycle event and reply is written back as one JSON object per
//! line.

use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::session::{encode_message, parse_request, Session};
use crate::models::message::ServerMessage;
use crate::supervisor::ProcessRegistry;
use crate::{AppError, Result};

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Transport` if the listener cannot be created.
pub fn spawn_ipc_server(
    registry: Arc<ProcessRegistry>,
    name: &str,
    outbound_buffer: usize,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = name.to_owned();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Transport(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Transport(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(handle_connection(
                                    stream,
                                    Arc::clone(&registry),
                                    outbound_buffer,
                                    ct.clone(),
                                ));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Bridge a single IPC client connection to a [`Session`].
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    registry: Arc<ProcessRegistry>,
    outbound_buffer: usize,
    ct: CancellationToken,
) {
    let session = Session::open(registry);
    let span = info_span!("ipc_conn", session_id = %session.id());
    async move {
        let (reader, mut writer) = stream.split();
        let (in_tx, in_rx) = mpsc::channel(outbound_buffer);
        let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(outbound_buffer);

        let writer_task = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let Some(mut line) = encode_message(&message) else {
                    continue;
                };
                line.push('\n');

                if let Err(err) = writer.write_all(line.as_bytes()).await {
                    warn!(%err, "failed to write ipc message");
                    break;
                }
            }
        });

        let notices = out_tx.clone();
        let reader_task = tokio::spawn(async move {
            let mut buf_reader = BufReader::new(reader);
            let mut line = String::new();

            loop {
                line.clear();
                match buf_reader.read_line(&mut line).await {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let delivered = match parse_request(&line) {
                            Ok(request) => in_tx.send(request).await.is_ok(),
                            Err(notice) => notices.send(notice).await.is_ok(),
                        };
                        if !delivered {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "ipc read error");
                        break;
                    }
                }
            }
        });

        session.run(in_rx, out_tx, ct).await;

        reader_task.abort();
        let _ = writer_task.await;
        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}
