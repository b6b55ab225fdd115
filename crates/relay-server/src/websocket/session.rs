//! One WebSocket session: a writer task draining the outbound queue and a
//! reader loop feeding the lifecycle, until either side goes away.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::connection::{ClientConnection, Outbound};
use super::lifecycle::{CloseReason, ConnectionLifecycle};

/// Budget for flushing queued frames and the Close frame after teardown.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
/// How long the session waits for its writer before aborting it.
const WRITER_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Drive a socket from accept to close.
///
/// `cancel` becomes the connection's own token; cancelling it (directly or
/// through a parent) tears the session down through the normal close path.
#[instrument(skip_all)]
pub async fn run_ws_session(
    socket: WebSocket,
    lifecycle: Arc<ConnectionLifecycle>,
    cancel: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (conn, rx) = lifecycle.accept(cancel);
    let mut writer = tokio::spawn(write_loop(ws_tx, rx, conn.clone()));

    let reason = loop {
        tokio::select! {
            () = conn.closed() => break CloseReason::Requested,
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let outcome = lifecycle.on_frame(&conn, &Arc::new(text.to_string()));
                    trace!(conn_id = %conn.id, ?outcome, "frame handled");
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let outcome = lifecycle.on_binary(&conn, &bytes);
                    trace!(conn_id = %conn.id, ?outcome, "binary frame handled");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => conn.mark_alive(),
                Some(Ok(Message::Close(_))) | None => break CloseReason::PeerClosed,
                Some(Err(error)) => {
                    debug!(conn_id = %conn.id, %error, "read failed");
                    break CloseReason::TransportError;
                }
            }
        }
    };

    let _ = lifecycle.close(&conn, reason);
    match tokio::time::timeout(WRITER_JOIN_TIMEOUT, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => debug!(conn_id = %conn.id, %error, "writer task ended abnormally"),
        Err(_) => {
            warn!(conn_id = %conn.id, "writer stuck after close, aborting");
            writer.abort();
        }
    }
}

/// Drain `rx` into `sink` until the connection closes.
///
/// Every write is raced against the connection's token, so a peer that
/// stopped reading cannot hold the task past teardown.
async fn write_loop<S>(mut sink: S, mut rx: mpsc::Receiver<Outbound>, conn: Arc<ClientConnection>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        tokio::select! {
            biased;
            () = conn.closed() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { return };
                tokio::select! {
                    result = sink.send(to_message(frame)) => {
                        if let Err(error) = result {
                            debug!(conn_id = %conn.id, %error, "write failed");
                            conn.request_close();
                            return;
                        }
                    }
                    () = conn.closed() => break,
                }
            }
        }
    }

    // Flush what was queued before teardown, then say goodbye.
    let flush = async {
        while let Ok(frame) = rx.try_recv() {
            if sink.send(to_message(frame)).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    };
    if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, flush).await.is_err() {
        debug!(conn_id = %conn.id, "peer not reading, close handshake abandoned");
    }
}

fn to_message(frame: Outbound) -> Message {
    match frame {
        Outbound::Text(text) => Message::Text(text.as_str().into()),
        Outbound::Ping => Message::Ping(Vec::new().into()),
    }
}
