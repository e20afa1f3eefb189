//! WebSocket transport glue: one reader task, one writer task, one session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use vibe_core::ids::RoomId;
use vibe_core::messages::JoinRequest;

use crate::connection::ConnectionHandle;
use crate::server::AppState;
use crate::session::Session;

const INBOUND_QUEUE: usize = 64;

#[derive(Clone, Copy, Debug)]
struct Heartbeat {
    interval: Duration,
    timeout: Duration,
}

/// Run one client connection to completion.
pub async fn serve_socket(
    socket: WebSocket,
    state: AppState,
    room_id: RoomId,
    preset: Option<JoinRequest>,
) {
    let (handle, outbound) = ConnectionHandle::channel(state.config.max_send_queue);
    let connection_id = handle.id().clone();
    state.connections.fetch_add(1, Ordering::Relaxed);
    tracing::info!(connection_id = %connection_id, room_id = %room_id, "WebSocket client connected");

    let (ws_tx, ws_rx) = socket.split();
    let last_pong = Arc::new(AtomicU64::new(now_secs()));
    let heartbeat = Heartbeat {
        interval: state.config.heartbeat_interval,
        timeout: state.config.client_timeout,
    };

    let writer = tokio::spawn(write_loop(
        ws_tx,
        outbound,
        handle.clone(),
        heartbeat,
        Arc::clone(&last_pong),
    ));
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(INBOUND_QUEUE);
    let reader = tokio::spawn(read_loop(ws_rx, inbound_tx, last_pong));

    let session = Session::new(
        Arc::clone(&state.registry),
        Arc::clone(&state.ids),
        room_id,
        handle.clone(),
    );
    session.run(preset, ReceiverStream::new(inbound_rx)).await;

    handle.close();
    reader.abort();
    let _ = writer.await;

    state.connections.fetch_sub(1, Ordering::Relaxed);
    tracing::info!(connection_id = %connection_id, "WebSocket client disconnected");
}

/// Forward queued messages (then any coalesced presence) to the socket and
/// ping periodically. Ends when the socket fails, the client stops answering
/// pings, or the handle is closed.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<String>,
    handle: ConnectionHandle,
    heartbeat: Heartbeat,
    last_pong: Arc<AtomicU64>,
) {
    let mut ping_interval = tokio::time::interval(heartbeat.interval);
    ping_interval.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            biased;
            _ = handle.closed() => break,
            msg = rx.recv() => {
                match msg {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            // Only reached with the queue empty, so the snapshot follows
            // everything enqueued before it.
            _ = handle.presence_pending() => {
                if let Some(text) = handle.take_pending_presence() {
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            }
            _ = ping_interval.tick() => {
                let silent_for = now_secs().saturating_sub(last_pong.load(Ordering::Relaxed));
                if silent_for >= heartbeat.timeout.as_secs() {
                    tracing::info!(connection_id = %handle.id(), silent_for, "Client timed out");
                    break;
                }
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                tracing::trace!(connection_id = %handle.id(), "Sent ping");
            }
        }
    }

    handle.close();
    let _ = ws_tx.close().await;
}

/// Forward text frames to the session and track pongs. Dropping `on_message`
/// on exit ends the session's inbound stream.
async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    on_message: mpsc::Sender<String>,
    last_pong: Arc<AtomicU64>,
) {
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            WsMessage::Text(text) => {
                if on_message.send(text.to_string()).await.is_err() {
                    break;
                }
            }
            WsMessage::Pong(_) => last_pong.store(now_secs(), Ordering::Relaxed),
            WsMessage::Close(_) => break,
            WsMessage::Ping(_) => {} // axum handles pong automatically
            WsMessage::Binary(_) => {
                tracing::debug!("Binary frame ignored");
            }
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
