//! WebSocket transport: per-connection ingress and write pump.
//!
//! Each accepted socket gets two tasks. The ingress task decodes inbound
//! control messages and writes them into the client's input/camera slots;
//! the write pump drains the client's outbound queue onto the socket in
//! FIFO order. A transport error on either side evicts the connection;
//! a malformed message only costs that message.

use crate::registry::{ClientRegistry, Payload};
use crate::state::SlotTables;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, warn};
use shared::ControlMessage;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

/// Outbound payloads buffered per client before the fan-out starts
/// dropping them.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 2;

/// Accepts connections forever, spawning a handler per socket.
pub async fn serve(
    listener: TcpListener,
    ws_path: String,
    registry: Arc<RwLock<ClientRegistry>>,
    tables: Arc<SlotTables>,
    world_width: u32,
    world_height: u32,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("incoming connection from {}", addr);
                tokio::spawn(handle_connection(
                    stream,
                    ws_path.clone(),
                    Arc::clone(&registry),
                    Arc::clone(&tables),
                    world_width,
                    world_height,
                ));
            }
            Err(e) => {
                error!("accept failed: {}", e);
            }
        }
    }
}

/// Upgrades one socket, admits it, and runs its ingress to completion.
pub async fn handle_connection(
    stream: TcpStream,
    ws_path: String,
    registry: Arc<RwLock<ClientRegistry>>,
    tables: Arc<SlotTables>,
    world_width: u32,
    world_height: u32,
) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let ws = match accept_hdr_async(stream, |req: &Request, resp: Response| {
        if req.uri().path() == ws_path {
            Ok(resp)
        } else {
            let mut refusal = ErrorResponse::new(Some("not found".to_string()));
            *refusal.status_mut() = StatusCode::NOT_FOUND;
            Err(refusal)
        }
    })
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            debug!("{}: WebSocket handshake failed: {}", peer, e);
            return;
        }
    };

    let (outbound_tx, outbound_rx) = mpsc::channel::<Payload>(OUTBOUND_QUEUE_CAPACITY);
    let id = { registry.write().await.admit(outbound_tx) };
    let Some(id) = id else {
        // Dropping the socket is the refusal.
        warn!("{}: connection refused, server full", peer);
        return;
    };

    let (sink, stream) = ws.split();
    let pump = tokio::spawn(write_pump(id, sink, outbound_rx, Arc::clone(&registry)));

    ingress(id, stream, &registry, &tables, world_width, world_height).await;

    registry.write().await.evict(id);
    let _ = pump.await;
}

/// Reads inbound messages until the connection dies or closes.
async fn ingress(
    id: u64,
    mut stream: SplitStream<WebSocketStream<TcpStream>>,
    registry: &RwLock<ClientRegistry>,
    tables: &SlotTables,
    world_width: u32,
    world_height: u32,
) {
    while let Some(next) = stream.next().await {
        let msg = match next {
            Ok(msg) => msg,
            Err(e) => {
                debug!("client {}: read failed: {}", id, e);
                return;
            }
        };

        match msg {
            Message::Binary(data) => {
                let control = match shared::decode_control(&data) {
                    Ok(control) => control,
                    Err(e) => {
                        warn!("client {}: malformed control message: {}", id, e);
                        continue;
                    }
                };
                let Some(slot) = registry.read().await.slot_of(id) else {
                    return;
                };
                apply_control(tables, slot, &control, world_width, world_height);
            }
            Message::Close(_) => {
                debug!("client {}: closed", id);
                return;
            }
            _ => {}
        }
    }
}

/// Applies one control message to the client's slots: viewport size is
/// absolute, the camera origin moves by the message's delta, and the touch
/// is translated from camera-local into world coordinates through the
/// just-moved (pre-clamp) origin. The camera is then clamped in place so
/// the next delta composes from a coherent origin.
pub fn apply_control(
    tables: &SlotTables,
    slot: usize,
    msg: &ControlMessage,
    world_width: u32,
    world_height: u32,
) {
    let cam_slot = &tables.cameras[slot];
    let mut cam = cam_slot.load();

    cam.width = msg.cam.width;
    cam.height = msg.cam.height;
    cam.x += msg.cam.x;
    cam.y += msg.cam.y;

    let mut input = msg.input;
    input.x += cam.x;
    input.y += cam.y;

    shared::clamp_camera(&mut cam, world_width, world_height);
    cam_slot.store(cam);
    tables.inputs[slot].store(input);
}

/// Drains the client's outbound queue onto the socket in FIFO order.
/// Ends when the queue closes (eviction) or a write fails, which evicts.
async fn write_pump(
    id: u64,
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: mpsc::Receiver<Payload>,
    registry: Arc<RwLock<ClientRegistry>>,
) {
    while let Some(payload) = outbound.recv().await {
        for message in payload {
            if let Err(e) = sink.send(Message::Binary(message)).await {
                debug!("client {}: write failed: {}", id, e);
                registry.write().await.evict(id);
                return;
            }
        }
    }
    let _ = sink.close().await;
}
