/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

//! The WebSocket binding: one session per accepted connection, JSON frames
//! discriminated by `type` with client-chosen `id` for ack correlation.

use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use kasocki::error::EmitError;
use kasocki::session::{EventKind, ServerEvent, SocketEmitter, SocketEvent};
use kasocki::{KasockiError, Session, SessionOptions};
use serde_json::Value;
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Session-side view of the socket: events are queued to the writer task,
/// so a broker poll never blocks behind a slow peer.
struct ChannelEmitter {
    tx: mpsc::Sender<ServerEvent>,
}

#[async_trait]
impl SocketEmitter for ChannelEmitter {
    async fn emit(&mut self, event: ServerEvent) -> Result<(), EmitError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| EmitError("socket writer is gone".to_owned()))
    }
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let socket_id = Uuid::new_v4().to_string();
    info!("socket {socket_id} connected");
    let (mut sink, mut stream) = socket.split();

    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(256);
    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(error) => {
                    warn!("dropping unserializable event: {error}");
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let emitter = ChannelEmitter { tx: out_tx.clone() };
    let session = match Session::initialize(
        socket_id.clone(),
        state.session_config.clone(),
        Box::new(state.broker.client()),
        emitter,
        SessionOptions::default(),
    )
    .await
    {
        Ok(session) => session,
        Err(error) => {
            warn!("socket {socket_id} failed to initialize: {error}");
            drop(out_tx);
            let _ = writer.await;
            return;
        }
    };

    let (event_tx, event_rx) = mpsc::channel::<SocketEvent>(64);
    let session_task = tokio::spawn(session.run(event_rx));

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(_) => break,
        };
        match frame {
            Message::Text(text) => match parse_frame(text.as_str()) {
                Ok(event) => {
                    let disconnect = event.kind == EventKind::Disconnect;
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                    if disconnect {
                        break;
                    }
                }
                Err(reason) => {
                    debug!("socket {socket_id} sent an invalid frame: {reason}");
                    let error = KasockiError::Kasocki(reason).to_wire(&socket_id, "socket");
                    if out_tx.send(ServerEvent::Err { id: None, error }).await.is_err() {
                        break;
                    }
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Closing the event channel is the disconnect signal for the session.
    drop(event_tx);
    let _ = session_task.await;
    drop(out_tx);
    let _ = writer.await;
    info!("socket {socket_id} disconnected");
}

fn parse_frame(text: &str) -> Result<SocketEvent, String> {
    let value: Value =
        serde_json::from_str(text).map_err(|error| format!("frame is not JSON: {error}"))?;
    let frame = value
        .as_object()
        .ok_or_else(|| "frame must be a JSON object".to_owned())?;
    let kind = frame
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "frame is missing a 'type'".to_owned())?;
    let kind = EventKind::from_str(kind).map_err(|_| format!("unknown event type '{kind}'"))?;
    let ack = frame
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let payload = frame.get("data").cloned().unwrap_or(Value::Null);
    Ok(SocketEvent::new(kind, payload, ack))
}
