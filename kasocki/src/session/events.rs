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

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use strum_macros::{Display, EnumString, IntoStaticStr};

use crate::error::{EmitError, WireError};

/// The client-to-server event vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    Subscribe,
    Filter,
    Consume,
    Start,
    Stop,
    Disconnect,
}

/// One inbound socket event: the kind, its single argument, and the
/// client-chosen ack correlation id (absent when the client did not
/// request an ack).
#[derive(Debug, Clone)]
pub struct SocketEvent {
    pub kind: EventKind,
    pub payload: Value,
    pub ack: Option<String>,
}

impl SocketEvent {
    pub fn new(kind: EventKind, payload: Value, ack: Option<String>) -> Self {
        Self { kind, payload, ack }
    }
}

/// The server-to-client event vocabulary, in wire shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    /// Emitted once after successful init with the available topics.
    Ready { data: Vec<String> },
    /// Successful ack for a correlated request.
    Ack { id: String, data: Value },
    /// Handler failure; `id` is present when the failed request asked for
    /// an ack.
    Err {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        error: WireError,
    },
    /// Push-mode delivery.
    Message { data: Value },
}

/// The session's view of the socket transport: a sink for server events.
/// A failed emit means the peer is unreachable and closes the session.
#[async_trait]
pub trait SocketEmitter: Send {
    async fn emit(&mut self, event: ServerEvent) -> Result<(), EmitError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_event_kinds_round_trip_lowercase() {
        assert_eq!(EventKind::from_str("subscribe").unwrap(), EventKind::Subscribe);
        assert_eq!(EventKind::from_str("disconnect").unwrap(), EventKind::Disconnect);
        assert!(EventKind::from_str("Subscribe").is_err());
        assert!(EventKind::from_str("admin").is_err());
        let name: &'static str = EventKind::Consume.into();
        assert_eq!(name, "consume");
    }

    #[test]
    fn test_server_events_serialize_with_type_tag() {
        let ready = ServerEvent::Ready {
            data: vec!["clicks".to_owned()],
        };
        let value = serde_json::to_value(&ready).unwrap();
        assert_eq!(value["type"], "ready");
        assert_eq!(value["data"], serde_json::json!(["clicks"]));
    }
}
