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

use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::assignments::Assignment;
use crate::broker::BrokerError;

/// The error taxonomy shared by every socket-facing handler.
///
/// Each kind carries the structured context that travels with it on the
/// wire; [`KasockiError::to_wire`] produces the serializable form.
#[derive(Debug, Error)]
pub enum KasockiError {
    /// The subscribe argument could not be parsed into assignments.
    #[error("invalid assignment: {reason}")]
    InvalidAssignment { reason: String, assignments: Value },
    /// A requested topic is outside the session's available topics.
    #[error("topic '{topic}' is not available")]
    TopicNotAvailable {
        topic: String,
        available_topics: Vec<String>,
    },
    /// The session already holds an effective subscription.
    #[error("session is already subscribed")]
    AlreadySubscribed { assignments: Vec<Assignment> },
    /// `consume` or `start` was requested before any subscription.
    #[error("session is not subscribed to any topics")]
    NotSubscribed,
    /// `start` was requested while the push loop is running.
    #[error("push delivery has already been started")]
    AlreadyStarted,
    /// The session is tearing down. Events reaching a closing session are
    /// dropped before dispatch, so this kind is reserved for bindings that
    /// surface post-close calls instead of dropping them.
    #[error("session is closing")]
    AlreadyClosing,
    /// The filter spec failed validation or compilation.
    #[error("invalid filter: {reason}")]
    InvalidFilter { reason: String, filters: Value },
    /// A broker record could not be turned into a message.
    #[error("failed to deserialize record from {topic}/{partition} at offset {offset}: {reason}")]
    Deserialization {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },
    /// A non-transient broker failure.
    #[error(transparent)]
    Broker(#[from] BrokerError),
    /// Anything else.
    #[error("{0}")]
    Kasocki(String),
}

impl KasockiError {
    /// The wire name of this kind. Broker and catch-all errors surface
    /// under the generic parent name.
    pub fn name(&self) -> &'static str {
        match self {
            KasockiError::InvalidAssignment { .. } => "InvalidAssignment",
            KasockiError::TopicNotAvailable { .. } => "TopicNotAvailable",
            KasockiError::AlreadySubscribed { .. } => "AlreadySubscribed",
            KasockiError::NotSubscribed => "NotSubscribed",
            KasockiError::AlreadyStarted => "AlreadyStarted",
            KasockiError::AlreadyClosing => "AlreadyClosing",
            KasockiError::InvalidFilter { .. } => "InvalidFilter",
            KasockiError::Deserialization { .. } => "Deserialization",
            KasockiError::Broker(_) | KasockiError::Kasocki(_) => "Kasocki",
        }
    }

    /// Serializable form annotated with the session id and the event that
    /// produced it. Stack traces never reach the wire.
    pub fn to_wire(&self, socket: &str, event: &str) -> WireError {
        let mut context = Map::new();
        match self {
            KasockiError::InvalidAssignment { assignments, .. } => {
                context.insert("assignments".to_owned(), assignments.clone());
            }
            KasockiError::TopicNotAvailable {
                available_topics, ..
            } => {
                context.insert("availableTopics".to_owned(), json!(available_topics));
            }
            KasockiError::AlreadySubscribed { assignments } => {
                context.insert("assignments".to_owned(), json!(assignments));
            }
            KasockiError::InvalidFilter { filters, .. } => {
                context.insert("filters".to_owned(), filters.clone());
            }
            KasockiError::Deserialization {
                topic,
                partition,
                offset,
                reason,
            } => {
                context.insert("topic".to_owned(), json!(topic));
                context.insert("partition".to_owned(), json!(partition));
                context.insert("offset".to_owned(), json!(offset));
                context.insert("originalError".to_owned(), json!(reason));
            }
            KasockiError::Broker(error) => {
                context.insert("originalError".to_owned(), json!(error.to_string()));
            }
            _ => {}
        }
        WireError {
            name: self.name(),
            message: self.to_string(),
            socket: socket.to_owned(),
            event: event.to_owned(),
            context,
        }
    }
}

/// The shape every handler failure takes on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct WireError {
    pub name: &'static str,
    pub message: String,
    pub socket: String,
    pub event: String,
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

/// Delivering an event to the socket failed, usually because the peer is
/// gone. Treated as a disconnect by the session.
#[derive(Debug, Error)]
#[error("socket emit failed: {0}")]
pub struct EmitError(pub String);
