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

//! Per-socket consumer sessions over a partitioned log.
//!
//! Each accepted socket connection owns one [`session::Session`]: an isolated
//! reader with explicit topic/partition/offset assignments, optional
//! server-side filtering compiled from a JSON filter spec, and two delivery
//! modes (request/ack pull and start/stop push). The broker behind the
//! session is reached through the [`broker::BrokerClient`] trait; an
//! in-memory implementation backs tests and local development.

pub mod assignments;
pub mod broker;
pub mod configs;
pub mod deserializer;
pub mod error;
pub mod filtering;
pub mod metrics;
pub mod session;

pub use assignments::{Assignment, OFFSET_LATEST};
pub use broker::{
    BrokerAdapter, BrokerClient, BrokerError, BrokerMetadata, InMemoryBroker, Record,
};
pub use configs::{BrokerConfig, OffsetReset, SessionConfig};
pub use deserializer::{Deserializer, JsonDeserializer, ORIGIN_KEY};
pub use error::{KasockiError, WireError};
pub use filtering::{Matcher, MatcherFactory};
pub use metrics::{CounterMetrics, MetricsSink, NoopMetrics};
pub use session::{ServerEvent, Session, SessionOptions, SocketEmitter, SocketEvent};
