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

//! The thin seam between a session and the log broker behind it.

mod in_memory;

pub use in_memory::{InMemoryBroker, InMemoryBrokerClient};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::assignments::Assignment;
use crate::configs::{BrokerConfig, EffectiveBrokerConfig};

/// One raw record as polled from the broker.
#[derive(Debug, Clone)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp_ms: i64,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

impl Record {
    pub fn key_utf8(&self) -> Option<String> {
        self.key
            .as_ref()
            .map(|key| String::from_utf8_lossy(key).into_owned())
    }
}

/// Topic listing as reported by the broker at connect time.
#[derive(Debug, Clone, Default)]
pub struct BrokerMetadata {
    topics: Vec<(String, Vec<i32>)>,
}

impl BrokerMetadata {
    pub fn add_topic(&mut self, name: &str, partitions: i32) {
        self.topics
            .push((name.to_owned(), (0..partitions).collect()));
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.topics.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn partitions_of(&self, topic: &str) -> Option<&[i32]> {
        self.topics
            .iter()
            .find(|(name, _)| name == topic)
            .map(|(_, partitions)| partitions.as_slice())
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The assigned position reached the end of the partition's log.
    #[error("partition {topic}/{partition} reached end of log")]
    PartitionEof { topic: String, partition: i32 },
    /// No record arrived within the poll's max wait.
    #[error("poll timed out after {0:?}")]
    PollTimeout(Duration),
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("unknown topic or partition: {0}")]
    UnknownTopicOrPartition(String),
    #[error("broker client error: {0}")]
    Client(String),
}

impl BrokerError {
    /// Transient conditions are absorbed by the consume loop with a short
    /// backoff and never surface to clients.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::PartitionEof { .. } | BrokerError::PollTimeout(_)
        )
    }
}

/// The external log-broker client, specified only where the session
/// touches it.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn connect(&mut self, config: &EffectiveBrokerConfig) -> Result<(), BrokerError>;
    async fn metadata(&self) -> Result<BrokerMetadata, BrokerError>;
    async fn assign(&mut self, assignments: &[Assignment]) -> Result<(), BrokerError>;
    /// Blocks for up to `max_wait` for the next record from any assigned
    /// partition. Must be cancel-safe: dropping the returned future must
    /// not advance the consumer position.
    async fn poll(&mut self, max_wait: Duration) -> Result<Record, BrokerError>;
    async fn disconnect(&mut self) -> Result<(), BrokerError>;
}

/// Callback invoked with raw broker-client events (name, payload).
pub type BrokerEventHook = Box<dyn Fn(&str, &Value) + Send + Sync>;

/// Session-owned wrapper around a broker client. Applies the forced
/// per-socket identity, tracks disconnect-once, and bounds the teardown.
pub struct BrokerAdapter {
    client: Box<dyn BrokerClient>,
    config: EffectiveBrokerConfig,
    disconnect_timeout: Duration,
    disconnected: bool,
    event_hook: Option<BrokerEventHook>,
}

impl BrokerAdapter {
    pub fn new(
        client: Box<dyn BrokerClient>,
        broker_config: &BrokerConfig,
        socket_id: &str,
        disconnect_timeout: Duration,
    ) -> Self {
        Self {
            client,
            config: EffectiveBrokerConfig::for_socket(broker_config, socket_id),
            disconnect_timeout,
            disconnected: false,
            event_hook: None,
        }
    }

    pub fn with_event_hook(mut self, hook: BrokerEventHook) -> Self {
        self.event_hook = Some(hook);
        self
    }

    pub fn group_id(&self) -> &str {
        &self.config.group_id
    }

    pub async fn connect(&mut self) -> Result<(), BrokerError> {
        self.client.connect(&self.config).await?;
        self.notify("connected", json!({"group_id": self.config.group_id}));
        Ok(())
    }

    pub async fn metadata(&self) -> Result<BrokerMetadata, BrokerError> {
        self.client.metadata().await
    }

    pub async fn assign(&mut self, assignments: &[Assignment]) -> Result<(), BrokerError> {
        self.client.assign(assignments).await
    }

    pub async fn poll(&mut self, max_wait: Duration) -> Result<Record, BrokerError> {
        self.client.poll(max_wait).await
    }

    /// Disconnects at most once. The loop owning this adapter has already
    /// stopped by the time this runs, so any in-flight poll was dropped; a
    /// slow broker teardown is bounded and logged rather than propagated.
    pub async fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        match tokio::time::timeout(self.disconnect_timeout, self.client.disconnect()).await {
            Ok(Ok(())) => debug!("broker client for group {} disconnected", self.config.group_id),
            Ok(Err(error)) => warn!(
                "broker disconnect for group {} failed: {error}",
                self.config.group_id
            ),
            Err(_) => warn!(
                "broker disconnect for group {} timed out after {:?}",
                self.config.group_id, self.disconnect_timeout
            ),
        }
        self.notify("disconnected", Value::Null);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn notify(&self, event: &str, payload: Value) {
        if let Some(hook) = &self.event_hook {
            hook(event, &payload);
        }
    }
}

impl std::fmt::Debug for BrokerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerAdapter")
            .field("config", &self.config)
            .field("disconnected", &self.disconnected)
            .field("event_hook", &self.event_hook.as_ref().map(|_| "..."))
            .finish()
    }
}
