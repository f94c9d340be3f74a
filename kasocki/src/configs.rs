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

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use strum_macros::Display;

/// Per-session configuration. Defaults produce a working localhost session.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Optional allow-list: `availableTopics = metadata ∩ allowed_topics`.
    /// Absent means every metadata topic is exposed.
    pub allowed_topics: Option<Vec<String>>,
    pub broker: BrokerConfig,
    /// Backoff between retries on benign broker conditions.
    pub consume_retry_interval: HumanDuration,
    /// Upper bound for a single blocking broker poll.
    pub poll_max_wait: HumanDuration,
    /// Upper bound for the broker disconnect at teardown; a timeout here is
    /// logged and treated as non-fatal.
    pub disconnect_timeout: HumanDuration,
}

impl SessionConfig {
    pub fn consume_retry_interval(&self) -> Duration {
        self.consume_retry_interval
            .as_duration_or(Duration::from_millis(100))
    }

    pub fn poll_max_wait(&self) -> Duration {
        self.poll_max_wait.as_duration_or(Duration::from_millis(500))
    }

    pub fn disconnect_timeout(&self) -> Duration {
        self.disconnect_timeout.as_duration_or(Duration::from_secs(5))
    }
}

/// Broker-facing configuration forwarded through the adapter. Group id and
/// auto-commit are not configurable here: the adapter forces a unique group
/// per socket and disables commits (see `EffectiveBrokerConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub brokers: String,
    pub client_id: Option<String>,
    pub auto_offset_reset: OffsetReset,
    /// Opaque options forwarded to the broker client verbatim, after the
    /// forced keys are applied.
    pub options: HashMap<String, String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            client_id: None,
            auto_offset_reset: OffsetReset::default(),
            options: HashMap::new(),
        }
    }
}

fn default_brokers() -> String {
    "localhost:9092".to_owned()
}

/// Policy applied when an assigned offset falls outside the log.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    #[strum(to_string = "earliest")]
    Earliest,
    #[default]
    #[strum(to_string = "latest")]
    Latest,
}

/// A duration that reads as a humantime string ("100ms", "5s") in config
/// files. An empty string means "use the built-in default".
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HumanDuration(pub String);

impl HumanDuration {
    pub fn new(value: &str) -> Self {
        Self(value.to_owned())
    }

    fn as_duration_or(&self, fallback: Duration) -> Duration {
        if self.0.is_empty() {
            return fallback;
        }
        humantime::Duration::from_str(&self.0)
            .map(Into::into)
            .unwrap_or(fallback)
    }
}

/// The configuration the adapter actually hands to the broker client, with
/// the forced per-socket identity applied.
#[derive(Debug, Clone)]
pub struct EffectiveBrokerConfig {
    pub brokers: String,
    pub client_id: String,
    pub group_id: String,
    /// Always false. Sessions are standalone readers; nothing is committed.
    pub enable_auto_commit: bool,
    pub auto_offset_reset: OffsetReset,
    pub options: HashMap<String, String>,
}

impl EffectiveBrokerConfig {
    /// Forces `group.id = kasocki-<socket-id>` so the broker never attempts
    /// a rebalance, and `enable.auto.commit = false`. Defaults the broker
    /// list and client id when absent.
    pub fn for_socket(config: &BrokerConfig, socket_id: &str) -> Self {
        let group_id = format!("kasocki-{socket_id}");
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("kasocki-{socket_id}"));
        let mut options = config.options.clone();
        options.insert("metadata.broker.list".to_owned(), config.brokers.clone());
        options.insert("client.id".to_owned(), client_id.clone());
        options.insert("group.id".to_owned(), group_id.clone());
        options.insert("enable.auto.commit".to_owned(), "false".to_owned());
        options.insert(
            "default_topic_config.auto.offset.reset".to_owned(),
            config.auto_offset_reset.to_string(),
        );
        Self {
            brokers: config.brokers.clone(),
            client_id,
            group_id,
            enable_auto_commit: false,
            auto_offset_reset: config.auto_offset_reset,
            options,
        }
    }
}
