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
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{BrokerClient, BrokerError, BrokerMetadata, Record};
use crate::assignments::{Assignment, OFFSET_LATEST};
use crate::configs::{EffectiveBrokerConfig, OffsetReset};

#[derive(Debug, Clone)]
struct StoredRecord {
    timestamp_ms: i64,
    key: Option<Bytes>,
    payload: Bytes,
}

/// A partitioned log held in memory: the offset of a record is its index.
/// Backs tests and local development; sessions reach it through
/// [`InMemoryBrokerClient`] handles that each hold their own positions.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    topics: RwLock<HashMap<String, Vec<Vec<StoredRecord>>>>,
    data_available: Notify,
}

impl InMemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a topic if it does not exist yet.
    pub fn create_topic(&self, name: &str, partitions: i32) {
        let mut topics = self.topics.write().expect("topic store poisoned");
        topics
            .entry(name.to_owned())
            .or_insert_with(|| vec![Vec::new(); partitions.max(1) as usize]);
    }

    /// Appends one record and wakes every blocked poll. Returns the offset
    /// the record landed at.
    pub fn produce(
        &self,
        topic: &str,
        partition: i32,
        key: Option<Bytes>,
        payload: Bytes,
    ) -> Result<i64, BrokerError> {
        let offset = {
            let mut topics = self.topics.write().expect("topic store poisoned");
            let partitions = topics.get_mut(topic).ok_or_else(|| {
                BrokerError::UnknownTopicOrPartition(topic.to_owned())
            })?;
            let log = partitions.get_mut(partition as usize).ok_or_else(|| {
                BrokerError::UnknownTopicOrPartition(format!("{topic}/{partition}"))
            })?;
            log.push(StoredRecord {
                timestamp_ms: Utc::now().timestamp_millis(),
                key,
                payload,
            });
            log.len() as i64 - 1
        };
        self.data_available.notify_waiters();
        Ok(offset)
    }

    /// The offset the next produced record would get.
    pub fn end_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        let topics = self.topics.read().expect("topic store poisoned");
        topics
            .get(topic)?
            .get(partition as usize)
            .map(|log| log.len() as i64)
    }

    /// A client handle with its own connection state and read positions.
    pub fn client(self: &Arc<Self>) -> InMemoryBrokerClient {
        InMemoryBrokerClient {
            broker: self.clone(),
            connected: false,
            auto_offset_reset: OffsetReset::Latest,
            cursors: Vec::new(),
            next_cursor: 0,
        }
    }

    fn metadata_snapshot(&self) -> BrokerMetadata {
        let topics = self.topics.read().expect("topic store poisoned");
        let mut names: Vec<&String> = topics.keys().collect();
        names.sort();
        let mut metadata = BrokerMetadata::default();
        for name in names {
            metadata.add_topic(name, topics[name].len() as i32);
        }
        metadata
    }

    fn fetch(&self, topic: &str, partition: i32, offset: i64) -> Option<Record> {
        let topics = self.topics.read().expect("topic store poisoned");
        let stored = topics
            .get(topic)?
            .get(partition as usize)?
            .get(offset as usize)?;
        Some(Record {
            topic: topic.to_owned(),
            partition,
            offset,
            timestamp_ms: stored.timestamp_ms,
            key: stored.key.clone(),
            payload: stored.payload.clone(),
        })
    }
}

#[derive(Debug)]
struct Cursor {
    topic: String,
    partition: i32,
    next_offset: i64,
}

#[derive(Debug)]
pub struct InMemoryBrokerClient {
    broker: Arc<InMemoryBroker>,
    connected: bool,
    auto_offset_reset: OffsetReset,
    cursors: Vec<Cursor>,
    next_cursor: usize,
}

impl InMemoryBrokerClient {
    /// Next ready record across assigned partitions, round-robin. The
    /// position advances in the same synchronous step that takes the
    /// record, which is what keeps `poll` cancel-safe.
    fn try_fetch(&mut self) -> Option<Record> {
        for step in 0..self.cursors.len() {
            let index = (self.next_cursor + step) % self.cursors.len();
            let cursor = &self.cursors[index];
            if let Some(record) =
                self.broker
                    .fetch(&cursor.topic, cursor.partition, cursor.next_offset)
            {
                self.cursors[index].next_offset += 1;
                self.next_cursor = (index + 1) % self.cursors.len();
                return Some(record);
            }
        }
        None
    }
}

#[async_trait]
impl BrokerClient for InMemoryBrokerClient {
    async fn connect(&mut self, config: &EffectiveBrokerConfig) -> Result<(), BrokerError> {
        self.auto_offset_reset = config.auto_offset_reset;
        self.connected = true;
        Ok(())
    }

    async fn metadata(&self) -> Result<BrokerMetadata, BrokerError> {
        if !self.connected {
            return Err(BrokerError::Connection("client is not connected".to_owned()));
        }
        Ok(self.broker.metadata_snapshot())
    }

    async fn assign(&mut self, assignments: &[Assignment]) -> Result<(), BrokerError> {
        if !self.connected {
            return Err(BrokerError::Connection("client is not connected".to_owned()));
        }
        let mut cursors = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let end = self
                .broker
                .end_offset(&assignment.topic, assignment.partition)
                .ok_or_else(|| {
                    BrokerError::UnknownTopicOrPartition(format!(
                        "{}/{}",
                        assignment.topic, assignment.partition
                    ))
                })?;
            // -1 starts at the log end; offsets beyond the end fall back to
            // the configured reset policy.
            let next_offset = if assignment.offset == OFFSET_LATEST {
                end
            } else if assignment.offset > end {
                match self.auto_offset_reset {
                    OffsetReset::Latest => end,
                    OffsetReset::Earliest => 0,
                }
            } else {
                assignment.offset
            };
            cursors.push(Cursor {
                topic: assignment.topic.clone(),
                partition: assignment.partition,
                next_offset,
            });
        }
        self.cursors = cursors;
        self.next_cursor = 0;
        Ok(())
    }

    async fn poll(&mut self, max_wait: Duration) -> Result<Record, BrokerError> {
        if !self.connected {
            return Err(BrokerError::Connection("client is not connected".to_owned()));
        }
        if self.cursors.is_empty() {
            return Err(BrokerError::Client("poll without assignments".to_owned()));
        }
        if let Some(record) = self.try_fetch() {
            return Ok(record);
        }
        if max_wait.is_zero() {
            let cursor = &self.cursors[self.next_cursor];
            return Err(BrokerError::PartitionEof {
                topic: cursor.topic.clone(),
                partition: cursor.partition,
            });
        }
        let deadline = Instant::now() + max_wait;
        let broker = self.broker.clone();
        loop {
            let notified = broker.data_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // A produce may have landed between the fetch and the wait.
            if let Some(record) = self.try_fetch() {
                return Ok(record);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(BrokerError::PollTimeout(max_wait));
            }
            if let Some(record) = self.try_fetch() {
                return Ok(record);
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        self.connected = false;
        self.cursors.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(text: &str) -> Bytes {
        Bytes::copy_from_slice(text.as_bytes())
    }

    async fn connected_client(broker: &Arc<InMemoryBroker>) -> InMemoryBrokerClient {
        let mut client = broker.client();
        let config = EffectiveBrokerConfig::for_socket(&Default::default(), "test");
        client.connect(&config).await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_poll_returns_records_in_offset_order() {
        let broker = InMemoryBroker::new();
        broker.create_topic("clicks", 1);
        for i in 0..3 {
            broker
                .produce("clicks", 0, None, payload(&format!("{{\"i\": {i}}}")))
                .unwrap();
        }
        let mut client = connected_client(&broker).await;
        client
            .assign(&[Assignment::new("clicks", 0, 0)])
            .await
            .unwrap();
        for expected in 0..3 {
            let record = client.poll(Duration::from_millis(10)).await.unwrap();
            assert_eq!(record.offset, expected);
        }
        assert!(matches!(
            client.poll(Duration::from_millis(10)).await,
            Err(BrokerError::PollTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_latest_assignment_skips_existing_records() {
        let broker = InMemoryBroker::new();
        broker.create_topic("clicks", 1);
        broker.produce("clicks", 0, None, payload("{}")).unwrap();
        let mut client = connected_client(&broker).await;
        client
            .assign(&[Assignment::new("clicks", 0, OFFSET_LATEST)])
            .await
            .unwrap();
        assert!(client.poll(Duration::ZERO).await.is_err());
        let offset = broker.produce("clicks", 0, None, payload("{}")).unwrap();
        let record = client.poll(Duration::from_millis(100)).await.unwrap();
        assert_eq!(record.offset, offset);
    }

    #[tokio::test]
    async fn test_out_of_range_offset_honors_reset_policy() {
        let broker = InMemoryBroker::new();
        broker.create_topic("clicks", 1);
        broker.produce("clicks", 0, None, payload("{}")).unwrap();
        broker.produce("clicks", 0, None, payload("{}")).unwrap();

        let mut latest = connected_client(&broker).await;
        latest
            .assign(&[Assignment::new("clicks", 0, 99_999_999_999)])
            .await
            .unwrap();
        assert!(latest.poll(Duration::ZERO).await.is_err());

        let mut earliest = broker.client();
        let mut config = EffectiveBrokerConfig::for_socket(&Default::default(), "test");
        config.auto_offset_reset = OffsetReset::Earliest;
        earliest.connect(&config).await.unwrap();
        earliest
            .assign(&[Assignment::new("clicks", 0, 99_999_999_999)])
            .await
            .unwrap();
        let record = earliest.poll(Duration::from_millis(10)).await.unwrap();
        assert_eq!(record.offset, 0);
    }

    #[tokio::test]
    async fn test_unknown_partition_fails_assign() {
        let broker = InMemoryBroker::new();
        broker.create_topic("clicks", 1);
        let mut client = connected_client(&broker).await;
        assert!(matches!(
            client.assign(&[Assignment::new("clicks", 4, 0)]).await,
            Err(BrokerError::UnknownTopicOrPartition(_))
        ));
        assert!(matches!(
            client.assign(&[Assignment::new("nope", 0, 0)]).await,
            Err(BrokerError::UnknownTopicOrPartition(_))
        ));
    }

    #[tokio::test]
    async fn test_blocked_poll_wakes_on_produce() {
        let broker = InMemoryBroker::new();
        broker.create_topic("clicks", 1);
        let mut client = connected_client(&broker).await;
        client
            .assign(&[Assignment::new("clicks", 0, 0)])
            .await
            .unwrap();

        let producer = broker.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.produce("clicks", 0, None, payload("{}")).unwrap();
        });
        let record = client.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(record.offset, 0);
        handle.await.unwrap();
    }
}
