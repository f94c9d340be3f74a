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
use serde_json::Value;

use crate::broker::BrokerMetadata;
use crate::error::KasockiError;

/// Sentinel offset meaning "start at the log end".
pub const OFFSET_LATEST: i64 = -1;

/// Where one session starts reading in one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl Assignment {
    pub fn new(topic: &str, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.to_owned(),
            partition,
            offset,
        }
    }
}

/// A parsed subscribe argument: either bare topic names (expanded against
/// broker metadata) or explicit assignment tuples (passed through).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeRequest {
    Topics(Vec<String>),
    Assignments(Vec<Assignment>),
}

impl SubscribeRequest {
    pub fn topics(&self) -> Vec<&str> {
        match self {
            SubscribeRequest::Topics(topics) => topics.iter().map(String::as_str).collect(),
            SubscribeRequest::Assignments(assignments) => {
                let mut topics: Vec<&str> =
                    assignments.iter().map(|a| a.topic.as_str()).collect();
                topics.dedup();
                topics
            }
        }
    }
}

/// Parses the raw subscribe argument. A bare string is promoted to a
/// one-element topic list; mixed name/tuple sequences and empty sequences
/// are rejected.
pub fn parse_subscribe_request(argument: &Value) -> Result<SubscribeRequest, KasockiError> {
    let invalid = |reason: &str| KasockiError::InvalidAssignment {
        reason: reason.to_owned(),
        assignments: argument.clone(),
    };

    let items: Vec<Value> = match argument {
        Value::String(topic) => vec![Value::String(topic.clone())],
        Value::Array(items) => items.clone(),
        _ => {
            return Err(invalid(
                "expected a topic name, a list of topic names, or a list of assignments",
            ));
        }
    };
    if items.is_empty() {
        return Err(invalid("assignment list must not be empty"));
    }

    let names = items.iter().filter(|item| item.is_string()).count();
    let tuples = items.iter().filter(|item| item.is_object()).count();
    if names + tuples != items.len() || (names > 0 && tuples > 0) {
        return Err(invalid(
            "assignments must be either all topic names or all {topic, partition, offset} tuples",
        ));
    }

    if names == items.len() {
        let mut topics = Vec::with_capacity(items.len());
        for item in &items {
            let topic = item.as_str().unwrap_or_default();
            if topic.is_empty() {
                return Err(invalid("topic names must be non-empty strings"));
            }
            topics.push(topic.to_owned());
        }
        return Ok(SubscribeRequest::Topics(topics));
    }

    let mut assignments = Vec::with_capacity(items.len());
    for item in &items {
        assignments.push(parse_tuple(item, &invalid)?);
    }
    Ok(SubscribeRequest::Assignments(assignments))
}

fn parse_tuple(
    item: &Value,
    invalid: &impl Fn(&str) -> KasockiError,
) -> Result<Assignment, KasockiError> {
    let topic = item
        .get("topic")
        .and_then(Value::as_str)
        .filter(|topic| !topic.is_empty())
        .ok_or_else(|| invalid("assignment tuple requires a non-empty 'topic'"))?;
    let partition = item
        .get("partition")
        .and_then(Value::as_i64)
        .filter(|partition| (0..=i64::from(i32::MAX)).contains(partition))
        .ok_or_else(|| invalid("'partition' must be a non-negative integer"))?;
    let offset = item
        .get("offset")
        .and_then(Value::as_i64)
        .filter(|offset| *offset >= OFFSET_LATEST)
        .ok_or_else(|| invalid("'offset' must be an integer >= -1 (-1 means latest)"))?;
    Ok(Assignment::new(topic, partition as i32, offset))
}

/// Gates the request against `available_topics` (first offending topic
/// wins, nothing is partially applied), then expands topic-name form into
/// one latest-offset assignment per partition found in broker metadata.
/// Tuple form passes through unchanged.
pub fn normalize(
    request: SubscribeRequest,
    metadata: &BrokerMetadata,
    available_topics: &[String],
) -> Result<Vec<Assignment>, KasockiError> {
    for topic in request.topics() {
        if !available_topics.iter().any(|available| available == topic) {
            return Err(KasockiError::TopicNotAvailable {
                topic: topic.to_owned(),
                available_topics: available_topics.to_vec(),
            });
        }
    }

    match request {
        SubscribeRequest::Assignments(assignments) => Ok(assignments),
        SubscribeRequest::Topics(topics) => {
            let mut assignments = Vec::new();
            for topic in topics {
                let partitions = metadata.partitions_of(&topic).ok_or_else(|| {
                    KasockiError::TopicNotAvailable {
                        topic: topic.clone(),
                        available_topics: available_topics.to_vec(),
                    }
                })?;
                for partition in partitions {
                    assignments.push(Assignment::new(&topic, *partition, OFFSET_LATEST));
                }
            }
            Ok(assignments)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> BrokerMetadata {
        let mut metadata = BrokerMetadata::default();
        metadata.add_topic("clicks", 2);
        metadata.add_topic("views", 1);
        metadata
    }

    fn available() -> Vec<String> {
        vec!["clicks".to_owned(), "views".to_owned()]
    }

    #[test]
    fn test_bare_string_promotes_to_topic_list() {
        let request = parse_subscribe_request(&json!("clicks")).unwrap();
        assert_eq!(request, SubscribeRequest::Topics(vec!["clicks".to_owned()]));
    }

    #[test]
    fn test_topic_form_expands_every_partition_at_latest() {
        let request = parse_subscribe_request(&json!(["clicks", "views"])).unwrap();
        let normalized = normalize(request, &metadata(), &available()).unwrap();
        assert_eq!(
            normalized,
            vec![
                Assignment::new("clicks", 0, OFFSET_LATEST),
                Assignment::new("clicks", 1, OFFSET_LATEST),
                Assignment::new("views", 0, OFFSET_LATEST),
            ]
        );
    }

    #[test]
    fn test_tuple_form_passes_through_unchanged() {
        let request = parse_subscribe_request(&json!([
            {"topic": "clicks", "partition": 1, "offset": 42},
            {"topic": "views", "partition": 0, "offset": -1},
        ]))
        .unwrap();
        let normalized = normalize(request, &metadata(), &available()).unwrap();
        assert_eq!(
            normalized,
            vec![
                Assignment::new("clicks", 1, 42),
                Assignment::new("views", 0, OFFSET_LATEST),
            ]
        );
    }

    #[test]
    fn test_mixed_forms_are_rejected() {
        let result =
            parse_subscribe_request(&json!(["clicks", {"topic": "views", "partition": 0, "offset": 0}]));
        assert!(matches!(
            result,
            Err(KasockiError::InvalidAssignment { .. })
        ));
    }

    #[test]
    fn test_empty_sequence_is_rejected() {
        assert!(matches!(
            parse_subscribe_request(&json!([])),
            Err(KasockiError::InvalidAssignment { .. })
        ));
    }

    #[test]
    fn test_negative_partition_and_bad_offset_are_rejected() {
        let result =
            parse_subscribe_request(&json!([{"topic": "clicks", "partition": -1, "offset": 0}]));
        assert!(matches!(
            result,
            Err(KasockiError::InvalidAssignment { .. })
        ));
        let result =
            parse_subscribe_request(&json!([{"topic": "clicks", "partition": 0, "offset": -2}]));
        assert!(matches!(
            result,
            Err(KasockiError::InvalidAssignment { .. })
        ));
    }

    #[test]
    fn test_unavailable_topic_cites_first_offender() {
        let request =
            parse_subscribe_request(&json!(["clicks", "secrets", "alsosecret"])).unwrap();
        match normalize(request, &metadata(), &available()) {
            Err(KasockiError::TopicNotAvailable {
                topic,
                available_topics,
            }) => {
                assert_eq!(topic, "secrets");
                assert_eq!(available_topics, available());
            }
            other => panic!("expected TopicNotAvailable, got {other:?}"),
        }
    }
}
