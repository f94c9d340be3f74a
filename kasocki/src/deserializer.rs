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

use serde_json::{Value, json};
use std::fmt;

use crate::broker::Record;
use crate::error::KasockiError;

/// The reserved key under which origin metadata is attached to every
/// message produced by the default deserializer.
pub const ORIGIN_KEY: &str = "_origin";

/// Turns a raw broker record into the JSON message delivered to clients.
/// A user-supplied implementation replaces [`JsonDeserializer`] wholesale;
/// whatever it returns as an error is wrapped as `Deserialization`.
pub trait Deserializer: Send + Sync + fmt::Debug {
    fn deserialize(&self, record: &Record) -> Result<Value, KasockiError>;
}

/// Default pipeline: payload bytes → UTF-8 → JSON object, augmented with
/// `{topic, partition, offset, timestamp, key}` under [`ORIGIN_KEY`].
#[derive(Debug, Default)]
pub struct JsonDeserializer;

impl Deserializer for JsonDeserializer {
    fn deserialize(&self, record: &Record) -> Result<Value, KasockiError> {
        let text = std::str::from_utf8(&record.payload)
            .map_err(|error| deserialization_error(record, &format!("payload is not UTF-8: {error}")))?;
        let value: Value = serde_json::from_str(text)
            .map_err(|error| deserialization_error(record, &format!("payload is not JSON: {error}")))?;
        let Value::Object(mut message) = value else {
            return Err(deserialization_error(
                record,
                "payload is not a JSON object",
            ));
        };
        message.insert(
            ORIGIN_KEY.to_owned(),
            json!({
                "topic": record.topic,
                "partition": record.partition,
                "offset": record.offset,
                "timestamp": record.timestamp_ms,
                "key": record.key_utf8(),
            }),
        );
        Ok(Value::Object(message))
    }
}

/// Wraps a failure from any deserializer, preserving the record's origin
/// so the skip can be logged with enough context.
pub fn deserialization_error(record: &Record, reason: &str) -> KasockiError {
    KasockiError::Deserialization {
        topic: record.topic.clone(),
        partition: record.partition,
        offset: record.offset,
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn record(payload: &str) -> Record {
        Record {
            topic: "clicks".to_owned(),
            partition: 2,
            offset: 7,
            timestamp_ms: 1_700_000_000_000,
            key: Some(Bytes::from_static(b"user-1")),
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        }
    }

    #[test]
    fn test_default_deserializer_attaches_origin() {
        let message = JsonDeserializer
            .deserialize(&record(r#"{"name": "blue door"}"#))
            .unwrap();
        assert_eq!(message["name"], "blue door");
        let origin = &message[ORIGIN_KEY];
        assert_eq!(origin["topic"], "clicks");
        assert_eq!(origin["partition"], 2);
        assert_eq!(origin["offset"], 7);
        assert_eq!(origin["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(origin["key"], "user-1");
    }

    #[test]
    fn test_invalid_payloads_fail_with_record_context() {
        for payload in ["not json", r#"["an", "array"]"#] {
            match JsonDeserializer.deserialize(&record(payload)) {
                Err(KasockiError::Deserialization {
                    topic,
                    partition,
                    offset,
                    ..
                }) => {
                    assert_eq!(topic, "clicks");
                    assert_eq!(partition, 2);
                    assert_eq!(offset, 7);
                }
                other => panic!("expected Deserialization error, got {other:?}"),
            }
        }
    }
}
