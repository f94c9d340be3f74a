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

use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;

/// Counter sink bumped once per handled socket event (and once per
/// delivered message). The default is a no-op.
pub trait MetricsSink: Send + Sync + fmt::Debug {
    fn increment(&self, counter: &str);
}

#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _counter: &str) {}
}

/// In-process counters, one per name.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    counters: DashMap<String, u64>,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: &str) -> u64 {
        self.counters.get(counter).map(|c| *c).unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

impl MetricsSink for CounterMetrics {
    fn increment(&self, counter: &str) {
        *self.counters.entry(counter.to_owned()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_per_name() {
        let metrics = CounterMetrics::new();
        metrics.increment("subscribe");
        metrics.increment("consume");
        metrics.increment("consume");
        assert_eq!(metrics.get("subscribe"), 1);
        assert_eq!(metrics.get("consume"), 2);
        assert_eq!(metrics.get("stop"), 0);
        assert_eq!(metrics.snapshot().len(), 2);
    }
}
