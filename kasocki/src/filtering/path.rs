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

use serde_json::Value;

/// Splits a dotted path like `user.last_name` into segments. Empty paths
/// and empty segments (leading/trailing/double dots) are invalid.
pub(crate) fn parse_path(key: &str) -> Result<Vec<String>, String> {
    if key.is_empty() {
        return Err("filter keys must be non-empty dotted paths".to_owned());
    }
    let segments: Vec<String> = key.split('.').map(str::to_owned).collect();
    if segments.iter().any(String::is_empty) {
        return Err(format!("filter key '{key}' contains an empty path segment"));
    }
    Ok(segments)
}

/// Descends `root` through the segments. Any missing or non-object
/// intermediate yields `None`.
pub(crate) fn resolve<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
