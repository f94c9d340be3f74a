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

//! Server-side message filtering.
//!
//! A filter spec is a JSON object mapping dotted paths to criteria; the
//! factory compiles it once, at install time, into a total predicate over
//! decoded messages.

mod matcher;
mod path;
mod regex_literal;

pub use matcher::{DottedPathMatcher, DottedPathMatcherFactory};
pub use regex_literal::RegexLiteral;

use serde_json::Value;
use std::fmt;

use crate::error::KasockiError;

/// A compiled, total predicate over decoded messages.
pub trait Matcher: Send + Sync + fmt::Debug {
    /// Never panics; anomalies are buffered and count as a non-match.
    fn matches(&self, message: &Value) -> bool;
    /// The filter spec this matcher was compiled from.
    fn spec(&self) -> &Value;
    /// The ack view of the compiled filters, regexes rendered back as
    /// `/pattern/flags` strings.
    fn compiled_view(&self) -> Value;
    /// Takes the buffered per-call anomalies, clearing the buffer.
    fn drain_errors(&self) -> Vec<String>;
}

/// Compiles filter specs into matchers. Sessions take this as a pluggable
/// seam so alternate filter dialects can be swapped in.
pub trait MatcherFactory: Send + Sync + fmt::Debug {
    fn compile(&self, spec: &Value) -> Result<Box<dyn Matcher>, KasockiError>;
}
