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

use serde_json::{Map, Value, json};
use std::sync::Mutex;

use super::path;
use super::regex_literal::{self, RegexLiteral};
use super::{Matcher, MatcherFactory};
use crate::error::KasockiError;

/// The default filter dialect: dotted paths mapped to scalar equality,
/// regex literals, or membership/subset lists.
#[derive(Debug, Default)]
pub struct DottedPathMatcherFactory;

impl MatcherFactory for DottedPathMatcherFactory {
    fn compile(&self, spec: &Value) -> Result<Box<dyn Matcher>, KasockiError> {
        Ok(Box::new(DottedPathMatcher::compile(spec)?))
    }
}

#[derive(Debug)]
enum CriterionItem {
    Scalar(Value),
    Regex(RegexLiteral),
}

#[derive(Debug)]
enum Criterion {
    Scalar(Value),
    Regex(RegexLiteral),
    OneOf(Vec<CriterionItem>),
}

#[derive(Debug)]
struct FilterEntry {
    path: String,
    segments: Vec<String>,
    criterion: Criterion,
}

/// A compiled filter map. The predicate is total: per-message anomalies are
/// appended to an internal buffer and count as a non-match.
#[derive(Debug)]
pub struct DottedPathMatcher {
    spec: Value,
    entries: Vec<FilterEntry>,
    errors: Mutex<Vec<String>>,
}

impl DottedPathMatcher {
    pub fn compile(spec: &Value) -> Result<Self, KasockiError> {
        let invalid = |reason: String| KasockiError::InvalidFilter {
            reason,
            filters: spec.clone(),
        };

        let Value::Object(map) = spec else {
            return Err(invalid(
                "filters must be an object mapping dotted paths to criteria".to_owned(),
            ));
        };

        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in map {
            let segments = path::parse_path(key).map_err(&invalid)?;
            let criterion = parse_criterion(key, value).map_err(&invalid)?;
            entries.push(FilterEntry {
                path: key.clone(),
                segments,
                criterion,
            });
        }
        Ok(Self {
            spec: spec.clone(),
            entries,
            errors: Mutex::new(Vec::new()),
        })
    }

    fn record_error(&self, message: String) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(message);
        }
    }
}

impl Matcher for DottedPathMatcher {
    /// True iff every filter entry is satisfied by the value at its path.
    fn matches(&self, message: &Value) -> bool {
        self.entries.iter().all(|entry| {
            match path::resolve(message, &entry.segments) {
                Some(value) => satisfies(self, &entry.path, &entry.criterion, value),
                None => false,
            }
        })
    }

    fn spec(&self) -> &Value {
        &self.spec
    }

    fn compiled_view(&self) -> Value {
        let mut view = Map::new();
        for entry in &self.entries {
            view.insert(entry.path.clone(), render_criterion(&entry.criterion));
        }
        Value::Object(view)
    }

    fn drain_errors(&self) -> Vec<String> {
        match self.errors.lock() {
            Ok(mut errors) => std::mem::take(&mut *errors),
            Err(_) => Vec::new(),
        }
    }
}

fn parse_criterion(path: &str, value: &Value) -> Result<Criterion, String> {
    match value {
        Value::Object(_) => Err(format!(
            "criterion at '{path}' must not be a nested object"
        )),
        Value::Array(items) => {
            let mut parsed = Vec::with_capacity(items.len());
            for item in items {
                parsed.push(parse_criterion_item(path, item)?);
            }
            Ok(Criterion::OneOf(parsed))
        }
        Value::String(text) if regex_literal::is_regex_literal(text) => {
            Ok(Criterion::Regex(regex_literal::parse(text)?))
        }
        scalar => Ok(Criterion::Scalar(scalar.clone())),
    }
}

fn parse_criterion_item(path: &str, value: &Value) -> Result<CriterionItem, String> {
    match value {
        Value::Object(_) | Value::Array(_) => Err(format!(
            "list criterion at '{path}' may only contain scalars and regex literals"
        )),
        Value::String(text) if regex_literal::is_regex_literal(text) => {
            Ok(CriterionItem::Regex(regex_literal::parse(text)?))
        }
        scalar => Ok(CriterionItem::Scalar(scalar.clone())),
    }
}

fn render_criterion(criterion: &Criterion) -> Value {
    match criterion {
        Criterion::Scalar(value) => value.clone(),
        Criterion::Regex(literal) => json!(literal.to_string()),
        Criterion::OneOf(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    CriterionItem::Scalar(value) => value.clone(),
                    CriterionItem::Regex(literal) => json!(literal.to_string()),
                })
                .collect(),
        ),
    }
}

fn satisfies(
    matcher: &DottedPathMatcher,
    path: &str,
    criterion: &Criterion,
    value: &Value,
) -> bool {
    match (criterion, value) {
        // Every criterion element must be present in the value sequence
        // (non-strict subset).
        (Criterion::OneOf(items), Value::Array(elements)) => items.iter().all(|item| {
            elements
                .iter()
                .any(|element| item_satisfied(matcher, path, item, element))
        }),
        // Membership: the scalar equals (or matches) at least one element.
        (Criterion::OneOf(items), scalar) => items
            .iter()
            .any(|item| item_satisfied(matcher, path, item, scalar)),
        // A sequence value satisfies a single criterion iff some element does.
        (Criterion::Scalar(expected), Value::Array(elements)) => elements
            .iter()
            .any(|element| scalar_equals(expected, element)),
        (Criterion::Regex(literal), Value::Array(elements)) => elements
            .iter()
            .any(|element| regex_satisfied(matcher, path, literal, element)),
        (Criterion::Scalar(expected), actual) => scalar_equals(expected, actual),
        (Criterion::Regex(literal), actual) => regex_satisfied(matcher, path, literal, actual),
    }
}

fn item_satisfied(
    matcher: &DottedPathMatcher,
    path: &str,
    item: &CriterionItem,
    value: &Value,
) -> bool {
    match item {
        CriterionItem::Scalar(expected) => scalar_equals(expected, value),
        CriterionItem::Regex(literal) => regex_satisfied(matcher, path, literal, value),
    }
}

/// Strict equality: type and value. `serde_json::Value` equality keeps
/// integer and float representations distinct, which is what we want.
fn scalar_equals(expected: &Value, actual: &Value) -> bool {
    expected == actual
}

fn regex_satisfied(
    matcher: &DottedPathMatcher,
    path: &str,
    literal: &RegexLiteral,
    value: &Value,
) -> bool {
    match coerce_to_string(value) {
        Some(text) => literal.is_match(&text),
        None => {
            matcher.record_error(format!(
                "cannot coerce value at '{path}' to a string for regex {literal}"
            ));
            false
        }
    }
}

fn coerce_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null => Some("null".to_owned()),
        Value::Object(_) | Value::Array(_) => None,
    }
}
