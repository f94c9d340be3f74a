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

use regex::{Regex, RegexBuilder};
use std::fmt;

/// A filter criterion that traveled as a `"/pattern/flags"` string (JSON
/// has no regex type) and was compiled at filter-install time.
#[derive(Debug, Clone)]
pub struct RegexLiteral {
    pattern: String,
    flags: String,
    regex: Regex,
}

impl RegexLiteral {
    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }
}

impl fmt::Display for RegexLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.pattern, self.flags)
    }
}

/// A string is treated as a regex literal iff it has the `/pattern/flags`
/// shape: a leading slash and at least one more slash to close the pattern.
/// Anything else (including a lone "/path" string) is a plain scalar.
pub(crate) fn is_regex_literal(value: &str) -> bool {
    value.len() >= 2 && value.starts_with('/') && value[1..].contains('/')
}

/// Parses and compiles a regex literal. Fails on unknown flags, patterns
/// the safety check rejects, and patterns `regex` cannot compile.
pub(crate) fn parse(literal: &str) -> Result<RegexLiteral, String> {
    let closing = literal
        .rfind('/')
        .filter(|index| *index > 0)
        .ok_or_else(|| format!("'{literal}' is not a /pattern/flags regex literal"))?;
    let pattern = &literal[1..closing];
    let flags = &literal[closing + 1..];

    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            // Patterns are Unicode by default.
            'u' => &mut builder,
            other => return Err(format!("unsupported regex flag '{other}' in '{literal}'")),
        };
    }

    reject_unbounded_nesting(pattern)?;
    let regex = builder
        .build()
        .map_err(|error| format!("cannot compile regex '{literal}': {error}"))?;
    Ok(RegexLiteral {
        pattern: pattern.to_owned(),
        flags: flags.to_owned(),
        regex,
    })
}

/// Rejects patterns that repeat a group whose body already contains an
/// unbounded quantifier, e.g. `(a+)+`, `(a*)*` or `(a+){10}`. Such shapes
/// are the classic catastrophic-backtracking inputs and are refused at
/// install time regardless of the engine behind them.
fn reject_unbounded_nesting(pattern: &str) -> Result<(), String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut open_groups: Vec<bool> = Vec::new();
    // Whether an unbounded quantifier was seen at the current nesting level.
    let mut unbounded_here = false;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                i = consume_quantifier(&chars, i + 2, &mut unbounded_here);
            }
            '[' => {
                i = skip_class(&chars, i + 1);
                i = consume_quantifier(&chars, i, &mut unbounded_here);
            }
            '(' => {
                open_groups.push(unbounded_here);
                unbounded_here = false;
                i += 1;
            }
            ')' => {
                let group_unbounded = unbounded_here;
                unbounded_here = open_groups.pop().unwrap_or(false);
                i += 1;
                if let Some(quantifier) = read_quantifier(&chars, i) {
                    if group_unbounded && quantifier.repeats {
                        return Err(format!(
                            "regex '{pattern}' repeats a group containing an unbounded \
                             quantifier and is prone to catastrophic backtracking"
                        ));
                    }
                    if quantifier.unbounded {
                        unbounded_here = true;
                    }
                    i += quantifier.length;
                }
                if group_unbounded {
                    unbounded_here = true;
                }
            }
            _ => {
                i = consume_quantifier(&chars, i + 1, &mut unbounded_here);
            }
        }
    }
    Ok(())
}

/// Advances past the quantifier following an atom, if any, recording
/// whether it was unbounded.
fn consume_quantifier(chars: &[char], at: usize, unbounded_here: &mut bool) -> usize {
    match read_quantifier(chars, at) {
        Some(quantifier) => {
            if quantifier.unbounded {
                *unbounded_here = true;
            }
            at + quantifier.length
        }
        None => at,
    }
}

/// Advances past the body of a character class, honoring escapes. Returns
/// the index just after the closing bracket.
fn skip_class(chars: &[char], mut at: usize) -> usize {
    // A leading ']' (possibly after '^') is a literal member.
    if chars.get(at) == Some(&'^') {
        at += 1;
    }
    if chars.get(at) == Some(&']') {
        at += 1;
    }
    while at < chars.len() {
        match chars[at] {
            '\\' => at += 2,
            ']' => return at + 1,
            _ => at += 1,
        }
    }
    at
}

struct Quantifier {
    /// Allows more than one repetition.
    repeats: bool,
    /// Has no upper bound.
    unbounded: bool,
    length: usize,
}

fn read_quantifier(chars: &[char], at: usize) -> Option<Quantifier> {
    let mut quantifier = match chars.get(at)? {
        '*' | '+' => Quantifier {
            repeats: true,
            unbounded: true,
            length: 1,
        },
        '?' => Quantifier {
            repeats: false,
            unbounded: false,
            length: 1,
        },
        '{' => read_counted_quantifier(chars, at)?,
        _ => return None,
    };
    // Swallow a lazy modifier ("+?", "{2,}?"); it changes nothing above.
    if chars.get(at + quantifier.length) == Some(&'?') {
        quantifier.length += 1;
    }
    Some(quantifier)
}

/// Parses `{m}`, `{m,}` or `{m,n}` starting at the opening brace. Anything
/// else brace-shaped is a literal and not a quantifier.
fn read_counted_quantifier(chars: &[char], at: usize) -> Option<Quantifier> {
    let closing = chars[at..].iter().position(|c| *c == '}')? + at;
    let body: String = chars[at + 1..closing].iter().collect();
    let max = match body.split_once(',') {
        None => Some(body.parse::<u32>().ok()?),
        Some((min, "")) => {
            min.parse::<u32>().ok()?;
            None
        }
        Some((min, max)) => {
            min.parse::<u32>().ok()?;
            Some(max.parse::<u32>().ok()?)
        }
    };
    Some(Quantifier {
        repeats: max.is_none_or(|max| max > 1),
        unbounded: max.is_none(),
        length: closing - at + 1,
    })
}
