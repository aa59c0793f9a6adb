//! Pushdown parser for the agent configuration string.
//!
//! Grammar:
//!
//! ```text
//! config    := (entry ("," entry)*)?
//! entry     := keyvalue | profiler
//! keyvalue  := IDENT "=" VALUE
//! profiler  := IDENT ( "[" (keyvalue ("," keyvalue)*)? "]" )?
//! IDENT     := [A-Za-z0-9_.-]+
//! VALUE     := [A-Za-z0-9:_./-]+
//! ```
//!
//! Every state consumes a prefix of its input and hands the remainder back to
//! the loop. A profiler block parses its bracket contents as a separate
//! input; once that input is exhausted the params state returns the text that
//! followed the closing bracket, so the parent resumes exactly there.

use std::collections::HashMap;

use super::ConfigError;

/// Raw result of parsing: global pairs and per-profiler pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedConfig {
    pub global: HashMap<String, String>,
    pub profilers: HashMap<String, HashMap<String, String>>,
}

/// Where a key-value pair is stored.
#[derive(Debug, Clone, PartialEq)]
enum Target {
    Global,
    Profiler(String),
}

#[derive(Debug, Clone, PartialEq)]
enum State<'a> {
    /// Top level: decides which production starts at the current position.
    Transition,
    KeyValue(Target),
    ProfilerName,
    /// Inside `[...]`. `continuation` is what followed the closing bracket.
    ProfilerParams {
        profiler: String,
        continuation: &'a str,
        after_pair: bool,
    },
}

pub(crate) fn parse(input: &str) -> Result<ParsedConfig, ConfigError> {
    let mut parser = Parser {
        input,
        config: ParsedConfig::default(),
    };
    let mut states = vec![State::Transition];
    let mut rest = input;

    while states.len() > 1 || !rest.is_empty() {
        let Some(state) = states.pop() else {
            break;
        };
        rest = parser.step(state, rest, &mut states)?;
    }

    Ok(parser.config)
}

struct Parser<'a> {
    input: &'a str,
    config: ParsedConfig,
}

impl<'a> Parser<'a> {
    fn step(
        &mut self,
        state: State<'a>,
        s: &'a str,
        states: &mut Vec<State<'a>>,
    ) -> Result<&'a str, ConfigError> {
        match state {
            State::Transition => {
                states.push(State::Transition);
                if lex_key_value(s).is_some() {
                    states.push(State::KeyValue(Target::Global));
                    Ok(s)
                } else if lex_ident(s).is_some() {
                    states.push(State::ProfilerName);
                    Ok(s)
                } else if let Some(stripped) = s.strip_prefix(',') {
                    Ok(stripped)
                } else {
                    Err(self.error(s, "expected 'key=value' or a profiler name"))
                }
            }
            State::KeyValue(target) => {
                let (key, value, rest) = lex_key_value(s)
                    .ok_or_else(|| self.error(s, "expected 'key=value'"))?;
                let map = match target {
                    Target::Global => &mut self.config.global,
                    Target::Profiler(name) => self.config.profilers.entry(name).or_default(),
                };
                map.insert(key.to_string(), value.to_string());
                Ok(rest)
            }
            State::ProfilerName => {
                let (name, rest) =
                    lex_ident(s).ok_or_else(|| self.error(s, "expected a profiler name"))?;
                self.config
                    .profilers
                    .insert(name.to_string(), HashMap::new());

                let Some(block) = rest.strip_prefix('[') else {
                    return Ok(rest);
                };
                let close = block
                    .find(']')
                    .ok_or_else(|| self.error(rest, "missing closing ']'"))?;
                let (params, continuation) = (&block[..close], &block[close + 1..]);
                if params.is_empty() {
                    return Ok(continuation);
                }
                states.push(State::ProfilerParams {
                    profiler: name.to_string(),
                    continuation,
                    after_pair: false,
                });
                Ok(params)
            }
            State::ProfilerParams {
                profiler,
                continuation,
                after_pair,
            } => {
                if after_pair {
                    if s.is_empty() {
                        return Ok(continuation);
                    }
                    let next = s
                        .strip_prefix(',')
                        .ok_or_else(|| self.error(s, "expected ',' or ']'"))?;
                    states.push(State::ProfilerParams {
                        profiler,
                        continuation,
                        after_pair: false,
                    });
                    return Ok(next);
                }
                if lex_key_value(s).is_none() {
                    return Err(self.error(s, "expected 'key=value' in profiler parameters"));
                }
                states.push(State::ProfilerParams {
                    profiler: profiler.clone(),
                    continuation,
                    after_pair: true,
                });
                states.push(State::KeyValue(Target::Profiler(profiler)));
                Ok(s)
            }
        }
    }

    fn error(&self, at: &str, message: &str) -> ConfigError {
        // Every slice handed to a state is a sub-slice of the original input.
        let position = (at.as_ptr() as usize).saturating_sub(self.input.as_ptr() as usize);
        ConfigError::Syntax {
            position,
            message: format!("{} (near '{}')", message, at),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn is_value_char(c: char) -> bool {
    is_ident_char(c) || matches!(c, ':' | '/')
}

/// Splits the longest non-empty prefix matching `pred`.
fn take_while(s: &str, pred: fn(char) -> bool) -> Option<(&str, &str)> {
    let end = s.find(|c: char| !pred(c)).unwrap_or(s.len());
    (end > 0).then(|| s.split_at(end))
}

fn lex_ident(s: &str) -> Option<(&str, &str)> {
    take_while(s, is_ident_char)
}

/// Returns `(key, value, rest)` when `s` starts with `IDENT=VALUE`.
fn lex_key_value(s: &str) -> Option<(&str, &str, &str)> {
    let (key, rest) = lex_ident(s)?;
    let rest = rest.strip_prefix('=')?;
    let (value, rest) = take_while(rest, is_value_char)?;
    Some((key, value, rest))
}
