// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-scenario configuration, mutated by the `configure` keyword.

use std::time::Duration;

use tracing::warn;

use crate::{
    error::StepError,
    value::{Callable, Map, Value},
};

/// Active configuration of one scenario (inherited by called features).
#[derive(Clone, Debug)]
pub struct Config {
    /// Mock mode: answer CORS preflights and stamp allow-origin headers.
    pub cors: bool,

    /// Mock mode: headers merged into every synthesized response.
    pub response_headers: Option<Value>,

    /// Mock mode: hook invoked after a matched scenario completes.
    pub after_scenario: Option<Callable>,

    /// Headers merged into every outgoing request: a map, or a callable
    /// producing one per request.
    pub headers: Option<Value>,

    /// Cookies merged into every outgoing request.
    pub cookies: Option<Value>,

    /// Maximum `retry until` invocations.
    pub retry_count: u32,

    /// Pause between `retry until` invocations, in milliseconds.
    pub retry_interval_ms: u64,

    /// Allows `match each` to pass on an empty list.
    pub match_each_empty_allowed: bool,

    /// Unrecognized keys, forwarded to the HTTP client.
    pub pass_through: Map,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cors: false,
            response_headers: None,
            after_scenario: None,
            headers: None,
            cookies: None,
            retry_count: 3,
            retry_interval_ms: 3000,
            match_each_empty_allowed: false,
            pass_through: Map::new(),
        }
    }
}

impl Config {
    /// Applies one `configure key = value` mutation.
    ///
    /// # Errors
    ///
    /// If a numeric knob receives a non-numeric value.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), StepError> {
        match key {
            "cors" => self.cors = value.is_truthy(),
            "responseHeaders" => match &value {
                Value::Map(_) | Value::Callable(_) => {
                    self.response_headers = Some(value);
                }
                other => warn!(
                    "ignoring configure responseHeaders: expected map, got {}",
                    other.type_of(),
                ),
            },
            "afterScenario" => match value {
                Value::Callable(c) => self.after_scenario = Some(c),
                Value::Null => self.after_scenario = None,
                other => warn!(
                    "ignoring configure afterScenario: expected function, got {}",
                    other.type_of(),
                ),
            },
            "headers" => match &value {
                Value::Map(_) | Value::Callable(_) => {
                    self.headers = Some(value);
                }
                Value::Null => self.headers = None,
                other => warn!(
                    "ignoring configure headers: expected map or function, got {}",
                    other.type_of(),
                ),
            },
            "cookies" => match &value {
                Value::Map(_) => self.cookies = Some(value),
                Value::Null => self.cookies = None,
                other => warn!(
                    "ignoring configure cookies: expected map, got {}",
                    other.type_of(),
                ),
            },
            "retryCount" => self.retry_count = int_knob(key, &value)? as u32,
            "retryInterval" => {
                self.retry_interval_ms = int_knob(key, &value)? as u64;
            }
            "matchEachEmptyAllowed" => {
                self.match_each_empty_allowed = value.is_truthy();
            }
            other => {
                self.pass_through.insert(other.to_owned(), value);
            }
        }
        Ok(())
    }

    /// Per-request timeout from forwarded knobs (`readTimeout`, in
    /// milliseconds), if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        match self.pass_through.get("readTimeout") {
            Some(Value::Int(ms)) if *ms > 0 => {
                Some(Duration::from_millis(*ms as u64))
            }
            _ => None,
        }
    }
}

fn int_knob(key: &str, value: &Value) -> Result<i64, StepError> {
    match value {
        Value::Int(i) if *i >= 0 => Ok(*i),
        other => Err(StepError::Parse(format!(
            "configure {key} expects a non-negative integer, got {}",
            other.type_of(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_keys_mutate_fields() {
        let mut c = Config::default();
        c.set("retryCount", Value::Int(7)).unwrap();
        c.set("retryInterval", Value::Int(10)).unwrap();
        c.set("cors", Value::Bool(true)).unwrap();
        c.set("matchEachEmptyAllowed", Value::Bool(true)).unwrap();
        assert_eq!(c.retry_count, 7);
        assert_eq!(c.retry_interval_ms, 10);
        assert!(c.cors);
        assert!(c.match_each_empty_allowed);
    }

    #[test]
    fn non_map_response_headers_are_ignored() {
        let mut c = Config::default();
        c.set("responseHeaders", Value::Int(42)).unwrap();
        assert!(c.response_headers.is_none());
    }

    #[test]
    fn unknown_keys_are_forwarded() {
        let mut c = Config::default();
        c.set("readTimeout", Value::Int(2500)).unwrap();
        assert_eq!(c.timeout(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn bad_numeric_knob_is_an_error() {
        let mut c = Config::default();
        assert!(c.set("retryCount", Value::String("x".into())).is_err());
    }
}
