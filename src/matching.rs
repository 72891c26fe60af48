// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Deep structural matcher.
//!
//! Implements the `match` comparators (`==`, `!=`, the `contains` family)
//! plus fuzzy markers inside expected values (`#string`, `#notpresent`,
//! `#regex …`, `#? expr`, …). Actual strings are never coerced: matching a
//! string against JSON-looking expected text compares text.

use lazy_regex::regex_is_match;

use crate::{
    engine::{ScriptEngine, Vars},
    value::Value,
};

/// Comparator of a `match` step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOp {
    /// `==`
    Equals,

    /// `!=`
    NotEquals,

    /// `contains`
    Contains,

    /// `!contains`
    NotContains,

    /// `contains only`
    ContainsOnly,

    /// `contains any`
    ContainsAny,

    /// `contains deep`
    ContainsDeep,

    /// `contains only deep`
    ContainsOnlyDeep,

    /// `contains any deep`
    ContainsAnyDeep,
}

impl MatchOp {
    /// Comparator spellings, longest first so that `contains only deep`
    /// never parses as `contains`.
    pub const SPELLINGS: &'static [(&'static str, Self)] = &[
        ("contains only deep", Self::ContainsOnlyDeep),
        ("contains any deep", Self::ContainsAnyDeep),
        ("contains deep", Self::ContainsDeep),
        ("contains only", Self::ContainsOnly),
        ("contains any", Self::ContainsAny),
        ("!contains", Self::NotContains),
        ("contains", Self::Contains),
        ("==", Self::Equals),
        ("!=", Self::NotEquals),
    ];

    /// Human-readable name used in failure messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::Contains => "contains",
            Self::NotContains => "!contains",
            Self::ContainsOnly => "contains only",
            Self::ContainsAny => "contains any",
            Self::ContainsDeep => "contains deep",
            Self::ContainsOnlyDeep => "contains only deep",
            Self::ContainsAnyDeep => "contains any deep",
        }
    }
}

/// Outcome of a match.
#[derive(Clone, Debug)]
pub struct MatchResult {
    /// Did the match pass.
    pub pass: bool,

    /// Failure description, empty on success.
    pub message: String,
}

impl MatchResult {
    fn passed() -> Self {
        Self { pass: true, message: String::new() }
    }

    fn failed(message: String) -> Self {
        Self { pass: false, message }
    }
}

struct Ctx<'a> {
    engine: &'a ScriptEngine,
    vars: &'a mut Vars,
}

/// Executes a match.
///
/// `present` is `false` when the actual expression resolved to the
/// "not present" sentinel (a missing JSON key or XPath miss), which only
/// `#notpresent`-style markers may accept.
pub fn execute(
    engine: &ScriptEngine,
    vars: &mut Vars,
    op: MatchOp,
    each: bool,
    actual: &Value,
    present: bool,
    expected: &Value,
    each_empty_allowed: bool,
) -> MatchResult {
    let mut ctx = Ctx { engine, vars };
    if each {
        let Value::List(items) = actual else {
            return MatchResult::failed(format!(
                "match each requires a list actual, got {}",
                actual.type_of(),
            ));
        };
        if items.is_empty() && !each_empty_allowed {
            return MatchResult::failed(
                "match each failed: actual list is empty".into(),
            );
        }
        for (i, item) in items.iter().enumerate() {
            if let Err(e) =
                apply(&mut ctx, op, &format!("$[{i}]"), item, true, expected)
            {
                return MatchResult::failed(format!(
                    "match each failed: {e}"
                ));
            }
        }
        return MatchResult::passed();
    }

    match apply(&mut ctx, op, "$", actual, present, expected) {
        Ok(()) => MatchResult::passed(),
        Err(e) => MatchResult::failed(format!("match failed: {e}")),
    }
}

fn failure(path: &str, expected: &Value, actual: &Value, reason: &str) -> String {
    format!(
        "{path} | {reason} | expected: {} actual: {}",
        expected.display_string(),
        actual.display_string(),
    )
}

fn apply(
    ctx: &mut Ctx<'_>,
    op: MatchOp,
    path: &str,
    actual: &Value,
    present: bool,
    expected: &Value,
) -> Result<(), String> {
    match op {
        MatchOp::Equals => equals(ctx, path, actual, present, expected),
        MatchOp::NotEquals => {
            match equals(ctx, path, actual, present, expected) {
                Ok(()) => Err(failure(
                    path,
                    expected,
                    actual,
                    "values are equal but should not be",
                )),
                Err(_) => Ok(()),
            }
        }
        MatchOp::Contains => contains(ctx, path, actual, expected, false),
        MatchOp::ContainsDeep => contains(ctx, path, actual, expected, true),
        MatchOp::NotContains => {
            match contains(ctx, path, actual, expected, false) {
                Ok(()) => Err(failure(
                    path,
                    expected,
                    actual,
                    "actual contains the expected value",
                )),
                Err(_) => Ok(()),
            }
        }
        MatchOp::ContainsOnly => {
            contains_only(ctx, path, actual, expected, false)
        }
        MatchOp::ContainsOnlyDeep => {
            contains_only(ctx, path, actual, expected, true)
        }
        MatchOp::ContainsAny => {
            contains_any(ctx, path, actual, expected, false)
        }
        MatchOp::ContainsAnyDeep => {
            contains_any(ctx, path, actual, expected, true)
        }
    }
}

/// Recognizes a fuzzy marker in an expected string. Returns `None` when the
/// string is not a marker.
fn check_marker(
    ctx: &mut Ctx<'_>,
    path: &str,
    marker: &str,
    actual: &Value,
    present: bool,
) -> Option<Result<(), String>> {
    if !marker.starts_with('#') {
        return None;
    }
    let (body, optional) = marker
        .strip_prefix("##")
        .map_or((&marker[1..], false), |rest| (rest, true));

    // Optional markers accept null and absent outright.
    if optional && (!present || actual.is_null()) {
        return Some(Ok(()));
    }

    let fail = |reason: &str| {
        Err(failure(
            path,
            &Value::String(marker.to_owned()),
            actual,
            reason,
        ))
    };

    let outcome = match body {
        "ignore" => Ok(()),
        "null" => {
            if actual.is_null() {
                Ok(())
            } else {
                fail("expected null")
            }
        }
        "notnull" => {
            if present && !actual.is_null() {
                Ok(())
            } else {
                fail("expected not-null")
            }
        }
        "present" => {
            if present {
                Ok(())
            } else {
                fail("expected present")
            }
        }
        "notpresent" => {
            if present {
                fail("expected not-present")
            } else {
                Ok(())
            }
        }
        "array" => {
            if matches!(actual, Value::List(_)) {
                Ok(())
            } else {
                fail("expected an array")
            }
        }
        "object" => {
            if matches!(actual, Value::Map(_)) {
                Ok(())
            } else {
                fail("expected an object")
            }
        }
        "string" => {
            if matches!(actual, Value::String(_)) {
                Ok(())
            } else {
                fail("expected a string")
            }
        }
        "number" => {
            if matches!(actual, Value::Int(_) | Value::Float(_)) {
                Ok(())
            } else {
                fail("expected a number")
            }
        }
        "boolean" => {
            if matches!(actual, Value::Bool(_)) {
                Ok(())
            } else {
                fail("expected a boolean")
            }
        }
        "uuid" => {
            let ok = actual.as_str().is_some_and(|s| {
                regex_is_match!(
                    r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
                    s
                )
            });
            if ok { Ok(()) } else { fail("expected a uuid") }
        }
        _ => {
            if let Some(re) = body.strip_prefix("regex") {
                let re = re.trim();
                let matched = regex::Regex::new(re).ok().is_some_and(|rx| {
                    actual
                        .as_str()
                        .is_some_and(|s| rx.is_match(s))
                });
                return Some(if matched {
                    Ok(())
                } else {
                    fail("regex mismatch")
                });
            }
            if let Some(len) = body.strip_prefix('[') {
                let len = len.trim_end_matches(']').trim();
                let Value::List(items) = actual else {
                    return Some(fail("expected an array"));
                };
                if len.is_empty() {
                    return Some(Ok(()));
                }
                return Some(match len.parse::<usize>() {
                    Ok(n) if items.len() == n => Ok(()),
                    Ok(n) => fail(&format!(
                        "expected array length {n}, got {}",
                        items.len(),
                    )),
                    Err(_) => fail("unsupported array-length marker"),
                });
            }
            if let Some(expr) = body.strip_prefix('?') {
                ctx.vars.put_hidden("_", actual.clone());
                let ok = ctx
                    .engine
                    .eval_truthy(expr.trim(), ctx.vars)
                    .unwrap_or(false);
                ctx.vars.remove("_");
                return Some(if ok {
                    Ok(())
                } else {
                    fail("predicate returned falsy")
                });
            }
            // Not a recognized marker: compare as a plain string.
            return None;
        }
    };
    Some(outcome)
}

fn equals(
    ctx: &mut Ctx<'_>,
    path: &str,
    actual: &Value,
    present: bool,
    expected: &Value,
) -> Result<(), String> {
    if let Value::String(s) = expected {
        if let Some(res) = check_marker(ctx, path, s, actual, present) {
            return res;
        }
    }
    if !present {
        return Err(failure(
            path,
            expected,
            &Value::String("#notpresent".into()),
            "actual path is not present",
        ));
    }
    match (actual, expected) {
        (Value::Map(a), Value::Map(e)) => {
            for (k, ev) in e {
                let child = format!("{path}.{k}");
                match a.get(k) {
                    Some(av) => equals(ctx, &child, av, true, ev)?,
                    None => {
                        equals(ctx, &child, &Value::Null, false, ev)?;
                    }
                }
            }
            for k in a.keys() {
                if !e.contains_key(k) {
                    return Err(failure(
                        path,
                        expected,
                        actual,
                        &format!("actual has unexpected key: {k}"),
                    ));
                }
            }
            Ok(())
        }
        (Value::List(a), Value::List(e)) => {
            if a.len() != e.len() {
                return Err(failure(
                    path,
                    expected,
                    actual,
                    &format!(
                        "list lengths differ: expected {} actual {}",
                        e.len(),
                        a.len(),
                    ),
                ));
            }
            for (i, (av, ev)) in a.iter().zip(e).enumerate() {
                equals(ctx, &format!("{path}[{i}]"), av, true, ev)?;
            }
            Ok(())
        }
        (Value::Xml(a), Value::Xml(e)) => {
            if a == e {
                Ok(())
            } else {
                Err(failure(path, expected, actual, "xml trees differ"))
            }
        }
        _ => {
            if actual == expected {
                Ok(())
            } else {
                Err(failure(path, expected, actual, "values differ"))
            }
        }
    }
}

fn contains(
    ctx: &mut Ctx<'_>,
    path: &str,
    actual: &Value,
    expected: &Value,
    deep: bool,
) -> Result<(), String> {
    match (actual, expected) {
        (Value::String(a), Value::String(e)) => {
            if a.contains(e.as_str()) {
                Ok(())
            } else {
                Err(failure(path, expected, actual, "substring not found"))
            }
        }
        (Value::Map(a), Value::Map(e)) => {
            for (k, ev) in e {
                let child = format!("{path}.{k}");
                let Some(av) = a.get(k) else {
                    // A marker may accept the absence; anything else is a
                    // missing key.
                    if let Value::String(s) = ev {
                        if let Some(Ok(())) =
                            check_marker(ctx, &child, s, &Value::Null, false)
                        {
                            continue;
                        }
                    }
                    return Err(failure(
                        &child,
                        ev,
                        &Value::Null,
                        "key missing",
                    ));
                };
                if deep
                    && matches!(
                        (av, ev),
                        (Value::Map(_), Value::Map(_))
                            | (Value::List(_), Value::List(_))
                    )
                {
                    contains(ctx, &child, av, ev, true)?;
                } else {
                    equals(ctx, &child, av, true, ev)?;
                }
            }
            Ok(())
        }
        (Value::List(a), _) => {
            let wanted: Vec<&Value> = match expected {
                Value::List(e) => e.iter().collect(),
                single => vec![single],
            };
            'outer: for (i, ev) in wanted.into_iter().enumerate() {
                for av in a {
                    let probe = if deep
                        && matches!(
                            (av, ev),
                            (Value::Map(_), Value::Map(_))
                                | (Value::List(_), Value::List(_))
                        ) {
                        contains(ctx, path, av, ev, true)
                    } else {
                        equals(ctx, path, av, true, ev)
                    };
                    if probe.is_ok() {
                        continue 'outer;
                    }
                }
                return Err(failure(
                    &format!("{path}[{i}]"),
                    ev,
                    actual,
                    "expected element not found in list",
                ));
            }
            Ok(())
        }
        _ => Err(failure(
            path,
            expected,
            actual,
            "contains is not applicable to these types",
        )),
    }
}

fn contains_only(
    ctx: &mut Ctx<'_>,
    path: &str,
    actual: &Value,
    expected: &Value,
    deep: bool,
) -> Result<(), String> {
    match (actual, expected) {
        (Value::List(a), Value::List(e)) => {
            if a.len() != e.len() {
                return Err(failure(
                    path,
                    expected,
                    actual,
                    &format!(
                        "contains only: lengths differ, expected {} actual {}",
                        e.len(),
                        a.len(),
                    ),
                ));
            }
            contains(ctx, path, actual, expected, deep)
        }
        (Value::Map(a), Value::Map(e)) => {
            if a.len() != e.len() {
                return Err(failure(
                    path,
                    expected,
                    actual,
                    "contains only: key sets differ",
                ));
            }
            contains(ctx, path, actual, expected, deep)
        }
        _ => contains(ctx, path, actual, expected, deep),
    }
}

fn contains_any(
    ctx: &mut Ctx<'_>,
    path: &str,
    actual: &Value,
    expected: &Value,
    deep: bool,
) -> Result<(), String> {
    let candidates: Vec<Value> = match expected {
        Value::List(e) => e.clone(),
        Value::Map(e) => e
            .iter()
            .map(|(k, v)| {
                let mut m = crate::value::Map::new();
                m.insert(k.clone(), v.clone());
                Value::Map(m)
            })
            .collect(),
        single => vec![single.clone()],
    };
    for candidate in &candidates {
        if contains(ctx, path, actual, candidate, deep).is_ok() {
            return Ok(());
        }
    }
    Err(failure(
        path,
        expected,
        actual,
        "none of the expected values are contained",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(op: MatchOp, actual: &Value, expected: &Value) -> MatchResult {
        let engine = ScriptEngine::new();
        let mut vars = Vars::new();
        execute(&engine, &mut vars, op, false, actual, true, expected, false)
    }

    #[test]
    fn equals_failure_message_carries_expected_and_actual() {
        let r = run(MatchOp::Equals, &Value::Int(1), &Value::Int(2));
        assert!(!r.pass);
        assert!(r.message.contains("expected: 2 actual: 1"), "{}", r.message);
    }

    #[test]
    fn equals_is_strict_about_extra_keys() {
        let a = Value::parse_json(r#"{"a":1,"b":2}"#).unwrap();
        let e = Value::parse_json(r#"{"a":1}"#).unwrap();
        assert!(!run(MatchOp::Equals, &a, &e).pass);
        assert!(run(MatchOp::Contains, &a, &e).pass);
    }

    #[test]
    fn nested_failure_reports_path() {
        let a = Value::parse_json(r#"{"a":{"b":[1,2]}}"#).unwrap();
        let e = Value::parse_json(r#"{"a":{"b":[1,3]}}"#).unwrap();
        let r = run(MatchOp::Equals, &a, &e);
        assert!(r.message.contains("$.a.b[1]"), "{}", r.message);
    }

    #[test]
    fn contains_family_on_lists() {
        let a = Value::parse_json("[1,2,3]").unwrap();
        assert!(run(MatchOp::Contains, &a, &Value::Int(2)).pass);
        assert!(
            run(
                MatchOp::ContainsOnly,
                &a,
                &Value::parse_json("[3,1,2]").unwrap(),
            )
            .pass
        );
        assert!(
            run(
                MatchOp::ContainsAny,
                &a,
                &Value::parse_json("[9,3]").unwrap(),
            )
            .pass
        );
        assert!(!run(MatchOp::NotContains, &a, &Value::Int(1)).pass);
        assert!(run(MatchOp::NotContains, &a, &Value::Int(9)).pass);
    }

    #[test]
    fn contains_deep_descends_into_nested_maps() {
        let a = Value::parse_json(
            r#"{"cat":{"name":"Billie","kittens":[{"id":1},{"id":2}]}}"#,
        )
        .unwrap();
        let e = Value::parse_json(r#"{"cat":{"kittens":[{"id":2}]}}"#).unwrap();
        assert!(run(MatchOp::ContainsDeep, &a, &e).pass);
        assert!(!run(MatchOp::Contains, &a, &e).pass);
    }

    #[test]
    fn type_markers() {
        let a = Value::parse_json(r#"{"name":"x","count":3}"#).unwrap();
        let e = Value::parse_json(
            r##"{"name":"#string","count":"#number"}"##,
        )
        .unwrap();
        assert!(run(MatchOp::Equals, &a, &e).pass);
    }

    #[test]
    fn optional_marker_accepts_missing_key() {
        let a = Value::parse_json(r#"{"name":"x"}"#).unwrap();
        let e = Value::parse_json(
            r###"{"name":"#string","nick":"##string"}"###,
        )
        .unwrap();
        assert!(run(MatchOp::Equals, &a, &e).pass);
    }

    #[test]
    fn notpresent_sentinel() {
        let engine = ScriptEngine::new();
        let mut vars = Vars::new();
        let r = execute(
            &engine,
            &mut vars,
            MatchOp::Equals,
            false,
            &Value::Null,
            false,
            &Value::String("#notpresent".into()),
            false,
        );
        assert!(r.pass);
    }

    #[test]
    fn regex_and_predicate_markers() {
        let a = Value::parse_json(r#"{"id":"a1b2"}"#).unwrap();
        let e = Value::parse_json(r##"{"id":"#regex [a-z0-9]{4}"}"##).unwrap();
        assert!(run(MatchOp::Equals, &a, &e).pass);

        let a = Value::parse_json(r#"{"n":5}"#).unwrap();
        let e = Value::parse_json(r##"{"n":"#? _ > 3"}"##).unwrap();
        assert!(run(MatchOp::Equals, &a, &e).pass);
        let e = Value::parse_json(r##"{"n":"#? _ > 9"}"##).unwrap();
        assert!(!run(MatchOp::Equals, &a, &e).pass);
    }

    #[test]
    fn each_applies_to_every_element() {
        let engine = ScriptEngine::new();
        let mut vars = Vars::new();
        let a = Value::parse_json(r#"[{"id":1},{"id":2}]"#).unwrap();
        let e = Value::parse_json(r##"{"id":"#number"}"##).unwrap();
        let r = execute(
            &engine, &mut vars,
            MatchOp::Equals,
            true,
            &a,
            true,
            &e,
            false,
        );
        assert!(r.pass);

        let empty = Value::List(vec![]);
        let r = execute(
            &engine, &mut vars,
            MatchOp::Equals,
            true,
            &empty,
            true,
            &e,
            false,
        );
        assert!(!r.pass);
        let r = execute(
            &engine, &mut vars,
            MatchOp::Equals,
            true,
            &empty,
            true,
            &e,
            true,
        );
        assert!(r.pass);
    }

    #[test]
    fn strings_are_not_coerced_for_contains() {
        let a = Value::String(r#"{"a":1}"#.into());
        assert!(run(MatchOp::Contains, &a, &Value::String("\"a\":1".into())).pass);
    }

    #[test]
    fn array_length_marker() {
        let a = Value::parse_json("[1,2,3]").unwrap();
        assert!(run(MatchOp::Equals, &a, &Value::String("#[3]".into())).pass);
        assert!(!run(MatchOp::Equals, &a, &Value::String("#[2]".into())).pass);
        assert!(run(MatchOp::Equals, &a, &Value::String("#[]".into())).pass);
    }
}
