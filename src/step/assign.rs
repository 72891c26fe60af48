// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Assignment keywords (`def`, `text`, `json`, …) plus `match`, `assert`,
//! `print` and `configure`.

use tracing::info;

use super::{rhs_or_docstring, split_assign};
use crate::{
    error::StepError,
    matching::{self, MatchOp},
    resolve::Resolved,
    resource,
    runtime::ScenarioRuntime,
    value::{Map, Value},
    xml,
};

fn check_name(name: &str) -> Result<&str, StepError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if ok {
        Ok(name)
    } else {
        Err(StepError::Parse(format!("invalid variable name: {name}")))
    }
}

/// `def name = expr`.
pub(crate) fn def(
    rt: &mut ScenarioRuntime,
    name: &str,
    rhs: &str,
) -> Result<(), StepError> {
    let name = check_name(name)?;
    let value = rt.resolve_value(rhs)?;
    rt.vars.put(name, value);
    Ok(())
}

/// `text name = …`: verbatim, no evaluation.
pub(crate) fn text(
    rt: &mut ScenarioRuntime,
    name: &str,
    rhs: &str,
) -> Result<(), StepError> {
    let name = check_name(name)?;
    rt.vars.put(name, Value::String(rhs.to_owned()));
    Ok(())
}

/// Coercion applied by a typed assignment keyword.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Coerce {
    Json,
    Xml,
    XmlString,
    Str,
    Bytes,
    Csv,
    Yaml,
    Copy,
}

/// `json` / `xml` / `xmlstring` / `string` / `bytes` / `csv` / `yaml` /
/// `copy` assignments.
pub(crate) fn typed(
    rt: &mut ScenarioRuntime,
    rest: &str,
    docstring: Option<&str>,
    coerce: Coerce,
) -> Result<(), StepError> {
    let (name, rhs) = split_assign(rest).ok_or_else(|| {
        StepError::Parse(format!("expected an assignment: {rest}"))
    })?;
    let name = check_name(name)?.to_owned();
    let rhs = rhs_or_docstring(rhs, docstring);
    let resolved = rt.resolve_value(rhs)?;

    let value = match coerce {
        Coerce::Json => {
            let mut v = to_json_value(resolved)?;
            rt.expand(&mut v);
            v
        }
        Coerce::Xml => {
            let mut node = to_xml_node(resolved)?;
            rt.expand_xml(&mut node);
            Value::Xml(node)
        }
        Coerce::XmlString => {
            let node = to_xml_node(resolved)?;
            Value::String(node.serialize())
        }
        Coerce::Str => {
            let mut v = Value::String(resolved.display_string());
            rt.expand(&mut v);
            v
        }
        Coerce::Bytes => match resolved {
            Value::Bytes(b) => Value::Bytes(b),
            other => Value::Bytes(other.display_string().into_bytes()),
        },
        Coerce::Csv => {
            let text = as_text(&resolved, "csv")?;
            resource::parse_csv(&text)
                .map_err(|e| StepError::Parse(format!("bad csv: {e}")))?
        }
        Coerce::Yaml => {
            let text = as_text(&resolved, "yaml")?;
            let json: serde_json::Value = serde_yaml::from_str(&text)
                .map_err(|e| StepError::Parse(format!("bad yaml: {e}")))?;
            Value::from_json(json)
        }
        Coerce::Copy => resolved.json_round_trip(),
    };
    rt.vars.put(name, value);
    Ok(())
}

fn as_text(value: &Value, what: &str) -> Result<String, StepError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(StepError::Parse(format!(
            "{what} expects a string, got {}",
            other.type_of(),
        ))),
    }
}

fn to_json_value(value: Value) -> Result<Value, StepError> {
    match value {
        Value::Xml(node) => Ok(xml::to_map(&node)),
        Value::String(s) => Value::parse_json(&s)
            .map_err(|e| StepError::Parse(format!("bad json: {e}"))),
        v @ (Value::Map(_) | Value::List(_)) => Ok(v),
        other => Ok(other.json_round_trip()),
    }
}

fn to_xml_node(value: Value) -> Result<xml::XmlNode, StepError> {
    match value {
        Value::Xml(node) => Ok(node),
        Value::String(s) => {
            xml::parse(&s).map_err(|e| StepError::Parse(e.to_string()))
        }
        Value::Map(m) => Ok(xml::from_map(&m)),
        other => Err(StepError::Parse(format!(
            "cannot coerce {} to xml",
            other.type_of(),
        ))),
    }
}

/// `table name` with a data table: each row a map, each cell an expression;
/// null cells drop unless parenthesized.
pub(crate) fn table(
    rt: &mut ScenarioRuntime,
    rest: &str,
    table: Option<&gherkin::Table>,
) -> Result<(), StepError> {
    let name = check_name(rest.trim())?.to_owned();
    let table = table.ok_or_else(|| {
        StepError::Parse("table keyword needs a data table".into())
    })?;
    let Some((header, rows)) = table.rows.split_first() else {
        rt.vars.put(name, Value::List(Vec::new()));
        return Ok(());
    };

    let mut out = Vec::new();
    for row in rows {
        let mut entry = Map::new();
        for (column, cell) in header.iter().zip(row.iter()) {
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }
            let (expr, keep_null) = cell
                .strip_prefix('(')
                .and_then(|c| c.strip_suffix(')'))
                .map_or((cell, false), |inner| (inner, true));
            let value = rt.resolve_value(expr)?;
            if value.is_null() && !keep_null {
                continue;
            }
            entry.insert(column.clone(), value);
        }
        out.push(Value::Map(entry));
    }
    rt.vars.put(name, Value::List(out));
    Ok(())
}

/// `replace name.token = expr` and `replace name` with a `token|value`
/// table. Alphanumeric tokens match wrapped in `<…>`.
pub(crate) fn replace(
    rt: &mut ScenarioRuntime,
    rest: &str,
    table: Option<&gherkin::Table>,
) -> Result<(), StepError> {
    if let Some((lhs, rhs)) = split_assign(rest) {
        let (name, token) = lhs.split_once('.').ok_or_else(|| {
            StepError::Parse(format!("replace expects name.token: {lhs}"))
        })?;
        let name = check_name(name.trim())?.to_owned();
        let replacement = rt.resolve_value(rhs)?.display_string();
        let mut text = current_text(rt, &name)?;
        text = apply_replace(&text, token.trim(), &replacement);
        rt.vars.put(name, Value::String(text));
        return Ok(());
    }

    let name = check_name(rest.trim())?.to_owned();
    let table = table.ok_or_else(|| {
        StepError::Parse("replace needs an assignment or a table".into())
    })?;
    let mut text = current_text(rt, &name)?;
    if let Some((_, rows)) = table.rows.split_first() {
        for row in rows {
            let [token, expr, ..] = row.as_slice() else {
                continue;
            };
            let replacement = rt.resolve_value(expr)?.display_string();
            text = apply_replace(&text, token.trim(), &replacement);
        }
    }
    rt.vars.put(name, Value::String(text));
    Ok(())
}

fn current_text(rt: &ScenarioRuntime, name: &str) -> Result<String, StepError> {
    rt.vars
        .get(name)
        .map(Value::display_string)
        .ok_or_else(|| StepError::Eval(format!("undefined variable: {name}")))
}

fn apply_replace(text: &str, token: &str, replacement: &str) -> String {
    let needle = if token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        format!("<{token}>")
    } else {
        token.to_owned()
    };
    text.replace(&needle, replacement)
}

/// `match [each] actual (op) expected`.
pub(crate) fn match_step(
    rt: &mut ScenarioRuntime,
    rest: &str,
    docstring: Option<&str>,
) -> Result<(), StepError> {
    let (each, lhs, op, rhs) = split_match(rest)?;
    let rhs = rhs_or_docstring(rhs, docstring);

    let actual = rt.resolve(lhs)?;
    let expected = rt.resolve_value(rhs)?;
    let (actual_value, present) = match actual {
        Resolved::Value(v) => (v, true),
        Resolved::NotPresent => (Value::Null, false),
    };
    let result = matching::execute(
        &rt.engine,
        &mut rt.vars,
        op,
        each,
        &actual_value,
        present,
        &expected,
        rt.config.match_each_empty_allowed,
    );
    if result.pass {
        Ok(())
    } else {
        Err(StepError::Assertion(result.message))
    }
}

/// Splits match text into `(each, actual, op, expected)`, honoring quotes
/// and bracket nesting.
pub(crate) fn split_match(
    text: &str,
) -> Result<(bool, &str, MatchOp, &str), StepError> {
    let (each, text) = text
        .strip_prefix("each ")
        .map_or((false, text), |rest| (true, rest.trim_start()));

    let bytes = text.as_bytes();
    let mut depth = 0_i32;
    let mut in_str: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(quote) = in_str {
            if b == quote && bytes.get(i.wrapping_sub(1)) != Some(&b'\\') {
                in_str = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' | b'\'' => in_str = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            _ if depth == 0 && text.is_char_boundary(i) => {
                for (spelling, op) in MatchOp::SPELLINGS {
                    if !text[i..].starts_with(spelling) {
                        continue;
                    }
                    let is_word =
                        spelling.contains(|c: char| c.is_ascii_alphabetic());
                    if is_word {
                        let before_ok = i > 0
                            && bytes[i - 1].is_ascii_whitespace();
                        let after = i + spelling.len();
                        let after_ok = after >= bytes.len()
                            || bytes[after].is_ascii_whitespace();
                        if !before_ok || !after_ok {
                            continue;
                        }
                    }
                    let lhs = text[..i].trim();
                    if lhs.is_empty() {
                        continue;
                    }
                    let rhs = text[i + spelling.len()..].trim();
                    return Ok((each, lhs, *op, rhs));
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(StepError::Parse(format!(
        "no match operator found in: {text}"
    )))
}

/// `assert expr`: the expression must evaluate to boolean true.
pub(crate) fn assert_step(
    rt: &mut ScenarioRuntime,
    rest: &str,
) -> Result<(), StepError> {
    match rt.eval(rest)? {
        Value::Bool(true) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "assert failed: {rest} (evaluated to {})",
            other.display_string(),
        ))),
    }
}

/// `print expr[, expr…]`: comma list wrapped into a list literal, joined
/// with spaces.
pub(crate) fn print_step(
    rt: &mut ScenarioRuntime,
    rest: &str,
) -> Result<(), StepError> {
    let values = rt.eval(&format!("[{rest}]"))?;
    let line = match values {
        Value::List(items) => items
            .iter()
            .map(Value::display_string)
            .collect::<Vec<_>>()
            .join(" "),
        other => other.display_string(),
    };
    info!(target: "print", "{line}");
    rt.log_line(&format!("[print] {line}"));
    Ok(())
}

/// `configure key = expr`.
pub(crate) fn configure(
    rt: &mut ScenarioRuntime,
    rest: &str,
) -> Result<(), StepError> {
    let (key, rhs) = split_assign(rest).ok_or_else(|| {
        StepError::Parse(format!("configure needs an assignment: {rest}"))
    })?;
    let value = rt.resolve_value(rhs)?;
    rt.config.set(key, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_match_finds_operators_outside_nesting() {
        let (each, lhs, op, rhs) =
            split_match("foo == { a: 1 }").unwrap();
        assert!(!each);
        assert_eq!(lhs, "foo");
        assert_eq!(op, MatchOp::Equals);
        assert_eq!(rhs, "{ a: 1 }");

        let (each, lhs, op, rhs) =
            split_match("each data[*].id contains only deep [1, 2]").unwrap();
        assert!(each);
        assert_eq!(lhs, "data[*].id");
        assert_eq!(op, MatchOp::ContainsOnlyDeep);
        assert_eq!(rhs, "[1, 2]");
    }

    #[test]
    fn split_match_skips_operators_inside_strings() {
        let (_, lhs, op, rhs) =
            split_match(r#"name == "a == b""#).unwrap();
        assert_eq!(lhs, "name");
        assert_eq!(op, MatchOp::Equals);
        assert_eq!(rhs, r#""a == b""#);
    }

    #[test]
    fn split_match_not_contains() {
        let (_, lhs, op, rhs) = split_match("list !contains 4").unwrap();
        assert_eq!(lhs, "list");
        assert_eq!(op, MatchOp::NotContains);
        assert_eq!(rhs, "4");
    }

    #[test]
    fn replace_wraps_alphanumeric_tokens() {
        assert_eq!(apply_replace("hi <name>!", "name", "cat"), "hi cat!");
        assert_eq!(apply_replace("a ${x} b", "${x}", "1"), "a 1 b");
    }
}
