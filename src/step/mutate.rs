// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Structure mutation keywords: `set` and `remove`.

use super::split_assign;
use crate::{
    error::StepError,
    json,
    runtime::ScenarioRuntime,
    value::{Map, Value},
    xml,
};

/// Splits `name[.path | [idx]… | /xpath]` into the variable name and the
/// remaining path.
fn split_target(text: &str) -> Result<(&str, &str), StepError> {
    let end = text
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(text.len());
    let name = &text[..end];
    if name.is_empty() {
        return Err(StepError::Parse(format!(
            "expected a variable name in: {text}"
        )));
    }
    Ok((name, text[end..].trim_start()))
}

/// Strips the parentheses of `(expr)`, which force null assignment.
fn paren_rhs(rhs: &str) -> (&str, bool) {
    rhs.strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .map_or((rhs, false), |inner| (inner, true))
}

/// `set name[.path] = expr` and `set name [/xpath] <table>`.
pub(crate) fn set_step(
    rt: &mut ScenarioRuntime,
    rest: &str,
    table: Option<&gherkin::Table>,
) -> Result<(), StepError> {
    if let Some(table) = table {
        return set_table(rt, rest, table);
    }
    let (lhs, rhs) = split_assign(rest).ok_or_else(|| {
        StepError::Parse(format!("set needs an assignment or a table: {rest}"))
    })?;
    let (name, path) = split_target(lhs)?;
    let (expr, keep_null) = paren_rhs(rhs);
    let value = rt.resolve_value(expr)?;
    if value.is_null() && !keep_null {
        return Ok(());
    }
    set_at(rt, name, path, value)
}

fn set_at(
    rt: &mut ScenarioRuntime,
    name: &str,
    path: &str,
    value: Value,
) -> Result<(), StepError> {
    if path.starts_with('/') {
        let Some(Value::Xml(node)) = rt.vars.get(name) else {
            return Err(StepError::Eval(format!(
                "{name} is not an xml variable"
            )));
        };
        let mut node = node.clone();
        xml::set(&mut node, path, &value)
            .map_err(|e| StepError::Eval(e.to_string()))?;
        rt.vars.put(name, Value::Xml(node));
        return Ok(());
    }

    let mut target = match rt.vars.get(name) {
        Some(v) => v.clone(),
        None if path.trim_start().starts_with('[') => Value::List(Vec::new()),
        None => Value::Map(Map::new()),
    };
    if path.is_empty() {
        target = value;
    } else {
        json::set_path(&mut target, path, value)?;
    }
    rt.vars.put(name, target);
    Ok(())
}

/// Table-driven `set`: rows address sub-paths, a `value` column sets one
/// location, numeric columns build arrays by index.
fn set_table(
    rt: &mut ScenarioRuntime,
    rest: &str,
    table: &gherkin::Table,
) -> Result<(), StepError> {
    let (name, base) = split_target(rest.trim())?;
    let name = name.to_owned();
    let base = base.to_owned();
    let Some((header, rows)) = table.rows.split_first() else {
        return Ok(());
    };

    for row in rows {
        let Some(sub_path) = row.first() else { continue };
        let sub_path = sub_path.trim();
        for (column, cell) in header.iter().zip(row.iter()).skip(1) {
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }
            let (expr, keep_null) = paren_rhs(cell);
            let value = rt.resolve_value(expr)?;
            if value.is_null() && !keep_null {
                continue;
            }
            let index: Option<usize> = column.trim().parse().ok();
            if base.starts_with('/') {
                // XPath base; numeric columns index the base element.
                let path = match index {
                    Some(i) => format!("{base}[{}]/{sub_path}", i + 1),
                    None => format!("{base}/{sub_path}"),
                };
                set_at(rt, &name, &path, value)?;
            } else {
                let path = match index {
                    Some(i) => format!("[{i}].{sub_path}"),
                    None => sub_path.to_owned(),
                };
                let path = if base.is_empty() {
                    path
                } else {
                    format!("{base}.{path}")
                };
                set_at(rt, &name, &path, value)?;
            }
        }
    }
    Ok(())
}

/// `remove name[.key | $jsonpath | /xpath]`.
pub(crate) fn remove_step(
    rt: &mut ScenarioRuntime,
    rest: &str,
) -> Result<(), StepError> {
    let (name, path) = split_target(rest.trim())?;

    if path.is_empty() {
        rt.vars.remove(name);
        return Ok(());
    }
    if path.starts_with('/') {
        let Some(Value::Xml(node)) = rt.vars.get(name) else {
            return Err(StepError::Eval(format!(
                "{name} is not an xml variable"
            )));
        };
        let mut node = node.clone();
        xml::remove(&mut node, path)
            .map_err(|e| StepError::Eval(e.to_string()))?;
        rt.vars.put(name, Value::Xml(node));
        return Ok(());
    }

    let Some(value) = rt.vars.get(name) else {
        return Err(StepError::Eval(format!("undefined variable: {name}")));
    };
    let mut value = value.clone();
    json::remove_path(&mut value, path.trim_start_matches('$'))?;
    rt.vars.put(name, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        resource::ResourceLoader,
        runtime::{FeatureState, SuiteCtx},
    };

    fn runtime() -> ScenarioRuntime {
        ScenarioRuntime::new(
            Arc::new(SuiteCtx::minimal()),
            ResourceLoader::rooted("."),
            Arc::new(FeatureState::new()),
            0,
        )
    }

    #[test]
    fn set_creates_and_mutates_deep_paths() {
        let mut rt = runtime();
        set_step(&mut rt, "foo.a.b[0] = 42", None).unwrap();
        assert_eq!(
            rt.vars.get("foo").unwrap().to_json_string(),
            r#"{"a":{"b":[42]}}"#,
        );

        set_step(&mut rt, "foo.a.c = \"x\"", None).unwrap();
        assert_eq!(
            rt.vars.get("foo").unwrap().to_json_string(),
            r#"{"a":{"b":[42],"c":"x"}}"#,
        );
    }

    #[test]
    fn set_skips_null_unless_parenthesized() {
        let mut rt = runtime();
        set_step(&mut rt, "foo.a = 1", None).unwrap();
        set_step(&mut rt, "foo.b = null", None).unwrap();
        assert_eq!(
            rt.vars.get("foo").unwrap().to_json_string(),
            r#"{"a":1}"#,
        );
        set_step(&mut rt, "foo.b = (null)", None).unwrap();
        assert_eq!(
            rt.vars.get("foo").unwrap().to_json_string(),
            r#"{"a":1,"b":null}"#,
        );
    }

    #[test]
    fn set_xpath_mutates_xml_variable() {
        let mut rt = runtime();
        rt.vars.put(
            "doc",
            Value::Xml(xml::parse("<r><a>1</a></r>").unwrap()),
        );
        set_step(&mut rt, "doc /r/a = 2", None).unwrap();
        let Some(Value::Xml(node)) = rt.vars.get("doc") else {
            panic!("doc must stay xml");
        };
        assert_eq!(node.serialize(), "<r><a>2</a></r>");
    }

    #[test]
    fn remove_variable_key_and_xpath() {
        let mut rt = runtime();
        set_step(&mut rt, "foo.a = 1", None).unwrap();
        set_step(&mut rt, "foo.b = 2", None).unwrap();
        remove_step(&mut rt, "foo.a").unwrap();
        assert_eq!(
            rt.vars.get("foo").unwrap().to_json_string(),
            r#"{"b":2}"#,
        );
        remove_step(&mut rt, "foo").unwrap();
        assert!(rt.vars.get("foo").is_none());
    }
}
