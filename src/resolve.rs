// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Expression resolution.
//!
//! Classifies a textual expression and dispatches to the XML literal
//! parser, the data-literal parser, `get`-expressions, JSON-path, XPath, or
//! the script engine, in that fixed order. Literal branches apply embedded
//! expansion; script results never do.

use crate::{
    error::StepError, json, runtime::ScenarioRuntime, value::Value, xml,
};

/// Outcome of resolution: a value, or the "not present" sentinel produced
/// by a missed JSON-path / XPath lookup.
#[derive(Clone, Debug)]
pub enum Resolved {
    /// A concrete value.
    Value(Value),

    /// The addressed location does not exist. Surfaces as `#notpresent` to
    /// matchers and as null to assignments.
    NotPresent,
}

impl Resolved {
    /// Collapses the sentinel to null, for assignment contexts.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Value(v) => v,
            Self::NotPresent => Value::Null,
        }
    }

    /// Indicates whether the location existed.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Value(_))
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Resolves `raw` against the scenario scope.
///
/// # Errors
///
/// Script-engine failures, malformed literals and invalid paths surface as
/// [`StepError`]s; missed lookups do not (they are [`Resolved::NotPresent`]).
pub fn resolve(rt: &mut ScenarioRuntime, raw: &str) -> Result<Resolved, StepError> {
    let text = raw.trim();

    // 1. Nothing to resolve.
    if text.is_empty() || text == "null" {
        return Ok(Resolved::Value(Value::Null));
    }

    // 2. XML literal.
    if text.starts_with('<') {
        let mut node = xml::parse(text)
            .map_err(|e| StepError::Parse(e.to_string()))?;
        rt.expand_xml(&mut node);
        return Ok(Resolved::Value(Value::Xml(node)));
    }

    // 3. Data literal; parse failure falls through to the engine.
    if text.starts_with('{') || text.starts_with('[') {
        if let Ok(mut value) = Value::parse_json(text) {
            rt.expand(&mut value);
            return Ok(Resolved::Value(value));
        }
    }

    // 4. `get`-expression.
    if text.starts_with("get[") || text.starts_with("get ") {
        return resolve_get(rt, text);
    }

    // 5. `$`-prefixed addressing.
    if let Some(rest) = text.strip_prefix('$') {
        return resolve_dollar(rt, rest);
    }

    // 6. XPath on the `response` variable.
    if text.starts_with('/') {
        let response = rt.vars.get("response").cloned();
        return match response {
            Some(Value::Xml(node)) => xpath_on(&node, text),
            _ => Err(StepError::Eval(
                "response is not xml, cannot apply xpath".into(),
            )),
        };
    }

    // 7. `name /` selects the whole XML document.
    if let Some(name) = text.strip_suffix('/').map(str::trim_end) {
        if is_identifier(name) {
            if let Some(value) = rt.vars.get(name) {
                return Ok(Resolved::Value(value.clone()));
            }
        }
    }

    // 8. `name /xpath` (or `name/xpath`) on an XML variable.
    if let Some((name, path)) = split_xpath_form(text) {
        if let Some(Value::Xml(node)) = rt.vars.get(name) {
            let node = node.clone();
            return xpath_on(&node, path);
        }
    }

    // 9. `name <xpath-function>` on an XML variable, e.g. `count(/a/b)`.
    if let Some((name, func)) = text.split_once(' ') {
        if is_identifier(name) && func.trim_start().starts_with("count(") {
            if let Some(Value::Xml(node)) = rt.vars.get(name) {
                let inner = func
                    .trim()
                    .strip_prefix("count(")
                    .and_then(|s| s.strip_suffix(')'))
                    .ok_or_else(|| StepError::Parse(text.to_owned()))?;
                let node = node.clone();
                let n = xml::count(&node, inner)
                    .map_err(|e| StepError::Eval(e.to_string()))?;
                return Ok(Resolved::Value(Value::Int(n)));
            }
        }
    }

    // 10. `name[*]…` / `name[?…]…` is a JSON-path on that variable.
    if text.contains("[*]") || text.contains("[?") {
        if let Some(open) = text.find('[') {
            let (name, path) = text.split_at(open);
            if is_identifier(name) {
                if let Some(value) = rt.vars.get(name) {
                    let value = value.clone();
                    return jsonpath_on(&value, path);
                }
            }
        }
    }

    // 11. `name $.path` is a JSON-path on that variable.
    if let Some((name, path)) = text.split_once(' ') {
        let path = path.trim_start();
        if is_identifier(name) && path.starts_with('$') {
            if let Some(value) = rt.vars.get(name) {
                let value = value.clone();
                return jsonpath_on(&value, path);
            }
        }
    }

    // 12. Everything else is a script expression.
    let result = rt.eval(text)?;
    if result.is_null() {
        // A null from a plain dotted access may mean the property does not
        // exist at all; probe, so matchers can see `#notpresent`.
        if !text.contains('(') {
            if let Some((parent, key)) = text.rsplit_once('.') {
                if is_identifier(key) {
                    if let Ok(Value::Map(m)) = rt.eval(parent) {
                        if !m.contains_key(key) {
                            return Ok(Resolved::NotPresent);
                        }
                    }
                }
            }
        }
    }
    Ok(Resolved::Value(result))
}

/// Resolves and collapses the sentinel to null.
///
/// # Errors
///
/// As [`resolve`].
pub fn resolve_value(
    rt: &mut ScenarioRuntime,
    raw: &str,
) -> Result<Value, StepError> {
    resolve(rt, raw).map(Resolved::into_value)
}

/// Splits `name /xpath` or `name/xpath` forms.
fn split_xpath_form(text: &str) -> Option<(&str, &str)> {
    let slash = text.find('/')?;
    let name = text[..slash].trim_end();
    is_identifier(name).then(|| (name, &text[slash..]))
}

fn xpath_on(node: &xml::XmlNode, path: &str) -> Result<Resolved, StepError> {
    match xml::select(node, path)
        .map_err(|e| StepError::Eval(e.to_string()))?
    {
        Some(v) => Ok(Resolved::Value(v)),
        None => Ok(Resolved::NotPresent),
    }
}

fn jsonpath_on(value: &Value, path: &str) -> Result<Resolved, StepError> {
    match json::select(value, path)? {
        Some(v) => Ok(Resolved::Value(v)),
        None => Ok(Resolved::NotPresent),
    }
}

/// `get[index]? varname path?`.
fn resolve_get(
    rt: &mut ScenarioRuntime,
    text: &str,
) -> Result<Resolved, StepError> {
    let mut index: Option<usize> = None;
    let rest = if let Some(after) = text.strip_prefix("get[") {
        let (idx, tail) = after.split_once(']').ok_or_else(|| {
            StepError::Parse(format!("malformed get expression: {text}"))
        })?;
        index = Some(idx.trim().parse::<usize>().map_err(|_| {
            StepError::Parse(format!("bad get index in: {text}"))
        })?);
        tail.trim_start()
    } else {
        text.strip_prefix("get ").unwrap_or(text).trim_start()
    };

    let (name, path) = match rest.split_once(char::is_whitespace) {
        Some((n, p)) => (n.trim(), Some(p.trim())),
        None => {
            // The path may adjoin the name: `get foo[0]` / `get foo.bar`.
            match rest.find(['[', '.', '/']) {
                Some(split) if is_identifier(&rest[..split]) => {
                    (&rest[..split], Some(&rest[split..]))
                }
                _ => (rest, None),
            }
        }
    };

    let base = rt
        .vars
        .get(name)
        .cloned()
        .ok_or_else(|| StepError::Eval(format!("undefined variable: {name}")))?;

    let resolved = match path {
        None => Resolved::Value(base),
        Some(p) if p.starts_with('/') => match &base {
            Value::Xml(node) => xpath_on(node, p)?,
            _ => {
                return Err(StepError::Eval(format!(
                    "{name} is not xml, cannot apply xpath {p}"
                )));
            }
        },
        Some(p) => jsonpath_on(&base, p)?,
    };

    if let Some(i) = index {
        let Resolved::Value(Value::List(items)) = &resolved else {
            return Ok(resolved);
        };
        return Ok(items
            .get(i)
            .cloned()
            .map_or(Resolved::NotPresent, Resolved::Value));
    }
    Ok(resolved)
}

/// `$`-prefixed addressing against `response` or a named variable.
fn resolve_dollar(
    rt: &mut ScenarioRuntime,
    rest: &str,
) -> Result<Resolved, StepError> {
    let response = || rt.vars.get("response").cloned().unwrap_or(Value::Null);

    // Bare `$` is the response itself.
    if rest.is_empty() {
        return Ok(Resolved::Value(response()));
    }

    // `$[…]` / `$.…` applies to the response; XML responses pass through.
    if rest.starts_with('[') || rest.starts_with('.') {
        let resp = response();
        if matches!(resp, Value::Xml(_)) {
            return Ok(Resolved::Value(resp));
        }
        return jsonpath_on(&resp, &format!("${rest}"));
    }

    // `$name…` forms.
    let name_end = rest
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(rest.len());
    let (name, tail) = rest.split_at(name_end);
    if !is_identifier(name) {
        return Err(StepError::Parse(format!("malformed expression: ${rest}")));
    }
    let Some(base) = rt.vars.get(name).cloned() else {
        return Err(StepError::Eval(format!("undefined variable: {name}")));
    };

    let tail_trimmed = tail.trim_start();
    if tail_trimmed.is_empty() {
        return Ok(Resolved::Value(base));
    }
    if tail_trimmed.starts_with('/') {
        return match &base {
            Value::Xml(node) => xpath_on(node, tail_trimmed),
            // Fallback: treat the slash path as a JSON-path on the
            // variable's JSON-like form.
            _ => jsonpath_on(
                &base,
                &tail_trimmed.replace('/', "."),
            ),
        };
    }
    jsonpath_on(&base, tail)
}
