// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! JSON addressing: path queries and in-place structure mutation.
//!
//! Queries go through [`jsonpath_lib`] on the order-preserving
//! [`serde_json`] bridge. Mutation (`set` / `remove`) uses a local walker,
//! because setting must auto-create the intermediate maps and lists a path
//! names (`a.b[2].c` on an empty variable).

use crate::{
    error::StepError,
    value::{Map, Value},
};

/// Normalizes the accepted path spellings (`a.b`, `$.a.b`, `[0]`, `.a`)
/// into a rooted JSON-path.
fn rooted(path: &str) -> String {
    let p = path.trim();
    if p.is_empty() || p == "$" {
        "$".into()
    } else if p.starts_with('$') {
        p.into()
    } else if p.starts_with('[') || p.starts_with('.') {
        format!("${p}")
    } else {
        format!("$.{p}")
    }
}

/// Indicates whether a path can match more than one location, in which case
/// query results stay lists.
fn is_wildcard(path: &str) -> bool {
    path.contains('*') || path.contains("..") || path.contains("[?")
}

/// Evaluates a JSON-path query. `None` means the path matched nothing.
///
/// Definite paths collapse to their single match; wildcard, filter and
/// descent paths always produce a list.
///
/// # Errors
///
/// If the path expression itself is invalid.
pub fn select(value: &Value, path: &str) -> Result<Option<Value>, StepError> {
    let json = value.to_json();
    let rooted = rooted(path);
    let found = jsonpath_lib::select(&json, &rooted)
        .map_err(|e| StepError::Eval(format!("jsonpath {rooted}: {e}")))?;
    if is_wildcard(&rooted) {
        return Ok(Some(Value::List(
            found.into_iter().cloned().map(Value::from_json).collect(),
        )));
    }
    Ok(found.first().map(|v| Value::from_json((*v).clone())))
}

/// One step of a mutation path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathToken {
    /// Map key.
    Key(String),

    /// 0-based list index.
    Index(usize),
}

/// Parses a definite mutation path (`$.a.b[0].c`, `a.b`, `[1]`,
/// `['a key']`) into tokens.
///
/// # Errors
///
/// On unbalanced brackets or wildcard steps, which cannot address a single
/// location.
pub fn parse_tokens(path: &str) -> Result<Vec<PathToken>, StepError> {
    let mut p = path.trim();
    p = p.strip_prefix('$').unwrap_or(p);

    let mut tokens = Vec::new();
    let mut chars = p.char_indices();
    let mut key_start: Option<usize> = None;

    let flush = |tokens: &mut Vec<PathToken>, start: Option<usize>, end: usize| {
        if let Some(s) = start {
            let key = &p[s..end];
            if !key.is_empty() {
                tokens.push(PathToken::Key(key.to_owned()));
            }
        }
    };

    while let Some((i, c)) = chars.next() {
        match c {
            '.' => {
                flush(&mut tokens, key_start.take(), i);
            }
            '[' => {
                flush(&mut tokens, key_start.take(), i);
                let mut inner = String::new();
                let mut closed = false;
                for (_, c2) in chars.by_ref() {
                    if c2 == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(c2);
                }
                if !closed {
                    return Err(StepError::Parse(format!(
                        "unbalanced bracket in path: {path}"
                    )));
                }
                let inner = inner.trim();
                if let Ok(idx) = inner.parse::<usize>() {
                    tokens.push(PathToken::Index(idx));
                } else {
                    let quoted = inner
                        .strip_prefix('\'')
                        .and_then(|s| s.strip_suffix('\''))
                        .or_else(|| {
                            inner
                                .strip_prefix('"')
                                .and_then(|s| s.strip_suffix('"'))
                        });
                    match quoted {
                        Some(k) => tokens.push(PathToken::Key(k.to_owned())),
                        None => {
                            return Err(StepError::Parse(format!(
                                "path step [{inner}] does not address a \
                                 single location: {path}"
                            )));
                        }
                    }
                }
            }
            _ => {
                if key_start.is_none() {
                    key_start = Some(i);
                }
            }
        }
    }
    flush(&mut tokens, key_start.take(), p.len());
    Ok(tokens)
}

/// Sets the location addressed by `path`, creating intermediate maps and
/// lists. Indexing past the end of a list pads it with nulls.
///
/// # Errors
///
/// If the path cannot be tokenized.
pub fn set_path(target: &mut Value, path: &str, val: Value) -> Result<(), StepError> {
    let tokens = parse_tokens(path)?;
    if tokens.is_empty() {
        *target = val;
        return Ok(());
    }

    let mut node = target;
    for (pos, token) in tokens.iter().enumerate() {
        let last = pos + 1 == tokens.len();
        match token {
            PathToken::Key(k) => {
                if !matches!(node, Value::Map(_)) {
                    *node = Value::Map(Map::new());
                }
                let Value::Map(m) = node else { unreachable!() };
                if !m.contains_key(k) {
                    m.insert(k.clone(), Value::Null);
                }
                // Entry guaranteed right above.
                node = m.get_mut(k).unwrap_or_else(|| unreachable!());
                if last {
                    *node = val;
                    return Ok(());
                }
            }
            PathToken::Index(i) => {
                if !matches!(node, Value::List(_)) {
                    *node = Value::List(Vec::new());
                }
                let Value::List(items) = node else { unreachable!() };
                while items.len() <= *i {
                    items.push(Value::Null);
                }
                node = &mut items[*i];
                if last {
                    *node = val;
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

/// Removes the location addressed by `path`. Missing locations are a no-op.
///
/// # Errors
///
/// If the path cannot be tokenized.
pub fn remove_path(target: &mut Value, path: &str) -> Result<(), StepError> {
    let tokens = parse_tokens(path)?;
    let Some((last, parents)) = tokens.split_last() else {
        *target = Value::Null;
        return Ok(());
    };

    let mut node = target;
    for token in parents {
        match (token, node) {
            (PathToken::Key(k), Value::Map(m)) => match m.get_mut(k) {
                Some(next) => node = next,
                None => return Ok(()),
            },
            (PathToken::Index(i), Value::List(items)) => {
                match items.get_mut(*i) {
                    Some(next) => node = next,
                    None => return Ok(()),
                }
            }
            _ => return Ok(()),
        }
    }

    match (last, node) {
        (PathToken::Key(k), Value::Map(m)) => {
            m.remove(k);
        }
        (PathToken::Index(i), Value::List(items)) => {
            if *i < items.len() {
                items.remove(*i);
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_definite_path_collapses() {
        let v = Value::parse_json(r#"{"a":{"b":[{"c":5}]}}"#).unwrap();
        assert_eq!(select(&v, "$.a.b[0].c").unwrap(), Some(Value::Int(5)));
        assert_eq!(select(&v, "a.b[0].c").unwrap(), Some(Value::Int(5)));
        assert_eq!(select(&v, "$.a.missing").unwrap(), None);
    }

    #[test]
    fn select_wildcard_stays_list() {
        let v = Value::parse_json(r#"{"a":[{"c":1},{"c":2}]}"#).unwrap();
        assert_eq!(
            select(&v, "$.a[*].c").unwrap(),
            Some(Value::List(vec![Value::Int(1), Value::Int(2)])),
        );
    }

    #[test]
    fn select_filter_expression() {
        let v = Value::parse_json(r#"{"a":[{"c":1},{"c":2}]}"#).unwrap();
        assert_eq!(
            select(&v, "$.a[?(@.c==2)]").unwrap(),
            Some(Value::List(vec![
                Value::parse_json(r#"{"c":2}"#).unwrap()
            ])),
        );
    }

    #[test]
    fn tokens_accept_quoted_bracket_keys() {
        assert_eq!(
            parse_tokens("$.a['b c'][2]").unwrap(),
            vec![
                PathToken::Key("a".into()),
                PathToken::Key("b c".into()),
                PathToken::Index(2),
            ],
        );
    }

    #[test]
    fn set_auto_creates_deep_structure() {
        let mut v = Value::Null;
        set_path(&mut v, "a.b[1].c", Value::Int(9)).unwrap();
        assert_eq!(v.to_json_string(), r#"{"a":{"b":[null,{"c":9}]}}"#);
    }

    #[test]
    fn set_overwrites_existing_leaf() {
        let mut v = Value::parse_json(r#"{"a":1}"#).unwrap();
        set_path(&mut v, "a", Value::String("x".into())).unwrap();
        assert_eq!(v.to_json_string(), r#"{"a":"x"}"#);
    }

    #[test]
    fn remove_key_and_list_element() {
        let mut v = Value::parse_json(r#"{"a":[1,2,3],"b":1}"#).unwrap();
        remove_path(&mut v, "a[1]").unwrap();
        remove_path(&mut v, "b").unwrap();
        remove_path(&mut v, "nope.deep").unwrap();
        assert_eq!(v.to_json_string(), r#"{"a":[1,3]}"#);
    }
}
