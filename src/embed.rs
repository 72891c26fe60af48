// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Embedded-expression expansion.
//!
//! Walks a value tree substituting `#(expr)` placeholders with evaluated
//! values. The optional form `##(expr)` deletes the enclosing map entry,
//! list element, XML element or attribute when the expression evaluates to
//! null. Expansion only applies to values built from data literals;
//! evaluation errors leave the original text untouched.

use crate::{
    error::StepError,
    value::Value,
    xml::{XmlChild, XmlNode},
};

/// Evaluator handed in by the scenario runtime.
pub type Eval<'a> = dyn FnMut(&str) -> Result<Value, StepError> + 'a;

/// A placeholder occurrence inside a string.
struct Placeholder {
    start: usize,
    end: usize,
    expr: String,
    optional: bool,
}

/// Finds the first balanced `#(…)` / `##(…)` at or after `from`.
fn find_placeholder(s: &str, from: usize) -> Option<Placeholder> {
    let bytes = s.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] != b'#' {
            i += 1;
            continue;
        }
        let optional = bytes.get(i + 1) == Some(&b'#');
        let open = i + if optional { 2 } else { 1 };
        if bytes.get(open) != Some(&b'(') {
            i += 1;
            continue;
        }
        // Balanced-paren scan, skipping over double-quoted strings.
        let mut depth = 0_i32;
        let mut in_str = false;
        let mut j = open;
        while j < bytes.len() {
            match bytes[j] {
                b'"' if bytes.get(j.wrapping_sub(1)) != Some(&b'\\') => {
                    in_str = !in_str;
                }
                b'(' if !in_str => depth += 1,
                b')' if !in_str => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(Placeholder {
                            start: i,
                            end: j + 1,
                            expr: s[open + 1..j].to_owned(),
                            optional,
                        });
                    }
                }
                _ => {}
            }
            j += 1;
        }
        i += 1;
    }
    None
}

/// Result of expanding one string.
enum Expanded {
    /// No placeholder present, or evaluation failed: keep the original.
    Keep,

    /// The string was a single balanced placeholder: use the value as-is.
    Replace(Value),

    /// A `##(…)` placeholder evaluated to null: delete the enclosing slot.
    Remove,

    /// Inline substitution produced new text.
    Text(String),
}

fn expand_string(s: &str, eval: &mut Eval<'_>) -> Expanded {
    let Some(first) = find_placeholder(s, 0) else {
        return Expanded::Keep;
    };

    // Whole-string placeholder keeps the evaluated value's type.
    if first.start == 0 && first.end == s.trim_end().len() && s[..first.start].is_empty() {
        return match eval(&first.expr) {
            Ok(Value::Null) if first.optional => Expanded::Remove,
            Ok(v) => Expanded::Replace(v),
            Err(_) => Expanded::Keep,
        };
    }

    // Inline: stringify each placeholder within the larger text.
    let mut out = String::new();
    let mut cursor = 0;
    let mut at = 0;
    while let Some(p) = find_placeholder(s, at) {
        out.push_str(&s[cursor..p.start]);
        match eval(&p.expr) {
            Ok(Value::Null) if p.optional => {}
            Ok(v) => out.push_str(&v.display_string()),
            Err(_) => out.push_str(&s[p.start..p.end]),
        }
        cursor = p.end;
        at = p.end;
    }
    out.push_str(&s[cursor..]);
    Expanded::Text(out)
}

/// Expands placeholders throughout a value tree, in place.
pub fn expand(value: &mut Value, eval: &mut Eval<'_>) {
    match value {
        Value::String(s) => match expand_string(s, eval) {
            Expanded::Keep => {}
            Expanded::Replace(v) => *value = v,
            // A bare optional null at the top level degrades to null; only
            // enclosing containers can delete slots.
            Expanded::Remove => *value = Value::Null,
            Expanded::Text(t) => *value = Value::String(t),
        },
        Value::List(items) => {
            let mut removed = Vec::new();
            for (i, item) in items.iter_mut().enumerate() {
                if let Value::String(s) = item {
                    match expand_string(s, eval) {
                        Expanded::Keep => {}
                        Expanded::Replace(v) => *item = v,
                        Expanded::Remove => removed.push(i),
                        Expanded::Text(t) => *item = Value::String(t),
                    }
                } else {
                    expand(item, eval);
                }
            }
            for i in removed.into_iter().rev() {
                items.remove(i);
            }
        }
        Value::Map(m) => {
            let keys: Vec<String> = m.keys().cloned().collect();
            let mut removed = Vec::new();
            for key in keys {
                let Some(slot) = m.get_mut(&key) else { continue };
                if let Value::String(s) = slot {
                    match expand_string(s, eval) {
                        Expanded::Keep => {}
                        Expanded::Replace(v) => *slot = v,
                        Expanded::Remove => removed.push(key),
                        Expanded::Text(t) => *slot = Value::String(t),
                    }
                } else {
                    expand(slot, eval);
                }
            }
            for key in removed {
                m.remove(&key);
            }
        }
        Value::Xml(node) => expand_xml(node, eval),
        _ => {}
    }
}

/// Expands placeholders in an XML tree: attributes, text children, and
/// elements whose only child is a balanced placeholder.
pub fn expand_xml(node: &mut XmlNode, eval: &mut Eval<'_>) {
    let mut removed_attrs = Vec::new();
    for (i, (_, v)) in node.attributes.iter_mut().enumerate() {
        match expand_string(v, eval) {
            Expanded::Keep => {}
            Expanded::Replace(val) => *v = val.display_string(),
            Expanded::Remove => removed_attrs.push(i),
            Expanded::Text(t) => *v = t,
        }
    }
    for i in removed_attrs.into_iter().rev() {
        node.attributes.remove(i);
    }

    let mut removed_children = Vec::new();
    for (i, child) in node.children.iter_mut().enumerate() {
        match child {
            XmlChild::Element(e) => {
                let only_text = match e.children.as_slice() {
                    [XmlChild::Text(t)] => Some(t.clone()),
                    _ => None,
                };
                let Some(text) = only_text else {
                    expand_xml(e, eval);
                    continue;
                };
                match expand_string(&text, eval) {
                    Expanded::Keep => {}
                    Expanded::Replace(Value::Xml(imported)) => {
                        e.children = vec![XmlChild::Element(imported)];
                    }
                    Expanded::Replace(Value::Null) => e.children.clear(),
                    Expanded::Replace(v) => {
                        e.children = vec![XmlChild::Text(v.display_string())];
                    }
                    Expanded::Remove => removed_children.push(i),
                    Expanded::Text(new) => {
                        e.children = vec![XmlChild::Text(new)];
                    }
                }
            }
            XmlChild::Text(t) => {
                let current = t.clone();
                if let Expanded::Text(new) = expand_string(&current, eval) {
                    *t = new;
                }
            }
        }
    }
    for i in removed_children.into_iter().rev() {
        node.children.remove(i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::{ScriptEngine, Vars}, value::Map};

    fn run(v: &mut Value, vars: &mut Vars) {
        let engine = ScriptEngine::new();
        let mut eval =
            |expr: &str| -> Result<Value, StepError> { engine.eval(expr, vars) };
        expand(v, &mut eval);
    }

    #[test]
    fn whole_string_placeholder_keeps_type() {
        let mut vars = Vars::new();
        vars.put("n", Value::Int(5));
        let mut v = Value::parse_json(r##"{"a":"#(n + 1)"}"##).unwrap();
        run(&mut v, &mut vars);
        assert_eq!(v, Value::parse_json(r#"{"a":6}"#).unwrap());
    }

    #[test]
    fn optional_null_deletes_map_entry() {
        let mut vars = Vars::new();
        vars.put("name", Value::String("world".into()));
        let mut v = Value::parse_json(
            r###"{"greeting":"#(\"hello \" + name)","drop":"##(null)"}"###,
        )
        .unwrap();
        run(&mut v, &mut vars);
        let m = v.as_map().unwrap();
        assert_eq!(
            m.get("greeting"),
            Some(&Value::String("hello world".into())),
        );
        assert!(!m.contains_key("drop"));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn optional_null_deletes_list_element() {
        let mut vars = Vars::new();
        let mut v = Value::parse_json(r###"[1,"##(null)",3]"###).unwrap();
        run(&mut v, &mut vars);
        assert_eq!(v, Value::parse_json("[1,3]").unwrap());
    }

    #[test]
    fn inline_placeholders_stringify() {
        let mut vars = Vars::new();
        vars.put("who", Value::String("cat".into()));
        let mut v =
            Value::parse_json(r###"{"msg":"hi #(who), bye ##(null)."}"###)
                .unwrap();
        run(&mut v, &mut vars);
        assert_eq!(
            v.as_map().unwrap().get("msg"),
            Some(&Value::String("hi cat, bye .".into())),
        );
    }

    #[test]
    fn eval_errors_keep_original_text() {
        let mut vars = Vars::new();
        let mut v = Value::parse_json(r##"{"a":"#(boom!!)"}"##).unwrap();
        run(&mut v, &mut vars);
        assert_eq!(
            v.as_map().unwrap().get("a"),
            Some(&Value::String("#(boom!!)".into())),
        );
    }

    #[test]
    fn xml_node_substitutes_into_json_map() {
        let mut vars = Vars::new();
        vars.put("node", Value::Xml(crate::xml::parse("<a>1</a>").unwrap()));
        let mut v = Value::parse_json(r##"{"x":"#(node)"}"##).unwrap();
        run(&mut v, &mut vars);
        assert!(matches!(v.as_map().unwrap().get("x"), Some(Value::Xml(_))));
    }

    #[test]
    fn xml_optional_removes_element_and_attribute() {
        let mut vars = Vars::new();
        vars.put("keep", Value::Int(1));
        let mut node = crate::xml::parse(
            r###"<r gone="##(null)"><a>#(keep)</a><b>##(null)</b></r>"###,
        )
        .unwrap();
        let engine = ScriptEngine::new();
        let mut eval = |expr: &str| -> Result<Value, StepError> {
            engine.eval(expr, &mut vars)
        };
        expand_xml(&mut node, &mut eval);
        assert_eq!(node.serialize(), "<r><a>1</a></r>");
    }

    #[test]
    fn nested_structures_expand_recursively() {
        let mut vars = Vars::new();
        vars.put("v", Value::Int(2));
        let mut m = Map::new();
        m.insert(
            "outer".into(),
            Value::parse_json(r##"{"inner":["#(v)"]}"##).unwrap(),
        );
        let mut v = Value::Map(m);
        run(&mut v, &mut vars);
        assert_eq!(v.to_json_string(), r#"{"outer":{"inner":[2]}}"#);
    }
}
