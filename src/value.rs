// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Dynamically typed variable values.
//!
//! Every variable in a scenario scope holds a [`Value`]. Maps preserve
//! insertion order, so canonical JSON emission is deterministic.

use std::path::PathBuf;

use linked_hash_map::LinkedHashMap;

use crate::xml::XmlNode;

/// Ordered key→value map, the backbone of every scope and JSON object.
pub type Map = LinkedHashMap<String, Value>;

/// A single dynamically typed value.
#[derive(Clone, Debug)]
pub enum Value {
    /// Absent / JSON `null`.
    Null,

    /// Boolean.
    Bool(bool),

    /// Integer number.
    Int(i64),

    /// Floating-point number.
    Float(f64),

    /// UTF-8 string.
    String(String),

    /// Raw byte sequence (binary bodies, multipart file contents).
    Bytes(Vec<u8>),

    /// Ordered list.
    List(Vec<Value>),

    /// Ordered map.
    Map(Map),

    /// XML node tree.
    Xml(XmlNode),

    /// Opaque script-engine callable.
    Callable(Callable),

    /// Reference to a feature file, as produced by `read("x.feature")`.
    FeatureRef(FeatureRef),

    /// A complete HTTP response, forwarded verbatim by the mock router
    /// (proceed pass-through).
    Response(Box<crate::http::HttpResponse>),
}

/// Opaque callable exported into a scope by the script engine.
///
/// Carries the AST that defined it: an engine function pointer is only
/// invocable against its defining compilation unit.
#[derive(Clone)]
pub struct Callable {
    /// The engine function pointer (curried captures included).
    pub ptr: rhai::FnPtr,

    /// Compilation unit the pointer was produced by.
    pub ast: std::sync::Arc<rhai::AST>,
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.ptr.fn_name())
            .finish_non_exhaustive()
    }
}

/// Reference to a feature file, optionally narrowed to a tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureRef {
    /// Resolved path of the `.feature` file.
    pub path: PathBuf,

    /// Optional `@tag` selector for scenarios inside the feature.
    pub tag: Option<String>,
}

impl Value {
    /// Name of this [`Value`]'s type, for error messages.
    #[must_use]
    pub const fn type_of(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Xml(_) => "xml",
            Self::Callable(_) => "function",
            Self::FeatureRef(_) => "feature",
            Self::Response(_) => "response",
        }
    }

    /// Indicates whether this is [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrows the inner string, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrows the inner map, if any.
    #[must_use]
    pub const fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Borrows the inner list, if any.
    #[must_use]
    pub const fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Script-style truthiness, used by `assert`, `retry until` conditions
    /// and mock predicates.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Parses a strict-JSON literal, preserving object key order.
    ///
    /// # Errors
    ///
    /// If `text` is not valid JSON.
    pub fn parse_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<serde_json::Value>(text).map(Self::from_json)
    }

    /// Converts a [`serde_json::Value`] (order-preserving) into a [`Value`].
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n.as_i64().map_or_else(
                || Self::Float(n.as_f64().unwrap_or(f64::NAN)),
                Self::Int,
            ),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(obj) => Self::Map(
                obj.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts this [`Value`] into a [`serde_json::Value`], keeping map
    /// insertion order.
    ///
    /// Values without a JSON shape degrade to strings: XML serializes, bytes
    /// decode lossily, callables and feature references become their
    /// placeholder names.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(b) => serde_json::Value::String(
                String::from_utf8_lossy(b).into_owned(),
            ),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Self::Xml(node) => serde_json::Value::String(node.serialize()),
            Self::Callable(_) => serde_json::Value::String("#function".into()),
            Self::FeatureRef(f) => serde_json::Value::String(
                f.path.to_string_lossy().into_owned(),
            ),
            Self::Response(r) => serde_json::Value::String(format!(
                "#response({})",
                r.status
            )),
        }
    }

    /// Canonical JSON: no whitespace, preserved key order.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.to_json()).unwrap_or_else(|_| "null".into())
    }

    /// Standard stringification:
    /// - null → `"null"`
    /// - string → itself
    /// - map / list → canonical JSON
    /// - XML node → serialized XML without a declaration
    /// - everything else → its natural text form.
    #[must_use]
    pub fn display_string(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => {
                serde_json::Number::from_f64(*f)
                    .map_or_else(|| f.to_string(), |n| n.to_string())
            }
            Self::String(s) => s.clone(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Self::List(_) | Self::Map(_) => self.to_json_string(),
            Self::Xml(node) => node.serialize(),
            Self::Callable(_) => "#function".into(),
            Self::FeatureRef(f) => f.path.to_string_lossy().into_owned(),
            Self::Response(r) => format!("#response({})", r.status),
        }
    }

    /// Deep copy by JSON round-trip: the result shares no structure with
    /// the original, and non-JSON values degrade to their string forms.
    #[must_use]
    pub fn json_round_trip(&self) -> Self {
        Self::from_json(self.to_json())
    }
}

impl PartialEq for Value {
    #[expect(clippy::float_cmp, reason = "structural equality is exact")]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            // Numbers compare across the int/float divide.
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                (*a as f64) == *b
            }
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|o| v == o))
            }
            (Self::Xml(a), Self::Xml(b)) => a == b,
            (Self::Response(a), Self::Response(b)) => {
                a.status == b.status && a.body == b.body
            }
            _ => false,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> Value {
        let mut m = Map::new();
        m.insert("z".into(), Value::Int(1));
        m.insert("a".into(), Value::List(vec![Value::Null, Value::Bool(true)]));
        m.insert("m".into(), Value::String("x".into()));
        Value::Map(m)
    }

    #[test]
    fn canonical_json_preserves_insertion_order() {
        assert_eq!(
            sample_map().to_json_string(),
            r#"{"z":1,"a":[null,true],"m":"x"}"#,
        );
    }

    #[test]
    fn json_round_trip_is_structurally_equal_but_independent() {
        let original = sample_map();
        let mut copy = original.json_round_trip();
        assert_eq!(original, copy);

        if let Value::Map(m) = &mut copy {
            m.insert("z".into(), Value::Int(42));
        }
        assert_ne!(original, copy);
        // Original untouched.
        if let Value::Map(m) = &original {
            assert_eq!(m.get("z"), Some(&Value::Int(1)));
        }
    }

    #[test]
    fn numbers_compare_across_int_and_float() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Int(1), Value::Float(1.5));
    }

    #[test]
    fn parse_json_keeps_key_order() {
        let v = Value::parse_json(r#"{"b":1,"aa":2,"_":3}"#).unwrap();
        let keys: Vec<_> = v.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["b", "aa", "_"]);
    }

    #[test]
    fn truthiness_follows_script_rules() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(Value::String("x".into()).is_truthy());
        assert!(Value::Map(Map::new()).is_truthy());
    }
}
