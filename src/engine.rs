// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Embedded script engine adapter.
//!
//! The engine contract is deliberately small: `put`, `get` and `eval`
//! (against the current variable table). One [`ScriptEngine`] exists per
//! scenario and is never shared across threads.

use std::{collections::HashSet, sync::Arc};

use linked_hash_map::LinkedHashMap;
use once_cell::sync::Lazy;
use rhai::{AST, Dynamic, Engine, FnPtr, Scope};

use crate::{
    error::StepError,
    http::HttpResponse,
    value::{Callable, FeatureRef, Map, Value},
    xml::XmlNode,
};

/// Ordered variable table of one scenario scope.
///
/// Hidden variables stay accessible by name but are excluded from
/// snapshots, so they never leak into called-feature arguments or caches.
#[derive(Clone, Debug, Default)]
pub struct Vars {
    entries: LinkedHashMap<String, Value>,
    hidden: HashSet<String>,
}

impl Vars {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a visible variable.
    pub fn put(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.hidden.remove(&name);
        self.entries.insert(name, value);
    }

    /// Inserts or overwrites a hidden variable.
    pub fn put_hidden(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.hidden.insert(name.clone());
        self.entries.insert(name, value);
    }

    /// Looks a variable up by name, hidden ones included.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Removes a variable.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.hidden.remove(name);
        self.entries.remove(name)
    }

    /// Indicates whether `name` is defined, hidden ones included.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Indicates whether `name` is a hidden variable.
    #[must_use]
    pub fn is_hidden(&self, name: &str) -> bool {
        self.hidden.contains(name)
    }

    /// Iterates all entries in insertion order, hidden ones included.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Merges another table into this one, preserving hidden flags.
    pub fn absorb(&mut self, other: Self) {
        let Self { entries, hidden } = other;
        for (k, v) in entries {
            if hidden.contains(&k) {
                self.put_hidden(k, v);
            } else {
                self.put(k, v);
            }
        }
    }

    /// Deep-copied snapshot of the visible entries, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Map {
        self.entries
            .iter()
            .filter(|(k, _)| !self.hidden.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of entries, hidden ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Indicates whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-scenario script engine.
pub struct ScriptEngine {
    engine: Engine,
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine").finish_non_exhaustive()
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine {
    /// Creates an engine with script `print`/`debug` routed to [`tracing`].
    #[must_use]
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.on_print(|s| tracing::info!(target: "script", "{s}"));
        engine.on_debug(|s, _, pos| {
            tracing::debug!(target: "script", "{pos:?} {s}");
        });
        Self { engine }
    }

    /// Access for registering helper functions (`read`, mock matchers).
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Evaluates `source` with `vars` as the ambient scope.
    ///
    /// Mutations the script makes to existing variables are written back;
    /// `let` bindings stay local to the evaluation.
    ///
    /// # Errors
    ///
    /// [`StepError::Eval`] if the engine raises.
    pub fn eval(&self, source: &str, vars: &mut Vars) -> Result<Value, StepError> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| StepError::Eval(e.to_string()))?;
        let ast = Arc::new(ast);

        let mut scope = Scope::new();
        // The DSL speaks JSON: `null` must evaluate, and the engine has no
        // such literal. Variables of the same name shadow the constant.
        scope.push_constant("null", ());
        for (name, value) in vars.iter() {
            scope.push_dynamic(name.clone(), to_dynamic(value));
        }
        let out = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| StepError::Eval(e.to_string()))?;
        for (name, _, value) in scope.iter() {
            if vars.contains(name) {
                let converted = from_dynamic_with(value, &ast);
                // A callable written back unchanged must keep its original
                // defining AST, not adopt this evaluation's one.
                let keep = matches!(
                    (vars.get(name), &converted),
                    (Some(Value::Callable(old)), Value::Callable(new))
                        if old.ptr.fn_name() == new.ptr.fn_name()
                );
                if !keep && vars.get(name) != Some(&converted) {
                    if vars.is_hidden(name) {
                        vars.put_hidden(name, converted);
                    } else {
                        vars.put(name, converted);
                    }
                }
            }
        }
        Ok(from_dynamic_with(out, &ast))
    }

    /// Evaluates `source` and reports its script-style truthiness.
    ///
    /// # Errors
    ///
    /// [`StepError::Eval`] if the engine raises.
    pub fn eval_truthy(&self, source: &str, vars: &mut Vars) -> Result<bool, StepError> {
        self.eval(source, vars).map(|v| v.is_truthy())
    }

    /// Invokes a scope-held callable with positional arguments.
    ///
    /// # Errors
    ///
    /// [`StepError::Eval`] if the callable raises.
    pub fn call(&self, callable: &Callable, args: Vec<Value>) -> Result<Value, StepError> {
        let args: Vec<Dynamic> = args.iter().map(to_dynamic).collect();
        callable
            .ptr
            .call::<Dynamic>(&self.engine, &callable.ast, args)
            .map(from_dynamic)
            .map_err(|e| StepError::Eval(e.to_string()))
    }
}

/// Converts a [`Value`] into an engine [`Dynamic`].
#[must_use]
pub fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => (*b).into(),
        Value::Int(i) => (*i).into(),
        Value::Float(f) => (*f).into(),
        Value::String(s) => s.clone().into(),
        Value::Bytes(b) => Dynamic::from_blob(b.clone()),
        Value::List(items) => {
            Dynamic::from_array(items.iter().map(to_dynamic).collect())
        }
        Value::Map(m) => {
            let mut out = rhai::Map::new();
            for (k, v) in m {
                out.insert(k.as_str().into(), to_dynamic(v));
            }
            Dynamic::from_map(out)
        }
        Value::Xml(node) => Dynamic::from(node.clone()),
        Value::Callable(c) => Dynamic::from(c.ptr.clone()),
        Value::FeatureRef(f) => Dynamic::from(f.clone()),
        Value::Response(r) => Dynamic::from((**r).clone()),
    }
}

/// Empty compilation unit, for values that never held script functions.
static EMPTY_AST: Lazy<Arc<AST>> = Lazy::new(|| Arc::new(AST::empty()));

/// Converts an engine [`Dynamic`] back into a [`Value`].
///
/// Engine maps do not preserve key order; order-sensitive paths parse data
/// literals in the core instead of round-tripping them through here.
#[must_use]
pub fn from_dynamic(value: Dynamic) -> Value {
    from_dynamic_with(value, &EMPTY_AST)
}

/// Like [`from_dynamic`], attaching `ast` as the defining compilation unit
/// of any function pointers found.
#[must_use]
pub fn from_dynamic_with(value: Dynamic, ast: &Arc<AST>) -> Value {
    if value.is::<()>() {
        Value::Null
    } else if value.is::<bool>() {
        Value::Bool(value.cast::<bool>())
    } else if value.is::<rhai::INT>() {
        Value::Int(value.cast::<rhai::INT>())
    } else if value.is::<rhai::FLOAT>() {
        Value::Float(value.cast::<rhai::FLOAT>())
    } else if value.is::<rhai::ImmutableString>() {
        Value::String(value.cast::<rhai::ImmutableString>().to_string())
    } else if value.is::<char>() {
        Value::String(value.cast::<char>().to_string())
    } else if value.is::<rhai::Array>() {
        Value::List(
            value
                .cast::<rhai::Array>()
                .into_iter()
                .map(|v| from_dynamic_with(v, ast))
                .collect(),
        )
    } else if value.is::<rhai::Map>() {
        let mut out = Map::new();
        for (k, v) in value.cast::<rhai::Map>() {
            out.insert(k.to_string(), from_dynamic_with(v, ast));
        }
        Value::Map(out)
    } else if value.is::<rhai::Blob>() {
        Value::Bytes(value.cast::<rhai::Blob>())
    } else if value.is::<FnPtr>() {
        Value::Callable(Callable {
            ptr: value.cast::<FnPtr>(),
            ast: Arc::clone(ast),
        })
    } else if value.is::<XmlNode>() {
        Value::Xml(value.cast::<XmlNode>())
    } else if value.is::<FeatureRef>() {
        Value::FeatureRef(value.cast::<FeatureRef>())
    } else if value.is::<HttpResponse>() {
        Value::Response(Box::new(value.cast::<HttpResponse>()))
    } else {
        Value::String(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_sees_variables_and_returns_values() {
        let engine = ScriptEngine::new();
        let mut vars = Vars::new();
        vars.put("a", Value::Int(40));
        assert_eq!(engine.eval("a + 2", &mut vars).unwrap(), Value::Int(42));
        assert_eq!(
            engine.eval("\"hello \" + \"world\"", &mut vars).unwrap(),
            Value::String("hello world".into()),
        );
    }

    #[test]
    fn eval_writes_back_mutations() {
        let engine = ScriptEngine::new();
        let mut vars = Vars::new();
        vars.put("o", Value::parse_json(r#"{"bar":1}"#).unwrap());
        engine.eval("o.bar = 5", &mut vars).unwrap();
        let o = vars.get("o").unwrap();
        assert_eq!(
            crate::json::select(o, "$.bar").unwrap(),
            Some(Value::Int(5)),
        );
    }

    #[test]
    fn let_bindings_stay_local() {
        let engine = ScriptEngine::new();
        let mut vars = Vars::new();
        engine.eval("let tmp = 3; tmp", &mut vars).unwrap();
        assert!(!vars.contains("tmp"));
    }

    #[test]
    fn callables_round_trip_and_invoke() {
        let engine = ScriptEngine::new();
        let mut vars = Vars::new();
        let f = engine.eval("|x| x * 2", &mut vars).unwrap();
        let Value::Callable(callable) = f else {
            panic!("expected callable, got {f:?}");
        };
        assert_eq!(
            engine.call(&callable, vec![Value::Int(21)]).unwrap(),
            Value::Int(42),
        );
    }

    #[test]
    fn hidden_vars_are_reachable_but_not_snapshotted() {
        let engine = ScriptEngine::new();
        let mut vars = Vars::new();
        vars.put_hidden("secret", Value::Int(7));
        vars.put("visible", Value::Int(1));
        assert_eq!(
            engine.eval("secret + 1", &mut vars).unwrap(),
            Value::Int(8),
        );
        let snap = vars.snapshot();
        assert!(!snap.contains_key("secret"));
        assert!(snap.contains_key("visible"));
    }
}
