// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! `call` and `callonce`.
//!
//! A call target is, in order: a scope-held callable, a scope-held feature
//! reference, or a `read("file.feature"[@tag])` expression. Without an
//! assignment the call is shared (callee variables propagate back);
//! assigned calls are isolated (the final scope lands in one variable).
//! `callonce` deduplicates on the verbatim call text within the calling
//! feature.

use crate::{
    engine::Vars,
    error::StepError,
    runtime::{ScenarioRuntime, run_feature_call},
    value::{FeatureRef, Value},
};

/// Entry point of the `call` / `callonce` keywords (and the
/// `def x = call …` form).
pub(crate) async fn call_step(
    rt: &mut ScenarioRuntime,
    text: &str,
    assign_to: Option<&str>,
    once: bool,
) -> Result<(), StepError> {
    let text = text.trim();
    let shared = assign_to.is_none();

    if once {
        let state = rt.feature_state.clone();
        if let Some(cached) = state.cached(text) {
            install_cached(rt, assign_to, cached);
            return Ok(());
        }
        // Double-checked: losers of the race find the winner's entry.
        let _guard = state.lock.lock().await;
        if let Some(cached) = state.cached(text) {
            install_cached(rt, assign_to, cached);
            return Ok(());
        }
        let result = execute_call(rt, text, shared).await?;
        state.store(text, &result);
        if let Some(name) = assign_to {
            rt.vars.put(name, result);
        }
        return Ok(());
    }

    let result = execute_call(rt, text, shared).await?;
    if let Some(name) = assign_to {
        rt.vars.put(name, result);
    }
    Ok(())
}

/// Installs a cache hit: assignment for isolated callers, key spread for
/// shared ones.
fn install_cached(
    rt: &mut ScenarioRuntime,
    assign_to: Option<&str>,
    cached: Value,
) {
    match assign_to {
        Some(name) => rt.vars.put(name, cached),
        None => {
            if let Value::Map(m) = cached {
                for (k, v) in m {
                    rt.vars.put(k, v);
                }
            }
        }
    }
}

/// Splits call text into the target token and the trailing argument
/// expression, honoring quotes and nesting inside the token.
fn split_call_text(text: &str) -> (&str, Option<&str>) {
    let bytes = text.as_bytes();
    let mut depth = 0_i32;
    let mut in_str: Option<u8> = None;
    for (i, b) in bytes.iter().enumerate() {
        if let Some(quote) = in_str {
            if *b == quote && bytes.get(i.wrapping_sub(1)) != Some(&b'\\') {
                in_str = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => in_str = Some(*b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b' ' | b'\t' if depth == 0 => {
                return (&text[..i], Some(text[i + 1..].trim()));
            }
            _ => {}
        }
    }
    (text, None)
}

/// Performs the call and returns its result value (the final scope map for
/// isolated feature calls, the return value for callables).
async fn execute_call(
    rt: &mut ScenarioRuntime,
    text: &str,
    shared: bool,
) -> Result<Value, StepError> {
    let (target_token, arg_expr) = split_call_text(text);
    let arg = match arg_expr {
        Some(expr) if !expr.is_empty() => Some(rt.resolve_value(expr)?),
        _ => None,
    };

    // Target: scope variable first, then any expression (`read(...)`).
    let target = match rt.vars.get(target_token) {
        Some(v @ (Value::Callable(_) | Value::FeatureRef(_))) => v.clone(),
        _ => rt.resolve_value(target_token)?,
    };

    match target {
        Value::Callable(callable) => {
            let args = match arg {
                Some(a) => vec![a],
                None => Vec::new(),
            };
            let result = rt.engine.call(&callable, args)?;
            if shared {
                if let Value::Map(m) = &result {
                    for (k, v) in m {
                        rt.vars.put(k.clone(), v.clone());
                    }
                }
            }
            Ok(result)
        }
        Value::FeatureRef(fref) => call_feature(rt, fref, arg, shared).await,
        other => Err(StepError::Parse(format!(
            "cannot call a {}: {target_token}",
            other.type_of(),
        ))),
    }
}

async fn call_feature(
    rt: &mut ScenarioRuntime,
    fref: FeatureRef,
    arg: Option<Value>,
    shared: bool,
) -> Result<Value, StepError> {
    // A list argument is a loop call: one isolated run per element.
    if let Some(Value::List(items)) = &arg {
        if shared {
            return Err(StepError::Parse(
                "loop calls need an assignment, shared mode cannot \
                 collect a result list"
                    .into(),
            ));
        }
        let mut results = Vec::new();
        for item in items.clone() {
            let outcome = run_feature_call(
                rt.suite.clone(),
                fref.clone(),
                seed_isolated(rt, Some(&item))?,
                rt.config.clone(),
                rt.depth + 1,
            )
            .await?;
            rt.call_results.push(outcome.feature_result);
            results.push(outcome.result);
        }
        return Ok(Value::List(results));
    }

    let seed = if shared {
        seed_shared(rt, arg.as_ref())?
    } else {
        seed_isolated(rt, arg.as_ref())?
    };
    let outcome = run_feature_call(
        rt.suite.clone(),
        fref,
        seed,
        rt.config.clone(),
        rt.depth + 1,
    )
    .await;
    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            if shared {
                // The scope was moved into the callee; a failed shared call
                // fails the step, the scenario is over anyway.
                rt.vars = Vars::new();
            }
            return Err(e);
        }
    };

    if shared {
        rt.vars = outcome.vars;
        rt.config = outcome.config;
    }
    rt.call_results.push(outcome.feature_result);
    Ok(outcome.result)
}

/// Shared mode hands the caller's live table to the callee.
fn seed_shared(
    rt: &mut ScenarioRuntime,
    arg: Option<&Value>,
) -> Result<Vars, StepError> {
    let mut vars = std::mem::take(&mut rt.vars);
    apply_arg(&mut vars, arg)?;
    Ok(vars)
}

/// Isolated mode seeds a deep copy of the caller's exportable scope; hidden
/// variables stay behind.
fn seed_isolated(
    rt: &ScenarioRuntime,
    arg: Option<&Value>,
) -> Result<Vars, StepError> {
    let mut vars = Vars::new();
    for (k, v) in rt.vars.snapshot() {
        vars.put(k, v);
    }
    apply_arg(&mut vars, arg)?;
    Ok(vars)
}

fn apply_arg(vars: &mut Vars, arg: Option<&Value>) -> Result<(), StepError> {
    match arg {
        None => Ok(()),
        Some(Value::Map(m)) => {
            for (k, v) in m {
                vars.put(k.clone(), v.clone());
            }
            vars.put_hidden("__arg", Value::Map(m.clone()));
            Ok(())
        }
        Some(other) => Err(StepError::Parse(format!(
            "call argument must be a map or a list of maps, got {}",
            other.type_of(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_text_splits_target_and_argument() {
        assert_eq!(
            split_call_text("read(\"a.feature\") { id: 1 }"),
            ("read(\"a.feature\")", Some("{ id: 1 }")),
        );
        assert_eq!(split_call_text("myFn"), ("myFn", None));
        assert_eq!(
            split_call_text("read(\"some file.feature\")"),
            ("read(\"some file.feature\")", None),
        );
    }
}
