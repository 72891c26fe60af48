// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! HTTP builder keywords: `url`, `path`, `param(s)`, `header(s)`,
//! `cookie(s)`, `form field(s)`, `multipart *`, `request`, `method`,
//! `status` and `retry until`.

use std::time::Duration;

use super::split_assign;
use crate::{
    error::StepError,
    http::MultiPart,
    runtime::ScenarioRuntime,
    value::Value,
};

pub(crate) fn url(rt: &mut ScenarioRuntime, rest: &str) -> Result<(), StepError> {
    let value = rt.resolve_value(rest)?;
    rt.builder.url = Some(value.display_string());
    Ok(())
}

/// `path "a", "b"` wraps the comma list into a list literal before
/// evaluation; commas inside quoted strings do not survive this and are
/// split too.
pub(crate) fn path(rt: &mut ScenarioRuntime, rest: &str) -> Result<(), StepError> {
    let value = rt
        .eval(&format!("[{rest}]"))
        .or_else(|_| rt.resolve_value(rest))?;
    match value {
        Value::List(items) => {
            for item in items {
                rt.builder.paths.push(item.display_string());
            }
        }
        other => rt.builder.paths.push(other.display_string()),
    }
    Ok(())
}

pub(crate) fn param(rt: &mut ScenarioRuntime, rest: &str) -> Result<(), StepError> {
    let (name, rhs) = split_assign(rest).ok_or_else(|| {
        StepError::Parse(format!("param needs an assignment: {rest}"))
    })?;
    let value = rt.resolve_value(rhs)?;
    push_multi(&mut rt.builder.params, name, &value);
    Ok(())
}

pub(crate) fn params(rt: &mut ScenarioRuntime, rest: &str) -> Result<(), StepError> {
    let map = resolve_map(rt, rest, "params")?;
    for (name, value) in &map {
        rt.builder.params.retain(|(k, _)| k != name);
        push_multi(&mut rt.builder.params, name, value);
    }
    Ok(())
}

pub(crate) fn header(rt: &mut ScenarioRuntime, rest: &str) -> Result<(), StepError> {
    let (name, rhs) = split_assign(rest).ok_or_else(|| {
        StepError::Parse(format!("header needs an assignment: {rest}"))
    })?;
    let value = rt.resolve_value(rhs)?;
    rt.builder.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    rt.builder
        .headers
        .push((name.to_owned(), value.display_string()));
    Ok(())
}

pub(crate) fn headers(rt: &mut ScenarioRuntime, rest: &str) -> Result<(), StepError> {
    let map = resolve_map(rt, rest, "headers")?;
    for (name, value) in &map {
        if value.is_null() {
            continue;
        }
        rt.builder
            .headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        rt.builder
            .headers
            .push((name.clone(), value.display_string()));
    }
    Ok(())
}

pub(crate) fn cookie(rt: &mut ScenarioRuntime, rest: &str) -> Result<(), StepError> {
    let (name, rhs) = split_assign(rest).ok_or_else(|| {
        StepError::Parse(format!("cookie needs an assignment: {rest}"))
    })?;
    let value = rt.resolve_value(rhs)?;
    rt.builder.cookies.retain(|(k, _)| k.as_str() != name);
    rt.builder
        .cookies
        .push((name.to_owned(), value.display_string()));
    Ok(())
}

pub(crate) fn cookies(rt: &mut ScenarioRuntime, rest: &str) -> Result<(), StepError> {
    let map = resolve_map(rt, rest, "cookies")?;
    for (name, value) in &map {
        if value.is_null() {
            continue;
        }
        rt.builder.cookies.retain(|(k, _)| k != name);
        rt.builder.cookies.push((name.clone(), value.display_string()));
    }
    Ok(())
}

pub(crate) fn form_field(
    rt: &mut ScenarioRuntime,
    rest: &str,
) -> Result<(), StepError> {
    let (name, rhs) = split_assign(rest).ok_or_else(|| {
        StepError::Parse(format!("form field needs an assignment: {rest}"))
    })?;
    let value = rt.resolve_value(rhs)?;
    push_multi(&mut rt.builder.form_fields, name, &value);
    Ok(())
}

pub(crate) fn form_fields(
    rt: &mut ScenarioRuntime,
    rest: &str,
) -> Result<(), StepError> {
    let map = resolve_map(rt, rest, "form fields")?;
    for (name, value) in &map {
        push_multi(&mut rt.builder.form_fields, name, value);
    }
    Ok(())
}

pub(crate) fn request_body(
    rt: &mut ScenarioRuntime,
    rest: &str,
) -> Result<(), StepError> {
    let value = rt.resolve_value(rest)?;
    rt.builder.body = Some(value);
    Ok(())
}

pub(crate) fn retry_until(
    rt: &mut ScenarioRuntime,
    rest: &str,
) -> Result<(), StepError> {
    if rest.trim().is_empty() {
        return Err(StepError::Parse("retry until needs a condition".into()));
    }
    rt.builder.retry_until = Some(rest.trim().to_owned());
    Ok(())
}

/// `status 200`.
pub(crate) fn status(rt: &mut ScenarioRuntime, rest: &str) -> Result<(), StepError> {
    let expected: i64 = rest.trim().parse().map_err(|_| {
        StepError::Parse(format!("status expects a number: {rest}"))
    })?;
    let actual = match rt.vars.get("responseStatus") {
        Some(Value::Int(i)) => *i,
        _ => {
            return Err(StepError::Assertion(
                "no response yet, cannot assert status".into(),
            ));
        }
    };
    if actual == expected {
        Ok(())
    } else {
        let body = rt
            .vars
            .get("response")
            .map(Value::display_string)
            .unwrap_or_default();
        Err(StepError::Assertion(format!(
            "status code was: {actual}, expected: {expected}, response: {body}"
        )))
    }
}

/// Headers and cookies from the active configuration, evaluated per
/// request.
fn configured_headers(
    rt: &mut ScenarioRuntime,
) -> Result<Vec<(String, String)>, StepError> {
    let mut out = Vec::new();
    let configured = rt.config.headers.clone();
    let resolved = match configured {
        Some(Value::Callable(c)) => Some(rt.engine.call(&c, Vec::new())?),
        other => other,
    };
    if let Some(Value::Map(m)) = resolved {
        for (k, v) in &m {
            if !v.is_null() {
                out.push((k.clone(), v.display_string()));
            }
        }
    }
    Ok(out)
}

/// Verbs accepted literally, so `method get` needs no quoting.
const KNOWN_METHODS: &[&str] = &[
    "get", "post", "put", "delete", "patch", "head", "options", "trace",
];

/// `method get` — invokes the builder, honoring a pending `retry until`.
pub(crate) async fn method(
    rt: &mut ScenarioRuntime,
    rest: &str,
) -> Result<(), StepError> {
    let trimmed = rest.trim();
    let verb = if KNOWN_METHODS.contains(&trimmed.to_ascii_lowercase().as_str())
    {
        trimmed.to_owned()
    } else {
        rt.resolve_value(trimmed)?.display_string()
    };
    let retry = rt.builder.retry_until.take();

    let mut effective = rt.builder.copy();
    for (k, v) in configured_headers(rt)? {
        let already = effective
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(&k));
        if !already {
            effective.headers.push((k, v));
        }
    }
    if let Some(Value::Map(cookies)) = rt.config.cookies.clone() {
        for (k, v) in &cookies {
            let already = effective.cookies.iter().any(|(name, _)| name == k);
            if !already && !v.is_null() {
                effective.cookies.push((k.clone(), v.display_string()));
            }
        }
    }

    let outcome = match retry {
        None => {
            let response = effective
                .invoke(&rt.suite.client, &verb, &rt.config)
                .await?;
            log_exchange(rt, &verb, &effective.build_url()?, response.status);
            rt.install_response(&response);
            Ok(())
        }
        Some(condition) => {
            invoke_with_retry(rt, &mut effective, &verb, &condition).await
        }
    };
    rt.builder.reset_for_next();
    outcome
}

/// The `retry until` loop: invoke, publish response variables, evaluate
/// the condition; sleep and restore the builder between attempts.
async fn invoke_with_retry(
    rt: &mut ScenarioRuntime,
    effective: &mut crate::http::HttpRequestBuilder,
    verb: &str,
    condition: &str,
) -> Result<(), StepError> {
    let snapshot = effective.copy();
    let max_attempts = rt.config.retry_count.max(1);
    let mut attempts = 0_u32;
    loop {
        attempts += 1;
        let response = effective
            .invoke(&rt.suite.client, verb, &rt.config)
            .await?;
        log_exchange(rt, verb, &effective.build_url()?, response.status);
        rt.install_response(&response);

        if rt.eval(condition)?.is_truthy() {
            return Ok(());
        }
        if attempts >= max_attempts {
            return Err(StepError::RetryExhausted {
                attempts,
                condition: condition.to_owned(),
            });
        }
        rt.log_line(&format!(
            "[retry] attempt {attempts} did not satisfy: {condition}"
        ));
        tokio::time::sleep(Duration::from_millis(rt.config.retry_interval_ms))
            .await;
        effective.restore_from(snapshot.copy());
    }
}

fn log_exchange(rt: &mut ScenarioRuntime, verb: &str, url: &str, status: u16) {
    let verb = verb.to_ascii_uppercase();
    tracing::info!(target: "http", "{verb} {url} -> {status}");
    rt.log_line(&format!("[http] {verb} {url} -> {status}"));
}

/// `multipart file name = {…}` (and `multipart field name = expr`).
pub(crate) fn multipart_file(
    rt: &mut ScenarioRuntime,
    rest: &str,
    is_field: bool,
) -> Result<(), StepError> {
    let (name, rhs) = split_assign(rest).ok_or_else(|| {
        StepError::Parse(format!("multipart needs an assignment: {rest}"))
    })?;
    let value = rt.resolve_value(rhs)?;
    let part = match value {
        Value::Map(spec) => part_from_spec(rt, name, &spec)?,
        direct if is_field => MultiPart {
            name: name.to_owned(),
            value: direct,
            ..MultiPart::default()
        },
        other => {
            return Err(StepError::Parse(format!(
                "multipart file expects a map, got {}",
                other.type_of(),
            )));
        }
    };
    rt.builder.multiparts.push(part);
    Ok(())
}

/// `multipart files {…}`: a map of part name → part spec.
pub(crate) fn multipart_files(
    rt: &mut ScenarioRuntime,
    rest: &str,
) -> Result<(), StepError> {
    let map = resolve_map(rt, rest, "multipart files")?;
    for (name, value) in &map {
        let Value::Map(spec) = value else {
            return Err(StepError::Parse(format!(
                "multipart files entry {name} must be a map"
            )));
        };
        let part = part_from_spec(rt, name, spec)?;
        rt.builder.multiparts.push(part);
    }
    Ok(())
}

/// `multipart fields {…}`: a map of part name → direct value.
pub(crate) fn multipart_fields(
    rt: &mut ScenarioRuntime,
    rest: &str,
) -> Result<(), StepError> {
    let map = resolve_map(rt, rest, "multipart fields")?;
    for (name, value) in &map {
        rt.builder.multiparts.push(MultiPart {
            name: name.clone(),
            value: value.clone(),
            ..MultiPart::default()
        });
    }
    Ok(())
}

/// `multipart entity expr`: a single unnamed part carrying the whole
/// payload.
pub(crate) fn multipart_entity(
    rt: &mut ScenarioRuntime,
    rest: &str,
) -> Result<(), StepError> {
    let value = rt.resolve_value(rest)?;
    rt.builder.multiparts.push(MultiPart {
        name: "entity".into(),
        value,
        ..MultiPart::default()
    });
    Ok(())
}

/// Builds a part from a `{value | read, filename, contentType, charset,
/// transferEncoding}` spec map.
fn part_from_spec(
    rt: &mut ScenarioRuntime,
    name: &str,
    spec: &crate::value::Map,
) -> Result<MultiPart, StepError> {
    let mut part = MultiPart { name: name.to_owned(), ..MultiPart::default() };
    if let Some(Value::String(path)) = spec.get("read") {
        part.value = Value::Bytes(rt.loader.read_bytes(path)?);
        if part.filename.is_none() {
            part.filename = std::path::Path::new(path)
                .file_name()
                .map(|f| f.to_string_lossy().into_owned());
        }
    } else if let Some(v) = spec.get("value") {
        part.value = v.clone();
    }
    if let Some(v) = spec.get("filename") {
        part.filename = Some(v.display_string());
    }
    if let Some(v) = spec.get("contentType") {
        part.content_type = Some(v.display_string());
    }
    if let Some(v) = spec.get("charset") {
        part.charset = Some(v.display_string());
    }
    if let Some(v) = spec.get("transferEncoding") {
        part.transfer_encoding = Some(v.display_string());
    }
    Ok(part)
}

fn resolve_map(
    rt: &mut ScenarioRuntime,
    rest: &str,
    what: &str,
) -> Result<crate::value::Map, StepError> {
    match rt.resolve_value(rest)? {
        Value::Map(m) => Ok(m),
        other => Err(StepError::Parse(format!(
            "{what} expects a map, got {}",
            other.type_of(),
        ))),
    }
}

fn push_multi(target: &mut Vec<(String, String)>, name: &str, value: &Value) {
    match value {
        Value::Null => {}
        Value::List(items) => {
            for item in items {
                target.push((name.to_owned(), item.display_string()));
            }
        }
        other => target.push((name.to_owned(), other.display_string())),
    }
}
