// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Mock request router.
//!
//! Inbound requests bind to scenario scope; scenario descriptions act as
//! matcher predicates, evaluated in declaration order under a single
//! handler lock. The first `true` wins, an empty description is a
//! catch-all, and the matched scenario's `response*` variables synthesize
//! the reply.

mod server;

pub use server::MockServer;

use std::{path::PathBuf, sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use rhai::Dynamic;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    config::Config,
    engine::{self, Vars},
    error::{Error, Result, StepError},
    feature::Feature,
    http::HttpResponse,
    resource::ResourceLoader,
    result::StepStatus,
    runtime::{FeatureState, ScenarioRuntime, SuiteCtx},
    value::{Map, Value},
    xml,
};

/// Variables owned by the request/response machinery, never written back
/// into the shared globals.
const RESERVED: &[&str] = &[
    "request",
    "requestBytes",
    "requestHeaders",
    "requestMethod",
    "requestPath",
    "requestUri",
    "requestUrlBase",
    "requestParams",
    "requestParts",
    "requestTimeStamp",
    "response",
    "responseStatus",
    "responseHeaders",
    "responseDelay",
    "responseTime",
    "responseBytes",
    "responseCookies",
    "responseType",
    "pathParams",
];

/// Methods advertised on CORS preflights.
const CORS_METHODS: &str = "GET, HEAD, POST, PUT, DELETE, PATCH, OPTIONS";

/// An inbound request, decoded by the HTTP front-end.
#[derive(Clone, Debug, Default)]
pub struct MockRequest {
    /// Uppercased method.
    pub method: String,

    /// Decoded path, query excluded.
    pub path: String,

    /// Path plus query string, as received.
    pub path_raw: String,

    /// `scheme://host[:port]` of the request.
    pub url_base: String,

    /// Headers in wire order.
    pub headers: Vec<(String, String)>,

    /// Query and form parameters, name → values.
    pub params: Vec<(String, Vec<String>)>,

    /// Multipart parts, name → `{value, filename, contentType}`.
    pub parts: Map,

    /// Raw body.
    pub body: Bytes,
}

impl MockRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.as_str() == name)
            .and_then(|(_, v)| v.first())
            .map(String::as_str)
    }

    /// Body converted by shape: JSON, XML, form fields as a map, UTF-8
    /// text, or raw bytes.
    fn body_value(&self) -> Value {
        if self.body.is_empty() {
            return Value::Null;
        }
        let content_type =
            self.header("content-type").unwrap_or_default().to_owned();
        if content_type.contains("application/x-www-form-urlencoded") {
            let mut m = Map::new();
            for (k, vs) in &self.params {
                if let Some(v) = vs.first() {
                    m.insert(k.clone(), Value::String(v.clone()));
                }
            }
            return Value::Map(m);
        }
        let Ok(text) = std::str::from_utf8(&self.body) else {
            return Value::Bytes(self.body.to_vec());
        };
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(v) = Value::parse_json(trimmed) {
                return v;
            }
        }
        if trimmed.starts_with('<') {
            if let Ok(node) = xml::parse(trimmed) {
                return Value::Xml(node);
            }
        }
        Value::String(text.to_owned())
    }
}

/// The synthesized reply.
#[derive(Clone, Debug)]
pub struct MockResponse {
    /// Status code.
    pub status: u16,

    /// Headers to send.
    pub headers: Vec<(String, String)>,

    /// Body bytes.
    pub body: Bytes,
}

impl MockResponse {
    fn json_error(status: u16, message: &str) -> Self {
        Self {
            status,
            headers: vec![(
                "Content-Type".into(),
                "application/json".into(),
            )],
            body: Bytes::from(
                serde_json::json!({ "error": message }).to_string(),
            ),
        }
    }
}

/// Mutable handler state, guarded by the single handler lock.
struct MockState {
    globals: Vars,
    config: Config,
}

/// One mock endpoint: features whose scenarios answer requests.
pub struct MockHandler {
    features: Vec<(Feature, ResourceLoader)>,
    state: Mutex<MockState>,
    prefix: Option<String>,
    suite: Arc<SuiteCtx>,
}

impl MockHandler {
    /// Loads the features and runs every background once to populate the
    /// shared globals (and the mock configuration).
    ///
    /// # Errors
    ///
    /// On parse failure or a failing background step.
    pub async fn new(
        paths: &[PathBuf],
        prefix: Option<String>,
    ) -> Result<Self> {
        let suite = Arc::new(SuiteCtx::minimal());
        let mut features = Vec::new();
        let mut globals = Vars::new();
        let mut config = Config::default();

        for path in paths {
            let feature = Feature::parse_path(path)?;
            let loader = ResourceLoader::for_feature(&feature.path);

            let mut rt = ScenarioRuntime::new(
                Arc::clone(&suite),
                loader.clone(),
                Arc::new(FeatureState::new()),
                0,
            );
            rt.vars.absorb(globals);
            rt.config = config;
            for step in &feature.background {
                let result = rt.exec_step(step).await;
                if result.status == StepStatus::Failed {
                    return Err(Error::Config(format!(
                        "mock background failed in {}: {}",
                        path.display(),
                        result.error.unwrap_or_default(),
                    )));
                }
            }
            globals = std::mem::take(&mut rt.vars);
            config = rt.config;

            features.push((feature, loader));
        }

        Ok(Self {
            features,
            state: Mutex::new(MockState { globals, config }),
            prefix,
            suite,
        })
    }

    /// Routes one request: predicate dispatch in declaration order under
    /// the handler lock.
    pub async fn handle(&self, request: MockRequest) -> MockResponse {
        // The lock is the single-threaded mock guarantee.
        let mut state = self.state.lock().await;

        if state.config.cors && request.method == "OPTIONS" {
            return cors_preflight(&request);
        }

        let mut request = request;
        if let Some(prefix) = &self.prefix {
            if let Some(stripped) = request.path.strip_prefix(prefix.as_str())
            {
                request.path = if stripped.is_empty() {
                    "/".into()
                } else {
                    stripped.to_owned()
                };
            }
        }

        let cors = state.config.cors;
        let ctx = Arc::new(RequestCtx {
            request,
            path_params: SyncMutex::new(Map::new()),
        });

        for (feature, loader) in &self.features {
            for scenario in &feature.scenarios {
                if scenario.from_outline {
                    warn!(
                        "mock scenarios cannot be outlines, skipping {}:{}",
                        feature.path.display(),
                        scenario.line,
                    );
                    continue;
                }

                let mut rt = ScenarioRuntime::new(
                    Arc::clone(&self.suite),
                    loader.clone(),
                    Arc::new(FeatureState::new()),
                    0,
                );
                rt.config = state.config.clone();
                seed_scope(&mut rt, &state.globals, &ctx);
                register_helpers(&mut rt, &ctx);

                let predicate = scenario.name_and_description();
                let matched = if predicate.trim().is_empty() {
                    true
                } else {
                    match rt.eval(&predicate) {
                        Ok(v) => v.is_truthy(),
                        Err(e) => {
                            debug!(
                                "mock predicate failed ({predicate}): {e}"
                            );
                            false
                        }
                    }
                };
                if !matched {
                    continue;
                }

                rt.vars.put(
                    "pathParams",
                    Value::Map(ctx.path_params.lock().clone()),
                );

                for step in &scenario.steps {
                    let result = rt.exec_step(step).await;
                    if result.status == StepStatus::Failed {
                        return MockResponse::json_error(
                            500,
                            &result.error.unwrap_or_default(),
                        );
                    }
                }

                if let Some(hook) = rt.config.after_scenario.clone() {
                    if let Err(e) = rt.engine.call(&hook, Vec::new()) {
                        warn!("afterScenario hook failed: {e}");
                    }
                }

                // Scenario-written variables persist into the globals.
                for (k, v) in rt.vars.snapshot() {
                    if !RESERVED.contains(&k.as_str()) {
                        state.globals.put(k, v);
                    }
                }
                state.config = rt.config.clone();

                return synthesize(&mut rt, cors).await;
            }
        }

        MockResponse::json_error(404, "no matching scenario")
    }
}

/// Per-request context the matcher helpers close over.
struct RequestCtx {
    request: MockRequest,
    path_params: SyncMutex<Map>,
}

fn cors_preflight(request: &MockRequest) -> MockResponse {
    let mut headers = vec![
        ("Access-Control-Allow-Methods".to_owned(), CORS_METHODS.to_owned()),
        ("Access-Control-Allow-Origin".to_owned(), "*".to_owned()),
    ];
    if let Some(requested) = request.header("access-control-request-headers")
    {
        headers.push((
            "Access-Control-Allow-Headers".to_owned(),
            requested.to_owned(),
        ));
    }
    MockResponse { status: 200, headers, body: Bytes::new() }
}

/// Step 6 of request handling: globals, request-side variables, then
/// response-side defaults.
fn seed_scope(rt: &mut ScenarioRuntime, globals: &Vars, ctx: &RequestCtx) {
    for (k, v) in globals.iter() {
        if globals.is_hidden(k) {
            rt.vars.put_hidden(k.clone(), v.clone());
        } else {
            rt.vars.put(k.clone(), v.clone());
        }
    }

    let request = &ctx.request;
    rt.vars.put("request", request.body_value());
    rt.vars
        .put("requestBytes", Value::Bytes(request.body.to_vec()));
    rt.vars
        .put("requestPath", Value::String(request.path.clone()));
    rt.vars
        .put("requestUri", Value::String(request.path_raw.clone()));
    rt.vars
        .put("requestUrlBase", Value::String(request.url_base.clone()));
    rt.vars
        .put("requestMethod", Value::String(request.method.clone()));

    let mut headers = Map::new();
    for (k, v) in &request.headers {
        match headers.get_mut(k) {
            Some(Value::List(items)) => {
                items.push(Value::String(v.clone()));
            }
            _ => {
                headers.insert(
                    k.clone(),
                    Value::List(vec![Value::String(v.clone())]),
                );
            }
        }
    }
    rt.vars.put("requestHeaders", Value::Map(headers));

    let mut params = Map::new();
    for (k, vs) in &request.params {
        params.insert(
            k.clone(),
            Value::List(
                vs.iter().map(|v| Value::String(v.clone())).collect(),
            ),
        );
    }
    rt.vars.put("requestParams", Value::Map(params));
    rt.vars.put("requestParts", Value::Map(request.parts.clone()));

    rt.vars.put("response", Value::Null);
    rt.vars.put("responseStatus", Value::Int(200));
    rt.vars.put("responseHeaders", Value::Map(Map::new()));
    rt.vars.put("responseDelay", Value::Int(0));
    rt.vars.put("pathParams", Value::Map(Map::new()));
}

/// Registers the matcher helper functions over the current request.
fn register_helpers(rt: &mut ScenarioRuntime, ctx: &Arc<RequestCtx>) {
    let engine = rt.engine.engine_mut();

    {
        let ctx = Arc::clone(ctx);
        engine.register_fn("pathMatches", move |pattern: &str| {
            match match_path(&ctx.request.path, pattern) {
                Some(captures) => {
                    *ctx.path_params.lock() = captures;
                    true
                }
                None => false,
            }
        });
    }
    {
        let ctx = Arc::clone(ctx);
        engine.register_fn("methodIs", move |m: &str| {
            ctx.request.method.eq_ignore_ascii_case(m)
        });
    }
    {
        let ctx = Arc::clone(ctx);
        engine.register_fn("typeContains", move |s: &str| {
            ctx.request
                .header("content-type")
                .is_some_and(|v| v.contains(s))
        });
    }
    {
        let ctx = Arc::clone(ctx);
        engine.register_fn("acceptContains", move |s: &str| {
            ctx.request
                .header("accept")
                .is_some_and(|v| v.contains(s))
        });
    }
    {
        let ctx = Arc::clone(ctx);
        engine.register_fn(
            "headerContains",
            move |name: &str, value: &str| {
                ctx.request
                    .header(name)
                    .is_some_and(|v| v.contains(value))
            },
        );
    }
    {
        let ctx = Arc::clone(ctx);
        engine.register_fn("paramValue", move |name: &str| -> Dynamic {
            ctx.request
                .param(name)
                .map_or(Dynamic::UNIT, |v| v.to_owned().into())
        });
    }
    {
        let ctx = Arc::clone(ctx);
        engine.register_fn("paramExists", move |name: &str| {
            ctx.request.param(name).is_some()
        });
    }
    {
        let ctx = Arc::clone(ctx);
        engine.register_fn("bodyPath", move |path: &str| -> Dynamic {
            let body = ctx.request.body_value();
            let found = if path.starts_with('/') {
                match &body {
                    Value::Xml(node) => {
                        xml::select(node, path).ok().flatten()
                    }
                    _ => None,
                }
            } else {
                crate::json::select(&body, path).ok().flatten()
            };
            found.map_or(Dynamic::UNIT, |v| engine::to_dynamic(&v))
        });
    }
    {
        let ctx = Arc::clone(ctx);
        engine.register_fn(
            "proceed",
            move |url: &str| -> std::result::Result<Dynamic, Box<rhai::EvalAltResult>> {
                forward(&ctx.request, url)
                    .map(|r| engine::to_dynamic(&Value::Response(Box::new(r))))
                    .map_err(|e| e.to_string().into())
            },
        );
    }
}

/// `pathMatches` with `{param}` captures.
fn match_path(actual: &str, pattern: &str) -> Option<Map> {
    let actual: Vec<&str> =
        actual.split('/').filter(|s| !s.is_empty()).collect();
    let pattern: Vec<&str> =
        pattern.split('/').filter(|s| !s.is_empty()).collect();
    if actual.len() != pattern.len() {
        return None;
    }
    let mut captures = Map::new();
    for (a, p) in actual.iter().zip(&pattern) {
        if let Some(name) =
            p.strip_prefix('{').and_then(|s| s.strip_suffix('}'))
        {
            captures.insert(name.to_owned(), Value::String((*a).to_owned()));
        } else if a != p {
            return None;
        }
    }
    Some(captures)
}

/// Proxy pass-through: forwards the inbound request to `url` on a scoped
/// thread with a blocking client, yielding a complete response object.
fn forward(request: &MockRequest, url: &str) -> std::result::Result<HttpResponse, StepError> {
    let method = request.method.clone();
    let target = format!("{}{}", url.trim_end_matches('/'), request.path_raw);
    let headers = request.headers.clone();
    let body = request.body.to_vec();

    std::thread::scope(|scope| {
        scope
            .spawn(move || -> std::result::Result<HttpResponse, StepError> {
                let client = reqwest::blocking::Client::builder()
                    .timeout(Duration::from_secs(30))
                    .build()
                    .map_err(|e| StepError::Http(e.to_string()))?;
                let method =
                    reqwest::Method::from_bytes(method.as_bytes())
                        .map_err(|_| {
                            StepError::Parse(format!(
                                "invalid method: {method}"
                            ))
                        })?;
                let mut req = client.request(method, &target);
                for (k, v) in &headers {
                    if !k.eq_ignore_ascii_case("host") {
                        req = req.header(k.as_str(), v.as_str());
                    }
                }
                if !body.is_empty() {
                    req = req.body(body);
                }
                let started = std::time::Instant::now();
                let start_wall = crate::http::wall_now_ms();
                let response =
                    req.send().map_err(|e| StepError::Http(e.to_string()))?;
                let status = response.status().as_u16();
                let headers = response
                    .headers()
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.as_str().to_owned(),
                            String::from_utf8_lossy(v.as_bytes())
                                .into_owned(),
                        )
                    })
                    .collect();
                let bytes = response
                    .bytes()
                    .map_err(|e| StepError::Http(e.to_string()))?;
                Ok(HttpResponse {
                    status,
                    headers,
                    body: bytes,
                    response_time_ms: started.elapsed().as_millis() as u64,
                    start_time_ms: start_wall,
                    request: None,
                })
            })
            .join()
            .unwrap_or_else(|_| {
                Err(StepError::Http("proceed thread panicked".into()))
            })
    })
}

/// Step 10: builds the reply from the scenario's response variables.
async fn synthesize(rt: &mut ScenarioRuntime, cors: bool) -> MockResponse {
    let delay = match rt.vars.get("responseDelay") {
        Some(Value::Int(ms)) if *ms > 0 => *ms as u64,
        _ => 0,
    };

    let response_var =
        rt.vars.get("response").cloned().unwrap_or(Value::Null);

    // Pass-through: the scenario yielded a complete response object.
    let mut out = if let Value::Response(upstream) = response_var {
        MockResponse {
            status: upstream.status,
            headers: upstream.headers.clone(),
            body: upstream.body.clone(),
        }
    } else {
        let status = match rt.vars.get("responseStatus") {
            Some(Value::Int(s)) if (100..=599).contains(s) => *s as u16,
            _ => 200,
        };

        let mut headers: Vec<(String, String)> = Vec::new();
        let configured = rt.config.response_headers.clone();
        let configured = match configured {
            Some(Value::Callable(c)) => {
                rt.engine.call(&c, Vec::new()).ok()
            }
            other => other,
        };
        if let Some(Value::Map(m)) = configured {
            append_headers(&mut headers, &m);
        }
        if let Some(Value::Map(m)) =
            rt.vars.get("responseHeaders").cloned()
        {
            append_headers(&mut headers, &m);
        }

        let (body, implied_type): (Bytes, Option<&str>) = match &response_var
        {
            Value::Null => (Bytes::new(), None),
            Value::Map(_) | Value::List(_) => (
                Bytes::from(response_var.to_json_string()),
                Some("application/json"),
            ),
            Value::Xml(node) => {
                (Bytes::from(node.serialize()), Some("application/xml"))
            }
            Value::String(s) => {
                (Bytes::from(s.clone()), Some("text/plain"))
            }
            Value::Bytes(b) => (
                Bytes::from(b.clone()),
                Some("application/octet-stream"),
            ),
            other => (
                Bytes::from(other.display_string()),
                Some("text/plain"),
            ),
        };
        let has_content_type = headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
        if let (false, Some(ct)) = (has_content_type, implied_type) {
            headers.push(("Content-Type".into(), ct.into()));
        }
        MockResponse { status, headers, body }
    };

    if cors {
        out.headers
            .push(("Access-Control-Allow-Origin".into(), "*".into()));
    }

    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    out
}

fn append_headers(target: &mut Vec<(String, String)>, map: &Map) {
    for (k, v) in map {
        target.retain(|(name, _)| !name.eq_ignore_ascii_case(k));
        match v {
            Value::Null => {}
            Value::List(items) => {
                for item in items {
                    target.push((k.clone(), item.display_string()));
                }
            }
            other => target.push((k.clone(), other.display_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_matching_with_captures() {
        assert_eq!(match_path("/cats", "/cats"), Some(Map::new()));
        assert!(match_path("/cats", "/dogs").is_none());
        assert!(match_path("/cats/1/kittens", "/cats/{id}").is_none());

        let captures = match_path("/cats/42", "/cats/{id}").unwrap();
        assert_eq!(captures.get("id"), Some(&Value::String("42".into())));
    }

    #[test]
    fn form_bodies_become_maps() {
        let request = MockRequest {
            headers: vec![(
                "content-type".into(),
                "application/x-www-form-urlencoded".into(),
            )],
            params: vec![("name".into(), vec!["Billie".into()])],
            body: Bytes::from_static(b"name=Billie"),
            ..MockRequest::default()
        };
        let Value::Map(m) = request.body_value() else {
            panic!("expected map body");
        };
        assert_eq!(m.get("name"), Some(&Value::String("Billie".into())));
    }

    #[test]
    fn preflight_echoes_requested_headers() {
        let request = MockRequest {
            method: "OPTIONS".into(),
            headers: vec![(
                "Access-Control-Request-Headers".into(),
                "X-Custom".into(),
            )],
            ..MockRequest::default()
        };
        let response = cors_preflight(&request);
        assert_eq!(response.status, 200);
        assert!(response.headers.iter().any(|(k, v)| {
            k == "Access-Control-Allow-Headers" && v == "X-Custom"
        }));
        assert!(response.headers.iter().any(|(k, v)| {
            k == "Access-Control-Allow-Methods" && v == CORS_METHODS
        }));
    }
}
