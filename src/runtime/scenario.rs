// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Scenario runtime: owns the script engine, variable table, HTTP builder,
//! configuration and per-step buffers, and drives the step loop.

use std::{sync::Arc, time::Instant};

use rhai::Dynamic;
use tracing::debug;

use super::{FeatureState, SuiteCtx};
use crate::{
    config::Config,
    embed,
    engine::{self, ScriptEngine, Vars},
    error::StepError,
    http::{self, HttpRequestBuilder, HttpResponse},
    resolve::{self, Resolved},
    resource::ResourceLoader,
    result::{Embed, FeatureResult, StepResult, StepStatus},
    step,
    value::{Map, Value},
    xml::XmlNode,
};

/// Everything one scenario execution owns.
pub struct ScenarioRuntime {
    /// Script engine, one per scenario, never shared across threads.
    pub engine: ScriptEngine,

    /// Variable table.
    pub vars: Vars,

    /// Accumulating HTTP request state.
    pub builder: HttpRequestBuilder,

    /// Active configuration.
    pub config: Config,

    /// Suite-wide context.
    pub suite: Arc<SuiteCtx>,

    /// Resource loader rooted at the feature's directory.
    pub loader: ResourceLoader,

    /// Calling feature's shared state (callonce cache).
    pub feature_state: Arc<FeatureState>,

    /// Nesting depth of feature calls.
    pub depth: usize,

    /// Per-step log buffer, drained into each [`StepResult`].
    pub log: String,

    /// Per-step attachments.
    pub embeds: Vec<Embed>,

    /// Results of features called during the current step.
    pub call_results: Vec<FeatureResult>,
}

impl ScenarioRuntime {
    /// Builds a runtime: registers `read(...)` and seeds the hidden builtin
    /// object.
    #[must_use]
    pub fn new(
        suite: Arc<SuiteCtx>,
        loader: ResourceLoader,
        feature_state: Arc<FeatureState>,
        depth: usize,
    ) -> Self {
        let mut engine = ScriptEngine::new();
        {
            let loader = loader.clone();
            engine.engine_mut().register_fn(
                "read",
                move |spec: &str| -> Result<Dynamic, Box<rhai::EvalAltResult>> {
                    loader
                        .read(spec)
                        .map(|v| engine::to_dynamic(&v))
                        .map_err(|e| e.to_string().into())
                },
            );
        }

        let mut vars = Vars::new();
        let mut builtin = Map::new();
        builtin.insert(
            "env".into(),
            suite
                .env
                .clone()
                .map_or(Value::Null, Value::String),
        );
        builtin.insert(
            "os".into(),
            Value::String(std::env::consts::OS.to_owned()),
        );
        builtin.insert(
            "properties".into(),
            Value::Map(suite.system_properties.clone()),
        );
        vars.put_hidden("relish", Value::Map(builtin));

        Self {
            engine,
            vars,
            builder: HttpRequestBuilder::default(),
            config: Config::default(),
            suite,
            loader,
            feature_state,
            depth,
            log: String::new(),
            embeds: Vec::new(),
            call_results: Vec::new(),
        }
    }

    /// Evaluates a script expression against the current scope.
    ///
    /// # Errors
    ///
    /// [`StepError::Eval`] if the engine raises.
    pub fn eval(&mut self, source: &str) -> Result<Value, StepError> {
        self.engine.eval(source, &mut self.vars)
    }

    /// Resolves an expression (§classification) against the current scope.
    ///
    /// # Errors
    ///
    /// As [`resolve::resolve`].
    pub fn resolve(&mut self, raw: &str) -> Result<Resolved, StepError> {
        resolve::resolve(self, raw)
    }

    /// Resolves an expression, collapsing "not present" to null.
    ///
    /// # Errors
    ///
    /// As [`resolve::resolve`].
    pub fn resolve_value(&mut self, raw: &str) -> Result<Value, StepError> {
        resolve::resolve_value(self, raw)
    }

    /// Applies embedded expansion to a value tree.
    pub fn expand(&mut self, value: &mut Value) {
        let engine = &self.engine;
        let vars = &mut self.vars;
        let mut eval =
            |expr: &str| -> Result<Value, StepError> { engine.eval(expr, vars) };
        embed::expand(value, &mut eval);
    }

    /// Applies embedded expansion to an XML tree.
    pub fn expand_xml(&mut self, node: &mut XmlNode) {
        let engine = &self.engine;
        let vars = &mut self.vars;
        let mut eval =
            |expr: &str| -> Result<Value, StepError> { engine.eval(expr, vars) };
        embed::expand_xml(node, &mut eval);
    }

    /// Appends a line to the per-step log.
    pub fn log_line(&mut self, line: &str) {
        self.log.push_str(line);
        self.log.push('\n');
    }

    /// Evaluates the suite configuration scripts (base, then environment
    /// override), merging their result maps into the scope.
    ///
    /// # Errors
    ///
    /// If a configuration script fails to evaluate.
    pub fn apply_config_scripts(&mut self) -> Result<(), StepError> {
        let scripts = [
            self.suite.config_script.clone(),
            self.suite.config_env_script.clone(),
        ];
        for script in scripts.into_iter().flatten() {
            let value = self.eval(&script)?;
            if let Value::Map(m) = value {
                for (k, v) in m {
                    self.vars.put(k, v);
                }
            }
        }
        Ok(())
    }

    /// Publishes response variables after an HTTP invocation: visible
    /// (`response`, `responseStatus`, `responseHeaders`, `responseTime`)
    /// and hidden (`responseBytes`, `responseCookies`, `responseType`,
    /// `requestTimeStamp`).
    pub fn install_response(&mut self, response: &HttpResponse) {
        self.vars.put("response", response.body_converted());
        self.vars
            .put("responseStatus", Value::Int(i64::from(response.status)));
        self.vars
            .put("responseHeaders", response.headers_value());
        self.vars.put(
            "responseTime",
            Value::Int(response.response_time_ms as i64),
        );
        self.vars
            .put_hidden("responseBytes", Value::Bytes(response.body.to_vec()));
        self.vars
            .put_hidden("responseCookies", Value::Map(response.cookies()));
        self.vars.put_hidden(
            "responseType",
            Value::String(response.response_type().to_owned()),
        );
        self.vars.put_hidden(
            "requestTimeStamp",
            Value::Int(response.start_time_ms as i64),
        );
    }

    /// Executes one step, capturing status, timing, log and attachments.
    pub async fn exec_step(&mut self, step: &gherkin::Step) -> StepResult {
        let (keyword, text) = step::display_parts(&step.value);
        let line = step.position.line;

        if self.suite.dry_run {
            return StepResult::skipped(keyword, text, line);
        }

        debug!(target: "step", line, "{}", step.value);
        let start_wall = http::wall_now_ms();
        let started = Instant::now();
        let outcome = step::execute(self, step).await;
        let duration_nanos = started.elapsed().as_nanos() as u64;

        let (status, error) = match outcome {
            Ok(()) => (StepStatus::Passed, None),
            Err(e) => (StepStatus::Failed, Some(e.to_string())),
        };
        StepResult {
            keyword: keyword.to_owned(),
            text: text.to_owned(),
            line,
            status,
            start_wall_ms: start_wall,
            duration_nanos,
            error,
            log: std::mem::take(&mut self.log),
            embeds: std::mem::take(&mut self.embeds),
            call_results: std::mem::take(&mut self.call_results),
        }
    }
}
