// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Feature runtime: scenario loop, scope inheritance for nested calls, and
//! the per-feature callonce cache.

use std::{collections::HashMap, sync::Arc, time::Instant};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::warn;

use super::{ScenarioRuntime, SuiteCtx};
use crate::{
    config::Config,
    engine::Vars,
    error::StepError,
    event::Listeners,
    feature::{Feature, Scenario},
    http,
    resource::ResourceLoader,
    result::{
        FeatureResult, ScenarioResult, StepResult, StepStatus,
    },
    tag::{self, TagSelector},
    value::{FeatureRef, Value},
};

/// Feature calls deeper than this are assumed to be cyclic.
const MAX_CALL_DEPTH: usize = 32;

/// Per-feature shared state: the callonce cache keyed by verbatim call
/// text.
///
/// Lookups take the read-locked fast path; the owning executor of a miss
/// re-checks under the async lock before evaluating. Entries deep-copy on
/// store and on retrieval, so no scenario can corrupt another's view.
#[derive(Debug, Default)]
pub struct FeatureState {
    cache: RwLock<HashMap<String, Value>>,

    /// Serializes cache-miss evaluation.
    pub lock: Mutex<()>,
}

impl FeatureState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fast-path lookup; the returned value is a distinct deep copy.
    #[must_use]
    pub fn cached(&self, key: &str) -> Option<Value> {
        self.cache.read().get(key).cloned()
    }

    /// Stores a deep copy of `value` under the verbatim call text.
    pub fn store(&self, key: &str, value: &Value) {
        self.cache.write().insert(key.to_owned(), value.clone());
    }
}

/// What a feature call produced.
#[derive(Debug)]
pub struct CallOutcome {
    /// The callee's final variable table.
    pub vars: Vars,

    /// The callee's final configuration (adopted by shared callers).
    pub config: Config,

    /// Isolated result: the final scenario's exported scope as a map.
    pub result: Value,

    /// Report of the nested run.
    pub feature_result: FeatureResult,
}

/// Executes a called feature.
///
/// The caller decides the scope mode through `seed_vars`: its live table
/// for a shared call, a deep copy of its exportable scope for an isolated
/// one. Scenarios of the called feature run sequentially, scope carrying
/// over from one to the next; the last scenario's scope is the result. A
/// step failure aborts the call and surfaces as the caller's step failure.
pub fn run_feature_call(
    suite: Arc<SuiteCtx>,
    fref: FeatureRef,
    seed_vars: Vars,
    config: Config,
    depth: usize,
) -> BoxFuture<'static, Result<CallOutcome, StepError>> {
    Box::pin(async move {
        if depth > MAX_CALL_DEPTH {
            return Err(StepError::Eval(format!(
                "feature call depth exceeded {MAX_CALL_DEPTH}, \
                 cyclic call of {}?",
                fref.path.display(),
            )));
        }
        let feature = Feature::parse_path(&fref.path)
            .map_err(|e| StepError::Resource(e.to_string()))?;
        let loader = ResourceLoader::for_feature(&feature.path);
        let state = Arc::new(FeatureState::new());

        let selected: Vec<Scenario> = match &fref.tag {
            Some(t) => feature
                .scenarios_tagged(t)
                .into_iter()
                .cloned()
                .collect(),
            None => feature.scenarios.clone(),
        };
        if selected.is_empty() {
            return Err(StepError::Eval(format!(
                "no scenarios selected in called feature {}",
                fref.path.display(),
            )));
        }

        let mut vars = seed_vars;
        let mut config = config;
        let mut scenario_results = Vec::new();
        for scenario in &selected {
            let mut rt = ScenarioRuntime::new(
                Arc::clone(&suite),
                loader.clone(),
                Arc::clone(&state),
                depth,
            );
            rt.vars.absorb(std::mem::take(&mut vars));
            rt.config = config;

            let result = run_scenario_steps(
                &mut rt,
                scenario,
                &feature.background,
                None,
                "call",
            )
            .await;
            vars = std::mem::take(&mut rt.vars);
            config = rt.config;

            let failed = result
                .steps
                .iter()
                .find(|s| s.status == StepStatus::Failed)
                .and_then(|s| s.error.clone());
            scenario_results.push(result);
            if let Some(error) = failed {
                return Err(StepError::Eval(format!(
                    "called feature failed: {}: {error}",
                    fref.path.display(),
                )));
            }
        }

        // The final scope map: isolated callers store it, and a shared
        // `callonce` caches it for later key spreading.
        let result = Value::Map(vars.snapshot());
        Ok(CallOutcome {
            vars,
            config,
            result,
            feature_result: FeatureResult {
                path: feature.path.to_string_lossy().into_owned(),
                name: feature.name.clone(),
                scenarios: scenario_results,
            },
        })
    })
}

/// Runs background plus scenario steps sequentially; after the first
/// failure every remaining step reports skipped.
pub(crate) async fn run_scenario_steps(
    rt: &mut ScenarioRuntime,
    scenario: &Scenario,
    background: &[gherkin::Step],
    listeners: Option<&Listeners>,
    thread_name: &str,
) -> ScenarioResult {
    let start_wall = http::wall_now_ms();
    let started = Instant::now();

    let mut steps = Vec::new();
    let mut failed = false;
    for step in background.iter().chain(scenario.steps.iter()) {
        if failed {
            let (keyword, text) = crate::step::display_parts(&step.value);
            steps.push(StepResult::skipped(keyword, text, step.position.line));
            continue;
        }
        if let Some(l) = listeners {
            if !l.step_enter(scenario, step) {
                let (keyword, text) = crate::step::display_parts(&step.value);
                steps.push(StepResult::skipped(
                    keyword,
                    text,
                    step.position.line,
                ));
                continue;
            }
        }
        let result = rt.exec_step(step).await;
        failed = result.status == StepStatus::Failed;
        if let Some(l) = listeners {
            l.step_exit(scenario, &result);
        }
        steps.push(result);
    }

    // The after-scenario hook runs outside step accounting; its failures
    // are logged and ignored.
    if let Some(hook) = rt.config.after_scenario.clone() {
        if let Err(e) = rt.engine.call(&hook, Vec::new()) {
            warn!("afterScenario hook failed: {e}");
        }
    }

    ScenarioResult {
        name: scenario.name.clone(),
        line: scenario.line,
        sort_key: scenario.sort_key(),
        thread_name: thread_name.to_owned(),
        start_wall_ms: start_wall,
        end_wall_ms: http::wall_now_ms(),
        duration_nanos: started.elapsed().as_nanos() as u64,
        steps,
    }
}

/// Executes one top-level feature: tag filtering, scenario loop, event
/// fan-out.
pub struct FeatureRuntime {
    /// The feature under execution.
    pub feature: Arc<Feature>,

    /// Suite-wide context.
    pub suite: Arc<SuiteCtx>,

    /// Shared per-feature state (callonce cache).
    pub state: Arc<FeatureState>,
}

impl FeatureRuntime {
    /// Creates a runtime for one feature.
    #[must_use]
    pub fn new(feature: Arc<Feature>, suite: Arc<SuiteCtx>) -> Self {
        Self { feature, suite, state: Arc::new(FeatureState::new()) }
    }

    /// Runs every selected scenario sequentially.
    ///
    /// A background-step failure fails the feature: remaining scenarios
    /// report all-skipped.
    pub async fn run(
        &self,
        listeners: &Listeners,
        selector: Option<&TagSelector>,
        thread_name: &str,
    ) -> FeatureResult {
        let loader = ResourceLoader::for_feature(&self.feature.path);
        let mut scenario_results = Vec::new();
        let mut background_failed = false;

        for scenario in &self.feature.scenarios {
            if tag::is_ignored(&scenario.tags) {
                continue;
            }
            if let Some(selector) = selector {
                match selector.eval(&scenario.tags) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        warn!("tag selector failed, skipping scenario: {e}");
                        continue;
                    }
                }
            }

            if background_failed
                || !listeners.scenario_enter(&self.feature, scenario)
            {
                scenario_results.push(skipped_scenario(
                    scenario,
                    &self.feature.background,
                    thread_name,
                ));
                continue;
            }

            let mut rt = ScenarioRuntime::new(
                Arc::clone(&self.suite),
                loader.clone(),
                Arc::clone(&self.state),
                0,
            );
            if let Err(e) = rt.apply_config_scripts() {
                scenario_results.push(config_failure(scenario, thread_name, &e));
                listeners.scenario_exit(
                    &self.feature,
                    scenario_results
                        .last()
                        .unwrap_or_else(|| unreachable!()),
                );
                continue;
            }

            let result = run_scenario_steps(
                &mut rt,
                scenario,
                &self.feature.background,
                Some(listeners),
                thread_name,
            )
            .await;

            // A failure within the background prefix poisons the feature.
            let background_len = self.feature.background.len();
            if result
                .steps
                .iter()
                .take(background_len)
                .any(|s| s.status == StepStatus::Failed)
            {
                background_failed = true;
            }

            listeners.scenario_exit(&self.feature, &result);
            scenario_results.push(result);
        }

        FeatureResult {
            path: self.feature.path.to_string_lossy().into_owned(),
            name: self.feature.name.clone(),
            scenarios: scenario_results,
        }
    }
}

fn skipped_scenario(
    scenario: &Scenario,
    background: &[gherkin::Step],
    thread_name: &str,
) -> ScenarioResult {
    let steps = background
        .iter()
        .chain(scenario.steps.iter())
        .map(|step| {
            let (keyword, text) = crate::step::display_parts(&step.value);
            StepResult::skipped(keyword, text, step.position.line)
        })
        .collect();
    ScenarioResult {
        name: scenario.name.clone(),
        line: scenario.line,
        sort_key: scenario.sort_key(),
        thread_name: thread_name.to_owned(),
        start_wall_ms: http::wall_now_ms(),
        end_wall_ms: http::wall_now_ms(),
        duration_nanos: 0,
        steps,
    }
}

fn config_failure(
    scenario: &Scenario,
    thread_name: &str,
    error: &StepError,
) -> ScenarioResult {
    let step = StepResult {
        status: StepStatus::Failed,
        error: Some(format!("configuration script failed: {error}")),
        ..StepResult::skipped("configure", "suite configuration", scenario.line)
    };
    ScenarioResult {
        name: scenario.name.clone(),
        line: scenario.line,
        sort_key: scenario.sort_key(),
        thread_name: thread_name.to_owned(),
        start_wall_ms: http::wall_now_ms(),
        end_wall_ms: http::wall_now_ms(),
        duration_nanos: 0,
        steps: vec![step],
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn cache_copies_are_independent() {
        let state = FeatureState::new();
        let original = Value::parse_json(r#"{"out":42}"#).unwrap();
        state.store("k", &original);

        let mut first = state.cached("k").unwrap();
        if let Value::Map(m) = &mut first {
            m.insert("out".into(), Value::Int(7));
        }
        // Mutating one retrieval never corrupts the cache.
        assert_eq!(state.cached("k").unwrap(), original);
    }

    #[tokio::test]
    async fn contended_cache_misses_evaluate_once() {
        let state = Arc::new(FeatureState::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let state = Arc::clone(&state);
            let executions = Arc::clone(&executions);
            tasks.push(tokio::spawn(async move {
                if state.cached("key").is_some() {
                    return;
                }
                let _guard = state.lock.lock().await;
                if state.cached("key").is_some() {
                    return;
                }
                // Simulated expensive call.
                tokio::time::sleep(std::time::Duration::from_millis(5))
                    .await;
                executions.fetch_add(1, Ordering::SeqCst);
                state.store("key", &Value::Int(1));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert_eq!(state.cached("key"), Some(Value::Int(1)));
    }
}
