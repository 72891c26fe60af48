// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Suite orchestration: discovery, configuration, tag filtering, bounded
//! parallel dispatch and result aggregation.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::{StreamExt as _, stream::FuturesUnordered};
use globwalk::GlobWalkerBuilder;
use itertools::Itertools as _;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::feature::FeatureRuntime;
use crate::{
    error::{Error, Result},
    event::{ListenerFactory, Listeners, SuiteListener},
    feature::Feature,
    http,
    result::{FeatureResult, SuiteResult, safe_file_name},
    tag::{self, TagSelector},
    value::Map,
};

/// Suite-wide context shared by every runtime.
#[derive(Debug)]
pub struct SuiteCtx {
    /// Shared HTTP client (thread-safe by contract).
    pub client: reqwest::Client,

    /// Active environment name.
    pub env: Option<String>,

    /// Report every step as skipped without executing.
    pub dry_run: bool,

    /// Base configuration script source, evaluated per scenario.
    pub config_script: Option<String>,

    /// Environment-override configuration script source.
    pub config_env_script: Option<String>,

    /// Properties exposed through the builtin object.
    pub system_properties: Map,
}

impl SuiteCtx {
    /// A bare context for tests and embedded use.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            client: reqwest::Client::new(),
            env: None,
            dry_run: false,
            config_script: None,
            config_env_script: None,
            system_properties: Map::new(),
        }
    }
}

/// A configured suite, ready to run.
pub struct Suite {
    /// Feature files or directories to discover `*.feature`s under.
    pub paths: Vec<PathBuf>,

    /// Environment name (`relish-config-<env>.rhai` overrides).
    pub env: Option<String>,

    /// Tag selector expression.
    pub tag_selector: Option<String>,

    /// Parallel worker bound.
    pub thread_count: usize,

    /// Dispatch features in parallel.
    pub parallel: bool,

    /// Report everything as skipped without executing.
    pub dry_run: bool,

    /// Explicit configuration script path; defaults to
    /// `relish-config.rhai` in the working directory.
    pub config_path: Option<PathBuf>,

    /// Where summary files land.
    pub output_dir: PathBuf,

    /// Base directory for discovery and configuration.
    pub working_dir: PathBuf,

    /// Write `relish-summary.json` and per-feature results.
    pub write_report: bool,

    /// Print the console summary at the end.
    pub output_console_summary: bool,

    /// Properties exposed through the builtin object.
    pub system_properties: Map,

    listeners: Vec<Arc<dyn SuiteListener>>,
    listener_factories: Vec<ListenerFactory>,
}

impl Default for Suite {
    fn default() -> Self {
        Self::new()
    }
}

impl Suite {
    /// A suite with defaults: sequential, current directory, no report.
    #[must_use]
    pub fn new() -> Self {
        Self {
            paths: Vec::new(),
            env: None,
            tag_selector: None,
            thread_count: 1,
            parallel: false,
            dry_run: false,
            config_path: None,
            output_dir: PathBuf::from("target/relish-reports"),
            working_dir: PathBuf::from("."),
            write_report: false,
            output_console_summary: false,
            system_properties: Map::new(),
            listeners: Vec::new(),
            listener_factories: Vec::new(),
        }
    }

    /// Adds a feature file or a directory to discover under.
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Sets the environment name.
    #[must_use]
    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    /// Sets the tag selector.
    #[must_use]
    pub fn tags(mut self, selector: impl Into<String>) -> Self {
        self.tag_selector = Some(selector.into());
        self
    }

    /// Enables parallel dispatch bounded by `count` workers.
    #[must_use]
    pub fn parallel(mut self, count: usize) -> Self {
        self.parallel = true;
        self.thread_count = count.max(1);
        self
    }

    /// Registers a suite-global listener.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn SuiteListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Registers a factory building one listener per worker.
    #[must_use]
    pub fn listener_factory(mut self, factory: ListenerFactory) -> Self {
        self.listener_factories.push(factory);
        self
    }

    /// Discovers, filters and executes all features.
    ///
    /// # Errors
    ///
    /// On discovery or configuration failure; execution failures are data
    /// in the [`SuiteResult`], not errors.
    pub async fn run(self) -> Result<SuiteResult> {
        let features = self.discover()?;
        let ctx = Arc::new(self.build_ctx()?);
        let selector = self.tag_selector.clone().map(TagSelector::new);

        let main_listeners =
            Listeners::assemble(&self.listeners, &self.listener_factories);
        main_listeners.suite_enter(&features);

        let start_wall = http::wall_now_ms();
        let mut results: Vec<FeatureResult> = Vec::new();

        if self.parallel {
            let semaphore = Arc::new(Semaphore::new(self.thread_count));
            let mut tasks = FuturesUnordered::new();
            for (index, feature) in features.iter().enumerate() {
                let feature = Arc::clone(feature);
                let ctx = Arc::clone(&ctx);
                let semaphore = Arc::clone(&semaphore);
                let selector = selector.clone();
                let global = self.listeners.clone();
                let factories = self.listener_factories.clone();
                tasks.push(tokio::spawn(async move {
                    // Closed only on shutdown, which cannot happen while
                    // tasks are still being driven.
                    let Ok(_permit) = semaphore.acquire().await else {
                        return None;
                    };
                    let listeners = Listeners::assemble(&global, &factories);
                    Some(
                        run_one(
                            feature,
                            ctx,
                            &listeners,
                            selector.as_ref(),
                            &format!("relish-{index}"),
                        )
                        .await,
                    )
                }));
            }
            // Results accumulate in completion order.
            while let Some(joined) = tasks.next().await {
                match joined {
                    Ok(Some(result)) => results.push(result),
                    Ok(None) => {}
                    Err(e) => warn!("feature worker panicked: {e}"),
                }
            }
        } else {
            for feature in &features {
                results.push(
                    run_one(
                        Arc::clone(feature),
                        Arc::clone(&ctx),
                        &main_listeners,
                        selector.as_ref(),
                        "main",
                    )
                    .await,
                );
            }
        }

        let suite_result = SuiteResult {
            features: results,
            start_wall_ms: start_wall,
            end_wall_ms: http::wall_now_ms(),
        };
        main_listeners.suite_exit(&suite_result);

        if self.write_report {
            self.write_reports(&suite_result)?;
        }
        if self.output_console_summary {
            print_summary(&suite_result);
        }
        Ok(suite_result)
    }

    /// Walks the configured paths for `*.feature` files, sorted by path,
    /// dropping `@ignore`d features.
    fn discover(&self) -> Result<Vec<Arc<Feature>>> {
        let mut files: Vec<PathBuf> = Vec::new();
        for path in &self.paths {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                self.working_dir.join(path)
            };
            if path.is_file() {
                files.push(path);
                continue;
            }
            let walker = GlobWalkerBuilder::new(&path, "*.feature")
                .case_insensitive(true)
                .build()
                .map_err(|e| Error::Config(e.to_string()))?;
            files.extend(
                walker
                    .filter_map(std::result::Result::ok)
                    .map(|entry| entry.path().to_path_buf())
                    .sorted(),
            );
        }

        let mut features = Vec::new();
        for file in files {
            let feature = Feature::parse_path(&file)?;
            if tag::is_ignored(&feature.tags) {
                info!("skipping @ignore feature: {}", file.display());
                continue;
            }
            features.push(Arc::new(feature));
        }
        Ok(features)
    }

    fn build_ctx(&self) -> Result<SuiteCtx> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let config_file = self
            .config_path
            .clone()
            .unwrap_or_else(|| self.working_dir.join("relish-config.rhai"));
        let config_script = read_optional(&config_file)?;
        let config_env_script = match &self.env {
            Some(env) => read_optional(
                &self.working_dir.join(format!("relish-config-{env}.rhai")),
            )?,
            None => None,
        };

        Ok(SuiteCtx {
            client,
            env: self.env.clone(),
            dry_run: self.dry_run,
            config_script,
            config_env_script,
            system_properties: self.system_properties.clone(),
        })
    }

    fn write_reports(&self, result: &SuiteResult) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        let summary = serde_json::to_string_pretty(&result.summary_json())
            .map_err(|e| Error::Config(e.to_string()))?;
        fs::write(self.output_dir.join("relish-summary.json"), summary)?;

        for feature in &result.features {
            let name = safe_file_name(&feature.name);
            let body = serde_json::to_string_pretty(feature)
                .map_err(|e| Error::Config(e.to_string()))?;
            fs::write(self.output_dir.join(format!("{name}.json")), body)?;
        }
        Ok(())
    }
}

/// Runs one feature behind its enter/exit events.
async fn run_one(
    feature: Arc<Feature>,
    ctx: Arc<SuiteCtx>,
    listeners: &Listeners,
    selector: Option<&TagSelector>,
    thread_name: &str,
) -> FeatureResult {
    if !listeners.feature_enter(&feature) {
        let result = FeatureResult {
            path: feature.path.to_string_lossy().into_owned(),
            name: feature.name.clone(),
            scenarios: Vec::new(),
        };
        listeners.feature_exit(&result);
        return result;
    }
    let runtime = FeatureRuntime::new(feature, ctx);
    let result = runtime.run(listeners, selector, thread_name).await;
    listeners.feature_exit(&result);
    result
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if path.is_file() {
        Ok(Some(fs::read_to_string(path)?))
    } else {
        Ok(None)
    }
}

fn print_summary(result: &SuiteResult) {
    let (passed, failed) = result.counts();
    let elapsed = std::time::Duration::from_millis(
        result.end_wall_ms.saturating_sub(result.start_wall_ms),
    );
    println!(
        "{}",
        console::style(format!(
            "relish: {} features in {}",
            result.features.len(),
            humantime::format_duration(elapsed),
        ))
        .bold(),
    );
    for feature in &result.features {
        let (s_passed, s_failed) = feature.counts();
        let line = format!(
            "  {} | scenarios: {} passed, {} failed",
            feature.name, s_passed, s_failed,
        );
        if feature.is_failed() {
            println!("{}", console::style(line).red());
        } else {
            println!("{}", console::style(line).green());
        }
    }
    let totals = format!("passed: {passed}  failed: {failed}");
    if failed > 0 {
        println!("{}", console::style(totals).red().bold());
    } else {
        println!("{}", console::style(totals).green().bold());
    }
}
