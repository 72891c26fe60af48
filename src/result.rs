// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Execution results: step → scenario → feature → suite.
//!
//! Durations are measured with monotonic clocks; start times are wall
//! clock. Everything serializes for the summary files the orchestrator
//! writes.

use base64::Engine as _;
use serde::Serialize;

/// Outcome of one step.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Step ran and succeeded.
    Passed,

    /// Step ran and failed.
    Failed,

    /// Step did not run (earlier failure, dry-run, or listener veto).
    Skipped,
}

/// An attachment captured during a step (rendered doc, screenshot).
#[derive(Clone, Debug, Serialize)]
pub struct Embed {
    /// MIME type of the data.
    pub content_type: String,

    /// Payload, base64 in serialized form.
    #[serde(serialize_with = "as_base64")]
    pub data: Vec<u8>,
}

fn as_base64<S: serde::Serializer>(
    data: &[u8],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

/// Result of one executed (or skipped) step.
#[derive(Clone, Debug, Serialize)]
pub struct StepResult {
    /// DSL keyword, empty for bare expressions.
    pub keyword: String,

    /// Step text after the keyword.
    pub text: String,

    /// Declaration line.
    pub line: usize,

    /// Outcome.
    pub status: StepStatus,

    /// Wall-clock start, milliseconds since the epoch.
    pub start_wall_ms: u64,

    /// Monotonic elapsed nanoseconds.
    pub duration_nanos: u64,

    /// Failure message, if failed.
    pub error: Option<String>,

    /// Per-step log lines (`print`, HTTP traffic).
    pub log: String,

    /// Attachments.
    pub embeds: Vec<Embed>,

    /// Results of features executed through `call` within this step.
    pub call_results: Vec<FeatureResult>,
}

impl StepResult {
    /// A skipped placeholder for a step that never ran.
    #[must_use]
    pub fn skipped(keyword: &str, text: &str, line: usize) -> Self {
        Self {
            keyword: keyword.to_owned(),
            text: text.to_owned(),
            line,
            status: StepStatus::Skipped,
            start_wall_ms: 0,
            duration_nanos: 0,
            error: None,
            log: String::new(),
            embeds: Vec::new(),
            call_results: Vec::new(),
        }
    }
}

/// Result of one scenario.
#[derive(Clone, Debug, Serialize)]
pub struct ScenarioResult {
    /// Scenario name.
    pub name: String,

    /// Declaration line.
    pub line: usize,

    /// Ordering key within the feature: `(section, example, line)`.
    pub sort_key: (usize, usize, usize),

    /// Name of the worker the scenario ran on.
    pub thread_name: String,

    /// Wall-clock start, milliseconds since the epoch.
    pub start_wall_ms: u64,

    /// Wall-clock end, milliseconds since the epoch.
    pub end_wall_ms: u64,

    /// Monotonic elapsed nanoseconds of the whole scenario.
    pub duration_nanos: u64,

    /// Step results in declaration order.
    pub steps: Vec<StepResult>,
}

impl ScenarioResult {
    /// Indicates whether any step failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepStatus::Failed)
    }
}

/// Result of one feature.
#[derive(Clone, Debug, Serialize)]
pub struct FeatureResult {
    /// Feature file path.
    pub path: String,

    /// Feature name.
    pub name: String,

    /// Scenario results in declaration order.
    pub scenarios: Vec<ScenarioResult>,
}

impl FeatureResult {
    /// Indicates whether any scenario failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.scenarios.iter().any(ScenarioResult::is_failed)
    }

    /// `(passed, failed)` scenario counts.
    #[must_use]
    pub fn counts(&self) -> (usize, usize) {
        let failed =
            self.scenarios.iter().filter(|s| s.is_failed()).count();
        (self.scenarios.len() - failed, failed)
    }
}

/// Result of a whole suite run.
#[derive(Clone, Debug, Serialize)]
pub struct SuiteResult {
    /// Feature results, in completion order.
    pub features: Vec<FeatureResult>,

    /// Wall-clock start, milliseconds since the epoch.
    pub start_wall_ms: u64,

    /// Wall-clock end, milliseconds since the epoch.
    pub end_wall_ms: u64,
}

impl SuiteResult {
    /// Indicates whether any feature failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.features.iter().any(FeatureResult::is_failed)
    }

    /// `(passed, failed)` feature counts.
    #[must_use]
    pub fn counts(&self) -> (usize, usize) {
        let failed =
            self.features.iter().filter(|f| f.is_failed()).count();
        (self.features.len() - failed, failed)
    }

    /// Summary document written as `relish-summary.json`.
    #[must_use]
    pub fn summary_json(&self) -> serde_json::Value {
        let (features_passed, features_failed) = self.counts();
        let scenarios: usize =
            self.features.iter().map(|f| f.scenarios.len()).sum();
        let scenarios_failed: usize = self
            .features
            .iter()
            .map(|f| f.counts().1)
            .sum();
        serde_json::json!({
            "elapsedMs": self.end_wall_ms.saturating_sub(self.start_wall_ms),
            "featuresPassed": features_passed,
            "featuresFailed": features_failed,
            "scenariosPassed": scenarios - scenarios_failed,
            "scenariosFailed": scenarios_failed,
            "features": self.features.iter().map(|f| {
                let (passed, failed) = f.counts();
                serde_json::json!({
                    "name": f.name,
                    "path": f.path,
                    "scenariosPassed": passed,
                    "scenariosFailed": failed,
                })
            }).collect::<Vec<_>>(),
        })
    }
}

/// Sanitizes a feature name into a result file name: anything outside
/// `[A-Za-z0-9_-]` becomes `_`.
#[must_use]
pub fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_file_name_replaces_specials() {
        assert_eq!(
            safe_file_name("demo/cats & dogs.feature"),
            "demo_cats___dogs_feature",
        );
        assert_eq!(safe_file_name("ok-name_1"), "ok-name_1");
    }

    #[test]
    fn failure_rolls_up() {
        let step_failed = StepResult {
            status: StepStatus::Failed,
            error: Some("boom".into()),
            ..StepResult::skipped("def", "x = 1", 3)
        };
        let scenario = ScenarioResult {
            name: "s".into(),
            line: 2,
            sort_key: (0, 0, 2),
            thread_name: "main".into(),
            start_wall_ms: 0,
            end_wall_ms: 0,
            duration_nanos: 0,
            steps: vec![step_failed],
        };
        let feature = FeatureResult {
            path: "f.feature".into(),
            name: "f".into(),
            scenarios: vec![scenario],
        };
        let suite = SuiteResult {
            features: vec![feature],
            start_wall_ms: 0,
            end_wall_ms: 5,
        };
        assert!(suite.is_failed());
        assert_eq!(suite.counts(), (0, 1));
        let summary = suite.summary_json();
        assert_eq!(summary["featuresFailed"], 1);
        assert_eq!(summary["scenariosFailed"], 1);
    }
}
