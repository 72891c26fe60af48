// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end execution: keywords, matching, expansion, calls and scope
//! inheritance.

use std::{fs, path::Path, sync::Arc};

use pretty_assertions::assert_eq;
use relish::{
    Feature,
    event::Listeners,
    result::{FeatureResult, StepStatus},
    runtime::{FeatureRuntime, SuiteCtx},
};

async fn run_feature(dir: &Path, name: &str) -> FeatureResult {
    let feature = Feature::parse_path(&dir.join(name)).unwrap();
    let runtime =
        FeatureRuntime::new(Arc::new(feature), Arc::new(SuiteCtx::minimal()));
    runtime.run(&Listeners::default(), None, "test").await
}

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

#[tokio::test]
async fn basic_match_passes_and_fails_with_message() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "basic.feature",
        "Feature: basic match\n\
         Scenario: passing\n\
         * def foo = 1\n\
         * match foo == 1\n\
         Scenario: failing\n\
         * def foo = 1\n\
         * match foo == 2\n\
         * def never = 1\n",
    );
    let result = run_feature(dir.path(), "basic.feature").await;

    assert_eq!(result.scenarios.len(), 2);
    assert!(!result.scenarios[0].is_failed());

    let failing = &result.scenarios[1];
    assert!(failing.is_failed());
    let failed_step = &failing.steps[1];
    assert_eq!(failed_step.status, StepStatus::Failed);
    let message = failed_step.error.as_deref().unwrap();
    assert!(
        message.contains("expected: 2 actual: 1"),
        "unexpected message: {message}",
    );
    // Steps after a failure are skipped.
    assert_eq!(failing.steps[2].status, StepStatus::Skipped);
}

#[tokio::test]
async fn embedded_expansion_substitutes_and_drops() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "embed.feature",
        "Feature: embedded expressions\n\
         Scenario: greeting\n\
         * def name = \"world\"\n\
         * def o = { \"greeting\": \"#(\\\"hello \\\" + name)\", \"drop\": \"##(null)\" }\n\
         * match o == { \"greeting\": \"hello world\" }\n\
         * match o.drop == \"#notpresent\"\n",
    );
    let result = run_feature(dir.path(), "embed.feature").await;
    assert!(!result.is_failed(), "{:#?}", result.scenarios[0].steps);
}

#[tokio::test]
async fn isolated_call_returns_scope_and_shared_call_spreads_it() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "a.feature",
        "Feature: callee\n\
         Scenario:\n\
         * def out = 42\n",
    );
    write(
        dir.path(),
        "b.feature",
        "Feature: caller\n\
         Scenario: isolated\n\
         * def r1 = call read(\"a.feature\")\n\
         * match r1.out == 42\n\
         * def out = \"untouched\"\n\
         * match out == \"untouched\"\n\
         Scenario: shared\n\
         * call read(\"a.feature\")\n\
         * match out == 42\n",
    );
    let result = run_feature(dir.path(), "b.feature").await;
    assert!(!result.is_failed(), "{:#?}", result.scenarios);

    // The nested run is reported on the calling step.
    let call_step = &result.scenarios[0].steps[0];
    assert_eq!(call_step.call_results.len(), 1);
    assert_eq!(call_step.call_results[0].scenarios.len(), 1);
}

#[tokio::test]
async fn isolated_call_gets_a_deep_copy_of_the_caller_scope() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "mutator.feature",
        "Feature: mutates its view\n\
         Scenario:\n\
         * match base == { \"n\": 1 }\n\
         * set base.n = 99\n",
    );
    write(
        dir.path(),
        "caller.feature",
        "Feature: caller\n\
         Scenario:\n\
         * def base = { \"n\": 1 }\n\
         * def r = call read(\"mutator.feature\")\n\
         * match r.base == { \"n\": 99 }\n\
         * match base == { \"n\": 1 }\n",
    );
    let result = run_feature(dir.path(), "caller.feature").await;
    assert!(!result.is_failed(), "{:#?}", result.scenarios[0].steps);
}

#[tokio::test]
async fn call_with_argument_map_and_loop_list() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "doubler.feature",
        "Feature: doubles its argument\n\
         Scenario:\n\
         * def doubled = n * 2\n",
    );
    write(
        dir.path(),
        "caller.feature",
        "Feature: caller\n\
         Scenario: single\n\
         * def r = call read(\"doubler.feature\") { \"n\": 21 }\n\
         * match r.doubled == 42\n\
         Scenario: looped\n\
         * def rows = [{ \"n\": 1 }, { \"n\": 2 }]\n\
         * def all = call read(\"doubler.feature\") rows\n\
         * match all == \"#[2]\"\n\
         * match all[0].doubled == 2\n\
         * match all[1].doubled == 4\n",
    );
    let result = run_feature(dir.path(), "caller.feature").await;
    assert!(!result.is_failed(), "{:#?}", result.scenarios);
}

#[tokio::test]
async fn callonce_runs_the_called_feature_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "a.feature",
        "Feature: callee\n\
         Scenario:\n\
         * def out = 42\n",
    );
    write(
        dir.path(),
        "caller.feature",
        "Feature: caller\n\
         Scenario: first\n\
         * def r1 = callonce read(\"a.feature\")\n\
         * match r1.out == 42\n\
         Scenario: second\n\
         * def r2 = callonce read(\"a.feature\")\n\
         * match r2.out == 42\n\
         * set r2.out = 7\n\
         * match r2.out == 7\n",
    );
    let result = run_feature(dir.path(), "caller.feature").await;
    assert!(!result.is_failed(), "{:#?}", result.scenarios);

    // First scenario executed the feature; the second hit the cache, so
    // its callonce step carries no nested run report.
    assert_eq!(result.scenarios[0].steps[0].call_results.len(), 1);
    assert_eq!(result.scenarios[1].steps[0].call_results.len(), 0);
}

#[tokio::test]
async fn copy_keyword_detaches_structures() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "copy.feature",
        "Feature: copy\n\
         Scenario:\n\
         * def original = { \"a\": [1, 2] }\n\
         * copy clone = original\n\
         * set clone.a[0] = 99\n\
         * match clone == { \"a\": [99, 2] }\n\
         * match original == { \"a\": [1, 2] }\n",
    );
    let result = run_feature(dir.path(), "copy.feature").await;
    assert!(!result.is_failed(), "{:#?}", result.scenarios[0].steps);
}

#[tokio::test]
async fn xml_assignment_addressing_and_mutation() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "xml.feature",
        "Feature: xml\n\
         Scenario:\n\
         * xml doc = \"<cat><name>Billie</name><kittens><cat>a</cat><cat>b</cat></kittens></cat>\"\n\
         * match doc /cat/name == \"Billie\"\n\
         * def n = doc count(/cat/kittens/cat)\n\
         * match n == 2\n\
         * set doc /cat/name = \"Bob\"\n\
         * match doc /cat/name == \"Bob\"\n\
         * remove doc /cat/kittens\n\
         * match doc count(/cat/kittens) == 0\n",
    );
    let result = run_feature(dir.path(), "xml.feature").await;
    assert!(!result.is_failed(), "{:#?}", result.scenarios[0].steps);
}

#[tokio::test]
async fn table_text_and_replace_keywords() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "table.feature",
        "Feature: tables\n\
         Scenario:\n\
         * table cats\n\
           | name      | age |\n\
           | \"Billie\" | 3   |\n\
           | \"Wild\"   | 2   |\n\
         * match cats == [{ \"name\": \"Billie\", \"age\": 3 }, { \"name\": \"Wild\", \"age\": 2 }]\n\
         * text template = hi <name>!\n\
         * replace template.name = \"Billie\"\n\
         * match template == \"hi Billie!\"\n",
    );
    let result = run_feature(dir.path(), "table.feature").await;
    assert!(!result.is_failed(), "{:#?}", result.scenarios[0].steps);
}

#[tokio::test]
async fn scenario_duration_covers_step_durations() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "timing.feature",
        "Feature: timing\n\
         Scenario:\n\
         * def a = 1\n\
         * def b = 2\n\
         * match a + b == 3\n",
    );
    let result = run_feature(dir.path(), "timing.feature").await;
    let scenario = &result.scenarios[0];
    let step_total: u64 =
        scenario.steps.iter().map(|s| s.duration_nanos).sum();
    assert!(scenario.duration_nanos >= step_total);
}

#[tokio::test]
async fn background_failure_fails_the_feature() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "bg.feature",
        "Feature: background failure\n\
         Background:\n\
         * assert 1 == 2\n\
         Scenario: first\n\
         * def a = 1\n\
         Scenario: second\n\
         * def b = 2\n",
    );
    let result = run_feature(dir.path(), "bg.feature").await;
    assert!(result.is_failed());
    // The second scenario never ran.
    assert!(
        result.scenarios[1]
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Skipped),
    );
}

#[tokio::test]
async fn suite_discovers_filters_tags_and_writes_reports() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "one.feature",
        "Feature: one\n\
         @smoke\n\
         Scenario: selected\n\
         * def a = 1\n\
         @slow\n\
         Scenario: filtered\n\
         * assert false\n",
    );
    write(
        dir.path(),
        "ignored.feature",
        "@ignore\n\
         Feature: ignored\n\
         Scenario:\n\
         * assert false\n",
    );

    let out = dir.path().join("reports");
    let mut suite = relish::Suite::new()
        .path(dir.path().to_path_buf())
        .tags("@smoke");
    suite.write_report = true;
    suite.output_dir = out.clone();
    let result = suite.run().await.unwrap();

    assert!(!result.is_failed());
    assert_eq!(result.features.len(), 1);
    assert_eq!(result.features[0].scenarios.len(), 1);
    assert_eq!(result.features[0].scenarios[0].name, "selected");

    let summary = fs::read_to_string(out.join("relish-summary.json")).unwrap();
    let summary: serde_json::Value = serde_json::from_str(&summary).unwrap();
    assert_eq!(summary["featuresFailed"], 0);
    assert!(out.join("one.json").is_file());
}

#[tokio::test]
async fn scenario_ordering_key_restores_declaration_order() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "order.feature",
        "Feature: ordering\n\
         Scenario Outline: o\n\
         * def v = <n>\n\
         Examples:\n\
         | n |\n\
         | 1 |\n\
         | 2 |\n\
         Scenario: plain\n\
         * def v = 3\n",
    );
    let result = run_feature(dir.path(), "order.feature").await;
    assert_eq!(result.scenarios.len(), 3);

    let mut shuffled: Vec<_> = result.scenarios.iter().collect();
    shuffled.reverse();
    let mut keys: Vec<_> = shuffled.iter().map(|s| s.sort_key).collect();
    keys.sort_unstable();
    let declared: Vec<_> =
        result.scenarios.iter().map(|s| s.sort_key).collect();
    assert_eq!(keys, declared);
}
