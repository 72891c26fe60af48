// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Mock router behavior: catch-all, predicate dispatch, pass-through,
//! shared mutable globals, CORS and `retry until` against a live server.

use std::{fs, path::Path, sync::Arc, time::Instant};

use relish::{
    Feature,
    event::Listeners,
    mock::{MockHandler, MockServer},
    runtime::{FeatureRuntime, SuiteCtx},
};

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

async fn start_mock(dir: &Path, name: &str) -> MockServer {
    let handler =
        MockHandler::new(&[dir.join(name)], None).await.unwrap();
    MockServer::start(handler, 0).await.unwrap()
}

#[tokio::test]
async fn catch_all_scenario_answers_any_path() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "mock.feature",
        "Feature: catch-all\n\
         Scenario:\n\
         * def response = { \"ok\": true }\n",
    );
    let server = start_mock(dir.path(), "mock.feature").await;

    let response = reqwest::get(format!("{}/anything/at/all", server.url()))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/json"),
    );
    assert_eq!(response.text().await.unwrap(), r#"{"ok":true}"#);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn predicate_dispatch_pass_through_and_404() {
    let dir = tempfile::tempdir().unwrap();

    // Upstream target of the proceed pass-through.
    write(
        dir.path(),
        "upstream.feature",
        "Feature: upstream\n\
         Scenario:\n\
         * def responseHeaders = { \"X-Upstream\": \"yes\" }\n\
         * def response = \"upstream says hi\"\n",
    );
    let upstream = start_mock(dir.path(), "upstream.feature").await;

    write(
        dir.path(),
        "router.feature",
        &format!(
            "Feature: router\n\
             Scenario: pathMatches(\"/a\") && methodIs(\"GET\")\n\
             * def response = {{ \"status\": \"A\" }}\n\
             Scenario: pathMatches(\"/b\")\n\
             * def response = proceed(\"{}\")\n",
            upstream.url(),
        ),
    );
    let server = start_mock(dir.path(), "router.feature").await;

    let a = reqwest::get(format!("{}/a", server.url())).await.unwrap();
    assert_eq!(a.status().as_u16(), 200);
    assert_eq!(a.text().await.unwrap(), r#"{"status":"A"}"#);

    let b = reqwest::get(format!("{}/b", server.url())).await.unwrap();
    assert_eq!(b.status().as_u16(), 200);
    assert_eq!(
        b.headers().get("x-upstream").and_then(|v| v.to_str().ok()),
        Some("yes"),
    );
    assert_eq!(b.text().await.unwrap(), "upstream says hi");

    let c = reqwest::get(format!("{}/c", server.url())).await.unwrap();
    assert_eq!(c.status().as_u16(), 404);
    assert_eq!(
        c.text().await.unwrap(),
        r#"{"error":"no matching scenario"}"#,
    );

    server.stop().await;
    upstream.stop().await;
}

#[tokio::test]
async fn globals_persist_across_requests_and_path_params_bind() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "stateful.feature",
        "Feature: stateful\n\
         Background:\n\
         * def hits = 0\n\
         Scenario: pathMatches(\"/cats/{id}\")\n\
         * def hits = hits + 1\n\
         * def response = { \"id\": \"#(pathParams.id)\", \"hits\": \"#(hits)\" }\n",
    );
    let server = start_mock(dir.path(), "stateful.feature").await;

    let first = reqwest::get(format!("{}/cats/42", server.url()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(first, r#"{"id":"42","hits":1}"#);

    let second = reqwest::get(format!("{}/cats/7", server.url()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(second, r#"{"id":"7","hits":2}"#);

    server.stop().await;
}

#[tokio::test]
async fn cors_preflight_and_origin_header() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "cors.feature",
        "Feature: cors\n\
         Background:\n\
         * configure cors = true\n\
         Scenario:\n\
         * def response = { \"ok\": true }\n",
    );
    let server = start_mock(dir.path(), "cors.feature").await;
    let client = reqwest::Client::new();

    let preflight = client
        .request(
            reqwest::Method::OPTIONS,
            format!("{}/anything", server.url()),
        )
        .header("Access-Control-Request-Headers", "X-Custom")
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status().as_u16(), 200);
    let allow_methods = preflight
        .headers()
        .get("access-control-allow-methods")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(allow_methods.contains("PATCH"));
    assert_eq!(
        preflight
            .headers()
            .get("access-control-allow-headers")
            .and_then(|v| v.to_str().ok()),
        Some("X-Custom"),
    );

    let normal = client
        .get(format!("{}/x", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(
        normal
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*"),
    );

    server.stop().await;
}

#[tokio::test]
async fn failing_scenario_step_returns_500_with_error_body() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "broken.feature",
        "Feature: broken\n\
         Scenario:\n\
         * assert 1 == 2\n",
    );
    let server = start_mock(dir.path(), "broken.feature").await;

    let response =
        reqwest::get(format!("{}/x", server.url())).await.unwrap();
    assert_eq!(response.status().as_u16(), 500);
    let body: serde_json::Value =
        serde_json::from_str(&response.text().await.unwrap()).unwrap();
    assert!(
        body["error"].as_str().unwrap().contains("assert failed"),
        "{body}",
    );

    server.stop().await;
}

#[tokio::test]
async fn retry_until_polls_to_success() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "flaky.feature",
        "Feature: flaky upstream\n\
         Background:\n\
         * def tries = 0\n\
         Scenario:\n\
         * def tries = tries + 1\n\
         * def responseStatus = if tries < 3 { 500 } else { 200 }\n\
         * def response = { \"tries\": \"#(tries)\" }\n",
    );
    let server = start_mock(dir.path(), "flaky.feature").await;

    write(
        dir.path(),
        "client.feature",
        &format!(
            "Feature: retrying client\n\
             Scenario:\n\
             * configure retryCount = 3\n\
             * configure retryInterval = 10\n\
             * url \"{}\"\n\
             * retry until responseStatus == 200\n\
             * method get\n\
             * status 200\n\
             * match response == {{ \"tries\": 3 }}\n",
            server.url(),
        ),
    );

    let feature =
        Feature::parse_path(&dir.path().join("client.feature")).unwrap();
    let runtime = FeatureRuntime::new(
        Arc::new(feature),
        Arc::new(SuiteCtx::minimal()),
    );
    let started = Instant::now();
    let result =
        runtime.run(&Listeners::default(), None, "test").await;
    assert!(!result.is_failed(), "{:#?}", result.scenarios[0].steps);

    // Two sleeps of the configured interval happened.
    assert!(started.elapsed().as_millis() >= 20);

    server.stop().await;
}

#[tokio::test]
async fn retry_exhaustion_fails_the_step() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "always500.feature",
        "Feature: always failing\n\
         Scenario:\n\
         * def responseStatus = 500\n",
    );
    let server = start_mock(dir.path(), "always500.feature").await;

    write(
        dir.path(),
        "client.feature",
        &format!(
            "Feature: exhausted client\n\
             Scenario:\n\
             * configure retryCount = 2\n\
             * configure retryInterval = 5\n\
             * url \"{}\"\n\
             * retry until responseStatus == 200\n\
             * method get\n",
            server.url(),
        ),
    );

    let feature =
        Feature::parse_path(&dir.path().join("client.feature")).unwrap();
    let runtime = FeatureRuntime::new(
        Arc::new(feature),
        Arc::new(SuiteCtx::minimal()),
    );
    let result = runtime.run(&Listeners::default(), None, "test").await;
    assert!(result.is_failed());
    let error = result.scenarios[0]
        .steps
        .iter()
        .find_map(|s| s.error.clone())
        .unwrap();
    assert!(error.contains("retry"), "{error}");
    assert!(error.contains("2"), "{error}");

    server.stop().await;
}

#[tokio::test]
async fn http_steps_drive_a_real_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "echo.feature",
        "Feature: echo\n\
         Scenario: pathMatches(\"/echo\") && methodIs(\"POST\")\n\
         * def response = { \"got\": \"#(request.name)\", \"q\": \"#(paramValue(\\\"q\\\"))\" }\n",
    );
    let server = start_mock(dir.path(), "echo.feature").await;

    write(
        dir.path(),
        "client.feature",
        &format!(
            "Feature: client\n\
             Scenario:\n\
             * url \"{}\"\n\
             * path \"echo\"\n\
             * param q = \"x\"\n\
             * request {{ \"name\": \"Billie\" }}\n\
             * method post\n\
             * status 200\n\
             * match response == {{ \"got\": \"Billie\", \"q\": \"x\" }}\n\
             * match responseType == \"json\"\n",
            server.url(),
        ),
    );

    let feature =
        Feature::parse_path(&dir.path().join("client.feature")).unwrap();
    let runtime = FeatureRuntime::new(
        Arc::new(feature),
        Arc::new(SuiteCtx::minimal()),
    );
    let result = runtime.run(&Listeners::default(), None, "test").await;
    assert!(!result.is_failed(), "{:#?}", result.scenarios[0].steps);

    server.stop().await;
}
