// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Execution core of a Gherkin-flavored API-testing DSL.
//!
//! Feature files are parsed by [`gherkin`]; the DSL keywords in each step's
//! text (`def`, `match`, `method`, …) are interpreted by the
//! [step executor](step) against an embedded [script engine](engine), an
//! [HTTP builder](http), an [XML](xml)/JSON data model and a deep
//! [structural matcher](matching). The [runtime] drives scenarios,
//! features and suites (with bounded parallel dispatch), and the [mock]
//! router serves features as an HTTP endpoint whose scenario descriptions
//! act as matcher predicates.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod event;
pub mod feature;
pub mod http;
pub mod json;
pub mod matching;
pub mod mock;
pub mod resolve;
pub mod resource;
pub mod result;
pub mod runtime;
pub mod step;
pub mod tag;
pub mod value;
pub mod xml;

pub use self::{
    config::Config,
    engine::{ScriptEngine, Vars},
    error::{Error, StepError},
    event::{ListenerFactory, SuiteListener},
    feature::{Feature, Scenario},
    matching::{MatchOp, MatchResult},
    mock::{MockHandler, MockServer},
    result::{FeatureResult, ScenarioResult, StepResult, SuiteResult},
    runtime::{ScenarioRuntime, Suite},
    value::{Map, Value},
};
