// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Execution runtimes: scenario, feature and suite.

mod feature;
mod scenario;
mod suite;

pub use feature::{CallOutcome, FeatureRuntime, FeatureState, run_feature_call};
pub use scenario::ScenarioRuntime;
pub use suite::{Suite, SuiteCtx};
