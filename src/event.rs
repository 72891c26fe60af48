// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Lifecycle events and listener fan-out.
//!
//! Enter events may be vetoed (returning `false` skips the covered unit);
//! exit events are informational. A listener that panics is logged and
//! dropped from consideration for that event, never aborting execution.

use std::{panic::{self, AssertUnwindSafe}, sync::Arc};

use tracing::warn;

use crate::{
    feature::{Feature, Scenario},
    result::{FeatureResult, ScenarioResult, StepResult, SuiteResult},
};

/// Observer of suite execution.
///
/// Default implementations observe nothing and veto nothing.
pub trait SuiteListener: Send + Sync {
    /// Suite is starting with the given features.
    fn suite_enter(&self, _features: &[Arc<Feature>]) {}

    /// Suite finished.
    fn suite_exit(&self, _result: &SuiteResult) {}

    /// Feature is starting. Returning `false` skips it.
    fn feature_enter(&self, _feature: &Feature) -> bool {
        true
    }

    /// Feature finished.
    fn feature_exit(&self, _result: &FeatureResult) {}

    /// Scenario is starting. Returning `false` skips it.
    fn scenario_enter(&self, _feature: &Feature, _scenario: &Scenario) -> bool {
        true
    }

    /// Scenario finished.
    fn scenario_exit(&self, _feature: &Feature, _result: &ScenarioResult) {}

    /// Step is starting. Returning `false` skips it.
    fn step_enter(&self, _scenario: &Scenario, _step: &gherkin::Step) -> bool {
        true
    }

    /// Step finished.
    fn step_exit(&self, _scenario: &Scenario, _result: &StepResult) {}
}

/// Builds a per-worker listener at feature-task startup.
pub type ListenerFactory =
    Arc<dyn Fn() -> Box<dyn SuiteListener> + Send + Sync>;

/// The listeners active on one worker: the suite-global list plus the
/// worker-local ones built from factories.
#[derive(Default)]
pub struct Listeners {
    /// Suite-wide listeners, shared across workers.
    pub global: Vec<Arc<dyn SuiteListener>>,

    /// Worker-local listeners.
    pub local: Vec<Box<dyn SuiteListener>>,
}

impl Listeners {
    /// Assembles the worker view: shared globals plus fresh locals.
    #[must_use]
    pub fn assemble(
        global: &[Arc<dyn SuiteListener>],
        factories: &[ListenerFactory],
    ) -> Self {
        Self {
            global: global.to_vec(),
            local: factories.iter().map(|f| f()).collect(),
        }
    }

    fn fan_out<R>(
        &self,
        mut call: impl FnMut(&dyn SuiteListener) -> R,
        mut fold: impl FnMut(R, R) -> R,
        seed: R,
    ) -> R {
        let mut acc = seed;
        for listener in self
            .global
            .iter()
            .map(|l| l.as_ref() as &dyn SuiteListener)
            .chain(self.local.iter().map(Box::as_ref))
        {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| call(listener)));
            match outcome {
                Ok(r) => acc = fold(acc, r),
                Err(_) => warn!("listener panicked; event dropped"),
            }
        }
        acc
    }

    /// Fans out a suite-enter event.
    pub fn suite_enter(&self, features: &[Arc<Feature>]) {
        self.fan_out(|l| l.suite_enter(features), |(), ()| (), ());
    }

    /// Fans out a suite-exit event.
    pub fn suite_exit(&self, result: &SuiteResult) {
        self.fan_out(|l| l.suite_exit(result), |(), ()| (), ());
    }

    /// Fans out a feature-enter event; `false` means some listener vetoed.
    #[must_use]
    pub fn feature_enter(&self, feature: &Feature) -> bool {
        self.fan_out(|l| l.feature_enter(feature), |a, b| a && b, true)
    }

    /// Fans out a feature-exit event.
    pub fn feature_exit(&self, result: &FeatureResult) {
        self.fan_out(|l| l.feature_exit(result), |(), ()| (), ());
    }

    /// Fans out a scenario-enter event; `false` means vetoed.
    #[must_use]
    pub fn scenario_enter(&self, feature: &Feature, scenario: &Scenario) -> bool {
        self.fan_out(
            |l| l.scenario_enter(feature, scenario),
            |a, b| a && b,
            true,
        )
    }

    /// Fans out a scenario-exit event.
    pub fn scenario_exit(&self, feature: &Feature, result: &ScenarioResult) {
        self.fan_out(|l| l.scenario_exit(feature, result), |(), ()| (), ());
    }

    /// Fans out a step-enter event; `false` means vetoed.
    #[must_use]
    pub fn step_enter(&self, scenario: &Scenario, step: &gherkin::Step) -> bool {
        self.fan_out(|l| l.step_enter(scenario, step), |a, b| a && b, true)
    }

    /// Fans out a step-exit event.
    pub fn step_exit(&self, scenario: &Scenario, result: &StepResult) {
        self.fan_out(|l| l.step_exit(scenario, result), |(), ()| (), ());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counting {
        steps: AtomicUsize,
        veto_scenarios: bool,
    }

    impl SuiteListener for Counting {
        fn scenario_enter(&self, _: &Feature, _: &Scenario) -> bool {
            !self.veto_scenarios
        }

        fn step_enter(&self, _: &Scenario, _: &gherkin::Step) -> bool {
            self.steps.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    struct Panicking;

    impl SuiteListener for Panicking {
        fn feature_enter(&self, _: &Feature) -> bool {
            panic!("misbehaving listener");
        }
    }

    fn sample_feature() -> Feature {
        crate::feature::Feature::parse_str(
            "Feature: f\nScenario: s\n* def a = 1\n",
            std::path::Path::new("f.feature"),
        )
        .unwrap()
    }

    #[test]
    fn veto_wins_over_acceptance() {
        let feature = sample_feature();
        let listeners = Listeners {
            global: vec![
                Arc::new(Counting::default()),
                Arc::new(Counting { veto_scenarios: true, ..Default::default() }),
            ],
            local: vec![],
        };
        assert!(!listeners.scenario_enter(&feature, &feature.scenarios[0]));
    }

    #[test]
    fn panicking_listener_does_not_abort() {
        let feature = sample_feature();
        let listeners = Listeners {
            global: vec![Arc::new(Panicking)],
            local: vec![Box::new(Counting::default())],
        };
        // The panic is swallowed; the surviving listener's default accepts.
        assert!(listeners.feature_enter(&feature));
    }

    #[test]
    fn factories_build_worker_local_listeners() {
        let factory: ListenerFactory =
            Arc::new(|| Box::new(Counting::default()));
        let listeners = Listeners::assemble(&[], &[factory]);
        assert_eq!(listeners.local.len(), 1);
    }
}
