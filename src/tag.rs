// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Tag selection.
//!
//! A selector is a boolean expression over a scenario's tag set, evaluated
//! by the script engine with `anyOf` / `allOf` / `not` helpers. The classic
//! comma shorthand (`@a,@b` meaning any-of, `~@x` meaning not) translates
//! into the same algebra.

use rhai::Engine;

use crate::error::StepError;

/// A parsed tag selector.
#[derive(Clone, Debug)]
pub struct TagSelector {
    raw: String,
}

/// Tag whose presence anywhere excludes the carrying unit outright.
pub const IGNORE: &str = "ignore";

fn normalize(tag: &str) -> &str {
    tag.trim().trim_start_matches('@')
}

impl TagSelector {
    /// Wraps a selector expression, shorthand included.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// Evaluates this selector against a scenario's tags.
    ///
    /// # Errors
    ///
    /// If a script-expression selector fails to evaluate.
    pub fn eval(&self, tags: &[String]) -> Result<bool, StepError> {
        let raw = self.raw.trim();
        if raw.is_empty() {
            return Ok(true);
        }
        if raw.contains('(') {
            return self.eval_script(raw, tags);
        }

        // Comma shorthand: any positive term selects, every `~` term
        // excludes.
        let mut positives = Vec::new();
        let mut negatives = Vec::new();
        for term in raw.split(',') {
            let term = term.trim();
            if let Some(neg) = term.strip_prefix('~') {
                negatives.push(normalize(neg).to_owned());
            } else if !term.is_empty() {
                positives.push(normalize(term).to_owned());
            }
        }
        let has = |t: &String| tags.iter().any(|tag| tag == t);
        let selected = positives.is_empty() || positives.iter().any(has);
        let excluded = negatives.iter().any(has);
        Ok(selected && !excluded)
    }

    fn eval_script(&self, raw: &str, tags: &[String]) -> Result<bool, StepError> {
        let owned: Vec<String> =
            tags.iter().map(|t| normalize(t).to_owned()).collect();

        let mut engine = Engine::new();
        let contains = {
            let owned = owned.clone();
            move |t: &str| owned.iter().any(|tag| tag.as_str() == normalize(t))
        };
        {
            let c = contains.clone();
            engine.register_fn("anyOf", move |a: &str| c(a));
        }
        {
            let c = contains.clone();
            engine.register_fn("anyOf", move |a: &str, b: &str| c(a) || c(b));
        }
        {
            let c = contains.clone();
            engine.register_fn("anyOf", move |a: &str, b: &str, d: &str| {
                c(a) || c(b) || c(d)
            });
        }
        {
            let c = contains.clone();
            engine.register_fn("allOf", move |a: &str| c(a));
        }
        {
            let c = contains.clone();
            engine.register_fn("allOf", move |a: &str, b: &str| c(a) && c(b));
        }
        {
            let c = contains.clone();
            engine.register_fn("allOf", move |a: &str, b: &str, d: &str| {
                c(a) && c(b) && c(d)
            });
        }
        {
            let c = contains;
            engine.register_fn("not", move |a: &str| !c(a));
        }

        engine
            .eval::<bool>(raw)
            .map_err(|e| StepError::Eval(format!("tag selector `{raw}`: {e}")))
    }
}

/// Indicates whether a tag set carries `@ignore`.
#[must_use]
pub fn is_ignored(tags: &[String]) -> bool {
    tags.iter().any(|t| normalize(t) == IGNORE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn empty_selector_selects_everything() {
        let s = TagSelector::new("");
        assert!(s.eval(&tags(&["a"])).unwrap());
        assert!(s.eval(&[]).unwrap());
    }

    #[test]
    fn comma_shorthand_is_any_of() {
        let s = TagSelector::new("@a,@b");
        assert!(s.eval(&tags(&["b"])).unwrap());
        assert!(!s.eval(&tags(&["c"])).unwrap());
    }

    #[test]
    fn tilde_shorthand_excludes() {
        let s = TagSelector::new("~@wip");
        assert!(s.eval(&tags(&["a"])).unwrap());
        assert!(!s.eval(&tags(&["wip"])).unwrap());

        let s = TagSelector::new("@a,~@wip");
        assert!(s.eval(&tags(&["a"])).unwrap());
        assert!(!s.eval(&tags(&["a", "wip"])).unwrap());
    }

    #[test]
    fn script_selectors_use_the_algebra() {
        let s = TagSelector::new("anyOf(\"@a\",\"@b\") && not(\"@wip\")");
        assert!(s.eval(&tags(&["a"])).unwrap());
        assert!(!s.eval(&tags(&["a", "wip"])).unwrap());
        assert!(!s.eval(&tags(&["c"])).unwrap());

        let s = TagSelector::new("allOf(\"@a\",\"@b\")");
        assert!(s.eval(&tags(&["a", "b"])).unwrap());
        assert!(!s.eval(&tags(&["a"])).unwrap());
    }

    #[test]
    fn ignore_detection() {
        assert!(is_ignored(&tags(&["ignore"])));
        assert!(!is_ignored(&tags(&["a"])));
    }
}
