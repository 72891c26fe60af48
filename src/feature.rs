// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Feature model over the [`gherkin`] parser.
//!
//! A parsed feature is flattened into an ordered list of [`Scenario`]s.
//! `Scenario Outline` examples expand eagerly, each expansion stamped with
//! its example index so the `(section, example, line)` ordering key stays
//! stable under parallel reporting.

use std::{
    iter,
    path::{Path, PathBuf},
};

use derive_more::with_trait::{Display, Error};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error;

/// A feature file ready for execution.
#[derive(Clone, Debug)]
pub struct Feature {
    /// Path the feature was parsed from.
    pub path: PathBuf,

    /// Feature name.
    pub name: String,

    /// Free-text description under the `Feature:` line.
    pub description: Option<String>,

    /// Feature-level tags.
    pub tags: Vec<String>,

    /// Background steps, run before every scenario.
    pub background: Vec<gherkin::Step>,

    /// Scenarios in declaration order, outlines expanded.
    pub scenarios: Vec<Scenario>,
}

/// One executable scenario.
#[derive(Clone, Debug)]
pub struct Scenario {
    /// Index of the scenario section within the feature.
    pub section: usize,

    /// 1-based example index for expanded outlines, 0 otherwise.
    pub example: usize,

    /// Declaration line.
    pub line: usize,

    /// Scenario name.
    pub name: String,

    /// Free-text description under the `Scenario:` line.
    pub description: Option<String>,

    /// Scenario tags, feature-level tags included.
    pub tags: Vec<String>,

    /// Steps in declaration order.
    pub steps: Vec<gherkin::Step>,

    /// Whether this scenario came out of a `Scenario Outline`.
    pub from_outline: bool,
}

impl Scenario {
    /// Ordering key: sorting by it restores declaration order.
    #[must_use]
    pub const fn sort_key(&self) -> (usize, usize, usize) {
        (self.section, self.example, self.line)
    }

    /// Name and description joined, the match-expression of mock mode.
    #[must_use]
    pub fn name_and_description(&self) -> String {
        let mut out = self.name.trim().to_owned();
        if let Some(d) = &self.description {
            if !d.trim().is_empty() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(d.trim());
            }
        }
        out
    }
}

impl Feature {
    /// Parses and expands a feature file.
    ///
    /// # Errors
    ///
    /// On parse failure or an unknown `<template>` in an outline.
    pub fn parse_path(path: &Path) -> error::Result<Self> {
        let parsed =
            gherkin::Feature::parse_path(path, gherkin::GherkinEnv::default())?;
        Self::from_gherkin(parsed, path).map_err(Into::into)
    }

    /// Parses and expands feature source text (tests, inline fixtures).
    ///
    /// # Errors
    ///
    /// On parse failure or an unknown `<template>` in an outline.
    pub fn parse_str(source: &str, path: &Path) -> error::Result<Self> {
        let parsed =
            gherkin::Feature::parse(source, gherkin::GherkinEnv::default())
                .map_err(|e| {
                    error::Error::Config(format!(
                        "failed to parse feature source: {e}"
                    ))
                })?;
        Self::from_gherkin(parsed, path).map_err(Into::into)
    }

    /// Flattens a [`gherkin::Feature`], expanding outlines.
    ///
    /// # Errors
    ///
    /// See [`ExpandExamplesError`].
    pub fn from_gherkin(
        feature: gherkin::Feature,
        path: &Path,
    ) -> Result<Self, ExpandExamplesError> {
        let mut scenarios = Vec::new();
        for (section, scenario) in feature.scenarios.into_iter().enumerate() {
            expand_scenario(
                scenario,
                section,
                &feature.tags,
                Some(&path.to_path_buf()),
                &mut scenarios,
            )?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            name: feature.name,
            description: feature.description,
            tags: feature.tags,
            background: feature
                .background
                .map(|b| b.steps)
                .unwrap_or_default(),
            scenarios,
        })
    }

    /// Scenarios selected by an `@tag`, for `call read("file.feature@tag")`.
    #[must_use]
    pub fn scenarios_tagged(&self, tag: &str) -> Vec<&Scenario> {
        let wanted = tag.trim_start_matches('@');
        self.scenarios
            .iter()
            .filter(|s| s.tags.iter().any(|t| t.as_str() == wanted))
            .collect()
    }
}

/// Expands a [`Scenario Outline`][1]'s `Examples` tables, substituting
/// `<template>` placeholders into step text, doc-strings and data tables.
///
/// [1]: https://cucumber.io/docs/gherkin/reference/#scenario-outline
fn expand_scenario(
    scenario: gherkin::Scenario,
    section: usize,
    feature_tags: &[String],
    path: Option<&PathBuf>,
    out: &mut Vec<Scenario>,
) -> Result<(), ExpandExamplesError> {
    static TEMPLATE_REGEX: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"<([^<>\s]+)>").unwrap_or_else(|_| unreachable!())
    });

    let mut tags: Vec<String> = feature_tags.to_vec();
    tags.extend(scenario.tags.iter().cloned());

    let tables: Vec<_> = scenario
        .examples
        .iter()
        .filter_map(|ex| {
            ex.table
                .as_ref()
                .and_then(|t| t.rows.split_first())
                .map(|(header, vals)| (header.clone(), vals.to_vec()))
        })
        .collect();

    if tables.is_empty() {
        out.push(Scenario {
            section,
            example: 0,
            line: scenario.position.line,
            name: scenario.name,
            description: scenario.description,
            tags,
            steps: scenario.steps,
            from_outline: !scenario.examples.is_empty(),
        });
        return Ok(());
    }

    let mut example = 0;
    for (header, rows) in tables {
        for row in rows {
            example += 1;
            let mut steps = scenario.steps.clone();
            for step in &mut steps {
                let pos = step.position;
                let to_replace = iter::once(&mut step.value)
                    .chain(step.docstring.iter_mut())
                    .chain(step.table.iter_mut().flat_map(|t| {
                        t.rows.iter_mut().flat_map(|r| r.iter_mut())
                    }));

                let mut err = None;
                for value in to_replace {
                    *value = TEMPLATE_REGEX
                        .replace_all(value, |c: &regex::Captures<'_>| {
                            let name = c.get(1).map_or("", |m| m.as_str());
                            header
                                .iter()
                                .position(|h| h.as_str() == name)
                                .and_then(|i| row.get(i))
                                .map_or_else(
                                    || {
                                        err = Some(ExpandExamplesError {
                                            pos,
                                            name: name.to_owned(),
                                            path: path.cloned(),
                                        });
                                        String::new()
                                    },
                                    Clone::clone,
                                )
                        })
                        .into_owned();
                }
                if let Some(e) = err {
                    return Err(e);
                }
            }
            out.push(Scenario {
                section,
                example,
                line: scenario.position.line,
                name: scenario.name.clone(),
                description: scenario.description.clone(),
                tags: tags.clone(),
                steps,
                from_outline: true,
            });
        }
    }
    Ok(())
}

/// Error of outline expansion encountering an unknown `<template>`.
#[derive(Clone, Debug, Display, Error)]
#[display(
    "failed to resolve <{name}> at {}:{}:{}",
    path.as_deref().and_then(Path::to_str).unwrap_or_default(),
    pos.line,
    pos.col
)]
pub struct ExpandExamplesError {
    /// Position of the unknown template.
    pub pos: gherkin::LineCol,

    /// Name of the unknown template.
    pub name: String,

    /// Path to the `.feature` file, if known.
    pub path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Feature {
        Feature::parse_str(source, Path::new("inline.feature")).unwrap()
    }

    #[test]
    fn scenarios_keep_declaration_order_keys() {
        let feature = parse(
            "Feature: ordering\n\
             Scenario: first\n\
             * def a = 1\n\
             Scenario: second\n\
             * def b = 2\n",
        );
        let keys: Vec<_> =
            feature.scenarios.iter().map(Scenario::sort_key).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
        assert_eq!(feature.scenarios[0].section, 0);
        assert_eq!(feature.scenarios[1].section, 1);
    }

    #[test]
    fn outline_expansion_substitutes_templates() {
        let feature = parse(
            "Feature: outline\n\
             Scenario Outline: eating\n\
             * def left = <start> - <eat>\n\
             Examples:\n\
             | start | eat |\n\
             | 12    | 5   |\n\
             | 20    | 4   |\n",
        );
        assert_eq!(feature.scenarios.len(), 2);
        assert_eq!(feature.scenarios[0].example, 1);
        assert_eq!(feature.scenarios[1].example, 2);
        assert!(feature.scenarios.iter().all(|s| s.from_outline));
        assert_eq!(feature.scenarios[0].steps[0].value, "def left = 12 - 5");
        assert_eq!(feature.scenarios[1].steps[0].value, "def left = 20 - 4");
    }

    #[test]
    fn unknown_template_is_an_error() {
        let err = Feature::parse_str(
            "Feature: bad\n\
             Scenario Outline: eating\n\
             * def x = <nope>\n\
             Examples:\n\
             | start |\n\
             | 1     |\n",
            Path::new("bad.feature"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("<nope>"));
    }

    #[test]
    fn feature_tags_merge_into_scenario_tags() {
        let feature = parse(
            "@suite\n\
             Feature: tagged\n\
             @smoke\n\
             Scenario: s\n\
             * def a = 1\n",
        );
        assert_eq!(feature.scenarios[0].tags, ["suite", "smoke"]);
        assert_eq!(feature.scenarios_tagged("smoke").len(), 1);
        assert_eq!(feature.scenarios_tagged("@smoke").len(), 1);
        assert!(feature.scenarios_tagged("none").is_empty());
    }

    #[test]
    fn name_and_description_join() {
        let feature = parse(
            "Feature: mock\n\
             Scenario: pathMatches(\"/cats\")\n\
             * def a = 1\n",
        );
        assert_eq!(
            feature.scenarios[0].name_and_description(),
            "pathMatches(\"/cats\")",
        );
    }
}
