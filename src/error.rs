// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error taxonomy of the execution core.
//!
//! [`StepError`] covers everything that can fail a single step, while
//! [`Error`] covers suite-level failures (feature discovery, parsing,
//! report output).

use std::io;

use derive_more::with_trait::{Display, Error as DeriveError, From};

/// Failure of a single step.
///
/// A step failure marks its [`StepResult`] failed and stops the current
/// scenario; the feature continues with the next scenario.
///
/// [`StepResult`]: crate::result::StepResult
#[derive(Clone, Debug, Display, DeriveError)]
pub enum StepError {
    /// Malformed step: missing `=`, unknown keyword, invalid call
    /// expression.
    #[display("parse error: {_0}")]
    Parse(#[error(not(source))] String),

    /// The script engine raised while evaluating an expression.
    #[display("evaluation error: {_0}")]
    Eval(#[error(not(source))] String),

    /// A `match`, `assert` or `status` mismatch.
    #[display("{_0}")]
    Assertion(#[error(not(source))] String),

    /// File or resource read failure.
    #[display("resource error: {_0}")]
    Resource(#[error(not(source))] String),

    /// HTTP transport failure.
    #[display("http call failed: {_0}")]
    Http(#[error(not(source))] String),

    /// A `retry until` condition was never satisfied.
    #[display("retry condition not satisfied after {attempts} attempts: {condition}")]
    RetryExhausted {
        /// Number of invocations performed.
        attempts: u32,

        /// The condition expression that kept evaluating falsy.
        #[error(not(source))]
        condition: String,
    },

    /// Cooperative cancellation surfaced while sleeping or invoking.
    #[display("interrupted")]
    Interrupted,
}

impl StepError {
    /// Shortcut for a [`StepError::Eval`] out of anything printable.
    pub fn eval(e: impl ToString) -> Self {
        Self::Eval(e.to_string())
    }

    /// Shortcut for a [`StepError::Parse`] out of anything printable.
    pub fn parse(e: impl ToString) -> Self {
        Self::Parse(e.to_string())
    }
}

/// Suite-level error: anything that prevents features from being loaded or
/// results from being written.
#[derive(Debug, Display, DeriveError, From)]
pub enum Error {
    /// Feature file failed to parse.
    #[display("failed to parse feature file: {_0}")]
    Parse(gherkin::ParseFileError),

    /// Scenario Outline expansion encountered an unknown `<template>`.
    #[display("{_0}")]
    ExpandExamples(crate::feature::ExpandExamplesError),

    /// I/O failure during discovery or report output.
    #[display("i/o operation failed: {_0}")]
    Io(io::Error),

    /// Invalid suite configuration.
    #[display("configuration error: {_0}")]
    #[from(ignore)]
    Config(#[error(not(source))] String),
}

/// Result of a suite-level operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;
