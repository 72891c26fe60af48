// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI options of the `relish` binary.

use std::path::PathBuf;

use clap::Parser;

use crate::{runtime::Suite, value::Value};

/// Runs feature files as an API-test suite, or serves them as a mock.
#[derive(Debug, Parser)]
#[command(name = "relish", version, about)]
pub struct Cli {
    /// Feature files, or directories to discover `*.feature`s under.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Environment name; also enables `relish-config-<env>.rhai`.
    #[arg(long, short = 'e', env = "RELISH_ENV")]
    pub env: Option<String>,

    /// Tag selector, e.g. `@smoke,@fast` or `anyOf("@a") && not("@wip")`.
    #[arg(long, short = 't')]
    pub tags: Option<String>,

    /// Number of parallel feature workers.
    #[arg(long, short = 'T', default_value_t = 1)]
    pub threads: usize,

    /// Report every scenario as skipped without executing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Explicit configuration script path.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for summary files.
    #[arg(long, short = 'o', default_value = "target/relish-reports")]
    pub output_dir: PathBuf,

    /// Working directory for discovery and configuration.
    #[arg(long, short = 'w', default_value = ".")]
    pub workdir: PathBuf,

    /// Write `relish-summary.json` and per-feature result files.
    #[arg(long)]
    pub report: bool,

    /// Suppress the console summary.
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Serve the features as a mock server instead of running them.
    #[arg(long, short = 'm')]
    pub mock: bool,

    /// Mock server port (0 picks an ephemeral one).
    #[arg(long, short = 'p', default_value_t = 0)]
    pub port: u16,

    /// Path prefix stripped from inbound mock requests.
    #[arg(long)]
    pub prefix: Option<String>,

    /// System properties exposed to scripts, as `key=value`.
    #[arg(long = "property", short = 'D')]
    pub properties: Vec<String>,
}

impl Cli {
    /// Builds a [`Suite`] from these options.
    #[must_use]
    pub fn into_suite(self) -> Suite {
        let mut suite = Suite::new();
        for path in self.paths {
            suite = suite.path(path);
        }
        if let Some(env) = self.env {
            suite = suite.env(env);
        }
        if let Some(tags) = self.tags {
            suite = suite.tags(tags);
        }
        if self.threads > 1 {
            suite = suite.parallel(self.threads);
        }
        suite.dry_run = self.dry_run;
        suite.config_path = self.config;
        suite.output_dir = self.output_dir;
        suite.working_dir = self.workdir;
        suite.write_report = self.report;
        suite.output_console_summary = !self.quiet;
        for property in self.properties {
            if let Some((k, v)) = property.split_once('=') {
                suite
                    .system_properties
                    .insert(k.to_owned(), Value::String(v.to_owned()));
            }
        }
        suite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_maps_onto_suite_options() {
        let cli = Cli::parse_from([
            "relish",
            "features/",
            "--env",
            "dev",
            "--tags",
            "@smoke",
            "-T",
            "4",
            "--report",
            "-D",
            "apiKey=secret",
        ]);
        let suite = cli.into_suite();
        assert_eq!(suite.env.as_deref(), Some("dev"));
        assert_eq!(suite.tag_selector.as_deref(), Some("@smoke"));
        assert!(suite.parallel);
        assert_eq!(suite.thread_count, 4);
        assert!(suite.write_report);
        assert!(suite.system_properties.contains_key("apiKey"));
    }
}
