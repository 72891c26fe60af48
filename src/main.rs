// Copyright (c) 2018-2025  Brendan Molloy <brendan@bbqsrc.net>,
//                          Ilya Solovyiov <ilya.solovyiov@gmail.com>,
//                          Kai Ren <tyranron@gmail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `relish` binary: run a suite, or serve features as a mock.

use std::process::ExitCode;

use clap::Parser as _;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relish::{cli::Cli, mock::{MockHandler, MockServer}};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("relish: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> relish::error::Result<ExitCode> {
    if cli.mock {
        let handler = MockHandler::new(&cli.paths, cli.prefix.clone()).await?;
        let server = MockServer::start(handler, cli.port).await?;
        info!("serving mock at {}", server.url());
        drop(tokio::signal::ctrl_c().await);
        server.stop().await;
        return Ok(ExitCode::SUCCESS);
    }

    let result = cli.into_suite().run().await?;
    Ok(if result.is_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
