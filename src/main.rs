// File: main.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use clap::Parser;
use log::LevelFilter;

use rdesync::cli::{run_request_command, run_scan_command, Cli, Commands};

// Current-thread runtime on purpose: the timing measurements rely on the
// detector never being preempted between a probe send and its clock samples.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if cli.verbose {
        builder.filter_level(LevelFilter::Debug);
    } else if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(LevelFilter::Info);
    }
    builder.init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let outcome = match cli.command {
        Commands::Scan(args) => run_scan_command(args).await,
        Commands::Request(args) => run_request_command(args).await,
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}
