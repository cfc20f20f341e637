// File: cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use log::warn;

use crate::detect::{DetectorKind, PayloadPlacement};
use crate::http1::{Http1Client, Http1Request};
use crate::report::Reporter;
use crate::scan::{run_scan, ScanOptions};
use crate::target::Target;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        help = "Enable verbose output",
        global = true
    )]
    pub verbose: bool,

    #[arg(long = "no-color", help = "Disable colored output", global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan a target for request smuggling vulnerabilities
    Scan(ScanArgs),
    /// Send a single custom HTTP/1.1 request
    Request(RequestArgs),
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Target URL (http(s)://hostname[:port][/path])
    pub url_arg: Option<String>,

    #[arg(short = 'u', long = "url", help = "Target URL (alternative to the positional)")]
    pub url: Option<String>,

    #[arg(
        short = 't',
        long = "type",
        help = "Comma-separated detector types (cl.te,te.cl,h2.cl,h2.te)"
    )]
    pub types: Option<String>,

    #[arg(short = 'o', long = "output", help = "Write the JSON result here")]
    pub output: Option<PathBuf>,

    #[arg(long = "verify-ssl", help = "Verify TLS certificates")]
    pub verify_ssl: bool,

    #[arg(
        long = "timeout",
        default_value_t = 5.0,
        help = "Probe read timeout in seconds"
    )]
    pub timeout: f64,

    #[arg(
        long = "connect-timeout",
        default_value_t = 5.0,
        help = "Connection timeout in seconds"
    )]
    pub connect_timeout: f64,

    #[arg(
        short = 'e',
        long = "exit-first",
        help = "Stop after the first vulnerability"
    )]
    pub exit_first: bool,

    #[arg(
        short = 'H',
        long = "header",
        help = "Custom header sent with every probe ('Name: Value', repeatable)"
    )]
    pub header: Vec<String>,

    #[arg(
        short = 'f',
        long = "file",
        help = "Transfer-Encoding variation catalog (JSON)"
    )]
    pub file: Option<PathBuf>,

    #[arg(long = "cl-file", help = "Content-Length variation catalog (JSON)")]
    pub cl_file: Option<PathBuf>,

    #[arg(
        long = "h2-payload-placement",
        help = "Where HTTP/2 probes place the payload (normal_header, custom_header_value, custom_header_name, request_line)"
    )]
    pub h2_payload_placement: Option<String>,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Target URL
    pub url: String,

    #[arg(short = 'm', long = "method", default_value = "GET")]
    pub method: String,

    #[arg(
        short = 'H',
        long = "header",
        help = "HTTP header ('Name: Value', repeatable)"
    )]
    pub header: Vec<String>,

    #[arg(short = 'd', long = "data", help = "Request body")]
    pub data: Option<String>,

    #[arg(short = 'r', long = "raw", help = "File with a raw request to send verbatim")]
    pub raw: Option<PathBuf>,

    #[arg(long = "keep-alive", help = "Keep the connection open after the request")]
    pub keep_alive: bool,

    #[arg(
        short = 't',
        long = "timeout",
        default_value_t = 15.0,
        help = "Read timeout in seconds"
    )]
    pub timeout: f64,

    #[arg(
        short = 'c',
        long = "connect-timeout",
        default_value_t = 5.0,
        help = "Connection timeout in seconds"
    )]
    pub connect_timeout: f64,

    #[arg(short = 'o', long = "output", help = "Save the response body here")]
    pub output: Option<PathBuf>,

    #[arg(long = "verify-ssl", help = "Verify TLS certificates")]
    pub verify_ssl: bool,
}

fn parse_header_args(raw: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .with_context(|| format!("invalid header format {:?}, use 'Name: Value'", entry))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(headers)
}

pub async fn run_scan_command(args: ScanArgs) -> anyhow::Result<i32> {
    let Some(url) = args.url_arg.or(args.url) else {
        eprintln!(
            "{}",
            "Error: URL is required, as an argument or with --url".red()
        );
        eprintln!("Example: rdesync scan https://example.com");
        return Ok(2);
    };

    let mut types = Vec::new();
    if let Some(list) = &args.types {
        for entry in list.split(',').filter(|t| !t.trim().is_empty()) {
            match DetectorKind::parse(entry) {
                Some(kind) => types.push(kind),
                None => warn!("unknown vulnerability type {:?}, skipping", entry.trim()),
            }
        }
        if types.is_empty() {
            eprintln!("{}", "Error: no valid vulnerability types selected".red());
            eprintln!("Available: cl.te, te.cl, h2.cl, h2.te");
            return Ok(2);
        }
    }

    let placement = match &args.h2_payload_placement {
        Some(text) => match PayloadPlacement::parse(text) {
            Some(placement) => placement,
            None => {
                eprintln!(
                    "{}",
                    format!("Error: invalid payload placement {:?}", text).red()
                );
                return Ok(2);
            }
        },
        None => PayloadPlacement::NormalHeader,
    };

    let options = ScanOptions {
        types,
        headers: parse_header_args(&args.header)?,
        timeout: Duration::from_secs_f64(args.timeout),
        connect_timeout: Duration::from_secs_f64(args.connect_timeout),
        exit_first: args.exit_first,
        placement,
        te_catalog: args.file,
        cl_catalog: args.cl_file,
        verify_tls: args.verify_ssl,
    };

    let stdout = std::io::stdout();
    let mut reporter = Reporter::new(stdout.lock());
    let result = run_scan(&url, &options, &mut reporter).await;
    drop(reporter);

    if let Some(path) = &args.output {
        result
            .write_json(path)
            .with_context(|| format!("writing results to {}", path.display()))?;
        println!("Results saved to {}", path.display());
    }

    println!(
        "Scan completed: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    Ok(result.exit_code)
}

pub async fn run_request_command(args: RequestArgs) -> anyhow::Result<i32> {
    let target = Target::parse(&args.url).map_err(|e| anyhow::anyhow!("{}", e))?;

    let mut client = Http1Client::new(target.clone())
        .with_timeouts(
            Duration::from_secs_f64(args.connect_timeout),
            Duration::from_secs_f64(args.timeout),
        )
        .with_verify_tls(args.verify_ssl);

    let response = if let Some(raw_path) = &args.raw {
        let wire = std::fs::read(raw_path)
            .with_context(|| format!("reading raw request from {}", raw_path.display()))?;
        client
            .exchange_raw(&wire, &args.method)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?
    } else {
        let mut request = Http1Request::new(&args.method, &target.path);
        let headers = parse_header_args(&args.header)?;
        let has_host = headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("host"));
        if !has_host {
            request = request.header("Host", target.authority());
        }
        for (name, value) in headers {
            request = request.header(name.into_bytes(), value.into_bytes());
        }
        if let Some(data) = &args.data {
            request = request
                .header("Content-Length", data.len().to_string())
                .body(data.as_bytes());
        }
        client
            .send_request(&request)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?
    };

    if !args.keep_alive {
        client.close().await;
    }

    println!(
        "{} {} {}",
        "Status:".green(),
        response.status_code,
        response.reason
    );
    println!(
        "{} {:.6} seconds",
        "Response time:".green(),
        response.elapsed.as_secs_f64()
    );
    for (name, value) in &response.headers {
        println!("  {}: {}", name.blue(), value);
    }
    if response.timed_out {
        println!("{}", "(body read timed out, partial response)".yellow());
    }

    match String::from_utf8(response.body.clone()) {
        Ok(text) => {
            println!("\n{}", text);
        }
        Err(_) => {
            println!("\n({} bytes of binary data)", response.body.len());
        }
    }

    if let Some(path) = &args.output {
        std::fs::write(path, &response.body)
            .with_context(|| format!("saving response body to {}", path.display()))?;
        println!("Response saved to {}", path.display());
    }

    Ok(0)
}
