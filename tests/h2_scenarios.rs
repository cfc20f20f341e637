// File: h2_scenarios.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! End-to-end HTTP/2 scenarios against the minimal frame-level mock.

mod common;

use std::time::Duration;

use serial_test::serial;

use common::{find, CatalogFile, H2Mock, Plan};
use rdesync::detect::{DetectorKind, PayloadPlacement};
use rdesync::h2::hpack::Header;
use rdesync::h2::H2Client;
use rdesync::report::Reporter;
use rdesync::scan::{run_scan, ScanOptions};
use rdesync::target::Target;

const ONE_CL_VARIATION: &str = r#"[
    {"description": "Standard Content-Length",
     "header_name": "content-length", "header_value": "<computed>"}
]"#;

const ONE_TE_VARIATION: &str = r#"[
    {"description": "Standard Transfer-Encoding",
     "header_name": "transfer-encoding", "header_value": "chunked"}
]"#;

fn header_name_contains(headers: &[Header], needle: &[u8]) -> bool {
    headers.iter().any(|h| find(&h.name, needle).is_some())
}

#[tokio::test]
#[serial]
async fn h2_request_response_roundtrip() {
    let mock = H2Mock::start(|_| common::quick()).await;

    let target = Target::parse(&mock.url()).unwrap();
    let mut client = H2Client::new(target)
        .with_timeouts(Duration::from_secs(2), Duration::from_secs(2));
    client.connect().await.unwrap();
    let response = client
        .send_request("POST", "/", &[Header::new("content-length", "3")], b"abc")
        .await
        .unwrap();
    client.close().await;

    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, b"OK");
    assert!(response.stream_ended);
    assert!(!response.timed_out);
}

#[tokio::test]
#[serial]
async fn h2_cl_custom_header_name_injects_crlf_bytes() {
    colored::control::set_override(false);

    let mock = H2Mock::start(|_| common::quick()).await;
    let catalog = CatalogFile::write("h2cl-name", ONE_CL_VARIATION);

    let options = ScanOptions {
        types: vec![DetectorKind::H2Cl],
        placement: PayloadPlacement::CustomHeaderName,
        timeout: Duration::from_millis(800),
        connect_timeout: Duration::from_secs(2),
        cl_catalog: Some(catalog.path.clone()),
        ..Default::default()
    };

    let mut reporter = Reporter::new(Vec::new());
    let result = run_scan(&mock.url(), &options, &mut reporter).await;
    assert_eq!(result.exit_code, 0, "fast responses, no finding expected");

    // Baseline plus one probe.
    let captured = mock.captured();
    assert_eq!(captured.len(), 2);

    // The wire-level HPACK block of the probe carries the injected bytes
    // verbatim, and they survive a conformant decode.
    let needle = b"\r\ncontent-length: 4\r\n";
    let probe = captured
        .iter()
        .find(|req| find(&req.header_block, needle).is_some())
        .expect("no captured block carries the raw injected bytes");
    assert!(header_name_contains(&probe.headers, needle));
}

#[tokio::test]
#[serial]
async fn h2_cl_request_line_placement_poisons_path() {
    colored::control::set_override(false);

    let mock = H2Mock::start(|_| common::quick()).await;
    let catalog = CatalogFile::write("h2cl-reqline", ONE_CL_VARIATION);

    let options = ScanOptions {
        types: vec![DetectorKind::H2Cl],
        placement: PayloadPlacement::RequestLine,
        timeout: Duration::from_millis(800),
        connect_timeout: Duration::from_secs(2),
        cl_catalog: Some(catalog.path.clone()),
        ..Default::default()
    };

    let mut reporter = Reporter::new(Vec::new());
    let _ = run_scan(&mock.url(), &options, &mut reporter).await;

    let captured = mock.captured();
    let poisoned = captured.iter().any(|req| {
        req.headers.iter().any(|h| {
            h.name == b":path" && find(&h.value, b"HTTP/1.1\r\ncontent-length: 4\r\n").is_some()
        })
    });
    assert!(poisoned, "no :path value carried the injected request line");
}

#[tokio::test]
#[serial]
async fn h2_te_withheld_terminator_times_out_as_vulnerable() {
    colored::control::set_override(false);

    // Answer clean requests instantly; sit on anything that smuggles a
    // transfer-encoding header.
    let mock = H2Mock::start(|headers| {
        if header_name_contains(headers, b"transfer-encoding") {
            Plan::Hold
        } else {
            common::quick()
        }
    })
    .await;

    let catalog = CatalogFile::write("h2te-timeout", ONE_TE_VARIATION);
    let timeout = Duration::from_millis(800);
    let options = ScanOptions {
        types: vec![DetectorKind::H2Te],
        timeout,
        connect_timeout: Duration::from_secs(2),
        te_catalog: Some(catalog.path.clone()),
        ..Default::default()
    };

    let mut reporter = Reporter::new(Vec::new());
    let result = run_scan(&mock.url(), &options, &mut reporter).await;
    let output = String::from_utf8(reporter.into_inner()).unwrap();

    assert_eq!(result.exit_code, 1);
    assert_eq!(result.vulnerable_count(), 1);
    let finding = &result.findings[0];
    assert_eq!(finding.kind, "H2.TE");
    assert_eq!(finding.placement.as_deref(), Some("normal_header"));

    // The probe consumed the whole read budget, nothing more.
    let budget = timeout.as_secs_f64();
    assert!(
        (finding.probe_elapsed - budget).abs() < 0.2,
        "probe_elapsed {} not within 200ms of the {}s budget",
        finding.probe_elapsed,
        budget
    );

    assert!(output.contains("Vulnerability_Type: H2.TE"));

    // The probe stream was left half-open: DATA carried the terminating
    // chunk without its final CRLF.
    let captured = mock.captured();
    let probe = captured
        .iter()
        .find(|req| header_name_contains(&req.headers, b"transfer-encoding"))
        .expect("probe request not captured");
    assert_eq!(probe.data, b"0\r\n");
}

#[tokio::test]
#[serial]
async fn h2_cl_normal_header_off_by_one() {
    colored::control::set_override(false);

    let mock = H2Mock::start(|_| common::quick()).await;
    let catalog = CatalogFile::write("h2cl-normal", ONE_CL_VARIATION);

    let options = ScanOptions {
        types: vec![DetectorKind::H2Cl],
        timeout: Duration::from_millis(800),
        connect_timeout: Duration::from_secs(2),
        cl_catalog: Some(catalog.path.clone()),
        ..Default::default()
    };

    let mut reporter = Reporter::new(Vec::new());
    let _ = run_scan(&mock.url(), &options, &mut reporter).await;

    let captured = mock.captured();
    assert_eq!(captured.len(), 2);

    // Baseline declares the true length, the probe one byte more.
    let lengths: Vec<Vec<u8>> = captured
        .iter()
        .flat_map(|req| {
            req.headers
                .iter()
                .filter(|h| h.name.eq_ignore_ascii_case(b"content-length"))
                .map(|h| h.value.clone())
        })
        .collect();
    assert!(lengths.contains(&b"3".to_vec()), "baseline content-length");
    assert!(lengths.contains(&b"4".to_vec()), "probe content-length");

    for req in &captured {
        assert_eq!(req.data, b"abc");
    }
}
