// File: detect/h2_te.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! H2.TE probe: an HTTP/2 front-end downgrades to HTTP/1.1 carrying a
//! smuggled `transfer-encoding: chunked`.
//!
//! The probe body is `0\r\n` with the final CRLF withheld and the stream
//! left half-open. A back-end that frames on the injected header keeps
//! waiting for the chunked terminator; the elapsed time tells.

use std::time::Duration;

use crate::detect::h2_cl::{default_headers, place_payload, send_timed, standard_pseudo, user_headers};
use crate::detect::DetectorConfig;
use crate::error::Result;
use crate::h2::Header;
use crate::target::Target;
use crate::variations::HeaderVariation;

/// Terminating chunk missing its final CRLF.
const PROBE_BODY: &[u8] = b"0\r\n";
const BASELINE_BODY: &[u8] = b"ping";

pub(crate) async fn baseline(target: &Target, config: &DetectorConfig) -> Result<Duration> {
    let mut headers = default_headers();
    headers.extend(user_headers(config));
    headers.push(Header::new(
        "content-length",
        BASELINE_BODY.len().to_string(),
    ));

    send_timed(
        target,
        config,
        standard_pseudo(target, &target.path),
        headers,
        BASELINE_BODY,
        true,
    )
    .await
}

pub(crate) async fn probe(
    target: &Target,
    variation: &HeaderVariation,
    config: &DetectorConfig,
) -> Result<Duration> {
    let (pseudo, injected) = place_payload(
        target,
        config.placement,
        &variation.header_name,
        &variation.header_value,
    );

    let mut headers = default_headers();
    headers.extend(user_headers(config));
    if let Some(header) = injected {
        headers.push(header);
    }
    for extra in &variation.extra_headers {
        headers.push(Header::new(extra.name.as_bytes(), extra.value.as_bytes()));
    }

    // end_stream=false: the stream stays half-open so the only way the
    // back-end completes the chunked body is data that never comes.
    send_timed(target, config, pseudo, headers, PROBE_BODY, false).await
}
