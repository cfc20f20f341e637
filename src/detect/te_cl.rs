// File: detect/te_cl.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! TE.CL probe: front-end honors Transfer-Encoding, back-end honors
//! Content-Length.
//!
//! The probe declares `Content-Length: 4` but carries a complete chunked
//! body. A TE-framing front-end forwards the whole stream; a CL-framing
//! back-end consumes only 4 bytes, leaves `MUGGLED\r\n0\r\n\r\n` queued on
//! the socket, and stalls the in-flight response while it waits for a
//! request that never completes.

use std::time::Duration;

use crate::detect::{cl_te::send_timed, DetectorConfig};
use crate::error::Result;
use crate::http1::Http1Request;
use crate::target::Target;
use crate::variations::HeaderVariation;

const PROBE_BODY: &[u8] = b"8\r\nSMUGGLED\r\n0\r\n\r\n";
const PROBE_CONTENT_LENGTH: &str = "4";

pub(crate) async fn baseline(target: &Target, config: &DetectorConfig) -> Result<Duration> {
    let request = Http1Request::new("GET", &target.path)
        .header("Host", target.authority())
        .header("Accept", "*/*");

    send_timed(target, config, &request).await
}

pub(crate) async fn probe(
    target: &Target,
    variation: &HeaderVariation,
    config: &DetectorConfig,
) -> Result<Duration> {
    let mut request = Http1Request::new("POST", &target.path)
        .header("Host", target.authority())
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Content-Length", PROBE_CONTENT_LENGTH);

    for (name, value) in &config.extra_headers {
        request = request.header(name.as_bytes(), value.as_bytes());
    }

    request = request.header(
        variation.header_name.as_bytes(),
        variation.header_value.as_bytes(),
    );
    for extra in &variation.extra_headers {
        request = request.header(extra.name.as_bytes(), extra.value.as_bytes());
    }
    request = request.body(PROBE_BODY);

    send_timed(target, config, &request).await
}
