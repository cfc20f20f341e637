// File: detect/cl_te.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! CL.TE probe: front-end honors Content-Length, back-end honors
//! Transfer-Encoding.
//!
//! The probe body `1\r\nA\r\nX` is a chunked stream whose next chunk header
//! never arrives. A front-end framing on Content-Length forwards all 7
//! bytes; a TE-framing back-end decodes the one-byte chunk and then starves
//! waiting for the next size line, holding the response until its own
//! timeout.

use std::time::{Duration, Instant};

use crate::detect::DetectorConfig;
use crate::error::Result;
use crate::http1::{Http1Client, Http1Request};
use crate::target::Target;
use crate::variations::HeaderVariation;

const PROBE_BODY: &[u8] = b"1\r\nA\r\nX";
const BASELINE_BODY: &[u8] = b"0\r\n\r\nX";

pub(crate) async fn baseline(target: &Target, config: &DetectorConfig) -> Result<Duration> {
    let request = Http1Request::new("POST", &target.path)
        .header("Host", target.authority())
        .header("Content-Type", "application/x-www-form-urlencoded")
        .header("Content-Length", BASELINE_BODY.len().to_string())
        .body(BASELINE_BODY);

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
        .header("Content-Length", PROBE_BODY.len().to_string());

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

/// Send on a fresh connection and return the wall-clock duration, timeout
/// included: a probe that times out IS the measurement.
pub(crate) async fn send_timed(
    target: &Target,
    config: &DetectorConfig,
    request: &Http1Request,
) -> Result<Duration> {
    let mut client = Http1Client::new(target.clone())
        .with_timeouts(config.connect_timeout, config.timeout)
        .with_verify_tls(config.verify_tls);

    client.connect().await?;
    let started = Instant::now();
    let result = client.send_request(request).await;
    let elapsed = started.elapsed();
    client.close().await;

    match result {
        Ok(response) => Ok(response.elapsed),
        Err(e) if e.is_timeout() => Ok(elapsed),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_body_length_matches_content_length() {
        assert_eq!(PROBE_BODY.len(), 7);
        assert_eq!(BASELINE_BODY.len(), 6);
    }

    #[test]
    fn probe_request_keeps_variation_spelling() {
        let target = Target::parse("http://example.com/submit").unwrap();
        let variation = HeaderVariation {
            description: "space before colon".into(),
            header_name: "Transfer-Encoding ".into(),
            header_value: "chunked".into(),
            extra_headers: Vec::new(),
        };
        let config = DetectorConfig::default();

        // Build the same request the probe sends and check the wire bytes.
        let mut request = Http1Request::new("POST", &target.path)
            .header("Host", target.authority())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Content-Length", PROBE_BODY.len().to_string());
        for (name, value) in &config.extra_headers {
            request = request.header(name.as_bytes(), value.as_bytes());
        }
        request = request
            .header(
                variation.header_name.as_bytes(),
                variation.header_value.as_bytes(),
            )
            .body(PROBE_BODY);

        let wire = request.to_bytes();
        let text = String::from_utf8_lossy(&wire);
        assert!(text.contains("Transfer-Encoding : chunked\r\n"));
        assert!(text.contains("Content-Length: 7\r\n"));
        assert!(text.ends_with("1\r\nA\r\nX"));
    }
}
