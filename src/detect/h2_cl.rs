// File: detect/h2_cl.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! H2.CL probe: an HTTP/2 front-end downgrades to HTTP/1.1 and forwards a
//! content-length one byte longer than the body.
//!
//! The back-end waits for the missing byte and the front-end blocks on the
//! response. The smuggled header travels as a regular field or injected via
//! a custom header value, a custom header name, or the `:path` pseudo-header,
//! depending on the configured placement.

use std::time::{Duration, Instant};

use crate::detect::{DetectorConfig, PayloadPlacement};
use crate::error::Result;
use crate::h2::{H2Client, Header};
use crate::target::Target;
use crate::variations::HeaderVariation;

const PROBE_BODY: &[u8] = b"abc";

/// Browser-shaped header set the probes ride along with.
pub(crate) fn default_headers() -> Vec<Header> {
    vec![
        Header::new(
            "user-agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
        ),
        Header::new("accept", "*/*"),
        Header::new("accept-encoding", "gzip, deflate, br"),
        Header::new("accept-language", "en-US;q=0.9,en;q=0.8"),
        Header::new("cache-control", "max-age=0"),
    ]
}

/// Standard pseudo-header block for this target.
pub(crate) fn standard_pseudo(target: &Target, path: &str) -> Vec<Header> {
    vec![
        Header::new(":method", "POST"),
        Header::new(":path", path),
        Header::new(
            ":scheme",
            if target.is_tls() { "https" } else { "http" },
        ),
        Header::new(":authority", target.authority()),
    ]
}

/// Place the smuggled `name: value` directive per the configured placement.
/// Returns the pseudo block (possibly with a poisoned `:path`) and the
/// regular header to append, if any.
pub(crate) fn place_payload(
    target: &Target,
    placement: PayloadPlacement,
    name: &str,
    value: &str,
) -> (Vec<Header>, Option<Header>) {
    match placement {
        PayloadPlacement::NormalHeader => (
            standard_pseudo(target, &target.path),
            Some(Header::new(name.as_bytes(), value.as_bytes())),
        ),
        PayloadPlacement::CustomHeaderValue => (
            standard_pseudo(target, &target.path),
            Some(Header::new(
                &b"x-smuggled"[..],
                format!("{}: {}", name, value).into_bytes(),
            )),
        ),
        PayloadPlacement::CustomHeaderName => (
            standard_pseudo(target, &target.path),
            Some(Header::new(
                format!("x-smuggled\r\n{}: {}\r\nx-pad", name, value).into_bytes(),
                &b"1"[..],
            )),
        ),
        PayloadPlacement::RequestLine => {
            // A front-end that pastes :path into an HTTP/1.1 request line
            // reproduces the injected header verbatim.
            let poisoned_path = format!(
                "{} HTTP/1.1\r\n{}: {}\r\nx-ignore: x",
                target.path, name, value
            );
            (standard_pseudo(target, &poisoned_path), None)
        }
    }
}

/// Send on a fresh connection, close it, and return the wall-clock duration
/// timeout included.
pub(crate) async fn send_timed(
    target: &Target,
    config: &DetectorConfig,
    pseudo: Vec<Header>,
    headers: Vec<Header>,
    body: &[u8],
    end_stream: bool,
) -> Result<Duration> {
    let mut client = H2Client::new(target.clone())
        .with_timeouts(config.connect_timeout, config.timeout)
        .with_verify_tls(config.verify_tls);

    client.connect().await?;
    let started = Instant::now();
    let result = client
        .send_malformed_headers(pseudo, headers, body, end_stream)
        .await;
    let elapsed = started.elapsed();
    client.close().await;

    match result {
        Ok(response) => Ok(response.elapsed),
        Err(e) if e.is_timeout() => Ok(elapsed),
        Err(e) => Err(e),
    }
}

pub(crate) fn user_headers(config: &DetectorConfig) -> Vec<Header> {
    config
        .extra_headers
        .iter()
        .map(|(name, value)| Header::new(name.as_bytes(), value.as_bytes()))
        .collect()
}

pub(crate) async fn baseline(target: &Target, config: &DetectorConfig) -> Result<Duration> {
    let mut headers = default_headers();
    headers.extend(user_headers(config));
    headers.push(Header::new(
        "content-length",
        PROBE_BODY.len().to_string(),
    ));

    send_timed(
        target,
        config,
        standard_pseudo(target, &target.path),
        headers,
        PROBE_BODY,
        true,
    )
    .await
}

pub(crate) async fn probe(
    target: &Target,
    variation: &HeaderVariation,
    config: &DetectorConfig,
) -> Result<Duration> {
    // One byte more than the body carries; the downgraded back-end waits
    // for it.
    let computed = (PROBE_BODY.len() + 1).to_string();
    let value = variation.resolved_value(&computed);

    let (pseudo, injected) =
        place_payload(target, config.placement, &variation.header_name, &value);

    let mut headers = default_headers();
    headers.extend(user_headers(config));
    if let Some(header) = injected {
        headers.push(header);
    }
    for extra in &variation.extra_headers {
        headers.push(Header::new(extra.name.as_bytes(), extra.value.as_bytes()));
    }

    send_timed(target, config, pseudo, headers, PROBE_BODY, true).await
}
