// File: http1.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Result, ScanError};
use crate::target::Target;
use crate::tls;

/// Cap on status line + headers. Protects against pathological servers.
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// One header line, byte-exact. Case, duplicates, and embedded whitespace are
/// the payload here, so nothing is ever normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An HTTP/1.1 request under full caller control. The serializer emits
/// exactly what is here: no Host, no Content-Length, no reordering.
#[derive(Debug, Clone)]
pub struct Http1Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<HeaderField>,
    pub body: Vec<u8>,
}

impl Http1Request {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push(HeaderField::new(name, value));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize to wire bytes: start line, each header as `name: value`,
    /// blank line, body. Headers go out in order with their bytes untouched.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(self.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.path.as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\n");
        for field in &self.headers {
            out.extend_from_slice(&field.name);
            out.extend_from_slice(b": ");
            out.extend_from_slice(&field.value);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

#[derive(Debug, Clone)]
pub struct Http1Response {
    pub status_code: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
    pub raw: Vec<u8>,
    /// Body read aborted on the read timeout; `elapsed` is the wall clock at
    /// abort. Detectors treat this as the timing signal, not as failure.
    pub timed_out: bool,
    /// Framing oddities observed while parsing (duplicate differing
    /// Content-Length, bad chunk size). Recorded, never rejected.
    pub anomalies: Vec<String>,
}

impl Http1Response {
    /// First header with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Plain or TLS socket; both clients speak through this.
pub(crate) enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    pub(crate) async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => s.write_all(data).await,
            Self::Tls(s) => s.write_all(data).await,
        }
    }

    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf).await,
            Self::Tls(s) => s.read(buf).await,
        }
    }

    pub(crate) async fn shutdown(&mut self) {
        let _ = match self {
            Self::Plain(s) => s.shutdown().await,
            Self::Tls(s) => s.shutdown().await,
        };
    }

    /// ALPN protocol the peer selected, when this is a TLS transport.
    pub(crate) fn alpn(&self) -> Option<String> {
        match self {
            Self::Plain(_) => None,
            Self::Tls(s) => crate::tls::negotiated_alpn(s),
        }
    }
}

/// Raw HTTP/1.1 client over one TCP or TLS socket.
///
/// Owns the socket from `connect` to `close`; a re-connect is a new client.
pub struct Http1Client {
    target: Target,
    connect_timeout: Duration,
    read_timeout: Duration,
    verify_tls: bool,
    transport: Option<Transport>,
    /// Bytes received but not yet consumed by a response parse. Pipelined
    /// responses arrive back to back, so over-reads must be kept.
    unparsed: Vec<u8>,
}

impl Http1Client {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(15),
            verify_tls: false,
            transport: None,
            unparsed: Vec::new(),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    pub fn with_verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub async fn connect(&mut self) -> Result<()> {
        if self.transport.is_some() {
            return Ok(());
        }

        let addr = self.target.socket_addr();
        debug!(
            "connecting to {} ({})",
            addr,
            if self.target.is_tls() { "TLS" } else { "TCP" }
        );

        let mut addrs = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| ScanError::Dns(format!("{}: {}", self.target.host, e)))?;
        let resolved = addrs
            .next()
            .ok_or_else(|| ScanError::Dns(format!("{}: no addresses", self.target.host)))?;

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(resolved))
            .await
            .map_err(|_| ScanError::Timeout(self.connect_timeout))?
            .map_err(|e| ScanError::Connect(format!("{}: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ScanError::Connect(e.to_string()))?;

        if self.target.is_tls() {
            let config = tls::client_config(&["http/1.1"], self.verify_tls);
            let connector = TlsConnector::from(config);
            let server_name = ServerName::try_from(self.target.host.clone())
                .map_err(|e| ScanError::Tls(format!("bad server name: {}", e)))?;
            let tls_stream =
                tokio::time::timeout(self.connect_timeout, connector.connect(server_name, stream))
                    .await
                    .map_err(|_| ScanError::Timeout(self.connect_timeout))?
                    .map_err(|e| ScanError::Tls(e.to_string()))?;
            self.transport = Some(Transport::Tls(Box::new(tls_stream)));
        } else {
            self.transport = Some(Transport::Plain(stream));
        }

        self.unparsed.clear();
        Ok(())
    }

    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await;
        }
        self.unparsed.clear();
    }

    /// Write raw bytes to the socket.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.connect().await?;
        trace!("sending {} bytes", data.len());
        let transport = self.transport.as_mut().expect("connected");
        transport
            .write_all(data)
            .await
            .map_err(|e| ScanError::Connect(format!("send failed: {}", e)))
    }

    /// One read of up to `max` bytes with its own timeout budget.
    pub async fn receive_raw(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| ScanError::Connect("not connected".into()))?;

        if !self.unparsed.is_empty() {
            let take = self.unparsed.len().min(max);
            return Ok(self.unparsed.drain(..take).collect());
        }

        let mut buf = vec![0u8; max];
        let n = tokio::time::timeout(timeout, transport.read(&mut buf))
            .await
            .map_err(|_| ScanError::Timeout(timeout))?
            .map_err(ScanError::from)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Send a request and parse the response.
    ///
    /// The elapsed clock starts immediately before the first write and stops
    /// when the response is complete or the body read times out.
    pub async fn send_request(&mut self, request: &Http1Request) -> Result<Http1Response> {
        self.connect().await?;
        let wire = request.to_bytes();
        debug!(
            "sending {} {} ({} bytes)",
            request.method,
            request.path,
            wire.len()
        );

        let started = Instant::now();
        self.transport
            .as_mut()
            .expect("connected")
            .write_all(&wire)
            .await
            .map_err(|e| ScanError::Connect(format!("send failed: {}", e)))?;

        let deadline = started + self.read_timeout;
        let mut response = self.read_response(&request.method, deadline).await?;
        response.elapsed = started.elapsed();
        debug!(
            "response {} in {:.3}s (timed_out={})",
            response.status_code,
            response.elapsed.as_secs_f64(),
            response.timed_out
        );
        Ok(response)
    }

    /// Write caller-supplied raw bytes and parse one response off the wire.
    /// `method_hint` feeds the bodyless-response rules (HEAD has no body).
    pub async fn exchange_raw(
        &mut self,
        wire: &[u8],
        method_hint: &str,
    ) -> Result<Http1Response> {
        self.connect().await?;
        let started = Instant::now();
        self.transport
            .as_mut()
            .expect("connected")
            .write_all(wire)
            .await
            .map_err(|e| ScanError::Connect(format!("send failed: {}", e)))?;

        let deadline = started + self.read_timeout;
        let mut response = self.read_response(method_hint, deadline).await?;
        response.elapsed = started.elapsed();
        Ok(response)
    }

    /// Write every request back to back, then read the responses in order.
    pub async fn pipeline_requests(
        &mut self,
        requests: &[Http1Request],
    ) -> Result<Vec<Http1Response>> {
        self.connect().await?;
        debug!("pipelining {} requests", requests.len());

        let started = Instant::now();
        let mut wire = Vec::new();
        for request in requests {
            wire.extend_from_slice(&request.to_bytes());
        }
        self.transport
            .as_mut()
            .expect("connected")
            .write_all(&wire)
            .await
            .map_err(|e| ScanError::Connect(format!("send failed: {}", e)))?;

        let deadline = started + self.read_timeout;
        let mut responses = Vec::with_capacity(requests.len());
        for (i, request) in requests.iter().enumerate() {
            match self.read_response(&request.method, deadline).await {
                Ok(mut response) => {
                    response.elapsed = started.elapsed();
                    responses.push(response);
                }
                Err(e) if i == 0 => return Err(e),
                Err(e) => {
                    warn!("pipeline response {} unreadable: {}", i + 1, e);
                    break;
                }
            }
        }
        Ok(responses)
    }

    async fn fill(&mut self, deadline: Instant) -> Result<usize> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| ScanError::Connect("not connected".into()))?;
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .ok_or(ScanError::Timeout(Duration::ZERO))?;

        let mut chunk = [0u8; 4096];
        let n = tokio::time::timeout(remaining, transport.read(&mut chunk))
            .await
            .map_err(|_| ScanError::Timeout(remaining))?
            .map_err(ScanError::from)?;
        self.unparsed.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Read until `needle` is buffered (index past it) or the cap is hit.
    async fn read_until(
        &mut self,
        needle: &[u8],
        cap: usize,
        deadline: Instant,
    ) -> Result<Vec<u8>> {
        loop {
            if let Some(pos) = find_subslice(&self.unparsed, needle) {
                let end = pos + needle.len();
                return Ok(self.unparsed.drain(..end).collect());
            }
            if self.unparsed.len() >= cap {
                return Err(ScanError::Protocol(format!(
                    "no {:?} terminator within {} bytes",
                    String::from_utf8_lossy(needle),
                    cap
                )));
            }
            if self.fill(deadline).await? == 0 {
                return Err(ScanError::Protocol("connection closed mid-read".into()));
            }
        }
    }

    /// Read exactly `n` bytes; on timeout or FIN returns what arrived and a
    /// flag telling which.
    async fn read_exact_or_partial(
        &mut self,
        n: usize,
        deadline: Instant,
    ) -> (Vec<u8>, bool /* timed out */) {
        while self.unparsed.len() < n {
            match self.fill(deadline).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.is_timeout() => {
                    let got: Vec<u8> = self.unparsed.drain(..).collect();
                    return (got, true);
                }
                Err(_) => break,
            }
        }
        let take = self.unparsed.len().min(n);
        (self.unparsed.drain(..take).collect(), false)
    }

    async fn read_response(&mut self, method: &str, deadline: Instant) -> Result<Http1Response> {
        // A timeout here means no complete response head arrived in the
        // budget; the caller turns that into the timing measurement.
        let head = self
            .read_until(b"\r\n\r\n", MAX_HEADER_BYTES, deadline)
            .await?;

        let mut raw = head.clone();
        let (status_code, reason, headers) = parse_head(&head)?;

        let mut anomalies = Vec::new();
        let mut body = Vec::new();
        let mut timed_out = false;

        let has_empty_body =
            method.eq_ignore_ascii_case("HEAD") || status_code < 200 || matches!(status_code, 204 | 304);

        if has_empty_body {
            // nothing to read
        } else if te_is_chunked(&headers) {
            let (decoded, chunk_raw, aborted, mut notes) =
                self.read_chunked_body(deadline).await;
            body = decoded;
            raw.extend_from_slice(&chunk_raw);
            timed_out = aborted;
            anomalies.append(&mut notes);
        } else if let Some(length) = content_length(&headers, &mut anomalies) {
            let (data, aborted) = self.read_exact_or_partial(length, deadline).await;
            raw.extend_from_slice(&data);
            body = data;
            timed_out = aborted;
        } else {
            // Close-delimited: drain until FIN or the budget runs out.
            loop {
                match self.fill(deadline).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) if e.is_timeout() => {
                        timed_out = true;
                        break;
                    }
                    Err(_) => break,
                }
            }
            body = self.unparsed.drain(..).collect();
            raw.extend_from_slice(&body);
        }

        Ok(Http1Response {
            status_code,
            reason,
            headers,
            body,
            elapsed: Duration::ZERO,
            raw,
            timed_out,
            anomalies,
        })
    }

    /// Returns (decoded body, raw bytes consumed, timed out, anomalies).
    async fn read_chunked_body(
        &mut self,
        deadline: Instant,
    ) -> (Vec<u8>, Vec<u8>, bool, Vec<String>) {
        let mut decoded = Vec::new();
        let mut raw = Vec::new();
        let mut anomalies = Vec::new();

        loop {
            let size_line = match self.read_until(b"\r\n", MAX_HEADER_BYTES, deadline).await {
                Ok(line) => line,
                Err(e) => return (decoded, raw, e.is_timeout(), anomalies),
            };
            raw.extend_from_slice(&size_line);

            let size_text = String::from_utf8_lossy(&size_line);
            let size_hex = size_text
                .trim_end_matches("\r\n")
                .split(';')
                .next()
                .unwrap_or("")
                .trim();
            let size = match usize::from_str_radix(size_hex, 16) {
                Ok(size) => size,
                Err(_) => {
                    anomalies.push(format!("invalid chunk size line: {:?}", size_hex));
                    return (decoded, raw, false, anomalies);
                }
            };

            if size == 0 {
                // Optional trailers, then the blank line.
                loop {
                    match self.read_until(b"\r\n", MAX_HEADER_BYTES, deadline).await {
                        Ok(line) => {
                            let done = line == b"\r\n";
                            raw.extend_from_slice(&line);
                            if done {
                                return (decoded, raw, false, anomalies);
                            }
                        }
                        Err(e) => return (decoded, raw, e.is_timeout(), anomalies),
                    }
                }
            }

            let (data, aborted) = self.read_exact_or_partial(size, deadline).await;
            raw.extend_from_slice(&data);
            let complete = data.len() == size;
            decoded.extend_from_slice(&data);
            if aborted || !complete {
                return (decoded, raw, aborted, anomalies);
            }

            match self.read_until(b"\r\n", 4, deadline).await {
                Ok(crlf) => raw.extend_from_slice(&crlf),
                Err(e) => return (decoded, raw, e.is_timeout(), anomalies),
            }
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_head(head: &[u8]) -> Result<(u16, String, Vec<(String, String)>)> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| ScanError::Protocol("empty response".into()))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/1.") {
        return Err(ScanError::Protocol(format!(
            "bad status line: {:?}",
            status_line
        )));
    }
    let status_code: u16 = parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| ScanError::Protocol(format!("bad status code in {:?}", status_line)))?;
    let reason = parts.next().unwrap_or("").to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some(colon) = line.find(':') {
            let name = line[..colon].trim().to_string();
            let value = line[colon + 1..].trim().to_string();
            headers.push((name, value));
        }
        // malformed header lines are skipped, not fatal
    }

    Ok((status_code, reason, headers))
}

fn te_is_chunked(headers: &[(String, String)]) -> bool {
    headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("transfer-encoding"))
        .any(|(_, v)| {
            v.split(',')
                .next_back()
                .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
                .unwrap_or(false)
        })
}

/// First Content-Length wins; differing duplicates are recorded, not fatal.
fn content_length(headers: &[(String, String)], anomalies: &mut Vec<String>) -> Option<usize> {
    let mut values = headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .map(|(_, v)| v.trim());

    let first = values.next()?;
    let parsed: usize = first.parse().ok()?;
    for other in values {
        if other != first {
            anomalies.push(format!(
                "conflicting Content-Length headers: {} vs {}",
                first, other
            ));
        }
    }
    Some(parsed)
}

/// Chunk-encode `body` with fixed-size chunks. Test and tooling helper; the
/// probes carry hand-built chunked bodies.
pub fn encode_chunked(body: &[u8], chunk_size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    if chunk_size > 0 {
        for chunk in body.chunks(chunk_size) {
            out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
            out.extend_from_slice(chunk);
            out.extend_from_slice(b"\r\n");
        }
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}
