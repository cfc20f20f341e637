// File: h2/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Raw HTTP/2 client.
//!
//! Speaks just enough of RFC 7540 to open a connection, emit HEADERS/DATA
//! frames under full caller control, and collect whatever the server sends
//! back. Validation that a general-purpose library would enforce (pseudo-
//! header uniqueness, forbidden connection-specific headers, lowercase
//! names) is intentionally absent; producing those requests is the tool's
//! whole job.

pub mod frame;
pub mod hpack;

use std::time::{Duration, Instant};

use bytes::BytesMut;
use log::{debug, trace, warn};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{Result, ScanError};
use crate::http1::Transport;
use crate::target::Target;
use crate::tls;

pub use hpack::Header;

use frame::{flags, frame_type, Frame, FrameHeader, FRAME_HEADER_SIZE};

#[derive(Debug, Clone)]
pub struct H2Response {
    /// 0 when no `:status` arrived before the stream ended or timed out.
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
    pub stream_ended: bool,
    /// The read budget ran out before END_STREAM. Expected for the withheld-
    /// termination probes; `elapsed` is the timing signal.
    pub timed_out: bool,
    /// Error code from GOAWAY or RST_STREAM, when the server bailed out.
    pub error_code: Option<u32>,
}

/// One HTTP/2 connection. Stream ids start at 1 and step by 2; the stream
/// bookkeeping holds plain ids, never references back into the connection.
pub struct H2Client {
    target: Target,
    connect_timeout: Duration,
    timeout: Duration,
    verify_tls: bool,
    transport: Option<Transport>,
    next_stream_id: u32,
    encoder: hpack::Encoder,
    decoder: hpack::Decoder,
    recv: BytesMut,
}

impl H2Client {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
            verify_tls: false,
            transport: None,
            next_stream_id: 1,
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
            recv: BytesMut::new(),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.timeout = read;
        self
    }

    pub fn with_verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    /// Connect, negotiate h2 (over TLS via ALPN, over TCP by prior
    /// knowledge), send the preface and SETTINGS, and wait for the server's
    /// SETTINGS.
    pub async fn connect(&mut self) -> Result<()> {
        if self.transport.is_some() {
            return Ok(());
        }

        let addr = self.target.socket_addr();
        debug!("h2: connecting to {}", addr);

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

        let mut transport = if self.target.is_tls() {
            let config = tls::client_config(&["h2"], self.verify_tls);
            let connector = TlsConnector::from(config);
            let server_name = ServerName::try_from(self.target.host.clone())
                .map_err(|e| ScanError::Tls(format!("bad server name: {}", e)))?;
            let tls_stream =
                tokio::time::timeout(self.connect_timeout, connector.connect(server_name, stream))
                    .await
                    .map_err(|_| ScanError::Timeout(self.connect_timeout))?
                    .map_err(|e| ScanError::Tls(e.to_string()))?;
            let transport = Transport::Tls(Box::new(tls_stream));
            match transport.alpn().as_deref() {
                Some("h2") => {}
                other => {
                    // Some front-ends skip ALPN yet still accept h2; keep
                    // going, the preface settles it either way.
                    warn!("h2: server negotiated {:?}, forcing h2 anyway", other);
                }
            }
            transport
        } else {
            Transport::Plain(stream)
        };

        let mut hello = BytesMut::new();
        hello.extend_from_slice(frame::PREFACE);
        frame::encode_settings(&mut hello, false);
        transport
            .write_all(&hello)
            .await
            .map_err(|e| ScanError::Connect(format!("preface send failed: {}", e)))?;

        self.transport = Some(transport);
        self.recv.clear();

        // Await the server SETTINGS; tolerate silence, some servers only
        // speak after the first request frame.
        let deadline = Instant::now() + self.connect_timeout;
        loop {
            match self.next_frame(deadline).await {
                Ok(frame) if frame.header.frame_type == frame_type::SETTINGS => {
                    if !frame.header.has_flag(flags::ACK) {
                        self.write_settings_ack().await?;
                    }
                    break;
                }
                Ok(frame) => {
                    trace!("h2: frame type {} before SETTINGS", frame.header.frame_type);
                    if frame.header.frame_type == frame_type::GOAWAY {
                        let (_, code) = frame::parse_goaway(&frame.payload)?;
                        return Err(ScanError::Protocol(format!(
                            "GOAWAY during handshake (error code {})",
                            code
                        )));
                    }
                }
                Err(e) if e.is_timeout() => {
                    warn!("h2: no SETTINGS from server, continuing");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        debug!("h2: connection established");
        Ok(())
    }

    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let mut buf = BytesMut::new();
            frame::encode_goaway(&mut buf, 0, 0);
            let _ = transport.write_all(&buf).await;
            transport.shutdown().await;
        }
        self.recv.clear();
    }

    /// Well-formed request: standard pseudo-headers, lowercased field names.
    pub async fn send_request(
        &mut self,
        method: &str,
        path: &str,
        headers: &[Header],
        body: &[u8],
    ) -> Result<H2Response> {
        let scheme = if self.target.is_tls() { "https" } else { "http" };
        let pseudo = vec![
            Header::new(":method", method),
            Header::new(":path", path),
            Header::new(":scheme", scheme),
            Header::new(":authority", self.target.authority()),
        ];
        let normalized: Vec<Header> = headers
            .iter()
            .map(|h| Header::new(h.name.to_ascii_lowercase(), h.value.clone()))
            .collect();
        self.send_frames(pseudo, normalized, body, true).await
    }

    /// Malformed request: every header goes out exactly as given, pseudo
    /// list included (duplicates and all), and the caller decides whether
    /// the stream is ever terminated.
    pub async fn send_malformed_headers(
        &mut self,
        pseudo: Vec<Header>,
        headers: Vec<Header>,
        data: &[u8],
        end_stream: bool,
    ) -> Result<H2Response> {
        self.send_frames(pseudo, headers, data, end_stream).await
    }

    async fn send_frames(
        &mut self,
        pseudo: Vec<Header>,
        headers: Vec<Header>,
        data: &[u8],
        end_stream: bool,
    ) -> Result<H2Response> {
        self.connect().await?;

        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;

        let mut fields = pseudo;
        fields.extend(headers);

        let mut block = BytesMut::new();
        self.encoder.encode(&fields, &mut block);

        let mut wire = BytesMut::new();
        frame::encode_headers(&mut wire, stream_id, &block, data.is_empty() && end_stream);
        if !data.is_empty() {
            frame::encode_data(&mut wire, stream_id, data, end_stream);
        }

        debug!(
            "h2: stream {} sending {} header fields, {} data bytes, end_stream={}",
            stream_id,
            fields.len(),
            data.len(),
            end_stream
        );

        let started = Instant::now();
        self.transport
            .as_mut()
            .expect("connected")
            .write_all(&wire)
            .await
            .map_err(|e| ScanError::Connect(format!("send failed: {}", e)))?;

        let deadline = started + self.timeout;
        let mut response = self.read_stream(stream_id, deadline).await?;
        response.elapsed = started.elapsed();
        debug!(
            "h2: stream {} status {} in {:.3}s (ended={} timed_out={})",
            stream_id,
            response.status_code,
            response.elapsed.as_secs_f64(),
            response.stream_ended,
            response.timed_out
        );
        Ok(response)
    }

    /// Accumulate frames for `stream_id` until END_STREAM, reset, GOAWAY, or
    /// the deadline. Connection-level housekeeping (SETTINGS ACK, PING ACK,
    /// WINDOW_UPDATE) happens inline so the server's read path never stalls.
    async fn read_stream(&mut self, stream_id: u32, deadline: Instant) -> Result<H2Response> {
        let mut response = H2Response {
            status_code: 0,
            headers: Vec::new(),
            body: Vec::new(),
            elapsed: Duration::ZERO,
            stream_ended: false,
            timed_out: false,
            error_code: None,
        };
        let mut header_block = BytesMut::new();

        loop {
            let frame = match self.next_frame(deadline).await {
                Ok(frame) => frame,
                Err(e) if e.is_timeout() => {
                    response.timed_out = true;
                    return Ok(response);
                }
                Err(ScanError::Connect(_)) | Err(ScanError::Protocol(_))
                    if response.status_code != 0 =>
                {
                    // Mid-stream reset with a response already on the books:
                    // return the partial.
                    response.error_code = Some(0);
                    return Ok(response);
                }
                Err(e) => return Err(e),
            };

            match frame.header.frame_type {
                frame_type::SETTINGS => {
                    if !frame.header.has_flag(flags::ACK) {
                        self.write_settings_ack().await?;
                    }
                }
                frame_type::PING => {
                    if !frame.header.has_flag(flags::ACK) {
                        let mut buf = BytesMut::new();
                        frame::encode_ping_ack(&mut buf, &frame.payload);
                        self.write_raw(&buf).await?;
                    }
                }
                frame_type::GOAWAY => {
                    let (_, code) = frame::parse_goaway(&frame.payload)?;
                    debug!("h2: GOAWAY error code {}", code);
                    response.error_code = Some(code);
                    return Ok(response);
                }
                frame_type::RST_STREAM if frame.header.stream_id == stream_id => {
                    let code = frame::parse_rst_stream(&frame.payload)?;
                    debug!("h2: stream {} reset, error code {}", stream_id, code);
                    response.error_code = Some(code);
                    return Ok(response);
                }
                frame_type::HEADERS | frame_type::CONTINUATION
                    if frame.header.stream_id == stream_id =>
                {
                    header_block.extend_from_slice(&frame.stripped_payload()?);
                    if frame.header.has_flag(flags::END_HEADERS) {
                        let mut block = header_block.split().freeze();
                        let decoded = self.decoder.decode(&mut block)?;
                        apply_headers(&mut response, &decoded);
                    }
                    if frame.header.frame_type == frame_type::HEADERS
                        && frame.header.has_flag(flags::END_STREAM)
                    {
                        response.stream_ended = true;
                        return Ok(response);
                    }
                }
                frame_type::DATA if frame.header.stream_id == stream_id => {
                    let payload = frame.stripped_payload()?;
                    if !payload.is_empty() {
                        self.replenish_window(stream_id, payload.len() as u32)
                            .await?;
                    }
                    response.body.extend_from_slice(&payload);
                    if frame.header.has_flag(flags::END_STREAM) {
                        response.stream_ended = true;
                        return Ok(response);
                    }
                }
                other => {
                    trace!(
                        "h2: ignoring frame type {} on stream {}",
                        other,
                        frame.header.stream_id
                    );
                }
            }
        }
    }

    async fn write_settings_ack(&mut self) -> Result<()> {
        let mut buf = BytesMut::new();
        frame::encode_settings(&mut buf, true);
        self.write_raw(&buf).await
    }

    async fn replenish_window(&mut self, stream_id: u32, consumed: u32) -> Result<()> {
        let mut buf = BytesMut::new();
        frame::encode_window_update(&mut buf, 0, consumed);
        frame::encode_window_update(&mut buf, stream_id, consumed);
        self.write_raw(&buf).await
    }

    async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.transport
            .as_mut()
            .ok_or_else(|| ScanError::Connect("not connected".into()))?
            .write_all(data)
            .await
            .map_err(|e| ScanError::Connect(format!("send failed: {}", e)))
    }

    /// Next whole frame from the wire, respecting the deadline.
    async fn next_frame(&mut self, deadline: Instant) -> Result<Frame> {
        loop {
            if self.recv.len() >= FRAME_HEADER_SIZE {
                let header = FrameHeader::parse(&self.recv)?;
                let total = FRAME_HEADER_SIZE + header.length as usize;
                if self.recv.len() >= total {
                    let mut whole = self.recv.split_to(total);
                    let payload = whole.split_off(FRAME_HEADER_SIZE).freeze();
                    return Ok(Frame { header, payload });
                }
            }

            let transport = self
                .transport
                .as_mut()
                .ok_or_else(|| ScanError::Connect("not connected".into()))?;
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(ScanError::Timeout(Duration::ZERO))?;

            let mut chunk = [0u8; 16 * 1024];
            let n = tokio::time::timeout(remaining, transport.read(&mut chunk))
                .await
                .map_err(|_| ScanError::Timeout(remaining))?
                .map_err(ScanError::from)?;
            if n == 0 {
                return Err(ScanError::Connect("connection closed".into()));
            }
            self.recv.extend_from_slice(&chunk[..n]);
        }
    }
}

fn apply_headers(response: &mut H2Response, decoded: &[Header]) {
    for header in decoded {
        if header.name == b":status" {
            if let Ok(code) = String::from_utf8_lossy(&header.value).parse() {
                response.status_code = code;
            }
        } else if !header.name.starts_with(b":") {
            response.headers.push((
                String::from_utf8_lossy(&header.name).into_owned(),
                String::from_utf8_lossy(&header.value).into_owned(),
            ));
        }
    }
}
