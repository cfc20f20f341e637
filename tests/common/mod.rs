// File: common/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Scripted raw-socket mock servers for the scan scenarios.
//!
//! The probes under test are deliberately malformed HTTP, so the mocks work
//! at the byte level: each incoming request is handed to a closure that
//! decides whether to answer, after how long, or to hold the socket open
//! until the client gives up.

// Each integration binary uses a subset of these helpers.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use rdesync::h2::frame::{self, flags, frame_type, FrameHeader, FRAME_HEADER_SIZE};
use rdesync::h2::hpack::{Decoder, Encoder, Header};

/// What the mock does with one request.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Answer with a canned 200 after the delay.
    Respond(Duration),
    /// Answer with these exact bytes after the delay (HTTP/1.1 mock only).
    RespondBytes(Duration, Vec<u8>),
    /// Never answer; hold the socket so the client runs into its timeout.
    Hold,
}

pub fn quick() -> Plan {
    Plan::Respond(Duration::from_millis(10))
}

const CANNED_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nOK";

/// HTTP/1.1 byte-level mock. `decide` sees the raw request bytes.
pub struct H1Mock {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl H1Mock {
    pub async fn start<F>(decide: F) -> Self
    where
        F: Fn(&[u8]) -> Plan + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        let decide = Arc::new(decide);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let decide = decide.clone();
                tokio::spawn(async move {
                    serve_h1_connection(stream, decide).await;
                });
            }
        });

        Self { addr, connections }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.addr.port())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve_h1_connection(
    mut stream: TcpStream,
    decide: Arc<dyn Fn(&[u8]) -> Plan + Send + Sync>,
) {
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        while let Some((request, consumed)) = extract_h1_request(&buffer) {
            buffer.drain(..consumed);
            match decide(&request) {
                Plan::Respond(delay) => {
                    tokio::time::sleep(delay).await;
                    if stream.write_all(CANNED_RESPONSE).await.is_err() {
                        return;
                    }
                }
                Plan::RespondBytes(delay, body) => {
                    tokio::time::sleep(delay).await;
                    if stream.write_all(&body).await.is_err() {
                        return;
                    }
                }
                Plan::Hold => {
                    // Park until the peer goes away.
                    let mut sink = [0u8; 1024];
                    while let Ok(n) = stream.read(&mut sink).await {
                        if n == 0 {
                            return;
                        }
                    }
                    return;
                }
            }
        }

        let mut chunk = [0u8; 4096];
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Pull one request (head + Content-Length body) off the front of the
/// buffer. Pipelined requests arrive back to back, so consumption must be
/// exact.
fn extract_h1_request(buffer: &[u8]) -> Option<(Vec<u8>, usize)> {
    let head_end = find(buffer, b"\r\n\r\n")?;
    let body_len = content_length_of(&buffer[..head_end]);
    let total = head_end + 4 + body_len;
    if buffer.len() >= total {
        Some((buffer[..total].to_vec(), total))
    } else {
        None
    }
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn content_length_of(head: &[u8]) -> usize {
    let text = String::from_utf8_lossy(head);
    for line in text.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                if let Ok(n) = value.trim().parse() {
                    return n;
                }
            }
        }
    }
    0
}

/// One captured HTTP/2 request.
#[derive(Debug, Clone)]
pub struct CapturedH2Request {
    /// Raw HPACK block as it crossed the wire.
    pub header_block: Vec<u8>,
    pub headers: Vec<Header>,
    pub data: Vec<u8>,
}

/// Minimal HTTP/2 server over plain TCP (prior knowledge). `decide` sees
/// the decoded request headers.
pub struct H2Mock {
    pub addr: SocketAddr,
    captured: Arc<Mutex<Vec<CapturedH2Request>>>,
}

impl H2Mock {
    pub async fn start<F>(decide: F) -> Self
    where
        F: Fn(&[Header]) -> Plan + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let decide = Arc::new(decide);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let decide = decide.clone();
                let sink = sink.clone();
                tokio::spawn(async move {
                    let _ = serve_h2_connection(stream, decide, sink).await;
                });
            }
        });

        Self { addr, captured }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.addr.port())
    }

    pub fn captured(&self) -> Vec<CapturedH2Request> {
        self.captured.lock().unwrap().clone()
    }
}

async fn serve_h2_connection(
    mut stream: TcpStream,
    decide: Arc<dyn Fn(&[Header]) -> Plan + Send + Sync>,
    sink: Arc<Mutex<Vec<CapturedH2Request>>>,
) -> std::io::Result<()> {
    // Client preface.
    let mut preface = [0u8; 24];
    stream.read_exact(&mut preface).await?;
    assert_eq!(&preface[..], frame::PREFACE, "bad connection preface");

    // Server SETTINGS.
    let mut settings = BytesMut::new();
    frame::encode_settings(&mut settings, false);
    stream.write_all(&settings).await?;

    let mut decoder = Decoder::new();
    let mut buffer = BytesMut::new();

    loop {
        while buffer.len() >= FRAME_HEADER_SIZE {
            let header = FrameHeader::parse(&buffer).unwrap();
            let total = FRAME_HEADER_SIZE + header.length as usize;
            if buffer.len() < total {
                break;
            }
            let mut whole = buffer.split_to(total);
            let payload = whole.split_off(FRAME_HEADER_SIZE).freeze();

            match header.frame_type {
                frame_type::SETTINGS => {
                    if !header.has_flag(flags::ACK) {
                        let mut ack = BytesMut::new();
                        frame::encode_settings(&mut ack, true);
                        stream.write_all(&ack).await?;
                    }
                }
                frame_type::HEADERS => {
                    let block = payload.to_vec();
                    let mut bytes = payload.clone();
                    let headers = decoder.decode(&mut bytes).unwrap_or_default();

                    sink.lock().unwrap().push(CapturedH2Request {
                        header_block: block,
                        headers: headers.clone(),
                        data: Vec::new(),
                    });

                    match decide(&headers) {
                        Plan::Respond(delay) | Plan::RespondBytes(delay, _) => {
                            tokio::time::sleep(delay).await;
                            write_h2_response(&mut stream, header.stream_id).await?;
                        }
                        // A held stream stays silent no matter what arrives.
                        Plan::Hold => {}
                    }
                }
                frame_type::DATA => {
                    if let Some(last) = sink.lock().unwrap().last_mut() {
                        last.data.extend_from_slice(&payload);
                    }
                }
                _ => {}
            }
        }

        let mut chunk = [0u8; 16 * 1024];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

async fn write_h2_response(stream: &mut TcpStream, stream_id: u32) -> std::io::Result<()> {
    let mut encoder = Encoder::new();
    let mut block = BytesMut::new();
    encoder.encode(
        &[
            Header::new(":status", "200"),
            Header::new("content-length", "2"),
        ],
        &mut block,
    );

    let mut wire = BytesMut::new();
    frame::encode_headers(&mut wire, stream_id, &block, false);
    frame::encode_data(&mut wire, stream_id, b"OK", true);
    stream.write_all(&wire).await
}

/// Catalog file helper; cleaned up on drop.
pub struct CatalogFile {
    pub path: std::path::PathBuf,
}

impl CatalogFile {
    pub fn write(name: &str, json: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "rdesync-test-{}-{}.json",
            std::process::id(),
            name
        ));
        std::fs::write(&path, json).unwrap();
        Self { path }
    }
}

impl Drop for CatalogFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
