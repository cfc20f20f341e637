// File: error.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong while probing a target.
///
/// `Timeout` is special: inside a probe it is not a failure but the timing
/// signal itself, so the detector kernel catches it and keeps going. All
/// other variants bubble up into `ScanResult::errors`.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("DNS resolution failed: {0}")]
    Dns(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid input: {0}")]
    Input(String),
}

impl ScanError {
    /// Stable kind discriminator for `ERROR: <kind>: <detail>` lines and the
    /// JSON report.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dns(_) => "DNSError",
            Self::Connect(_) => "ConnectError",
            Self::Tls(_) => "TlsError",
            Self::Protocol(_) => "ProtocolError",
            Self::Timeout(_) => "TimeoutError",
            Self::Input(_) => "InputError",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<std::io::Error> for ScanError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                Self::Timeout(Duration::ZERO)
            }
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => Self::Connect(e.to_string()),
            _ => Self::Protocol(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
