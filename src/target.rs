// File: target.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{Result, ScanError};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// A parsed scan target. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
    original_url: String,
}

impl Target {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw.len() > 2048 {
            return Err(ScanError::Input("invalid URL length".into()));
        }

        let url = Url::parse(raw).map_err(|e| ScanError::Input(format!("{}: {}", raw, e)))?;

        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(ScanError::Input(format!(
                    "unsupported URL scheme: {}",
                    other
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| ScanError::Input(format!("no host in URL: {}", raw)))?
            .to_string();

        if host.contains('\r') || host.contains('\n') || host.contains('\t') {
            return Err(ScanError::Input("host contains control characters".into()));
        }

        let port = url.port().unwrap_or(match scheme {
            Scheme::Http => 80,
            Scheme::Https => 443,
        });

        let mut path = if url.path().is_empty() {
            "/".to_string()
        } else {
            url.path().to_string()
        };
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            scheme,
            host,
            port,
            path,
            original_url: raw.to_string(),
        })
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// Host:port pair as sent in `Host` / `:authority` headers. The default
    /// port is omitted, matching what browsers send.
    pub fn authority(&self) -> String {
        let default = match self.scheme {
            Scheme::Http => 80,
            Scheme::Https => 443,
        };
        if self.port == default {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// host:port pair for the socket connect.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> &str {
        &self.original_url
    }
}
