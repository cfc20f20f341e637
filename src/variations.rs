// File: variations.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Header-variation catalogs.
//!
//! A catalog is a JSON array of byte-level spellings of a Content-Length or
//! Transfer-Encoding header. File order is probe order; values travel to the
//! wire verbatim, so whitespace tricks and non-ASCII bytes in the file are
//! part of the payload, not noise.

use std::path::Path;

use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Placeholder in a CL-catalog `header_value`; replaced at probe time with
/// the computed content length.
pub const COMPUTED_VALUE: &str = "<computed>";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtraHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderVariation {
    pub description: String,
    pub header_name: String,
    pub header_value: String,
    #[serde(default)]
    pub extra_headers: Vec<ExtraHeader>,
}

impl HeaderVariation {
    fn simple(description: &str, name: &str, value: &str) -> Self {
        Self {
            description: description.to_string(),
            header_name: name.to_string(),
            header_value: value.to_string(),
            extra_headers: Vec::new(),
        }
    }

    /// Header value with any `<computed>` placeholder substituted.
    pub fn resolved_value(&self, computed: &str) -> String {
        self.header_value.replace(COMPUTED_VALUE, computed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    TransferEncoding,
    ContentLength,
}

static DEFAULT_TE_CATALOG: Lazy<Vec<HeaderVariation>> = Lazy::new(|| {
    vec![
        HeaderVariation::simple("Standard chunked encoding", "Transfer-Encoding", "chunked"),
        HeaderVariation::simple(
            "Space before colon",
            "Transfer-Encoding ",
            "chunked",
        ),
        HeaderVariation::simple("Tab before colon", "Transfer-Encoding\t", "chunked"),
        HeaderVariation::simple("Leading space in value", "Transfer-Encoding", " chunked"),
        HeaderVariation::simple("Trailing space in value", "Transfer-Encoding", "chunked "),
        HeaderVariation::simple("Tab-prefixed value", "Transfer-Encoding", "\tchunked"),
        HeaderVariation::simple(
            "Lowercase second word",
            "Transfer-encoding",
            "chunked",
        ),
        HeaderVariation::simple("All-lowercase name", "transfer-encoding", "chunked"),
        HeaderVariation::simple(
            "Obsolete line folding",
            "Transfer-Encoding",
            "\r\n chunked",
        ),
        HeaderVariation::simple("Vertical tab in value", "Transfer-Encoding", "\x0bchunked"),
        te_duplicate_variation(),
    ]
});

fn te_duplicate_variation() -> HeaderVariation {
    HeaderVariation {
        description: "Duplicate header, identity first".to_string(),
        header_name: "Transfer-Encoding".to_string(),
        header_value: "identity".to_string(),
        extra_headers: vec![ExtraHeader {
            name: "Transfer-Encoding".to_string(),
            value: "chunked".to_string(),
        }],
    }
}

static DEFAULT_CL_CATALOG: Lazy<Vec<HeaderVariation>> = Lazy::new(|| {
    vec![
        HeaderVariation::simple("Standard Content-Length", "content-length", COMPUTED_VALUE),
        HeaderVariation::simple(
            "Space before colon",
            "content-length ",
            COMPUTED_VALUE,
        ),
        HeaderVariation::simple("Mixed-case name", "Content-Length", COMPUTED_VALUE),
        HeaderVariation::simple(
            "Leading space in value",
            "content-length",
            " <computed>",
        ),
    ]
});

/// Load a catalog from `path`, falling back to the built-in defaults when no
/// path is given or the file is absent or unparseable. Order is preserved.
pub fn load_catalog(path: Option<&Path>, kind: CatalogKind) -> Vec<HeaderVariation> {
    let defaults = || match kind {
        CatalogKind::TransferEncoding => DEFAULT_TE_CATALOG.clone(),
        CatalogKind::ContentLength => DEFAULT_CL_CATALOG.clone(),
    };

    let Some(path) = path else {
        let catalog = defaults();
        debug!("using {} built-in {:?} variations", catalog.len(), kind);
        return catalog;
    };

    match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str::<Vec<HeaderVariation>>(&text) {
            Ok(catalog) if !catalog.is_empty() => {
                debug!(
                    "loaded {} {:?} variations from {}",
                    catalog.len(),
                    kind,
                    path.display()
                );
                catalog
            }
            Ok(_) => {
                warn!("{}: empty catalog, using defaults", path.display());
                defaults()
            }
            Err(e) => {
                warn!("{}: unparseable catalog ({}), using defaults", path.display(), e);
                defaults()
            }
        },
        Err(e) => {
            warn!("{}: unreadable catalog ({}), using defaults", path.display(), e);
            defaults()
        }
    }
}

/// Printable rendering of a mangled header for logs and markers: CR, LF and
/// TAB become visible escapes.
pub fn escape_control(raw: &str) -> String {
    raw.replace('\r', "\\r")
        .replace('\n', "\\n")
        .replace('\t', "\\t")
}
