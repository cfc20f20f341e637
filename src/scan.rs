// File: scan.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Scan orchestration: run the selected detectors in order against one
//! target and aggregate their findings into a `ScanResult`.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use log::info;

use crate::detect::{self, DetectorConfig, DetectorKind, PayloadPlacement};
use crate::report::{Reporter, ScanResult};
use crate::target::Target;
use crate::variations::{load_catalog, CatalogKind};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Detector subset; empty means the full scan order.
    pub types: Vec<DetectorKind>,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub exit_first: bool,
    pub placement: PayloadPlacement,
    pub te_catalog: Option<PathBuf>,
    pub cl_catalog: Option<PathBuf>,
    pub verify_tls: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            types: Vec::new(),
            headers: Vec::new(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            exit_first: false,
            placement: PayloadPlacement::NormalHeader,
            te_catalog: None,
            cl_catalog: None,
            verify_tls: false,
        }
    }
}

impl ScanOptions {
    /// Selected detectors in scan order; explicitly requested reserved kinds
    /// run last.
    fn detector_sequence(&self) -> Vec<DetectorKind> {
        if self.types.is_empty() {
            return DetectorKind::SCAN_ORDER.to_vec();
        }
        let mut sequence: Vec<DetectorKind> = DetectorKind::SCAN_ORDER
            .iter()
            .copied()
            .filter(|kind| self.types.contains(kind))
            .collect();
        for kind in &self.types {
            if !sequence.contains(kind) {
                sequence.push(*kind);
            }
        }
        sequence
    }
}

/// Run a full scan. Findings and errors stream to the reporter as they
/// happen; the returned result carries the aggregate and the exit code.
pub async fn run_scan<W: Write>(
    url: &str,
    options: &ScanOptions,
    reporter: &mut Reporter<W>,
) -> ScanResult {
    let mut result = ScanResult::new(url);

    let target = match Target::parse(url) {
        Ok(target) => target,
        Err(e) => {
            reporter.error_line(&format!("{}: {}", e.kind(), e));
            result.errors.push(format!("{}: {}", e.kind(), e));
            result.finalize();
            return result;
        }
    };

    // Catalogs load once per scan and stay immutable from here on.
    let te_catalog = load_catalog(options.te_catalog.as_deref(), CatalogKind::TransferEncoding);
    let cl_catalog = load_catalog(options.cl_catalog.as_deref(), CatalogKind::ContentLength);

    let config = DetectorConfig {
        timeout: options.timeout,
        connect_timeout: options.connect_timeout,
        threshold_ratio: 3.0,
        exit_first: options.exit_first,
        placement: options.placement,
        extra_headers: options.headers.clone(),
        verify_tls: options.verify_tls,
    };

    let mut per_detector = Vec::new();

    for kind in options.detector_sequence() {
        reporter.detector_start(kind.label(), target.url());

        let variations = match kind.catalog_kind() {
            CatalogKind::TransferEncoding => &te_catalog,
            CatalogKind::ContentLength => &cl_catalog,
        };

        let run = detect::run_detector(kind, &target, variations, &config).await;

        for finding in &run.findings {
            reporter.finding(finding);
        }
        for error in &run.errors {
            reporter.error_line(error);
        }

        let vulnerable = run.vulnerable();
        per_detector.push((kind.label().to_string(), vulnerable, run.errors.len()));
        result.findings.extend(run.findings);
        result.errors.extend(run.errors);

        if options.exit_first && vulnerable > 0 {
            info!("stopping scan at first vulnerable detector");
            break;
        }
    }

    result.finalize();
    reporter.summary(&result, &per_detector);
    result
}
