// File: detect/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Detector kernel.
//!
//! Every detector follows the same shape: measure a well-formed baseline,
//! send one manipulated probe per catalog variation on a fresh connection,
//! and classify on the timing differential. A probe that times out is the
//! interesting case, not a failure.

pub mod cl_te;
pub mod h2_cl;
pub mod h2_te;
pub mod te_cl;

use std::time::Duration;

use log::{debug, info, warn};

use crate::error::ScanError;
use crate::report::{DetectorRun, Finding};
use crate::target::Target;
use crate::variations::{escape_control, CatalogKind, HeaderVariation};

/// Baselines below this floor are clamped before the ratio test. Keeps fast
/// loopback targets from turning measurement jitter into findings.
pub const BASELINE_FLOOR: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    ClTe,
    TeCl,
    H2Cl,
    H2Te,
    /// Reserved: zero-CL desync. Probe semantics not yet pinned down.
    Cl0,
    /// Reserved: HTTP/2 zero-CL desync. Probe semantics not yet pinned down.
    H20,
}

impl DetectorKind {
    /// Detectors in scan order.
    pub const SCAN_ORDER: [Self; 4] = [Self::ClTe, Self::TeCl, Self::H2Cl, Self::H2Te];

    pub fn label(&self) -> &'static str {
        match self {
            Self::ClTe => "CL.TE",
            Self::TeCl => "TE.CL",
            Self::H2Cl => "H2.CL",
            Self::H2Te => "H2.TE",
            Self::Cl0 => "CL.0",
            Self::H20 => "H2.0",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "cl.te" => Some(Self::ClTe),
            "te.cl" => Some(Self::TeCl),
            "h2.cl" => Some(Self::H2Cl),
            "h2.te" => Some(Self::H2Te),
            "cl.0" => Some(Self::Cl0),
            "h2.0" => Some(Self::H20),
            _ => None,
        }
    }

    pub fn catalog_kind(&self) -> CatalogKind {
        match self {
            Self::H2Cl | Self::Cl0 | Self::H20 => CatalogKind::ContentLength,
            _ => CatalogKind::TransferEncoding,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Classification {
    Safe,
    Uncertain,
    Vulnerable,
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Uncertain => "uncertain",
            Self::Vulnerable => "vulnerable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadPlacement {
    NormalHeader,
    CustomHeaderValue,
    CustomHeaderName,
    RequestLine,
}

impl PayloadPlacement {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NormalHeader => "normal_header",
            Self::CustomHeaderValue => "custom_header_value",
            Self::CustomHeaderName => "custom_header_name",
            Self::RequestLine => "request_line",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "normal_header" => Some(Self::NormalHeader),
            "custom_header_value" => Some(Self::CustomHeaderValue),
            "custom_header_name" => Some(Self::CustomHeaderName),
            "request_line" => Some(Self::RequestLine),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub threshold_ratio: f64,
    pub exit_first: bool,
    pub placement: PayloadPlacement,
    pub extra_headers: Vec<(String, String)>,
    pub verify_tls: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            threshold_ratio: 3.0,
            exit_first: false,
            placement: PayloadPlacement::NormalHeader,
            extra_headers: Vec::new(),
            verify_tls: false,
        }
    }
}

/// The classification rule shared by all detectors.
///
/// `vulnerable` requires both the ratio test against the floored baseline
/// and that the probe consumed most of the timeout budget; `uncertain` is a
/// milder elevation against the raw baseline.
pub fn classify(
    baseline: Duration,
    probe: Duration,
    timeout: Duration,
    threshold_ratio: f64,
) -> Classification {
    let effective_baseline = baseline.max(BASELINE_FLOOR);
    let probe_secs = probe.as_secs_f64();

    if probe_secs >= threshold_ratio * effective_baseline.as_secs_f64()
        && probe_secs >= 0.9 * timeout.as_secs_f64()
    {
        Classification::Vulnerable
    } else if probe_secs >= 1.5 * baseline.as_secs_f64() {
        Classification::Uncertain
    } else {
        Classification::Safe
    }
}

/// Probe-to-baseline ratio as reported in findings, floored baseline.
pub fn timing_ratio(baseline: Duration, probe: Duration) -> f64 {
    probe.as_secs_f64() / baseline.max(BASELINE_FLOOR).as_secs_f64()
}

/// Drive one detector across the whole variation catalog.
pub async fn run_detector(
    kind: DetectorKind,
    target: &Target,
    variations: &[HeaderVariation],
    config: &DetectorConfig,
) -> DetectorRun {
    let mut run = DetectorRun::default();

    if matches!(kind, DetectorKind::Cl0 | DetectorKind::H20) {
        let err = ScanError::Input(format!("{} detector not implemented", kind.label()));
        warn!("{}", err);
        run.push_error(&err);
        return run;
    }

    info!("running {} detection against {}", kind.label(), target.url());

    let baseline = match measure_baseline(kind, target, config).await {
        Ok(elapsed) => {
            debug!(
                "{} baseline: {:.3}s",
                kind.label(),
                elapsed.as_secs_f64()
            );
            elapsed
        }
        Err(e) => {
            warn!("{} baseline failed: {}", kind.label(), e);
            run.push_error(&e);
            return run;
        }
    };

    for (index, variation) in variations.iter().enumerate() {
        debug!(
            "{} [{}/{}] {}",
            kind.label(),
            index + 1,
            variations.len(),
            variation.description
        );

        let probe_elapsed = match measure_probe(kind, target, variation, config).await {
            Ok(elapsed) => elapsed,
            Err(e) => {
                warn!(
                    "{} variation {:?} failed: {}",
                    kind.label(),
                    variation.description,
                    e
                );
                run.push_error(&e);
                continue;
            }
        };

        let classification =
            classify(baseline, probe_elapsed, config.timeout, config.threshold_ratio);
        debug!(
            "{} variation {:?}: probe {:.3}s baseline {:.3}s -> {}",
            kind.label(),
            variation.description,
            probe_elapsed.as_secs_f64(),
            baseline.as_secs_f64(),
            classification.label()
        );

        if classification == Classification::Safe {
            continue;
        }

        let placement = matches!(kind, DetectorKind::H2Cl | DetectorKind::H2Te)
            .then(|| config.placement.label().to_string());
        run.findings.push(Finding {
            url: target.url().to_string(),
            kind: kind.label().to_string(),
            classification: classification.label().to_string(),
            header_description: variation.description.clone(),
            header_name: escape_control(&variation.header_name),
            header_value: escape_control(&variation.header_value),
            placement,
            baseline_elapsed: baseline.as_secs_f64(),
            probe_elapsed: probe_elapsed.as_secs_f64(),
            ratio: timing_ratio(baseline, probe_elapsed),
        });

        if classification == Classification::Vulnerable && config.exit_first {
            info!("{}: vulnerable, stopping at first finding", kind.label());
            break;
        }
    }

    run
}

async fn measure_baseline(
    kind: DetectorKind,
    target: &Target,
    config: &DetectorConfig,
) -> crate::error::Result<Duration> {
    match kind {
        DetectorKind::ClTe => cl_te::baseline(target, config).await,
        DetectorKind::TeCl => te_cl::baseline(target, config).await,
        DetectorKind::H2Cl => h2_cl::baseline(target, config).await,
        DetectorKind::H2Te => h2_te::baseline(target, config).await,
        DetectorKind::Cl0 | DetectorKind::H20 => unreachable!("stub detectors bail earlier"),
    }
}

async fn measure_probe(
    kind: DetectorKind,
    target: &Target,
    variation: &HeaderVariation,
    config: &DetectorConfig,
) -> crate::error::Result<Duration> {
    match kind {
        DetectorKind::ClTe => cl_te::probe(target, variation, config).await,
        DetectorKind::TeCl => te_cl::probe(target, variation, config).await,
        DetectorKind::H2Cl => h2_cl::probe(target, variation, config).await,
        DetectorKind::H2Te => h2_te::probe(target, variation, config).await,
        DetectorKind::Cl0 | DetectorKind::H20 => unreachable!("stub detectors bail earlier"),
    }
}
