// File: report.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Finding accumulation and result output.
//!
//! The five `Name: Value` marker lines per vulnerable finding are an
//! external contract: contiguous, one per line, plain ASCII, no color.
//! Errors surface as `ERROR: <kind>: <detail>` lines and in the JSON
//! document.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use colored::Colorize;
use log::error;
use serde::Serialize;

use crate::error::ScanError;

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub url: String,
    pub kind: String,
    pub classification: String,
    pub header_description: String,
    pub header_name: String,
    pub header_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<String>,
    pub baseline_elapsed: f64,
    pub probe_elapsed: f64,
    pub ratio: f64,
}

impl Finding {
    pub fn is_vulnerable(&self) -> bool {
        self.classification == "vulnerable"
    }
}

/// What one detector produced.
#[derive(Debug, Default)]
pub struct DetectorRun {
    pub findings: Vec<Finding>,
    pub errors: Vec<String>,
}

impl DetectorRun {
    pub fn push_error(&mut self, e: &ScanError) {
        self.errors.push(format!("{}: {}", e.kind(), e));
    }

    pub fn vulnerable(&self) -> usize {
        self.findings.iter().filter(|f| f.is_vulnerable()).count()
    }
}

#[derive(Debug, Serialize)]
pub struct ScanResult {
    pub target: String,
    pub findings: Vec<Finding>,
    pub errors: Vec<String>,
    pub exit_code: i32,
}

impl ScanResult {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            findings: Vec::new(),
            errors: Vec::new(),
            exit_code: 0,
        }
    }

    pub fn vulnerable_count(&self) -> usize {
        self.findings.iter().filter(|f| f.is_vulnerable()).count()
    }

    /// 0: clean. 1: at least one vulnerable finding. 2: errors only.
    pub fn finalize(&mut self) {
        self.exit_code = if self.vulnerable_count() > 0 {
            1
        } else if !self.errors.is_empty() {
            2
        } else {
            0
        };
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self).unwrap_or_else(|e| {
            error!("failed to serialize scan result: {}", e);
            String::from("{}")
        });
        let mut file = File::create(path)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }
}

/// Writes human output and the marker contract to one sink. The sink is
/// injected so results never depend on global logger state.
pub struct Reporter<W: Write> {
    sink: W,
}

impl<W: Write> Reporter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    pub fn detector_start(&mut self, label: &str, url: &str) {
        let _ = writeln!(
            self.sink,
            "{}",
            format!("Running {} detection against {}...", label, url).cyan()
        );
    }

    /// Marker block plus the human-readable timing line.
    pub fn finding(&mut self, finding: &Finding) {
        if finding.is_vulnerable() {
            let _ = writeln!(self.sink, "Vulnerability_Type: {}", finding.kind);
            let _ = writeln!(self.sink, "Vulnerable_URL: {}", finding.url);
            let _ = writeln!(self.sink, "Header_Description: {}", finding.header_description);
            let _ = writeln!(self.sink, "Actual_Header_Name: {}", finding.header_name);
            let _ = writeln!(self.sink, "Actual_Header_Value: {}", finding.header_value);
            let _ = writeln!(
                self.sink,
                "{}",
                format!(
                    "[!] {} probe took {:.3}s against a {:.3}s baseline ({:.1}x)",
                    finding.kind, finding.probe_elapsed, finding.baseline_elapsed, finding.ratio
                )
                .red()
            );
        } else {
            let _ = writeln!(
                self.sink,
                "{}",
                format!(
                    "[?] {} uncertain: {} ({:.3}s vs {:.3}s baseline)",
                    finding.kind,
                    finding.header_description,
                    finding.probe_elapsed,
                    finding.baseline_elapsed
                )
                .yellow()
            );
        }
    }

    pub fn error_line(&mut self, line: &str) {
        let _ = writeln!(self.sink, "ERROR: {}", line);
    }

    pub fn summary(&mut self, result: &ScanResult, per_detector: &[(String, usize, usize)]) {
        let _ = writeln!(self.sink, "\n{}", "Scan Summary".cyan());
        let _ = writeln!(self.sink, "{}", "============".cyan());
        for (label, vulnerable, errors) in per_detector {
            let status = if *vulnerable > 0 {
                format!("Vulnerable ({} findings)", vulnerable).red().to_string()
            } else if *errors > 0 {
                format!("Error ({})", errors).yellow().to_string()
            } else {
                "Not vulnerable".green().to_string()
            };
            let _ = writeln!(self.sink, "  {}: {}", label, status);
        }
        let _ = writeln!(
            self.sink,
            "{} finding(s), {} error(s), exit code {}",
            result.vulnerable_count(),
            result.errors.len(),
            result.exit_code
        );
    }
}
