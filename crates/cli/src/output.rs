//! Output formatting for scans and schedules

use anyhow::Result;
use serde_json::json;
use std::fmt::Write;

use aegis_common::{ScanProgress, ScanRecord, Schedule, Severity};

use crate::args::OutputFormat;

const RULE_WIDTH: usize = 80;

fn rule(out: &mut String) {
    let _ = writeln!(out, "{:-<width$}", "", width = RULE_WIDTH);
}

pub fn scan_started(scan_id: &str, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(&json!({ "scan_id": scan_id }))?,
        OutputFormat::Text => format!("Started scan {scan_id}"),
    })
}

pub fn progress(scan_id: &str, progress: &ScanProgress, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(&json!({
            "scan_id": scan_id,
            "status": progress.status,
            "progress": progress.percent,
        }))?,
        OutputFormat::Text => format!("{scan_id}  {}  {}%", progress.status, progress.percent),
    })
}

pub fn record(record: &ScanRecord, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(record)?),
        OutputFormat::Text => Ok(record_table(record)),
    }
}

fn record_table(record: &ScanRecord) -> String {
    let mut out = String::new();
    let backends: Vec<&str> = record
        .backend_handles
        .iter()
        .map(|h| h.backend.as_str())
        .collect();

    let _ = writeln!(out, "Scan {}", record.scan_id);
    let _ = writeln!(out, "  Target:   {}", record.target);
    let _ = writeln!(out, "  Status:   {}", record.status);
    let _ = writeln!(out, "  Backends: {}", backends.join(", "));
    let _ = writeln!(out, "  Started:  {}", record.created_at.to_rfc3339());

    if record.findings.is_empty() {
        let _ = writeln!(out, "\nNo findings.");
        return out;
    }

    let mut findings: Vec<_> = record.findings.iter().collect();
    // stable: backend order is kept within a severity
    findings.sort_by(|a, b| b.severity.cmp(&a.severity));

    out.push('\n');
    rule(&mut out);
    let _ = writeln!(out, "{:<10} {:<12} {:<56}", "SEVERITY", "CATEGORY", "TITLE");
    rule(&mut out);
    for finding in findings {
        let _ = writeln!(
            out,
            "{:<10} {:<12} {:<56}",
            finding.severity.as_str(),
            finding.category.as_str(),
            finding.title
        );
    }
    rule(&mut out);

    let counts = record.severity_counts();
    let breakdown: Vec<String> = Severity::ALL
        .iter()
        .rev()
        .map(|s| format!("{} {}", s, counts.get(s).copied().unwrap_or(0)))
        .collect();
    let _ = writeln!(out, "\n📊 Summary:");
    let _ = writeln!(out, "  Findings: {} ({})", record.findings.len(), breakdown.join(", "));
    out
}

pub fn history(records: &[ScanRecord], format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(records)?);
    }
    if records.is_empty() {
        return Ok("No scans recorded.".to_string());
    }

    let mut out = String::new();
    rule(&mut out);
    let _ = writeln!(
        out,
        "{:<36}  {:<10} {:<8} {:<9} {}",
        "SCAN ID", "STATUS", "FINDINGS", "HIGHEST", "TARGET"
    );
    rule(&mut out);
    for record in records {
        let highest = record
            .highest_severity()
            .map_or("-", |s| s.as_str());
        let _ = writeln!(
            out,
            "{:<36}  {:<10} {:<8} {:<9} {}",
            record.scan_id,
            record.status.as_str(),
            record.findings.len(),
            highest,
            record.target
        );
    }
    rule(&mut out);
    Ok(out)
}

pub fn schedules(schedules: &[Schedule], format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(schedules)?);
    }
    if schedules.is_empty() {
        return Ok("No schedules.".to_string());
    }

    let mut out = String::new();
    rule(&mut out);
    let _ = writeln!(
        out,
        "{:<36}  {:<16} {:<10} {:<25} {}",
        "ID", "EXPRESSION", "KIND", "NEXT RUN", "TARGET"
    );
    rule(&mut out);
    for schedule in schedules {
        let next = schedule
            .next_run
            .map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
        let kind = schedule.kind.map_or("all", |k| k.as_str());
        let _ = writeln!(
            out,
            "{:<36}  {:<16} {:<10} {:<25} {}",
            schedule.id, schedule.expression, kind, next, schedule.target
        );
    }
    rule(&mut out);
    Ok(out)
}
