//! Human and JSON renderings of solve outcomes.

use std::io::Write;

use anyhow::{anyhow, Result};
use nlpsol_algo::NlpBackend;
use nlpsol_core::{SolveResult, SolveStatus};
use serde::Serialize;
use tabwriter::TabWriter;

/// What `nlpsol solve --format json` prints.
#[derive(Debug, Clone, Serialize)]
pub struct SolveReport<'a> {
    pub status: SolveStatus,
    pub backend: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'a SolveResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn format_vector(v: &[f64]) -> String {
    let items: Vec<String> = v.iter().map(|x| format!("{:.10}", x)).collect();
    format!("[{}]", items.join(", "))
}

pub fn write_text(out: &mut dyn Write, report: &SolveReport<'_>) -> Result<()> {
    let mut tw = TabWriter::new(Vec::new());
    writeln!(tw, "status\t{}", report.status)?;
    writeln!(tw, "backend\t{}", report.backend)?;
    if let Some(res) = report.result {
        writeln!(tw, "return status\t{}", res.stats.return_status)?;
        writeln!(tw, "iterations\t{}", res.stats.iterations)?;
        writeln!(tw, "solve time\t{:.3} ms", res.stats.solve_time_ms)?;
        writeln!(tw, "f\t{:.10e}", res.f)?;
        writeln!(tw, "x\t{}", format_vector(&res.x))?;
        if !res.g.is_empty() {
            writeln!(tw, "g\t{}", format_vector(&res.g))?;
        }
        writeln!(tw, "lam_x\t{}", format_vector(&res.lam_x))?;
        if !res.lam_g.is_empty() {
            writeln!(tw, "lam_g\t{}", format_vector(&res.lam_g))?;
        }
        if !res.lam_p.is_empty() {
            writeln!(tw, "lam_p\t{}", format_vector(&res.lam_p))?;
        }
        for (key, values) in &res.extras {
            writeln!(tw, "{}\t{}", key, format_vector(values))?;
        }
    }
    if let Some(err) = &report.error {
        writeln!(tw, "error\t{}", err)?;
    }
    let bytes = tw.into_inner().map_err(|e| anyhow!("tab writer: {}", e))?;
    out.write_all(&bytes)?;
    Ok(())
}

pub fn write_json(out: &mut dyn Write, report: &SolveReport<'_>) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, report)?;
    writeln!(out)?;
    Ok(())
}

/// Plain-text backend listing.
pub fn write_backends_text(out: &mut dyn Write, backends: &[&dyn NlpBackend]) -> Result<()> {
    for backend in backends {
        let caps = backend.capabilities();
        writeln!(out, "{}: {}", backend.id(), backend.description())?;
        writeln!(
            out,
            "  warm start: {}, infinite bounds: {}, empty constraints: {}, timeout: {}",
            yes_no(caps.supports_warm_start),
            yes_no(caps.supports_infinite_bounds),
            yes_no(caps.supports_empty_constraints),
            yes_no(caps.supports_timeout)
        )?;
        let mut tw = TabWriter::new(Vec::new());
        for spec in backend.option_specs() {
            write!(tw, "    {}\t{}\t{}", spec.name, spec.kind, spec.description)?;
            if !spec.choices.is_empty() {
                write!(tw, " ({})", spec.choices.join(" | "))?;
            }
            writeln!(tw)?;
        }
        let bytes = tw.into_inner().map_err(|e| anyhow!("tab writer: {}", e))?;
        out.write_all(&bytes)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct BackendEntry<'a> {
    id: &'a str,
    description: &'a str,
    warm_start: bool,
    infinite_bounds: bool,
    empty_constraints: bool,
    timeout: bool,
    options: Vec<&'a str>,
}

pub fn write_backends_json(out: &mut dyn Write, backends: &[&dyn NlpBackend]) -> Result<()> {
    let entries: Vec<BackendEntry<'_>> = backends
        .iter()
        .map(|b| {
            let caps = b.capabilities();
            BackendEntry {
                id: b.id(),
                description: b.description(),
                warm_start: caps.supports_warm_start,
                infinite_bounds: caps.supports_infinite_bounds,
                empty_constraints: caps.supports_empty_constraints,
                timeout: caps.supports_timeout,
                options: b.option_specs().iter().map(|s| s.name).collect(),
            }
        })
        .collect();
    serde_json::to_writer_pretty(&mut *out, &entries)?;
    writeln!(out)?;
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlpsol_core::SolveStats;
    use std::collections::BTreeMap;

    fn sample() -> SolveResult {
        SolveResult {
            x: vec![0.5, 0.5],
            f: 0.5,
            g: vec![1.0],
            lam_x: vec![0.0, 0.0],
            lam_g: vec![-1.0],
            lam_p: vec![],
            stats: SolveStats {
                backend: "sqp".into(),
                iterations: 3,
                return_status: "Solve_Succeeded".into(),
                solve_time_ms: 0.25,
            },
            extras: BTreeMap::new(),
        }
    }

    #[test]
    fn test_text_report() {
        let res = sample();
        let report = SolveReport {
            status: SolveStatus::Solved,
            backend: "sqp",
            result: Some(&res),
            error: None,
        };
        let mut out = Vec::new();
        write_text(&mut out, &report).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("solved"));
        assert!(text.contains("lam_g"));
        assert!(!text.contains("lam_p"));
        assert!(text.contains("0.5000000000"));
    }

    #[test]
    fn test_json_report_round_trips_result() {
        let res = sample();
        let report = SolveReport {
            status: SolveStatus::Solved,
            backend: "sqp",
            result: Some(&res),
            error: None,
        };
        let mut out = Vec::new();
        write_json(&mut out, &report).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["status"], "solved");
        assert!(value.get("error").is_none());
        let back: SolveResult = serde_json::from_value(value["result"].clone()).unwrap();
        assert_eq!(back, res);
    }
}
