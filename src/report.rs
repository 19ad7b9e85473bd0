//! Run reports and the JSON summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::checkpoint::Checkpoint;
use crate::console::{ConsoleLogEntry, Severity};
use crate::harness::types::{HarnessError, HarnessResult};
use crate::probe::ProbeResults;
use crate::verdict::{Verdict, VerdictBasis};

/// A soft failure recorded while the scenario kept going
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepWarning {
    /// Index of the top-level step
    pub step: usize,
    /// What the step was doing
    pub description: String,
    /// Error category, see [`HarnessError::kind`]
    pub kind: String,
    pub error: String,
}

impl StepWarning {
    pub fn new(step: usize, description: impl Into<String>, error: &HarnessError) -> Self {
        Self {
            step,
            description: description.into(),
            kind: error.kind().to_string(),
            error: error.to_string(),
        }
    }
}

/// A file the page downloaded during the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Name the browser gave the file
    pub suggested_name: String,
    /// Where it was moved to
    pub path: PathBuf,
    pub bytes: u64,
}

/// Everything a scenario run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Scenario name
    pub test: String,
    /// Any success marker seen in the console log
    pub success: bool,
    /// Any failure marker seen in the console log
    pub failure: bool,
    pub verdict: Verdict,
    pub verdict_basis: VerdictBasis,
    /// The verdict came from the text heuristic or a wait timed out
    pub degraded: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub warnings: Vec<StepWarning>,
    pub checkpoints: Vec<Checkpoint>,
    pub probes: ProbeResults,
    pub downloads: Vec<DownloadRecord>,
    pub console_logs: Vec<ConsoleLogEntry>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.verdict != Verdict::Failure
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// One-line result for the operator
    pub fn headline(&self) -> String {
        let basis = match self.verdict_basis {
            VerdictBasis::Contract => "contract",
            VerdictBasis::TextHeuristic => "text heuristic",
            VerdictBasis::PageState => "page state",
        };
        let mut line = format!(
            "{}: {} ({}, {} warnings, {} checkpoints)",
            self.test,
            self.verdict.to_string().to_uppercase(),
            basis,
            self.warnings.len(),
            self.checkpoints.len()
        );
        if self.degraded {
            line.push_str(" [degraded]");
        }
        line
    }
}

/// Write the report as pretty JSON
pub fn write_summary(report: &RunReport, path: &Path) -> HarnessResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

/// Read the console log back out of a saved summary.
///
/// Accepts full reports as well as older summaries whose `console_logs`
/// hold plain strings or `{type, text}` objects.
pub fn read_summary_log(path: &Path) -> HarnessResult<Vec<ConsoleLogEntry>> {
    let value: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    let logs = value
        .get("console_logs")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            HarnessError::InvalidState(format!("{} has no console_logs array", path.display()))
        })?;

    logs.iter()
        .enumerate()
        .map(|(sequence, entry)| {
            let (severity, text) = match entry {
                Value::String(text) => (Severity::Log, text.clone()),
                Value::Object(map) => {
                    let text = map.get("text").and_then(Value::as_str).ok_or_else(|| {
                        HarnessError::InvalidState(format!("log entry {} has no text", sequence))
                    })?;
                    let severity = map
                        .get("severity")
                        .or_else(|| map.get("type"))
                        .and_then(Value::as_str)
                        .map(severity_from_name)
                        .unwrap_or(Severity::Log);
                    (severity, text.to_string())
                }
                other => {
                    return Err(HarnessError::InvalidState(format!(
                        "unexpected log entry {}",
                        other
                    )));
                }
            };
            Ok(ConsoleLogEntry {
                severity,
                text,
                sequence,
            })
        })
        .collect()
}

fn severity_from_name(name: &str) -> Severity {
    match name {
        "warning" | "warn" => Severity::Warning,
        "error" | "assert" => Severity::Error,
        "pageerror" => Severity::PageError,
        _ => Severity::Log,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn report() -> RunReport {
        let now = Utc::now();
        RunReport {
            test: "citation-search".to_string(),
            success: true,
            failure: false,
            verdict: Verdict::Success,
            verdict_basis: VerdictBasis::TextHeuristic,
            degraded: true,
            started_at: now,
            finished_at: now,
            warnings: vec![],
            checkpoints: vec![],
            probes: ProbeResults::new(),
            downloads: vec![],
            console_logs: vec![ConsoleLogEntry {
                severity: Severity::Log,
                text: "✅ Success with Gemini 2.5 Flash + google_search".to_string(),
                sequence: 0,
            }],
        }
    }

    #[test]
    fn test_summary_has_expected_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("summary.json");
        write_summary(&report(), &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["test"], "citation-search");
        assert_eq!(value["success"], true);
        assert_eq!(value["failure"], false);
        assert_eq!(value["verdict"], "success");
        assert_eq!(value["verdict_basis"], "text_heuristic");
        assert_eq!(value["console_logs"][0]["severity"], "log");
    }

    #[test]
    fn test_read_summary_log_accepts_both_shapes() {
        let dir = TempDir::new().unwrap();
        let full = dir.path().join("full.json");
        write_summary(&report(), &full).unwrap();
        assert_eq!(read_summary_log(&full).unwrap().len(), 1);

        let bare = dir.path().join("bare.json");
        fs::write(
            &bare,
            r#"{"test":"x","success":false,"failure":true,"console_logs":["[log] a","❌ All strategies failed"]}"#,
        )
        .unwrap();
        let log = read_summary_log(&bare).unwrap();
        assert_eq!(log[1].sequence, 1);
        assert!(log[1].text.contains("All strategies failed"));

        let legacy = dir.path().join("legacy.json");
        fs::write(
            &legacy,
            r#"{"console_logs":[{"type":"warning","text":"slow"},{"type":"log","text":"Metadata auto-populated"}]}"#,
        )
        .unwrap();
        let log = read_summary_log(&legacy).unwrap();
        assert_eq!(log[0].severity, Severity::Warning);
        assert_eq!(log[1].text, "Metadata auto-populated");

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{}").unwrap();
        assert!(read_summary_log(&broken).is_err());
    }

    #[test]
    fn test_headline_and_pass_rules() {
        let mut r = report();
        assert!(r.passed());
        assert!(r.headline().contains("SUCCESS"));
        assert!(r.headline().ends_with("[degraded]"));

        r.verdict = Verdict::Unclear;
        assert!(r.passed());
        r.verdict = Verdict::Failure;
        assert!(!r.passed());
    }
}
