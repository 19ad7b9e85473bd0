//! Scenario execution.
//!
//! Steps run strictly in order against one session. Everything except a
//! failed navigation or a lost session is recorded as a [`StepWarning`] and
//! the scenario carries on, so every run that gets past the first page load
//! ends with a verdict.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

use crate::checkpoint::{Checkpoint, write_checkpoint};
use crate::driver::{BrowserDriver, DriverError, Selector};
use crate::harness::session::BrowserSession;
use crate::harness::types::{HarnessError, HarnessResult, Scenario, Step};
use crate::harness::wait::{check, wait_fixed, wait_for_condition};
use crate::probe::{ContractResult, PanelStatus, Probe, ProbeResults, ResultPanel};
use crate::report::{DownloadRecord, RunReport, StepWarning, write_summary};
use crate::run_dir::RunDir;
use crate::verdict::{Verdict, VerdictBasis, decide, panel_verdict, scan_markers};

/// How often the download directory is checked
const DOWNLOAD_POLL: Duration = Duration::from_millis(250);

/// Suffix Chrome uses for downloads still in progress
const PARTIAL_DOWNLOAD_SUFFIX: &str = ".crdownload";

/// Lifecycle of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Succeeded,
    Failed,
    Unclear,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed | RunState::Unclear)
    }

    pub fn start(&mut self) -> HarnessResult<()> {
        match self {
            RunState::Idle => {
                *self = RunState::Running;
                Ok(())
            }
            other => Err(HarnessError::InvalidState(format!(
                "cannot start a run that is {:?}",
                other
            ))),
        }
    }

    /// Move to the terminal state matching `verdict`
    pub fn finish(&mut self, verdict: Verdict) -> HarnessResult<()> {
        if *self != RunState::Running {
            return Err(HarnessError::InvalidState(format!(
                "cannot finish a run that is {:?}",
                self
            )));
        }
        *self = match verdict {
            Verdict::Success => RunState::Succeeded,
            Verdict::Failure => RunState::Failed,
            Verdict::Unclear => RunState::Unclear,
        };
        Ok(())
    }
}

/// Run `scenario` in `session`, writing artifacts into `run`.
///
/// Returns `Err` only for fatal errors; the summary is written on success.
pub async fn run_scenario<D: BrowserDriver>(
    session: &mut BrowserSession<D>,
    scenario: &Scenario,
    run: &RunDir,
) -> HarnessResult<RunReport> {
    let mut runner = ScenarioRunner::new(session, scenario, run);
    runner.state.start()?;
    run.init()?;
    tracing::info!(scenario = %scenario.name, dir = %run.dir.display(), "starting scenario");

    let started_at = Utc::now();
    runner
        .session
        .open(&scenario.url, scenario.wait_until, scenario.navigation_timeout)
        .await?;

    for (index, step) in scenario.steps.iter().enumerate() {
        runner.run_step(index, step).await?;
    }

    let report = runner.finish(started_at).await?;
    write_summary(&report, &run.summary_path())?;
    tracing::info!("{}", report.headline());
    Ok(report)
}

struct ScenarioRunner<'a, D: BrowserDriver> {
    session: &'a mut BrowserSession<D>,
    scenario: &'a Scenario,
    run: &'a RunDir,
    state: RunState,
    warnings: Vec<StepWarning>,
    checkpoints: Vec<Checkpoint>,
    probes: ProbeResults,
    downloads: Vec<DownloadRecord>,
    degraded: bool,
}

impl<'a, D: BrowserDriver> ScenarioRunner<'a, D> {
    fn new(session: &'a mut BrowserSession<D>, scenario: &'a Scenario, run: &'a RunDir) -> Self {
        Self {
            session,
            scenario,
            run,
            state: RunState::Idle,
            warnings: Vec::new(),
            checkpoints: Vec::new(),
            probes: ProbeResults::new(),
            downloads: Vec::new(),
            degraded: false,
        }
    }

    /// Execute one step, turning soft failures into warnings
    async fn run_step(&mut self, index: usize, step: &Step) -> HarnessResult<()> {
        tracing::debug!(step = index, "{}", step.describe());
        match self.execute(index, step).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => {
                tracing::error!(step = index, error = %err, "aborting scenario");
                Err(err)
            }
            Err(err) => {
                if matches!(err, HarnessError::Timeout { .. }) {
                    self.degraded = true;
                }
                tracing::warn!(step = index, error = %err, "{} failed", step.describe());
                self.warnings.push(StepWarning::new(index, step.describe(), &err));
                Ok(())
            }
        }
    }

    async fn execute(&mut self, index: usize, step: &Step) -> HarnessResult<()> {
        let timeout = self.scenario.element_timeout;
        match step {
            Step::Navigate { url } => {
                self.session
                    .open(url, self.scenario.wait_until, self.scenario.navigation_timeout)
                    .await
            }
            Step::Fill { target, value } => {
                Ok(self.session.driver()?.fill(target, value, timeout).await?)
            }
            Step::Click { target } => Ok(self.session.driver()?.click(target, timeout).await?),
            Step::Upload { target, file } => {
                Ok(self.session.driver()?.upload(target, file, timeout).await?)
            }
            Step::WaitFixed(duration) => {
                wait_fixed(*duration).await;
                Ok(())
            }
            Step::WaitFor {
                condition,
                timeout,
                poll,
            } => {
                let outcome = wait_for_condition(self.session, condition, *timeout, *poll).await?;
                if outcome.satisfied {
                    Ok(())
                } else {
                    Err(HarnessError::Timeout {
                        what: condition.describe(),
                        after: *timeout,
                    })
                }
            }
            Step::Evaluate { name, expression } => self.evaluate_into(name, expression).await,
            Step::Probe(probe) => self.evaluate_into(probe.name(), probe.expression()).await,
            Step::ReadField { name, target } => {
                let result = self.session.driver()?.read_value(target, timeout).await;
                match result {
                    Ok(value) => {
                        tracing::info!(field = %name, value = %value, "read field");
                        self.probes.insert(name.clone(), Value::String(value));
                        Ok(())
                    }
                    Err(err) => {
                        self.probes.insert(name.clone(), Value::Null);
                        Err(err.into())
                    }
                }
            }
            Step::Screenshot { name } => self.screenshot(name).await,
            Step::ExpectDownload {
                trigger,
                save_as,
                timeout: download_timeout,
                validate_json,
            } => {
                self.capture_download(trigger, save_as, *download_timeout, *validate_json)
                    .await
            }
            Step::SaveProbe { name, file_name } => self.save_probe(name, file_name),
            Step::SetViewport { width, height } => {
                Ok(self.session.driver()?.set_viewport(*width, *height).await?)
            }
            Step::WhenPresent { target, steps } => {
                if self.session.driver()?.count(target).await? == 0 {
                    tracing::info!(target = %target, "not present, skipping {} steps", steps.len());
                    return Ok(());
                }
                self.run_nested(index, steps).await
            }
            Step::Unless { condition, steps } => {
                if check(self.session, condition).await? {
                    tracing::info!("{} holds, skipping {} steps", condition.describe(), steps.len());
                    return Ok(());
                }
                self.run_nested(index, steps).await
            }
            Step::Note(text) => {
                tracing::info!(scenario = %self.scenario.name, "{}", text);
                Ok(())
            }
        }
    }

    async fn run_nested(&mut self, index: usize, steps: &[Step]) -> HarnessResult<()> {
        for step in steps {
            Box::pin(self.run_step(index, step)).await?;
        }
        Ok(())
    }

    /// Evaluate and store under `name`; a failed evaluation stores `null`
    async fn evaluate_into(&mut self, name: &str, expression: &str) -> HarnessResult<()> {
        let result = self.session.driver()?.evaluate(expression).await;
        match result {
            Ok(value) => {
                tracing::info!(probe = name, value = %value, "probe");
                self.probes.insert(name.to_string(), value);
                Ok(())
            }
            Err(err) => {
                self.probes.insert(name.to_string(), Value::Null);
                Err(err.into())
            }
        }
    }

    async fn screenshot(&mut self, name: &str) -> HarnessResult<()> {
        let png = self.session.driver()?.screenshot(true).await?;
        let checkpoint = write_checkpoint(&self.run.dir, self.checkpoints.len() + 1, name, &png)?;
        tracing::info!(
            checkpoint = %checkpoint.name,
            path = %checkpoint.path.display(),
            "{}x{}",
            checkpoint.width,
            checkpoint.height
        );
        self.checkpoints.push(checkpoint);
        Ok(())
    }

    async fn capture_download(
        &mut self,
        trigger: &Selector,
        save_as: &str,
        timeout: Duration,
        validate_json: bool,
    ) -> HarnessResult<()> {
        let dir = self.run.downloads_dir();
        fs::create_dir_all(&dir)?;
        let before = finished_files(&dir)?;

        let element_timeout = self.scenario.element_timeout;
        let driver = self.session.driver()?;
        driver.allow_downloads(&dir).await?;
        driver.click(trigger, element_timeout).await?;

        let start = Instant::now();
        let file = loop {
            if let Some(path) = finished_files(&dir)?.into_iter().find(|p| !before.contains(p)) {
                break path;
            }
            if start.elapsed() >= timeout {
                return Err(HarnessError::Download(format!(
                    "nothing downloaded within {:?} after clicking {}",
                    timeout, trigger
                )));
            }
            tokio::time::sleep(DOWNLOAD_POLL).await;
        };

        let suggested_name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let dest = self.run.artifact_path(save_as);
        fs::rename(&file, &dest)?;
        let bytes = fs::metadata(&dest)?.len();
        tracing::info!(file = %dest.display(), bytes, "download saved");
        self.downloads.push(DownloadRecord {
            suggested_name,
            path: dest.clone(),
            bytes,
        });

        if validate_json {
            let keys = json_keys(&dest)?;
            self.probes
                .insert(format!("download:{}", save_as), Value::from(keys));
        }
        Ok(())
    }

    fn save_probe(&self, name: &str, file_name: &str) -> HarnessResult<()> {
        let value = self.probes.get(name).ok_or_else(|| {
            HarnessError::InvalidState(format!("no probe result named {}", name))
        })?;
        let path = self.run.artifact_path(file_name);
        fs::write(&path, serde_json::to_string_pretty(value)?)?;
        tracing::info!(probe = name, path = %path.display(), "probe saved");
        Ok(())
    }

    /// Decide the verdict and assemble the report
    async fn finish(mut self, started_at: chrono::DateTime<Utc>) -> HarnessResult<RunReport> {
        let contract = if self.scenario.use_result_contract {
            self.read_contract().await?
        } else {
            None
        };

        let log = self.session.console().entries();
        let markers = &self.scenario.markers;
        let scan = scan_markers(&log, markers);
        for hit in scan.success_hits.iter().chain(&scan.failure_hits) {
            tracing::info!(seq = hit.sequence, marker = %hit.marker, "marker matched");
        }

        let page_state = if self.scenario.judge_result_panels {
            self.judge_result_panels().await?
        } else {
            None
        };

        let (verdict, basis) = decide(contract.as_ref(), page_state, &log, markers);
        if basis == VerdictBasis::TextHeuristic {
            tracing::warn!("no result contract from the app, falling back to console markers");
        }
        self.state.finish(verdict)?;

        Ok(RunReport {
            test: self.scenario.name.clone(),
            success: scan.has_success(),
            failure: scan.has_failure(),
            verdict,
            verdict_basis: basis,
            degraded: self.degraded || basis == VerdictBasis::TextHeuristic,
            started_at,
            finished_at: Utc::now(),
            warnings: self.warnings,
            checkpoints: self.checkpoints,
            probes: self.probes,
            downloads: self.downloads,
            console_logs: log,
        })
    }

    /// Classify the diagnostics panels, reading them now if no step did
    async fn judge_result_panels(&mut self) -> HarnessResult<Option<Verdict>> {
        let probe = Probe::ResultPanels;
        let value = match self.probes.get(probe.name()) {
            Some(value) => value.clone(),
            None => match self.session.driver()?.evaluate(probe.expression()).await {
                Ok(value) => value,
                Err(DriverError::Closed) => return Err(HarnessError::SessionClosed),
                Err(err) => {
                    tracing::debug!(error = %err, "result panels unavailable");
                    return Ok(None);
                }
            },
        };

        let panels = ResultPanel::parse_all(&value);
        for panel in &panels {
            tracing::info!(test = %panel.test, status = ?panel.status(), "result panel");
        }
        let count = |status: PanelStatus| panels.iter().filter(|p| p.status() == status).count();
        self.probes.insert(
            "result_panel_counts".to_string(),
            serde_json::json!({
                "passed": count(PanelStatus::Passed),
                "failed": count(PanelStatus::Failed),
                "pending": count(PanelStatus::Pending),
            }),
        );
        Ok(panel_verdict(&panels))
    }

    async fn read_contract(&mut self) -> HarnessResult<Option<ContractResult>> {
        let probe = Probe::ResultContract;
        match self.session.driver()?.evaluate(probe.expression()).await {
            Ok(Value::Null) => Ok(None),
            Ok(value) => {
                let parsed = ContractResult::parse(&value);
                if parsed.is_none() {
                    tracing::warn!(value = %value, "ignoring unsupported result contract");
                }
                self.probes.insert(probe.name().to_string(), value);
                Ok(parsed)
            }
            Err(DriverError::Closed) => Err(HarnessError::SessionClosed),
            Err(err) => {
                tracing::debug!(error = %err, "result contract unavailable");
                Ok(None)
            }
        }
    }
}

/// Completed downloads currently in `dir`
fn finished_files(dir: &Path) -> HarnessResult<HashSet<PathBuf>> {
    let mut files = HashSet::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let partial = path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(PARTIAL_DOWNLOAD_SUFFIX))
            .unwrap_or(true);
        if path.is_file() && !partial {
            files.insert(path);
        }
    }
    Ok(files)
}

/// Top-level keys of a JSON object file
fn json_keys(path: &Path) -> HarnessResult<Vec<String>> {
    let text = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&text).map_err(|e| {
        HarnessError::Download(format!("{} is not valid JSON: {}", path.display(), e))
    })?;
    match value {
        Value::Object(map) => Ok(map.keys().cloned().collect()),
        other => Err(HarnessError::Download(format!(
            "{} holds a JSON {} rather than an object",
            path.display(),
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_state_transitions() {
        let mut state = RunState::Idle;
        assert!(state.finish(Verdict::Success).is_err());
        state.start().unwrap();
        assert!(state.start().is_err());
        state.finish(Verdict::Unclear).unwrap();
        assert_eq!(state, RunState::Unclear);
        assert!(state.is_terminal());
        assert!(state.finish(Verdict::Success).is_err());
    }

    #[test]
    fn test_partial_downloads_are_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("export.json.crdownload"), "{").unwrap();
        fs::write(dir.path().join("done.json"), "{}").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let files = finished_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files.contains(&dir.path().join("done.json")));
    }

    #[test]
    fn test_json_keys() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.json");
        fs::write(&good, r#"{"metadata":{},"sections":[]}"#).unwrap();
        assert_eq!(json_keys(&good).unwrap(), vec!["metadata", "sections"]);

        let array = dir.path().join("array.json");
        fs::write(&array, "[1]").unwrap();
        assert_eq!(json_keys(&array).unwrap_err().kind(), "download");

        let junk = dir.path().join("junk.json");
        fs::write(&junk, "not json").unwrap();
        assert_eq!(json_keys(&junk).unwrap_err().kind(), "download");
    }
}
