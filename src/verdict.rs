//! Verdict engine.
//!
//! The preferred source of truth is the structured result contract (see
//! [`crate::probe::ContractResult`]). When the app does not publish one, the
//! verdict comes from page state the scenario knows how to judge (the
//! diagnostics panels), and after that from scanning the console log for
//! marker substrings; that last mode is reported as
//! [`VerdictBasis::TextHeuristic`] and counts as degraded.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::console::ConsoleLogEntry;
use crate::probe::{ContractResult, ContractStatus, PanelStatus, ResultPanel};

/// Final classification of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Failure,
    Unclear,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Success => "success",
            Verdict::Failure => "failure",
            Verdict::Unclear => "unclear",
        })
    }
}

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictBasis {
    /// The app's structured result
    Contract,
    /// Outcome marks read from the page, such as the diagnostics panels
    PageState,
    /// Substring markers over console text (degraded)
    TextHeuristic,
}

/// Scenario-specific success and failure substrings (exact, case-sensitive)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Markers {
    pub success: Vec<String>,
    pub failure: Vec<String>,
}

impl Markers {
    pub fn new<S, F>(success: impl IntoIterator<Item = S>, failure: impl IntoIterator<Item = F>) -> Self
    where
        S: Into<String>,
        F: Into<String>,
    {
        Self {
            success: success.into_iter().map(Into::into).collect(),
            failure: failure.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.success.is_empty() && self.failure.is_empty()
    }
}

/// A marker found in a particular log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerHit {
    pub marker: String,
    pub sequence: usize,
}

/// Every marker occurrence in a log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerScan {
    pub success_hits: Vec<MarkerHit>,
    pub failure_hits: Vec<MarkerHit>,
}

impl MarkerScan {
    pub fn has_success(&self) -> bool {
        !self.success_hits.is_empty()
    }

    pub fn has_failure(&self) -> bool {
        !self.failure_hits.is_empty()
    }

    /// A success marker wins over any failure marker
    pub fn verdict(&self) -> Verdict {
        if self.has_success() {
            Verdict::Success
        } else if self.has_failure() {
            Verdict::Failure
        } else {
            Verdict::Unclear
        }
    }
}

/// Find every success/failure marker occurrence, in log order
pub fn scan_markers(log: &[ConsoleLogEntry], markers: &Markers) -> MarkerScan {
    let hits = |candidates: &[String]| -> Vec<MarkerHit> {
        log.iter()
            .flat_map(|entry| {
                candidates
                    .iter()
                    .filter(|m| !m.is_empty() && entry.text.contains(m.as_str()))
                    .map(|m| MarkerHit {
                        marker: m.clone(),
                        sequence: entry.sequence,
                    })
            })
            .collect()
    };

    MarkerScan {
        success_hits: hits(&markers.success),
        failure_hits: hits(&markers.failure),
    }
}

/// Text-heuristic verdict for a captured log. Pure.
pub fn compute_verdict(log: &[ConsoleLogEntry], markers: &Markers) -> Verdict {
    scan_markers(log, markers).verdict()
}

/// Verdict from the structured contract, if it reached a terminal status
pub fn contract_verdict(contract: &ContractResult) -> Option<Verdict> {
    match contract.status {
        ContractStatus::Success => Some(Verdict::Success),
        ContractStatus::Failure => Some(Verdict::Failure),
        ContractStatus::Pending => None,
    }
}

/// Verdict from diagnostics panels once every one of them shows an outcome.
/// Any failed panel fails the run.
pub fn panel_verdict(panels: &[ResultPanel]) -> Option<Verdict> {
    let statuses: Vec<PanelStatus> = panels.iter().map(ResultPanel::status).collect();
    if statuses.is_empty() || statuses.contains(&PanelStatus::Pending) {
        None
    } else if statuses.contains(&PanelStatus::Failed) {
        Some(Verdict::Failure)
    } else {
        Some(Verdict::Success)
    }
}

/// Decide using the contract when it is conclusive, then page state, else the markers
pub fn decide(
    contract: Option<&ContractResult>,
    page_state: Option<Verdict>,
    log: &[ConsoleLogEntry],
    markers: &Markers,
) -> (Verdict, VerdictBasis) {
    match (contract.and_then(contract_verdict), page_state) {
        (Some(verdict), _) => (verdict, VerdictBasis::Contract),
        (None, Some(verdict)) => (verdict, VerdictBasis::PageState),
        (None, None) => (compute_verdict(log, markers), VerdictBasis::TextHeuristic),
    }
}
