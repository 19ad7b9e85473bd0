use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::driver::{DriverError, Selector, WaitUntil};
use crate::probe::Probe;
use crate::verdict::Markers;

/// Default element lookup timeout for steps
pub const DEFAULT_ELEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default poll interval for condition waits
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after an interaction whose effect has no observable completion signal
pub const SETTLE: Duration = Duration::from_secs(1);

/// A predicate polled by [`Step::WaitFor`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Any captured console entry contains any of these substrings
    LogContains(Vec<String>),
    /// A named probe evaluates to a truthy value
    Probe(Probe),
    /// An arbitrary expression evaluates to a truthy value
    Script(String),
    /// At least one element matches
    ElementPresent(Selector),
    /// Any of the nested conditions holds
    Any(Vec<Condition>),
}

impl Condition {
    pub fn log_contains<S: Into<String>>(needles: impl IntoIterator<Item = S>) -> Self {
        Condition::LogContains(needles.into_iter().map(Into::into).collect())
    }

    /// Short human-readable form for logs and warnings
    pub fn describe(&self) -> String {
        match self {
            Condition::LogContains(needles) => format!("console mentions {:?}", needles),
            Condition::Probe(probe) => format!("probe {} is truthy", probe.name()),
            Condition::Script(expr) => format!("`{}` is truthy", truncate(expr, 60)),
            Condition::ElementPresent(sel) => format!("{} is present", sel),
            Condition::Any(conditions) => conditions
                .iter()
                .map(Condition::describe)
                .collect::<Vec<_>>()
                .join(" or "),
        }
    }
}

/// One scripted interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Step {
    Navigate { url: String },
    Fill { target: Selector, value: String },
    Click { target: Selector },
    /// Set a local file on a file input
    Upload { target: Selector, file: PathBuf },
    /// Unconditional delay
    WaitFixed(Duration),
    /// Poll `condition` until it holds or `timeout` elapses
    WaitFor {
        condition: Condition,
        timeout: Duration,
        poll: Duration,
    },
    /// Evaluate an expression and store the result under `name`
    Evaluate { name: String, expression: String },
    /// Evaluate a named probe and store the result under its name
    Probe(Probe),
    /// Store an input's current value under `name`
    ReadField { name: String, target: Selector },
    Screenshot { name: String },
    /// Click `trigger` and capture the file the page downloads
    ExpectDownload {
        trigger: Selector,
        save_as: String,
        timeout: Duration,
        validate_json: bool,
    },
    /// Write a stored probe result to a JSON file in the run directory
    SaveProbe { name: String, file_name: String },
    SetViewport { width: u32, height: u32 },
    /// Run `steps` only if `target` currently exists
    WhenPresent { target: Selector, steps: Vec<Step> },
    /// Run `steps` only if `condition` does not hold right now
    Unless { condition: Condition, steps: Vec<Step> },
    /// Progress line for the operator
    Note(String),
}

impl Step {
    pub fn navigate(url: impl Into<String>) -> Self {
        Step::Navigate { url: url.into() }
    }

    pub fn fill(target: Selector, value: impl Into<String>) -> Self {
        Step::Fill {
            target,
            value: value.into(),
        }
    }

    pub fn click(target: Selector) -> Self {
        Step::Click { target }
    }

    pub fn upload(target: Selector, file: impl Into<PathBuf>) -> Self {
        Step::Upload {
            target,
            file: file.into(),
        }
    }

    pub fn wait_secs(seconds: u64) -> Self {
        Step::WaitFixed(Duration::from_secs(seconds))
    }

    pub fn settle() -> Self {
        Step::WaitFixed(SETTLE)
    }

    /// Wait with the default one-second poll interval
    pub fn wait_for(condition: Condition, timeout: Duration) -> Self {
        Step::WaitFor {
            condition,
            timeout,
            poll: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn evaluate(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Step::Evaluate {
            name: name.into(),
            expression: expression.into(),
        }
    }

    pub fn read_field(name: impl Into<String>, target: Selector) -> Self {
        Step::ReadField {
            name: name.into(),
            target,
        }
    }

    pub fn screenshot(name: impl Into<String>) -> Self {
        Step::Screenshot { name: name.into() }
    }

    pub fn note(text: impl Into<String>) -> Self {
        Step::Note(text.into())
    }

    pub fn when_present(target: Selector, steps: Vec<Step>) -> Self {
        Step::WhenPresent { target, steps }
    }

    pub fn unless(condition: Condition, steps: Vec<Step>) -> Self {
        Step::Unless { condition, steps }
    }

    /// Short human-readable form for logs and warnings
    pub fn describe(&self) -> String {
        match self {
            Step::Navigate { url } => format!("navigate {}", url),
            Step::Fill { target, .. } => format!("fill {}", target),
            Step::Click { target } => format!("click {}", target),
            Step::Upload { target, file } => format!("upload {} -> {}", file.display(), target),
            Step::WaitFixed(d) => format!("wait {:?}", d),
            Step::WaitFor { condition, timeout, .. } => {
                format!("wait up to {:?} for {}", timeout, condition.describe())
            }
            Step::Evaluate { name, .. } => format!("evaluate {}", name),
            Step::Probe(probe) => format!("probe {}", probe.name()),
            Step::ReadField { name, target } => format!("read {} from {}", name, target),
            Step::Screenshot { name } => format!("screenshot {}", name),
            Step::ExpectDownload { trigger, save_as, .. } => {
                format!("download {} via {}", save_as, trigger)
            }
            Step::SaveProbe { name, file_name } => format!("save {} to {}", name, file_name),
            Step::SetViewport { width, height } => format!("viewport {}x{}", width, height),
            Step::WhenPresent { target, steps } => {
                format!("if {} present ({} steps)", target, steps.len())
            }
            Step::Unless { condition, steps } => {
                format!("unless {} ({} steps)", condition.describe(), steps.len())
            }
            Step::Note(text) => format!("note {}", truncate(text, 40)),
        }
    }
}

/// An end-to-end scripted run against one browser session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Short identifier (also used for the run directory)
    pub name: String,

    /// What the scenario checks
    pub description: String,

    /// Page opened when the session starts
    pub url: String,

    pub wait_until: WaitUntil,

    pub steps: Vec<Step>,

    /// Console substrings that decide the verdict in text-heuristic mode
    pub markers: Markers,

    /// Query the app's structured result before falling back to markers
    pub use_result_contract: bool,

    /// Decide from the classified `.result` panels when the contract is inconclusive
    #[serde(default)]
    pub judge_result_panels: bool,

    /// Console keywords echoed as a summary after the run
    #[serde(default)]
    pub highlights: Vec<String>,

    /// Lookup timeout for element steps
    pub element_timeout: Duration,

    /// Bound on every navigation
    pub navigation_timeout: Duration,
}

impl Scenario {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            url: url.into(),
            wait_until: WaitUntil::NetworkIdle,
            steps: Vec::new(),
            markers: Markers::default(),
            use_result_contract: true,
            judge_result_panels: false,
            highlights: Vec::new(),
            element_timeout: DEFAULT_ELEMENT_TIMEOUT,
            navigation_timeout: Duration::from_secs(30),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn markers(mut self, markers: Markers) -> Self {
        self.markers = markers;
        self
    }

    pub fn result_contract(mut self, enabled: bool) -> Self {
        self.use_result_contract = enabled;
        self
    }

    pub fn judge_result_panels(mut self, enabled: bool) -> Self {
        self.judge_result_panels = enabled;
        self
    }

    pub fn highlights<S: Into<String>>(mut self, keywords: impl IntoIterator<Item = S>) -> Self {
        self.highlights = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn element_timeout(mut self, timeout: Duration) -> Self {
        self.element_timeout = timeout;
        self
    }

    pub fn navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error types for harness operations
#[derive(Debug)]
pub enum HarnessError {
    /// The target could not be loaded; aborts the scenario
    Navigation { url: String, reason: String },

    /// No element matched within the lookup timeout
    ElementNotFound { selector: String },

    /// Script evaluation failed
    Evaluation(String),

    /// The expected download never materialized or was unusable
    Download(String),

    /// A condition did not hold before its timeout
    Timeout { what: String, after: Duration },

    /// The browser session is gone; aborts the scenario
    SessionClosed,

    /// Any other driver failure
    Driver(DriverError),

    /// Screenshot could not be stored
    Checkpoint(String),

    /// Run state machine misuse
    InvalidState(String),

    /// I/O error
    Io(std::io::Error),

    /// JSON error
    Serialization(serde_json::Error),
}

impl HarnessError {
    /// Fatal errors abort the scenario; everything else becomes a warning
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::Navigation { .. } | HarnessError::SessionClosed
        )
    }

    /// Short category name used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Navigation { .. } => "navigation",
            HarnessError::ElementNotFound { .. } => "element_not_found",
            HarnessError::Evaluation(_) => "evaluation",
            HarnessError::Download(_) => "download",
            HarnessError::Timeout { .. } => "timeout",
            HarnessError::SessionClosed => "session_closed",
            HarnessError::Driver(_) => "driver",
            HarnessError::Checkpoint(_) => "checkpoint",
            HarnessError::InvalidState(_) => "invalid_state",
            HarnessError::Io(_) => "io",
            HarnessError::Serialization(_) => "serialization",
        }
    }

    /// Attach the URL to a navigation failure reported by the driver
    pub fn navigation(url: &str, err: DriverError) -> Self {
        match err {
            DriverError::Closed => HarnessError::SessionClosed,
            DriverError::Navigation(reason) => HarnessError::Navigation {
                url: url.to_string(),
                reason,
            },
            other => HarnessError::Navigation {
                url: url.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl std::fmt::Display for HarnessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HarnessError::Navigation { url, reason } => {
                write!(f, "Navigation to {} failed: {}", url, reason)
            }
            HarnessError::ElementNotFound { selector } => {
                write!(f, "Element not found: {}", selector)
            }
            HarnessError::Evaluation(msg) => write!(f, "Evaluation error: {}", msg),
            HarnessError::Download(msg) => write!(f, "Download error: {}", msg),
            HarnessError::Timeout { what, after } => {
                write!(f, "Timed out after {:?} waiting for {}", after, what)
            }
            HarnessError::SessionClosed => write!(f, "Browser session is closed"),
            HarnessError::Driver(err) => write!(f, "Driver error: {}", err),
            HarnessError::Checkpoint(msg) => write!(f, "Checkpoint error: {}", msg),
            HarnessError::InvalidState(msg) => write!(f, "Invalid run state: {}", msg),
            HarnessError::Io(err) => write!(f, "I/O error: {}", err),
            HarnessError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl std::error::Error for HarnessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HarnessError::Driver(err) => Some(err),
            HarnessError::Io(err) => Some(err),
            HarnessError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DriverError> for HarnessError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::ElementNotFound(selector) => HarnessError::ElementNotFound { selector },
            DriverError::Evaluation(msg) => HarnessError::Evaluation(msg),
            DriverError::Closed => HarnessError::SessionClosed,
            other => HarnessError::Driver(other),
        }
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        HarnessError::Io(err)
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        HarnessError::Serialization(err)
    }
}

impl From<image::ImageError> for HarnessError {
    fn from(err: image::ImageError) -> Self {
        HarnessError::Checkpoint(err.to_string())
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_navigation_and_closed_are_fatal() {
        let nav = HarnessError::navigation("http://x", DriverError::Navigation("refused".into()));
        assert!(nav.is_fatal());
        assert!(HarnessError::from(DriverError::Closed).is_fatal());
        assert!(!HarnessError::from(DriverError::ElementNotFound("#a".into())).is_fatal());
        assert!(!HarnessError::Download("none".into()).is_fatal());
        assert!(
            !HarnessError::Timeout {
                what: "x".into(),
                after: Duration::from_secs(1)
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_driver_errors_map_to_taxonomy() {
        let err: HarnessError = DriverError::ElementNotFound("#doi".into()).into();
        assert_eq!(err.kind(), "element_not_found");
        assert_eq!(err.to_string(), "Element not found: #doi");

        let err: HarnessError = DriverError::Evaluation("ReferenceError".into()).into();
        assert_eq!(err.kind(), "evaluation");
    }

    #[test]
    fn test_step_describe() {
        assert_eq!(
            Step::click(Selector::with_text("button", "✨")).describe(),
            "click button:has-text(\"✨\")"
        );
        let wait = Step::wait_for(
            Condition::log_contains(["Preprocessing complete"]),
            Duration::from_secs(10),
        );
        assert_eq!(
            wait.describe(),
            "wait up to 10s for console mentions [\"Preprocessing complete\"]"
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("✨✨✨", 2), "✨✨...");
        assert_eq!(truncate("short", 10), "short");
    }
}
