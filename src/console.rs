//! Ordered capture of page console output and uncaught page errors.
//!
//! A [`ConsoleLog`] is a cheap cloneable handle; the driver's listener tasks
//! append to it while the scenario runner reads snapshots from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Severity of a captured page event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Log,
    Warning,
    Error,
    /// Uncaught exception raised by page script
    PageError,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Log => "log",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::PageError => "pageerror",
        };
        f.write_str(name)
    }
}

/// One captured console message or page error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLogEntry {
    pub severity: Severity,
    pub text: String,
    /// Position in the log, assigned on append
    pub sequence: usize,
}

impl fmt::Display for ConsoleLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.text)
    }
}

/// Append-only, arrival-ordered log shared between the driver and the runner
#[derive(Debug, Clone, Default)]
pub struct ConsoleLog {
    entries: Arc<Mutex<Vec<ConsoleLogEntry>>>,
}

impl ConsoleLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ConsoleLogEntry>> {
        // A listener that panicked mid-push cannot leave a half-written entry.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an event and echo it to the operator's terminal.
    /// Returns the sequence number assigned to it.
    pub fn push(&self, severity: Severity, text: impl Into<String>) -> usize {
        let text = text.into();
        let sequence = {
            let mut entries = self.lock();
            let sequence = entries.len();
            entries.push(ConsoleLogEntry {
                severity,
                text: text.clone(),
                sequence,
            });
            sequence
        };

        match severity {
            Severity::Log => tracing::info!(target: "page", seq = sequence, "{}", text),
            Severity::Warning => tracing::warn!(target: "page", seq = sequence, "{}", text),
            Severity::Error | Severity::PageError => {
                tracing::error!(target: "page", seq = sequence, kind = %severity, "{}", text)
            }
        }

        sequence
    }

    /// Snapshot of everything captured so far, in arrival order
    pub fn entries(&self) -> Vec<ConsoleLogEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The last `n` entries
    pub fn tail(&self, n: usize) -> Vec<ConsoleLogEntry> {
        let entries = self.lock();
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }

    pub fn contains_any<S: AsRef<str>>(&self, needles: &[S]) -> bool {
        self.lock()
            .iter()
            .any(|e| needles.iter().any(|n| e.text.contains(n.as_ref())))
    }

    /// Entries whose text mentions any of the keywords
    pub fn matching<S: AsRef<str>>(&self, keywords: &[S]) -> Vec<ConsoleLogEntry> {
        self.lock()
            .iter()
            .filter(|e| keywords.iter().any(|k| e.text.contains(k.as_ref())))
            .cloned()
            .collect()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.lock().iter().filter(|e| e.severity == severity).count()
    }
}
