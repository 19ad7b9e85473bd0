//! Browser driver abstraction.
//!
//! The harness never talks to a browser directly; it goes through
//! [`BrowserDriver`]. Two implementations ship with the crate:
//! - [`ChromeDriver`] drives a real Chrome/Chromium over the DevTools protocol
//! - [`MockDriver`] is a scripted in-memory page for exercising scenarios in tests

pub mod chrome;
pub mod mock;

pub use chrome::{ChromeDriver, ChromeDriverConfig};
pub use mock::{MockDriver, MockPage};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::console::ConsoleLog;

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors reported by a browser driver
#[derive(Debug, Clone, PartialEq)]
pub enum DriverError {
    /// Browser process could not be started
    Launch(String),
    /// Target unreachable or load never finished
    Navigation(String),
    /// No element matched within the lookup timeout
    ElementNotFound(String),
    /// Script evaluation threw or returned something unusable
    Evaluation(String),
    /// Any other protocol-level failure
    Protocol(String),
    /// The driver was already closed
    Closed,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Launch(msg) => write!(f, "Browser launch failed: {}", msg),
            DriverError::Navigation(msg) => write!(f, "Navigation failed: {}", msg),
            DriverError::ElementNotFound(sel) => write!(f, "Element not found: {}", sel),
            DriverError::Evaluation(msg) => write!(f, "Evaluation failed: {}", msg),
            DriverError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            DriverError::Closed => write!(f, "Browser session already closed"),
        }
    }
}

impl std::error::Error for DriverError {}

/// How to locate an element on the page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Selector {
    /// Plain CSS selector; the first match wins
    Css(String),
    /// First element matching `css` whose rendered text contains `text`
    Text { css: String, text: String },
}

impl Selector {
    pub fn css(css: impl Into<String>) -> Self {
        Selector::Css(css.into())
    }

    pub fn with_text(css: impl Into<String>, text: impl Into<String>) -> Self {
        Selector::Text {
            css: css.into(),
            text: text.into(),
        }
    }

    /// The CSS part of the selector
    pub fn css_part(&self) -> &str {
        match self {
            Selector::Css(css) => css,
            Selector::Text { css, .. } => css,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(css) => f.write_str(css),
            Selector::Text { css, text } => write!(f, "{}:has-text({:?})", css, text),
        }
    }
}

/// Load state to wait for after a navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WaitUntil {
    /// The `load` event fired
    Load,
    /// No network activity for a short while after load
    #[default]
    NetworkIdle,
}

/// Operations the harness needs from a browser.
///
/// A driver owns exactly one page. Element-level operations take a lookup
/// timeout and fail with [`DriverError::ElementNotFound`] once it elapses.
#[allow(async_fn_in_trait)]
pub trait BrowserDriver {
    /// Identifier used in logs and reports (e.g. "chrome", "mock")
    fn name(&self) -> &str;

    /// Shared handle to the page's console log
    fn console(&self) -> ConsoleLog;

    async fn navigate(&mut self, url: &str, wait_until: WaitUntil, timeout: Duration)
    -> DriverResult<()>;

    /// Replace the value of an input/textarea and fire `input`/`change`
    async fn fill(&mut self, target: &Selector, value: &str, timeout: Duration) -> DriverResult<()>;

    async fn click(&mut self, target: &Selector, timeout: Duration) -> DriverResult<()>;

    /// Set the files of a file-input element
    async fn upload(&mut self, target: &Selector, file: &Path, timeout: Duration)
    -> DriverResult<()>;

    /// Current `value` of an input element
    async fn read_value(&mut self, target: &Selector, timeout: Duration) -> DriverResult<String>;

    /// Number of elements currently matching, without waiting
    async fn count(&mut self, target: &Selector) -> DriverResult<usize>;

    /// Evaluate a JavaScript expression; `undefined` comes back as `null`
    async fn evaluate(&mut self, expression: &str) -> DriverResult<serde_json::Value>;

    /// PNG screenshot of the page
    async fn screenshot(&mut self, full_page: bool) -> DriverResult<Vec<u8>>;

    async fn set_viewport(&mut self, width: u32, height: u32) -> DriverResult<()>;

    /// Route downloads triggered by the page into `dir`
    async fn allow_downloads(&mut self, dir: &Path) -> DriverResult<()>;

    /// Shut the browser down. Calling it again returns [`DriverError::Closed`].
    async fn close(&mut self) -> DriverResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_display() {
        assert_eq!(Selector::css("#pdf-file").to_string(), "#pdf-file");
        assert_eq!(
            Selector::with_text("button", "Run All Tests").to_string(),
            "button:has-text(\"Run All Tests\")"
        );
        assert_eq!(Selector::with_text("button", "✨").css_part(), "button");
    }

    #[test]
    fn test_wait_until_defaults_to_network_idle() {
        assert_eq!(WaitUntil::default(), WaitUntil::NetworkIdle);
    }
}
