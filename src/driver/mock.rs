//! Scripted in-memory page for exercising scenarios without a browser.
//!
//! A [`MockPage`] describes what the page contains and how it reacts;
//! [`MockDriver`] plays it back. Tests keep a [`MockHandle`] to inspect
//! what the harness did after the driver has been moved into a session.

use image::{ImageBuffer, Rgb, RgbImage};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::{BrowserDriver, DriverError, DriverResult, Selector, WaitUntil};
use crate::console::{ConsoleLog, Severity};

/// Something the page does in response to a click
#[derive(Debug, Clone)]
pub enum MockReaction {
    /// Write to the console
    Log(Severity, String),
    /// Start a download with the given name and contents
    Download { file_name: String, contents: Vec<u8> },
    /// Change what an expression evaluates to from now on
    SetEvaluation { expression: String, value: Value },
    AddElement(Selector),
    RemoveElement(Selector),
    /// Put a value into a form field, creating it if needed
    SetValue(Selector, String),
}

/// Value an expression evaluates to
#[derive(Debug, Clone)]
enum MockValue {
    Fixed(Value),
    /// `before` until `at` has passed since the first navigation, then `after`
    After { at: Duration, before: Value, after: Value },
    Error(String),
}

/// Script for a fake page
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    elements: HashMap<Selector, String>,
    clicks: HashMap<Selector, Vec<MockReaction>>,
    evaluations: HashMap<String, MockValue>,
    unreachable: HashSet<String>,
    /// Console events emitted after each successful navigation
    navigate_logs: Vec<(Duration, Severity, String)>,
    fail_close: bool,
}

impl MockPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// An element that exists with an empty value
    pub fn element(self, selector: Selector) -> Self {
        self.element_with_value(selector, "")
    }

    pub fn element_with_value(mut self, selector: Selector, value: impl Into<String>) -> Self {
        self.elements.insert(selector, value.into());
        self
    }

    /// A clickable element that reacts when clicked
    pub fn on_click(mut self, selector: Selector, reaction: MockReaction) -> Self {
        self.elements.entry(selector.clone()).or_default();
        self.clicks.entry(selector).or_default().push(reaction);
        self
    }

    pub fn evaluation(mut self, expression: impl Into<String>, value: Value) -> Self {
        self.evaluations
            .insert(expression.into(), MockValue::Fixed(value));
        self
    }

    /// An expression whose value flips once `at` has elapsed since navigation
    pub fn evaluation_after(
        mut self,
        expression: impl Into<String>,
        at: Duration,
        before: Value,
        after: Value,
    ) -> Self {
        self.evaluations
            .insert(expression.into(), MockValue::After { at, before, after });
        self
    }

    /// An expression that throws
    pub fn evaluation_error(mut self, expression: impl Into<String>, message: impl Into<String>) -> Self {
        self.evaluations
            .insert(expression.into(), MockValue::Error(message.into()));
        self
    }

    /// Console output the page produces `delay` after every navigation
    pub fn log_after_navigate(
        mut self,
        delay: Duration,
        severity: Severity,
        text: impl Into<String>,
    ) -> Self {
        self.navigate_logs.push((delay, severity, text.into()));
        self
    }

    pub fn unreachable(mut self, url: impl Into<String>) -> Self {
        self.unreachable.insert(url.into());
        self
    }

    /// Make `close()` report an error (after still counting the call)
    pub fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

#[derive(Debug)]
struct MockState {
    page: MockPage,
    navigated_at: Option<Instant>,
    current_url: Option<String>,
    viewport: (u32, u32),
    download_dir: Option<PathBuf>,
    uploads: Vec<(Selector, PathBuf)>,
    journal: Vec<String>,
    close_calls: usize,
    closed: bool,
}

/// Inspection handle that outlives the driver
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    console: ConsoleLog,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// How many times `close()` was called on the driver
    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    /// Every driver call in order, e.g. `"click #go"`
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    pub fn current_url(&self) -> Option<String> {
        self.lock().current_url.clone()
    }

    pub fn value_of(&self, selector: &Selector) -> Option<String> {
        self.lock().page.elements.get(selector).cloned()
    }

    pub fn uploads(&self) -> Vec<(Selector, PathBuf)> {
        self.lock().uploads.clone()
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.lock().viewport
    }

    pub fn console(&self) -> ConsoleLog {
        self.console.clone()
    }
}

/// Driver that plays back a [`MockPage`]
#[derive(Debug)]
pub struct MockDriver {
    handle: MockHandle,
}

impl MockDriver {
    pub fn new(page: MockPage) -> Self {
        let state = MockState {
            page,
            navigated_at: None,
            current_url: None,
            viewport: (320, 200),
            download_dir: None,
            uploads: Vec::new(),
            journal: Vec::new(),
            close_calls: 0,
            closed: false,
        };
        Self {
            handle: MockHandle {
                state: Arc::new(Mutex::new(state)),
                console: ConsoleLog::new(),
            },
        }
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    /// Lock the state, record the call, and refuse if closed
    fn enter(&self, call: String) -> DriverResult<MutexGuard<'_, MockState>> {
        let mut state = self.handle.lock();
        if state.closed {
            return Err(DriverError::Closed);
        }
        state.journal.push(call);
        Ok(state)
    }

    fn lookup(state: &MockState, target: &Selector) -> DriverResult<()> {
        if state.page.elements.contains_key(target) {
            Ok(())
        } else {
            Err(DriverError::ElementNotFound(target.to_string()))
        }
    }
}

impl BrowserDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn console(&self) -> ConsoleLog {
        self.handle.console.clone()
    }

    async fn navigate(
        &mut self,
        url: &str,
        _wait_until: WaitUntil,
        _timeout: Duration,
    ) -> DriverResult<()> {
        let mut state = self.enter(format!("navigate {}", url))?;
        if state.page.unreachable.contains(url) {
            return Err(DriverError::Navigation(format!(
                "{}: net::ERR_CONNECTION_REFUSED",
                url
            )));
        }
        state.current_url = Some(url.to_string());
        if state.navigated_at.is_none() {
            state.navigated_at = Some(Instant::now());
        }

        for (delay, severity, text) in state.page.navigate_logs.clone() {
            let console = self.handle.console.clone();
            if delay.is_zero() {
                console.push(severity, text);
            } else {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    console.push(severity, text);
                });
            }
        }
        Ok(())
    }

    async fn fill(&mut self, target: &Selector, value: &str, _timeout: Duration) -> DriverResult<()> {
        let mut state = self.enter(format!("fill {}", target))?;
        Self::lookup(&state, target)?;
        state.page.elements.insert(target.clone(), value.to_string());
        Ok(())
    }

    async fn click(&mut self, target: &Selector, _timeout: Duration) -> DriverResult<()> {
        let mut state = self.enter(format!("click {}", target))?;
        Self::lookup(&state, target)?;

        let reactions = state.page.clicks.get(target).cloned().unwrap_or_default();
        for reaction in reactions {
            match reaction {
                MockReaction::Log(severity, text) => {
                    self.handle.console.push(severity, text);
                }
                MockReaction::Download { file_name, contents } => {
                    let dir = state.download_dir.clone().ok_or_else(|| {
                        DriverError::Protocol("download attempted but downloads are not allowed".into())
                    })?;
                    std::fs::write(dir.join(file_name), contents)
                        .map_err(|e| DriverError::Protocol(e.to_string()))?;
                }
                MockReaction::SetEvaluation { expression, value } => {
                    state
                        .page
                        .evaluations
                        .insert(expression, MockValue::Fixed(value));
                }
                MockReaction::AddElement(selector) => {
                    state.page.elements.entry(selector).or_default();
                }
                MockReaction::RemoveElement(selector) => {
                    state.page.elements.remove(&selector);
                }
                MockReaction::SetValue(selector, value) => {
                    state.page.elements.insert(selector, value);
                }
            }
        }
        Ok(())
    }

    async fn upload(&mut self, target: &Selector, file: &Path, _timeout: Duration) -> DriverResult<()> {
        let mut state = self.enter(format!("upload {} {}", target, file.display()))?;
        Self::lookup(&state, target)?;
        if !file.exists() {
            return Err(DriverError::Protocol(format!(
                "cannot read {}",
                file.display()
            )));
        }
        state.uploads.push((target.clone(), file.to_path_buf()));
        Ok(())
    }

    async fn read_value(&mut self, target: &Selector, _timeout: Duration) -> DriverResult<String> {
        let state = self.enter(format!("read {}", target))?;
        state
            .page
            .elements
            .get(target)
            .cloned()
            .ok_or_else(|| DriverError::ElementNotFound(target.to_string()))
    }

    async fn count(&mut self, target: &Selector) -> DriverResult<usize> {
        let state = self.enter(format!("count {}", target))?;
        Ok(usize::from(state.page.elements.contains_key(target)))
    }

    async fn evaluate(&mut self, expression: &str) -> DriverResult<Value> {
        let state = self.enter(format!("evaluate {}", expression))?;
        match state.page.evaluations.get(expression) {
            None => Ok(Value::Null),
            Some(MockValue::Fixed(value)) => Ok(value.clone()),
            Some(MockValue::After { at, before, after }) => {
                let elapsed = state
                    .navigated_at
                    .map(|t| t.elapsed())
                    .unwrap_or_default();
                Ok(if elapsed >= *at { after.clone() } else { before.clone() })
            }
            Some(MockValue::Error(message)) => Err(DriverError::Evaluation(message.clone())),
        }
    }

    async fn screenshot(&mut self, _full_page: bool) -> DriverResult<Vec<u8>> {
        let state = self.enter("screenshot".to_string())?;
        let (width, height) = state.viewport;
        let img: RgbImage = ImageBuffer::from_pixel(width, height, Rgb([245, 245, 245]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| DriverError::Protocol(format!("Failed to encode PNG: {}", e)))?;
        Ok(bytes)
    }

    async fn set_viewport(&mut self, width: u32, height: u32) -> DriverResult<()> {
        let mut state = self.enter(format!("viewport {}x{}", width, height))?;
        state.viewport = (width, height);
        Ok(())
    }

    async fn allow_downloads(&mut self, dir: &Path) -> DriverResult<()> {
        let mut state = self.enter(format!("downloads {}", dir.display()))?;
        std::fs::create_dir_all(dir).map_err(|e| DriverError::Protocol(e.to_string()))?;
        state.download_dir = Some(dir.to_path_buf());
        Ok(())
    }

    async fn close(&mut self) -> DriverResult<()> {
        let mut state = self.handle.lock();
        state.close_calls += 1;
        state.journal.push("close".to_string());
        if state.closed {
            return Err(DriverError::Closed);
        }
        state.closed = true;
        if state.page.fail_close {
            return Err(DriverError::Protocol("browser refused to close".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fill_and_read_back() {
        let field = Selector::css("#doi");
        let mut driver = MockDriver::new(MockPage::new().element(field.clone()));
        let timeout = Duration::from_millis(10);

        driver.fill(&field, "10.1227/NEU", timeout).await.unwrap();
        assert_eq!(driver.read_value(&field, timeout).await.unwrap(), "10.1227/NEU");

        let missing = Selector::css("#pmid");
        assert_eq!(
            driver.fill(&missing, "1", timeout).await,
            Err(DriverError::ElementNotFound("#pmid".to_string()))
        );
    }

    #[tokio::test]
    async fn test_click_reactions_log_and_toggle_elements() {
        let button = Selector::css("#toggle");
        let panel = Selector::css("#panel");
        let mut driver = MockDriver::new(
            MockPage::new()
                .on_click(button.clone(), MockReaction::Log(Severity::Log, "toggled".into()))
                .on_click(button.clone(), MockReaction::AddElement(panel.clone())),
        );

        assert_eq!(driver.count(&panel).await.unwrap(), 0);
        driver.click(&button, Duration::ZERO).await.unwrap();
        assert_eq!(driver.count(&panel).await.unwrap(), 1);
        assert!(driver.console().contains_any(&["toggled"]));
    }

    #[tokio::test]
    async fn test_evaluation_variants() {
        let mut driver = MockDriver::new(
            MockPage::new()
                .evaluation("1 + 1", json!(2))
                .evaluation_error("boom()", "ReferenceError: boom is not defined"),
        );
        assert_eq!(driver.evaluate("1 + 1").await.unwrap(), json!(2));
        assert_eq!(driver.evaluate("unknown").await.unwrap(), Value::Null);
        assert!(matches!(
            driver.evaluate("boom()").await,
            Err(DriverError::Evaluation(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_driver_rejects_calls() {
        let mut driver = MockDriver::new(MockPage::new());
        let handle = driver.handle();
        driver.close().await.unwrap();
        assert_eq!(driver.close().await, Err(DriverError::Closed));
        assert_eq!(driver.evaluate("1").await, Err(DriverError::Closed));
        assert_eq!(handle.close_calls(), 2);
    }

    #[tokio::test]
    async fn test_screenshot_is_png_of_viewport_size() {
        let mut driver = MockDriver::new(MockPage::new());
        driver.set_viewport(64, 48).await.unwrap();
        let png = driver.screenshot(true).await.unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!((img.width(), img.height()), (64, 48));
    }
}
