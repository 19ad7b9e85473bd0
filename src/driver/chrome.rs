//! Chrome/Chromium driver over the DevTools protocol.

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EventConsoleApiCalled, EventExceptionThrown, ExceptionDetails,
    RemoteObject,
};
use chromiumoxide::element::Element;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{BrowserDriver, DriverError, DriverResult, Selector, WaitUntil};
use crate::config;
use crate::console::{ConsoleLog, Severity};

/// Attribute used to pin text-matched elements so they can be found by CSS
const TARGET_ATTR: &str = "data-study-acceptance";

/// Delay between element lookup attempts
const ELEMENT_POLL: Duration = Duration::from_millis(100);

/// Delay between network quiet checks
const NETWORK_POLL: Duration = Duration::from_millis(250);

/// How long the resource count must stay unchanged to count as idle
const NETWORK_QUIET: Duration = Duration::from_millis(500);

/// Launch settings for [`ChromeDriver`]
#[derive(Debug, Clone)]
pub struct ChromeDriverConfig {
    /// Run without a window; headful unless asked
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Explicit browser executable, otherwise auto-detected
    pub executable: Option<PathBuf>,
    /// Pass `--no-sandbox` (needed in most containers)
    pub no_sandbox: bool,
}

impl Default for ChromeDriverConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            headless: cfg.browser.headless,
            viewport_width: cfg.browser.viewport_width,
            viewport_height: cfg.browser.viewport_height,
            executable: cfg.browser.chrome_path.clone(),
            no_sandbox: false,
        }
    }
}

impl ChromeDriverConfig {
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    pub fn no_sandbox(mut self, no_sandbox: bool) -> Self {
        self.no_sandbox = no_sandbox;
        self
    }
}

/// Drives one page of a freshly launched Chrome instance
pub struct ChromeDriver {
    browser: Browser,
    page: Page,
    console: ConsoleLog,
    handler_task: JoinHandle<()>,
    listeners: Vec<JoinHandle<()>>,
    marker_seq: u64,
    closed: bool,
}

impl ChromeDriver {
    /// Launch the browser, open a blank page and start capturing its console.
    pub async fn launch(config: ChromeDriverConfig) -> DriverResult<Self> {
        info!(
            headless = config.headless,
            "Launching Chrome ({}x{})", config.viewport_width, config.viewport_height
        );

        let mut builder = BrowserConfig::builder()
            .window_size(config.viewport_width, config.viewport_height)
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if !config.headless {
            builder = builder.with_head();
        }
        if config.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &config.executable {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder.build().map_err(DriverError::Launch)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        // Process DevTools messages for as long as the browser lives.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    debug!("CDP handler event loop ended");
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| DriverError::Launch(format!("failed to open page: {}", e)))?;

        let mut driver = Self {
            browser,
            page,
            console: ConsoleLog::new(),
            handler_task,
            listeners: Vec::new(),
            marker_seq: 0,
            closed: false,
        };
        driver
            .set_viewport(config.viewport_width, config.viewport_height)
            .await?;
        driver.subscribe_console().await?;
        Ok(driver)
    }

    async fn subscribe_console(&mut self) -> DriverResult<()> {
        let mut console_events = self
            .page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        let log = self.console.clone();
        self.listeners.push(tokio::spawn(async move {
            while let Some(event) = console_events.next().await {
                log.push(console_severity(&event.r#type), console_text(&event.args));
            }
        }));

        let mut exceptions = self
            .page
            .event_listener::<EventExceptionThrown>()
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        let log = self.console.clone();
        self.listeners.push(tokio::spawn(async move {
            while let Some(event) = exceptions.next().await {
                log.push(Severity::PageError, exception_text(&event.exception_details));
            }
        }));

        Ok(())
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        Ok(())
    }

    async fn eval(&self, expression: &str) -> DriverResult<Value> {
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(|e| DriverError::Evaluation(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    /// Wait until the document has loaded and no new resources were
    /// requested for [`NETWORK_QUIET`].
    async fn wait_for_network_quiet(&self) -> DriverResult<()> {
        let mut last_count: Option<u64> = None;
        let mut quiet_since = Instant::now();
        loop {
            let state = self
                .eval(
                    "({ ready: document.readyState, resources: performance.getEntriesByType('resource').length })",
                )
                .await?;
            let ready = state["ready"].as_str() == Some("complete");
            let count = state["resources"].as_u64().unwrap_or(0);

            if last_count != Some(count) {
                last_count = Some(count);
                quiet_since = Instant::now();
            } else if ready && quiet_since.elapsed() >= NETWORK_QUIET {
                return Ok(());
            }
            tokio::time::sleep(NETWORK_POLL).await;
        }
    }

    async fn try_locate(&mut self, target: &Selector) -> Option<Element> {
        match target {
            Selector::Css(css) => self.page.find_element(css.as_str()).await.ok(),
            Selector::Text { css, text } => {
                self.marker_seq += 1;
                let marker = format!("t{}", self.marker_seq);
                let script = format!(
                    "(() => {{ const el = Array.from(document.querySelectorAll({css})).find(e => (e.innerText || e.textContent || '').includes({text})); if (!el) return false; el.setAttribute({attr}, {marker}); return true; }})()",
                    css = js_string(css),
                    text = js_string(text),
                    attr = js_string(TARGET_ATTR),
                    marker = js_string(&marker),
                );
                match self.eval(&script).await {
                    Ok(Value::Bool(true)) => self
                        .page
                        .find_element(format!("[{}=\"{}\"]", TARGET_ATTR, marker))
                        .await
                        .ok(),
                    _ => None,
                }
            }
        }
    }

    /// Poll for an element until it appears or `timeout` elapses
    async fn locate(&mut self, target: &Selector, timeout: Duration) -> DriverResult<Element> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.try_locate(target).await {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                return Err(DriverError::ElementNotFound(target.to_string()));
            }
            tokio::time::sleep(ELEMENT_POLL).await;
        }
    }
}

impl BrowserDriver for ChromeDriver {
    fn name(&self) -> &str {
        "chrome"
    }

    fn console(&self) -> ConsoleLog {
        self.console.clone()
    }

    async fn navigate(
        &mut self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> DriverResult<()> {
        self.ensure_open()?;
        debug!("Navigating to {}", url);

        let load = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| DriverError::Navigation(format!("{}: {}", url, e)))?;
            if wait_until == WaitUntil::NetworkIdle {
                self.wait_for_network_quiet().await?;
            }
            Ok::<(), DriverError>(())
        };

        tokio::time::timeout(timeout, load).await.map_err(|_| {
            DriverError::Navigation(format!("{} did not settle within {:?}", url, timeout))
        })?
    }

    async fn fill(&mut self, target: &Selector, value: &str, timeout: Duration) -> DriverResult<()> {
        let element = self.locate(target, timeout).await?;
        let function = format!(
            "function() {{ this.focus(); this.value = {}; this.dispatchEvent(new Event('input', {{ bubbles: true }})); this.dispatchEvent(new Event('change', {{ bubbles: true }})); }}",
            js_string(value)
        );
        element
            .call_js_fn(function, false)
            .await
            .map_err(|e| DriverError::Evaluation(format!("fill {}: {}", target, e)))?;
        Ok(())
    }

    async fn click(&mut self, target: &Selector, timeout: Duration) -> DriverResult<()> {
        let element = self.locate(target, timeout).await?;
        element
            .click()
            .await
            .map_err(|e| DriverError::Protocol(format!("click {}: {}", target, e)))?;
        Ok(())
    }

    async fn upload(&mut self, target: &Selector, file: &Path, timeout: Duration) -> DriverResult<()> {
        let absolute = std::fs::canonicalize(file)
            .map_err(|e| DriverError::Protocol(format!("cannot read {}: {}", file.display(), e)))?;
        let element = self.locate(target, timeout).await?;

        let params = SetFileInputFilesParams::builder()
            .files(vec![absolute.to_string_lossy().to_string()])
            .backend_node_id(element.backend_node_id.clone())
            .build()
            .map_err(DriverError::Protocol)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| DriverError::Protocol(format!("upload to {}: {}", target, e)))?;
        Ok(())
    }

    async fn read_value(&mut self, target: &Selector, timeout: Duration) -> DriverResult<String> {
        let element = self.locate(target, timeout).await?;
        let returns = element
            .call_js_fn("function() { return this.value; }", false)
            .await
            .map_err(|e| DriverError::Evaluation(format!("read {}: {}", target, e)))?;
        Ok(returns
            .result
            .value
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn count(&mut self, target: &Selector) -> DriverResult<usize> {
        self.ensure_open()?;
        let script = match target {
            Selector::Css(css) => format!("document.querySelectorAll({}).length", js_string(css)),
            Selector::Text { css, text } => format!(
                "Array.from(document.querySelectorAll({})).filter(e => (e.innerText || e.textContent || '').includes({})).length",
                js_string(css),
                js_string(text)
            ),
        };
        let value = self.eval(&script).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn evaluate(&mut self, expression: &str) -> DriverResult<Value> {
        self.ensure_open()?;
        self.eval(expression).await
    }

    async fn screenshot(&mut self, full_page: bool) -> DriverResult<Vec<u8>> {
        self.ensure_open()?;
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(full_page)
                    .build(),
            )
            .await
            .map_err(|e| DriverError::Protocol(format!("screenshot failed: {}", e)))
    }

    async fn set_viewport(&mut self, width: u32, height: u32) -> DriverResult<()> {
        self.ensure_open()?;
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(width as i64)
            .height(height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(DriverError::Protocol)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        Ok(())
    }

    async fn allow_downloads(&mut self, dir: &Path) -> DriverResult<()> {
        self.ensure_open()?;
        std::fs::create_dir_all(dir).map_err(|e| DriverError::Protocol(e.to_string()))?;
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.to_string_lossy().to_string())
            .build()
            .map_err(DriverError::Protocol)?;
        self.browser
            .execute(params)
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        Ok(())
    }

    async fn close(&mut self) -> DriverResult<()> {
        self.ensure_open()?;
        self.closed = true;
        info!("Shutting down browser");

        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        let result = self.browser.close().await;
        if let Err(e) = self.browser.wait().await {
            warn!("Browser process did not exit cleanly: {}", e);
        }
        self.handler_task.abort();

        result
            .map(|_| ())
            .map_err(|e| DriverError::Protocol(format!("close failed: {}", e)))
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        if !self.closed {
            // The Browser handle kills its child process when dropped.
            warn!("ChromeDriver dropped without close()");
            for listener in &self.listeners {
                listener.abort();
            }
            self.handler_task.abort();
        }
    }
}

/// Quote a Rust string as a JavaScript string literal
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn console_severity(kind: &ConsoleApiCalledType) -> Severity {
    match kind {
        ConsoleApiCalledType::Warning => Severity::Warning,
        ConsoleApiCalledType::Error | ConsoleApiCalledType::Assert => Severity::Error,
        _ => Severity::Log,
    }
}

/// Render console arguments the way DevTools prints them on one line
fn console_text(args: &[RemoteObject]) -> String {
    args.iter()
        .map(|arg| match &arg.value {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => arg.description.clone().unwrap_or_default(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn exception_text(details: &ExceptionDetails) -> String {
    details
        .exception
        .as_ref()
        .and_then(|e| e.description.clone())
        .unwrap_or_else(|| details.text.clone())
}
