//! Browser session lifetime.
//!
//! [`with_session`] is the only way the harness acquires a browser: the
//! driver is closed exactly once when the body finishes, whether it returned
//! a value, an error, or panicked.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use crate::console::ConsoleLog;
use crate::driver::{BrowserDriver, WaitUntil};
use crate::harness::types::{HarnessError, HarnessResult};

/// One browser with one page
#[derive(Debug)]
pub struct BrowserSession<D: BrowserDriver> {
    driver: D,
    console: ConsoleLog,
    closed: bool,
}

impl<D: BrowserDriver> BrowserSession<D> {
    pub fn new(driver: D) -> Self {
        let console = driver.console();
        Self {
            driver,
            console,
            closed: false,
        }
    }

    /// Navigate to `url` and wait for the requested load state
    pub async fn open(&mut self, url: &str, wait_until: WaitUntil, timeout: Duration) -> HarnessResult<()> {
        tracing::info!(url, ?wait_until, "opening page");
        let driver = self.driver()?;
        driver
            .navigate(url, wait_until, timeout)
            .await
            .map_err(|e| HarnessError::navigation(url, e))
    }

    /// The underlying driver, unless the session was closed
    pub fn driver(&mut self) -> HarnessResult<&mut D> {
        if self.closed {
            return Err(HarnessError::SessionClosed);
        }
        Ok(&mut self.driver)
    }

    /// Console log captured for this session's page
    pub fn console(&self) -> &ConsoleLog {
        &self.console
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the browser. Later calls are no-ops.
    pub async fn close(&mut self) -> HarnessResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        tracing::debug!(driver = self.driver.name(), "closing browser session");
        self.driver.close().await.map_err(HarnessError::from)
    }
}

/// Run `body` against a fresh session built from `driver`, then close it.
///
/// A panic inside `body` is caught long enough to close the browser and is
/// then resumed. A close failure is reported only if the body succeeded.
pub async fn with_session<D, T, F>(driver: D, body: F) -> HarnessResult<T>
where
    D: BrowserDriver,
    F: AsyncFnOnce(&mut BrowserSession<D>) -> HarnessResult<T>,
{
    let mut session = BrowserSession::new(driver);
    let outcome = AssertUnwindSafe(body(&mut session)).catch_unwind().await;
    let closed = session.close().await;

    match outcome {
        Err(panic) => {
            if let Err(err) = closed {
                tracing::warn!(error = %err, "close failed while unwinding");
            }
            std::panic::resume_unwind(panic)
        }
        Ok(Ok(value)) => closed.map(|()| value),
        Ok(Err(err)) => {
            if let Err(close_err) = closed {
                tracing::warn!(error = %close_err, "close failed after scenario error");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockDriver, MockPage};

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let driver = MockDriver::new(MockPage::new());
        let handle = driver.handle();
        let mut session = BrowserSession::new(driver);

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(session.is_closed());
        assert_eq!(handle.close_calls(), 1);
        assert!(matches!(session.driver(), Err(HarnessError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_open_unreachable_is_navigation_error() {
        let url = "http://localhost:1/app.html";
        let driver = MockDriver::new(MockPage::new().unreachable(url));
        let mut session = BrowserSession::new(driver);

        let err = session
            .open(url, WaitUntil::NetworkIdle, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, HarnessError::Navigation { .. }));
    }

    #[tokio::test]
    async fn test_with_session_closes_after_body_closed_it() {
        let driver = MockDriver::new(MockPage::new());
        let handle = driver.handle();

        let result = with_session(driver, async |session| {
            session.close().await?;
            Ok(7)
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(handle.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_close_failure_surfaces_when_body_succeeded() {
        let driver = MockDriver::new(MockPage::new().fail_close());
        let handle = driver.handle();

        let result = with_session(driver, async |_session| Ok(())).await;

        assert!(matches!(result, Err(HarnessError::Driver(_))));
        assert_eq!(handle.close_calls(), 1);
    }
}
