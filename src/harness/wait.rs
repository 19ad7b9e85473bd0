//! Fixed delays and condition polling.

use std::time::Duration;
use tokio::time::Instant;

use crate::driver::{BrowserDriver, DriverError};
use crate::harness::session::BrowserSession;
use crate::harness::types::{Condition, HarnessError, HarnessResult};
use crate::probe::is_truthy;

/// How a condition wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    /// The condition held before the timeout
    pub satisfied: bool,
    pub elapsed: Duration,
}

pub async fn wait_fixed(duration: Duration) {
    tracing::debug!(?duration, "waiting");
    tokio::time::sleep(duration).await;
}

/// Poll `condition` every `poll` until it holds or `timeout` elapses.
///
/// The condition is checked immediately, so a wait on something already true
/// returns at once. Errors while evaluating count as "not yet", except a
/// closed session which ends the wait with an error.
pub async fn wait_for_condition<D: BrowserDriver>(
    session: &mut BrowserSession<D>,
    condition: &Condition,
    timeout: Duration,
    poll: Duration,
) -> HarnessResult<WaitOutcome> {
    let start = Instant::now();
    let poll = poll.max(Duration::from_millis(10));

    loop {
        if check(session, condition).await? {
            let elapsed = start.elapsed();
            tracing::debug!(condition = %condition.describe(), ?elapsed, "condition met");
            return Ok(WaitOutcome {
                satisfied: true,
                elapsed,
            });
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            tracing::warn!(condition = %condition.describe(), ?timeout, "condition not met in time");
            return Ok(WaitOutcome {
                satisfied: false,
                elapsed,
            });
        }
        tokio::time::sleep(poll.min(timeout - elapsed)).await;
    }
}

/// Evaluate a condition once
pub async fn check<D: BrowserDriver>(session: &mut BrowserSession<D>, condition: &Condition) -> HarnessResult<bool> {
    let mut leaves = Vec::new();
    flatten(condition, &mut leaves);

    for leaf in leaves {
        let holds = match leaf {
            Condition::LogContains(needles) => session.console().contains_any(needles.as_slice()),
            Condition::Probe(probe) => evaluate_truthy(session, probe.expression()).await?,
            Condition::Script(expression) => evaluate_truthy(session, expression).await?,
            Condition::ElementPresent(target) => match session.driver()?.count(target).await {
                Ok(n) => n > 0,
                Err(DriverError::Closed) => return Err(HarnessError::SessionClosed),
                Err(_) => false,
            },
            Condition::Any(_) => false,
        };
        if holds {
            return Ok(true);
        }
    }
    Ok(false)
}

fn flatten<'a>(condition: &'a Condition, out: &mut Vec<&'a Condition>) {
    match condition {
        Condition::Any(nested) => nested.iter().for_each(|c| flatten(c, out)),
        leaf => out.push(leaf),
    }
}

async fn evaluate_truthy<D: BrowserDriver>(session: &mut BrowserSession<D>, expression: &str) -> HarnessResult<bool> {
    match session.driver()?.evaluate(expression).await {
        Ok(value) => Ok(is_truthy(&value)),
        Err(DriverError::Closed) => Err(HarnessError::SessionClosed),
        Err(err) => {
            tracing::trace!(error = %err, "condition evaluation failed");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::Severity;
    use crate::driver::{MockDriver, MockPage, Selector, WaitUntil};
    use crate::probe::Probe;
    use serde_json::json;

    async fn opened(page: MockPage) -> BrowserSession<MockDriver> {
        let mut session = BrowserSession::new(MockDriver::new(page));
        session
            .open("http://app/", WaitUntil::Load, Duration::from_secs(1))
            .await
            .unwrap();
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_within_one_poll_of_condition_turning_true() {
        let page = MockPage::new().evaluation_after(
            Probe::DocumentLoaded.expression(),
            Duration::from_secs(3),
            json!(false),
            json!(true),
        );
        let mut session = opened(page).await;

        let outcome = wait_for_condition(
            &mut session,
            &Condition::Probe(Probe::DocumentLoaded),
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert!(outcome.satisfied);
        assert!(outcome.elapsed >= Duration::from_secs(3));
        assert!(outcome.elapsed <= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_condition_never_holds() {
        let mut session = opened(MockPage::new()).await;
        let outcome = wait_for_condition(
            &mut session,
            &Condition::log_contains(["Preprocessing complete"]),
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert!(!outcome.satisfied);
        assert_eq!(outcome.elapsed, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_condition_sees_late_console_output() {
        let page = MockPage::new().log_after_navigate(
            Duration::from_secs(2),
            Severity::Log,
            "✅ Preprocessing complete: 12 sections",
        );
        let mut session = opened(page).await;

        let outcome = wait_for_condition(
            &mut session,
            &Condition::log_contains(["Preprocessing complete"]),
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert!(outcome.satisfied);
        assert!(outcome.elapsed <= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_any_and_evaluation_errors() {
        let page = MockPage::new()
            .evaluation_error("broken()", "ReferenceError")
            .element(Selector::css("#sections-list li"));
        let mut session = opened(page).await;

        assert!(!check(&mut session, &Condition::Script("broken()".into())).await.unwrap());
        let any = Condition::Any(vec![
            Condition::Script("broken()".into()),
            Condition::ElementPresent(Selector::css("#sections-list li")),
        ]);
        assert!(check(&mut session, &any).await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_session_ends_wait() {
        let mut session = opened(MockPage::new()).await;
        session.close().await.unwrap();
        let err = check(&mut session, &Condition::Script("1".into())).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
