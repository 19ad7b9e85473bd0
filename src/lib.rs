//! Study Acceptance - browser-driven acceptance tests for the clinical study
//! extraction app.
//!
//! This crate provides:
//! - A [`BrowserDriver`] seam with a Chrome (DevTools protocol) driver and a scripted mock
//! - Ordered capture of console output and uncaught page errors
//! - Scripted scenarios with condition waits, named probes and checkpoint screenshots
//! - A verdict engine preferring the app's structured result over console markers
//! - Run directories with JSON summaries
//!
//! # Example
//!
//! ```rust,no_run
//! use study_acceptance::{ChromeDriver, ChromeDriverConfig, RunDir, catalog, config};
//! use study_acceptance::harness::{run_scenario, with_session};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let scenario = catalog::find("citation-search", config::get()).ok_or("unknown scenario")?;
//! let driver = ChromeDriver::launch(ChromeDriverConfig::default()).await?;
//! let run = RunDir::with_name(&scenario.name);
//! let report = with_session(driver, async |session| run_scenario(session, &scenario, &run).await).await?;
//! println!("{}", report.headline());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod console;
pub mod driver;
pub mod harness;
pub mod probe;
pub mod report;
pub mod run_dir;
pub mod verdict;

pub use checkpoint::Checkpoint;
pub use console::{ConsoleLog, ConsoleLogEntry, Severity};
pub use driver::{
    BrowserDriver, ChromeDriver, ChromeDriverConfig, DriverError, MockDriver, MockPage, Selector,
    WaitUntil,
};
pub use harness::{
    BrowserSession, Condition, HarnessError, HarnessResult, RunState, Scenario, Step,
    run_scenario, with_session,
};
pub use probe::{ContractResult, Probe, ProbeResults};
pub use report::{RunReport, StepWarning};
pub use run_dir::{RunDir, cleanup_old_runs, list_runs};
pub use verdict::{Markers, Verdict, VerdictBasis, compute_verdict};
