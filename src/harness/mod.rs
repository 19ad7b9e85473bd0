pub mod runner;
pub mod session;
pub mod types;
pub mod wait;

pub use runner::{RunState, run_scenario};
pub use session::{BrowserSession, with_session};
pub use types::{Condition, HarnessError, HarnessResult, Scenario, Step};
pub use wait::{WaitOutcome, wait_fixed, wait_for_condition};
