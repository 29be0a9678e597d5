//! Orchestration engine for the FlashHub testbench.
//!
//! Ties the pieces together: declarative rules select workflows for detected
//! devices, the executor runs workflow steps against the hub command channel
//! and external flashing/test tools, and every outcome lands in the result
//! store. See the `fh-link` and `fh-monitor` crates for the hub protocol and
//! device detection halves.

mod executor;
mod orchestrator;
mod report;
mod rules;
mod step;

pub use executor::{StepRunner, ToolConfig};
pub use orchestrator::Orchestrator;
pub use report::{ResultStore, TestResult};
pub use rules::{ConfigError, DeviceRule, RuleSet};
pub use step::{StepAction, TestStep};
