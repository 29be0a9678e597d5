//! Workflow steps: the closed action vocabulary and its configuration form.
//!
//! Actions are parsed into a tagged enum up front so dispatch in the executor
//! is exhaustive; an action name outside the vocabulary becomes
//! [`StepAction::Unknown`] and fails at execution time rather than aborting
//! the configuration load.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw step entry as it appears in the rules document.
#[derive(Debug, Deserialize)]
pub(crate) struct RawStep {
    pub action: String,
    #[serde(default)]
    pub params: BTreeMap<String, serde_yaml::Value>,
    /// Seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub success_criteria: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StepAction {
    PowerOn {
        port: Option<u8>,
        /// Raw `power_level` param, parsed at execution so a typo fails the
        /// step instead of silently powering at some other level.
        power_level: Option<String>,
    },
    PowerOff {
        port: Option<u8>,
    },
    WaitForDevice {
        timeout: Duration,
    },
    EnterBootloader {
        method: String,
    },
    FlashFirmware {
        file: Option<PathBuf>,
        tool: Option<String>,
    },
    ResetDevice,
    RunTest {
        script: Option<PathBuf>,
    },
    Unknown(String),
}

/// One workflow action with its execution policy.
#[derive(Debug, Clone)]
pub struct TestStep {
    pub action: StepAction,
    pub timeout: Duration,
    /// Additional attempts after a failed one.
    pub retry_count: u32,
    /// Matched against captured subprocess output; steps that produce no
    /// output ignore it.
    pub success_criteria: Option<Regex>,
    name: String,
}

impl TestStep {
    /// The configured action name, as recorded in `steps_executed`.
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn param_str(params: &BTreeMap<String, serde_yaml::Value>, key: &str) -> Option<String> {
    params.get(key)?.as_str().map(str::to_owned)
}

fn param_u8(params: &BTreeMap<String, serde_yaml::Value>, key: &str) -> Option<u8> {
    params.get(key)?.as_u64().and_then(|v| u8::try_from(v).ok())
}

fn param_secs(params: &BTreeMap<String, serde_yaml::Value>, key: &str) -> Option<Duration> {
    params.get(key)?.as_f64().map(Duration::from_secs_f64)
}

impl RawStep {
    /// Interpret the raw entry. Malformed or missing parameters become `None`
    /// fields that fail with a message at execution, keeping the load
    /// lenient. A bad `success_criteria` pattern is a real configuration
    /// error and is reported to the caller.
    pub(crate) fn into_step(self) -> Result<TestStep, regex::Error> {
        let params = &self.params;
        let action = match self.action.as_str() {
            "power_on" => StepAction::PowerOn {
                // `port: auto` and no port at all both defer to correlation.
                port: param_u8(params, "port"),
                power_level: param_str(params, "power_level"),
            },
            "power_off" => StepAction::PowerOff {
                port: param_u8(params, "port"),
            },
            "wait_for_device" => StepAction::WaitForDevice {
                timeout: param_secs(params, "timeout").unwrap_or(DEFAULT_WAIT_TIMEOUT),
            },
            "enter_bootloader" => StepAction::EnterBootloader {
                method: param_str(params, "method").unwrap_or_else(|| "boot_reset".to_owned()),
            },
            "flash_firmware" => StepAction::FlashFirmware {
                file: param_str(params, "file").map(PathBuf::from),
                tool: param_str(params, "tool").filter(|t| t != "auto"),
            },
            "reset_device" => StepAction::ResetDevice,
            "run_test" => StepAction::RunTest {
                script: param_str(params, "script").map(PathBuf::from),
            },
            other => StepAction::Unknown(other.to_owned()),
        };

        let success_criteria = self
            .success_criteria
            .as_deref()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
            })
            .transpose()?;

        Ok(TestStep {
            action,
            timeout: self
                .timeout
                .map(Duration::from_secs_f64)
                .unwrap_or(DEFAULT_STEP_TIMEOUT),
            retry_count: self.retry_count,
            success_criteria,
            name: self.action,
        })
    }
}
