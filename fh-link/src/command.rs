//! The fixed command vocabulary understood by the hub controller.
//!
//! Every command serializes to a single JSON object with a `cmd` tag, sent as
//! one newline-terminated line. The hub's own responses are free-form JSON and
//! are not modelled here.

use serde::{Deserialize, Serialize};

/// Power level for a hub port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerLevel {
    Off,
    Low,
    High,
}

impl std::fmt::Display for PowerLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerLevel::Off => f.write_str("off"),
            PowerLevel::Low => f.write_str("low"),
            PowerLevel::High => f.write_str("high"),
        }
    }
}

impl std::str::FromStr for PowerLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(PowerLevel::Off),
            "low" => Ok(PowerLevel::Low),
            "high" => Ok(PowerLevel::High),
            other => Err(format!("unknown power level: {other}")),
        }
    }
}

/// Outbound hub command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum HubCommand {
    /// Set the power level of a single port.
    Port { port: u8, power: PowerLevel },
    /// Drive the boot-select strap line.
    Boot { state: bool },
    /// Drive or pulse the reset line. Exactly one of `state`/`pulse` is set.
    Reset {
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pulse: Option<u64>,
    },
    /// Cut power to every port.
    Alloff,
    /// Request a status report.
    Status,
}

impl HubCommand {
    pub const fn reset_state(state: bool) -> Self {
        Self::Reset {
            state: Some(state),
            pulse: None,
        }
    }

    pub const fn reset_pulse(duration_ms: u64) -> Self {
        Self::Reset {
            state: None,
            pulse: Some(duration_ms),
        }
    }
}
