use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use fh_link::PowerLevel;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Opt {
    #[command(subcommand)]
    pub command: Commands,

    /// Hub controller hostname or IP.
    #[arg(long, global = true, default_value = "usbhub.local")]
    pub host: String,

    /// Hub controller TCP port.
    #[arg(long, global = true, default_value_t = 81)]
    pub port: u16,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch for devices and run matching test workflows until Ctrl-C.
    Run(RunArgs),

    /// Set the power level of one hub port.
    Power {
        /// Hub port number.
        port: u8,
        level: PowerArg,
    },

    /// Pulse the shared reset line, or hold/release it.
    Reset {
        /// Pulse width in milliseconds.
        #[arg(long, default_value_t = 100, conflicts_with = "hold")]
        pulse: u64,

        /// Assert the reset line and leave it asserted.
        #[arg(long, conflicts_with = "release")]
        hold: bool,

        /// Release a held reset line.
        #[arg(long)]
        release: bool,
    },

    /// Drive the shared boot-select line.
    Boot { state: SwitchState },

    /// Power off every port and release the control lines.
    AllOff,

    /// Query the hub and print the reported port states.
    Status,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Workflow rules document.
    #[arg(long, default_value = "rules.yaml")]
    pub config: PathBuf,

    /// USB bus tree to enumerate.
    #[arg(long, default_value = "/sys/bus/usb/devices")]
    pub sysfs_root: PathBuf,

    /// Device-to-port correlation entry, `<serial-or-bus-path>=<port>`.
    /// Repeatable.
    #[arg(long = "map", value_name = "KEY=PORT")]
    pub port_map: Vec<String>,

    /// esptool executable.
    #[arg(long, default_value = "esptool.py")]
    pub esptool: PathBuf,

    /// dfu-util executable.
    #[arg(long, default_value = "dfu-util")]
    pub dfu_util: PathBuf,

    /// Serial port handed to esptool.
    #[arg(long, default_value = "/dev/ttyUSB0")]
    pub serial_port: PathBuf,

    /// Baud rate handed to esptool.
    #[arg(long, default_value_t = 921_600)]
    pub baud: u32,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum PowerArg {
    Off,
    Low,
    High,
}

impl From<PowerArg> for PowerLevel {
    fn from(value: PowerArg) -> Self {
        match value {
            PowerArg::Off => Self::Off,
            PowerArg::Low => Self::Low,
            PowerArg::High => Self::High,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    pub fn as_bool(self) -> bool {
        matches!(self, Self::On)
    }
}
