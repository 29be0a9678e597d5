//! Step execution against the hub and external tools.
//!
//! `StepRunner::run_rule` walks a rule's steps in declared order and stops at
//! the first failure. Every failure mode, including transport errors, missing
//! files and subprocess timeouts, is caught at the step boundary and turned
//! into a failed step; nothing here can take down the orchestration loop.
//! Already-executed steps are never rolled back.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use fh_link::{HubLink, PowerLevel};
use fh_monitor::{DeviceInfo, DeviceRegistry};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::report::TestResult;
use crate::rules::DeviceRule;
use crate::step::{StepAction, TestStep};

/// Port used when a power step names no port and the device was never
/// correlated. An explicit fallback, not a silent failure: it is logged on
/// every use.
const FALLBACK_PORT: u8 = 1;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const RESET_PULSE_MS: u64 = 100;

/// External tool invocation settings, injected instead of hard-coded paths.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub esptool: PathBuf,
    pub dfu_util: PathBuf,
    /// Serial port handed to esptool.
    pub serial_port: PathBuf,
    pub baud: u32,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            esptool: PathBuf::from("esptool.py"),
            dfu_util: PathBuf::from("dfu-util"),
            serial_port: PathBuf::from("/dev/ttyUSB0"),
            baud: 921_600,
        }
    }
}

pub struct StepRunner {
    hub: HubLink,
    registry: DeviceRegistry,
    tools: ToolConfig,
    cancel: CancellationToken,
}

impl StepRunner {
    pub fn new(
        hub: HubLink,
        registry: DeviceRegistry,
        tools: ToolConfig,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            hub,
            registry,
            tools,
            cancel: parent.child_token(),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Execute one rule against one device, producing a complete result.
    pub async fn run_rule(&self, rule: &DeviceRule, device: &DeviceInfo) -> TestResult {
        let start_time = SystemTime::now();
        let mut steps_executed = Vec::new();
        let mut logs = Vec::new();
        let mut success = true;
        let mut error_message = None;

        for step in &rule.steps {
            let name = step.name().to_owned();
            info!(rule = %rule.name, step = %name, "executing step");
            logs.push(format!("Executing step: {name}"));
            steps_executed.push(name.clone());

            if let Err(reason) = self.run_step_with_retry(step, device, &mut logs).await {
                success = false;
                let message = format!("Step {name} failed: {reason}");
                warn!(rule = %rule.name, step = %name, %reason, "step failed");
                logs.push(message.clone());
                error_message = Some(message);
                break;
            }
        }

        let status = if success { "PASSED" } else { "FAILED" };
        info!(rule = %rule.name, device_type = %device.device_type, status, "rule finished");

        TestResult {
            device: device.clone(),
            rule_name: rule.name.clone(),
            steps_executed,
            success,
            start_time,
            end_time: SystemTime::now(),
            error_message,
            logs,
        }
    }

    async fn run_step_with_retry(
        &self,
        step: &TestStep,
        device: &DeviceInfo,
        logs: &mut Vec<String>,
    ) -> Result<(), String> {
        let attempts = step.retry_count + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                logs.push(format!(
                    "Retrying step {} (attempt {attempt}/{attempts})",
                    step.name()
                ));
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err("cancelled".to_owned()),
                    _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                }
            }

            match self.run_step(step, device, logs).await {
                Ok(()) => return Ok(()),
                Err(reason) => last_error = reason,
            }

            if self.cancel.is_cancelled() {
                break;
            }
        }

        Err(last_error)
    }

    async fn run_step(
        &self,
        step: &TestStep,
        device: &DeviceInfo,
        logs: &mut Vec<String>,
    ) -> Result<(), String> {
        match &step.action {
            StepAction::PowerOn { port, power_level } => {
                let power = match power_level.as_deref() {
                    None => PowerLevel::High,
                    Some(level) => level.parse()?,
                };
                let port = self.resolve_port(*port, device, logs);
                self.hub
                    .power_port(port, power)
                    .await
                    .map_err(|e| e.to_string())
            }
            StepAction::PowerOff { port } => {
                let port = self.resolve_port(*port, device, logs);
                self.hub
                    .power_port(port, PowerLevel::Off)
                    .await
                    .map_err(|e| e.to_string())
            }
            StepAction::WaitForDevice { timeout } => {
                self.wait_for_device(device, *timeout, logs).await
            }
            StepAction::EnterBootloader { method } => {
                self.enter_bootloader(method, logs).await
            }
            StepAction::FlashFirmware { file, tool } => {
                self.flash_firmware(step, device, file.as_deref(), tool.as_deref(), logs)
                    .await
            }
            StepAction::ResetDevice => {
                logs.push("Pulsing reset line".to_owned());
                self.hub
                    .pulse_reset(RESET_PULSE_MS)
                    .await
                    .map_err(|e| e.to_string())
            }
            StepAction::RunTest { script } => {
                let script = script.as_deref().ok_or("no test script specified")?;
                if !script.exists() {
                    return Err(format!("test script not found: {}", script.display()));
                }
                self.run_subprocess(step, script, &[], logs).await
            }
            StepAction::Unknown(action) => Err(format!("unknown action: {action}")),
        }
    }

    fn resolve_port(&self, step_port: Option<u8>, device: &DeviceInfo, logs: &mut Vec<String>) -> u8 {
        match step_port.or(device.port_number) {
            Some(port) => port,
            None => {
                logs.push(format!(
                    "No port correlation for {}, using fallback port {FALLBACK_PORT}",
                    device.device_path
                ));
                FALLBACK_PORT
            }
        }
    }

    async fn wait_for_device(
        &self,
        device: &DeviceInfo,
        timeout: Duration,
        logs: &mut Vec<String>,
    ) -> Result<(), String> {
        logs.push(format!(
            "Waiting for device {} (timeout: {:.1}s)",
            device.device_type,
            timeout.as_secs_f64()
        ));

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.registry.contains(&device.device_path).await {
                logs.push("Device present".to_owned());
                return Ok(());
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err("timeout waiting for device".to_owned());
            }

            let nap = WAIT_POLL_INTERVAL.min(deadline - now);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err("cancelled".to_owned()),
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    async fn enter_bootloader(&self, method: &str, logs: &mut Vec<String>) -> Result<(), String> {
        logs.push(format!("Entering bootloader via {method}"));
        let hub = &self.hub;

        match method {
            // Standard two-phase strapping: boot-select asserted across a
            // reset pulse, then released after the part has sampled it.
            "boot_reset" => {
                hub.set_boot(true).await.map_err(|e| e.to_string())?;
                tokio::time::sleep(Duration::from_millis(100)).await;
                hub.pulse_reset(RESET_PULSE_MS)
                    .await
                    .map_err(|e| e.to_string())?;
                tokio::time::sleep(Duration::from_millis(500)).await;
                hub.set_boot(false).await.map_err(|e| e.to_string())?;
                logs.push("Boot/reset sequence completed".to_owned());
                Ok(())
            }
            // DFU re-enumerates during reset; the strap stays asserted.
            "dfu" => {
                hub.set_boot(true).await.map_err(|e| e.to_string())?;
                hub.pulse_reset(RESET_PULSE_MS)
                    .await
                    .map_err(|e| e.to_string())?;
                logs.push("DFU entry sequence completed".to_owned());
                Ok(())
            }
            other => Err(format!("unknown bootloader method: {other}")),
        }
    }

    async fn flash_firmware(
        &self,
        step: &TestStep,
        device: &DeviceInfo,
        file: Option<&Path>,
        tool: Option<&str>,
        logs: &mut Vec<String>,
    ) -> Result<(), String> {
        let file = file.ok_or("no firmware file specified")?;
        if !file.exists() {
            return Err(format!("firmware file not found: {}", file.display()));
        }

        let tool = match tool {
            Some(tool) => tool.to_owned(),
            None if device.device_type.contains("ESP32") => "esptool".to_owned(),
            None if device.device_type.contains("STM32") => "dfu-util".to_owned(),
            None => {
                return Err(format!(
                    "cannot auto-select flashing tool for device type {}",
                    device.device_type
                ))
            }
        };

        logs.push(format!("Flashing {} using {tool}", file.display()));
        match tool.as_str() {
            "esptool" => {
                let args: Vec<OsString> = vec![
                    "--port".into(),
                    self.tools.serial_port.clone().into(),
                    "--baud".into(),
                    self.tools.baud.to_string().into(),
                    "write_flash".into(),
                    "0x1000".into(),
                    file.into(),
                ];
                self.run_subprocess(step, &self.tools.esptool, &args, logs)
                    .await
            }
            "dfu-util" => {
                let args: Vec<OsString> = vec!["-a".into(), "0".into(), "-D".into(), file.into()];
                self.run_subprocess(step, &self.tools.dfu_util, &args, logs)
                    .await
            }
            other => Err(format!("unsupported flashing tool: {other}")),
        }
    }

    /// Run an external tool with captured output, bounded by the step
    /// timeout. Success is a zero exit status plus, when configured, a
    /// success-criteria match against the captured output.
    async fn run_subprocess(
        &self,
        step: &TestStep,
        program: &Path,
        args: &[OsString],
        logs: &mut Vec<String>,
    ) -> Result<(), String> {
        let display = std::iter::once(program.as_os_str().to_string_lossy())
            .chain(args.iter().map(|a| a.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ");
        logs.push(format!("Running: {display}"));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start {}: {e}", program.display()))?;

        let output = tokio::select! {
            _ = self.cancel.cancelled() => return Err("cancelled".to_owned()),
            result = tokio::time::timeout(step.timeout, child.wait_with_output()) => match result {
                Err(_) => {
                    return Err(format!(
                        "timed out after {:.1}s",
                        step.timeout.as_secs_f64()
                    ))
                }
                Ok(Err(error)) => return Err(format!("failed to run {}: {error}", program.display())),
                Ok(Ok(output)) => output,
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !stdout.trim().is_empty() {
            logs.push(format!("stdout: {}", stdout.trim()));
        }
        if !stderr.trim().is_empty() {
            logs.push(format!("stderr: {}", stderr.trim()));
        }

        if !output.status.success() {
            return Err(format!("exited with {}", output.status));
        }

        if let Some(criteria) = &step.success_criteria {
            let combined = format!("{stdout}\n{stderr}");
            if !criteria.is_match(&combined) {
                return Err("success criteria not met".to_owned());
            }
        }

        Ok(())
    }
}
