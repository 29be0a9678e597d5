//! The device-driven orchestration loop.
//!
//! Consumes the monitor's event stream: every added device is matched against
//! the rule set and the matching workflows run inline, one after another. A
//! slow workflow therefore delays later hotplug events; the event channel
//! buffers them in the meantime. Workflow failures are recorded, never
//! propagated.

use fh_monitor::{DeviceEvent, DeviceInfo};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::executor::StepRunner;
use crate::report::ResultStore;
use crate::rules::RuleSet;

pub struct Orchestrator {
    rules: RuleSet,
    runner: StepRunner,
    results: ResultStore,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        rules: RuleSet,
        runner: StepRunner,
        results: ResultStore,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            rules,
            runner,
            results,
            cancel: parent.child_token(),
        }
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    /// Run until the event stream ends or the token is cancelled.
    pub async fn run(&self, mut events: mpsc::Receiver<DeviceEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                DeviceEvent::Added(device) => self.process_device(&device).await,
                DeviceEvent::Removed(device) => {
                    debug!(device_path = %device.device_path, "device removed");
                }
            }
        }
        debug!("orchestrator stopped");
    }

    async fn process_device(&self, device: &DeviceInfo) {
        // Pick up any correlation applied since the event was queued.
        let device = self
            .runner
            .registry()
            .get(&device.device_path)
            .await
            .unwrap_or_else(|| device.clone());

        let matched = self.rules.matching_rules(&device);
        if matched.is_empty() {
            info!(device_type = %device.device_type, "no rules match device");
            return;
        }

        for rule in matched {
            if self.cancel.is_cancelled() {
                break;
            }
            let result = self.runner.run_rule(rule, &device).await;
            self.results.record(result);
        }
    }
}
