//! Execution outcomes and their aggregate report.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use fh_monitor::DeviceInfo;

/// Outcome of running one rule against one device. Immutable once recorded.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub device: DeviceInfo,
    pub rule_name: String,
    /// Step names in the order attempted; a failing step is the last entry.
    pub steps_executed: Vec<String>,
    pub success: bool,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub error_message: Option<String>,
    pub logs: Vec<String>,
}

impl TestResult {
    pub fn duration(&self) -> Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or_default()
    }
}

/// Append-only result accumulator; insertion order is execution order.
/// Reads take a copy, so appends never block a reader for long.
#[derive(Clone, Default)]
pub struct ResultStore {
    inner: Arc<Mutex<Vec<TestResult>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, result: TestResult) {
        self.inner.lock().expect("result store poisoned").push(result);
    }

    pub fn all(&self) -> Vec<TestResult> {
        self.inner.lock().expect("result store poisoned").clone()
    }

    /// Human-readable summary of everything recorded so far.
    pub fn report(&self) -> String {
        let results = self.all();
        if results.is_empty() {
            return "No test results available".to_owned();
        }

        let total = results.len();
        let passed = results.iter().filter(|r| r.success).count();
        let failed = total - passed;
        let rate = (passed as f64 / total as f64) * 100.0;

        let mut out = Vec::new();
        out.push("=".repeat(60));
        out.push("FlashHub Testing Report".to_owned());
        out.push("=".repeat(60));
        out.push(format!("Total Tests: {total}"));
        out.push(format!("Passed: {passed}"));
        out.push(format!("Failed: {failed}"));
        out.push(format!("Success Rate: {rate:.1}%"));
        out.push(String::new());

        for result in &results {
            let status = if result.success { "PASSED" } else { "FAILED" };
            out.push(format!(
                "[{status}] {} - {}",
                result.rule_name, result.device.device_type
            ));
            out.push(format!(
                "  Duration: {:.2}s",
                result.duration().as_secs_f64()
            ));
            out.push(format!("  Steps: {}", result.steps_executed.join(", ")));
            if let Some(error) = &result.error_message {
                out.push(format!("  Error: {error}"));
            }
            out.push(String::new());
        }

        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceInfo {
        DeviceInfo {
            vendor_id: "303a".into(),
            product_id: "1001".into(),
            device_path: "1-1".into(),
            serial_number: None,
            manufacturer: None,
            product: None,
            device_type: "ESP32-S2".into(),
            port_number: Some(1),
            first_seen: SystemTime::now(),
        }
    }

    fn result(rule: &str, success: bool) -> TestResult {
        let now = SystemTime::now();
        TestResult {
            device: device(),
            rule_name: rule.into(),
            steps_executed: vec!["power_on".into(), "run_test".into()],
            success,
            start_time: now,
            end_time: now + Duration::from_millis(1500),
            error_message: (!success).then(|| "Step run_test failed: exited with 1".into()),
            logs: Vec::new(),
        }
    }

    #[test]
    fn empty_store_reports_no_results() {
        let store = ResultStore::new();
        assert_eq!(store.report(), "No test results available");
    }

    #[test]
    fn report_counts_and_lists_results() {
        let store = ResultStore::new();
        store.record(result("smoke", true));
        store.record(result("flash", false));
        store.record(result("smoke", true));

        let report = store.report();
        assert!(report.contains("Total Tests: 3"));
        assert!(report.contains("Passed: 2"));
        assert!(report.contains("Failed: 1"));
        assert!(report.contains("Success Rate: 66.7%"));
        assert!(report.contains("[PASSED] smoke - ESP32-S2"));
        assert!(report.contains("[FAILED] flash - ESP32-S2"));
        assert!(report.contains("Error: Step run_test failed"));

        // Insertion order is preserved in the snapshot.
        let all = store.all();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].rule_name, "flash");
    }
}
