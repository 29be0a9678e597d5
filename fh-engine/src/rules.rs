//! Declarative device-to-workflow bindings.
//!
//! A rule binds a device filter (attribute name to pattern) to an ordered
//! step list. Patterns are case-insensitive and anchored at the start of the
//! attribute value, so `ESP32` matches `ESP32-S2` but not `X-ESP32`. A rule
//! matches only if every filter key is present on the device; a missing
//! attribute is a non-match, not an error.

use std::collections::BTreeMap;
use std::path::Path;

use fh_monitor::DeviceInfo;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::step::{RawStep, TestStep};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read rules file")]
    Io(#[from] std::io::Error),

    #[error("rules document is not valid YAML")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Deserialize)]
struct RawDoc {
    #[serde(default)]
    rules: Vec<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    name: String,
    device_filter: BTreeMap<String, String>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Debug)]
pub struct DeviceRule {
    pub name: String,
    filter: Vec<(String, Regex)>,
    pub steps: Vec<TestStep>,
}

impl DeviceRule {
    /// True iff every filter key exists on the device and its value matches.
    pub fn matches(&self, device: &DeviceInfo) -> bool {
        self.filter.iter().all(|(key, pattern)| {
            device
                .attribute(key)
                .map(|value| pattern.is_match(&value))
                .unwrap_or(false)
        })
    }

    fn from_raw(raw: RawRule) -> Result<Self, regex::Error> {
        let mut filter = Vec::with_capacity(raw.device_filter.len());
        for (key, pattern) in raw.device_filter {
            let compiled = RegexBuilder::new(&format!("^(?:{pattern})"))
                .case_insensitive(true)
                .build()?;
            filter.push((key, compiled));
        }

        let mut steps = Vec::with_capacity(raw.steps.len());
        for step in raw.steps {
            steps.push(step.into_step()?);
        }

        Ok(Self {
            name: raw.name,
            filter,
            steps,
        })
    }
}

/// The configured rule collection, in document order.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<DeviceRule>,
}

impl RuleSet {
    /// Parse a rules document. Malformed rule entries (bad shape, bad
    /// pattern) are logged and skipped; only an unreadable document as a
    /// whole is an error.
    pub fn parse(doc: &str) -> Result<Self, ConfigError> {
        let raw: RawDoc = serde_yaml::from_str(doc)?;
        let mut rules = Vec::new();

        for (index, entry) in raw.rules.into_iter().enumerate() {
            let raw_rule: RawRule = match serde_yaml::from_value(entry) {
                Ok(rule) => rule,
                Err(error) => {
                    warn!(index, %error, "skipping malformed rule entry");
                    continue;
                }
            };
            let name = raw_rule.name.clone();
            match DeviceRule::from_raw(raw_rule) {
                Ok(rule) => {
                    info!(rule = %rule.name, steps = rule.steps.len(), "loaded rule");
                    rules.push(rule);
                }
                Err(error) => {
                    warn!(rule = %name, %error, "skipping rule with invalid pattern");
                }
            }
        }

        Ok(Self { rules })
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let doc = tokio::fs::read_to_string(path).await?;
        Self::parse(&doc)
    }

    /// Every rule whose filter matches `device`, preserving configuration
    /// order. All matches are meant to be executed; there is no first-match
    /// semantics.
    pub fn matching_rules(&self, device: &DeviceInfo) -> Vec<&DeviceRule> {
        self.rules.iter().filter(|r| r.matches(device)).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn device(device_type: &str) -> DeviceInfo {
        DeviceInfo {
            vendor_id: "303a".into(),
            product_id: "1001".into(),
            device_path: "1-1".into(),
            serial_number: None,
            manufacturer: None,
            product: None,
            device_type: device_type.into(),
            port_number: None,
            first_seen: SystemTime::now(),
        }
    }

    #[test]
    fn filter_requires_every_key_present_and_matching() {
        let rules = RuleSet::parse(
            r#"
rules:
  - name: esp32
    device_filter:
      device_type: "^ESP32"
      serial_number: ".*"
    steps: []
"#,
        )
        .unwrap();

        // serial_number is unset on the device: absence is a non-match.
        assert!(rules.matching_rules(&device("ESP32-S2")).is_empty());

        let mut dev = device("ESP32-S2");
        dev.serial_number = Some("X".into());
        assert_eq!(rules.matching_rules(&dev).len(), 1);

        let mut dev = device("STM32");
        dev.serial_number = Some("X".into());
        assert!(rules.matching_rules(&dev).is_empty());
    }

    #[test]
    fn matching_is_case_insensitive_and_start_anchored() {
        let rules = RuleSet::parse(
            r#"
rules:
  - name: esp
    device_filter: {device_type: "esp32"}
"#,
        )
        .unwrap();

        assert_eq!(rules.matching_rules(&device("ESP32-S2")).len(), 1);
        // Anchored at the start of the value.
        assert!(rules.matching_rules(&device("X-ESP32")).is_empty());
    }

    #[test]
    fn literal_filter_round_trip() {
        let rules = RuleSet::parse(
            r#"
rules:
  - name: exact
    device_filter:
      vendor_id: "303a"
      product_id: "1001"
"#,
        )
        .unwrap();
        assert_eq!(rules.matching_rules(&device("whatever")).len(), 1);
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let rules = RuleSet::parse(
            r#"
rules:
  - name: good
    device_filter: {device_type: "ESP32"}
  - device_filter: {device_type: "missing name"}
  - name: bad-pattern
    device_filter: {device_type: "["}
  - name: bad-criteria
    device_filter: {device_type: "ESP32"}
    steps:
      - action: run_test
        success_criteria: "["
  - name: also-good
    device_filter: {device_type: "ESP32"}
"#,
        )
        .unwrap();

        assert_eq!(rules.len(), 2);
        let matched = rules.matching_rules(&device("ESP32-S2"));
        assert_eq!(matched[0].name, "good");
        assert_eq!(matched[1].name, "also-good");
    }

    #[test]
    fn zero_one_or_many_matches_in_document_order() {
        let rules = RuleSet::parse(
            r#"
rules:
  - name: broad
    device_filter: {vendor_id: "303a"}
  - name: narrow
    device_filter: {device_type: "^ESP32-S2$"}
"#,
        )
        .unwrap();

        let matched = rules.matching_rules(&device("ESP32-S2"));
        assert_eq!(
            matched.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            ["broad", "narrow"]
        );
    }

    #[test]
    fn whole_document_garbage_is_an_error() {
        assert!(RuleSet::parse(": not yaml [").is_err());
        assert!(RuleSet::parse("rules: []").unwrap().is_empty());
    }
}
