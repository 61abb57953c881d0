//! Output records for scan results and topology changes

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::DeploymentMode;
use crate::scanner::{DbScanResult, KeyInfo};
use crate::topology::{ChangeEvent, Role};

pub const MEASUREMENT_HOT_KEY: &str = "redis_hotkey";
pub const MEASUREMENT_BIG_KEY: &str = "redis_bigkey";
pub const MEASUREMENT_TOPOLOGY: &str = "redis_topology";

/// One measurement point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub measurement: &'static str,
    pub tags: BTreeMap<String, String>,
    pub fields: Map<String, Value>,
    /// Unix time in milliseconds
    pub time: u64,
}

impl Record {
    pub fn new(measurement: &'static str, tags: BTreeMap<String, String>) -> Self {
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            measurement,
            tags,
            fields: Map::new(),
            time,
        }
    }

    pub fn tag(mut self, name: &str, value: impl Into<String>) -> Self {
        self.tags.insert(name.to_string(), value.into());
        self
    }

    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }
}

/// Tags and thresholds shared by every record of one deployment
#[derive(Debug, Clone)]
pub struct RecordContext {
    pub deployment: String,
    pub mode: DeploymentMode,
    /// Global tags merged with the deployment's own
    pub tags: BTreeMap<String, String>,
    pub bigkey_threshold_len: i64,
    pub bigkey_threshold_bytes: i64,
}

impl RecordContext {
    fn base_tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.tags.clone();
        tags.insert("deployment".to_string(), self.deployment.clone());
        tags.insert("mode".to_string(), self.mode.as_tag().to_string());
        tags
    }

    fn key_record(
        &self,
        measurement: &'static str,
        result: &DbScanResult,
        role: Role,
        key: &KeyInfo,
    ) -> Record {
        Record::new(measurement, self.base_tags())
            .tag("server", result.server.as_str())
            .tag("db_name", format!("db{}", result.db))
            .tag("key", key.key.as_str())
            .tag("key_type", key.key_type.as_str())
            .tag("role", role.as_str())
            .field("keys_sampled", result.sampled)
    }

    fn status(threshold: i64) -> &'static str {
        if threshold > 0 {
            "warn"
        } else {
            "info"
        }
    }

    /// Hot and big key records for one finished database
    pub fn scan_records(&self, result: &DbScanResult, role: Role) -> Vec<Record> {
        let mut records = Vec::with_capacity(
            result.hot.len() + result.big_by_length.len() + result.big_by_memory.len(),
        );

        for key in &result.hot {
            records.push(
                self.key_record(MEASUREMENT_HOT_KEY, result, role, key)
                    .field("key_count", key.frequency)
                    .field("status", "info"),
            );
        }

        for key in &result.big_by_memory {
            let mut message = format!("memory larger than {} bytes", self.bigkey_threshold_bytes);
            if key.collisions > 0 {
                message.push_str(&format!(
                    ", and there are {} same-size keys not collected",
                    key.collisions
                ));
            }
            records.push(
                self.key_record(MEASUREMENT_BIG_KEY, result, role, key)
                    .field("value_mem", key.memory)
                    .field("value_length", key.length)
                    .field("message", message)
                    .field("status", Self::status(self.bigkey_threshold_bytes)),
            );
        }

        for key in &result.big_by_length {
            let mut message = format!("elements larger than {}", self.bigkey_threshold_len);
            if key.collisions > 0 {
                message.push_str(&format!(
                    ", and there are {} same-len keys not collected",
                    key.collisions
                ));
            }
            records.push(
                self.key_record(MEASUREMENT_BIG_KEY, result, role, key)
                    .field("value_mem", key.memory)
                    .field("value_length", key.length)
                    .field("message", message)
                    .field("status", Self::status(self.bigkey_threshold_len)),
            );
        }

        records
    }

    /// Topology change record
    pub fn change_record(&self, event: &ChangeEvent) -> Record {
        let mut tags = self.base_tags();
        tags.insert("mode".to_string(), event.mode.as_tag().to_string());
        Record::new(MEASUREMENT_TOPOLOGY, tags)
            .tag("change_type", event.change_type.as_str())
            .field("message", event.message.as_str())
            .field("added", event.added.join(","))
            .field("removed", event.removed.join(","))
            .field("status", "warn")
    }
}

/// Record as a JSON object, tagged with its source
/// `cost_ms` is the collection cost of the batch the record came from
pub fn to_json_line(source: &str, record: &Record, cost: Duration) -> Value {
    json!({
        "source": source,
        "cost_ms": cost.as_micros() as f64 / 1000.0,
        "measurement": record.measurement,
        "time": record.time,
        "tags": record.tags,
        "fields": record.fields,
    })
}
