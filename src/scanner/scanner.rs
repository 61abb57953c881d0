//! Hot/big key scanner
//!
//! Walks one database with SCAN and probes each batch in two pipelined round
//! trips: TYPE for every key, then OBJECT FREQ / MEMORY USAGE / the length
//! probe for the keys that still exist. Results accumulate in bounded top-N
//! sets that are handed out when the cursor returns to zero.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::key_info::{KeyInfo, KeyType};
use super::top_n::{Metric, TopN};
use crate::client::{ControlPlane, ControlPlaneExt};
use crate::config::{DeploymentMode, HotBigKeyConfig};
use crate::metrics::{job_label, ScanStats};
use crate::utils::{CancelToken, RespValue, Result};

/// Batches between throttling sleeps
const BATCHES_PER_SLEEP: u64 = 100;

const LFU_POLICIES: [&str; 2] = ["allkeys-lfu", "volatile-lfu"];

/// Which profiles the next pass collects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFlags {
    pub hot: bool,
    pub big: bool,
}

impl ScanFlags {
    pub const BOTH: ScanFlags = ScanFlags { hot: true, big: true };
    pub const NONE: ScanFlags = ScanFlags { hot: false, big: false };

    pub fn any(&self) -> bool {
        self.hot || self.big
    }

    pub fn label(&self) -> String {
        job_label(self.hot, self.big)
    }
}

/// Cursor, counters and top-N sets for the database being scanned
#[derive(Debug)]
pub struct ScannerState {
    pub cursor: u64,
    pub sampled: u64,
    pub batches: u64,
    pub hot: TopN,
    pub big_string: TopN,
    pub big_list: TopN,
    pub big_hash: TopN,
    pub big_set: TopN,
    pub big_zset: TopN,
    pub big_mem: TopN,
}

impl ScannerState {
    pub fn new(top_n: usize) -> Self {
        Self {
            cursor: 0,
            sampled: 0,
            batches: 0,
            hot: TopN::new(top_n, Metric::Frequency),
            big_string: TopN::new(top_n, Metric::Length),
            big_list: TopN::new(top_n, Metric::Length),
            big_hash: TopN::new(top_n, Metric::Length),
            big_set: TopN::new(top_n, Metric::Length),
            big_zset: TopN::new(top_n, Metric::Length),
            big_mem: TopN::new(top_n, Metric::Memory),
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.sampled = 0;
        self.batches = 0;
        for set in self.all_sets_mut() {
            set.clear();
        }
    }

    fn all_sets_mut(&mut self) -> [&mut TopN; 7] {
        [
            &mut self.hot,
            &mut self.big_string,
            &mut self.big_list,
            &mut self.big_hash,
            &mut self.big_set,
            &mut self.big_zset,
            &mut self.big_mem,
        ]
    }

    fn length_set_mut(&mut self, key_type: &KeyType) -> Option<&mut TopN> {
        match key_type {
            KeyType::String => Some(&mut self.big_string),
            KeyType::List => Some(&mut self.big_list),
            KeyType::Hash => Some(&mut self.big_hash),
            KeyType::Set => Some(&mut self.big_set),
            KeyType::Zset => Some(&mut self.big_zset),
            KeyType::Other(_) => None,
        }
    }
}

/// Everything one finished database pass produced
#[derive(Debug, Clone)]
pub struct DbScanResult {
    pub db: i64,
    pub server: String,
    pub sampled: u64,
    pub flags: ScanFlags,
    pub hot: Vec<KeyInfo>,
    /// string, list, hash, set and zset sets, in that order
    pub big_by_length: Vec<KeyInfo>,
    pub big_by_memory: Vec<KeyInfo>,
    pub cost: Duration,
}

impl DbScanResult {
    pub fn is_empty(&self) -> bool {
        self.hot.is_empty() && self.big_by_length.is_empty() && self.big_by_memory.is_empty()
    }
}

/// Slots of one key's probes in the second pipeline
#[derive(Default)]
struct ProbeSlots {
    freq: Option<usize>,
    mem: Option<usize>,
    len: Option<usize>,
}

pub struct HotBigKeyScanner {
    config: HotBigKeyConfig,
    mode: DeploymentMode,
    state: ScannerState,
    stats: Arc<ScanStats>,
    cancel: CancelToken,
}

impl HotBigKeyScanner {
    pub fn new(
        config: HotBigKeyConfig,
        mode: DeploymentMode,
        stats: Arc<ScanStats>,
        cancel: CancelToken,
    ) -> Self {
        let state = ScannerState::new(config.top_n());
        Self {
            config,
            mode,
            state,
            stats,
            cancel,
        }
    }

    pub fn config(&self) -> &HotBigKeyConfig {
        &self.config
    }

    pub fn state(&self) -> &ScannerState {
        &self.state
    }

    /// Scan one database
    ///
    /// Returns `Ok(None)` when there is nothing to report: both profiles off
    /// or the scan was cancelled part way.
    pub fn scan_db(
        &mut self,
        client: &mut dyn ControlPlane,
        db: i64,
        requested: ScanFlags,
    ) -> Result<Option<DbScanResult>> {
        self.state.reset();
        let mut flags = requested;
        let start = Instant::now();

        if flags.hot {
            let policy = client
                .config_get("maxmemory-policy")?
                .remove("maxmemory-policy")
                .unwrap_or_default();
            if !LFU_POLICIES.contains(&policy.as_str()) {
                warn!(
                    "skip hot key collect on {}: maxmemory-policy is {:?}, expect LFU",
                    client.address(),
                    policy
                );
                flags.hot = false;
            }
        }

        if !flags.any() {
            debug!("nothing to collect on {} db {}", client.address(), db);
            return Ok(None);
        }

        if self.mode != DeploymentMode::Cluster {
            client.select_db(db)?;
        }

        loop {
            if self.cancel.is_cancelled() {
                info!("scan of {} db {} cancelled", client.address(), db);
                return Ok(None);
            }

            self.batch_scan(client, flags)?;
            self.state.batches += 1;

            if self.state.cursor == 0 {
                break;
            }

            let sleep = self.config.scan_sleep();
            if !sleep.is_zero()
                && self.state.batches % BATCHES_PER_SLEEP == 0
                && self.cancel.wait_timeout(sleep)
            {
                info!("scan of {} db {} cancelled", client.address(), db);
                return Ok(None);
            }
        }

        let cost = start.elapsed();
        self.stats
            .record_db(&flags.label(), cost, self.state.sampled);
        info!(
            "scan of {} db {} done, keys sampled: {}",
            client.address(),
            db,
            self.state.sampled
        );

        let state = &mut self.state;
        let mut big_by_length = Vec::new();
        for set in [
            &mut state.big_string,
            &mut state.big_list,
            &mut state.big_hash,
            &mut state.big_set,
            &mut state.big_zset,
        ] {
            big_by_length.extend(set.take());
        }

        Ok(Some(DbScanResult {
            db,
            server: client.address().to_string(),
            sampled: state.sampled,
            flags,
            hot: state.hot.take(),
            big_by_length,
            big_by_memory: state.big_mem.take(),
            cost,
        }))
    }

    fn batch_scan(&mut self, client: &mut dyn ControlPlane, flags: ScanFlags) -> Result<()> {
        let (keys, next) = client.scan_keys(self.state.cursor, "*", self.config.batch_size())?;
        self.state.cursor = next;
        self.state.sampled += keys.len() as u64;
        debug!(
            "batch on {}: {} keys, sampled {}, next cursor {}",
            client.address(),
            keys.len(),
            self.state.sampled,
            next
        );
        if keys.is_empty() {
            return Ok(());
        }

        let start = Instant::now();

        // names are only for records and logs; commands carry the raw bytes
        let names: Vec<String> = keys
            .iter()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .collect();

        let mut pipe = client.pipeline();
        for key in &keys {
            pipe.push([&b"TYPE"[..], key.as_slice()]);
        }
        let types: Vec<Option<KeyType>> = pipe
            .exec(client)?
            .iter()
            .zip(&names)
            .map(|(reply, name)| match reply {
                RespValue::SimpleString(_) | RespValue::BulkString(_) => {
                    reply.as_str().and_then(KeyType::from_reply)
                }
                other if other.is_missing_key() => None,
                other => {
                    error!("TYPE {} on {}: {}", name, client.address(), other.describe());
                    None
                }
            })
            .collect();

        let samples = self.config.mem_usage_samples.to_string();
        let mut slots: Vec<ProbeSlots> = Vec::with_capacity(keys.len());
        for ((key, name), key_type) in keys.iter().zip(&names).zip(&types) {
            let key = key.as_slice();
            let mut slot = ProbeSlots::default();
            if let Some(key_type) = key_type {
                if flags.hot {
                    slot.freq = Some(pipe.push([&b"OBJECT"[..], b"FREQ", key]));
                }
                if flags.big {
                    slot.mem = Some(pipe.push([
                        &b"MEMORY"[..],
                        b"USAGE",
                        key,
                        b"SAMPLES",
                        samples.as_bytes(),
                    ]));
                    if let Some(cmd) = key_type.length_command() {
                        slot.len = Some(pipe.push([cmd.as_bytes(), key]));
                    } else {
                        debug!("no length probe for {} ({})", name, key_type);
                    }
                }
            }
            slots.push(slot);
        }

        let replies = pipe.exec(client)?;
        let address = client.address().to_string();
        let probe = |slot: Option<usize>, what: &str, key: &str| -> Option<i64> {
            let reply = replies.get(slot?)?;
            if reply.is_missing_key() {
                return None;
            }
            match reply.as_i64() {
                Some(v) => Some(v),
                None => {
                    error!("{} {} on {}: {}", what, key, address, reply.describe());
                    None
                }
            }
        };

        let threshold_len = self.config.bigkey_threshold_len;
        let threshold_mem = self.config.bigkey_threshold_bytes;

        for ((key, key_type), slot) in names.iter().zip(types).zip(slots) {
            let key_type = match key_type {
                Some(t) => t,
                None => continue,
            };

            if flags.hot {
                if let Some(freq) = probe(slot.freq, "OBJECT FREQ", key) {
                    if freq > 0 {
                        self.state
                            .hot
                            .offer(KeyInfo::new(key, key_type.clone()).with_frequency(freq));
                    }
                }
            }

            if flags.big {
                let length = probe(slot.len, "length probe", key);
                let memory = probe(slot.mem, "MEMORY USAGE", key);
                let info = KeyInfo::new(key, key_type.clone())
                    .with_length(length.unwrap_or(0))
                    .with_memory(memory.unwrap_or(0));

                if let Some(length) = length {
                    if length >= threshold_len {
                        if let Some(set) = self.state.length_set_mut(&key_type) {
                            set.offer(info.clone());
                        }
                    }
                }
                if let Some(memory) = memory {
                    if memory >= threshold_mem {
                        self.state.big_mem.offer(info);
                    }
                }
            }
        }

        self.stats.record_batch(&flags.label(), start.elapsed());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeKey, ScriptedNode};

    fn config() -> HotBigKeyConfig {
        HotBigKeyConfig {
            enable: true,
            top_n: 3,
            bigkey_threshold_len: 100,
            bigkey_threshold_bytes: 1000,
            scan_batch_size: 2,
            scan_sleep_ms: 0,
            ..HotBigKeyConfig::default()
        }
    }

    fn scanner(config: HotBigKeyConfig, mode: DeploymentMode) -> HotBigKeyScanner {
        HotBigKeyScanner::new(config, mode, Arc::new(ScanStats::new()), CancelToken::new())
    }

    fn keyspace() -> ScriptedNode {
        ScriptedNode::new("10.0.0.1:6379")
            .with_policy("allkeys-lfu")
            .with_key("cold", FakeKey::new("string", 5, 64, 0))
            .with_key("hot:1", FakeKey::new("string", 10, 80, 9))
            .with_key("hot:2", FakeKey::new("hash", 20, 120, 4))
            .with_key("queue", FakeKey::new("list", 500, 4096, 1))
            .with_key("stream", FakeKey::new("stream", 0, 2048, 2))
    }

    #[test]
    fn test_full_pass_collects_hot_and_big() {
        let node = keyspace();
        let mut client = node.clone();
        let mut scanner = scanner(config(), DeploymentMode::Standalone);

        let result = scanner
            .scan_db(&mut client, 0, ScanFlags::BOTH)
            .unwrap()
            .unwrap();

        assert_eq!(result.sampled, 5);
        let hot: Vec<(&str, i64)> =
            result.hot.iter().map(|k| (k.key.as_str(), k.frequency)).collect();
        assert_eq!(hot, vec![("hot:1", 9), ("hot:2", 4), ("stream", 2)]);

        assert_eq!(result.big_by_length.len(), 1);
        assert_eq!(result.big_by_length[0].key, "queue");
        assert_eq!(result.big_by_length[0].length, 500);

        let mem: Vec<&str> = result.big_by_memory.iter().map(|k| k.key.as_str()).collect();
        assert_eq!(mem, vec!["queue", "stream"]);
        assert!(node.calls().iter().any(|c| c == "SELECT 0"));
    }

    #[test]
    fn test_empty_database_emits_nothing() {
        let node = ScriptedNode::new("10.0.0.1:6379").with_policy("allkeys-lfu");
        let mut client = node.clone();
        let mut scanner = scanner(config(), DeploymentMode::Standalone);

        let result = scanner
            .scan_db(&mut client, 0, ScanFlags::BOTH)
            .unwrap()
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.sampled, 0);
        assert_eq!(node.pipeline_round_trips(), 0);
    }

    #[test]
    fn test_non_lfu_policy_disables_hot() {
        let node = keyspace().with_policy("allkeys-lru");
        let mut client = node.clone();
        let mut scanner = scanner(config(), DeploymentMode::Standalone);

        let result = scanner
            .scan_db(&mut client, 0, ScanFlags::BOTH)
            .unwrap()
            .unwrap();
        assert!(result.hot.is_empty());
        assert!(!result.flags.hot);
        assert!(!result.big_by_memory.is_empty());
        assert!(!node.calls().iter().any(|c| c.starts_with("OBJECT FREQ")));
    }

    #[test]
    fn test_hot_only_without_lfu_does_nothing() {
        let node = keyspace().with_policy("noeviction");
        let mut client = node.clone();
        let mut scanner = scanner(config(), DeploymentMode::Standalone);

        let flags = ScanFlags { hot: true, big: false };
        assert!(scanner.scan_db(&mut client, 0, flags).unwrap().is_none());
        assert!(!node.calls().iter().any(|c| c.starts_with("SCAN")));
    }

    #[test]
    fn test_zero_length_threshold_marks_known_types_big() {
        let node = keyspace();
        let mut client = node.clone();
        let mut cfg = config();
        cfg.bigkey_threshold_len = 0;
        cfg.top_n = 10;
        let mut scanner = scanner(cfg, DeploymentMode::Standalone);

        let result = scanner
            .scan_db(&mut client, 0, ScanFlags { hot: false, big: true })
            .unwrap()
            .unwrap();
        let mut keys: Vec<&str> = result.big_by_length.iter().map(|k| k.key.as_str()).collect();
        keys.sort();
        assert_eq!(keys, vec!["cold", "hot:1", "hot:2", "queue"]);
    }

    #[test]
    fn test_unknown_type_still_probes_memory() {
        let node = keyspace();
        let mut client = node.clone();
        let mut scanner = scanner(config(), DeploymentMode::Standalone);
        scanner
            .scan_db(&mut client, 0, ScanFlags { hot: false, big: true })
            .unwrap();

        let calls = node.calls();
        assert!(calls.iter().any(|c| c == "MEMORY USAGE stream SAMPLES 100"));
        assert!(calls.iter().any(|c| c == "LLEN queue"));
        assert!(!calls.iter().any(|c| c.ends_with(" stream") && !c.starts_with("TYPE")));
    }

    #[test]
    fn test_vanished_key_is_benign() {
        let node = keyspace().reply("TYPE hot:1", RespValue::SimpleString("none".to_string()));
        node.set_reply("OBJECT FREQ hot:2", RespValue::Error("ERR no such key".to_string()));
        node.set_reply("MEMORY USAGE queue SAMPLES 100", RespValue::Null);
        let mut client = node.clone();
        let mut scanner = scanner(config(), DeploymentMode::Standalone);

        let result = scanner
            .scan_db(&mut client, 0, ScanFlags::BOTH)
            .unwrap()
            .unwrap();
        let hot: Vec<&str> = result.hot.iter().map(|k| k.key.as_str()).collect();
        assert_eq!(hot, vec!["queue", "stream"]);
        assert_eq!(result.big_by_length[0].key, "queue");
        assert!(result.big_by_memory.iter().all(|k| k.key != "queue"));
    }

    #[test]
    fn test_binary_key_measured_by_raw_name() {
        let node = ScriptedNode::new("10.0.0.1:6379")
            .with_policy("allkeys-lfu")
            .with_key(b"\xff\xfe", FakeKey::new("list", 800, 9000, 7));
        let mut client = node.clone();
        let mut scanner = scanner(config(), DeploymentMode::Standalone);

        let result = scanner
            .scan_db(&mut client, 0, ScanFlags::BOTH)
            .unwrap()
            .unwrap();
        assert_eq!(result.hot.len(), 1);
        assert_eq!(result.hot[0].key, "\u{fffd}\u{fffd}");
        assert_eq!(result.hot[0].frequency, 7);
        assert_eq!(result.big_by_length[0].length, 800);
        assert_eq!(result.big_by_memory[0].memory, 9000);

        let raw = node.raw_calls();
        assert!(raw.contains(&vec![b"LLEN".to_vec(), b"\xff\xfe".to_vec()]));
    }

    #[test]
    fn test_cluster_mode_skips_select() {
        let node = keyspace();
        let mut client = node.clone();
        let mut scanner = scanner(config(), DeploymentMode::Cluster);
        scanner.scan_db(&mut client, 0, ScanFlags::BOTH).unwrap();
        assert!(!node.calls().iter().any(|c| c.starts_with("SELECT")));
    }

    #[test]
    fn test_scan_error_fails_db() {
        let node = keyspace().fail("SCAN 0 MATCH * COUNT 2", std::io::ErrorKind::ConnectionReset);
        let mut client = node.clone();
        let mut scanner = scanner(config(), DeploymentMode::Standalone);
        let err = scanner.scan_db(&mut client, 0, ScanFlags::BOTH).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_cancelled_scan_reports_nothing() {
        let node = keyspace();
        let mut client = node.clone();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut scanner =
            HotBigKeyScanner::new(config(), DeploymentMode::Standalone, Arc::new(ScanStats::new()), cancel);
        assert!(scanner.scan_db(&mut client, 0, ScanFlags::BOTH).unwrap().is_none());
    }

    #[test]
    fn test_state_reset_between_databases() {
        let node = keyspace();
        let mut client = node.clone();
        let mut scanner = scanner(config(), DeploymentMode::Standalone);
        let first = scanner.scan_db(&mut client, 0, ScanFlags::BOTH).unwrap().unwrap();
        let second = scanner.scan_db(&mut client, 1, ScanFlags::BOTH).unwrap().unwrap();
        assert_eq!(first.sampled, second.sampled);
        assert_eq!(first.hot.len(), second.hot.len());
        assert_eq!(scanner.state().cursor, 0);
    }
}
