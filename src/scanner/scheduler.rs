//! Dual-cadence scan scheduling
//!
//! A scheduler owns one instance and one scanner. Each pass covers every
//! configured database; between passes it waits for the earlier of the big
//! and hot cadences. Which profiles a pass collects is a pure function of the
//! time since each cadence last fired.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::scanner::{HotBigKeyScanner, ScanFlags};
use crate::client::NodeConnector;
use crate::config::{DeploymentMode, HotBigKeyConfig, TargetRole};
use crate::report::{MetricSink, Record, RecordContext, SOURCE_HOT_BIG_KEYS};
use crate::topology::{ActiveNode, Instance};
use crate::utils::CancelToken;

pub const DEFAULT_BIG_INTERVAL: Duration = Duration::from_secs(3 * 3600);
pub const DEFAULT_HOT_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Deadlines closer than this are treated as already due
pub const COALESCE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCadence {
    pub big: Duration,
    pub hot: Duration,
}

impl ScanCadence {
    /// Build from config, replacing non-positive intervals with the defaults
    pub fn from_config(config: &HotBigKeyConfig) -> Self {
        let big = if config.big_key_interval_secs <= 0 {
            warn!(
                "reset big key interval from {}s to {:?}",
                config.big_key_interval_secs, DEFAULT_BIG_INTERVAL
            );
            DEFAULT_BIG_INTERVAL
        } else {
            Duration::from_secs(config.big_key_interval_secs as u64)
        };
        let hot = if config.hot_key_interval_secs <= 0 {
            warn!(
                "reset hot key interval from {}s to {:?}",
                config.hot_key_interval_secs, DEFAULT_HOT_INTERVAL
            );
            DEFAULT_HOT_INTERVAL
        } else {
            Duration::from_secs(config.hot_key_interval_secs as u64)
        };
        Self { big, hot }
    }

    /// Which cadences are due given the time since each last fired
    pub fn due_flags(&self, since_big: Duration, since_hot: Duration) -> ScanFlags {
        ScanFlags {
            big: since_big + COALESCE_WINDOW >= self.big,
            hot: since_hot + COALESCE_WINDOW >= self.hot,
        }
    }

    /// Time until the earlier cadence is due
    pub fn next_wait(&self, since_big: Duration, since_hot: Duration) -> Duration {
        self.big
            .saturating_sub(since_big)
            .min(self.hot.saturating_sub(since_hot))
    }
}

/// Whether an instance gets a scanner at all
///
/// Cluster and standalone deployments only scan masters; replica targeting
/// needs at least one replica.
pub fn scanner_allowed(mode: DeploymentMode, role: TargetRole, instance: &Instance) -> bool {
    if matches!(mode, DeploymentMode::Cluster | DeploymentMode::Standalone)
        && role != TargetRole::Master
    {
        info!(
            "{} mode only supports scanning masters, no scanner for {}",
            mode, instance.master.address
        );
        return false;
    }
    if role == TargetRole::Replica && instance.replicas.is_empty() {
        info!(
            "no hot/big key scanner for {}: no replicas",
            instance.master.address
        );
        return false;
    }
    true
}

pub struct ScanScheduler {
    instance: Instance,
    /// Re-dials nodes whose connection was dropped after a transport error
    connector: Arc<dyn NodeConnector>,
    scanner: HotBigKeyScanner,
    cadence: ScanCadence,
    dbs: Vec<i64>,
    mode: DeploymentMode,
    target_role: TargetRole,
    context: RecordContext,
    sink: Arc<dyn MetricSink>,
    cancel: CancelToken,
}

impl ScanScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance: Instance,
        connector: Arc<dyn NodeConnector>,
        scanner: HotBigKeyScanner,
        dbs: Vec<i64>,
        mode: DeploymentMode,
        context: RecordContext,
        sink: Arc<dyn MetricSink>,
        cancel: CancelToken,
    ) -> Self {
        let cadence = ScanCadence::from_config(scanner.config());
        let target_role = scanner.config().target_role;
        let dbs = if mode == DeploymentMode::Cluster {
            vec![0]
        } else {
            dbs
        };
        Self {
            instance,
            connector,
            scanner,
            cadence,
            dbs,
            mode,
            target_role,
            context,
            sink,
            cancel,
        }
    }

    pub fn cadence(&self) -> ScanCadence {
        self.cadence
    }

    /// Pick the node for the next pass
    fn select_node(&mut self) {
        let replicas = self.instance.replicas.len();
        let wants_replica = self.target_role == TargetRole::Replica
            && matches!(self.mode, DeploymentMode::MasterSlave | DeploymentMode::Sentinel)
            && replicas > 0;

        if wants_replica {
            let idx = fastrand::usize(0..replicas);
            let replica = &mut self.instance.replicas[idx];
            match replica.connect(self.connector.as_ref()) {
                Ok(()) => {
                    debug!("scanner switched to {}", replica.address);
                    self.instance.select(ActiveNode::Replica(idx));
                    return;
                }
                Err(e) => warn!(
                    "replica {} not connected ({}), scanning master {}",
                    replica.address, e, self.instance.master.address
                ),
            }
        }
        self.instance.select(ActiveNode::Master);
    }

    /// One pass over every database on the selected node
    pub fn run_pass(&mut self, flags: ScanFlags) -> Vec<Record> {
        let mut records = Vec::new();
        self.select_node();
        let (address, role) = match self.instance.active_node() {
            Some(node) => (node.address.clone(), node.role),
            None => return records,
        };
        if let Err(e) = self.instance.connect_active(self.connector.as_ref()) {
            warn!("skip scan on {}: {}", address, e);
            self.instance.clear_active();
            return records;
        }

        for &db in &self.dbs {
            if self.cancel.is_cancelled() {
                break;
            }
            let client = match self.instance.active_client_mut() {
                Some(client) => client,
                None => {
                    warn!("skip scan on {}: not connected", address);
                    break;
                }
            };
            debug!(
                "collect hot/big keys on {} db {}, hot: {}, big: {}",
                address, db, flags.hot, flags.big
            );
            match self.scanner.scan_db(client, db, flags) {
                Ok(Some(result)) => records.extend(self.context.scan_records(&result, role)),
                Ok(None) => {}
                Err(e) if e.is_transport() => {
                    error!("scan of {} db {} failed: {}, reconnect next pass", address, db, e);
                    self.instance.drop_active_client();
                    break;
                }
                Err(e) => error!("scan of {} db {} failed: {}, skipped", address, db, e),
            }
        }

        self.instance.clear_active();
        records
    }

    /// Run until cancelled and hand the instance back
    pub fn run(mut self) -> Instance {
        info!(
            "start hot/big key scanner on {} (target {}, big every {:?}, hot every {:?})",
            self.instance.master.address,
            self.target_role.as_str(),
            self.cadence.big,
            self.cadence.hot
        );

        let mut flags = ScanFlags::BOTH;
        let mut last_big = Instant::now();
        let mut last_hot = last_big;

        'passes: loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let pass_start = Instant::now();
            if flags.big {
                last_big = pass_start;
            }
            if flags.hot {
                last_hot = pass_start;
            }

            let records = self.run_pass(flags);
            if !records.is_empty() {
                if let Err(e) = self
                    .sink
                    .feed(SOURCE_HOT_BIG_KEYS, records, pass_start.elapsed())
                {
                    warn!("feed hot/big keys: {}, ignored", e);
                }
            }

            loop {
                let (since_big, since_hot) = (last_big.elapsed(), last_hot.elapsed());
                let due = self.cadence.due_flags(since_big, since_hot);
                if due.any() {
                    flags = due;
                    break;
                }
                if self
                    .cancel
                    .wait_timeout(self.cadence.next_wait(since_big, since_hot))
                {
                    break 'passes;
                }
            }
        }

        info!("hot/big key scanner on {} exited", self.instance.master.address);
        self.instance
    }
}
