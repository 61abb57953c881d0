//! Per-deployment supervisor
//!
//! Owns the change detector and the current generation of scanner threads.
//! Setup discovers and connects the topology, then starts one scheduler per
//! eligible instance. A setup that fails on an unreachable node or sentinel is
//! retried until it succeeds or the deployment is cancelled. In cluster and sentinel mode the supervisor ticks the
//! detector; a change starts a new generation before the old one is
//! cancelled, joined and closed.

use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::client::NodeConnector;
use crate::config::DeploymentConfig;
use crate::metrics::ScanStats;
use crate::report::{MetricSink, RecordContext, SOURCE_TOPOLOGY};
use crate::scanner::{scanner_allowed, HotBigKeyScanner, ScanScheduler};
use crate::topology::{discoverer_for, ChangeDetector, ChangeEvent, Instance, Topology, TopologySnapshot};
use crate::utils::{CancelToken, Result, TopologyError};

/// Idle wait for modes without a topology refresh
const STATIC_WAIT: Duration = Duration::from_secs(3600);

struct Worker {
    master: String,
    handle: JoinHandle<Instance>,
}

/// Scanner threads and idle instances built from one topology
#[derive(Default)]
struct Generation {
    cancel: CancelToken,
    workers: Vec<Worker>,
    idle: Vec<Instance>,
}

impl Generation {
    /// Cancel and join every worker, then close every connection exactly once
    fn stop(self) {
        self.cancel.cancel();
        for worker in self.workers {
            match worker.handle.join() {
                Ok(mut instance) => instance.close_all(),
                Err(_) => error!("scanner thread for {} panicked", worker.master),
            }
        }
        for mut instance in self.idle {
            instance.close_all();
        }
    }
}

pub struct DeploymentSupervisor {
    config: DeploymentConfig,
    context: RecordContext,
    nodes: Arc<dyn NodeConnector>,
    detector: ChangeDetector,
    sink: Arc<dyn MetricSink>,
    stats: Arc<ScanStats>,
    cancel: CancelToken,
    current: Generation,
    live: Option<TopologySnapshot>,
}

impl DeploymentSupervisor {
    /// Supervisor that connects over TCP (or TLS) with the deployment's settings
    pub fn new(
        config: DeploymentConfig,
        tags: BTreeMap<String, String>,
        sink: Arc<dyn MetricSink>,
        cancel: CancelToken,
    ) -> Result<Self> {
        let nodes: Arc<dyn NodeConnector> = Arc::new(config.connection_factory());
        let sentinels: Arc<dyn NodeConnector> = Arc::new(config.sentinel_factory());
        Self::with_connectors(config, tags, sink, cancel, nodes, sentinels)
    }

    pub fn with_connectors(
        config: DeploymentConfig,
        tags: BTreeMap<String, String>,
        sink: Arc<dyn MetricSink>,
        cancel: CancelToken,
        nodes: Arc<dyn NodeConnector>,
        sentinels: Arc<dyn NodeConnector>,
    ) -> Result<Self> {
        let discoverer = discoverer_for(&config, nodes.clone(), sentinels)?;
        let context = RecordContext {
            deployment: config.name.clone(),
            mode: config.mode,
            tags,
            bigkey_threshold_len: config.hot_big_keys.bigkey_threshold_len,
            bigkey_threshold_bytes: config.hot_big_keys.bigkey_threshold_bytes,
        };
        Ok(Self {
            config,
            context,
            nodes,
            detector: ChangeDetector::new(discoverer),
            sink,
            stats: Arc::new(ScanStats::new()),
            cancel,
            current: Generation::default(),
            live: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Baseline the detector compares against
    pub fn snapshot(&self) -> Option<&TopologySnapshot> {
        self.live.as_ref()
    }

    pub fn worker_count(&self) -> usize {
        self.current.workers.len()
    }

    pub fn instance_count(&self) -> usize {
        self.current.workers.len() + self.current.idle.len()
    }

    pub fn stats(&self) -> &Arc<ScanStats> {
        &self.stats
    }

    /// Discover, connect and start scanning
    pub fn setup(&mut self) -> Result<()> {
        info!(
            "setup deployment {} ({} mode)",
            self.config.name, self.config.mode
        );
        let topology = self.detector.discover()?;
        let (snapshot, generation) = self.build_generation(topology)?;
        self.live = Some(snapshot);
        self.current = generation;
        Ok(())
    }

    /// Connect a topology and spawn its workers
    fn build_generation(&self, mut topology: Topology) -> Result<(TopologySnapshot, Generation)> {
        let snapshot = topology.snapshot();
        let connected = topology.connect_all(self.nodes.as_ref());
        if connected == 0 {
            topology.close_all();
            return Err(TopologyError::NoMasters.into());
        }
        info!(
            "deployment {}: {} of {} masters connected",
            self.config.name,
            connected,
            snapshot.masters.len()
        );

        let mut generation = Generation::default();
        let scan_config = &self.config.hot_big_keys;
        for instance in topology.instances {
            let eligible = scan_config.enable
                && scanner_allowed(self.config.mode, scan_config.target_role, &instance);
            if !eligible {
                generation.idle.push(instance);
                continue;
            }

            let master = instance.master.address.clone();
            let scanner = HotBigKeyScanner::new(
                scan_config.clone(),
                self.config.mode,
                self.stats.clone(),
                generation.cancel.clone(),
            );
            let scheduler = ScanScheduler::new(
                instance,
                self.nodes.clone(),
                scanner,
                self.config.dbs.clone(),
                self.config.mode,
                self.context.clone(),
                self.sink.clone(),
                generation.cancel.clone(),
            );
            let spawned = thread::Builder::new()
                .name(format!("scan-{}", master))
                .spawn(move || scheduler.run());
            match spawned {
                Ok(handle) => generation.workers.push(Worker { master, handle }),
                Err(e) => {
                    generation.stop();
                    return Err(e.into());
                }
            }
        }
        Ok((snapshot, generation))
    }

    /// One detector tick; returns true when the topology was replaced
    pub fn tick(&mut self) -> bool {
        let live = match &self.live {
            Some(live) => live,
            None => return false,
        };

        let start = Instant::now();
        let report = match self.detector.check(live) {
            Ok(report) => report,
            Err(e) => {
                warn!(
                    "topology check of {} failed: {}, retry next tick",
                    self.config.name, e
                );
                return false;
            }
        };

        match (report.event, report.candidate) {
            (Some(event), Some(candidate)) => {
                self.emit_change(&event, start.elapsed());
                self.replace(candidate)
            }
            _ => false,
        }
    }

    fn emit_change(&self, event: &ChangeEvent, cost: Duration) {
        let record = self.context.change_record(event);
        if let Err(e) = self.sink.feed(SOURCE_TOPOLOGY, vec![record], cost) {
            warn!("feed topology change: {}, ignored", e);
        }
    }

    fn replace(&mut self, candidate: Topology) -> bool {
        let (snapshot, generation) = match self.build_generation(candidate) {
            Ok(built) => built,
            Err(e) => {
                warn!(
                    "rebuild of {} failed: {}, keep current topology",
                    self.config.name, e
                );
                return false;
            }
        };
        let old = mem::replace(&mut self.current, generation);
        self.live = Some(snapshot);
        old.stop();
        info!(
            "deployment {} now runs {} scanners",
            self.config.name,
            self.current.workers.len()
        );
        true
    }

    /// Stop every worker, close every connection and log scan statistics
    pub fn shutdown(&mut self) {
        mem::take(&mut self.current).stop();
        self.detector.close();
        self.live = None;
        self.stats.log_summary(&self.config.name);
        info!("deployment {} stopped", self.config.name);
    }

    /// Retry setup until it succeeds; false when cancelled first
    fn setup_with_retry(&mut self) -> Result<bool> {
        let retry = self.config.setup_retry_interval();
        loop {
            match self.setup() {
                Ok(()) => return Ok(true),
                Err(e) if e.is_fatal() => {
                    error!("setup of deployment {} failed: {}", self.config.name, e);
                    return Err(e);
                }
                Err(e) => warn!(
                    "setup of deployment {} failed: {}, retry in {:?}",
                    self.config.name, e, retry
                ),
            }
            if self.cancel.wait_timeout(retry) {
                return Ok(false);
            }
        }
    }

    /// Run until the cancel token fires
    pub fn run(mut self) -> Result<()> {
        match self.setup_with_retry() {
            Ok(true) => {}
            Ok(false) => {
                self.shutdown();
                return Ok(());
            }
            Err(e) => {
                self.shutdown();
                return Err(e);
            }
        }

        let refresh = self.config.mode.needs_topology_refresh();
        let interval = if refresh {
            self.config.topology_refresh_interval()
        } else {
            STATIC_WAIT
        };
        while !self.cancel.wait_timeout(interval) {
            if refresh {
                self.tick();
            } else {
                debug!("deployment {} idle", self.config.name);
            }
        }

        self.shutdown();
        Ok(())
    }
}
