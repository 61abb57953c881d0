//! redis-keyspace-monitor - topology tracking and hot/big key scanning
//!
//! Loads a TOML file describing one or more Redis deployments and runs a
//! supervisor thread for each. Records go to stdout, a JSON-lines file or,
//! with `--sink log`, the logger; logs go to stderr.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use redis_keyspace_monitor::config::{CliArgs, LogFormat, MonitorConfig, SinkKind};
use redis_keyspace_monitor::monitor::DeploymentSupervisor;
use redis_keyspace_monitor::report::{JsonLinesSink, MetricSink, TracingSink};
use redis_keyspace_monitor::utils::CancelToken;

fn setup_logging(verbose: bool, quiet: bool, format: LogFormat) -> Result<()> {
    let level = if quiet {
        LevelFilter::ERROR
    } else if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    // RUST_LOG wins over the flags when set
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow!("failed to set tracing subscriber: {}", e))
}

fn print_banner(config: &MonitorConfig) {
    info!("redis-keyspace-monitor v{}", env!("CARGO_PKG_VERSION"));
    for d in &config.deployments {
        info!(
            "deployment {}: mode={}, hosts={:?}, dbs={:?}, hot/big keys {}",
            d.name,
            d.mode,
            d.hosts,
            d.dbs,
            if d.hot_big_keys.enable { "on" } else { "off" }
        );
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse_args();
    args.validate().map_err(|e| anyhow!(e))?;

    setup_logging(args.verbose, args.quiet, args.log_format)?;

    let config = MonitorConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    print_banner(&config);

    let sink: Arc<dyn MetricSink> = match (args.sink, &args.output) {
        (SinkKind::Log, _) => Arc::new(TracingSink),
        (SinkKind::Jsonl, Some(path)) => {
            info!("Writing records to: {:?}", path);
            Arc::new(
                JsonLinesSink::file(path)
                    .with_context(|| format!("failed to open {}", path.display()))?,
            )
        }
        (SinkKind::Jsonl, None) => Arc::new(JsonLinesSink::stdout()),
    };

    let cancel = CancelToken::new();
    if let Some(secs) = args.duration_secs {
        let timer = cancel.clone();
        thread::Builder::new()
            .name("duration".to_string())
            .spawn(move || {
                if !timer.wait_timeout(Duration::from_secs(secs)) {
                    info!("{}s elapsed, stopping", secs);
                    timer.cancel();
                }
            })
            .context("failed to spawn duration timer")?;
    }

    let mut handles = Vec::with_capacity(config.deployments.len());
    for deployment in &config.deployments {
        let supervisor = DeploymentSupervisor::new(
            deployment.clone(),
            config.merged_tags(deployment),
            sink.clone(),
            cancel.clone(),
        )
        .with_context(|| format!("deployment {}", deployment.name))?;
        let handle = thread::Builder::new()
            .name(format!("deploy-{}", deployment.name))
            .spawn(move || supervisor.run())
            .context("failed to spawn supervisor thread")?;
        handles.push((deployment.name.clone(), handle));
    }

    let total = handles.len();
    let mut failed = 0;
    for (name, handle) in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("deployment {} stopped: {}", name, e);
                failed += 1;
            }
            Err(_) => {
                error!("supervisor thread for {} panicked", name);
                failed += 1;
            }
        }
    }
    cancel.cancel();

    if failed == total {
        return Err(anyhow!("no deployment could be monitored"));
    }
    info!("monitor stopped ({} of {} deployments ran)", total - failed, total);
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
