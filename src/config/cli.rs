//! Command-line argument parsing

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Where records go
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// JSON lines on stdout or in the `--output` file
    Jsonl,
    /// One log line per record through the logger
    Log,
}

/// Topology tracking and hot/big key scanning for Redis deployments
#[derive(Parser, Debug, Clone)]
#[command(name = "redis-keyspace-monitor")]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the TOML configuration file
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    /// Record destination
    #[arg(long = "sink", value_enum, default_value_t = SinkKind::Jsonl)]
    pub sink: SinkKind,

    /// Write JSON-lines records to this file instead of stdout
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Stop all deployments after this many seconds (runs until killed if unset)
    #[arg(long = "duration-secs")]
    pub duration_secs: Option<u64>,

    /// Log line format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate argument combinations
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("--verbose and --quiet are mutually exclusive".to_string());
        }
        if self.sink == SinkKind::Log && self.output.is_some() {
            return Err("--output only applies to --sink jsonl".to_string());
        }
        if self.duration_secs == Some(0) {
            return Err("--duration-secs must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let args = CliArgs::try_parse_from(["redis-keyspace-monitor", "--config", "monitor.toml"])
            .unwrap();
        assert_eq!(args.config, PathBuf::from("monitor.toml"));
        assert_eq!(args.log_format, LogFormat::Text);
        assert_eq!(args.sink, SinkKind::Jsonl);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_log_sink_rejects_output_file() {
        let args = CliArgs::try_parse_from(["redis-keyspace-monitor", "-c", "m.toml", "--sink", "log"])
            .unwrap();
        assert_eq!(args.sink, SinkKind::Log);
        assert!(args.validate().is_ok());

        let args = CliArgs::try_parse_from([
            "redis-keyspace-monitor",
            "-c",
            "m.toml",
            "--sink",
            "log",
            "-o",
            "records.jsonl",
        ])
        .unwrap();
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        let args = CliArgs::try_parse_from(["redis-keyspace-monitor", "-c", "m.toml", "-v", "-q"])
            .unwrap();
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_json_logs_and_duration() {
        let args = CliArgs::try_parse_from([
            "redis-keyspace-monitor",
            "-c",
            "m.toml",
            "--log-format",
            "json",
            "--duration-secs",
            "60",
        ])
        .unwrap();
        assert_eq!(args.log_format, LogFormat::Json);
        assert_eq!(args.duration_secs, Some(60));
    }

    #[test]
    fn test_config_is_required() {
        assert!(CliArgs::try_parse_from(["redis-keyspace-monitor"]).is_err());
    }
}
