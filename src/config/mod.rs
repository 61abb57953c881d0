//! Configuration module

pub mod cli;
pub mod monitor_config;
pub mod tls_config;

pub use cli::{CliArgs, LogFormat, SinkKind};
pub use monitor_config::{
    DeploymentConfig, DeploymentMode, GlobalConfig, HotBigKeyConfig, MonitorConfig,
    SentinelConfig, ServerAddress, TargetRole,
};
pub use tls_config::TlsConfig;
