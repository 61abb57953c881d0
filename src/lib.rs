//! redis-keyspace-monitor library
//!
//! Topology tracking and hot/big key scanning for Redis deployments.

pub mod client;
pub mod config;
pub mod metrics;
pub mod monitor;
pub mod report;
pub mod scanner;
pub mod topology;
pub mod utils;

#[cfg(test)]
mod testing;
