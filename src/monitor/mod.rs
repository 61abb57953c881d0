//! Deployment supervision

pub mod deployment;

pub use deployment::DeploymentSupervisor;
