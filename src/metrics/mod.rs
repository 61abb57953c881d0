//! Scan statistics

pub mod scan_stats;

pub use scan_stats::{job_label, JobSummary, ScanStats};
