//! Hot/big key scanning

pub mod key_info;
#[allow(clippy::module_inception)]
pub mod scanner;
pub mod scheduler;
pub mod top_n;

pub use key_info::{KeyInfo, KeyType};
pub use scanner::{DbScanResult, HotBigKeyScanner, ScanFlags, ScannerState};
pub use scheduler::{scanner_allowed, COALESCE_WINDOW, ScanCadence, ScanScheduler};
pub use top_n::{Metric, TopN};
