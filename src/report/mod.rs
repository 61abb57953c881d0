//! Records and the sinks they are fed to

pub mod record;
pub mod sink;

pub use record::{
    to_json_line, Record, RecordContext, MEASUREMENT_BIG_KEY, MEASUREMENT_HOT_KEY,
    MEASUREMENT_TOPOLOGY,
};
pub use sink::{
    JsonLinesSink, MemorySink, MetricSink, TracingSink, SOURCE_HOT_BIG_KEYS, SOURCE_TOPOLOGY,
};
