//! Table locations and scan options.

pub mod config;
pub mod path;

pub use config::{DeltaScanConfig, MultiFileReaderOptions};
pub use path::{ensure_table_uri, to_delta_path, to_host_path};
