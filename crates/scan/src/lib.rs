//! Read Delta Lake tables as a set of parquet files.
//!
//! # Usage
//!
//! Scan the latest version of a table, pruning files on partition values:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deltalake_scan::{col, lit, register_delta_scan, DefaultEngine, FunctionRegistry, ScanRequest};
//!
//! async {
//!   let registry = FunctionRegistry::default();
//!   register_delta_scan(&registry, Arc::new(DefaultEngine::new()));
//!   let batches = registry
//!       .scan(
//!           "delta_scan",
//!           ScanRequest::new("/data/partitioned")
//!               .with_filter(col("month").eq(lit("12")))
//!               .with_option("file_row_number", "true"),
//!       )
//!       .await
//!       .unwrap()
//!       .collect()
//!       .await
//!       .unwrap();
//! };
//! ```
//!
//! Resolve the files of a specific version without reading them:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deltalake_scan::{DefaultEngine, DeltaTableSnapshot};
//!
//! async {
//!   let snapshot = DeltaTableSnapshot::open(Arc::new(DefaultEngine::new()), "/data/table", Some(3))
//!       .await
//!       .unwrap();
//!   let files = snapshot.all_files().await.unwrap();
//! };
//! ```
//!
//! # Optional cargo package features
//!
//! - `s3`, `gcs`, `azure` - enable the storage backends for AWS S3, Google Cloud Storage (GCS),
//!   or Azure Blob Storage / Azure Data Lake Storage Gen2 (ADLS2).

#![allow(clippy::nonminimal_bool)]

pub mod engine;
pub mod errors;
pub mod function;
pub mod kernel;
pub mod multi_file;
pub mod reader;
pub mod snapshot;
pub mod table;
#[cfg(test)]
pub(crate) mod test_utils;

pub use self::engine::DefaultEngine;
pub use self::errors::*;
pub use self::function::{
    register_delta_scan, DeltaScanFunction, FunctionRegistry, ScanRequest, ScanResult,
    TableFunction, DELTA_SCAN_FUNCTION_NAME,
};
pub use self::kernel::{TableEngine, TableEngineRef};
pub use self::multi_file::{col, lit, Expr, MultiFileList, MultiFileReader};
pub use self::reader::DeltaMultiFileReader;
pub use self::snapshot::{DeltaFileMetaData, DeltaTableSnapshot};
pub use self::table::{DeltaScanConfig, MultiFileReaderOptions};
pub use object_store::{path::Path, Error as ObjectStoreError, ObjectStore};

// convenience exports for consumers to avoid aligning crate versions
pub use parquet;
