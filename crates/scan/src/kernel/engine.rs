//! The boundary between snapshot resolution and the table engine.
//!
//! A [`TableEngine`] opens snapshots, builds scans from them and hands out
//! iterators over the data files a scan selects. Every object crossing this
//! boundary is a [`KernelResource`] so the caller can own it through a
//! [`KernelHandle`](super::handle::KernelHandle).

use std::collections::HashMap;
use std::sync::Arc;

use arrow_schema::SchemaRef as ArrowSchemaRef;
use async_trait::async_trait;
use object_store::path::Path;
use object_store::ObjectStore;
use url::Url;

use super::deletion_vector::SelectionVector;
use super::handle::KernelResource;
use super::models::DeletionVectorDescriptor;
use super::predicate::ScanPredicate;
use super::schema::{ColumnMappingMode, StructType};
use crate::DeltaResult;

/// Connection to a table format implementation.
#[async_trait]
pub trait TableEngine: Send + Sync + std::fmt::Debug {
    /// Open the snapshot of the table at `table_root`, at `version` or the latest one.
    async fn open_snapshot(
        &self,
        table_root: &Url,
        version: Option<i64>,
    ) -> DeltaResult<Option<Box<dyn EngineSnapshot>>>;

    /// Load the rows a deletion vector removes from a data file.
    async fn load_selection_vector(
        &self,
        table_root: &Url,
        descriptor: &DeletionVectorDescriptor,
    ) -> DeltaResult<Option<Box<SelectionVector>>>;

    /// Object store serving `location` and the path of `location` inside it.
    ///
    /// Used to read the data files a scan selects.
    fn object_store(&self, location: &Url) -> DeltaResult<(Arc<dyn ObjectStore>, Path)>;
}

/// Shared reference to a [`TableEngine`].
pub type TableEngineRef = Arc<dyn TableEngine>;

/// A resolved, immutable version of a table.
pub trait EngineSnapshot: KernelResource {
    /// Version of the table this snapshot represents.
    fn version(&self) -> i64;

    /// Normalized root location of the table.
    fn table_root(&self) -> &Url;

    /// Logical schema of the table.
    fn schema(&self) -> &StructType;

    /// Names of the partition columns, in table order.
    fn partition_columns(&self) -> &[String];

    /// Column mapping mode configured for the table.
    fn column_mapping_mode(&self) -> ColumnMappingMode;

    /// Build a scan over this snapshot, pruning files with `predicate`.
    fn build_scan(
        &self,
        predicate: Option<ScanPredicate>,
    ) -> DeltaResult<Option<Box<dyn EngineScan>>>;
}

/// A scan over one snapshot.
pub trait EngineScan: KernelResource {
    /// State shared by every file of this scan.
    fn global_scan_state(&self) -> DeltaResult<Option<Box<GlobalScanState>>>;

    /// Iterator over the data files this scan selects.
    fn scan_data(&self) -> DeltaResult<Option<Box<dyn ScanDataIterator>>>;
}

/// Incrementally pulls batches of selected files.
#[async_trait]
pub trait ScanDataIterator: KernelResource {
    /// Next batch of files, or `None` once every file was returned.
    ///
    /// A batch may be empty without the iterator being exhausted.
    async fn next_batch(&mut self) -> DeltaResult<Option<Vec<ScanFile>>>;
}

/// One data file selected by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanFile {
    /// Path relative to the table root, or an absolute URL.
    pub path: String,
    /// File size in bytes.
    pub size: i64,
    /// Serialized partition values keyed by physical column name.
    pub partition_values: HashMap<String, Option<String>>,
    /// Deletion vector attached to the file, if any.
    pub deletion_vector: Option<DeletionVectorDescriptor>,
    /// Table version whose log added the file.
    pub version: i64,
    /// Number of records, when the log carries statistics.
    pub num_records: Option<i64>,
}

/// State shared by all files of a scan, derived once when the scan is built.
#[derive(Debug, Clone)]
pub struct GlobalScanState {
    /// Normalized root location of the table.
    pub table_root: Url,
    /// Logical schema of the table.
    pub logical_schema: Arc<StructType>,
    /// Arrow schema of the logical columns.
    pub logical_arrow_schema: ArrowSchemaRef,
    /// Arrow schema of the columns as they are named in data files.
    pub physical_arrow_schema: ArrowSchemaRef,
    /// Names of the partition columns.
    pub partition_columns: Vec<String>,
    /// Column mapping mode of the table.
    pub column_mapping_mode: ColumnMappingMode,
}

impl KernelResource for GlobalScanState {
    fn kind(&self) -> &'static str {
        "global scan state"
    }
}
