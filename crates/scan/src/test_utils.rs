//! Scripted table engine for unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use parking_lot::Mutex;
use url::Url;

use crate::kernel::arrow::{logical_arrow_schema, physical_arrow_schema};
use crate::kernel::{
    ColumnMappingMode, DeletionVectorDescriptor, EngineScan, EngineSnapshot, FileSkippingView,
    GlobalScanState, KernelResource, PrimitiveType, ScanDataIterator, ScanFile, ScanPredicate,
    SelectionVector, StorageType, StructField, StructType, TableEngine,
};
use crate::{DeltaResult, DeltaTableError};

/// Contents of a scripted table.
#[derive(Debug, Clone)]
pub(crate) struct MockTable {
    pub version: i64,
    pub schema: StructType,
    pub partition_columns: Vec<String>,
    pub column_mapping_mode: ColumnMappingMode,
    /// Batches handed out by the scan data iterator, in order.
    pub batches: Vec<Vec<ScanFile>>,
    /// Deleted-row masks keyed by `pathOrInlineDv`, `false` meaning deleted.
    pub deletion_vectors: HashMap<String, Vec<bool>>,
}

impl MockTable {
    pub fn with_batches(batches: Vec<Vec<ScanFile>>) -> Self {
        Self {
            version: 2,
            schema: StructType::new(vec![
                StructField::new("id", PrimitiveType::Long, true),
                StructField::new("part", PrimitiveType::String, true),
                StructField::new("year", PrimitiveType::Integer, true),
            ]),
            partition_columns: vec![],
            column_mapping_mode: ColumnMappingMode::None,
            batches,
            deletion_vectors: HashMap::new(),
        }
    }

    /// Table partitioned by the string column `part`.
    pub fn partitioned(batches: Vec<Vec<ScanFile>>) -> Self {
        Self {
            partition_columns: vec!["part".to_string()],
            ..Self::with_batches(batches)
        }
    }
}

pub(crate) fn scan_file(path: &str, version: i64, partition_values: &[(&str, &str)]) -> ScanFile {
    ScanFile {
        path: path.to_string(),
        size: 100,
        partition_values: partition_values
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect(),
        deletion_vector: None,
        version,
        num_records: None,
    }
}

pub(crate) fn dv_descriptor(key: &str) -> DeletionVectorDescriptor {
    DeletionVectorDescriptor {
        storage_type: StorageType::Inline,
        path_or_inline_dv: key.to_string(),
        offset: None,
        size_in_bytes: 0,
        cardinality: 0,
    }
}

/// Engine serving one [`MockTable`] and recording what happens to its handles.
#[derive(Debug)]
pub(crate) struct MockEngine {
    table: Arc<MockTable>,
    pub store: Arc<InMemory>,
    /// Kinds of the released handles, in release order.
    pub releases: Arc<Mutex<Vec<&'static str>>>,
    /// Predicate of every scan that was built.
    pub scans: Arc<Mutex<Vec<Option<ScanPredicate>>>>,
    null_snapshot: bool,
}

impl MockEngine {
    pub fn new(table: MockTable) -> Self {
        Self {
            table: Arc::new(table),
            store: Arc::new(InMemory::new()),
            releases: Arc::default(),
            scans: Arc::default(),
            null_snapshot: false,
        }
    }

    /// Make `open_snapshot` hand out no handle.
    pub fn with_null_snapshot(mut self) -> Self {
        self.null_snapshot = true;
        self
    }
}

#[async_trait]
impl TableEngine for MockEngine {
    async fn open_snapshot(
        &self,
        table_root: &Url,
        version: Option<i64>,
    ) -> DeltaResult<Option<Box<dyn EngineSnapshot>>> {
        if let Some(version) = version.filter(|v| *v > self.table.version) {
            return Err(DeltaTableError::VersionNotFound {
                path: table_root.to_string(),
                version,
            });
        }
        if self.null_snapshot {
            return Ok(None);
        }
        Ok(Some(Box::new(MockSnapshot {
            table: self.table.clone(),
            table_root: table_root.clone(),
            releases: self.releases.clone(),
            scans: self.scans.clone(),
        })))
    }

    async fn load_selection_vector(
        &self,
        _table_root: &Url,
        descriptor: &DeletionVectorDescriptor,
    ) -> DeltaResult<Option<Box<SelectionVector>>> {
        let mask = self
            .table
            .deletion_vectors
            .get(&descriptor.path_or_inline_dv)
            .ok_or_else(|| DeltaTableError::DeletionVector("corrupt deletion vector".into()))?;
        Ok(Some(Box::new(SelectionVector::from_bools(
            mask.iter().copied(),
        ))))
    }

    fn object_store(&self, location: &Url) -> DeltaResult<(Arc<dyn ObjectStore>, Path)> {
        let path = Path::from_url_path(location.path()).map_err(object_store::Error::from)?;
        Ok((self.store.clone(), path))
    }
}

struct MockSnapshot {
    table: Arc<MockTable>,
    table_root: Url,
    releases: Arc<Mutex<Vec<&'static str>>>,
    scans: Arc<Mutex<Vec<Option<ScanPredicate>>>>,
}

impl KernelResource for MockSnapshot {
    fn kind(&self) -> &'static str {
        "snapshot"
    }

    fn release(&mut self) {
        self.releases.lock().push(self.kind());
    }
}

impl EngineSnapshot for MockSnapshot {
    fn version(&self) -> i64 {
        self.table.version
    }

    fn table_root(&self) -> &Url {
        &self.table_root
    }

    fn schema(&self) -> &StructType {
        &self.table.schema
    }

    fn partition_columns(&self) -> &[String] {
        &self.table.partition_columns
    }

    fn column_mapping_mode(&self) -> ColumnMappingMode {
        self.table.column_mapping_mode
    }

    fn build_scan(
        &self,
        predicate: Option<ScanPredicate>,
    ) -> DeltaResult<Option<Box<dyn EngineScan>>> {
        self.scans.lock().push(predicate.clone());
        Ok(Some(Box::new(MockScan {
            table: self.table.clone(),
            table_root: self.table_root.clone(),
            predicate,
            releases: self.releases.clone(),
        })))
    }
}

struct MockScan {
    table: Arc<MockTable>,
    table_root: Url,
    predicate: Option<ScanPredicate>,
    releases: Arc<Mutex<Vec<&'static str>>>,
}

impl KernelResource for MockScan {
    fn kind(&self) -> &'static str {
        "scan"
    }

    fn release(&mut self) {
        self.releases.lock().push(self.kind());
    }
}

impl EngineScan for MockScan {
    fn global_scan_state(&self) -> DeltaResult<Option<Box<GlobalScanState>>> {
        let schema = Arc::new(self.table.schema.clone());
        Ok(Some(Box::new(GlobalScanState {
            table_root: self.table_root.clone(),
            logical_arrow_schema: logical_arrow_schema(&schema)?,
            physical_arrow_schema: physical_arrow_schema(&schema, self.table.column_mapping_mode)?,
            logical_schema: schema,
            partition_columns: self.table.partition_columns.clone(),
            column_mapping_mode: self.table.column_mapping_mode,
        })))
    }

    fn scan_data(&self) -> DeltaResult<Option<Box<dyn ScanDataIterator>>> {
        Ok(Some(Box::new(MockIterator {
            table: self.table.clone(),
            predicate: self.predicate.clone(),
            next: 0,
            releases: self.releases.clone(),
        })))
    }
}

struct MockIterator {
    table: Arc<MockTable>,
    predicate: Option<ScanPredicate>,
    next: usize,
    releases: Arc<Mutex<Vec<&'static str>>>,
}

impl KernelResource for MockIterator {
    fn kind(&self) -> &'static str {
        "scan data iterator"
    }

    fn release(&mut self) {
        self.releases.lock().push(self.kind());
    }
}

#[async_trait]
impl ScanDataIterator for MockIterator {
    async fn next_batch(&mut self) -> DeltaResult<Option<Vec<ScanFile>>> {
        let Some(batch) = self.table.batches.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let table = &self.table;
        Ok(Some(
            batch
                .iter()
                .filter(|file| match &self.predicate {
                    None => true,
                    Some(predicate) => predicate.may_match(&FileSkippingView {
                        schema: &table.schema,
                        partition_columns: &table.partition_columns,
                        column_mapping_mode: table.column_mapping_mode,
                        partition_values: &file.partition_values,
                        stats: None,
                    }),
                })
                .cloned()
                .collect(),
        ))
    }
}
