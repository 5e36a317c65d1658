//! Point-in-time view of a Delta table and the lazily resolved list of its files.
//!
//! A [`DeltaTableSnapshot`] owns the engine snapshot, the scan built from it
//! and the iterator pulling file batches out of the scan. Files are resolved
//! on demand; every pulled batch is demultiplexed into resolved file paths
//! and [`DeltaFileMetaData`] entries, in pull order.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use arrow_schema::SchemaRef as ArrowSchemaRef;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace};
use url::Url;

use crate::kernel::arrow::logical_arrow_schema;
use crate::kernel::{
    ColumnMappingMode, EngineScan, EngineSnapshot, GlobalScanState, KernelHandle, Scalar,
    ScanDataIterator, ScanFile, ScanPredicate, StructType, TableEngineRef,
};
use crate::multi_file::{Expr, FileExpandResult, MultiFileList};
use crate::table::path::{ensure_table_uri, join_table_path, to_delta_path, to_host_path};
use crate::{DeltaResult, DeltaTableError};

pub mod metadata;

pub use metadata::{DeltaFileMetaData, FileMetadataIndex};

/// Logical schema of a snapshot.
#[derive(Debug, Clone)]
pub struct BoundSchema {
    pub schema: Arc<StructType>,
    pub arrow_schema: ArrowSchemaRef,
    pub partition_columns: Vec<String>,
    pub column_mapping_mode: ColumnMappingMode,
}

#[derive(Debug, Default)]
struct ResolvedFiles {
    files: Vec<String>,
    metadata: FileMetadataIndex,
    exhausted: bool,
}

#[derive(Default)]
struct ScanCursor {
    iterator: Option<KernelHandle<dyn ScanDataIterator>>,
    failure: Option<String>,
}

struct ScanState {
    global_state: KernelHandle<GlobalScanState>,
    scan: KernelHandle<dyn EngineScan>,
    predicate: Option<ScanPredicate>,
}

/// A snapshot of a Delta table and the files of the scan over it.
///
/// The scan is built exactly once, either explicitly through
/// [`apply_predicates`](Self::apply_predicates) or without predicates the
/// first time a file is requested.
pub struct DeltaTableSnapshot {
    // fields drop in declaration order: resolved metadata, iterator, scan, snapshot
    resolved: RwLock<ResolvedFiles>,
    cursor: Mutex<ScanCursor>,
    scan: OnceLock<ScanState>,
    snapshot: KernelHandle<dyn EngineSnapshot>,
    bound: OnceLock<BoundSchema>,
    engine: TableEngineRef,
    path: String,
    table_root: Url,
}

impl std::fmt::Debug for DeltaTableSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaTableSnapshot")
            .field("path", &self.path)
            .field("version", &self.version())
            .field("resolved", &self.resolved_file_count())
            .finish()
    }
}

impl DeltaTableSnapshot {
    /// Open the snapshot of the table at `path`, at `version` or the latest one.
    #[instrument(skip(engine))]
    pub async fn open(engine: TableEngineRef, path: &str, version: Option<i64>) -> DeltaResult<Self> {
        let table_root = ensure_table_uri(to_delta_path(path))
            .map_err(|err| DeltaTableError::engine_open(path, err))?;
        let snapshot = match engine.open_snapshot(&table_root, version).await {
            Ok(snapshot) => KernelHandle::try_new(snapshot, "snapshot")?,
            Err(DeltaTableError::VersionNotFound { version, .. }) => {
                return Err(DeltaTableError::VersionNotFound {
                    path: path.to_string(),
                    version,
                })
            }
            Err(err @ DeltaTableError::EngineOpen { .. }) => return Err(err),
            Err(err) => return Err(DeltaTableError::engine_open(path, err)),
        };
        debug!(version = snapshot.version(), "opened Delta snapshot");
        Ok(Self {
            resolved: RwLock::new(ResolvedFiles::default()),
            cursor: Mutex::new(ScanCursor::default()),
            scan: OnceLock::new(),
            snapshot,
            bound: OnceLock::new(),
            engine,
            path: path.to_string(),
            table_root,
        })
    }

    /// Location the snapshot was opened from, as given by the caller.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Normalized URL of the table root.
    pub fn table_root(&self) -> &Url {
        &self.table_root
    }

    /// Version of the table this snapshot represents.
    pub fn version(&self) -> i64 {
        self.snapshot.version()
    }

    pub fn engine(&self) -> &TableEngineRef {
        &self.engine
    }

    /// Logical schema of the snapshot, derived on first use.
    pub fn bind(&self) -> DeltaResult<&BoundSchema> {
        if let Some(bound) = self.bound.get() {
            return Ok(bound);
        }
        let schema = Arc::new(self.snapshot.schema().clone());
        let bound = BoundSchema {
            arrow_schema: logical_arrow_schema(&schema)?,
            schema,
            partition_columns: self.snapshot.partition_columns().to_vec(),
            column_mapping_mode: self.snapshot.column_mapping_mode(),
        };
        Ok(self.bound.get_or_init(|| bound))
    }

    /// Build the scan, pruning files with the translatable parts of `filters`.
    ///
    /// Fails once a scan exists, explicitly built or created implicitly by
    /// resolving files.
    pub fn apply_predicates(&self, filters: &[Expr]) -> DeltaResult<()> {
        let predicate = ScanPredicate::and_all(filters.iter().filter_map(|f| f.to_scan_predicate()));
        self.finalize_scan(predicate).map(|_| ())
    }

    /// Predicate the scan was built with.
    pub fn pushed_predicate(&self) -> Option<&ScanPredicate> {
        self.scan.get().and_then(|s| s.predicate.as_ref())
    }

    /// Whether the scan was built.
    pub fn is_scan_finalized(&self) -> bool {
        self.scan.get().is_some()
    }

    fn finalize_scan(&self, predicate: Option<ScanPredicate>) -> DeltaResult<&ScanState> {
        let already_finalized = || DeltaTableError::ScanAlreadyFinalized {
            path: self.path.clone(),
        };
        if self.scan.get().is_some() {
            return Err(already_finalized());
        }
        let scan = KernelHandle::try_new(self.snapshot.build_scan(predicate.clone())?, "scan")?;
        let global_state =
            KernelHandle::try_new(scan.global_scan_state()?, "global scan state")?;
        debug!(
            path = %self.path,
            predicate = ?predicate.as_ref().map(|p| p.to_string()),
            "finalized scan"
        );
        self.scan
            .set(ScanState {
                global_state,
                scan,
                predicate,
            })
            .map_err(|_| already_finalized())?;
        self.scan.get().ok_or_else(already_finalized)
    }

    fn ensure_scan(&self) -> DeltaResult<&ScanState> {
        if let Some(scan) = self.scan.get() {
            return Ok(scan);
        }
        match self.finalize_scan(None) {
            Err(DeltaTableError::ScanAlreadyFinalized { .. }) => self
                .scan
                .get()
                .ok_or(DeltaTableError::NullHandle("scan")),
            other => other,
        }
    }

    /// State shared by every file of the scan, building the scan if needed.
    pub fn global_scan_state(&self) -> DeltaResult<&GlobalScanState> {
        Ok(&self.ensure_scan()?.global_state)
    }

    /// Number of files resolved so far.
    pub fn resolved_file_count(&self) -> usize {
        self.resolved.read().files.len()
    }

    /// Whether every file of the scan was resolved.
    pub fn files_exhausted(&self) -> bool {
        self.resolved.read().exhausted
    }

    /// Path of the file with ordinal `file_number`, resolving more files as needed.
    pub async fn file(&self, file_number: usize) -> DeltaResult<Option<String>> {
        loop {
            {
                let resolved = self.resolved.read();
                if let Some(path) = resolved.files.get(file_number) {
                    return Ok(Some(path.clone()));
                }
                if resolved.exhausted {
                    return Ok(None);
                }
            }
            self.pull_batch().await?;
        }
    }

    /// Stream of all file paths, already resolved ones first.
    pub fn list_files(&self) -> BoxStream<'_, DeltaResult<String>> {
        futures::stream::try_unfold(0usize, move |file_number| async move {
            Ok::<_, DeltaTableError>(self
                .file(file_number)
                .await?
                .map(|path| (path, file_number + 1)))
        })
        .boxed()
    }

    /// Resolve and return every file path.
    pub async fn all_files(&self) -> DeltaResult<Vec<String>> {
        while !self.files_exhausted() {
            self.pull_batch().await?;
        }
        Ok(self.resolved.read().files.clone())
    }

    /// Number of files, resolving all of them.
    pub async fn total_file_count(&self) -> DeltaResult<usize> {
        while !self.files_exhausted() {
            self.pull_batch().await?;
        }
        Ok(self.resolved_file_count())
    }

    /// Classify the file list, resolving at most two files.
    pub async fn expand_result(&self) -> DeltaResult<FileExpandResult> {
        self.file(1).await?;
        let resolved = self.resolved.read();
        Ok(match (resolved.files.len(), resolved.exhausted) {
            (0, _) => FileExpandResult::NoFiles,
            (1, _) => FileExpandResult::SingleFile,
            (_, true) => FileExpandResult::MultipleFiles,
            (_, false) => FileExpandResult::MultipleFilesUnknownCount,
        })
    }

    /// Metadata of a resolved file.
    ///
    /// # Panics
    ///
    /// If `file_number` was not resolved yet.
    pub fn metadata(&self, file_number: usize) -> Arc<DeltaFileMetaData> {
        self.resolved.read().metadata.get(file_number)
    }

    /// Push `filters` into file resolution.
    ///
    /// Before the scan exists the filters narrow this snapshot and `None` is
    /// returned. Afterwards a new snapshot pinned to the same version is opened
    /// with the combined predicates and returned; this one stays unchanged.
    pub async fn complex_filter_pushdown(&self, filters: &[Expr]) -> DeltaResult<Option<Self>> {
        let new_predicates: Vec<_> = filters.iter().filter_map(|f| f.to_scan_predicate()).collect();
        if new_predicates.is_empty() {
            return Ok(None);
        }
        let Some(existing) = self.scan.get() else {
            self.finalize_scan(ScanPredicate::and_all(new_predicates))?;
            return Ok(None);
        };
        let combined = ScanPredicate::and_all(existing.predicate.iter().cloned().chain(new_predicates));
        let narrowed = Self::open(self.engine.clone(), &self.path, Some(self.version())).await?;
        narrowed.finalize_scan(combined)?;
        debug!(path = %self.path, version = self.version(), "re-opened snapshot for filter pushdown");
        Ok(Some(narrowed))
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.path))]
    async fn pull_batch(&self) -> DeltaResult<()> {
        let scan = self.ensure_scan()?;
        let mut cursor = self.cursor.lock().await;
        if let Some(reason) = &cursor.failure {
            return Err(DeltaTableError::generic(format!(
                "File listing of Delta table at {} failed earlier: {reason}",
                self.path
            )));
        }
        if self.files_exhausted() {
            return Ok(());
        }
        let result = self.pull_into(scan, &mut cursor).await;
        if let Err(err) = &result {
            cursor.failure = Some(err.to_string());
        }
        result
    }

    async fn pull_into(&self, scan: &ScanState, cursor: &mut ScanCursor) -> DeltaResult<()> {
        if cursor.iterator.is_none() {
            let iterator = KernelHandle::try_new(scan.scan.scan_data()?, "scan data iterator")?;
            cursor.iterator = Some(iterator);
        }
        let Some(iterator) = cursor.iterator.as_mut() else {
            return Err(DeltaTableError::NullHandle("scan data iterator"));
        };

        let Some(batch) = iterator.next_batch().await? else {
            let mut resolved = self.resolved.write();
            resolved.exhausted = true;
            debug!(files = resolved.files.len(), "file listing exhausted");
            return Ok(());
        };

        let first = self.resolved_file_count();
        let mut entries = Vec::with_capacity(batch.len());
        for (offset, file) in batch.into_iter().enumerate() {
            entries.push(self.demux_file(&scan.global_state, first + offset, file).await?);
        }

        let mut resolved = self.resolved.write();
        for (path, metadata) in entries {
            resolved.files.push(path);
            resolved.metadata.push(metadata);
        }
        debug!(first, count = resolved.files.len() - first, "resolved files");
        Ok(())
    }

    async fn demux_file(
        &self,
        state: &GlobalScanState,
        file_number: usize,
        file: ScanFile,
    ) -> DeltaResult<(String, DeltaFileMetaData)> {
        let decode_error = |reason: String| DeltaTableError::MetadataDecode {
            path: self.path.clone(),
            file: file.path.clone(),
            version: file.version,
            reason,
        };

        let location =
            join_table_path(&self.table_root, &file.path).map_err(|e| decode_error(e.to_string()))?;

        let selection_vector = match &file.deletion_vector {
            None => None,
            Some(descriptor) => {
                let selection_vector = self
                    .engine
                    .load_selection_vector(&self.table_root, descriptor)
                    .await
                    .and_then(|sv| KernelHandle::try_new(sv, "selection vector"))
                    .map_err(|e| decode_error(e.to_string()))?;
                trace!(
                    file = %file.path,
                    deleted = selection_vector.deleted_count(),
                    "loaded selection vector"
                );
                Some(selection_vector)
            }
        };

        let partition_map = partition_map(state, &file.partition_values).map_err(decode_error)?;

        let metadata = DeltaFileMetaData {
            delta_snapshot_version: file.version,
            file_number,
            selection_vector,
            partition_map,
        };
        Ok((to_host_path(location.as_str()), metadata))
    }
}

/// Serialized partition values of a file keyed by logical column name.
///
/// Values are looked up by physical name, falling back to the logical name,
/// and validated against the column type.
fn partition_map(
    state: &GlobalScanState,
    values: &HashMap<String, Option<String>>,
) -> Result<HashMap<String, Option<String>>, String> {
    state
        .partition_columns
        .iter()
        .map(|name| {
            let field = state
                .logical_schema
                .field(name)
                .or_else(|| state.logical_schema.field_ignore_case(name));
            let physical = match field {
                Some(field) => field
                    .physical_name(state.column_mapping_mode)
                    .map_err(|e| e.to_string())?,
                None => name.as_str(),
            };
            let raw = values
                .get(physical)
                .or_else(|| values.get(name))
                .or_else(|| {
                    values
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(physical))
                        .map(|(_, v)| v)
                })
                .cloned()
                .flatten();
            if let Some(ty) = field.and_then(|f| f.data_type().as_primitive()) {
                Scalar::from_partition_value(raw.as_deref(), ty)
                    .map_err(|e| format!("partition column '{name}': {e}"))?;
            }
            Ok((name.clone(), raw))
        })
        .collect()
}

#[async_trait]
impl MultiFileList for DeltaTableSnapshot {
    fn path(&self) -> &str {
        &self.path
    }

    async fn bind_schema(&self) -> DeltaResult<ArrowSchemaRef> {
        Ok(self.bind()?.arrow_schema.clone())
    }

    async fn get_file(&self, file_number: usize) -> DeltaResult<Option<String>> {
        self.file(file_number).await
    }

    async fn total_file_count(&self) -> DeltaResult<usize> {
        DeltaTableSnapshot::total_file_count(self).await
    }

    async fn expand_result(&self) -> DeltaResult<FileExpandResult> {
        DeltaTableSnapshot::expand_result(self).await
    }

    async fn complex_filter_pushdown(&self, filters: &[Expr]) -> DeltaResult<Option<Arc<Self>>> {
        Ok(DeltaTableSnapshot::complex_filter_pushdown(self, filters)
            .await?
            .map(Arc::new))
    }
}
