//! Default [`TableEngine`] reading the Delta log through `object_store`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use object_store::path::Path;
use object_store::{Error as ObjectStoreError, ObjectStore};
use tracing::{debug, instrument, warn};
use url::{Position, Url};

use crate::kernel::arrow::{logical_arrow_schema, physical_arrow_schema};
use crate::kernel::deletion_vector::{decode_from_file, decode_inline};
use crate::kernel::{
    ColumnMappingMode, DeletionVectorDescriptor, EngineScan, EngineSnapshot, GlobalScanState,
    KernelResource, Metadata, Protocol, ScanDataIterator, ScanPredicate, SelectionVector,
    StructType, TableEngine,
};
use crate::{DeltaResult, DeltaTableError};

pub(crate) mod log_segment;
mod replay;

use log_segment::LogSegment;
use replay::LogReplayIterator;

/// Table engine replaying the Delta log stored in any `object_store` backend.
///
/// Object stores are created from the table URL on first use and cached per
/// scheme and authority, so all tables on one bucket share a client.
#[derive(Debug, Default)]
pub struct DefaultEngine {
    storage_options: HashMap<String, String>,
    stores: DashMap<String, Arc<dyn ObjectStore>>,
}

impl DefaultEngine {
    /// Create an engine without storage options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine passing `options` to every object store it builds.
    pub fn with_storage_options(options: HashMap<String, String>) -> Self {
        Self {
            storage_options: options,
            stores: DashMap::new(),
        }
    }

    /// Use `store` for every table whose URL shares scheme and authority with `url`.
    pub fn with_object_store(self, url: &Url, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(store_key(url), store);
        self
    }
}

fn store_key(url: &Url) -> String {
    url[..Position::BeforePath].to_string()
}

#[async_trait]
impl TableEngine for DefaultEngine {
    #[instrument(skip(self))]
    async fn open_snapshot(
        &self,
        table_root: &Url,
        version: Option<i64>,
    ) -> DeltaResult<Option<Box<dyn EngineSnapshot>>> {
        let (store, root) = self.object_store(table_root)?;
        let location = table_root.as_str();
        let log_segment = LogSegment::try_new(store.as_ref(), &root, location, version).await?;

        let (protocol, metadata) = log_segment.read_metadata(store.as_ref()).await?;
        let protocol = protocol.ok_or_else(|| {
            DeltaTableError::engine_open(location, "no protocol action found in the log")
        })?;
        let metadata = metadata.ok_or_else(|| {
            DeltaTableError::engine_open(location, "no metaData action found in the log")
        })?;
        protocol.ensure_read_supported()?;

        let schema = metadata.schema().map_err(|err| {
            DeltaTableError::engine_open(location, format!("invalid table schema: {err}"))
        })?;
        let column_mapping_mode = metadata.column_mapping_mode()?;

        debug!(version = log_segment.version, "opened snapshot");
        let data = SnapshotData {
            table_root: table_root.clone(),
            log_segment,
            protocol,
            metadata,
            schema: Arc::new(schema),
            column_mapping_mode,
        };
        Ok(Some(Box::new(DefaultSnapshot {
            store,
            data: Arc::new(data),
        })))
    }

    #[instrument(skip(self, descriptor), fields(dv = %descriptor.unique_id()))]
    async fn load_selection_vector(
        &self,
        table_root: &Url,
        descriptor: &DeletionVectorDescriptor,
    ) -> DeltaResult<Option<Box<SelectionVector>>> {
        let deleted = match descriptor.absolute_path(table_root)? {
            None => decode_inline(descriptor)?,
            Some(location) => {
                let (store, path) = self.object_store(&location)?;
                let bytes = store.get(&path).await?.bytes().await?;
                decode_from_file(descriptor, &bytes)?
            }
        };
        if deleted.len() as i64 != descriptor.cardinality {
            warn!(
                expected = descriptor.cardinality,
                actual = deleted.len(),
                "deletion vector cardinality does not match its descriptor"
            );
        }
        Ok(Some(Box::new(SelectionVector::from_deleted(deleted))))
    }

    fn object_store(&self, url: &Url) -> DeltaResult<(Arc<dyn ObjectStore>, Path)> {
        let path = Path::from_url_path(url.path()).map_err(ObjectStoreError::from)?;
        let key = store_key(url);
        if let Some(store) = self.stores.get(&key) {
            return Ok((store.value().clone(), path));
        }
        let (store, _) = object_store::parse_url_opts(url, self.storage_options.iter())?;
        let store: Arc<dyn ObjectStore> = Arc::from(store);
        debug!(store = %key, "created object store");
        self.stores.insert(key, store.clone());
        Ok((store, path))
    }
}

/// Everything resolved when a snapshot is opened.
#[derive(Debug)]
pub(crate) struct SnapshotData {
    pub(crate) table_root: Url,
    pub(crate) log_segment: LogSegment,
    pub(crate) protocol: Protocol,
    pub(crate) metadata: Metadata,
    pub(crate) schema: Arc<StructType>,
    pub(crate) column_mapping_mode: ColumnMappingMode,
}

/// Snapshot handed out by [`DefaultEngine`].
#[derive(Debug)]
pub struct DefaultSnapshot {
    store: Arc<dyn ObjectStore>,
    data: Arc<SnapshotData>,
}

impl DefaultSnapshot {
    /// Protocol action in effect at this version.
    pub fn protocol(&self) -> &Protocol {
        &self.data.protocol
    }

    /// Metadata action in effect at this version.
    pub fn metadata(&self) -> &Metadata {
        &self.data.metadata
    }
}

impl KernelResource for DefaultSnapshot {
    fn kind(&self) -> &'static str {
        "snapshot"
    }
}

impl EngineSnapshot for DefaultSnapshot {
    fn version(&self) -> i64 {
        self.data.log_segment.version
    }

    fn table_root(&self) -> &Url {
        &self.data.table_root
    }

    fn schema(&self) -> &StructType {
        &self.data.schema
    }

    fn partition_columns(&self) -> &[String] {
        &self.data.metadata.partition_columns
    }

    fn column_mapping_mode(&self) -> ColumnMappingMode {
        self.data.column_mapping_mode
    }

    fn build_scan(
        &self,
        predicate: Option<ScanPredicate>,
    ) -> DeltaResult<Option<Box<dyn EngineScan>>> {
        let global_state = GlobalScanState {
            table_root: self.data.table_root.clone(),
            logical_schema: self.data.schema.clone(),
            logical_arrow_schema: logical_arrow_schema(&self.data.schema)?,
            physical_arrow_schema: physical_arrow_schema(
                &self.data.schema,
                self.data.column_mapping_mode,
            )?,
            partition_columns: self.data.metadata.partition_columns.clone(),
            column_mapping_mode: self.data.column_mapping_mode,
        };
        debug!(
            version = self.version(),
            predicate = ?predicate.as_ref().map(|p| p.to_string()),
            "built scan"
        );
        Ok(Some(Box::new(DefaultScan {
            store: self.store.clone(),
            data: self.data.clone(),
            predicate,
            global_state,
        })))
    }
}

/// Scan handed out by [`DefaultSnapshot`].
#[derive(Debug)]
pub struct DefaultScan {
    store: Arc<dyn ObjectStore>,
    data: Arc<SnapshotData>,
    predicate: Option<ScanPredicate>,
    global_state: GlobalScanState,
}

impl KernelResource for DefaultScan {
    fn kind(&self) -> &'static str {
        "scan"
    }
}

impl EngineScan for DefaultScan {
    fn global_scan_state(&self) -> DeltaResult<Option<Box<GlobalScanState>>> {
        Ok(Some(Box::new(self.global_state.clone())))
    }

    fn scan_data(&self) -> DeltaResult<Option<Box<dyn ScanDataIterator>>> {
        Ok(Some(Box::new(LogReplayIterator::new(
            self.store.clone(),
            self.data.clone(),
            self.predicate.clone(),
        ))))
    }
}
