//! The `delta_scan` table function.
//!
//! A [`FunctionRegistry`] maps names to [`TableFunction`]s. Registering
//! [`DeltaScanFunction`] makes Delta tables readable by path:
//!
//! ```rust,no_run
//! # use std::collections::HashMap;
//! # use std::sync::Arc;
//! # use deltalake_scan::*;
//! # async fn run() -> DeltaResult<()> {
//! let registry = FunctionRegistry::default();
//! register_delta_scan(&registry, Arc::new(DefaultEngine::new()));
//! let result = registry
//!     .scan(
//!         DELTA_SCAN_FUNCTION_NAME,
//!         ScanRequest::new("s3://bucket/table").with_option("version", "3"),
//!     )
//!     .await?;
//! let batches = result.collect().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef as ArrowSchemaRef;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::{future, StreamExt, TryStreamExt};
use itertools::Itertools;
use tracing::{debug, instrument};
use url::Url;

use crate::kernel::TableEngineRef;
use crate::multi_file::{
    filter_batch, Expr, FileReadPlan, MultiFileReader, MultiFileReaderGlobalState,
};
use crate::reader::parquet::ParquetFile;
use crate::reader::DeltaMultiFileReader;
use crate::snapshot::DeltaTableSnapshot;
use crate::table::config::ParseResult;
use crate::table::path::to_delta_path;
use crate::table::MultiFileReaderOptions;
use crate::{DeltaResult, DeltaTableError};

/// Name `delta_scan` is registered under.
pub const DELTA_SCAN_FUNCTION_NAME: &str = "delta_scan";

/// Arguments of a table function call.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    /// Location of the table.
    pub path: String,
    /// Named options, keys are case insensitive.
    pub options: HashMap<String, String>,
    /// Filters every returned row satisfies.
    pub filters: Vec<Expr>,
    /// Indices of the bound columns to return, all columns when `None`.
    pub projection: Option<Vec<usize>>,
}

impl ScanRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_filter(mut self, filter: Expr) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_projection(mut self, projection: Vec<usize>) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Rows produced by a table function.
pub struct ScanResult {
    pub schema: ArrowSchemaRef,
    pub stream: BoxStream<'static, DeltaResult<RecordBatch>>,
}

impl std::fmt::Debug for ScanResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanResult")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl ScanResult {
    /// Drain the stream.
    pub async fn collect(self) -> DeltaResult<Vec<RecordBatch>> {
        self.stream.try_collect().await
    }
}

/// A function producing a table.
#[async_trait]
pub trait TableFunction: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn scan(&self, request: ScanRequest) -> DeltaResult<ScanResult>;
}

/// Table functions by name.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, Arc<dyn TableFunction>>,
}

impl FunctionRegistry {
    /// Register `function` under its name, replacing a previous registration.
    pub fn register(&self, function: Arc<dyn TableFunction>) -> Option<Arc<dyn TableFunction>> {
        self.functions
            .insert(function.name().to_ascii_lowercase(), function)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TableFunction>> {
        self.functions
            .get(&name.to_ascii_lowercase())
            .map(|f| f.value().clone())
    }

    /// Names of all registered functions, sorted.
    pub fn names(&self) -> Vec<String> {
        self.functions.iter().map(|f| f.key().clone()).sorted().collect()
    }

    /// Call the function registered as `name`.
    pub async fn scan(&self, name: &str, request: ScanRequest) -> DeltaResult<ScanResult> {
        let function = self
            .get(name)
            .ok_or_else(|| DeltaTableError::generic(format!("Table function '{name}' does not exist")))?;
        function.scan(request).await
    }
}

/// Register `delta_scan` backed by `engine`.
pub fn register_delta_scan(registry: &FunctionRegistry, engine: TableEngineRef) {
    registry.register(Arc::new(DeltaScanFunction::new(engine)));
}

/// Reads a Delta table as the files of its snapshot.
#[derive(Debug, Clone)]
pub struct DeltaScanFunction {
    reader: Arc<DeltaMultiFileReader>,
    settings: HashMap<String, String>,
}

impl DeltaScanFunction {
    pub fn new(engine: TableEngineRef) -> Self {
        Self {
            reader: Arc::new(DeltaMultiFileReader::new(engine)),
            settings: HashMap::new(),
        }
    }

    /// Options applied to every call unless the call sets them itself.
    pub fn with_settings(mut self, settings: HashMap<String, String>) -> Self {
        self.settings = settings;
        self
    }

    fn parse_options(&self, request: &HashMap<String, String>) -> DeltaResult<MultiFileReaderOptions> {
        let mut merged: HashMap<String, String> = self
            .settings
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        merged.extend(request.iter().map(|(k, v)| (k.to_ascii_lowercase(), v.clone())));

        let mut options = MultiFileReaderOptions::default();
        let mut generic = Vec::new();
        for (key, value) in merged {
            if !self.reader.parse_option(&key, &value, &mut options)? {
                generic.push((key, value));
            }
        }
        let parsed: ParseResult<MultiFileReaderOptions> = generic.into_iter().collect();
        parsed.raise_errors()?;
        if let Some(key) = parsed.unparsed.keys().sorted().next() {
            return Err(DeltaTableError::InvalidOption {
                key: key.clone(),
                reason: format!("unknown option for {DELTA_SCAN_FUNCTION_NAME}"),
            });
        }
        Ok(MultiFileReaderOptions {
            custom_options: options.custom_options,
            ..parsed.config
        })
    }
}

#[async_trait]
impl TableFunction for DeltaScanFunction {
    fn name(&self) -> &str {
        DELTA_SCAN_FUNCTION_NAME
    }

    #[instrument(skip_all, fields(path = %request.path))]
    async fn scan(&self, request: ScanRequest) -> DeltaResult<ScanResult> {
        let options = self.parse_options(&request.options)?;

        let files = self.reader.create_file_list(&request.path, &options).await?;
        let bind = self.reader.bind(&files, &options).await?;
        let files = match files.complex_filter_pushdown(&request.filters).await? {
            Some(narrowed) => Arc::new(narrowed),
            None => files,
        };
        let global =
            self.reader
                .initialize_global_state(&bind, request.projection.as_deref(), &request.filters)?;
        debug!(
            version = files.version(),
            columns = global.columns.len(),
            filters = request.filters.len(),
            "starting Delta scan"
        );

        let schema = global.output_schema.clone();
        let context = Arc::new(ScanContext {
            reader: self.reader.clone(),
            files,
            global,
            batch_size: options.batch_size,
        });

        let paths = futures::stream::try_unfold(
            (context.clone(), 0usize),
            |(context, file_number)| async move {
                Ok::<_, DeltaTableError>(context
                    .files
                    .file(file_number)
                    .await?
                    .map(|path| ((file_number, path), (context, file_number + 1))))
            },
        );
        let stream = paths
            .map_ok(move |(file_number, path)| read_file(context.clone(), file_number, path))
            .try_buffered(options.file_concurrency)
            .try_flatten()
            .boxed();

        Ok(ScanResult { schema, stream })
    }
}

struct ScanContext {
    reader: Arc<DeltaMultiFileReader>,
    files: Arc<DeltaTableSnapshot>,
    global: MultiFileReaderGlobalState,
    batch_size: usize,
}

impl ScanContext {
    fn finish_chunk(&self, plan: &FileReadPlan, row_offset: u64, chunk: RecordBatch) -> DeltaResult<RecordBatch> {
        let batch = self
            .reader
            .finalize_chunk(&self.files, &self.global, plan, row_offset, chunk)?;
        let batch = filter_batch(&batch, &self.global.filters)?;
        Ok(batch.project(&self.global.output_projection)?)
    }
}

#[instrument(level = "debug", skip(context))]
async fn read_file(
    context: Arc<ScanContext>,
    file_number: usize,
    path: String,
) -> DeltaResult<BoxStream<'static, DeltaResult<RecordBatch>>> {
    let location = Url::parse(&to_delta_path(&path))?;
    let (store, object_path) = context.files.engine().object_store(&location)?;
    let file = ParquetFile::open(store, object_path).await?;

    let mapping = context
        .reader
        .create_name_mapping(&context.global, &path, file.schema())?;
    let plan = Arc::new(
        context
            .reader
            .finalize_bind(&context.global, file_number, &path, &mapping)?,
    );
    let chunks = file.read(&plan.projection, context.batch_size)?;

    let batches = futures::stream::try_unfold(
        (chunks, 0u64),
        move |(mut chunks, row_offset)| {
            let context = context.clone();
            let plan = plan.clone();
            async move {
                let Some(chunk) = chunks.try_next().await? else {
                    return Ok::<_, DeltaTableError>(None);
                };
                let rows = chunk.num_rows() as u64;
                let batch = context.finish_chunk(&plan, row_offset, chunk)?;
                Ok::<_, DeltaTableError>(Some((batch, (chunks, row_offset + rows))))
            }
        },
    )
    .try_filter(|batch| future::ready(batch.num_rows() > 0))
    .boxed();
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockEngine, MockTable};

    fn function() -> DeltaScanFunction {
        DeltaScanFunction::new(Arc::new(MockEngine::new(MockTable::with_batches(vec![]))))
    }

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_registry() {
        let registry = FunctionRegistry::default();
        register_delta_scan(&registry, Arc::new(crate::DefaultEngine::new()));
        assert_eq!(registry.names(), vec![DELTA_SCAN_FUNCTION_NAME.to_string()]);
        assert!(registry.get("DELTA_SCAN").is_some());
        assert!(registry.get("delta_table").is_none());
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let registry = FunctionRegistry::default();
        let err = registry
            .scan("nope", ScanRequest::new("memory:///t/"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeltaTableError::Generic(_)));
    }

    #[test]
    fn test_parse_options_splits_delta_and_generic() {
        let options = function()
            .parse_options(&options(&[
                ("Version", "1"),
                ("batch_size", "16"),
                ("filename", "true"),
                ("file_row_number", "1"),
            ]))
            .unwrap();
        assert_eq!(options.batch_size, 16);
        assert!(options.filename);
        let config = DeltaMultiFileReader::scan_config(&options).unwrap();
        assert_eq!(config.version, Some(1));
        assert!(config.file_row_number);
    }

    #[test]
    fn test_parse_options_rejects_unknown_and_invalid() {
        let err = function()
            .parse_options(&options(&[("bogus", "1")]))
            .unwrap_err();
        assert!(matches!(err, DeltaTableError::InvalidOption { key, .. } if key == "bogus"));

        let err = function()
            .parse_options(&options(&[("batch_size", "0")]))
            .unwrap_err();
        assert!(matches!(err, DeltaTableError::InvalidOption { key, .. } if key == "batch_size"));

        let err = function()
            .parse_options(&options(&[("version", "-1")]))
            .unwrap_err();
        assert!(matches!(err, DeltaTableError::InvalidOption { key, .. } if key == "version"));
    }

    #[test]
    fn test_call_options_override_settings() {
        let function = function().with_settings(options(&[("BATCH_SIZE", "4"), ("filename", "1")]));
        let options = function
            .parse_options(&options(&[("batch_size", "2")]))
            .unwrap();
        assert_eq!(options.batch_size, 2);
        assert!(options.filename);
    }

    #[tokio::test]
    async fn test_scan_of_empty_table_yields_no_rows() {
        let result = function()
            .scan(ScanRequest::new("memory:///mock/").with_projection(vec![0]))
            .await
            .unwrap();
        assert_eq!(result.schema.fields().len(), 1);
        assert_eq!(result.schema.field(0).name(), "id");
        assert!(result.collect().await.unwrap().is_empty());
    }
}
