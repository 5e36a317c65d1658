//! Contracts of the generic "read many files as one table" pipeline.
//!
//! A [`MultiFileList`] enumerates the files of a scan, a [`MultiFileReader`]
//! binds the output schema, maps each physical file onto it and completes the
//! chunks read from the files. The Delta implementations live in
//! [`crate::snapshot`] and [`crate::reader`].

use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::{Field, FieldRef, Schema, SchemaRef as ArrowSchemaRef};
use async_trait::async_trait;

use crate::table::MultiFileReaderOptions;
use crate::DeltaResult;

pub mod expr;

pub use expr::{col, filter_batch, lit, Expr, Operator};

/// How expensive it is to enumerate the files of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileExpandResult {
    /// The list is empty.
    NoFiles,
    /// Exactly one file.
    SingleFile,
    /// More than one file, all of them resolved.
    MultipleFiles,
    /// More than one file, further files may still be resolved.
    MultipleFilesUnknownCount,
}

/// Lazily resolved list of the files backing a scan.
#[async_trait]
pub trait MultiFileList: Send + Sync {
    /// Location the list was created from.
    fn path(&self) -> &str;

    /// Logical schema shared by all files.
    async fn bind_schema(&self) -> DeltaResult<ArrowSchemaRef>;

    /// Path of the file with ordinal `file_number`, `None` past the last file.
    async fn get_file(&self, file_number: usize) -> DeltaResult<Option<String>>;

    /// Number of files, resolving all of them.
    async fn total_file_count(&self) -> DeltaResult<usize>;

    /// Classify the list without resolving every file.
    async fn expand_result(&self) -> DeltaResult<FileExpandResult>;

    /// Push `filters` down into file resolution.
    ///
    /// Returns a replacement list when the filters could not be applied to
    /// this one; files this list already returned stay valid.
    async fn complex_filter_pushdown(&self, filters: &[Expr]) -> DeltaResult<Option<Arc<Self>>>;
}

/// Where the values of an output column come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSource {
    /// Read from the physical file column with this name.
    Data(String),
    /// Constant partition value of the file, by logical column name.
    Partition(String),
    /// Path of the file.
    Filename,
    /// Ordinal of the file in the list.
    FileNumber,
    /// Position of the row within its physical file.
    RowNumber,
}

impl ColumnSource {
    /// Whether the column is computed instead of read from the file.
    pub fn is_computed(&self) -> bool {
        !matches!(self, ColumnSource::Data(_))
    }
}

/// One column of the bound output schema.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiFileColumn {
    pub field: FieldRef,
    pub source: ColumnSource,
}

/// Output schema of a multi-file scan.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiFileBindData {
    pub columns: Vec<MultiFileColumn>,
}

impl MultiFileBindData {
    pub fn schema(&self) -> ArrowSchemaRef {
        schema_of(&self.columns)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.field.name() == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.field.name().eq_ignore_ascii_case(name))
            })
    }
}

/// State shared by every file of one scan.
#[derive(Debug, Clone)]
pub struct MultiFileReaderGlobalState {
    /// Columns materialized for every chunk: the projection plus the columns filters need.
    pub columns: Vec<MultiFileColumn>,
    /// Schema of the materialized columns.
    pub schema: ArrowSchemaRef,
    /// Indices into `columns` of the columns handed to the caller.
    pub output_projection: Vec<usize>,
    /// Schema handed to the caller.
    pub output_schema: ArrowSchemaRef,
    /// Filters evaluated on every chunk.
    pub filters: Vec<Expr>,
}

/// Position of each materialized column in a physical file, `None` when the
/// file does not have it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMapping {
    pub file_columns: Vec<Option<usize>>,
}

/// How one materialized column is produced for a specific file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnBinding {
    /// Column of the projected file chunk.
    FromFile(usize),
    /// Absent from the file, filled with nulls.
    Missing,
    /// Computed from the file metadata.
    Computed(ColumnSource),
}

/// Everything needed to read one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReadPlan {
    pub file_number: usize,
    pub path: String,
    /// Root columns of the physical file to read, ascending.
    pub projection: Vec<usize>,
    /// One binding per materialized column.
    pub columns: Vec<ColumnBinding>,
}

/// Reads the files of a [`MultiFileList`] as one table.
#[async_trait]
pub trait MultiFileReader: Send + Sync {
    type FileList: MultiFileList;

    /// Consume a table format specific option.
    ///
    /// Returns `false` for options this reader does not know, leaving them to
    /// the generic option parsing.
    fn parse_option(
        &self,
        key: &str,
        value: &str,
        options: &mut MultiFileReaderOptions,
    ) -> DeltaResult<bool>;

    /// Open the file list for `path`.
    async fn create_file_list(
        &self,
        path: &str,
        options: &MultiFileReaderOptions,
    ) -> DeltaResult<Arc<Self::FileList>>;

    /// Bind the output schema.
    async fn bind(
        &self,
        files: &Self::FileList,
        options: &MultiFileReaderOptions,
    ) -> DeltaResult<MultiFileBindData>;

    /// Derive the state shared by all files from the bound schema.
    fn initialize_global_state(
        &self,
        bind: &MultiFileBindData,
        projection: Option<&[usize]>,
        filters: &[Expr],
    ) -> DeltaResult<MultiFileReaderGlobalState>;

    /// Map the columns of one physical file onto the materialized columns.
    fn create_name_mapping(
        &self,
        global: &MultiFileReaderGlobalState,
        file_path: &str,
        file_schema: &Schema,
    ) -> DeltaResult<NameMapping>;

    /// Decide how every materialized column is produced for one file.
    fn finalize_bind(
        &self,
        global: &MultiFileReaderGlobalState,
        file_number: usize,
        file_path: &str,
        mapping: &NameMapping,
    ) -> DeltaResult<FileReadPlan>;

    /// Complete a chunk read from a file.
    ///
    /// `row_offset` is the position of the chunk's first row within the
    /// physical file. The result may hold fewer rows than `chunk`, or none.
    fn finalize_chunk(
        &self,
        files: &Self::FileList,
        global: &MultiFileReaderGlobalState,
        plan: &FileReadPlan,
        row_offset: u64,
        chunk: RecordBatch,
    ) -> DeltaResult<RecordBatch>;
}

pub(crate) fn schema_of(columns: &[MultiFileColumn]) -> ArrowSchemaRef {
    Arc::new(Schema::new(
        columns
            .iter()
            .map(|c| c.field.clone())
            .collect::<Vec<FieldRef>>(),
    ))
}

pub(crate) fn computed_column(
    name: &str,
    data_type: arrow_schema::DataType,
    nullable: bool,
    source: ColumnSource,
) -> MultiFileColumn {
    MultiFileColumn {
        field: Arc::new(Field::new(name, data_type, nullable)),
        source,
    }
}
