//! Exceptions for the deltalake-scan crate
use object_store::Error as ObjectStoreError;

/// A result returned by deltalake-scan
pub type DeltaResult<T, E = DeltaTableError> = Result<T, E>;

/// Delta table scan specific error
#[allow(missing_docs)]
#[derive(thiserror::Error, Debug)]
pub enum DeltaTableError {
    /// The location does not hold a Delta table the engine can open.
    #[error("Failed to open Delta table at {path}: {reason}")]
    EngineOpen { path: String, reason: String },

    /// The requested version is not (or no longer) retained by the log.
    #[error("Version {version} of Delta table at {path} is not available in the log")]
    VersionNotFound { path: String, version: i64 },

    /// Predicates were pushed down after the scan had already been built.
    #[error("Scan of Delta table at {path} is already finalized, predicates can not be pushed down again")]
    ScanAlreadyFinalized { path: String },

    /// A pulled file record carried a corrupt selection vector or partition value.
    #[error("Failed to decode metadata of file {file} in Delta table at {path} (version {version}): {reason}")]
    MetadataDecode {
        path: String,
        file: String,
        version: i64,
        reason: String,
    },

    /// The columns of a physical file can not be mapped onto the table schema.
    #[error("Cannot map columns of file {file} to the table schema: {reason}")]
    SchemaMismatch { file: String, reason: String },

    /// The table engine handed out an empty handle.
    #[error("Table engine returned no {0} handle")]
    NullHandle(&'static str),

    /// Error returned when the table location is invalid.
    #[error("Invalid table location: {0}")]
    InvalidTableLocation(String),

    /// Error returned when the log record has an invalid JSON.
    #[error("Invalid JSON in log record, version={version}, line=`{line}`, err=`{json_err}`")]
    InvalidJsonLog {
        /// JSON error details returned when parsing the record JSON.
        json_err: serde_json::error::Error,
        /// invalid log entry content.
        line: String,
        /// corresponding table version for the log file.
        version: i64,
    },

    /// Error returned when a scan option can not be parsed.
    #[error("Invalid value for scan option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    /// The table requires reader features this crate does not implement.
    #[error("Unsupported reader features required by table: {0:?}")]
    UnsupportedReaderFeatures(Vec<String>),

    /// Error returned when a deletion vector can not be read.
    #[error("Deletion vector error: {0}")]
    DeletionVector(String),

    /// Error returned when reading the delta log object failed.
    #[error("Failed to read delta log object: {}", .source)]
    ObjectStore {
        /// Storage error details when reading the delta log object failed.
        #[from]
        source: ObjectStoreError,
    },

    /// Error returned when reading parquet data or checkpoints failed.
    #[error("Failed to parse parquet: {}", .source)]
    Parquet {
        /// Parquet error details returned when reading the file failed.
        #[from]
        source: parquet::errors::ParquetError,
    },

    /// Error returned when an arrow computation failed.
    #[error("Arrow error: {}", .source)]
    Arrow {
        /// Arrow error details.
        #[from]
        source: arrow_schema::ArrowError,
    },

    /// Error returned when serializing or deserializing JSON failed.
    #[error("Failed to serialize or deserialize JSON: {}", .source)]
    SerdeJson {
        /// JSON error details.
        #[from]
        source: serde_json::Error,
    },

    /// Error returned when a URL can not be parsed.
    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Generic Delta Table error
    #[error("Generic DeltaTable error: {0}")]
    Generic(String),
}

impl DeltaTableError {
    /// Create a new [`DeltaTableError::Generic`]
    pub fn generic(msg: impl ToString) -> Self {
        Self::Generic(msg.to_string())
    }

    /// Create a new [`DeltaTableError::EngineOpen`]
    pub fn engine_open(path: impl ToString, reason: impl ToString) -> Self {
        Self::EngineOpen {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a new [`DeltaTableError::SchemaMismatch`]
    pub fn schema_mismatch(file: impl ToString, reason: impl ToString) -> Self {
        Self::SchemaMismatch {
            file: file.to_string(),
            reason: reason.to_string(),
        }
    }
}
