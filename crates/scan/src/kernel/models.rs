//! Actions recorded in the Delta log that matter for reading a table.
//!
//! The models are read-only: log lines are deserialized into them and never
//! written back, so only `Deserialize` is derived.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::warn;
use url::Url;

use super::schema::{ColumnMappingMode, StructType};
use crate::{DeltaResult, DeltaTableError};

/// Reader protocol version up to which this crate can read tables.
pub const MAX_SUPPORTED_READER_VERSION: i32 = 3;

const COLUMN_MAPPING_MODE_KEY: &str = "delta.columnMapping.mode";

fn empty_schema_string() -> String {
    warn!("metaData action without schemaString, assuming an empty schema");
    r#"{"type":"struct","fields":[]}"#.to_string()
}

/// The `metaData` action.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Serialized [`StructType`] of the table.
    #[serde(default = "empty_schema_string")]
    pub schema_string: String,
    /// Logical names of the partition columns, in partition order.
    #[serde(default)]
    pub partition_columns: Vec<String>,
    pub created_time: Option<i64>,
    /// Table properties (`delta.*` and user defined).
    #[serde(default)]
    pub configuration: HashMap<String, Option<String>>,
}

impl Metadata {
    /// Parse the logical schema of the table.
    pub fn schema(&self) -> DeltaResult<StructType> {
        Ok(serde_json::from_str(&self.schema_string)?)
    }

    /// Column mapping mode configured for the table.
    pub fn column_mapping_mode(&self) -> DeltaResult<ColumnMappingMode> {
        match self.configuration.get(COLUMN_MAPPING_MODE_KEY) {
            Some(Some(mode)) => mode.parse(),
            _ => Ok(ColumnMappingMode::None),
        }
    }
}

/// The `protocol` action.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    pub min_reader_version: i32,
    pub min_writer_version: i32,
    /// Only present for reader version 3.
    pub reader_features: Option<HashSet<ReaderFeatures>>,
    /// Only present for writer version 7. Writers are out of scope, the names are kept raw.
    pub writer_features: Option<HashSet<String>>,
}

impl Protocol {
    pub fn new(min_reader_version: i32, min_writer_version: i32) -> Self {
        Self {
            min_reader_version,
            min_writer_version,
            reader_features: None,
            writer_features: None,
        }
    }

    pub fn with_reader_features(
        mut self,
        reader_features: impl IntoIterator<Item = impl Into<ReaderFeatures>>,
    ) -> Self {
        self.reader_features = Some(reader_features.into_iter().map(Into::into).collect());
        self
    }

    /// Fail if reading the table needs something this crate does not implement.
    pub fn ensure_read_supported(&self) -> DeltaResult<()> {
        if self.min_reader_version > MAX_SUPPORTED_READER_VERSION {
            return Err(DeltaTableError::UnsupportedReaderFeatures(vec![format!(
                "minReaderVersion {}",
                self.min_reader_version
            )]));
        }
        let mut unsupported = self
            .reader_features
            .iter()
            .flatten()
            .filter(|f| !f.is_supported())
            .map(|f| f.as_ref().to_string())
            .collect::<Vec<_>>();
        if unsupported.is_empty() {
            return Ok(());
        }
        unsupported.sort();
        Err(DeltaTableError::UnsupportedReaderFeatures(unsupported))
    }
}

/// Reader features a table may require.
#[derive(Deserialize, Debug, Clone, Eq, PartialEq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ReaderFeatures {
    ColumnMapping,
    DeletionVectors,
    #[serde(alias = "timestampNtz")]
    TimestampWithoutTimezone,
    V2Checkpoint,
    VacuumProtocolCheck,
    TypeWidening,
    /// Any feature this crate does not know about.
    #[serde(untagged)]
    Other(String),
}

impl ReaderFeatures {
    fn is_supported(&self) -> bool {
        matches!(
            self,
            Self::ColumnMapping
                | Self::DeletionVectors
                | Self::TimestampWithoutTimezone
                | Self::VacuumProtocolCheck
                | Self::TypeWidening
        )
    }
}

impl AsRef<str> for ReaderFeatures {
    fn as_ref(&self) -> &str {
        match self {
            Self::ColumnMapping => "columnMapping",
            Self::DeletionVectors => "deletionVectors",
            Self::TimestampWithoutTimezone => "timestampNtz",
            Self::V2Checkpoint => "v2Checkpoint",
            Self::VacuumProtocolCheck => "vacuumProtocolCheck",
            Self::TypeWidening => "typeWidening",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for ReaderFeatures {
    fn from(value: &str) -> Self {
        match value {
            "columnMapping" => Self::ColumnMapping,
            "deletionVectors" => Self::DeletionVectors,
            "timestampNtz" => Self::TimestampWithoutTimezone,
            "v2Checkpoint" => Self::V2Checkpoint,
            "vacuumProtocolCheck" => Self::VacuumProtocolCheck,
            "typeWidening" => Self::TypeWidening,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Where the bytes of a deletion vector live.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StorageType {
    /// `deletion_vector_<uuid>.bin` next to the table data, optionally under a
    /// random directory prefix.
    #[serde(rename = "u")]
    #[default]
    UuidRelativePath,
    /// z85 encoded bitmap in the log itself.
    #[serde(rename = "i")]
    Inline,
    #[serde(rename = "p")]
    AbsolutePath,
}

impl AsRef<str> for StorageType {
    fn as_ref(&self) -> &str {
        match self {
            Self::UuidRelativePath => "u",
            Self::Inline => "i",
            Self::AbsolutePath => "p",
        }
    }
}

/// Reference to the deletion vector of a data file.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeletionVectorDescriptor {
    pub storage_type: StorageType,
    /// Encoded uuid (with its prefix), z85 payload or absolute path depending
    /// on [`StorageType`].
    pub path_or_inline_dv: String,
    /// Byte offset of the bitmap inside a DV file. `None` for inline vectors.
    pub offset: Option<i32>,
    /// Size of the serialized bitmap before z85 encoding.
    pub size_in_bytes: i32,
    /// Number of deleted rows.
    pub cardinality: i64,
}

/// Length of a z85 encoded uuid.
const ENCODED_UUID_LEN: usize = 20;

impl DeletionVectorDescriptor {
    /// Identity of the vector, used together with the file path to pair
    /// `add` and `remove` actions during replay.
    pub fn unique_id(&self) -> String {
        match self.offset {
            Some(offset) => format!(
                "{}{}@{offset}",
                self.storage_type.as_ref(),
                self.path_or_inline_dv
            ),
            None => format!("{}{}", self.storage_type.as_ref(), self.path_or_inline_dv),
        }
    }

    /// Location of the DV file relative to `table_root`; `None` for inline vectors.
    pub fn absolute_path(&self, table_root: &Url) -> DeltaResult<Option<Url>> {
        let invalid = |what: &str| {
            DeltaTableError::DeletionVector(format!("{what}: {}", self.path_or_inline_dv))
        };
        match self.storage_type {
            StorageType::Inline => Ok(None),
            StorageType::AbsolutePath => Url::parse(&self.path_or_inline_dv)
                .map(Some)
                .map_err(|_| invalid("invalid absolute path")),
            StorageType::UuidRelativePath => {
                let split = self
                    .path_or_inline_dv
                    .len()
                    .checked_sub(ENCODED_UUID_LEN)
                    .filter(|split| self.path_or_inline_dv.is_char_boundary(*split))
                    .ok_or_else(|| invalid("encoded uuid too short"))?;
                let (prefix, encoded) = self.path_or_inline_dv.split_at(split);
                let bytes = z85::decode(encoded).map_err(|_| invalid("malformed uuid"))?;
                let uuid = uuid::Uuid::from_slice(&bytes)
                    .map_err(|err| DeltaTableError::DeletionVector(err.to_string()))?;
                let file_name = format!("deletion_vector_{uuid}.bin");
                let relative = if prefix.is_empty() {
                    file_name
                } else {
                    format!("{prefix}/{file_name}")
                };
                table_root
                    .join(&relative)
                    .map(Some)
                    .map_err(|_| invalid("invalid relative path"))
            }
        }
    }
}

/// The `add` action: a data file that is part of the table.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Add {
    /// Path relative to the table root, or absolute. Percent-decoded on read.
    #[serde(deserialize_with = "decode_path")]
    pub path: String,
    /// Serialized partition values keyed by physical column name.
    #[serde(default)]
    pub partition_values: HashMap<String, Option<String>>,
    pub size: i64,
    #[serde(default)]
    pub modification_time: i64,
    #[serde(default)]
    pub data_change: bool,
    /// JSON encoded [`Stats`].
    pub stats: Option<String>,
    pub deletion_vector: Option<DeletionVectorDescriptor>,
}

impl Add {
    pub fn dv_unique_id(&self) -> Option<String> {
        self.deletion_vector.as_ref().map(|dv| dv.unique_id())
    }

    /// Parse the JSON statistics of this file, if present and well formed.
    pub fn get_stats(&self) -> Option<Stats> {
        let stats = self.stats.as_deref()?;
        match serde_json::from_str(stats) {
            Ok(stats) => Some(stats),
            Err(err) => {
                warn!(path = %self.path, "ignoring malformed file statistics: {err}");
                None
            }
        }
    }
}

/// The `remove` action. Shadows an older `add` of the same path and deletion vector.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Remove {
    #[serde(deserialize_with = "decode_path")]
    pub path: String,
    #[serde(default)]
    pub data_change: bool,
    pub deletion_timestamp: Option<i64>,
    pub deletion_vector: Option<DeletionVectorDescriptor>,
}

impl Remove {
    pub fn dv_unique_id(&self) -> Option<String> {
        self.deletion_vector.as_ref().map(|dv| dv.unique_id())
    }
}

/// Per-file statistics as written into the `stats` field of an add action.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub num_records: i64,
    #[serde(default)]
    pub min_values: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub max_values: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub null_count: HashMap<String, serde_json::Value>,
}

/// One line of a commit file, or one row of a checkpoint.
///
/// Only the actions relevant for reading are kept; everything else
/// (`commitInfo`, `txn`, `cdc`, ...) is ignored during deserialization.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ActionLine {
    pub add: Option<Add>,
    pub remove: Option<Remove>,
    #[serde(rename = "metaData")]
    pub metadata: Option<Metadata>,
    pub protocol: Option<Protocol>,
}

fn decode_path<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    percent_encoding::percent_decode_str(&raw)
        .decode_utf8()
        .map(|path| path.into_owned())
        .map_err(serde::de::Error::custom)
}
