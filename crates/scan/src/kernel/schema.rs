//! Serde model of the schema stored in `metaData.schemaString`.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{DeltaResult, DeltaTableError};

/// Value of a field metadata entry.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(untagged)]
pub enum MetadataValue {
    Number(i64),
    String(String),
    /// Anything else, kept as raw JSON.
    Other(serde_json::Value),
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

/// Field metadata keys used by column mapping.
#[derive(Debug)]
pub enum ColumnMetadataKey {
    ColumnMappingId,
    ColumnMappingPhysicalName,
}

impl AsRef<str> for ColumnMetadataKey {
    fn as_ref(&self) -> &str {
        match self {
            Self::ColumnMappingId => "delta.columnMapping.id",
            Self::ColumnMappingPhysicalName => "delta.columnMapping.physicalName",
        }
    }
}

/// Column mapping mode configured through the `delta.columnMapping.mode` table property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnMappingMode {
    /// Data files use the logical column names.
    #[default]
    None,
    /// Data files use the physical names stored in the field metadata.
    Name,
    /// Data files are matched by field id; physical names are still recorded.
    Id,
}

impl std::str::FromStr for ColumnMappingMode {
    type Err = DeltaTableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "name" => Ok(Self::Name),
            "id" => Ok(Self::Id),
            other => Err(DeltaTableError::generic(format!(
                "Invalid column mapping mode: {other}"
            ))),
        }
    }
}

/// A column of a [`StructType`].
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct StructField {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub nullable: bool,
    #[serde(default)]
    pub metadata: HashMap<String, MetadataValue>,
}

impl StructField {
    pub fn new(name: impl Into<String>, data_type: impl Into<DataType>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            metadata: HashMap::default(),
        }
    }

    pub fn with_metadata(
        mut self,
        metadata: impl IntoIterator<Item = (impl Into<String>, impl Into<MetadataValue>)>,
    ) -> Self {
        self.metadata = metadata
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    #[inline]
    pub fn name(&self) -> &String {
        &self.name
    }

    #[inline]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    #[inline]
    pub const fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Name of the column inside data files, partition value maps and statistics.
    ///
    /// Without column mapping this is the logical name; fields that predate the
    /// mapping keep their logical name too.
    pub fn physical_name(&self, mode: ColumnMappingMode) -> DeltaResult<&str> {
        if mode == ColumnMappingMode::None {
            return Ok(&self.name);
        }
        match self
            .metadata
            .get(ColumnMetadataKey::ColumnMappingPhysicalName.as_ref())
        {
            None => Ok(&self.name),
            Some(MetadataValue::String(s)) => Ok(s),
            Some(_) => Err(DeltaTableError::generic(format!(
                "physical name of column {} is not a string",
                self.name
            ))),
        }
    }
}

/// The table schema, or a nested struct column.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct StructType {
    #[serde(rename = "type")]
    pub type_name: String,
    pub fields: Vec<StructField>,
}

impl StructType {
    pub fn new(fields: Vec<StructField>) -> Self {
        Self {
            type_name: "struct".into(),
            fields,
        }
    }

    pub fn fields(&self) -> &[StructField] {
        &self.fields
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Look up a field ignoring ASCII case, preferring an exact match.
    pub fn field_ignore_case(&self, name: &str) -> Option<&StructField> {
        self.field(name).or_else(|| {
            self.fields
                .iter()
                .find(|f| f.name().eq_ignore_ascii_case(name))
        })
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ArrayType {
    #[serde(rename = "type")]
    pub type_name: String,
    pub element_type: DataType,
    pub contains_null: bool,
}

impl ArrayType {
    pub fn new(element_type: DataType, contains_null: bool) -> Self {
        Self {
            type_name: "array".into(),
            element_type,
            contains_null,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MapType {
    #[serde(rename = "type")]
    pub type_name: String,
    pub key_type: DataType,
    pub value_type: DataType,
    /// Absent in some older logs, where values were always nullable.
    #[serde(default = "value_contains_null_default")]
    pub value_contains_null: bool,
}

impl MapType {
    pub fn new(key_type: DataType, value_type: DataType, value_contains_null: bool) -> Self {
        Self {
            type_name: "map".into(),
            key_type,
            value_type,
            value_contains_null,
        }
    }
}

fn value_contains_null_default() -> bool {
    true
}

/// Non-nested column types.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    String,
    /// i64
    Long,
    /// i32
    Integer,
    /// i16
    Short,
    /// i8
    Byte,
    Float,
    Double,
    Boolean,
    Binary,
    /// Days since the epoch.
    Date,
    /// Microseconds since the epoch, UTC.
    Timestamp,
    /// Microseconds since the epoch, no timezone.
    TimestampNtz,
    /// `decimal(precision,scale)`
    #[serde(deserialize_with = "deserialize_decimal", untagged)]
    Decimal(u8, i8),
}

fn deserialize_decimal<'de, D>(deserializer: D) -> Result<(u8, i8), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let invalid = || serde::de::Error::custom(format!("invalid decimal type: {raw}"));
    let (precision, scale) = raw
        .strip_prefix("decimal(")
        .and_then(|rest| rest.strip_suffix(')'))
        .and_then(|args| args.split_once(','))
        .ok_or_else(invalid)?;
    let precision = precision.trim().parse::<u8>().map_err(|_| invalid())?;
    let scale = scale.trim().parse::<i8>().map_err(|_| invalid())?;
    Ok((precision, scale))
}

impl Display for PrimitiveType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Long => "long",
            Self::Integer => "integer",
            Self::Short => "short",
            Self::Byte => "byte",
            Self::Float => "float",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Binary => "binary",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::TimestampNtz => "timestamp_ntz",
            Self::Decimal(precision, scale) => {
                return write!(f, "decimal({precision},{scale})");
            }
        };
        f.write_str(name)
    }
}

/// Type of a column, as serialized in the schema string.
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(untagged)]
pub enum DataType {
    Primitive(PrimitiveType),
    Array(Box<ArrayType>),
    Struct(Box<StructType>),
    Map(Box<MapType>),
}

impl From<PrimitiveType> for DataType {
    fn from(value: PrimitiveType) -> Self {
        DataType::Primitive(value)
    }
}

impl DataType {
    pub fn as_primitive(&self) -> Option<&PrimitiveType> {
        match self {
            DataType::Primitive(p) => Some(p),
            _ => None,
        }
    }
}
