//! Conversions from kernel schema types to arrow schema types.

use std::sync::Arc;

use arrow_schema::{
    ArrowError, DataType as ArrowDataType, Field as ArrowField, Fields, Schema as ArrowSchema,
    SchemaRef as ArrowSchemaRef, TimeUnit,
};

use super::schema::{
    ArrayType, ColumnMappingMode, DataType, MapType, PrimitiveType, StructField, StructType,
};

impl TryFrom<&StructType> for ArrowSchema {
    type Error = ArrowError;

    fn try_from(s: &StructType) -> Result<Self, ArrowError> {
        let fields = s
            .fields()
            .iter()
            .map(<ArrowField as TryFrom<&StructField>>::try_from)
            .collect::<Result<Vec<ArrowField>, ArrowError>>()?;

        Ok(ArrowSchema::new(fields))
    }
}

impl TryFrom<&StructField> for ArrowField {
    type Error = ArrowError;

    fn try_from(f: &StructField) -> Result<Self, ArrowError> {
        let metadata = f
            .metadata
            .iter()
            .map(|(key, val)| match val {
                super::schema::MetadataValue::String(s) => Ok((key.clone(), s.clone())),
                other => Ok((key.clone(), serde_json::to_string(other)?)),
            })
            .collect::<Result<_, serde_json::Error>>()
            .map_err(|err| ArrowError::JsonError(err.to_string()))?;

        let field = ArrowField::new(
            f.name(),
            ArrowDataType::try_from(f.data_type())?,
            f.is_nullable(),
        )
        .with_metadata(metadata);

        Ok(field)
    }
}

impl TryFrom<&ArrayType> for ArrowField {
    type Error = ArrowError;

    fn try_from(a: &ArrayType) -> Result<Self, ArrowError> {
        Ok(ArrowField::new(
            "item",
            ArrowDataType::try_from(&a.element_type)?,
            a.contains_null,
        ))
    }
}

impl TryFrom<&MapType> for ArrowField {
    type Error = ArrowError;

    fn try_from(a: &MapType) -> Result<Self, ArrowError> {
        Ok(ArrowField::new(
            "entries",
            ArrowDataType::Struct(
                vec![
                    ArrowField::new("key", ArrowDataType::try_from(&a.key_type)?, false),
                    ArrowField::new(
                        "value",
                        ArrowDataType::try_from(&a.value_type)?,
                        a.value_contains_null,
                    ),
                ]
                .into(),
            ),
            false, // always non-null
        ))
    }
}

impl TryFrom<&DataType> for ArrowDataType {
    type Error = ArrowError;

    fn try_from(t: &DataType) -> Result<Self, ArrowError> {
        match t {
            DataType::Primitive(p) => Ok(ArrowDataType::from(*p)),
            DataType::Struct(s) => Ok(ArrowDataType::Struct(
                s.fields()
                    .iter()
                    .map(<ArrowField as TryFrom<&StructField>>::try_from)
                    .collect::<Result<Vec<ArrowField>, ArrowError>>()?
                    .into(),
            )),
            DataType::Array(a) => Ok(ArrowDataType::List(Arc::new(
                <ArrowField as TryFrom<&ArrayType>>::try_from(a.as_ref())?,
            ))),
            DataType::Map(m) => Ok(ArrowDataType::Map(
                Arc::new(<ArrowField as TryFrom<&MapType>>::try_from(m.as_ref())?),
                false,
            )),
        }
    }
}

impl From<PrimitiveType> for ArrowDataType {
    fn from(p: PrimitiveType) -> Self {
        match p {
            PrimitiveType::String => ArrowDataType::Utf8,
            PrimitiveType::Long => ArrowDataType::Int64, // undocumented type
            PrimitiveType::Integer => ArrowDataType::Int32,
            PrimitiveType::Short => ArrowDataType::Int16,
            PrimitiveType::Byte => ArrowDataType::Int8,
            PrimitiveType::Float => ArrowDataType::Float32,
            PrimitiveType::Double => ArrowDataType::Float64,
            PrimitiveType::Boolean => ArrowDataType::Boolean,
            PrimitiveType::Binary => ArrowDataType::Binary,
            PrimitiveType::Decimal(precision, scale) => {
                ArrowDataType::Decimal128(precision, scale)
            }
            PrimitiveType::Date => {
                // A calendar date, represented as a year-month-day triple without a
                // timezone. Stored as 4 bytes integer representing days since 1970-01-01
                ArrowDataType::Date32
            }
            PrimitiveType::Timestamp => {
                // Issue: https://github.com/delta-io/delta/issues/643
                ArrowDataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
            }
            PrimitiveType::TimestampNtz => ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }
}

/// Arrow schema of the fields as they are named inside the data files.
///
/// Field metadata is dropped; only names, types and nullability survive.
pub(crate) fn physical_arrow_schema(
    schema: &StructType,
    mode: ColumnMappingMode,
) -> Result<ArrowSchemaRef, ArrowError> {
    let fields = schema
        .fields()
        .iter()
        .map(|f| {
            let name = f
                .physical_name(mode)
                .map_err(|e| ArrowError::SchemaError(e.to_string()))?;
            Ok(ArrowField::new(
                name,
                ArrowDataType::try_from(f.data_type())?,
                f.is_nullable(),
            ))
        })
        .collect::<Result<Fields, ArrowError>>()?;
    Ok(Arc::new(ArrowSchema::new(fields)))
}

/// Arrow schema of the logical table columns, without Delta field metadata.
pub(crate) fn logical_arrow_schema(schema: &StructType) -> Result<ArrowSchemaRef, ArrowError> {
    let fields = schema
        .fields()
        .iter()
        .map(|f| {
            Ok(ArrowField::new(
                f.name(),
                ArrowDataType::try_from(f.data_type())?,
                f.is_nullable(),
            ))
        })
        .collect::<Result<Fields, ArrowError>>()?;
    Ok(Arc::new(ArrowSchema::new(fields)))
}
