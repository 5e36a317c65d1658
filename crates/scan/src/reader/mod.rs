//! Row reconciliation for Delta scans.
//!
//! [`DeltaMultiFileReader`] plugs a [`DeltaTableSnapshot`] into the generic
//! multi-file pipeline: partition values become constant columns, the file
//! and row ordinals are exposed as provenance columns, and rows hidden by a
//! deletion vector are dropped before a chunk leaves the reader.

use std::sync::Arc;

use arrow_array::{
    new_null_array, ArrayRef, Int64Array, RecordBatch, RecordBatchOptions, StringArray,
    UInt64Array,
};
use arrow_cast::{can_cast_types, cast};
use arrow_schema::{DataType, Schema};
use arrow_select::filter::filter_record_batch;
use async_trait::async_trait;
use tracing::{debug, trace};

use crate::kernel::{PrimitiveType, TableEngineRef};
use crate::multi_file::{
    computed_column, schema_of, ColumnBinding, ColumnSource, Expr, FileReadPlan,
    MultiFileBindData, MultiFileColumn, MultiFileReader, MultiFileReaderGlobalState, NameMapping,
};
use crate::snapshot::DeltaTableSnapshot;
use crate::table::config::{try_parse_impl, TryUpdateKey, FILENAME_COLUMN};
use crate::table::{DeltaScanConfig, MultiFileReaderOptions};
use crate::{DeltaResult, DeltaTableError};

pub(crate) mod parquet;

/// [`MultiFileReader`] over the files of Delta table snapshots.
#[derive(Debug, Clone)]
pub struct DeltaMultiFileReader {
    engine: TableEngineRef,
}

impl DeltaMultiFileReader {
    pub fn new(engine: TableEngineRef) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &TableEngineRef {
        &self.engine
    }

    /// Delta options captured by [`MultiFileReader::parse_option`].
    pub fn scan_config(options: &MultiFileReaderOptions) -> DeltaResult<DeltaScanConfig> {
        let (config, _) = try_parse_impl(&options.custom_options)?;
        Ok(config)
    }
}

#[async_trait]
impl MultiFileReader for DeltaMultiFileReader {
    type FileList = DeltaTableSnapshot;

    fn parse_option(
        &self,
        key: &str,
        value: &str,
        options: &mut MultiFileReaderOptions,
    ) -> DeltaResult<bool> {
        let mut probe = DeltaScanConfig::default();
        match probe.try_update_key(key, value) {
            Ok(Some(())) => {
                options
                    .custom_options
                    .insert(key.to_ascii_lowercase(), value.to_string());
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(err) => Err(DeltaTableError::InvalidOption {
                key: key.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    async fn create_file_list(
        &self,
        path: &str,
        options: &MultiFileReaderOptions,
    ) -> DeltaResult<Arc<DeltaTableSnapshot>> {
        let config = Self::scan_config(options)?;
        let snapshot = DeltaTableSnapshot::open(self.engine.clone(), path, config.version).await?;
        Ok(Arc::new(snapshot))
    }

    async fn bind(
        &self,
        files: &DeltaTableSnapshot,
        options: &MultiFileReaderOptions,
    ) -> DeltaResult<MultiFileBindData> {
        let config = Self::scan_config(options)?;
        let bound = files.bind()?;

        let mut columns = Vec::with_capacity(bound.schema.fields().len() + 3);
        for (field, arrow_field) in bound
            .schema
            .fields()
            .iter()
            .zip(bound.arrow_schema.fields().iter())
        {
            let source = if bound.partition_columns.contains(field.name()) {
                ColumnSource::Partition(field.name().clone())
            } else {
                ColumnSource::Data(field.physical_name(bound.column_mapping_mode)?.to_string())
            };
            columns.push(MultiFileColumn {
                field: arrow_field.clone(),
                source,
            });
        }
        // partition columns without a type in the schema are exposed as strings
        for name in &bound.partition_columns {
            if bound.schema.field(name).is_none() {
                columns.push(computed_column(
                    name,
                    DataType::Utf8,
                    true,
                    ColumnSource::Partition(name.clone()),
                ));
            }
        }

        let mut synthetic = Vec::new();
        if options.filename {
            synthetic.push((FILENAME_COLUMN, DataType::Utf8, ColumnSource::Filename));
        }
        if config.delta_file_number {
            synthetic.push((
                config.delta_file_number_column.as_str(),
                DataType::UInt64,
                ColumnSource::FileNumber,
            ));
        }
        if config.file_row_number {
            synthetic.push((
                config.file_row_number_column.as_str(),
                DataType::Int64,
                ColumnSource::RowNumber,
            ));
        }
        for (name, data_type, source) in synthetic {
            if columns.iter().any(|c| c.field.name().eq_ignore_ascii_case(name)) {
                return Err(DeltaTableError::InvalidOption {
                    key: name.to_string(),
                    reason: format!("column '{name}' already exists in table {}", files.path()),
                });
            }
            columns.push(computed_column(name, data_type, false, source));
        }

        debug!(
            path = files.path(),
            version = files.version(),
            columns = columns.len(),
            "bound Delta scan"
        );
        Ok(MultiFileBindData { columns })
    }

    fn initialize_global_state(
        &self,
        bind: &MultiFileBindData,
        projection: Option<&[usize]>,
        filters: &[Expr],
    ) -> DeltaResult<MultiFileReaderGlobalState> {
        let output: Vec<usize> = match projection {
            Some(projection) => projection.to_vec(),
            None => (0..bind.columns.len()).collect(),
        };
        if let Some(idx) = output.iter().find(|idx| **idx >= bind.columns.len()) {
            return Err(DeltaTableError::generic(format!(
                "Projected column {idx} is out of range, the scan has {} columns",
                bind.columns.len()
            )));
        }

        let mut materialized = output.clone();
        for name in filters.iter().flat_map(|f| f.column_refs()) {
            let idx = bind.index_of(name).ok_or_else(|| {
                DeltaTableError::generic(format!("Filter references unknown column '{name}'"))
            })?;
            if !materialized.contains(&idx) {
                materialized.push(idx);
            }
        }

        let columns: Vec<_> = materialized
            .iter()
            .map(|idx| bind.columns[*idx].clone())
            .collect();
        let output_projection: Vec<usize> = (0..output.len()).collect();
        let schema = schema_of(&columns);
        let output_schema = Arc::new(schema.project(&output_projection)?);
        Ok(MultiFileReaderGlobalState {
            columns,
            schema,
            output_projection,
            output_schema,
            filters: filters.to_vec(),
        })
    }

    fn create_name_mapping(
        &self,
        global: &MultiFileReaderGlobalState,
        file_path: &str,
        file_schema: &Schema,
    ) -> DeltaResult<NameMapping> {
        let file_columns = global
            .columns
            .iter()
            .map(|column| {
                let ColumnSource::Data(physical) = &column.source else {
                    return Ok(None);
                };
                let idx = file_schema.index_of(physical).ok().or_else(|| {
                    file_schema
                        .fields()
                        .iter()
                        .position(|f| f.name().eq_ignore_ascii_case(physical))
                });
                match idx {
                    Some(idx) => {
                        let file_type = file_schema.field(idx).data_type();
                        let expected = column.field.data_type();
                        if file_type != expected && !can_cast_types(file_type, expected) {
                            return Err(DeltaTableError::schema_mismatch(
                                file_path,
                                format!(
                                    "column '{}' has type {file_type}, expected {expected}",
                                    column.field.name()
                                ),
                            ));
                        }
                        Ok(Some(idx))
                    }
                    None if column.field.is_nullable() => Ok(None),
                    None => Err(DeltaTableError::schema_mismatch(
                        file_path,
                        format!(
                            "required column '{}' (physical name '{physical}') is missing",
                            column.field.name()
                        ),
                    )),
                }
            })
            .collect::<DeltaResult<Vec<_>>>()?;
        Ok(NameMapping { file_columns })
    }

    fn finalize_bind(
        &self,
        global: &MultiFileReaderGlobalState,
        file_number: usize,
        file_path: &str,
        mapping: &NameMapping,
    ) -> DeltaResult<FileReadPlan> {
        if mapping.file_columns.len() != global.columns.len() {
            return Err(DeltaTableError::schema_mismatch(
                file_path,
                format!(
                    "name mapping covers {} columns, the scan has {}",
                    mapping.file_columns.len(),
                    global.columns.len()
                ),
            ));
        }
        let mut projection: Vec<usize> = mapping.file_columns.iter().flatten().copied().collect();
        projection.sort_unstable();
        projection.dedup();

        let columns = global
            .columns
            .iter()
            .zip(&mapping.file_columns)
            .map(|(column, file_idx)| match (&column.source, file_idx) {
                (ColumnSource::Data(_), Some(file_idx)) => {
                    ColumnBinding::FromFile(projection.partition_point(|p| p < file_idx))
                }
                (ColumnSource::Data(_), None) => ColumnBinding::Missing,
                (source, _) => ColumnBinding::Computed(source.clone()),
            })
            .collect();

        trace!(file = file_path, ?projection, "finalized file bind");
        Ok(FileReadPlan {
            file_number,
            path: file_path.to_string(),
            projection,
            columns,
        })
    }

    fn finalize_chunk(
        &self,
        files: &DeltaTableSnapshot,
        global: &MultiFileReaderGlobalState,
        plan: &FileReadPlan,
        row_offset: u64,
        chunk: RecordBatch,
    ) -> DeltaResult<RecordBatch> {
        let num_rows = chunk.num_rows();
        let metadata = files.metadata(plan.file_number);

        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(global.columns.len());
        for (column, binding) in global.columns.iter().zip(&plan.columns) {
            let target = column.field.data_type();
            let array: ArrayRef = match binding {
                ColumnBinding::FromFile(idx) => {
                    let array = chunk.column(*idx).clone();
                    if array.data_type() == target {
                        array
                    } else {
                        cast(&array, target)?
                    }
                }
                ColumnBinding::Missing => new_null_array(target, num_rows),
                ColumnBinding::Computed(ColumnSource::Partition(name)) => {
                    let ty = files
                        .bind()?
                        .schema
                        .field(name)
                        .and_then(|f| f.data_type().as_primitive())
                        .cloned()
                        .unwrap_or(PrimitiveType::String);
                    let value = metadata.partition_value(name, &ty).map_err(|err| {
                        DeltaTableError::MetadataDecode {
                            path: files.path().to_string(),
                            file: plan.path.clone(),
                            version: metadata.delta_snapshot_version,
                            reason: err.to_string(),
                        }
                    })?;
                    cast(&value.to_array(num_rows)?, target)?
                }
                ColumnBinding::Computed(ColumnSource::Filename) => Arc::new(
                    StringArray::from_iter_values(std::iter::repeat_n(plan.path.as_str(), num_rows)),
                ),
                ColumnBinding::Computed(ColumnSource::FileNumber) => Arc::new(
                    UInt64Array::from_value(plan.file_number as u64, num_rows),
                ),
                ColumnBinding::Computed(ColumnSource::RowNumber) => Arc::new(
                    Int64Array::from_iter_values(
                        (row_offset..row_offset + num_rows as u64).map(|row| row as i64),
                    ),
                ),
                ColumnBinding::Computed(ColumnSource::Data(name)) => {
                    return Err(DeltaTableError::generic(format!(
                        "column '{name}' must be read from {}",
                        plan.path
                    )))
                }
            };
            arrays.push(array);
        }

        let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
        let batch = RecordBatch::try_new_with_options(global.schema.clone(), arrays, &options)?;

        if !metadata.hides_rows(row_offset, num_rows) {
            return Ok(batch);
        }
        let Some(selection) = &metadata.selection_vector else {
            return Ok(batch);
        };
        let mask = selection.to_filter(row_offset, num_rows);
        let filtered = filter_record_batch(&batch, &mask)?;
        trace!(
            file = %plan.path,
            row_offset,
            removed = num_rows - filtered.num_rows(),
            "applied selection vector"
        );
        Ok(filtered)
    }
}
