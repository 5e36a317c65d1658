use std::sync::Arc;

use arrow_array::{Array, ArrayRef, Int64Array, RecordBatch, StringArray, UInt64Array};
use arrow_ord::sort::{lexsort_to_indices, SortColumn};
use arrow_schema::DataType;
use arrow_select::{concat::concat_batches, take::take};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

/// Batch of `id: long` and `value: string` rows.
pub fn id_value_batch(ids: &[i64]) -> RecordBatch {
    let values: Vec<String> = ids.iter().map(|id| format!("value-{id}")).collect();
    RecordBatch::try_from_iter(vec![
        ("id", Arc::new(Int64Array::from(ids.to_vec())) as ArrayRef),
        ("value", Arc::new(StringArray::from(values)) as ArrayRef),
    ])
    .unwrap()
}

/// Concatenate `batches`, `None` if there are none.
pub fn concat(batches: &[RecordBatch]) -> Option<RecordBatch> {
    let first = batches.first()?;
    Some(concat_batches(&first.schema(), batches).unwrap())
}

pub fn sort_record_batch(batch: RecordBatch) -> TestResult<RecordBatch> {
    // Sort by all columns
    let mut sort_columns = vec![];
    for col in batch.columns() {
        match col.data_type() {
            DataType::Struct(_) | DataType::List(_) | DataType::Map(_, _) => {
                // can't sort structs, lists, or maps
            }
            _ => sort_columns.push(SortColumn {
                values: col.clone(),
                options: None,
            }),
        }
    }
    let indices = lexsort_to_indices(&sort_columns, None)?;
    let columns = batch
        .columns()
        .iter()
        .map(|c| take(c, &indices, None))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}

/// Values of the `Int64` column `name` across `batches`.
pub fn i64_values(batches: &[RecordBatch], name: &str) -> Vec<Option<i64>> {
    batches
        .iter()
        .flat_map(|batch| {
            let column = batch
                .column_by_name(name)
                .unwrap_or_else(|| panic!("no column {name}"));
            let array = column.as_any().downcast_ref::<Int64Array>().unwrap();
            array.iter().collect::<Vec<_>>()
        })
        .collect()
}

/// Values of the `UInt64` column `name` across `batches`.
pub fn u64_values(batches: &[RecordBatch], name: &str) -> Vec<Option<u64>> {
    batches
        .iter()
        .flat_map(|batch| {
            let column = batch
                .column_by_name(name)
                .unwrap_or_else(|| panic!("no column {name}"));
            let array = column.as_any().downcast_ref::<UInt64Array>().unwrap();
            array.iter().collect::<Vec<_>>()
        })
        .collect()
}

/// Values of the `Utf8` column `name` across `batches`.
pub fn string_values(batches: &[RecordBatch], name: &str) -> Vec<Option<String>> {
    batches
        .iter()
        .flat_map(|batch| {
            let column = batch
                .column_by_name(name)
                .unwrap_or_else(|| panic!("no column {name}"));
            let array = column.as_any().downcast_ref::<StringArray>().unwrap();
            array
                .iter()
                .map(|v| v.map(str::to_string))
                .collect::<Vec<_>>()
        })
        .collect()
}
