//! Reading physical parquet data files.

use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef as ArrowSchemaRef;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::ObjectStore;
use parquet::arrow::async_reader::{ParquetObjectReader, ParquetRecordBatchStreamBuilder};
use parquet::arrow::ProjectionMask;
use tracing::{debug, instrument};

use crate::{DeltaResult, DeltaTableError};

/// An opened parquet file whose footer was read.
pub(crate) struct ParquetFile {
    builder: ParquetRecordBatchStreamBuilder<ParquetObjectReader>,
}

impl ParquetFile {
    #[instrument(level = "debug", skip(store))]
    pub(crate) async fn open(store: Arc<dyn ObjectStore>, path: Path) -> DeltaResult<Self> {
        let reader = ParquetObjectReader::new(store, path);
        let builder = ParquetRecordBatchStreamBuilder::new(reader).await?;
        debug!(
            rows = builder.metadata().file_metadata().num_rows(),
            row_groups = builder.metadata().num_row_groups(),
            "opened parquet file"
        );
        Ok(Self { builder })
    }

    /// Arrow schema of the file.
    pub(crate) fn schema(&self) -> &ArrowSchemaRef {
        self.builder.schema()
    }

    /// Stream the root columns `projection` in chunks of at most `batch_size` rows.
    pub(crate) fn read(
        self,
        projection: &[usize],
        batch_size: usize,
    ) -> DeltaResult<BoxStream<'static, DeltaResult<RecordBatch>>> {
        let mask = ProjectionMask::roots(self.builder.parquet_schema(), projection.iter().copied());
        let stream = self
            .builder
            .with_projection(mask)
            .with_batch_size(batch_size)
            .build()?;
        Ok(stream.map_err(DeltaTableError::from).boxed())
    }
}
