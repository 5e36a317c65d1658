use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use object_store::ObjectStore;
use tracing::{debug, instrument, trace};

use super::log_segment::{read_log_file, PathExt};
use super::SnapshotData;
use crate::kernel::{
    Add, FileSkippingView, KernelResource, ScanDataIterator, ScanFile, ScanPredicate, Stats,
};
use crate::DeltaResult;

/// Key identifying one logical file: its path plus the deletion vector applied to it.
type FileKey = (String, Option<String>);

/// Lazy newest-first replay of a log segment.
///
/// Every call to [`ScanDataIterator::next_batch`] reads exactly one log file
/// (a commit, or one checkpoint part) and returns the files it adds that are
/// still part of the snapshot and may match the scan predicate.
pub(crate) struct LogReplayIterator {
    store: Arc<dyn ObjectStore>,
    snapshot: Arc<SnapshotData>,
    predicate: Option<ScanPredicate>,
    next_file: usize,
    seen: HashSet<FileKey>,
}

impl LogReplayIterator {
    pub(crate) fn new(
        store: Arc<dyn ObjectStore>,
        snapshot: Arc<SnapshotData>,
        predicate: Option<ScanPredicate>,
    ) -> Self {
        Self {
            store,
            snapshot,
            predicate,
            next_file: 0,
            seen: HashSet::new(),
        }
    }

    fn may_match(&self, add: &Add, stats: Option<&Stats>) -> bool {
        let Some(predicate) = &self.predicate else {
            return true;
        };
        let view = FileSkippingView {
            schema: &self.snapshot.schema,
            partition_columns: &self.snapshot.metadata.partition_columns,
            column_mapping_mode: self.snapshot.column_mapping_mode,
            partition_values: &add.partition_values,
            stats,
        };
        predicate.may_match(&view)
    }
}

#[async_trait]
impl ScanDataIterator for LogReplayIterator {
    #[instrument(level = "debug", skip_all)]
    async fn next_batch(&mut self) -> DeltaResult<Option<Vec<ScanFile>>> {
        let segment = &self.snapshot.log_segment;
        let Some(meta) = segment.replay_files().nth(self.next_file).cloned() else {
            return Ok(None);
        };
        self.next_file += 1;

        let is_checkpoint = meta.location.is_checkpoint_file();
        let version = meta.location.commit_version().unwrap_or(segment.version);
        let actions = read_log_file(self.store.as_ref(), &meta).await?;

        let mut batch = Vec::new();
        let mut new_keys = Vec::new();
        for action in &actions {
            if let Some(add) = &action.add {
                let key = (add.path.clone(), add.dv_unique_id());
                if self.seen.contains(&key) {
                    continue;
                }
                new_keys.push(key);
                let stats = add.get_stats();
                if !self.may_match(add, stats.as_ref()) {
                    trace!(path = %add.path, "skipping file excluded by predicate");
                    continue;
                }
                batch.push(ScanFile {
                    path: add.path.clone(),
                    size: add.size,
                    partition_values: add.partition_values.clone(),
                    deletion_vector: add.deletion_vector.clone(),
                    version,
                    num_records: stats.map(|s| s.num_records),
                });
            }
        }
        // removes in checkpoints are tombstones of files that are already gone
        if !is_checkpoint {
            new_keys.extend(
                actions
                    .iter()
                    .filter_map(|a| a.remove.as_ref())
                    .map(|r| (r.path.clone(), r.dv_unique_id())),
            );
        }
        self.seen.extend(new_keys);

        debug!(
            table = %self.snapshot.table_root,
            version,
            files = batch.len(),
            checkpoint = is_checkpoint,
            "replayed log file"
        );
        Ok(Some(batch))
    }
}

impl KernelResource for LogReplayIterator {
    fn kind(&self) -> &'static str {
        "scan data iterator"
    }

    fn release(&mut self) {
        self.seen.clear();
        self.next_file = usize::MAX;
    }
}
