use std::collections::HashMap;
use std::sync::LazyLock;

use arrow_json::LineDelimitedWriter;
use bytes::Bytes;
use futures::TryStreamExt;
use itertools::Itertools;
use object_store::path::Path;
use object_store::{Error as ObjectStoreError, ObjectMeta, ObjectStore};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;
use regex::Regex;
use tracing::{debug, instrument};

use crate::kernel::{ActionLine, Metadata, Protocol};
use crate::{DeltaResult, DeltaTableError};

static CHECKPOINT_FILE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{20})\.checkpoint(?:\.(\d{10})\.(\d{10}))?\.parquet$").unwrap()
});
static DELTA_FILE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{20})\.json$").unwrap());

/// Actions read from checkpoints; everything else in a checkpoint is skipped.
const CHECKPOINT_ACTIONS: [&str; 3] = ["add", "metaData", "protocol"];

/// Recognise `_delta_log` entries by file name.
pub(crate) trait PathExt {
    fn filename(&self) -> Option<&str>;

    /// Version encoded in the zero padded prefix of a log file name.
    fn commit_version(&self) -> Option<i64> {
        self.filename()
            .and_then(|f| f.split_once('.'))
            .and_then(|(name, _)| name.parse().ok())
    }

    fn is_checkpoint_file(&self) -> bool {
        self.filename()
            .map(|name| CHECKPOINT_FILE_PATTERN.is_match(name))
            .unwrap_or(false)
    }

    fn is_commit_file(&self) -> bool {
        self.filename()
            .map(|name| DELTA_FILE_PATTERN.is_match(name))
            .unwrap_or(false)
    }

    /// Part index and part count of a (possibly multi-part) checkpoint file
    fn checkpoint_part(&self) -> Option<(u32, u32)> {
        let caps = CHECKPOINT_FILE_PATTERN.captures(self.filename()?)?;
        match (caps.get(2), caps.get(3)) {
            (Some(part), Some(parts)) => {
                Some((part.as_str().parse().ok()?, parts.as_str().parse().ok()?))
            }
            _ => Some((1, 1)),
        }
    }
}

impl PathExt for Path {
    fn filename(&self) -> Option<&str> {
        self.filename()
    }
}

/// The log files needed to reconstruct one version of a table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LogSegment {
    pub(crate) version: i64,
    /// Commits after the checkpoint, newest first
    pub(crate) commit_files: Vec<ObjectMeta>,
    /// All parts of the checkpoint the segment starts from, ordered by part
    pub(crate) checkpoint_files: Vec<ObjectMeta>,
}

impl LogSegment {
    /// List `_delta_log` below `table_root` and pick the files for `version`
    /// (or the latest version).
    ///
    /// `location` is only used in error messages.
    #[instrument(skip(store))]
    pub(crate) async fn try_new(
        store: &dyn ObjectStore,
        table_root: &Path,
        location: &str,
        version: Option<i64>,
    ) -> DeltaResult<Self> {
        let log_root = table_root.child("_delta_log");
        let files = match store.list(Some(&log_root)).try_collect::<Vec<_>>().await {
            Ok(files) => files,
            Err(ObjectStoreError::NotFound { .. }) => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        let mut commits = HashMap::new();
        let mut checkpoints: HashMap<i64, Vec<ObjectMeta>> = HashMap::new();
        for meta in files {
            let Some(file_version) = meta.location.commit_version() else {
                continue;
            };
            if meta.location.is_commit_file() {
                commits.insert(file_version, meta);
            } else if meta.location.is_checkpoint_file() {
                checkpoints.entry(file_version).or_default().push(meta);
            }
        }

        let latest = commits
            .keys()
            .chain(checkpoints.keys())
            .copied()
            .max()
            .ok_or_else(|| {
                DeltaTableError::engine_open(location, "no Delta log files found in _delta_log")
            })?;
        let version_not_found = |v: i64| DeltaTableError::VersionNotFound {
            path: location.to_string(),
            version: v,
        };

        let target = version.unwrap_or(latest);
        if target < 0 || target > latest {
            return Err(version_not_found(target));
        }

        // newest complete checkpoint at or below the target
        let checkpoint = checkpoints
            .into_iter()
            .filter(|(v, _)| *v <= target)
            .filter_map(|(v, parts)| complete_checkpoint(parts).map(|parts| (v, parts)))
            .max_by_key(|(v, _)| *v);
        let (start, checkpoint_files) = match checkpoint {
            Some((v, parts)) => (v + 1, parts),
            None => (0, Vec::new()),
        };

        let mut commit_files = Vec::with_capacity((target - start + 1).max(0) as usize);
        for v in start..=target {
            match commits.remove(&v) {
                Some(meta) => commit_files.push(meta),
                None => return Err(version_not_found(target)),
            }
        }
        // NOTE: replay consumes commits newest first
        commit_files.reverse();

        debug!(
            version = target,
            commits = commit_files.len(),
            checkpoint_parts = checkpoint_files.len(),
            "resolved log segment"
        );
        Ok(Self {
            version: target,
            commit_files,
            checkpoint_files,
        })
    }

    /// Log files in replay order: commits newest first, then checkpoint parts.
    pub(crate) fn replay_files(&self) -> impl Iterator<Item = &ObjectMeta> {
        self.commit_files.iter().chain(self.checkpoint_files.iter())
    }

    /// Read the newest [`Protocol`] and [`Metadata`] actions of the segment.
    pub(crate) async fn read_metadata(
        &self,
        store: &dyn ObjectStore,
    ) -> DeltaResult<(Option<Protocol>, Option<Metadata>)> {
        let mut maybe_protocol = None;
        let mut maybe_metadata = None;

        for meta in self.replay_files() {
            for action in read_log_file(store, meta).await? {
                if maybe_protocol.is_none() {
                    maybe_protocol = action.protocol;
                }
                if maybe_metadata.is_none() {
                    maybe_metadata = action.metadata;
                }
            }
            if maybe_protocol.is_some() && maybe_metadata.is_some() {
                break;
            }
        }

        Ok((maybe_protocol, maybe_metadata))
    }
}

fn complete_checkpoint(parts: Vec<ObjectMeta>) -> Option<Vec<ObjectMeta>> {
    // a single-part checkpoint wins over parts of a multi-part one
    if let Some(single) = parts
        .iter()
        .find(|p| p.location.checkpoint_part() == Some((1, 1)))
    {
        return Some(vec![single.clone()]);
    }
    let by_count = parts
        .into_iter()
        .filter_map(|p| p.location.checkpoint_part().map(|(i, n)| (n, i, p)))
        .into_group_map_by(|(n, _, _)| *n);
    by_count
        .into_iter()
        .filter(|(n, members)| members.len() == *n as usize)
        .max_by_key(|(n, _)| *n)
        .map(|(_, members)| {
            members
                .into_iter()
                .sorted_by_key(|(_, i, _)| *i)
                .map(|(_, _, p)| p)
                .collect()
        })
}

/// Read all actions stored in one commit or checkpoint file.
pub(crate) async fn read_log_file(
    store: &dyn ObjectStore,
    meta: &ObjectMeta,
) -> DeltaResult<Vec<ActionLine>> {
    let bytes = store.get(&meta.location).await?.bytes().await?;
    let version = meta.location.commit_version().unwrap_or(-1);
    if meta.location.is_checkpoint_file() {
        read_checkpoint_actions(bytes, version)
    } else {
        read_commit_actions(&bytes, version)
    }
}

/// Parse the newline delimited actions of a commit file.
pub(crate) fn read_commit_actions(bytes: &[u8], version: i64) -> DeltaResult<Vec<ActionLine>> {
    let content = std::str::from_utf8(bytes)
        .map_err(|err| DeltaTableError::generic(format!("commit {version} is not utf-8: {err}")))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<ActionLine>(line).map_err(|json_err| {
                DeltaTableError::InvalidJsonLog {
                    json_err,
                    line: line.to_string(),
                    version,
                }
            })
        })
        .collect()
}

/// Read the actions of a parquet checkpoint part.
///
/// Rows are rendered as JSON and decoded with the same action model as commits.
pub(crate) fn read_checkpoint_actions(bytes: Bytes, version: i64) -> DeltaResult<Vec<ActionLine>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
    let roots = builder
        .schema()
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| CHECKPOINT_ACTIONS.contains(&f.name().as_str()))
        .map(|(idx, _)| idx)
        .collect_vec();
    let mask = ProjectionMask::roots(builder.parquet_schema(), roots);
    let reader = builder.with_projection(mask).build()?;

    let mut actions = Vec::new();
    for batch in reader {
        let batch = batch?;
        let mut writer = LineDelimitedWriter::new(Vec::new());
        writer.write(&batch)?;
        writer.finish()?;
        let json = writer.into_inner();
        actions.extend(read_commit_actions(&json, version)?);
    }
    Ok(actions)
}
