//! Per-file side metadata collected while a snapshot's file list is resolved.

use std::collections::HashMap;
use std::sync::Arc;

use crate::kernel::{KernelHandle, PrimitiveType, Scalar, SelectionVector};
use crate::DeltaResult;

/// Metadata of one resolved file.
///
/// Entries are written once, when the batch holding the file is pulled from
/// the engine, and only read afterwards.
#[derive(Debug)]
pub struct DeltaFileMetaData {
    /// Version of the commit that added the file.
    pub delta_snapshot_version: i64,
    /// Ordinal of the file in resolution order.
    pub file_number: usize,
    /// Rows hidden by a deletion vector, `None` when every row is visible.
    pub selection_vector: Option<KernelHandle<SelectionVector>>,
    /// Serialized partition values keyed by logical column name.
    pub partition_map: HashMap<String, Option<String>>,
}

impl DeltaFileMetaData {
    /// Typed value of the partition column `name`.
    pub fn partition_value(&self, name: &str, ty: &PrimitiveType) -> DeltaResult<Scalar> {
        let raw = self.partition_map.get(name).and_then(|v| v.as_deref());
        Scalar::from_partition_value(raw, ty)
    }

    /// Whether any row in `offset..offset + len` is hidden.
    pub fn hides_rows(&self, offset: u64, len: usize) -> bool {
        self.selection_vector
            .as_ref()
            .is_some_and(|sv| sv.hides_any_in(offset, len))
    }
}

/// Append-only index of [`DeltaFileMetaData`] keyed by file ordinal.
#[derive(Debug, Default)]
pub struct FileMetadataIndex {
    entries: Vec<Arc<DeltaFileMetaData>>,
}

impl FileMetadataIndex {
    /// Metadata of the file with ordinal `file_number`.
    ///
    /// # Panics
    ///
    /// Ordinals are only valid once the file list has produced them; asking for
    /// one that was never resolved panics.
    pub fn get(&self, file_number: usize) -> Arc<DeltaFileMetaData> {
        match self.entries.get(file_number) {
            Some(entry) => entry.clone(),
            None => panic!(
                "file ordinal {file_number} was not resolved yet ({} files known)",
                self.entries.len()
            ),
        }
    }

    /// Metadata of the file with ordinal `file_number`, if it was resolved.
    pub fn try_get(&self, file_number: usize) -> Option<Arc<DeltaFileMetaData>> {
        self.entries.get(file_number).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push(&mut self, entry: DeltaFileMetaData) {
        debug_assert_eq!(entry.file_number, self.entries.len());
        self.entries.push(Arc::new(entry));
    }
}
