//! Deletion vectors and the per-row selection vectors derived from them.
//!
//! Deletion vectors are serialized in the `RoaringBitmapArray` format: a
//! little endian magic number followed by a portable 64 bit roaring treemap.
//! Inline vectors carry exactly those bytes (z85 encoded); on-disk vectors
//! live in a file that starts with a format version byte, and each vector
//! inside it is framed by a big endian size prefix and a trailing checksum.

use std::io::Cursor;

use arrow_array::BooleanArray;
use roaring::RoaringTreemap;

use super::handle::KernelResource;
use super::models::{DeletionVectorDescriptor, StorageType};
use crate::{DeltaResult, DeltaTableError};

/// Magic number opening every serialized `RoaringBitmapArray`.
pub const DELETION_VECTOR_MAGIC: u32 = 1681511377;
/// Format version written as the first byte of deletion vector files.
pub const DELETION_VECTOR_FILE_VERSION: u8 = 1;

/// Row visibility of one data file.
///
/// Rows whose index is recorded as deleted are invisible; every other row,
/// including rows beyond the range the vector was built for, is visible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionVector {
    deleted: RoaringTreemap,
}

impl SelectionVector {
    /// Selection vector hiding the given row indices.
    pub fn from_deleted(deleted: RoaringTreemap) -> Self {
        Self { deleted }
    }

    /// Selection vector from explicit per-row visibility, `false` meaning deleted.
    pub fn from_bools(selected: impl IntoIterator<Item = bool>) -> Self {
        let deleted = selected
            .into_iter()
            .enumerate()
            .filter(|(_, keep)| !keep)
            .map(|(idx, _)| idx as u64)
            .collect();
        Self { deleted }
    }

    /// Whether the row at `row_index` is visible.
    pub fn is_selected(&self, row_index: u64) -> bool {
        !self.deleted.contains(row_index)
    }

    /// Number of rows marked deleted.
    pub fn deleted_count(&self) -> u64 {
        self.deleted.len()
    }

    /// True when no row is hidden.
    pub fn selects_all(&self) -> bool {
        self.deleted.is_empty()
    }

    /// Whether any row in `offset..offset + len` is hidden.
    pub fn hides_any_in(&self, offset: u64, len: usize) -> bool {
        if len == 0 || self.deleted.is_empty() {
            return false;
        }
        let last = offset.saturating_add(len as u64 - 1);
        let before = match offset.checked_sub(1) {
            Some(prev) => self.deleted.rank(prev),
            None => 0,
        };
        self.deleted.rank(last) > before
    }

    /// Filter mask for `len` rows starting at physical row `offset`.
    pub fn to_filter(&self, offset: u64, len: usize) -> BooleanArray {
        (0..len as u64)
            .map(|i| Some(self.is_selected(offset + i)))
            .collect()
    }

    /// The deleted row indices.
    pub fn deleted(&self) -> &RoaringTreemap {
        &self.deleted
    }
}

impl KernelResource for SelectionVector {
    fn kind(&self) -> &'static str {
        "selection vector"
    }

    fn release(&mut self) {
        self.deleted.clear();
    }
}

/// Decode the bitmap of an inline (`i`) deletion vector.
pub fn decode_inline(dv: &DeletionVectorDescriptor) -> DeltaResult<RoaringTreemap> {
    if dv.storage_type != StorageType::Inline {
        return Err(DeltaTableError::DeletionVector(format!(
            "expected inline deletion vector, found storage type '{}'",
            dv.storage_type.as_ref()
        )));
    }
    let bytes = z85::decode(&dv.path_or_inline_dv)
        .map_err(|_| DeltaTableError::DeletionVector("Failed to decode DV".to_string()))?;
    let size = usize::try_from(dv.size_in_bytes)
        .map_err(|_| DeltaTableError::DeletionVector("negative deletion vector size".into()))?;
    if bytes.len() < size {
        return Err(DeltaTableError::DeletionVector(format!(
            "inline deletion vector has {} bytes, expected {size}",
            bytes.len()
        )));
    }
    decode_bitmap_array(&bytes[..size])
}

/// Decode one deletion vector out of the content of a deletion vector file.
pub fn decode_from_file(
    dv: &DeletionVectorDescriptor,
    file_content: &[u8],
) -> DeltaResult<RoaringTreemap> {
    match file_content.first() {
        Some(&DELETION_VECTOR_FILE_VERSION) => {}
        Some(other) => {
            return Err(DeltaTableError::DeletionVector(format!(
                "unsupported deletion vector file version {other}"
            )))
        }
        None => {
            return Err(DeltaTableError::DeletionVector(
                "deletion vector file is empty".to_string(),
            ))
        }
    }

    let offset = dv.offset.unwrap_or(1);
    let offset = usize::try_from(offset)
        .map_err(|_| DeltaTableError::DeletionVector(format!("invalid offset {offset}")))?;
    let size_end = offset + 4;
    let size_bytes: [u8; 4] = file_content
        .get(offset..size_end)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| {
            DeltaTableError::DeletionVector(format!(
                "deletion vector offset {offset} is beyond end of file"
            ))
        })?;
    let size = u32::from_be_bytes(size_bytes) as usize;
    if i64::from(dv.size_in_bytes) != size as i64 {
        return Err(DeltaTableError::DeletionVector(format!(
            "deletion vector size mismatch: descriptor says {}, file says {size}",
            dv.size_in_bytes
        )));
    }
    let data = file_content
        .get(size_end..size_end + size)
        .ok_or_else(|| DeltaTableError::DeletionVector("truncated deletion vector".into()))?;
    decode_bitmap_array(data)
}

/// Decode a serialized `RoaringBitmapArray` (magic number plus treemap).
pub fn decode_bitmap_array(bytes: &[u8]) -> DeltaResult<RoaringTreemap> {
    let magic: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| DeltaTableError::DeletionVector("failed to read magic bytes".into()))?;
    let magic = u32::from_le_bytes(magic);
    if magic != DELETION_VECTOR_MAGIC {
        return Err(DeltaTableError::DeletionVector(format!(
            "invalid magic number {magic}"
        )));
    }
    RoaringTreemap::deserialize_from(Cursor::new(&bytes[4..]))
        .map_err(|err| DeltaTableError::DeletionVector(err.to_string()))
}

/// Serialize a bitmap into the `RoaringBitmapArray` format.
pub fn encode_bitmap_array(bitmap: &RoaringTreemap) -> DeltaResult<Vec<u8>> {
    let mut bytes = DELETION_VECTOR_MAGIC.to_le_bytes().to_vec();
    bitmap
        .serialize_into(&mut bytes)
        .map_err(|err| DeltaTableError::DeletionVector(err.to_string()))?;
    Ok(bytes)
}
