//! Deterministic partitioning of ordered target lists.
//!
//! Each machine is told its chunk index and picks its own slice; no
//! coordination is needed because every process computes the same split.

use serde::Serialize;
use thiserror::Error;

/// One contiguous partition of an ordered target list.
///
/// In info mode only `size` and `total` are meaningful; the rest are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkInfo {
    pub index: usize,
    pub size: usize,
    pub total: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// Not a failure: the caller asked for the breakdown only. Callers print
    /// it and exit successfully. The message is matched literally.
    #[error("chunk-info")]
    Info(ChunkInfo),

    #[error("chunk-part {part} exceeds total chunks {total} (0-indexed)")]
    PartOutOfRange { part: i64, total: usize },
}

impl ChunkError {
    pub fn is_info(&self) -> bool {
        matches!(self, ChunkError::Info(_))
    }
}

/// Select chunk `part` of `targets` split into pieces of `size`.
///
/// `size <= 0` disables chunking and returns the input unchanged with no
/// info. A negative `part` requests info mode.
pub fn chunk_targets<T>(
    targets: &[T],
    size: i64,
    part: i64,
) -> Result<(&[T], Option<ChunkInfo>), ChunkError> {
    if size <= 0 || targets.is_empty() {
        return Ok((targets, None));
    }

    let size = size as usize;
    let total = targets.len().div_ceil(size);

    if part < 0 {
        return Err(ChunkError::Info(ChunkInfo {
            size,
            total,
            ..ChunkInfo::default()
        }));
    }
    if part as u64 >= total as u64 {
        return Err(ChunkError::PartOutOfRange { part, total });
    }

    let index = part as usize;
    let start = index * size;
    let end = (start + size).min(targets.len());

    Ok((
        &targets[start..end],
        Some(ChunkInfo {
            index,
            size,
            total,
            start,
            end,
        }),
    ))
}

/// Chunk size that splits `len` targets into `count` chunks.
///
/// Returns 0 (chunking disabled) when `count <= 0` or there is nothing to split.
pub fn size_for_count(len: usize, count: i64) -> i64 {
    if count <= 0 || len == 0 {
        return 0;
    }
    len.div_ceil(count as usize) as i64
}

/// Split into `count` roughly equal chunks and select `part`.
pub fn chunk_targets_by_count<T>(
    targets: &[T],
    count: i64,
    part: i64,
) -> Result<(&[T], Option<ChunkInfo>), ChunkError> {
    chunk_targets(targets, size_for_count(targets.len(), count), part)
}

/// Every chunk of a list of `len` items split by `size`, in index order.
/// Used to print the breakdown in info mode.
pub fn breakdown(len: usize, size: usize) -> Vec<ChunkInfo> {
    if size == 0 || len == 0 {
        return Vec::new();
    }
    let total = len.div_ceil(size);
    (0..total)
        .map(|index| {
            let start = index * size;
            ChunkInfo {
                index,
                size,
                total,
                start,
                end: (start + size).min(len),
            }
        })
        .collect()
}
