//! ID-to-position lookup without a hash map.
//!
//! OSM extracts usually deliver entities in ascending ID order. The index
//! exploits that: IDs are appended as-is, and the one-time [`IdIndex::finish`]
//! step only pays for a sort when an out-of-order ID was actually observed.
//! Lookup is a coarse binary search over sparse anchors (one per 256 sorted
//! entries) followed by a fine binary search inside the anchored window.

use log::warn;
use thiserror::Error;

use crate::buffer::{BufferError, GrowableBuffer};

/// Number of sorted entries covered by one anchor.
const BLOCK_SIZE: usize = 256;

/// Errors raised by [`IdIndex`].
#[derive(Debug, Error)]
pub enum IdIndexError {
    /// A lookup was attempted before [`IdIndex::finish`].
    #[error("ID index has not been built; call finish() first")]
    NotBuilt,
    /// A mutation or second build was attempted after [`IdIndex::finish`].
    #[error("ID index already built")]
    AlreadyBuilt,
    /// The underlying ID column failed to grow.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Maps 64-bit OSM identifiers to their dense insertion positions.
///
/// The lifecycle is append-then-freeze: [`Self::push`] while loading,
/// [`Self::finish`] exactly once, then [`Self::position_of`] for lookups.
///
/// # Examples
/// ```
/// use osmerge_core::IdIndex;
///
/// # fn main() -> Result<(), osmerge_core::IdIndexError> {
/// let mut index = IdIndex::new();
/// index.push(10)?;
/// index.push(42)?;
/// index.finish()?;
/// assert_eq!(index.position_of(42)?, Some(1));
/// assert_eq!(index.position_of(7)?, None);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct IdIndex {
    ids: GrowableBuffer<i64>,
    built: bool,
    input_sorted: bool,
    sorted_ids: Box<[i64]>,
    sorted_to_position: Box<[u32]>,
    anchors: Box<[i64]>,
}

impl IdIndex {
    /// Create an empty, unbuilt index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: GrowableBuffer::new(),
            built: false,
            input_sorted: true,
            sorted_ids: Box::new([]),
            sorted_to_position: Box::new([]),
            anchors: Box::new([]),
        }
    }

    /// Number of IDs appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no IDs have been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether [`Self::finish`] has run and lookups are valid.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.built
    }

    /// Append an ID in insertion order.
    pub fn push(&mut self, id: i64) -> Result<(), IdIndexError> {
        if self.built {
            return Err(IdIndexError::AlreadyBuilt);
        }
        if self.input_sorted
            && let Ok(previous) = self.ids.at(-1)
            && id < previous
        {
            self.input_sorted = false;
        }
        self.ids.push(id)?;
        Ok(())
    }

    /// The ID stored at a dense position.
    #[must_use]
    pub fn id_at(&self, position: usize) -> Option<i64> {
        self.ids.get(position)
    }

    /// One-time build step: sort if needed, then lay down anchors.
    ///
    /// Already-sorted input keeps the insertion array as the search array,
    /// with no copy and no permutation. Unsorted input sorts
    /// `(id, position)` pairs by ID, logging the fallback since it is rare
    /// for real extracts.
    pub fn finish(&mut self) -> Result<(), IdIndexError> {
        if self.built {
            return Err(IdIndexError::AlreadyBuilt);
        }
        self.ids.compact();
        let len = self.ids.len();

        if !self.input_sorted {
            warn!("OSM IDs were not sorted; sorting {len} entries for lookup");
            let mut pairs: Vec<(i64, u32)> = self
                .ids
                .as_slice()
                .iter()
                .enumerate()
                .map(|(position, &id)| (id, u32::try_from(position).unwrap_or(u32::MAX)))
                .collect();
            pairs.sort_unstable();
            self.sorted_ids = pairs.iter().map(|&(id, _)| id).collect();
            self.sorted_to_position = pairs.iter().map(|&(_, position)| position).collect();
        }

        let search = self.search_array();
        let anchor_count = len.div_ceil(BLOCK_SIZE);
        let mut anchors = Vec::with_capacity(anchor_count);
        for block in 0..anchor_count {
            anchors.push(search[(block * BLOCK_SIZE).min(len - 1)]);
        }
        self.anchors = anchors.into_boxed_slice();

        self.built = true;
        Ok(())
    }

    /// Look up the dense position of `id`.
    ///
    /// Returns `Ok(None)` when the ID was never appended. Fails with
    /// [`IdIndexError::NotBuilt`] before [`Self::finish`].
    pub fn position_of(&self, id: i64) -> Result<Option<usize>, IdIndexError> {
        if !self.built {
            return Err(IdIndexError::NotBuilt);
        }
        if self.anchors.is_empty() {
            return Ok(None);
        }

        // Coarse phase: greatest anchor <= id.
        let mut lo = 0_usize;
        let mut hi = self.anchors.len() - 1;
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.anchors[mid] <= id {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        let search = self.search_array();
        let start = lo * BLOCK_SIZE;
        let end = (start + BLOCK_SIZE).min(search.len());

        // Fine phase: exact match inside the anchored window.
        match search[start..end].binary_search(&id) {
            Ok(offset) => {
                let sorted_position = start + offset;
                let position = if self.input_sorted {
                    sorted_position
                } else {
                    self.sorted_to_position[sorted_position] as usize
                };
                Ok(Some(position))
            }
            Err(_) => Ok(None),
        }
    }

    /// Split a built index into its transferable blocks.
    ///
    /// For sorted input the sorted and permutation blocks are empty; the
    /// insertion-order block doubles as the search array.
    pub fn into_parts(self) -> Result<IdIndexParts, IdIndexError> {
        if !self.built {
            return Err(IdIndexError::NotBuilt);
        }
        Ok(IdIndexParts {
            ids: self.ids.into_block(),
            sorted_ids: self.sorted_ids,
            sorted_to_position: self.sorted_to_position,
            anchors: self.anchors,
        })
    }

    /// Reassemble a ready index from transferred blocks without re-sorting.
    #[must_use]
    pub fn from_parts(parts: IdIndexParts) -> Self {
        let input_sorted = parts.sorted_ids.is_empty();
        Self {
            ids: GrowableBuffer::from_block(parts.ids),
            built: true,
            input_sorted,
            sorted_ids: parts.sorted_ids,
            sorted_to_position: parts.sorted_to_position,
            anchors: parts.anchors,
        }
    }

    fn search_array(&self) -> &[i64] {
        if self.input_sorted {
            self.ids.as_slice()
        } else {
            &self.sorted_ids
        }
    }
}

impl Default for IdIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Transferable raw blocks behind an [`IdIndex`].
#[derive(Debug)]
pub struct IdIndexParts {
    /// IDs in insertion order.
    pub ids: Box<[i64]>,
    /// Sorted copy of the IDs; empty when input arrived sorted.
    pub sorted_ids: Box<[i64]>,
    /// Permutation from sorted rank to insertion position; empty when
    /// input arrived sorted.
    pub sorted_to_position: Box<[u32]>,
    /// One anchor ID per 256 sorted entries.
    pub anchors: Box<[i64]>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn build(ids: &[i64]) -> IdIndex {
        let mut index = IdIndex::new();
        for &id in ids {
            index.push(id).expect("push");
        }
        index.finish().expect("finish");
        index
    }

    #[test]
    fn sorted_input_maps_ids_to_insertion_positions() {
        let ids: Vec<i64> = (0..1000).map(|n| n * 3).collect();
        let index = build(&ids);
        for (position, &id) in ids.iter().enumerate() {
            assert_eq!(index.position_of(id).expect("built"), Some(position));
        }
    }

    #[test]
    fn shuffled_input_maps_ids_to_insertion_positions() {
        // Deterministic shuffle: stride through the range with a step
        // coprime to its length.
        let count = 1031_i64;
        let ids: Vec<i64> = (0..count).map(|n| (n * 557) % count).collect();
        let index = build(&ids);
        for (position, &id) in ids.iter().enumerate() {
            assert_eq!(index.position_of(id).expect("built"), Some(position));
        }
    }

    #[rstest]
    #[case(&[1, 2, 3], 7)]
    #[case(&[10, 20, 30], 15)]
    #[case(&[10, 20, 30], -5)]
    fn absent_ids_return_none(#[case] ids: &[i64], #[case] missing: i64) {
        let index = build(ids);
        assert_eq!(index.position_of(missing).expect("built"), None);
    }

    #[test]
    fn lookup_before_finish_is_an_error() {
        let mut index = IdIndex::new();
        index.push(1).expect("push");
        assert!(matches!(index.position_of(1), Err(IdIndexError::NotBuilt)));
    }

    #[test]
    fn finish_twice_is_an_error() {
        let mut index = IdIndex::new();
        index.push(1).expect("push");
        index.finish().expect("first finish");
        assert!(matches!(index.finish(), Err(IdIndexError::AlreadyBuilt)));
    }

    #[test]
    fn push_after_finish_is_an_error() {
        let mut index = IdIndex::new();
        index.push(1).expect("push");
        index.finish().expect("finish");
        assert!(matches!(index.push(2), Err(IdIndexError::AlreadyBuilt)));
    }

    #[test]
    fn negative_ids_are_supported() {
        let index = build(&[-5, -1, 3]);
        assert_eq!(index.position_of(-5).expect("built"), Some(0));
        assert_eq!(index.position_of(-1).expect("built"), Some(1));
        assert_eq!(index.position_of(3).expect("built"), Some(2));
    }

    #[test]
    fn empty_index_finishes_and_misses() {
        let mut index = IdIndex::new();
        index.finish().expect("finish");
        assert_eq!(index.position_of(1).expect("built"), None);
    }

    #[test]
    fn spans_multiple_anchor_blocks() {
        let ids: Vec<i64> = (0..4000).map(|n| n * 2 + 1).collect();
        let index = build(&ids);
        assert_eq!(index.position_of(1).expect("built"), Some(0));
        assert_eq!(index.position_of(7999).expect("built"), Some(3999));
        assert_eq!(index.position_of(4000).expect("built"), None);
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn parts_round_trip_preserves_lookup(#[case] sorted: bool) {
        let ids: Vec<i64> = if sorted {
            (0..600).collect()
        } else {
            (0..600).rev().collect()
        };
        let index = build(&ids);
        let parts = index.into_parts().expect("parts");
        let restored = IdIndex::from_parts(parts);
        assert!(restored.is_ready());
        for (position, &id) in ids.iter().enumerate() {
            assert_eq!(restored.position_of(id).expect("built"), Some(position));
        }
    }
}
