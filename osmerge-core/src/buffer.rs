//! Growable numeric columns.
//!
//! Entity tables store their fields as parallel numeric arrays. The arrays
//! are append-only while a dataset loads, then compacted once loading
//! finishes. Growth doubles the reserved capacity so the number of
//! reallocation copies stays logarithmic in the final length.

use std::collections::TryReserveError;

use thiserror::Error;

/// Default reserved size for a fresh buffer, in bytes.
pub const DEFAULT_BYTE_CAPACITY: usize = 1 << 20;

/// Errors raised by [`GrowableBuffer`].
#[derive(Debug, Error)]
pub enum BufferError {
    /// An index was outside the used portion of the buffer, after
    /// negative-index translation.
    #[error("index {index} out of bounds for buffer of length {len}")]
    OutOfBounds {
        /// The index as requested by the caller.
        index: i64,
        /// Number of elements currently stored.
        len: usize,
    },
    /// The allocator could not provide the requested capacity. Fatal for
    /// this buffer; retrying would repeat the same failure.
    #[error("failed to grow buffer to {requested} elements: {source}")]
    Capacity {
        /// Element capacity that was being reserved.
        requested: usize,
        /// Underlying allocator error.
        #[source]
        source: TryReserveError,
    },
}

/// An append-only numeric column with geometric growth.
///
/// # Examples
/// ```
/// use osmerge_core::GrowableBuffer;
///
/// # fn main() -> Result<(), osmerge_core::BufferError> {
/// let mut column = GrowableBuffer::<f64>::new();
/// column.push(1.5)?;
/// column.push(2.5)?;
/// assert_eq!(column.at(-1)?, 2.5);
/// assert_eq!(column.len(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct GrowableBuffer<T> {
    data: Vec<T>,
    capacity: usize,
}

impl<T: Copy> GrowableBuffer<T> {
    /// Create a buffer with the default 1 MiB reservation.
    #[must_use]
    pub fn new() -> Self {
        Self::with_byte_capacity(DEFAULT_BYTE_CAPACITY)
    }

    /// Create a buffer reserving roughly `bytes` of initial capacity.
    #[must_use]
    pub fn with_byte_capacity(bytes: usize) -> Self {
        let elements = (bytes / size_of::<T>().max(1)).max(1);
        Self {
            data: Vec::new(),
            capacity: elements,
        }
    }

    /// Reconstruct a buffer from a block produced by [`Self::into_block`].
    ///
    /// The block is adopted as-is: length and capacity both equal the block
    /// length, so the buffer is already in its compacted state.
    #[must_use]
    pub fn from_block(block: Box<[T]>) -> Self {
        let data = block.into_vec();
        let capacity = data.len();
        Self { data, capacity }
    }

    /// Number of elements pushed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append a value, growing the reservation when it is exhausted.
    pub fn push(&mut self, value: T) -> Result<(), BufferError> {
        if self.data.len() == self.capacity {
            self.expand()?;
        }
        if self.data.capacity() < self.capacity {
            self.reserve_to(self.capacity)?;
        }
        self.data.push(value);
        Ok(())
    }

    /// Append every value from a slice.
    pub fn push_many(&mut self, values: &[T]) -> Result<(), BufferError> {
        while self.data.len() + values.len() > self.capacity {
            self.expand()?;
        }
        if self.data.capacity() < self.capacity {
            self.reserve_to(self.capacity)?;
        }
        self.data.extend_from_slice(values);
        Ok(())
    }

    /// Read an element, translating negative indices from the end.
    pub fn at(&self, index: i64) -> Result<T, BufferError> {
        let len = self.data.len();
        let out_of_bounds = || BufferError::OutOfBounds { index, len };
        let translated = if index < 0 {
            let from_end = i64::try_from(len).map_err(|_| out_of_bounds())? + index;
            usize::try_from(from_end).map_err(|_| out_of_bounds())?
        } else {
            usize::try_from(index).map_err(|_| out_of_bounds())?
        };
        self.data.get(translated).copied().ok_or_else(out_of_bounds)
    }

    /// Read an element by non-negative position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.data.get(index).copied()
    }

    /// Borrow the used portion of the buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Borrow a sub-range of the used portion.
    pub fn slice(&self, start: usize, end: usize) -> Result<&[T], BufferError> {
        if start > end || end > self.data.len() {
            return Err(BufferError::OutOfBounds {
                index: i64::try_from(end).unwrap_or(i64::MAX),
                len: self.data.len(),
            });
        }
        Ok(&self.data[start..end])
    }

    /// Shrink the allocation to exactly the used elements.
    ///
    /// Afterwards the buffer remains readable, but the next push pays a
    /// fresh doubling; compaction is intended as the final step before a
    /// handoff via [`Self::into_block`].
    pub fn compact(&mut self) {
        self.data.shrink_to_fit();
        self.capacity = self.data.len().max(1);
    }

    /// Terminal handoff: yield an owned block of exactly the used elements.
    ///
    /// Consumes the buffer, so it cannot be grown again after the block's
    /// ownership moves elsewhere.
    #[must_use]
    pub fn into_block(self) -> Box<[T]> {
        self.data.into_boxed_slice()
    }

    fn expand(&mut self) -> Result<(), BufferError> {
        let requested = self.capacity.saturating_mul(2);
        self.reserve_to(requested)?;
        self.capacity = requested;
        Ok(())
    }

    fn reserve_to(&mut self, target: usize) -> Result<(), BufferError> {
        let additional = target.saturating_sub(self.data.len());
        self.data
            .try_reserve_exact(additional)
            .map_err(|source| BufferError::Capacity {
                requested: target,
                source,
            })
    }
}

impl<T: Copy> Default for GrowableBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn push_preserves_values_across_doublings() {
        // 2^21 + 1 u32 values span several doublings of the 1 MiB default.
        let count: u32 = (1 << 21) + 1;
        let mut buffer = GrowableBuffer::<u32>::new();
        for value in 0..count {
            buffer.push(value).expect("push");
        }
        assert_eq!(buffer.len(), count as usize);
        for value in [0_u32, 1, 1 << 20, (1 << 21) - 1, 1 << 21] {
            assert_eq!(buffer.get(value as usize), Some(value));
        }
    }

    #[test]
    fn compact_then_slice_returns_exactly_pushed_values() {
        let mut buffer = GrowableBuffer::<u16>::new();
        for value in 0..100_u16 {
            buffer.push(value).expect("push");
        }
        buffer.compact();
        let values = buffer.slice(0, buffer.len()).expect("slice");
        assert_eq!(values.len(), 100);
        assert_eq!(values[0], 0);
        assert_eq!(values[99], 99);
    }

    #[rstest]
    #[case(-1, 3.0)]
    #[case(-3, 1.0)]
    #[case(0, 1.0)]
    #[case(2, 3.0)]
    fn at_translates_negative_indices(#[case] index: i64, #[case] expected: f64) {
        let mut buffer = GrowableBuffer::<f64>::new();
        for value in [1.0, 2.0, 3.0] {
            buffer.push(value).expect("push");
        }
        assert_eq!(buffer.at(index).expect("in bounds"), expected);
    }

    #[rstest]
    #[case(3)]
    #[case(-4)]
    #[case(i64::MIN)]
    fn at_rejects_out_of_bounds_indices(#[case] index: i64) {
        let mut buffer = GrowableBuffer::<f64>::new();
        for value in [1.0, 2.0, 3.0] {
            buffer.push(value).expect("push");
        }
        assert!(matches!(
            buffer.at(index),
            Err(BufferError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn block_round_trip_preserves_contents() {
        let mut buffer = GrowableBuffer::<i64>::new();
        buffer.push_many(&[10, 20, 30]).expect("push");
        buffer.compact();
        let block = buffer.into_block();
        assert_eq!(block.len(), 3);

        let restored = GrowableBuffer::from_block(block);
        assert_eq!(restored.as_slice(), &[10, 20, 30]);
    }

    #[test]
    fn empty_slice_bounds_are_checked() {
        let buffer = GrowableBuffer::<u8>::new();
        assert!(buffer.slice(0, 0).is_ok());
        assert!(buffer.slice(0, 1).is_err());
        assert!(buffer.slice(2, 1).is_err());
    }
}
