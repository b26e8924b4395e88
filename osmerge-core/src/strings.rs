//! Interned string storage for tag and role columns.
//!
//! Tag keys, tag values, and relation member roles repeat heavily across
//! an extract. Tables therefore store `u32` indices into a per-table
//! string table, mirroring the string tables of the PBF format itself.
//! Index 0 is always the empty string.

use std::collections::HashMap;

/// A deduplicating string pool addressed by dense `u32` indices.
///
/// # Examples
/// ```
/// use osmerge_core::StringTable;
///
/// let mut strings = StringTable::new();
/// let highway = strings.intern("highway");
/// assert_eq!(strings.intern("highway"), highway);
/// assert_eq!(strings.get(highway), Some("highway"));
/// assert_eq!(strings.get(0), Some(""));
/// ```
#[derive(Debug, Clone)]
pub struct StringTable {
    entries: Vec<String>,
    lookup: HashMap<String, u32>,
}

impl StringTable {
    /// Create a table containing only the empty string at index 0.
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self {
            entries: Vec::new(),
            lookup: HashMap::new(),
        };
        table.intern("");
        table
    }

    /// Number of distinct strings, including the empty string.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty. Always false once constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the index for `value`, inserting it on first sight.
    pub fn intern(&mut self, value: &str) -> u32 {
        if let Some(&index) = self.lookup.get(value) {
            return index;
        }
        // Column indices never exceed 2^32 by design; the cast cannot
        // truncate before memory is exhausted.
        let index = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        self.entries.push(value.to_owned());
        self.lookup.insert(value.to_owned(), index);
        index
    }

    /// Resolve an index back to its string.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&str> {
        self.entries.get(index as usize).map(String::as_str)
    }

    /// Iterate the pool in index order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Split into transferable blocks: concatenated UTF-8 bytes plus the
    /// end offset of each entry.
    #[must_use]
    pub fn into_parts(self) -> StringTableParts {
        let mut bytes = Vec::new();
        let mut ends = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            bytes.extend_from_slice(entry.as_bytes());
            ends.push(u32::try_from(bytes.len()).unwrap_or(u32::MAX));
        }
        StringTableParts {
            bytes: bytes.into_boxed_slice(),
            ends: ends.into_boxed_slice(),
        }
    }

    /// Reassemble a table from transferred blocks.
    ///
    /// Offsets that do not delimit valid UTF-8 yield a fresh empty table
    /// entry for the affected slot, which keeps reconstruction total; the
    /// blocks are produced by [`Self::into_parts`] in practice.
    #[must_use]
    pub fn from_parts(parts: &StringTableParts) -> Self {
        let mut entries = Vec::with_capacity(parts.ends.len());
        let mut lookup = HashMap::with_capacity(parts.ends.len());
        let mut start = 0_usize;
        for (position, &end) in parts.ends.iter().enumerate() {
            let end = end as usize;
            let slice = parts.bytes.get(start..end).unwrap_or(&[]);
            let value = String::from_utf8_lossy(slice).into_owned();
            lookup
                .entry(value.clone())
                .or_insert(u32::try_from(position).unwrap_or(u32::MAX));
            entries.push(value);
            start = end;
        }
        if entries.is_empty() {
            return Self::new();
        }
        Self { entries, lookup }
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Transferable raw blocks behind a [`StringTable`].
#[derive(Debug)]
pub struct StringTableParts {
    /// All entries concatenated as UTF-8 bytes.
    pub bytes: Box<[u8]>,
    /// Exclusive end offset of each entry within `bytes`.
    pub ends: Box<[u32]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut strings = StringTable::new();
        let first = strings.intern("name");
        let second = strings.intern("name");
        assert_eq!(first, second);
        assert_eq!(strings.len(), 2);
    }

    #[test]
    fn empty_string_is_index_zero() {
        let mut strings = StringTable::new();
        assert_eq!(strings.intern(""), 0);
        assert_eq!(strings.get(0), Some(""));
    }

    #[test]
    fn parts_round_trip() {
        let mut strings = StringTable::new();
        strings.intern("highway");
        strings.intern("residential");
        strings.intern("name");
        let expected: Vec<String> = strings.iter().map(str::to_owned).collect();

        let parts = strings.into_parts();
        let restored = StringTable::from_parts(&parts);
        let actual: Vec<String> = restored.iter().map(str::to_owned).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn restored_table_keeps_interning() {
        let mut strings = StringTable::new();
        let highway = strings.intern("highway");
        let parts = strings.into_parts();

        let mut restored = StringTable::from_parts(&parts);
        assert_eq!(restored.intern("highway"), highway);
        assert_eq!(restored.intern("bridge"), 2);
    }
}
