//! Ordered `scan_number -> (byte_start, byte_end, ms_level)` index used by
//! the accessor layer for mzXML/mzData random access.
//!
//! Grounded on `mzdata::io::offset_index::OffsetIndex`, which keeps an
//! `IndexMap<Box<str>, u64>` of id -> single byte offset for mzML. This
//! crate's index needs a byte range (start and end, since spec.md's
//! accessor extracts a whole element slice) and the scan's MS level, so the
//! value type is a small struct instead of a bare `u64`, but the ordered-map
//! shape and the by-insertion-order iteration are the same idea.

use indexmap::IndexMap;

use crate::spectrum::Spectrum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanIndexEntry {
    pub byte_start: u64,
    pub byte_end: u64,
    pub ms_level: i32,
}

#[derive(Debug, Clone, Default)]
pub struct ScanIndex {
    entries: IndexMap<i32, ScanIndexEntry>,
    cache: IndexMap<i32, Spectrum>,
}

impl ScanIndex {
    pub fn new() -> Self {
        ScanIndex {
            entries: IndexMap::new(),
            cache: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, scan_number: i32, entry: ScanIndexEntry) {
        self.entries.insert(scan_number, entry);
    }

    pub fn get(&self, scan_number: i32) -> Option<&ScanIndexEntry> {
        self.entries.get(&scan_number)
    }

    pub fn get_by_position(&self, index: usize) -> Option<(i32, &ScanIndexEntry)> {
        self.entries.get_index(index).map(|(k, v)| (*k, v))
    }

    pub fn position_of(&self, scan_number: i32) -> Option<usize> {
        self.entries.get_index_of(&scan_number)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn scan_numbers(&self) -> impl Iterator<Item = i32> + '_ {
        self.entries.keys().copied()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cache.clear();
    }

    pub fn cache_spectrum(&mut self, scan_number: i32, spectrum: Spectrum) {
        self.cache.insert(scan_number, spectrum);
    }

    pub fn cached(&self, scan_number: i32) -> Option<&Spectrum> {
        self.cache.get(&scan_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_is_preserved_and_lookup_works() {
        let mut idx = ScanIndex::new();
        idx.insert(10, ScanIndexEntry { byte_start: 0, byte_end: 100, ms_level: 1 });
        idx.insert(11, ScanIndexEntry { byte_start: 100, byte_end: 200, ms_level: 2 });

        assert_eq!(idx.len(), 2);
        assert_eq!(idx.get(10).unwrap().ms_level, 1);
        assert_eq!(idx.position_of(11), Some(1));
        assert_eq!(idx.get_by_position(0).unwrap().0, 10);
    }
}
