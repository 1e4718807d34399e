//! Page-granularity translation cache
//!
//! Fixed-capacity, linear lookup. When an insertion finds the cache full the
//! logical size wraps to zero and slots are overwritten from the start; old
//! slots are not invalidated. Entries are not tagged with a page-table root,
//! so callers must `reset` when they switch address spaces.

use crate::config::DEFAULT_CACHE_CAPACITY;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslationCacheEntry {
    pub virtual_page_base: u64,
    pub physical_page_base: u64,
}

#[derive(Debug, Clone)]
pub struct TranslationCache {
    entries: Vec<TranslationCacheEntry>,
    len: usize,
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl TranslationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![TranslationCacheEntry::default(); capacity],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Physical page base cached for `virtual_page_base`, first match wins
    pub fn lookup(&self, virtual_page_base: u64) -> Option<u64> {
        self.entries[..self.len]
            .iter()
            .find(|e| e.virtual_page_base == virtual_page_base)
            .map(|e| e.physical_page_base)
    }

    pub fn insert(&mut self, virtual_page_base: u64, physical_page_base: u64) {
        if self.entries.is_empty() {
            return;
        }
        if self.len >= self.entries.len() {
            self.len = 0;
        }
        self.entries[self.len] = TranslationCacheEntry {
            virtual_page_base,
            physical_page_base,
        };
        self.len += 1;
    }

    /// Zero every slot and drop all live entries
    pub fn reset(&mut self) {
        self.entries.fill(TranslationCacheEntry::default());
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut cache = TranslationCache::new(4);
        cache.insert(0x7FF0_0000, 0x12_3000);

        assert_eq!(cache.lookup(0x7FF0_0000), Some(0x12_3000));
        assert_eq!(cache.lookup(0x7FF0_1000), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_full_cache_wraps_to_first_slot() {
        let mut cache = TranslationCache::default();
        assert_eq!(cache.capacity(), 255);

        for i in 0..255u64 {
            cache.insert(i * 0x1000, 0x10_0000 + i * 0x1000);
        }
        assert_eq!(cache.len(), 255);

        cache.insert(0xFFFF_0000, 0xAB_C000);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(0xFFFF_0000), Some(0xAB_C000));
        // slot 1 still holds its old value but is no longer live
        assert_eq!(cache.lookup(0x1000), None);
    }

    #[test]
    fn test_reset_clears_entries() {
        let mut cache = TranslationCache::new(2);
        cache.insert(0x1000, 0x2000);
        cache.reset();

        assert!(cache.is_empty());
        assert_eq!(cache.lookup(0x1000), None);
    }

    #[test]
    fn test_zero_capacity_never_caches() {
        let mut cache = TranslationCache::new(0);
        cache.insert(0x1000, 0x2000);
        assert_eq!(cache.lookup(0x1000), None);
    }
}
