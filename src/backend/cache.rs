use bitflags::bitflags;
use image::DynamicImage;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

bitflags! {
    /// Why a page is being held in memory. Each collaborator owns its own bit
    /// and only ever sets or clears that one.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KeepReason: u8 {
        const PRELOAD = 1 << 0;
        const JUMPMARK = 1 << 1;
    }
}

#[derive(Debug, Clone)]
pub struct CachedPage {
    pub image: Arc<DynamicImage>,
    pub time: Instant,
}

impl CachedPage {
    fn new(image: Arc<DynamicImage>) -> Self {
        CachedPage {
            image,
            time: Instant::now(),
        }
    }
}

/// In-memory page store shared between the navigation driver and the
/// background fetchers.
///
/// Page payloads and keep reasons live behind separate locks: keep reasons
/// change on every page turn while payloads only change on fetch and trim.
/// Neither lock is ever held across I/O.
pub struct PageCache {
    pages: Mutex<HashMap<usize, CachedPage>>,
    keep: Mutex<HashMap<usize, KeepReason>>,
    generation: AtomicU64,
}

impl PageCache {
    pub fn new() -> Self {
        PageCache {
            pages: Mutex::new(HashMap::new()),
            keep: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Token identifying the archive the cache currently belongs to. Changes
    /// on every [`PageCache::reset`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn get(&self, i: usize) -> Option<CachedPage> {
        self.pages.lock().get(&i).cloned()
    }

    /// Like [`PageCache::get`] but misses if the cache has been reset since
    /// `generation` was observed.
    pub fn get_if_current(&self, generation: u64, i: usize) -> Option<CachedPage> {
        let pages = self.pages.lock();
        if self.generation() != generation {
            return None;
        }
        pages.get(&i).cloned()
    }

    pub fn contains(&self, i: usize) -> bool {
        self.pages.lock().contains_key(&i)
    }

    pub fn insert(&self, i: usize, image: Option<Arc<DynamicImage>>, reason: KeepReason) {
        self.set(i, image);
        self.keep(i, reason);
    }

    /// Like [`PageCache::insert`] but does nothing if the cache has been reset
    /// since `generation` was observed. Returns whether the page was stored.
    pub fn insert_if_current(
        &self,
        generation: u64,
        i: usize,
        image: Arc<DynamicImage>,
        reason: KeepReason,
    ) -> bool {
        let mut pages = self.pages.lock();
        if self.generation() != generation {
            return false;
        }
        pages.insert(i, CachedPage::new(image));
        if !reason.is_empty() {
            *self.keep.lock().entry(i).or_default() |= reason;
        }
        true
    }

    pub fn keep(&self, i: usize, reason: KeepReason) {
        if reason.is_empty() {
            return;
        }
        *self.keep.lock().entry(i).or_default() |= reason;
    }

    pub fn dont_keep(&self, i: usize, reason: KeepReason) {
        let mut keep = self.keep.lock();
        do_dont_keep(&mut keep, i, reason);
    }

    pub fn dont_keep_batch(&self, indices: &[usize], reason: KeepReason) {
        let mut keep = self.keep.lock();
        for &i in indices {
            do_dont_keep(&mut keep, i, reason);
        }
    }

    /// Clears `reason` from every page older than `max_age` at `now` whose
    /// index lies outside `spare`. Ages are read under the same locks the
    /// reasons are cleared under, so a page stored meanwhile is never treated
    /// as old. Returns how many pages lost the reason.
    pub fn dont_keep_stale(
        &self,
        reason: KeepReason,
        now: Instant,
        max_age: Duration,
        spare: RangeInclusive<usize>,
    ) -> usize {
        let pages = self.pages.lock();
        let mut keep = self.keep.lock();
        let mut released = 0;
        for (&i, page) in pages.iter() {
            if spare.contains(&i) || now.saturating_duration_since(page.time) <= max_age {
                continue;
            }
            if keep.get(&i).is_some_and(|current| current.intersects(reason)) {
                do_dont_keep(&mut keep, i, reason);
                released += 1;
            }
        }
        released
    }

    pub fn retention(&self, i: usize) -> KeepReason {
        self.keep.lock().get(&i).copied().unwrap_or_default()
    }

    /// Drops every page that no collaborator wants kept. Returns how many
    /// pages were removed.
    pub fn trim(&self) -> usize {
        let mut pages = self.pages.lock();
        let keep = self.keep.lock();
        let before = pages.len();
        pages.retain(|i, _| keep.get(i).is_some_and(|reason| !reason.is_empty()));
        before - pages.len()
    }

    pub fn cached_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.pages.lock().keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets everything and invalidates the current generation so that late
    /// background fetches for the previous archive are discarded.
    pub fn reset(&self) {
        let mut pages = self.pages.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        pages.clear();
        self.keep.lock().clear();
    }

    fn set(&self, i: usize, image: Option<Arc<DynamicImage>>) {
        let mut pages = self.pages.lock();
        match image {
            Some(image) => {
                pages.insert(i, CachedPage::new(image));
            }
            None => {
                pages.remove(&i);
            }
        }
    }
}

fn do_dont_keep(keep: &mut HashMap<usize, KeepReason>, i: usize, reason: KeepReason) {
    let Some(current) = keep.get_mut(&i) else {
        return;
    };
    current.remove(reason);
    if current.is_empty() {
        keep.remove(&i);
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn page() -> Option<Arc<DynamicImage>> {
        Some(Arc::new(DynamicImage::new_rgb8(1, 1)))
    }

    #[test]
    fn test_removing_unset_reason_keeps_page() {
        let cache = PageCache::new();
        cache.insert(3, page(), KeepReason::PRELOAD);
        cache.dont_keep(3, KeepReason::JUMPMARK);

        assert_eq!(cache.trim(), 0);
        assert!(cache.contains(3));
        assert_eq!(cache.retention(3), KeepReason::PRELOAD);
    }

    #[test]
    fn test_page_lives_until_last_reason_is_gone() {
        let cache = PageCache::new();
        cache.insert(5, page(), KeepReason::PRELOAD);
        cache.keep(5, KeepReason::JUMPMARK);

        cache.dont_keep(5, KeepReason::PRELOAD);
        cache.trim();
        assert!(cache.get(5).is_some());

        cache.dont_keep(5, KeepReason::JUMPMARK);
        assert!(cache.get(5).is_some(), "dont_keep alone must not evict");
        assert_eq!(cache.trim(), 1);
        assert!(cache.get(5).is_none());
    }

    #[test]
    fn test_insert_replaces_and_refreshes() {
        let cache = PageCache::new();
        cache.insert(0, page(), KeepReason::PRELOAD);
        let first = cache.get(0).unwrap().time;
        thread::sleep(Duration::from_millis(5));
        cache.insert(0, Some(Arc::new(DynamicImage::new_rgb8(2, 2))), KeepReason::PRELOAD);

        let second = cache.get(0).unwrap();
        assert!(second.time > first);
        assert_eq!(second.image.width(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_insert_none_removes_only_that_page() {
        let cache = PageCache::new();
        cache.insert(0, page(), KeepReason::PRELOAD);
        cache.insert(1, page(), KeepReason::PRELOAD);
        cache.insert(0, None, KeepReason::PRELOAD);

        assert!(cache.get(0).is_none());
        assert!(cache.get(1).is_some());
        assert_eq!(cache.retention(1), KeepReason::PRELOAD);
    }

    #[test]
    fn test_dont_keep_batch() {
        let cache = PageCache::new();
        for i in 0..6 {
            cache.insert(i, page(), KeepReason::PRELOAD);
        }
        cache.keep(1, KeepReason::JUMPMARK);
        cache.dont_keep_batch(&[0, 1, 2], KeepReason::PRELOAD);

        assert_eq!(cache.trim(), 2);
        assert_eq!(cache.cached_indices(), vec![1, 3, 4, 5]);
    }

    #[test]
    fn test_dont_keep_stale_spares_fresh_and_near_pages() {
        let cache = PageCache::new();
        for i in [0, 4, 5, 9] {
            cache.insert(i, page(), KeepReason::PRELOAD);
        }
        cache.keep(0, KeepReason::JUMPMARK);
        thread::sleep(Duration::from_millis(30));
        // Stored again after the others aged, e.g. by a finishing preload.
        cache.insert(5, page(), KeepReason::PRELOAD);

        let released = cache.dont_keep_stale(
            KeepReason::PRELOAD,
            Instant::now(),
            Duration::from_millis(15),
            8..=10,
        );
        assert_eq!(released, 2);
        assert_eq!(cache.retention(0), KeepReason::JUMPMARK);
        assert_eq!(cache.retention(5), KeepReason::PRELOAD);

        assert_eq!(cache.trim(), 1);
        assert_eq!(cache.cached_indices(), vec![0, 5, 9]);
    }

    #[test]
    fn test_get_if_current_misses_after_reset() {
        let cache = PageCache::new();
        let old = cache.generation();
        cache.insert(2, page(), KeepReason::PRELOAD);
        assert!(cache.get_if_current(old, 2).is_some());

        cache.reset();
        cache.insert(2, page(), KeepReason::PRELOAD);
        assert!(cache.get_if_current(old, 2).is_none());
        assert!(cache.get_if_current(cache.generation(), 2).is_some());
    }

    #[test]
    fn test_reset_rejects_stale_generation() {
        let cache = PageCache::new();
        let generation = cache.generation();
        cache.insert(0, page(), KeepReason::PRELOAD);
        cache.reset();

        assert!(cache.is_empty());
        assert_eq!(cache.retention(0), KeepReason::empty());
        let image = Arc::new(DynamicImage::new_rgb8(1, 1));
        assert!(!cache.insert_if_current(generation, 4, image.clone(), KeepReason::PRELOAD));
        assert!(cache.get(4).is_none());
        assert!(cache.insert_if_current(cache.generation(), 4, image, KeepReason::PRELOAD));
        assert!(cache.get(4).is_some());
    }

    #[test]
    fn test_concurrent_reasons_do_not_clobber() {
        let cache = Arc::new(PageCache::new());
        cache.insert(7, page(), KeepReason::PRELOAD);

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        if n % 2 == 0 {
                            cache.keep(7, KeepReason::JUMPMARK);
                        } else {
                            cache.insert(7, page(), KeepReason::PRELOAD);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.retention(7), KeepReason::PRELOAD | KeepReason::JUMPMARK);
        assert_eq!(cache.len(), 1);
    }
}
