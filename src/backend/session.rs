use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;

use super::archive::{Archive, Kind};
use super::bookmarks::{Bookmark, Bookmarks};
use super::cache::{KeepReason, PageCache};
use super::config::Config;
use super::error::{Error, Result};
use super::jumpmarks::{CycleDirection, Jumpmarks};

/// What the reader currently shows.
pub struct Spread {
    pub left: Arc<DynamicImage>,
    pub right: Option<Arc<DynamicImage>>,
}

/// Everything that belongs to the archive being read: the archive itself, its
/// page cache, the reading position and the jumpmarks placed in it.
pub struct Session {
    pub config: Config,
    cache: Arc<PageCache>,
    archive: Option<Archive>,
    /// Path or URL the archive was opened from.
    path: Option<String>,
    position: usize,
    jumpmarks: Jumpmarks,
    bookmarks: Bookmarks,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Session {
            config,
            cache: PageCache::shared(),
            archive: None,
            path: None,
            position: 0,
            jumpmarks: Jumpmarks::default(),
            bookmarks: Bookmarks::default(),
        }
    }

    pub fn with_bookmarks(mut self, bookmarks: Bookmarks) -> Self {
        self.bookmarks = bookmarks;
        self
    }

    pub fn bookmarks(&self) -> &Bookmarks {
        &self.bookmarks
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    pub fn archive(&self) -> Option<&Archive> {
        self.archive.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.archive.is_some()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn jumpmarks(&self) -> &Jumpmarks {
        &self.jumpmarks
    }

    /// Replaces the current archive with the one at `target` and shows its
    /// first page, or the remembered reading position if there is one.
    pub async fn open(&mut self, target: &str) -> Result<Spread> {
        self.close();

        let target = target.trim();
        let archive = Archive::open(target, self.cache.clone(), &self.config).await?;
        let kind = archive.kind();
        if kind == Kind::Remote {
            log::info!("Reading {} (length unknown)", archive.archive_name());
        }
        self.archive = Some(archive);
        self.path = Some(target.to_string());

        let saved = if self.remembers_position(kind) {
            self.bookmarks.reading_position(target).filter(|&page| page > 0)
        } else {
            None
        };
        if let Some(page) = saved {
            match self.set_page(page).await {
                Ok(spread) => return Ok(spread),
                Err(e) => log::warn!("Couldn't restore reading position {}: {}", page + 1, e),
            }
        }
        self.set_page(0).await
    }

    pub fn close(&mut self) {
        let Some(archive) = self.archive.take() else {
            return;
        };
        let path = self.path.take();
        if let Some(path) = path.filter(|_| self.remembers_position(archive.kind())) {
            self.bookmarks.set_reading_position(&path, self.position);
        }
        let name = archive.archive_name().to_string();
        if let Err(e) = archive.close() {
            log::warn!("Error closing {}: {}", name, e);
        }
        self.cache.reset();
        self.jumpmarks.clear();
        self.position = 0;
    }

    /// Shows page `n`, plus `n + 1` in double page mode when it exists.
    pub async fn set_page(&mut self, n: usize) -> Result<Spread> {
        let spread = self.load_spread(n).await?;
        self.position = n;
        self.jumpmarks.end_cycle();
        Ok(spread)
    }

    pub async fn next_page(&mut self) -> Result<Option<Spread>> {
        let step = if self.config.double_page { 2 } else { 1 };
        let n = self.position + step;
        let archive = self.archive.as_ref().ok_or(Error::Closed)?;
        if archive.len().is_some_and(|len| n >= len) {
            return Ok(None);
        }
        self.set_page(n).await.map(Some)
    }

    pub async fn prev_page(&mut self) -> Result<Option<Spread>> {
        if self.position == 0 {
            return Ok(None);
        }
        let step = if self.config.double_page { 2 } else { 1 };
        self.set_page(self.position.saturating_sub(step)).await.map(Some)
    }

    /// Jumps to the last page. `None` when the archive length is unknown.
    pub async fn last_page(&mut self) -> Result<Option<Spread>> {
        let archive = self.archive.as_ref().ok_or(Error::Closed)?;
        match archive.len() {
            Some(len) if len > 0 => self.set_page(len - 1).await.map(Some),
            _ => Ok(None),
        }
    }

    /// Marks or unmarks the current page. Marked pages stay cached until
    /// unmarked.
    pub fn toggle_jumpmark(&mut self) -> bool {
        let marked = self.jumpmarks.toggle(self.position);
        if marked {
            self.cache.keep(self.position, KeepReason::JUMPMARK);
        } else {
            self.cache.dont_keep(self.position, KeepReason::JUMPMARK);
        }
        marked
    }

    pub async fn cycle_jumpmarks(&mut self, direction: CycleDirection) -> Result<Option<Spread>> {
        let Some(page) = self.jumpmarks.cycle(direction, self.position) else {
            return Ok(None);
        };
        let spread = self.load_spread(page).await?;
        self.position = page;
        Ok(Some(spread))
    }

    pub async fn return_from_cycling(&mut self) -> Result<Option<Spread>> {
        match self.jumpmarks.return_page() {
            Some(page) => self.set_page(page).await.map(Some),
            None => Ok(None),
        }
    }

    /// Bookmarks the current page, replacing an older bookmark of the same
    /// archive.
    pub fn add_bookmark(&mut self) -> Result<Bookmark> {
        let archive = self.archive.as_ref().ok_or(Error::Closed)?;
        let path = self.path.as_deref().ok_or(Error::Closed)?;
        let bookmark = self.bookmarks.add(path, self.position + 1, archive.len());
        Ok(bookmark.clone())
    }

    pub fn remove_bookmark(&mut self, index: usize) -> Option<Bookmark> {
        self.bookmarks.remove(index)
    }

    /// Goes to the bookmarked page, opening its archive first unless it is
    /// the one being read.
    pub async fn open_bookmark(&mut self, index: usize) -> Result<Spread> {
        let bookmark = self
            .bookmarks
            .get(index)
            .cloned()
            .ok_or(Error::OutOfBounds {
                index,
                len: self.bookmarks.len(),
            })?;
        if self.path.as_deref() != Some(bookmark.path.as_str()) {
            self.open(&bookmark.path).await?;
        }
        self.set_page(bookmark.page.saturating_sub(1)).await
    }

    fn remembers_position(&self, kind: Kind) -> bool {
        match kind {
            Kind::Remote => self.config.remember_position_http,
            _ => self.config.remember_position,
        }
    }

    /// Periodic eviction. Preloaded pages that are both old and away from the
    /// reading position lose their preload reason, then everything nobody
    /// keeps is dropped. Returns the number of pages freed.
    pub fn trim_cache(&self, now: Instant) -> usize {
        if self.archive.is_none() {
            return 0;
        }

        let n_preload = self.config.n_preload;
        let near_start = self.position.saturating_sub(n_preload);
        let near_end = self.position.saturating_add(n_preload);
        let keep_at_least = self.config.preload_keep_at_least();

        let released = self.cache.dont_keep_stale(
            KeepReason::PRELOAD,
            now,
            keep_at_least,
            near_start..=near_end,
        );
        log::debug!("Released {} stale preloaded pages", released);

        let removed = self.cache.trim();

        let remaining: Vec<String> = self
            .cache
            .cached_indices()
            .iter()
            .map(|i| (i + 1).to_string())
            .collect();
        let remaining = if remaining.is_empty() {
            "-".to_string()
        } else {
            remaining.join(", ")
        };
        log::info!("Trimmed page cache. Remaining pages: {}", remaining);

        removed
    }

    async fn load_spread(&self, n: usize) -> Result<Spread> {
        let archive = self.archive.as_ref().ok_or(Error::Closed)?;
        let autorotate = self.config.embedded_orientation;
        let n_preload = self.config.n_preload;

        let left = archive.load(n, autorotate, n_preload).await?;
        let right = if self.config.double_page && archive.len().is_none_or(|len| len > n + 1) {
            Some(archive.load(n + 1, autorotate, n_preload).await?)
        } else {
            None
        };
        Ok(Spread { left, right })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
