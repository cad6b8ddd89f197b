use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Path or URL the archive was opened from.
    pub path: String,
    /// 1-based page number.
    pub page: usize,
    pub total_pages: Option<usize>,
    pub added: SystemTime,
}

impl Bookmark {
    pub fn label(&self) -> String {
        let base = Path::new(&self.path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.clone());
        let total = self
            .total_pages
            .map_or_else(|| "?".to_string(), |total| total.to_string());
        format!("{} ({}/{})", base, self.page, total)
    }
}

/// Bookmarks and remembered reading positions, persisted as JSON next to
/// the config.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Bookmarks {
    #[serde(default)]
    pub bookmarks: Vec<Bookmark>,
    /// Last 0-based reading position per archive path.
    #[serde(default)]
    pub positions: HashMap<String, usize>,
    /// Where to save. In-memory only when `None`.
    #[serde(skip)]
    file: Option<PathBuf>,
}

fn get_bookmarks_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("comic-tui");

    fs::create_dir_all(&config_dir).ok();
    config_dir.join("bookmarks.json")
}

impl Bookmarks {
    pub fn load() -> Self {
        Self::load_from(get_bookmarks_path())
    }

    pub fn load_from(path: PathBuf) -> Self {
        let mut bookmarks = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("Ignoring malformed bookmarks {}: {}", path.display(), e);
                Bookmarks::default()
            }),
            Err(_) => Bookmarks::default(),
        };
        bookmarks.file = Some(path);
        bookmarks
    }

    pub fn save(&self) {
        let Some(path) = &self.file else {
            return;
        };
        match serde_json::to_string_pretty(self) {
            Ok(content) => {
                if let Err(e) = fs::write(path, content) {
                    log::warn!("Couldn't write bookmarks {}: {}", path.display(), e);
                }
            }
            Err(e) => log::warn!("Couldn't serialize bookmarks: {}", e),
        }
    }

    /// Bookmarks `page` (1-based) of the archive at `path`. An existing
    /// bookmark for the same archive is moved to the new page.
    pub fn add(&mut self, path: &str, page: usize, total_pages: Option<usize>) -> &Bookmark {
        let added = SystemTime::now();
        let index = match self.bookmarks.iter().position(|b| b.path == path) {
            Some(index) => {
                let bookmark = &mut self.bookmarks[index];
                bookmark.page = page;
                bookmark.total_pages = total_pages;
                bookmark.added = added;
                index
            }
            None => {
                self.bookmarks.push(Bookmark {
                    path: path.to_string(),
                    page,
                    total_pages,
                    added,
                });
                self.bookmarks.len() - 1
            }
        };
        self.save();
        &self.bookmarks[index]
    }

    pub fn remove(&mut self, index: usize) -> Option<Bookmark> {
        if index >= self.bookmarks.len() {
            return None;
        }
        let removed = self.bookmarks.remove(index);
        self.save();
        Some(removed)
    }

    pub fn list(&self) -> &[Bookmark] {
        &self.bookmarks
    }

    pub fn get(&self, index: usize) -> Option<&Bookmark> {
        self.bookmarks.get(index)
    }

    pub fn len(&self) -> usize {
        self.bookmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_empty()
    }

    pub fn reading_position(&self, path: &str) -> Option<usize> {
        self.positions.get(path).copied()
    }

    pub fn set_reading_position(&mut self, path: &str, position: usize) {
        self.positions.insert(path.to_string(), position);
        self.save();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_bookmark_updates_in_place() {
        let mut bookmarks = Bookmarks::default();
        bookmarks.add("/comics/a.cbz", 3, Some(20));
        bookmarks.add("http://host/%d.jpg", 1, None);
        let first_added = bookmarks.get(0).unwrap().added;

        let updated = bookmarks.add("/comics/a.cbz", 12, Some(20)).clone();
        assert_eq!(bookmarks.len(), 2);
        assert_eq!(updated.page, 12);
        assert!(updated.added >= first_added);
        assert_eq!(bookmarks.list()[0], updated);
    }

    #[test]
    fn test_labels() {
        let mut bookmarks = Bookmarks::default();
        bookmarks.add("/comics/a.cbz", 3, Some(20));
        bookmarks.add("http://host/ch/%d.jpg", 5, None);

        assert_eq!(bookmarks.list()[0].label(), "a.cbz (3/20)");
        assert_eq!(bookmarks.list()[1].label(), "%d.jpg (5/?)");
    }

    #[test]
    fn test_persisted_between_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("bookmarks.json");

        let mut bookmarks = Bookmarks::load_from(file.clone());
        assert!(bookmarks.is_empty());
        bookmarks.add("/comics/a", 2, Some(4));
        bookmarks.set_reading_position("/comics/b.cbr", 17);

        let mut reloaded = Bookmarks::load_from(file.clone());
        assert_eq!(reloaded.list(), bookmarks.list());
        assert_eq!(reloaded.reading_position("/comics/b.cbr"), Some(17));
        assert_eq!(reloaded.reading_position("/comics/a"), None);

        assert!(reloaded.remove(0).is_some());
        assert!(reloaded.remove(0).is_none());
        assert!(Bookmarks::load_from(file).is_empty());
    }

    #[test]
    fn test_malformed_file_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("bookmarks.json");
        fs::write(&file, "{ not json").unwrap();

        let bookmarks = Bookmarks::load_from(file);
        assert!(bookmarks.is_empty());
        assert!(bookmarks.positions.is_empty());
    }
}
