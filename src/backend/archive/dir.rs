use image::DynamicImage;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{check_bounds, is_image_name, load_cached, natural_cmp};
use crate::backend::cache::PageCache;
use crate::backend::error::{Error, Result};

/// Images in a plain directory on disk.
pub struct DirArchive {
    root: PathBuf,
    name: String,
    filenames: Vec<String>,
    cache: Arc<PageCache>,
    generation: u64,
}

impl DirArchive {
    /// Opens `path`, descending into subdirectories when the images of an
    /// extracted archive ended up nested a few levels down.
    pub fn open(path: &Path, cache: Arc<PageCache>) -> Result<Self> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let root = find_image_dir(path)
            .map_err(|e| Error::Construction(format!("{}: {}", name, e)))?
            .ok_or_else(|| Error::Construction(format!("{}: no images in the directory", name)))?;

        let mut filenames = image_files_in(&root)?;
        filenames.sort_by(|a, b| natural_cmp(a, b));

        log::info!(
            "Opened directory {} ({} pages in {})",
            name,
            filenames.len(),
            root.display()
        );

        Ok(DirArchive {
            root,
            name,
            filenames,
            generation: cache.generation(),
            cache,
        })
    }

    pub async fn load(&self, i: usize, autorotate: bool) -> Result<Arc<DynamicImage>> {
        check_bounds(i, self.filenames.len())?;
        let path = self.root.join(&self.filenames[i]);
        load_cached(&self.cache, self.generation, i, autorotate, move || {
            Ok(fs::read(path)?)
        })
        .await
    }

    pub fn name(&self, i: usize) -> Result<&str> {
        check_bounds(i, self.filenames.len())?;
        Ok(&self.filenames[i])
    }

    pub fn archive_name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.filenames.len()
    }
}

fn image_files_in(dir: &Path) -> io::Result<Vec<String>> {
    let mut filenames = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_image_name(&name) {
            filenames.push(name);
        }
    }
    Ok(filenames)
}

/// First directory at or below `dir` that directly contains an image. Siblings
/// are tried in natural order and each is searched fully before the next.
fn find_image_dir(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut subdirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if is_image_name(&entry.file_name().to_string_lossy()) {
            return Ok(Some(dir.to_path_buf()));
        }
    }

    subdirs.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
    for subdir in subdirs {
        match find_image_dir(&subdir) {
            Ok(Some(found)) => return Ok(Some(found)),
            Ok(None) => {}
            Err(e) => log::warn!("Skipping unreadable directory {}: {}", subdir.display(), e),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::archive::tests::png_bytes;
    use crate::backend::error::ErrorKind;

    fn write_png(path: &Path, width: u32) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, png_bytes(width, 1, 0)).unwrap();
    }

    #[test]
    fn test_nested_image_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(root.join("empty")).unwrap();
        write_png(&root.join("sub").join("sub2").join("1.png"), 1);
        fs::write(root.join("info.txt"), b"not a page").unwrap();

        let archive = DirArchive::open(&root, PageCache::shared()).unwrap();
        assert_eq!(archive.root(), root.join("sub").join("sub2"));
        assert_eq!(archive.archive_name(), "root");
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn test_no_images_anywhere() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(root.join("a").join("b")).unwrap();
        fs::write(root.join("a").join("notes.txt"), b"text").unwrap();

        let err = DirArchive::open(&root, PageCache::shared()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Construction);
    }

    #[test]
    fn test_pages_in_natural_order() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["page10.png", "page2.png", "page1.png", "page11.png"] {
            write_png(&tmp.path().join(name), 1);
        }

        let archive = DirArchive::open(tmp.path(), PageCache::shared()).unwrap();
        let names: Vec<_> = (0..archive.len()).map(|i| archive.name(i).unwrap()).collect();
        assert_eq!(names, vec!["page1.png", "page2.png", "page10.png", "page11.png"]);
    }

    #[tokio::test]
    async fn test_load_uses_cache_and_checks_bounds() {
        let tmp = tempfile::tempdir().unwrap();
        write_png(&tmp.path().join("a.png"), 4);
        write_png(&tmp.path().join("b.png"), 5);
        let cache = PageCache::shared();
        let archive = DirArchive::open(tmp.path(), cache.clone()).unwrap();

        let first = archive.load(1, false).await.unwrap();
        assert_eq!(first.width(), 5);
        let cached = cache.get(1).unwrap();
        assert!(Arc::ptr_eq(&first, &cached.image));

        // A hit must not touch the disk.
        fs::remove_file(tmp.path().join("b.png")).unwrap();
        let second = archive.load(1, false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let err = archive.load(2, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfBounds);
        assert_eq!(archive.name(7).unwrap_err().kind(), ErrorKind::OutOfBounds);
    }

    #[tokio::test]
    async fn test_archive_outlived_by_cache_reset() {
        let old_dir = tempfile::tempdir().unwrap();
        write_png(&old_dir.path().join("1.png"), 3);
        write_png(&old_dir.path().join("2.png"), 4);
        let new_dir = tempfile::tempdir().unwrap();
        write_png(&new_dir.path().join("1.png"), 9);

        let cache = PageCache::shared();
        let old = DirArchive::open(old_dir.path(), cache.clone()).unwrap();
        old.load(0, false).await.unwrap();

        cache.reset();
        let new = DirArchive::open(new_dir.path(), cache.clone()).unwrap();
        assert_eq!(new.load(0, false).await.unwrap().width(), 9);

        // The old archive still reads its own pages but leaves the cache alone.
        assert_eq!(old.load(0, false).await.unwrap().width(), 3);
        assert_eq!(old.load(1, false).await.unwrap().width(), 4);
        assert_eq!(cache.cached_indices(), vec![0]);
        assert_eq!(cache.get(0).unwrap().image.width(), 9);
    }
}
