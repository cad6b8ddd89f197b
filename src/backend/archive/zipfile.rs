use image::DynamicImage;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{MAX_ARCHIVE_ENTRIES, check_bounds, is_image_name, load_cached, natural_cmp};
use crate::backend::cache::PageCache;
use crate::backend::error::{Error, Result};

struct ZipEntry {
    name: String,
    index: usize,
}

/// Images inside a zip/cbz file. The file is reopened for every page read,
/// no handle is kept between loads.
pub struct ZipArchive {
    path: PathBuf,
    name: String,
    entries: Vec<ZipEntry>,
    cache: Arc<PageCache>,
    generation: u64,
}

impl ZipArchive {
    pub fn open(path: &Path, cache: Arc<PageCache>) -> Result<Self> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut zip = open_zip(path)?;
        let mut entries = Vec::new();
        for index in 0..zip.len().min(MAX_ARCHIVE_ENTRIES) {
            let file = zip.by_index_raw(index)?;
            if file.is_dir() || !is_image_name(file.name()) {
                continue;
            }
            entries.push(ZipEntry {
                name: file.name().to_string(),
                index,
            });
        }

        if entries.is_empty() {
            return Err(Error::Construction(format!(
                "{}: no images in the zip file",
                name
            )));
        }
        entries.sort_by(|a, b| natural_cmp(&a.name, &b.name));

        log::info!("Opened zip {} ({} pages)", name, entries.len());

        Ok(ZipArchive {
            path: path.to_path_buf(),
            name,
            entries,
            generation: cache.generation(),
            cache,
        })
    }

    pub async fn load(&self, i: usize, autorotate: bool) -> Result<Arc<DynamicImage>> {
        check_bounds(i, self.entries.len())?;
        let path = self.path.clone();
        let index = self.entries[i].index;
        load_cached(&self.cache, self.generation, i, autorotate, move || {
            let mut zip = open_zip(&path)?;
            let file = zip.by_index(index)?;
            let declared = file.size();
            Ok(read_entry(file, declared)?)
        })
        .await
    }

    pub fn name(&self, i: usize) -> Result<&str> {
        check_bounds(i, self.entries.len())?;
        Ok(&self.entries[i].name)
    }

    pub fn archive_name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Upper bound for trusting the size an entry header declares.
const MAX_PREALLOC: u64 = 64 << 20;

fn read_entry(mut file: impl Read, declared_size: u64) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(declared_size.min(MAX_PREALLOC) as usize);
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn open_zip(path: &Path) -> Result<zip::ZipArchive<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(zip::ZipArchive::new(BufReader::new(file))?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::archive::tests::png_bytes;
    use crate::backend::error::ErrorKind;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    pub(crate) fn write_zip(path: &Path, files: &[(&str, Vec<u8>)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, bytes) in files {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_entries_filtered_and_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("book.cbz");
        write_zip(
            &path,
            &[
                ("ch1/page10.png", png_bytes(10, 1, 0)),
                ("ComicInfo.xml", b"<ComicInfo/>".to_vec()),
                ("ch1/page2.png", png_bytes(2, 1, 0)),
                ("ch1/page1.png", png_bytes(1, 1, 0)),
            ],
        );

        let cache = PageCache::shared();
        let archive = ZipArchive::open(&path, cache.clone()).unwrap();
        assert_eq!(archive.len(), 3);
        assert_eq!(archive.name(0).unwrap(), "ch1/page1.png");
        assert_eq!(archive.name(2).unwrap(), "ch1/page10.png");

        let page = archive.load(2, false).await.unwrap();
        assert_eq!(page.width(), 10);
        assert!(cache.contains(2));
        assert_eq!(archive.load(3, false).await.unwrap_err().kind(), ErrorKind::OutOfBounds);
    }

    #[test]
    fn test_zip_without_images() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.zip");
        write_zip(&path, &[("readme.txt", b"hello".to_vec())]);

        let err = ZipArchive::open(&path, PageCache::shared()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Construction);
    }

    #[test]
    fn test_declared_size_is_not_trusted() {
        let data = png_bytes(3, 1, 0);
        let bytes = read_entry(&data[..], u64::MAX).unwrap();
        assert_eq!(bytes, data);
        assert!(bytes.capacity() as u64 <= MAX_PREALLOC);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_decode_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.zip");
        write_zip(&path, &[("1.png", b"not really a png".to_vec())]);

        let archive = ZipArchive::open(&path, PageCache::shared()).unwrap();
        let err = archive.load(0, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
