use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use unrar::Archive as Unrar;

use super::{MAX_ARCHIVE_ENTRIES, check_bounds, is_image_name, load_cached, natural_cmp};
use crate::backend::cache::PageCache;
use crate::backend::error::{Error, Result};

struct RarEntry {
    name: String,
    /// Position of the entry among all headers of the archive.
    position: usize,
}

/// Images inside a rar/cbr file. Rar streams can't be seeked into, so every
/// load reopens the archive and skips headers up to the wanted entry.
pub struct RarArchive {
    path: PathBuf,
    name: String,
    entries: Vec<RarEntry>,
    cache: Arc<PageCache>,
    generation: u64,
}

fn rar_error(err: unrar::error::UnrarError) -> Error {
    Error::Rar(err.to_string())
}

impl RarArchive {
    pub fn open(path: &Path, cache: Arc<PageCache>) -> Result<Self> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let listing = Unrar::new(path)
            .open_for_listing()
            .map_err(|e| Error::Construction(format!("{}: {}", name, e)))?;

        let mut entries = Vec::new();
        for (position, header) in listing.enumerate().take(MAX_ARCHIVE_ENTRIES) {
            let header = match header {
                Ok(header) => header,
                Err(e) => {
                    log::warn!("Error reading a file inside the rar archive {}: {}", name, e);
                    break;
                }
            };
            if header.is_directory() {
                continue;
            }
            let entry_name = header.filename.to_string_lossy().into_owned();
            if is_image_name(&entry_name) {
                entries.push(RarEntry {
                    name: entry_name,
                    position,
                });
            }
        }

        if entries.is_empty() {
            return Err(Error::Construction(format!(
                "{}: no supported images in the rar file",
                name
            )));
        }
        entries.sort_by(|a, b| natural_cmp(&a.name, &b.name));

        log::info!("Opened rar {} ({} pages)", name, entries.len());

        Ok(RarArchive {
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
        let target = self.entries[i].position;
        let name = self.name.clone();
        load_cached(&self.cache, self.generation, i, autorotate, move || {
            read_entry(&path, &name, target)
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

fn read_entry(path: &Path, name: &str, target: usize) -> Result<Vec<u8>> {
    let mut archive = Unrar::new(path).open_for_processing().map_err(rar_error)?;
    let mut position = 0;
    while let Some(header) = archive.read_header().map_err(rar_error)? {
        if position == target {
            let (bytes, _) = header.read().map_err(rar_error)?;
            return Ok(bytes);
        }
        archive = header.skip().map_err(rar_error)?;
        position += 1;
    }
    Err(Error::Rar(format!(
        "{}: could not find entry {} inside the rar archive",
        name, target
    )))
}
