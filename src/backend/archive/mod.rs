//! Page sources: unpacked directories, compressed archives and remote image
//! sequences, all behind the one [`Archive`] type.
//!
//! Every backend answers page loads from the shared [`PageCache`] first and
//! stores what it had to read there, tagged with [`KeepReason::PRELOAD`].

mod decode;
mod dir;
#[cfg(feature = "rar")]
mod rarfile;
mod remote;
mod zipfile;

pub use self::decode::decode_page;
pub use self::dir::DirArchive;
#[cfg(feature = "rar")]
pub use self::rarfile::RarArchive;
pub use self::remote::RemoteArchive;
pub use self::zipfile::ZipArchive;

use image::{DynamicImage, ImageFormat};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use crate::backend::cache::{KeepReason, PageCache};
use crate::backend::config::Config;
use crate::backend::error::{Error, Result};

pub const MAX_ARCHIVE_ENTRIES: usize = 4096 * 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Unpacked,
    Packed,
    Remote,
}

pub enum Archive {
    Dir(DirArchive),
    Zip(ZipArchive),
    #[cfg(feature = "rar")]
    Rar(RarArchive),
    Remote(RemoteArchive),
}

impl Archive {
    /// Picks a backend for `target`, which is either a filesystem path or an
    /// http(s) URL.
    pub async fn open(target: &str, cache: Arc<PageCache>, config: &Config) -> Result<Self> {
        if is_likely_http_url(target) {
            return Ok(Archive::Remote(RemoteArchive::open(target, cache, config).await?));
        }

        let path = Path::new(target).to_path_buf();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::Construction(format!("{}: {}", target, e)))?;

        if metadata.is_dir() {
            let archive =
                tokio::task::spawn_blocking(move || DirArchive::open(&path, cache)).await??;
            return Ok(Archive::Dir(archive));
        }

        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "zip" | "cbz" => {
                let archive =
                    tokio::task::spawn_blocking(move || ZipArchive::open(&path, cache)).await??;
                Ok(Archive::Zip(archive))
            }
            #[cfg(feature = "rar")]
            "rar" | "cbr" => {
                let archive =
                    tokio::task::spawn_blocking(move || RarArchive::open(&path, cache)).await??;
                Ok(Archive::Rar(archive))
            }
            #[cfg(not(feature = "rar"))]
            "rar" | "cbr" => Err(Error::UnsupportedArchive(
                "rar support was not compiled in, please unpack it first".to_string(),
            )),
            "7z" | "tar" | "tgz" | "gz" | "tbz2" | "cb7" | "cbt" | "lha" => Err(
                Error::UnsupportedArchive(format!("{}, please unpack it first", ext)),
            ),
            _ => Err(Error::UnsupportedArchive(format!(
                "unknown archive type: {}",
                target
            ))),
        }
    }

    pub async fn load(
        &self,
        i: usize,
        autorotate: bool,
        n_preload: usize,
    ) -> Result<Arc<DynamicImage>> {
        match self {
            Archive::Dir(ar) => ar.load(i, autorotate).await,
            Archive::Zip(ar) => ar.load(i, autorotate).await,
            #[cfg(feature = "rar")]
            Archive::Rar(ar) => ar.load(i, autorotate).await,
            Archive::Remote(ar) => ar.load(i, autorotate, n_preload).await,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Archive::Dir(_) => Kind::Unpacked,
            Archive::Zip(_) => Kind::Packed,
            #[cfg(feature = "rar")]
            Archive::Rar(_) => Kind::Packed,
            Archive::Remote(_) => Kind::Remote,
        }
    }

    pub fn archive_name(&self) -> &str {
        match self {
            Archive::Dir(ar) => ar.archive_name(),
            Archive::Zip(ar) => ar.archive_name(),
            #[cfg(feature = "rar")]
            Archive::Rar(ar) => ar.archive_name(),
            Archive::Remote(ar) => ar.archive_name(),
        }
    }

    pub fn name(&self, i: usize) -> Result<String> {
        match self {
            Archive::Dir(ar) => ar.name(i).map(str::to_string),
            Archive::Zip(ar) => ar.name(i).map(str::to_string),
            #[cfg(feature = "rar")]
            Archive::Rar(ar) => ar.name(i).map(str::to_string),
            Archive::Remote(ar) => Ok(ar.name(i)),
        }
    }

    /// Number of pages, or `None` when the source can't be enumerated.
    pub fn len(&self) -> Option<usize> {
        match self {
            Archive::Dir(ar) => Some(ar.len()),
            Archive::Zip(ar) => Some(ar.len()),
            #[cfg(feature = "rar")]
            Archive::Rar(ar) => Some(ar.len()),
            Archive::Remote(_) => None,
        }
    }

    pub fn close(self) -> Result<()> {
        match self {
            Archive::Remote(ar) => {
                ar.close();
                Ok(())
            }
            // Local backends only hold file handles for the duration of a load.
            _ => Ok(()),
        }
    }
}

pub fn is_likely_http_url(s: &str) -> bool {
    let s = s.trim_start().to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://")
}

/// Whether `name` has an extension of an image format we can decode.
pub fn is_image_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ImageFormat::from_extension)
        .is_some_and(|format| format.reading_enabled())
}

/// Numeric-aware ordering, so that `page2` comes before `page10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natord::compare(a, b)
}

fn check_bounds(i: usize, len: usize) -> Result<()> {
    if i >= len {
        return Err(Error::OutOfBounds { index: i, len });
    }
    Ok(())
}

/// Cache-first load shared by the local backends. `read` runs on the
/// blocking pool and produces the raw bytes of page `i`. `generation` is the
/// cache generation the archive was opened in; once the cache moves on the
/// archive neither reads nor writes it.
async fn load_cached<F>(
    cache: &PageCache,
    generation: u64,
    i: usize,
    autorotate: bool,
    read: F,
) -> Result<Arc<DynamicImage>>
where
    F: FnOnce() -> Result<Vec<u8>> + Send + 'static,
{
    if let Some(page) = cache.get_if_current(generation, i) {
        return Ok(page.image);
    }

    let image = tokio::task::spawn_blocking(move || {
        let bytes = read()?;
        decode_page(&bytes, autorotate)
    })
    .await??;

    let image = Arc::new(image);
    cache.insert_if_current(generation, i, image.clone(), KeepReason::PRELOAD);
    Ok(image)
}
