use image::DynamicImage;
use parking_lot::Mutex;
use regex::Regex;
use reqwest::header::REFERER;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::decode_page;
use crate::backend::cache::{KeepReason, PageCache};
use crate::backend::config::Config;
use crate::backend::error::{Error, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/100.0.4896.127 Safari/537.36";

/// Where a numbered sequence usually starts.
const FIRST_PAGE_CANDIDATES: [usize; 2] = [0, 1];

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%([0-9]{0,2})d").expect("valid placeholder regex"));

// ASCII classes only: a non-ASCII letter right after the number still ends it.
static PAGE_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:/([0-9]{1,3})(?:/|[^0-9A-Za-z_]))|(?:([0-9]{1,3})\.(?:jp|png|gif))")
        .expect("valid page param regex")
});

/// A URL with a printf-style page number placeholder, e.g.
/// `https://host/comic/%03d.jpg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    prefix: String,
    suffix: String,
    width: usize,
    zero_pad: bool,
}

impl UrlTemplate {
    /// Accepts a URL that already contains a `%d`-style placeholder.
    pub fn parse(url: &str) -> Option<Self> {
        let caps = PLACEHOLDER.captures(url)?;
        let whole = caps.get(0)?;
        let flags = caps.get(1).map_or("", |m| m.as_str());
        Some(UrlTemplate {
            prefix: url[..whole.start()].to_string(),
            suffix: url[whole.end()..].to_string(),
            width: flags.parse().unwrap_or(0),
            zero_pad: flags.starts_with('0'),
        })
    }

    /// Guesses the page number of a sample page URL: the last short run of
    /// digits that is a path segment or an image file stem. Returns the
    /// template together with the sample's page number.
    pub fn infer(sample_url: &str) -> Option<(Self, usize)> {
        let caps = PAGE_PARAM.captures_iter(sample_url).last()?;
        let page = caps.get(1).or_else(|| caps.get(2))?;
        let template = UrlTemplate {
            prefix: sample_url[..page.start()].to_string(),
            suffix: sample_url[page.end()..].to_string(),
            width: 0,
            zero_pad: false,
        };
        Some((template, page.as_str().parse().ok()?))
    }

    pub fn url(&self, page: usize) -> String {
        let number = if self.zero_pad {
            format!("{:0width$}", page, width = self.width)
        } else {
            format!("{:width$}", page, width = self.width)
        };
        format!("{}{}{}", self.prefix, number, self.suffix)
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = match (self.zero_pad, self.width) {
            (_, 0) => String::new(),
            (true, width) => format!("0{}", width),
            (false, width) => width.to_string(),
        };
        write!(f, "{}%{}d{}", self.prefix, flags, self.suffix)
    }
}

enum Claim {
    /// The caller now owns the fetch and must release it when done.
    Owner(FetchClaim),
    /// Someone else is fetching; `Notify` fires when they release.
    Waiter(Arc<Notify>),
}

/// Membership of a page in the in-flight set. Dropping the claim removes the
/// page from the set and wakes anyone waiting on it, whatever the outcome of
/// the fetch.
struct FetchClaim {
    fetcher: Arc<Fetcher>,
    index: usize,
}

impl Drop for FetchClaim {
    fn drop(&mut self) {
        if let Some(notify) = self.fetcher.in_flight.lock().remove(&self.index) {
            notify.notify_waiters();
        }
    }
}

struct Fetcher {
    template: UrlTemplate,
    template_name: String,
    referer: Option<String>,
    first_page_offset: usize,
    client: reqwest::Client,
    cache: Arc<PageCache>,
    /// Cache generation the sequence was opened in.
    generation: u64,
    in_flight: Mutex<HashMap<usize, Arc<Notify>>>,
    wait_timeout: Duration,
}

/// A numbered image sequence served over HTTP. Its length is never known.
pub struct RemoteArchive {
    fetcher: Arc<Fetcher>,
}

impl RemoteArchive {
    pub async fn open(url: &str, cache: Arc<PageCache>, config: &Config) -> Result<Self> {
        let (template, sample_page) = match UrlTemplate::parse(url) {
            Some(template) => (template, None),
            None => {
                let (template, page) = UrlTemplate::infer(url).ok_or_else(|| {
                    Error::Construction(
                        "couldn't determine the URL template from the sample URL".to_string(),
                    )
                })?;
                (template, Some(page))
            }
        };

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.http_timeout())
            .build()?;

        let mut fetcher = Fetcher {
            template_name: template.to_string(),
            template,
            referer: config.http_referer.clone().filter(|r| !r.is_empty()),
            first_page_offset: 0,
            client,
            generation: cache.generation(),
            cache,
            in_flight: Mutex::new(HashMap::new()),
            wait_timeout: config.fetch_wait_timeout(),
        };

        let mut candidates = FIRST_PAGE_CANDIDATES.to_vec();
        if let Some(page) = sample_page.filter(|page| !candidates.contains(page)) {
            candidates.push(page);
        }

        let mut first_page = None;
        for candidate in candidates {
            // The first page always gets its orientation fixed.
            match fetcher.fetch_source_page(candidate, true).await {
                Ok(image) => {
                    first_page = Some((candidate, image));
                    break;
                }
                Err(e) => log::info!("First image not located at index {}: {}", candidate, e),
            }
        }
        let (offset, image) = first_page
            .ok_or_else(|| Error::Construction("couldn't locate the first image".to_string()))?;

        fetcher.first_page_offset = offset;
        fetcher
            .cache
            .insert_if_current(fetcher.generation, 0, Arc::new(image), KeepReason::PRELOAD);

        log::info!(
            "Opened remote sequence {} (first page at {})",
            fetcher.template_name,
            offset
        );

        Ok(RemoteArchive {
            fetcher: Arc::new(fetcher),
        })
    }

    /// Loads page `i`, then starts background fetches for the pages within
    /// `n_preload` of it. Only the primary page's failure is reported.
    pub async fn load(
        &self,
        i: usize,
        autorotate: bool,
        n_preload: usize,
    ) -> Result<Arc<DynamicImage>> {
        let image = self.fetcher.load_or_wait(i, autorotate || i == 0).await?;
        self.fetcher.preload_around(i, n_preload, autorotate);
        Ok(image)
    }

    pub fn name(&self, i: usize) -> String {
        self.fetcher.template.url(i + self.fetcher.first_page_offset)
    }

    pub fn archive_name(&self) -> &str {
        &self.fetcher.template_name
    }

    pub fn first_page_offset(&self) -> usize {
        self.fetcher.first_page_offset
    }

    pub fn close(self) {
        let pending = self.fetcher.in_flight.lock().len();
        if pending > 0 {
            log::debug!("Abandoning {} in-flight page fetches", pending);
        }
    }
}

impl Fetcher {
    fn claim(self: &Arc<Self>, i: usize) -> Claim {
        let mut in_flight = self.in_flight.lock();
        if let Some(notify) = in_flight.get(&i) {
            return Claim::Waiter(notify.clone());
        }
        in_flight.insert(i, Arc::new(Notify::new()));
        Claim::Owner(FetchClaim {
            fetcher: self.clone(),
            index: i,
        })
    }

    fn is_fetching(&self, i: usize, notify: &Arc<Notify>) -> bool {
        self.in_flight
            .lock()
            .get(&i)
            .is_some_and(|current| Arc::ptr_eq(current, notify))
    }

    async fn load_or_wait(self: &Arc<Self>, i: usize, autorotate: bool) -> Result<Arc<DynamicImage>> {
        let started = Instant::now();
        let deadline = started + self.wait_timeout;
        loop {
            if let Some(page) = self.cached(i) {
                return Ok(page);
            }

            match self.claim(i) {
                Claim::Owner(claim) => {
                    let image = Arc::new(self.fetch_page(i, autorotate).await?);
                    // Store before the claim is released so woken waiters hit the cache.
                    self.cache
                        .insert_if_current(self.generation, i, image.clone(), KeepReason::PRELOAD);
                    drop(claim);
                    return Ok(image);
                }
                Claim::Waiter(notify) => {
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    // The other fetch may have finished between the claim and `enable`.
                    if self.cached(i).is_some() || !self.is_fetching(i, &notify) {
                        continue;
                    }
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(Error::Timeout {
                            index: i,
                            waited: started.elapsed(),
                        });
                    }
                }
            }
        }
    }

    fn preload_around(self: &Arc<Self>, i: usize, n_preload: usize, autorotate: bool) {
        for j in i.saturating_sub(n_preload)..=i.saturating_add(n_preload) {
            if j == i || self.cached(j).is_some() {
                continue;
            }
            let Claim::Owner(claim) = self.claim(j) else {
                continue;
            };

            let fetcher = self.clone();
            tokio::spawn(async move {
                match fetcher.fetch_page(j, autorotate || j == 0).await {
                    Ok(image) => {
                        if !fetcher.cache.insert_if_current(
                            fetcher.generation,
                            j,
                            Arc::new(image),
                            KeepReason::PRELOAD,
                        ) {
                            log::debug!("Dropping preloaded page {} of a closed archive", j);
                        }
                    }
                    Err(e) => log::warn!("Couldn't preload page {}: {}", j, e),
                }
                drop(claim);
            });
        }
    }

    fn cached(&self, i: usize) -> Option<Arc<DynamicImage>> {
        self.cache
            .get_if_current(self.generation, i)
            .map(|page| page.image)
    }

    async fn fetch_page(&self, i: usize, autorotate: bool) -> Result<DynamicImage> {
        self.fetch_source_page(i + self.first_page_offset, autorotate)
            .await
    }

    async fn fetch_source_page(&self, page: usize, autorotate: bool) -> Result<DynamicImage> {
        let url = self.template.url(page);
        let mut request = self.client.get(&url);
        if let Some(referer) = &self.referer {
            request = request.header(REFERER, referer);
        }

        log::debug!("GET {}", url);
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            log::warn!("Got status code {} for {}", status, url);
        }
        let bytes = response.bytes().await?;

        let image = tokio::task::spawn_blocking(move || decode_page(&bytes, autorotate)).await??;
        Ok(image)
    }
}
