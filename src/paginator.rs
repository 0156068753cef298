use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{info, warn};

use crate::fetcher::PageSource;
use crate::oracle::{StopReason, Termination};
use crate::query::{build_search_url, with_page, Query};

/// Politeness wait between two page fetches of the same query.
#[async_trait]
pub trait Delay: Send + Sync {
    async fn wait(&self);
}

/// Uniformly distributed wait in `[min, max]`.
pub struct RandomDelay {
    min: Duration,
    max: Duration,
}

impl RandomDelay {
    pub fn new(min: Duration, max: Duration) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self { min, max }
    }

    fn pick(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let range = self.min.as_secs_f64()..=self.max.as_secs_f64();
        Duration::from_secs_f64(rand::thread_rng().gen_range(range))
    }
}

#[async_trait]
impl Delay for RandomDelay {
    async fn wait(&self) {
        tokio::time::sleep(self.pick()).await;
    }
}

/// Used when the configured delay range is zero, and by tests.
pub struct NoDelay;

#[async_trait]
impl Delay for NoDelay {
    async fn wait(&self) {}
}

/// What is being paginated: a built query or a search URL pasted by hand.
#[derive(Debug, Clone)]
pub enum Target {
    Query(Query),
    Manual(url::Url),
}

impl Target {
    pub fn page_url(&self, page: u32) -> String {
        match self {
            Target::Query(q) => build_search_url(q, Some(page)),
            Target::Manual(base) => with_page(base, page),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Target::Query(q) => q.label(),
            Target::Manual(base) => base.to_string(),
        }
    }

    pub fn snapshot_name(&self, page: u32) -> String {
        match self {
            Target::Query(q) => format!(
                "{}_{}_page_{}.html",
                q.brand.to_lowercase(),
                q.model.to_lowercase(),
                page
            ),
            Target::Manual(_) => format!("manual_url_page_{}.html", page),
        }
    }
}

/// One fetched page that carried listings.
#[derive(Debug, Clone)]
pub struct Page {
    pub number: u32,
    pub label: String,
    pub html: String,
}

/// Pages a single target produced, in page order, plus why pagination ended.
#[derive(Debug)]
pub struct PageBatch {
    pub label: String,
    pub pages: Vec<Page>,
    pub stop: StopReason,
    /// Last data-bearing page, when the site advertised one.
    pub last_page: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PaginationOptions {
    pub max_pages: u32,
    pub snapshot_dir: Option<PathBuf>,
}

/// Fetch pages 1..=max_pages strictly in order until the termination state says stop.
pub async fn iterate_search_pages(
    target: &Target,
    source: &dyn PageSource,
    delay: &dyn Delay,
    opts: &PaginationOptions,
) -> PageBatch {
    let label = target.label();
    let mut termination = Termination::new();
    let mut pages = Vec::new();

    for number in 1..=opts.max_pages {
        let url = target.page_url(number);
        info!("[{}] Fetching page {}: {}", label, number, url);

        let fetched = source.fetch(&url).await;
        if let Err(e) = &fetched {
            warn!(query = %label, page = number, error = %e, "Fetch failed");
        }
        let verdict = termination.assess(number, fetched.as_deref());

        if verdict.contributes {
            if let Ok(html) = fetched {
                if let Some(dir) = &opts.snapshot_dir {
                    save_html_snapshot(dir, &target.snapshot_name(number), &html);
                }
                pages.push(Page {
                    number,
                    label: label.clone(),
                    html,
                });
            }
        }

        if let Some(stop) = verdict.stop {
            log_stop(&label, number, &stop);
            return PageBatch {
                label,
                pages,
                stop,
                last_page: termination.last_page(),
            };
        }

        if number < opts.max_pages {
            delay.wait().await;
        }
    }

    let stop = StopReason::PageLimit(opts.max_pages);
    log_stop(&label, opts.max_pages, &stop);
    PageBatch {
        label,
        pages,
        stop,
        last_page: termination.last_page(),
    }
}

fn log_stop(label: &str, page: u32, stop: &StopReason) {
    match stop {
        StopReason::FetchFailed(e) => {
            warn!("[{}] Stop at page {}: fetch failed ({})", label, page, e)
        }
        StopReason::ZeroResults => {
            info!("[{}] Stop at page {}: zero results page", label, page)
        }
        StopReason::LastPage(last) => {
            info!("[{}] Stop at page {}: reached last page {}", label, page, last)
        }
        StopReason::PageLimit(max) => info!("[{}] Stop: page limit {} reached", label, max),
    }
}

/// Snapshot write failures are logged and otherwise ignored.
fn save_html_snapshot(dir: &Path, name: &str, html: &str) {
    let path = dir.join(name);
    let result = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, html));
    if let Err(e) = result {
        warn!("Failed to save snapshot {}: {}", path.display(), e);
    }
}
