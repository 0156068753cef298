use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::fetcher::{HttpFetcher, PageSource};
use crate::paginator::{
    iterate_search_pages, Delay, NoDelay, Page, PageBatch, PaginationOptions, RandomDelay, Target,
};
use crate::parser::{self, merge::UnifiedRecord};
use crate::settings::ScrapeConfig;

const PARSE_CHUNK: usize = 500;

/// What one pagination worker owns: its own connection/cookie session and its own
/// politeness delay.
pub struct Session {
    pub source: Box<dyn PageSource>,
    pub delay: Box<dyn Delay>,
}

pub trait Sessions: Send + Sync {
    fn open(&self, target: &Target) -> Result<Session>;
}

pub struct HttpSessions {
    pub timeout: Duration,
    pub delay_min: Duration,
    pub delay_max: Duration,
}

impl HttpSessions {
    fn delay(&self) -> Box<dyn Delay> {
        if self.delay_min.is_zero() && self.delay_max.is_zero() {
            Box::new(NoDelay)
        } else {
            Box::new(RandomDelay::new(self.delay_min, self.delay_max))
        }
    }
}

impl Sessions for HttpSessions {
    fn open(&self, _target: &Target) -> Result<Session> {
        Ok(Session {
            source: Box::new(HttpFetcher::new(self.timeout)?),
            delay: self.delay(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub pagination: PaginationOptions,
    pub show_progress: bool,
}

/// Turn the query-set file into targets. A bad entry is logged and skipped; the rest still run.
pub fn targets_from_config(config: &ScrapeConfig) -> Vec<Target> {
    config
        .queries()
        .into_iter()
        .filter_map(|(label, query)| match query {
            Ok(q) => Some(Target::Query(q)),
            Err(e) => {
                warn!(query = %label, error = %e, "Skipping query");
                None
            }
        })
        .collect()
}

/// Paginate every target, at most `concurrency` at a time, and return all contributing pages.
/// Pages of one target stay in page order; targets come back in input order.
pub async fn collect_pages(
    targets: Vec<Target>,
    sessions: Arc<dyn Sessions>,
    opts: &BatchOptions,
) -> Vec<Page> {
    let total = targets.len();
    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let pb = progress_bar(
        total,
        opts.show_progress,
        "[{elapsed_precise}] {bar:40} {pos}/{len} queries {msg}",
    );

    let (tx, mut rx) = tokio::sync::mpsc::channel::<(usize, PageBatch)>(total.max(1));
    let mut handles: Vec<(String, JoinHandle<()>)> = Vec::with_capacity(total);

    for (idx, target) in targets.into_iter().enumerate() {
        let sem = Arc::clone(&semaphore);
        let sessions = Arc::clone(&sessions);
        let pagination = opts.pagination.clone();
        let tx = tx.clone();
        let label = target.label();

        let handle = tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let session = match sessions.open(&target) {
                Ok(s) => s,
                Err(e) => {
                    warn!(query = %target.label(), error = %e, "Could not open HTTP session");
                    return;
                }
            };
            info!("Scraping {}", target.label());
            let source = session.source.as_ref();
            let batch =
                iterate_search_pages(&target, source, session.delay.as_ref(), &pagination).await;
            let _ = tx.send((idx, batch)).await;
        });
        handles.push((label, handle));
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut batches = Vec::with_capacity(total);
    while let Some((idx, batch)) = rx.recv().await {
        pb.set_message(batch.label.clone());
        info!(
            "{}: {} pages with listings, last page: {:?}, stopped: {:?}",
            batch.label,
            batch.pages.len(),
            batch.last_page,
            batch.stop
        );
        batches.push((idx, batch));
        pb.inc(1);
    }
    pb.finish_and_clear();

    // A task that panicked never sent its batch; its query contributes nothing.
    for (label, handle) in handles {
        if let Err(e) = handle.await {
            warn!(query = %label, error = %e, "Query task failed");
        }
    }

    batches.sort_by_key(|(idx, _)| *idx);
    let pages: Vec<Page> = batches.into_iter().flat_map(|(_, b)| b.pages).collect();
    info!("Collected {} pages", pages.len());
    pages
}

/// Extract + merge every page. A page whose embedded state is unusable contributes nothing.
pub fn parse_pages(pages: &[Page], show_progress: bool) -> Vec<UnifiedRecord> {
    let pb = progress_bar(
        pages.len(),
        show_progress,
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pages ({per_sec})",
    );

    let mut records = Vec::new();
    for chunk in pages.chunks(PARSE_CHUNK) {
        let results: Vec<Vec<UnifiedRecord>> = chunk.par_iter().map(parse_page).collect();
        for page_records in results {
            records.extend(page_records);
        }
        pb.inc(chunk.len() as u64);
    }
    pb.finish_and_clear();

    info!("Parsed {} listings", records.len());
    records
}

fn parse_page(page: &Page) -> Vec<UnifiedRecord> {
    match parser::parse_search_page(&page.html) {
        Ok(records) => records,
        Err(e) => {
            warn!(query = %page.label, page = page.number, error = %e, "Page skipped");
            Vec::new()
        }
    }
}

fn progress_bar(len: usize, visible: bool, template: &str) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar().template(template) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}
