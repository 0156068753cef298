use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::fetcher::FetchError;
use crate::parser::embedded_state;

/// Locale phrases the site shows instead of results.
pub const ZERO_RESULT_MARKERS: &[&str] = &[
    "Niczego nie znaleźliśmy",
    "Nie znaleźliśmy",
    "Brak wyników",
    "0 ogłoszeń",
];

static OG_URL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:url"]"#).unwrap());
static CANONICAL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"link[rel="canonical"]"#).unwrap());
static PAGE_PARAM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"page=(\d+)").unwrap());

pub fn is_zero_results(html: &str) -> bool {
    let lower = html.to_lowercase();
    ZERO_RESULT_MARKERS
        .iter()
        .any(|m| lower.contains(&m.to_lowercase()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastPage {
    Found(u32),
    NotFound,
}

/// Read `page=<N>` off the canonical URL the page advertises.
pub fn detect_last_page(html: &str) -> LastPage {
    let document = Html::parse_document(html);
    let canonical = document
        .select(&OG_URL)
        .find_map(|m| m.value().attr("content"))
        .or_else(|| {
            document
                .select(&CANONICAL)
                .find_map(|l| l.value().attr("href"))
        });

    canonical
        .and_then(|url| PAGE_PARAM.captures(url))
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .map(LastPage::Found)
        .unwrap_or(LastPage::NotFound)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    FetchFailed(String),
    ZeroResults,
    /// Carries the last data-bearing page index.
    LastPage(u32),
    PageLimit(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub contributes: bool,
    pub stop: Option<StopReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastPageState {
    Pending,
    Known(u32),
    Unknown,
}

/// Per-query stopping state. Last-page detection runs at most once, on the first
/// fetched page that carries no listings.
#[derive(Debug)]
pub struct Termination {
    last_page: LastPageState,
}

impl Default for Termination {
    fn default() -> Self {
        Self::new()
    }
}

impl Termination {
    pub fn new() -> Self {
        Self {
            last_page: LastPageState::Pending,
        }
    }

    pub fn last_page(&self) -> Option<u32> {
        match self.last_page {
            LastPageState::Known(n) => Some(n),
            _ => None,
        }
    }

    pub fn assess(&mut self, page: u32, fetched: Result<&str, &FetchError>) -> Verdict {
        let html = match fetched {
            Ok(html) => html,
            Err(e) => {
                return Verdict {
                    contributes: false,
                    stop: Some(StopReason::FetchFailed(e.to_string())),
                }
            }
        };

        if is_zero_results(html) {
            return Verdict {
                contributes: false,
                stop: Some(StopReason::ZeroResults),
            };
        }

        let contributes = match embedded_state::extract(html) {
            Ok(listings) => !listings.is_empty(),
            Err(e) => {
                warn!("Page {} has no usable listings state: {}", page, e);
                false
            }
        };

        if !contributes && self.last_page == LastPageState::Pending {
            self.last_page = match detect_last_page(html) {
                LastPage::Found(n) => {
                    let last = n.saturating_sub(1);
                    info!("Detected last page: {}", last);
                    LastPageState::Known(last)
                }
                LastPage::NotFound => {
                    debug!("No page number in canonical URL on page {}", page);
                    LastPageState::Unknown
                }
            };
        }

        let stop = match self.last_page {
            LastPageState::Known(last) if page >= last => Some(StopReason::LastPage(last)),
            _ => None,
        };

        Verdict { contributes, stop }
    }
}
