use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;

const SEARCH_BASE_URL: &str = "https://www.otomoto.pl/osobowe";

/// (brand, model) as typed by a user, lowercased → (brand slug, model slug) on the site.
const BRAND_MODEL_SLUGS: &[((&str, &str), (&str, &str))] = &[
    (("volkswagen", "taigo"), ("volkswagen", "taigo")),
    (("renault", "kadjar"), ("renault", "kadjar")),
    (("skoda", "kamiq"), ("skoda", "kamiq")),
    (("seat", "ateca"), ("seat", "ateca")),
    (("ford", "puma"), ("ford", "puma")),
    (("ford", "kuga"), ("ford", "kuga")),
    (("suzuki", "sx4-s-cross"), ("suzuki", "sx4-s-cross")),
    (("honda", "hr-v"), ("honda", "hr-v")),
];

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unsupported brand/model: {brand} {model}")]
    Unsupported { brand: String, model: String },
    #[error("invalid query arguments: {0}")]
    InvalidArgs(String),
    #[error("invalid search url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Search filters shared by every query of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filters {
    pub year_from: u32,
    pub year_to: u32,
    pub price_from: u64,
    pub price_to: u64,
    pub mileage_to: u64,
    #[serde(default = "default_fuel_type")]
    pub fuel_type: String,
    #[serde(default = "default_gearbox")]
    pub gearbox: String,
    #[serde(default = "default_accident_free")]
    pub accident_free: bool,
}

fn default_fuel_type() -> String {
    "petrol".to_string()
}

fn default_gearbox() -> String {
    "manual".to_string()
}

fn default_accident_free() -> bool {
    true
}

/// One brand/model + filter combination. Only constructible for pairs in the slug table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub brand: String,
    pub model: String,
    brand_slug: &'static str,
    model_slug: &'static str,
    pub filters: Filters,
}

impl Query {
    pub fn new(brand: &str, model: &str, filters: Filters) -> Result<Self, QueryError> {
        let (brand_slug, model_slug) =
            lookup_slugs(brand, model).ok_or_else(|| QueryError::Unsupported {
                brand: brand.to_string(),
                model: model.to_string(),
            })?;

        Ok(Self {
            brand: brand.to_string(),
            model: model.to_string(),
            brand_slug,
            model_slug,
            filters,
        })
    }

    /// "brand model" for log lines.
    pub fn label(&self) -> String {
        format!("{} {}", self.brand, self.model)
    }
}

fn lookup_slugs(brand: &str, model: &str) -> Option<(&'static str, &'static str)> {
    let key = (brand.to_lowercase(), model.to_lowercase());
    BRAND_MODEL_SLUGS
        .iter()
        .find(|((b, m), _)| *b == key.0 && *m == key.1)
        .map(|(_, slugs)| *slugs)
}

/// Encode the filter set as a query string. Keys always come out in the same order.
pub fn build_query_params(filters: &Filters, page: Option<u32>) -> String {
    let mut ser = form_urlencoded::Serializer::new(String::new());
    ser.append_pair(
        "search[filter_float_price:from]",
        &filters.price_from.to_string(),
    )
    .append_pair("search[filter_float_price:to]", &filters.price_to.to_string())
    .append_pair("search[filter_float_year:to]", &filters.year_to.to_string())
    .append_pair(
        "search[filter_float_mileage:to]",
        &filters.mileage_to.to_string(),
    )
    .append_pair("search[filter_enum_fuel_type]", &filters.fuel_type)
    .append_pair("search[filter_enum_gearbox]", &filters.gearbox);

    if filters.accident_free {
        ser.append_pair("search[filter_enum_damaged]", "0");
    }
    if let Some(page) = page {
        ser.append_pair("page", &page.to_string());
    }

    ser.finish()
}

pub fn build_search_url(query: &Query, page: Option<u32>) -> String {
    format!(
        "{}/{}/{}/od-{}?{}",
        SEARCH_BASE_URL,
        query.brand_slug,
        query.model_slug,
        query.filters.year_from,
        build_query_params(&query.filters, page)
    )
}

/// Replace (or add) the `page` parameter of a manually supplied search URL.
pub fn with_page(base: &url::Url, page: u32) -> String {
    let pairs: Vec<(String, String)> = base
        .query_pairs()
        .filter(|(k, _)| k != "page")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut url = base.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair("page", &page.to_string());
    url.to_string()
}

pub fn parse_manual_url(raw: &str) -> Result<url::Url, QueryError> {
    url::Url::parse(raw).map_err(|e| QueryError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

// ── Tests ──
