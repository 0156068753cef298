use std::collections::HashMap;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::polish::fold_diacritics;
use super::{number_as_f64, number_as_i64, SkipReason};

static SCRIPT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script").unwrap());

/// Top-level key of the framework's state blob.
const STATE_MARKER: &str = "\"props\"";
/// Substring that identifies the cache entry holding the search results.
const LISTINGS_MARKER: &str = "advertSearch";

/// Where the page shape differed from what the extractor expects.
/// The outer document and the inner listings payload fail separately.
#[derive(Debug, Error)]
pub enum EmbeddedStateError {
    #[error("embedded state script not found")]
    ScriptNotFound,
    #[error("embedded state is not valid JSON: {0}")]
    OuterJson(#[source] serde_json::Error),
    #[error("no query cache entry holds the listings")]
    ListingsNotFound,
    #[error("listings payload is not valid JSON: {0}")]
    InnerJson(#[source] serde_json::Error),
    #[error("listings payload has no edge list")]
    MissingEdges,
}

/// Full listing projection from the embedded state.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Listing {
    pub id: String,
    pub title: Option<String>,
    pub date_added: Option<String>,
    pub short_description: String,
    pub url: Option<String>,
    pub seller_name: String,
    pub seller_site: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub version: Option<String>,
    pub price: f64,
    pub currency: Option<String>,
    pub year: i64,
    pub fuel_type: Option<String>,
    pub mileage: i64,
    pub gearbox: Option<String>,
    pub country_code: Option<String>,
    pub country_origin: String,
    pub engine_capacity: i64,
    pub engine_power: i64,
    pub city: String,
    pub region: String,
    pub bump_up: Option<String>,
    pub export_olx: Option<String>,
    pub price_evaluation: Option<String>,
    pub cepik_verified: Option<bool>,
}

/// Pull every listing out of the page's embedded state.
pub fn extract(html: &str) -> Result<Vec<Listing>, EmbeddedStateError> {
    let raw = find_state_script(html)?;
    let state = decode_outer(&raw)?;
    let entry = find_listings_entry(&state)?;
    let payload = decode_inner(entry)?;
    let edges = payload
        .get(LISTINGS_MARKER)
        .and_then(|s| s.get("edges"))
        .and_then(Value::as_array)
        .ok_or(EmbeddedStateError::MissingEdges)?;

    let mut listings = Vec::with_capacity(edges.len());
    for (idx, edge) in edges.iter().enumerate() {
        match parse_edge(edge) {
            Ok(listing) => listings.push(listing),
            Err(reason) => warn!("Skipping listing edge #{}: {}", idx, reason),
        }
    }
    debug!("Embedded state: {} edges, {} listings", edges.len(), listings.len());
    Ok(listings)
}

fn find_state_script(html: &str) -> Result<String, EmbeddedStateError> {
    let document = Html::parse_document(html);
    document
        .select(&SCRIPT)
        .map(|s| s.text().collect::<String>())
        .find(|text| text.contains(STATE_MARKER))
        .ok_or(EmbeddedStateError::ScriptNotFound)
}

/// First decode: the script body itself.
pub fn decode_outer(raw: &str) -> Result<Value, EmbeddedStateError> {
    serde_json::from_str(raw).map_err(EmbeddedStateError::OuterJson)
}

/// props.pageProps.urqlState → the entry whose `data` string mentions the listings query.
pub fn find_listings_entry(state: &Value) -> Result<&str, EmbeddedStateError> {
    state
        .pointer("/props/pageProps/urqlState")
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|cache| cache.values())
        .filter_map(|entry| entry.get("data").and_then(Value::as_str))
        .find(|data| data.contains(LISTINGS_MARKER))
        .ok_or(EmbeddedStateError::ListingsNotFound)
}

/// Second decode: the entry's `data` is itself a JSON document stored as a string.
pub fn decode_inner(data: &str) -> Result<Value, EmbeddedStateError> {
    serde_json::from_str(data).map_err(EmbeddedStateError::InnerJson)
}

pub fn parse_edge(edge: &Value) -> Result<Listing, SkipReason> {
    let advert = edge
        .get("node")
        .filter(|n| n.is_object())
        .ok_or(SkipReason::MissingField("node"))?;

    let id = match advert.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(SkipReason::MissingField("id")),
    };

    // parameters: [{key, value, displayValue}] → two lookups
    let mut params: HashMap<&str, &Value> = HashMap::new();
    let mut display: HashMap<&str, &Value> = HashMap::new();
    for p in advert.get("parameters").and_then(Value::as_array).into_iter().flatten() {
        let Some(key) = p.get("key").and_then(Value::as_str) else {
            continue;
        };
        params.insert(key, p.get("value").unwrap_or(&Value::Null));
        display.insert(key, p.get("displayValue").unwrap_or(&Value::Null));
    }

    let mut services: HashMap<&str, &Value> = HashMap::new();
    for s in advert
        .get("valueAddedServices")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        if let Some(name) = s.get("name").and_then(Value::as_str) {
            services.insert(name, s.get("validity").unwrap_or(&Value::Null));
        }
    }

    let param = |key: &str| params.get(key).and_then(|v| text(v));
    let count = |key: &'static str| -> Result<i64, SkipReason> {
        match params.get(key) {
            None | Some(Value::Null) => Ok(0),
            Some(v) => number_as_i64(v).ok_or_else(|| SkipReason::BadNumber {
                field: key,
                value: v.to_string(),
            }),
        }
    };
    let flag = |key: &str| param(key).or_else(|| services.get(key).and_then(|v| text(v)));
    let at = |path: &str| advert.pointer(path).and_then(text);

    Ok(Listing {
        id,
        title: at("/title"),
        date_added: at("/createdAt"),
        short_description: fold_diacritics(at("/shortDescription").as_deref()),
        url: at("/url"),
        seller_name: fold_diacritics(at("/sellerLink/name").as_deref()),
        seller_site: at("/sellerLink/websiteUrl"),
        brand: param("make"),
        model: param("model"),
        version: param("version"),
        price: safe_price(advert),
        currency: at("/price/amount/currencyCode"),
        year: count("year")?,
        fuel_type: param("fuel_type"),
        mileage: count("mileage")?,
        gearbox: param("gearbox"),
        country_code: param("country_origin"),
        country_origin: fold_diacritics(
            display.get("country_origin").and_then(|v| text(v)).as_deref(),
        ),
        engine_capacity: count("engine_capacity")?,
        engine_power: count("engine_power")?,
        city: fold_diacritics(at("/location/city/name").as_deref()),
        region: fold_diacritics(at("/location/region/name").as_deref()),
        bump_up: flag("bump_up"),
        export_olx: flag("export_olx"),
        price_evaluation: at("/priceEvaluation/indicator"),
        cepik_verified: advert.get("cepikVerified").and_then(Value::as_bool),
    })
}

/// A missing or non-numeric amount is recorded as 0.
fn safe_price(advert: &Value) -> f64 {
    advert
        .pointer("/price/amount/value")
        .and_then(number_as_f64)
        .unwrap_or(0.0)
}

fn text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{edge, results_page, state_script_page};
    use serde_json::json;

    #[test]
    fn fixture_listings() {
        let html = std::fs::read_to_string("tests/fixtures/search_page.html").unwrap();
        let listings = extract(&html).unwrap();
        assert_eq!(listings.len(), 3);

        let first = &listings[0];
        assert_eq!(first.id, "6123456789");
        assert_eq!(first.brand.as_deref(), Some("volkswagen"));
        assert_eq!(first.model.as_deref(), Some("t-roc"));
        assert_eq!(first.version.as_deref(), Some("ver-1-5-tsi-style"));
        assert_eq!(first.price, 69900.0);
        assert_eq!(first.currency.as_deref(), Some("PLN"));
        assert_eq!(first.year, 2020);
        assert_eq!(first.mileage, 45000);
        assert_eq!(first.engine_capacity, 1498);
        assert_eq!(first.engine_power, 150);
        assert_eq!(first.city, "lodz");
        assert_eq!(first.region, "lodzkie");
        assert_eq!(first.seller_name, "Auto zolw Sp. z o.o.");
        assert_eq!(first.country_origin, "Polska");
        assert_eq!(first.country_code.as_deref(), Some("pl"));
        assert_eq!(first.price_evaluation.as_deref(), Some("BELOW"));
        assert_eq!(first.cepik_verified, Some(true));
        assert_eq!(first.bump_up.as_deref(), Some("2025-12-31"));
    }

    #[test]
    fn no_state_script_is_loud() {
        let err = extract("<html><script>var x = 1;</script></html>").unwrap_err();
        assert!(matches!(err, EmbeddedStateError::ScriptNotFound));
    }

    #[test]
    fn outer_decode_failure() {
        let html = state_script_page(r#"{"props": {broken"#);
        assert!(matches!(extract(&html), Err(EmbeddedStateError::OuterJson(_))));
    }

    #[test]
    fn inner_decode_failure() {
        let outer = json!({
            "props": { "pageProps": { "urqlState": {
                "123": { "data": "{\"advertSearch\": {\"edges\": [" }
            }}}
        });
        let html = state_script_page(&outer.to_string());
        assert!(matches!(extract(&html), Err(EmbeddedStateError::InnerJson(_))));
    }

    #[test]
    fn listings_entry_missing() {
        let outer = json!({
            "props": { "pageProps": { "urqlState": {
                "1": { "data": "{\"somethingElse\": {}}" },
                "2": { "error": "nope" }
            }}}
        });
        let html = state_script_page(&outer.to_string());
        assert!(matches!(extract(&html), Err(EmbeddedStateError::ListingsNotFound)));

        let no_cache = state_script_page(r#"{"props": {"pageProps": {}}}"#);
        assert!(matches!(extract(&no_cache), Err(EmbeddedStateError::ListingsNotFound)));
    }

    #[test]
    fn missing_edges() {
        let inner = json!({ "advertSearch": { "totalCount": 0 } }).to_string();
        let outer = json!({
            "props": { "pageProps": { "urqlState": { "9": { "data": inner } } } }
        });
        let html = state_script_page(&outer.to_string());
        assert!(matches!(extract(&html), Err(EmbeddedStateError::MissingEdges)));
    }

    #[test]
    fn missing_price_is_zero() {
        let mut e = edge("1", 0.0, 1000);
        e["node"]["price"] = json!({ "amount": { "currencyCode": "PLN" } });
        let listing = parse_edge(&e).unwrap();
        assert_eq!(listing.price, 0.0);
        assert_eq!(listing.currency.as_deref(), Some("PLN"));

        e["node"]["price"] = json!({ "amount": { "value": "call us" } });
        assert_eq!(parse_edge(&e).unwrap().price, 0.0);

        e["node"].as_object_mut().unwrap().remove("price");
        assert_eq!(parse_edge(&e).unwrap().price, 0.0);
    }

    #[test]
    fn absent_numbers_default_to_zero() {
        let e = json!({ "node": { "id": "42", "title": "bare" } });
        let listing = parse_edge(&e).unwrap();
        assert_eq!(listing.year, 0);
        assert_eq!(listing.mileage, 0);
        assert_eq!(listing.engine_capacity, 0);
        assert_eq!(listing.engine_power, 0);
        assert_eq!(listing.city, "");
        assert_eq!(listing.seller_name, "");
    }

    #[test]
    fn bad_edge_is_skipped() {
        let mut bad = edge("2", 50000.0, 2000);
        bad["node"]["parameters"] = json!([{ "key": "mileage", "value": "unknown" }]);
        let html = results_page(&[edge("1", 50000.0, 1000), bad, json!({"cursor": "x"})], None, "");
        let listings = extract(&html).unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].id, "1");
    }

    #[test]
    fn services_fill_promotion_flags() {
        let mut e = edge("7", 1.0, 1);
        e["node"]["valueAddedServices"] = json!([
            { "name": "bump_up", "validity": "2026-01-01" },
            { "name": "export_olx", "validity": null }
        ]);
        let listing = parse_edge(&e).unwrap();
        assert_eq!(listing.bump_up.as_deref(), Some("2026-01-01"));
        assert_eq!(listing.export_olx, None);
    }
}
