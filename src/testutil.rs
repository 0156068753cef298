//! Builders for synthetic search pages shared by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::fetcher::{FetchError, PageSource};
use crate::query::Filters;

pub fn filters() -> Filters {
    Filters {
        year_from: 2019,
        year_to: 2022,
        price_from: 50000,
        price_to: 75000,
        mileage_to: 150000,
        fuel_type: "petrol".into(),
        gearbox: "manual".into(),
        accident_free: true,
    }
}

pub fn edge(id: &str, price: f64, mileage: i64) -> Value {
    json!({
        "node": {
            "id": id,
            "title": format!("Car {}", id),
            "createdAt": "2025-12-01T10:00:00Z",
            "shortDescription": "Bezwypadkowy",
            "url": format!("https://www.otomoto.pl/osobowe/oferta/car-{}.html", id),
            "sellerLink": { "name": "Komis Łąka", "websiteUrl": null },
            "price": { "amount": { "value": price.to_string(), "currencyCode": "PLN" } },
            "parameters": [
                { "key": "make", "value": "skoda", "displayValue": "Skoda" },
                { "key": "model", "value": "kamiq", "displayValue": "Kamiq" },
                { "key": "version", "value": "ver-1-0-tsi-style", "displayValue": "1.0 TSI Style" },
                { "key": "year", "value": "2020", "displayValue": "2020" },
                { "key": "mileage", "value": mileage.to_string(), "displayValue": "km" },
                { "key": "fuel_type", "value": "petrol", "displayValue": "Benzyna" },
                { "key": "gearbox", "value": "manual", "displayValue": "Manualna" },
                { "key": "country_origin", "value": "pl", "displayValue": "Polska" },
                { "key": "engine_capacity", "value": "999", "displayValue": "999 cm3" },
                { "key": "engine_power", "value": "110", "displayValue": "110 KM" }
            ],
            "location": { "city": { "name": "Poznań" }, "region": { "name": "Wielkopolskie" } },
            "priceEvaluation": { "indicator": "IN" },
            "cepikVerified": true,
            "valueAddedServices": []
        }
    })
}

/// `count` edges with distinct price/mileage pairs, ids starting at `start`.
pub fn edges(start: usize, count: usize) -> Vec<Value> {
    (start..start + count)
        .map(|i| edge(&i.to_string(), 50000.0 + i as f64 * 100.0, 10000 + i as i64 * 1000))
        .collect()
}

/// A results page carrying `edges` in the embedded state and a matching JSON-LD offer per edge.
pub fn results_page(edges: &[Value], og_page: Option<u32>, extra_body: &str) -> String {
    let inner = json!({ "advertSearch": { "totalCount": edges.len(), "edges": edges } });
    let outer = json!({
        "props": { "pageProps": { "urqlState": {
            "100": { "data": json!({ "user": null }).to_string() },
            "200": { "data": inner.to_string() }
        }}}
    });

    let offers: Vec<Value> = edges
        .iter()
        .map(|e| {
            let node = &e["node"];
            json!({
                "priceSpecification": {
                    "price": node["price"]["amount"]["value"],
                    "priceCurrency": "PLN"
                },
                "itemOffered": {
                    "name": node["title"],
                    "brand": "Skoda",
                    "fuelType": "Benzyna",
                    "mileageFromOdometer": { "value": node["parameters"][4]["value"] }
                }
            })
        })
        .collect();
    let json_ld = json!({ "mainEntity": { "itemListElement": offers } });

    let og = og_page
        .map(|p| {
            format!(
                r#"<meta property="og:url" content="https://www.otomoto.pl/osobowe/skoda/kamiq?page={}">"#,
                p
            )
        })
        .unwrap_or_default();

    format!(
        r#"<html><head>{}<script id="listing-json-ld" type="application/ld+json">{}</script></head><body>{}<script id="__NEXT_DATA__" type="application/json">{}</script></body></html>"#,
        og, json_ld, extra_body, outer
    )
}

/// A page whose only script is `raw`, verbatim.
pub fn state_script_page(raw: &str) -> String {
    format!(
        r#"<html><body><script id="__NEXT_DATA__" type="application/json">{}</script></body></html>"#,
        raw
    )
}

/// Serves canned pages keyed by the `page` parameter and records every request.
/// `Err(status)` entries answer with that HTTP status; unknown pages fail at the transport level.
pub struct CannedPages {
    pages: HashMap<u32, Result<String, u16>>,
    pub requested: Mutex<Vec<u32>>,
}

impl CannedPages {
    pub fn new(pages: Vec<(u32, Result<String, u16>)>) -> Self {
        Self {
            pages: pages.into_iter().collect(),
            requested: Mutex::new(Vec::new()),
        }
    }
}

fn page_number(url: &str) -> u32 {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "page")
                .and_then(|(_, v)| v.parse().ok())
        })
        .unwrap_or(0)
}

#[async_trait]
impl PageSource for CannedPages {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let n = page_number(url);
        self.requested.lock().unwrap().push(n);
        match self.pages.get(&n) {
            Some(Ok(html)) => Ok(html.clone()),
            Some(Err(status)) => Err(FetchError::Status {
                url: url.to_string(),
                status: *status,
            }),
            None => Err(FetchError::Request {
                url: url.to_string(),
                message: "no such page".into(),
            }),
        }
    }
}
