use std::fmt;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

use super::{number_as_f64, number_as_i64, SkipReason};

static LISTING_JSON_LD: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"script#listing-json-ld[type="application/ld+json"]"#).unwrap()
});

/// The subset of a listing published in the page's schema.org block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JsonLdOffer {
    pub title: Option<String>,
    pub brand: Option<String>,
    pub fuel_type: Option<String>,
    pub mileage: Option<i64>,
    pub price: Option<f64>,
    pub currency: Option<String>,
}

impl fmt::Display for JsonLdOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());
        write!(
            f,
            "{} / {} / {} / {:?} {} / {:?} km",
            or_dash(&self.brand),
            or_dash(&self.title),
            or_dash(&self.fuel_type),
            self.price,
            or_dash(&self.currency),
            self.mileage
        )
    }
}

/// Extract every well-formed offer. Never fails: a missing block or broken JSON gives an
/// empty list.
pub fn extract(html: &str) -> Vec<JsonLdOffer> {
    let document = Html::parse_document(html);
    let Some(script) = document.select(&LISTING_JSON_LD).next() else {
        debug!("No listing JSON-LD block on page");
        return Vec::new();
    };

    let text: String = script.text().collect();
    let json: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Malformed listing JSON-LD: {}", e);
            return Vec::new();
        }
    };

    let items = match json
        .get("mainEntity")
        .and_then(|m| m.get("itemListElement"))
        .and_then(|l| l.as_array())
    {
        Some(items) => items,
        None => return Vec::new(),
    };

    let mut offers = Vec::with_capacity(items.len());
    let mut skipped = 0usize;
    for (idx, item) in items.iter().enumerate() {
        match parse_offer(item) {
            Ok(offer) => offers.push(offer),
            Err(reason) => {
                skipped += 1;
                debug!("Skipping JSON-LD offer #{}: {}", idx, reason);
            }
        }
    }
    if skipped > 0 {
        warn!("Skipped {} of {} JSON-LD offers", skipped, items.len());
    }
    offers
}

pub fn parse_offer(offer: &Value) -> Result<JsonLdOffer, SkipReason> {
    let offer = offer.as_object().ok_or(SkipReason::NotAnObject("offer"))?;
    let empty = serde_json::Map::new();
    let price_spec = offer
        .get("priceSpecification")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let item = offer
        .get("itemOffered")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let mileage = match item.get("mileageFromOdometer").and_then(|m| m.get("value")) {
        Some(v) if is_truthy(v) => Some(number_as_i64(v).ok_or_else(|| bad("mileage", v))?),
        _ => None,
    };
    let price = match price_spec.get("price") {
        Some(v) if is_truthy(v) => Some(number_as_f64(v).ok_or_else(|| bad("price", v))?),
        _ => None,
    };

    Ok(JsonLdOffer {
        title: text(item.get("name")),
        brand: brand_name(item.get("brand")),
        fuel_type: text(item.get("fuelType")),
        mileage,
        price,
        currency: text(price_spec.get("priceCurrency")),
    })
}

fn bad(field: &'static str, value: &Value) -> SkipReason {
    SkipReason::BadNumber {
        field,
        value: value.to_string(),
    }
}

/// Zero, empty strings and nulls count as "not given".
fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

// Brand is either a bare string or a schema.org Brand object.
fn brand_name(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::Object(o) => text(o.get("name")),
        other => text(Some(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(body: &str) -> String {
        format!(
            r#"<html><head><script id="listing-json-ld" type="application/ld+json">{}</script></head><body></body></html>"#,
            body
        )
    }

    #[test]
    fn fixture_offers() {
        let html = std::fs::read_to_string("tests/fixtures/search_page.html").unwrap();
        let offers = extract(&html);
        assert_eq!(offers.len(), 3);
        assert_eq!(offers[0].title.as_deref(), Some("Volkswagen T-Roc 1.5 TSI Style"));
        assert_eq!(offers[0].brand.as_deref(), Some("Volkswagen"));
        assert_eq!(offers[0].mileage, Some(45000));
        assert_eq!(offers[0].price, Some(69900.0));
        assert_eq!(offers[0].currency.as_deref(), Some("PLN"));
    }

    #[test]
    fn missing_block_is_empty() {
        assert!(extract("<html><body>nothing here</body></html>").is_empty());
    }

    #[test]
    fn malformed_json_is_empty() {
        assert!(extract(&page("{ not json")).is_empty());
    }

    #[test]
    fn bad_item_is_skipped_not_fatal() {
        let body = json!({
            "mainEntity": { "itemListElement": [
                { "itemOffered": { "name": "ok", "mileageFromOdometer": { "value": "1000" } },
                  "priceSpecification": { "price": "50000", "priceCurrency": "PLN" } },
                { "itemOffered": { "name": "broken", "mileageFromOdometer": { "value": "lots" } } },
                "not an object",
                { "itemOffered": { "name": "no numbers" } }
            ]}
        });
        let offers = extract(&page(&body.to_string()));
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].mileage, Some(1000));
        assert_eq!(offers[0].price, Some(50000.0));
        assert_eq!(offers[1].title.as_deref(), Some("no numbers"));
        assert_eq!(offers[1].mileage, None);
        assert_eq!(offers[1].price, None);
    }

    #[test]
    fn parse_offer_reports_reason() {
        let err = parse_offer(&json!({ "priceSpecification": { "price": "n/a" } })).unwrap_err();
        assert!(matches!(err, SkipReason::BadNumber { field: "price", .. }));
        assert!(matches!(parse_offer(&json!(3)), Err(SkipReason::NotAnObject(_))));
    }
}
