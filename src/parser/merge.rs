use serde::Serialize;
use tracing::{debug, warn};

use super::embedded_state::Listing;
use super::json_ld::JsonLdOffer;

pub const JSON_LD_SOURCE: &str = "json_ld";

/// Raw output schema, in column order.
pub const RAW_COLUMNS: &[&str] = &[
    "id",
    "title",
    "date_added",
    "short_description",
    "url",
    "seller_name",
    "seller_site",
    "brand",
    "model",
    "version",
    "price",
    "currency",
    "year",
    "fuel_type",
    "mileage",
    "gearbox",
    "country_code",
    "country_origin",
    "engine_capacity",
    "engine_power",
    "city",
    "region",
    "bump_up",
    "export_olx",
    "priceevaluation",
    "cepikVerified",
    "source",
    "match_confidence",
];

/// Decides whether a JSON-LD offer and an embedded-state listing describe the same car.
pub trait JoinPolicy: Send + Sync {
    fn key_matches(&self, offer: &JsonLdOffer, listing: &Listing) -> bool;
}

/// Exact price and mileage equality. Two cars sharing both values are indistinguishable.
pub struct PriceMileage;

impl JoinPolicy for PriceMileage {
    fn key_matches(&self, offer: &JsonLdOffer, listing: &Listing) -> bool {
        offer.price == Some(listing.price) && offer.mileage == Some(listing.mileage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    /// Exactly one offer carried the join key.
    Unique,
    /// Several offers carried it; the first was used.
    Ambiguous,
    Unmatched,
}

impl MatchConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unique => "unique",
            Self::Ambiguous => "ambiguous",
            Self::Unmatched => "unmatched",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnifiedRecord {
    #[serde(flatten)]
    pub listing: Listing,
    /// Set when a JSON-LD offer matched the listing.
    pub source: Option<String>,
    pub match_confidence: MatchConfidence,
}

impl UnifiedRecord {
    /// Cells in `RAW_COLUMNS` order.
    pub fn to_row(&self) -> Vec<String> {
        let l = &self.listing;
        vec![
            l.id.clone(),
            opt(&l.title),
            opt(&l.date_added),
            l.short_description.clone(),
            opt(&l.url),
            l.seller_name.clone(),
            opt(&l.seller_site),
            opt(&l.brand),
            opt(&l.model),
            opt(&l.version),
            l.price.to_string(),
            opt(&l.currency),
            l.year.to_string(),
            opt(&l.fuel_type),
            l.mileage.to_string(),
            opt(&l.gearbox),
            opt(&l.country_code),
            l.country_origin.clone(),
            l.engine_capacity.to_string(),
            l.engine_power.to_string(),
            l.city.clone(),
            l.region.clone(),
            opt(&l.bump_up),
            opt(&l.export_olx),
            opt(&l.price_evaluation),
            l.cepik_verified.map(|b| b.to_string()).unwrap_or_default(),
            opt(&self.source),
            self.match_confidence.as_str().to_string(),
        ]
    }
}

fn opt(v: &Option<String>) -> String {
    v.clone().unwrap_or_default()
}

/// One record per listing, in listing order, using the price/mileage join.
pub fn merge(offers: &[JsonLdOffer], listings: Vec<Listing>) -> Vec<UnifiedRecord> {
    merge_with(&PriceMileage, offers, listings)
}

/// Listings drive cardinality. Offers without a listing are dropped.
pub fn merge_with(
    policy: &dyn JoinPolicy,
    offers: &[JsonLdOffer],
    listings: Vec<Listing>,
) -> Vec<UnifiedRecord> {
    for offer in offers {
        if !listings.iter().any(|l| policy.key_matches(offer, l)) {
            debug!("Dropping JSON-LD offer without a listing: {}", offer);
        }
    }

    listings
        .into_iter()
        .map(|listing| {
            let mut candidates = offers.iter().filter(|o| policy.key_matches(o, &listing));
            let first = candidates.next();
            let extra = candidates.count();

            let confidence = match (first, extra) {
                (None, _) => MatchConfidence::Unmatched,
                (Some(_), 0) => MatchConfidence::Unique,
                (Some(_), n) => {
                    warn!(
                        "Listing {} matches {} JSON-LD offers on price/mileage; using the first",
                        listing.id,
                        n + 1
                    );
                    MatchConfidence::Ambiguous
                }
            };

            // Every offer field overlaps a listing field, and the listing wins even when
            // its value is empty. A match only contributes `source`.
            UnifiedRecord {
                listing,
                source: first.map(|_| JSON_LD_SOURCE.to_string()),
                match_confidence: confidence,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(id: &str, price: f64, mileage: i64) -> Listing {
        Listing {
            id: id.to_string(),
            title: Some(format!("listing {}", id)),
            brand: Some("skoda".into()),
            price,
            mileage,
            currency: Some("PLN".into()),
            ..Default::default()
        }
    }

    fn offer(title: &str, price: f64, mileage: i64) -> JsonLdOffer {
        JsonLdOffer {
            title: Some(title.to_string()),
            brand: Some("Skoda".into()),
            fuel_type: Some("Benzyna".into()),
            mileage: Some(mileage),
            price: Some(price),
            currency: Some("EUR".into()),
        }
    }

    #[test]
    fn matched_pair_is_one_record_listing_wins() {
        let out = merge(&[offer("from ld", 60000.0, 30000)], vec![listing("a", 60000.0, 30000)]);
        assert_eq!(out.len(), 1);
        let r = &out[0];
        assert_eq!(r.match_confidence, MatchConfidence::Unique);
        assert_eq!(r.source.as_deref(), Some("json_ld"));
        // overlapping fields keep the listing's values
        assert_eq!(r.listing.title.as_deref(), Some("listing a"));
        assert_eq!(r.listing.brand.as_deref(), Some("skoda"));
        assert_eq!(r.listing.currency.as_deref(), Some("PLN"));
        assert_eq!(r.listing, listing("a", 60000.0, 30000));
    }

    #[test]
    fn empty_listing_fields_are_not_taken_from_offer() {
        let mut bare = listing("a", 60000.0, 30000);
        bare.title = None;
        bare.brand = None;
        bare.currency = None;

        let out = merge(&[offer("from ld", 60000.0, 30000)], vec![bare.clone()]);
        let r = &out[0];
        assert_eq!(r.match_confidence, MatchConfidence::Unique);
        assert_eq!(r.source.as_deref(), Some("json_ld"));
        assert_eq!(r.listing.brand, None);
        assert_eq!(r.listing.fuel_type, None);
        assert_eq!(r.listing.title, None);
        assert_eq!(r.listing.currency, None);
        assert_eq!(r.listing, bare);
    }

    #[test]
    fn unmatched_listing_keeps_only_its_own_fields() {
        let out = merge(&[offer("x", 1.0, 1)], vec![listing("a", 60000.0, 30000)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].match_confidence, MatchConfidence::Unmatched);
        assert_eq!(out[0].source, None);
        assert_eq!(out[0].listing, listing("a", 60000.0, 30000));
    }

    #[test]
    fn orphan_offers_are_dropped() {
        let offers = vec![
            offer("x", 1.0, 1),
            offer("y", 2.0, 2),
            offer("z", 60000.0, 30000),
        ];
        let out = merge(&offers, vec![listing("a", 60000.0, 30000), listing("b", 5.0, 5)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].listing.id, "a");
        assert_eq!(out[1].listing.id, "b");
        assert!(merge(&offers, Vec::new()).is_empty());
    }

    #[test]
    fn equality_is_exact() {
        let out = merge(&[offer("near", 60000.01, 30000)], vec![listing("a", 60000.0, 30000)]);
        assert_eq!(out[0].match_confidence, MatchConfidence::Unmatched);
    }

    #[test]
    fn shared_key_is_flagged_ambiguous() {
        let first = offer("first", 60000.0, 30000);
        let second = offer("second", 60000.0, 30000);

        let out = merge(&[first, second], vec![listing("a", 60000.0, 30000)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].match_confidence, MatchConfidence::Ambiguous);
        assert_eq!(out[0].source.as_deref(), Some("json_ld"));
        assert_eq!(out[0].listing, listing("a", 60000.0, 30000));
    }

    #[test]
    fn custom_policy() {
        struct PriceOnly;
        impl JoinPolicy for PriceOnly {
            fn key_matches(&self, offer: &JsonLdOffer, listing: &Listing) -> bool {
                offer.price == Some(listing.price)
            }
        }
        let out = merge_with(&PriceOnly, &[offer("p", 100.0, 1)], vec![listing("a", 100.0, 999)]);
        assert_eq!(out[0].match_confidence, MatchConfidence::Unique);
    }

    #[test]
    fn row_matches_schema() {
        let out = merge(&[], vec![listing("a", 1.0, 2)]);
        let row = out[0].to_row();
        assert_eq!(row.len(), RAW_COLUMNS.len());
        assert_eq!(row[0], "a");
        assert_eq!(row[RAW_COLUMNS.len() - 1], "unmatched");
    }
}
