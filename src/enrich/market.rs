use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::Result;
use chrono::{DateTime, Datelike, FixedOffset};
use regex::Regex;

use super::rate::PlnEurRate;
use super::{Enricher, Table};
use crate::parser::merge::UnifiedRecord;

/// Enriched schema, in column order.
pub const ENRICHED_COLUMNS: &[&str] = &[
    "id",
    "date_added",
    "current_date",
    "days_listed",
    "title",
    "brand",
    "model",
    "version",
    "year",
    "mileage",
    "price_pln",
    "price_eur",
    "pln_eur_rate",
    "engine_capacity",
    "engine_power",
    "engine_family",
    "engine_size_l",
    "drivetrain",
    "trim",
    "feature_flags",
    "gearbox",
    "fuel_type",
    "country_code",
    "country_origin",
    "city",
    "big_city",
    "region",
    "zone_code",
    "region_price_density",
    "seller_name",
    "seller_site",
    "short_description",
    "bump_up",
    "export_olx",
    "priceevaluation",
    "cepikVerified",
    "price_per_km",
    "price_per_hp",
    "scrape_year",
    "car_age",
    "price_per_year",
    "value_index",
    "price_per_hp_bucket",
    "hp_per_liter",
    "km_per_year",
    "price_bucket",
    "mileage_bucket",
    "polish_origin",
    "is_dealer",
    "risk_score",
    "url",
    "currency",
    "source",
    "match_confidence",
];

/// Voivodeship (diacritics folded, lowercase) → N/C/S macro zone.
const ZONES: &[(&str, &str)] = &[
    ("zachodniopomorskie", "N"),
    ("pomorskie", "N"),
    ("warminsko-mazurskie", "N"),
    ("kujawsko-pomorskie", "N"),
    ("podlaskie", "N"),
    ("lubuskie", "C"),
    ("wielkopolskie", "C"),
    ("lodzkie", "C"),
    ("mazowieckie", "C"),
    ("lubelskie", "C"),
    ("dolnoslaskie", "S"),
    ("opolskie", "S"),
    ("slaskie", "S"),
    ("swietokrzyskie", "S"),
    ("malopolskie", "S"),
    ("podkarpackie", "S"),
];
const UNKNOWN_ZONE: &str = "UNK";

const BIG_CITIES: &[&str] = &[
    "warszawa",
    "krakow",
    "wroclaw",
    "gdansk",
    "poznan",
    "lodz",
    "szczecin",
    "bydgoszcz",
    "lublin",
    "bialystok",
    "katowice",
    "czestochowa",
    "radom",
    "sosnowiec",
    "torun",
    "kielce",
    "gliwice",
    "tarnow",
];

const ENGINE_FAMILIES: &[&str] = &[
    "tsi",
    "tce",
    "ecoboost",
    "mhev",
    "hybrid",
    "boosterjet",
    "energy",
    "t",
];
const DRIVETRAINS: &[(&str, &str)] = &[
    ("fwd", "FWD"),
    ("awd", "AWD"),
    ("4wd", "4WD"),
    ("2x4", "FWD"),
    ("allgrip", "AWD"),
];

const PRICE_BINS: &[f64] = &[0.0, 55000.0, 65000.0, 75000.0, 90000.0];
const PRICE_LABELS: &[&str] = &["low", "mid", "high", "premium"];
const MILEAGE_BINS: &[f64] = &[0.0, 30000.0, 60000.0, 100000.0, 150000.0, 250000.0];
const MILEAGE_LABELS: &[&str] = &["very_low", "low", "mid", "high", "very_high"];
const QUINTILE_LABELS: &[&str] = &["very_low", "low", "avg", "high", "very_high"];
const HIGH_MILEAGE_KM: i64 = 130_000;
/// Largest plausible displacement in litres for the cars this tool targets.
const MAX_ENGINE_LITRES: f64 = 2.0;

static NUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)?$").unwrap());

/// What a `ver-...` slug says about the engine and trim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionInfo {
    pub engine_size_l: Option<f64>,
    pub engine_family: Option<String>,
    pub drivetrain: Option<String>,
    pub trim: Option<String>,
    pub feature_flags: Option<String>,
}

/// Split a version slug like `ver-1-5-tsi-style` into its parts.
pub fn parse_version_slug(version: Option<&str>) -> VersionInfo {
    let Some(rest) = version.and_then(|v| v.strip_prefix("ver-")) else {
        return VersionInfo::default();
    };
    let lower = rest.to_lowercase();
    let parts: Vec<&str> = lower.split('-').collect();

    // "1-5" is 1.5 litres; a lone "1" is 1.0
    let mut engine_size_l = None;
    for (i, p) in parts.iter().enumerate() {
        let Some(size) = p.parse::<f64>().ok().filter(|_| is_num(p)) else {
            continue;
        };
        if size > MAX_ENGINE_LITRES {
            continue;
        }
        match parts.get(i + 1).filter(|next| is_num(next)) {
            Some(next) => {
                let combined = format!("{}.{}", p, next).parse::<f64>().ok();
                if let Some(c) = combined.filter(|c| *c <= MAX_ENGINE_LITRES) {
                    engine_size_l = Some(c);
                    break;
                }
            }
            None => {
                engine_size_l = Some(size);
                break;
            }
        }
    }

    let engine_family = parts.iter().find(|p| is_family(p)).map(|p| p.to_string());
    let drivetrain = parts.iter().find_map(|p| drivetrain_of(p)).map(str::to_string);
    let trim = parts
        .iter()
        .rev()
        .find(|p| !is_family(p) && drivetrain_of(p).is_none() && !is_num(p) && !p.is_empty())
        .map(|p| title_case(p));
    let features: Vec<&str> = parts
        .iter()
        .copied()
        .filter(|p| !is_family(p) && drivetrain_of(p).is_none() && !is_num(p) && !p.is_empty())
        .collect();

    VersionInfo {
        engine_size_l,
        engine_family,
        drivetrain,
        trim,
        feature_flags: (!features.is_empty()).then(|| features.join(",")),
    }
}

fn is_num(part: &str) -> bool {
    NUMERIC.is_match(part)
}

fn is_family(part: &str) -> bool {
    ENGINE_FAMILIES.contains(&part)
}

fn drivetrain_of(part: &str) -> Option<&'static str> {
    DRIVETRAINS.iter().find(|(k, _)| *k == part).map(|(_, v)| *v)
}

/// Upper-case every letter that follows a non-letter, lower-case the rest.
fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut prev_alpha = false;
    for c in word.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Market metrics on top of the raw listing fields.
///
/// `now` is the clock used for `days_listed`, `scrape_year` and `car_age`. Without a rate
/// the EUR columns stay empty.
pub struct MarketEnricher {
    rate: Option<PlnEurRate>,
    now: DateTime<FixedOffset>,
}

impl MarketEnricher {
    pub fn new(rate: Option<PlnEurRate>, now: DateTime<FixedOffset>) -> Self {
        Self { rate, now }
    }
}

/// Per-record numbers that the row and the batch-wide statistics both need.
struct Metrics {
    region: String,
    price_per_km: Option<f64>,
    price_per_hp: Option<f64>,
    car_age: Option<i64>,
    price_per_year: Option<f64>,
    value_index: Option<f64>,
    hp_per_liter: Option<f64>,
    km_per_year: Option<f64>,
    price_eur: Option<f64>,
    days_listed: Option<i64>,
    polish_origin: bool,
}

impl MarketEnricher {
    fn metrics(&self, record: &UnifiedRecord) -> Metrics {
        let l = &record.listing;
        let price = l.price;
        let mileage = l.mileage as f64;
        let power = l.engine_power as f64;

        let price_per_km = ratio(price, mileage).map(|v| round_to(v, 2));
        let price_per_hp = ratio(price, power).map(|v| round_to(v, 0));
        let car_age = (l.year > 0).then(|| i64::from(self.now.year()) - l.year);
        let price_per_year = car_age
            .and_then(|age| ratio(price, age as f64))
            .map(|v| round_to(v, 0));
        let value_index = match (price_per_km, price_per_hp, price_per_year) {
            (Some(km), Some(hp), Some(yr)) => Some(round_to(km * 0.4 + hp * 0.3 + yr * 0.3, 0)),
            _ => None,
        };

        Metrics {
            region: l.region.to_lowercase(),
            price_per_km,
            price_per_hp,
            car_age,
            price_per_year,
            value_index,
            hp_per_liter: ratio(power, l.engine_capacity as f64 / 1000.0).map(|v| round_to(v, 1)),
            km_per_year: car_age
                .and_then(|age| ratio(mileage, age as f64))
                .map(|v| round_to(v, 0)),
            price_eur: self
                .rate
                .as_ref()
                .and_then(|r| ratio(price, r.rate))
                .map(|v| round_to(v, 0)),
            days_listed: l
                .date_added
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .map(|added| self.now.signed_duration_since(added).num_days()),
            polish_origin: l.country_origin.to_lowercase().contains("pol"),
        }
    }

    fn row(
        &self,
        record: &UnifiedRecord,
        m: &Metrics,
        region_medians: &HashMap<String, f64>,
        hp_quintiles: Option<&[f64; 6]>,
    ) -> Vec<String> {
        let l = &record.listing;
        let version = parse_version_slug(l.version.as_deref());
        let city = l.city.to_lowercase();
        let not_verified = l.cepik_verified != Some(true);
        let risk_score = i32::from(not_verified) * 2
            + i32::from(!m.polish_origin)
            + i32::from(l.mileage > HIGH_MILEAGE_KM);
        let zone = ZONES
            .iter()
            .find(|(r, _)| *r == m.region)
            .map(|(_, z)| *z)
            .unwrap_or(UNKNOWN_ZONE);

        vec![
            l.id.clone(),
            opt(&l.date_added),
            self.now.to_rfc3339(),
            num(m.days_listed),
            opt(&l.title),
            lower(&l.brand),
            lower(&l.model),
            opt(&l.version),
            l.year.to_string(),
            l.mileage.to_string(),
            l.price.to_string(),
            num(m.price_eur),
            num(self.rate.as_ref().map(|r| r.rate)),
            l.engine_capacity.to_string(),
            l.engine_power.to_string(),
            version.engine_family.unwrap_or_default(),
            version
                .engine_size_l
                .map(|s| format!("{:.1}", s))
                .unwrap_or_default(),
            version.drivetrain.unwrap_or_default(),
            version.trim.unwrap_or_default(),
            version.feature_flags.unwrap_or_default(),
            lower(&l.gearbox),
            lower(&l.fuel_type),
            opt(&l.country_code),
            l.country_origin.to_lowercase(),
            city.clone(),
            BIG_CITIES.contains(&city.as_str()).to_string(),
            m.region.clone(),
            zone.to_string(),
            num(region_medians.get(&m.region).copied()),
            l.seller_name.clone(),
            lower(&l.seller_site),
            l.short_description.clone(),
            opt(&l.bump_up),
            opt(&l.export_olx),
            opt(&l.price_evaluation),
            l.cepik_verified.map(|b| b.to_string()).unwrap_or_default(),
            num(m.price_per_km),
            num(m.price_per_hp),
            self.now.year().to_string(),
            num(m.car_age),
            num(m.price_per_year),
            num(m.value_index),
            m.price_per_hp
                .zip(hp_quintiles)
                .map(|(v, edges)| quintile_label(v, edges))
                .unwrap_or_default()
                .to_string(),
            num(m.hp_per_liter),
            num(m.km_per_year),
            cut(l.price, PRICE_BINS, PRICE_LABELS).unwrap_or_default().to_string(),
            cut(l.mileage as f64, MILEAGE_BINS, MILEAGE_LABELS)
                .unwrap_or_default()
                .to_string(),
            m.polish_origin.to_string(),
            (!l.seller_name.is_empty()).to_string(),
            risk_score.to_string(),
            opt(&l.url),
            opt(&l.currency),
            opt(&record.source),
            record.match_confidence.as_str().to_string(),
        ]
    }
}

impl Enricher for MarketEnricher {
    fn enrich(&self, records: &[UnifiedRecord]) -> Result<Table> {
        let metrics: Vec<Metrics> = records.iter().map(|r| self.metrics(r)).collect();

        let mut by_region: HashMap<String, Vec<f64>> = HashMap::new();
        for (record, m) in records.iter().zip(&metrics) {
            by_region
                .entry(m.region.clone())
                .or_default()
                .push(record.listing.price);
        }
        let region_medians: HashMap<String, f64> = by_region
            .into_iter()
            .filter_map(|(region, prices)| median(prices).map(|m| (region, m)))
            .collect();

        let hp_values: Vec<f64> = metrics.iter().filter_map(|m| m.price_per_hp).collect();
        let hp_quintiles = quintile_edges(hp_values);

        let rows = records
            .iter()
            .zip(&metrics)
            .map(|(record, m)| self.row(record, m, &region_medians, hp_quintiles.as_ref()))
            .collect();

        Ok(Table {
            columns: ENRICHED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows,
        })
    }
}

/// `None` on a zero or non-finite denominator.
fn ratio(num: f64, den: f64) -> Option<f64> {
    (den != 0.0 && den.is_finite() && num.is_finite()).then(|| num / den)
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (v * factor).round() / factor
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Linearly interpolated 0/20/40/60/80/100 percentiles.
fn quintile_edges(mut values: Vec<f64>) -> Option<[f64; 6]> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let last = (values.len() - 1) as f64;
    let mut edges = [0.0; 6];
    for (i, edge) in edges.iter_mut().enumerate() {
        let pos = last * i as f64 / 5.0;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;
        *edge = values[lo] + (values[hi] - values[lo]) * (pos - lo as f64);
    }
    Some(edges)
}

/// Right-closed bins; the lowest bin also includes its lower edge.
fn quintile_label(v: f64, edges: &[f64; 6]) -> &'static str {
    QUINTILE_LABELS
        .iter()
        .zip(&edges[1..])
        .find(|(_, upper)| v <= **upper)
        .map(|(label, _)| *label)
        .unwrap_or(QUINTILE_LABELS[QUINTILE_LABELS.len() - 1])
}

/// Right-closed bins `(bins[i], bins[i+1]]`; values outside every bin get no label.
fn cut(v: f64, bins: &[f64], labels: &[&'static str]) -> Option<&'static str> {
    bins.windows(2)
        .zip(labels)
        .find(|(w, _)| v > w[0] && v <= w[1])
        .map(|(_, label)| *label)
}

fn num<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn opt(v: &Option<String>) -> String {
    v.clone().unwrap_or_default()
}

fn lower(v: &Option<String>) -> String {
    v.as_deref().map(str::to_lowercase).unwrap_or_default()
}

// ── Tests ──
