pub mod embedded_state;
pub mod json_ld;
pub mod merge;
pub mod polish;

use serde_json::Value;
use thiserror::Error;

use embedded_state::EmbeddedStateError;
use merge::UnifiedRecord;

/// Why a single item was dropped from an otherwise good list.
#[derive(Debug, Error, PartialEq)]
pub enum SkipReason {
    #[error("{0} is not an object")]
    NotAnObject(&'static str),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` is not a number: {value}")]
    BadNumber { field: &'static str, value: String },
}

/// Both sources → one record per embedded-state listing.
pub fn parse_search_page(html: &str) -> Result<Vec<UnifiedRecord>, EmbeddedStateError> {
    let offers = json_ld::extract(html);
    let listings = embedded_state::extract(html)?;
    Ok(merge::merge(&offers, listings))
}

/// JSON number, or a string holding one. Fractional values are rejected.
pub(crate) fn number_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

pub(crate) fn number_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}
