use quick_xml::events::Event;
use reqwest::Client;
use thiserror::Error;
use tracing::info;

pub const ECB_PLN_FEED_URL: &str =
    "https://www.ecb.europa.eu/stats/policy_and_exchange_rates/euro_reference_exchange_rates/html/pln.xml";

#[derive(Debug, Error)]
pub enum RateError {
    #[error("exchange rate request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("exchange rate feed is not valid XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("observation value {0:?} is not a number")]
    BadValue(String),
    #[error("no exchange rate data found")]
    NoObservations,
}

/// ECB reference rate: how many PLN one EUR buys on `date`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlnEurRate {
    pub date: String,
    pub rate: f64,
}

pub async fn fetch_pln_eur_rate(client: &Client) -> Result<PlnEurRate, RateError> {
    fetch_rate_from(client, ECB_PLN_FEED_URL).await
}

pub async fn fetch_rate_from(client: &Client, url: &str) -> Result<PlnEurRate, RateError> {
    let xml = client.get(url).send().await?.error_for_status()?.text().await?;
    let rate = parse_latest_observation(&xml)?;
    info!("Latest PLN to EUR exchange rate on {} is {}", rate.date, rate.rate);
    Ok(rate)
}

/// The feed lists observations oldest first; the last `Obs` element is the latest rate.
pub fn parse_latest_observation(xml: &str) -> Result<PlnEurRate, RateError> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut latest: Option<(String, String)> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"Obs" => {
                let mut date = None;
                let mut value = None;
                for attr in e.attributes() {
                    let attr = attr.map_err(quick_xml::Error::from)?;
                    match attr.key.as_ref() {
                        b"TIME_PERIOD" => date = Some(attr.unescape_value()?.into_owned()),
                        b"OBS_VALUE" => value = Some(attr.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                if let (Some(d), Some(v)) = (date, value) {
                    latest = Some((d, v));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }

    let (date, value) = latest.ok_or(RateError::NoObservations)?;
    let rate = value
        .trim()
        .parse::<f64>()
        .map_err(|_| RateError::BadValue(value.clone()))?;
    Ok(PlnEurRate { date, rate })
}
