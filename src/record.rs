use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::api::types::DetailEnvelope;

const DATE_FORMAT: &str = "%Y-%m-%d";
const LOCATION_URL_PREFIX: &str = "https://www.zap-map.com/charge-points/helston";

/// Flat output record for one charge-point location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub uuid: String,
    pub name: String,
    pub city: String,
    pub state: String,
    pub street_address: String,
    pub postal_code: String,
    pub full_address: String,
    pub phone_number: String,
    pub date_created: String,
    pub date_updated: String,
    pub parking_fee: String,
    pub charging_fee: String,
    pub operator_name: String,
    pub location_url: String,
}

/// Shape a raw detail payload into a record.
///
/// Returns `Ok(None)` when the location belongs to another country and `Err`
/// when the payload lacks a required field or carries an unreadable date.
pub fn shape_record(
    detail: serde_json::Value,
    created_at: &str,
    target_country: &str,
) -> Result<Option<NormalizedRecord>> {
    let envelope: DetailEnvelope =
        serde_json::from_value(detail).context("malformed location detail")?;
    let details = envelope.data;
    if !details.country.trim().eq_ignore_ascii_case(target_country) {
        return Ok(None);
    }

    let city = details.city.unwrap_or_default();
    let state = details.state.unwrap_or_default();
    let street_address = details.address.unwrap_or_default();
    let postal_code = details.postal_code.unwrap_or_default();
    let full_address = [&street_address, &city, &state, &postal_code]
        .iter()
        .filter(|part| !part.is_empty())
        .map(|part| part.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let charging_fee = match details.devices.into_iter().next() {
        Some(device) => {
            let payment = device
                .payment_details
                .context("malformed location detail: first device has no payment_details")?;
            fee_text(payment.pricing)
        }
        None => String::new(),
    };

    Ok(Some(NormalizedRecord {
        location_url: format!("{}/{}/", LOCATION_URL_PREFIX, details.uuid),
        uuid: details.uuid,
        name: details.name.unwrap_or_default(),
        city,
        state,
        street_address,
        postal_code,
        full_address,
        phone_number: details.owner.telephone_number.unwrap_or_default(),
        date_created: normalize_date(created_at)?,
        date_updated: normalize_date(&details.updated_at)?,
        parking_fee: fee_text(details.parking.fee),
        charging_fee,
        operator_name: details.operator.name.unwrap_or_default(),
    }))
}

/// Fee fields are free text upstream but occasionally structured.
fn fee_text(value: Option<serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

/// Reduce an API timestamp to its calendar date (`YYYY-MM-DD`), in the
/// timestamp's own offset.
pub fn normalize_date(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.format(DATE_FORMAT).to_string());
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.format(DATE_FORMAT).to_string());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt.format(DATE_FORMAT).to_string());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, DATE_FORMAT) {
        return Ok(date.format(DATE_FORMAT).to_string());
    }
    bail!("unrecognised timestamp {:?}", raw)
}
