// storm_map - Heat map of recent storm reports served over HTTP
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const UNKNOWN: &str = "Unknown";

/// Report record exactly as returned by the storm report API.
///
/// Every field is optional on the wire and a field with an unexpected JSON type is treated as
/// missing, except numbers in text fields and numeric strings in coordinate fields, which are
/// converted. Coordinates are fixed-point numbers in hundredths of
/// a degree with the sign of the longitude inverted (western hemisphere longitudes are
/// positive).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RawReport {
    #[serde(rename = "St", default, deserialize_with = "lenient_text")]
    pub state: Option<String>,
    #[serde(rename = "Type", default, deserialize_with = "lenient_text")]
    pub type_: Option<String>,
    #[serde(rename = "Lat", default, deserialize_with = "lenient_number")]
    pub lat: Option<f64>,
    #[serde(rename = "Lon", default, deserialize_with = "lenient_number")]
    pub lon: Option<f64>,
    #[serde(rename = "Size", default, deserialize_with = "lenient_text")]
    pub size: Option<String>,
    #[serde(rename = "Remark", default, deserialize_with = "lenient_text")]
    pub remark: Option<String>,
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    })
}

/// Read raw records from the elements of a JSON array, skipping elements that aren't objects.
pub fn parse_records(values: Vec<Value>) -> Vec<RawReport> {
    let total = values.len();
    let records: Vec<RawReport> = values
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<RawReport>(v) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::debug!(message = "skipping unreadable report record", error = %e);
                None
            }
        })
        .collect();

    if records.len() < total {
        tracing::debug!(
            message = "dropped unreadable report records",
            dropped = total - records.len(),
            total = total,
        );
    }

    records
}

/// Decimal degree latitude and longitude.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        GeoPoint { latitude, longitude }
    }

    /// Decode a fixed-point coordinate pair from the report API: both values are divided
    /// by 100 and the longitude is negated.
    pub fn from_fixed_point(lat: f64, lon: f64) -> Self {
        GeoPoint {
            latitude: lat / 100.0,
            longitude: -lon / 100.0,
        }
    }

    /// True if both components are finite and within the valid range for degrees.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Decoded storm report for a single location.
#[derive(Debug, Clone, PartialEq)]
pub struct StormReport {
    pub report_type: String,
    pub state: String,
    pub point: GeoPoint,
    pub size: Option<String>,
    pub remark: Option<String>,
}

impl StormReport {
    /// Decode a raw record, returning `None` if it doesn't have both coordinates.
    ///
    /// Missing state or type codes become `"Unknown"` rather than discarding the record.
    pub fn from_raw(raw: RawReport) -> Option<Self> {
        let point = match (raw.lat, raw.lon) {
            (Some(lat), Some(lon)) => GeoPoint::from_fixed_point(lat, lon),
            _ => return None,
        };

        Some(StormReport {
            report_type: raw.type_.unwrap_or_else(|| UNKNOWN.to_owned()),
            state: raw.state.unwrap_or_else(|| UNKNOWN.to_owned()),
            point,
            size: raw.size.filter(|s| !s.trim().is_empty()),
            remark: raw.remark.filter(|s| !s.trim().is_empty()),
        })
    }
}

/// Decode every raw record that has coordinates, preserving order.
pub fn decode_all(raw: Vec<RawReport>) -> Vec<StormReport> {
    let total = raw.len();
    let reports: Vec<StormReport> = raw.into_iter().filter_map(StormReport::from_raw).collect();

    if reports.len() < total {
        tracing::debug!(
            message = "dropped reports without coordinates",
            dropped = total - reports.len(),
            total = total,
        );
    }

    reports
}
