use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A WGS84 coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    /// Renders the coordinate as a `lat,lng` query parameter.
    pub fn to_param(&self) -> String {
        format!("{},{}", self.lat, self.lng)
    }
}

/// One apartment listing.
///
/// Constructed from a raw search result, then filled in twice: once by the
/// detail enrichment step (floor, authoritative rents, publish date) and once
/// by the commute enrichment step. Not mutated afterwards.
///
/// When both rents are known, `total_rent >= base_rent`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub address: String,
    pub url: String,
    pub pictures: Vec<String>,
    pub geolocation: Option<Coordinate>,
    pub base_rent: f64,
    pub total_rent: f64,
    pub room_count: f64,
    /// Living area in m².
    pub size: f64,
    pub floor: Option<i64>,
    pub floor_count: Option<i64>,
    pub available_from: Option<NaiveDate>,
    pub date_published: Option<DateTime<Utc>>,
    /// Commute time in minutes.
    pub commute_duration: Option<f64>,
    /// Transit lines used on the commute, or `["walk"]`.
    pub commute_summary: Option<Vec<String>>,
}

impl fmt::Display for Listing {
    /// One-line summary. Unknown fields render as "?" rather than panicking.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{rent:.0}€, {rooms}br, {size}m², floor {floor}/{floor_count}, {commute} minute commute. {url}",
            rent = self.total_rent,
            rooms = format_room_count(self.room_count),
            size = self.size,
            floor = format_optional(self.floor),
            floor_count = format_optional(self.floor_count),
            commute = self
                .commute_duration
                .map(|d| format!("{:.0}", d))
                .unwrap_or_else(|| "?".to_string()),
            url = self.url,
        )
    }
}

/// Room counts can be fractional (1.5 is a common value). "?" when unknown.
fn format_room_count(room_count: f64) -> String {
    if room_count == 0.0 {
        return "?".to_string();
    }
    if room_count.fract() == 0.0 {
        format!("{:.0}", room_count)
    } else {
        format!("{:.1}", room_count)
    }
}

fn format_optional(value: Option<i64>) -> String {
    value.map_or_else(|| "?".to_string(), |v| v.to_string())
}
