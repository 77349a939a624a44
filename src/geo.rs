use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::models::Coordinate;

/// Mean Earth radius used by the distance formula, in meters.
const EARTH_RADIUS_METERS: f64 = 6_373_000.0;

/// Bird's flight distance between two coordinates, in meters.
///
/// Spherical law of cosines. The cosine is clamped to [-1, 1] before the
/// arccosine: floating point error on identical or antipodal points can push
/// it just outside the domain.
pub fn direct_distance(a: &Coordinate, b: &Coordinate) -> f64 {
    let phi1 = (90.0 - a.lat).to_radians();
    let phi2 = (90.0 - b.lat).to_radians();
    let theta1 = a.lng.to_radians();
    let theta2 = b.lng.to_radians();

    let cos = phi1.sin() * phi2.sin() * (theta1 - theta2).cos() + phi1.cos() * phi2.cos();
    cos.clamp(-1.0, 1.0).acos() * EARTH_RADIUS_METERS
}

/// Basic commute information for one route.
#[derive(Debug, Clone, PartialEq)]
pub struct CommuteInfo {
    /// Short names of the transit lines used, or `["walk"]` if none.
    pub summary: Vec<String>,
    /// Total travel time in seconds.
    pub duration_seconds: u64,
}

/// Transit-directions lookup between an origin and a destination, both given
/// as `lat,lng` pairs or free-text addresses. `None` when no route exists.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectionsApi: Send + Sync {
    async fn commute_information(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<Option<CommuteInfo>>;
}

/// Google Directions API client. Routes are calculated for a 10 AM departure
/// in the local timezone, transit mode, preferring fewer transfers.
pub struct GoogleDirectionsApi {
    client: Client,
    api_key: String,
}

const DIRECTIONS_URL: &str = "https://maps.googleapis.com/maps/api/directions/json";

impl GoogleDirectionsApi {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, api_key })
    }

    fn departure_time() -> Result<i64> {
        let today = Local::now().date_naive();
        let at_ten = today
            .and_hms_opt(10, 0, 0)
            .and_then(|t| t.and_local_timezone(Local).single())
            .context("Could not resolve 10 AM local time")?;
        Ok(at_ten.timestamp())
    }
}

#[async_trait]
impl DirectionsApi for GoogleDirectionsApi {
    async fn commute_information(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<Option<CommuteInfo>> {
        let departure_time = Self::departure_time()?;
        debug!("Fetching directions from {} to {}", origin, destination);

        let response: Value = self
            .client
            .get(DIRECTIONS_URL)
            .query(&[
                ("origin", origin),
                ("destination", destination),
                ("mode", "transit"),
                ("departure_time", &departure_time.to_string()),
                ("transit_routing_preference", "fewer_transfers"),
                ("key", &self.api_key),
            ])
            .send()
            .await
            .context("Failed to fetch directions")?
            .json()
            .await
            .context("Failed to decode directions response")?;

        parse_commute_information(&response)
    }
}

/// Extracts commute info from a directions response: the transit line short
/// names along the first leg's steps, and the total duration.
pub fn parse_commute_information(response: &Value) -> Result<Option<CommuteInfo>> {
    let routes = response["routes"]
        .as_array()
        .context("Directions response has no routes array")?;
    if routes.is_empty() {
        return Ok(None);
    }

    let leg = &routes[0]["legs"][0];
    let steps = leg["steps"]
        .as_array()
        .context("Directions route has no steps")?;

    let mut summary: Vec<String> = steps
        .iter()
        .filter_map(|step| step["transit_details"]["line"]["short_name"].as_str())
        .map(str::to_string)
        .collect();

    // No lines, just walking
    if summary.is_empty() {
        summary.push("walk".to_string());
    }

    let duration_seconds = leg["duration"]["value"]
        .as_u64()
        .context("Directions route has no duration")?;

    Ok(Some(CommuteInfo {
        summary,
        duration_seconds,
    }))
}
