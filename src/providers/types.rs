use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::geo;
use crate::models::{Coordinate, Listing};

/// Filter criteria for a listing search, set once at provider construction.
///
/// `None` bounds are unbounded. Distances are meters, commute durations
/// minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Upper bound on both base and total rent (EUR).
    pub max_rent: Option<f64>,
    pub min_room_count: f64,
    pub max_room_count: Option<f64>,
    /// Maximum bird's flight distance from `near`, in meters.
    pub max_distance: Option<f64>,
    /// Maximum commute duration from `near`, in minutes.
    pub max_commute_duration: Option<f64>,
    /// Minimum size in square meters.
    pub min_size: f64,
    /// Reference point for distance and commute checks.
    pub near: Coordinate,
    /// Only listings published strictly after this instant are kept.
    pub published_after: DateTime<Utc>,
    /// Keep only listings on the building's top floor.
    pub top_floor_only: bool,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            max_rent: None,
            min_room_count: 0.0,
            max_room_count: None,
            max_distance: None,
            max_commute_duration: None,
            min_size: 0.0,
            near: Coordinate { lat: 0.0, lng: 0.0 },
            published_after: Utc::now() - Duration::days(365),
            top_floor_only: false,
        }
    }
}

impl FilterCriteria {
    /// The final filter predicate, applied after enrichment.
    ///
    /// A listing with no publish date is rejected; enrichment always sets it.
    pub fn is_relevant(&self, listing: &Listing) -> bool {
        self.within_rent_bound(listing)
            && self.within_room_bounds(listing)
            && self.within_distance_bound(listing)
            && self.within_commute_bound(listing)
            && listing.size >= self.min_size
            && self.published_recently_enough(listing)
            && self.on_top_floor_if_required(listing)
    }

    pub fn within_rent_bound(&self, listing: &Listing) -> bool {
        self.max_rent
            .map_or(true, |max| listing.base_rent <= max && listing.total_rent <= max)
    }

    pub fn within_room_bounds(&self, listing: &Listing) -> bool {
        listing.room_count >= self.min_room_count
            && self.max_room_count.map_or(true, |max| listing.room_count <= max)
    }

    /// Listings without a geolocation pass; the distance is unknowable.
    pub fn within_distance_bound(&self, listing: &Listing) -> bool {
        match (self.max_distance, listing.geolocation) {
            (Some(max), Some(geolocation)) => {
                geo::direct_distance(&self.near, &geolocation) <= max
            }
            _ => true,
        }
    }

    fn within_commute_bound(&self, listing: &Listing) -> bool {
        match (self.max_commute_duration, listing.commute_duration) {
            (Some(max), Some(duration)) => duration <= max,
            _ => true,
        }
    }

    fn published_recently_enough(&self, listing: &Listing) -> bool {
        listing
            .date_published
            .map_or(false, |published| published > self.published_after)
    }

    fn on_top_floor_if_required(&self, listing: &Listing) -> bool {
        if !self.top_floor_only {
            return true;
        }
        match (listing.floor, listing.floor_count) {
            (_, None) => true,
            (floor, Some(count)) => floor == Some(count),
        }
    }
}
