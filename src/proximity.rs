//! # Proximity Search
//!
//! Ranks candidate treks by great-circle distance from an origin.
//!
//! With a usable origin, candidates within `max_distance_km` are returned
//! nearest first. Without one, results degrade to a featured/rating ranking
//! and are marked `is_fallback_ranked` with no distance, so callers can tell
//! the two shapes apart.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::geo_utils::{format_distance, haversine_km};
use crate::location::LocationSnapshot;
use crate::GpsPoint;

/// Minimum rating for a non-featured trek to appear in fallback ranking.
pub const FEATURED_MIN_RATING: f64 = 4.0;

/// A trek that may be returned by a nearby search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub coordinates: Option<GpsPoint>,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub rating: Option<f64>,
}

impl Candidate {
    pub fn new(id: &str, name: &str, coordinates: GpsPoint) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            coordinates: Some(coordinates),
            featured: false,
            rating: None,
        }
    }

    pub fn featured(mut self, featured: bool) -> Self {
        self.featured = featured;
        self
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    fn usable_coordinates(&self) -> Option<GpsPoint> {
        self.coordinates.filter(GpsPoint::is_valid)
    }
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityResult {
    pub candidate_id: String,
    pub name: String,
    /// `None` when ranked without an origin
    pub distance_km: Option<f64>,
    pub distance_text: Option<String>,
    pub is_fallback_ranked: bool,
    /// Distance was measured from a fallback (non-real) origin
    pub calculated_from_fallback: bool,
    pub featured: bool,
    pub rating: Option<f64>,
}

/// Find candidates near `origin`.
///
/// Results never exceed `limit`. Distance-ranked results are sorted
/// ascending by `distance_km`; ties keep candidate order.
pub fn find_nearby(
    origin: Option<&LocationSnapshot>,
    candidates: &[Candidate],
    max_distance_km: f64,
    limit: usize,
) -> Vec<ProximityResult> {
    match origin.filter(|o| o.point().is_valid()) {
        Some(origin) => rank_by_distance(origin, candidates, max_distance_km, limit),
        None => rank_without_origin(candidates, limit),
    }
}

fn rank_by_distance(
    origin: &LocationSnapshot,
    candidates: &[Candidate],
    max_distance_km: f64,
    limit: usize,
) -> Vec<ProximityResult> {
    let from = origin.point();

    let mut hits: Vec<(f64, &Candidate)> = candidates
        .iter()
        .filter_map(|c| c.usable_coordinates().map(|p| (haversine_km(&from, &p), c)))
        .filter(|(km, _)| *km <= max_distance_km)
        .collect();

    hits.sort_by(|a, b| a.0.total_cmp(&b.0));
    hits.truncate(limit);

    debug!(
        "[ProximitySearch] {} of {} candidates within {}km (real origin: {})",
        hits.len(),
        candidates.len(),
        max_distance_km,
        origin.is_real
    );

    hits.into_iter()
        .map(|(km, c)| ProximityResult {
            candidate_id: c.id.clone(),
            name: c.name.clone(),
            distance_km: Some(km),
            distance_text: Some(format_distance(km)),
            is_fallback_ranked: false,
            calculated_from_fallback: !origin.is_real,
            featured: c.featured,
            rating: c.rating,
        })
        .collect()
}

fn rank_without_origin(candidates: &[Candidate], limit: usize) -> Vec<ProximityResult> {
    let mut eligible: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| c.usable_coordinates().is_some())
        .filter(|c| c.featured || c.rating.is_some_and(|r| r >= FEATURED_MIN_RATING))
        .collect();

    // Featured first, then rating descending
    eligible.sort_by(|a, b| {
        b.featured.cmp(&a.featured).then_with(|| {
            let ra = a.rating.unwrap_or(0.0);
            let rb = b.rating.unwrap_or(0.0);
            rb.total_cmp(&ra)
        })
    });
    eligible.truncate(limit);

    debug!(
        "[ProximitySearch] No usable origin, {} featured/top-rated results",
        eligible.len()
    );

    eligible
        .into_iter()
        .map(|c| ProximityResult {
            candidate_id: c.id.clone(),
            name: c.name.clone(),
            distance_km: None,
            distance_text: None,
            is_fallback_ranked: true,
            calculated_from_fallback: true,
            featured: c.featured,
            rating: c.rating,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pune() -> LocationSnapshot {
        LocationSnapshot::real(18.5204, 73.8567)
    }

    /// Point `km` due north of Pune.
    fn north_of_pune(km: f64) -> GpsPoint {
        GpsPoint::new(18.5204 + km / 111.195, 73.8567)
    }

    #[test]
    fn test_filters_by_radius_and_limit() {
        let candidates = vec![
            Candidate::new("c", "C", north_of_pune(150.0)),
            Candidate::new("b", "B", north_of_pune(50.0)),
            Candidate::new("a", "A", north_of_pune(0.0)),
        ];
        let results = find_nearby(Some(&pune()), &candidates, 100.0, 2);
        let ids: Vec<&str> = results.iter().map(|r| r.candidate_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(results.iter().all(|r| !r.is_fallback_ranked));
        assert_eq!(results[0].distance_text.as_deref(), Some("0m"));
    }

    #[test]
    fn test_zero_radius_matches_exact_origin() {
        let candidates = vec![Candidate::new("here", "Here", GpsPoint::new(18.5204, 73.8567))];
        let results = find_nearby(Some(&pune()), &candidates, 0.0, 6);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].distance_km, Some(0.0));
    }

    #[test]
    fn test_sorted_non_decreasing() {
        let candidates: Vec<Candidate> = [40.0, 5.0, 90.0, 12.0, 60.0, 33.0, 1.0]
            .iter()
            .enumerate()
            .map(|(i, &km)| Candidate::new(&format!("t{}", i), "T", north_of_pune(km)))
            .collect();
        let results = find_nearby(Some(&pune()), &candidates, 100.0, 5);
        assert_eq!(results.len(), 5);
        assert!(results
            .windows(2)
            .all(|w| w[0].distance_km <= w[1].distance_km));
    }

    #[test]
    fn test_missing_coordinates_excluded() {
        let mut no_coords = Candidate::new("x", "X", north_of_pune(1.0));
        no_coords.coordinates = None;
        let candidates = vec![no_coords, Candidate::new("y", "Y", north_of_pune(2.0))];

        let results = find_nearby(Some(&pune()), &candidates, 100.0, 6);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].candidate_id, "y");
    }

    #[test]
    fn test_fallback_origin_is_flagged() {
        let origin = LocationSnapshot::fallback(18.5204, 73.8567);
        let candidates = vec![Candidate::new("a", "A", north_of_pune(3.0))];
        let results = find_nearby(Some(&origin), &candidates, 100.0, 6);
        assert!(results[0].calculated_from_fallback);
        assert!(!results[0].is_fallback_ranked);
    }

    #[test]
    fn test_no_origin_ranks_featured_then_rating() {
        let candidates = vec![
            Candidate::new("low", "Low", north_of_pune(1.0)).with_rating(3.2),
            Candidate::new("good", "Good", north_of_pune(2.0)).with_rating(4.3),
            Candidate::new("best", "Best", north_of_pune(3.0)).with_rating(4.8),
            Candidate::new("feat", "Feat", north_of_pune(4.0))
                .featured(true)
                .with_rating(3.9),
        ];
        let results = find_nearby(None, &candidates, 100.0, 6);
        let ids: Vec<&str> = results.iter().map(|r| r.candidate_id.as_str()).collect();
        assert_eq!(ids, vec!["feat", "best", "good"]);
        assert!(results
            .iter()
            .all(|r| r.is_fallback_ranked && r.distance_km.is_none()));
    }

    #[test]
    fn test_invalid_origin_treated_as_absent() {
        let origin = LocationSnapshot::real(f64::NAN, 73.8567);
        let candidates = vec![Candidate::new("f", "F", north_of_pune(1.0)).featured(true)];
        let results = find_nearby(Some(&origin), &candidates, 100.0, 6);
        assert!(results[0].is_fallback_ranked);
    }
}
