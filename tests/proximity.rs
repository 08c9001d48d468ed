//! Integration tests for nearby search and its result cache.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{ScriptedProvider, PUNE};
use trek_tracker::{
    find_nearby, Candidate, GpsPoint, LocationSnapshot, MemoryStore, ProximityConfig,
    ResultCache, TrackingConfig, TrackingEngine,
};

/// Point `km` due north of Pune along the meridian.
fn north_of_pune(km: f64) -> GpsPoint {
    GpsPoint::new(PUNE.0 + km / 111.195, PUNE.1)
}

fn pune() -> LocationSnapshot {
    LocationSnapshot::real(PUNE.0, PUNE.1)
}

fn abc() -> Vec<Candidate> {
    vec![
        Candidate::new("A", "Parvati Hill", north_of_pune(0.0)),
        Candidate::new("B", "Lohagad", north_of_pune(50.0)),
        Candidate::new("C", "Harishchandragad", north_of_pune(150.0)),
    ]
}

#[test]
fn test_radius_and_limit_scenario() {
    let results = find_nearby(Some(&pune()), &abc(), 100.0, 2);
    let ids: Vec<&str> = results.iter().map(|r| r.candidate_id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);

    let b = &results[1];
    assert!((b.distance_km.unwrap() - 50.0).abs() < 0.1);
    assert_eq!(b.distance_text.as_deref(), Some("50km"));
}

#[test]
fn test_results_never_exceed_limit() {
    for limit in 0..5 {
        let results = find_nearby(Some(&pune()), &abc(), 1_000.0, limit);
        assert!(results.len() <= limit);
        assert!(results
            .windows(2)
            .all(|w| w[0].distance_km <= w[1].distance_km));
    }
}

#[test]
fn test_cache_scenario() {
    let t0 = Utc::now();
    let mut cache = ResultCache::default();
    let mut candidates = abc();

    let first = cache.get_at(t0, Some(&pune()), &candidates, 100.0, 6);
    let second = cache.get_at(t0 + Duration::seconds(45), Some(&pune()), &candidates, 100.0, 6);
    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(second.entry.stored_at, first.entry.stored_at);

    candidates.push(Candidate::new("D", "Torna", north_of_pune(20.0)));
    let third = cache.get_at(t0 + Duration::seconds(50), Some(&pune()), &candidates, 100.0, 6);
    assert!(!third.cache_hit);
    let ids: Vec<&str> = third
        .results()
        .iter()
        .map(|r| r.candidate_id.as_str())
        .collect();
    assert_eq!(ids, vec!["A", "D", "B"]);
}

#[test]
fn test_cache_expires_after_ttl() {
    let t0 = Utc::now();
    let mut cache = ResultCache::default();

    cache.get_at(t0, Some(&pune()), &abc(), 100.0, 6);
    let later = cache.get_at(t0 + Duration::minutes(6), Some(&pune()), &abc(), 100.0, 6);
    assert!(!later.cache_hit);
}

#[test]
fn test_engine_nearby_uses_config_and_cache() {
    let provider = ScriptedProvider::answering(pune()).shared();
    let mut engine = TrackingEngine::new(
        provider,
        Arc::new(MemoryStore::new()),
        TrackingConfig::default(),
    )
    .unwrap()
    .with_proximity_config(ProximityConfig {
        limit: 1,
        ..ProximityConfig::default()
    })
    .unwrap();

    let origin = engine.current_origin();
    assert!(origin.is_real);

    let first = engine.nearby_treks(Some(&origin), &abc());
    assert_eq!(first.results().len(), 1);
    assert_eq!(first.results()[0].candidate_id, "A");
    assert!(!first.results()[0].calculated_from_fallback);

    assert!(engine.nearby_treks(Some(&origin), &abc()).cache_hit);
    engine.invalidate_nearby();
    assert!(!engine.nearby_treks(Some(&origin), &abc()).cache_hit);
}

#[test]
fn test_no_origin_is_explicitly_fallback_ranked() {
    let candidates = vec![
        Candidate::new("plain", "Plain", north_of_pune(1.0)),
        Candidate::new("rated", "Rated", north_of_pune(2.0)).with_rating(4.6),
        Candidate::new("featured", "Featured", north_of_pune(3.0)).featured(true),
    ];
    let results = find_nearby(None, &candidates, 100.0, 6);

    let ids: Vec<&str> = results.iter().map(|r| r.candidate_id.as_str()).collect();
    assert_eq!(ids, vec!["featured", "rated"]);
    assert!(results.iter().all(|r| r.is_fallback_ranked));
    assert!(results.iter().all(|r| r.distance_km.is_none() && r.distance_text.is_none()));
}
