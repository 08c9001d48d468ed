//! # Trek Tracker
//!
//! Live GPS trek tracking and nearby-trek search for mobile trekking guides.
//!
//! This library provides:
//! - A tracking engine that records one trek session at a time (waypoints,
//!   rest stops, checkpoints) and persists a snapshot after every change
//! - Distance, elevation and speed statistics recomputed from the waypoint list
//! - A simulated position source used when real positioning is unavailable
//! - Nearby-trek search with a fingerprint + TTL result cache
//!
//! ## Features
//!
//! - **`persistence`** - SQLite-backed key-value store for session snapshots
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use trek_tracker::{find_nearby, format_distance, Candidate, GpsPoint, LocationSnapshot};
//!
//! let origin = LocationSnapshot::real(18.5204, 73.8567);
//! let treks = vec![
//!     Candidate::new("sinhagad", "Sinhagad Fort", GpsPoint::new(18.3663, 73.7559)),
//!     Candidate::new("rajgad", "Rajgad Fort", GpsPoint::new(18.2462, 73.6823)),
//! ];
//!
//! let nearby = find_nearby(Some(&origin), &treks, 100.0, 6);
//! assert_eq!(nearby[0].candidate_id, "sinhagad");
//! assert_eq!(format_distance(0.5), "500m");
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrekError};

// Engine and search configuration
pub mod config;
pub use config::{ProximityConfig, TrackingConfig};

// Geographic utilities (haversine distance, formatting)
pub mod geo_utils;
pub use geo_utils::{format_distance, format_duration, haversine_distance};

// Location provider contract and position streams
pub mod location;
pub use location::{
    AccuracyClass, AccuracyHint, BackgroundScheduler, DeliveryMode, LocationProvider,
    LocationSnapshot, PositionSender, PositionSubscription, SubscribeOptions,
};

// Fallback position source
pub mod simulated;
pub use simulated::SimulatedPositionSource;

// Session data model
pub mod session;
pub use session::{
    Checkpoint, CheckpointKind, RestStop, SessionStatus, TrackingSession, Waypoint, WaypointKind,
};

// Statistics aggregation
pub mod stats;
pub use stats::{compute_statistics, LiveReadout, SessionStats};

// Key-value store contract and session snapshots
pub mod store;
pub use store::{KeyValueStore, MemoryStore, SessionStore};

// SQLite key-value store
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteStore;

// Nearby search
pub mod proximity;
pub use proximity::{find_nearby, Candidate, ProximityResult};

// Bounded TTL cache storage
pub mod lru_cache;

// Nearby search result cache
pub mod result_cache;
pub use result_cache::{fingerprint, CacheEntry, CachedResults, ResultCache};

// Session manager (public API surface for the app)
pub mod engine;
pub use engine::{FallbackSourceFactory, StartOutcome, StopPreview, TrackingEngine, TrackingStatus};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("TrekTracker"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use trek_tracker::GpsPoint;
/// let point = GpsPoint::new(18.5204, 73.8567); // Pune
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// The trek a session is recorded against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrekSubject {
    pub id: String,
    pub name: String,
    /// Known trailhead coordinates, used to seed simulated tracking
    pub coordinates: Option<GpsPoint>,
    /// Trailhead elevation in meters
    pub elevation: Option<f64>,
}

impl TrekSubject {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            coordinates: None,
            elevation: None,
        }
    }

    pub fn with_coordinates(mut self, point: GpsPoint, elevation: Option<f64>) -> Self {
        self.coordinates = Some(point);
        self.elevation = elevation;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
