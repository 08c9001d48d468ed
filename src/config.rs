//! Engine and search configuration.
//!
//! Both configs deserialize from JSON so a host app can ship them across the
//! FFI boundary as a single string.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{GpsPoint, Result, TrekError};

/// Configuration for the tracking engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackingConfig {
    /// Interval between position updates while tracking.
    /// Default: 5000 ms
    pub update_interval_ms: u64,

    /// Minimum movement between position updates.
    /// Default: 10.0 meters
    pub min_distance_m: f64,

    /// Bound on the initial position fetch in `start`. Retried once with
    /// relaxed accuracy on timeout.
    /// Default: 15000 ms
    pub position_timeout_ms: u64,

    /// Seed for simulated tracking when the trek has no known coordinates.
    /// Default: Pune, Maharashtra (18.5204, 73.8567)
    pub fallback_location: GpsPoint,

    /// Degrade to simulated tracking when positioning is denied or unavailable.
    /// When false, `start` fails with the position error instead.
    /// Default: true
    pub allow_simulated_fallback: bool,

    /// Completed sessions kept in the history log (oldest dropped first).
    /// Default: 100
    pub history_limit: usize,

    /// Identifier registered with the background scheduler.
    pub background_task_id: String,

    /// Store key for the in-progress session snapshot.
    pub active_key: String,

    /// Store key for the completed-session log.
    pub history_key: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 5_000,
            min_distance_m: 10.0,
            position_timeout_ms: 15_000,
            fallback_location: GpsPoint::new(18.5204, 73.8567),
            allow_simulated_fallback: true,
            history_limit: 100,
            background_task_id: "background-location-task".to_string(),
            active_key: "@trek_tracking_data".to_string(),
            history_key: "@completed_treks".to_string(),
        }
    }
}

impl TrackingConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.update_interval_ms == 0 {
            return Err(config_error("updateIntervalMs must be positive"));
        }
        if self.min_distance_m.is_nan() || self.min_distance_m < 0.0 {
            return Err(config_error("minDistanceM must be non-negative"));
        }
        if self.position_timeout_ms == 0 {
            return Err(config_error("positionTimeoutMs must be positive"));
        }
        if !self.fallback_location.is_valid() {
            return Err(TrekError::InvalidCoordinates {
                message: format!(
                    "fallback location ({}, {})",
                    self.fallback_location.latitude, self.fallback_location.longitude
                ),
            });
        }
        if self.history_limit == 0 {
            return Err(config_error("historyLimit must be at least 1"));
        }
        if self.active_key == self.history_key {
            return Err(config_error("activeKey and historyKey must differ"));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn position_timeout(&self) -> Duration {
        Duration::from_millis(self.position_timeout_ms)
    }
}

/// Configuration for nearby search and its result cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProximityConfig {
    /// Search radius.
    /// Default: 100 km
    pub max_distance_km: f64,

    /// Maximum results returned.
    /// Default: 6
    pub limit: usize,

    /// How long a cached result stays valid.
    /// Default: 300 s
    pub cache_ttl_secs: u64,

    /// Number of distinct queries remembered. 1 keeps only the latest query.
    /// Default: 1
    pub cache_capacity: usize,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            max_distance_km: 100.0,
            limit: 6,
            cache_ttl_secs: 300,
            cache_capacity: 1,
        }
    }
}

impl ProximityConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_distance_km.is_nan() || self.max_distance_km < 0.0 {
            return Err(config_error("maxDistanceKm must be non-negative"));
        }
        if self.cache_capacity == 0 {
            return Err(config_error("cacheCapacity must be at least 1"));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_secs as i64)
    }
}

fn config_error(message: &str) -> TrekError {
    TrekError::Config {
        message: message.to_string(),
    }
}
