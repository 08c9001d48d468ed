//! Session statistics.
//!
//! Statistics are never maintained incrementally: they are a pure function of
//! the waypoint list and are recomputed in full on demand (periodic UI
//! refresh, stop). Waypoint count is bounded by trek duration times the
//! sampling interval, so the O(n) pass stays cheap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo_utils::{format_distance, format_duration, mps_to_kmh, path_distance};
use crate::session::{TrackingSession, Waypoint};

/// Aggregates derived from a session's waypoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_distance_meters: f64,
    /// Sum of positive altitude deltas (meters)
    pub elevation_gain: f64,
    /// Sum of absolute negative altitude deltas (meters)
    pub elevation_loss: f64,
    pub max_elevation: f64,
    pub min_elevation: f64,
    /// Mean of the per-waypoint speed samples (m/s), not distance / time
    pub average_speed: f64,
    pub max_speed: f64,
    pub total_time_hours: f64,
}

impl SessionStats {
    /// Initial stats for a session whose first waypoint is at `altitude`.
    pub fn starting_at(altitude: f64) -> Self {
        Self {
            max_elevation: altitude,
            min_elevation: altitude,
            ..Self::default()
        }
    }
}

/// Compute statistics over an ordered waypoint list.
///
/// Single pass over consecutive pairs. Fewer than 2 waypoints yields
/// all-zero defaults. Elapsed time runs from `start_time` to `end_time`,
/// or to `now` while the session is still recording.
pub fn compute_statistics(
    waypoints: &[Waypoint],
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> SessionStats {
    if waypoints.len() < 2 {
        return SessionStats::default();
    }

    let points: Vec<_> = waypoints.iter().map(Waypoint::point).collect();
    let total_distance = path_distance(&points);
    let mut elevation_gain = 0.0;
    let mut elevation_loss = 0.0;
    let mut max_elevation = waypoints[0].altitude;
    let mut min_elevation = waypoints[0].altitude;
    let mut total_speed = 0.0;
    let mut max_speed: f64 = 0.0;

    for pair in waypoints.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);

        let elevation_change = curr.altitude - prev.altitude;
        if elevation_change > 0.0 {
            elevation_gain += elevation_change;
        } else {
            elevation_loss += elevation_change.abs();
        }

        max_elevation = max_elevation.max(curr.altitude);
        min_elevation = min_elevation.min(curr.altitude);

        total_speed += curr.speed;
        max_speed = max_speed.max(curr.speed);
    }

    let end = end_time.unwrap_or(now);
    let total_time_hours = (end - start_time).num_milliseconds() as f64 / 3_600_000.0;

    SessionStats {
        total_distance_meters: total_distance,
        elevation_gain,
        elevation_loss,
        max_elevation,
        min_elevation,
        average_speed: total_speed / (waypoints.len() - 1) as f64,
        max_speed,
        total_time_hours,
    }
}

/// Display-ready readout for the live tracking screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveReadout {
    pub distance_km: f64,
    pub distance_text: String,
    /// Elevation gain rounded to whole meters
    pub elevation_gain_m: i64,
    pub elapsed_secs: i64,
    /// `HH:MM:SS`
    pub duration_text: String,
    /// Speed of the latest waypoint in km/h
    pub current_speed_kmh: f64,
    pub waypoint_count: usize,
    pub is_mock_tracking: bool,
}

impl LiveReadout {
    /// Build a readout from the session's current stats. Recompute first for fresh numbers.
    pub fn for_session(session: &TrackingSession, now: DateTime<Utc>) -> Self {
        let distance_km = session.stats.total_distance_meters / 1000.0;
        let elapsed = session.end_time.unwrap_or(now) - session.start_time;
        let current_speed = session.waypoints.last().map(|w| w.speed).unwrap_or(0.0);

        Self {
            distance_km,
            distance_text: format_distance(distance_km),
            elevation_gain_m: session.stats.elevation_gain.round() as i64,
            elapsed_secs: elapsed.num_seconds().max(0),
            duration_text: format_duration(elapsed),
            current_speed_kmh: mps_to_kmh(current_speed),
            waypoint_count: session.waypoints.len(),
            is_mock_tracking: session.is_mock_tracking,
        }
    }
}
