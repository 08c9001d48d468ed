//! # Tracking Session
//!
//! Data model for one recorded trek and the rules for mutating it.
//!
//! A session is created Active with exactly one `start` waypoint, accepts
//! waypoints, rest stops and checkpoints only while Active, and is completed
//! exactly once by appending an `end` waypoint. Completed is terminal: a new
//! trek always gets a fresh session.
//!
//! Waypoints stay sorted by timestamp. A fix older than the last recorded
//! waypoint is dropped rather than inserted, so the distance sum always runs
//! over consecutive pairs in time order.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::location::LocationSnapshot;
use crate::stats::{compute_statistics, SessionStats};
use crate::{GpsPoint, Result, TrekError, TrekSubject};

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaypointKind {
    Start,
    Tracking,
    End,
}

/// One recorded position sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub id: u64,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters; 0 when the fix carried no altitude
    pub altitude: f64,
    pub timestamp: DateTime<Utc>,
    /// m/s; 0 when the fix carried no speed
    pub speed: f64,
    pub accuracy: Option<f64>,
    pub kind: WaypointKind,
}

impl Waypoint {
    fn from_snapshot(id: u64, snapshot: &LocationSnapshot, kind: WaypointKind) -> Self {
        Self {
            id,
            latitude: snapshot.latitude,
            longitude: snapshot.longitude,
            altitude: snapshot.altitude.unwrap_or(0.0),
            timestamp: snapshot.timestamp,
            speed: snapshot.speed.unwrap_or(0.0),
            accuracy: snapshot.accuracy,
            kind,
        }
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// A pause recorded during the trek.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestStop {
    pub id: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub timestamp: DateTime<Utc>,
    pub notes: String,
    /// Seconds; 0 while the stop is ongoing
    pub duration: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointKind {
    Waypoint,
    Summit,
    Viewpoint,
    Danger,
    Water,
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckpointKind::Waypoint => "waypoint",
            CheckpointKind::Summit => "summit",
            CheckpointKind::Viewpoint => "viewpoint",
            CheckpointKind::Danger => "danger",
            CheckpointKind::Water => "water",
        };
        f.write_str(name)
    }
}

impl FromStr for CheckpointKind {
    type Err = TrekError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "waypoint" => Ok(CheckpointKind::Waypoint),
            "summit" => Ok(CheckpointKind::Summit),
            "viewpoint" => Ok(CheckpointKind::Viewpoint),
            "danger" => Ok(CheckpointKind::Danger),
            "water" => Ok(CheckpointKind::Water),
            other => Err(TrekError::Serialization {
                message: format!("unknown checkpoint kind '{}'", other),
            }),
        }
    }
}

/// A named point of interest marked during the trek.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: u64,
    pub name: String,
    pub kind: CheckpointKind,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Completed,
}

// ============================================================================
// Session
// ============================================================================

/// One tracking run. Serializes to the persisted snapshot schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub id: String,
    pub subject_id: String,
    #[serde(default)]
    pub subject_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    /// Positions come from the simulated source, not a real fix
    #[serde(default)]
    pub is_mock_tracking: bool,
    pub waypoints: Vec<Waypoint>,
    pub rest_stops: Vec<RestStop>,
    pub checkpoints: Vec<Checkpoint>,
    pub stats: SessionStats,
}

impl TrackingSession {
    /// Open a new Active session whose `start` waypoint is `first`.
    pub fn begin(
        subject: &TrekSubject,
        first: &LocationSnapshot,
        is_mock_tracking: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let start = Waypoint::from_snapshot(1, first, WaypointKind::Start);
        let stats = SessionStats::starting_at(start.altitude);

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject.id.clone(),
            subject_name: subject.name.clone(),
            start_time: now,
            end_time: None,
            status: SessionStatus::Active,
            is_mock_tracking,
            waypoints: vec![start],
            rest_stops: Vec::new(),
            checkpoints: Vec::new(),
            stats,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TrekError::NoActiveSession)
        }
    }

    /// Ids are unique within a session; records are never removed.
    fn next_id(&self) -> u64 {
        (self.waypoints.len() + self.rest_stops.len() + self.checkpoints.len()) as u64 + 1
    }

    pub fn last_waypoint(&self) -> Option<&Waypoint> {
        self.waypoints.last()
    }

    /// The most recent recorded position as a snapshot.
    ///
    /// Provenance follows the session: positions recorded from the simulated
    /// source come back with `is_real == false`.
    pub fn last_known_position(&self) -> Option<LocationSnapshot> {
        self.last_waypoint().map(|w| LocationSnapshot {
            latitude: w.latitude,
            longitude: w.longitude,
            altitude: Some(w.altitude),
            accuracy: w.accuracy,
            speed: Some(w.speed),
            timestamp: w.timestamp,
            is_real: !self.is_mock_tracking,
        })
    }

    /// Append a `tracking` waypoint.
    ///
    /// Returns `Ok(None)` when the fix is older than the last waypoint and was dropped.
    pub fn append_waypoint(&mut self, snapshot: &LocationSnapshot) -> Result<Option<&Waypoint>> {
        self.ensure_active()?;
        if !snapshot.point().is_valid() {
            return Err(TrekError::InvalidCoordinates {
                message: format!("({}, {})", snapshot.latitude, snapshot.longitude),
            });
        }
        if let Some(last) = self.last_waypoint() {
            if snapshot.timestamp < last.timestamp {
                debug!(
                    "[TrackingSession] Dropping out-of-order fix at {} (last {})",
                    snapshot.timestamp, last.timestamp
                );
                return Ok(None);
            }
        }

        let waypoint = Waypoint::from_snapshot(self.next_id(), snapshot, WaypointKind::Tracking);
        self.stats.max_elevation = self.stats.max_elevation.max(waypoint.altitude);
        self.stats.min_elevation = self.stats.min_elevation.min(waypoint.altitude);
        self.waypoints.push(waypoint);
        Ok(self.waypoints.last())
    }

    pub fn add_rest_stop(
        &mut self,
        position: &LocationSnapshot,
        notes: &str,
        now: DateTime<Utc>,
    ) -> Result<RestStop> {
        self.ensure_active()?;
        let stop = RestStop {
            id: self.next_id(),
            latitude: position.latitude,
            longitude: position.longitude,
            altitude: position.altitude.unwrap_or(0.0),
            timestamp: now,
            notes: notes.to_string(),
            duration: 0,
        };
        self.rest_stops.push(stop.clone());
        Ok(stop)
    }

    /// Fill in the duration of a rest stop that has just ended.
    pub fn end_rest_stop(&mut self, id: u64, now: DateTime<Utc>) -> Result<RestStop> {
        self.ensure_active()?;
        let stop = self
            .rest_stops
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(TrekError::RestStopNotFound { id })?;
        stop.duration = (now - stop.timestamp).num_seconds().max(0) as u64;
        Ok(stop.clone())
    }

    pub fn add_checkpoint(
        &mut self,
        position: &LocationSnapshot,
        name: &str,
        kind: CheckpointKind,
        now: DateTime<Utc>,
    ) -> Result<Checkpoint> {
        self.ensure_active()?;
        let checkpoint = Checkpoint {
            id: self.next_id(),
            name: name.to_string(),
            kind,
            latitude: position.latitude,
            longitude: position.longitude,
            altitude: position.altitude.unwrap_or(0.0),
            timestamp: now,
        };
        self.checkpoints.push(checkpoint.clone());
        Ok(checkpoint)
    }

    /// Recompute statistics from the full waypoint list.
    ///
    /// With a single waypoint the initial stats are kept as they are.
    pub fn recompute_statistics(&mut self, now: DateTime<Utc>) -> &SessionStats {
        if self.waypoints.len() >= 2 {
            self.stats = compute_statistics(&self.waypoints, self.start_time, self.end_time, now);
        }
        &self.stats
    }

    /// Close the session: append the `end` waypoint at the last known
    /// position, stamp `end_time` and compute final statistics.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_active()?;

        // A last fix stamped ahead of the local clock moves the end with it
        let end_time = self
            .last_waypoint()
            .map_or(now, |last| now.max(last.timestamp));
        if let Some(last) = self.last_waypoint() {
            let end = Waypoint {
                id: self.next_id(),
                latitude: last.latitude,
                longitude: last.longitude,
                altitude: last.altitude,
                timestamp: end_time,
                speed: 0.0,
                accuracy: last.accuracy,
                kind: WaypointKind::End,
            };
            self.waypoints.push(end);
        }

        self.end_time = Some(end_time);
        self.recompute_statistics(end_time);
        self.status = SessionStatus::Completed;
        Ok(())
    }

    /// Time since start, frozen at `end_time` once completed.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        self.end_time.unwrap_or(now) - self.start_time
    }
}
