//! FFI bindings for mobile platforms (iOS/Android).
//!
//! UniFFI bindings exposing the tracking engine to Kotlin and Swift. The host
//! app implements two callback interfaces (location and storage) and drives
//! a single process-wide engine through `tracker_*` functions.
//!
//! Results that carry sessions or search hits cross the boundary as JSON
//! envelopes: `{"ok": true, "data": ...}` or
//! `{"ok": false, "code": "NoActiveSession", "message": "..."}`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::location::{
    AccuracyHint, DeliveryMode, LocationProvider, LocationSnapshot, PositionSender,
    PositionSubscription, SubscribeOptions,
};
use crate::proximity::Candidate;
use crate::session::CheckpointKind;
use crate::store::KeyValueStore;
use crate::{
    format_distance, init_logging, ProximityConfig, Result, TrackingConfig, TrackingEngine,
    TrekError, TrekSubject,
};

// ============================================================================
// Host Callback Interfaces
// ============================================================================

/// Location services implemented by the host app.
#[uniffi::export(callback_interface)]
pub trait HostLocationProvider: Send + Sync {
    /// Prompt for (or check) location permission.
    fn request_permission(&self) -> bool;

    /// Fetch one fix, giving up after `timeout_ms`.
    fn current_position(&self, high_accuracy: bool, timeout_ms: u64) -> FfiPositionFix;

    /// Start pushing fixes through `tracker_push_position`.
    /// Returns true when a background task was registered.
    fn start_updates(&self, interval_ms: u64, min_distance_m: f64, background_task_id: String) -> bool;

    /// Stop pushing fixes and unregister any background task.
    fn stop_updates(&self);
}

/// Persistent key-value storage implemented by the host app.
#[uniffi::export(callback_interface)]
pub trait HostKeyValueStore: Send + Sync {
    fn get(&self, key: String) -> Option<Vec<u8>>;

    /// Returns false if the write failed.
    fn set(&self, key: String, value: Vec<u8>) -> bool;
}

// ============================================================================
// FFI Records
// ============================================================================

/// A position fix as exchanged with the host.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    /// Unix epoch milliseconds
    pub timestamp_ms: i64,
    pub is_real: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiFixStatus {
    Ok,
    PermissionDenied,
    Unavailable,
    Timeout,
}

/// Outcome of a host position fetch.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPositionFix {
    pub status: FfiFixStatus,
    pub location: Option<FfiLocation>,
    pub message: Option<String>,
}

impl From<FfiLocation> for LocationSnapshot {
    fn from(loc: FfiLocation) -> Self {
        let timestamp = DateTime::<Utc>::from_timestamp_millis(loc.timestamp_ms).unwrap_or_else(Utc::now);
        LocationSnapshot {
            latitude: loc.latitude,
            longitude: loc.longitude,
            altitude: loc.altitude,
            accuracy: loc.accuracy,
            speed: loc.speed,
            timestamp,
            is_real: loc.is_real,
        }
    }
}

impl From<LocationSnapshot> for FfiLocation {
    fn from(snapshot: LocationSnapshot) -> Self {
        FfiLocation {
            latitude: snapshot.latitude,
            longitude: snapshot.longitude,
            altitude: snapshot.altitude,
            accuracy: snapshot.accuracy,
            speed: snapshot.speed,
            timestamp_ms: snapshot.timestamp.timestamp_millis(),
            is_real: snapshot.is_real,
        }
    }
}

// ============================================================================
// Host Adapters
// ============================================================================

/// Sender for the host-driven position stream, set while subscribed.
static HOST_SENDER: Lazy<Mutex<Option<PositionSender>>> = Lazy::new(|| Mutex::new(None));

struct HostProvider {
    host: Arc<dyn HostLocationProvider>,
}

impl LocationProvider for HostProvider {
    fn request_permission(&self) -> bool {
        self.host.request_permission()
    }

    fn current_position(&self, accuracy: AccuracyHint, timeout: Duration) -> Result<LocationSnapshot> {
        let timeout_ms = timeout.as_millis() as u64;
        let fix = self
            .host
            .current_position(accuracy == AccuracyHint::High, timeout_ms);

        match (fix.status, fix.location) {
            (FfiFixStatus::Ok, Some(location)) => Ok(location.into()),
            (FfiFixStatus::Ok, None) | (FfiFixStatus::Unavailable, _) => {
                Err(TrekError::LocationUnavailable {
                    message: fix.message.unwrap_or_else(|| "no fix".to_string()),
                })
            }
            (FfiFixStatus::PermissionDenied, _) => Err(TrekError::PermissionDenied),
            (FfiFixStatus::Timeout, _) => Err(TrekError::Timeout { timeout_ms }),
        }
    }

    fn subscribe(&self, options: &SubscribeOptions) -> Result<PositionSubscription> {
        let background = self.host.start_updates(
            options.interval.as_millis() as u64,
            options.min_distance_m,
            options.background_task_id.clone().unwrap_or_default(),
        );
        let mode = if background {
            DeliveryMode::Background
        } else {
            DeliveryMode::ForegroundOnly
        };

        let (sender, subscription) = PositionSubscription::channel(mode);
        *lock_sender()? = Some(sender);

        let host = Arc::clone(&self.host);
        Ok(subscription.with_cancel_hook(move || {
            host.stop_updates();
            if let Ok(mut slot) = HOST_SENDER.lock() {
                *slot = None;
            }
            debug!("[TrekTrackerFFI] Host updates stopped");
        }))
    }
}

fn lock_sender() -> Result<std::sync::MutexGuard<'static, Option<PositionSender>>> {
    HOST_SENDER
        .lock()
        .map_err(|_| TrekError::LocationUnavailable {
            message: "position channel poisoned".to_string(),
        })
}

struct HostStore {
    host: Box<dyn HostKeyValueStore>,
}

impl KeyValueStore for HostStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.host.get(key.to_string()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        if self.host.set(key.to_string(), value.to_vec()) {
            Ok(())
        } else {
            Err(TrekError::persistence(format!("host rejected write to '{}'", key)))
        }
    }
}

// ============================================================================
// Global Singleton
// ============================================================================

/// Process-wide engine, created by `tracker_init`.
static TRACKER: Lazy<Mutex<Option<TrackingEngine>>> = Lazy::new(|| Mutex::new(None));

fn with_tracker<F, R>(f: F) -> Result<R>
where
    F: FnOnce(&mut TrackingEngine) -> Result<R>,
{
    let mut slot = TRACKER.lock().map_err(|_| TrekError::Config {
        message: "tracker state poisoned".to_string(),
    })?;
    let engine = slot.as_mut().ok_or_else(|| TrekError::Config {
        message: "tracker not initialized, call tracker_init first".to_string(),
    })?;
    f(engine)
}

fn envelope<T: Serialize>(result: Result<T>) -> String {
    let value = match result {
        Ok(data) => match serde_json::to_value(&data) {
            Ok(data) => serde_json::json!({ "ok": true, "data": data }),
            Err(e) => error_value(&TrekError::from(e)),
        },
        Err(e) => error_value(&e),
    };
    value.to_string()
}

fn error_value(err: &TrekError) -> serde_json::Value {
    serde_json::json!({ "ok": false, "code": err.code(), "message": err.to_string() })
}

// ============================================================================
// FFI Exports
// ============================================================================

/// Create the engine (call once at app startup).
///
/// `config_json` may be empty for defaults. Resumes a session that was still
/// Active when the app was last killed; the envelope data is the restored
/// session id or null.
#[uniffi::export]
pub fn tracker_init(
    location: Box<dyn HostLocationProvider>,
    store: Box<dyn HostKeyValueStore>,
    config_json: String,
    proximity_config_json: String,
) -> String {
    init_logging();

    let result = (|| -> Result<Option<String>> {
        // Release the previous engine's position stream before a new one subscribes
        let previous = TRACKER.lock().ok().and_then(|mut slot| slot.take());
        drop(previous);

        let config = if config_json.trim().is_empty() {
            TrackingConfig::default()
        } else {
            TrackingConfig::from_json(&config_json)?
        };
        let proximity_config = if proximity_config_json.trim().is_empty() {
            ProximityConfig::default()
        } else {
            ProximityConfig::from_json(&proximity_config_json)?
        };

        let provider = Arc::new(HostProvider {
            host: Arc::from(location),
        });
        let mut engine = TrackingEngine::new(provider, Arc::new(HostStore { host: store }), config)?
            .with_proximity_config(proximity_config)?;
        let restored = engine.restore().unwrap_or_else(|e| {
            error!("[TrekTrackerFFI] Could not resume saved session: {}", e);
            None
        });

        let mut slot = TRACKER.lock().map_err(|_| TrekError::Config {
            message: "tracker state poisoned".to_string(),
        })?;
        *slot = Some(engine);
        info!("[TrekTrackerFFI] Initialized (restored: {:?})", restored);
        Ok(restored)
    })();

    envelope(result)
}

/// Start tracking `subject_json` (a `TrekSubject`).
#[uniffi::export]
pub fn tracker_start_session(subject_json: String) -> String {
    let result = serde_json::from_str::<TrekSubject>(&subject_json)
        .map_err(TrekError::from)
        .and_then(|subject| with_tracker(|e| e.start_session(&subject)));
    envelope(result)
}

/// Deliver one fix from the host's update loop. The fix is journaled to the
/// host store before this returns. Returns false if nothing is subscribed.
#[uniffi::export]
pub fn tracker_push_position(location: FfiLocation) -> bool {
    match lock_sender() {
        Ok(slot) => slot
            .as_ref()
            .is_some_and(|sender| sender.send(location.into())),
        Err(e) => {
            warn!("[TrekTrackerFFI] Dropping position: {}", e);
            false
        }
    }
}

/// Append pushed positions to the active session. Returns the number appended.
#[uniffi::export]
pub fn tracker_poll_positions() -> String {
    envelope(with_tracker(|e| e.poll_positions()))
}

#[uniffi::export]
pub fn tracker_add_rest_stop(notes: String) -> String {
    envelope(with_tracker(|e| e.add_rest_stop(&notes)))
}

#[uniffi::export]
pub fn tracker_end_rest_stop(id: u64) -> String {
    envelope(with_tracker(|e| e.end_rest_stop(id)))
}

/// `kind` is one of waypoint, summit, viewpoint, danger, water.
#[uniffi::export]
pub fn tracker_add_checkpoint(name: String, kind: String) -> String {
    let result = kind
        .parse::<CheckpointKind>()
        .and_then(|kind| with_tracker(|e| e.add_checkpoint(&name, kind)));
    envelope(result)
}

#[uniffi::export]
pub fn tracker_request_stop() -> String {
    envelope(with_tracker(|e| e.request_stop()))
}

#[uniffi::export]
pub fn tracker_confirm_stop() -> String {
    envelope(with_tracker(|e| e.confirm_stop()))
}

#[uniffi::export]
pub fn tracker_cancel_stop() -> String {
    envelope(with_tracker(|e| e.cancel_stop()))
}

/// Stop immediately without the confirmation step.
#[uniffi::export]
pub fn tracker_stop_session() -> String {
    envelope(with_tracker(|e| e.stop_session()))
}

#[uniffi::export]
pub fn tracker_status_json() -> String {
    envelope(with_tracker(|e| Ok(e.status())))
}

#[uniffi::export]
pub fn tracker_live_readout_json() -> String {
    envelope(with_tracker(|e| e.live_readout()))
}

#[uniffi::export]
pub fn tracker_completed_sessions_json() -> String {
    envelope(with_tracker(|e| e.completed_sessions()))
}

/// Origin for nearby search: the device location or the fallback point.
#[uniffi::export]
pub fn tracker_current_origin() -> Option<FfiLocation> {
    with_tracker(|e| Ok(e.current_origin()))
        .ok()
        .map(FfiLocation::from)
}

/// Cached nearby search over `candidates_json` (an array of `Candidate`).
///
/// Pass no origin to get featured/top-rated fallback ranking.
#[uniffi::export]
pub fn tracker_find_nearby_json(
    origin: Option<FfiLocation>,
    candidates_json: String,
    max_distance_km: f64,
    limit: u32,
) -> String {
    let origin: Option<LocationSnapshot> = origin.map(Into::into);
    let result = serde_json::from_str::<Vec<Candidate>>(&candidates_json)
        .map_err(TrekError::from)
        .and_then(|candidates| {
            with_tracker(|e| {
                Ok(e.find_nearby(origin.as_ref(), &candidates, max_distance_km, limit as usize))
            })
        });
    envelope(result)
}

/// Format a distance in kilometers for display ("500m", "3.3km", "42km").
#[uniffi::export]
pub fn format_distance_km(km: f64) -> String {
    format_distance(km)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_conversion() {
        let loc = FfiLocation {
            latitude: 18.5204,
            longitude: 73.8567,
            altitude: Some(560.0),
            accuracy: Some(8.0),
            speed: None,
            timestamp_ms: 1_700_000_000_000,
            is_real: true,
        };
        let snapshot: LocationSnapshot = loc.into();
        assert_eq!(snapshot.timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(snapshot.altitude, Some(560.0));

        let back = FfiLocation::from(snapshot);
        assert_eq!(back.timestamp_ms, 1_700_000_000_000);
        assert!(back.is_real);
    }

    #[test]
    fn test_envelope_shapes() {
        let ok: serde_json::Value = serde_json::from_str(&envelope(Ok(3usize))).unwrap();
        assert_eq!(ok["ok"], true);
        assert_eq!(ok["data"], 3);

        let err: serde_json::Value =
            serde_json::from_str(&envelope::<()>(Err(TrekError::NoActiveSession))).unwrap();
        assert_eq!(err["ok"], false);
        assert_eq!(err["code"], "NoActiveSession");
    }

    #[test]
    fn test_format_distance_km() {
        assert_eq!(format_distance_km(0.5), "500m");
        assert_eq!(format_distance_km(42.0), "42km");
    }
}
