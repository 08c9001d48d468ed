//! # Tracking Engine
//!
//! Session manager behind the app's tracking screens.
//!
//! The engine owns at most one Active [`TrackingSession`] together with the
//! position stream feeding it. It is constructed with its collaborators
//! injected (location provider, key-value store, fallback source factory), so
//! independent engines never share state.
//!
//! ## Lifecycle
//!
//! - `start_session` fetches an initial fix (retrying once with relaxed
//!   accuracy on timeout), degrading to a simulated source when positioning
//!   fails, then subscribes to position updates
//! - `poll_positions` / `add_waypoint` append waypoints, persisting a
//!   snapshot after each one
//! - `request_stop` → `confirm_stop` (or `stop_session` directly) cancels
//!   the subscription, closes the session and archives it
//!
//! Snapshot write failures are logged and tracking continues in memory.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{ProximityConfig, TrackingConfig};
use crate::geo_utils::{self, DEFAULT_DEVIATION_THRESHOLD_METERS};
use crate::location::{
    AccuracyHint, BackgroundScheduler, DeliveryMode, LocationProvider, LocationSnapshot,
    PositionSubscription, SubscribeOptions,
};
use crate::proximity::Candidate;
use crate::result_cache::{CachedResults, ResultCache};
use crate::session::{Checkpoint, CheckpointKind, RestStop, TrackingSession, Waypoint};
use crate::simulated::SimulatedPositionSource;
use crate::stats::{LiveReadout, SessionStats};
use crate::store::{KeyValueStore, SessionStore};
use crate::{GpsPoint, OptionExt, Result, TrekError, TrekSubject};

/// Builds the fallback position source from a seed point and altitude.
pub type FallbackSourceFactory =
    Box<dyn Fn(GpsPoint, f64) -> Arc<dyn LocationProvider> + Send + Sync>;

// ============================================================================
// Public Result Types
// ============================================================================

/// What `start_session` ended up doing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub session_id: String,
    /// Positions come from the simulated source
    pub is_mock_tracking: bool,
    /// The position error that triggered simulated tracking
    pub fallback_reason: Option<String>,
    pub delivery_mode: DeliveryMode,
}

/// Summary shown while the caller confirms a stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopPreview {
    pub session_id: String,
    pub subject_name: String,
    pub readout: LiveReadout,
}

/// Snapshot of the engine state for status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStatus {
    pub is_active: bool,
    pub is_mock_tracking: bool,
    /// `None` while idle
    pub delivery_mode: Option<DeliveryMode>,
    pub stop_pending: bool,
    pub session: Option<TrackingSession>,
}

// ============================================================================
// Tracking Engine
// ============================================================================

struct ActiveTracking {
    session: TrackingSession,
    source: Arc<dyn LocationProvider>,
    subscription: PositionSubscription,
    stop_pending: bool,
}

/// Session manager owning the single Active session.
pub struct TrackingEngine {
    provider: Arc<dyn LocationProvider>,
    fallback_source: FallbackSourceFactory,
    store: SessionStore,
    config: TrackingConfig,
    proximity_config: ProximityConfig,
    result_cache: ResultCache,
    active: Option<ActiveTracking>,
}

impl TrackingEngine {
    /// Create an engine over the given provider and store.
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        store: Arc<dyn KeyValueStore>,
        config: TrackingConfig,
    ) -> Result<Self> {
        config.validate()?;
        let proximity_config = ProximityConfig::default();

        Ok(Self {
            provider,
            fallback_source: default_fallback_source(None),
            store: SessionStore::new(
                store,
                &config.active_key,
                &config.history_key,
                config.history_limit,
            ),
            result_cache: ResultCache::new(
                proximity_config.cache_ttl(),
                proximity_config.cache_capacity,
            ),
            proximity_config,
            config,
            active: None,
        })
    }

    pub fn with_proximity_config(mut self, proximity_config: ProximityConfig) -> Result<Self> {
        proximity_config.validate()?;
        self.result_cache = ResultCache::new(
            proximity_config.cache_ttl(),
            proximity_config.cache_capacity,
        );
        self.proximity_config = proximity_config;
        Ok(self)
    }

    /// Replace the source used when real positioning fails.
    pub fn with_fallback_source(mut self, factory: FallbackSourceFactory) -> Self {
        self.fallback_source = factory;
        self
    }

    /// Let simulated tracking keep running in the background through `scheduler`.
    pub fn with_background_scheduler(mut self, scheduler: Arc<dyn BackgroundScheduler>) -> Self {
        self.fallback_source = default_fallback_source(Some(scheduler));
        self
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Begin recording a trek.
    ///
    /// Fails with `SessionAlreadyActive` while another session is recording.
    /// Position failures degrade to simulated tracking unless
    /// `allow_simulated_fallback` is off.
    pub fn start_session(&mut self, subject: &TrekSubject) -> Result<StartOutcome> {
        if let Some(active) = &self.active {
            return Err(TrekError::SessionAlreadyActive {
                session_id: active.session.id.clone(),
            });
        }

        let (first, source, fallback_reason) = match self.initial_fix() {
            Ok(fix) => (fix, Arc::clone(&self.provider), None),
            Err(e) if e.is_position_failure() && self.config.allow_simulated_fallback => {
                let origin = subject
                    .coordinates
                    .filter(GpsPoint::is_valid)
                    .unwrap_or(self.config.fallback_location);
                let altitude = subject.elevation.unwrap_or(0.0);
                warn!(
                    "[TrekTracker] {} - using SIMULATED tracking from ({:.4}, {:.4})",
                    e, origin.latitude, origin.longitude
                );

                let source = (self.fallback_source)(origin, altitude);
                let fix = source.current_position(AccuracyHint::High, self.config.position_timeout())?;
                (fix, source, Some(e.to_string()))
            }
            Err(e) => return Err(e),
        };

        let is_mock_tracking = fallback_reason.is_some();
        let subscription = source.subscribe(&self.subscribe_options())?;
        let delivery_mode = subscription.mode();
        if delivery_mode == DeliveryMode::ForegroundOnly {
            warn!("[TrekTracker] No background scheduler, positions update in foreground only");
        }

        let session = TrackingSession::begin(subject, &first, is_mock_tracking, Utc::now());
        persist_snapshot(&self.store, &session);
        if let Err(e) = self.store.clear_pending() {
            warn!("[TrekTracker] Could not clear pending journal: {}", e);
        }
        self.journal_deliveries(&subscription);

        info!(
            "[TrekTracker] Session {} started for '{}' (mock: {}, {:?})",
            session.id, session.subject_name, is_mock_tracking, delivery_mode
        );

        let outcome = StartOutcome {
            session_id: session.id.clone(),
            is_mock_tracking,
            fallback_reason,
            delivery_mode,
        };
        self.active = Some(ActiveTracking {
            session,
            source,
            subscription,
            stop_pending: false,
        });
        Ok(outcome)
    }

    fn initial_fix(&self) -> Result<LocationSnapshot> {
        if !self.provider.request_permission() {
            return Err(TrekError::PermissionDenied);
        }

        let timeout = self.config.position_timeout();
        let fix = match self.provider.current_position(AccuracyHint::High, timeout) {
            Err(TrekError::Timeout { timeout_ms }) => {
                info!(
                    "[TrekTracker] High-accuracy fix timed out after {}ms, retrying balanced",
                    timeout_ms
                );
                self.provider.current_position(AccuracyHint::Balanced, timeout)?
            }
            other => other?,
        };

        if !fix.point().is_valid() {
            return Err(TrekError::LocationUnavailable {
                message: format!("provider returned ({}, {})", fix.latitude, fix.longitude),
            });
        }
        Ok(fix)
    }

    /// Persist every delivered fix as it arrives, ahead of the next drain.
    fn journal_deliveries(&self, subscription: &PositionSubscription) {
        let journal = self.store.clone();
        subscription.on_delivery(move |fix| {
            if let Err(e) = journal.journal_position(fix) {
                error!("[TrekTracker] Could not journal delivered position: {}", e);
            }
        });
    }

    fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions {
            interval: self.config.update_interval(),
            min_distance_m: self.config.min_distance_m,
            background_task_id: Some(self.config.background_task_id.clone()),
        }
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Append one position to the active session.
    ///
    /// Returns `None` when the fix was older than the last waypoint and dropped.
    pub fn add_waypoint(&mut self, position: &LocationSnapshot) -> Result<Option<Waypoint>> {
        let active = self.active.as_mut().ok_or_no_active_session()?;
        let appended = active.session.append_waypoint(position)?.cloned();
        if let Some(waypoint) = &appended {
            debug!(
                "[TrekTracker] Waypoint {} at ({:.5}, {:.5})",
                waypoint.id, waypoint.latitude, waypoint.longitude
            );
            persist_snapshot(&self.store, &active.session);
        }
        Ok(appended)
    }

    /// Drain delivered positions into the active session.
    ///
    /// Returns the number of waypoints appended. Invalid and out-of-order
    /// fixes are skipped.
    pub fn poll_positions(&mut self) -> Result<usize> {
        let active = self.active.as_mut().ok_or_no_active_session()?;
        let drained = active.subscription.drain();
        let appended = append_all(&mut active.session, drained.clone());
        if appended > 0 {
            persist_snapshot(&self.store, &active.session);
        }
        if let Err(e) = self.store.discard_pending(&drained) {
            warn!("[TrekTracker] Could not trim pending journal: {}", e);
        }
        Ok(appended)
    }

    /// Record a rest stop at the current position.
    pub fn add_rest_stop(&mut self, notes: &str) -> Result<RestStop> {
        let position = self.capture_position()?;
        let active = self.active.as_mut().ok_or_no_active_session()?;
        let stop = active.session.add_rest_stop(&position, notes, Utc::now())?;
        info!("[TrekTracker] Rest stop {} recorded", stop.id);
        persist_snapshot(&self.store, &active.session);
        Ok(stop)
    }

    /// Mark a rest stop as over, recording its duration.
    pub fn end_rest_stop(&mut self, id: u64) -> Result<RestStop> {
        let active = self.active.as_mut().ok_or_no_active_session()?;
        let stop = active.session.end_rest_stop(id, Utc::now())?;
        persist_snapshot(&self.store, &active.session);
        Ok(stop)
    }

    /// Record a named checkpoint at the current position.
    pub fn add_checkpoint(&mut self, name: &str, kind: CheckpointKind) -> Result<Checkpoint> {
        let position = self.capture_position()?;
        let active = self.active.as_mut().ok_or_no_active_session()?;
        let checkpoint = active.session.add_checkpoint(&position, name, kind, Utc::now())?;
        info!("[TrekTracker] Checkpoint '{}' ({}) recorded", checkpoint.name, kind);
        persist_snapshot(&self.store, &active.session);
        Ok(checkpoint)
    }

    /// Position for rest stops and checkpoints.
    ///
    /// Simulated sessions reuse their last waypoint. Real sessions take a
    /// fresh fix, falling back to the last waypoint if that fails.
    fn capture_position(&self) -> Result<LocationSnapshot> {
        let active = self.active.as_ref().ok_or_no_active_session()?;
        let last_known = active.session.last_known_position();

        if active.session.is_mock_tracking {
            return last_known.ok_or_unavailable("no recorded position");
        }

        match active
            .source
            .current_position(AccuracyHint::High, self.config.position_timeout())
        {
            Ok(fix) if fix.point().is_valid() => Ok(fix),
            Ok(fix) => {
                warn!(
                    "[TrekTracker] Ignoring invalid fix ({}, {}), using last waypoint",
                    fix.latitude, fix.longitude
                );
                last_known.ok_or_unavailable("no recorded position")
            }
            Err(e) => {
                warn!("[TrekTracker] Fresh fix failed ({}), using last waypoint", e);
                last_known.ok_or_unavailable("no recorded position")
            }
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Recompute the active session's statistics from its waypoints.
    pub fn recompute_statistics(&mut self) -> Result<SessionStats> {
        let active = self.active.as_mut().ok_or_no_active_session()?;
        Ok(active.session.recompute_statistics(Utc::now()).clone())
    }

    /// Fresh display readout for the active session.
    pub fn live_readout(&mut self) -> Result<LiveReadout> {
        let now = Utc::now();
        let active = self.active.as_mut().ok_or_no_active_session()?;
        active.session.recompute_statistics(now);
        Ok(LiveReadout::for_session(&active.session, now))
    }

    /// Whether the latest position is more than 100 m from every point of `route`.
    pub fn is_off_route(&self, route: &[GpsPoint]) -> Result<bool> {
        let active = self.active.as_ref().ok_or_no_active_session()?;
        let position = active
            .session
            .last_waypoint()
            .map(Waypoint::point)
            .ok_or_unavailable("no recorded position")?;
        Ok(geo_utils::is_off_route(
            &position,
            route,
            DEFAULT_DEVIATION_THRESHOLD_METERS,
        ))
    }

    // ========================================================================
    // Stop
    // ========================================================================

    /// First phase of a stop: mark it pending and return a summary to confirm.
    pub fn request_stop(&mut self) -> Result<StopPreview> {
        let now = Utc::now();
        let active = self.active.as_mut().ok_or_no_active_session()?;
        active.session.recompute_statistics(now);
        active.stop_pending = true;
        Ok(StopPreview {
            session_id: active.session.id.clone(),
            subject_name: active.session.subject_name.clone(),
            readout: LiveReadout::for_session(&active.session, now),
        })
    }

    /// Second phase of a stop. Fails with `NoStopPending` without a prior `request_stop`.
    pub fn confirm_stop(&mut self) -> Result<TrackingSession> {
        let active = self.active.as_ref().ok_or_no_active_session()?;
        if !active.stop_pending {
            return Err(TrekError::NoStopPending);
        }
        self.stop_session()
    }

    /// Withdraw a pending stop; tracking continues.
    pub fn cancel_stop(&mut self) -> Result<()> {
        let active = self.active.as_mut().ok_or_no_active_session()?;
        if !active.stop_pending {
            return Err(TrekError::NoStopPending);
        }
        active.stop_pending = false;
        Ok(())
    }

    /// Finish the active session and archive it.
    ///
    /// The position stream is cancelled first, whatever happens after. The
    /// completed session is returned even if archiving it fails.
    pub fn stop_session(&mut self) -> Result<TrackingSession> {
        let Some(ActiveTracking {
            mut session,
            mut subscription,
            ..
        }) = self.active.take()
        else {
            return Err(TrekError::NoActiveSession);
        };

        subscription.cancel();
        append_all(&mut session, subscription.drain());
        drop(subscription);

        session.complete(Utc::now())?;

        if let Err(e) = self.store.append_history(&session) {
            error!("[TrekTracker] Failed to archive session {}: {}", session.id, e);
        }
        persist_snapshot(&self.store, &session);
        if let Err(e) = self.store.clear_pending() {
            warn!("[TrekTracker] Could not clear pending journal: {}", e);
        }

        info!(
            "[TrekTracker] Session {} completed: {:.0}m, +{:.0}m/-{:.0}m, {} waypoints",
            session.id,
            session.stats.total_distance_meters,
            session.stats.elevation_gain,
            session.stats.elevation_loss,
            session.waypoints.len()
        );
        Ok(session)
    }

    // ========================================================================
    // Status & History
    // ========================================================================

    pub fn status(&self) -> TrackingStatus {
        match &self.active {
            Some(active) => TrackingStatus {
                is_active: true,
                is_mock_tracking: active.session.is_mock_tracking,
                delivery_mode: Some(active.subscription.mode()),
                stop_pending: active.stop_pending,
                session: Some(active.session.clone()),
            },
            None => TrackingStatus {
                is_active: false,
                is_mock_tracking: false,
                delivery_mode: None,
                stop_pending: false,
                session: None,
            },
        }
    }

    /// Completed sessions, newest first.
    pub fn completed_sessions(&self) -> Result<Vec<TrackingSession>> {
        self.store.history()
    }

    /// Resume an Active session persisted before the process went away.
    ///
    /// Returns the restored session id, or `None` when the store holds no
    /// Active snapshot.
    pub fn restore(&mut self) -> Result<Option<String>> {
        if let Some(active) = &self.active {
            return Err(TrekError::SessionAlreadyActive {
                session_id: active.session.id.clone(),
            });
        }

        let mut session = match self.store.load_active() {
            Ok(Some(session)) if session.is_active() => session,
            Ok(_) => return Ok(None),
            Err(e @ TrekError::Serialization { .. }) => {
                error!("[TrekTracker] Discarding unreadable session snapshot: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        self.recover_pending(&mut session);

        let source = if session.is_mock_tracking {
            let (origin, altitude) = session
                .last_waypoint()
                .map(|w| (w.point(), w.altitude))
                .unwrap_or((self.config.fallback_location, 0.0));
            (self.fallback_source)(origin, altitude)
        } else {
            Arc::clone(&self.provider)
        };
        let subscription = source.subscribe(&self.subscribe_options())?;
        self.journal_deliveries(&subscription);

        info!(
            "[TrekTracker] Restored session {} ({} waypoints, mock: {})",
            session.id,
            session.waypoints.len(),
            session.is_mock_tracking
        );

        let id = session.id.clone();
        self.active = Some(ActiveTracking {
            session,
            source,
            subscription,
            stop_pending: false,
        });
        Ok(Some(id))
    }

    /// Fold journaled fixes into a restored session. The journal is kept
    /// if the merged snapshot cannot be written.
    fn recover_pending(&self, session: &mut TrackingSession) {
        let mut pending = match self.store.pending_positions() {
            Ok(pending) => pending,
            Err(e) => {
                warn!("[TrekTracker] Could not read pending journal: {}", e);
                return;
            }
        };
        pending.sort_by_key(|fix| fix.timestamp);

        let recovered = append_all(session, pending);
        if recovered > 0 {
            if let Err(e) = self.store.save_active(session) {
                error!(
                    "[TrekTracker] Snapshot write failed for {}, keeping journal: {}",
                    session.id, e
                );
                return;
            }
            info!(
                "[TrekTracker] Recovered {} journaled positions for {}",
                recovered, session.id
            );
        }
        if let Err(e) = self.store.clear_pending() {
            warn!("[TrekTracker] Could not clear pending journal: {}", e);
        }
    }

    // ========================================================================
    // Nearby Search
    // ========================================================================

    /// Cached nearby search.
    pub fn find_nearby(
        &mut self,
        origin: Option<&LocationSnapshot>,
        candidates: &[Candidate],
        max_distance_km: f64,
        limit: usize,
    ) -> CachedResults {
        self.result_cache
            .get(origin, candidates, max_distance_km, limit)
    }

    /// Cached nearby search with the configured radius and limit.
    pub fn nearby_treks(
        &mut self,
        origin: Option<&LocationSnapshot>,
        candidates: &[Candidate],
    ) -> CachedResults {
        let (max_distance_km, limit) = (
            self.proximity_config.max_distance_km,
            self.proximity_config.limit,
        );
        self.find_nearby(origin, candidates, max_distance_km, limit)
    }

    /// Origin for nearby search: a balanced-accuracy fix, or the configured
    /// fallback location marked `is_real == false`.
    pub fn current_origin(&self) -> LocationSnapshot {
        let fallback = self.config.fallback_location;
        if !self.provider.request_permission() {
            return LocationSnapshot::fallback(fallback.latitude, fallback.longitude);
        }
        match self
            .provider
            .current_position(AccuracyHint::Balanced, self.config.position_timeout())
        {
            Ok(fix) if fix.point().is_valid() => fix,
            Ok(_) | Err(_) => {
                debug!("[TrekTracker] Using fallback origin for nearby search");
                LocationSnapshot::fallback(fallback.latitude, fallback.longitude)
            }
        }
    }

    /// Forget cached nearby results.
    pub fn invalidate_nearby(&mut self) {
        self.result_cache.invalidate();
    }
}

fn default_fallback_source(scheduler: Option<Arc<dyn BackgroundScheduler>>) -> FallbackSourceFactory {
    Box::new(move |origin, altitude| {
        let source = SimulatedPositionSource::new(origin, altitude, rand::random());
        match &scheduler {
            Some(scheduler) => Arc::new(source.with_scheduler(Arc::clone(scheduler))),
            None => Arc::new(source),
        }
    })
}

fn append_all(session: &mut TrackingSession, fixes: Vec<LocationSnapshot>) -> usize {
    let mut appended = 0;
    for fix in fixes {
        match session.append_waypoint(&fix) {
            Ok(Some(_)) => appended += 1,
            Ok(None) => {}
            Err(e) => warn!("[TrekTracker] Skipping position: {}", e),
        }
    }
    appended
}

fn persist_snapshot(store: &SessionStore, session: &TrackingSession) {
    if let Err(e) = store.save_active(session) {
        error!(
            "[TrekTracker] Snapshot write failed for {}, continuing in memory: {}",
            session.id, e
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
