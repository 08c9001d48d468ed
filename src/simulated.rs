//! Simulated position source.
//!
//! Stands in for the real location provider when positioning is denied or
//! unavailable. It walks a winding path away from a seed point and delivers
//! fixes from a timer thread through the same [`PositionSubscription`] channel
//! a real provider uses. Every fix it produces has `is_real == false`.

use std::f64::consts::PI;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::location::{
    AccuracyHint, BackgroundScheduler, DeliveryMode, LocationProvider, LocationSnapshot,
    PositionSubscription, SubscribeOptions,
};
use crate::{GpsPoint, Result, TrekError};

/// Meters per degree of latitude (approximately constant).
const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Default distance walked per simulated update (meters).
const DEFAULT_STEP_METERS: f64 = 12.0;

/// Reported horizontal accuracy of simulated fixes (meters).
const SIMULATED_ACCURACY: f64 = 15.0;

fn meters_to_deg_lat(meters: f64) -> f64 {
    meters / METERS_PER_DEG_LAT
}

fn meters_to_deg_lng(meters: f64, latitude: f64) -> f64 {
    let meters_per_deg_lng = METERS_PER_DEG_LAT * latitude.to_radians().cos();
    if meters_per_deg_lng.abs() < 1e-10 {
        return 0.0;
    }
    meters / meters_per_deg_lng
}

struct WalkState {
    position: GpsPoint,
    altitude: f64,
    heading: f64,
    step: u64,
    rng: StdRng,
}

/// Timer-driven fallback implementing [`LocationProvider`].
pub struct SimulatedPositionSource {
    state: Arc<Mutex<WalkState>>,
    base_altitude: f64,
    step_meters: f64,
    scheduler: Option<Arc<dyn BackgroundScheduler>>,
}

impl SimulatedPositionSource {
    /// Create a source seeded at `origin`. The same `seed` reproduces the same walk.
    pub fn new(origin: GpsPoint, base_altitude: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let heading = rng.gen_range(0.0..(2.0 * PI));
        Self {
            state: Arc::new(Mutex::new(WalkState {
                position: origin,
                altitude: base_altitude,
                heading,
                step: 0,
                rng,
            })),
            base_altitude,
            step_meters: DEFAULT_STEP_METERS,
            scheduler: None,
        }
    }

    /// Distance covered per update.
    pub fn with_step_meters(mut self, meters: f64) -> Self {
        self.step_meters = meters.max(0.5);
        self
    }

    /// Background scheduler to register subscriptions with.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn BackgroundScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Current simulated position without advancing the walk.
    pub fn peek(&self) -> Result<LocationSnapshot> {
        let state = lock_state(&self.state)?;
        Ok(snapshot_of(&state, 0.0))
    }

    /// Advance the walk by `step_meters` and return the new fix.
    ///
    /// `elapsed` is the simulated time since the previous fix, used to derive speed.
    pub fn advance(&self, step_meters: f64, elapsed: Duration) -> Result<LocationSnapshot> {
        let mut state = lock_state(&self.state)?;
        Ok(step_walk(&mut state, self.base_altitude, step_meters, elapsed))
    }
}

fn lock_state(state: &Mutex<WalkState>) -> Result<std::sync::MutexGuard<'_, WalkState>> {
    state.lock().map_err(|_| TrekError::LocationUnavailable {
        message: "simulated walk state poisoned".to_string(),
    })
}

fn snapshot_of(state: &WalkState, speed: f64) -> LocationSnapshot {
    LocationSnapshot {
        latitude: state.position.latitude,
        longitude: state.position.longitude,
        altitude: Some(state.altitude),
        accuracy: Some(SIMULATED_ACCURACY),
        speed: Some(speed),
        timestamp: Utc::now(),
        is_real: false,
    }
}

fn step_walk(
    state: &mut WalkState,
    base_altitude: f64,
    step_meters: f64,
    elapsed: Duration,
) -> LocationSnapshot {
    // Gentle winding: sinusoidal base turn plus a little noise
    let base_turn = (state.step as f64 * 0.05).sin() * 0.2;
    let random_turn: f64 = state.rng.gen_range(-0.15..0.15);
    state.heading += base_turn + random_turn;

    let dlat = meters_to_deg_lat(step_meters * state.heading.sin());
    let dlng = meters_to_deg_lng(step_meters * state.heading.cos(), state.position.latitude);
    state.position = GpsPoint::new(state.position.latitude + dlat, state.position.longitude + dlng);

    state.step += 1;
    // Slow climb with rolling undulation, like a trail up a ridge
    state.altitude =
        base_altitude + state.step as f64 * 0.4 + 8.0 * (state.step as f64 * 0.1).sin();

    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 { step_meters / secs } else { 0.0 };
    snapshot_of(state, speed)
}

impl LocationProvider for SimulatedPositionSource {
    fn request_permission(&self) -> bool {
        true
    }

    fn current_position(
        &self,
        _accuracy: AccuracyHint,
        _timeout: Duration,
    ) -> Result<LocationSnapshot> {
        self.peek()
    }

    fn subscribe(&self, options: &SubscribeOptions) -> Result<PositionSubscription> {
        let background_task = match (&self.scheduler, &options.background_task_id) {
            (Some(scheduler), Some(task_id)) if scheduler.register(task_id) => {
                Some((Arc::clone(scheduler), task_id.clone()))
            }
            _ => None,
        };
        let mode = if background_task.is_some() {
            DeliveryMode::Background
        } else {
            DeliveryMode::ForegroundOnly
        };

        let (sender, subscription) = PositionSubscription::channel(mode);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let state = Arc::clone(&self.state);
        let base_altitude = self.base_altitude;
        let step_meters = self.step_meters.max(options.min_distance_m);
        let interval = options.interval;

        let handle = thread::Builder::new()
            .name("trek-simulator".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    // Stop signal or the subscription side is gone
                    _ => break,
                }
                let fix = match state.lock() {
                    Ok(mut walk) => step_walk(&mut walk, base_altitude, step_meters, interval),
                    Err(_) => break,
                };
                debug!(
                    "[Simulator] Tick: ({:.5}, {:.5})",
                    fix.latitude, fix.longitude
                );
                if !sender.send(fix) {
                    break;
                }
            })
            .map_err(|e| TrekError::LocationUnavailable {
                message: format!("failed to start simulator timer: {}", e),
            })?;

        info!(
            "[Simulator] Subscribed: every {:?}, {:.0}m steps, {:?}",
            interval, step_meters, mode
        );

        Ok(subscription.with_cancel_hook(move || {
            drop(stop_tx);
            if handle.join().is_err() {
                warn!("[Simulator] Timer thread panicked");
            }
            if let Some((scheduler, task_id)) = background_task {
                scheduler.unregister(&task_id);
            }
            info!("[Simulator] Unsubscribed");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::haversine_distance;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn pune() -> GpsPoint {
        GpsPoint::new(18.5204, 73.8567)
    }

    struct RecordingScheduler {
        registered: AtomicBool,
    }

    impl BackgroundScheduler for RecordingScheduler {
        fn register(&self, _task_id: &str) -> bool {
            self.registered.store(true, Ordering::SeqCst);
            true
        }

        fn unregister(&self, _task_id: &str) {
            self.registered.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_peek_is_seed_point_and_not_real() {
        let source = SimulatedPositionSource::new(pune(), 560.0, 7);
        let fix = source.peek().unwrap();
        assert_eq!(fix.point(), pune());
        assert_eq!(fix.altitude, Some(560.0));
        assert!(!fix.is_real);
    }

    #[test]
    fn test_advance_moves_by_step() {
        let source = SimulatedPositionSource::new(pune(), 560.0, 7);
        let fix = source.advance(12.0, Duration::from_secs(5)).unwrap();
        let moved = haversine_distance(&pune(), &fix.point());
        assert!((moved - 12.0).abs() < 0.5, "moved {}", moved);
        assert!((fix.speed.unwrap() - 2.4).abs() < 1e-9);
    }

    #[test]
    fn test_same_seed_same_walk() {
        let a = SimulatedPositionSource::new(pune(), 0.0, 42);
        let b = SimulatedPositionSource::new(pune(), 0.0, 42);
        for _ in 0..5 {
            let fa = a.advance(10.0, Duration::from_secs(1)).unwrap();
            let fb = b.advance(10.0, Duration::from_secs(1)).unwrap();
            assert_eq!(fa.point(), fb.point());
        }
    }

    #[test]
    fn test_subscription_delivers_and_stops() {
        let source = SimulatedPositionSource::new(pune(), 0.0, 1);
        let options = SubscribeOptions {
            interval: Duration::from_millis(5),
            min_distance_m: 10.0,
            background_task_id: None,
        };
        let mut subscription = source.subscribe(&options).unwrap();
        assert_eq!(subscription.mode(), DeliveryMode::ForegroundOnly);

        let fix = subscription.recv_timeout(Duration::from_secs(2));
        assert!(fix.is_some_and(|f| !f.is_real));

        subscription.cancel();
        // Timer thread has been joined: nothing new arrives
        let _ = subscription.drain();
        assert!(subscription.recv_timeout(Duration::from_millis(30)).is_none());
    }

    #[test]
    fn test_background_registration() {
        let scheduler = Arc::new(RecordingScheduler {
            registered: AtomicBool::new(false),
        });
        let source = SimulatedPositionSource::new(pune(), 0.0, 1)
            .with_scheduler(Arc::clone(&scheduler) as Arc<dyn BackgroundScheduler>);
        let options = SubscribeOptions {
            interval: Duration::from_millis(50),
            min_distance_m: 10.0,
            background_task_id: Some("background-location-task".to_string()),
        };

        let subscription = source.subscribe(&options).unwrap();
        assert_eq!(subscription.mode(), DeliveryMode::Background);
        assert!(scheduler.registered.load(Ordering::SeqCst));

        drop(subscription);
        assert!(!scheduler.registered.load(Ordering::SeqCst));
    }
}
