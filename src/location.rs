//! # Location Provider Contract
//!
//! The engine never talks to positioning hardware directly. Everything goes
//! through [`LocationProvider`]: a one-shot `current_position` fetch and a
//! `subscribe` call that hands back a [`PositionSubscription`].
//!
//! Real providers push updates from a platform callback, the simulated source
//! pushes them from a timer thread. Both feed the same channel type, so the
//! tracking engine drains positions the same way regardless of which one is
//! in effect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{GpsPoint, Result};

// ============================================================================
// Snapshots
// ============================================================================

/// A single position fix.
///
/// `is_real == false` marks a fallback or simulated point. Snapshots are
/// never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSnapshot {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    /// Horizontal accuracy in meters
    pub accuracy: Option<f64>,
    /// Instantaneous speed in m/s
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub is_real: bool,
}

impl LocationSnapshot {
    /// A real fix taken now, with no altitude/accuracy/speed.
    pub fn real(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy: None,
            speed: None,
            timestamp: Utc::now(),
            is_real: true,
        }
    }

    /// A fallback point taken now.
    pub fn fallback(latitude: f64, longitude: f64) -> Self {
        Self {
            is_real: false,
            ..Self::real(latitude, longitude)
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }

    /// Classify the fix for display.
    pub fn accuracy_class(&self) -> AccuracyClass {
        AccuracyClass::of(self)
    }
}

/// Display-oriented quality bucket for a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyClass {
    /// Not a real fix
    Fallback,
    /// Real fix without an accuracy estimate
    Unknown,
    /// ≤ 10 m
    Excellent,
    /// ≤ 50 m
    Good,
    /// ≤ 100 m
    Fair,
    /// > 100 m
    Poor,
}

impl AccuracyClass {
    pub fn of(snapshot: &LocationSnapshot) -> Self {
        if !snapshot.is_real {
            return AccuracyClass::Fallback;
        }
        match snapshot.accuracy {
            None => AccuracyClass::Unknown,
            Some(a) if a <= 10.0 => AccuracyClass::Excellent,
            Some(a) if a <= 50.0 => AccuracyClass::Good,
            Some(a) if a <= 100.0 => AccuracyClass::Fair,
            Some(_) => AccuracyClass::Poor,
        }
    }
}

// ============================================================================
// Provider Contract
// ============================================================================

/// Accuracy requested for a one-shot fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccuracyHint {
    High,
    /// Relaxed accuracy, used for the retry after a timeout
    Balanced,
}

/// Parameters for a position subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeOptions {
    pub interval: Duration,
    /// Updates closer than this to the previous one may be suppressed
    pub min_distance_m: f64,
    /// Identifier to register with a background scheduler, if one exists
    pub background_task_id: Option<String>,
}

/// How positions reach the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryMode {
    /// Updates continue while the app is not frontmost
    Background,
    /// No background scheduler: updates only while the app is in the foreground
    ForegroundOnly,
}

/// Source of position fixes.
///
/// `current_position` is the only call expected to block. It must honor the
/// timeout and fail with [`TrekError::PermissionDenied`](crate::TrekError::PermissionDenied),
/// [`TrekError::LocationUnavailable`](crate::TrekError::LocationUnavailable) or
/// [`TrekError::Timeout`](crate::TrekError::Timeout).
pub trait LocationProvider: Send + Sync {
    /// Ask for location access. Returns whether it was granted.
    fn request_permission(&self) -> bool;

    /// Fetch a single fix.
    fn current_position(&self, accuracy: AccuracyHint, timeout: Duration)
        -> Result<LocationSnapshot>;

    /// Start delivering fixes until the returned subscription is cancelled or dropped.
    fn subscribe(&self, options: &SubscribeOptions) -> Result<PositionSubscription>;
}

/// Host capability that keeps a recurring task alive while the app is backgrounded.
///
/// Consumed only by provider implementations inside `subscribe`; the engine
/// sees the outcome as a [`DeliveryMode`].
pub trait BackgroundScheduler: Send + Sync {
    /// Register a recurring task. Returns false if the host refused.
    fn register(&self, task_id: &str) -> bool;

    fn unregister(&self, task_id: &str);
}

// ============================================================================
// Position Stream
// ============================================================================

type CancelHook = Box<dyn FnOnce() + Send>;
type DeliveryHook = Arc<dyn Fn(&LocationSnapshot) + Send + Sync>;

/// Producer half of a position stream.
#[derive(Clone)]
pub struct PositionSender {
    sender: mpsc::Sender<LocationSnapshot>,
    cancelled: Arc<AtomicBool>,
    on_delivery: Arc<Mutex<Option<DeliveryHook>>>,
}

impl PositionSender {
    /// Deliver a fix. Returns false once the subscriber has cancelled or gone away.
    ///
    /// The subscriber's delivery hook runs on the calling thread before the
    /// fix is queued.
    pub fn send(&self, snapshot: LocationSnapshot) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let hook = self
            .on_delivery
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(Arc::clone));
        if let Some(hook) = hook {
            hook(&snapshot);
        }
        self.sender.send(snapshot).is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Consumer half of a position stream.
///
/// Cancelling (or dropping) the subscription runs the provider's cancel hook
/// exactly once, which is where providers stop timers and unregister
/// background tasks.
pub struct PositionSubscription {
    receiver: mpsc::Receiver<LocationSnapshot>,
    cancelled: Arc<AtomicBool>,
    mode: DeliveryMode,
    on_cancel: Option<CancelHook>,
    on_delivery: Arc<Mutex<Option<DeliveryHook>>>,
}

impl PositionSubscription {
    /// Create a connected sender/subscription pair.
    pub fn channel(mode: DeliveryMode) -> (PositionSender, PositionSubscription) {
        let (sender, receiver) = mpsc::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let on_delivery = Arc::new(Mutex::new(None));
        (
            PositionSender {
                sender,
                cancelled: Arc::clone(&cancelled),
                on_delivery: Arc::clone(&on_delivery),
            },
            PositionSubscription {
                receiver,
                cancelled,
                mode,
                on_cancel: None,
                on_delivery,
            },
        )
    }

    /// Run `hook` for every fix as it is sent, before it reaches the queue.
    pub fn on_delivery(&self, hook: impl Fn(&LocationSnapshot) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.on_delivery.lock() {
            *slot = Some(Arc::new(hook));
        }
    }

    /// Attach cleanup to run when the subscription is cancelled.
    pub fn with_cancel_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(hook));
        self
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Take every fix delivered so far without blocking.
    pub fn drain(&self) -> Vec<LocationSnapshot> {
        self.receiver.try_iter().collect()
    }

    /// Wait up to `timeout` for the next fix.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<LocationSnapshot> {
        self.receiver.recv_timeout(timeout).ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Stop delivery. Idempotent.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(hook) = self.on_cancel.take() {
            hook();
        }
    }
}

impl Drop for PositionSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for PositionSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionSubscription")
            .field("mode", &self.mode)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_accuracy_classification() {
        let fix = LocationSnapshot::real(18.52, 73.85);
        assert_eq!(fix.accuracy_class(), AccuracyClass::Unknown);
        assert_eq!(fix.clone().with_accuracy(8.0).accuracy_class(), AccuracyClass::Excellent);
        assert_eq!(fix.clone().with_accuracy(50.0).accuracy_class(), AccuracyClass::Good);
        assert_eq!(fix.clone().with_accuracy(75.0).accuracy_class(), AccuracyClass::Fair);
        assert_eq!(fix.with_accuracy(250.0).accuracy_class(), AccuracyClass::Poor);

        let fallback = LocationSnapshot::fallback(18.52, 73.85).with_accuracy(5.0);
        assert_eq!(fallback.accuracy_class(), AccuracyClass::Fallback);
    }

    #[test]
    fn test_subscription_drain() {
        let (sender, subscription) = PositionSubscription::channel(DeliveryMode::ForegroundOnly);
        assert!(sender.send(LocationSnapshot::real(1.0, 1.0)));
        assert!(sender.send(LocationSnapshot::real(2.0, 2.0)));

        let fixes = subscription.drain();
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[1].latitude, 2.0);
        assert!(subscription.drain().is_empty());
    }

    #[test]
    fn test_cancel_runs_hook_once_and_stops_sender() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hook_calls = Arc::clone(&calls);

        let (sender, mut subscription) = PositionSubscription::channel(DeliveryMode::Background);
        subscription = subscription.with_cancel_hook(move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        });

        subscription.cancel();
        subscription.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!sender.send(LocationSnapshot::real(1.0, 1.0)));

        drop(subscription);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivery_hook_sees_fix_before_it_is_queued() {
        let (sender, subscription) = PositionSubscription::channel(DeliveryMode::Background);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = Arc::clone(&seen);
        subscription.on_delivery(move |fix| hook_seen.lock().unwrap().push(fix.latitude));

        assert!(sender.send(LocationSnapshot::real(3.0, 3.0)));
        assert_eq!(*seen.lock().unwrap(), vec![3.0]);
        assert_eq!(subscription.drain().len(), 1);

        drop(subscription);
        assert!(!sender.send(LocationSnapshot::real(4.0, 4.0)));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_cancels() {
        let (sender, subscription) = PositionSubscription::channel(DeliveryMode::ForegroundOnly);
        drop(subscription);
        assert!(sender.is_cancelled());
    }
}
