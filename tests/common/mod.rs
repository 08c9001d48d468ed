//! Shared fixtures for integration tests: scripted location provider and stores.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trek_tracker::{
    AccuracyHint, DeliveryMode, KeyValueStore, LocationProvider, LocationSnapshot,
    PositionSender, PositionSubscription, Result, SubscribeOptions, TrekError, TrekSubject,
};

pub const PUNE: (f64, f64) = (18.5204, 73.8567);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn sinhagad() -> TrekSubject {
    TrekSubject::new("sinhagad", "Sinhagad Fort")
        .with_coordinates(trek_tracker::GpsPoint::new(18.3663, 73.7559), Some(1312.0))
}

/// Location provider that answers from a script and exposes its position channel.
pub struct ScriptedProvider {
    permission: bool,
    mode: DeliveryMode,
    script: Mutex<VecDeque<Result<LocationSnapshot>>>,
    fallback_answer: Result<LocationSnapshot>,
    requests: Mutex<Vec<AccuracyHint>>,
    sender: Mutex<Option<PositionSender>>,
    subscribe_error: Option<TrekError>,
}

impl ScriptedProvider {
    /// Always answers with `fix`.
    pub fn answering(fix: LocationSnapshot) -> Self {
        Self {
            permission: true,
            mode: DeliveryMode::Background,
            script: Mutex::new(VecDeque::new()),
            fallback_answer: Ok(fix),
            requests: Mutex::new(Vec::new()),
            sender: Mutex::new(None),
            subscribe_error: None,
        }
    }

    /// Always fails with `err`.
    pub fn failing(err: TrekError) -> Self {
        Self {
            fallback_answer: Err(err),
            ..Self::answering(LocationSnapshot::real(PUNE.0, PUNE.1))
        }
    }

    /// Refuses permission.
    pub fn denied() -> Self {
        Self {
            permission: false,
            ..Self::failing(TrekError::PermissionDenied)
        }
    }

    pub fn foreground_only(mut self) -> Self {
        self.mode = DeliveryMode::ForegroundOnly;
        self
    }

    pub fn with_subscribe_error(mut self, err: TrekError) -> Self {
        self.subscribe_error = Some(err);
        self
    }

    /// Answers returned, in order, before falling back to the default answer.
    pub fn then(self, answer: Result<LocationSnapshot>) -> Self {
        self.script.lock().unwrap().push_back(answer);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn requests(&self) -> Vec<AccuracyHint> {
        self.requests.lock().unwrap().clone()
    }

    /// Deliver a fix through the current subscription.
    pub fn push(&self, fix: LocationSnapshot) -> bool {
        self.sender
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|s| s.send(fix))
    }

    pub fn subscription_cancelled(&self) -> Option<bool> {
        self.sender.lock().unwrap().as_ref().map(|s| s.is_cancelled())
    }
}

impl LocationProvider for ScriptedProvider {
    fn request_permission(&self) -> bool {
        self.permission
    }

    fn current_position(&self, accuracy: AccuracyHint, _timeout: Duration) -> Result<LocationSnapshot> {
        self.requests.lock().unwrap().push(accuracy);
        match self.script.lock().unwrap().pop_front() {
            Some(answer) => answer,
            None => self.fallback_answer.clone(),
        }
    }

    fn subscribe(&self, _options: &SubscribeOptions) -> Result<PositionSubscription> {
        if let Some(err) = &self.subscribe_error {
            return Err(err.clone());
        }
        let (sender, subscription) = PositionSubscription::channel(self.mode);
        *self.sender.lock().unwrap() = Some(sender);
        Ok(subscription)
    }
}

/// Store whose writes always fail.
#[derive(Default)]
pub struct FailingStore;

impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn set(&self, key: &str, _value: &[u8]) -> Result<()> {
        Err(TrekError::PersistenceFailure {
            message: format!("disk full writing {}", key),
        })
    }
}
