//! Module that turns the push-based location/permission provider into one
//! authoritative, observable state.
//!
//! Provider callbacks arrive as [`ProviderEvent`] values on an mpsc channel
//! and are applied by a single consumer thread, so observers never see a
//! half-updated state such as a new authorization with a stale accuracy.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::record::LocationSample;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
/// Permission grant state as reported by the provider.
///
/// The core never changes this on its own, it only mirrors what the
/// provider reports. Once the user has answered the permission prompt all
/// four decided states are terminal from the core's viewpoint.
pub enum AuthorizationState {
    /// The user has not answered the permission prompt yet.
    NotDetermined,
    /// Location access granted at all times.
    AuthorizedAlways,
    /// Location access granted while the application is in use.
    AuthorizedWhenInUse,
    /// Location access denied by the user.
    Denied,
    /// Location access blocked by a system policy.
    Restricted,
}

impl AuthorizationState {
    /// Returns true if the state permits location delivery.
    pub fn is_authorized(self) -> bool {
        match self {
            AuthorizationState::AuthorizedAlways | AuthorizationState::AuthorizedWhenInUse => true,
            _ => false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
/// Fix precision granularity granted by the platform, independent of the
/// permission grant itself.
pub enum AccuracyAuthorization {
    /// Precise fixes.
    Full,
    /// Coarse fixes only.
    Reduced,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
/// A single callback from the location provider, tagged for the wire.
pub enum ProviderEvent {
    /// The permission or accuracy grant changed.
    AuthorizationChanged {
        state: AuthorizationState,
        accuracy: AccuracyAuthorization,
    },
    /// A new fix was resolved.
    LocationUpdated { sample: LocationSample },
    /// The provider failed to deliver. Does not invalidate an earlier fix.
    ProviderError { message: String },
}

/// Seam to the platform location provider.
///
/// Implementations must tolerate repeated `start_updates` calls, the
/// authority calls it again on every authorization grant.
pub trait LocationProvider {
    /// Asks the user for location permission. The answer arrives later as
    /// an [`ProviderEvent::AuthorizationChanged`] event.
    fn request_permission(&mut self);
    /// Begins continuous fix delivery.
    fn start_updates(&mut self);
    /// Stops fix delivery and quiesces the subscription.
    fn stop_updates(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
/// Snapshot of everything the authority knows, handed to observers as one
/// value so all fields are consistent with each other.
pub struct LocationState {
    /// The newest delivered fix, last write wins.
    pub sample: Option<LocationSample>,
    /// Current permission grant.
    pub authorization: AuthorizationState,
    /// Current precision grant.
    pub accuracy: AccuracyAuthorization,
    /// Human readable text of the most recent provider failure.
    pub last_error: Option<String>,
}

impl LocationState {
    fn initial() -> LocationState {
        LocationState {
            sample: None,
            authorization: AuthorizationState::NotDetermined,
            accuracy: AccuracyAuthorization::Reduced,
            last_error: None,
        }
    }
}

type Subscriber = Box<dyn FnMut(&LocationState) + Send>;

/// Owns the permission state machine and the latest location sample.
///
/// All mutation happens through [`LocationAuthority::handle_event`], which
/// the consumer thread calls with events drained from the provider channel.
/// Subscribers are notified synchronously after every mutation and receive
/// the current state immediately when they subscribe.
pub struct LocationAuthority {
    state: Arc<Mutex<LocationState>>,
    provider: Box<dyn LocationProvider + Send>,
    subscribers: Vec<Subscriber>,
    delivering: bool,
    permission_requested: bool,
}

impl LocationAuthority {
    pub fn new(provider: Box<dyn LocationProvider + Send>) -> LocationAuthority {
        LocationAuthority {
            state: Arc::new(Mutex::new(LocationState::initial())),
            provider,
            subscribers: Vec::new(),
            delivering: false,
            permission_requested: false,
        }
    }

    /// Returns the shared state handle for readers outside the consumer
    /// thread. Every mutation is published through this single mutex.
    pub fn shared_state(&self) -> Arc<Mutex<LocationState>> {
        Arc::clone(&self.state)
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> LocationState {
        self.lock_state().clone()
    }

    /// Idempotent entry point. Requests permission if the user has not
    /// decided yet, otherwise begins continuous delivery right away. Does
    /// not block, the permission outcome arrives later as an event.
    pub fn start(&mut self) {
        let authorization = self.lock_state().authorization;
        if authorization == AuthorizationState::NotDetermined {
            if !self.permission_requested {
                log::info!(target: "lightlogd::loc", "Requesting location permission from the provider!");
                self.provider.request_permission();
                self.permission_requested = true;
            }
        } else {
            self.begin_delivery();
        }
    }

    /// Stops fix delivery. Without this an abandoned subscription would
    /// keep delivering indefinitely.
    pub fn stop(&mut self) {
        if self.delivering {
            self.provider.stop_updates();
            self.delivering = false;
            log::debug!(target: "lightlogd::loc", "Stopped location delivery!");
        }
    }

    /// Registers an observer. The observer immediately receives the current
    /// state and afterwards every mutation, synchronously.
    pub fn subscribe<F>(&mut self, subscriber: F)
    where
        F: FnMut(&LocationState) + Send + 'static,
    {
        let mut subscriber = Box::new(subscriber);
        let current = self.snapshot();
        subscriber(&current);
        self.subscribers.push(subscriber);
    }

    /// Applies one provider event to the state and notifies subscribers.
    pub fn handle_event(&mut self, event: ProviderEvent) {
        match event {
            ProviderEvent::AuthorizationChanged { state, accuracy } => {
                let refused = match state {
                    AuthorizationState::Denied | AuthorizationState::Restricted => true,
                    _ => false,
                };
                {
                    let mut guard = self.lock_state();
                    guard.authorization = state;
                    guard.accuracy = accuracy;
                    if refused {
                        let error = Error::PermissionDenied(String::from(
                            "enable location access for this application in the system settings",
                        ));
                        guard.last_error = Some(error.to_string());
                    }
                }
                if state.is_authorized() {
                    log::info!(target: "lightlogd::loc", "Location permission granted: \'{:?}\'", state);
                    self.begin_delivery();
                } else if refused {
                    log::warn!(target: "lightlogd::loc", "Location permission refused: \'{:?}\'", state);
                }
                // NotDetermined is transitional, nothing to do until the
                // user answers the prompt.
            }
            ProviderEvent::LocationUpdated { sample } => {
                log::debug!(target: "lightlogd::loc", "Received location update: \'{:.6}\', \'{:.6}\'",
                            sample.latitude, sample.longitude);
                self.lock_state().sample = Some(sample);
            }
            ProviderEvent::ProviderError { message } => {
                log::warn!(target: "lightlogd::loc", "Provider reported an error: \'{}\'", message);
                let error = Error::LocationUnavailable(message);
                self.lock_state().last_error = Some(error.to_string());
            }
        }
        self.notify();
    }

    fn begin_delivery(&mut self) {
        if !self.delivering {
            log::info!(target: "lightlogd::loc", "Starting continuous location delivery!");
            self.provider.start_updates();
            self.delivering = true;
        }
    }

    fn notify(&mut self) {
        let current = self.snapshot();
        for subscriber in self.subscribers.iter_mut() {
            subscriber(&current);
        }
    }

    fn lock_state(&self) -> MutexGuard<LocationState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Thread function for the provider event consumer.
///
/// Drains the event channel and applies every event to the authority until
/// the finish flag is set or the sending side disconnects, then stops
/// location delivery.
///
/// # Arguments
///
/// * `rx` - The channel the provider events arrive on.
///
/// * `thread_finish` - Indicates that the thread should finish operation and
///   should return.
///
/// * `authority` - The authority that owns the location state.
pub fn authority_thread(
    rx: Receiver<ProviderEvent>,
    thread_finish: Arc<AtomicBool>,
    mut authority: LocationAuthority,
) {
    let timeout = time::Duration::from_millis(100);

    while !thread_finish.load(Ordering::SeqCst) {
        let event = match rx.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!(target: "lightlogd::loc", "Provider event channel disconnected!");
                break;
            }
        };

        authority.handle_event(event);
    }

    authority.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::mpsc;
    use std::thread;

    #[derive(Clone, Default)]
    struct RecordingProvider {
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl RecordingProvider {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl LocationProvider for RecordingProvider {
        fn request_permission(&mut self) {
            self.calls.lock().unwrap().push("request_permission");
        }

        fn start_updates(&mut self) {
            self.calls.lock().unwrap().push("start_updates");
        }

        fn stop_updates(&mut self) {
            self.calls.lock().unwrap().push("stop_updates");
        }
    }

    fn authority_with_recorder() -> (LocationAuthority, RecordingProvider) {
        let provider = RecordingProvider::default();
        let handle = provider.clone();
        (LocationAuthority::new(Box::new(provider)), handle)
    }

    fn sample_at(latitude: f64, longitude: f64) -> LocationSample {
        LocationSample {
            latitude,
            longitude,
            horizontal_accuracy: 5.0,
            fix_timestamp: Utc.ymd(2024, 1, 1).and_hms(0, 0, 0),
        }
    }

    fn granted(state: AuthorizationState) -> ProviderEvent {
        ProviderEvent::AuthorizationChanged {
            state,
            accuracy: AccuracyAuthorization::Full,
        }
    }

    #[test]
    fn start_requests_permission_once_when_not_determined() {
        let (mut authority, provider) = authority_with_recorder();
        authority.start();
        authority.start();
        assert_eq!(provider.calls(), vec!["request_permission"]);
    }

    #[test]
    fn start_begins_delivery_when_already_decided() {
        let (mut authority, provider) = authority_with_recorder();
        authority.handle_event(granted(AuthorizationState::AuthorizedAlways));
        authority.start();
        // One grant-driven start, no repeat from the explicit start call.
        assert_eq!(provider.calls(), vec!["start_updates"]);
    }

    #[test]
    fn grant_starts_delivery_without_new_permission_request() {
        let (mut authority, provider) = authority_with_recorder();
        authority.start();
        authority.handle_event(granted(AuthorizationState::AuthorizedWhenInUse));
        assert_eq!(provider.calls(), vec!["request_permission", "start_updates"]);
        let state = authority.snapshot();
        assert_eq!(state.authorization, AuthorizationState::AuthorizedWhenInUse);
        assert_eq!(state.accuracy, AccuracyAuthorization::Full);
    }

    #[test]
    fn denial_sets_error_and_leaves_sample_untouched() {
        let (mut authority, _provider) = authority_with_recorder();
        authority.start();
        authority.handle_event(ProviderEvent::AuthorizationChanged {
            state: AuthorizationState::Denied,
            accuracy: AccuracyAuthorization::Reduced,
        });
        let state = authority.snapshot();
        assert_eq!(state.authorization, AuthorizationState::Denied);
        assert!(state.sample.is_none());
        let error = state.last_error.expect("denial must surface an error");
        assert!(!error.is_empty());
    }

    #[test]
    fn location_update_is_last_write_wins_and_keeps_error() {
        let (mut authority, _provider) = authority_with_recorder();
        authority.handle_event(ProviderEvent::ProviderError {
            message: String::from("gps signal lost"),
        });
        authority.handle_event(ProviderEvent::LocationUpdated {
            sample: sample_at(1.0, 2.0),
        });
        authority.handle_event(ProviderEvent::LocationUpdated {
            sample: sample_at(3.0, 4.0),
        });
        let state = authority.snapshot();
        let sample = state.sample.expect("update must set the sample");
        assert_eq!(sample.latitude, 3.0);
        assert_eq!(sample.longitude, 4.0);
        assert!(state.last_error.is_some());
    }

    #[test]
    fn provider_error_keeps_previous_sample() {
        let (mut authority, _provider) = authority_with_recorder();
        authority.handle_event(ProviderEvent::LocationUpdated {
            sample: sample_at(25.03, 121.56),
        });
        authority.handle_event(ProviderEvent::ProviderError {
            message: String::from("timeout"),
        });
        let state = authority.snapshot();
        assert!(state.sample.is_some());
        assert_eq!(
            state.last_error,
            Some(Error::LocationUnavailable(String::from("timeout")).to_string())
        );
    }

    #[test]
    fn late_subscriber_receives_current_state_immediately() {
        let (mut authority, _provider) = authority_with_recorder();
        authority.handle_event(ProviderEvent::LocationUpdated {
            sample: sample_at(25.03, 121.56),
        });
        let seen: Arc<Mutex<Vec<LocationState>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        authority.subscribe(move |state| sink.lock().unwrap().push(state.clone()));
        let states = seen.lock().unwrap();
        assert_eq!(states.len(), 1);
        assert!(states[0].sample.is_some());
    }

    #[test]
    fn every_mutation_notifies_subscribers_synchronously() {
        let (mut authority, _provider) = authority_with_recorder();
        let seen: Arc<Mutex<Vec<LocationState>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        authority.subscribe(move |state| sink.lock().unwrap().push(state.clone()));
        authority.handle_event(granted(AuthorizationState::AuthorizedWhenInUse));
        authority.handle_event(ProviderEvent::LocationUpdated {
            sample: sample_at(1.0, 1.0),
        });
        // Initial replay plus one notification per event.
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn stop_quiesces_delivery() {
        let (mut authority, provider) = authority_with_recorder();
        authority.handle_event(granted(AuthorizationState::AuthorizedAlways));
        authority.stop();
        authority.stop();
        assert_eq!(provider.calls(), vec!["start_updates", "stop_updates"]);
    }

    #[test]
    fn authority_thread_applies_events_and_stops_on_finish() {
        let (mut authority, provider) = authority_with_recorder();
        authority.start();
        let shared = authority.shared_state();
        let (tx, rx) = mpsc::channel();
        let finish = Arc::new(AtomicBool::new(false));
        let thread_finish = Arc::clone(&finish);
        let handle = thread::spawn(move || authority_thread(rx, thread_finish, authority));

        tx.send(granted(AuthorizationState::AuthorizedWhenInUse))
            .unwrap();
        tx.send(ProviderEvent::LocationUpdated {
            sample: sample_at(25.03, 121.56),
        })
        .unwrap();

        let deadline = std::time::Instant::now() + time::Duration::from_secs(5);
        loop {
            if shared.lock().unwrap().sample.is_some() {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "event was not applied in time");
            thread::sleep(time::Duration::from_millis(10));
        }

        finish.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        assert_eq!(
            provider.calls(),
            vec!["request_permission", "start_updates", "stop_updates"]
        );
    }
}
