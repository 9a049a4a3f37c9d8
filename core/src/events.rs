//! Synchronous in-process event emitter.
//!
//! Listeners are registered per event name and called in registration order
//! on the thread that calls [`Emitter::emit`]. Each emit works on a snapshot
//! of the listener list taken under the lock; the lock is released before any
//! listener runs, so listeners may call back into the emitter freely:
//!   - a plain listener removed during emission is still called in that round,
//!   - a listener added during emission is not called until the next emit,
//!   - `once` and `race` wrappers never fire after they were consumed or
//!     cancelled, even if they are still in a snapshot.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, trace};

use crate::config::{EmitterConfig, FailurePolicy};
use crate::error::{EmitterError, MISSING_CALLBACK};
use crate::listener::{Listener, ListenerId};
use crate::payload::with_type;
use crate::subscription::Subscription;

struct Entry {
    id: ListenerId,
    listener: Listener,
}

/// Registry state shared by every clone of an [`Emitter`] and referenced
/// weakly by subscriptions and `once`/`race` wrappers.
pub(crate) struct Shared {
    registry: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
    policy: FailurePolicy,
}

impl Shared {
    fn allocate_id(&self) -> ListenerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert `listener` unless it is already registered for `event`; either
    /// way return the token of its entry.
    fn insert_unique(&self, event: &str, listener: Listener) -> ListenerId {
        let mut registry = self.registry.lock();
        let entries = registry.entry(event.to_string()).or_default();
        if let Some(existing) = entries.iter().find(|e| e.listener.same_as(&listener)) {
            return existing.id;
        }
        let id = self.allocate_id();
        entries.push(Entry { id, listener });
        id
    }

    /// Insert freshly built wrappers under a single lock.
    fn insert_wrappers(&self, wrappers: Vec<(String, ListenerId, Listener)>) {
        let mut registry = self.registry.lock();
        for (event, id, listener) in wrappers {
            registry.entry(event).or_default().push(Entry { id, listener });
        }
    }

    fn remove_where(&self, event: &str, pred: impl Fn(&Entry) -> bool) -> bool {
        let mut registry = self.registry.lock();
        let Some(entries) = registry.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| !pred(e));
        let removed = entries.len() != before;
        if entries.is_empty() {
            registry.remove(event);
        }
        removed
    }

    pub(crate) fn remove_id(&self, event: &str, id: ListenerId) -> bool {
        self.remove_where(event, |e| e.id == id)
    }

    pub(crate) fn remove_all(&self, targets: &[(String, ListenerId)]) {
        for (event, id) in targets {
            if self.remove_id(event, *id) {
                trace!(event = %event, id, "listener removed");
            }
        }
    }

    pub(crate) fn has_id(&self, event: &str, id: ListenerId) -> bool {
        self.registry
            .lock()
            .get(event)
            .is_some_and(|entries| entries.iter().any(|e| e.id == id))
    }
}

/// Registry of named events and their listeners.
///
/// Cloning an `Emitter` yields another handle to the same registry. All
/// methods take `&self`; the registry is guarded by a `parking_lot::Mutex`
/// that is never held while a listener runs.
#[derive(Clone)]
pub struct Emitter {
    shared: Arc<Shared>,
}

impl Emitter {
    /// Create an emitter with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EmitterConfig::default())
    }

    pub fn with_config(config: EmitterConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                policy: config.failure_policy,
            }),
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.shared.policy
    }

    /// Register `callback` for `event`.
    ///
    /// Registering a listener that is already present for `event` is a no-op;
    /// the returned subscription is then bound to the existing entry.
    pub fn on(
        &self,
        event: impl Into<String>,
        callback: impl Into<Option<Listener>>,
    ) -> Result<Subscription, EmitterError> {
        let callback: Option<Listener> = callback.into();
        let callback = callback.ok_or(EmitterError::InvalidArgument(MISSING_CALLBACK))?;
        let event: String = event.into();
        let id = self.shared.insert_unique(&event, callback);
        debug!(event = %event, id, "listener registered");
        Ok(Subscription::new(
            Arc::downgrade(&self.shared),
            vec![(event, id)],
            None,
        ))
    }

    /// Remove `callback` from `event`. Unknown events and listeners are ignored.
    pub fn off(&self, event: &str, callback: &Listener) {
        if self.shared.remove_where(event, |e| e.listener.same_as(callback)) {
            debug!(event, "listener removed");
        }
    }

    /// Remove every listener of `event`.
    pub fn off_all(&self, event: &str) {
        if let Some(entries) = self.shared.registry.lock().remove(event) {
            debug!(event, count = entries.len(), "listeners removed");
        }
    }

    /// Remove every listener of every event.
    pub fn clear(&self) {
        let mut registry = self.shared.registry.lock();
        debug!(events = registry.len(), "registry cleared");
        registry.clear();
    }

    /// Deliver `payload`, tagged with `type = event`, to the listeners of
    /// `event` in registration order.
    ///
    /// Under [`FailurePolicy::Isolate`] a panicking listener does not stop
    /// delivery; the first failure is returned once every listener has run.
    /// Under [`FailurePolicy::Propagate`] the panic unwinds out of `emit`.
    pub fn emit(&self, event: &str, payload: impl Into<Option<Value>>) -> Result<(), EmitterError> {
        let snapshot: Vec<Listener> = {
            let registry = self.shared.registry.lock();
            match registry.get(event) {
                Some(entries) => entries.iter().map(|e| e.listener.clone()).collect(),
                None => {
                    trace!(event, "no listeners");
                    return Ok(());
                }
            }
        };
        let payload = with_type(event, payload.into());
        trace!(event, listeners = snapshot.len(), "dispatching");

        if self.shared.policy == FailurePolicy::Propagate {
            for listener in &snapshot {
                listener.call(&payload);
            }
            return Ok(());
        }

        let mut failures = 0;
        let mut first = None;
        for listener in &snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener.call(&payload)));
            if let Err(panic) = result {
                let message = panic_message(panic.as_ref());
                error!(event, error = %message, "listener panicked");
                failures += 1;
                first.get_or_insert(message);
            }
        }
        match first {
            Some(message) => Err(EmitterError::ListenerPanicked {
                event: event.to_string(),
                failures,
                message,
            }),
            None => Ok(()),
        }
    }

    /// Register `callback` to run on the next `event` only.
    ///
    /// The wrapper removes itself before calling `callback`, so a re-entrant
    /// emit of the same event cannot deliver twice.
    pub fn once(
        &self,
        event: impl Into<String>,
        callback: impl Into<Option<Listener>>,
    ) -> Result<Subscription, EmitterError> {
        let callback: Option<Listener> = callback.into();
        let callback = callback.ok_or(EmitterError::InvalidArgument(MISSING_CALLBACK))?;
        let event: String = event.into();
        let id = self.shared.allocate_id();
        let fired = Arc::new(AtomicBool::new(false));

        let wrapper = {
            let shared = Arc::downgrade(&self.shared);
            let fired = Arc::clone(&fired);
            let event = event.clone();
            Listener::new(move |payload| {
                if fired.swap(true, Ordering::AcqRel) {
                    return;
                }
                if let Some(shared) = shared.upgrade() {
                    shared.remove_id(&event, id);
                }
                callback.call(payload);
            })
        };
        self.shared.insert_wrappers(vec![(event.clone(), id, wrapper)]);
        debug!(event = %event, id, "once listener registered");

        Ok(Subscription::new(
            Arc::downgrade(&self.shared),
            vec![(event, id)],
            Some(fired),
        ))
    }

    /// Subscribe to several events at once; only the first one to fire is
    /// delivered, after which every registration made by this call is removed.
    ///
    /// All callbacks are validated before anything is registered.
    pub fn race<I, E, L>(&self, subscriptions: I) -> Result<Subscription, EmitterError>
    where
        I: IntoIterator<Item = (E, L)>,
        E: Into<String>,
        L: Into<Option<Listener>>,
    {
        let racers = subscriptions
            .into_iter()
            .map(|(event, callback)| {
                let event: String = event.into();
                let callback: Option<Listener> = callback.into();
                callback
                    .map(|callback| (event, self.shared.allocate_id(), callback))
                    .ok_or(EmitterError::InvalidArgument(MISSING_CALLBACK))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if racers.is_empty() {
            return Ok(Subscription::inert());
        }

        let targets: Arc<[(String, ListenerId)]> = racers
            .iter()
            .map(|(event, id, _)| (event.clone(), *id))
            .collect();
        let settled = Arc::new(AtomicBool::new(false));

        let wrappers: Vec<(String, ListenerId, Listener)> = racers
            .into_iter()
            .map(|(event, id, callback)| {
                let shared = Arc::downgrade(&self.shared);
                let settled = Arc::clone(&settled);
                let targets = Arc::clone(&targets);
                let winner = event.clone();
                let wrapper = Listener::new(move |payload| {
                    if settled.swap(true, Ordering::AcqRel) {
                        return;
                    }
                    if let Some(shared) = shared.upgrade() {
                        shared.remove_all(&targets);
                    }
                    debug!(event = %winner, "race settled");
                    callback.call(payload);
                });
                (event, id, wrapper)
            })
            .collect();
        self.shared.insert_wrappers(wrappers);
        debug!(racers = targets.len(), "race registered");

        Ok(Subscription::new(
            Arc::downgrade(&self.shared),
            targets.to_vec(),
            Some(settled),
        ))
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.shared.registry.lock().get(event).map_or(0, Vec::len)
    }

    /// Listeners registered for `event`, in delivery order.
    pub fn listeners(&self, event: &str) -> Vec<Listener> {
        self.shared
            .registry
            .lock()
            .get(event)
            .map(|entries| entries.iter().map(|e| e.listener.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.shared.registry.lock().contains_key(event)
    }

    /// Returns true if `callback` itself (not a `once`/`race` wrapper around
    /// it) is registered for `event`.
    pub fn contains(&self, event: &str, callback: &Listener) -> bool {
        self.shared
            .registry
            .lock()
            .get(event)
            .is_some_and(|entries| entries.iter().any(|e| e.listener.same_as(callback)))
    }

    /// Names of events that currently have listeners, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.registry.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.shared.registry.lock().is_empty()
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.shared.registry.lock();
        let mut counts: Vec<(&String, usize)> =
            registry.iter().map(|(event, entries)| (event, entries.len())).collect();
        counts.sort();
        f.debug_struct("Emitter")
            .field("policy", &self.shared.policy)
            .field("registry", &counts)
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener panicked".to_string()
    }
}
