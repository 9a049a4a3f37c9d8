use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Token identifying one registry entry. Tokens are never reused within an
/// emitter, so a stale token can only ever miss.
pub type ListenerId = u64;

/// Closure type for event listeners.
pub type ListenerFn = dyn Fn(&Value) + Send + Sync;

/// A registered callback of one argument, the event payload.
///
/// Identity is pointer identity: clones of a `Listener` are the same
/// listener, two `Listener::new` calls over equal closures are not.
#[derive(Clone)]
pub struct Listener(Arc<ListenerFn>);

impl Listener {
    pub fn new(callback: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    /// Returns true if both handles refer to the same registered callback.
    pub fn same_as(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn call(&self, payload: &Value) {
        (self.0)(payload)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Listener {}
