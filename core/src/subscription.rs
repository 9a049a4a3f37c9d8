use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use crate::events::Shared;
use crate::listener::ListenerId;

/// Cancellation handle returned by every registration.
///
/// `cancel` removes exactly the entries this handle was created for, looked
/// up by token at the time of the call. Calling it again, or after the
/// entries were consumed by `once`/`race` or removed through `off`, does
/// nothing.
#[derive(Debug, Clone)]
pub struct Subscription {
    shared: Weak<Shared>,
    targets: Vec<(String, ListenerId)>,
    /// Tripped on cancel so `once`/`race` wrappers already captured in an
    /// in-flight dispatch snapshot do not fire.
    guard: Option<Arc<AtomicBool>>,
}

impl Subscription {
    pub(crate) fn new(
        shared: Weak<Shared>,
        targets: Vec<(String, ListenerId)>,
        guard: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            shared,
            targets,
            guard,
        }
    }

    /// A handle bound to nothing.
    pub(crate) fn inert() -> Self {
        Self::new(Weak::new(), Vec::new(), None)
    }

    /// Remove every entry this handle is bound to.
    pub fn cancel(&self) {
        if let Some(guard) = &self.guard {
            guard.store(true, Ordering::Release);
        }
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        shared.remove_all(&self.targets);
    }

    /// Returns true while at least one bound entry is still registered.
    pub fn is_active(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => self
                .targets
                .iter()
                .any(|(event, id)| shared.has_id(event, *id)),
            None => false,
        }
    }

    /// Event names this handle covers, in registration order.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|(event, _)| event.as_str())
    }
}
