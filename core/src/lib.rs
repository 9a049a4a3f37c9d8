pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod listener;
pub mod payload;
pub mod scenario;
pub mod subscription;

pub use config::{EmitterConfig, FailurePolicy};
pub use error::{ConfigError, EmitterError};
pub use events::Emitter;
pub use listener::{Listener, ListenerId};
pub use subscription::Subscription;

/// Create an emitter with an empty registry and the default configuration.
pub fn create() -> Emitter {
    Emitter::new()
}
