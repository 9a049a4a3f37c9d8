//! Scripted replays of emitter operations, loaded from TOML.
//!
//! ```toml
//! panicking = ["boom"]
//!
//! [[step]]
//! op = "on"
//! event = "click"
//! listener = "a"
//! handle = "click-a"
//!
//! [[step]]
//! op = "emit"
//! event = "click"
//! payload = { element = "div" }
//! ```
//!
//! Listeners are named; every name maps to one recording listener, so using
//! the same name twice registers the same listener identity.

use std::{collections::HashMap, fmt, fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{Emitter, Listener, Subscription};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Step {
    On {
        event: String,
        listener: String,
        handle: Option<String>,
    },
    Once {
        event: String,
        listener: String,
        handle: Option<String>,
    },
    Race {
        racers: Vec<Racer>,
        handle: Option<String>,
    },
    /// Without `listener` every listener of `event` is removed.
    Off {
        event: String,
        listener: Option<String>,
    },
    Emit {
        event: String,
        payload: Option<Value>,
    },
    Cancel {
        handle: String,
    },
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Racer {
    pub event: String,
    pub listener: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct Scenario {
    /// Listener names that panic after recording their delivery.
    #[serde(default)]
    pub panicking: Vec<String>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

/// One payload received by one named listener.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub listener: String,
    pub payload: Value,
}

/// Outcome of a replay.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Replay {
    /// Deliveries in the order they happened.
    pub deliveries: Vec<Delivery>,
    /// Errors reported by `emit`, one per failing step.
    pub failures: Vec<String>,
    /// Listener count per event once the last step ran.
    pub registry: Vec<(String, usize)>,
}

impl Scenario {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid scenario")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Run every step against `emitter`.
    pub fn run(&self, emitter: &Emitter) -> Result<Replay> {
        let mut runner = Runner {
            panicking: &self.panicking,
            log: Arc::new(Mutex::new(Vec::new())),
            listeners: HashMap::new(),
            handles: HashMap::new(),
        };
        let mut failures = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            let step_no = index + 1;
            match step {
                Step::On {
                    event,
                    listener,
                    handle,
                } => {
                    let sub = emitter.on(event.as_str(), runner.listener(listener))?;
                    runner.store(handle, sub);
                }
                Step::Once {
                    event,
                    listener,
                    handle,
                } => {
                    let sub = emitter.once(event.as_str(), runner.listener(listener))?;
                    runner.store(handle, sub);
                }
                Step::Race { racers, handle } => {
                    let pairs: Vec<(String, Listener)> = racers
                        .iter()
                        .map(|r| (r.event.clone(), runner.listener(&r.listener)))
                        .collect();
                    let sub = emitter.race(pairs)?;
                    runner.store(handle, sub);
                }
                Step::Off {
                    event,
                    listener: Some(name),
                } => emitter.off(event, &runner.listener(name)),
                Step::Off {
                    event,
                    listener: None,
                } => emitter.off_all(event),
                Step::Emit { event, payload } => {
                    if let Err(err) = emitter.emit(event, payload.clone()) {
                        warn!(step = step_no, "{err}");
                        failures.push(err.to_string());
                    }
                }
                Step::Cancel { handle } => runner
                    .handles
                    .get(handle)
                    .with_context(|| format!("step {step_no}: unknown handle `{handle}`"))?
                    .cancel(),
            }
        }

        let registry = emitter
            .event_names()
            .into_iter()
            .map(|event| {
                let count = emitter.listener_count(&event);
                (event, count)
            })
            .collect();
        let deliveries = runner.log.lock().clone();
        info!(steps = self.steps.len(), deliveries = deliveries.len(), "scenario replayed");
        Ok(Replay {
            deliveries,
            failures,
            registry,
        })
    }
}

struct Runner<'a> {
    panicking: &'a [String],
    log: Arc<Mutex<Vec<Delivery>>>,
    listeners: HashMap<String, Listener>,
    handles: HashMap<String, Subscription>,
}

impl Runner<'_> {
    /// The recording listener called `name`, created on first use.
    fn listener(&mut self, name: &str) -> Listener {
        let log = Arc::clone(&self.log);
        let panics = self.panicking.iter().any(|p| p == name);
        self.listeners
            .entry(name.to_string())
            .or_insert_with(|| {
                let name = name.to_string();
                Listener::new(move |payload| {
                    log.lock().push(Delivery {
                        listener: name.clone(),
                        payload: payload.clone(),
                    });
                    if panics {
                        panic!("listener `{name}` failed");
                    }
                })
            })
            .clone()
    }

    fn store(&mut self, handle: &Option<String>, sub: Subscription) {
        if let Some(name) = handle {
            self.handles.insert(name.clone(), sub);
        }
    }
}

impl fmt::Display for Replay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for delivery in &self.deliveries {
            writeln!(f, "{} <- {}", delivery.listener, delivery.payload)?;
        }
        for failure in &self.failures {
            writeln!(f, "error: {failure}")?;
        }
        writeln!(f, "registry:")?;
        if self.registry.is_empty() {
            writeln!(f, "  (empty)")?;
        }
        for (event, count) in &self.registry {
            writeln!(f, "  {event}: {count}")?;
        }
        Ok(())
    }
}
