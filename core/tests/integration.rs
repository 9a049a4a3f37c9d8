use std::{
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
};

use emitter::{create, scenario::Scenario, Emitter, EmitterError, Listener, Subscription};
use serde_json::{json, Value};

struct LogWriter(Arc<Mutex<Vec<u8>>>);
impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
struct MakeLogWriter(Arc<Mutex<Vec<u8>>>);
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MakeLogWriter {
    type Writer = LogWriter;
    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(self.0.clone())
    }
}

fn counter() -> (Listener, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    (
        Listener::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }),
        count,
    )
}

#[test]
fn listener_panic_is_logged_and_isolated() {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(MakeLogWriter(buf.clone()))
        .with_ansi(false)
        .finish();
    let (after, count) = counter();
    let result = tracing::subscriber::with_default(subscriber, || {
        let emitter = create();
        emitter
            .on("save", Listener::new(|_| panic!("disk full")))
            .unwrap();
        emitter.on("save", after).unwrap();
        emitter.emit("save", json!({"file": "a.txt"}))
    });
    assert!(matches!(
        result,
        Err(EmitterError::ListenerPanicked { failures: 1, .. })
    ));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    let logs = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("listener panicked"), "logs: {logs}");
    assert!(logs.contains("disk full"), "logs: {logs}");
}

#[test]
fn reentrant_emit_on_and_off_do_not_deadlock() {
    let emitter = Emitter::new();
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));

    let late = {
        let seen = seen.clone();
        Listener::new(move |_| seen.lock().unwrap().push("late".into()))
    };
    let relay = {
        let emitter = emitter.clone();
        let seen = seen.clone();
        let late = late.clone();
        Listener::new(move |payload: &Value| {
            seen.lock().unwrap().push(format!("relay:{}", payload["type"]));
            emitter.on("first", late.clone()).unwrap();
            emitter.emit("second", None).unwrap();
        })
    };
    let second = {
        let seen = seen.clone();
        Listener::new(move |_| seen.lock().unwrap().push("second".into()))
    };

    emitter.on("first", relay.clone()).unwrap();
    emitter.on("second", second).unwrap();
    emitter.emit("first", None).unwrap();

    // `late` was added mid-dispatch and only runs from the next emit on.
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["relay:\"first\"".to_string(), "second".to_string()]
    );
    assert_eq!(emitter.listeners("first"), vec![relay.clone(), late]);

    emitter.off("first", &relay);
    emitter.emit("first", None).unwrap();
    assert_eq!(seen.lock().unwrap().last().map(String::as_str), Some("late"));
}

#[test]
fn listener_removed_mid_dispatch_still_runs_that_round() {
    let emitter = Emitter::new();
    let (victim, count) = counter();
    let remover = {
        let emitter = emitter.clone();
        let victim = victim.clone();
        Listener::new(move |_| emitter.off("tick", &victim))
    };
    emitter.on("tick", remover).unwrap();
    emitter.on("tick", victim).unwrap();

    emitter.emit("tick", None).unwrap();
    emitter.emit("tick", None).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn once_is_not_redelivered_by_reentrant_emit() {
    let emitter = Emitter::new();
    let count = Arc::new(AtomicUsize::new(0));
    let cb = {
        let emitter = emitter.clone();
        let count = count.clone();
        Listener::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            emitter.emit("ready", None).unwrap();
        })
    };
    emitter.once("ready", cb).unwrap();
    emitter.emit("ready", None).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(emitter.is_empty());
}

#[test]
fn race_settles_once_when_winner_emits_another_racer() {
    let emitter = Emitter::new();
    let (loser, loser_count) = counter();
    let winner_count = Arc::new(AtomicUsize::new(0));
    let winner = {
        let emitter = emitter.clone();
        let winner_count = winner_count.clone();
        Listener::new(move |_| {
            winner_count.fetch_add(1, Ordering::SeqCst);
            emitter.emit("b", None).unwrap();
        })
    };
    emitter.race([("a", winner), ("b", loser)]).unwrap();
    emitter.emit("a", None).unwrap();
    assert_eq!(winner_count.load(Ordering::SeqCst), 1);
    assert_eq!(loser_count.load(Ordering::SeqCst), 0);
    assert!(emitter.is_empty());
}

#[test]
fn race_cancelled_mid_dispatch_does_not_fire() {
    let emitter = Emitter::new();
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let canceller = {
        let slot = slot.clone();
        Listener::new(move |_| {
            if let Some(handle) = slot.lock().unwrap().as_ref() {
                handle.cancel();
            }
        })
    };
    // registered first, so it runs before the racer within the same snapshot
    emitter.on("go", canceller.clone()).unwrap();
    let (racer, count) = counter();
    let handle = emitter.race([("go", racer), ("stop", counter().0)]).unwrap();
    *slot.lock().unwrap() = Some(handle);

    emitter.emit("go", None).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(emitter.listeners("go"), vec![canceller]);
    assert!(!emitter.has_listeners("stop"));
}

#[test]
fn concurrent_on_and_emit_keep_registry_consistent() {
    let emitter = Emitter::new();
    let total = Arc::new(AtomicUsize::new(0));
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let emitter = emitter.clone();
            let total = total.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    let total = total.clone();
                    let sub = emitter
                        .on(
                            "load",
                            Listener::new(move |_| {
                                total.fetch_add(1, Ordering::SeqCst);
                            }),
                        )
                        .unwrap();
                    emitter.emit("load", None).unwrap();
                    sub.cancel();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    assert!(emitter.is_empty());
    assert!(total.load(Ordering::SeqCst) >= 800);
}

#[test]
fn once_delivers_exactly_once_across_threads() {
    for _ in 0..20 {
        let emitter = Emitter::new();
        let (cb, count) = counter();
        emitter.once("start", cb).unwrap();
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let emitter = emitter.clone();
                thread::spawn(move || emitter.emit("start", None).unwrap())
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(emitter.is_empty());
    }
}

#[test]
fn dropped_emitter_leaves_handles_inert() {
    let emitter = Emitter::new();
    let (cb, _) = counter();
    let sub = emitter.on("x", cb).unwrap();
    drop(emitter);
    assert!(!sub.is_active());
    sub.cancel();
}

#[test]
fn replays_race_scenario_file() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios/race.toml");
    let scenario = Scenario::load(&path).unwrap();
    let replay = scenario.run(&Emitter::new()).unwrap();
    let got: Vec<(&str, &Value)> = replay
        .deliveries
        .iter()
        .map(|d| (d.listener.as_str(), &d.payload))
        .collect();
    assert_eq!(
        got,
        vec![
            ("on_key", &json!({"key": "Enter", "type": "keydown"})),
            ("logger", &json!({"key": "Enter", "type": "keydown"})),
            ("logger", &json!({"key": "Escape", "type": "keydown"})),
        ]
    );
    assert!(replay.failures.is_empty());
    assert_eq!(replay.registry, vec![("keydown".to_string(), 1)]);
}
