//! The live pin-state monitor: a background thread that
//! polls a set of GPIO lines at a fixed interval and broadcasts
//! transitions to subscribers, independent of any single flow node's
//! `WatchEdge` registration.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cancel::CancelSource;
use crate::hal::gpio::GpioProvider;

#[derive(Debug, Clone, Copy)]
pub struct PinSnapshot {
    pub pin: u32,
    pub value: u8,
    pub edge_count: u64,
    pub last_change: Option<Instant>,
}

type Subscriber = Arc<dyn Fn(PinSnapshot) + Send + Sync>;

struct Tracked {
    last_value: u8,
    edge_count: u64,
    last_change: Option<Instant>,
}

/// Polls a fixed set of pins on its own thread and calls subscribers
/// outside any lock on every observed transition, so no callback
/// ever runs with a provider mutex held.
pub struct Monitor {
    gpio: Arc<GpioProvider>,
    pins: Mutex<HashMap<u32, Tracked>>,
    subscribers: Mutex<Vec<Subscriber>>,
    cancel: Mutex<Option<CancelSource>>,
    poll_interval: Duration,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("watched_pins", &self.pins.lock().len())
            .finish()
    }
}

impl Monitor {
    pub fn new(gpio: Arc<GpioProvider>, poll_interval: Duration) -> Self {
        Self {
            gpio,
            pins: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            cancel: Mutex::new(None),
            poll_interval,
        }
    }

    /// Adds `pin` to the watch set if not already tracked. Safe to call
    /// whether or not the monitor thread is running yet.
    pub fn watch(&self, pin: u32) {
        self.pins.lock().entry(pin).or_insert(Tracked {
            last_value: 0,
            edge_count: 0,
            last_change: None,
        });
    }

    pub fn subscribe(&self, callback: Subscriber) {
        self.subscribers.lock().push(callback);
    }

    pub fn snapshot(&self, pin: u32) -> Option<PinSnapshot> {
        self.pins.lock().get(&pin).map(|t| PinSnapshot {
            pin,
            value: t.last_value,
            edge_count: t.edge_count,
            last_change: t.last_change,
        })
    }

    /// Starts the polling thread. Idempotent: calling twice while already
    /// running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut cancel_slot = self.cancel.lock();
        if cancel_slot.is_some() {
            return;
        }
        let source = CancelSource::new();
        let stop = source.token();
        *cancel_slot = Some(source);
        drop(cancel_slot);

        let monitor = self.clone();
        thread::Builder::new()
            .name("gpio-monitor".into())
            .spawn(move || {
                while !stop.wait_timeout(monitor.poll_interval) {
                    monitor.poll_once();
                }
            })
            .expect("failed to spawn gpio monitor thread");
    }

    pub fn stop(&self) {
        if let Some(mut source) = self.cancel.lock().take() {
            source.cancel();
        }
    }

    fn poll_once(&self) {
        let pins: Vec<u32> = self.pins.lock().keys().copied().collect();
        let mut transitions = Vec::new();
        {
            let mut tracked = self.pins.lock();
            for pin in pins {
                let Ok(value) = self.gpio.digital_read(pin) else {
                    continue;
                };
                if let Some(t) = tracked.get_mut(&pin) {
                    if t.last_value != value {
                        t.last_value = value;
                        t.edge_count += 1;
                        t.last_change = Some(Instant::now());
                        transitions.push(PinSnapshot {
                            pin,
                            value,
                            edge_count: t.edge_count,
                            last_change: t.last_change,
                        });
                    }
                }
            }
        }
        if transitions.is_empty() {
            return;
        }
        let subscribers = self.subscribers.lock().clone();
        for snapshot in transitions {
            for sub in &subscribers {
                sub(snapshot);
            }
        }
    }
}
