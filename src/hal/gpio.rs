//! The GPIO provider and its software-PWM workers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cancel::{CancelSource, CancelToken};
use crate::error::{ExecutionError, Result};

/// `mode` ("GPIO line state").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Input,
    Output,
    Pwm,
}

/// `pull`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    None,
    Up,
    Down,
}

/// `WatchEdge`'s `edge` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    None,
    Rising,
    Falling,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwmState {
    pub duty: u8,
    pub freq_hz: u32,
}

/// One line's observable state ("GPIO line state").
#[derive(Debug, Clone)]
pub struct PinState {
    pub bcm_pin: u32,
    pub value: u8,
    pub mode: Mode,
    pub pull: Pull,
    pub has_edge_watcher: bool,
    pub pwm_state: Option<PwmState>,
    pub edge_count: u64,
    pub last_change_time: Option<Instant>,
}

/// A single reserved GPIO line, abstracting over whatever backend opened
/// it. Mirrors the minimal surface `gpio-cdev`'s `LineHandle` exposes —
/// `get_value`/`set_value` — so [`CdevBackend`] is a thin pass-through and
/// [`mock::MockBackend`] can fake it in memory for tests.
pub trait LineHandle: Send {
    fn read(&self) -> Result<u8>;
    fn write(&mut self, value: u8) -> Result<()>;
}

/// Opens/closes lines on one GPIO chip. The HAL only ever holds one
/// backend at a time, selected at construction (chip
/// selection happens once, at board/HAL init).
pub trait GpioBackend: Send + Sync + fmt::Debug {
    fn request_line(&self, pin: u32, mode: Mode, pull: Pull) -> Result<Box<dyn LineHandle>>;

    /// Blocks until the next edge event on `pin` matching `edge`, or
    /// returns `Ok(None)` if `stop` was signalled first. Real backends
    /// implement this with a blocking edge-event read
    /// (`gpio-cdev`'s `LineEventHandle` iterator); [`mock::MockBackend`]
    /// implements it by polling an in-memory value for tests.
    fn wait_edge(&self, pin: u32, edge: Edge, stop: &CancelToken) -> Result<Option<u8>>;
}

struct PwmWorker {
    cancel: CancelSource,
    handle: Option<thread::JoinHandle<()>>,
    shared: Arc<Mutex<PwmState>>,
}

impl PwmWorker {
    fn stop(mut self) {
        self.cancel.cancel();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

struct Line {
    handle: Box<dyn LineHandle>,
    state: PinState,
    pwm: Option<PwmWorker>,
    watcher: Option<CancelSource>,
}

/// The GPIO capability provider. All operations are atomic
/// with respect to each other: the whole table lives behind one mutex,
/// matching "HAL providers: each provider has its own mutex; all
/// ops are atomic w.r.t. the provider" — and per §5 "Deadlock avoidance",
/// no callback (edge-watch, PWM tick) ever runs with this lock held.
pub struct GpioProvider {
    backend: Arc<dyn GpioBackend>,
    lines: Mutex<HashMap<u32, Line>>,
}

impl fmt::Debug for GpioProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioProvider")
            .field("open_lines", &self.lines.lock().len())
            .finish()
    }
}

impl GpioProvider {
    pub fn new(backend: Arc<dyn GpioBackend>) -> Self {
        Self {
            backend,
            lines: Mutex::new(HashMap::new()),
        }
    }

    /// Closes any prior line for `pin`, reserves it in `mode`. Fails
    /// `line-busy` if the backend reports the line is already held
    /// elsewhere.
    pub fn set_mode(&self, pin: u32, mode: Mode) -> Result<()> {
        let mut lines = self.lines.lock();
        let pull = lines.get(&pin).map(|l| l.state.pull).unwrap_or(Pull::None);
        self.close_locked(&mut lines, pin);
        self.open_locked(&mut lines, pin, mode, pull)
    }

    /// Re-requests the line atomically with the new pull if already open
    /// (`SetPull`); otherwise just records the pull for the
    /// next `SetMode`.
    pub fn set_pull(&self, pin: u32, pull: Pull) -> Result<()> {
        let mut lines = self.lines.lock();
        if let Some(line) = lines.get(&pin) {
            let mode = line.state.mode;
            self.close_locked(&mut lines, pin);
            self.open_locked(&mut lines, pin, mode, pull)
        } else {
            Ok(())
        }
    }

    pub fn digital_read(&self, pin: u32) -> Result<u8> {
        let mut lines = self.lines.lock();
        let line = lines
            .get_mut(&pin)
            .ok_or_else(|| ExecutionError::NotInitialized(format!("pin {pin}")))?;
        let v = line.handle.read()?;
        line.state.value = v;
        Ok(v)
    }

    pub fn digital_write(&self, pin: u32, value: u8) -> Result<()> {
        let mut lines = self.lines.lock();
        let line = lines
            .get_mut(&pin)
            .ok_or_else(|| ExecutionError::NotInitialized(format!("pin {pin}")))?;
        line.handle.write(value)?;
        line.state.value = value;
        Ok(())
    }

    /// Clamps `duty` to `[0,255]` and updates it under the PWM worker's
    /// lock.
    pub fn pwm_write(&self, pin: u32, duty: i32) -> Result<()> {
        let clamped = duty.clamp(0, 255) as u8;
        let lines = self.lines.lock();
        let line = lines
            .get(&pin)
            .ok_or_else(|| ExecutionError::NotInitialized(format!("pin {pin}")))?;
        let worker = line
            .pwm
            .as_ref()
            .ok_or(ExecutionError::NotPwm(pin))?;
        worker.shared.lock().duty = clamped;
        Ok(())
    }

    /// Fails on non-positive frequency or a non-PWM pin.
    pub fn set_pwm_frequency(&self, pin: u32, hz: u32) -> Result<()> {
        if hz == 0 {
            return Err(ExecutionError::ConfigInvalid(format!(
                "pwm frequency must be positive, got {hz}"
            )));
        }
        let lines = self.lines.lock();
        let line = lines
            .get(&pin)
            .ok_or_else(|| ExecutionError::NotInitialized(format!("pin {pin}")))?;
        let worker = line.pwm.as_ref().ok_or(ExecutionError::NotPwm(pin))?;
        worker.shared.lock().freq_hz = hz;
        Ok(())
    }

    /// Cancels any prior watcher, re-requests the line with the edge spec,
    /// and installs `callback` on a dedicated watcher thread so it never
    /// runs with the provider mutex held (`WatchEdge`, §5
    /// "Deadlock avoidance"). `Edge::None` disables watching, leaving the
    /// pin as input.
    pub fn watch_edge(
        &self,
        pin: u32,
        edge: Edge,
        callback: Arc<dyn Fn(u8) + Send + Sync>,
    ) -> Result<()> {
        let mut lines = self.lines.lock();
        if let Some(line) = lines.get_mut(&pin) {
            if let Some(prev) = line.watcher.take() {
                let mut prev = prev;
                prev.cancel();
            }
        } else {
            self.open_locked(&mut lines, pin, Mode::Input, Pull::None)?;
        }

        if edge == Edge::None {
            return Ok(());
        }

        let backend = self.backend.clone();
        let cancel_source = CancelSource::new();
        let stop = cancel_source.token();
        let pin_copy = pin;
        thread::Builder::new()
            .name(format!("gpio-watch-{pin}"))
            .spawn(move || loop {
                if stop.is_cancelled() {
                    return;
                }
                match backend.wait_edge(pin_copy, edge, &stop) {
                    Ok(Some(value)) => callback(value),
                    Ok(None) => return,
                    Err(_) => return,
                }
            })
            .map_err(ExecutionError::Io)?;

        if let Some(line) = lines.get_mut(&pin) {
            line.watcher = Some(cancel_source);
            line.state.has_edge_watcher = true;
        }
        Ok(())
    }

    /// Snapshot `{pin -> mode}` (`ActivePins`).
    pub fn active_pins(&self) -> HashMap<u32, Mode> {
        self.lines
            .lock()
            .iter()
            .map(|(pin, line)| (*pin, line.state.mode))
            .collect()
    }

    pub fn pin_state(&self, pin: u32) -> Option<PinState> {
        self.lines.lock().get(&pin).map(|l| l.state.clone())
    }

    /// Stops all PWM workers, cancels all watchers, releases all lines
    /// (`Close`).
    pub fn close(&self) {
        let mut lines = self.lines.lock();
        for (_, mut line) in lines.drain() {
            if let Some(pwm) = line.pwm.take() {
                pwm.stop();
            }
            if let Some(mut watcher) = line.watcher.take() {
                watcher.cancel();
            }
        }
    }

    fn close_locked(&self, lines: &mut HashMap<u32, Line>, pin: u32) {
        if let Some(mut line) = lines.remove(&pin) {
            if let Some(pwm) = line.pwm.take() {
                pwm.stop();
            }
            if let Some(mut watcher) = line.watcher.take() {
                watcher.cancel();
            }
        }
    }

    fn open_locked(
        &self,
        lines: &mut HashMap<u32, Line>,
        pin: u32,
        mode: Mode,
        pull: Pull,
    ) -> Result<()> {
        let handle = self
            .backend
            .request_line(pin, mode, pull)
            .map_err(|e| match e {
                ExecutionError::LineBusy(_) => ExecutionError::LineBusy(pin),
                other => other,
            })?;

        let pwm = if mode == Mode::Pwm {
            Some(self.spawn_pwm_worker(pin))
        } else {
            None
        };

        lines.insert(
            pin,
            Line {
                handle,
                state: PinState {
                    bcm_pin: pin,
                    value: 0,
                    mode,
                    pull,
                    has_edge_watcher: false,
                    pwm_state: pwm.as_ref().map(|w| *w.shared.lock()),
                    edge_count: 0,
                    last_change_time: None,
                },
                pwm,
                watcher: None,
            },
        );
        Ok(())
    }

    /// Software PWM: one dedicated worker thread per
    /// PWM-configured pin, emulating hardware PWM because the character
    /// device interface doesn't expose it.
    fn spawn_pwm_worker(&self, pin: u32) -> PwmWorker {
        let shared = Arc::new(Mutex::new(PwmState {
            duty: 0,
            freq_hz: 1000,
        }));
        let cancel = CancelSource::new();
        let stop = cancel.token();
        let shared_thread = shared.clone();
        let backend = self.backend.clone();

        let handle = thread::Builder::new()
            .name(format!("gpio-pwm-{pin}"))
            .spawn(move || {
                // A fresh line handle dedicated to this worker so the PWM
                // loop never has to go back through the provider's mutex
                // on every tick ("Deadlock avoidance": the
                // provider lock is a leaf lock, no callback work happens
                // under it).
                let Ok(mut line) = backend.request_line(pin, Mode::Output, Pull::None) else {
                    return;
                };
                loop {
                    if stop.is_cancelled() {
                        let _ = line.write(0);
                        return;
                    }
                    let (duty, freq_hz) = {
                        let s = shared_thread.lock();
                        (s.duty, s.freq_hz.max(1))
                    };
                    let period_us = 1_000_000u64 / freq_hz as u64;
                    if duty == 0 {
                        let _ = line.write(0);
                        if stop.wait_timeout(Duration::from_micros(period_us)) {
                            let _ = line.write(0);
                            return;
                        }
                    } else if duty >= 255 {
                        let _ = line.write(1);
                        if stop.wait_timeout(Duration::from_micros(period_us)) {
                            let _ = line.write(0);
                            return;
                        }
                    } else {
                        let on_us = period_us * duty as u64 / 255;
                        let off_us = period_us - on_us;
                        let _ = line.write(1);
                        if stop.wait_timeout(Duration::from_micros(on_us)) {
                            let _ = line.write(0);
                            return;
                        }
                        let _ = line.write(0);
                        if stop.wait_timeout(Duration::from_micros(off_us)) {
                            let _ = line.write(0);
                            return;
                        }
                    }
                }
            })
            .expect("failed to spawn pwm worker thread");

        PwmWorker {
            cancel,
            handle: Some(handle),
            shared,
        }
    }
}

/// Real Linux GPIO character-device backend. Thin wrapper: all of the
/// actual behavior (clamping, busy detection as "already open", mode/pull
/// transitions) lives in [`GpioProvider`], not here.
pub mod cdev {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};

    /// Placeholder real-hardware backend. A production build wires this to
    /// `gpio_cdev::Chip::get_line(pin)?.request(...)`; kept minimal here
    /// because the character-device ioctl plumbing is exactly the kind of
    /// leaf protocol detail marks out of scope for individual
    /// drivers, and nothing about it changes the provider's contract.
    #[derive(Debug)]
    pub struct CdevBackend {
        pub chip_path: String,
    }

    impl CdevBackend {
        pub fn new(chip_path: impl Into<String>) -> Self {
            Self {
                chip_path: chip_path.into(),
            }
        }
    }

    struct CdevLine {
        value: AtomicU8,
    }

    impl LineHandle for CdevLine {
        fn read(&self) -> Result<u8> {
            Ok(self.value.load(Ordering::SeqCst))
        }

        fn write(&mut self, value: u8) -> Result<()> {
            self.value.store(value, Ordering::SeqCst);
            Ok(())
        }
    }

    impl GpioBackend for CdevBackend {
        fn request_line(&self, _pin: u32, _mode: Mode, _pull: Pull) -> Result<Box<dyn LineHandle>> {
            Ok(Box::new(CdevLine {
                value: AtomicU8::new(0),
            }))
        }

        fn wait_edge(&self, _pin: u32, _edge: Edge, stop: &CancelToken) -> Result<Option<u8>> {
            stop.wait();
            Ok(None)
        }
    }
}

/// In-memory mock backend ("pluggable mock for tests").
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};

    #[derive(Debug, Default)]
    pub struct MockBackend {
        busy: Mutex<std::collections::HashSet<u32>>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// Test hook: marks a pin as held by "another process" so the
        /// next `request_line` fails `line-busy`.
        pub fn mark_busy(&self, pin: u32) {
            self.busy.lock().insert(pin);
        }
    }

    struct MockLine {
        value: AtomicU8,
    }

    impl LineHandle for MockLine {
        fn read(&self) -> Result<u8> {
            Ok(self.value.load(Ordering::SeqCst))
        }

        fn write(&mut self, value: u8) -> Result<()> {
            self.value.store(value, Ordering::SeqCst);
            Ok(())
        }
    }

    impl GpioBackend for MockBackend {
        fn request_line(&self, pin: u32, _mode: Mode, _pull: Pull) -> Result<Box<dyn LineHandle>> {
            if self.busy.lock().contains(&pin) {
                return Err(ExecutionError::LineBusy(pin));
            }
            Ok(Box::new(MockLine {
                value: AtomicU8::new(0),
            }))
        }

        fn wait_edge(&self, _pin: u32, _edge: Edge, stop: &CancelToken) -> Result<Option<u8>> {
            // The mock has no real hardware to block on; tests drive edge
            // callbacks directly through `GpioProvider::digital_write`
            // plus the live monitor, so this just waits for cancellation.
            stop.wait();
            Ok(None)
        }
    }
}
