//! The hardware abstraction layer: one process-wide instance
//! gating GPIO, bus, and 1-Wire access behind `hal-unavailable` until
//! explicitly initialized, mirroring the registry's "accumulate, then
//! serve" lifecycle in [`crate::node::registry`] but with an extra
//! not-yet-initialized state the registry doesn't need.

pub mod board;
pub mod bus;
pub mod gpio;
pub mod monitor;
pub mod onewire;

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::error::{ExecutionError, Result};

use board::BoardInfo;
use bus::{BusBackend, I2cProvider, SerialProvider, SpiProvider};
use gpio::{GpioBackend, GpioProvider};
use monitor::Monitor;
use onewire::{OneWireBackend, OneWireProvider};

/// The live HAL instance ("HAL lifecycle"): GPIO, buses, and
/// 1-Wire, plus the board it was detected for.
pub struct Hal {
    pub board: BoardInfo,
    pub gpio: Arc<GpioProvider>,
    pub i2c: I2cProvider,
    pub spi: SpiProvider,
    pub serial: SerialProvider,
    pub onewire: OneWireProvider,
    pub monitor: Arc<Monitor>,
}

impl Hal {
    pub fn new(
        board: BoardInfo,
        gpio_backend: Arc<dyn GpioBackend>,
        bus_backend: Arc<dyn BusBackend>,
        onewire_backend: Box<dyn OneWireBackend>,
    ) -> Self {
        let gpio = Arc::new(GpioProvider::new(gpio_backend));
        let monitor = Arc::new(Monitor::new(gpio.clone(), Duration::from_millis(50)));
        Self {
            board,
            gpio,
            i2c: I2cProvider::new(bus_backend.clone()),
            spi: SpiProvider::new(bus_backend.clone()),
            serial: SerialProvider::new(bus_backend),
            onewire: OneWireProvider::new(onewire_backend),
            monitor,
        }
    }

    /// Releases every provider (`Close`): stops the monitor
    /// thread, every PWM worker, every edge watcher, closes every cached
    /// bus handle.
    pub fn close(&self) {
        self.monitor.stop();
        self.gpio.close();
        self.i2c.close();
        self.spi.close();
        self.serial.close();
    }
}

static HAL: OnceCell<RwLock<Option<Arc<Hal>>>> = OnceCell::new();

fn slot() -> &'static RwLock<Option<Arc<Hal>>> {
    HAL.get_or_init(|| RwLock::new(None))
}

/// Installs the process-wide HAL instance (`Set`). Replaces and
/// closes any prior instance rather than leaking its threads.
pub fn set(hal: Arc<Hal>) {
    let mut guard = slot().write();
    if let Some(prev) = guard.take() {
        prev.close();
    }
    *guard = Some(hal);
}

/// Returns the live HAL instance, or `hal-unavailable` if [`set`] was
/// never called: every GPIO/bus node fails with `hal-unavailable`
/// before a HAL is installed.
pub fn get() -> Result<Arc<Hal>> {
    slot()
        .read()
        .clone()
        .ok_or(ExecutionError::HalUnavailable)
}

/// Tears down the process-wide HAL, if any (`Close`).
pub fn close() {
    if let Some(prev) = slot().write().take() {
        prev.close();
    }
}

/// Builds a HAL wired entirely to in-memory mocks, for node tests that
/// need GPIO/bus access without touching real hardware.
pub fn install_mock() -> Arc<Hal> {
    let hal = Arc::new(Hal::new(
        BoardInfo::unknown(),
        Arc::new(gpio::mock::MockBackend::new()),
        Arc::new(bus::mock::MockBusBackend::new()),
        Box::new(onewire::mock::MockOneWireBackend::new()),
    ));
    set(hal.clone());
    hal
}
