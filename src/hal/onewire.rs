//! 1-Wire bus provider: device discovery under
//! `/sys/bus/w1/devices` and `w1_slave` temperature reads, rate-limited so
//! a tight polling loop in a flow can't hammer the kernel driver.

use std::fs;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{ExecutionError, Result};

/// Family code -> human device type, the subset calls out.
const FAMILY_TABLE: &[(&str, &str)] = &[
    ("10", "DS18S20"),
    ("22", "DS1822"),
    ("28", "DS18B20"),
    ("3b", "DS1825"),
    ("42", "DS28EA00"),
];

fn family_name(id: &str) -> String {
    let Some((family, _)) = id.split_once('-') else {
        return "unknown".to_string();
    };
    match FAMILY_TABLE.iter().find(|(f, _)| *f == family) {
        Some((_, name)) => name.to_string(),
        None => match u8::from_str_radix(family, 16) {
            Ok(code) => format!("Unknown (0x{code:02X})"),
            Err(_) => "unknown".to_string(),
        },
    }
}

#[derive(Debug, Clone)]
pub struct OneWireDevice {
    pub id: String,
    pub device_type: String,
}

/// Abstraction over the `/sys/bus/w1/devices` tree so tests don't touch
/// the real filesystem ("pluggable mock for tests").
pub trait OneWireBackend: Send + Sync + std::fmt::Debug {
    fn list_devices(&self) -> Result<Vec<String>>;
    fn read_slave(&self, id: &str) -> Result<String>;
}

const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(5);

pub struct OneWireProvider {
    backend: Box<dyn OneWireBackend>,
    last_scan: Mutex<Option<(Instant, Vec<OneWireDevice>)>>,
}

impl std::fmt::Debug for OneWireProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneWireProvider").finish()
    }
}

impl OneWireProvider {
    pub fn new(backend: Box<dyn OneWireBackend>) -> Self {
        Self {
            backend,
            last_scan: Mutex::new(None),
        }
    }

    /// Lists devices, reusing the last scan if it's younger than
    /// `MIN_SCAN_INTERVAL` ("rate-limited scanning").
    pub fn scan(&self) -> Result<Vec<OneWireDevice>> {
        let mut cache = self.last_scan.lock();
        if let Some((at, devices)) = cache.as_ref() {
            if at.elapsed() < MIN_SCAN_INTERVAL {
                return Ok(devices.clone());
            }
        }
        let ids = self.backend.list_devices()?;
        let devices: Vec<OneWireDevice> = ids
            .into_iter()
            .map(|id| {
                let device_type = family_name(&id);
                OneWireDevice { id, device_type }
            })
            .collect();
        *cache = Some((Instant::now(), devices.clone()));
        Ok(devices)
    }

    /// Parses a `w1_slave` temperature reading (`... t=12345` meaning
    /// 12.345 degrees C). Fails `protocol-failure` on a missing CRC-ok
    /// marker or an unparsable `t=` field.
    pub fn read_temperature(&self, id: &str) -> Result<f64> {
        let contents = self.backend.read_slave(id)?;
        let mut lines = contents.lines();
        let crc_line = lines
            .next()
            .ok_or_else(|| ExecutionError::ProtocolFailure("empty w1_slave read".into()))?;
        if !crc_line.trim_end().ends_with("YES") {
            return Err(ExecutionError::ProtocolFailure(format!(
                "crc check failed for device {id}"
            )));
        }
        let data_line = lines
            .next()
            .ok_or_else(|| ExecutionError::ProtocolFailure("missing w1_slave data line".into()))?;
        let raw: i64 = data_line
            .rsplit("t=")
            .next()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| ExecutionError::ProtocolFailure(format!("no t= field for {id}")))?;
        Ok(raw as f64 / 1000.0)
    }
}

/// Real sysfs backend.
pub mod sysfs {
    use super::*;

    const W1_ROOT: &str = "/sys/bus/w1/devices";

    #[derive(Debug, Default)]
    pub struct SysfsBackend;

    impl OneWireBackend for SysfsBackend {
        fn list_devices(&self) -> Result<Vec<String>> {
            let mut ids = Vec::new();
            let entries = match fs::read_dir(W1_ROOT) {
                Ok(e) => e,
                Err(_) => return Ok(ids),
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.contains('-') && !name.starts_with("w1_bus_master") {
                    ids.push(name);
                }
            }
            ids.sort();
            Ok(ids)
        }

        fn read_slave(&self, id: &str) -> Result<String> {
            Ok(fs::read_to_string(format!("{W1_ROOT}/{id}/w1_slave"))?)
        }
    }
}

/// In-memory mock backend ("pluggable mock for tests").
pub mod mock {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    pub struct MockOneWireBackend {
        devices: Mutex<HashMap<String, String>>,
    }

    impl MockOneWireBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_device(&self, id: &str, w1_slave_contents: &str) {
            self.devices
                .lock()
                .insert(id.to_string(), w1_slave_contents.to_string());
        }
    }

    impl OneWireBackend for MockOneWireBackend {
        fn list_devices(&self) -> Result<Vec<String>> {
            let mut ids: Vec<String> = self.devices.lock().keys().cloned().collect();
            ids.sort();
            Ok(ids)
        }

        fn read_slave(&self, id: &str) -> Result<String> {
            self.devices
                .lock()
                .get(id)
                .cloned()
                .ok_or_else(|| ExecutionError::NotFound(id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockOneWireBackend;
    use super::*;

    #[test]
    fn family_code_maps_to_device_type() {
        assert_eq!(family_name("28-0000012345"), "DS18B20");
        assert_eq!(family_name("99-0000012345"), "Unknown (0x99)");
        assert_eq!(family_name("not-a-family-code"), "unknown");
    }

    #[test]
    fn scan_lists_devices_sorted_by_id() {
        let backend = MockOneWireBackend::new();
        backend.add_device("28-aaa", "50 05 4b 46 7f ff 0c 10 56 t=21000");
        backend.add_device("28-bbb", "50 05 4b 46 7f ff 0c 10 56 t=22000");
        let provider = OneWireProvider::new(Box::new(backend));
        let devices = provider.scan().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "28-aaa");
    }

    #[test]
    fn read_temperature_parses_the_t_field() {
        let backend = MockOneWireBackend::new();
        backend.add_device(
            "28-aaa",
            "50 05 4b 46 7f ff 0c 10 56 : crc=56 YES\n50 05 4b 46 7f ff 0c 10 56 t=23562",
        );
        let provider = OneWireProvider::new(Box::new(backend));
        assert_eq!(provider.read_temperature("28-aaa").unwrap(), 23.562);
    }

    #[test]
    fn read_temperature_fails_on_bad_crc() {
        let backend = MockOneWireBackend::new();
        backend.add_device("28-aaa", "50 05 4b 46 7f ff 0c 10 56 : crc=56 NO\nt=23562");
        let provider = OneWireProvider::new(Box::new(backend));
        let err = provider.read_temperature("28-aaa").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ProtocolFailure);
    }

    #[test]
    fn repeated_scans_within_the_rate_limit_reuse_the_cached_result() {
        let backend = MockOneWireBackend::new();
        backend.add_device("28-aaa", "x");
        let provider = OneWireProvider::new(Box::new(backend));
        let first = provider.scan().unwrap();
        let second = provider.scan().unwrap();
        assert_eq!(first.len(), second.len());
    }
}
