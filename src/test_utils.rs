use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::bluetooth::uuids::{normalize_uuid, FLORA_BATTERY_CHARACTERISTIC, FLORA_DATA_CHARACTERISTIC};
use crate::bluetooth::{CharacteristicHandle, Discovery, PowerState, RadioAdapter};
use crate::error::RadioError;
use crate::metrics::MetricsEmitter;
use crate::models::Reading;

/// Address of the Flower care sensor used throughout the tests.
pub const FLORA_ID: &str = "c4:7c:8d:6d:b3:73";

/// Real-time data: 24.5°C, 10000 lux, 30% moisture, 200 µS/cm
pub const FLORA_DATA: [u8; 16] = [
    0xF5, 0x00, 0x00, 0x10, 0x27, 0x00, 0x00, 0x1E, 0xC8, 0x00, 0x02, 0x3C, 0x00, 0xFB, 0x34,
    0x9B,
];

/// Battery 99%, firmware "3.3.5"
pub const FLORA_BATTERY: [u8; 7] = [0x63, 0x15, 0x33, 0x2E, 0x33, 0x2E, 0x35];

#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCall {
    StartScan,
    StopScan,
    Connect(String),
    DiscoverCharacteristics(String),
    Write(String, Vec<u8>),
    Read(String),
    Disconnect(String),
}

/// Session step the fake adapter should fail at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Connect,
    Discover,
    MissingCharacteristic,
    Write,
    BatteryRead,
    DataRead,
    ShortData,
}

/// In-memory radio that records every call and answers like a Flower care
#[derive(Debug)]
pub struct FakeAdapter {
    power: PowerState,
    fail_at: Option<FailAt>,
    connect_delay: Duration,
    calls: Mutex<Vec<AdapterCall>>,
    stop_scan_times: Mutex<Vec<Instant>>,
    connects: AtomicUsize,
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self {
            power: PowerState::On,
            fail_at: None,
            connect_delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            stop_scan_times: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn failing_at(mut self, fail_at: FailAt) -> Self {
        self.fail_at = Some(fail_at);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn powered_off(mut self) -> Self {
        self.power = PowerState::Off;
        self
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stop_scan_times(&self) -> Vec<Instant> {
        self.stop_scan_times.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn record(&self, call: AdapterCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn fail_if(&self, step: FailAt) -> Result<(), RadioError> {
        if self.fail_at == Some(step) {
            return Err(RadioError::Bluetooth(format!("injected failure at {:?}", step)));
        }
        Ok(())
    }
}

#[async_trait]
impl RadioAdapter for FakeAdapter {
    async fn power_state(&self) -> Result<PowerState, RadioError> {
        Ok(self.power)
    }

    async fn start_scan(&self) -> Result<(), RadioError> {
        self.record(AdapterCall::StartScan);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.record(AdapterCall::StopScan);
        self.stop_scan_times.lock().unwrap().push(Instant::now());
        Ok(())
    }

    async fn connect(&self, device: &str) -> Result<(), RadioError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.record(AdapterCall::Connect(device.to_string()));
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        self.fail_if(FailAt::Connect)
    }

    async fn discover_characteristics(
        &self,
        device: &str,
        _service: &str,
        characteristics: &[&str],
    ) -> Result<Vec<CharacteristicHandle>, RadioError> {
        self.record(AdapterCall::DiscoverCharacteristics(device.to_string()));
        self.fail_if(FailAt::Discover)?;

        let battery = normalize_uuid(FLORA_BATTERY_CHARACTERISTIC);
        Ok(characteristics
            .iter()
            .enumerate()
            .filter(|(_, uuid)| {
                !(self.fail_at == Some(FailAt::MissingCharacteristic) && **uuid == battery)
            })
            .map(|(i, uuid)| CharacteristicHandle {
                device: device.to_string(),
                uuid: uuid.to_string(),
                service_id: 1,
                characteristic_id: i as u16 + 2,
            })
            .collect())
    }

    async fn write_characteristic(
        &self,
        handle: &CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), RadioError> {
        self.record(AdapterCall::Write(handle.uuid.clone(), value.to_vec()));
        self.fail_if(FailAt::Write)
    }

    async fn read_characteristic(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<Vec<u8>, RadioError> {
        self.record(AdapterCall::Read(handle.uuid.clone()));
        if handle.uuid == normalize_uuid(FLORA_BATTERY_CHARACTERISTIC) {
            self.fail_if(FailAt::BatteryRead)?;
            Ok(FLORA_BATTERY.to_vec())
        } else if handle.uuid == normalize_uuid(FLORA_DATA_CHARACTERISTIC) {
            self.fail_if(FailAt::DataRead)?;
            if self.fail_at == Some(FailAt::ShortData) {
                return Ok(FLORA_DATA[..4].to_vec());
            }
            Ok(FLORA_DATA.to_vec())
        } else {
            Err(RadioError::NotFound(handle.uuid.clone()))
        }
    }

    async fn disconnect(&self, device: &str) -> Result<(), RadioError> {
        self.record(AdapterCall::Disconnect(device.to_string()));
        Ok(())
    }
}

/// Emitter that keeps every reading it is handed
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    readings: Mutex<Vec<(String, Reading)>>,
}

impl RecordingEmitter {
    pub fn readings(&self) -> Vec<(String, Reading)> {
        self.readings.lock().unwrap().clone()
    }
}

impl MetricsEmitter for RecordingEmitter {
    fn emit(&self, display_name: &str, reading: &Reading) {
        self.readings
            .lock()
            .unwrap()
            .push((display_name.to_string(), reading.clone()));
    }
}

/// Advertisement from an ATC thermometer
pub fn atc_discovery(local_name: &str, service_data: Vec<u8>) -> Discovery {
    Discovery {
        id: "A4:C1:38:9F:A9:55".to_string(),
        local_name: Some(local_name.to_string()),
        service_data,
        rssi: Some(-80),
    }
}

/// Advertisement from a Flower care sensor
pub fn flora_discovery(id: &str, rssi: i16) -> Discovery {
    Discovery {
        id: id.to_string(),
        local_name: Some("Flower care".to_string()),
        service_data: vec![0x71, 0x20, 0x98, 0x00],
        rssi: Some(rssi),
    }
}

/// 15-byte custom ATC payload
pub fn atc_custom_payload(temperature: i16, humidity: u16, battery: u8) -> Vec<u8> {
    let mut data = vec![0x55, 0xA9, 0x9F, 0x38, 0xC1, 0xA4];
    data.extend_from_slice(&temperature.to_le_bytes());
    data.extend_from_slice(&humidity.to_le_bytes());
    data.extend_from_slice(&2950u16.to_le_bytes());
    data.extend_from_slice(&[battery, 0x12, 0x04]);
    data
}
