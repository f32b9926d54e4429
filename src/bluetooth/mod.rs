//! Bluetooth LE side of the pipeline.
//!
//! [`RadioAdapter`] is the only way the scanner and the sessions touch the
//! radio, so both can be driven by a fake in tests. Discovery events are not
//! returned from `start_scan`; they arrive on the single receiver handed out
//! when the adapter is created and keep flowing for the life of the process.

pub mod adapter;
pub mod decoder;
pub mod scanner;
pub mod session;
pub mod uuids;

use async_trait::async_trait;

use crate::error::RadioError;

/// Channel buffer size for discovery events.
pub const DISCOVERY_CHANNEL_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

/// One advertisement seen while scanning
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    /// Hardware address as reported by the radio stack
    pub id: String,
    pub local_name: Option<String>,
    /// First service data entry of the advertisement, empty if none
    pub service_data: Vec<u8>,
    pub rssi: Option<i16>,
}

/// Opaque reference to a characteristic resolved during service discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub device: String,
    /// Normalized (unhyphenated, lowercase) characteristic UUID
    pub uuid: String,
    pub service_id: u16,
    pub characteristic_id: u16,
}

#[async_trait]
pub trait RadioAdapter: Send + Sync {
    async fn power_state(&self) -> Result<PowerState, RadioError>;

    async fn start_scan(&self) -> Result<(), RadioError>;

    async fn stop_scan(&self) -> Result<(), RadioError>;

    async fn connect(&self, device: &str) -> Result<(), RadioError>;

    /// Resolve the given characteristics of one service.
    ///
    /// Returns only the characteristics that were found; callers decide
    /// whether a missing one is fatal. All UUIDs are in normalized form.
    async fn discover_characteristics(
        &self,
        device: &str,
        service: &str,
        characteristics: &[&str],
    ) -> Result<Vec<CharacteristicHandle>, RadioError>;

    async fn write_characteristic(
        &self,
        handle: &CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), RadioError>;

    async fn read_characteristic(&self, handle: &CharacteristicHandle)
        -> Result<Vec<u8>, RadioError>;

    async fn disconnect(&self, device: &str) -> Result<(), RadioError>;
}
