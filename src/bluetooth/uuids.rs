//! GATT identifiers of the Flower care sensor
//!
//! Kept in canonical hyphenated form and normalized before every lookup,
//! since BlueZ reports hyphenated UUIDs while other stacks do not.

/// Data service carrying the mode, sensor data and battery characteristics
pub const FLORA_DATA_SERVICE: &str = "00001204-0000-1000-8000-00805f9b34fb";

/// Mode control: writing [`FLORA_MODE_REALTIME`] requests a fresh measurement
pub const FLORA_MODE_CHARACTERISTIC: &str = "00001a00-0000-1000-8000-00805f9b34fb";

/// Real-time sensor values
pub const FLORA_DATA_CHARACTERISTIC: &str = "00001a01-0000-1000-8000-00805f9b34fb";

/// Battery level (first byte) and firmware version
pub const FLORA_BATTERY_CHARACTERISTIC: &str = "00001a02-0000-1000-8000-00805f9b34fb";

pub const FLORA_MODE_REALTIME: [u8; 2] = [0xA0, 0x1F];

/// Strip hyphens and lowercase a UUID string
pub fn normalize_uuid(uuid: &str) -> String {
    uuid.chars()
        .filter(|c| *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}
