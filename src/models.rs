//! Sensor identities and decoded readings for both sensor families

/// Which decoding path a sensor belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorFamily {
    /// Thermometers on custom ATC firmware, telemetry in the advertisement
    Atc,
    /// Flower care plant sensors, telemetry read over GATT
    Flora,
}

/// A configured sensor: radio identity plus the name used in metric labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorIdentity {
    /// Advertised local name (ATC) or hardware address (Flora)
    pub id: String,
    pub display_name: String,
}

impl SensorIdentity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AtcReading {
    /// Local name the payload was advertised under
    pub local_name: String,
    pub temperature: f64,
    pub humidity: f64,
    pub battery: u8,
    /// Only present in the legacy advertisement format
    pub mac: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloraReading {
    pub temperature: f64,
    pub lux: u32,
    pub moisture: u8,
    pub fertility: u16,
    pub battery: u8,
    pub rssi: i16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Atc(AtcReading),
    Flora(FloraReading),
}

impl Reading {
    pub fn family(&self) -> SensorFamily {
        match self {
            Reading::Atc(_) => SensorFamily::Atc,
            Reading::Flora(_) => SensorFamily::Flora,
        }
    }
}
