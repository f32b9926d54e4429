//! Static mapping from radio identity to configured sensor.
//!
//! ATC thermometers are keyed by their advertised local name (`ATC_9FA955`),
//! Flower care sensors by hardware address. Both collections are built once
//! at startup and never change afterwards.

use std::collections::HashMap;

use crate::config::SensorConfig;
use crate::models::{SensorFamily, SensorIdentity};

/// Local name prefix advertised by thermometers running the ATC firmware
pub const ATC_NAME_PREFIX: &str = "ATC";

/// Local name advertised by Flower care plant sensors
pub const FLORA_LOCAL_NAME: &str = "Flower care";

#[derive(Debug, Default)]
pub struct SensorRegistry {
    atc: HashMap<String, SensorIdentity>,
    flora: HashMap<String, SensorIdentity>,
}

impl SensorRegistry {
    pub fn new(atc: Vec<SensorIdentity>, flora: Vec<SensorIdentity>) -> Self {
        Self {
            atc: atc.into_iter().map(|s| (s.id.clone(), s)).collect(),
            flora: flora
                .into_iter()
                .map(|s| (normalize_address(&s.id), s))
                .collect(),
        }
    }

    pub fn from_config(config: &SensorConfig) -> Self {
        Self::new(config.atc_sensors.clone(), config.flora_sensors.clone())
    }

    /// Look up an ATC thermometer by its exact advertised name
    pub fn atc(&self, local_name: &str) -> Option<&SensorIdentity> {
        self.atc.get(local_name)
    }

    /// Look up a Flower care sensor by address, ignoring case
    pub fn flora(&self, address: &str) -> Option<&SensorIdentity> {
        self.flora.get(&normalize_address(address))
    }

    pub fn len(&self, family: SensorFamily) -> usize {
        match family {
            SensorFamily::Atc => self.atc.len(),
            SensorFamily::Flora => self.flora.len(),
        }
    }
}

/// Which family an advertised local name belongs to, if any
pub fn classify(local_name: &str) -> Option<SensorFamily> {
    if local_name.starts_with(ATC_NAME_PREFIX) {
        Some(SensorFamily::Atc)
    } else if local_name == FLORA_LOCAL_NAME {
        Some(SensorFamily::Flora)
    } else {
        None
    }
}

fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}
