use log::{debug, info};
use std::env;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;
use crate::models::SensorIdentity;
use crate::utils::parse_duration;

const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(25);
const DEFAULT_SESSION_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub atc_sensors: Vec<SensorIdentity>,
    pub flora_sensors: Vec<SensorIdentity>,
    pub pushgateway_url: Url,
    pub scan_interval: Duration,
    pub scan_window: Duration,
    pub session_interval: Duration,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub push_timeout: Duration,
    pub max_consecutive_failures: Option<u32>,
}

impl SensorConfig {
    pub fn new() -> Result<Self, ConfigError> {
        // Load environment variables
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_url = lookup("PUSHGATEWAY_URL").ok_or(ConfigError::Missing("PUSHGATEWAY_URL"))?;
        let pushgateway_url = parse_base_url(&raw_url)?;

        let atc_sensors = parse_sensor_list(&lookup("ATC_SENSORS").unwrap_or_default())?;
        let flora_sensors = parse_sensor_list(&lookup("FLORA_SENSORS").unwrap_or_default())?
            .into_iter()
            .map(|sensor| SensorIdentity::new(sensor.id.to_lowercase(), sensor.display_name))
            .collect::<Vec<_>>();

        let duration = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(key) {
                Some(value) => parse_duration(&value).map_err(|reason| ConfigError::Invalid {
                    key,
                    value,
                    reason,
                }),
                None => Ok(default),
            }
        };

        let scan_interval = duration("SCAN_INTERVAL", DEFAULT_SCAN_INTERVAL)?;
        let scan_window = duration("SCAN_WINDOW", DEFAULT_SCAN_WINDOW)?;
        let session_interval = duration("SESSION_INTERVAL", DEFAULT_SESSION_INTERVAL)?;
        let connect_timeout = duration("CONNECT_TIMEOUT", DEFAULT_CONNECT_TIMEOUT)?;
        let operation_timeout = duration("OPERATION_TIMEOUT", DEFAULT_OPERATION_TIMEOUT)?;
        let push_timeout = duration("PUSH_TIMEOUT", DEFAULT_PUSH_TIMEOUT)?;

        if scan_window.is_zero() || scan_window > scan_interval {
            return Err(ConfigError::Invalid {
                key: "SCAN_WINDOW",
                value: format!("{:?}", scan_window),
                reason: format!("must be non-zero and at most SCAN_INTERVAL ({:?})", scan_interval),
            });
        }
        for (key, value) in [
            ("SCAN_INTERVAL", scan_interval),
            ("SESSION_INTERVAL", session_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    key,
                    value: format!("{:?}", value),
                    reason: "must be non-zero".to_string(),
                });
            }
        }

        let max_consecutive_failures = match lookup("FLORA_MAX_FAILURES") {
            Some(value) => Some(value.trim().parse::<u32>().ok().filter(|n| *n > 0).ok_or_else(
                || ConfigError::Invalid {
                    key: "FLORA_MAX_FAILURES",
                    value: value.clone(),
                    reason: "expected a positive integer".to_string(),
                },
            )?),
            None => None,
        };

        info!(
            "Total sensors loaded: {} ATC, {} Flower care",
            atc_sensors.len(),
            flora_sensors.len()
        );
        for sensor in atc_sensors.iter().chain(flora_sensors.iter()) {
            debug!("Sensor: {} -> {}", sensor.id, sensor.display_name);
        }

        if atc_sensors.is_empty() && flora_sensors.is_empty() {
            return Err(ConfigError::NoSensors);
        }

        Ok(SensorConfig {
            atc_sensors,
            flora_sensors,
            pushgateway_url,
            scan_interval,
            scan_window,
            session_interval,
            connect_timeout,
            operation_timeout,
            push_timeout,
            max_consecutive_failures,
        })
    }
}

/// Parse a `;`-separated list of `id,displayName` pairs
pub fn parse_sensor_list(src: &str) -> Result<Vec<SensorIdentity>, ConfigError> {
    let mut sensors = Vec::new();
    for entry in src.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (id, name) = entry
            .split_once(',')
            .ok_or_else(|| ConfigError::InvalidSensorEntry(entry.to_string()))?;
        let (id, name) = (id.trim(), name.trim());
        if id.is_empty() || name.is_empty() {
            return Err(ConfigError::InvalidSensorEntry(entry.to_string()));
        }
        sensors.push(SensorIdentity::new(id, name));
    }
    Ok(sensors)
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key: "PUSHGATEWAY_URL",
        value: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(invalid("expected an http:// or https:// URL".to_string()));
    }
    Ok(url)
}
