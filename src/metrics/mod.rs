//! Prometheus exposition formatting and the emitter seam.
//!
//! A [`Reading`] is broken into [`MetricLine`]s labelled with the sensor's
//! display name. Emitters take it from there; the push gateway emitter is
//! the only production one.

pub mod pushgateway;

use std::fmt;

use crate::models::Reading;

/// Fire-and-forget sink for decoded readings.
///
/// Implementations must return immediately; any I/O happens in the
/// background and failures are only logged.
pub trait MetricsEmitter: Send + Sync {
    fn emit(&self, display_name: &str, reading: &Reading);
}

/// One `name{sensor="..."} value` line
#[derive(Debug, Clone, PartialEq)]
pub struct MetricLine {
    pub name: &'static str,
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

impl MetricLine {
    fn sensor(name: &'static str, display_name: &str, value: f64) -> Self {
        Self {
            name,
            labels: vec![("sensor", display_name.to_string())],
            value,
        }
    }
}

impl fmt::Display for MetricLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.labels.is_empty() {
            write!(f, "{{")?;
            for (i, (key, value)) in self.labels.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}=\"{}\"", key, escape_label_value(value))?;
            }
            write!(f, "}}")?;
        }
        write!(f, " {}", self.value)
    }
}

/// Break a reading into metric lines for one sensor
pub fn metric_lines(display_name: &str, reading: &Reading) -> Vec<MetricLine> {
    match reading {
        Reading::Atc(r) => vec![
            MetricLine::sensor("mi_temperature", display_name, r.temperature),
            MetricLine::sensor("mi_humidity", display_name, r.humidity),
            MetricLine::sensor("mi_battery", display_name, f64::from(r.battery)),
        ],
        Reading::Flora(r) => vec![
            MetricLine::sensor("mi_flora_temperature", display_name, r.temperature),
            MetricLine::sensor("mi_flora_lux", display_name, f64::from(r.lux)),
            MetricLine::sensor("mi_flora_moisture", display_name, f64::from(r.moisture)),
            MetricLine::sensor("mi_flora_fertility", display_name, f64::from(r.fertility)),
            MetricLine::sensor("mi_flora_rssi", display_name, f64::from(r.rssi)),
            MetricLine::sensor("mi_flora_battery", display_name, f64::from(r.battery)),
        ],
    }
}

/// Render a reading as a push body, every line newline-terminated
pub fn format_reading(display_name: &str, reading: &Reading) -> String {
    metric_lines(display_name, reading)
        .iter()
        .map(|line| format!("{}\n", line))
        .collect()
}

/// Escape special characters in Prometheus label values.
fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AtcReading, FloraReading};

    fn flora_reading() -> Reading {
        Reading::Flora(FloraReading {
            temperature: 24.5,
            lux: 10_000,
            moisture: 30,
            fertility: 200,
            battery: 99,
            rssi: -71,
        })
    }

    #[test]
    fn test_atc_reading_lines() {
        let reading = Reading::Atc(AtcReading {
            local_name: "ATC_9FA955".to_string(),
            temperature: 25.0,
            humidity: 50.0,
            battery: 80,
            mac: None,
        });
        assert_eq!(
            format_reading("mi_out", &reading),
            "mi_temperature{sensor=\"mi_out\"} 25\n\
             mi_humidity{sensor=\"mi_out\"} 50\n\
             mi_battery{sensor=\"mi_out\"} 80\n"
        );
    }

    #[test]
    fn test_flora_reading_lines() {
        let body = format_reading("miflora_sensor_x", &flora_reading());
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(
            lines,
            vec![
                "mi_flora_temperature{sensor=\"miflora_sensor_x\"} 24.5",
                "mi_flora_lux{sensor=\"miflora_sensor_x\"} 10000",
                "mi_flora_moisture{sensor=\"miflora_sensor_x\"} 30",
                "mi_flora_fertility{sensor=\"miflora_sensor_x\"} 200",
                "mi_flora_rssi{sensor=\"miflora_sensor_x\"} -71",
                "mi_flora_battery{sensor=\"miflora_sensor_x\"} 99",
            ]
        );
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_fractional_values_keep_precision() {
        let reading = Reading::Atc(AtcReading {
            local_name: "ATC_9FA955".to_string(),
            temperature: f64::from(2215i16) / 100.0,
            humidity: 43.0,
            battery: 7,
            mac: Some("a4:c1:38:9f:a9:55".to_string()),
        });
        assert!(format_reading("x", &reading).starts_with("mi_temperature{sensor=\"x\"} 22.15\n"));
    }

    #[test]
    fn test_label_values_are_escaped() {
        let line = MetricLine::sensor("mi_battery", "a \"quoted\"\\name", 1.0);
        assert_eq!(
            line.to_string(),
            "mi_battery{sensor=\"a \\\"quoted\\\"\\\\name\"} 1"
        );
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("hello"), "hello");
        assert_eq!(escape_label_value("hello\nworld"), "hello\\nworld");
    }
}
