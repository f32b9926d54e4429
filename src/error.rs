/// Error types for the discovery, session and push pipeline
///
/// None of these are process-fatal except `ConfigError` at startup and a
/// closed discovery stream. Everything else is logged where it happens and
/// the affected reading or session run is dropped.
use std::time::Duration;
use thiserror::Error;

/// Malformed or short payload. Drop the payload and carry on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("payload truncated: needed {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
}

/// Errors raised by the radio adapter implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RadioError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    #[error("invalid device address: {0}")]
    InvalidAddress(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<bluer::Error> for RadioError {
    fn from(err: bluer::Error) -> Self {
        RadioError::Bluetooth(err.to_string())
    }
}

/// Device unreachable or connection attempt timed out.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("connecting to {device} timed out after {after:?}")]
    Timeout { device: String, after: Duration },
    #[error("failed to connect to {device}: {source}")]
    Failed {
        device: String,
        #[source]
        source: RadioError,
    },
}

/// Missing service/characteristic or failed characteristic I/O.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("service discovery failed: {0}")]
    ServiceDiscovery(RadioError),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(&'static str),
    #[error("writing {characteristic} failed: {source}")]
    WriteFailed {
        characteristic: &'static str,
        #[source]
        source: RadioError,
    },
    #[error("reading {characteristic} failed: {source}")]
    ReadFailed {
        characteristic: &'static str,
        #[source]
        source: RadioError,
    },
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// A failed run of a connectable-device session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Collector unreachable or rejected the push. Logged, never retried.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("invalid push URL: {0}")]
    InvalidUrl(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("push gateway returned error {status}: {body}")]
    Response { status: u16, body: String },
}

/// Failures of the scan scheduler itself.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Radio(#[from] RadioError),
    #[error("discovery stream closed")]
    DiscoveryClosed,
}

/// Startup configuration problems. These terminate the process.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid sensor entry '{0}': expected id,displayName")]
    InvalidSensorEntry(String),
    #[error("No sensors configured. Please set ATC_SENSORS and/or FLORA_SENSORS")]
    NoSensors,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_is_transparent() {
        let err: SessionError = DecodeError::Truncated {
            needed: 10,
            actual: 4,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "payload truncated: needed 10 bytes, got 4"
        );
    }

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::Failed {
            device: "c4:7c:8d:6d:b3:73".to_string(),
            source: RadioError::Bluetooth("Software caused connection abort".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to c4:7c:8d:6d:b3:73: Bluetooth error: Software caused connection abort"
        );
    }

    #[test]
    fn test_push_error_display() {
        let err = PushError::Response {
            status: 400,
            body: "text format parsing error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "push gateway returned error 400: text format parsing error"
        );
    }
}
