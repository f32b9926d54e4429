/// Decoding of ATC advertisements and Flower care characteristic values
use crate::error::DecodeError;
use crate::models::AtcReading;

/// Length of the custom (pvvx) ATC advertisement
const ATC_CUSTOM_LEN: usize = 15;

/// Minimum length of the legacy (atc1441) ATC advertisement
const ATC_LEGACY_MIN_LEN: usize = 10;

/// Minimum length of the Flower care real-time data characteristic
const FLORA_DATA_MIN_LEN: usize = 10;

/// Values read from the Flower care data characteristic
#[derive(Debug, Clone, PartialEq)]
pub struct FloraData {
    pub temperature: f64,
    pub lux: u32,
    pub moisture: u8,
    pub fertility: u16,
}

/// Decode ATC thermometer service data into a reading
///
/// The payload layout is chosen by length alone:
/// - 15 bytes (custom format):
///   - Bytes 6-7: Temperature (signed 16-bit LE, 0.01°C)
///   - Bytes 8-9: Humidity (unsigned 16-bit LE, 0.01%)
///   - Byte 12: Battery percent
/// - Anything else (legacy format):
///   - Bytes 0-5: MAC address, least significant byte first
///   - Bytes 6-7: Temperature (signed 16-bit BE, 0.1°C)
///   - Byte 8: Humidity percent
///   - Byte 9: Battery percent
///
/// `local_name` does not affect decoding; it is carried on the reading so
/// log lines can name the advertiser.
pub fn decode_atc_data(data: &[u8], local_name: &str) -> Result<AtcReading, DecodeError> {
    if data.len() == ATC_CUSTOM_LEN {
        return Ok(AtcReading {
            local_name: local_name.to_string(),
            temperature: f64::from(i16::from_le_bytes([data[6], data[7]])) / 100.0,
            humidity: f64::from(u16::from_le_bytes([data[8], data[9]])) / 100.0,
            battery: data[12],
            mac: None,
        });
    }

    ensure_len(data, ATC_LEGACY_MIN_LEN)?;

    // Rendered most significant byte first
    let mac = data[..6]
        .iter()
        .rev()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":");

    Ok(AtcReading {
        local_name: local_name.to_string(),
        temperature: f64::from(i16::from_be_bytes([data[6], data[7]])) / 10.0,
        humidity: f64::from(data[8]),
        battery: data[9],
        mac: Some(mac),
    })
}

/// Decode the Flower care real-time data characteristic
///
/// - Bytes 0-1: Temperature (signed 16-bit LE, 0.1°C)
/// - Byte 2: Unused
/// - Bytes 3-6: Light intensity in lux (unsigned 32-bit LE)
/// - Byte 7: Soil moisture percent
/// - Bytes 8-9: Soil fertility in µS/cm (unsigned 16-bit LE)
pub fn decode_flora_data(data: &[u8]) -> Result<FloraData, DecodeError> {
    ensure_len(data, FLORA_DATA_MIN_LEN)?;

    Ok(FloraData {
        temperature: f64::from(i16::from_le_bytes([data[0], data[1]])) / 10.0,
        lux: u32::from_le_bytes([data[3], data[4], data[5], data[6]]),
        moisture: data[7],
        fertility: u16::from_le_bytes([data[8], data[9]]),
    })
}

/// Battery percent is the first byte of the battery characteristic
pub fn decode_flora_battery(data: &[u8]) -> Result<u8, DecodeError> {
    ensure_len(data, 1)?;
    Ok(data[0])
}

fn ensure_len(data: &[u8], needed: usize) -> Result<(), DecodeError> {
    if data.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            actual: data.len(),
        });
    }
    Ok(())
}
