//! Sensor packet model.
//!
//! Sensors of different hardware revisions report different subsets of fields, so a
//! packet carries a sparse map over a closed set of well-known numeric keys instead of a
//! fixed record. Keys the gateway does not know are dropped at decode time.

use crate::error::{GatewayError, GatewayResult};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known numeric fields a sensor may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    /// Battery reading in millivolts
    Battery,
    /// Air temperature (°C)
    Temperature,
    /// Relative humidity (%)
    Humidity,
    /// Light intensity (lux)
    Light,
    /// Barometric pressure (mbar)
    BarometricPressure,
    /// Temperature of the barometric sensor (°C)
    BarometricTemperature,
    /// Received signal strength of the last hop (dBm)
    Rssi,
}

impl FieldKey {
    /// Every key, in wire-name order.
    pub const ALL: [FieldKey; 7] = [
        FieldKey::Battery,
        FieldKey::Temperature,
        FieldKey::Humidity,
        FieldKey::Light,
        FieldKey::BarometricPressure,
        FieldKey::BarometricTemperature,
        FieldKey::Rssi,
    ];

    /// Name used on the wire and in stored documents.
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKey::Battery => "battery",
            FieldKey::Temperature => "temperature",
            FieldKey::Humidity => "humidity",
            FieldKey::Light => "light",
            FieldKey::BarometricPressure => "barometric_pressure",
            FieldKey::BarometricTemperature => "barometric_temperature",
            FieldKey::Rssi => "rssi",
        }
    }

    /// Look a key up by wire name; `barometric_temp` is accepted for older firmware.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "barometric_temp" => Some(FieldKey::BarometricTemperature),
            other => Self::ALL.into_iter().find(|key| key.as_str() == other),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sparse map of the fields present in one reading.
pub type SensorFields = BTreeMap<FieldKey, f64>;

const ADDRESS_KEYS: [&str; 3] = ["address", "LLA", "ipv6"];
const SEQUENCE_KEYS: [&str; 3] = ["packet_number", "seq", "sequence"];

/// A decoded reading from one sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorPacket {
    /// Stable wireless identity of the sensor; never empty
    pub address: String,
    /// Sequence number assigned by the sensor
    pub sequence: u64,
    /// When the gateway received the packet
    pub received_at: DateTime<Local>,
    /// Fields present in this packet
    pub fields: SensorFields,
}

impl SensorPacket {
    /// Build a packet directly, rejecting an empty address.
    pub fn new(
        address: impl Into<String>,
        sequence: u64,
        received_at: DateTime<Local>,
        fields: SensorFields,
    ) -> GatewayResult<Self> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(GatewayError::InvalidPacket("empty address".to_string()));
        }
        Ok(Self {
            address,
            sequence,
            received_at,
            fields,
        })
    }

    /// Decode a framed JSON object into a packet.
    ///
    /// Numeric values may arrive as JSON numbers or numeric strings. Non-numeric values and
    /// unknown keys are skipped.
    pub fn from_json(value: &Value, received_at: DateTime<Local>) -> GatewayResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| GatewayError::InvalidPacket("frame is not an object".to_string()))?;

        let address = ADDRESS_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str))
            .ok_or_else(|| GatewayError::InvalidPacket("missing address".to_string()))?;

        let sequence = SEQUENCE_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(as_sequence))
            .ok_or_else(|| {
                GatewayError::InvalidPacket(format!("missing sequence number from {address}"))
            })?;

        Self::new(address, sequence, received_at, decode_fields(object))
    }

    /// Value of one field, if present.
    pub fn field(&self, key: FieldKey) -> Option<f64> {
        self.fields.get(&key).copied()
    }
}

fn as_sequence(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn decode_fields(object: &Map<String, Value>) -> SensorFields {
    let mut fields = SensorFields::new();
    for (name, value) in object {
        if ADDRESS_KEYS.contains(&name.as_str()) || SEQUENCE_KEYS.contains(&name.as_str()) {
            continue;
        }
        match (FieldKey::from_wire(name), as_number(value)) {
            (Some(key), Some(number)) => {
                fields.insert(key, number);
            }
            _ => tracing::trace!(field = %name, "Ignoring unrecognised packet field"),
        }
    }
    fields
}

/// Render a field map as a JSON object keyed by wire name.
pub fn fields_to_json(fields: &SensorFields) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.as_str().to_string(), Value::from(*value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_full_packet() {
        let frame = json!({
            "address": "fd00::1",
            "packet_number": 17,
            "battery": 2980,
            "temperature": 21.5,
            "light": "340.0",
            "firmware": "v2.1"
        });
        let packet = SensorPacket::from_json(&frame, Local::now()).unwrap();
        assert_eq!(packet.address, "fd00::1");
        assert_eq!(packet.sequence, 17);
        assert_eq!(packet.field(FieldKey::Battery), Some(2980.0));
        assert_eq!(packet.field(FieldKey::Temperature), Some(21.5));
        assert_eq!(packet.field(FieldKey::Light), Some(340.0));
        assert_eq!(packet.fields.len(), 3);
    }

    #[test]
    fn test_decode_aliases() {
        let frame = json!({"LLA": "fd00::2", "seq": "9", "barometric_temp": 19.0});
        let packet = SensorPacket::from_json(&frame, Local::now()).unwrap();
        assert_eq!(packet.address, "fd00::2");
        assert_eq!(packet.sequence, 9);
        assert_eq!(packet.field(FieldKey::BarometricTemperature), Some(19.0));
    }

    #[test]
    fn test_missing_address_rejected() {
        let frame = json!({"packet_number": 1, "battery": 3000});
        assert!(matches!(
            SensorPacket::from_json(&frame, Local::now()),
            Err(GatewayError::InvalidPacket(_))
        ));
    }

    #[test]
    fn test_empty_address_rejected() {
        let frame = json!({"address": "  ", "packet_number": 1});
        assert!(SensorPacket::from_json(&frame, Local::now()).is_err());
    }

    #[test]
    fn test_missing_sequence_rejected() {
        let frame = json!({"address": "fd00::3", "battery": 3000});
        let err = SensorPacket::from_json(&frame, Local::now()).unwrap_err();
        assert!(err.to_string().contains("fd00::3"));
    }

    #[test]
    fn test_fields_to_json_uses_wire_names() {
        let mut fields = SensorFields::new();
        fields.insert(FieldKey::BarometricPressure, 1013.2);
        let json = fields_to_json(&fields);
        assert_eq!(json.get("barometric_pressure"), Some(&json!(1013.2)));
    }
}
