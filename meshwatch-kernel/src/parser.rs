/**
 * PARSER - Décodage de l'enveloppe mesh + classification télémétrie
 *
 * RÔLE : Transforme l'enveloppe JSON validée en `ParsedMessage` typé.
 * Le `Map` JSON s'arrête ici : la suite du pipeline ne voit que des champs typés.
 *
 * CLASSIFICATION (ordre significatif) :
 * temperature | relative_humidity | barometric_pressure → environment
 * sinon chN_voltage | chN_current                      → power
 * sinon                                                → device
 */

use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::models::{unix_now, MessageType, ParsedMessage, PayloadFields, TelemetrySubtype};
use crate::validator::Envelope;

const ENVIRONMENT_KEYS: [&str; 3] = ["temperature", "relative_humidity", "barometric_pressure"];
const POWER_KEYS: [&str; 6] = [
    "ch1_voltage",
    "ch1_current",
    "ch2_voltage",
    "ch2_current",
    "ch3_voltage",
    "ch3_current",
];

/// Parse une enveloppe validée.
pub fn parse(envelope: &Envelope) -> Result<ParsedMessage, ValidationError> {
    let from = sender_id(envelope)?;

    let message_type = envelope
        .get("type")
        .and_then(Value::as_str)
        .map(MessageType::from_wire)
        .unwrap_or_else(|| MessageType::Other(String::new()));

    let empty = Map::new();
    let payload = envelope
        .get("payload")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let timestamp = envelope
        .get("timestamp")
        .and_then(Value::as_i64)
        .filter(|ts| *ts > 0)
        .unwrap_or_else(unix_now);

    Ok(ParsedMessage {
        from,
        message_type,
        subtype: classify(payload),
        fields: decode_fields(payload),
        rssi: number(envelope, "rssi"),
        snr: number(envelope, "snr"),
        timestamp,
    })
}

/// Sous-type de télémétrie d'après les clés présentes.
pub fn classify(payload: &Map<String, Value>) -> TelemetrySubtype {
    if ENVIRONMENT_KEYS.iter().any(|k| payload.contains_key(*k)) {
        TelemetrySubtype::Environment
    } else if POWER_KEYS.iter().any(|k| payload.contains_key(*k)) {
        TelemetrySubtype::Power
    } else {
        TelemetrySubtype::Device
    }
}

fn sender_id(envelope: &Envelope) -> Result<u32, ValidationError> {
    let raw = envelope.get("from").ok_or(ValidationError::MissingSender)?;
    let id = match raw {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u
            } else if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0) {
                f as u64
            } else {
                return Err(ValidationError::InvalidSender(n.to_string()));
            }
        }
        other => return Err(ValidationError::InvalidSender(other.to_string())),
    };
    let id = u32::try_from(id).map_err(|_| ValidationError::InvalidSender(id.to_string()))?;
    if id == 0 {
        return Err(ValidationError::ZeroSender);
    }
    Ok(id)
}

fn decode_fields(payload: &Map<String, Value>) -> PayloadFields {
    PayloadFields {
        battery_level: number(payload, "battery_level"),
        voltage: number(payload, "voltage"),
        uptime_seconds: number(payload, "uptime_seconds"),
        temperature: number(payload, "temperature"),
        relative_humidity: number(payload, "relative_humidity"),
        barometric_pressure: number(payload, "barometric_pressure"),
        channel_utilization: number(payload, "channel_utilization"),
        air_util_tx: number(payload, "air_util_tx"),
        rssi: number(payload, "rssi"),
        snr: number(payload, "snr"),
        long_name: text(payload, "longname"),
        short_name: text(payload, "shortname"),
        hardware: code(payload, "hardware"),
        role: code(payload, "role"),
    }
}

fn number(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key).and_then(Value::as_f64).filter(|v| v.is_finite())
}

fn text(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Codes numériques → entier décimal ("1.0" → "1"), chaînes gardées telles quelles
fn code(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite())
                    .map(|f| format!("{}", f.trunc() as i64))
            }
        }
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: Value) -> Envelope {
        match value {
            Value::Object(map) => map,
            _ => panic!("test envelope must be an object"),
        }
    }

    fn payload(value: Value) -> Map<String, Value> {
        envelope(value)
    }

    #[test]
    fn test_parse_telemetry_envelope() {
        let msg = parse(&envelope(json!({
            "from": 123456789,
            "type": "telemetry",
            "timestamp": 1_700_000_000,
            "rssi": -92,
            "payload": {"battery_level": 85.5, "voltage": 4.1}
        })))
        .unwrap();

        assert_eq!(msg.from, 123456789);
        assert_eq!(msg.node_id(), "123456789");
        assert_eq!(msg.message_type, MessageType::Telemetry);
        assert_eq!(msg.subtype, TelemetrySubtype::Device);
        assert_eq!(msg.timestamp, 1_700_000_000);
        assert_eq!(msg.rssi, Some(-92.0));
        assert_eq!(msg.snr, None);
        assert_eq!(msg.fields.battery_level, Some(85.5));
    }

    #[test]
    fn test_broadcast_id_round_trips() {
        let msg = parse(&envelope(json!({"from": 4294967295u64, "type": "telemetry"}))).unwrap();
        assert_eq!(msg.node_id(), "4294967295");
    }

    #[test]
    fn test_sender_validation() {
        assert!(matches!(
            parse(&envelope(json!({"from": 0, "type": "telemetry"}))),
            Err(ValidationError::ZeroSender)
        ));
        assert!(matches!(
            parse(&envelope(json!({"from": "invalid", "type": "telemetry"}))),
            Err(ValidationError::InvalidSender(_))
        ));
        assert!(matches!(
            parse(&envelope(json!({"from": -5}))),
            Err(ValidationError::InvalidSender(_))
        ));
        assert!(matches!(
            parse(&envelope(json!({"from": 4294967296u64}))),
            Err(ValidationError::InvalidSender(_))
        ));
        assert!(matches!(
            parse(&envelope(json!({"from": 1.5}))),
            Err(ValidationError::InvalidSender(_))
        ));
        assert_eq!(parse(&envelope(json!({"from": 42.0}))).unwrap().from, 42);
    }

    #[test]
    fn test_missing_type_is_other() {
        let msg = parse(&envelope(json!({"from": 7}))).unwrap();
        assert_eq!(msg.message_type, MessageType::Other(String::new()));
    }

    #[test]
    fn test_classify_battery_only_is_device() {
        assert_eq!(classify(&payload(json!({"battery_level": 50}))), TelemetrySubtype::Device);
        assert_eq!(classify(&Map::new()), TelemetrySubtype::Device);
    }

    #[test]
    fn test_classify_temperature_wins() {
        let p = payload(json!({"temperature": 20.0, "ch1_voltage": 5.0, "battery_level": 10}));
        assert_eq!(classify(&p), TelemetrySubtype::Environment);
        let p = payload(json!({"barometric_pressure": 1013.2}));
        assert_eq!(classify(&p), TelemetrySubtype::Environment);
    }

    #[test]
    fn test_classify_power() {
        assert_eq!(classify(&payload(json!({"ch2_current": 0.3}))), TelemetrySubtype::Power);
        assert_eq!(classify(&payload(json!({"ch3_voltage": 12.1}))), TelemetrySubtype::Power);
    }

    #[test]
    fn test_bad_field_is_skipped() {
        let msg = parse(&envelope(json!({
            "from": 9,
            "type": "telemetry",
            "payload": {"battery_level": "full", "voltage": 3.9, "unknown_key": true}
        })))
        .unwrap();
        assert_eq!(msg.fields.battery_level, None);
        assert_eq!(msg.fields.voltage, Some(3.9));
    }

    #[test]
    fn test_node_info_codes() {
        let msg = parse(&envelope(json!({
            "from": 123456789,
            "type": "nodeinfo",
            "payload": {"longname": "Test Node", "shortname": "TN01", "hardware": 1.0, "role": 2.0}
        })))
        .unwrap();
        assert_eq!(msg.message_type, MessageType::NodeInfo);
        assert_eq!(msg.fields.long_name.as_deref(), Some("Test Node"));
        assert_eq!(msg.fields.hardware.as_deref(), Some("1"));
        assert_eq!(msg.fields.role.as_deref(), Some("2"));

        let p = payload(json!({"hardware": "TBEAM", "role": null}));
        assert_eq!(code(&p, "hardware").as_deref(), Some("TBEAM"));
        assert_eq!(code(&p, "role"), None);
    }

    #[test]
    fn test_non_object_payload_is_empty() {
        let msg = parse(&envelope(json!({"from": 3, "type": "telemetry", "payload": "hello"}))).unwrap();
        assert_eq!(msg.subtype, TelemetrySubtype::Device);
        assert_eq!(msg.fields, PayloadFields::default());
    }
}
