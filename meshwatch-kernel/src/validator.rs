/**
 * VALIDATOR - Contrôles structurels sur topic + payload bruts
 *
 * RÔLE : Filtrer les messages du bus avant tout parsing métier.
 * Retourne l'objet JSON décodé pour éviter un second décodage.
 *
 * ORDRE DES CONTRÔLES :
 * topic vide → topic trop long → NUL dans le topic → payload vide →
 * payload trop gros → pas "JSON-like" → JSON invalide → pas un objet → pas de `from`
 */

use serde_json::{Map, Value};

use crate::error::ValidationError;

pub const MAX_TOPIC_LEN: usize = 256;
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Objet JSON décodé d'un message accepté.
pub type Envelope = Map<String, Value>;

/// Valide un message brut et retourne l'enveloppe JSON décodée.
pub fn validate(topic: &str, payload: &[u8]) -> Result<Envelope, ValidationError> {
    if topic.is_empty() {
        return Err(ValidationError::EmptyTopic);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(ValidationError::TopicTooLong(topic.len()));
    }
    if topic.contains('\0') {
        return Err(ValidationError::TopicContainsNul);
    }
    if payload.is_empty() {
        return Err(ValidationError::EmptyPayload);
    }
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(ValidationError::PayloadTooLarge(payload.len()));
    }
    if !looks_like_json(payload) {
        return Err(ValidationError::NotJsonLike);
    }

    let value: Value = serde_json::from_slice(payload)?;
    let Value::Object(envelope) = value else {
        return Err(ValidationError::NotAnObject);
    };
    if !envelope.contains_key("from") {
        return Err(ValidationError::MissingSender);
    }
    Ok(envelope)
}

/// Premier octet non blanc = `{` ou `[`
fn looks_like_json(payload: &[u8]) -> bool {
    payload
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{' || *b == b'[')
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "msh/US/2/json/LongFast/!abcd1234";

    #[test]
    fn test_accepts_minimal_object() {
        let env = validate(TOPIC, br#"{"from": 42}"#).unwrap();
        assert_eq!(env["from"], 42);
    }

    #[test]
    fn test_topic_checks() {
        assert!(matches!(validate("", b"{}"), Err(ValidationError::EmptyTopic)));
        let long = "a".repeat(MAX_TOPIC_LEN + 1);
        assert!(matches!(
            validate(&long, b"{}"),
            Err(ValidationError::TopicTooLong(257))
        ));
        assert!(matches!(
            validate("msh/\0/x", b"{}"),
            Err(ValidationError::TopicContainsNul)
        ));
        let max = "a".repeat(MAX_TOPIC_LEN);
        assert!(validate(&max, br#"{"from":1}"#).is_ok());
    }

    #[test]
    fn test_payload_size_checks() {
        assert!(matches!(validate(TOPIC, b""), Err(ValidationError::EmptyPayload)));
        let big = vec![b' '; MAX_PAYLOAD_BYTES + 1];
        assert!(matches!(
            validate(TOPIC, &big),
            Err(ValidationError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_plain_text_is_not_json_like() {
        assert!(matches!(
            validate(TOPIC, b"plain text"),
            Err(ValidationError::NotJsonLike)
        ));
        assert!(matches!(
            validate(TOPIC, b"   \n\t"),
            Err(ValidationError::NotJsonLike)
        ));
    }

    #[test]
    fn test_leading_whitespace_is_allowed() {
        assert!(validate(TOPIC, b"  \n {\"from\": 7}").is_ok());
    }

    #[test]
    fn test_malformed_json_is_a_hard_error() {
        assert!(matches!(
            validate(TOPIC, b"{\"from\": "),
            Err(ValidationError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_array_and_missing_from() {
        assert!(matches!(
            validate(TOPIC, b"[1, 2]"),
            Err(ValidationError::NotAnObject)
        ));
        assert!(matches!(
            validate(TOPIC, br#"{"type": "telemetry"}"#),
            Err(ValidationError::MissingSender)
        ));
    }
}
