//! Best-effort extraction of the structured intent from a partial or
//! complete LLM JSON payload (spec §4.8 step 4, §9 "Dynamic JSON
//! streaming").
//!
//! The upstream LLM is instructed to emit a single JSON object matching
//! [`crate::protocol::StructuredIntent`], but the bridge needs
//! `spoken_response` *before* that object has finished streaming, so it can
//! hand the first sentence to TTS as soon as a sentence boundary appears in
//! it. We do not adopt a streaming-JSON parser (spec explicitly advises
//! against it) — a permissive slice-and-parse, falling back to a regex, is
//! enough for this shape.

use crate::protocol::StructuredIntent;
use std::sync::OnceLock;

fn spoken_response_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r#""spoken_response"\s*:\s*"((?:[^"\\]|\\.)*)""#)
            .expect("static regex is valid")
    })
}

/// Best-effort slice of `spoken_response` out of a partial or complete JSON
/// blob. Tries, in order: parse the whole thing as [`StructuredIntent`];
/// slice between the first `{` and the last `}` and parse that; fall back
/// to a regex over the raw text. Returns `None` if nothing usable is found.
#[must_use]
pub fn extract_spoken_response(partial_json: &str) -> Option<String> {
    if let Ok(intent) = serde_json::from_str::<StructuredIntent>(partial_json) {
        return Some(intent.spoken_response);
    }

    if let (Some(start), Some(end)) = (partial_json.find('{'), partial_json.rfind('}')) {
        if end > start {
            let slice = &partial_json[start..=end];
            if let Ok(intent) = serde_json::from_str::<StructuredIntent>(slice) {
                return Some(intent.spoken_response);
            }
        }
    }

    spoken_response_regex()
        .captures(partial_json)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace("\\\"", "\"").replace("\\n", "\n"))
}

/// Parse the final accumulated text into a full [`StructuredIntent`].
/// Falls back to an `other`-tagged intent carrying the raw text as the
/// spoken response if the model's output is not valid JSON — this must
/// never fail the turn outright (spec §7: the client is never left
/// hanging).
#[must_use]
pub fn parse_final_intent(full_text: &str) -> StructuredIntent {
    if let Ok(intent) = serde_json::from_str::<StructuredIntent>(full_text) {
        return intent;
    }
    if let (Some(start), Some(end)) = (full_text.find('{'), full_text.rfind('}')) {
        if end > start {
            if let Ok(intent) = serde_json::from_str::<StructuredIntent>(&full_text[start..=end])
            {
                return intent;
            }
        }
    }
    StructuredIntent {
        spoken_response: extract_spoken_response(full_text)
            .unwrap_or_else(|| full_text.trim().to_owned()),
        intent: crate::protocol::IntentKind::Other,
        product_name: None,
        quantity: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_complete_json() {
        let json = r#"{"spoken_response":"İki pizza geliyor","intent":"add","product_name":"Pizza","quantity":2}"#;
        assert_eq!(
            extract_spoken_response(json).as_deref(),
            Some("İki pizza geliyor")
        );
    }

    #[test]
    fn extracts_from_partial_json_via_regex() {
        let partial = r#"{"spoken_response":"İki pizza geliyor","intent":"ad"#;
        assert_eq!(
            extract_spoken_response(partial).as_deref(),
            Some("İki pizza geliyor")
        );
    }

    #[test]
    fn returns_none_when_field_absent() {
        let partial = r#"{"intent":"gr"#;
        assert_eq!(extract_spoken_response(partial), None);
    }

    #[test]
    fn parse_final_intent_falls_back_to_other_on_garbage() {
        let intent = parse_final_intent("not json at all");
        assert_eq!(intent.intent, crate::protocol::IntentKind::Other);
        assert_eq!(intent.spoken_response, "not json at all");
    }

    #[test]
    fn parse_final_intent_parses_valid_json() {
        let json = r#"{"spoken_response":"Tabii","intent":"info","product_name":null,"quantity":null}"#;
        let intent = parse_final_intent(json);
        assert_eq!(intent.intent, crate::protocol::IntentKind::Info);
        assert_eq!(intent.spoken_response, "Tabii");
    }
}
