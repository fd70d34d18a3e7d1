//! Decoding of the model's answer into an [`ExtractedRecord`].
//!
//! Models frequently wrap JSON answers in a markdown code fence. The accepted shape is:
//!
//! ```text
//! [ ``` [language-tag] NEWLINE ]  payload  [ ``` ]
//! ```
//!
//! Both fences are optional and independent of each other. Anything that is not a JSON object
//! once the fences are removed is a parse failure.

use crate::errors::Error;
use crate::types::ExtractedRecord;

const FENCE: &str = "```";

/// Remove an optional opening fence (with its language tag line) and an optional closing fence.
pub fn strip_code_fence(raw: &str) -> &str {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix(FENCE) {
        // The language tag runs to the end of the fence line; a fence with no newline after it
        // has no payload on its own line, so only the tag characters are dropped.
        text = match rest.split_once('\n') {
            Some((_tag, payload)) => payload,
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
        };
    }

    let text = text.trim();
    text.strip_suffix(FENCE).map(str::trim_end).unwrap_or(text)
}

/// Decode raw model text into a record; missing keys become empty strings.
pub fn parse_record(raw: &str) -> Result<ExtractedRecord, Error> {
    let payload = strip_code_fence(raw);

    let value: serde_json::Value = serde_json::from_str(payload).map_err(|e| Error::Parse { message: e.to_string() })?;

    if !value.is_object() {
        return Err(Error::Parse {
            message: format!("expected a JSON object, found {}", json_type(&value)),
        });
    }

    serde_json::from_value(value).map_err(|e| Error::Parse { message: e.to_string() })
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{"companyName":"Acme","personalName":"Jane Doe","phone1":"555-1234"}"#;

    #[test]
    fn test_strip_both_fences() {
        let raw = format!("```json\n{PAYLOAD}\n```");
        assert_eq!(strip_code_fence(&raw), PAYLOAD);
    }

    #[test]
    fn test_strip_opening_fence_only() {
        let raw = format!("```json\n{PAYLOAD}\n");
        assert_eq!(strip_code_fence(&raw), PAYLOAD);
    }

    #[test]
    fn test_strip_closing_fence_only() {
        let raw = format!("{PAYLOAD}\n```");
        assert_eq!(strip_code_fence(&raw), PAYLOAD);
    }

    #[test]
    fn test_no_fences() {
        assert_eq!(strip_code_fence(PAYLOAD), PAYLOAD);
        assert_eq!(strip_code_fence(&format!("  {PAYLOAD}\n")), PAYLOAD);
    }

    #[test]
    fn test_fence_without_language_tag() {
        let raw = format!("```\n{PAYLOAD}\n```");
        assert_eq!(strip_code_fence(&raw), PAYLOAD);
    }

    #[test]
    fn test_single_line_fence() {
        let raw = format!("```json{PAYLOAD}```");
        assert_eq!(strip_code_fence(&raw), PAYLOAD);
    }

    #[test]
    fn test_crlf_fences() {
        let raw = format!("```json\r\n{PAYLOAD}\r\n```\r\n");
        assert_eq!(strip_code_fence(&raw), PAYLOAD);
    }

    #[test]
    fn test_parse_fenced_record_fills_missing_fields() {
        let record = parse_record(&format!("```json\n{PAYLOAD}\n```")).unwrap();

        assert_eq!(
            record,
            ExtractedRecord {
                company_name: "Acme".to_string(),
                personal_name: "Jane Doe".to_string(),
                phone1: "555-1234".to_string(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let record = parse_record(r#"{"email":"jane@acme.test","fax":"555-0000"}"#).unwrap();
        assert_eq!(record.email, "jane@acme.test");
    }

    #[test]
    fn test_malformed_text_is_parse_error() {
        let inputs = [
            "",
            "```json\n```",
            "Sorry, I could not read this card.",
            "```json\n{\"companyName\": \"Acme\"\n```",
            "[\"Acme\"]",
            "\"Acme\"",
            "null",
            r#"{"companyName":{"name":"Acme"}}"#,
        ];

        for input in inputs {
            let result = parse_record(input);
            assert!(
                matches!(result, Err(Error::Parse { .. })),
                "expected parse error for {input:?}, got {result:?}"
            );
        }
    }
}
