//! Literal JSON key scanning and work-id string helpers.
//!
//! The scanner extracts one key's value from raw JSON text without a full
//! parse — the envelope-inspection fast path runs on every inbound frame
//! of a subscription, where a complete parse per message is not worth it.
//! Anything that needs real JSON semantics uses `serde_json` instead.

/// Extract the value of `key` from raw JSON text.
///
/// Handles string values (unescaped closing quote), nested object values
/// (balanced braces) and bare scalars (numbers, booleans). Returns `None`
/// when the key is absent or its value is empty/unterminated.
pub fn json_str_get(json: &str, key: &str) -> Option<String> {
    let needle = format!("\"{key}\"");
    let start = json.find(&needle)? + needle.len();
    let rest = &json[start..];

    let mut value = String::new();
    let mut state = ScanState::BeforeValue;
    let mut depth = 0usize;
    let mut last = '\0';
    for c in rest.chars() {
        match state {
            ScanState::BeforeValue => match c {
                ':' | ' ' => {}
                '"' => state = ScanState::InString,
                '{' => {
                    value.push(c);
                    depth = 1;
                    state = ScanState::InObject;
                }
                ',' | '}' => return None,
                _ => {
                    value.push(c);
                    state = ScanState::InScalar;
                }
            },
            ScanState::InString => {
                if c == '"' && last != '\\' {
                    return Some(value);
                }
                value.push(c);
            }
            ScanState::InObject => {
                value.push(c);
                if c == '{' {
                    depth += 1;
                } else if c == '}' {
                    depth -= 1;
                    if depth == 0 {
                        return Some(value);
                    }
                }
            }
            ScanState::InScalar => match c {
                ',' | '}' | '\n' => return Some(value.trim().to_string()),
                _ => value.push(c),
            },
        }
        last = c;
    }

    match state {
        // A bare scalar may be terminated by end of input.
        ScanState::InScalar if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

enum ScanState {
    BeforeValue,
    InString,
    InObject,
    InScalar,
}

/// Whether the text contains an unescaped `"action"` key.
///
/// Matches the inspection rule: a literal occurrence whose preceding
/// character is not a backslash.
pub fn has_action_key(json: &str) -> bool {
    let needle = "\"action\"";
    let mut from = 0;
    while let Some(pos) = json[from..].find(needle) {
        let abs = from + pos;
        if abs == 0 || json.as_bytes()[abs - 1] != b'\\' {
            return true;
        }
        from = abs + needle.len();
    }
    false
}

/// Extract the numeric part of a `name.number` work id.
pub fn work_id_num(work_id: &str) -> Option<u64> {
    let (_, number) = work_id.split_once('.')?;
    number.parse().ok()
}

/// The unit-name part of a work id (`"tts.4"` → `"tts"`); a bare name is
/// returned unchanged.
pub fn work_id_name(work_id: &str) -> &str {
    work_id.split_once('.').map_or(work_id, |(name, _)| name)
}

/// Join a unit name and number into a work id.
pub fn make_work_id(unit_name: &str, num: u64) -> String {
    format!("{unit_name}.{num}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_string_values() {
        let json = r#"{"action": "inference", "request_id": "r-77"}"#;
        assert_eq!(json_str_get(json, "action").as_deref(), Some("inference"));
        assert_eq!(json_str_get(json, "request_id").as_deref(), Some("r-77"));
    }

    #[test]
    fn extracts_nested_objects() {
        let json = r#"{"data": {"inner": {"x": 1}}, "tail": "t"}"#;
        assert_eq!(
            json_str_get(json, "data").as_deref(),
            Some(r#"{"inner": {"x": 1}}"#)
        );
    }

    #[test]
    fn extracts_bare_scalars() {
        let json = r#"{"index": 3, "finish": true}"#;
        assert_eq!(json_str_get(json, "index").as_deref(), Some("3"));
        assert_eq!(json_str_get(json, "finish").as_deref(), Some("true"));
    }

    #[test]
    fn missing_key_yields_none() {
        assert_eq!(json_str_get(r#"{"a": 1}"#, "b"), None);
    }

    #[test]
    fn escaped_quote_stays_inside_value() {
        let json = r#"{"msg": "say \"hi\" now"}"#;
        assert_eq!(json_str_get(json, "msg").as_deref(), Some(r#"say \"hi\" now"#));
    }

    #[test]
    fn action_key_detection_skips_escaped_occurrences() {
        assert!(has_action_key(r#"{"action": "setup"}"#));
        assert!(!has_action_key(r#"{"note": "mentions \"action\" only"}"#));
        assert!(has_action_key(
            r#"{"note": "\"action\"", "action": "go"}"#
        ));
    }

    #[test]
    fn work_id_helpers() {
        assert_eq!(work_id_num("tts.123"), Some(123));
        assert_eq!(work_id_num("tts."), None);
        assert_eq!(work_id_num("tts"), None);
        assert_eq!(work_id_name("tts.123"), "tts");
        assert_eq!(work_id_name("sys"), "sys");
        assert_eq!(make_work_id("asr", 7), "asr.7");
    }
}
