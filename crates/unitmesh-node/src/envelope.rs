use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Reserved error codes carried in the envelope's `error.code` field.
pub mod codes {
    /// Success.
    pub const OK: i64 = 0;
    /// Malformed or incomplete JSON on an external input.
    pub const JSON_FORMAT: i64 = -2;
    /// Forwarding an inference request to the unit failed.
    pub const INFERENCE_PUSH: i64 = -4;
    /// The RPC call to the target unit failed.
    pub const UNIT_CALL: i64 = -9;
    /// Work-unit capacity or port pool exhausted.
    pub const CAPACITY: i64 = -19;
}

/// The `error` member of the envelope. `code == 0` means success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn ok() -> Self {
        Self {
            code: codes::OK,
            message: String::new(),
        }
    }
}

/// The standard application message wrapper.
///
/// Exactly six top-level keys; serialized one object per line,
/// newline-terminated on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub request_id: String,
    pub work_id: String,
    pub created: i64,
    pub object: String,
    pub data: Value,
    pub error: ErrorBody,
}

impl Envelope {
    /// Build an envelope stamped with the current unix timestamp. A
    /// `None` error means success (`code == 0`, empty message).
    pub fn new(
        request_id: impl Into<String>,
        work_id: impl Into<String>,
        object: impl Into<String>,
        data: Value,
        error: Option<ErrorBody>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            work_id: work_id.into(),
            created: unix_now(),
            object: object.into(),
            data,
            error: error.unwrap_or_else(ErrorBody::ok),
        }
    }

    /// The error envelope used for dispatch failures: `object` and `data`
    /// carry the `"None"` placeholder.
    pub fn error_reply(
        request_id: impl Into<String>,
        work_id: impl Into<String>,
        error: ErrorBody,
    ) -> Self {
        Self::new(
            request_id,
            work_id,
            "None",
            Value::String("None".to_string()),
            Some(error),
        )
    }

    /// Serialize to the newline-terminated wire form.
    pub fn to_wire_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_has_exactly_six_keys_and_zero_code() {
        let env = Envelope::new("r1", "unit.3", "unit.chat", serde_json::json!({"k": 1}), None);
        let line = env.to_wire_line().unwrap();
        assert!(line.ends_with('\n'));

        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        let obj = value.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec!["created", "data", "error", "object", "request_id", "work_id"]
        );
        assert_eq!(value["error"]["code"], 0);
        assert_eq!(value["error"]["message"], "");
    }

    #[test]
    fn error_envelope_carries_negative_code() {
        let env = Envelope::error_reply("r2", "sys", ErrorBody::new(codes::JSON_FORMAT, "json format error"));
        let value: serde_json::Value =
            serde_json::from_str(env.to_wire_line().unwrap().trim_end()).unwrap();
        assert_eq!(value["error"]["code"], -2);
        assert_eq!(value["object"], "None");
        assert_eq!(value["data"], "None");
    }

    #[test]
    fn roundtrips_through_serde() {
        let env = Envelope::new("r", "w.1", "obj", serde_json::json!(["a", "b"]), None);
        let parsed: Envelope = serde_json::from_str(env.to_wire_line().unwrap().trim_end()).unwrap();
        assert_eq!(parsed.request_id, "r");
        assert_eq!(parsed.work_id, "w.1");
        assert_eq!(parsed.data, serde_json::json!(["a", "b"]));
    }
}
