//! Payload normalization between native event arguments and the
//! boundary-safe [`TaggedPayload`].
//!
//! This is the single place where lossy decisions are made:
//!
//! - A numeric value with no fractional part becomes [`TaggedPayload::Integer`],
//!   both inbound and outbound. Emitting `124.0` and `124` is indistinguishable
//!   on the wire.
//! - JSON `null`, at any depth, becomes [`TaggedPayload::Absent`].
//! - Transport errors keep only their human-readable message.
//! - Anything unrecognized degrades to `Absent`; normalization never fails.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::socket::NativeArg;

/// Boundary-safe encoding of a single event argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TaggedPayload {
    /// No value (no argument, `null`, or an unrecognized shape).
    Absent,
    /// Whole-number numeric.
    Integer(i64),
    /// Numeric with a fractional part.
    Float(f64),
    /// Boolean.
    Boolean(bool),
    /// UTF-8 string.
    String(String),
    /// Key/value object with string keys.
    Object(BTreeMap<String, TaggedPayload>),
    /// Ordered list.
    Array(Vec<TaggedPayload>),
    /// Message text of a transport/protocol error.
    ErrorMessage(String),
}

impl TaggedPayload {
    /// Tag name, as used in the serialized form.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::String(_) => "string",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
            Self::ErrorMessage(_) => "error_message",
        }
    }

    /// Whether this is [`TaggedPayload::Absent`].
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Decoded JSON form (what a consumer callback receives).
    #[must_use]
    pub fn to_json(&self) -> Value {
        normalize_outbound(self)
    }
}

impl From<&Value> for TaggedPayload {
    fn from(value: &Value) -> Self {
        tag_json(value)
    }
}

impl From<Value> for TaggedPayload {
    fn from(value: Value) -> Self {
        tag_json(&value)
    }
}

/// Tag the first native argument of an event.
///
/// Later arguments are ignored: the boundary carries one logical payload
/// per event.
#[must_use]
pub fn normalize_inbound(args: &[NativeArg]) -> TaggedPayload {
    match args.first() {
        None => TaggedPayload::Absent,
        Some(NativeArg::Json(value)) => tag_json(value),
        Some(NativeArg::TransportError { message, .. }) => {
            TaggedPayload::ErrorMessage(message.clone())
        }
        Some(NativeArg::Binary(bytes)) => {
            log::debug!(
                "[socketio] Binary payload ({} bytes) has no boundary encoding; delivering absent",
                bytes.len()
            );
            TaggedPayload::Absent
        }
    }
}

/// Convert a tagged payload to the native value handed to `emit`.
#[must_use]
pub fn normalize_outbound(payload: &TaggedPayload) -> Value {
    match payload {
        TaggedPayload::Absent => Value::Null,
        TaggedPayload::Integer(i) => Value::Number(Number::from(*i)),
        TaggedPayload::Float(f) => match as_whole(*f) {
            Some(i) => Value::Number(Number::from(i)),
            None => Number::from_f64(*f).map_or_else(
                || {
                    log::debug!("[socketio] Non-finite float {f} sent as null");
                    Value::Null
                },
                Value::Number,
            ),
        },
        TaggedPayload::Boolean(b) => Value::Bool(*b),
        TaggedPayload::String(s) | TaggedPayload::ErrorMessage(s) => Value::String(s.clone()),
        TaggedPayload::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_outbound(v)))
                .collect::<Map<String, Value>>(),
        ),
        TaggedPayload::Array(items) => Value::Array(items.iter().map(normalize_outbound).collect()),
    }
}

/// Recursively tag a JSON value.
#[must_use]
pub fn tag_json(value: &Value) -> TaggedPayload {
    match value {
        Value::Null => TaggedPayload::Absent,
        Value::Bool(b) => TaggedPayload::Boolean(*b),
        Value::Number(n) => tag_number(n),
        Value::String(s) => TaggedPayload::String(s.clone()),
        Value::Array(items) => TaggedPayload::Array(items.iter().map(tag_json).collect()),
        Value::Object(map) => TaggedPayload::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), tag_json(v)))
                .collect(),
        ),
    }
}

fn tag_number(n: &Number) -> TaggedPayload {
    if let Some(i) = n.as_i64() {
        return TaggedPayload::Integer(i);
    }
    match n.as_f64() {
        Some(f) => as_whole(f).map_or(TaggedPayload::Float(f), TaggedPayload::Integer),
        None => {
            log::debug!("[socketio] Unrepresentable number {n}; delivering absent");
            TaggedPayload::Absent
        }
    }
}

/// `Some(i)` when `f` is finite, has no fractional part and fits in `i64`.
#[allow(clippy::float_cmp, reason = "exact comparison against the truncated value is intended")]
fn as_whole(f: f64) -> Option<i64> {
    // i64::MAX is not exactly representable; the upper bound must be exclusive.
    if f.is_finite() && f.trunc() == f && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inbound(value: Value) -> TaggedPayload {
        normalize_inbound(&[NativeArg::Json(value)])
    }

    #[test]
    fn test_no_args_is_absent() {
        assert_eq!(normalize_inbound(&[]), TaggedPayload::Absent);
    }

    #[test]
    fn test_only_first_arg_is_used() {
        let args = [NativeArg::Json(json!("first")), NativeArg::Json(json!(2))];
        assert_eq!(normalize_inbound(&args), TaggedPayload::String("first".to_string()));
    }

    #[test]
    fn test_scalars() {
        assert_eq!(inbound(json!(3)), TaggedPayload::Integer(3));
        assert_eq!(inbound(json!(-7)), TaggedPayload::Integer(-7));
        assert_eq!(inbound(json!(124.25)), TaggedPayload::Float(124.25));
        assert_eq!(inbound(json!(true)), TaggedPayload::Boolean(true));
        assert_eq!(inbound(json!("hi")), TaggedPayload::String("hi".to_string()));
        assert_eq!(inbound(json!(null)), TaggedPayload::Absent);
    }

    #[test]
    fn test_whole_float_inbound_is_integer() {
        assert_eq!(inbound(json!(124.0)), TaggedPayload::Integer(124));
    }

    #[test]
    fn test_large_unsigned_stays_numeric() {
        let big = u64::MAX;
        match inbound(json!(big)) {
            TaggedPayload::Float(f) => assert!(f > 1.0e19),
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_object_with_null_slots() {
        let tagged = inbound(json!({
            "count": 3,
            "tags": ["a", "b"],
            "nullable": null,
            "inner": { "x": 1.5, "gone": null }
        }));

        let TaggedPayload::Object(map) = tagged else {
            panic!("expected object");
        };
        assert_eq!(map["count"], TaggedPayload::Integer(3));
        assert_eq!(
            map["tags"],
            TaggedPayload::Array(vec![
                TaggedPayload::String("a".to_string()),
                TaggedPayload::String("b".to_string()),
            ])
        );
        assert_eq!(map["nullable"], TaggedPayload::Absent);
        let TaggedPayload::Object(inner) = &map["inner"] else {
            panic!("expected inner object");
        };
        assert_eq!(inner["x"], TaggedPayload::Float(1.5));
        assert_eq!(inner["gone"], TaggedPayload::Absent);
    }

    #[test]
    fn test_transport_error_keeps_message_only() {
        let args = [NativeArg::TransportError {
            message: "xhr poll error".to_string(),
            detail: Some(json!({ "code": 502 })),
        }];
        assert_eq!(
            normalize_inbound(&args),
            TaggedPayload::ErrorMessage("xhr poll error".to_string())
        );
    }

    #[test]
    fn test_binary_falls_back_to_absent() {
        let args = [NativeArg::Binary(vec![1, 2, 3])];
        assert_eq!(normalize_inbound(&args), TaggedPayload::Absent);
    }

    #[test]
    fn test_integral_float_emits_as_integer() {
        let out = normalize_outbound(&TaggedPayload::Float(124.0));
        assert!(out.is_i64());
        assert_eq!(out, json!(124));
        assert_eq!(inbound(out), TaggedPayload::Integer(124));
    }

    #[test]
    fn test_fractional_float_round_trips() {
        let out = normalize_outbound(&TaggedPayload::Float(124.25));
        assert_eq!(inbound(out), TaggedPayload::Float(124.25));
    }

    #[test]
    fn test_non_finite_float_emits_null() {
        assert_eq!(normalize_outbound(&TaggedPayload::Float(f64::NAN)), Value::Null);
        assert_eq!(normalize_outbound(&TaggedPayload::Float(f64::INFINITY)), Value::Null);
    }

    #[test]
    fn test_outbound_nested_structure() {
        let mut map = BTreeMap::new();
        map.insert("double".to_string(), TaggedPayload::Float(123.25));
        map.insert("numberVal".to_string(), TaggedPayload::Float(123.0));
        map.insert("nullable".to_string(), TaggedPayload::Absent);
        map.insert(
            "list".to_string(),
            TaggedPayload::Array(vec![TaggedPayload::Boolean(false)]),
        );

        let out = normalize_outbound(&TaggedPayload::Object(map));
        assert_eq!(
            out,
            json!({ "double": 123.25, "numberVal": 123, "nullable": null, "list": [false] })
        );
    }

    #[test]
    fn test_serialized_shape() {
        let encoded = serde_json::to_value(TaggedPayload::Integer(5)).unwrap();
        assert_eq!(encoded, json!({ "type": "integer", "value": 5 }));

        let absent = serde_json::to_value(TaggedPayload::Absent).unwrap();
        assert_eq!(absent, json!({ "type": "absent" }));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(TaggedPayload::ErrorMessage(String::new()).kind(), "error_message");
        assert!(TaggedPayload::Absent.is_absent());
    }
}
