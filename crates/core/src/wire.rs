//! Lenient field decoders for service JSON
//!
//! The service is inconsistent about JSON types: counts arrive as numbers or
//! numeric strings, and absent values sometimes arrive as `null`.

use serde::de::{self, Deserialize, Deserializer};
use serde_json::Value;

/// Decode `null` or a missing value as `T::default()`
pub(crate) fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode an unsigned integer from a number, a numeric string or `null`
pub(crate) fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = lenient_i64(deserializer)?;
    u64::try_from(value).map_err(|_| de::Error::custom(format!("expected unsigned integer, got {value}")))
}

/// Decode a signed integer from a number, a numeric string or `null`
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| de::Error::custom(format!("integer out of range: {n}"))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(0),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected integer, got {s:?}"))),
        Some(other) => Err(de::Error::custom(format!("expected integer, got {other}"))),
    }
}

/// Decode a boolean from `true`/`false`, `0`/`1`, `"true"`/`"false"` or `null`
pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(b),
        Some(Value::Number(n)) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            _ => Err(de::Error::custom(format!("expected boolean, got {s:?}"))),
        },
        Some(other) => Err(de::Error::custom(format!("expected boolean, got {other}"))),
    }
}

/// Best-effort human-readable message from an error response body
pub(crate) fn error_message(body: &[u8]) -> String {
    const MAX_LEN: usize = 200;

    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) {
        for key in ["message", "error", "status"] {
            if let Some(Value::String(message)) = map.get(key) {
                if !message.trim().is_empty() {
                    return message.trim().to_string();
                }
            }
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.chars().count() > MAX_LEN {
        let truncated: String = text.chars().take(MAX_LEN).collect();
        format!("{truncated}…")
    } else {
        text.to_string()
    }
}
