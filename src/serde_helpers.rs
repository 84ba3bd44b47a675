//! Lenient decoding of JSON documents into caller types.
//!
//! Session records and relay responses are caller-defined shapes. Decoding
//! never fails on extra fields; with the `tracing` feature enabled every field
//! the target type ignores is logged, and a failed decode logs the offending
//! path.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Decode `value` into `T`, warning about fields `T` does not capture.
///
/// ```ignore
/// let record: Draft = decode_with_warnings(json!({"sessionId": "a", "extra": 1}))?;
/// // WARN field "extra" ignored while decoding Draft
/// ```
#[cfg(feature = "tracing")]
pub fn decode_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    tracing::trace!(type_name = %type_name::<T>(), json = %value, "decoding JSON");

    let original = value.clone();
    let mut ignored: Vec<String> = Vec::new();

    let decoded: T = serde_ignored::deserialize(value, |path| ignored.push(path.to_string()))
        .inspect_err(|_| {
            let text = original.to_string();
            let de = &mut serde_json::Deserializer::from_str(&text);
            if let Err(e) = serde_path_to_error::deserialize::<_, T>(de) {
                let path = e.path().to_string();
                tracing::error!(
                    type_name = %type_name::<T>(),
                    path = %path,
                    value = %describe(value_at(&original, &path)),
                    error = %e.inner(),
                    "decoding failed"
                );
            }
        })?;

    for path in ignored {
        tracing::warn!(
            type_name = %type_name::<T>(),
            field = %path,
            value = %describe(value_at(&original, &path)),
            "field ignored while decoding"
        );
    }

    Ok(decoded)
}

/// Plain decoding when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn decode_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Walk `path` (as printed by `serde_ignored` or `serde_path_to_error`) inside `value`.
///
/// `?` segments mark `Option` layers and are skipped; both `a.0` and `a[0]` index arrays.
#[cfg(feature = "tracing")]
fn value_at<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    path.split(['.', '[', ']'])
        .filter(|segment| !segment.is_empty() && *segment != "?")
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
            _ => None,
        })
}

#[cfg(feature = "tracing")]
fn describe(value: Option<&Value>) -> String {
    value.map_or_else(|| "<unable to retrieve>".to_owned(), Value::to_string)
}
