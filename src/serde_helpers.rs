//! Serde helpers shared by the REST client, the cache and the gateway codec.
//!
//! With the `tracing` feature enabled, [`deserialize_with_warnings`] reports fields the
//! target type does not capture. The API adds fields regularly, so these are logged at
//! debug level and never fail deserialization.

use secrecy::{ExposeSecret as _, SecretString};
use serde::Serializer;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Serialize a secret as its plain string. Only used for frames sent to the gateway.
pub(crate) fn expose_secret<S: Serializer>(
    secret: &SecretString,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Deserialize JSON, logging unknown fields and the path of the first failure.
///
/// ```ignore
/// let guild: Guild = deserialize_with_warnings(json!({"id": "1", "name": "x", "banner": null}))?;
/// // DEBUG unknown field type_name=Guild field=banner value=null
/// ```
#[cfg(feature = "tracing")]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    tracing::trace!(type_name = %type_name::<T>(), json = %value, "deserializing JSON");

    let mut unknown: Vec<String> = Vec::new();
    let result = serde_ignored::deserialize(&value, |path| unknown.push(path.to_string()));

    let parsed: T = match result {
        Ok(parsed) => parsed,
        Err(e) => {
            // Run again to find where it failed
            if let Err(path_err) = serde_path_to_error::deserialize::<_, T>(&value) {
                let path = path_err.path().to_string();
                tracing::error!(
                    type_name = %type_name::<T>(),
                    path = %path,
                    value = %render_value(lookup_value(&value, &path)),
                    error = %path_err.inner(),
                    "deserialization failed"
                );
            }
            return Err(e.into());
        }
    };

    for path in unknown {
        tracing::debug!(
            type_name = %type_name::<T>(),
            field = %path,
            value = %render_value(lookup_value(&value, &path)),
            "unknown field"
        );
    }

    Ok(parsed)
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Find the value at a `serde_ignored` or `serde_path_to_error` path such as
/// `roles[0].name` or `user.?.id`.
#[cfg(feature = "tracing")]
fn lookup_value<'value>(value: &'value Value, path: &str) -> Option<&'value Value> {
    let pointer: String = path
        .replace('[', ".")
        .replace(']', "")
        .split('.')
        .filter(|segment| !segment.is_empty() && *segment != "?")
        .map(|segment| format!("/{}", segment.replace('~', "~0").replace('/', "~1")))
        .collect();

    value.pointer(&pointer)
}

#[cfg(feature = "tracing")]
fn render_value(value: Option<&Value>) -> String {
    const MAX_LEN: usize = 200;

    match value {
        None => "<missing>".to_owned(),
        Some(value) => {
            let mut rendered = value.to_string();
            if rendered.len() > MAX_LEN {
                let mut end = MAX_LEN;
                while !rendered.is_char_boundary(end) {
                    end -= 1;
                }
                rendered.truncate(end);
                rendered.push_str("...");
            }
            rendered
        }
    }
}
