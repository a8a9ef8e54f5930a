//! Request body reading and decoding for write operations and login.

use axum::body::Body;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::errors::ApiError;
use crate::traits::Resource;

/// A decoded JSON object body
pub type JsonBody = Map<String, Value>;

/// Default upper bound on request bodies, 1 MiB
pub const DEFAULT_BODY_LIMIT: usize = 1_048_576;

/// Read at most `limit` bytes and decode them as a JSON object.
///
/// # Errors
/// A body over the limit, malformed JSON, or JSON that is not an object is a 422.
pub async fn read_json_object(body: Body, limit: usize) -> Result<JsonBody, ApiError> {
    let bytes = axum::body::to_bytes(body, limit).await.map_err(|err| {
        tracing::warn!(error = %err, limit, "Can't read request body");
        ApiError::unprocessable("Request body unreadable or too large")
    })?;
    parse_json_object(&bytes)
}

/// # Errors
/// Malformed JSON, or a JSON value other than an object, is a 422.
pub fn parse_json_object(bytes: &[u8]) -> Result<JsonBody, ApiError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => {
            tracing::warn!(kind = json_kind(&other), "Received JSON body that is not an object");
            Err(ApiError::unprocessable("Expected a JSON object"))
        }
        Err(err) => {
            tracing::warn!(error = %err, "Received malformed JSON body");
            Err(ApiError::unprocessable("Malformed JSON"))
        }
    }
}

/// Decode `patch` on top of `base`. Top-level keys in `patch` replace those in `base`;
/// keys it does not mention keep their current values.
///
/// # Errors
/// A 422 when the merged document no longer fits `T`.
pub fn overlay<T: Serialize + DeserializeOwned>(base: &T, patch: JsonBody) -> Result<T, ApiError> {
    let mut merged = match serde_json::to_value(base) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            return Err(ApiError::internal(
                "Failed to process request",
                Some("record does not serialize to a JSON object".to_string()),
            ));
        }
        Err(err) => {
            return Err(ApiError::internal(
                "Failed to process request",
                Some(err.to_string()),
            ));
        }
    };
    merged.extend(patch);

    serde_json::from_value(Value::Object(merged)).map_err(|err| {
        tracing::warn!(error = %err, "Can't decode incoming JSON");
        ApiError::unprocessable(format!("Invalid payload: {err}"))
    })
}

/// Run the record's validation, if it has any.
///
/// # Errors
/// The field errors as a 422.
pub fn validate<R: Resource>(record: &R::Record) -> Result<(), ApiError> {
    let Some(validatable) = R::validatable(record) else {
        return Ok(());
    };
    validatable.validate().map_err(|errors| {
        tracing::warn!(errors = %errors, resource = %R::route_name(), "Validation error");
        ApiError::validation_failed(errors)
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Item {
        id: i32,
        name: String,
        count: i32,
    }

    #[test]
    fn objects_are_accepted() {
        let body = parse_json_object(br#"{"name": "x"}"#).unwrap();
        assert_eq!(body["name"], "x");
    }

    #[test]
    fn malformed_and_non_object_bodies_are_unprocessable() {
        for raw in [&b"{not json"[..], b"[1, 2]", b"\"text\"", b""] {
            let err = parse_json_object(raw).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        }
    }

    #[test]
    fn overlay_keeps_unmentioned_fields() {
        let base = Item {
            id: 7,
            name: "old".into(),
            count: 3,
        };
        let patch = parse_json_object(br#"{"name": "new"}"#).unwrap();
        let merged = overlay(&base, patch).unwrap();
        assert_eq!(
            merged,
            Item {
                id: 7,
                name: "new".into(),
                count: 3
            }
        );
    }

    #[test]
    fn overlay_rejects_wrong_types() {
        let patch = parse_json_object(br#"{"count": "many"}"#).unwrap();
        let err = overlay(&Item::default(), patch).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn oversized_bodies_are_unprocessable() {
        let big = format!(r#"{{"name": "{}"}}"#, "x".repeat(64));
        let err = read_json_object(Body::from(big), 16).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn bodies_within_limit_are_read() {
        let body = read_json_object(Body::from(r#"{"count": 2}"#), DEFAULT_BODY_LIMIT)
            .await
            .unwrap();
        assert_eq!(body["count"], 2);
    }
}
