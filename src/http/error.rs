use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};

use crate::oracle;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppError {
    #[serde(with = "serde_status_code")]
    status: StatusCode,
    detail: Option<String>,
}

impl AppError {
    /// Create a new [`AppError`].
    pub fn new(status_code: StatusCode, message: Option<impl ToString>) -> AppError {
        Self {
            status: status_code,
            detail: message.map(|m| m.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let json = Json(self.clone());
        (self.status, json).into_response()
    }
}

// queries never validate names, so every oracle failure is on our side
impl From<oracle::Error> for AppError {
    fn from(value: oracle::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, Some(value))
    }
}

/// Serialize/Deserializer for status codes.
///
/// The status code goes on the wire as a string, not as a number.
pub mod serde_status_code {
    use http::StatusCode;
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Unexpected};

    /// Serialize [StatusCode]s.
    pub fn serialize<S: Serializer>(status: &StatusCode, ser: S) -> Result<S::Ok, S::Error> {
        String::serialize(&status.as_u16().to_string(), ser)
    }

    /// Deserialize [StatusCode]s.
    pub fn deserialize<'de, D>(de: D) -> Result<StatusCode, D::Error>
    where
        D: Deserializer<'de>,
    {
        let str = String::deserialize(de)?;
        StatusCode::from_bytes(str.as_bytes()).map_err(|_| {
            serde::de::Error::invalid_value(
                Unexpected::Str(str.as_str()),
                &"A valid http status code",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oracle_errors_map_to_status() {
        let closed: AppError = oracle::Error::Closed.into();
        assert_eq!(closed.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(closed.detail.as_deref(), Some("catalog oracle has stopped"));

        let no_store: AppError = oracle::Error::NoStore.into();
        assert_eq!(no_store.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_code_serializes_as_string() {
        let err = AppError::new(StatusCode::NOT_FOUND, Some("gone"));
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, r#"{"status":"404","detail":"gone"}"#);
        let back: AppError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, StatusCode::NOT_FOUND);
    }
}
