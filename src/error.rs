use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Result type alias using [`AppError`].
pub type AppResult<T> = Result<T, AppError>;

/// Field-keyed validation messages, e.g. `{"name": "Name is required."}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message for `field`. The first message for a field wins.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `Ok(())` when nothing was recorded, otherwise the errors as an [`AppError`]
    pub fn into_result(self) -> AppResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Errors surfaced to the caller of a single user action
///
/// None of these are retried. Validation and not-found errors are expected
/// outcomes, the rest are logged once where they are turned into a response.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("{0}")]
    NotFound(String),

    #[error("Not signed in")]
    Unauthorized,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("Chart error: {0}")]
    Chart(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("OAuth error: {0}")]
    OAuth(String),
}

impl AppError {
    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        AppError::Validation(errors)
    }
}

#[cfg(feature = "web")]
mod response {
    use super::AppError;
    use axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    use serde_json::json;

    impl AppError {
        pub fn status_code(&self) -> StatusCode {
            match self {
                AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                AppError::NotFound(_) => StatusCode::NOT_FOUND,
                AppError::Unauthorized | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AppError::Conflict(_) => StatusCode::CONFLICT,
                AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
                AppError::OAuth(_) => StatusCode::BAD_GATEWAY,
                AppError::Storage(_)
                | AppError::Io(_)
                | AppError::Json(_)
                | AppError::Snapshot(_)
                | AppError::Chart(_)
                | AppError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    impl IntoResponse for AppError {
        fn into_response(self) -> Response {
            let status = self.status_code();
            if status.is_server_error() {
                log::error!("request failed: {self}");
            }

            let body = match &self {
                AppError::Validation(errors) => json!({ "errors": errors }),
                other => json!({ "error": other.to_string() }),
            };

            (status, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_per_field_wins() {
        let mut errors = ValidationErrors::new();
        errors.add("name", "Name is required.");
        errors.add("name", "Something else.");
        assert_eq!(errors.get("name"), Some("Name is required."));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn empty_errors_are_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
        let mut errors = ValidationErrors::new();
        errors.add("items", "bad");
        assert!(matches!(errors.into_result(), Err(AppError::Validation(_))));
    }

    #[test]
    fn serializes_as_plain_map() {
        let err = AppError::validation("description", "Description is required.");
        let AppError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["description"], "Description is required.");
    }

    #[cfg(feature = "web")]
    #[test]
    fn maps_errors_to_status_codes() {
        use axum::http::StatusCode;

        assert_eq!(
            AppError::validation("name", "x").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(AppError::not_found("gone").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::Storage("disk".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
