use crate::sensor::UnknownSensorKind;
use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    UnknownSensorKind(String),
    InvalidParameter(String),
    Store(StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownSensorKind(_) | ApiError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message; storage detail stays in the log
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Store(_) => "Storage unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<UnknownSensorKind> for ApiError {
    fn from(err: UnknownSensorKind) -> Self {
        ApiError::UnknownSensorKind(err.0)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::UnknownSensorKind(kind) => write!(f, "Unknown sensor type: {}", kind),
            ApiError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            ApiError::Store(e) => write!(f, "Store error: {}", e),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Store(e) = &self {
            log::error!("❌ Query failed: {}", e);
        }
        let status = self.status();
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}
