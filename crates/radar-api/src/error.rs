use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, message: msg.into() }
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::FORBIDDEN, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::NOT_FOUND, message: msg.into() }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::CONFLICT, message: msg.into() }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::SERVICE_UNAVAILABLE, message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<radar_onboarding::OnboardingError> for ApiError {
    fn from(e: radar_onboarding::OnboardingError) -> Self {
        use radar_onboarding::OnboardingError::*;
        match &e {
            InvalidRequest(_) | Domain(_) | PathTraversal(_) | UnsupportedComponentType(_) => {
                ApiError::bad_request(e.to_string())
            }
            NotFound(_) => ApiError::not_found(e.to_string()),
            Conflict(_) | PackageDelivered | NotDeletable(_) => ApiError::conflict(e.to_string()),
            DownloadInvalid => ApiError::forbidden(e.to_string()),
            Storage(_) | Kv(_) | SpireUnavailable(_) => ApiError::unavailable(e.to_string()),
            DecryptFailed | CertMint(_) => ApiError::internal(e.to_string()),
        }
    }
}

impl From<radar_identity::ResolveError> for ApiError {
    fn from(e: radar_identity::ResolveError) -> Self {
        use radar_identity::ResolveError::*;
        match &e {
            InvalidRequest | UnsupportedKind(_) => ApiError::bad_request(e.to_string()),
            StorageUnavailable => ApiError::unavailable(e.to_string()),
            Store(_) => ApiError::internal(e.to_string()),
        }
    }
}

impl From<radar_ingest::IngestError> for ApiError {
    fn from(e: radar_ingest::IngestError) -> Self {
        match &e {
            radar_ingest::IngestError::Parse(_) => ApiError::bad_request(e.to_string()),
            radar_ingest::IngestError::Resolve(_) => ApiError::internal(e.to_string()),
            radar_ingest::IngestError::Store(_) => ApiError::internal(e.to_string()),
        }
    }
}

impl From<radar_reconciler::BackfillError> for ApiError {
    fn from(e: radar_reconciler::BackfillError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl From<radar_store::StoreError> for ApiError {
    fn from(e: radar_store::StoreError) -> Self {
        ApiError::internal(e.to_string())
    }
}
