use crate::store::MutationError;
use derive_more::{Display, Error};
use log::error;
use ntex::{http, web};

/// Error taxonomy of the admin surface; every variant maps onto one HTTP
/// status class and renders as a small JSON body.
#[derive(Debug, Display, Error)]
pub enum ApiError {
    #[display("validation error: {_0}")]
    Validation(#[error(not(source))] String),
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    #[display("duplicate: {_0}")]
    Duplicate(#[error(not(source))] String),
    #[display("missing or invalid credentials")]
    Unauthorized,
    #[display("address not allowed")]
    Forbidden,
    #[display("whatsapp client adapter is disabled")]
    AdapterDisabled,
    #[display("internal error: {_0}")]
    Internal(#[error(not(source))] String),
}

impl From<MutationError> for ApiError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::Invalid(msg) => ApiError::Validation(msg),
            MutationError::Duplicate(key) => ApiError::Duplicate(key),
            MutationError::NotFound(key) => ApiError::NotFound(key),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl web::error::WebResponseError for ApiError {
    fn error_response(&self, _: &web::HttpRequest) -> web::HttpResponse {
        if matches!(self, ApiError::Internal(_)) {
            error!("{}", self);
        }

        web::HttpResponse::build(self.status_code())
            .json(&serde_json::json!({"error": self.to_string()}))
    }

    fn status_code(&self) -> http::StatusCode {
        match self {
            ApiError::Validation(_) => http::StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => http::StatusCode::NOT_FOUND,
            ApiError::Duplicate(_) => http::StatusCode::CONFLICT,
            ApiError::Unauthorized => http::StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => http::StatusCode::FORBIDDEN,
            ApiError::AdapterDisabled => http::StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
