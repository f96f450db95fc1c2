use crate::store::StoreError;
use axum::{
    extract::rejection::FormRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

/// Errors that end a request early. Notifier failures never become one.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Form(#[from] FormRejection),
    #[error("{0}")]
    Validation(String),
    #[error("could not store submission: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Form(rejection) => rejection.status(),
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn user_message(&self) -> String {
        match self {
            AppError::Form(rejection) => rejection.body_text(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Store(e) => {
                error!("Database error: {e}");
                "An internal error occurred".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            success: false,
            message: self.user_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}
