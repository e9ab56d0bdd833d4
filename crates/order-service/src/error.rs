use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use shop_core::error::CoreError;

/// Why an order request was refused.
///
/// Renders as `{ "error": message, "code": CODE }`. Bus failures are not
/// errors here: a saved order whose announcement failed is still a `201`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The body could not be read as an order.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Core(CoreError::Unauthorized(_)) => StatusCode::UNAUTHORIZED,
            AppError::Core(CoreError::Validation(_)) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Core(CoreError::Unauthorized(_)) => "UNAUTHORIZED",
            AppError::Core(CoreError::Validation(_)) => "VALIDATION_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
        }
    }

    fn message(&self) -> &str {
        match self {
            AppError::Core(CoreError::Unauthorized(msg))
            | AppError::Core(CoreError::Validation(msg))
            | AppError::BadRequest(msg) => msg,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::debug!(code = self.code(), error = %self, "Request refused");
        let body = json!({
            "error": self.message(),
            "code": self.code(),
        });
        (self.status(), axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    async fn body(error: AppError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validation_is_a_bad_request_naming_the_rule() {
        let (status, json) = body(CoreError::Validation("Order amount must be positive".into()).into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "VALIDATION_ERROR");
        assert_eq!(json["error"], "Order amount must be positive");
    }

    #[tokio::test]
    async fn missing_principal_is_unauthorized() {
        let (status, json) = body(CoreError::Unauthorized("Missing x-user-id".into()).into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn unreadable_body_is_a_bad_request() {
        let (status, json) = body(AppError::BadRequest("expected value".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "BAD_REQUEST");
    }
}
