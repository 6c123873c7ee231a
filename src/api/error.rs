use crate::error::QueueError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced by HTTP handlers
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    /// Request body present but not a valid payload
    InvalidBody(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(detail) => {
                (StatusCode::NOT_FOUND, Json(json!({ "detail": detail }))).into_response()
            }
            ApiError::InvalidBody(detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "detail": format!("Invalid request body: {}", detail) })),
            )
                .into_response(),
            ApiError::Internal(err) => {
                let mut response = (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "detail": "Internal server error",
                        "error": err.to_string(),
                    })),
                )
                    .into_response();

                response.extensions_mut().insert(ErrorMessage(format!("{:#}", err)));
                response
            }
        }
    }
}

/// Full error chain of a 500, picked up by the request logger
#[derive(Debug, Clone)]
pub(crate) struct ErrorMessage(pub String);

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::UnknownTask(name) => ApiError::NotFound(format!("Unknown task: {}", name)),
            other => ApiError::Internal(anyhow::Error::new(other).context("Task queue unavailable")),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_internal_error_shape() {
        let err = ApiError::Internal(anyhow::anyhow!("boom").context("Dashboard unavailable"));
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "detail": "Internal server error", "error": "Dashboard unavailable" })
        );
    }

    #[tokio::test]
    async fn test_invalid_body_is_unprocessable() {
        let response = ApiError::InvalidBody("EOF while parsing".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            body_json(response).await["detail"],
            json!("Invalid request body: EOF while parsing")
        );
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let err: ApiError = QueueError::UnknownTask("nope".to_string()).into();
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["detail"], json!("Unknown task: nope"));
    }
}
