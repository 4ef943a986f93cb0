// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! HTTP 错误映射: 400 客户端输入 / 503 模型不可用 / 500 其他 (不暴露细节)

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::error::DetectError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Detect(#[from] DetectError),

    /// 请求格式错误 (multipart / query 参数)
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Detect(e) => match e {
                DetectError::InvalidImage(_)
                | DetectError::DecodeFailure(_)
                | DetectError::UnsupportedMediaType(_)
                | DetectError::ThresholdOutOfRange { .. }
                | DetectError::VideoOpenFailure(_) => StatusCode::BAD_REQUEST,
                DetectError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                DetectError::EncodeFailure { .. }
                | DetectError::Io(_)
                | DetectError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Detect(e) => e.client_message(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            detail: self.detail(),
        };
        (status, Json(body)).into_response()
    }
}
