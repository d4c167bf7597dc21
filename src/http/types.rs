//! API response envelope and error mapping
//!
//! All endpoints answer `{ code, msg, data }`: code 0 on success, a stable
//! error code string in `msg` plus non-zero code on failure.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::settlement::SettlementError;

/// Unified API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// 0 for success, non-zero for errors
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }
}

/// Error carried to the HTTP layer
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub msg: String,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Success helper used by handlers
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            code: self.status.as_u16() as i32,
            msg: format!("{}: {}", self.code, self.msg),
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            code: e.code().to_string(),
            msg: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::SettlementStatus;

    #[test]
    fn test_settlement_error_mapping() {
        let api: ApiError = SettlementError::NotTransferable {
            settlement_id: "x".into(),
            status: SettlementStatus::Cancelled,
        }
        .into();
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(api.code, "NOT_TRANSFERABLE");
    }

    #[test]
    fn test_success_envelope() {
        let resp = ApiResponse::success(5);
        assert_eq!(resp.code, 0);
        assert_eq!(resp.data, Some(5));
    }
}
