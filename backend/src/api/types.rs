//! REST API types for the presentation layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{MappingError, ParseError, PipelineError, ServerError};
use crate::mapping::MappingSuggestion;
use crate::models::Report;
use crate::validation::FileInfo;

/// Response to `POST /api/sniff`: what was detected and a proposed mapping.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SniffResponse {
    pub file: FileInfo,
    pub suggestion: MappingSuggestion,
}

/// Response to `POST /api/validate`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    /// `ready` (nothing to report), `warning` or `error`
    pub status: &'static str,
    pub summary: String,
    pub file: FileInfo,
    pub report: Report,
}

impl ValidateResponse {
    pub fn new(file: FileInfo, report: Report) -> Self {
        let status = if report.rows_with_errors > 0 {
            "error"
        } else if report.findings.is_empty() {
            "ready"
        } else {
            "warning"
        };
        Self {
            status,
            summary: report.summary(),
            file,
            report,
        }
    }
}

/// Create an error response body.
pub fn error_response(error: &str) -> Value {
    json!({
        "status": "error",
        "error": error,
    })
}

impl ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Pipeline(PipelineError::Parse(ParseError::Io(_))) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServerError::Pipeline(PipelineError::Parse(_) | PipelineError::Mapping(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServerError::Pipeline(PipelineError::Run(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = error_response(&self.to_string());
        if let ServerError::Pipeline(PipelineError::Mapping(MappingError::MissingFields { missing_fields })) = &self {
            body["missingFields"] = json!(missing_fields);
        }
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RunError, SniffError};
    use crate::models::CanonicalField;

    #[test]
    fn test_status_codes() {
        let unreadable: ServerError = PipelineError::from(SniffError::Empty).into();
        assert_eq!(unreadable.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let cancelled: ServerError = PipelineError::from(RunError::Cancelled {
            processed: 1,
            total: 2,
        })
        .into();
        assert_eq!(cancelled.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let bad = ServerError::BadRequest("no file".into());
        assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_missing_fields_in_body() {
        let err: ServerError = PipelineError::from(MappingError::MissingFields {
            missing_fields: vec![CanonicalField::City],
        })
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
