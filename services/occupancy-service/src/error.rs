use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::ingest::IngestError;
use crate::models::{ErrorResponse, RejectResponse};
use crate::validator::RejectReason;

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::MalformedInput(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    status: "error",
                    code: "malformed_input",
                    message,
                }),
            )
                .into_response(),
            IngestError::Rejected(reason) => {
                let status = match reason {
                    RejectReason::OutOfSequence { .. } => StatusCode::CONFLICT,
                    _ => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (
                    status,
                    Json(RejectResponse {
                        status: "rejected",
                        reason: reason.code(),
                        message: reason.to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}
