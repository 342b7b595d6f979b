//! Request/response endpoints: reports, blocks, health and error mapping

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::net::IpAddr;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Rejection, Reply};

use crate::core::server::SharedServerManager;
use crate::error::StudyMateError;

/// Body of every request/response reply
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            code: None,
        }
    }

    pub fn failure(err: &StudyMateError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            code: Some(err.code().to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub session_id: String,
    pub reason: String,
    #[serde(default)]
    pub messages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRequest {
    pub session_id: String,
    pub blocked_user_id: String,
}

/// Crate errors carried through warp's rejection chain
#[derive(Debug)]
pub struct ApiError(pub StudyMateError);

impl warp::reject::Reject for ApiError {}

impl From<StudyMateError> for Rejection {
    fn from(err: StudyMateError) -> Self {
        warp::reject::custom(ApiError(err))
    }
}

pub fn status_for(err: &StudyMateError) -> StatusCode {
    match err {
        StudyMateError::MalformedInput(_)
        | StudyMateError::ValidationError(_)
        | StudyMateError::SerializationError(_) => StatusCode::BAD_REQUEST,
        StudyMateError::UnknownSession(_) | StudyMateError::ConnectionNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        StudyMateError::InvalidState(_)
        | StudyMateError::AlreadyInSession(_)
        | StudyMateError::NotInSession => StatusCode::CONFLICT,
        StudyMateError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        StudyMateError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StudyMateError::StorageError(_) | StudyMateError::ConfigError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Render a crate error as a JSON reply with the matching status
pub fn error_reply(err: &StudyMateError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        log::error!("Request failed: {}", err);
    }

    let reply = warp::reply::with_status(warp::reply::json(&ApiResponse::failure(err)), status);
    match err {
        StudyMateError::RateLimited {
            retry_after_secs, ..
        } => warp::reply::with_header(reply, "Retry-After", retry_after_secs.to_string())
            .into_response(),
        _ => reply.into_response(),
    }
}

pub async fn report_handler(
    request: ReportRequest,
    ip: IpAddr,
    server: SharedServerManager,
) -> Result<impl Reply, Rejection> {
    let report = server
        .sessions()
        .file_report(&request.session_id, &request.reason, request.messages, ip)
        .await?;

    log::info!("Report {} filed for session {}", report.id, report.session_id);
    Ok(warp::reply::json(&ApiResponse::ok("Report submitted")))
}

pub async fn block_handler(
    request: BlockRequest,
    server: SharedServerManager,
) -> Result<impl Reply, Rejection> {
    server
        .sessions()
        .block_from_session(&request.session_id, &request.blocked_user_id)
        .await?;

    Ok(warp::reply::json(&ApiResponse::ok("User blocked")))
}

pub async fn health_handler(server: SharedServerManager) -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&server.health().await))
}

/// Turn every rejection into a JSON body
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if let Some(ApiError(e)) = err.find::<ApiError>() {
        return Ok(error_reply(e));
    }

    let (status, message, code) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string(), "NOT_FOUND")
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Malformed input: {}", e), "MALFORMED_INPUT")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large".to_string(), "MALFORMED_INPUT")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string(), "METHOD_NOT_ALLOWED")
    } else {
        log::error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string(), "INTERNAL_ERROR")
    };

    let body = ApiResponse {
        success: false,
        message,
        code: Some(code.to_string()),
    };
    Ok(warp::reply::with_status(warp::reply::json(&body), status).into_response())
}
