//! Request handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::AppState;
use crate::face_swap::{FaceSwapError, FaceSwapRequest};
use crate::governor::RateLimitStatus;
use crate::upstream::{ImageKitClient, ImageKitError};

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_PAGE_SIZE: u32 = 5;

/// Successful face-swap response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceSwapResponse {
    pub url: String,
    pub success: bool,
    pub rate_limit_status: RateLimitStatus,
}

/// Error payload shared by all endpoints.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_status: Option<RateLimitStatus>,
    /// Upstream failure text, kept out of `error` so the UI shows a generic message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Self::default()
        }
    }

    fn into_response(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Quota snapshot for clients deciding when to enable the try-on button.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorStatusResponse {
    pub rate_limit_status: RateLimitStatus,
    pub time_until_next_request_ms: u64,
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[instrument(skip(state, payload), fields(request_id = %Uuid::new_v4()))]
pub async fn face_swap(
    State(state): State<AppState>,
    payload: Result<Json<FaceSwapRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection, "Unreadable face-swap request body");
            return ErrorBody::new("Invalid request body").into_response(StatusCode::BAD_REQUEST);
        }
    };

    info!("Starting face-swap request");
    match state.face_swap.swap(request).await {
        Ok(outcome) => Json(FaceSwapResponse {
            url: outcome.url,
            success: true,
            rate_limit_status: outcome.rate_limit_status,
        })
        .into_response(),
        Err(err) => face_swap_error(err),
    }
}

fn face_swap_error(err: FaceSwapError) -> Response {
    let message = err.to_string();
    match err {
        FaceSwapError::MissingImages => {
            ErrorBody::new(message).into_response(StatusCode::BAD_REQUEST)
        }
        FaceSwapError::InvalidImage { field, source } => {
            warn!(field, error = %source, "Invalid image reference");
            ErrorBody::new(message).into_response(StatusCode::BAD_REQUEST)
        }
        FaceSwapError::RateLimited { status } => {
            warn!(
                max_requests = status.max_requests,
                remaining_requests = status.remaining_requests,
                reset_time = ?status.reset_time,
                "Rate limit exceeded"
            );
            ErrorBody {
                rate_limit_status: Some(status),
                ..ErrorBody::new(message)
            }
            .into_response(StatusCode::TOO_MANY_REQUESTS)
        }
        FaceSwapError::Unavailable(reason) => {
            error!(reason = %reason, "Face-swap provider not configured");
            ErrorBody::new(message).into_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
        FaceSwapError::Upstream(source) => {
            error!(error = %source, retryable = source.is_retryable(), "Face-swap API failed");
            ErrorBody {
                original_error: Some(source.to_string()),
                ..ErrorBody::new(message)
            }
            .into_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn face_swap_status(State(state): State<AppState>) -> Json<GovernorStatusResponse> {
    let limiter = state.face_swap.limiter();
    Json(GovernorStatusResponse {
        rate_limit_status: limiter.status(),
        time_until_next_request_ms: limiter.time_until_next_request().as_millis() as u64,
    })
}

#[derive(Debug, Deserialize)]
pub struct ReferenceQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

fn imagekit_client(state: &AppState) -> Result<&ImageKitClient, Response> {
    state.imagekit.as_deref().ok_or_else(|| {
        error!("ImageKit API key not found in configuration");
        ErrorBody::new("ImageKit API key missing on server")
            .into_response(StatusCode::INTERNAL_SERVER_ERROR)
    })
}

fn imagekit_error(err: ImageKitError, fallback: &str) -> Response {
    match err {
        ImageKitError::Status { status, body } => {
            error!(status, body = %body, "ImageKit request failed");
            ErrorBody {
                details: Some(body),
                ..ErrorBody::new(format!("ImageKit request failed: {}", status))
            }
            .into_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
        ImageKitError::Transport(e) => {
            error!(error = %e, "{}", fallback);
            ErrorBody::new(fallback).into_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[instrument(skip(state))]
pub async fn list_references(
    State(state): State<AppState>,
    Query(query): Query<ReferenceQuery>,
) -> Response {
    let client = match imagekit_client(&state) {
        Ok(client) => client,
        Err(response) => return response,
    };

    let page = query.page.unwrap_or(DEFAULT_PAGE);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    match client.list_references(page, limit).await {
        Ok(images) => Json(images).into_response(),
        Err(e) => imagekit_error(e, "Server error fetching ImageKit references"),
    }
}

#[instrument(skip(state))]
pub async fn count_references(State(state): State<AppState>) -> Response {
    let client = match imagekit_client(&state) {
        Ok(client) => client,
        Err(response) => return response,
    };

    match client.count_references().await {
        Ok(count) => Json(count).into_response(),
        Err(e) => imagekit_error(e, "Server error fetching ImageKit references count"),
    }
}
