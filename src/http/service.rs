//! HTTP routes and the admission middleware.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::{Extension, Router};
use http_body_util::LengthLimitError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, field, info, instrument, warn, Span};

use super::wire::{ErrorResponse, WaitRequest, WaitResponse};
use crate::error::LimiterError;
use crate::ratelimit::{Admission, BucketKey, RateLimiter};

/// Largest request body the middleware will buffer.
const MAX_BODY_BYTES: usize = 64 * 1024;

const OVER_LIMIT_BODY: &str = "too many requests received";

const BODY_TOO_LARGE: &str = "request body too large";

struct AppState {
    limiter: Arc<RateLimiter>,
    /// Deadline for waiting on leaky bucket capacity
    admission_timeout: Duration,
}

/// Build the service router.
///
/// `POST /wait` sits behind the admission middleware; `GET /health` does not.
pub fn router(limiter: Arc<RateLimiter>, admission_timeout: Duration) -> Router {
    let state = Arc::new(AppState {
        limiter,
        admission_timeout,
    });

    Router::new()
        .route("/wait", post(handle_wait))
        .route_layer(middleware::from_fn_with_state(state, admit_request))
        .route("/health", get(|| async { "OK" }))
}

/// Run the configured limiter in front of the wrapped route.
///
/// Allowed requests wait for their release before the route runs.
#[instrument(
    skip_all,
    fields(id = field::Empty, application_id = field::Empty)
)]
async fn admit_request(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();

    // Check Content-Length before reading the body
    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared.is_some_and(|len| len > MAX_BODY_BYTES) {
        warn!(content_length = ?declared, "Request body too large");
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, BODY_TOO_LARGE.to_string());
    }

    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return body_error_response(e),
    };

    let wait_request: WaitRequest = match serde_json::from_slice(&bytes) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Received malformed wait request");
            return error_response(StatusCode::BAD_REQUEST, format!("invalid request: {e}"));
        }
    };

    let span = Span::current();
    span.record("id", wait_request.id.as_str());
    span.record("application_id", wait_request.application_id.as_str());

    let key = BucketKey::new(&wait_request.application_id);
    let admission = state
        .limiter
        .admit(
            &key,
            Some(wait_request.weight),
            tokio::time::sleep(state.admission_timeout),
        )
        .await;

    match admission {
        Ok(Admission::Allowed(release)) => {
            if let Err(e) = release.wait().await {
                return limiter_error_response(e);
            }
            debug!("Request admitted");
            parts.extensions.insert(wait_request);
            next.run(Request::from_parts(parts, Body::from(bytes))).await
        }
        Ok(Admission::Rejected { retry_after }) => {
            debug!(retry_after = ?retry_after, "Request rejected");
            match retry_after {
                Some(hint) => (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_after_secs(hint).to_string())],
                    OVER_LIMIT_BODY,
                )
                    .into_response(),
                None => (StatusCode::TOO_MANY_REQUESTS, OVER_LIMIT_BODY).into_response(),
            }
        }
        Ok(Admission::Cancelled) => {
            debug!("Request cancelled while waiting for admission");
            (StatusCode::TOO_MANY_REQUESTS, OVER_LIMIT_BODY).into_response()
        }
        Err(e) => limiter_error_response(e),
    }
}

/// Perform the simulated work and echo the request.
async fn handle_wait(Extension(request): Extension<WaitRequest>) -> Json<WaitResponse> {
    tokio::time::sleep(request.wait_duration()).await;
    info!(
        id = %request.id,
        application_id = %request.application_id,
        wait = ?request.wait_duration(),
        "Wait completed"
    );
    Json(WaitResponse::from(request))
}

/// `Retry-After` carries whole seconds; round up so clients never retry early.
fn retry_after_secs(hint: Duration) -> u64 {
    let secs = hint.as_secs() + u64::from(hint.subsec_nanos() > 0);
    secs.max(1)
}

fn body_error_response(e: axum::Error) -> Response {
    let inner = e.into_inner();
    if inner.is::<LengthLimitError>() {
        warn!("Request body too large");
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, BODY_TOO_LARGE.to_string());
    }
    warn!(error = %inner, "Failed to read request body");
    error_response(StatusCode::BAD_REQUEST, format!("invalid body: {inner}"))
}

fn limiter_error_response(e: LimiterError) -> Response {
    match e {
        LimiterError::Stopped => {
            warn!("Admission attempted on a stopped limiter");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        other => {
            error!(error = %other, "Rate limiter error");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal server error: {other}"),
            )
        }
    }
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}
