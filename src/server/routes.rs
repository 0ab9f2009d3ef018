//! Route handlers.

use axum::{
    extract::{rejection::JsonRejection, ws::WebSocketUpgrade, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthError;
use crate::channel::Submission;
use crate::constants::{APP_ROOT_PATH, CREDENTIAL_PATH, REALTIME_PATH, SUBMIT_FORM_PATH, SUBMIT_PATH};

use super::publisher::PublishError;
use super::AppState;

/// All routes, bound to `state`.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(APP_ROOT_PATH, get(index))
        .route(CREDENTIAL_PATH, get(issue_credential))
        .route(SUBMIT_PATH, post(submit))
        .route(SUBMIT_FORM_PATH, post(submit))
        .route(REALTIME_PATH, get(realtime))
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// GET /
async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "service": "formcast",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/channel-auth
async fn issue_credential(State(state): State<AppState>) -> Response {
    match state.broker.issue_credential(state.broker.client_role()) {
        Ok(credential) => Json(credential).into_response(),
        Err(AuthError::ConfigMissing) => {
            log::error!("Credential requested but signing key is not configured");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                AuthError::ConfigMissing.to_string(),
            )
        }
        Err(e) => {
            log::error!("Error creating channel credential: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create channel credential",
            )
        }
    }
}

/// POST /api/submit and /api/submit-form
async fn submit(
    State(state): State<AppState>,
    body: Result<Json<Submission>, JsonRejection>,
) -> Response {
    if !state.publisher.is_configured() {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            PublishError::ConfigMissing.to_string(),
        );
    }

    let submission = match body {
        Ok(Json(submission)) => submission,
        Err(rejection) => {
            log::error!("Error reading submission body: {}", rejection.body_text());
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to submit form");
        }
    };

    if let Some(store) = &state.store {
        if let Err(e) = store.save(&submission).await {
            log::error!("Error saving submission: {}", e);
        }
    }

    match state.publisher.publish(&submission).await {
        Ok(_) => Json(json!({
            "success": true,
            "message": "Form submitted successfully",
        }))
        .into_response(),
        Err(e) => {
            log::error!("Error submitting form: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to submit form")
        }
    }
}

#[derive(Debug, Deserialize)]
struct RealtimeQuery {
    access_token: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}

/// GET /realtime
async fn realtime(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RealtimeQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = bearer_token(&headers).or(query.access_token) else {
        return error_response(StatusCode::UNAUTHORIZED, "Missing credential");
    };

    match state.broker.verify(&token) {
        Ok(claims) => {
            let fabric = state.fabric.clone();
            ws.on_upgrade(move |socket| fabric.serve_socket(socket, claims))
        }
        Err(e) => {
            log::warn!("Refused realtime connection: {}", e);
            error_response(StatusCode::UNAUTHORIZED, e.to_string())
        }
    }
}
