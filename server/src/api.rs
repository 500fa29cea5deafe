//! Request handlers and wire types.

use crate::caller::CallerAddress;
use crate::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use keygate_license::{
    delivery_error_text, Denial, KeyError, KeyResult, KeyService, StorageError, Verification,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    pub script_id: String,
    pub device_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssueResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub message: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQuery {
    #[serde(default)]
    pub script_id: String,
    #[serde(default)]
    pub device_id: String,
    pub key: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub message: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeliverQuery {
    pub device_id: Option<String>,
    pub key: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Runs a store-backed service call on the blocking pool, bounded by the
/// configured store timeout.
async fn run_blocking<T, F>(state: &AppState, operation: &'static str, call: F) -> KeyResult<T>
where
    T: Send + 'static,
    F: FnOnce(&KeyService) -> KeyResult<T> + Send + 'static,
{
    let service = Arc::clone(&state.service);
    let task = tokio::task::spawn_blocking(move || call(&service));
    match tokio::time::timeout(state.config.store_timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            tracing::error!(operation, error = %join_err, "store task failed");
            Err(KeyError::Storage(StorageError::backend(operation, join_err)))
        }
        Err(_) => {
            tracing::error!(operation, timeout_ms = state.config.store_timeout.as_millis() as u64, "store call timed out");
            Err(KeyError::Storage(StorageError::Timeout { operation }))
        }
    }
}

fn status_of(err: &KeyError) -> StatusCode {
    StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn issue_error(err: &KeyError) -> Response {
    let body = IssueResponse {
        success: false,
        key: None,
        expires_at: None,
        message: err.public_message(),
    };
    (status_of(err), Json(body)).into_response()
}

pub(crate) async fn issue(
    State(state): State<AppState>,
    caller: CallerAddress,
    body: Result<Json<IssueRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        tracing::debug!(caller = caller.as_str(), "rejected unreadable issue body");
        let body = IssueResponse {
            success: false,
            key: None,
            expires_at: None,
            message: "Invalid request body".into(),
        };
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    };

    let result = run_blocking(&state, "issue", move |svc| {
        svc.issue(caller.as_str(), &req.script_id, &req.device_id)
    })
    .await;

    match result {
        Ok(issued) => {
            let message = if issued.reused {
                "Existing key returned"
            } else {
                "Key generated successfully"
            };
            let body = IssueResponse {
                success: true,
                key: Some(issued.key.into_string()),
                expires_at: Some(issued.expires_at),
                message: message.into(),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => issue_error(&err),
    }
}

fn verify_message(outcome: &Verification, key_given: bool) -> &'static str {
    match outcome {
        Verification::Valid { expires_at: None } => "Key system disabled",
        Verification::Valid { .. } if key_given => "Key valid",
        Verification::Valid { .. } => "Active key exists",
        Verification::Denied(Denial::Mismatch) => "Invalid key or device mismatch",
        Verification::Denied(Denial::Expired) => "Key expired",
        Verification::NoActiveKey => "No valid key found. Please get a key.",
    }
}

pub(crate) async fn verify(
    State(state): State<AppState>,
    caller: CallerAddress,
    Query(mut query): Query<VerifyQuery>,
) -> Response {
    // `?key=` with no value asks the existence question, same as omitting it.
    query.key = query.key.filter(|k| !k.is_empty());
    let key_given = query.key.is_some();
    let result = run_blocking(&state, "verify", move |svc| {
        svc.verify(
            caller.as_str(),
            &query.script_id,
            &query.device_id,
            query.key.as_deref(),
        )
    })
    .await;

    match result {
        Ok(outcome) => {
            let body = VerifyResponse {
                valid: outcome.is_valid(),
                expires_at: outcome.expires_at(),
                message: verify_message(&outcome, key_given).into(),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => {
            let body = VerifyResponse {
                valid: false,
                expires_at: None,
                message: err.public_message(),
            };
            (status_of(&err), Json(body)).into_response()
        }
    }
}

pub(crate) async fn deliver(
    State(state): State<AppState>,
    caller: CallerAddress,
    Path(script_id): Path<String>,
    Query(query): Query<DeliverQuery>,
) -> Response {
    let result = run_blocking(&state, "deliver", move |svc| {
        svc.deliver(
            caller.as_str(),
            &script_id,
            query.device_id.as_deref(),
            query.key.as_deref(),
        )
    })
    .await;

    let (status, body) = match result {
        Ok(payload) => (StatusCode::OK, payload),
        Err(err) => (status_of(&err), delivery_error_text(&err)),
    };
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}
