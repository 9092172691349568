//! HTTP transport for identity reconciliation.
//!
//! # Responsibility
//! - Map `POST /identify` JSON bodies onto `IdentityService::identify`.
//! - Translate `IdentityError` into 400/500 responses.
//!
//! # Invariants
//! - Each request opens its own SQLite connection on a blocking worker; no
//!   connection or lock is shared across requests.
//! - 500 bodies never carry internal error text; details go to the log.

pub mod config;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use identity_core::db::open_db;
use identity_core::{
    ContactGroup, IdentifyRequest, IdentityError, IdentityResult, IdentityService, RepoError,
    SqliteContactStore,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Shared handler state: where the contact database lives.
#[derive(Debug, Clone)]
pub struct AppState {
    db_path: Arc<PathBuf>,
}

impl AppState {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Arc::new(db_path.into()),
        }
    }

    pub fn db_path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Opens and migrates the database once; used at startup and by
    /// `/healthz`.
    pub fn check_store(&self) -> IdentityResult<()> {
        let conn = open_db(self.db_path()).map_err(store_unavailable)?;
        SqliteContactStore::try_new(&conn)?;
        Ok(())
    }

    fn resolve(&self, request: &IdentifyRequest) -> IdentityResult<ContactGroup> {
        let conn = open_db(self.db_path()).map_err(store_unavailable)?;
        let store = SqliteContactStore::try_new(&conn)?;
        IdentityService::new(store).identify(request)
    }
}

fn store_unavailable(err: identity_core::db::DbError) -> IdentityError {
    IdentityError::StoreUnavailable(RepoError::Db(err))
}

/// `POST /identify` body. `phoneNumber` may arrive as a JSON number.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyPayload {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<TextOrNumber>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextOrNumber {
    Text(String),
    Number(serde_json::Number),
}

impl From<IdentifyPayload> for IdentifyRequest {
    fn from(value: IdentifyPayload) -> Self {
        Self {
            email: value.email,
            phone_number: value.phone_number.map(|phone| match phone {
                TextOrNumber::Text(text) => text,
                TextOrNumber::Number(number) => number.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    error: String,
}

/// Error response: status plus a client-safe message.
#[derive(Debug, Clone)]
pub struct ApiFailure {
    status: StatusCode,
    message: String,
}

impl ApiFailure {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }

    fn invalid_json(rejection: &JsonRejection) -> Self {
        Self::bad_request(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl From<&IdentityError> for ApiFailure {
    fn from(value: &IdentityError) -> Self {
        match value {
            IdentityError::InvalidInput => Self::bad_request(value.to_string()),
            IdentityError::StoreUnavailable(_) | IdentityError::Internal(_) => Self::internal(),
        }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Builds the service router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/identify", post(identify))
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Hello World" }))
}

async fn healthz(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiFailure> {
    let outcome = tokio::task::spawn_blocking(move || state.check_store()).await;
    match outcome {
        Ok(Ok(())) => Ok(Json(json!({ "status": "ok" }))),
        Ok(Err(err)) => {
            error!(
                "event=http_request module=http status=error route=/healthz error_code={} error={}",
                err.code(),
                err
            );
            Err(ApiFailure::internal())
        }
        Err(join_err) => {
            error!(
                "event=http_request module=http status=error route=/healthz error_code=worker_failed error={}",
                join_err
            );
            Err(ApiFailure::internal())
        }
    }
}

async fn identify(
    State(state): State<AppState>,
    payload: Result<Json<IdentifyPayload>, JsonRejection>,
) -> Result<Json<ContactGroup>, ApiFailure> {
    let request_id = Uuid::new_v4();
    let started_at = Instant::now();

    let Json(payload) = payload.map_err(|rejection| {
        warn!(
            "event=http_request module=http status=rejected request_id={} route=/identify status_code=400 error_code=invalid_json",
            request_id
        );
        ApiFailure::invalid_json(&rejection)
    })?;
    let request = IdentifyRequest::from(payload);

    let outcome = tokio::task::spawn_blocking(move || state.resolve(&request)).await;
    let result = match outcome {
        Ok(result) => result,
        Err(join_err) => {
            error!(
                "event=http_request module=http status=error request_id={} route=/identify status_code=500 error_code=worker_failed error={}",
                request_id, join_err
            );
            return Err(ApiFailure::internal());
        }
    };

    match result {
        Ok(group) => {
            info!(
                "event=http_request module=http status=ok request_id={} route=/identify status_code=200 primary_id={} group_size={} duration_ms={}",
                request_id,
                group.primary().id,
                group.len(),
                started_at.elapsed().as_millis()
            );
            Ok(Json(group))
        }
        Err(err) => {
            let failure = ApiFailure::from(&err);
            error!(
                "event=http_request module=http status=error request_id={} route=/identify status_code={} error_code={} duration_ms={} error={}",
                request_id,
                failure.status.as_u16(),
                err.code(),
                started_at.elapsed().as_millis(),
                err
            );
            Err(failure)
        }
    }
}
