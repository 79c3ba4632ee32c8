use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Form, Json, Router,
};
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{SignUpForm, UserResponse},
        extractors::BearerToken,
        services::{resolve_bearer, sign_up},
    },
    db::with_deadline,
    errors::StoreError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new().route("/signup", post(signup))
}

pub fn user_routes() -> Router<AppState> {
    Router::new().route("/user", get(current_user))
}

pub async fn ping() -> &'static str {
    "pong"
}

#[instrument(skip(state, form))]
pub async fn signup(
    State(state): State<AppState>,
    Form(form): Form<SignUpForm>,
) -> Result<(StatusCode, Json<UserResponse>), (StatusCode, String)> {
    let deadline = state.config.server.request_timeout;
    let user = with_deadline(
        deadline,
        sign_up(state.store.as_ref(), &form.username, &form.password),
    )
    .await
    .map_err(reject)?;

    info!(user_id = %user.id, "signup completed");
    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

#[instrument(skip_all)]
pub async fn current_user(
    State(state): State<AppState>,
    BearerToken(token_id): BearerToken,
) -> Result<Json<UserResponse>, (StatusCode, String)> {
    let deadline = state.config.server.request_timeout;
    let lookup = with_deadline(deadline, resolve_bearer(state.store.as_ref(), token_id)).await;
    let (token, user) = match lookup {
        Ok(found) => found,
        Err(StoreError::NotFound { .. }) => {
            warn!("unknown bearer token");
            return Err((StatusCode::UNAUTHORIZED, "Invalid token".into()));
        }
        Err(e) => return Err(reject(e)),
    };

    // Revocation and expiry are this caller's policy, not the store's.
    if !token.is_active_at(OffsetDateTime::now_utc()) {
        warn!(user_id = %user.id, revoked = token.is_revoked, "inactive bearer token");
        return Err((StatusCode::UNAUTHORIZED, "Token revoked or expired".into()));
    }

    Ok(Json(UserResponse::from(user)))
}

/// Maps a store error to a response; detail for server errors stays in the log.
fn reject(e: StoreError) -> (StatusCode, String) {
    match e {
        StoreError::Validation(msg) => {
            warn!(%msg, "request rejected");
            (StatusCode::BAD_REQUEST, msg)
        }
        StoreError::NotFound { entity } => (StatusCode::NOT_FOUND, format!("{entity} not found")),
        StoreError::AlreadyExists { entity } => {
            (StatusCode::CONFLICT, format!("{entity} already exists"))
        }
        other => {
            error!(error = %other, detail = ?other, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".into(),
            )
        }
    }
}
