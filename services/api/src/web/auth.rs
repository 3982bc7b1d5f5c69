//! services/api/src/web/auth.rs
//!
//! Reader login and logout. Logging in with an unknown pseudo registers it,
//! so readers never need a separate signup step.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use scribeloop_core::domain::Reader;
use scribeloop_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;
use utoipa::ToSchema;
use crate::web::middleware::session_id;
use crate::web::state::AppState;

/// Lifetime of a reader session.
const SESSION_DAYS: i64 = 30;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub pseudo: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReaderResponse {
    pub pseudo: String,
    /// True when this login registered the pseudo.
    pub created: bool,
}

fn session_cookie(auth_session_id: &str) -> String {
    format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        auth_session_id,
        Duration::days(SESSION_DAYS).num_seconds()
    )
}

fn hash_password(password: &str) -> Result<String, (StatusCode, String)> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to hash password".to_string())
        })
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /api/auth/login - Login, registering the pseudo on first use
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = ReaderResponse),
        (status = 201, description = "Pseudo registered and logged in", body = ReaderResponse),
        (status = 400, description = "Missing pseudo or password"),
        (status = 401, description = "Wrong password"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let pseudo = req.pseudo.trim();
    if pseudo.is_empty() || req.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Pseudo and password are required".to_string(),
        ));
    }

    // 1. Find the reader, or register the pseudo
    let (reader, created) = match state.db.get_reader_credentials(pseudo).await {
        Ok(credentials) => {
            let parsed_hash = PasswordHash::new(&credentials.hashed_password).map_err(|e| {
                error!("Failed to parse password hash: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error".to_string())
            })?;
            let valid = Argon2::default()
                .verify_password(req.password.as_bytes(), &parsed_hash)
                .is_ok();
            if !valid {
                return Err((StatusCode::UNAUTHORIZED, "Invalid pseudo or password".to_string()));
            }
            (
                Reader {
                    pseudo: credentials.pseudo,
                },
                false,
            )
        }
        Err(PortError::NotFound(_)) => {
            let password_hash = hash_password(&req.password)?;
            let reader = state
                .db
                .create_reader(pseudo, &password_hash)
                .await
                .map_err(|e| {
                    error!("Failed to register reader: {:?}", e);
                    crate::error::reject(e)
                })?;
            info!("Registered reader {}", reader.pseudo);
            (reader, true)
        }
        Err(e) => {
            error!("Failed to get reader: {:?}", e);
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Failed to login".to_string()));
        }
    };

    // 2. Create the auth session
    let auth_session_id = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::days(SESSION_DAYS);
    state
        .db
        .create_auth_session(&auth_session_id, &reader.pseudo, expires_at)
        .await
        .map_err(|e| {
            error!("Failed to create auth session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session".to_string())
        })?;

    // 3. Return response with cookie
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        [(header::SET_COOKIE, session_cookie(&auth_session_id))],
        Json(ReaderResponse {
            pseudo: reader.pseudo,
            created,
        }),
    ))
}

/// POST /api/auth/logout - Logout and invalidate session
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let auth_session_id =
        session_id(&headers).ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?;

    state
        .db
        .delete_auth_session(auth_session_id)
        .await
        .map_err(|e| {
            error!("Failed to delete auth session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to logout".to_string())
        })?;

    // Clear cookie
    let cookie = "session=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0";

    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie.to_string())]))
}
