//! services/api/src/web/middleware.rs
//!
//! Admin authentication middleware and the helpers handlers use to find out
//! who is calling.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use scribeloop_core::domain::Reader;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::web::state::AppState;

/// Header carrying the admin secret.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Middleware guarding admin routes: the `x-admin-token` header must match
/// the configured `ADMIN_SECRET`, otherwise the request is answered with 401.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    check_admin(&state, req.headers())?;
    Ok(next.run(req).await)
}

pub fn check_admin(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    if state.config.admin_secret.is_none() {
        warn!("Admin route called but no ADMIN_SECRET is configured");
        return Err(StatusCode::UNAUTHORIZED);
    }
    if state.is_admin_token(admin_token(headers)) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

pub fn admin_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
}

/// The auth session id from the `session=` cookie, if any.
pub fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .into_iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|c| c.trim().strip_prefix("session="))
        .filter(|id| !id.is_empty())
}

/// The reader behind the session cookie. Missing, unknown and expired
/// sessions all yield `None`.
pub async fn current_reader(state: &AppState, headers: &HeaderMap) -> Option<Reader> {
    let auth_session_id = session_id(headers)?;
    match state.db.validate_auth_session(auth_session_id).await {
        Ok(reader) => Some(reader),
        Err(e) => {
            debug!("Ignoring session cookie: {:?}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryAdapter;
    use crate::config::Config;
    use axum::http::HeaderValue;
    use scribeloop_core::domain::ProjectMetadata;

    fn state(admin_secret: Option<&str>) -> AppState {
        let config = Config {
            admin_secret: admin_secret.map(str::to_string),
            ..Config::default()
        };
        let db = MemoryAdapter::new(ProjectMetadata {
            book_title: config.default_book_title.clone(),
            total_chapters: config.default_total_chapters,
        });
        AppState::new(Arc::new(db), Arc::new(config))
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn test_admin_token_must_match_secret() {
        let state = state(Some("s3cret"));
        assert_eq!(check_admin(&state, &headers(&[(ADMIN_TOKEN_HEADER, "s3cret")])), Ok(()));
        assert_eq!(
            check_admin(&state, &headers(&[(ADMIN_TOKEN_HEADER, "guess")])),
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(check_admin(&state, &headers(&[])), Err(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_no_secret_means_no_admin() {
        let state = state(None);
        assert_eq!(
            check_admin(&state, &headers(&[(ADMIN_TOKEN_HEADER, "")])),
            Err(StatusCode::UNAUTHORIZED)
        );
        assert!(!state.is_admin_token(Some("anything")));
    }

    #[test]
    fn test_session_cookie_parsing() {
        assert_eq!(
            session_id(&headers(&[("cookie", "theme=dark; session=abc123")])),
            Some("abc123")
        );
        assert_eq!(
            session_id(&headers(&[("cookie", "theme=dark"), ("cookie", "session=xyz")])),
            Some("xyz")
        );
        assert_eq!(session_id(&headers(&[("cookie", "session=")])), None);
        assert_eq!(session_id(&headers(&[])), None);
    }

    #[tokio::test]
    async fn test_current_reader_requires_a_valid_session() {
        let state = state(None);
        state.db.create_reader("Ada", "hash").await.unwrap();
        state
            .db
            .create_auth_session("abc", "Ada", chrono::Utc::now() + chrono::Duration::days(1))
            .await
            .unwrap();

        let reader = current_reader(&state, &headers(&[("cookie", "session=abc")])).await;
        assert_eq!(reader.map(|r| r.pseudo), Some("Ada".to_string()));
        assert_eq!(
            current_reader(&state, &headers(&[("cookie", "session=nope")])).await,
            None
        );
    }
}
