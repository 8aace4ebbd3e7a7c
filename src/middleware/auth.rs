use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use base64::{engine::general_purpose, Engine as _};
use rand::Rng;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::entities::{session, user};
use crate::error::AppError;

pub const SESSION_COOKIE: &str = "sessionid";
pub const CSRF_COOKIE: &str = "csrftoken";
pub const CSRF_HEADER: &str = "x-csrftoken";

/// The caller's identity, inserted into request extensions by [`auth_middleware`].
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub id: i32,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub session_id: i32,
}

pub fn generate_token() -> String {
    let mut random_bytes = [0u8; 32];
    rand::thread_rng().fill(&mut random_bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(random_bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Resolves the session cookie to a user. Unsafe methods additionally need the
/// `X-CSRFToken` header to echo the `csrftoken` cookie.
pub async fn auth_middleware(
    State(db): State<DatabaseConnection>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(AppError::Unauthorized("Authentication credentials were not provided.".to_string()))?;

    let (session, user) = session::Entity::find()
        .filter(session::Column::TokenHash.eq(hash_token(&token)))
        .find_also_related(user::Entity)
        .one(&db)
        .await?
        .ok_or(AppError::Unauthorized("Invalid session".to_string()))?;

    let user = user.ok_or(AppError::Unauthorized("Invalid session".to_string()))?;

    if session.revoked || session.expires_at < chrono::Utc::now().naive_utc() {
        return Err(AppError::Unauthorized("Session expired. Please log in again.".to_string()));
    }

    if !req.method().is_safe() {
        let header = req.headers().get(CSRF_HEADER).and_then(|h| h.to_str().ok());
        let cookie = jar.get(CSRF_COOKIE).map(|c| c.value());
        match (header, cookie) {
            (Some(header), Some(cookie)) if !cookie.is_empty() && header == cookie => {}
            _ => {
                tracing::warn!("Auth | {} {} | user={} | CSRF check failed", req.method(), req.uri().path(), user.username);
                return Err(AppError::Forbidden("CSRF Failed: CSRF token missing or incorrect.".to_string()));
            }
        }
    }

    req.extensions_mut().insert(AuthUser {
        id: user.id,
        username: user.username,
        email: user.email,
        session_id: session.id,
    });

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique_and_cookie_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_hash_token_is_stable() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_eq!(hash_token("abc").len(), 64);
    }
}
