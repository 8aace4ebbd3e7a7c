use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::entities::{session, user::{self, Entity as User}};
use crate::error::{AppError, FieldErrors};
use crate::middleware::auth::{generate_token, hash_token, AuthUser, CSRF_COOKIE, SESSION_COOKIE};
use crate::state::AppState;

#[derive(Deserialize, utoipa::ToSchema)]
pub struct SignupRequest {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct UserResponse {
    pub id: i32,
    pub username: String,
    pub email: String,
}

impl From<user::Model> for UserResponse {
    fn from(user: user::Model) -> Self {
        UserResponse {
            id: user.id,
            username: user.username,
            email: user.email,
        }
    }
}

impl From<&AuthUser> for UserResponse {
    fn from(user: &AuthUser) -> Self {
        UserResponse {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct AuthResponse {
    user: UserResponse,
    message: String,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct MessageResponse {
    message: String,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct CsrfResponse {
    detail: String,
}

fn csrf_cookie(token: String) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE, token))
        .path("/")
        .same_site(SameSite::Lax)
        .build()
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Creates a server-side session and attaches its cookie plus a fresh CSRF token.
async fn start_session(
    db: &DatabaseConnection,
    user_id: i32,
    ttl: chrono::Duration,
    jar: CookieJar,
) -> Result<CookieJar, AppError> {
    let token = generate_token();
    let now = chrono::Utc::now().naive_utc();

    session::ActiveModel {
        user_id: Set(user_id),
        token_hash: Set(hash_token(&token)),
        expires_at: Set(now + ttl),
        created_at: Set(now),
        revoked: Set(false),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(jar.add(session_cookie(token)).add(csrf_cookie(generate_token())))
}

fn validate_signup(username: &str, email: &str, password: &str) -> FieldErrors {
    let mut errors = FieldErrors::new();

    if username.is_empty() {
        errors.entry("username".into()).or_default().push("This field may not be blank.".into());
    } else if username.chars().count() > 150 {
        errors.entry("username".into()).or_default().push("Ensure this field has no more than 150 characters.".into());
    } else if !username.chars().all(|c| c.is_alphanumeric() || "@.+-_".contains(c)) {
        errors.entry("username".into()).or_default().push(
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.".into(),
        );
    }

    if !email.is_empty() && !email.contains('@') {
        errors.entry("email".into()).or_default().push("Enter a valid email address.".into());
    }

    if password.is_empty() {
        errors.entry("password".into()).or_default().push("This field may not be blank.".into());
    } else if password.chars().count() < 8 {
        errors.entry("password".into()).or_default().push("Ensure this field has at least 8 characters.".into());
    }

    errors
}

#[utoipa::path(
    get,
    path = "/csrf/",
    responses(
        (status = 200, description = "CSRF cookie set", body = CsrfResponse)
    ),
    tag = "Authentication"
)]
pub async fn csrf(jar: CookieJar) -> impl IntoResponse {
    let token = jar
        .get(CSRF_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(generate_token);

    (
        jar.add(csrf_cookie(token)),
        Json(CsrfResponse { detail: "CSRF cookie set".to_string() }),
    )
}

#[utoipa::path(
    post,
    path = "/auth/signup/",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created and logged in", body = AuthResponse),
        (status = 400, description = "Invalid signup data")
    ),
    tag = "Authentication"
)]
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let username = payload.username.unwrap_or_default().trim().to_string();
    let email = payload.email.unwrap_or_default().trim().to_string();
    let password = payload.password.unwrap_or_default();

    let mut errors = validate_signup(&username, &email, &password);
    if errors.is_empty() {
        let taken = User::find()
            .filter(user::Column::Username.eq(&username))
            .one(&state.db)
            .await?
            .is_some();
        if taken {
            errors.entry("username".into()).or_default().push("A user with that username already exists.".into());
        }
    }
    if !errors.is_empty() {
        info!("Auth | POST /auth/signup/ | user={} | res=400", username);
        return Err(AppError::Validation("Invalid signup data".to_string(), errors));
    }

    let created = create_user(&state.db, &username, &email, &password).await?;
    let jar = start_session(&state.db, created.id, state.config.session_ttl, jar).await?;

    info!("Auth | POST /auth/signup/ | user={} | res=201", created.username);
    Ok((
        StatusCode::CREATED,
        jar,
        Json(AuthResponse {
            user: UserResponse::from(created),
            message: "User created successfully".to_string(),
        }),
    ))
}

/// Hashes the password with argon2 and inserts the user. Shared with the CLI.
pub async fn create_user(
    db: &DatabaseConnection,
    username: &str,
    email: &str,
    password: &str,
) -> Result<user::Model, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::InternalServerError(format!("Password hash error: {}", e)))?
        .to_string();

    let created = user::ActiveModel {
        username: Set(username.to_string()),
        email: Set(email.to_string()),
        password: Set(password_hash),
        created_at: Set(chrono::Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(created)
}

#[utoipa::path(
    post,
    path = "/auth/login/",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 400, description = "Missing username or password"),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (username, password) = match (payload.username, payload.password) {
        (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => (u, p),
        _ => return Err(AppError::BadRequest("Please provide both username and password".to_string())),
    };

    let found = User::find()
        .filter(user::Column::Username.eq(&username))
        .one(&state.db)
        .await?;

    let verified = found.filter(|user| {
        PasswordHash::new(&user.password)
            .map(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
            .unwrap_or_else(|e| {
                warn!("Auth | stored hash for {} is unreadable: {}", user.username, e);
                false
            })
    });

    let Some(user) = verified else {
        info!("Auth | POST /auth/login/ | user={} | res=401", username);
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    };

    let jar = start_session(&state.db, user.id, state.config.session_ttl, jar).await?;

    info!("Auth | POST /auth/login/ | user={} | res=200", user.username);
    Ok((
        jar,
        Json(AuthResponse {
            user: UserResponse::from(user),
            message: "Login successful".to_string(),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/logout/",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Not logged in")
    ),
    tag = "Authentication"
)]
pub async fn logout(
    State(db): State<DatabaseConnection>,
    Extension(auth_user): Extension<AuthUser>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    if let Some(found) = session::Entity::find_by_id(auth_user.session_id).one(&db).await? {
        let mut active: session::ActiveModel = found.into();
        active.revoked = Set(true);
        active.update(&db).await?;
    }

    info!("Auth | POST /auth/logout/ | user={} | res=200", auth_user.username);
    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/"));
    Ok((
        jar,
        Json(MessageResponse {
            message: "Logout successful".to_string(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/auth/user/",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not logged in")
    ),
    tag = "Authentication"
)]
pub async fn current_user(Extension(auth_user): Extension<AuthUser>) -> Json<UserResponse> {
    Json(UserResponse::from(&auth_user))
}

#[cfg(test)]
mod tests {
    use super::validate_signup;

    #[test]
    fn test_validate_signup() {
        assert!(validate_signup("grower_1", "", "long enough").is_empty());
        assert!(validate_signup("grower@farm.io", "g@farm.io", "long enough").is_empty());

        let errors = validate_signup("", "not-an-email", "short");
        assert_eq!(errors.len(), 3);
        assert!(errors.contains_key("username"));
        assert!(errors.contains_key("email"));
        assert!(errors.contains_key("password"));

        assert!(validate_signup("bad name", "", "long enough").contains_key("username"));
    }
}
