mod home;
pub mod auth;
pub mod images;
pub mod media;
pub mod results;
pub mod upload;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::auth::{auth_middleware, CSRF_HEADER};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        home::root,
        auth::csrf,
        auth::signup,
        auth::login,
        auth::logout,
        auth::current_user,
        upload::upload_images,
        images::list_images,
        results::list_results,
        results::get_result,
        media::serve_media,
    ),
    components(
        schemas(
            home::ServiceInfo,
            auth::SignupRequest,
            auth::LoginRequest,
            auth::UserResponse,
            auth::AuthResponse,
            auth::MessageResponse,
            auth::CsrfResponse,
            upload::UploadResponse,
            crate::services::pipeline::ProcessedImage,
            images::ImageResponse,
            results::ResultResponse,
            crate::models::detection::BoundingBox,
        )
    ),
    tags(
        (name = "General", description = "General API information"),
        (name = "Authentication", description = "Session login, signup, logout and CSRF cookie"),
        (name = "Detection", description = "Image upload, whitefly detection and stored results")
    ),
    info(
        title = "Whitefly Detect API",
        version = "0.1.0",
        description = "Uploads leaf images to a whitefly detection service and keeps the annotated results",
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "session_cookie",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Cookie(
                        utoipa::openapi::security::ApiKeyValue::new("sessionid"),
                    ),
                ),
            );
        }
    }
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static(CSRF_HEADER)]),
    )
}

pub fn create_routes(state: AppState) -> Router {
    let swagger_router: Router = SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .into();

    // Everything below needs a session
    let protected_routes = Router::new()
        .route("/auth/logout/", post(auth::logout))
        .route("/auth/user/", get(auth::current_user))
        .route(
            "/upload/",
            post(upload::upload_images).layer(DefaultBodyLimit::max(state.config.max_upload_bytes)),
        )
        .route("/images/", get(images::list_images))
        .route("/results/", get(results::list_results))
        .route("/results/{id}/", get(results::get_result))
        .route("/media/{*path}", get(media::serve_media))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let cors = cors_layer(&state.config.cors_allowed_origins);

    let app_routes = Router::new()
        .route("/", get(home::root))
        .route("/csrf/", get(auth::csrf))
        .route("/auth/signup/", post(auth::signup))
        .route("/auth/login/", post(auth::login))
        .merge(protected_routes)
        .with_state(state);

    let router = Router::new()
        .merge(swagger_router)
        .merge(app_routes)
        .layer(TraceLayer::new_for_http());

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}
