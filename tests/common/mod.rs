#![allow(dead_code)]

use std::io::Cursor;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, ResponseTemplate};

use whitefly_detect::config::Config;
use whitefly_detect::routes::create_routes;
use whitefly_detect::state::AppState;

pub const BOUNDARY: &str = "whitefly-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub db: DatabaseConnection,
    pub detector: MockServer,
    pub config: Config,
    _dir: TempDir,
}

/// Cookies and CSRF token of a logged-in test user.
#[derive(Clone, Debug)]
pub struct TestSession {
    pub session: String,
    pub csrf: String,
}

impl TestSession {
    pub fn cookie_header(&self) -> String {
        format!("sessionid={}; csrftoken={}", self.session, self.csrf)
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub cookies: Vec<(String, String)>,
    pub body: Value,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let db = Database::connect(&db_url).await.expect("Failed to open test database");
    Migrator::up(&db, None).await.expect("Failed to run migrations");

    let detector = MockServer::start().await;
    let mut config = Config::with_database(db_url, dir.path().join("media"));
    config.detection_batch_url = format!("{}/multi_file_async/", detector.uri());
    config.detection_single_url = format!("{}/post_single_file/", detector.uri());
    config.detection_timeout = Duration::from_secs(5);
    configure(&mut config);

    let state = AppState::new(db.clone(), config.clone()).expect("Failed to build app state");

    TestApp {
        router: create_routes(state),
        db,
        detector,
        config,
        _dir: dir,
    }
}

/// Matches request bodies containing `needle` anywhere. Multipart bodies carry raw image
/// bytes, so the body is searched as bytes rather than as UTF-8 text.
pub struct BodyContainsBytes(Vec<u8>);

pub fn body_contains(needle: impl AsRef<[u8]>) -> BodyContainsBytes {
    BodyContainsBytes(needle.as_ref().to_vec())
}

impl Match for BodyContainsBytes {
    fn matches(&self, request: &wiremock::Request) -> bool {
        !self.0.is_empty() && request.body.windows(self.0.len()).any(|window| window == self.0.as_slice())
    }
}

/// `n` boxes that fit inside a 64x64 test image.
pub fn detections(n: u32) -> Value {
    let result: Vec<Value> = (0..n)
        .map(|i| json!({ (i.to_string()): {"xmin": 2 + i, "ymin": 3 + i, "xmax": 40 + i, "ymax": 50} }))
        .collect();
    json!([{ "result": result }])
}

pub async fn mock_detections(app: &TestApp, n: u32) {
    Mock::given(method("POST"))
        .and(path("/multi_file_async/"))
        .and(body_contains("name=\"files\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(detections(n)))
        .mount(&app.detector)
        .await;
}

pub async fn mock_failure_for(app: &TestApp, filename: &str) {
    Mock::given(method("POST"))
        .and(path("/multi_file_async/"))
        .and(body_contains(format!("filename=\"{}\"", filename)))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .with_priority(1)
        .mount(&app.detector)
        .await;
}

pub fn test_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([90, 160, 60]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("Failed to encode test image");
    buffer.into_inner()
}

pub fn multipart_body(field: &str, files: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Multipart body built from raw part headers, for parts that are not plain image files.
pub fn raw_multipart_body(parts: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (disposition, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\n\r\n").as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn post_multipart(app: &TestApp, session: &TestSession, body: Vec<u8>) -> TestResponse {
    let request = Request::builder()
        .method("POST")
        .uri("/upload/")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .header(header::COOKIE, session.cookie_header())
        .header("X-CSRFToken", &session.csrf)
        .body(Body::from(body))
        .unwrap();
    send(app, request).await
}

pub async fn send(app: &TestApp, request: Request<Body>) -> TestResponse {
    let response = app.router.clone().oneshot(request).await.expect("request failed");
    let status = response.status();
    let cookies = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    TestResponse { status, cookies, body }
}

pub async fn get(app: &TestApp, uri: &str, session: Option<&TestSession>) -> TestResponse {
    let mut builder = Request::builder().uri(uri);
    if let Some(session) = session {
        builder = builder.header(header::COOKIE, session.cookie_header());
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

pub async fn post_json(app: &TestApp, uri: &str, body: Value, session: Option<&TestSession>) -> TestResponse {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(session) = session {
        builder = builder
            .header(header::COOKIE, session.cookie_header())
            .header("X-CSRFToken", &session.csrf);
    }
    send(app, builder.body(Body::from(body.to_string())).unwrap()).await
}

pub async fn upload(app: &TestApp, session: &TestSession, files: &[(&str, Vec<u8>)]) -> TestResponse {
    post_multipart(app, session, multipart_body("images", files)).await
}

pub fn session_from(response: &TestResponse) -> TestSession {
    let find = |name: &str| {
        response
            .cookies
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| panic!("response did not set {name}"))
    };
    TestSession {
        session: find("sessionid"),
        csrf: find("csrftoken"),
    }
}

pub async fn signup(app: &TestApp, username: &str) -> TestSession {
    let response = post_json(
        app,
        "/auth/signup/",
        json!({"username": username, "email": format!("{username}@farm.test"), "password": "greenhouse-42"}),
        None,
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED, "signup failed: {}", response.body);
    session_from(&response)
}
