use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize, utoipa::ToSchema)]
pub struct ServiceInfo {
    name: &'static str,
    version: &'static str,
    /// `host:port` uploads are forwarded to.
    detection_service: String,
    docs: &'static str,
}

#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service name, version and detector address", body = ServiceInfo)
    ),
    tag = "General"
)]
pub async fn root(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        detection_service: state.pipeline.detection_service(),
        docs: "/swagger-ui",
    })
}
