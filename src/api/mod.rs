// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// HTTP 服务 (axum)
///
/// | 路径 | 方法 |
/// |------|------|
/// | `/` | GET |
/// | `/api/health` | GET |
/// | `/api/stats` | GET |
/// | `/api/detect` | POST |
/// | `/api/detect/visualize` | POST |
/// | `/api/detect/video` | POST |
/// | `/api/detect/live-frame` | POST |
/// | `/api/analyze` | POST |
/// | `/api/confidence/set` | POST |
pub mod error;
pub mod handlers;
pub mod state;

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

/// 跨域配置, `*` 表示任意来源
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any)
            .allow_origin(Any)
            .max_age(Duration::from_secs(600));
    }
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION])
        .allow_credentials(true)
        .allow_origin(origins)
        .max_age(Duration::from_secs(600))
}

pub fn router(state: AppState, cors_origins: &[String], max_body_size: usize) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/api/health", get(handlers::health))
        .route("/api/stats", get(handlers::stats))
        .route("/api/detect", post(handlers::detect))
        .route("/api/detect/visualize", post(handlers::detect_visualize))
        .route("/api/detect/video", post(handlers::detect_video))
        .route("/api/detect/live-frame", post(handlers::detect_live_frame))
        .route("/api/analyze", post(handlers::analyze))
        .route("/api/confidence/set", post(handlers::set_confidence))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
}
