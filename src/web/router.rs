use axum::{
    Router,
    http::{HeaderValue, Method, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::{
    modules,
    web::{AppState, auth, users},
};

const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/logout", post(auth::logout))
        .route("/api/v1/auth/forget-password", post(auth::forgot_password))
        .route("/api/v1/auth/me", get(auth::current_user))
        .route("/api/v1/user", get(users::list_users))
        .route(
            "/api/v1/user/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .merge(modules::murojaah::router())
        .merge(modules::recommendation::router())
        .merge(modules::schedule::router())
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    let configured =
        std::env::var("CORS_ALLOW_ORIGIN").unwrap_or_else(|_| DEFAULT_CORS_ORIGIN.to_string());
    let origin = configured.parse::<HeaderValue>().unwrap_or_else(|_| {
        warn!(origin = %configured, "invalid CORS_ALLOW_ORIGIN, using the default");
        HeaderValue::from_static(DEFAULT_CORS_ORIGIN)
    });

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
        ])
}

async fn root() -> impl IntoResponse {
    "Muraja service API is running"
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
