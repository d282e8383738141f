pub mod quota;
pub mod subscriptions;

use axum::{
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};

use crate::responses::JsonResponse;
use crate::state::AppState;

/// All HTTP routes, before the transport layers added in `main`.
pub fn app_router(state: AppState) -> Router {
    let subscription_routes = Router::new()
        .route("/", post(subscriptions::create_subscription))
        .route("/{hospital_id}", get(subscriptions::get_active_subscription));

    let quota_routes = Router::new()
        .route("/{hospital_id}/{entity_type}", get(quota::check_quota))
        .route(
            "/{hospital_id}/{entity_type}/usage",
            post(quota::record_usage),
        )
        .route(
            "/{hospital_id}/{entity_type}/consume",
            post(quota::consume_quota),
        );

    Router::new()
        .route("/", get(root))
        .nest("/api/subscriptions", subscription_routes)
        .nest("/api/quota", quota_routes)
        .with_state(state)
}

/// A simple root route.
async fn root() -> Response {
    JsonResponse::success("Anagha Hospital Solutions API").into_response()
}
