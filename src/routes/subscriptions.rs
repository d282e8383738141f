use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::responses::JsonResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionPayload {
    pub hospital_id: i64,
    pub package_type: String,
    pub billing_period: String,
    pub payment_order_id: String,
}

/// Called once the payment for a package has been confirmed.
pub async fn create_subscription(
    State(app_state): State<AppState>,
    Json(payload): Json<CreateSubscriptionPayload>,
) -> Response {
    let payment_order_id = payload.payment_order_id.trim();
    if payment_order_id.is_empty() {
        return JsonResponse::bad_request("payment_order_id is required").into_response();
    }

    match app_state
        .quota
        .create_subscription(
            payload.hospital_id,
            &payload.package_type,
            &payload.billing_period,
            payment_order_id,
        )
        .await
    {
        Ok(subscription) => (
            StatusCode::CREATED,
            Json(json!({ "success": true, "subscription": subscription })),
        )
            .into_response(),
        Err(err) => {
            error!(?err, hospital_id = payload.hospital_id, "subscription creation failed");
            JsonResponse::server_error("Failed to create subscription").into_response()
        }
    }
}

pub async fn get_active_subscription(
    State(app_state): State<AppState>,
    Path(hospital_id): Path<i64>,
) -> Response {
    match app_state
        .quota
        .resolve_active_subscription(hospital_id)
        .await
    {
        Some(subscription) => {
            Json(json!({ "success": true, "subscription": subscription })).into_response()
        }
        None => JsonResponse::not_found("No active subscription found").into_response(),
    }
}
