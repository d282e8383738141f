use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::responses::JsonResponse;
use crate::services::quota::{QuotaCheck, QuotaDenial};
use crate::state::AppState;

fn denial_response(check: &QuotaCheck) -> Response {
    let (status, code) = match check.denial {
        Some(QuotaDenial::LimitExceeded) => (StatusCode::TOO_MANY_REQUESTS, "quota_exceeded"),
        Some(QuotaDenial::NoActiveSubscription) => {
            (StatusCode::FORBIDDEN, "subscription_required")
        }
        Some(QuotaDenial::SubscriptionExpired) => (StatusCode::FORBIDDEN, "subscription_expired"),
        Some(QuotaDenial::UnknownActivity) => (StatusCode::BAD_REQUEST, "unknown_entity_type"),
        Some(QuotaDenial::StoreUnavailable) | None => {
            (StatusCode::INTERNAL_SERVER_ERROR, "quota_unavailable")
        }
    };
    JsonResponse::error_with_code(status, &check.message, code).into_response()
}

/// Read-only answer; always 200 with `{allowed, message}`.
pub async fn check_quota(
    State(app_state): State<AppState>,
    Path((hospital_id, entity_type)): Path<(i64, String)>,
) -> Response {
    let check = app_state
        .quota
        .check_allowed(hospital_id, &entity_type)
        .await;
    Json(check).into_response()
}

pub async fn record_usage(
    State(app_state): State<AppState>,
    Path((hospital_id, entity_type)): Path<(i64, String)>,
) -> Response {
    if app_state
        .quota
        .record_usage(hospital_id, &entity_type)
        .await
    {
        JsonResponse::success("Usage recorded").into_response()
    } else {
        JsonResponse::error_with_code(
            StatusCode::CONFLICT,
            "Usage could not be recorded for this hospital",
            "usage_not_recorded",
        )
        .into_response()
    }
}

pub async fn consume_quota(
    State(app_state): State<AppState>,
    Path((hospital_id, entity_type)): Path<(i64, String)>,
) -> Response {
    let check = app_state.quota.try_consume(hospital_id, &entity_type).await;
    if check.allowed {
        return Json(check).into_response();
    }
    denial_response(&check)
}
