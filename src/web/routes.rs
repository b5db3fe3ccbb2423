//! HTTP route handlers for ad delivery, click tracking, RTB, and status.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::{pool, queries};
use crate::error::AdServerError;
use crate::serving::{BidRequest, ServeOutcome, ZoneRef};
use crate::targeting::{DeviceKind, RequestContext};

use super::server::AppState;

/// Build all API routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ads/zone/:zone_id", get(serve_zone))
        .route("/ads/zone/name/:zone_name", get(serve_zone_by_name))
        .route("/ads/click/:ad_id/:impression_id", get(click))
        .route("/ads/impression/:ad_id", post(impression_beacon))
        .route("/rtb/bid", post(rtb_bid))
        .route("/api/status", get(status))
        .route("/health", get(health))
}

/// Optional targeting hints the embed snippet appends to serve requests.
#[derive(Debug, Default, Deserialize)]
struct ServeQuery {
    device: Option<String>,
    country: Option<String>,
    path: Option<String>,
}

/// GET /ads/zone/{zone_id} — serve a creative for a zone.
async fn serve_zone(
    State(state): State<AppState>,
    Path(zone_id): Path<i64>,
    Query(query): Query<ServeQuery>,
    headers: HeaderMap,
) -> Response {
    let ctx = request_context(&query, &headers);
    serve_response(state.engine.serve_zone(ZoneRef::Id(zone_id), &ctx).await)
}

/// GET /ads/zone/name/{zone_name} — serve by the zone's unique name, for
/// templates that don't carry numeric ids.
async fn serve_zone_by_name(
    State(state): State<AppState>,
    Path(zone_name): Path<String>,
    Query(query): Query<ServeQuery>,
    headers: HeaderMap,
) -> Response {
    let ctx = request_context(&query, &headers);
    serve_response(
        state
            .engine
            .serve_zone(ZoneRef::Name(&zone_name), &ctx)
            .await,
    )
}

/// GET /ads/click/{ad_id}/{impression_id} — the tracking URL baked into
/// every served creative. Redirects to the campaign's landing page when it
/// has a safe one, otherwise acknowledges with JSON.
async fn click(
    State(state): State<AppState>,
    Path((ad_id, impression_id)): Path<(i64, Uuid)>,
    Query(query): Query<ServeQuery>,
    headers: HeaderMap,
) -> Response {
    let ctx = request_context(&query, &headers);
    match state.engine.handle_click(ad_id, impression_id, &ctx).await {
        Ok(outcome) => match outcome.redirect_url.as_deref() {
            Some(url) => Redirect::to(url).into_response(),
            None => Json(json!({ "status": "recorded", "clickId": outcome.click_id }))
                .into_response(),
        },
        Err(error) => error_response(error),
    }
}

/// POST /ads/impression/{ad_id} — beacon for creatives rendered outside
/// the zone pipeline.
async fn impression_beacon(
    State(state): State<AppState>,
    Path(ad_id): Path<i64>,
    Query(query): Query<ServeQuery>,
    headers: HeaderMap,
) -> Response {
    let ctx = request_context(&query, &headers);
    match state.engine.record_impression_for_ad(ad_id, &ctx).await {
        Ok(impression_id) => Json(json!({ "impressionId": impression_id })).into_response(),
        Err(error) => error_response(error),
    }
}

/// POST /rtb/bid — answer a bid request; 204 means no-bid.
async fn rtb_bid(State(state): State<AppState>, Json(req): Json<BidRequest>) -> Response {
    match state.engine.run_bid_request(&req).await {
        Ok(Some(response)) => Json(response).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(error),
    }
}

/// GET /api/status — serving counters and a revenue snapshot.
async fn status(State(state): State<AppState>) -> Json<Value> {
    let stats = state.engine.stats();
    let active_campaigns = queries::count_active_campaigns(&state.db)
        .await
        .unwrap_or_default();
    let earnings_today = queries::earnings_today(&state.db).await.unwrap_or_default();

    Json(json!({
        "status": "running",
        "serving": stats,
        "active_campaigns": active_campaigns,
        "earnings_today": earnings_today,
        "tracked_campaigns": state.tracker.tracked_campaigns(),
        "event_subscribers": state.events.subscriber_count(),
    }))
}

/// GET /health — liveness plus a database round-trip.
async fn health(State(state): State<AppState>) -> Response {
    match pool::health_check(&state.db).await {
        Ok(()) => "ok".into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "db unavailable").into_response(),
    }
}

/// Assemble the request context shared by the serve, click, and beacon
/// handlers from query hints and headers.
fn request_context(query: &ServeQuery, headers: &HeaderMap) -> RequestContext {
    RequestContext {
        claimed_device: query.device.as_deref().and_then(DeviceKind::parse),
        country: query.country.as_deref().map(|c| c.to_ascii_uppercase()),
        path: query.path.clone(),
        session_id: header_value(headers, "x-session-id"),
        visitor_id: header_value(headers, "x-visitor-id"),
        ip: client_ip(headers),
        user_agent: header_value(headers, "user-agent"),
        now: Some(chrono::Utc::now()),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// Client IP from the reverse proxy: first x-forwarded-for hop, then
/// x-real-ip.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = header_value(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }
    header_value(headers, "x-real-ip")
}

fn serve_response(result: crate::error::Result<ServeOutcome>) -> Response {
    match result {
        Ok(ServeOutcome::Creative(payload)) => Json(payload).into_response(),
        Ok(ServeOutcome::Fallback { html }) => {
            Json(json!({ "fallback": true, "html": html })).into_response()
        }
        Ok(ServeOutcome::Empty) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(error),
    }
}

/// Validation problems are the caller's fault; everything else is ours.
fn error_response(error: AdServerError) -> Response {
    let status = match &error {
        AdServerError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}
