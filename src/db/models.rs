//! Database row types for all tables.
//!
//! Rows stay string-ly typed (`kind`, `status`); domain enums are parsed at
//! the boundary where a row becomes a snapshot for the decisioning core.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DbZone {
    pub id: i64,
    pub name: String,
    pub site_area: Option<String>,
    pub format: String,
    pub fallback_html: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DbAd {
    pub id: i64,
    pub campaign_id: i64,
    pub status: String,
    pub weight: i32,
    pub headline: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub html: Option<String>,
    pub cta_label: Option<String>,
    pub cta_url: Option<String>,
}

/// One row of the zone-candidate join: placement + campaign + advertiser.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DbCandidate {
    pub campaign_id: i64,
    pub advertiser_id: i64,
    pub kind: String,
    pub bid_amount: f64,
    pub budget: f64,
    pub daily_budget: Option<f64>,
    pub spent: f64,
    pub target_url: Option<String>,
    pub devices: Option<Vec<String>>,
    pub countries: Option<Vec<String>>,
    pub page_patterns: Option<Vec<String>>,
    pub hour_windows: Option<serde_json::Value>,
    pub days: Option<Vec<i32>>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub priority: i32,
    pub advertiser_balance: f64,
    pub advertiser_status: String,
}

/// The ad → campaign → advertiser join used by the click and beacon paths.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DbClickTarget {
    pub ad_id: i64,
    pub ad_status: String,
    pub campaign_id: i64,
    pub advertiser_id: i64,
    pub kind: String,
    pub campaign_status: String,
    pub bid_amount: f64,
    pub budget: f64,
    pub spent: f64,
    pub target_url: Option<String>,
    pub advertiser_status: String,
    pub advertiser_balance: f64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DbImpression {
    pub id: Uuid,
    pub ad_id: i64,
    pub zone_id: Option<i64>,
    pub session_id: Option<String>,
    pub visitor_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device: Option<String>,
    pub country: Option<String>,
    pub path: Option<String>,
    pub created_at: DateTime<Utc>,
}

