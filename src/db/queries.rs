//! SQL query functions for all tables.

use sqlx::PgPool;
use uuid::Uuid;

use super::models::*;
use crate::error::Result;

// ── Zones ────────────────────────────────────────────────────────

pub async fn get_zone(pool: &PgPool, zone_id: i64) -> Result<Option<DbZone>> {
    let row = sqlx::query_as::<_, DbZone>("SELECT * FROM zones WHERE id = $1")
        .bind(zone_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_zone_by_name(pool: &PgPool, name: &str) -> Result<Option<DbZone>> {
    let row = sqlx::query_as::<_, DbZone>("SELECT * FROM zones WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

// ── Candidates ───────────────────────────────────────────────────

/// Load the campaign pool competing for a zone. Narrows by cheap status
/// flags and the schedule window; the full eligibility decision is the
/// targeting filter's job.
pub async fn get_zone_candidates(pool: &PgPool, zone_id: i64) -> Result<Vec<DbCandidate>> {
    let rows = sqlx::query_as::<_, DbCandidate>(
        "SELECT c.id AS campaign_id, c.advertiser_id, c.kind, c.bid_amount, c.budget,
                c.daily_budget, c.spent, c.target_url, c.devices, c.countries,
                c.page_patterns, c.hour_windows, c.days, c.starts_at, c.ends_at,
                p.priority, a.balance AS advertiser_balance, a.status AS advertiser_status
         FROM placements p
         JOIN campaigns c ON c.id = p.campaign_id
         JOIN advertisers a ON a.id = c.advertiser_id
         WHERE p.zone_id = $1 AND p.is_active = true AND c.status = 'active'
           AND (c.starts_at IS NULL OR c.starts_at <= now())
           AND (c.ends_at IS NULL OR c.ends_at >= now())
         ORDER BY p.id",
    )
    .bind(zone_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ── Ads ──────────────────────────────────────────────────────────

pub async fn get_active_ads(pool: &PgPool, campaign_id: i64) -> Result<Vec<DbAd>> {
    let rows = sqlx::query_as::<_, DbAd>(
        "SELECT * FROM ads WHERE campaign_id = $1 AND status = 'active' ORDER BY id",
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_click_target(pool: &PgPool, ad_id: i64) -> Result<Option<DbClickTarget>> {
    let row = sqlx::query_as::<_, DbClickTarget>(
        "SELECT ad.id AS ad_id, ad.status AS ad_status, c.id AS campaign_id,
                c.advertiser_id, c.kind, c.status AS campaign_status, c.bid_amount,
                c.budget, c.spent, c.target_url,
                a.status AS advertiser_status, a.balance AS advertiser_balance
         FROM ads ad
         JOIN campaigns c ON c.id = ad.campaign_id
         JOIN advertisers a ON a.id = c.advertiser_id
         WHERE ad.id = $1",
    )
    .bind(ad_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

// ── Impressions ──────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
pub async fn insert_impression(
    pool: &PgPool,
    id: Uuid,
    ad_id: i64,
    zone_id: Option<i64>,
    session_id: Option<&str>,
    visitor_id: Option<&str>,
    ip: Option<&str>,
    user_agent: Option<&str>,
    device: Option<&str>,
    country: Option<&str>,
    path: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO impressions (id, ad_id, zone_id, session_id, visitor_id, ip,
         user_agent, device, country, path)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(id)
    .bind(ad_id)
    .bind(zone_id)
    .bind(session_id)
    .bind(visitor_id)
    .bind(ip)
    .bind(user_agent)
    .bind(device)
    .bind(country)
    .bind(path)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_impression(pool: &PgPool, id: Uuid) -> Result<Option<DbImpression>> {
    let row = sqlx::query_as::<_, DbImpression>("SELECT * FROM impressions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

// ── Clicks ───────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
pub async fn insert_click(
    pool: &PgPool,
    impression_id: Uuid,
    ad_id: i64,
    campaign_id: i64,
    cost: f64,
    is_fraudulent: bool,
    fraud_score: i32,
    fraud_reason: Option<&str>,
    session_id: Option<&str>,
    ip: Option<&str>,
) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO clicks (impression_id, ad_id, campaign_id, cost, is_fraudulent,
         fraud_score, fraud_reason, session_id, ip)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING id",
    )
    .bind(impression_id)
    .bind(ad_id)
    .bind(campaign_id)
    .bind(cost)
    .bind(is_fraudulent)
    .bind(fraud_score)
    .bind(fraud_reason)
    .bind(session_id)
    .bind(ip)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// True when a click was already recorded for this impression.
pub async fn click_exists_for_impression(pool: &PgPool, impression_id: Uuid) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM clicks WHERE impression_id = $1)",
    )
    .bind(impression_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Clicks on one ad from one session during the trailing five minutes.
pub async fn count_session_ad_clicks_5m(
    pool: &PgPool,
    session_id: &str,
    ad_id: i64,
) -> Result<i64> {
    let n = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM clicks
         WHERE session_id = $1 AND ad_id = $2 AND created_at > now() - interval '5 minutes'",
    )
    .bind(session_id)
    .bind(ad_id)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

/// Clicks on one ad from one IP during the trailing five minutes.
pub async fn count_ip_ad_clicks_5m(pool: &PgPool, ip: &str, ad_id: i64) -> Result<i64> {
    let n = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM clicks
         WHERE ip = $1 AND ad_id = $2 AND created_at > now() - interval '5 minutes'",
    )
    .bind(ip)
    .bind(ad_id)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

/// Ad ids of a session's most recent clicks, newest first.
pub async fn recent_session_ad_ids(
    pool: &PgPool,
    session_id: &str,
    limit: i64,
) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT ad_id FROM clicks WHERE session_id = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(session_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Clicks already marked fraudulent from one IP during the trailing hour.
pub async fn count_ip_fraud_clicks_1h(pool: &PgPool, ip: &str) -> Result<i64> {
    let n = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM clicks
         WHERE ip = $1 AND is_fraudulent = true AND created_at > now() - interval '1 hour'",
    )
    .bind(ip)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

// ── Reporting ────────────────────────────────────────────────────

pub async fn count_active_campaigns(pool: &PgPool) -> Result<i64> {
    let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM campaigns WHERE status = 'active'")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

pub async fn earnings_today(pool: &PgPool) -> Result<f64> {
    let sum = sqlx::query_scalar::<_, f64>(
        "SELECT COALESCE((SELECT earnings FROM publisher_earnings WHERE day = CURRENT_DATE), 0)",
    )
    .fetch_one(pool)
    .await?;
    Ok(sum)
}
