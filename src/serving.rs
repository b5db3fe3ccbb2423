//! The serving engine — glues targeting, selection, auction, fraud scoring,
//! and billing into the three request pipelines: zone serve, click, and
//! RTB bid.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::billing::daily_spend::DailySpendTracker;
use crate::billing::{self, event_cost, BillableEvent, ChargeReceipt, ChargeRequest, PricingKind};
use crate::config::{Config, RtbConfig, ServingConfig};
use crate::db::models::{DbAd, DbCandidate, DbZone};
use crate::db::queries;
use crate::error::{AdServerError, Result};
use crate::events::bus::{AdEvent, EventBus};
use crate::fraud::{ClickHistory, FraudAction, FraudScorer};
use crate::sanitize::{safe_redirect_url, sanitize_creative_html};
use crate::selection::auction::run_auction;
use crate::selection::{pick_by_weight, pick_weighted, Candidate};
use crate::targeting::{is_eligible, CampaignSnapshot, DeviceKind, RequestContext};

/// Serving counters, shared across handlers.
#[derive(Debug, Default)]
pub struct ServeStats {
    impressions: AtomicU64,
    clicks_billed: AtomicU64,
    clicks_blocked: AtomicU64,
    auctions_run: AtomicU64,
    auctions_won: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub impressions: u64,
    pub clicks_billed: u64,
    pub clicks_blocked: u64,
    pub auctions_run: u64,
    pub auctions_won: u64,
}

impl ServeStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            impressions: self.impressions.load(Ordering::Relaxed),
            clicks_billed: self.clicks_billed.load(Ordering::Relaxed),
            clicks_blocked: self.clicks_blocked.load(Ordering::Relaxed),
            auctions_run: self.auctions_run.load(Ordering::Relaxed),
            auctions_won: self.auctions_won.load(Ordering::Relaxed),
        }
    }
}

/// Zone addressed by id or by its unique name.
#[derive(Debug, Clone, Copy)]
pub enum ZoneRef<'a> {
    Id(i64),
    Name(&'a str),
}

/// What a zone request produced.
#[derive(Debug, Clone)]
pub enum ServeOutcome {
    Creative(CreativePayload),
    /// Zone-configured fallback markup, already sanitized.
    Fallback { html: String },
    Empty,
}

/// Creative handed to the embedding page. Field names are part of the wire
/// format consumed by the frontend snippet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreativePayload {
    pub ad_id: i64,
    pub campaign_id: i64,
    pub impression_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cta_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cta_url: Option<String>,
    pub tracking_url: String,
}

/// Result of a click: recorded either way, billed unless blocked.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickOutcome {
    pub click_id: i64,
    pub action: FraudAction,
    pub fraud_score: u8,
    pub cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

// ── RTB wire types ───────────────────────────────────────────────

/// Inbound bid request, OpenRTB-flavored.
#[derive(Debug, Clone, Deserialize)]
pub struct BidRequest {
    pub id: String,
    #[serde(alias = "zoneId")]
    pub zone_id: i64,
    #[serde(default)]
    pub site: Option<BidSite>,
    #[serde(default)]
    pub device: Option<BidDevice>,
    #[serde(default)]
    pub floor: Option<f64>,
    #[serde(default, alias = "timeout")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BidSite {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub page: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BidDevice {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub ua: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    /// Two-letter country code.
    #[serde(default)]
    pub geo: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BidResponse {
    pub id: String,
    pub seatbid: Vec<SeatBid>,
    pub cur: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeatBid {
    pub bid: Vec<RtbBid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtbBid {
    pub id: String,
    pub impid: String,
    /// Clearing price — what the winner pays, not what it bid.
    pub price: f64,
    pub campaign_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adm: Option<String>,
}

// ── Engine ───────────────────────────────────────────────────────

/// Stateful core shared by all request handlers.
pub struct AdEngine {
    db: PgPool,
    serving: ServingConfig,
    rtb: RtbConfig,
    scorer: FraudScorer,
    tracker: Arc<DailySpendTracker>,
    events: Arc<EventBus>,
    stats: ServeStats,
}

impl AdEngine {
    pub fn new(
        db: PgPool,
        config: &Config,
        tracker: Arc<DailySpendTracker>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            db,
            serving: config.serving.clone(),
            rtb: config.rtb.clone(),
            scorer: FraudScorer::new(&config.fraud),
            tracker,
            events,
            stats: ServeStats::default(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Serve a zone: pick an eligible campaign by weight, pick one of its
    /// creatives by weight, record the impression, return the payload.
    ///
    /// A missing zone serves nothing; an inactive zone or an empty pool
    /// serves the zone's sanitized fallback markup when it has one.
    pub async fn serve_zone(&self, zone: ZoneRef<'_>, ctx: &RequestContext) -> Result<ServeOutcome> {
        let zone = match zone {
            ZoneRef::Id(id) => queries::get_zone(&self.db, id).await?,
            ZoneRef::Name(name) => queries::get_zone_by_name(&self.db, name).await?,
        };
        let Some(zone) = zone else {
            return Ok(ServeOutcome::Empty);
        };
        if !zone.is_active {
            return Ok(self.fallback_or_empty(&zone));
        }

        let eligible = self.eligible_campaigns(zone.id, ctx).await?;
        debug!(zone_id = zone.id, eligible = eligible.len(), "zone candidate pool filtered");
        if eligible.is_empty() {
            return Ok(self.fallback_or_empty(&zone));
        }

        let candidates: Vec<Candidate> = eligible
            .iter()
            .map(|c| Candidate {
                campaign_id: c.id,
                price: c.bid_amount,
                priority: c.priority,
            })
            .collect();
        let winner_id = {
            let mut rng = rand::thread_rng();
            match pick_weighted(&mut rng, &candidates) {
                Some(winner) => winner.campaign_id,
                None => return Ok(self.fallback_or_empty(&zone)),
            }
        };
        // The draw returned an id built from this pool, so the lookup hits.
        let Some(campaign) = eligible.iter().find(|c| c.id == winner_id) else {
            return Ok(self.fallback_or_empty(&zone));
        };

        let ads = queries::get_active_ads(&self.db, campaign.id).await?;
        let ad = {
            let mut rng = rand::thread_rng();
            pick_by_weight(&mut rng, &ads, |a| f64::from(a.weight.max(0))).cloned()
        };
        let Some(ad) = ad else {
            // campaign with no active creatives
            return Ok(self.fallback_or_empty(&zone));
        };

        let impression_id = self
            .record_impression(
                ad.id,
                Some(zone.id),
                campaign.id,
                campaign.advertiser_id,
                campaign.kind,
                campaign.bid_amount,
                ctx,
            )
            .await?;

        Ok(ServeOutcome::Creative(self.build_creative(
            &zone,
            campaign,
            &ad,
            impression_id,
        )))
    }

    /// Impression beacon for creatives rendered outside the zone pipeline
    /// (RTB wins, email embeds).
    pub async fn record_impression_for_ad(&self, ad_id: i64, ctx: &RequestContext) -> Result<Uuid> {
        let Some(target) = queries::get_click_target(&self.db, ad_id).await? else {
            return Err(AdServerError::Validation(format!("unknown ad {ad_id}")));
        };
        if target.ad_status != "active" || target.campaign_status != "active" {
            return Err(AdServerError::Validation(format!("ad {ad_id} is not servable")));
        }
        self.record_impression(
            ad_id,
            None,
            target.campaign_id,
            target.advertiser_id,
            PricingKind::parse(&target.kind),
            target.bid_amount,
            ctx,
        )
        .await
    }

    /// Process a click on a previously served impression: score it, record
    /// it, bill it unless blocked.
    pub async fn handle_click(
        &self,
        ad_id: i64,
        impression_id: Uuid,
        ctx: &RequestContext,
    ) -> Result<ClickOutcome> {
        let Some(target) = queries::get_click_target(&self.db, ad_id).await? else {
            return Err(AdServerError::Validation(format!("unknown ad {ad_id}")));
        };
        // Every served creative minted an impression row, so a click that
        // can't name one is forged or stale.
        let Some(impression) = queries::get_impression(&self.db, impression_id).await? else {
            return Err(AdServerError::Validation(format!(
                "unknown impression {impression_id}"
            )));
        };
        if impression.ad_id != ad_id {
            return Err(AdServerError::Validation(format!(
                "impression {impression_id} does not belong to ad {ad_id}"
            )));
        }

        let analysis = match self.gather_history(ad_id, impression_id, ctx).await {
            Ok(history) => self.scorer.analyze(ctx, &history),
            Err(error) => {
                warn!(%error, ad_id, "click history lookup degraded, minimal fraud check");
                match self.fallback_counts(ad_id, ctx).await {
                    Ok((session_5m, ip_5m)) => self.scorer.minimal_fallback(session_5m, ip_5m),
                    Err(error) => {
                        warn!(%error, ad_id, "fallback counts unavailable, flagging click");
                        self.scorer.degraded_flag()
                    }
                }
            }
        };

        let kind = PricingKind::parse(&target.kind);
        let mut cost = match analysis.action {
            FraudAction::Block => 0.0,
            _ => event_cost(kind, target.bid_amount, BillableEvent::Click).unwrap_or(0.0),
        };
        // Stale-read guard; the charge transaction still enforces the budget
        // under concurrency.
        if cost > 0.0 && target.spent + cost > target.budget {
            cost = 0.0;
            self.events.publish(AdEvent::BudgetExhausted {
                campaign_id: target.campaign_id,
            });
        }

        // The click row lands before the charge: a failed charge leaves an
        // unbilled record to reconcile, never a charge without a record.
        let click_id = queries::insert_click(
            &self.db,
            impression_id,
            ad_id,
            target.campaign_id,
            cost,
            analysis.is_fraudulent,
            i32::from(analysis.score),
            analysis.reason().as_deref(),
            ctx.session_id.as_deref(),
            ctx.ip.as_deref(),
        )
        .await?;

        if analysis.action != FraudAction::Block && cost > 0.0 {
            let charge = ChargeRequest {
                campaign_id: target.campaign_id,
                advertiser_id: target.advertiser_id,
                amount: cost,
                description: format!("{} click on ad {ad_id}", kind.as_str()),
                reference: click_id.to_string(),
            };
            if let Err(error) = self.apply_charge(&charge).await {
                if let AdServerError::BudgetExhausted { campaign_id } = &error {
                    self.events.publish(AdEvent::BudgetExhausted {
                        campaign_id: *campaign_id,
                    });
                }
                self.events.publish(AdEvent::BillingFailed {
                    campaign_id: target.campaign_id,
                    amount: cost,
                    error: error.to_string(),
                });
                return Err(error);
            }
        }

        match analysis.action {
            FraudAction::Block => {
                self.stats.clicks_blocked.fetch_add(1, Ordering::Relaxed);
                self.events.publish(AdEvent::ClickBlocked {
                    click_id,
                    campaign_id: target.campaign_id,
                    fraud_score: analysis.score,
                    reason: analysis.reason().unwrap_or_default(),
                });
            }
            _ => {
                self.stats.clicks_billed.fetch_add(1, Ordering::Relaxed);
                self.events.publish(AdEvent::ClickBilled {
                    click_id,
                    campaign_id: target.campaign_id,
                    cost,
                    fraud_score: analysis.score,
                });
            }
        }

        Ok(ClickOutcome {
            click_id,
            action: analysis.action,
            fraud_score: analysis.score,
            cost,
            redirect_url: target.target_url.as_deref().and_then(safe_redirect_url),
        })
    }

    /// Answer an RTB bid request with a second-price auction over the
    /// zone's eligible campaigns. Slow candidate loading means no-bid, not
    /// an error; exchanges drop late answers anyway.
    pub async fn run_bid_request(&self, req: &BidRequest) -> Result<Option<BidResponse>> {
        if req.id.trim().is_empty() {
            return Err(AdServerError::Validation("bid request id is required".into()));
        }
        if req.zone_id <= 0 {
            return Err(AdServerError::Validation("zoneId must be positive".into()));
        }

        let timeout_ms = req.timeout_ms.unwrap_or(self.rtb.default_timeout_ms);
        let floor = req.floor.unwrap_or(self.rtb.default_floor);

        let device = req.device.as_ref();
        let ctx = RequestContext {
            claimed_device: device
                .and_then(|d| d.kind.as_deref())
                .and_then(DeviceKind::parse),
            country: device
                .and_then(|d| d.geo.as_deref())
                .map(|c| c.to_ascii_uppercase()),
            path: req.site.as_ref().and_then(|s| s.page.clone()),
            ip: device.and_then(|d| d.ip.clone()),
            user_agent: device.and_then(|d| d.ua.clone()),
            now: Some(Utc::now()),
            ..Default::default()
        };

        let load = self.eligible_campaigns(req.zone_id, &ctx);
        let eligible = match timeout(Duration::from_millis(timeout_ms), load).await {
            Err(_) => {
                warn!(
                    request_id = %req.id,
                    zone_id = req.zone_id,
                    timeout_ms,
                    "candidate loading exceeded bid timeout, no-bid"
                );
                return Ok(None);
            }
            Ok(Err(error)) => {
                warn!(request_id = %req.id, %error, "candidate loading failed, no-bid");
                return Ok(None);
            }
            Ok(Ok(eligible)) => eligible,
        };

        let candidates: Vec<Candidate> = eligible
            .iter()
            .map(|c| Candidate {
                campaign_id: c.id,
                price: c.bid_amount,
                priority: c.priority,
            })
            .collect();

        self.stats.auctions_run.fetch_add(1, Ordering::Relaxed);
        let Some(outcome) = run_auction(&candidates, ctx.device(), floor) else {
            return Ok(None);
        };
        self.stats.auctions_won.fetch_add(1, Ordering::Relaxed);
        self.events.publish(AdEvent::AuctionWon {
            request_id: req.id.clone(),
            campaign_id: outcome.winner.campaign_id,
            bid_price: outcome.winner.price,
            clearing_price: outcome.clearing_price,
        });

        // Attach a creative when the winner has one; a missing creative is
        // not worth losing the auction over.
        let ads = match queries::get_active_ads(&self.db, outcome.winner.campaign_id).await {
            Ok(ads) => ads,
            Err(error) => {
                warn!(
                    %error,
                    campaign_id = outcome.winner.campaign_id,
                    "creative load failed, bidding without markup"
                );
                Vec::new()
            }
        };
        let ad = {
            let mut rng = rand::thread_rng();
            pick_by_weight(&mut rng, &ads, |a| f64::from(a.weight.max(0))).cloned()
        };
        let (ad_id, adm) = match ad {
            Some(ad) => (Some(ad.id), ad.html.as_deref().map(sanitize_creative_html)),
            None => (None, None),
        };

        Ok(Some(BidResponse {
            id: req.id.clone(),
            seatbid: vec![SeatBid {
                bid: vec![RtbBid {
                    id: Uuid::new_v4().to_string(),
                    impid: req.zone_id.to_string(),
                    price: outcome.clearing_price,
                    campaign_id: outcome.winner.campaign_id,
                    ad_id,
                    adm,
                }],
            }],
            cur: "USD".to_string(),
        }))
    }

    /// Load the zone's candidate pool and keep what the targeting filter
    /// accepts. Campaigns without their own daily budget fall under the
    /// site-wide default cap when one is configured.
    async fn eligible_campaigns(
        &self,
        zone_id: i64,
        ctx: &RequestContext,
    ) -> Result<Vec<CampaignSnapshot>> {
        let rows = queries::get_zone_candidates(&self.db, zone_id).await?;
        let mut eligible = Vec::with_capacity(rows.len());
        for row in rows {
            let mut snapshot = snapshot_from_row(row);
            if snapshot.daily_budget.is_none() && self.serving.default_daily_budget > 0.0 {
                snapshot.daily_budget = Some(self.serving.default_daily_budget);
            }
            if is_eligible(&snapshot, ctx, self.tracker.spent_today(snapshot.id)) {
                eligible.push(snapshot);
            }
        }
        Ok(eligible)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_impression(
        &self,
        ad_id: i64,
        zone_id: Option<i64>,
        campaign_id: i64,
        advertiser_id: i64,
        kind: PricingKind,
        bid_amount: f64,
        ctx: &RequestContext,
    ) -> Result<Uuid> {
        let impression_id = Uuid::new_v4();
        queries::insert_impression(
            &self.db,
            impression_id,
            ad_id,
            zone_id,
            ctx.session_id.as_deref(),
            ctx.visitor_id.as_deref(),
            ctx.ip.as_deref(),
            ctx.user_agent.as_deref(),
            ctx.device().map(|d| d.as_str()),
            ctx.country.as_deref(),
            ctx.path.as_deref(),
        )
        .await?;

        if let Some(cost) = event_cost(kind, bid_amount, BillableEvent::Impression) {
            if cost > 0.0 {
                self.apply_charge(&ChargeRequest {
                    campaign_id,
                    advertiser_id,
                    amount: cost,
                    description: format!("cpm impression for ad {ad_id}"),
                    reference: impression_id.to_string(),
                })
                .await?;
            }
        }

        self.stats.impressions.fetch_add(1, Ordering::Relaxed);
        self.events.publish(AdEvent::ImpressionServed {
            impression_id: impression_id.to_string(),
            ad_id,
            campaign_id,
            zone_id,
        });
        Ok(impression_id)
    }

    /// Charge durable storage, then mirror the amount into the in-process
    /// daily tracker. The tracker update stays outside the transaction; it
    /// is approximate by contract.
    async fn apply_charge(&self, req: &ChargeRequest) -> Result<ChargeReceipt> {
        let receipt = billing::charge(&self.db, req).await?;
        self.tracker.record(req.campaign_id, receipt.amount);
        Ok(receipt)
    }

    /// Raw frequency counts for the degraded fraud check.
    async fn fallback_counts(&self, ad_id: i64, ctx: &RequestContext) -> Result<(i64, i64)> {
        let session_5m = match ctx.session_id.as_deref() {
            Some(session_id) => {
                queries::count_session_ad_clicks_5m(&self.db, session_id, ad_id).await?
            }
            None => 0,
        };
        let ip_5m = match ctx.ip.as_deref() {
            Some(ip) => queries::count_ip_ad_clicks_5m(&self.db, ip, ad_id).await?,
            None => 0,
        };
        Ok((session_5m, ip_5m))
    }

    async fn gather_history(
        &self,
        ad_id: i64,
        impression_id: Uuid,
        ctx: &RequestContext,
    ) -> Result<ClickHistory> {
        let mut history = ClickHistory {
            duplicate_impression: queries::click_exists_for_impression(&self.db, impression_id)
                .await?,
            ..Default::default()
        };
        if let Some(session_id) = ctx.session_id.as_deref() {
            history.session_clicks_on_ad =
                queries::count_session_ad_clicks_5m(&self.db, session_id, ad_id).await?;
            history.recent_session_ad_ids =
                queries::recent_session_ad_ids(&self.db, session_id, 10).await?;
        }
        if let Some(ip) = ctx.ip.as_deref() {
            history.ip_clicks_on_ad = queries::count_ip_ad_clicks_5m(&self.db, ip, ad_id).await?;
            history.ip_fraud_clicks_hour = queries::count_ip_fraud_clicks_1h(&self.db, ip).await?;
        }
        Ok(history)
    }

    fn fallback_or_empty(&self, zone: &DbZone) -> ServeOutcome {
        match zone.fallback_html.as_deref() {
            Some(html) if !html.trim().is_empty() => ServeOutcome::Fallback {
                html: sanitize_creative_html(html),
            },
            _ => ServeOutcome::Empty,
        }
    }

    fn build_creative(
        &self,
        zone: &DbZone,
        campaign: &CampaignSnapshot,
        ad: &DbAd,
        impression_id: Uuid,
    ) -> CreativePayload {
        CreativePayload {
            ad_id: ad.id,
            campaign_id: campaign.id,
            impression_id,
            kind: creative_kind(ad).to_string(),
            format: zone.format.clone(),
            headline: ad.headline.clone(),
            description: ad.description.clone(),
            image_url: ad.image_url.clone(),
            video_url: ad.video_url.clone(),
            html: ad.html.as_deref().map(sanitize_creative_html),
            cta_label: ad.cta_label.clone(),
            cta_url: ad.cta_url.as_deref().and_then(safe_redirect_url),
            tracking_url: format!(
                "{}/ads/click/{}/{}",
                self.serving.public_base_url.trim_end_matches('/'),
                ad.id,
                impression_id
            ),
        }
    }
}

/// Convert a candidate row into the snapshot the decisioning core reads.
/// Malformed hour-window JSON reads as unrestricted rather than making the
/// campaign unservable.
pub fn snapshot_from_row(row: DbCandidate) -> CampaignSnapshot {
    let hour_windows = row
        .hour_windows
        .map(|value| serde_json::from_value(value).unwrap_or_default())
        .unwrap_or_default();
    CampaignSnapshot {
        id: row.campaign_id,
        advertiser_id: row.advertiser_id,
        kind: PricingKind::parse(&row.kind),
        bid_amount: row.bid_amount,
        budget: row.budget,
        daily_budget: row.daily_budget,
        spent: row.spent,
        target_url: row.target_url,
        devices: row.devices.unwrap_or_default(),
        countries: row.countries.unwrap_or_default(),
        page_patterns: row.page_patterns.unwrap_or_default(),
        hour_windows,
        days: row
            .days
            .unwrap_or_default()
            .into_iter()
            .filter_map(|d| u32::try_from(d).ok())
            .collect(),
        starts_at: row.starts_at,
        ends_at: row.ends_at,
        priority: row.priority,
        advertiser_balance: row.advertiser_balance,
        advertiser_active: row.advertiser_status == "active",
    }
}

fn creative_kind(ad: &DbAd) -> &'static str {
    if ad.video_url.is_some() {
        "video"
    } else if ad.html.is_some() {
        "html"
    } else if ad.image_url.is_some() {
        "image"
    } else {
        "text"
    }
}
