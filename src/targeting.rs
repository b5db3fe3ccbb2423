//! Campaign eligibility — the pure targeting filter.
//!
//! Every check here is a plain value comparison over a [`CampaignSnapshot`]
//! and a [`RequestContext`]; nothing touches the database or the wall clock.
//! A campaign failing any check is skipped silently — ineligibility is not
//! an error.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::billing::PricingKind;

/// Device class a request is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Desktop => "desktop",
            DeviceKind::Mobile => "mobile",
            DeviceKind::Tablet => "tablet",
        }
    }

    pub fn parse(s: &str) -> Option<DeviceKind> {
        match s.to_ascii_lowercase().as_str() {
            "desktop" => Some(DeviceKind::Desktop),
            "mobile" => Some(DeviceKind::Mobile),
            "tablet" => Some(DeviceKind::Tablet),
            _ => None,
        }
    }

    /// Crude UA classification for requests that do not declare a device.
    /// Token list matches the fingerprint check in the fraud scorer so the
    /// two features never disagree about what "looks mobile" means.
    pub fn from_user_agent(ua: &str) -> DeviceKind {
        let ua = ua.to_ascii_lowercase();
        if ua.contains("ipad") || ua.contains("tablet") {
            DeviceKind::Tablet
        } else if ua.contains("mobile") || ua.contains("android") || ua.contains("iphone") {
            DeviceKind::Mobile
        } else {
            DeviceKind::Desktop
        }
    }
}

/// An inclusive `[start, end]` hour range, hours 0–23.
/// Overnight spans are expressed as two windows; `start > end` matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn contains(&self, hour: u32) -> bool {
        self.start <= hour && hour <= self.end
    }
}

/// Everything known about the incoming request at decision time.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Device declared by the caller (query param or bid request field),
    /// never inferred. [`RequestContext::device`] adds the UA fallback.
    pub claimed_device: Option<DeviceKind>,
    /// Uppercased ISO country code, when known.
    pub country: Option<String>,
    /// Page path the ad slot sits on.
    pub path: Option<String>,
    pub session_id: Option<String>,
    pub visitor_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Decision-time timestamp; hour and weekday checks derive from it.
    pub now: Option<DateTime<Utc>>,
}

impl RequestContext {
    /// The device this request is attributed to: the claimed value when
    /// present, otherwise inferred from the user agent.
    pub fn device(&self) -> Option<DeviceKind> {
        self.claimed_device.or_else(|| {
            self.user_agent
                .as_deref()
                .map(DeviceKind::from_user_agent)
        })
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    /// Hour of day, 0–23.
    pub fn hour(&self) -> u32 {
        self.now().hour()
    }

    /// Day of week, 0 = Sunday … 6 = Saturday.
    pub fn weekday(&self) -> u32 {
        self.now().weekday().num_days_from_sunday()
    }
}

/// The slice of campaign + placement + advertiser state the decisioning
/// core works on. Empty restriction lists mean "unrestricted".
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignSnapshot {
    pub id: i64,
    pub advertiser_id: i64,
    pub kind: PricingKind,
    pub bid_amount: f64,
    pub budget: f64,
    pub daily_budget: Option<f64>,
    pub spent: f64,
    pub target_url: Option<String>,
    pub devices: Vec<String>,
    pub countries: Vec<String>,
    pub page_patterns: Vec<String>,
    pub hour_windows: Vec<HourWindow>,
    pub days: Vec<u32>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Placement priority for the zone being served (0 when auctioning).
    pub priority: i32,
    pub advertiser_balance: f64,
    pub advertiser_active: bool,
}

/// Full eligibility decision for one campaign against one request.
///
/// `daily_spent` is the tracker's figure for this campaign today, read by
/// the caller so this function stays pure.
pub fn is_eligible(campaign: &CampaignSnapshot, ctx: &RequestContext, daily_spent: f64) -> bool {
    if campaign.spent >= campaign.budget {
        return false;
    }
    if let Some(daily_budget) = campaign.daily_budget {
        if daily_spent >= daily_budget {
            return false;
        }
    }
    if campaign.advertiser_balance <= 0.0 || !campaign.advertiser_active {
        return false;
    }
    if !within_schedule(campaign, ctx) {
        return false;
    }
    if !device_allowed(campaign, ctx) {
        return false;
    }
    if !country_allowed(campaign, ctx) {
        return false;
    }
    if !path_allowed(campaign, ctx) {
        return false;
    }
    if !hour_allowed(campaign, ctx) {
        return false;
    }
    if !day_allowed(campaign, ctx) {
        return false;
    }
    true
}

/// Campaign start/end dates, open-ended when unset.
fn within_schedule(campaign: &CampaignSnapshot, ctx: &RequestContext) -> bool {
    let now = ctx.now.unwrap_or_else(Utc::now);
    if let Some(starts_at) = campaign.starts_at {
        if now < starts_at {
            return false;
        }
    }
    if let Some(ends_at) = campaign.ends_at {
        if now > ends_at {
            return false;
        }
    }
    true
}

/// Device restriction applies only when the request's device is known.
fn device_allowed(campaign: &CampaignSnapshot, ctx: &RequestContext) -> bool {
    if campaign.devices.is_empty() {
        return true;
    }
    match ctx.device() {
        Some(device) => campaign
            .devices
            .iter()
            .any(|d| d.eq_ignore_ascii_case(device.as_str())),
        None => true,
    }
}

fn country_allowed(campaign: &CampaignSnapshot, ctx: &RequestContext) -> bool {
    if campaign.countries.is_empty() {
        return true;
    }
    match ctx.country.as_deref() {
        Some(country) => campaign
            .countries
            .iter()
            .any(|c| c.eq_ignore_ascii_case(country)),
        None => true,
    }
}

fn path_allowed(campaign: &CampaignSnapshot, ctx: &RequestContext) -> bool {
    if campaign.page_patterns.is_empty() {
        return true;
    }
    let path = ctx.path.as_deref().unwrap_or("");
    campaign
        .page_patterns
        .iter()
        .any(|pattern| path_matches(pattern, path))
}

/// Trailing-`*` prefix match, otherwise exact. Plain string comparison only;
/// patterns are advertiser-supplied and must never reach a regex engine.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => path == pattern,
    }
}

fn hour_allowed(campaign: &CampaignSnapshot, ctx: &RequestContext) -> bool {
    if campaign.hour_windows.is_empty() {
        return true;
    }
    let hour = ctx.hour();
    campaign.hour_windows.iter().any(|w| w.contains(hour))
}

fn day_allowed(campaign: &CampaignSnapshot, ctx: &RequestContext) -> bool {
    if campaign.days.is_empty() {
        return true;
    }
    campaign.days.contains(&ctx.weekday())
}
