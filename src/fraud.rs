//! Click fraud scoring — independent additive signals, clamped to 0–100,
//! mapped to an allow/flag/block action.
//!
//! Flagged clicks still bill; only a block forces cost to zero. Keeping
//! `is_fraudulent` (score ≥ flag) separate from billing suppression
//! (action == block) is deliberate and both thresholds are tested on their
//! own.

use std::net::IpAddr;

use serde::Serialize;

use crate::config::FraudConfig;
use crate::targeting::{DeviceKind, RequestContext};

// Signal weights. Each signal contributes independently; the sum is
// clamped to 100.
const UA_MISSING: u32 = 20;
const UA_SHORT: u32 = 30;
const UA_BOT_PATTERN: u32 = 90;
const FREQ_TIER_3: u32 = 20;
const FREQ_TIER_5: u32 = 50;
const FREQ_TIER_10: u32 = 80;
const DUPLICATE_IMPRESSION: u32 = 70;
const SESSION_ANOMALY: u32 = 40;
const FINGERPRINT_MISMATCH: u32 = 30;
const IP_PRIVATE: u32 = 15;
const IP_MISSING: u32 = 5;
const IP_REPEAT_TIER_2: u32 = 30;
const IP_REPEAT_TIER_5: u32 = 60;

/// Substrings (lowercased) that mark a user agent as automated: generic
/// bot/crawler tokens, headless-browser stacks, HTTP tooling, and the big
/// search-engine crawlers that don't say "bot".
const BOT_UA_TOKENS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "scraper",
    "headless",
    "phantomjs",
    "selenium",
    "puppeteer",
    "playwright",
    "curl",
    "wget",
    "python-requests",
    "slurp",
];

const UA_SHORT_LIMIT: usize = 20;
const SESSION_HISTORY_MIN: usize = 5;

/// Click history the scorer needs, gathered by the caller from durable
/// storage before scoring.
#[derive(Debug, Clone, Default)]
pub struct ClickHistory {
    /// Clicks on this ad from the same session in the trailing 5 minutes.
    pub session_clicks_on_ad: i64,
    /// Clicks on this ad from the same IP in the trailing 5 minutes.
    pub ip_clicks_on_ad: i64,
    /// A click already exists for this impression id.
    pub duplicate_impression: bool,
    /// Ad ids of the session's most recent clicks, newest first (≤ 10).
    pub recent_session_ad_ids: Vec<i64>,
    /// Clicks already marked fraudulent from this IP in the trailing hour.
    pub ip_fraud_clicks_hour: i64,
}

/// One fired signal with its contribution.
#[derive(Debug, Clone, Serialize)]
pub struct FraudSignal {
    pub name: &'static str,
    pub score: u32,
    pub detail: String,
}

/// What the serving pipeline does with the click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FraudAction {
    Allow,
    Flag,
    Block,
}

/// Scoring verdict for one click.
#[derive(Debug, Clone, Serialize)]
pub struct FraudAnalysis {
    pub score: u8,
    pub signals: Vec<FraudSignal>,
    pub action: FraudAction,
    pub is_fraudulent: bool,
}

impl FraudAnalysis {
    /// Comma-joined names of fired signals, for the click record.
    pub fn reason(&self) -> Option<String> {
        if self.signals.is_empty() {
            return None;
        }
        Some(
            self.signals
                .iter()
                .map(|s| s.name)
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Scores clicks against the configured action thresholds.
pub struct FraudScorer {
    config: FraudConfig,
}

impl FraudScorer {
    pub fn new(config: &FraudConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Score one click from its request context and gathered history.
    pub fn analyze(&self, ctx: &RequestContext, history: &ClickHistory) -> FraudAnalysis {
        let mut signals = Vec::new();

        if let Some(signal) = bot_user_agent(ctx) {
            signals.push(signal);
        }
        if let Some(signal) = click_frequency(ctx, history) {
            signals.push(signal);
        }
        if history.duplicate_impression {
            signals.push(FraudSignal {
                name: "duplicate_click",
                score: DUPLICATE_IMPRESSION,
                detail: "impression already has a recorded click".into(),
            });
        }
        if let Some(signal) = session_anomaly(history) {
            signals.push(signal);
        }
        if let Some(signal) = fingerprint_mismatch(ctx) {
            signals.push(signal);
        }
        if let Some(signal) = ip_reputation(ctx, history) {
            signals.push(signal);
        }

        self.verdict(signals)
    }

    /// Last resort when even the fallback counts are unreachable: flag the
    /// click for later reconciliation. Never blocks, and never lets a click
    /// through unmarked while the detector is blind.
    pub fn degraded_flag(&self) -> FraudAnalysis {
        self.verdict(vec![FraudSignal {
            name: "detector_degraded",
            score: self.config.flag_threshold as u32,
            detail: "click history unavailable".into(),
        }])
    }

    /// Minimal protection when history gathering degrades: flag on raw
    /// frequency alone, never block, never wave everything through.
    pub fn minimal_fallback(&self, session_clicks_5m: i64, ip_clicks_5m: i64) -> FraudAnalysis {
        if session_clicks_5m >= 3 || ip_clicks_5m >= 5 {
            let signals = vec![FraudSignal {
                name: "detector_degraded",
                score: self.config.flag_threshold as u32,
                detail: format!(
                    "fallback frequency check: {session_clicks_5m} session / {ip_clicks_5m} ip clicks in 5m"
                ),
            }];
            return self.verdict(signals);
        }
        FraudAnalysis {
            score: 0,
            signals: Vec::new(),
            action: FraudAction::Allow,
            is_fraudulent: false,
        }
    }

    fn verdict(&self, signals: Vec<FraudSignal>) -> FraudAnalysis {
        let total: u32 = signals.iter().map(|s| s.score).sum();
        let score = total.min(100) as u8;
        let action = if score >= self.config.block_threshold {
            FraudAction::Block
        } else if score >= self.config.flag_threshold {
            FraudAction::Flag
        } else {
            FraudAction::Allow
        };
        FraudAnalysis {
            score,
            signals,
            action,
            is_fraudulent: score >= self.config.flag_threshold,
        }
    }
}

fn bot_user_agent(ctx: &RequestContext) -> Option<FraudSignal> {
    let ua = match ctx.user_agent.as_deref() {
        None => {
            return Some(FraudSignal {
                name: "bot_user_agent",
                score: UA_MISSING,
                detail: "user agent missing".into(),
            })
        }
        Some(ua) => ua,
    };

    let mut score = 0;
    let mut notes = Vec::new();
    if ua.chars().count() < UA_SHORT_LIMIT {
        score += UA_SHORT;
        notes.push("shorter than 20 chars");
    }
    let lower = ua.to_ascii_lowercase();
    if BOT_UA_TOKENS.iter().any(|t| lower.contains(t)) {
        score += UA_BOT_PATTERN;
        notes.push("matches bot pattern");
    }
    if score == 0 {
        return None;
    }
    Some(FraudSignal {
        name: "bot_user_agent",
        score,
        detail: notes.join("; "),
    })
}

/// Same-session clicks on the ad in the trailing 5 minutes; the IP count
/// stands in when the request carries no session.
fn click_frequency(ctx: &RequestContext, history: &ClickHistory) -> Option<FraudSignal> {
    let count = if ctx.session_id.is_some() {
        history.session_clicks_on_ad
    } else {
        history.ip_clicks_on_ad
    };
    let score = if count >= 10 {
        FREQ_TIER_10
    } else if count >= 5 {
        FREQ_TIER_5
    } else if count >= 3 {
        FREQ_TIER_3
    } else {
        return None;
    };
    Some(FraudSignal {
        name: "click_frequency",
        score,
        detail: format!("{count} clicks on this ad in 5 minutes"),
    })
}

fn session_anomaly(history: &ClickHistory) -> Option<FraudSignal> {
    let recent = &history.recent_session_ad_ids;
    if recent.len() < 2 {
        return None;
    }
    let first = recent[0];
    if recent.len() >= SESSION_HISTORY_MIN && recent.iter().all(|&id| id == first) {
        return Some(FraudSignal {
            name: "session_anomaly",
            score: SESSION_ANOMALY,
            detail: format!("last {} session clicks all on ad {first}", recent.len()),
        });
    }
    None
}

fn ua_has_mobile_tokens(ua: &str) -> bool {
    let lower = ua.to_ascii_lowercase();
    lower.contains("mobile") || lower.contains("android") || lower.contains("iphone")
}

/// Claimed device contradicting the user agent. Only explicit claims count;
/// a device inferred from the UA can't disagree with it.
fn fingerprint_mismatch(ctx: &RequestContext) -> Option<FraudSignal> {
    let ua = ctx.user_agent.as_deref()?;
    let mismatch = match ctx.claimed_device {
        Some(DeviceKind::Mobile) => !ua_has_mobile_tokens(ua),
        Some(DeviceKind::Desktop) => ua_has_mobile_tokens(ua),
        _ => false,
    };
    if !mismatch {
        return None;
    }
    Some(FraudSignal {
        name: "fingerprint_mismatch",
        score: FINGERPRINT_MISMATCH,
        detail: format!(
            "claimed {} contradicts user agent",
            ctx.claimed_device.map(|d| d.as_str()).unwrap_or("unknown")
        ),
    })
}

fn ip_reputation(ctx: &RequestContext, history: &ClickHistory) -> Option<FraudSignal> {
    let ip = match ctx.ip.as_deref() {
        None => {
            return Some(FraudSignal {
                name: "ip_reputation",
                score: IP_MISSING,
                detail: "ip missing".into(),
            })
        }
        Some(ip) => ip,
    };

    let mut score = 0;
    let mut notes = Vec::new();
    if is_private_ip(ip) {
        score += IP_PRIVATE;
        notes.push("private/internal range".to_string());
    }
    if history.ip_fraud_clicks_hour >= 5 {
        score += IP_REPEAT_TIER_5;
        notes.push(format!(
            "{} fraudulent clicks from this ip in 1h",
            history.ip_fraud_clicks_hour
        ));
    } else if history.ip_fraud_clicks_hour >= 2 {
        score += IP_REPEAT_TIER_2;
        notes.push(format!(
            "{} fraudulent clicks from this ip in 1h",
            history.ip_fraud_clicks_hour
        ));
    }
    if score == 0 {
        return None;
    }
    Some(FraudSignal {
        name: "ip_reputation",
        score,
        detail: notes.join("; "),
    })
}

/// Private, loopback, link-local, and unique-local ranges. Unparseable
/// strings are not range members — they simply score nothing here.
fn is_private_ip(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        Ok(IpAddr::V6(v6)) => {
            let seg = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                || (seg[0] & 0xfe00) == 0xfc00 // fc00::/7 unique local
                || (seg[0] & 0xffc0) == 0xfe80 // fe80::/10 link local
        }
        Err(_) => false,
    }
}
