//! Internal event broadcast — tokio::broadcast channel for cross-component events.
//!
//! Downstream consumers (analytics, reporting, alerting) subscribe here; the
//! serving path never blocks on them.

use serde::Serialize;
use tokio::sync::broadcast;

/// Server-wide events for analytics, reporting, and monitoring.
#[derive(Debug, Clone, Serialize)]
pub enum AdEvent {
    /// An impression was recorded for a creative.
    ImpressionServed {
        impression_id: String,
        ad_id: i64,
        campaign_id: i64,
        zone_id: Option<i64>,
    },
    /// A click passed fraud scoring and was billed.
    ClickBilled {
        click_id: i64,
        campaign_id: i64,
        cost: f64,
        fraud_score: u8,
    },
    /// A click was blocked by fraud scoring — recorded, never billed.
    ClickBlocked {
        click_id: i64,
        campaign_id: i64,
        fraud_score: u8,
        reason: String,
    },
    /// An RTB auction produced a winner.
    AuctionWon {
        request_id: String,
        campaign_id: i64,
        bid_price: f64,
        clearing_price: f64,
    },
    /// A campaign hit its total budget during a charge.
    BudgetExhausted {
        campaign_id: i64,
    },
    /// A charge failed after the click was recorded — needs reconciliation.
    BillingFailed {
        campaign_id: i64,
        amount: f64,
        error: String,
    },
}

/// Central event bus for broadcasting events to all subscribers.
pub struct EventBus {
    tx: broadcast::Sender<AdEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AdEvent) {
        // Ignore error if no subscribers
        let _ = self.tx.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<AdEvent> {
        self.tx.subscribe()
    }

    /// Get current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
