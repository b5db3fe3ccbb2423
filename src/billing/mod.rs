//! Billing — pricing models, per-event cost, and the atomic charge
//! transaction that moves money when a billable event lands.

pub mod daily_spend;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;

use crate::error::{AdServerError, Result};

/// How a campaign pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingKind {
    /// Per click.
    Cpc,
    /// Per thousand impressions, billed per impression at bid / 1000.
    Cpm,
    /// Per view.
    Cpv,
    /// Per completed view.
    Cpcv,
    /// Free placement (self-promotion, makegoods). Never billed.
    House,
}

impl PricingKind {
    /// Parse a stored kind. Unknown strings fall back to `House` — unknown
    /// kinds never bill, rather than billing at a guessed rate.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "cpc" => Self::Cpc,
            "cpm" => Self::Cpm,
            "cpv" => Self::Cpv,
            "cpcv" => Self::Cpcv,
            _ => Self::House,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpc => "cpc",
            Self::Cpm => "cpm",
            Self::Cpv => "cpv",
            Self::Cpcv => "cpcv",
            Self::House => "house",
        }
    }
}

/// Monetary rounding to three decimals (tenth of a cent).
pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// A billable thing that happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillableEvent {
    Click,
    Impression,
    View,
    CompletedView,
}

/// Cost of one event under the campaign's pricing model, or `None` when
/// the event type does not bill under this model.
pub fn event_cost(kind: PricingKind, bid_amount: f64, event: BillableEvent) -> Option<f64> {
    match (kind, event) {
        (PricingKind::Cpc, BillableEvent::Click) => Some(bid_amount),
        (PricingKind::Cpm, BillableEvent::Impression) => Some(round3(bid_amount / 1000.0)),
        (PricingKind::Cpv, BillableEvent::View) => Some(bid_amount),
        (PricingKind::Cpcv, BillableEvent::CompletedView) => Some(bid_amount),
        _ => None,
    }
}

/// One charge to apply.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub campaign_id: i64,
    pub advertiser_id: i64,
    pub amount: f64,
    pub description: String,
    /// External reference stored on the ledger row (click id, impression id).
    pub reference: String,
}

/// What the charge did.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeReceipt {
    pub transaction_id: i64,
    pub amount: f64,
    pub balance_after: f64,
}

/// Apply a charge atomically: campaign spend, advertiser balance, ledger
/// row, and the publisher's earnings for today move in one transaction,
/// or none of them move.
///
/// The spend update carries the budget check in its WHERE clause, so two
/// concurrent charges cannot race a campaign past its budget: the loser
/// matches zero rows and the whole transaction rolls back.
pub async fn charge(pool: &PgPool, req: &ChargeRequest) -> Result<ChargeReceipt> {
    if req.amount <= 0.0 {
        return Err(AdServerError::Billing(format!(
            "non-positive charge amount {} for campaign {}",
            req.amount, req.campaign_id
        )));
    }

    let mut tx = pool.begin().await?;

    let spend = sqlx::query(
        "UPDATE campaigns
         SET spent = spent + $1
         WHERE id = $2 AND spent + $1 <= budget",
    )
    .bind(req.amount)
    .bind(req.campaign_id)
    .execute(&mut *tx)
    .await?;

    if spend.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(AdServerError::BudgetExhausted {
            campaign_id: req.campaign_id,
        });
    }

    let balance_after: Option<f64> = sqlx::query_scalar(
        "UPDATE advertisers
         SET balance = balance - $1, total_spent = total_spent + $1
         WHERE id = $2
         RETURNING balance",
    )
    .bind(req.amount)
    .bind(req.advertiser_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(balance_after) = balance_after else {
        tx.rollback().await?;
        return Err(AdServerError::Billing(format!(
            "advertiser {} not found for campaign {}",
            req.advertiser_id, req.campaign_id
        )));
    };

    // Ledger rows are debits from the advertiser's point of view, and carry
    // the post-charge balance as a snapshot.
    let transaction_id: i64 = sqlx::query_scalar(
        "INSERT INTO transactions (advertiser_id, amount, balance, description, reference)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id",
    )
    .bind(req.advertiser_id)
    .bind(-req.amount)
    .bind(balance_after)
    .bind(&req.description)
    .bind(&req.reference)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO publisher_earnings (day, earnings)
         VALUES (CURRENT_DATE, $1)
         ON CONFLICT (day)
         DO UPDATE SET earnings = publisher_earnings.earnings + EXCLUDED.earnings",
    )
    .bind(req.amount)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        campaign_id = req.campaign_id,
        advertiser_id = req.advertiser_id,
        amount = req.amount,
        balance_after,
        "charge applied"
    );

    Ok(ChargeReceipt {
        transaction_id,
        amount: req.amount,
        balance_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_maps_unknown_kinds_to_house() {
        assert_eq!(PricingKind::parse("cpc"), PricingKind::Cpc);
        assert_eq!(PricingKind::parse("CPM"), PricingKind::Cpm);
        assert_eq!(PricingKind::parse("cpv"), PricingKind::Cpv);
        assert_eq!(PricingKind::parse("cpcv"), PricingKind::Cpcv);
        assert_eq!(PricingKind::parse("house"), PricingKind::House);
        assert_eq!(PricingKind::parse("flat_rate"), PricingKind::House);
        assert_eq!(PricingKind::parse(""), PricingKind::House);
    }

    #[test]
    fn round3_is_tenth_of_a_cent() {
        assert_eq!(round3(0.5192), 0.519);
        assert_eq!(round3(0.5195), 0.52);
        assert_eq!(round3(0.001_4), 0.001);
        assert_eq!(round3(2.0), 2.0);
    }

    #[test]
    fn cpc_bills_full_bid_per_click() {
        assert_eq!(
            event_cost(PricingKind::Cpc, 0.75, BillableEvent::Click),
            Some(0.75)
        );
        assert_eq!(event_cost(PricingKind::Cpc, 0.75, BillableEvent::Impression), None);
    }

    #[test]
    fn cpm_bills_per_impression_at_a_thousandth() {
        assert_eq!(
            event_cost(PricingKind::Cpm, 2.50, BillableEvent::Impression),
            Some(0.003)
        );
        assert_eq!(
            event_cost(PricingKind::Cpm, 12.0, BillableEvent::Impression),
            Some(0.012)
        );
        assert_eq!(event_cost(PricingKind::Cpm, 2.50, BillableEvent::Click), None);
    }

    #[test]
    fn view_models_bill_their_own_event_only() {
        assert_eq!(
            event_cost(PricingKind::Cpv, 0.10, BillableEvent::View),
            Some(0.10)
        );
        assert_eq!(
            event_cost(PricingKind::Cpcv, 0.40, BillableEvent::CompletedView),
            Some(0.40)
        );
        assert_eq!(event_cost(PricingKind::Cpv, 0.10, BillableEvent::CompletedView), None);
        assert_eq!(event_cost(PricingKind::Cpcv, 0.40, BillableEvent::View), None);
    }

    #[test]
    fn house_campaigns_never_bill() {
        for event in [
            BillableEvent::Click,
            BillableEvent::Impression,
            BillableEvent::View,
            BillableEvent::CompletedView,
        ] {
            assert_eq!(event_cost(PricingKind::House, 5.0, event), None);
        }
    }

    /// The refusal guard sits in front of the transaction, so a lazy pool
    /// that never connects is enough to exercise it.
    #[tokio::test]
    async fn non_positive_amounts_are_refused_before_the_transaction() {
        let pool = PgPool::connect_lazy("postgres://localhost/adserve").expect("lazy pool");
        let mut req = ChargeRequest {
            campaign_id: 7,
            advertiser_id: 3,
            amount: 0.0,
            description: "cpc click on ad 1".into(),
            reference: "1".into(),
        };

        let err = charge(&pool, &req).await.expect_err("zero charge must be refused");
        assert!(matches!(err, AdServerError::Billing(_)));

        req.amount = -0.25;
        let err = charge(&pool, &req).await.expect_err("negative charge must be refused");
        assert!(matches!(err, AdServerError::Billing(_)));
    }
}
