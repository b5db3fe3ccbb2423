//! Unified error types for the ad server.
//!
//! Missing zones, ads, and impressions are `Option`s, not errors — serving
//! degrades to fallback content instead of failing. Errors are reserved for
//! bad requests, storage trouble, and money.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdServerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The caller sent something unusable; maps to HTTP 400.
    #[error("validation error: {0}")]
    Validation(String),

    /// A charge could not be applied. The triggering click or impression
    /// may already be recorded.
    #[error("billing error: {0}")]
    Billing(String),

    #[error("campaign {campaign_id} budget exhausted")]
    BudgetExhausted { campaign_id: i64 },
}

pub type Result<T> = std::result::Result<T, AdServerError>;
