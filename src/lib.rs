//! Self-hosted ad server: zone serving, click tracking with fraud scoring,
//! campaign billing, and RTB bidding, embedded behind a CMS.

pub mod billing;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod fraud;
pub mod logging;
pub mod sanitize;
pub mod selection;
pub mod serving;
pub mod targeting;
pub mod web;
