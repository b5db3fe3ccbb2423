//! Second-price auction for RTB bid requests.
//!
//! One bid per eligible campaign, price = bid × device multiplier rounded
//! to 3 decimals. The winner pays the runner-up's price plus a fixed
//! 0.01 increment, or 90% of its own price when it stood alone.

use serde::Serialize;

use super::Candidate;
use crate::billing::round3;
use crate::targeting::DeviceKind;

/// Fixed increment added to the runner-up price to form the clearing price.
pub const PRICE_INCREMENT: f64 = 0.01;
/// Clearing fraction of a sole bidder's own price.
pub const SOLE_BID_FACTOR: f64 = 0.90;

/// Price adjustment per device class.
pub fn device_multiplier(device: Option<DeviceKind>) -> f64 {
    match device {
        Some(DeviceKind::Mobile) => 1.10,
        Some(DeviceKind::Tablet) => 0.95,
        _ => 1.00,
    }
}

/// A priced bid entering the auction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bid {
    pub campaign_id: i64,
    pub price: f64,
}

/// Auction result: the winning bid and what it actually pays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuctionOutcome {
    pub winner: Bid,
    pub clearing_price: f64,
    pub bid_count: usize,
}

/// Run the auction over eligible candidates. Returns `None` when no bid
/// clears the floor — an empty auction is a normal outcome, not an error.
///
/// The sort is stable and candidates arrive in load order, so price ties
/// resolve deterministically to the earlier candidate.
pub fn run_auction(
    candidates: &[Candidate],
    device: Option<DeviceKind>,
    floor: f64,
) -> Option<AuctionOutcome> {
    let multiplier = device_multiplier(device);

    let mut bids: Vec<Bid> = candidates
        .iter()
        .map(|c| Bid {
            campaign_id: c.campaign_id,
            price: round3(c.price * multiplier),
        })
        .filter(|b| b.price > 0.0 && b.price >= floor)
        .collect();

    if bids.is_empty() {
        return None;
    }

    bids.sort_by(|a, b| b.price.total_cmp(&a.price));

    let winner = bids[0].clone();
    let clearing_price = if bids.len() >= 2 {
        round3(bids[1].price + PRICE_INCREMENT)
    } else {
        round3(winner.price * SOLE_BID_FACTOR)
    };

    Some(AuctionOutcome {
        winner,
        clearing_price,
        bid_count: bids.len(),
    })
}
