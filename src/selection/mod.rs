//! Ad selection — weighted-random draws over the candidate pool.
//!
//! Zone serving and the RTB auction are two faces of the same allocation
//! problem, so both run over [`Candidate`]; the weighted draw lives here,
//! the pricing rules in [`auction`].

pub mod auction;

use rand::Rng;

/// One eligible campaign competing in a selection round.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub campaign_id: i64,
    /// The campaign's raw bid. The auction applies device multipliers on
    /// top; zone serving uses it as-is.
    pub price: f64,
    /// Placement priority for the zone in play, non-negative.
    pub priority: i32,
}

impl Candidate {
    /// Weight used by zone serving: bid scaled by placement priority.
    pub fn selection_weight(&self) -> f64 {
        self.price * (self.priority + 1) as f64
    }
}

/// Weighted-random draw: uniform value in `[0, total)`, then walk the list
/// subtracting weights until the remainder drops to or below zero.
///
/// A pool whose weights sum to zero falls back to the first item, so a
/// campaign whose ads all carry weight 0 still serves something.
pub fn pick_by_weight<'a, T, R, F>(rng: &mut R, items: &'a [T], weight: F) -> Option<&'a T>
where
    R: Rng,
    F: Fn(&T) -> f64,
{
    if items.is_empty() {
        return None;
    }
    let total: f64 = items.iter().map(&weight).sum();
    if total <= 0.0 {
        return items.first();
    }
    let mut remainder = rng.gen_range(0.0..total);
    for item in items {
        remainder -= weight(item);
        if remainder <= 0.0 {
            return Some(item);
        }
    }
    // Float rounding can leave a sliver of remainder after the walk.
    items.last()
}

/// Zone-serving draw over campaigns: weight = bid × (priority + 1).
pub fn pick_weighted<'a, R: Rng>(
    rng: &mut R,
    candidates: &'a [Candidate],
) -> Option<&'a Candidate> {
    pick_by_weight(rng, candidates, Candidate::selection_weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn candidate(id: i64, price: f64, priority: i32) -> Candidate {
        Candidate {
            campaign_id: id,
            price,
            priority,
        }
    }

    #[test]
    fn empty_pool_picks_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(pick_weighted(&mut rng, &[]).is_none());
    }

    #[test]
    fn single_candidate_always_wins() {
        let mut rng = StdRng::seed_from_u64(1);
        let pool = [candidate(7, 0.25, 0)];
        for _ in 0..100 {
            assert_eq!(pick_weighted(&mut rng, &pool).map(|c| c.campaign_id), Some(7));
        }
    }

    #[test]
    fn zero_total_weight_falls_back_to_first() {
        let mut rng = StdRng::seed_from_u64(1);
        let pool = [candidate(1, 0.0, 0), candidate(2, 0.0, 3)];
        assert_eq!(pick_weighted(&mut rng, &pool).map(|c| c.campaign_id), Some(1));
    }

    #[test]
    fn priority_scales_weight() {
        let c = candidate(1, 0.40, 2);
        assert!((c.selection_weight() - 1.20).abs() < 1e-9);
        let c = candidate(1, 0.40, 0);
        assert!((c.selection_weight() - 0.40).abs() < 1e-9);
    }

    /// Win frequency over many draws converges to each candidate's weight
    /// share. Weights 1:2:5 → shares 12.5% / 25% / 62.5%.
    #[test]
    fn draw_frequency_matches_weight_share() {
        let pool = [
            candidate(1, 0.10, 0), // weight 0.10
            candidate(2, 0.10, 1), // weight 0.20
            candidate(3, 0.50, 0), // weight 0.50
        ];
        let mut rng = StdRng::seed_from_u64(42);
        let n = 20_000;
        let mut wins = [0u32; 3];
        for _ in 0..n {
            match pick_weighted(&mut rng, &pool).map(|c| c.campaign_id) {
                Some(1) => wins[0] += 1,
                Some(2) => wins[1] += 1,
                Some(3) => wins[2] += 1,
                _ => panic!("draw returned nothing for a non-empty pool"),
            }
        }
        let share = |w: u32| w as f64 / n as f64;
        assert!((share(wins[0]) - 0.125).abs() < 0.02, "got {}", share(wins[0]));
        assert!((share(wins[1]) - 0.25).abs() < 0.02, "got {}", share(wins[1]));
        assert!((share(wins[2]) - 0.625).abs() < 0.02, "got {}", share(wins[2]));
    }

    /// Ad-variant selection drives the same walk with integer weights.
    #[test]
    fn generic_draw_over_integer_weights() {
        struct Variant {
            id: i64,
            weight: i32,
        }
        let ads = [
            Variant { id: 10, weight: 0 },
            Variant { id: 11, weight: 0 },
        ];
        let mut rng = StdRng::seed_from_u64(9);
        let picked = pick_by_weight(&mut rng, &ads, |a| a.weight as f64);
        assert_eq!(picked.map(|a| a.id), Some(10), "all-zero weights pick the first ad");

        let ads = [
            Variant { id: 10, weight: 1 },
            Variant { id: 11, weight: 9 },
        ];
        let mut heavy = 0;
        for _ in 0..5_000 {
            if pick_by_weight(&mut rng, &ads, |a| a.weight as f64)
                .map(|a| a.id)
                == Some(11)
            {
                heavy += 1;
            }
        }
        let share = heavy as f64 / 5_000.0;
        assert!((share - 0.9).abs() < 0.03, "got {share}");
    }
}
