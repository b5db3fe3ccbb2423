// tests/decisioning.rs
// Decisioning tests across the serving pipeline:
// 1. Row → snapshot → eligibility → weighted selection
// 2. Second-price auction pricing
// 3. Fraud gate and billing interaction
// 4. Daily spend rollover
// 5. Creative safety and wire formats

// ============================================================================
// SELECTION PIPELINE TESTS - row conversion, filtering, weighted draw
// ============================================================================

mod selection_pipeline_tests {
    use adserve::db::models::DbCandidate;
    use adserve::selection::{pick_weighted, Candidate};
    use adserve::serving::snapshot_from_row;
    use adserve::targeting::{is_eligible, CampaignSnapshot, RequestContext};
    use chrono::{TimeZone, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn row(campaign_id: i64, bid: f64, spent: f64, budget: f64) -> DbCandidate {
        DbCandidate {
            campaign_id,
            advertiser_id: 1,
            kind: "cpc".into(),
            bid_amount: bid,
            budget,
            daily_budget: None,
            spent,
            target_url: Some("https://example.com".into()),
            devices: None,
            countries: None,
            page_patterns: None,
            hour_windows: None,
            days: None,
            starts_at: None,
            ends_at: None,
            priority: 0,
            advertiser_balance: 100.0,
            advertiser_status: "active".into(),
        }
    }

    fn ctx() -> RequestContext {
        RequestContext {
            now: Some(Utc.with_ymd_and_hms(2024, 3, 6, 14, 0, 0).unwrap()),
            ..Default::default()
        }
    }

    fn eligible_candidates(rows: Vec<DbCandidate>) -> (Vec<CampaignSnapshot>, Vec<Candidate>) {
        let ctx = ctx();
        let snapshots: Vec<CampaignSnapshot> = rows
            .into_iter()
            .map(snapshot_from_row)
            .filter(|c| is_eligible(c, &ctx, 0.0))
            .collect();
        let candidates = snapshots
            .iter()
            .map(|c| Candidate {
                campaign_id: c.id,
                price: c.bid_amount,
                priority: c.priority,
            })
            .collect();
        (snapshots, candidates)
    }

    /// Test: Selection frequency approaches bid-weighted shares over many
    /// draws (bids 1:2:5 → shares 0.125 / 0.25 / 0.625).
    #[test]
    fn test_weighted_selection_fairness() {
        let (_, candidates) = eligible_candidates(vec![
            row(1, 1.0, 0.0, 100.0),
            row(2, 2.0, 0.0, 100.0),
            row(3, 5.0, 0.0, 100.0),
        ]);
        assert_eq!(candidates.len(), 3);

        let mut rng = StdRng::seed_from_u64(7);
        let mut counts: HashMap<i64, u32> = HashMap::new();
        let draws = 20_000;
        for _ in 0..draws {
            let winner = pick_weighted(&mut rng, &candidates).expect("non-empty pool");
            *counts.entry(winner.campaign_id).or_insert(0) += 1;
        }

        for (id, expected) in [(1, 0.125), (2, 0.25), (3, 0.625)] {
            let share = f64::from(counts[&id]) / f64::from(draws);
            assert!(
                (share - expected).abs() < 0.02,
                "campaign {} share {} should be near {}",
                id,
                share,
                expected
            );
        }
    }

    /// Test: A campaign with spent == budget is filtered out and can never
    /// win a draw, no matter how many times we try.
    #[test]
    fn test_exhausted_campaign_never_selected() {
        let (snapshots, candidates) = eligible_candidates(vec![
            row(1, 1.0, 0.0, 100.0),
            row(2, 50.0, 100.0, 100.0), // highest bid, but fully spent
            row(3, 1.0, 0.0, 100.0),
        ]);
        assert_eq!(snapshots.len(), 2, "exhausted campaign must not survive the filter");

        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..10_000 {
            let winner = pick_weighted(&mut rng, &candidates).expect("non-empty pool");
            assert_ne!(winner.campaign_id, 2, "exhausted campaign won a draw");
        }
    }

    /// Test: Placement priority scales selection weight (bid × (priority+1)).
    #[test]
    fn test_priority_boosts_selection_share() {
        let mut boosted = row(1, 1.0, 0.0, 100.0);
        boosted.priority = 3; // weight 4
        let plain = row(2, 1.0, 0.0, 100.0); // weight 1
        let (_, candidates) = eligible_candidates(vec![boosted, plain]);

        let mut rng = StdRng::seed_from_u64(13);
        let mut boosted_wins = 0u32;
        let draws = 20_000;
        for _ in 0..draws {
            if pick_weighted(&mut rng, &candidates).expect("pool").campaign_id == 1 {
                boosted_wins += 1;
            }
        }
        let share = f64::from(boosted_wins) / f64::from(draws);
        assert!((share - 0.8).abs() < 0.02, "boosted share {} should be near 0.8", share);
    }

    /// Test: Targeting restrictions flow from the stored row into the
    /// filter (country + page pattern together).
    #[test]
    fn test_row_restrictions_reach_the_filter() {
        let mut restricted = row(1, 1.0, 0.0, 100.0);
        restricted.countries = Some(vec!["DE".into()]);
        restricted.page_patterns = Some(vec!["/blog/*".into()]);
        let snapshot = snapshot_from_row(restricted);

        let mut ctx = ctx();
        ctx.country = Some("DE".into());
        ctx.path = Some("/blog/rust-tips".into());
        assert!(is_eligible(&snapshot, &ctx, 0.0));

        ctx.path = Some("/shop".into());
        assert!(!is_eligible(&snapshot, &ctx, 0.0), "wrong section must exclude");

        ctx.path = Some("/blog/rust-tips".into());
        ctx.country = Some("US".into());
        assert!(!is_eligible(&snapshot, &ctx, 0.0), "wrong country must exclude");
    }
}

// ============================================================================
// AUCTION TESTS - second-price clearing through the candidate pipeline
// ============================================================================

mod auction_tests {
    use adserve::selection::auction::run_auction;
    use adserve::selection::Candidate;
    use adserve::targeting::DeviceKind;

    fn pool(prices: &[f64]) -> Vec<Candidate> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &price)| Candidate {
                campaign_id: i as i64 + 1,
                price,
                priority: 0,
            })
            .collect()
    }

    /// Test: Canonical second-price outcome — bids 0.80/0.50/0.30 clear at
    /// 0.51 for the highest bidder.
    #[test]
    fn test_second_price_clearing() {
        let outcome = run_auction(&pool(&[0.80, 0.50, 0.30]), None, 0.0).expect("winner");
        assert_eq!(outcome.winner.campaign_id, 1);
        assert!((outcome.clearing_price - 0.51).abs() < 1e-9, "got {}", outcome.clearing_price);
    }

    /// Test: A sole bidder pays 90% of its own price (0.80 → 0.72).
    #[test]
    fn test_sole_bidder_discount() {
        let outcome = run_auction(&pool(&[0.80]), None, 0.0).expect("winner");
        assert!((outcome.clearing_price - 0.72).abs() < 1e-9, "got {}", outcome.clearing_price);
    }

    /// Test: The floor removes bids before clearing; a floor above every
    /// bid produces no winner rather than an error.
    #[test]
    fn test_floor_filters_bids() {
        let outcome = run_auction(&pool(&[0.80, 0.50]), None, 0.60).expect("winner");
        assert_eq!(outcome.bid_count, 1, "only 0.80 clears a 0.60 floor");
        assert!((outcome.clearing_price - 0.72).abs() < 1e-9, "sole-bid pricing applies");

        assert!(run_auction(&pool(&[0.30, 0.20]), None, 0.90).is_none());
        assert!(run_auction(&[], None, 0.0).is_none());
    }

    /// Test: Device multiplier moves both the winner and the clearing price
    /// (mobile ×1.10: 0.80→0.88, 0.50→0.55, clearing 0.56).
    #[test]
    fn test_mobile_multiplier_in_clearing() {
        let outcome =
            run_auction(&pool(&[0.80, 0.50]), Some(DeviceKind::Mobile), 0.0).expect("winner");
        assert!((outcome.winner.price - 0.88).abs() < 1e-9);
        assert!((outcome.clearing_price - 0.56).abs() < 1e-9, "got {}", outcome.clearing_price);
    }

    /// Test: Zero-bid campaigns never enter the auction.
    #[test]
    fn test_zero_bids_produce_no_winner() {
        assert!(run_auction(&pool(&[0.0, 0.0]), None, 0.0).is_none());
    }
}

// ============================================================================
// FRAUD GATE TESTS - scoring verdicts and their billing consequences
// ============================================================================

mod fraud_gate_tests {
    use adserve::billing::{event_cost, BillableEvent, PricingKind};
    use adserve::config::FraudConfig;
    use adserve::fraud::{ClickHistory, FraudAction, FraudScorer};
    use adserve::targeting::RequestContext;

    fn scorer() -> FraudScorer {
        FraudScorer::new(&FraudConfig::default())
    }

    fn human_ctx() -> RequestContext {
        RequestContext {
            session_id: Some("sess-9".into()),
            ip: Some("203.0.113.40".into()),
            user_agent: Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120".into(),
            ),
            ..Default::default()
        }
    }

    /// Test: A crawler user agent scores at least 80 and the click is
    /// blocked — recorded, never billed.
    #[test]
    fn test_crawler_click_is_blocked_and_free() {
        let mut ctx = human_ctx();
        ctx.user_agent = Some("Googlebot/2.1".into());
        let analysis = scorer().analyze(&ctx, &ClickHistory::default());

        assert!(analysis.score >= 80, "crawler scored only {}", analysis.score);
        assert_eq!(analysis.action, FraudAction::Block);

        // blocked clicks cost zero regardless of the pricing model
        let cost = match analysis.action {
            FraudAction::Block => 0.0,
            _ => event_cost(PricingKind::Cpc, 0.75, BillableEvent::Click).unwrap_or(0.0),
        };
        assert_eq!(cost, 0.0, "blocked click must not bill");
    }

    /// Test: A repeat click on the same impression fires the duplicate
    /// signal under its historical name.
    #[test]
    fn test_duplicate_impression_signal_name() {
        let history = ClickHistory {
            duplicate_impression: true,
            ..Default::default()
        };
        let analysis = scorer().analyze(&human_ctx(), &history);
        assert!(
            analysis.signals.iter().any(|s| s.name == "duplicate_click"),
            "expected duplicate_click in {:?}",
            analysis.reason()
        );
        assert_eq!(analysis.action, FraudAction::Flag);
    }

    /// Test: Flagged clicks (50–79) still bill at full price; only a block
    /// suppresses the charge.
    #[test]
    fn test_flagged_click_still_bills() {
        let history = ClickHistory {
            duplicate_impression: true, // 70 → flag
            ..Default::default()
        };
        let analysis = scorer().analyze(&human_ctx(), &history);
        assert_eq!(analysis.action, FraudAction::Flag);
        assert!(analysis.is_fraudulent, "flagged clicks carry the fraud mark");

        let cost = match analysis.action {
            FraudAction::Block => 0.0,
            _ => event_cost(PricingKind::Cpc, 0.75, BillableEvent::Click).unwrap_or(0.0),
        };
        assert!((cost - 0.75).abs() < 1e-9, "flagged click bills the full CPC bid");
    }

    /// Test: A clean human click passes untouched.
    #[test]
    fn test_clean_click_allowed() {
        let analysis = scorer().analyze(&human_ctx(), &ClickHistory::default());
        assert_eq!(analysis.score, 0);
        assert_eq!(analysis.action, FraudAction::Allow);
        assert!(!analysis.is_fraudulent);
    }

    /// Test: The degraded-detector fallback flags on raw frequency but
    /// never blocks — even when no counts are obtainable at all.
    #[test]
    fn test_fallback_never_blocks() {
        let s = scorer();
        for (session, ip) in [(3, 0), (50, 0), (0, 5), (0, 500)] {
            let analysis = s.minimal_fallback(session, ip);
            assert_eq!(analysis.action, FraudAction::Flag, "case {session}/{ip}");
        }
        assert_eq!(s.minimal_fallback(2, 4).action, FraudAction::Allow);

        let analysis = s.degraded_flag();
        assert_eq!(analysis.action, FraudAction::Flag, "blind detector still flags");
        assert!(analysis.is_fraudulent);
    }
}

// ============================================================================
// BILLING TESTS - per-event costs and monetary rounding
// ============================================================================

mod billing_tests {
    use adserve::billing::{event_cost, round3, BillableEvent, PricingKind};

    /// Test: CPC bills the bid amount per click and nothing per impression.
    #[test]
    fn test_cpc_charge_math() {
        assert_eq!(event_cost(PricingKind::Cpc, 0.35, BillableEvent::Click), Some(0.35));
        assert_eq!(event_cost(PricingKind::Cpc, 0.35, BillableEvent::Impression), None);
    }

    /// Test: CPM bills bid/1000 per impression, rounded to 3 decimals.
    #[test]
    fn test_cpm_charge_math() {
        assert_eq!(
            event_cost(PricingKind::Cpm, 4.0, BillableEvent::Impression),
            Some(0.004)
        );
        assert_eq!(event_cost(PricingKind::Cpm, 4.0, BillableEvent::Click), None);
    }

    /// Test: House campaigns produce no cost for any event type.
    #[test]
    fn test_house_never_charged() {
        for event in [
            BillableEvent::Click,
            BillableEvent::Impression,
            BillableEvent::View,
            BillableEvent::CompletedView,
        ] {
            assert_eq!(
                event_cost(PricingKind::House, 9.99, event),
                None,
                "house billed for {:?}",
                event
            );
        }
    }

    /// Test: Unknown pricing strings parse as house and therefore never bill.
    #[test]
    fn test_unknown_kind_is_house() {
        let kind = PricingKind::parse("sponsorship");
        assert_eq!(kind, PricingKind::House);
        assert_eq!(event_cost(kind, 1.0, BillableEvent::Click), None);
    }

    /// Test: Monetary rounding is to a tenth of a cent.
    #[test]
    fn test_round3() {
        assert_eq!(round3(0.5192), 0.519);
        assert_eq!(round3(0.88 * 0.95), 0.836);
    }
}

// ============================================================================
// DAILY SPEND TESTS - rollover behavior with an injected clock
// ============================================================================

mod daily_spend_tests {
    use adserve::billing::daily_spend::{Clock, DailySpendTracker};
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::{Arc, Mutex};

    struct TestClock(Mutex<DateTime<Utc>>);

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    /// Test: Spend recorded today disappears from the view after the date
    /// rolls over, and new charges start a fresh bucket.
    #[test]
    fn test_tracker_resets_across_midnight() {
        let clock = Arc::new(TestClock(Mutex::new(
            Utc.with_ymd_and_hms(2024, 3, 6, 23, 50, 0).unwrap(),
        )));
        let tracker = DailySpendTracker::new(clock.clone());

        tracker.record(42, 3.0);
        tracker.record(42, 1.5);
        assert!((tracker.spent_today(42) - 4.5).abs() < 1e-9);

        *clock.0.lock().unwrap() = Utc.with_ymd_and_hms(2024, 3, 7, 0, 5, 0).unwrap();
        assert_eq!(tracker.spent_today(42), 0.0, "yesterday's spend must not count");

        tracker.record(42, 0.75);
        assert!(
            (tracker.spent_today(42) - 0.75).abs() < 1e-9,
            "new day starts from the new charge only"
        );
    }

    /// Test: The daily cap uses tracker data — a campaign at its cap today
    /// is excluded, then serves again after rollover.
    #[test]
    fn test_daily_cap_releases_after_rollover() {
        use adserve::targeting::{is_eligible, CampaignSnapshot, RequestContext};
        use adserve::billing::PricingKind;

        let clock = Arc::new(TestClock(Mutex::new(
            Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap(),
        )));
        let tracker = DailySpendTracker::new(clock.clone());
        tracker.record(1, 5.0);

        let campaign = CampaignSnapshot {
            id: 1,
            advertiser_id: 1,
            kind: PricingKind::Cpc,
            bid_amount: 0.50,
            budget: 100.0,
            daily_budget: Some(5.0),
            spent: 10.0,
            target_url: None,
            devices: vec![],
            countries: vec![],
            page_patterns: vec![],
            hour_windows: vec![],
            days: vec![],
            starts_at: None,
            ends_at: None,
            priority: 0,
            advertiser_balance: 50.0,
            advertiser_active: true,
        };
        let ctx = RequestContext {
            now: Some(Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap()),
            ..Default::default()
        };

        assert!(!is_eligible(&campaign, &ctx, tracker.spent_today(1)), "capped today");

        *clock.0.lock().unwrap() = Utc.with_ymd_and_hms(2024, 3, 7, 9, 0, 0).unwrap();
        assert!(
            is_eligible(&campaign, &ctx, tracker.spent_today(1)),
            "cap releases after the date rolls over"
        );
    }
}

// ============================================================================
// CREATIVE SAFETY AND WIRE FORMAT TESTS
// ============================================================================

mod creative_safety_tests {
    use adserve::sanitize::{safe_redirect_url, sanitize_creative_html};

    /// Test: Hostile creative markup loses scripts and handlers but keeps
    /// its visible content.
    #[test]
    fn test_hostile_markup_is_neutralized() {
        let dirty = r#"<div class="ad"><script>document.cookie</script>
            <img src="https://cdn.example.com/b.png" onerror="evil()">
            <a href="javascript:void(0)">win big</a></div>"#;
        let clean = sanitize_creative_html(dirty);

        assert!(!clean.contains("<script"));
        assert!(!clean.contains("onerror"));
        assert!(!clean.contains("javascript:"));
        assert!(clean.contains("cdn.example.com/b.png"));
        assert!(clean.contains("win big"));
    }

    /// Test: Redirect targets are restricted to absolute http(s).
    #[test]
    fn test_redirect_guard() {
        assert!(safe_redirect_url("https://advertiser.example/landing").is_some());
        assert!(safe_redirect_url("HTTP://advertiser.example").is_some());
        assert!(safe_redirect_url("javascript:alert(1)").is_none());
        assert!(safe_redirect_url("data:text/html;base64,xyz").is_none());
        assert!(safe_redirect_url("//evil.example/path").is_none());
        assert!(safe_redirect_url("ftp://files.example").is_none());
    }
}

mod wire_format_tests {
    use adserve::serving::{BidRequest, CreativePayload};
    use uuid::Uuid;

    /// Test: Bid requests parse from the documented JSON shape, including
    /// the zoneId / timeout field names.
    #[test]
    fn test_bid_request_parses_wire_names() {
        let req: BidRequest = serde_json::from_str(
            r#"{
                "id": "req-77",
                "zoneId": 4,
                "site": { "domain": "news.example", "page": "/blog/post-9" },
                "device": { "type": "mobile", "ua": "Mozilla/5.0", "ip": "203.0.113.9", "geo": "de" },
                "floor": 0.25,
                "timeout": 80
            }"#,
        )
        .expect("bid request should parse");

        assert_eq!(req.id, "req-77");
        assert_eq!(req.zone_id, 4);
        assert_eq!(req.site.as_ref().and_then(|s| s.page.as_deref()), Some("/blog/post-9"));
        assert_eq!(req.device.as_ref().and_then(|d| d.kind.as_deref()), Some("mobile"));
        assert_eq!(req.floor, Some(0.25));
        assert_eq!(req.timeout_ms, Some(80));
    }

    /// Test: A minimal bid request needs only id and zone.
    #[test]
    fn test_bid_request_minimal() {
        let req: BidRequest =
            serde_json::from_str(r#"{ "id": "r", "zoneId": 2 }"#).expect("minimal parse");
        assert!(req.site.is_none());
        assert!(req.device.is_none());
        assert!(req.floor.is_none());
        assert!(req.timeout_ms.is_none());
    }

    /// Test: The creative payload serializes with the camelCase keys the
    /// embed snippet reads.
    #[test]
    fn test_creative_payload_keys() {
        let payload = CreativePayload {
            ad_id: 12,
            campaign_id: 7,
            impression_id: Uuid::nil(),
            kind: "image".into(),
            format: "banner".into(),
            headline: Some("Headline".into()),
            description: None,
            image_url: Some("https://cdn.example.com/a.png".into()),
            video_url: None,
            html: None,
            cta_label: Some("Shop now".into()),
            cta_url: Some("https://example.com/shop".into()),
            tracking_url: "http://localhost:8080/ads/click/12/00000000-0000-0000-0000-000000000000".into(),
        };
        let value = serde_json::to_value(&payload).expect("serialize");
        let obj = value.as_object().expect("object");

        for key in ["adId", "campaignId", "impressionId", "type", "format", "imageUrl", "ctaLabel", "ctaUrl", "trackingUrl"] {
            assert!(obj.contains_key(key), "missing key {key}: {value}");
        }
        assert!(!obj.contains_key("description"), "None fields are omitted");
        assert_eq!(obj["type"], "image");
    }
}
