use agriledger::domain::{
    CommercialTerms, Decimal, EntityId, GrantId, IncentiveConfig, IncentiveGrant,
    InstallmentState, LineItem, Order, OrderId, Role, SpendSample, TermsBook, TimeMs, Track,
};
use agriledger::engine::{build_ledger_entry, evaluate, rollup, EvidenceEvent};
use agriledger::engine::vesting::{activation_time, vested_total};
use agriledger::{LedgerError, LedgerService, MemoryStore};
use chrono::NaiveDate;
use std::sync::Arc;

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn day(y: i32, m: u32, dd: u32) -> TimeMs {
    TimeMs::from_date(NaiveDate::from_ymd_opt(y, m, dd).unwrap())
}

fn order(id: &str, total: &str, at: TimeMs) -> Order {
    Order::new(
        OrderId::new(id),
        EntityId::new("grocer-1"),
        EntityId::new("farm-1"),
        vec![LineItem::new("tomatoes", d("1"), d(total))],
        d(total),
        at,
    )
}

fn grant(signup_at: TimeMs) -> IncentiveGrant {
    IncentiveGrant {
        grant_id: GrantId::new("g-1"),
        user_id: EntityId::new("grocer-1"),
        role: Role::Grocer,
        signup_at,
        config: IncentiveConfig {
            total_amount: d("1000"),
            vesting_weeks: 4,
            min_spend_per_week: d("50"),
            activation_days: 14,
            referrer_bonus_enabled: false,
            referrer_bonus_amount: Decimal::zero(),
        },
        referred_by: None,
    }
}

fn spend(at: TimeMs, amount: &str) -> SpendSample {
    SpendSample {
        user_id: EntityId::new("grocer-1"),
        at,
        amount: d(amount),
    }
}

#[test]
fn scenario_a_markup_split() {
    let terms = CommercialTerms::new(d("15"), 0, 0);
    let entry = build_ledger_entry(&order("o-a", "115", TimeMs::new(0)), Some(&terms)).unwrap();

    assert_eq!(entry.wholesale_cost, d("100.00"));
    assert_eq!(entry.platform_margin, d("15.00"));
    assert_eq!(entry.wholesale_cost + entry.platform_margin, d("115"));
}

#[test]
fn scenario_b_due_dates() {
    let terms = CommercialTerms::new(d("10"), 7, 14);
    let entry = build_ledger_entry(&order("o-b", "50", day(2024, 1, 1)), Some(&terms)).unwrap();

    assert_eq!(entry.buyer_due.date(), NaiveDate::from_ymd_opt(2024, 1, 8).unwrap());
    assert_eq!(entry.supplier_due.date(), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
}

#[test]
fn scenario_c_partial_vesting() {
    let signup = day(2024, 3, 1);
    let g = grant(signup);
    let activation = activation_time(&g, &[signup.plus_days(3)]);
    let act = activation.unwrap();

    let samples = vec![
        spend(act.plus_days(1), "60"),
        spend(act.plus_days(8), "50"),
        spend(act.plus_days(15), "20"),
        spend(act.plus_days(16), "40"),
        // week 4 falls short
        spend(act.plus_days(22), "49.99"),
    ];

    let installments = evaluate(&g, activation, &samples, act.plus_weeks(5));
    let states: Vec<_> = installments.iter().map(|i| i.state).collect();
    assert_eq!(
        states,
        vec![
            InstallmentState::Vested,
            InstallmentState::Vested,
            InstallmentState::Vested,
            InstallmentState::Forfeited,
        ]
    );
    for inst in &installments {
        assert_eq!(inst.amount, d("250.00"));
    }
    assert_eq!(vested_total(&installments), d("750.00"));
}

#[test]
fn scenario_d_no_activation() {
    let signup = day(2024, 3, 1);
    let g = grant(signup);
    // Spend alone does not activate a grant.
    let samples = vec![spend(signup.plus_days(2), "500")];

    let installments = evaluate(&g, None, &samples, signup.plus_days(15));
    assert!(installments
        .iter()
        .all(|i| i.state == InstallmentState::Forfeited));
    assert_eq!(vested_total(&installments), Decimal::zero());

    // An order after the deadline is too late.
    let late = activation_time(&g, &[signup.plus_days(20)]);
    let installments = evaluate(&g, late, &samples, signup.plus_days(30));
    assert!(installments
        .iter()
        .all(|i| i.state == InstallmentState::Forfeited));
}

#[tokio::test]
async fn scenario_e_concurrent_mark_paid() {
    let svc = Arc::new(LedgerService::new(Arc::new(MemoryStore::new())));
    let buyer = EntityId::new("grocer-1");
    svc.set_terms(&buyer, CommercialTerms::new(d("15"), 7, 14), TimeMs::new(0))
        .await
        .unwrap();
    svc.ingest_order(order("o-e", "115", TimeMs::new(1_000)))
        .await
        .unwrap();

    let handles: Vec<_> = ["bank-ref-1", "bank-ref-2"]
        .into_iter()
        .map(|evidence| {
            let svc = svc.clone();
            tokio::spawn(async move {
                svc.record_evidence(EvidenceEvent {
                    order_id: OrderId::new("o-e"),
                    track: Track::Buyer,
                    evidence_ref: evidence.to_string(),
                    timestamp: TimeMs::new(2_000),
                })
                .await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    let failure = results.into_iter().find_map(|r| r.err()).unwrap();
    match failure {
        LedgerError::InvalidTransition { current, track, .. } => {
            assert_eq!(current, "paid");
            assert_eq!(track, Track::Buyer);
        }
        other => panic!("expected InvalidTransition, got {other}"),
    }

    let statement = svc.credit_statement(&EntityId::new("farm-1")).await.unwrap();
    assert_eq!(statement.trade_revenue, d("100"));
    assert_eq!(statement.entries.len(), 1);
}

#[test]
fn rollup_uses_terms_in_force_at_order_time() {
    let buyer = EntityId::new("grocer-1");
    let mut book = TermsBook::new();
    book.insert(
        buyer.clone(),
        agriledger::domain::TermsVersion {
            version: 1,
            effective_from: TimeMs::new(0),
            terms: CommercialTerms::new(d("15"), 7, 14),
        },
    );
    book.insert(
        buyer,
        agriledger::domain::TermsVersion {
            version: 2,
            effective_from: day(2024, 6, 1),
            terms: CommercialTerms::new(d("25"), 7, 14),
        },
    );

    let orders = vec![
        order("old", "115", day(2024, 1, 1)),
        order("new", "125", day(2024, 7, 1)),
    ];
    let report = rollup(&orders, &book, day(2024, 7, 2));

    // 15.00 from the old order under 15%, 25.00 from the new one under 25%.
    assert_eq!(report.platform_profit, d("40.00"));
    assert!(report.defaulted_orders.is_empty());
}
