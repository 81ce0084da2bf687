mod common;

use std::fs;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use common::{clock_start, retail, usd, Fixture, RecordingDelivery, USER};
use exchange_desk::clock::ManualClock;
use exchange_desk::config::DeskConfig;
use exchange_desk::desk::ExchangeDesk;
use exchange_desk::error::DeskError;
use exchange_desk::export_ledger;
use exchange_desk::limits::{LimitBook, LimitValidator};
use exchange_desk::market::{CommissionTable, DiscountSchedule, RateBoard};
use exchange_desk::models::{
    Client, Currency, Direction, LedgerEntry, OperationKind, RateQuote, Segment, SegmentDiscount,
    SpendingLimit, TransactionState,
};
use exchange_desk::otp::{OtpError, OtpService};
use exchange_desk::pricing::PricingEngine;
use exchange_desk::store::MemoryStore;
use rust_decimal_macros::dec;

#[test]
fn test_desk_from_fixture_files() {
    // Full flow wired from configuration files:
    // - Corporate client buys EUR with an OTP, sells USD via payment confirmation
    // - A third request over the per-operation ceiling is refused
    let raw = fs::read_to_string("tests/fixtures/desk.json").unwrap();
    let config = DeskConfig::from_json_str(&raw).unwrap();
    assert_eq!(config.otp.default_ttl_seconds, 120);
    assert_eq!(config.otp.resend_limit, 3);

    let commissions = CommissionTable::from_path("tests/fixtures/commissions.csv").unwrap();
    assert_eq!(commissions.len(), 3);

    let clock = Arc::new(ManualClock::new(clock_start()));
    let rates = Arc::new(RateBoard::new());
    for (currency, buy, sell) in [("USD", dec!(7000), dec!(6900)), ("EUR", dec!(7600), dec!(7450))] {
        rates.publish(RateQuote {
            currency: currency.to_string(),
            buy,
            sell,
            active: true,
            created_at: clock_start(),
        });
    }

    let mut discounts = DiscountSchedule::new();
    discounts
        .add(SegmentDiscount {
            segment: Segment::Corporate,
            percentage: dec!(25),
            valid_from: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            valid_to: Some(NaiveDate::from_ymd_opt(2025, 4, 30).unwrap()),
            active: true,
        })
        .unwrap();

    let client = Client::new(40, Segment::Corporate);
    let limits = LimitBook::new().with_limit(SpendingLimit::base(40, dec!(2000000)));

    let pricing = Arc::new(PricingEngine::new(
        rates.clone(),
        Arc::new(commissions),
        Arc::new(discounts),
        clock.clone(),
        &config,
    ));
    let validator = Arc::new(LimitValidator::new(
        Arc::new(limits),
        config.tiers.clone(),
        config.timezone,
        &config.base_currency,
    ));
    let mut desk = ExchangeDesk::new(
        MemoryStore::new(),
        pricing,
        validator,
        clock.clone(),
        &config,
    );
    let delivery = Arc::new(RecordingDelivery::default());
    let mut otp = OtpService::new(config.otp.clone(), clock.clone(), delivery.clone()).unwrap();

    // 60 less 25% = 45, so 7645 x 200 = 1529000
    let eur = Currency::foreign("EUR", 2);
    let buy = desk
        .open(&client, OperationKind::Buy, &eur, dec!(200), Some(1))
        .unwrap();
    assert_eq!(buy.applied_rate, dec!(7645));
    assert_eq!(buy.base_amount, dec!(1529000));
    assert_eq!(buy.commission, dec!(9000));

    desk.request_debit_otp(&mut otp, USER, buy.id, "corp@example.com")
        .unwrap();
    clock.advance(Duration::seconds(30));
    let code = delivery.last_code().unwrap();
    desk.confirm_with_otp(&mut otp, buy.id, USER, &code).unwrap();

    // 40 less 25% = 30, so 6870 x 100 = 687000
    let sell = desk
        .open(&client, OperationKind::Sell, &usd(), dec!(100), None)
        .unwrap();
    desk.confirm_with_accreditation(sell.id, Some(2)).unwrap();

    let refused = desk.open(&client, OperationKind::Buy, &usd(), dec!(300), None);
    assert!(matches!(refused, Err(DeskError::LimitExceeded(_))));

    let transactions = desk.transactions_for_client(40).unwrap();
    assert_eq!(transactions.len(), 2);
    assert!(transactions
        .iter()
        .all(|t| t.state == TransactionState::Paid));

    let entries = desk.ledger_entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].direction, Direction::Debit);
    assert_eq!(entries[0].amount, dec!(1529000));
    assert_eq!(entries[1].direction, Direction::Credit);
    assert_eq!(entries[1].amount, dec!(687000));
    assert_eq!(entries[1].accreditation_method, Some(2));
}

#[test]
fn test_malformed_config_rejected() {
    let result = DeskConfig::from_json_str("{ not json");
    assert!(matches!(result, Err(DeskError::Json(_))));
}

#[test]
fn test_export_ledger_csv() {
    let fixture = Fixture::new(LimitBook::new());
    let mut desk = fixture.desk();

    let buy = desk
        .open(&retail(), OperationKind::Buy, &usd(), dec!(100), None)
        .unwrap();
    let sell = desk
        .open(&retail(), OperationKind::Sell, &usd(), dec!(50), None)
        .unwrap();
    desk.confirm_with_accreditation(sell.id, Some(9)).unwrap();
    desk.confirm(buy.id).unwrap();

    let mut entries: Vec<LedgerEntry> = desk.ledger_entries().unwrap();
    entries.reverse();

    let mut output = Vec::new();
    export_ledger(&entries, &mut output).unwrap();
    let output_str = String::from_utf8(output).unwrap();
    println!("Ledger export:\n{}", output_str);

    let lines: Vec<&str> = output_str.lines().collect();
    assert_eq!(
        lines[0],
        "id,transaction_id,client_id,direction,amount,accreditation_method,created_at"
    );
    assert_eq!(lines.len(), 3);
    // Sell was confirmed first: 6860 x 50 = 343000
    assert!(lines[1].starts_with("1,2,1,CREDIT,343000,9,2025-04-10T15:00:00"));
    assert!(lines[2].starts_with("2,1,1,DEBIT,705000,,2025-04-10T15:00:00"));
}

#[test]
fn test_export_empty_ledger_writes_nothing() {
    let mut output = Vec::new();
    export_ledger(&[], &mut output).unwrap();
    assert!(output.is_empty());
}

#[test]
fn test_otp_resend_block_through_desk() {
    let fixture = Fixture::new(LimitBook::new());
    let mut desk = fixture.desk();
    let mut otp = fixture.otp();
    let t = desk
        .open(&retail(), OperationKind::Buy, &usd(), dec!(100), None)
        .unwrap();

    for _ in 0..fixture.config.otp.resend_limit {
        desk.request_debit_otp(&mut otp, USER, t.id, "client@example.com")
            .unwrap();
    }

    let blocked = desk.request_debit_otp(&mut otp, USER, t.id, "client@example.com");
    assert!(matches!(
        blocked,
        Err(DeskError::InvalidOtp(OtpError::ResendLimitExceeded { .. }))
    ));
    let still_blocked = desk.request_debit_otp(&mut otp, USER, t.id, "client@example.com");
    assert!(matches!(
        still_blocked,
        Err(DeskError::InvalidOtp(OtpError::TemporarilyBlocked { .. }))
    ));

    // The last delivered code still confirms the purchase
    let code = fixture.delivery.last_code().unwrap();
    let paid = desk.confirm_with_otp(&mut otp, t.id, USER, &code).unwrap();
    assert_eq!(paid.state, TransactionState::Paid);
}
