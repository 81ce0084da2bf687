#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, TimeZone, Utc};
use exchange_desk::clock::ManualClock;
use exchange_desk::concurrent_desk::ShardedDesk;
use exchange_desk::config::DeskConfig;
use exchange_desk::desk::ExchangeDesk;
use exchange_desk::limits::{LimitBook, LimitValidator};
use exchange_desk::market::{CommissionTable, DiscountSchedule, RateBoard};
use exchange_desk::models::{
    Client, ClientId, Currency, OperationKind, RateQuote, Segment, SegmentDiscount,
    TransactionDraft,
};
use exchange_desk::otp::{OtpDelivery, OtpError, OtpMessage, OtpService, UserId};
use exchange_desk::pricing::PricingEngine;
use exchange_desk::store::MemoryStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const RETAIL: ClientId = 1;
pub const VIP: ClientId = 2;
pub const USER: UserId = 500;

pub fn retail() -> Client {
    Client::new(RETAIL, Segment::Retail)
}

pub fn vip() -> Client {
    Client::new(VIP, Segment::Vip)
}

pub fn usd() -> Currency {
    Currency::foreign("USD", 2)
}

/// Delivery channel that keeps every code it is handed
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<(UserId, String)>>,
}

impl RecordingDelivery {
    pub fn last_code(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|(_, code)| code.clone())
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl OtpDelivery for RecordingDelivery {
    fn deliver(&self, message: &OtpMessage<'_>) -> Result<(), OtpError> {
        self.sent
            .lock()
            .unwrap()
            .push((message.user, message.code.to_string()));
        Ok(())
    }
}

/// Market and limit setup shared by desk tests
///
/// USD quotes buy 7000 / sell 6900 with commissions 50 / 40, and VIP clients
/// get 10% off commissions. The clock starts on 2025-04-10 15:00 UTC.
pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub rates: Arc<RateBoard>,
    pub config: DeskConfig,
    pub pricing: Arc<PricingEngine>,
    pub validator: Arc<LimitValidator>,
    pub delivery: Arc<RecordingDelivery>,
}

impl Fixture {
    pub fn new(limits: LimitBook) -> Self {
        Self::with_config(limits, DeskConfig::default())
    }

    pub fn with_config(limits: LimitBook, config: DeskConfig) -> Self {
        let clock = Arc::new(ManualClock::new(clock_start()));

        let rates = Arc::new(RateBoard::new());
        rates.publish(RateQuote {
            currency: "USD".to_string(),
            buy: dec!(7000),
            sell: dec!(6900),
            active: true,
            created_at: clock_start(),
        });

        let commissions = CommissionTable::new().with_commission("USD", dec!(50), dec!(40));

        let mut discounts = DiscountSchedule::new();
        discounts
            .add(SegmentDiscount {
                segment: Segment::Vip,
                percentage: dec!(10),
                valid_from: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                valid_to: None,
                active: true,
            })
            .unwrap();

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

        Self {
            clock,
            rates,
            config,
            pricing,
            validator,
            delivery: Arc::new(RecordingDelivery::default()),
        }
    }

    pub fn desk(&self) -> ExchangeDesk<MemoryStore> {
        ExchangeDesk::new(
            MemoryStore::new(),
            self.pricing.clone(),
            self.validator.clone(),
            self.clock.clone(),
            &self.config,
        )
    }

    pub fn otp(&self) -> OtpService {
        OtpService::new(
            self.config.otp.clone(),
            self.clock.clone(),
            self.delivery.clone(),
        )
        .unwrap()
    }

    pub fn sharded(&self, num_shards: usize) -> ShardedDesk {
        ShardedDesk::new(
            num_shards,
            self.pricing.clone(),
            self.validator.clone(),
            self.clock.clone(),
            &self.config,
            self.otp(),
        )
    }
}

pub fn clock_start() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 10, 15, 0, 0).unwrap()
}

/// Hand-built draft for a buy priced at `rate`
pub fn buy_draft(requested: Decimal, rate: Decimal) -> TransactionDraft {
    TransactionDraft {
        currency: "USD".to_string(),
        kind: OperationKind::Buy,
        requested_amount: requested,
        applied_rate: rate,
        commission: Decimal::ZERO,
        base_amount: requested * rate,
        payment_method: None,
    }
}
