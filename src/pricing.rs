use std::sync::Arc;

use chrono_tz::Tz;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::clock::{local_date, Clock};
use crate::config::DeskConfig;
use crate::error::{DeskError, Result};
use crate::market::{CommissionSource, DiscountResolver, RateProvider};
use crate::models::{Client, Currency, OperationKind, PaymentMethodId, TransactionDraft};

/// Fractional digits kept on rates and per-unit commissions
pub const RATE_DECIMALS: u32 = 4;

/// Figures computed for a requested operation. Nothing is persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PriceQuote {
    pub kind: OperationKind,
    pub currency: String,
    pub requested_amount: Decimal,
    /// Board price before commission
    pub market_rate: Decimal,
    pub discount_pct: Decimal,
    /// Per-unit commission after the segment discount
    pub net_commission: Decimal,
    pub applied_rate: Decimal,
    /// Total commission in base currency
    pub commission: Decimal,
    pub base_amount: Decimal,
}

impl PriceQuote {
    pub fn into_draft(self, payment_method: Option<PaymentMethodId>) -> TransactionDraft {
        TransactionDraft {
            currency: self.currency,
            kind: self.kind,
            requested_amount: self.requested_amount,
            applied_rate: self.applied_rate,
            commission: self.commission,
            base_amount: self.base_amount,
            payment_method,
        }
    }
}

/// Computes applied rate, commission and base amount from live market facts
pub struct PricingEngine {
    rates: Arc<dyn RateProvider>,
    commissions: Arc<dyn CommissionSource>,
    discounts: Arc<dyn DiscountResolver>,
    clock: Arc<dyn Clock>,
    base_currency: String,
    base_decimals: u32,
    timezone: Tz,
}

impl PricingEngine {
    pub fn new(
        rates: Arc<dyn RateProvider>,
        commissions: Arc<dyn CommissionSource>,
        discounts: Arc<dyn DiscountResolver>,
        clock: Arc<dyn Clock>,
        config: &DeskConfig,
    ) -> Self {
        Self {
            rates,
            commissions,
            discounts,
            clock,
            base_currency: config.base_currency.clone(),
            base_decimals: config.base_decimals,
            timezone: config.timezone,
        }
    }

    /// Price a buy or sell of `requested_amount` units of `currency`
    pub fn price(
        &self,
        client: &Client,
        kind: OperationKind,
        currency: &Currency,
        requested_amount: Decimal,
    ) -> Result<PriceQuote> {
        if currency.is_base || currency.code == self.base_currency {
            return Err(DeskError::BaseCurrencyOperation(currency.code.clone()));
        }
        if requested_amount <= Decimal::ZERO {
            return Err(DeskError::InvalidAmount(requested_amount));
        }
        if requested_amount.normalize().scale() > currency.decimals {
            return Err(DeskError::AmountPrecision {
                amount: requested_amount,
                decimals: currency.decimals,
            });
        }
        self.reprice(client, kind, &currency.code, requested_amount)
    }

    /// Price an amount that was already validated, e.g. a stored transaction
    pub fn reprice(
        &self,
        client: &Client,
        kind: OperationKind,
        currency: &str,
        requested_amount: Decimal,
    ) -> Result<PriceQuote> {
        let quote = self
            .rates
            .active_quote(currency)
            .ok_or_else(|| DeskError::NoActiveRate(currency.to_string()))?;
        let commission = self.commissions.commission(currency).unwrap_or_default();
        let today = local_date(self.clock.now(), self.timezone);
        let discount_pct = self
            .discounts
            .active_discount(client.effective_segment(), today)
            .unwrap_or(Decimal::ZERO);

        let (market_rate, gross_commission) = match kind {
            OperationKind::Buy => (quote.buy, commission.buy),
            OperationKind::Sell => (quote.sell, commission.sell),
        };
        let net_commission = gross_commission
            .checked_mul(discount_pct)
            .and_then(|off| off.checked_div(Decimal::ONE_HUNDRED))
            .and_then(|off| gross_commission.checked_sub(off))
            .map(round_rate)
            .ok_or(DeskError::AmountOverflow("net commission"))?;
        let applied_rate = match kind {
            OperationKind::Buy => market_rate.checked_add(net_commission),
            OperationKind::Sell => market_rate.checked_sub(net_commission),
        }
        .map(round_rate)
        .ok_or(DeskError::AmountOverflow("applied rate"))?;
        if applied_rate <= Decimal::ZERO {
            return Err(DeskError::NonPositiveRate {
                currency: currency.to_string(),
                rate: applied_rate,
            });
        }

        let commission = net_commission
            .checked_mul(requested_amount)
            .ok_or(DeskError::AmountOverflow("commission"))?;
        let base_amount = requested_amount
            .checked_mul(applied_rate)
            .ok_or(DeskError::AmountOverflow("base amount"))?;

        let quote = PriceQuote {
            kind,
            currency: currency.to_string(),
            requested_amount,
            market_rate,
            discount_pct,
            net_commission,
            applied_rate,
            commission: self.round_base(commission),
            base_amount: self.round_base(base_amount),
        };
        log::debug!(
            "Priced {} {} {} for client {}: rate {} -> {}",
            kind,
            requested_amount,
            currency,
            client.id,
            quote.applied_rate,
            quote.base_amount
        );
        Ok(quote)
    }

    /// Round an amount to the base currency's precision, half-up
    pub fn round_base(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.base_decimals, RoundingStrategy::MidpointAwayFromZero)
    }

    pub fn base_decimals(&self) -> u32 {
        self.base_decimals
    }
}

fn round_rate(rate: Decimal) -> Decimal {
    rate.round_dp_with_strategy(RATE_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
}
