use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;

use crate::clock::{start_of_day, start_of_month};
use crate::config::TierLimits;
use crate::error::{DeskError, Result};
use crate::models::{Client, ClientId, SpendingLimit};
use crate::store::{Aggregate, DeskStore};

/// Which ceiling a request ran into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    /// Client's per-operation ceiling in base currency
    OperationBase,
    /// Client's per-operation ceiling in the foreign currency
    OperationCurrency,
    /// Client's monthly ceiling in the foreign currency
    MonthlyCurrency,
    /// Segment tier daily ceiling in base currency
    DailyTier,
    /// Segment tier monthly ceiling in base currency
    MonthlyTier,
}

/// Details of a failed limit check, for user-facing messages
#[derive(Debug, Clone, PartialEq)]
pub struct LimitBreach {
    pub scope: LimitScope,
    pub ceiling: Decimal,
    /// Running total already used in the period (zero for per-operation checks)
    pub accumulated: Decimal,
    pub requested: Decimal,
    /// Currency the figures are expressed in
    pub currency: String,
}

impl fmt::Display for LimitBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            LimitScope::OperationBase | LimitScope::OperationCurrency => write!(
                f,
                "operation of {} {} exceeds the per-operation limit of {} {}",
                self.requested, self.currency, self.ceiling, self.currency
            ),
            LimitScope::MonthlyCurrency | LimitScope::MonthlyTier => write!(
                f,
                "monthly limit exceeded: {} + {} > {} {}",
                self.accumulated, self.requested, self.ceiling, self.currency
            ),
            LimitScope::DailyTier => write!(
                f,
                "daily limit exceeded: {} + {} > {} {}",
                self.accumulated, self.requested, self.ceiling, self.currency
            ),
        }
    }
}

/// Per-client spending limit records
pub trait LimitSource: Send + Sync {
    fn base_limit(&self, client_id: ClientId) -> Option<SpendingLimit>;
    fn currency_limit(&self, client_id: ClientId, currency: &str) -> Option<SpendingLimit>;
}

/// In-memory limit records. Absent records mean unlimited.
#[derive(Debug, Clone, Default)]
pub struct LimitBook {
    base: HashMap<ClientId, SpendingLimit>,
    per_currency: HashMap<(ClientId, String), SpendingLimit>,
}

impl LimitBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a limit record
    pub fn with_limit(mut self, limit: SpendingLimit) -> Self {
        match limit.currency.clone() {
            Some(currency) => {
                self.per_currency.insert((limit.client_id, currency), limit);
            }
            None => {
                self.base.insert(limit.client_id, limit);
            }
        }
        self
    }
}

impl LimitSource for LimitBook {
    fn base_limit(&self, client_id: ClientId) -> Option<SpendingLimit> {
        self.base.get(&client_id).cloned()
    }

    fn currency_limit(&self, client_id: ClientId, currency: &str) -> Option<SpendingLimit> {
        self.per_currency
            .get(&(client_id, currency.to_string()))
            .cloned()
    }
}

/// Checks a request against client and segment ceilings
///
/// Running totals are read from the store on every call, so the caller must
/// hold the same exclusive section across `validate` and the insert that
/// follows it.
pub struct LimitValidator {
    limits: Arc<dyn LimitSource>,
    tiers: TierLimits,
    timezone: Tz,
    base_currency: String,
}

impl LimitValidator {
    pub fn new(
        limits: Arc<dyn LimitSource>,
        tiers: TierLimits,
        timezone: Tz,
        base_currency: &str,
    ) -> Self {
        Self {
            limits,
            tiers,
            timezone,
            base_currency: base_currency.to_string(),
        }
    }

    /// Run every check in order; the first failure wins
    pub fn validate<S: DeskStore + ?Sized>(
        &self,
        store: &S,
        client: &Client,
        currency: &str,
        requested_amount: Decimal,
        base_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = self
            .check_base_limit(client, base_amount)
            .and_then(|_| self.check_currency_limit(store, client, currency, requested_amount, now))
            .and_then(|_| self.check_tier_limits(store, client, currency, base_amount, now));

        if let Err(DeskError::LimitExceeded(breach)) = &result {
            log::warn!("Client {} rejected: {}", client.id, breach);
        }
        result
    }

    fn check_base_limit(&self, client: &Client, base_amount: Decimal) -> Result<()> {
        let Some(limit) = self.limits.base_limit(client.id) else {
            return Ok(());
        };
        if base_amount > limit.max_per_operation {
            return Err(self.breach(
                LimitScope::OperationBase,
                limit.max_per_operation,
                Decimal::ZERO,
                base_amount,
                &self.base_currency,
            ));
        }
        Ok(())
    }

    fn check_currency_limit<S: DeskStore + ?Sized>(
        &self,
        store: &S,
        client: &Client,
        currency: &str,
        requested_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(limit) = self.limits.currency_limit(client.id, currency) else {
            return Ok(());
        };
        if requested_amount > limit.max_per_operation {
            return Err(self.breach(
                LimitScope::OperationCurrency,
                limit.max_per_operation,
                Decimal::ZERO,
                requested_amount,
                currency,
            ));
        }

        if let Some(monthly) = limit.max_per_month {
            let since = start_of_month(now, self.timezone);
            let used = store.sum_since(client.id, currency, since, Aggregate::Requested)?;
            if checked_total(used, requested_amount)? > monthly {
                return Err(self.breach(
                    LimitScope::MonthlyCurrency,
                    monthly,
                    used,
                    requested_amount,
                    currency,
                ));
            }
        }
        Ok(())
    }

    fn check_tier_limits<S: DeskStore + ?Sized>(
        &self,
        store: &S,
        client: &Client,
        currency: &str,
        base_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(tier) = self.tiers.ceiling_for(client.effective_segment()) else {
            return Ok(());
        };

        let today = store.sum_since(
            client.id,
            currency,
            start_of_day(now, self.timezone),
            Aggregate::Base,
        )?;
        if checked_total(today, base_amount)? > tier.daily {
            return Err(self.breach(
                LimitScope::DailyTier,
                tier.daily,
                today,
                base_amount,
                &self.base_currency,
            ));
        }

        let month = store.sum_since(
            client.id,
            currency,
            start_of_month(now, self.timezone),
            Aggregate::Base,
        )?;
        if checked_total(month, base_amount)? > tier.monthly {
            return Err(self.breach(
                LimitScope::MonthlyTier,
                tier.monthly,
                month,
                base_amount,
                &self.base_currency,
            ));
        }
        Ok(())
    }

    fn breach(
        &self,
        scope: LimitScope,
        ceiling: Decimal,
        accumulated: Decimal,
        requested: Decimal,
        currency: &str,
    ) -> DeskError {
        DeskError::LimitExceeded(LimitBreach {
            scope,
            ceiling,
            accumulated,
            requested,
            currency: currency.to_string(),
        })
    }
}

fn checked_total(used: Decimal, requested: Decimal) -> Result<Decimal> {
    used.checked_add(requested)
        .ok_or(DeskError::AmountOverflow("running total"))
}
