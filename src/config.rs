use std::collections::HashMap;
use std::str::FromStr;

use chrono::Duration;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DeskError, Result};
use crate::models::Segment;

/// Daily and monthly ceilings for one segment, in base currency
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TierCeiling {
    pub daily: Decimal,
    pub monthly: Decimal,
}

/// Segment -> ceiling table applied on top of per-client limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct TierLimits(HashMap<Segment, TierCeiling>);

impl TierLimits {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn with_tier(mut self, segment: Segment, daily: Decimal, monthly: Decimal) -> Self {
        self.0.insert(segment, TierCeiling { daily, monthly });
        self
    }

    /// Ceiling for a segment; unmapped segments use the retail tier
    pub fn ceiling_for(&self, segment: Segment) -> Option<&TierCeiling> {
        self.0
            .get(&segment)
            .or_else(|| self.0.get(&Segment::Retail))
    }
}

impl Default for TierLimits {
    fn default() -> Self {
        Self::new()
            .with_tier(
                Segment::Retail,
                Decimal::from(2_000_000),
                Decimal::from(10_000_000),
            )
            .with_tier(
                Segment::Corporate,
                Decimal::from(5_000_000),
                Decimal::from(25_000_000),
            )
            .with_tier(
                Segment::Vip,
                Decimal::from(10_000_000),
                Decimal::from(50_000_000),
            )
    }
}

/// OTP issuance and verification settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OtpConfig {
    pub code_length: u32,
    pub default_ttl_seconds: i64,
    pub max_attempts: u32,
    /// Issuances allowed per (user, purpose) inside the resend window
    pub resend_limit: u32,
    pub resend_window_seconds: i64,
    pub block_seconds: i64,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            code_length: 6,
            default_ttl_seconds: 300,
            max_attempts: 5,
            resend_limit: 3,
            resend_window_seconds: 900,
            block_seconds: 900,
        }
    }
}

impl OtpConfig {
    /// Defaults overridden by `OTP_*` environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let block_seconds = env_or("OTP_RESEND_BLOCK_SECONDS", defaults.block_seconds)?;
        let config = Self {
            code_length: env_or("OTP_CODE_LENGTH", defaults.code_length)?,
            default_ttl_seconds: env_or("OTP_DEFAULT_TTL_SECONDS", defaults.default_ttl_seconds)?,
            max_attempts: env_or("OTP_MAX_ATTEMPTS", defaults.max_attempts)?,
            resend_limit: env_or("OTP_RESEND_LIMIT", defaults.resend_limit)?,
            resend_window_seconds: env_or("OTP_RESEND_WINDOW_SECONDS", block_seconds)?,
            block_seconds,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(4..=10).contains(&self.code_length) {
            return Err(DeskError::Config(format!(
                "OTP code length must be between 4 and 10, got {}",
                self.code_length
            )));
        }
        if self.default_ttl_seconds <= 0 || self.max_attempts == 0 {
            return Err(DeskError::Config(
                "OTP ttl and max attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::seconds(self.default_ttl_seconds)
    }

    pub fn resend_window(&self) -> Duration {
        Duration::seconds(self.resend_window_seconds)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::seconds(self.block_seconds)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DeskError::Config(format!("{key} has an invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

/// Largest scale a `Decimal` can carry
const MAX_DECIMALS: u32 = 28;

/// Desk-wide settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeskConfig {
    pub base_currency: String,
    pub base_decimals: u32,
    /// Zone used to find "today" and "this month" for limits and discounts
    pub timezone: Tz,
    pub tiers: TierLimits,
    /// Post `base_amount + commission` instead of `base_amount` on confirmation
    pub ledger_includes_commission: bool,
    pub otp: OtpConfig,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            base_currency: "PYG".to_string(),
            base_decimals: 0,
            timezone: chrono_tz::America::Asuncion,
            tiers: TierLimits::default(),
            ledger_includes_commission: false,
            otp: OtpConfig::default(),
        }
    }
}

impl DeskConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: DeskConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_decimals > MAX_DECIMALS {
            return Err(DeskError::Config(format!(
                "base_decimals must be at most {MAX_DECIMALS}, got {}",
                self.base_decimals
            )));
        }
        self.otp.validate()
    }
}
