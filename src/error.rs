use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::limits::LimitBreach;
use crate::models::TransactionState;
use crate::otp::OtpError;

/// Errors raised by the exchange desk.
///
/// Business failures (pricing, limits, state, OTP) are surfaced to the caller
/// before anything is written; system failures wrap I/O and parsing errors.
#[derive(Error, Debug)]
pub enum DeskError {
    #[error("no active exchange rate for {0}")]
    NoActiveRate(String),

    #[error("invalid operation kind '{0}'")]
    InvalidOperationKind(String),

    #[error("amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("amount {amount} has more than {decimals} decimal places")]
    AmountPrecision { amount: Decimal, decimals: u32 },

    #[error("{0} is out of the representable decimal range")]
    AmountOverflow(&'static str),

    #[error("{0} is the base currency and cannot be traded against itself")]
    BaseCurrencyOperation(String),

    #[error("applied rate {rate} for {currency} is not positive")]
    NonPositiveRate { currency: String, rate: Decimal },

    #[error("base amount {base_amount} does not match {requested_amount} x {applied_rate}")]
    InconsistentAmounts {
        requested_amount: Decimal,
        applied_rate: Decimal,
        base_amount: Decimal,
    },

    #[error("{0}")]
    LimitExceeded(LimitBreach),

    #[error("cannot {action} transaction {transaction} in state {state}")]
    InvalidState {
        transaction: Uuid,
        state: TransactionState,
        action: &'static str,
    },

    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    #[error("transaction {0} is not a debit and does not take an OTP")]
    OtpNotApplicable(Uuid),

    #[error("OTP check failed: {0}")]
    InvalidOtp(#[from] OtpError),

    #[error("an active discount already covers part of this window for segment {0}")]
    OverlappingDiscount(&'static str),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DeskError>;
