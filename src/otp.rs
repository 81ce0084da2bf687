//! One-time password issuance and verification.
//!
//! Only a salted SHA-256 hash of each code is kept. Raw codes go to the
//! [`OtpDelivery`] channel and are never logged.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::OtpConfig;
use crate::error::DeskError;

pub type UserId = u64;

/// Key/value facts an OTP is bound to (e.g. client id and amount)
pub type OtpContext = BTreeMap<String, String>;

/// Purpose used to authorise debit transactions
pub const TRANSACTION_DEBIT: &str = "transaction_debit";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OtpError {
    #[error("no OTP available, request a new one")]
    NoOtpAvailable,

    #[error("OTP expired")]
    Expired,

    #[error("maximum attempts reached for this OTP")]
    AttemptsExhausted,

    #[error("OTP does not belong to this operation")]
    ContextMismatch,

    #[error("invalid OTP code")]
    InvalidCode,

    #[error("too many codes requested, try again in {} seconds", .block.num_seconds())]
    ResendLimitExceeded { block: Duration },

    #[error("too many codes requested, try again in {} seconds", .remaining.num_seconds())]
    TemporarilyBlocked { remaining: Duration },

    #[error("could not deliver OTP: {0}")]
    Delivery(String),
}

/// Public view of an issued code
#[derive(Debug, Clone, PartialEq)]
pub struct OtpHandle {
    pub id: Uuid,
    pub user: UserId,
    pub purpose: String,
    pub expires_at: DateTime<Utc>,
    pub max_attempts: u32,
}

/// What the delivery channel receives
#[derive(Debug)]
pub struct OtpMessage<'a> {
    pub user: UserId,
    pub purpose: &'a str,
    pub destination: &'a str,
    pub code: &'a str,
    pub expires_at: DateTime<Utc>,
}

/// Out-of-band channel (email, SMS, ...) that hands the raw code to the user
pub trait OtpDelivery: Send + Sync {
    fn deliver(&self, message: &OtpMessage<'_>) -> Result<(), OtpError>;
}

/// Delivery stand-in that records the send in the log, without the code
#[derive(Debug, Default)]
pub struct LogDelivery;

impl OtpDelivery for LogDelivery {
    fn deliver(&self, message: &OtpMessage<'_>) -> Result<(), OtpError> {
        log::info!(
            "OTP for user {} ({}) sent to {}, expires at {}",
            message.user,
            message.purpose,
            message.destination,
            message.expires_at
        );
        Ok(())
    }
}

#[derive(Debug)]
struct OtpRecord {
    id: Uuid,
    user: UserId,
    purpose: String,
    salt: String,
    code_hash: [u8; 32],
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    attempts: u32,
    max_attempts: u32,
    used: bool,
    context: OtpContext,
}

impl OtpRecord {
    fn handle(&self) -> OtpHandle {
        OtpHandle {
            id: self.id,
            user: self.user,
            purpose: self.purpose.clone(),
            expires_at: self.expires_at,
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ResendCounter {
    count: u32,
    expires_at: DateTime<Utc>,
}

type OtpKey = (UserId, String);

/// Issues and verifies OTPs with resend rate limiting
pub struct OtpService {
    config: OtpConfig,
    clock: Arc<dyn Clock>,
    delivery: Arc<dyn OtpDelivery>,
    codes: Vec<OtpRecord>,
    resends: HashMap<OtpKey, ResendCounter>,
    blocks: HashMap<OtpKey, DateTime<Utc>>,
}

impl OtpService {
    /// Build a service; rejects settings that could not produce a code
    pub fn new(
        config: OtpConfig,
        clock: Arc<dyn Clock>,
        delivery: Arc<dyn OtpDelivery>,
    ) -> std::result::Result<Self, DeskError> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            delivery,
            codes: Vec::new(),
            resends: HashMap::new(),
            blocks: HashMap::new(),
        })
    }

    /// Generate, store and deliver a new code for (user, purpose)
    ///
    /// A new code supersedes any earlier unused code for the same pair.
    pub fn issue(
        &mut self,
        user: UserId,
        purpose: &str,
        destination: &str,
        ttl: Option<Duration>,
        context: OtpContext,
    ) -> Result<OtpHandle, OtpError> {
        let now = self.clock.now();
        self.prune_counters(now);
        let key = (user, purpose.to_string());

        if let Some(&until) = self.blocks.get(&key) {
            if until > now {
                return Err(OtpError::TemporarilyBlocked {
                    remaining: until - now,
                });
            }
            self.blocks.remove(&key);
        }

        let sent = self
            .resends
            .get(&key)
            .filter(|counter| counter.expires_at > now)
            .map_or(0, |counter| counter.count);
        if sent >= self.config.resend_limit {
            let block = self.config.block_duration();
            self.resends.remove(&key);
            self.blocks.insert(key, now + block);
            log::warn!("User {} blocked from requesting {} codes", user, purpose);
            return Err(OtpError::ResendLimitExceeded { block });
        }

        let code = random_numeric_code(self.config.code_length);
        let salt = hex::encode(rand::thread_rng().gen::<[u8; 16]>());
        let expires_at = now + ttl.unwrap_or_else(|| self.config.default_ttl());

        self.delivery.deliver(&OtpMessage {
            user,
            purpose,
            destination,
            code: &code,
            expires_at,
        })?;

        self.resends.insert(
            key,
            ResendCounter {
                count: sent + 1,
                expires_at: now + self.config.resend_window(),
            },
        );
        for earlier in self
            .codes
            .iter_mut()
            .filter(|r| !r.used && r.user == user && r.purpose == purpose)
        {
            earlier.used = true;
        }

        let record = OtpRecord {
            id: Uuid::new_v4(),
            user,
            purpose: purpose.to_string(),
            code_hash: hash_code(&salt, &code),
            salt,
            created_at: now,
            expires_at,
            attempts: 0,
            max_attempts: self.config.max_attempts,
            used: false,
            context,
        };
        let handle = record.handle();
        self.codes.push(record);
        Ok(handle)
    }

    /// Check `raw_code` against the newest unused code for (user, purpose)
    ///
    /// Each call counts as one attempt, whatever the outcome.
    pub fn verify(
        &mut self,
        user: UserId,
        purpose: &str,
        raw_code: &str,
        context_match: Option<&OtpContext>,
    ) -> Result<OtpHandle, OtpError> {
        let now = self.clock.now();
        let record = self
            .codes
            .iter_mut()
            .filter(|r| !r.used && r.user == user && r.purpose == purpose)
            .max_by_key(|r| r.created_at)
            .ok_or(OtpError::NoOtpAvailable)?;

        let previous_attempts = record.attempts;
        record.attempts = previous_attempts.saturating_add(1);

        let outcome = if now >= record.expires_at {
            Err(OtpError::Expired)
        } else if previous_attempts >= record.max_attempts {
            Err(OtpError::AttemptsExhausted)
        } else if context_match.is_some_and(|expected| {
            expected
                .iter()
                .any(|(k, v)| record.context.get(k) != Some(v))
        }) {
            Err(OtpError::ContextMismatch)
        } else if !bool::from(
            hash_code(&record.salt, raw_code.trim())[..].ct_eq(&record.code_hash[..]),
        ) {
            Err(OtpError::InvalidCode)
        } else {
            Ok(())
        };

        match outcome {
            Ok(()) => {
                record.used = true;
                let handle = record.handle();
                self.resends.remove(&(user, purpose.to_string()));
                Ok(handle)
            }
            Err(err) => {
                log::warn!(
                    "OTP verification for user {} ({}) failed on attempt {}: {}",
                    user,
                    purpose,
                    record.attempts,
                    err
                );
                Err(err)
            }
        }
    }

    /// Drop codes that are used or past their expiry, along with lapsed
    /// resend counters and blocks. Returns the number of codes dropped.
    pub fn purge(&mut self) -> usize {
        let now = self.clock.now();
        self.prune_counters(now);
        let before = self.codes.len();
        self.codes.retain(|r| !r.used && r.expires_at > now);
        before - self.codes.len()
    }

    fn prune_counters(&mut self, now: DateTime<Utc>) {
        self.resends.retain(|_, counter| counter.expires_at > now);
        self.blocks.retain(|_, until| *until > now);
    }

    /// Attempts recorded on the newest code for (user, purpose), used or not
    pub fn attempts(&self, user: UserId, purpose: &str) -> Option<u32> {
        self.codes
            .iter()
            .filter(|r| r.user == user && r.purpose == purpose)
            .max_by_key(|r| r.created_at)
            .map(|r| r.attempts)
    }
}

fn random_numeric_code(length: u32) -> String {
    let low = 10u64.pow(length.saturating_sub(1));
    let high = 10u64.pow(length);
    rand::thread_rng().gen_range(low..high).to_string()
}

fn hash_code(salt: &str, code: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    hasher.finalize().into()
}
