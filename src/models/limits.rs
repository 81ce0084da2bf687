use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::client::ClientId;

/// Per-client ceiling, in base currency when `currency` is `None`
/// and in the named foreign currency otherwise
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpendingLimit {
    pub client_id: ClientId,
    pub currency: Option<String>,
    pub max_per_operation: Decimal,
    pub max_per_month: Option<Decimal>,
}

impl SpendingLimit {
    pub fn base(client_id: ClientId, max_per_operation: Decimal) -> Self {
        Self {
            client_id,
            currency: None,
            max_per_operation,
            max_per_month: None,
        }
    }

    pub fn for_currency(
        client_id: ClientId,
        currency: &str,
        max_per_operation: Decimal,
        max_per_month: Option<Decimal>,
    ) -> Self {
        Self {
            client_id,
            currency: Some(currency.to_string()),
            max_per_operation,
            max_per_month,
        }
    }
}
