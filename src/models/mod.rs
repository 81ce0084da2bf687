pub mod client;
pub mod ledger;
pub mod limits;
pub mod market;
pub mod transaction;

pub use client::{Client, ClientId, Currency, Segment};
pub use ledger::{AccreditationMethodId, Direction, LedgerEntry, NewLedgerEntry};
pub use limits::SpendingLimit;
pub use market::{Commission, RateQuote, SegmentDiscount};
pub use transaction::{
    OperationKind, PaymentMethodId, Transaction, TransactionDraft, TransactionId,
    TransactionState,
};
