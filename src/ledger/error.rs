//! Ledger error types.

use thiserror::Error;

use crate::Credits;
use crate::model::{ProviderId, TransactionKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient balance for provider {provider}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        provider: ProviderId,
        balance: Credits,
        requested: Credits,
    },

    #[error("provider {0} has no credit account")]
    UnknownProvider(ProviderId),

    #[error("ledger amounts must be positive, got {0}")]
    InvalidAmount(Credits),

    #[error("{kind:?} entries cannot be used as a {direction}")]
    InvalidKind {
        kind: TransactionKind,
        direction: &'static str,
    },

    #[error("provider {provider}: balance {balance} cannot absorb {amount}")]
    Overflow {
        provider: ProviderId,
        balance: Credits,
        amount: Credits,
    },

    #[error("provider {provider}: cached balance {cached} does not match ledger sum {folded}")]
    Reconciliation {
        provider: ProviderId,
        cached: Credits,
        folded: Credits,
    },
}
