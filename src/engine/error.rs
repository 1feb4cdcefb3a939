//! Error types for lead distribution.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::collaborators::CollaboratorError;
use crate::ledger::LedgerError;
use crate::model::{
    LeadId, LeadStatus, ProviderId, PurchaseId, PurchaseStatus, RefundRequestState,
};
use crate::queue::QueueError;
use crate::scoring::ScoreError;

/// Top-level error returned by [`LeadEngine`](super::LeadEngine) operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("lead {0} not found")]
    UnknownLead(LeadId),

    #[error("lead {0} already exists")]
    DuplicateLead(LeadId),

    #[error("lead {lead} is {status}")]
    LeadClosed { lead: LeadId, status: LeadStatus },

    #[error("scoring failed: {0}")]
    Validation(#[from] ScoreError),

    #[error("offer failed: {0}")]
    Offer(#[from] OfferError),

    #[error("purchase failed: {0}")]
    Purchase(#[from] PurchaseError),

    #[error("refund failed: {0}")]
    Refund(#[from] RefundError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl EngineError {
    /// Failures worth retrying later: version conflicts and collaborator outages.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Store(StoreError::Conflict { .. }) => true,
            EngineError::Collaborator(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Store(StoreError::Conflict { .. }))
    }

    pub fn is_insufficient_balance(&self) -> bool {
        matches!(
            self,
            EngineError::Ledger(LedgerError::InsufficientBalance { .. })
        )
    }
}

impl From<QueueError> for EngineError {
    fn from(e: QueueError) -> Self {
        EngineError::Offer(OfferError::Queue(e))
    }
}

/// Error during offer handling (accept, decline, skip).
#[derive(Debug, Error)]
pub enum OfferError {
    #[error("lead {lead} is {status}, not open for offers")]
    NotDistributable { lead: LeadId, status: LeadStatus },

    #[error("lead {lead}: offer to provider {provider} expired at {deadline}")]
    Expired {
        lead: LeadId,
        provider: ProviderId,
        deadline: DateTime<Utc>,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Error during purchase lifecycle updates.
#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("lead {lead}: provider {provider} holds no purchase")]
    NotFound { lead: LeadId, provider: ProviderId },

    #[error("purchase {purchase} is {status:?}, expected {expected}")]
    InvalidStatus {
        purchase: PurchaseId,
        status: PurchaseStatus,
        expected: &'static str,
    },

    #[error("purchase {0}: contact already unlocked")]
    AlreadyUnlocked(PurchaseId),
}

/// Error during refund requests and review.
#[derive(Debug, Error)]
pub enum RefundError {
    #[error("purchase {purchase} is {status:?} and cannot be refunded")]
    NotRefundable {
        purchase: PurchaseId,
        status: PurchaseStatus,
    },

    #[error("purchase {purchase}: a refund is already {state:?}")]
    AlreadyRequested {
        purchase: PurchaseId,
        state: RefundRequestState,
    },

    #[error("purchase {0} has no refund request")]
    NoRequest(PurchaseId),

    #[error("purchase {purchase}: refund request is {state:?}")]
    NotPending {
        purchase: PurchaseId,
        state: RefundRequestState,
    },
}

/// Persistence failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{entity} {id}: version {expected} is stale (current {actual})")]
    Conflict {
        entity: &'static str,
        id: u32,
        expected: u64,
        actual: u64,
    },

    #[error("lead {lead} is already held by purchase {holder}")]
    Exclusivity { lead: LeadId, holder: PurchaseId },

    #[error("{entity} {id} not found")]
    Missing { entity: &'static str, id: u32 },
}
