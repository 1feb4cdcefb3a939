//! Contracts of the external systems the engine talks to, plus small adapters
//! used by the replay binary.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

use crate::Credits;
use crate::eligibility::Catalog;
use crate::model::{ClientId, LeadId, ProviderId, PurchaseId, TransactionRef};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("{collaborator} unavailable: {reason}")]
    Unavailable {
        collaborator: &'static str,
        reason: String,
    },
    #[error("{collaborator} rejected request: {reason}")]
    Rejected {
        collaborator: &'static str,
        reason: String,
    },
}

impl CollaboratorError {
    pub fn unavailable(collaborator: &'static str, reason: impl Into<String>) -> Self {
        CollaboratorError::Unavailable {
            collaborator,
            reason: reason.into(),
        }
    }

    /// Unavailability is retried on a later sweep; rejections are final.
    pub fn is_transient(&self) -> bool {
        matches!(self, CollaboratorError::Unavailable { .. })
    }
}

/// Direct card charges, used only for purchases not funded by credits.
pub trait PaymentGateway: Send + Sync {
    fn charge_direct(
        &self,
        provider: ProviderId,
        amount: Credits,
    ) -> Result<TransactionRef, CollaboratorError>;
    fn reverse_charge(&self, reference: &TransactionRef) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEvent {
    LeadOffered,
    OfferExpired,
    PurchaseConfirmed,
    RefundIssued,
    RefundRejected,
}

impl ProviderEvent {
    pub const fn label(self) -> &'static str {
        match self {
            ProviderEvent::LeadOffered => "lead_offered",
            ProviderEvent::OfferExpired => "offer_expired",
            ProviderEvent::PurchaseConfirmed => "purchase_confirmed",
            ProviderEvent::RefundIssued => "refund_issued",
            ProviderEvent::RefundRejected => "refund_rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub lead: LeadId,
    pub details: BTreeMap<String, String>,
}

impl Payload {
    pub fn new(lead: LeadId) -> Self {
        Self {
            lead,
            details: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// Provider notifications. Delivery is fire-and-forget: the engine logs and
/// drops any error returned here.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        provider: ProviderId,
        event: ProviderEvent,
        payload: &Payload,
    ) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// Queue exhausted; the job reverts to a re-postable state.
    NoProvidersAvailable { needs_revision: bool },
    LeadAssigned { provider: ProviderId },
    LeadReleased,
    Refunded,
}

/// Reports lead outcomes back to the client side of the platform.
pub trait ClientGateway: Send + Sync {
    fn report(
        &self,
        client: ClientId,
        lead: LeadId,
        event: ClientEvent,
    ) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewTicket {
    pub purchase: PurchaseId,
    pub lead: LeadId,
    pub provider: ProviderId,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

/// Manual adjudication of refund requests.
pub trait ReviewDesk: Send + Sync {
    fn submit(&self, ticket: ReviewTicket) -> Result<(), CollaboratorError>;
}

/// Every collaborator the engine needs.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn Catalog>,
    pub payments: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub clients: Arc<dyn ClientGateway>,
    pub reviews: Arc<dyn ReviewDesk>,
}

impl Collaborators {
    /// Credits-only setup: payments are offline, notifications go to the log
    /// and review tickets queue up in memory.
    pub fn with_catalog(catalog: Arc<dyn Catalog>) -> Self {
        let log = Arc::new(TracingNotifier);
        Self {
            catalog,
            payments: Arc::new(OfflinePayments),
            notifier: log.clone(),
            clients: log,
            reviews: Arc::new(ReviewInbox::default()),
        }
    }
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(
        &self,
        provider: ProviderId,
        event: ProviderEvent,
        payload: &Payload,
    ) -> Result<(), CollaboratorError> {
        info!(provider = %provider, lead = %payload.lead, event = event.label(), details = ?payload.details, "provider notified");
        Ok(())
    }
}

impl ClientGateway for TracingNotifier {
    fn report(
        &self,
        client: ClientId,
        lead: LeadId,
        event: ClientEvent,
    ) -> Result<(), CollaboratorError> {
        info!(client = %client, lead = %lead, event = ?event, "client notified");
        Ok(())
    }
}

/// Payment adapter for deployments without a card processor.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflinePayments;

impl PaymentGateway for OfflinePayments {
    fn charge_direct(
        &self,
        _provider: ProviderId,
        _amount: Credits,
    ) -> Result<TransactionRef, CollaboratorError> {
        Err(CollaboratorError::unavailable(
            "payments",
            "no payment processor configured",
        ))
    }

    fn reverse_charge(&self, _reference: &TransactionRef) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::unavailable(
            "payments",
            "no payment processor configured",
        ))
    }
}

/// In-memory review queue drained by whoever adjudicates refunds.
#[derive(Debug, Default)]
pub struct ReviewInbox {
    tickets: Mutex<Vec<ReviewTicket>>,
}

impl ReviewInbox {
    pub fn drain(&self) -> Vec<ReviewTicket> {
        std::mem::take(&mut *self.tickets.lock())
    }

    pub fn len(&self) -> usize {
        self.tickets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReviewDesk for ReviewInbox {
    fn submit(&self, ticket: ReviewTicket) -> Result<(), CollaboratorError> {
        self.tickets.lock().push(ticket);
        Ok(())
    }
}
