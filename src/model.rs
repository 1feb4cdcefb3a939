//! Core domain types for the lead distribution engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Credits;
use crate::scoring::PartnerMetrics;

/// Lead identifier. Leads mirror posted jobs, so the id is the job id.
pub type LeadId = u32;

/// Provider identifier.
pub type ProviderId = u32;

/// Client (job poster) identifier.
pub type ClientId = u32;

/// Purchase identifier, allocated by the engine.
pub type PurchaseId = u32;

/// Ledger transaction identifier.
pub type TransactionId = u64;

/// Whether an account belongs to a person or a registered company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccountKind {
    #[default]
    Individual,
    Company,
}

/// WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Where a job takes place.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Region {
    pub city: String,
    pub point: Option<GeoPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobSize {
    Small,
    Medium,
    Large,
    ExtraLarge,
}

/// Job attributes the scorer and the eligibility resolver look at.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobPosting {
    pub category: String,
    pub region: Region,
    pub budget: Option<Budget>,
    pub urgency: Urgency,
    pub description_words: u32,
    pub images: u8,
    pub has_deadline: bool,
    pub size: Option<JobSize>,
    pub requires_license: bool,
}

/// Verification flags collected for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientVerification {
    pub phone: bool,
    pub email: bool,
    pub identity: bool,
    pub tax_id: bool,
    pub company: bool,
}

/// Client data relevant to scoring and self-assignment checks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClientProfile {
    pub id: ClientId,
    pub kind: AccountKind,
    pub tax_id: Option<String>,
    pub verification: ClientVerification,
    pub account_age_days: u32,
    pub completed_jobs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadStatus {
    Draft,
    Available,
    InQueue,
    Assigned,
    Contacted,
    Converted,
    Refunded,
    Expired,
}

impl LeadStatus {
    /// Statuses in which the offer scheduler is allowed to work the queue.
    pub fn is_distributable(self) -> bool {
        matches!(self, LeadStatus::Available | LeadStatus::InQueue)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LeadStatus::Converted | LeadStatus::Refunded | LeadStatus::Expired
        )
    }

    pub const fn label(self) -> &'static str {
        match self {
            LeadStatus::Draft => "draft",
            LeadStatus::Available => "available",
            LeadStatus::InQueue => "in_queue",
            LeadStatus::Assigned => "assigned",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Converted => "converted",
            LeadStatus::Refunded => "refunded",
            LeadStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A posted job as seen by the distribution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub client: ClientId,
    pub client_tax_id: Option<String>,
    pub posting: JobPosting,
    pub quality_score: u8,
    pub client_trust_score: u8,
    pub price: Credits,
    pub status: LeadStatus,
    pub assigned_provider: Option<ProviderId>,
    pub created_at: DateTime<Utc>,
}

/// Offer progression of one (lead, provider) pairing.
///
/// Only forward moves are legal: `Pending -> Offered -> {Accepted | Declined | Expired | Skipped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OfferState {
    #[default]
    Pending,
    Offered,
    Accepted,
    Declined,
    Expired,
    Skipped,
}

impl OfferState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OfferState::Pending | OfferState::Offered)
    }

    pub fn can_advance_to(self, next: OfferState) -> bool {
        match self {
            OfferState::Pending => next == OfferState::Offered,
            OfferState::Offered => next.is_terminal(),
            _ => false,
        }
    }
}

/// Ranked candidate for a lead. Retained for audit after it leaves the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub lead: LeadId,
    pub provider: ProviderId,
    pub match_score: i32,
    pub partner_score: f64,
    pub pass: u32,
    pub state: OfferState,
    pub offered_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseStatus {
    Active,
    Contacted,
    Converted,
    Refunded,
    Expired,
}

impl PurchaseStatus {
    /// Active and contacted purchases still hold the lead.
    pub fn is_open(self) -> bool {
        matches!(self, PurchaseStatus::Active | PurchaseStatus::Contacted)
    }

    /// Purchases that count against exclusivity.
    pub fn holds_lead(self) -> bool {
        matches!(
            self,
            PurchaseStatus::Active | PurchaseStatus::Contacted | PurchaseStatus::Converted
        )
    }
}

/// Reference returned by the payment collaborator for a direct charge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionRef(pub String);

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the provider pays for an acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FundingSource {
    #[default]
    Credits,
    DirectCharge,
}

/// How a purchase was actually funded; selects the refund path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Funding {
    Credits { transaction: TransactionId },
    DirectCharge { reference: TransactionRef },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundRequestState {
    PendingReview,
    /// Approved but the reversal has not settled yet.
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub state: RefundRequestState,
    /// Whether the manual-review collaborator has received the request.
    pub routed: bool,
    pub automatic: bool,
    /// The direct charge behind the purchase was reversed at the gateway.
    #[serde(default)]
    pub reversed: bool,
}

/// A provider's exclusive claim on a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: PurchaseId,
    pub lead: LeadId,
    pub provider: ProviderId,
    pub credits_spent: Credits,
    pub funding: Funding,
    pub status: PurchaseStatus,
    pub contact_unlocked: bool,
    pub contact_unlock_spent: Credits,
    pub created_at: DateTime<Utc>,
    pub contacted_at: Option<DateTime<Utc>>,
    pub converted_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    pub refund_request: Option<RefundRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Credit pack bought by the provider.
    Purchase,
    LeadPurchase,
    Refund,
    Bonus,
    Subscription,
    AdminAdjust,
}

impl TransactionKind {
    pub fn is_debit_kind(self) -> bool {
        matches!(self, TransactionKind::LeadPurchase | TransactionKind::AdminAdjust)
    }

    pub fn is_credit_kind(self) -> bool {
        !matches!(self, TransactionKind::LeadPurchase)
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: TransactionId,
    pub provider: ProviderId,
    pub kind: TransactionKind,
    pub amount: Credits,
    pub balance_after: Credits,
    pub reason: String,
    pub related_purchase: Option<PurchaseId>,
    pub created_at: DateTime<Utc>,
}

/// Registered service area of a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceLocation {
    pub city: String,
    pub point: Option<GeoPoint>,
    pub radius_km: f64,
    pub active: bool,
}

/// Provider data supplied by the catalog collaborator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub id: ProviderId,
    pub kind: AccountKind,
    pub tax_id: Option<String>,
    pub categories: Vec<String>,
    pub primary_category: Option<String>,
    pub licensed_categories: Vec<String>,
    pub locations: Vec<ServiceLocation>,
    pub active_subscription: bool,
    pub credit_capacity: Credits,
    pub partner_inputs: PartnerMetrics,
    pub recent_missed_offers: u32,
}

/// Inputs of the engine's command stream.
#[derive(Debug, Clone)]
pub enum Command {
    Publish {
        lead: LeadId,
        client: ClientProfile,
        posting: JobPosting,
        at: DateTime<Utc>,
    },
    Accept {
        lead: LeadId,
        provider: ProviderId,
        funding: FundingSource,
        at: DateTime<Utc>,
    },
    Decline {
        lead: LeadId,
        provider: ProviderId,
        at: DateTime<Utc>,
    },
    Skip {
        lead: LeadId,
        provider: ProviderId,
        at: DateTime<Utc>,
    },
    MarkContacted {
        lead: LeadId,
        provider: ProviderId,
        at: DateTime<Utc>,
    },
    MarkConverted {
        lead: LeadId,
        provider: ProviderId,
        at: DateTime<Utc>,
    },
    UnlockContact {
        lead: LeadId,
        provider: ProviderId,
        at: DateTime<Utc>,
    },
    RequestRefund {
        lead: LeadId,
        provider: ProviderId,
        reason: String,
        at: DateTime<Utc>,
    },
    CancelRefund {
        lead: LeadId,
        provider: ProviderId,
        at: DateTime<Utc>,
    },
    ReviewRefund {
        lead: LeadId,
        provider: ProviderId,
        approve: bool,
        at: DateTime<Utc>,
    },
    Withdraw {
        lead: LeadId,
        at: DateTime<Utc>,
    },
    TopUp {
        provider: ProviderId,
        amount: Credits,
        kind: TransactionKind,
        at: DateTime<Utc>,
    },
    Sweep {
        at: DateTime<Utc>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Publish { .. } => "publish",
            Command::Accept { .. } => "accept",
            Command::Decline { .. } => "decline",
            Command::Skip { .. } => "skip",
            Command::MarkContacted { .. } => "contacted",
            Command::MarkConverted { .. } => "converted",
            Command::UnlockContact { .. } => "unlock",
            Command::RequestRefund { .. } => "refund",
            Command::CancelRefund { .. } => "cancel_refund",
            Command::ReviewRefund { .. } => "review_refund",
            Command::Withdraw { .. } => "withdraw",
            Command::TopUp { .. } => "topup",
            Command::Sweep { .. } => "sweep",
        }
    }
}
