//! Lead distribution engine.
//!
//! The engine publishes scored leads, works each lead's matching queue one
//! offer at a time and manages the purchase that results from an acceptance.
//! Provider actions take effect immediately; offers, expiries and refunds
//! are driven by the periodic sweep (see [`sweep`]).
//!
//! Lead status while distributable:
//! - `Available`: waiting for an eligibility pass (new, deferred or released)
//! - `InQueue`: the queue holds candidates and offers are being worked
//!
//! Notifications are collected while a change is prepared and dispatched
//! only after it is committed. Delivery failures are logged and dropped.

use chrono::{DateTime, Utc};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::Credits;
use crate::collaborators::{ClientEvent, CollaboratorError, Collaborators, Payload, ProviderEvent};
use crate::config::EngineConfig;
use crate::eligibility::EligibilityResolver;
use crate::ledger::{CreditLedger, LedgerEntry};
use crate::model::{
    ClientId, ClientProfile, Command, CreditTransaction, Funding, FundingSource, JobPosting, Lead,
    LeadId, LeadStatus, OfferState, ProviderId, Purchase, PurchaseId, PurchaseStatus,
    RefundRequestState, TransactionKind,
};
use crate::queue::{MatchingQueue, QueueError};
use crate::scoring::{recommend_price, score_lead};

mod error;
pub use error::{EngineError, OfferError, PurchaseError, RefundError, StoreError};

mod store;
pub use store::{LeadRecord, PurchaseRecord, Store};

mod refund;
pub use refund::RefundSweep;

pub mod sweep;
pub use sweep::{Scheduler, SweepReport};

#[cfg(test)]
mod testkit;

/// A notification produced by a committed change.
#[derive(Debug)]
enum Effect {
    Provider {
        provider: ProviderId,
        event: ProviderEvent,
        payload: Payload,
    },
    Client {
        client: ClientId,
        lead: LeadId,
        event: ClientEvent,
    },
}

/// What one sweep did to one lead.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LeadSweep {
    pub offered: bool,
    pub expired: bool,
    pub exhausted: bool,
    /// The catalog was unavailable; the pass is retried next tick.
    pub deferred: bool,
}

pub struct LeadEngine {
    config: EngineConfig,
    store: Store,
    ledger: CreditLedger,
    resolver: EligibilityResolver,
    collaborators: Collaborators,
}

/// Public API
impl LeadEngine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        Self {
            resolver: EligibilityResolver::new(collaborators.catalog.clone()),
            config,
            store: Store::new(),
            ledger: CreditLedger::new(),
            collaborators,
        }
    }

    /// Run the engine with the given command stream
    pub async fn run(&self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            // a rejected command must not stop the engine
            let _ = self.execute(command);
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    pub fn lead(&self, id: LeadId) -> Option<Lead> {
        self.store.lead(id).map(|record| record.lead)
    }

    pub fn queue(&self, id: LeadId) -> Option<MatchingQueue> {
        self.store.lead(id).map(|record| record.queue)
    }

    /// Every purchase ever made on `lead`, oldest first.
    pub fn purchases(&self, lead: LeadId) -> Vec<Purchase> {
        self.store
            .purchases_for(lead)
            .into_iter()
            .map(|record| record.purchase)
            .collect()
    }

    /// Apply a single command on top of the current engine state
    pub fn execute(&self, command: Command) -> Result<(), EngineError> {
        let name = command.name();
        let (lead, provider, result) = match command {
            Command::Publish {
                lead,
                client,
                posting,
                at,
            } => (Some(lead), None, self.publish(lead, &client, posting, at).map(drop)),
            Command::Accept {
                lead,
                provider,
                funding,
                at,
            } => (
                Some(lead),
                Some(provider),
                self.accept(lead, provider, funding, at).map(drop),
            ),
            Command::Decline { lead, provider, at } => {
                (Some(lead), Some(provider), self.decline(lead, provider, at))
            }
            Command::Skip { lead, provider, at } => {
                (Some(lead), Some(provider), self.skip(lead, provider, at))
            }
            Command::MarkContacted { lead, provider, at } => (
                Some(lead),
                Some(provider),
                self.mark_contacted(lead, provider, at).map(drop),
            ),
            Command::MarkConverted { lead, provider, at } => (
                Some(lead),
                Some(provider),
                self.mark_converted(lead, provider, at).map(drop),
            ),
            Command::UnlockContact { lead, provider, at } => (
                Some(lead),
                Some(provider),
                self.unlock_contact(lead, provider, at).map(drop),
            ),
            Command::RequestRefund {
                lead,
                provider,
                reason,
                at,
            } => (
                Some(lead),
                Some(provider),
                self.request_refund(lead, provider, &reason, at).map(drop),
            ),
            Command::CancelRefund { lead, provider, at } => {
                (Some(lead), Some(provider), self.cancel_refund(lead, provider, at))
            }
            Command::ReviewRefund {
                lead,
                provider,
                approve,
                at,
            } => (
                Some(lead),
                Some(provider),
                self.resolve_review(lead, provider, approve, at).map(drop),
            ),
            Command::Withdraw { lead, at } => (Some(lead), None, self.withdraw(lead, at)),
            Command::TopUp {
                provider,
                amount,
                kind,
                at,
            } => (None, Some(provider), self.top_up(provider, amount, kind, at).map(drop)),
            Command::Sweep { at } => {
                let report = self.sweep(at);
                debug!(?report, "sweep finished");
                (None, None, Ok(()))
            }
        };
        Self::log_result(name, lead, provider, &result);
        result
    }

    /// Score and store a newly posted job, then resolve its first
    /// eligibility pass. An unavailable catalog leaves the pass to the sweep.
    pub fn publish(
        &self,
        id: LeadId,
        client: &ClientProfile,
        posting: JobPosting,
        now: DateTime<Utc>,
    ) -> Result<Lead, EngineError> {
        let scores = score_lead(&posting, client)?;
        let lead = Lead {
            id,
            client: client.id,
            client_tax_id: client.tax_id.clone(),
            posting,
            quality_score: scores.quality,
            client_trust_score: scores.trust,
            price: recommend_price(scores.quality, self.config.base_lead_price),
            status: LeadStatus::Available,
            assigned_provider: None,
            created_at: now,
        };
        if !self.store.insert_lead(LeadRecord::new(lead.clone())) {
            return Err(EngineError::DuplicateLead(id));
        }
        info!(lead = %id, quality = scores.quality, trust = scores.trust, price = %lead.price, "lead published");

        if let Err(e) = self.populate(id, now) {
            warn!(lead = %id, reason = %e, "eligibility pass deferred");
        }
        Ok(self.lead(id).unwrap_or(lead))
    }

    /// Re-run the scorer after the client's verification changed. The price
    /// follows the new quality only while no offer has gone out.
    pub fn rescore(&self, id: LeadId, client: &ClientProfile) -> Result<Lead, EngineError> {
        self.retry_once("rescore", || {
            let mut record = self.store.lead(id).ok_or(EngineError::UnknownLead(id))?;
            if record.lead.status.is_terminal() {
                return Err(EngineError::LeadClosed {
                    lead: id,
                    status: record.lead.status,
                });
            }
            let scores = score_lead(&record.lead.posting, client)?;
            record.lead.quality_score = scores.quality;
            record.lead.client_trust_score = scores.trust;
            if record.queue.offered_providers().is_empty() {
                record.lead.price = recommend_price(scores.quality, self.config.base_lead_price);
            }
            let lead = record.lead.clone();
            self.store.commit_lead(record)?;
            Ok(lead)
        })
    }

    /// Accept the open offer of `provider`.
    ///
    /// The ledger debit and the purchase commit are atomic: an insufficient
    /// balance rejects the acceptance and leaves the offer open.
    pub fn accept(
        &self,
        lead: LeadId,
        provider: ProviderId,
        funding: FundingSource,
        now: DateTime<Utc>,
    ) -> Result<Purchase, EngineError> {
        self.retry_once("accept", || self.try_accept(lead, provider, funding, now))
    }

    pub fn decline(
        &self,
        lead: LeadId,
        provider: ProviderId,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.retry_once("decline", || {
            self.respond(lead, provider, OfferState::Declined, now)
        })
    }

    /// Postpone without declining; advances the queue like a decline.
    pub fn skip(
        &self,
        lead: LeadId,
        provider: ProviderId,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.retry_once("skip", || {
            self.respond(lead, provider, OfferState::Skipped, now)
        })
    }

    /// The provider reached the client.
    pub fn mark_contacted(
        &self,
        lead: LeadId,
        provider: ProviderId,
        now: DateTime<Utc>,
    ) -> Result<Purchase, EngineError> {
        self.retry_once("contacted", || {
            let (mut record, mut purchase) = self.holding(lead, provider)?;
            let p = &mut purchase.purchase;
            if p.status != PurchaseStatus::Active {
                return Err(PurchaseError::InvalidStatus {
                    purchase: p.id,
                    status: p.status,
                    expected: "active",
                }
                .into());
            }
            p.status = PurchaseStatus::Contacted;
            p.contacted_at = Some(now);
            record.lead.status = LeadStatus::Contacted;

            let snapshot = purchase.purchase.clone();
            self.store.commit(Some(record), Some(purchase))?;
            Ok(snapshot)
        })
    }

    /// The job was won. Cancels a refund request still under review.
    pub fn mark_converted(
        &self,
        lead: LeadId,
        provider: ProviderId,
        now: DateTime<Utc>,
    ) -> Result<Purchase, EngineError> {
        self.retry_once("converted", || {
            let (mut record, mut purchase) = self.holding(lead, provider)?;
            let p = &mut purchase.purchase;
            if !p.status.is_open() {
                return Err(PurchaseError::InvalidStatus {
                    purchase: p.id,
                    status: p.status,
                    expected: "active or contacted",
                }
                .into());
            }
            if let Some(request) = p.refund_request.as_mut() {
                match request.state {
                    RefundRequestState::PendingReview => {
                        request.state = RefundRequestState::Cancelled
                    }
                    RefundRequestState::Approved => {
                        return Err(RefundError::AlreadyRequested {
                            purchase: p.id,
                            state: request.state,
                        }
                        .into());
                    }
                    _ => {}
                }
            }
            p.status = PurchaseStatus::Converted;
            p.converted_at = Some(now);
            record.lead.status = LeadStatus::Converted;

            let snapshot = purchase.purchase.clone();
            self.store.commit(Some(record), Some(purchase))?;
            Ok(snapshot)
        })
    }

    /// Pay once to reveal the client's contact details.
    pub fn unlock_contact(
        &self,
        lead: LeadId,
        provider: ProviderId,
        now: DateTime<Utc>,
    ) -> Result<Purchase, EngineError> {
        self.retry_once("unlock", || {
            let (_, mut purchase) = self.holding(lead, provider)?;
            let p = &mut purchase.purchase;
            if !p.status.is_open() {
                return Err(PurchaseError::InvalidStatus {
                    purchase: p.id,
                    status: p.status,
                    expected: "active or contacted",
                }
                .into());
            }
            if p.contact_unlocked {
                return Err(PurchaseError::AlreadyUnlocked(p.id).into());
            }
            let price = self.config.contact_unlock_price;
            p.contact_unlocked = true;
            p.contact_unlock_spent = price;

            let entry = LedgerEntry::new(
                provider,
                price,
                TransactionKind::LeadPurchase,
                format!("contact unlock for lead {lead}"),
                now,
            )
            .for_purchase(p.id);
            let snapshot = purchase.purchase.clone();
            self.ledger.debit_and(entry, |_| {
                self.store
                    .commit_purchase(purchase)
                    .map_err(EngineError::from)
            })?;
            Ok(snapshot)
        })
    }

    /// The client withdrew the job. An open purchase is refunded in full and
    /// the lead closes as refunded once the refund settles; otherwise
    /// outstanding offers stop and the lead expires.
    pub fn withdraw(&self, lead: LeadId, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.retry_once("withdraw", || {
            let mut record = self.store.lead(lead).ok_or(EngineError::UnknownLead(lead))?;
            if record.lead.status.is_terminal() {
                return Err(EngineError::LeadClosed {
                    lead,
                    status: record.lead.status,
                });
            }

            let open = self
                .store
                .holding_purchase(lead)
                .filter(|p| p.purchase.status.is_open());
            if let Some(mut purchase) = open {
                record.withdrawn = true;
                purchase
                    .purchase
                    .refund_request
                    .get_or_insert_with(|| refund::automatic_request("job withdrawn", now))
                    .state = RefundRequestState::Approved;
                self.settle(record, purchase, "job withdrawn", now)?;
                return Ok(());
            }

            let mut effects = Vec::new();
            if let Some(current) = record.queue.current().map(|c| c.provider) {
                record.queue.resolve(current, OfferState::Expired, now)?;
                effects.push(Effect::Provider {
                    provider: current,
                    event: ProviderEvent::OfferExpired,
                    payload: Payload::new(lead).with("reason", "job withdrawn"),
                });
            }
            record.lead.status = LeadStatus::Expired;
            self.store.commit_lead(record)?;
            self.dispatch(effects);
            Ok(())
        })
    }

    /// Credit a provider's account, opening it if needed.
    pub fn top_up(
        &self,
        provider: ProviderId,
        amount: Credits,
        kind: TransactionKind,
        now: DateTime<Utc>,
    ) -> Result<CreditTransaction, EngineError> {
        self.ledger.open_account(provider);
        let entry = LedgerEntry::new(provider, amount, kind, format!("{kind:?} top-up"), now);
        Ok(self.ledger.credit(entry)?)
    }

    /// One scheduling step for one lead: resolve a due pass, expire an
    /// overdue offer and offer the lead to the next candidate.
    ///
    /// Re-running it against an already processed state changes nothing.
    /// Conflicts are not retried here; the next tick picks the lead up.
    pub fn sweep_lead(&self, id: LeadId, now: DateTime<Utc>) -> Result<LeadSweep, EngineError> {
        let before = self.store.lead(id).ok_or(EngineError::UnknownLead(id))?;
        let mut outcome = LeadSweep::default();
        if !before.lead.status.is_distributable() {
            return Ok(outcome);
        }

        let mut record = before.clone();
        let mut effects = Vec::new();

        if record.needs_pass {
            match self.fill_queue(&mut record, &mut effects) {
                Ok(()) => {}
                Err(e) if e.is_transient() => {
                    debug!(lead = %id, reason = %e, "eligibility pass deferred");
                    outcome.deferred = true;
                    return Ok(outcome);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if record.lead.status.is_distributable() {
            let current = record
                .queue
                .current()
                .map(|c| (c.provider, c.deadline));
            match current {
                Some((provider, Some(deadline))) if now >= deadline => {
                    record.queue.resolve(provider, OfferState::Expired, now)?;
                    effects.push(Effect::Provider {
                        provider,
                        event: ProviderEvent::OfferExpired,
                        payload: Payload::new(id).with("deadline", deadline.to_rfc3339()),
                    });
                    outcome.expired = true;
                    outcome.offered = self.advance(&mut record, now, &mut effects)?;
                }
                Some(_) => {}
                None => outcome.offered = self.advance(&mut record, now, &mut effects)?,
            }
        }
        outcome.exhausted = record.lead.status == LeadStatus::Expired;

        if record != before {
            self.store.commit_lead(record)?;
            self.dispatch(effects);
        }
        Ok(outcome)
    }
}

/// Private API
impl LeadEngine {
    /// Small helper to log `execute` results
    fn log_result<E: std::fmt::Display>(
        command: &str,
        lead: Option<LeadId>,
        provider: Option<ProviderId>,
        result: &Result<(), E>,
    ) {
        match (result, lead, provider) {
            (Ok(()), Some(lead), Some(provider)) => {
                info!(lead = %lead, provider = %provider, "{command} applied");
            }
            (Ok(()), Some(lead), None) => info!(lead = %lead, "{command} applied"),
            (Ok(()), None, Some(provider)) => info!(provider = %provider, "{command} applied"),
            (Ok(()), None, None) => info!("{command} applied"),
            (Err(e), Some(lead), Some(provider)) => {
                info!(lead = %lead, provider = %provider, reason = %e, "{command} skipped");
            }
            (Err(e), Some(lead), None) => info!(lead = %lead, reason = %e, "{command} skipped"),
            (Err(e), None, Some(provider)) => {
                info!(provider = %provider, reason = %e, "{command} skipped");
            }
            (Err(e), None, None) => info!(reason = %e, "{command} skipped"),
        }
    }

    /// Run a provider action, retrying once on a transient failure.
    fn retry_once<T>(
        &self,
        operation: &str,
        mut attempt: impl FnMut() -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        match attempt() {
            Err(e) if e.is_transient() => {
                debug!(reason = %e, "{operation} retrying once");
                attempt()
            }
            result => result,
        }
    }

    fn populate(&self, id: LeadId, now: DateTime<Utc>) -> Result<(), EngineError> {
        let mut record = self.store.lead(id).ok_or(EngineError::UnknownLead(id))?;
        let mut effects = Vec::new();
        self.fill_queue(&mut record, &mut effects)?;
        self.store.commit_lead(record)?;
        self.dispatch(effects);
        debug!(lead = %id, at = %now, "first pass resolved");
        Ok(())
    }

    /// Append a fresh eligibility pass, skipping everyone who already saw the
    /// lead. An empty pass exhausts the lead.
    fn fill_queue(
        &self,
        record: &mut LeadRecord,
        effects: &mut Vec<Effect>,
    ) -> Result<(), CollaboratorError> {
        let mut exclude = record.queue.offered_providers();
        exclude.extend(record.excluded.iter().copied());

        let eligible = self.resolver.resolve(&record.lead, &exclude)?;
        let added = record.queue.push_pass(
            eligible,
            &record.lead.posting.category,
            self.config.max_candidates,
        );
        record.needs_pass = false;
        debug!(lead = %record.lead.id, pass = record.queue.pass(), candidates = added, "eligibility pass");

        if added == 0 {
            self.exhaust(record, effects);
        } else {
            record.lead.status = LeadStatus::InQueue;
        }
        Ok(())
    }

    /// Offer the lead to the next candidate, exhausting it if none is left.
    fn advance(
        &self,
        record: &mut LeadRecord,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) -> Result<bool, QueueError> {
        let lead = record.lead.id;
        let price = record.lead.price;
        let deadline = now + self.config.offer_window;
        let offered = record.queue.next(now, deadline)?.map(|c| c.provider);

        match offered {
            Some(provider) => {
                debug!(lead = %lead, provider = %provider, %deadline, "offer issued");
                effects.push(Effect::Provider {
                    provider,
                    event: ProviderEvent::LeadOffered,
                    payload: Payload::new(lead)
                        .with("price", price)
                        .with("deadline", deadline.to_rfc3339()),
                });
                Ok(true)
            }
            None => {
                self.exhaust(record, effects);
                Ok(false)
            }
        }
    }

    fn exhaust(&self, record: &mut LeadRecord, effects: &mut Vec<Effect>) {
        let missed =
            record.queue.count(OfferState::Declined) + record.queue.count(OfferState::Expired);
        let needs_revision = missed >= self.config.revision_threshold;
        record.lead.status = LeadStatus::Expired;
        info!(lead = %record.lead.id, missed, needs_revision, "queue exhausted");
        effects.push(Effect::Client {
            client: record.lead.client,
            lead: record.lead.id,
            event: ClientEvent::NoProvidersAvailable { needs_revision },
        });
    }

    fn dispatch(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Provider {
                    provider,
                    event,
                    payload,
                } => {
                    if let Err(e) = self
                        .collaborators
                        .notifier
                        .notify(provider, event, &payload)
                    {
                        warn!(provider = %provider, lead = %payload.lead, event = event.label(), reason = %e, "notification dropped");
                    }
                }
                Effect::Client {
                    client,
                    lead,
                    event,
                } => {
                    if let Err(e) = self.collaborators.clients.report(client, lead, event) {
                        warn!(client = %client, lead = %lead, ?event, reason = %e, "client report dropped");
                    }
                }
            }
        }
    }

    /// Check that `provider` holds the open, unexpired offer on the lead.
    fn ensure_open_offer(
        record: &LeadRecord,
        provider: ProviderId,
        now: DateTime<Utc>,
    ) -> Result<(), OfferError> {
        let lead = record.lead.id;
        if !record.lead.status.is_distributable() {
            return Err(OfferError::NotDistributable {
                lead,
                status: record.lead.status,
            });
        }
        let current = record
            .queue
            .current()
            .filter(|c| c.provider == provider)
            .ok_or(QueueError::NotOffered { lead, provider })?;
        if let Some(deadline) = current.deadline.filter(|deadline| now >= *deadline) {
            return Err(OfferError::Expired {
                lead,
                provider,
                deadline,
            });
        }
        Ok(())
    }

    fn try_accept(
        &self,
        lead: LeadId,
        provider: ProviderId,
        funding: FundingSource,
        now: DateTime<Utc>,
    ) -> Result<Purchase, EngineError> {
        let mut record = self.store.lead(lead).ok_or(EngineError::UnknownLead(lead))?;
        Self::ensure_open_offer(&record, provider, now)?;

        let price = record.lead.price;
        let client = record.lead.client;
        record.queue.resolve(provider, OfferState::Accepted, now)?;
        record.lead.status = LeadStatus::Assigned;
        record.lead.assigned_provider = Some(provider);
        let id = self.store.next_purchase_id();

        let purchase = match funding {
            FundingSource::Credits => {
                let entry = LedgerEntry::new(
                    provider,
                    price,
                    TransactionKind::LeadPurchase,
                    format!("lead {lead}"),
                    now,
                )
                .for_purchase(id);
                let (_, purchase) = self.ledger.debit_and(entry, |txn| {
                    let purchase = new_purchase(
                        id,
                        lead,
                        provider,
                        price,
                        Funding::Credits {
                            transaction: txn.id,
                        },
                        now,
                    );
                    self.store
                        .commit(Some(record), Some(PurchaseRecord::new(purchase.clone())))?;
                    Ok::<_, EngineError>(purchase)
                })?;
                purchase
            }
            FundingSource::DirectCharge => {
                let reference = self.collaborators.payments.charge_direct(provider, price)?;
                let purchase = new_purchase(
                    id,
                    lead,
                    provider,
                    price,
                    Funding::DirectCharge {
                        reference: reference.clone(),
                    },
                    now,
                );
                let committed = self
                    .store
                    .commit(Some(record), Some(PurchaseRecord::new(purchase.clone())));
                if let Err(e) = committed {
                    if let Err(reverse) = self.collaborators.payments.reverse_charge(&reference) {
                        warn!(lead = %lead, provider = %provider, %reference, reason = %reverse, "failed to reverse charge of aborted purchase");
                    }
                    return Err(e.into());
                }
                purchase
            }
        };

        info!(lead = %lead, provider = %provider, purchase = %purchase.id, price = %price, "lead purchased");
        self.dispatch(vec![
            Effect::Provider {
                provider,
                event: ProviderEvent::PurchaseConfirmed,
                payload: Payload::new(lead)
                    .with("purchase", purchase.id)
                    .with("price", price),
            },
            Effect::Client {
                client,
                lead,
                event: ClientEvent::LeadAssigned { provider },
            },
        ]);
        Ok(purchase)
    }

    fn respond(
        &self,
        lead: LeadId,
        provider: ProviderId,
        outcome: OfferState,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut record = self.store.lead(lead).ok_or(EngineError::UnknownLead(lead))?;
        Self::ensure_open_offer(&record, provider, now)?;

        let mut effects = Vec::new();
        record.queue.resolve(provider, outcome, now)?;
        self.advance(&mut record, now, &mut effects)?;
        self.store.commit_lead(record)?;
        self.dispatch(effects);
        Ok(())
    }

    /// The lead together with the purchase `provider` holds on it.
    fn holding(
        &self,
        lead: LeadId,
        provider: ProviderId,
    ) -> Result<(LeadRecord, PurchaseRecord), EngineError> {
        let record = self.store.lead(lead).ok_or(EngineError::UnknownLead(lead))?;
        let purchase = self
            .store
            .holding_purchase(lead)
            .filter(|p| p.purchase.provider == provider)
            .ok_or(PurchaseError::NotFound { lead, provider })?;
        Ok((record, purchase))
    }
}

fn new_purchase(
    id: PurchaseId,
    lead: LeadId,
    provider: ProviderId,
    price: Credits,
    funding: Funding,
    now: DateTime<Utc>,
) -> Purchase {
    Purchase {
        id,
        lead,
        provider,
        credits_spent: price,
        funding,
        status: PurchaseStatus::Active,
        contact_unlocked: false,
        contact_unlock_spent: Credits::ZERO,
        created_at: now,
        contacted_at: None,
        converted_at: None,
        refunded_at: None,
        refund_reason: None,
        refund_request: None,
    }
}
