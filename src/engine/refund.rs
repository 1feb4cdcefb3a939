//! Refund automation.
//!
//! A purchase still `Active` with no client contact once the refund window
//! has passed is refunded automatically. Provider requests go to manual
//! review unless that condition already holds, in which case they are
//! approved on the spot; the automatic rule also overrides a request still
//! waiting for review.
//!
//! Credits-funded purchases are refunded through the ledger, direct charges
//! through the payment gateway. An approved refund whose reversal cannot be
//! settled yet stays `Approved` and is retried by every sweep.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::Credits;
use crate::collaborators::{ClientEvent, Payload, ProviderEvent, ReviewTicket};
use crate::ledger::LedgerEntry;
use crate::model::{
    Funding, LeadId, LeadStatus, ProviderId, Purchase, PurchaseId, PurchaseStatus, RefundRequest,
    RefundRequestState, TransactionKind, TransactionRef,
};

use super::{
    Effect, EngineError, LeadEngine, LeadRecord, PurchaseRecord, RefundError, StoreError,
};

const CLIENT_UNRESPONSIVE: &str = "client unresponsive";

/// What one refund sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefundSweep {
    pub refunded: usize,
    pub awaiting_settlement: usize,
    pub routed: usize,
    pub expired: usize,
    pub failed: usize,
}

enum PurchaseAction {
    Refunded,
    AwaitingSettlement,
    Routed,
    Expired,
}

pub(super) fn automatic_request(reason: &str, now: DateTime<Utc>) -> RefundRequest {
    RefundRequest {
        reason: reason.to_string(),
        requested_at: now,
        state: RefundRequestState::Approved,
        routed: false,
        automatic: true,
        reversed: false,
    }
}

impl LeadEngine {
    /// File a refund request for the provider's purchase on `lead`.
    pub fn request_refund(
        &self,
        lead: LeadId,
        provider: ProviderId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<RefundRequestState, EngineError> {
        self.retry_once("refund", || {
            let (record, mut purchase) = self.holding(lead, provider)?;
            let p = &purchase.purchase;
            if !p.status.is_open() {
                return Err(RefundError::NotRefundable {
                    purchase: p.id,
                    status: p.status,
                }
                .into());
            }
            if let Some(existing) = p.refund_request.as_ref().filter(|r| {
                matches!(
                    r.state,
                    RefundRequestState::PendingReview
                        | RefundRequestState::Approved
                        | RefundRequestState::Completed
                )
            }) {
                return Err(RefundError::AlreadyRequested {
                    purchase: p.id,
                    state: existing.state,
                }
                .into());
            }

            if self.auto_refund_due(p, now) {
                info!(lead = %lead, provider = %provider, purchase = %p.id, "refund request auto-approved");
                purchase.purchase.refund_request = Some(automatic_request(reason, now));
                return self.settle(record, purchase, reason, now);
            }

            let routed = self.route_for_review(&purchase.purchase, reason, now);
            purchase.purchase.refund_request = Some(RefundRequest {
                reason: reason.to_string(),
                requested_at: now,
                state: RefundRequestState::PendingReview,
                routed,
                automatic: false,
                reversed: false,
            });
            self.store.commit_purchase(purchase)?;
            Ok(RefundRequestState::PendingReview)
        })
    }

    /// Withdraw a request that has not been approved yet.
    pub fn cancel_refund(
        &self,
        lead: LeadId,
        provider: ProviderId,
        _now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.retry_once("cancel_refund", || {
            let (_, mut purchase) = self.holding(lead, provider)?;
            let id = purchase.purchase.id;
            let request = purchase
                .purchase
                .refund_request
                .as_mut()
                .ok_or(RefundError::NoRequest(id))?;
            if request.state != RefundRequestState::PendingReview {
                return Err(RefundError::NotPending {
                    purchase: id,
                    state: request.state,
                }
                .into());
            }
            request.state = RefundRequestState::Cancelled;
            self.store.commit_purchase(purchase)?;
            Ok(())
        })
    }

    /// Manual review outcome for a pending request.
    pub fn resolve_review(
        &self,
        lead: LeadId,
        provider: ProviderId,
        approve: bool,
        now: DateTime<Utc>,
    ) -> Result<RefundRequestState, EngineError> {
        self.retry_once("review_refund", || {
            let (record, mut purchase) = self.holding(lead, provider)?;
            let id = purchase.purchase.id;
            let request = purchase
                .purchase
                .refund_request
                .as_mut()
                .ok_or(RefundError::NoRequest(id))?;
            if request.state != RefundRequestState::PendingReview {
                return Err(RefundError::NotPending {
                    purchase: id,
                    state: request.state,
                }
                .into());
            }

            if approve {
                request.state = RefundRequestState::Approved;
                let reason = request.reason.clone();
                return self.settle(record, purchase, &reason, now);
            }

            request.state = RefundRequestState::Rejected;
            let reason = request.reason.clone();
            self.store.commit_purchase(purchase)?;
            info!(lead = %lead, provider = %provider, purchase = %id, "refund rejected");
            self.dispatch(vec![Effect::Provider {
                provider,
                event: ProviderEvent::RefundRejected,
                payload: Payload::new(lead)
                    .with("purchase", id)
                    .with("reason", reason),
            }]);
            Ok(RefundRequestState::Rejected)
        })
    }

    /// Scan open purchases: settle approved refunds, auto-refund unresponsive
    /// clients, retry review routing and expire stale contacted purchases.
    pub fn sweep_refunds(&self, now: DateTime<Utc>) -> RefundSweep {
        let mut report = RefundSweep::default();
        for purchase in self.store.open_purchases() {
            let id = purchase.purchase.id;
            match self.sweep_purchase(purchase, now) {
                Ok(Some(PurchaseAction::Refunded)) => report.refunded += 1,
                Ok(Some(PurchaseAction::AwaitingSettlement)) => report.awaiting_settlement += 1,
                Ok(Some(PurchaseAction::Routed)) => report.routed += 1,
                Ok(Some(PurchaseAction::Expired)) => report.expired += 1,
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(purchase = %id, reason = %e, "refund sweep deferred");
                }
            }
        }
        report
    }
}

impl LeadEngine {
    /// Active, never contacted, and older than the refund window.
    fn auto_refund_due(&self, purchase: &Purchase, now: DateTime<Utc>) -> bool {
        purchase.status == PurchaseStatus::Active
            && purchase.contacted_at.is_none()
            && now - purchase.created_at >= self.config.refund_window
    }

    fn route_for_review(&self, purchase: &Purchase, reason: &str, now: DateTime<Utc>) -> bool {
        let ticket = ReviewTicket {
            purchase: purchase.id,
            lead: purchase.lead,
            provider: purchase.provider,
            reason: reason.to_string(),
            requested_at: now,
        };
        match self.collaborators.reviews.submit(ticket) {
            Ok(()) => true,
            Err(e) => {
                warn!(purchase = %purchase.id, reason = %e, "refund review routing failed");
                false
            }
        }
    }

    fn sweep_purchase(
        &self,
        mut purchase: PurchaseRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<PurchaseAction>, EngineError> {
        let lead = purchase.purchase.lead;
        let request = purchase
            .purchase
            .refund_request
            .as_ref()
            .map(|r| (r.state, r.routed, r.reason.clone()));

        let reason = match request {
            Some((RefundRequestState::Approved, _, reason)) => reason,
            _ if self.auto_refund_due(&purchase.purchase, now) => {
                let p = &mut purchase.purchase;
                match &mut p.refund_request {
                    Some(pending) if pending.state == RefundRequestState::PendingReview => {
                        pending.state = RefundRequestState::Approved;
                        pending.automatic = true;
                    }
                    slot => *slot = Some(automatic_request(CLIENT_UNRESPONSIVE, now)),
                }
                info!(lead = %lead, purchase = %p.id, "automatic refund triggered");
                CLIENT_UNRESPONSIVE.to_string()
            }
            Some((RefundRequestState::PendingReview, false, reason)) => {
                if !self.route_for_review(&purchase.purchase, &reason, now) {
                    return Ok(None);
                }
                if let Some(pending) = purchase.purchase.refund_request.as_mut() {
                    pending.routed = true;
                }
                self.store.commit_purchase(purchase)?;
                return Ok(Some(PurchaseAction::Routed));
            }
            Some((RefundRequestState::PendingReview, true, _)) => return Ok(None),
            _ if purchase.purchase.status == PurchaseStatus::Contacted
                && now - purchase.purchase.created_at >= self.config.purchase_expiry =>
            {
                let mut record = self.store.lead(lead).ok_or(EngineError::UnknownLead(lead))?;
                purchase.purchase.status = PurchaseStatus::Expired;
                if !record.lead.status.is_terminal() {
                    record.lead.status = LeadStatus::Expired;
                }
                debug!(lead = %lead, purchase = %purchase.purchase.id, "purchase expired");
                self.store.commit(Some(record), Some(purchase))?;
                return Ok(Some(PurchaseAction::Expired));
            }
            _ => return Ok(None),
        };

        let record = self.store.lead(lead).ok_or(EngineError::UnknownLead(lead))?;
        match self.settle(record, purchase, &reason, now)? {
            RefundRequestState::Completed => Ok(Some(PurchaseAction::Refunded)),
            _ => Ok(Some(PurchaseAction::AwaitingSettlement)),
        }
    }

    /// Carry out an approved refund.
    ///
    /// The lead is released for a fresh pass that excludes the refunded
    /// provider, unless the client withdrew it, in which case the same
    /// commit closes it as refunded.
    pub(super) fn settle(
        &self,
        record: LeadRecord,
        purchase: PurchaseRecord,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<RefundRequestState, EngineError> {
        let funding = purchase.purchase.funding.clone();
        let (record, purchase) = match &funding {
            Funding::Credits { .. } => (record, purchase),
            Funding::DirectCharge { reference } => {
                match self.reverse_once(record, purchase, reference, reason, now)? {
                    Some(fresh) => fresh,
                    None => return Ok(RefundRequestState::Approved),
                }
            }
        };

        let withdrawn = record.withdrawn;
        let lead = record.lead.id;
        let client = record.lead.client;
        let provider = purchase.purchase.provider;
        let id = purchase.purchase.id;
        let unlock = if self.config.refund_includes_unlock {
            purchase.purchase.contact_unlock_spent
        } else {
            Credits::ZERO
        };

        let mut settled = purchase.clone();
        {
            let p = &mut settled.purchase;
            p.status = PurchaseStatus::Refunded;
            p.refunded_at = Some(now);
            p.refund_reason = Some(reason.to_string());
            if let Some(request) = p.refund_request.as_mut() {
                request.state = RefundRequestState::Completed;
            }
        }
        let mut released = record;
        if withdrawn {
            released.lead.status = LeadStatus::Refunded;
        } else {
            released.lead.status = LeadStatus::Available;
            released.lead.assigned_provider = None;
            released.needs_pass = true;
            released.excluded.insert(provider);
        }

        let refund_entry = |amount: Credits| {
            LedgerEntry::new(provider, amount, TransactionKind::Refund, reason, now).for_purchase(id)
        };
        let commit = |lead: LeadRecord, purchase: PurchaseRecord| {
            self.store
                .commit(Some(lead), Some(purchase))
                .map_err(EngineError::from)
        };

        let refunded = match &funding {
            Funding::Credits { .. } => {
                let amount = purchase.purchase.credits_spent + unlock;
                self.ledger
                    .credit_and(refund_entry(amount), |_| commit(released, settled))?;
                amount
            }
            Funding::DirectCharge { .. } => {
                if unlock.is_positive() {
                    self.ledger
                        .credit_and(refund_entry(unlock), |_| commit(released, settled))?;
                } else {
                    commit(released, settled)?;
                }
                purchase.purchase.credits_spent + unlock
            }
        };

        info!(lead = %lead, provider = %provider, purchase = %id, amount = %refunded, withdrawn, "refund completed");
        self.dispatch(vec![
            Effect::Provider {
                provider,
                event: ProviderEvent::RefundIssued,
                payload: Payload::new(lead)
                    .with("purchase", id)
                    .with("amount", refunded)
                    .with("reason", reason),
            },
            Effect::Client {
                client,
                lead,
                event: if withdrawn {
                    ClientEvent::Refunded
                } else {
                    ClientEvent::LeadReleased
                },
            },
        ]);
        Ok(RefundRequestState::Completed)
    }

    /// Reverse a direct charge at most once per purchase.
    ///
    /// The approval is stored before the gateway is called and the reversal
    /// marker right after, so a later settling attempt only redoes the store
    /// commit. `None` while the gateway is unavailable.
    fn reverse_once(
        &self,
        record: LeadRecord,
        purchase: PurchaseRecord,
        reference: &TransactionRef,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(LeadRecord, PurchaseRecord)>, EngineError> {
        if purchase
            .purchase
            .refund_request
            .as_ref()
            .is_some_and(|r| r.reversed)
        {
            return Ok(Some((record, purchase)));
        }

        let (record, purchase) = self.keep_approved(record, purchase, reason, now)?;
        let id = purchase.purchase.id;
        if let Err(e) = self.collaborators.payments.reverse_charge(reference) {
            warn!(lead = %record.lead.id, purchase = %id, %reference, reason = %e, "charge reversal pending");
            return Ok(None);
        }

        let mut marked = self.stored_purchase(id)?;
        marked
            .purchase
            .refund_request
            .get_or_insert_with(|| automatic_request(reason, now))
            .reversed = true;
        self.store.commit_purchase(marked)?;
        debug!(lead = %record.lead.id, purchase = %id, %reference, "charge reversed");
        Ok(Some((record, self.stored_purchase(id)?)))
    }

    fn stored_purchase(&self, id: PurchaseId) -> Result<PurchaseRecord, EngineError> {
        self.store
            .purchase(id)
            .ok_or_else(|| StoreError::Missing { entity: "purchase", id }.into())
    }

    /// Persist an approval that could not be settled yet and return the
    /// stored copies. Writes nothing when the store already agrees.
    fn keep_approved(
        &self,
        record: LeadRecord,
        mut purchase: PurchaseRecord,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(LeadRecord, PurchaseRecord), EngineError> {
        purchase
            .purchase
            .refund_request
            .get_or_insert_with(|| automatic_request(reason, now))
            .state = RefundRequestState::Approved;

        let lead = record.lead.id;
        let id = purchase.purchase.id;
        let lead_changed = self.store.lead(lead).as_ref() != Some(&record);
        let purchase_changed = self.store.purchase(id).as_ref() != Some(&purchase);
        if !lead_changed && !purchase_changed {
            return Ok((record, purchase));
        }
        self.store.commit(
            lead_changed.then_some(record),
            purchase_changed.then_some(purchase),
        )?;
        let record = self.store.lead(lead).ok_or(EngineError::UnknownLead(lead))?;
        Ok((record, self.stored_purchase(id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::*;
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::{FundingSource, OfferState};
    use chrono::Duration;
    use std::sync::atomic::Ordering;

    /// Lead 100 bought by provider 1 at `t0` for 20 credits.
    fn bought(h: &Harness, funding: FundingSource) {
        h.engine
            .publish(100, &client(), premium_posting(), t0())
            .unwrap();
        h.engine.sweep_lead(100, t0()).unwrap();
        h.engine.accept(100, 1, funding, t0()).unwrap();
    }

    fn purchase(h: &Harness) -> Purchase {
        h.engine.purchases(100)[0].clone()
    }

    #[test]
    fn unresponsive_client_is_refunded_after_the_window() {
        let h = Harness::new();
        bought(&h, FundingSource::Credits);
        assert_eq!(h.balance(1), Credits::new(30));

        let report = h.engine.sweep_refunds(t0() + Duration::hours(47));
        assert_eq!(report, RefundSweep::default());

        let report = h.engine.sweep_refunds(t0() + Duration::hours(49));
        assert_eq!(report.refunded, 1);
        assert_eq!(h.balance(1), Credits::new(50));

        let refunded = purchase(&h);
        assert_eq!(refunded.status, PurchaseStatus::Refunded);
        assert_eq!(refunded.refund_reason.as_deref(), Some(CLIENT_UNRESPONSIVE));
        assert!(refunded.refund_request.as_ref().unwrap().automatic);

        let lead = h.engine.lead(100).unwrap();
        assert_eq!(lead.status, LeadStatus::Available);
        assert_eq!(lead.assigned_provider, None);
        assert_eq!(
            h.recorder.client_reports(100).last(),
            Some(&ClientEvent::LeadReleased)
        );
    }

    #[test]
    fn released_lead_gets_a_pass_without_the_refunded_provider() {
        let h = Harness::new();
        bought(&h, FundingSource::Credits);
        let later = t0() + Duration::hours(49);
        h.engine.sweep_refunds(later);

        let outcome = h.engine.sweep_lead(100, later).unwrap();
        assert!(outcome.offered);
        let queue = h.engine.queue(100).unwrap();
        assert_eq!(queue.pass(), 2);
        assert!(
            queue
                .candidates()
                .iter()
                .filter(|c| c.pass == 2)
                .all(|c| c.provider != 1)
        );
        assert_eq!(queue.current().unwrap().provider, 2);
    }

    #[test]
    fn contacted_purchases_are_not_auto_refunded_but_expire() {
        let h = Harness::new();
        bought(&h, FundingSource::Credits);
        h.engine
            .mark_contacted(100, 1, t0() + Duration::hours(2))
            .unwrap();

        let report = h.engine.sweep_refunds(t0() + Duration::days(5));
        assert_eq!(report, RefundSweep::default());

        let report = h.engine.sweep_refunds(t0() + Duration::days(30));
        assert_eq!(report.expired, 1);
        assert_eq!(purchase(&h).status, PurchaseStatus::Expired);
        assert_eq!(h.engine.lead(100).unwrap().status, LeadStatus::Expired);
        assert_eq!(h.balance(1), Credits::new(30));
    }

    #[test]
    fn early_request_goes_to_review() {
        let h = Harness::new();
        bought(&h, FundingSource::Credits);
        let state = h
            .engine
            .request_refund(100, 1, "wrong phone number", t0() + Duration::hours(5))
            .unwrap();
        assert_eq!(state, RefundRequestState::PendingReview);
        assert_eq!(h.recorder.tickets.lock().len(), 1);
        assert!(matches!(
            h.engine.request_refund(100, 1, "again", t0()),
            Err(EngineError::Refund(RefundError::AlreadyRequested { .. }))
        ));

        let state = h
            .engine
            .resolve_review(100, 1, true, t0() + Duration::hours(8))
            .unwrap();
        assert_eq!(state, RefundRequestState::Completed);
        assert_eq!(h.balance(1), Credits::new(50));
        let refunded = purchase(&h);
        assert_eq!(refunded.refund_reason.as_deref(), Some("wrong phone number"));
        assert!(!refunded.refund_request.unwrap().automatic);
    }

    #[test]
    fn rejected_review_notifies_and_keeps_purchase() {
        let h = Harness::new();
        bought(&h, FundingSource::Credits);
        h.engine
            .request_refund(100, 1, "not interested", t0() + Duration::hours(1))
            .unwrap();
        let state = h
            .engine
            .resolve_review(100, 1, false, t0() + Duration::hours(2))
            .unwrap();
        assert_eq!(state, RefundRequestState::Rejected);
        assert_eq!(purchase(&h).status, PurchaseStatus::Active);
        assert_eq!(
            h.recorder.events(ProviderEvent::RefundRejected),
            vec![(1, 100)]
        );
        assert_eq!(h.balance(1), Credits::new(30));
    }

    #[test]
    fn request_after_the_window_is_auto_approved() {
        let h = Harness::new();
        bought(&h, FundingSource::Credits);
        let state = h
            .engine
            .request_refund(100, 1, "client never answered", t0() + Duration::hours(50))
            .unwrap();
        assert_eq!(state, RefundRequestState::Completed);
        assert!(h.recorder.tickets.lock().is_empty());
        assert_eq!(h.balance(1), Credits::new(50));
    }

    #[test]
    fn automatic_rule_overrides_pending_review() {
        let h = Harness::new();
        bought(&h, FundingSource::Credits);
        h.engine
            .request_refund(100, 1, "no answer", t0() + Duration::hours(10))
            .unwrap();

        let report = h.engine.sweep_refunds(t0() + Duration::hours(48));
        assert_eq!(report.refunded, 1);
        let request = purchase(&h).refund_request.unwrap();
        assert_eq!(request.state, RefundRequestState::Completed);
        assert!(request.automatic);
        assert!(matches!(
            h.engine.resolve_review(100, 1, true, t0() + Duration::hours(49)),
            Err(EngineError::Purchase(_))
        ));
    }

    #[test]
    fn cancel_only_while_pending() {
        let h = Harness::new();
        bought(&h, FundingSource::Credits);
        assert!(matches!(
            h.engine.cancel_refund(100, 1, t0()),
            Err(EngineError::Refund(RefundError::NoRequest(_)))
        ));
        h.engine
            .request_refund(100, 1, "duplicate job", t0() + Duration::hours(1))
            .unwrap();
        h.engine
            .cancel_refund(100, 1, t0() + Duration::hours(2))
            .unwrap();
        assert_eq!(
            purchase(&h).refund_request.unwrap().state,
            RefundRequestState::Cancelled
        );
        assert!(matches!(
            h.engine.cancel_refund(100, 1, t0()),
            Err(EngineError::Refund(RefundError::NotPending { .. }))
        ));

        // a cancelled request does not block automatic refunds
        let report = h.engine.sweep_refunds(t0() + Duration::hours(49));
        assert_eq!(report.refunded, 1);
    }

    #[test]
    fn review_routing_is_retried_by_the_sweep() {
        let h = Harness::new();
        bought(&h, FundingSource::Credits);
        h.recorder.reviews_down.store(true, Ordering::SeqCst);
        h.engine
            .request_refund(100, 1, "spam lead", t0() + Duration::hours(1))
            .unwrap();
        assert!(!purchase(&h).refund_request.unwrap().routed);

        assert_eq!(
            h.engine.sweep_refunds(t0() + Duration::hours(2)),
            RefundSweep::default()
        );

        h.recorder.reviews_down.store(false, Ordering::SeqCst);
        let report = h.engine.sweep_refunds(t0() + Duration::hours(3));
        assert_eq!(report.routed, 1);
        assert!(purchase(&h).refund_request.unwrap().routed);
        assert_eq!(h.recorder.tickets.lock().len(), 1);
        assert_eq!(
            h.engine.sweep_refunds(t0() + Duration::hours(4)),
            RefundSweep::default()
        );
    }

    #[test]
    fn direct_charge_refund_waits_for_the_gateway() {
        let h = Harness::new();
        bought(&h, FundingSource::DirectCharge);
        h.payments.available.store(false, Ordering::SeqCst);

        let later = t0() + Duration::hours(49);
        let report = h.engine.sweep_refunds(later);
        assert_eq!(report.awaiting_settlement, 1);
        let pending = purchase(&h);
        assert_eq!(pending.status, PurchaseStatus::Active);
        assert_eq!(
            pending.refund_request.as_ref().unwrap().state,
            RefundRequestState::Approved
        );

        // retrying against unchanged state writes nothing
        let version = h.engine.store.purchase(pending.id).unwrap().version;
        h.engine.sweep_refunds(later);
        assert_eq!(h.engine.store.purchase(pending.id).unwrap().version, version);

        h.payments.available.store(true, Ordering::SeqCst);
        let report = h.engine.sweep_refunds(later + Duration::minutes(5));
        assert_eq!(report.refunded, 1);
        assert_eq!(h.payments.reversals.lock().len(), 1);
        assert_eq!(purchase(&h).status, PurchaseStatus::Refunded);
        // credits are never issued for a direct charge
        assert_eq!(h.balance(1), Credits::new(50));
    }

    #[test]
    fn settled_reversal_survives_a_lost_commit() {
        let h = Harness::new();
        bought(&h, FundingSource::DirectCharge);
        h.rescore_during_reversal(100);

        let later = t0() + Duration::hours(49);
        let report = h.engine.sweep_refunds(later);
        assert_eq!(report.failed, 1);
        let pending = purchase(&h);
        assert_eq!(pending.status, PurchaseStatus::Active);
        let request = pending.refund_request.unwrap();
        assert_eq!(request.state, RefundRequestState::Approved);
        assert!(request.reversed);

        let report = h.engine.sweep_refunds(later + Duration::minutes(5));
        assert_eq!(report.refunded, 1);
        assert_eq!(h.payments.reversals.lock().len(), 1);
        assert_eq!(purchase(&h).status, PurchaseStatus::Refunded);
        assert_eq!(h.engine.lead(100).unwrap().status, LeadStatus::Available);
    }

    #[test]
    fn unlock_spend_is_refunded_only_when_in_scope() {
        for (included, expected) in [(false, 49), (true, 50)] {
            let config = EngineConfig {
                refund_includes_unlock: included,
                ..EngineConfig::default()
            };
            let h = Harness::with(config, &[50, 50, 50]);
            bought(&h, FundingSource::Credits);
            h.engine.unlock_contact(100, 1, t0()).unwrap();
            h.engine.sweep_refunds(t0() + Duration::hours(48));
            assert_eq!(h.balance(1), Credits::new(expected));
            assert_eq!(
                h.engine.ledger().reconcile(1).unwrap(),
                Credits::new(expected)
            );
        }
    }

    #[test]
    fn refund_sweep_is_idempotent() {
        let h = Harness::new();
        bought(&h, FundingSource::Credits);
        let later = t0() + Duration::hours(49);
        assert_eq!(h.engine.sweep_refunds(later).refunded, 1);
        assert_eq!(h.engine.sweep_refunds(later), RefundSweep::default());
        assert_eq!(h.balance(1), Credits::new(50));
        assert_eq!(
            h.engine
                .ledger()
                .history(1, 10, Some(TransactionKind::Refund))
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            h.engine.queue(100).unwrap().candidates()[0].state,
            OfferState::Accepted
        );
    }
}
