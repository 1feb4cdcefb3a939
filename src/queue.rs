//! Per-lead matching queue.
//!
//! Candidates are ranked by descending match score, ties broken by ascending
//! provider id, so a queue built from the same eligible set always offers in
//! the same order. A candidate that leaves the queue is never re-inserted.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::eligibility::EligibleProvider;
use crate::model::{LeadId, MatchCandidate, OfferState, ProviderId};

const PRIMARY_CATEGORY_BONUS: f64 = 5.0;
const NEARBY_BONUS: f64 = 5.0;
const NEARBY_KM: f64 = 10.0;
const MISSED_OFFER_PENALTY: f64 = 2.0;
const MAX_MISSED_PENALTY: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("lead {lead}: provider {provider} already holds the open offer")]
    OfferOutstanding { lead: LeadId, provider: ProviderId },

    #[error("lead {lead}: provider {provider} is not currently offered")]
    NotOffered { lead: LeadId, provider: ProviderId },

    #[error("lead {lead}: {from:?} cannot move to {to:?}")]
    IllegalTransition {
        lead: LeadId,
        from: OfferState,
        to: OfferState,
    },
}

/// Partner score plus affinity bonuses minus unresponsiveness penalty.
pub fn match_score(eligible: &EligibleProvider, category: &str) -> (i32, f64) {
    let partner = eligible.summary.partner_inputs.score().value();
    let mut score = partner;
    if eligible
        .summary
        .primary_category
        .as_deref()
        .is_some_and(|primary| primary.eq_ignore_ascii_case(category))
    {
        score += PRIMARY_CATEGORY_BONUS;
    }
    if eligible.distance_km <= NEARBY_KM {
        score += NEARBY_BONUS;
    }
    score -= (f64::from(eligible.summary.recent_missed_offers) * MISSED_OFFER_PENALTY)
        .min(MAX_MISSED_PENALTY);
    (score.round() as i32, partner)
}

fn rank_order(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.match_score
        .cmp(&a.match_score)
        .then_with(|| a.provider.cmp(&b.provider))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingQueue {
    lead: LeadId,
    pass: u32,
    candidates: Vec<MatchCandidate>,
}

impl MatchingQueue {
    pub fn new(lead: LeadId) -> Self {
        Self {
            lead,
            pass: 0,
            candidates: Vec::new(),
        }
    }

    /// Full audit trail, every pass in ranking order.
    pub fn candidates(&self) -> &[MatchCandidate] {
        &self.candidates
    }

    pub fn pass(&self) -> u32 {
        self.pass
    }

    /// Rank a freshly resolved eligible set as a new pass, keeping at most `limit`.
    pub fn push_pass(
        &mut self,
        eligible: Vec<EligibleProvider>,
        category: &str,
        limit: usize,
    ) -> usize {
        self.pass += 1;
        let offered = self.offered_providers();
        let mut ranked: Vec<MatchCandidate> = eligible
            .iter()
            .filter(|e| !offered.contains(&e.summary.id))
            .map(|e| {
                let (match_score, partner_score) = match_score(e, category);
                MatchCandidate {
                    lead: self.lead,
                    provider: e.summary.id,
                    match_score,
                    partner_score,
                    pass: self.pass,
                    state: OfferState::Pending,
                    offered_at: None,
                    deadline: None,
                    responded_at: None,
                }
            })
            .collect();
        ranked.sort_by(rank_order);
        ranked.truncate(limit);
        let added = ranked.len();
        self.candidates.extend(ranked);
        added
    }

    /// The single outstanding offer, if any.
    pub fn current(&self) -> Option<&MatchCandidate> {
        self.candidates
            .iter()
            .find(|c| c.state == OfferState::Offered)
    }

    /// Pending candidates of the latest pass.
    pub fn pending(&self) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.pass == self.pass && c.state == OfferState::Pending)
            .count()
    }

    pub fn count(&self, state: OfferState) -> usize {
        self.candidates.iter().filter(|c| c.state == state).count()
    }

    /// Providers that have received this lead at some point.
    pub fn offered_providers(&self) -> BTreeSet<ProviderId> {
        self.candidates
            .iter()
            .filter(|c| c.state != OfferState::Pending)
            .map(|c| c.provider)
            .collect()
    }

    /// Offer the lead to the highest-ranked pending candidate.
    ///
    /// Returns `Ok(None)` once the latest pass is exhausted.
    pub fn next(
        &mut self,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<Option<&MatchCandidate>, QueueError> {
        if let Some(current) = self.current() {
            return Err(QueueError::OfferOutstanding {
                lead: self.lead,
                provider: current.provider,
            });
        }
        let pass = self.pass;
        // candidates within a pass are stored in ranking order
        let Some(candidate) = self
            .candidates
            .iter_mut()
            .find(|c| c.pass == pass && c.state == OfferState::Pending)
        else {
            return Ok(None);
        };
        candidate.state = OfferState::Offered;
        candidate.offered_at = Some(now);
        candidate.deadline = Some(deadline);
        Ok(Some(&*candidate))
    }

    /// Close the outstanding offer of `provider` with a terminal outcome.
    pub fn resolve(
        &mut self,
        provider: ProviderId,
        outcome: OfferState,
        now: DateTime<Utc>,
    ) -> Result<&MatchCandidate, QueueError> {
        let lead = self.lead;
        let candidate = self
            .candidates
            .iter_mut()
            .find(|c| c.provider == provider && c.state == OfferState::Offered)
            .ok_or(QueueError::NotOffered { lead, provider })?;
        if !candidate.state.can_advance_to(outcome) {
            return Err(QueueError::IllegalTransition {
                lead,
                from: candidate.state,
                to: outcome,
            });
        }
        candidate.state = outcome;
        candidate.responded_at = Some(now);
        Ok(&*candidate)
    }
}
