//! In-memory transactional store with row versions.
//!
//! Callers work on cloned snapshots and hand them back to `commit`, which
//! rejects stale versions. Every record in one commit is checked before any
//! is written, so a commit either lands completely or not at all.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::model::{Lead, LeadId, ProviderId, Purchase, PurchaseId};
use crate::queue::MatchingQueue;

use super::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct LeadRecord {
    pub lead: Lead,
    pub queue: MatchingQueue,
    /// An eligibility pass is due on the next sweep.
    pub needs_pass: bool,
    /// Providers refunded on this lead, never offered it again.
    pub excluded: BTreeSet<ProviderId>,
    /// The client withdrew the job; settling the open refund closes the
    /// lead as refunded.
    pub withdrawn: bool,
    pub version: u64,
}

impl LeadRecord {
    pub fn new(lead: Lead) -> Self {
        Self {
            queue: MatchingQueue::new(lead.id),
            lead,
            needs_pass: true,
            excluded: BTreeSet::new(),
            withdrawn: false,
            version: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseRecord {
    pub purchase: Purchase,
    pub version: u64,
}

impl PurchaseRecord {
    pub fn new(purchase: Purchase) -> Self {
        Self {
            purchase,
            version: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    leads: HashMap<LeadId, LeadRecord>,
    purchases: HashMap<PurchaseId, PurchaseRecord>,
    by_lead: HashMap<LeadId, Vec<PurchaseId>>,
    last_purchase: PurchaseId,
}

#[derive(Debug, Default)]
pub struct Store {
    tables: RwLock<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new lead; false if the id is taken.
    pub fn insert_lead(&self, record: LeadRecord) -> bool {
        let mut tables = self.tables.write();
        if tables.leads.contains_key(&record.lead.id) {
            return false;
        }
        tables.leads.insert(record.lead.id, record);
        true
    }

    pub fn lead(&self, id: LeadId) -> Option<LeadRecord> {
        self.tables.read().leads.get(&id).cloned()
    }

    /// Leads the offer scheduler may still work on, by id.
    pub fn distributable_leads(&self) -> Vec<LeadId> {
        let tables = self.tables.read();
        let mut ids: Vec<_> = tables
            .leads
            .values()
            .filter(|record| record.lead.status.is_distributable())
            .map(|record| record.lead.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn purchase(&self, id: PurchaseId) -> Option<PurchaseRecord> {
        self.tables.read().purchases.get(&id).cloned()
    }

    pub fn purchases_for(&self, lead: LeadId) -> Vec<PurchaseRecord> {
        let tables = self.tables.read();
        tables
            .by_lead
            .get(&lead)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.purchases.get(id).cloned())
            .collect()
    }

    /// The purchase currently holding `lead`, if any.
    pub fn holding_purchase(&self, lead: LeadId) -> Option<PurchaseRecord> {
        self.purchases_for(lead)
            .into_iter()
            .find(|record| record.purchase.status.holds_lead())
    }

    /// Active and contacted purchases, oldest first.
    pub fn open_purchases(&self) -> Vec<PurchaseRecord> {
        let tables = self.tables.read();
        let mut open: Vec<_> = tables
            .purchases
            .values()
            .filter(|record| record.purchase.status.is_open())
            .cloned()
            .collect();
        open.sort_unstable_by_key(|record| record.purchase.id);
        open
    }

    pub fn next_purchase_id(&self) -> PurchaseId {
        let mut tables = self.tables.write();
        tables.last_purchase += 1;
        tables.last_purchase
    }

    pub fn commit_lead(&self, lead: LeadRecord) -> Result<(), StoreError> {
        self.commit(Some(lead), None)
    }

    pub fn commit_purchase(&self, purchase: PurchaseRecord) -> Result<(), StoreError> {
        self.commit(None, Some(purchase))
    }

    /// Write a lead and a purchase atomically. A purchase not yet in the
    /// store is inserted, subject to the one-holder-per-lead rule.
    pub fn commit(
        &self,
        lead: Option<LeadRecord>,
        purchase: Option<PurchaseRecord>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write();

        if let Some(record) = &lead {
            let id = record.lead.id;
            let stored = tables.leads.get(&id).ok_or(StoreError::Missing {
                entity: "lead",
                id,
            })?;
            check_version("lead", id, record.version, stored.version)?;
        }

        if let Some(record) = &purchase {
            let id = record.purchase.id;
            match tables.purchases.get(&id) {
                Some(stored) => check_version("purchase", id, record.version, stored.version)?,
                None => {
                    check_version("purchase", id, record.version, 0)?;
                    let holder = tables
                        .by_lead
                        .get(&record.purchase.lead)
                        .into_iter()
                        .flatten()
                        .filter_map(|id| tables.purchases.get(id))
                        .find(|p| p.purchase.status.holds_lead());
                    if let Some(holder) = holder {
                        return Err(StoreError::Exclusivity {
                            lead: record.purchase.lead,
                            holder: holder.purchase.id,
                        });
                    }
                }
            }
        }

        if let Some(mut record) = lead {
            record.version += 1;
            tables.leads.insert(record.lead.id, record);
        }
        if let Some(mut record) = purchase {
            let id = record.purchase.id;
            if !tables.purchases.contains_key(&id) {
                tables.by_lead.entry(record.purchase.lead).or_default().push(id);
            }
            record.version += 1;
            tables.purchases.insert(id, record);
        }
        Ok(())
    }
}

fn check_version(entity: &'static str, id: u32, expected: u64, actual: u64) -> Result<(), StoreError> {
    if expected != actual {
        return Err(StoreError::Conflict {
            entity,
            id,
            expected,
            actual,
        });
    }
    Ok(())
}
