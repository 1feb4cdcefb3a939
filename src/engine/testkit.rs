//! Collaborator doubles and fixtures shared by the engine tests.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::Credits;
use crate::collaborators::{
    ClientEvent, ClientGateway, CollaboratorError, Collaborators, Notifier, Payload,
    PaymentGateway, ProviderEvent, ReviewDesk, ReviewTicket,
};
use crate::config::EngineConfig;
use crate::eligibility::{Catalog, StaticCatalog};
use crate::model::{
    Budget, ClientId, ClientProfile, GeoPoint, JobPosting, JobSize, LeadId, ProviderId,
    ProviderSummary, Region, ServiceLocation, TransactionKind, TransactionRef, Urgency,
};
use crate::scoring::PartnerMetrics;

use super::LeadEngine;

pub const ZAGREB: GeoPoint = GeoPoint {
    lat: 45.8150,
    lon: 15.9819,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn client() -> ClientProfile {
    ClientProfile {
        id: 500,
        ..ClientProfile::default()
    }
}

/// Quality 85 for an unverified client, priced at 20 credits.
pub fn premium_posting() -> JobPosting {
    JobPosting {
        category: "plumbing".to_string(),
        region: Region {
            city: "Zagreb".to_string(),
            point: Some(ZAGREB),
        },
        budget: Some(Budget { min: 100, max: 400 }),
        urgency: Urgency::High,
        description_words: 80,
        images: 3,
        has_deadline: true,
        size: Some(JobSize::Large),
        requires_license: false,
    }
}

/// Quality 55, priced at the base price of 10 credits.
pub fn basic_posting() -> JobPosting {
    JobPosting {
        urgency: Urgency::Normal,
        images: 0,
        has_deadline: false,
        size: None,
        ..premium_posting()
    }
}

pub fn provider(id: ProviderId, partner: f64) -> ProviderSummary {
    ProviderSummary {
        id,
        categories: vec!["plumbing".to_string()],
        locations: vec![ServiceLocation {
            city: "Zagreb".to_string(),
            point: Some(ZAGREB),
            radius_km: 30.0,
            active: true,
        }],
        active_subscription: true,
        credit_capacity: Credits::new(100),
        partner_inputs: PartnerMetrics {
            rating: Some(partner),
            response_time: Some(partner),
            conversion: Some(partner),
            compliance: Some(partner),
            ..PartnerMetrics::default()
        },
        ..ProviderSummary::default()
    }
}

/// Catalog that can be switched offline.
#[derive(Default)]
pub struct SwitchCatalog {
    pub inner: StaticCatalog,
    pub down: AtomicBool,
}

impl Catalog for SwitchCatalog {
    fn resolve_eligible_providers(
        &self,
        category: &str,
        region: &Region,
        exclude: &BTreeSet<ProviderId>,
    ) -> Result<Vec<ProviderSummary>, CollaboratorError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("catalog", "timeout"));
        }
        self.inner
            .resolve_eligible_providers(category, region, exclude)
    }
}

/// Records notifications, client reports and review tickets.
#[derive(Default)]
pub struct Recorder {
    pub provider_events: Mutex<Vec<(ProviderId, ProviderEvent, LeadId)>>,
    pub client_events: Mutex<Vec<(ClientId, LeadId, ClientEvent)>>,
    pub tickets: Mutex<Vec<ReviewTicket>>,
    pub notifications_down: AtomicBool,
    pub reviews_down: AtomicBool,
}

impl Recorder {
    /// Providers offered `lead`, in offer order.
    pub fn offers(&self, lead: LeadId) -> Vec<ProviderId> {
        self.events(ProviderEvent::LeadOffered)
            .into_iter()
            .filter(|(_, l)| *l == lead)
            .map(|(p, _)| p)
            .collect()
    }

    pub fn events(&self, event: ProviderEvent) -> Vec<(ProviderId, LeadId)> {
        self.provider_events
            .lock()
            .iter()
            .filter(|(_, e, _)| *e == event)
            .map(|(p, _, l)| (*p, *l))
            .collect()
    }

    pub fn client_reports(&self, lead: LeadId) -> Vec<ClientEvent> {
        self.client_events
            .lock()
            .iter()
            .filter(|(_, l, _)| *l == lead)
            .map(|(_, _, e)| *e)
            .collect()
    }
}

impl Notifier for Recorder {
    fn notify(
        &self,
        provider: ProviderId,
        event: ProviderEvent,
        payload: &Payload,
    ) -> Result<(), CollaboratorError> {
        if self.notifications_down.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("notifier", "smtp down"));
        }
        self.provider_events
            .lock()
            .push((provider, event, payload.lead));
        Ok(())
    }
}

impl ClientGateway for Recorder {
    fn report(
        &self,
        client: ClientId,
        lead: LeadId,
        event: ClientEvent,
    ) -> Result<(), CollaboratorError> {
        self.client_events.lock().push((client, lead, event));
        Ok(())
    }
}

impl ReviewDesk for Recorder {
    fn submit(&self, ticket: ReviewTicket) -> Result<(), CollaboratorError> {
        if self.reviews_down.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("reviews", "queue full"));
        }
        self.tickets.lock().push(ticket);
        Ok(())
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Payment gateway with an on/off switch.
pub struct FakePayments {
    pub available: AtomicBool,
    pub charge_attempts: AtomicUsize,
    pub charges: Mutex<Vec<(ProviderId, Credits)>>,
    pub reversals: Mutex<Vec<TransactionRef>>,
    /// Runs once, inside the next successful reversal.
    pub on_reverse: Mutex<Option<Hook>>,
}

impl Default for FakePayments {
    fn default() -> Self {
        Self {
            available: AtomicBool::new(true),
            charge_attempts: AtomicUsize::new(0),
            charges: Mutex::new(Vec::new()),
            reversals: Mutex::new(Vec::new()),
            on_reverse: Mutex::new(None),
        }
    }
}

impl PaymentGateway for FakePayments {
    fn charge_direct(
        &self,
        provider: ProviderId,
        amount: Credits,
    ) -> Result<TransactionRef, CollaboratorError> {
        self.charge_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("payments", "gateway timeout"));
        }
        let mut charges = self.charges.lock();
        charges.push((provider, amount));
        Ok(TransactionRef(format!("ch_{}", charges.len())))
    }

    fn reverse_charge(&self, reference: &TransactionRef) -> Result<(), CollaboratorError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("payments", "gateway timeout"));
        }
        self.reversals.lock().push(reference.clone());
        let hook = self.on_reverse.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }
}

pub struct Harness {
    pub engine: Arc<LeadEngine>,
    pub catalog: Arc<SwitchCatalog>,
    pub recorder: Arc<Recorder>,
    pub payments: Arc<FakePayments>,
}

impl Harness {
    /// Providers 1, 2, 3 with partner scores 90, 70, 40 and 50 credits each.
    pub fn new() -> Self {
        Self::with(EngineConfig::default(), &[50, 50, 50])
    }

    pub fn with(config: EngineConfig, balances: &[i64]) -> Self {
        let partners = [90.0, 70.0, 40.0];
        let catalog = Arc::new(SwitchCatalog::default());
        let recorder = Arc::new(Recorder::default());
        let payments = Arc::new(FakePayments::default());
        let collaborators = Collaborators {
            catalog: catalog.clone(),
            payments: payments.clone(),
            notifier: recorder.clone(),
            clients: recorder.clone(),
            reviews: recorder.clone(),
        };
        let engine = Arc::new(LeadEngine::new(config, collaborators));

        for (idx, balance) in balances.iter().enumerate() {
            let id = idx as ProviderId + 1;
            catalog
                .inner
                .upsert(provider(id, partners.get(idx).copied().unwrap_or(50.0)));
            if *balance > 0 {
                engine
                    .top_up(id, Credits::new(*balance), TransactionKind::Subscription, t0())
                    .unwrap();
            } else {
                engine.ledger().open_account(id);
            }
        }

        Self {
            engine,
            catalog,
            recorder,
            payments,
        }
    }

    /// Rescore lead `lead` while the next reversal is in flight, so the
    /// commit that follows it loses the version race.
    pub fn rescore_during_reversal(&self, lead: LeadId) {
        let engine = self.engine.clone();
        *self.payments.on_reverse.lock() = Some(Box::new(move || {
            engine.rescore(lead, &client()).unwrap();
        }));
    }

    pub fn balance(&self, provider: ProviderId) -> Credits {
        self.engine.ledger().balance(provider).unwrap()
    }
}
