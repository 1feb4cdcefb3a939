//! Eligibility resolution backed by the provider catalog.
//!
//! This is the only place geography is evaluated. The resolver returns an
//! unordered set; ranking belongs to the matching queue.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::collaborators::CollaboratorError;
use crate::model::{GeoPoint, Lead, ProviderId, ProviderSummary, Region, ServiceLocation};

/// Profile/catalog collaborator.
pub trait Catalog: Send + Sync {
    fn resolve_eligible_providers(
        &self,
        category: &str,
        region: &Region,
        exclude: &BTreeSet<ProviderId>,
    ) -> Result<Vec<ProviderSummary>, CollaboratorError>;
}

/// A provider that passed every eligibility check.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibleProvider {
    pub summary: ProviderSummary,
    /// Distance to the closest covering location, 0 for a city-only match.
    pub distance_km: f64,
}

/// Why a catalog entry was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    AlreadyOffered,
    CategoryMismatch,
    NoSubscription,
    InsufficientCapacity,
    SelfAssignment,
    MissingLicense,
    OutOfArea,
}

pub struct EligibilityResolver {
    catalog: Arc<dyn Catalog>,
}

impl EligibilityResolver {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    pub fn resolve(
        &self,
        lead: &Lead,
        exclude: &BTreeSet<ProviderId>,
    ) -> Result<Vec<EligibleProvider>, CollaboratorError> {
        let summaries = self.catalog.resolve_eligible_providers(
            &lead.posting.category,
            &lead.posting.region,
            exclude,
        )?;

        let eligible = summaries
            .into_iter()
            .filter_map(|summary| match check(&summary, lead, exclude) {
                Ok(distance_km) => Some(EligibleProvider {
                    summary,
                    distance_km,
                }),
                Err(reason) => {
                    debug!(lead = %lead.id, provider = %summary.id, ?reason, "provider not eligible");
                    None
                }
            })
            .collect();

        Ok(eligible)
    }
}

/// Check one provider against a lead, returning the covering distance.
pub fn check(
    summary: &ProviderSummary,
    lead: &Lead,
    exclude: &BTreeSet<ProviderId>,
) -> Result<f64, Ineligible> {
    let category = lead.posting.category.as_str();

    if exclude.contains(&summary.id) {
        return Err(Ineligible::AlreadyOffered);
    }
    if !summary
        .categories
        .iter()
        .any(|c| c.eq_ignore_ascii_case(category))
    {
        return Err(Ineligible::CategoryMismatch);
    }
    if !summary.active_subscription {
        return Err(Ineligible::NoSubscription);
    }
    if summary.credit_capacity < lead.price {
        return Err(Ineligible::InsufficientCapacity);
    }
    if let (Some(provider_tax), Some(client_tax)) = (&summary.tax_id, &lead.client_tax_id) {
        if provider_tax == client_tax {
            return Err(Ineligible::SelfAssignment);
        }
    }
    if lead.posting.requires_license
        && !summary
            .licensed_categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
    {
        return Err(Ineligible::MissingLicense);
    }

    coverage(&summary.locations, &lead.posting.region).ok_or(Ineligible::OutOfArea)
}

/// Closest active location whose radius contains the region.
pub fn coverage(locations: &[ServiceLocation], region: &Region) -> Option<f64> {
    locations
        .iter()
        .filter(|location| location.active)
        .filter_map(|location| match (location.point, region.point) {
            (Some(from), Some(to)) => {
                let distance = distance_km(from, to);
                (distance <= location.radius_km).then_some(distance)
            }
            // without coordinates on either side only the city can match
            _ => location
                .city
                .eq_ignore_ascii_case(region.city.trim())
                .then_some(0.0),
        })
        .min_by(|a, b| a.total_cmp(b))
}

/// Haversine great-circle distance.
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Catalog over a fixed provider list.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    providers: RwLock<Vec<ProviderSummary>>,
}

impl StaticCatalog {
    pub fn new(providers: Vec<ProviderSummary>) -> Self {
        Self {
            providers: RwLock::new(providers),
        }
    }

    pub fn upsert(&self, summary: ProviderSummary) {
        let mut providers = self.providers.write();
        match providers.iter_mut().find(|p| p.id == summary.id) {
            Some(existing) => *existing = summary,
            None => providers.push(summary),
        }
    }

    pub fn get(&self, id: ProviderId) -> Option<ProviderSummary> {
        self.providers.read().iter().find(|p| p.id == id).cloned()
    }
}

impl Catalog for StaticCatalog {
    fn resolve_eligible_providers(
        &self,
        category: &str,
        _region: &Region,
        exclude: &BTreeSet<ProviderId>,
    ) -> Result<Vec<ProviderSummary>, CollaboratorError> {
        Ok(self
            .providers
            .read()
            .iter()
            .filter(|p| !exclude.contains(&p.id))
            .filter(|p| p.categories.iter().any(|c| c.eq_ignore_ascii_case(category)))
            .cloned()
            .collect())
    }
}
