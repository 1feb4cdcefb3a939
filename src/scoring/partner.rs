use serde::{Deserialize, Serialize};

/// Aggregated provider history. Components are pre-normalised to 0-100;
/// `None` means the aggregate is not known yet.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PartnerMetrics {
    pub rating: Option<f64>,
    pub response_time: Option<f64>,
    pub conversion: Option<f64>,
    pub compliance: Option<f64>,
    pub reports: u32,
    pub spam_flags: u32,
    pub inactive_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Basic,
    Verified,
    Premium,
}

/// Weighted partner reputation. `raw` may go below zero once penalties apply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartnerScore {
    pub raw: f64,
}

const NEUTRAL: f64 = 50.0;
const MAX_PENALTY: f64 = 40.0;
const INACTIVITY_DAYS: u32 = 30;

impl PartnerMetrics {
    /// Star rating (0-5) to a 0-100 component.
    pub fn rating_from_stars(stars: f64) -> f64 {
        (stars.clamp(0.0, 5.0) / 5.0) * 100.0
    }

    /// Average response time bucket; fast responders score highest.
    pub fn response_from_minutes(minutes: Option<u32>) -> f64 {
        match minutes {
            None | Some(0) => NEUTRAL,
            Some(1..=60) => 100.0,
            Some(61..=240) => 50.0,
            Some(_) => 10.0,
        }
    }

    /// Conversion rate as a 0-1 fraction.
    pub fn conversion_from_rate(rate: f64) -> f64 {
        rate.clamp(0.0, 1.0) * 100.0
    }

    fn penalty(&self) -> f64 {
        let mut penalty = f64::from(self.reports) * 5.0 + f64::from(self.spam_flags) * 10.0;
        if self.inactive_days > INACTIVITY_DAYS {
            penalty += 10.0;
        }
        penalty.min(MAX_PENALTY)
    }

    pub fn score(&self) -> PartnerScore {
        // unknown or non-finite inputs count as neutral
        let component = |value: Option<f64>| {
            value
                .filter(|v| v.is_finite())
                .map_or(NEUTRAL, |v| v.clamp(0.0, 100.0))
        };
        // weights in percent (40/25/20/15) keep integral inputs exact
        let weighted = (component(self.rating) * 40.0
            + component(self.response_time) * 25.0
            + component(self.conversion) * 20.0
            + component(self.compliance) * 15.0)
            / 100.0;
        PartnerScore {
            raw: weighted - self.penalty(),
        }
    }
}

impl PartnerScore {
    /// Score used for ranking and tiering, never below zero.
    pub fn value(&self) -> f64 {
        self.raw.max(0.0)
    }

    pub fn tier(&self) -> Tier {
        let value = self.value();
        if value >= 80.0 {
            Tier::Premium
        } else if value >= 60.0 {
            Tier::Verified
        } else {
            Tier::Basic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(value: f64) -> PartnerMetrics {
        PartnerMetrics {
            rating: Some(value),
            response_time: Some(value),
            conversion: Some(value),
            compliance: Some(value),
            ..PartnerMetrics::default()
        }
    }

    #[test]
    fn missing_metrics_are_neutral() {
        let score = PartnerMetrics::default().score();
        assert!((score.raw - 50.0).abs() < 1e-9);
        assert_eq!(score.tier(), Tier::Basic);
    }

    #[test]
    fn uniform_components_yield_that_value() {
        assert!((uniform(90.0).score().value() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn weights_are_applied() {
        let metrics = PartnerMetrics {
            rating: Some(100.0),
            response_time: Some(0.0),
            conversion: Some(0.0),
            compliance: Some(0.0),
            ..PartnerMetrics::default()
        };
        assert!((metrics.score().raw - 40.0).abs() < 1e-9);
    }

    #[test]
    fn tiers() {
        assert_eq!(uniform(80.0).score().tier(), Tier::Premium);
        assert_eq!(uniform(79.0).score().tier(), Tier::Verified);
        assert_eq!(uniform(60.0).score().tier(), Tier::Verified);
        assert_eq!(uniform(59.0).score().tier(), Tier::Basic);
    }

    #[test]
    fn penalty_is_bounded_and_clamped_for_tiering() {
        let metrics = PartnerMetrics {
            reports: 20,
            spam_flags: 20,
            inactive_days: 90,
            ..uniform(30.0)
        };
        let score = metrics.score();
        assert!((score.raw - (30.0 - 40.0)).abs() < 1e-9);
        assert_eq!(score.value(), 0.0);
        assert_eq!(score.tier(), Tier::Basic);
    }

    #[test]
    fn out_of_range_components_are_clamped() {
        assert!((uniform(250.0).score().value() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn non_finite_components_are_neutral() {
        assert!((uniform(f64::NAN).score().raw - 50.0).abs() < 1e-9);
        let metrics = PartnerMetrics {
            rating: Some(PartnerMetrics::rating_from_stars(f64::NAN)),
            conversion: Some(f64::INFINITY),
            ..uniform(90.0)
        };
        // rating and conversion fall back to 50
        assert!((metrics.score().raw - 66.0).abs() < 1e-9);
    }

    #[test]
    fn normalisers() {
        assert!((PartnerMetrics::rating_from_stars(4.5) - 90.0).abs() < 1e-9);
        assert_eq!(PartnerMetrics::response_from_minutes(Some(30)), 100.0);
        assert_eq!(PartnerMetrics::response_from_minutes(Some(120)), 50.0);
        assert_eq!(PartnerMetrics::response_from_minutes(Some(600)), 10.0);
        assert_eq!(PartnerMetrics::response_from_minutes(None), 50.0);
        assert!((PartnerMetrics::conversion_from_rate(0.35) - 35.0).abs() < 1e-9);
    }
}
