use thiserror::Error;

use crate::Credits;
use crate::model::{ClientProfile, JobPosting, JobSize, Urgency};

/// Malformed scoring input. A lead that fails validation must not be published.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoreError {
    #[error("invalid {field}: {reason}")]
    Validation {
        field: &'static str,
        reason: String,
    },
}

impl ScoreError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ScoreError::Validation {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadScores {
    pub quality: u8,
    pub trust: u8,
}

impl LeadScores {
    pub fn band(&self) -> QualityBand {
        QualityBand::from_score(self.quality)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QualityBand {
    Low,
    Average,
    Good,
    Excellent,
}

impl QualityBand {
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => QualityBand::Excellent,
            60..=79 => QualityBand::Good,
            40..=59 => QualityBand::Average,
            _ => QualityBand::Low,
        }
    }
}

const MAX_SCORE: u32 = 100;
const QUALITY_BASE: u32 = 30;
const DETAILED_DESCRIPTION_WORDS: u32 = 50;
const HISTORY_MIN_DAYS: u32 = 30;

/// Client trust from verification flags and platform history.
pub fn trust_score(client: &ClientProfile) -> u8 {
    let v = &client.verification;
    let mut score = 0u32;
    if v.phone {
        score += 10;
    }
    if v.email {
        score += 10;
    }
    if v.identity {
        score += 10;
    }
    if v.tax_id {
        score += 15;
    }
    if v.company {
        score += 20;
    }
    if client.account_age_days >= HISTORY_MIN_DAYS {
        score += 15;
    }
    score += (client.completed_jobs * 5).min(20);
    score.min(MAX_SCORE) as u8
}

/// Score a posting together with its client.
///
/// Every rule only ever adds points, so completing a verification can raise
/// the scores but never lower them.
pub fn score_lead(posting: &JobPosting, client: &ClientProfile) -> Result<LeadScores, ScoreError> {
    validate(posting)?;

    let trust = trust_score(client);
    let mut quality = QUALITY_BASE + u32::from(trust) / 5;

    if posting.description_words >= DETAILED_DESCRIPTION_WORDS {
        quality += 10;
    }
    if posting.budget.is_some_and(|b| b.max > 0) {
        quality += 10;
    }
    if !posting.region.city.trim().is_empty() || posting.region.point.is_some() {
        quality += 5;
    }
    if matches!(posting.urgency, Urgency::High | Urgency::Urgent) {
        quality += 5;
    }
    quality += match posting.images {
        0 => 0,
        1..=2 => 5,
        _ => 10,
    };
    if posting.has_deadline {
        quality += 5;
    }
    if matches!(posting.size, Some(JobSize::Large | JobSize::ExtraLarge)) {
        quality += 10;
    }

    Ok(LeadScores {
        quality: quality.min(MAX_SCORE) as u8,
        trust,
    })
}

/// Lead price in credits derived from quality, never below 5.
pub fn recommend_price(quality: u8, base: Credits) -> Credits {
    match QualityBand::from_score(quality) {
        QualityBand::Excellent => base + Credits::new(10),
        QualityBand::Good => base + Credits::new(5),
        QualityBand::Average => base,
        QualityBand::Low => (base - Credits::new(5)).max(Credits::new(5)),
    }
}

fn validate(posting: &JobPosting) -> Result<(), ScoreError> {
    if posting.category.trim().is_empty() {
        return Err(ScoreError::invalid("category", "must not be empty"));
    }
    if let Some(budget) = posting.budget {
        if budget.min > budget.max {
            return Err(ScoreError::invalid(
                "budget",
                format!("min {} exceeds max {}", budget.min, budget.max),
            ));
        }
    }
    if let Some(point) = posting.region.point {
        if !(-90.0..=90.0).contains(&point.lat) || !(-180.0..=180.0).contains(&point.lon) {
            return Err(ScoreError::invalid(
                "region",
                format!("coordinates ({}, {}) out of range", point.lat, point.lon),
            ));
        }
    }
    Ok(())
}
