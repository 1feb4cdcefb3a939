//! Pure scoring functions: lead quality, client trust and partner reputation.
//!
//! Nothing in here performs I/O; identical inputs always give identical scores.

mod partner;
mod quality;

pub use partner::{PartnerMetrics, PartnerScore, Tier};
pub use quality::{LeadScores, QualityBand, ScoreError, recommend_price, score_lead, trust_score};
