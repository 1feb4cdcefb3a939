pub mod collaborators;
pub mod config;
pub mod credits;
pub mod csv;
pub mod eligibility;
pub mod engine;
pub mod ledger;
pub mod model;
pub mod queue;
pub mod scoring;

pub use config::EngineConfig;
pub use credits::Credits;
pub use engine::{EngineError, LeadEngine, Scheduler};
pub use model::{ClientId, Command, LeadId, ProviderId, PurchaseId};
