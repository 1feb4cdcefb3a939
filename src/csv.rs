use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::Credits;
use crate::model::{
    AccountKind, Budget, ClientId, ClientProfile, Command, FundingSource, GeoPoint, JobPosting,
    LeadId, ProviderId, ProviderSummary, Region, ServiceLocation, TransactionKind, Urgency,
};
use crate::scoring::PartnerMetrics;

/// Errors that can occur when parsing csv rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized {field} '{value}'")]
    Unrecognized {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: {kind} missing {field}")]
    Missing {
        line: usize,
        kind: String,
        field: &'static str,
    },
}

/// A provider to load into the catalog, with its opening subscription credit.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSeed {
    pub summary: ProviderSummary,
    pub credits: Credits,
}

#[derive(Debug, Deserialize)]
struct ProviderRow {
    provider: ProviderId,
    kind: Option<String>,
    categories: String,
    city: String,
    lat: Option<f64>,
    lon: Option<f64>,
    radius_km: f64,
    subscription: bool,
    credits: i64,
    /// Stars, 0-5.
    rating: Option<f64>,
    /// Average response, minutes.
    response: Option<u32>,
    /// Fraction of purchases won, 0-1.
    conversion: Option<f64>,
    compliance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct EventRow {
    r#type: String,
    at: DateTime<Utc>,
    lead: Option<LeadId>,
    provider: Option<ProviderId>,
    client: Option<ClientId>,
    category: Option<String>,
    city: Option<String>,
    budget_min: Option<u32>,
    budget_max: Option<u32>,
    urgency: Option<String>,
    words: Option<u32>,
    amount: Option<i64>,
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct BalanceRow {
    provider: ProviderId,
    balance: String,
    transactions: usize,
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, CsvError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })
}

/// Read providers from a csv file
pub fn read_providers(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<ProviderSeed, CsvError>>, CsvError> {
    let reader = open(path.as_ref())?;
    Ok(reader
        .into_deserialize::<ProviderRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            provider_seed(line, row)
        }))
}

fn provider_seed(line: usize, row: ProviderRow) -> Result<ProviderSeed, CsvError> {
    let kind = match row.kind.as_deref().unwrap_or("individual") {
        "" | "individual" => AccountKind::Individual,
        "company" => AccountKind::Company,
        other => {
            return Err(CsvError::Unrecognized {
                line,
                field: "account kind",
                value: other.to_string(),
            });
        }
    };
    let point = row.lat.zip(row.lon).map(|(lat, lon)| GeoPoint { lat, lon });
    let categories = row
        .categories
        .split(';')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    let partner_inputs = PartnerMetrics {
        rating: row.rating.map(PartnerMetrics::rating_from_stars),
        response_time: row
            .response
            .map(|minutes| PartnerMetrics::response_from_minutes(Some(minutes))),
        conversion: row.conversion.map(PartnerMetrics::conversion_from_rate),
        compliance: row.compliance,
        ..PartnerMetrics::default()
    };
    let credits = Credits::new(row.credits);

    Ok(ProviderSeed {
        summary: ProviderSummary {
            id: row.provider,
            kind,
            categories,
            locations: vec![ServiceLocation {
                city: row.city,
                point,
                radius_km: row.radius_km,
                active: true,
            }],
            active_subscription: row.subscription,
            credit_capacity: credits,
            partner_inputs,
            ..ProviderSummary::default()
        },
        credits,
    })
}

/// Read engine commands from a csv file
pub fn read_events(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Command, CsvError>>, CsvError> {
    let reader = open(path.as_ref())?;
    Ok(reader
        .into_deserialize::<EventRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2;
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            command(line, row)
        }))
}

fn command(line: usize, row: EventRow) -> Result<Command, CsvError> {
    let kind = row.r#type.as_str();
    let missing = |field| CsvError::Missing {
        line,
        kind: kind.to_string(),
        field,
    };
    let lead = || row.lead.ok_or_else(|| missing("lead"));
    let provider = || row.provider.ok_or_else(|| missing("provider"));
    let at = row.at;

    let command = match kind {
        "publish" => {
            let urgency = match row.urgency.as_deref().unwrap_or("") {
                "" | "normal" => Urgency::Normal,
                "low" => Urgency::Low,
                "high" => Urgency::High,
                "urgent" => Urgency::Urgent,
                other => {
                    return Err(CsvError::Unrecognized {
                        line,
                        field: "urgency",
                        value: other.to_string(),
                    });
                }
            };
            let budget = row
                .budget_min
                .zip(row.budget_max)
                .map(|(min, max)| Budget { min, max });
            Command::Publish {
                lead: lead()?,
                client: ClientProfile {
                    id: row.client.ok_or_else(|| missing("client"))?,
                    ..ClientProfile::default()
                },
                posting: JobPosting {
                    category: row.category.clone().ok_or_else(|| missing("category"))?,
                    region: Region {
                        city: row.city.clone().unwrap_or_default(),
                        point: None,
                    },
                    budget,
                    urgency,
                    description_words: row.words.unwrap_or(0),
                    ..JobPosting::default()
                },
                at,
            }
        }
        "accept" | "charge" => Command::Accept {
            lead: lead()?,
            provider: provider()?,
            funding: if kind == "charge" {
                FundingSource::DirectCharge
            } else {
                FundingSource::Credits
            },
            at,
        },
        "decline" => Command::Decline {
            lead: lead()?,
            provider: provider()?,
            at,
        },
        "skip" => Command::Skip {
            lead: lead()?,
            provider: provider()?,
            at,
        },
        "contacted" => Command::MarkContacted {
            lead: lead()?,
            provider: provider()?,
            at,
        },
        "converted" => Command::MarkConverted {
            lead: lead()?,
            provider: provider()?,
            at,
        },
        "unlock" => Command::UnlockContact {
            lead: lead()?,
            provider: provider()?,
            at,
        },
        "refund" => Command::RequestRefund {
            lead: lead()?,
            provider: provider()?,
            reason: row.reason.clone().unwrap_or_default(),
            at,
        },
        "cancel_refund" => Command::CancelRefund {
            lead: lead()?,
            provider: provider()?,
            at,
        },
        "approve_refund" | "reject_refund" => Command::ReviewRefund {
            lead: lead()?,
            provider: provider()?,
            approve: kind == "approve_refund",
            at,
        },
        "withdraw" => Command::Withdraw { lead: lead()?, at },
        "topup" | "bonus" => Command::TopUp {
            provider: provider()?,
            amount: Credits::new(row.amount.ok_or_else(|| missing("amount"))?),
            kind: if kind == "bonus" {
                TransactionKind::Bonus
            } else {
                TransactionKind::Purchase
            },
            at,
        },
        "sweep" => Command::Sweep { at },
        other => {
            return Err(CsvError::Unrecognized {
                line,
                field: "event type",
                value: other.to_string(),
            });
        }
    };
    Ok(command)
}

/// Write provider balances in csv format
pub fn write_balances(
    writer: impl io::Write,
    balances: impl IntoIterator<Item = (ProviderId, Credits, usize)>,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);
    for (provider, balance, transactions) in balances {
        writer.serialize(BalanceRow {
            provider,
            balance: balance.to_string(),
            transactions,
        })?;
    }
    writer.flush()?;
    Ok(())
}
