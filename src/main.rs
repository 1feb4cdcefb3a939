use std::env;
use std::io;
use std::sync::Arc;

use chrono::Utc;
use leadflow::collaborators::Collaborators;
use leadflow::csv::{read_events, read_providers, write_balances};
use leadflow::eligibility::StaticCatalog;
use leadflow::model::TransactionKind;
use leadflow::{EngineConfig, LeadEngine};
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = EngineConfig::from_env().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(2);
    });

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let (Some(providers), Some(events)) = (args.next(), args.next()) else {
        eprintln!("usage: leadflow <providers.csv> <events.csv>");
        std::process::exit(2);
    };
    for path in [&providers, &events] {
        if !path.ends_with(".csv") {
            warn!(path = %path, "input file seems to not be a csv file");
        }
    }

    let seeds: Vec<_> = read_providers(&providers)
        .expect("failed to open providers file")
        .filter_map(|result| result.inspect_err(|e| warn!("{e}")).ok())
        .collect();
    let catalog = Arc::new(StaticCatalog::new(
        seeds.iter().map(|seed| seed.summary.clone()).collect(),
    ));
    let engine = LeadEngine::new(config, Collaborators::with_catalog(catalog));
    let opened = Utc::now();
    for seed in &seeds {
        let provider = seed.summary.id;
        if !seed.credits.is_positive() {
            engine.ledger().open_account(provider);
            continue;
        }
        if let Err(e) = engine.top_up(provider, seed.credits, TransactionKind::Subscription, opened) {
            warn!(provider = %provider, "{e}");
        }
    }

    let commands = read_events(events).expect("failed to open events file");
    let (command_sender, command_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in commands {
            match result {
                Ok(command) => {
                    command_sender.send(command).await.unwrap();
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(command_receiver)).await;

    write_balances(io::stdout().lock(), engine.ledger().balances())
        .expect("failed to write balances");
}
