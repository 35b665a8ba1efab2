use clap::Parser;
use flowgate::application::dispatcher::{TransactionDispatcher, TransactionHandle};
use flowgate::config::{EngineConfig, MissingStepPolicy};
use flowgate::domain::outcome::TransactionOutcome;
use flowgate::infrastructure::flow_table::StaticFlowTable;
use flowgate::infrastructure::steps::builtin_registry;
use flowgate::interfaces::csv::outcome_writer::OutcomeWriter;
use flowgate::interfaces::jsonl::request_reader::RequestReader;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input file with one JSON transaction request per line
    input: PathBuf,

    /// Engine configuration (JSON). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the admission capacity
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Fail flows that name an unregistered step instead of simulating it
    #[arg(long)]
    fail_on_missing_step: bool,
}

enum Pending {
    Handle(TransactionHandle),
    Done(TransactionOutcome),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_path(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };
    if let Some(max_concurrent) = cli.max_concurrent {
        config.admission.max_concurrent_transactions = max_concurrent;
    }
    if cli.fail_on_missing_step {
        config.router.missing_step = MissingStepPolicy::Fail;
    }
    config.validate().into_diagnostic()?;

    let flows = StaticFlowTable::new(&config.flows, config.dispatch.priority_amount_threshold);
    let dispatcher = TransactionDispatcher::new(&config, builtin_registry(), Box::new(flows));

    let file = File::open(&cli.input).into_diagnostic()?;
    let mut pending = Vec::new();
    for (line, request) in RequestReader::new(file).requests() {
        match request {
            Ok(request) => match dispatcher.submit(request).await {
                Ok(handle) => pending.push(Pending::Handle(handle)),
                Err(failure) => pending.push(Pending::Done(Err(failure))),
            },
            Err(e) => warn!("Skipping line {}: {}", line, e),
        }
    }

    let stdout = io::stdout();
    let mut writer = OutcomeWriter::new(stdout.lock());
    for entry in pending {
        let outcome = match entry {
            Pending::Handle(handle) => handle.outcome().await,
            Pending::Done(outcome) => outcome,
        };
        writer.write_outcome(&outcome).into_diagnostic()?;
    }
    writer.flush().into_diagnostic()?;

    let snapshot = dispatcher.performance_snapshot();
    info!(
        total = snapshot.total_transactions,
        successful = snapshot.successful_transactions,
        failed = snapshot.failed_transactions,
        rejected = snapshot.rejected_transactions,
        "Finished processing, success rate {:.1}%",
        snapshot.success_rate()
    );

    Ok(())
}
