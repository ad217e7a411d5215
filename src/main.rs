use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{Instrument, error, info};

use inbox_rules::config::{Config, parse_batch_size};
use inbox_rules::logging::{self, Phase};
use inbox_rules::pipeline::loader::load_rules;
use inbox_rules::pipeline::rules::RuleSet;
use inbox_rules::pipeline::{Ingestor, RuleProcessor};
use inbox_rules::provider::{GmailClient, MailProvider};
use inbox_rules::store::MessageStore;

#[derive(Parser)]
#[command(name = "inbox-rules", version, about = "Fetch inbox mail and apply filing rules")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replace the local store with the latest inbox messages
    Fetch {
        /// Number of messages to fetch (overrides EMAIL_SIZE)
        #[arg(long, value_parser = parse_batch_size)]
        max_results: Option<u32>,
    },
    /// Apply the rule document to every stored message
    Process {
        /// Rule document path (overrides RULES_FILE)
        #[arg(long)]
        rules: Option<PathBuf>,
    },
    /// Fetch, then process
    Run,
}

impl Command {
    /// Failure logs this command writes; the first also takes unscoped events.
    fn phases(&self) -> &'static [Phase] {
        match self {
            Self::Fetch { .. } => &[Phase::Fetch],
            Self::Process { .. } => &[Phase::Process],
            Self::Run => &[Phase::Fetch, Phase::Process],
        }
    }

    fn apply_overrides(&self, config: &mut Config) {
        match self {
            Self::Fetch {
                max_results: Some(n),
            } => config.batch_size = *n,
            Self::Process { rules: Some(path) } => config.rules_file = path.clone(),
            _ => {}
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let phases = cli.command.phases();

    let config = match Config::from_env() {
        Ok(mut config) => {
            cli.command.apply_overrides(&mut config);
            config
        }
        Err(e) => {
            // Failure logs fall back to their default paths.
            let _guard = logging::init(&Config::default(), phases)?;
            error!("Failed to load configuration: {e}");
            return Err(e.into());
        }
    };

    let _guard = logging::init(&config, phases).context("Failed to initialize logging")?;
    info!("inbox-rules v{}", env!("CARGO_PKG_VERSION"));

    execute(&cli.command, &config).await
}

/// Run `work` inside the phase span, logging a fatal error once there.
async fn in_phase<T>(
    phase: Phase,
    work: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    async move { work.await.inspect_err(|e| error!("Run aborted: {e:#}")) }
        .instrument(phase.span())
        .await
}

async fn execute(command: &Command, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Fetch { .. } => {
            in_phase(Phase::Fetch, async {
                let (provider, store) = connect(config).await?;
                fetch(config, provider, store).await
            })
            .await
        }
        Command::Process { .. } => {
            in_phase(Phase::Process, async {
                // Rules are validated before touching the provider or the store.
                let rule_sets = load_rules(&config.rules_file).await?;
                let (provider, store) = connect(config).await?;
                process(rule_sets, provider, store).await
            })
            .await
        }
        Command::Run => {
            let rule_sets = in_phase(Phase::Process, async {
                Ok(load_rules(&config.rules_file).await?)
            })
            .await?;
            let (provider, store) = in_phase(Phase::Fetch, async {
                let (provider, store) = connect(config).await?;
                fetch(config, provider.clone(), store.clone()).await?;
                Ok((provider, store))
            })
            .await?;
            in_phase(Phase::Process, process(rule_sets, provider, store)).await
        }
    }
}

async fn connect(config: &Config) -> anyhow::Result<(Arc<dyn MailProvider>, Arc<MessageStore>)> {
    let provider: Arc<dyn MailProvider> = Arc::new(GmailClient::connect(config).await?);
    let store = Arc::new(MessageStore::open(&config.db_path, &config.table_name).await?);
    Ok((provider, store))
}

async fn fetch(
    config: &Config,
    provider: Arc<dyn MailProvider>,
    store: Arc<MessageStore>,
) -> anyhow::Result<()> {
    let report = Ingestor::new(config, provider, store).run().await?;
    info!(
        listed = report.listed,
        stored = report.stored,
        skipped = report.skipped,
        "Fetch complete"
    );
    Ok(())
}

async fn process(
    rule_sets: Vec<RuleSet>,
    provider: Arc<dyn MailProvider>,
    store: Arc<MessageStore>,
) -> anyhow::Result<()> {
    let report = RuleProcessor::new(rule_sets, provider, store).run().await?;
    info!(
        records = report.records,
        matched = report.matched,
        failures = report.failures,
        "Processing complete"
    );
    Ok(())
}
