use clap::{Args, Parser, Subcommand};
use sample_relay::{
    connect_with_retry, Consumer, EventPublisher, InputBatch, MemoryBus, Publisher, RecordStore,
    RelayConfig, RelayError, Result, SnapshotFile, SnapshotStart, StoreConfig, UnchangedPolicy,
    VersionStore,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sample-relay", about = "Relay versioned sample records into a consolidated snapshot")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish an input batch and consolidate the events into the snapshot.
    Run(RunArgs),
    /// Print every stored version of one sample as JSON lines.
    History(HistoryArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Record store directory.
    #[arg(long, env = "SAMPLE_RELAY_STORE", default_value = "./store")]
    store: PathBuf,

    /// Input batch file (`{"results": [...]}`).
    #[arg(long, env = "SAMPLE_RELAY_INPUT", default_value = "./fetch.json")]
    input: PathBuf,

    /// Snapshot file written by the aggregate consumer.
    #[arg(long, env = "SAMPLE_RELAY_SNAPSHOT", default_value = "./snapshot.json")]
    snapshot: PathBuf,

    /// Subject pattern the consumer subscribes to. Defaults to every event kind.
    #[arg(long, env = "SAMPLE_RELAY_SUBJECT")]
    subject: Option<String>,

    /// Do not re-announce records identical to their latest stored version.
    #[arg(long)]
    suppress_unchanged: bool,

    /// Start from an empty snapshot instead of the existing file.
    #[arg(long)]
    reset_snapshot: bool,

    /// Connection and publish attempts before giving up.
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,
}

#[derive(Args)]
struct HistoryArgs {
    /// Record store directory.
    #[arg(long, env = "SAMPLE_RELAY_STORE", default_value = "./store")]
    store: PathBuf,

    /// Sample identity (dmp_sample_id).
    #[arg(long)]
    identity: String,
}

impl RunArgs {
    fn into_config(self) -> (RelayConfig, Option<String>) {
        let mut config = RelayConfig {
            store_path: self.store,
            input_path: self.input,
            snapshot_path: self.snapshot,
            ..Default::default()
        };
        config.retry.max_attempts = self.max_attempts;
        if self.suppress_unchanged {
            config.unchanged = UnchangedPolicy::Suppress;
        }
        if self.reset_snapshot {
            config.snapshot_start = SnapshotStart::Reset;
        }
        (config, self.subject)
    }
}

fn run(args: RunArgs) -> Result<bool> {
    let (config, subject) = args.into_config();
    config.validate()?;
    let subject = subject.unwrap_or_else(|| config.topics.aggregate());

    let store: Arc<dyn RecordStore> = Arc::new(VersionStore::open_or_create(StoreConfig {
        path: config.store_path.clone(),
        create_if_missing: true,
    })?);
    let batch = InputBatch::load(&config.input_path)?;

    // The consumer must keep up with the whole batch without being dropped.
    let bus = MemoryBus::with_buffer_size(config.bus_buffer_size.max(batch.results.len()));

    let consumer_bus = connect_with_retry(&bus, &config.retry)?;
    let consumer = Arc::new(Consumer::for_pattern(
        &subject,
        &config.topics,
        SnapshotFile::new(&config.snapshot_path),
        config.snapshot_start,
    )?);
    let worker = Arc::clone(&consumer).spawn(consumer_bus.subscribe(&subject)?)?;

    let publisher_bus = connect_with_retry(&bus, &config.retry)?;
    let events = EventPublisher::new(publisher_bus, config.topics.clone(), config.retry.clone());
    let mut publisher = Publisher::new(Arc::clone(&store), events, config.unchanged);
    let summary = publisher.run(&batch.results);

    bus.close();
    let stats = worker
        .join()
        .map_err(|_| RelayError::InvalidOperation("consumer thread panicked".into()))?;

    println!(
        "processed {} (new {}, changed {}, unchanged {}), published {}, suppressed {}, failed {}",
        summary.processed(),
        summary.new,
        summary.changed,
        summary.unchanged,
        summary.published,
        summary.suppressed,
        summary.failed(),
    );
    for failure in &summary.failures {
        println!("  failed {}: {}", failure.identity, failure.error);
    }
    for letter in &summary.dead_letters {
        println!("  dead letter {} ({:?})", letter.record.identity(), letter.kind);
    }
    println!(
        "consumer on {}: received {}, reconciled {}, rejected {}, failed {}",
        subject, stats.received, stats.reconciled, stats.rejected, stats.failed
    );
    if let Some(entries) = consumer.snapshot() {
        println!("snapshot {} holds {} entries", config.snapshot_path.display(), entries.len());
    }

    Ok(summary.is_clean() && stats.rejected == 0 && stats.failed == 0)
}

fn history(args: HistoryArgs) -> Result<bool> {
    let store = VersionStore::open_or_create(StoreConfig {
        path: args.store,
        create_if_missing: false,
    })?;

    for version in store.versions(&args.identity)? {
        println!("{}", serde_json::to_string(&version)?);
    }
    Ok(true)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run(args),
        Commands::History(args) => history(args),
    };
    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
