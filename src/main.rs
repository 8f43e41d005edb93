use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use costoor::aws::sdk::SdkApi;
use costoor::aws::{ComputeApi, STATE_PENDING, STATE_RUNNING};
use costoor::classify::{self, Classifier};
use costoor::clock::PollClock;
use costoor::config::Config;
use costoor::monitor::{measure_catalog, Monitor, RegionFilter};
use costoor::pricing::feed::FeedClient;
use costoor::pricing::PriceTable;
use costoor::sink::JsonlSink;

/// EC2 allows at most this many tags per resource.
const MAX_TAGS_PER_INSTANCE: usize = 10;

/// AWS account cost and inventory monitoring agent.
#[derive(Parser)]
#[command(name = "costoor", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,

    /// List every instance of the configured account and exit.
    ListInstances,

    /// Tag untagged instances using the classification rules and exit.
    SetUsageTags {
        /// Only report what would be tagged, change nothing.
        #[arg(long)]
        dry_run: bool,
    },
}

/// Build-time version info, injected via RUSTFLAGS or build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("costoor {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    // Config is required for everything but the version subcommand.
    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    match cli.command {
        None => rt.block_on(run(cfg)),
        Some(Command::ListInstances) => rt.block_on(list_instances(cfg)),
        Some(Command::SetUsageTags { dry_run }) => rt.block_on(set_usage_tags(cfg, dry_run)),
        Some(Command::Version) => unreachable!("handled above"),
    }
}

async fn run(cfg: Config) -> Result<()> {
    info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting costoor",
    );

    // Set up signal handling.
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
            }
        }

        let _ = shutdown_tx.send(());
    });

    let mut monitor = build_monitor(&cfg).await?;

    let mut interval = tokio::time::interval(cfg.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = monitor.run_cycle().await {
                    warn!(error = %format!("{e:#}"), "poll cycle failed, retrying next interval");
                }
            }
        }
    }

    info!("costoor stopped");

    Ok(())
}

/// Wires the monitor together from configuration.
async fn build_monitor(cfg: &Config) -> Result<Monitor<SdkApi, SdkApi, SdkApi, JsonlSink>> {
    let api = SdkApi::new(
        &cfg.aws.access_key_id,
        &cfg.aws.secret_access_key,
        cfg.aws.timeout,
    )
    .await;

    // Baseline prices are required; the remote feed only refreshes them.
    let mut prices = PriceTable::from_baseline(&cfg.costs.baseline)
        .context("loading baseline cost properties")?;

    if cfg.costs.feed.enabled {
        let feed = FeedClient::new(cfg.costs.feed.timeout)?;
        let overlay = feed.fetch_overlay(&cfg.costs.feed.urls).await;
        prices.merge_overlay(overlay);
    }

    info!(entries = prices.len(), "price table ready");

    let clock = PollClock::new(cfg.clock.state_dir.as_deref(), &cfg.clock.unique_id);

    let mut registry = measure_catalog();
    registry.extend(
        cfg.sink
            .subscriptions
            .iter()
            .map(|subscription| (subscription.group.clone(), subscription.name.clone())),
    );

    let writer: Box<dyn Write + Send> = match &cfg.sink.output {
        Some(path) => Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening sink output {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    let sink = JsonlSink::new(registry, writer);

    let classifier = Classifier::new(cfg.classifier.usage_rules.clone());
    let region = RegionFilter::from_config(&cfg.aws.region)?;

    Ok(Monitor::new(
        api.clone(),
        api.clone(),
        api,
        sink,
        prices,
        classifier,
        clock,
        region,
    ))
}

/// Lists every instance in every region of the configured account.
async fn list_instances(cfg: Config) -> Result<()> {
    let api = SdkApi::new(
        &cfg.aws.access_key_id,
        &cfg.aws.secret_access_key,
        cfg.aws.timeout,
    )
    .await;

    info!("start listing instances for the configured account");

    let mut count = 0usize;
    for region in api.list_regions().await? {
        for instance in api.list_instances(&region.name).await? {
            info!("{}", instance.description());
            count += 1;
        }
    }

    info!(count, "finished listing instances");

    Ok(())
}

/// Walks all instances and sets the `Usage` tag on untagged ones the
/// classification rules can place. Untagged leftovers are logged for
/// further investigation.
async fn set_usage_tags(cfg: Config, dry_run: bool) -> Result<()> {
    let api = SdkApi::new(
        &cfg.aws.access_key_id,
        &cfg.aws.secret_access_key,
        cfg.aws.timeout,
    )
    .await;

    let classifier = Classifier::new(cfg.classifier.usage_rules.clone());

    info!(dry_run, "start tagging instances for the configured account");

    let mut tagged = 0usize;
    let mut missed = Vec::new();
    let mut missed_running = Vec::new();

    for region in api.list_regions().await? {
        for instance in api.list_instances(&region.name).await? {
            if classify::usage_tag(&instance.tags).is_some() {
                continue;
            }

            if instance.tags.len() >= MAX_TAGS_PER_INSTANCE {
                warn!(
                    "cannot set usage tag, the maximum number of {} tags is already set: {}",
                    MAX_TAGS_PER_INSTANCE,
                    instance.description(),
                );
                continue;
            }

            match classifier.match_rules(&instance.tags, instance.key_name.as_deref()) {
                Some(category) => {
                    if dry_run {
                        info!(instance = %instance.id, category, "would set usage tag");
                    } else {
                        api.tag_usage(&region.name, &instance.id, category).await?;
                        info!(instance = %instance.id, category, "set usage tag");
                    }
                    tagged += 1;
                }
                None => {
                    if instance.state == STATE_RUNNING || instance.state == STATE_PENDING {
                        missed_running.push(instance.description());
                    }
                    missed.push(instance.description());
                }
            }
        }
    }

    if !missed.is_empty() {
        warn!(
            "the following {} instances could not be tagged, some of them might not be running:\n{}",
            missed.len(),
            missed.join("\n"),
        );
    }
    if !missed_running.is_empty() {
        warn!(
            "the following {} running instances could not be tagged:\n{}",
            missed_running.len(),
            missed_running.join("\n"),
        );
    }

    info!(
        tagged,
        missed_running = missed_running.len(),
        missed = missed.len(),
        "finished tagging instances",
    );

    Ok(())
}
