use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use voiceloop_agent::backend::SimulatedBackend;
use voiceloop_agent::source::SimulatedCaller;
use voiceloop_agent::{MetricsSink, TurnController};
use voiceloop_core::config::Config;

mod loadtest;
mod report;

#[derive(Parser)]
#[command(
    name = "voiceloop",
    about = "Turn-taking voice agent with per-turn latency instrumentation",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the turn-taking agent against a simulated caller
    Agent {
        /// Room to join (default: config agent.room or "dev-room")
        #[arg(long)]
        room: Option<String>,

        /// Agent identity within the room
        #[arg(long)]
        identity: Option<String>,

        /// Number of speech bursts to feed (default: run until interrupted)
        #[arg(long)]
        bursts: Option<usize>,

        /// Phrase the simulated recognizer produces
        #[arg(long)]
        phrase: Option<String>,
    },

    /// Start the token-issuance and telephony-webhook service
    Orchestrator {
        /// Port to listen on (default: 8000)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Start the metrics collector service
    Collector {
        /// Port to listen on (default: 9100)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Simulate concurrent callers and post synthetic turn latencies
    Loadtest {
        /// Number of concurrent simulated callers
        #[arg(long, default_value_t = 10)]
        concurrency: usize,

        /// Speech bursts per caller
        #[arg(long, default_value_t = 2)]
        bursts: usize,

        /// Use a single shared room instead of one room per caller
        #[arg(long)]
        shared_room: bool,

        /// Do not post synthetic events to the collector
        #[arg(long)]
        no_metrics: bool,

        /// Seed each caller's RNG for reproducible runs
        #[arg(long)]
        deterministic: bool,

        /// Orchestrator base URL (default: http://localhost:<orchestrator.port>)
        #[arg(long)]
        orchestrator_url: Option<String>,

        /// Phrase to simulate
        #[arg(long, default_value = "testing one two three")]
        phrase: String,
    },

    /// Fetch and print latency aggregates from the collector
    Report {
        /// Collector base URL (default: http://localhost:<metrics.port>)
        #[arg(long)]
        metrics_url: Option<String>,

        /// Write raw events to this CSV path
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Print the last 10 raw events
        #[arg(long)]
        show_events: bool,

        /// Display an ASCII sparkline of recent round trips
        #[arg(long)]
        sparkline: bool,

        /// Re-poll every N seconds
        #[arg(long)]
        watch: Option<u64>,
    },

    /// Show configuration summary and validation results
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value by dotted path (e.g. "metrics.port")
    Get { key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Agent {
            room,
            identity,
            bursts,
            phrase,
        } => {
            let room = room.unwrap_or_else(|| config.default_room());
            let identity = identity.unwrap_or_else(|| "agent-sim".to_string());
            run_agent(&config, room, identity, bursts, phrase).await?;
        }
        Commands::Orchestrator { port } => {
            let orch = config.orchestrator();
            let port = port.unwrap_or(orch.port);
            voiceloop_orchestrator::start_orchestrator(&orch, port).await?;
        }
        Commands::Collector { port } => {
            let mut metrics = config.metrics();
            if let Some(port) = port {
                metrics.port = port;
            }
            voiceloop_collector::start_collector(&metrics).await?;
        }
        Commands::Loadtest {
            concurrency,
            bursts,
            shared_room,
            no_metrics,
            deterministic,
            orchestrator_url,
            phrase,
        } => {
            let orchestrator_url = orchestrator_url
                .unwrap_or_else(|| format!("http://localhost:{}", config.orchestrator().port));
            loadtest::run_loadtest(loadtest::LoadtestOptions {
                orchestrator_url,
                metrics_endpoint: config.metrics().endpoint,
                concurrency,
                bursts,
                shared_room,
                post_metrics: !no_metrics,
                deterministic,
                phrase,
            })
            .await?;
        }
        Commands::Report {
            metrics_url,
            csv,
            show_events,
            sparkline,
            watch,
        } => {
            let metrics_url = metrics_url
                .unwrap_or_else(|| format!("http://localhost:{}", config.metrics().port));
            report::run_report(report::ReportOptions {
                metrics_url,
                csv,
                show_events,
                sparkline,
                watch,
            })
            .await?;
        }
        Commands::Status => {
            println!("Voiceloop v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Default room: {}", config.default_room());
            println!("Orchestrator port: {}", config.orchestrator().port);
            println!("Collector port: {}", config.metrics().port);
            println!("Metrics endpoint: {}", config.metrics().endpoint);

            let (warnings, errors) = config.validate();
            for warning in &warnings {
                println!("warning: {warning}");
            }
            for error in &errors {
                println!("error: {error}");
            }
            if warnings.is_empty() && errors.is_empty() {
                println!("Config OK");
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{value}"),
                None => {
                    eprintln!("No value at path: {key}");
                    std::process::exit(1);
                }
            },
        },
    }

    Ok(())
}

fn init_logging(config: &Config, verbose: bool) {
    let logging = config.logging.clone().unwrap_or_default();
    let mut directives = if verbose {
        "debug".to_string()
    } else {
        logging.level.clone().unwrap_or_else(|| "info".to_string())
    };
    for filter in &logging.filters {
        directives.push(',');
        directives.push_str(filter);
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Run one agent session fed by the simulated caller. `bursts = None` keeps
/// going until interrupted.
async fn run_agent(
    config: &Config,
    room: String,
    identity: String,
    bursts: Option<usize>,
    phrase: Option<String>,
) -> anyhow::Result<()> {
    let agent_config = config.agent();
    let sink = MetricsSink::spawn(config.metrics().endpoint);

    let backend = Arc::new(SimulatedBackend {
        phrase: phrase.unwrap_or_else(|| SimulatedBackend::default().phrase),
        ..Default::default()
    });

    // Reply audio has nowhere to play locally; count it and drop it.
    let (audio_tx, mut audio_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut frames = 0u64;
        while audio_rx.recv().await.is_some() {
            frames += 1;
            if frames % 250 == 0 {
                tracing::debug!(frames, "reply audio flowing");
            }
        }
    });

    tracing::info!(room = %room, identity = %identity, "agent session starting");
    let mut controller = TurnController::new(room, identity, agent_config, backend, sink, audio_tx);

    SimulatedCaller::default().run(&mut controller, bursts).await;

    // Let the last reply drain before exiting.
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    tracing::info!("agent session finished");
    Ok(())
}
