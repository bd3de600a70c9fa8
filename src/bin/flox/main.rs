// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use flox::init::agent::Agent;
use flox::init::args::AgentRun;
use flox::init::config::PipelineConfig;
use flox::init::wait;
use flox::listener::Listener;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Run a pipeline
    Start(Box<AgentRun>),

    /// Check a pipeline configuration file
    Validate {
        /// Pipeline configuration file
        file: PathBuf,
    },

    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "flox")]
#[command(bin_name = "flox")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "FLOX_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    log_format: LogFormatArg,

    #[arg(long, global = true, env = "FLOX_ENVIRONMENT", default_value = "dev")]
    /// Environment
    environment: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    match opt.command {
        Commands::Version => println!("{}", get_version()),
        Commands::Validate { file } => {
            match PipelineConfig::load(&file).and_then(|c| c.validate().map_err(Into::into)) {
                Ok(()) => println!("Config is valid"),
                Err(e) => {
                    eprintln!("Config is invalid: {}", e);
                    return ExitCode::from(1);
                }
            }
        }
        Commands::Start(args) => {
            let config = match PipelineConfig::load(&args.config) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    return ExitCode::from(1);
                }
            };

            // Bind before anything starts so a taken port fails startup.
            let mut agent = Agent::new(config.clone());
            if config.input.input_type == "http" {
                match config
                    .http_address()
                    .map_err(BoxError::from)
                    .and_then(Listener::listen_std)
                {
                    Ok(l) => agent = agent.with_http_listener(l),
                    Err(e) => {
                        eprintln!("ERROR: {}", e);
                        return ExitCode::from(1);
                    }
                }
            }
            #[cfg(feature = "prometheus")]
            match Listener::listen_std(args.metrics_endpoint) {
                Ok(l) => agent = agent.with_metrics_listener(l),
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    return ExitCode::from(1);
                }
            }

            let _guard = match setup_logging(&opt.log_format) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("ERROR: failed to setup logging: {}", e);
                    return ExitCode::from(1);
                }
            };

            if let Err(e) = run_agent(agent, &opt.environment) {
                error!(error = e, "Failed to run agent.");
                return ExitCode::from(1);
            }
        }
    }

    ExitCode::SUCCESS
}

#[tokio::main]
async fn run_agent(agent: Agent, env: &str) -> Result<(), BoxError> {
    info!(environment = env, version = %get_version(), "Starting agent.");

    let mut agent_join_set = JoinSet::new();
    let cancel_token = CancellationToken::new();
    agent_join_set.spawn(agent.run(cancel_token.clone()));

    select! {
        res = signal_wait() => {
            res?;
            info!("Shutdown signal received.");
            cancel_token.cancel();
        },
        e = wait::wait_for_any_task(&mut agent_join_set) => {
            match e {
                Ok(()) => warn!("Unexpected early exit of agent."),
                Err(e) => return Err(e),
            }
        },
    }

    wait::wait_for_tasks_with_timeout(&mut agent_join_set, SHUTDOWN_TIMEOUT).await
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive("opentelemetry=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?)
        .add_directive("rdkafka=warn".parse()?);

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io::IsTerminal;

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(std::io::stdout().is_terminal())
            .compact();

        let subscriber = Registry::default().with(filter).with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");

    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}

async fn signal_wait() -> Result<(), BoxError> {
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
    Ok(())
}
