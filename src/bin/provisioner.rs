//! # Provisioner CLI
//!
//! Runs a script against one host, printing progress events as JSON lines on stdout and
//! asking interactive prompts on stderr/stdin.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use provisioner_core::config::ConfigManager;
use provisioner_core::detection::GeoOsDetectionService;
use provisioner_core::events::{ChannelTransport, ProgressEventKind, ProgressReporter};
use provisioner_core::interaction::{InteractionBroker, InteractionRequest, InteractionResponse};
use provisioner_core::logging::init_tracing;
use provisioner_core::orchestration::{ExecutionDispatcher, ExecutionRequest};
use provisioner_core::registry::{ScriptRegistry, YamlDirectoryScriptSource};
use provisioner_core::scripts::register_builtin_scripts;
use provisioner_core::ssh::{ConnectionConfig, Credential, RusshConnector, SshConnectionManager};
use provisioner_core::ProvisionerConfig;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "provisioner")]
#[command(about = "Run provisioning scripts on remote Linux hosts over SSH")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration directory (default: $PROVISIONER_CONFIG_DIR or ./config)
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a script against a host
    Run(RunArgs),

    /// List the available scripts
    List,

    /// Load, validate and print the effective configuration
    CheckConfig,
}

#[derive(Args)]
struct RunArgs {
    /// Script id, e.g. detect-system
    #[arg(short, long)]
    script: String,

    #[arg(long)]
    host: String,

    #[arg(long, default_value_t = 22)]
    port: u16,

    #[arg(short, long, default_value = "root")]
    user: String,

    /// Login password (or set PROVISIONER_SSH_PASSWORD)
    #[arg(long, env = "PROVISIONER_SSH_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Private key file, used instead of a password
    #[arg(long)]
    key_file: Option<PathBuf>,

    #[arg(long, env = "PROVISIONER_SSH_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// Script parameter as name=value; values are parsed as JSON when possible
    #[arg(short = 'p', long = "param", value_parser = parse_param)]
    params: Vec<(String, Value)>,

    /// Session id used on progress events
    #[arg(long)]
    session: Option<String>,
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let manager = ConfigManager::load_from_directory(cli.config_dir.clone())
        .context("failed to load configuration")?;
    let config = manager.config();

    match cli.command {
        Commands::CheckConfig => check_config(&manager),
        Commands::List => list_scripts(config).await,
        Commands::Run(args) => run_script(config, args).await,
    }
}

fn check_config(manager: &ConfigManager) -> anyhow::Result<()> {
    manager
        .config()
        .validate()
        .context("configuration is invalid")?;
    println!("# environment: {}", manager.environment());
    println!("# directory: {}", manager.config_directory().display());
    print!("{}", serde_yaml::to_string(manager.config())?);
    Ok(())
}

fn build_registry(config: &ProvisionerConfig) -> anyhow::Result<Arc<ScriptRegistry>> {
    let registry = match &config.scripts.directory {
        Some(directory) => {
            info!(directory = %directory.display(), "Loading user-defined scripts");
            ScriptRegistry::with_source(Arc::new(YamlDirectoryScriptSource::new(directory)))
        }
        None => ScriptRegistry::new(),
    };
    register_builtin_scripts(
        &registry,
        Arc::new(GeoOsDetectionService::from_config(&config.detection)),
    )?;
    Ok(Arc::new(registry))
}

async fn list_scripts(config: &ProvisionerConfig) -> anyhow::Result<()> {
    let registry = build_registry(config)?;
    for script in registry.list().await? {
        println!(
            "{:<24} {:<14} {:>3} steps  {}",
            script.id,
            script.classification.to_string(),
            script.steps,
            script.description
        );
    }
    Ok(())
}

async fn run_script(config: &ProvisionerConfig, args: RunArgs) -> anyhow::Result<()> {
    config.validate()?;

    let credential = match (&args.key_file, &args.password) {
        (Some(path), _) => Credential::KeyFile {
            path: path.clone(),
            passphrase: args.passphrase.clone(),
        },
        (None, Some(password)) => Credential::Password {
            password: password.clone(),
        },
        (None, None) => bail!("either --password or --key-file is required"),
    };
    let target = ConnectionConfig::new(&args.host, args.port, &args.user, credential);
    target.validate()?;

    let session_id = args
        .session
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let transport = Arc::new(ChannelTransport::new(config.events.channel_capacity));
    let reporter = Arc::new(ProgressReporter::new(
        transport.clone(),
        config.events.publish_timeout(),
    ));
    let broker = Arc::new(InteractionBroker::new(Arc::clone(&reporter)));
    let pool = Arc::new(SshConnectionManager::from_config(
        Arc::new(RusshConnector::new()),
        config,
    ));
    let sweeper_cancel = CancellationToken::new();
    let sweeper = pool.spawn_idle_sweeper(sweeper_cancel.clone());
    let dispatcher = Arc::new(ExecutionDispatcher::from_config(
        build_registry(config)?,
        Arc::clone(&pool),
        broker,
        reporter,
        config,
    ));

    let mut events = transport.subscribe(&session_id);
    let printer_dispatcher = Arc::clone(&dispatcher);
    let printer = tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Unprintable event"),
            }

            if event.kind == ProgressEventKind::InteractionRequested {
                let Some(request) = event
                    .payload
                    .clone()
                    .and_then(|p| serde_json::from_value::<InteractionRequest>(p).ok())
                else {
                    continue;
                };
                let hint = request
                    .default_value
                    .as_deref()
                    .map(|d| format!(" [{d}]"))
                    .unwrap_or_default();
                eprint!("{} ({}){hint}: ", request.prompt, request.kind);
                if let Ok(Some(line)) = stdin.next_line().await {
                    let value = match (line.trim(), &request.default_value) {
                        ("", Some(default)) => default.clone(),
                        (answer, _) => answer.to_string(),
                    };
                    printer_dispatcher.respond(InteractionResponse {
                        session_id: request.session_id,
                        correlation_id: request.correlation_id,
                        value,
                    });
                }
            }

            if event.kind.is_terminal() {
                break;
            }
        }
    });

    let parameters: Map<String, Value> = args.params.into_iter().collect();
    let request = ExecutionRequest::new(&session_id, &args.script, target).with_parameters(parameters);
    let mut execution = dispatcher.spawn(request);

    let report = tokio::select! {
        report = &mut execution => report?,
        _ = tokio::signal::ctrl_c() => {
            warn!(session_id = %session_id, "Interrupted, cancelling execution");
            dispatcher.cancel(&session_id);
            execution.await?
        }
    };

    // the printer may be parked on stdin when the chain ended without an answer
    if tokio::time::timeout(std::time::Duration::from_secs(1), printer)
        .await
        .is_err()
    {
        warn!("Event printer did not finish");
    }
    sweeper_cancel.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Idle sweeper task failed");
    }
    pool.shutdown().await;

    eprintln!(
        "execution {} finished: {}",
        report.execution_id, report.state
    );
    report.into_result()?;
    Ok(())
}
