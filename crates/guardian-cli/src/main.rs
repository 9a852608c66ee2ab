//! # guardian
//!
//! Command-line front end for the guardian engine:
//! - `guardian assess` prints the risk assessment of an action
//! - `guardian check` prints the compliance report of a payload
//! - `guardian submit` runs one guarded cycle with a dry-run executor

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use guardian_core::{
    Action, ActionContext, ActionKind, ComplianceEngine, EnforcementMode, RiskClassifier,
};
use guardian_runtime::{
    AttemptReporter, ChannelError, ChannelResponse, ExecutionCallback, ExecutionFailure,
    ExecutionOutput, GuardianCoordinator, HumanChannel, ProtectionService, ReviewRequest,
    RuntimeConfig,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Policy enforcement and guardian coordination for proposed actions.
#[derive(Parser)]
#[command(name = "guardian", version, about)]
struct Cli {
    /// Runtime config file (YAML, or JSON with a .json extension)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the risk of an action.
    Assess {
        kind: KindArg,
        /// File path, or the command line for `execute`
        target: String,
        /// The caller holds a backup of the target
        #[arg(long)]
        backup: bool,
    },
    /// Run the policy validators over a payload.
    Check {
        /// File holding the proposed content or diff
        #[arg(long)]
        payload: PathBuf,
        /// Path the payload would be written to (defaults to the payload path)
        #[arg(long)]
        target: Option<String>,
        #[arg(long, value_enum, default_value_t = KindArg::Edit)]
        kind: KindArg,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },
    /// Run a full guarded cycle; the produced result is the payload itself.
    Submit {
        kind: KindArg,
        target: String,
        #[arg(long)]
        payload: Option<PathBuf>,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// Accept warnings without a prompt. Escalations still ask.
        #[arg(long)]
        yes: bool,
        #[arg(long)]
        backup: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Create,
    Edit,
    Delete,
    Execute,
}

impl From<KindArg> for ActionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Create => ActionKind::Create,
            KindArg::Edit => ActionKind::Edit,
            KindArg::Delete => ActionKind::Delete,
            KindArg::Execute => ActionKind::Execute,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Strict,
    Soft,
}

impl From<ModeArg> for EnforcementMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Strict => EnforcementMode::Strict,
            ModeArg::Soft => EnforcementMode::Soft,
        }
    }
}

/// Produces the action's payload without touching anything.
struct DryRun;

#[async_trait]
impl ExecutionCallback for DryRun {
    async fn execute(
        &self,
        action: &Action,
        _reporter: &AttemptReporter,
        _attempt: u32,
    ) -> Result<ExecutionOutput, ExecutionFailure> {
        let mut output = ExecutionOutput::new(action.payload.clone());
        output
            .metadata
            .insert("executor".to_string(), "dry-run".to_string());
        Ok(output)
    }
}

/// Asks on the terminal: prompt on stderr, answer on stdin.
struct TerminalChannel;

#[async_trait]
impl HumanChannel for TerminalChannel {
    async fn request(
        &self,
        request: &ReviewRequest,
        timeout: Duration,
    ) -> std::result::Result<ChannelResponse, ChannelError> {
        let prompt = format!(
            "[{}] {}\n  {}\nApprove within {}s? [y/N] ",
            request.kind,
            request.target,
            request.reason,
            timeout.as_secs()
        );

        let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            let mut stderr = std::io::stderr();
            stderr.write_all(prompt.as_bytes())?;
            stderr.flush()?;
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            Ok(line)
        })
        .await
        .map_err(|e| ChannelError::Unavailable(e.to_string()))??;

        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => Ok(ChannelResponse::Approve),
            _ => Ok(ChannelResponse::Reject {
                reason: "declined at the terminal".to_string(),
            }),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    tracing::debug!(mode = %config.policy.mode, max_attempts = config.policy.max_attempts, "Config loaded");

    match cli.command {
        Commands::Assess {
            kind,
            target,
            backup,
        } => {
            let mut action = build_action(kind, target, String::new());
            action.backup_available = backup;
            let classifier = RiskClassifier::new(&config.policy)?;
            print_json(&classifier.assess(&action))
        }
        Commands::Check {
            payload,
            target,
            kind,
            mode,
        } => {
            let content = read_payload(&payload)?;
            let target = target.unwrap_or_else(|| payload.display().to_string());
            let action = build_action(kind, target, content);
            let engine = ComplianceEngine::new(&config.policy)?;
            let mode = mode.map(Into::into).unwrap_or(engine.default_mode());
            let report = engine.evaluate(&action, &ActionContext::new(), mode)?;
            print_json(&report)
        }
        Commands::Submit {
            kind,
            target,
            payload,
            mode,
            yes,
            backup,
        } => {
            let content = match &payload {
                Some(path) => read_payload(path)?,
                None => String::new(),
            };
            let mut action = build_action(kind, target, content);
            action.backup_available = backup;

            let mut context = ActionContext::new();
            context.skip_confirmation = yes;
            context.protection_requested = true;
            let mode = mode.map(Into::into).unwrap_or(config.policy.mode);

            let runtime =
                tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
            let outcome = runtime.block_on(submit(config, action, context, mode))?;
            print_json(&outcome)?;

            if !outcome.report.is_completed() {
                eprintln!("{}", outcome.report.summary());
                std::process::exit(2);
            }
            Ok(())
        }
    }
}

async fn submit(
    config: RuntimeConfig,
    action: Action,
    context: ActionContext,
    mode: EnforcementMode,
) -> Result<guardian_runtime::ProtectionOutcome> {
    let coordinator = GuardianCoordinator::builder(config)
        .channel(Arc::new(TerminalChannel))
        .build()?;
    let service = ProtectionService::start(Arc::new(coordinator), Vec::new());

    let outcome = service
        .submit(action, context, mode, Arc::new(DryRun))
        .await;
    service.shutdown().await;
    Ok(outcome?)
}

fn build_action(kind: KindArg, target: String, payload: String) -> Action {
    match kind {
        KindArg::Execute => Action::execute(target),
        other => Action::new(other.into(), target).with_payload(payload),
    }
}

fn read_payload(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read payload {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
