//! CLI command definitions and dispatch.

use std::path::PathBuf;

use anyhow::{bail, Context};
use base64::Engine;
use clap::{Parser, Subcommand};
use sgn_core::audit::SignatureLog;
use sgn_core::clock::to_datetime;
use sgn_core::pending::PendingAuthorization;
use sgn_core::policy::Approval;
use sgn_core::CoreError;
use sgn_crypto::KeyKind;
use tokio::io::AsyncReadExt;
use tracing::info;

use crate::agent::{Agent, SweepOutcome};
use crate::config::AgentConfig;
use crate::state;

/// Signet agent - answers remote signing requests under local policy
#[derive(Parser, Debug)]
#[command(name = "sgn-agent")]
#[command(version, about = "Signet agent - answers remote signing requests under local policy")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level or filter directive, overrides the config
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the signing identity
    #[command(subcommand)]
    Identity(IdentityCommand),

    /// Email shown alongside the public key
    #[command(subcommand)]
    Email(EmailCommand),

    /// Per-session approval settings
    #[command(subcommand)]
    Policy(PolicyCommand),

    /// Requests waiting for a decision
    #[command(subcommand)]
    Pending(PendingCommand),

    /// Answer every pending request at once
    #[command(subcommand)]
    Sweep(SweepCommand),

    /// Print a session's signature log
    Audit { session: String },

    /// Read one base64 sealed request from stdin and answer it
    Handle {
        /// JSON session descriptor: id, name and base64 key
        #[arg(long)]
        session_file: PathBuf,
    },

    /// Sweep pending requests periodically until interrupted
    Run,
}

#[derive(Subcommand, Debug)]
pub enum IdentityCommand {
    Generate {
        #[arg(long, default_value = "ed25519")]
        kind: KeyKind,
    },
    Show,
    Destroy,
}

#[derive(Subcommand, Debug)]
pub enum EmailCommand {
    Set { email: String },
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommand {
    /// Approve without asking, optionally for a limited time
    Allow {
        session: String,
        /// Seconds the approval lasts
        #[arg(long = "for")]
        duration: Option<u64>,
    },
    Always { session: String },
    Block { session: String },
    /// Back to asking for every request
    Reset { session: String },
    /// Remember a command as approved
    Remember { session: String, command: String },
    Forget { session: String },
    Show { session: String },
}

#[derive(Subcommand, Debug)]
pub enum PendingCommand {
    Last,
    List,
    /// Sign one pending request
    Allow { session: String, request: String },
    /// Refuse one pending request
    Deny { session: String, request: String },
}

#[derive(Subcommand, Debug)]
pub enum SweepCommand {
    /// Answer the requests current policy now allows
    Allow,
    /// Refuse every pending request
    Reject,
}

impl Cli {
    /// Resolve the configuration: file when given, otherwise defaults, with
    /// environment overrides on top of either.
    pub fn load_config(&self) -> anyhow::Result<AgentConfig> {
        self.load_config_with(|name| std::env::var(name).ok())
    }

    pub fn load_config_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::load_from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => AgentConfig::default(),
        };
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    pub async fn execute(self, config: AgentConfig) -> anyhow::Result<()> {
        let agent = Agent::open(config)?;
        execute_command(&agent, self.command).await
    }
}

pub async fn execute_command(agent: &Agent, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Identity(cmd) => identity(agent, cmd),
        Commands::Email(cmd) => {
            match cmd {
                EmailCommand::Set { email } => agent.keys().set_me(&email),
                EmailCommand::Clear => agent.keys().clear_me(),
            }
            Ok(())
        }
        Commands::Policy(cmd) => policy(agent, cmd),
        Commands::Pending(cmd) => pending(agent, cmd).await,
        Commands::Sweep(cmd) => {
            let outcome = agent.sweep(matches!(cmd, SweepCommand::Allow)).await?;
            print_sweep(&outcome);
            Ok(())
        }
        Commands::Audit { session } => {
            for entry in agent.audit().query(&session)? {
                println!(
                    "{}  {}  {}",
                    entry.date.to_rfc3339(),
                    entry.digest,
                    entry.command.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Commands::Handle { session_file } => {
            let session = state::load_session(&session_file)?;
            let mut input = String::new();
            tokio::io::stdin().read_to_string(&mut input).await?;
            let sealed = base64::engine::general_purpose::STANDARD
                .decode(input.trim())
                .map_err(|_| CoreError::DecodingFailed)?;

            let report = agent.handle(session, sealed).await?;
            println!(
                "delivered={} failed={} notified={}",
                report.delivered, report.failed, report.notified
            );
            Ok(())
        }
        Commands::Run => {
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for shutdown signal");
                }
            };
            agent.run(shutdown).await
        }
    }
}

fn identity(agent: &Agent, cmd: IdentityCommand) -> anyhow::Result<()> {
    match cmd {
        IdentityCommand::Generate { kind } => {
            let public = agent.keys().generate(kind)?;
            info!(fingerprint = %public.fingerprint_hex(), "identity generated");
            println!("{}", public.fingerprint_ssh());
        }
        IdentityCommand::Show => {
            let me = agent.keys().me()?;
            let public = agent.keys().public_identity()?;
            println!("fingerprint: {}", public.fingerprint_ssh());
            println!("hex:         {}", me.fingerprint);
            match me.email {
                Some(email) => println!("{} {}", public.authorized_key(), email),
                None => println!("{}", public.authorized_key()),
            }
        }
        IdentityCommand::Destroy => {
            if !agent.keys().destroy() {
                bail!("no identity to destroy");
            }
            println!("identity destroyed");
        }
    }
    Ok(())
}

fn policy(agent: &Agent, cmd: PolicyCommand) -> anyhow::Result<()> {
    let now = agent.now();
    match cmd {
        PolicyCommand::Allow { session, duration } => match duration {
            Some(secs) => agent.update_policy(|p| p.allow_for(&session, now, secs)),
            None => agent.update_policy(|p| p.always_allow(&session)),
        },
        PolicyCommand::Always { session } => agent.update_policy(|p| p.always_allow(&session)),
        PolicyCommand::Block { session } => agent.update_policy(|p| p.block(&session)),
        PolicyCommand::Reset { session } => agent.update_policy(|p| p.reset(&session)),
        PolicyCommand::Remember { session, command } => {
            agent.update_policy(|p| p.allow_command(&session, &command))
        }
        PolicyCommand::Forget { session } => agent.update_policy(|p| {
            p.forget_session(&session);
        }),
        PolicyCommand::Show { session } => {
            let settings = agent
                .authorizer()
                .policy()
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .settings(&session);
            let approval = match settings.approval {
                Approval::Ask => "ask".to_string(),
                Approval::AllowUntil(until) => format!("allow until {}", to_datetime(until).to_rfc3339()),
                Approval::AlwaysAllow => "always allow".to_string(),
                Approval::Block => "block".to_string(),
            };
            println!("approval: {}", approval);
            for command in &settings.allowed_commands {
                println!("remembered: {}", command);
            }
            Ok(())
        }
    }
}

async fn pending(agent: &Agent, cmd: PendingCommand) -> anyhow::Result<()> {
    match cmd {
        PendingCommand::Last => match agent.pending_last()? {
            Some(entry) => print_pending(&entry),
            None => println!("no pending requests"),
        },
        PendingCommand::List => {
            for entry in agent.pending_live()? {
                print_pending(&entry);
            }
        }
        PendingCommand::Allow { session, request } => decide(agent, &session, &request, true).await?,
        PendingCommand::Deny { session, request } => decide(agent, &session, &request, false).await?,
    }
    Ok(())
}

async fn decide(agent: &Agent, session: &str, request: &str, allowed: bool) -> anyhow::Result<()> {
    match agent.resolve(session, request, allowed).await? {
        Some(report) if report.delivered == 1 => {
            println!("{}", if allowed { "signed and sent" } else { "refused" });
            Ok(())
        }
        Some(_) => bail!("answer could not be delivered"),
        None => bail!("no pending request {} for session {}", request, session),
    }
}

fn print_pending(entry: &PendingAuthorization) {
    println!(
        "{}  {}  {}  {}  expires {}",
        entry.session.id,
        entry.session.name,
        entry.request.id,
        entry.request.command.as_deref().unwrap_or("-"),
        to_datetime(entry.expires_at).to_rfc3339()
    );
}

fn print_sweep(outcome: &SweepOutcome) {
    println!(
        "processed={} delivered={} failed={} expired={}",
        outcome.processed,
        outcome.execution.delivered,
        outcome.failed + outcome.execution.failed,
        outcome.expired
    );
}
