// src/lib.rs

pub mod cli;
pub mod command;
pub mod config;
pub mod connection;
pub mod defs;
pub mod errors;
pub mod logging;
pub mod mirror;
pub mod observer;
pub mod queue;
pub mod registry;
pub mod session;
pub mod task;
pub mod types;
pub mod wire;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info};

use crate::cli::{CliArgs, Command, RunArgs};
use crate::command::{CommandTarget, command_tokens};
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::errors::SuitelinkError;
use crate::observer::{ChannelObserver, LoggingObserver, ObservedEvent, SessionEvent};
use crate::registry::ServerRegistry;
use crate::session::{QueueState, SessionHandle, SessionSnapshot};
use crate::task::{Task, TaskKind, TaskRef, TaskStatus};
use crate::types::{Activity, ConnectState};
use crate::wire::FileKind;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - one session per selected server
/// - the subcommand itself
/// - ordered shutdown of every session
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    match args.command {
        Command::Check => {
            print_check(&cfg);
            Ok(())
        }
        Command::Run(run_args) => run_on_server(&cfg, run_args).await,
        Command::Watch { server } => watch(&cfg, server.as_deref()).await,
        Command::Suites { server } => print_suites(&cfg, &server).await,
        Command::File { server, node, kind } => {
            fetch_file(&cfg, &server, &node, kind.into()).await
        }
    }
}

fn print_check(cfg: &ConfigFile) {
    println!("servers:");
    for server in cfg.servers.values() {
        let filter = if server.suite_filter.enabled {
            format!(" suites={:?}", server.suite_filter.suites)
        } else {
            String::new()
        };
        println!(
            "  {} {}@{}{}{}",
            server.name,
            server.host,
            server.port,
            if server.ssl { " ssl" } else { "" },
            filter
        );
    }
    if !cfg.commands.is_empty() {
        println!("commands:");
        for (name, template) in cfg.commands.iter() {
            println!("  {name} = {template}");
        }
    }
}

/// Registry with only `name` running.
fn single_server(cfg: &ConfigFile, name: &str) -> Result<ServerRegistry> {
    let server = cfg
        .servers
        .get(name)
        .ok_or_else(|| SuitelinkError::ServerNotFound(name.to_string()))?;
    let mut registry =
        ServerRegistry::with_commands(command::CommandRegistry::from_map(cfg.commands.clone()));
    registry.add_configured(server, &cfg.client)?;
    Ok(registry)
}

fn session<'a>(registry: &'a ServerRegistry, name: &str) -> Result<&'a SessionHandle> {
    registry
        .find(name)
        .ok_or_else(|| anyhow!(SuitelinkError::ServerNotFound(name.to_string())))
}

/// How long to wait for the initial reset.
fn ready_limit(cfg: &ConfigFile) -> Duration {
    Duration::from_secs(cfg.client.timeout.saturating_mul(2).max(1))
}

/// Wait until the initial reset has finished, then require a live
/// connection.
async fn wait_until_ready(handle: &SessionHandle, limit: Duration) -> Result<SessionSnapshot> {
    let (observer, mut events) = ChannelObserver::channel();
    let id = handle.subscribe(Box::new(observer)).await?;

    let waited = tokio::time::timeout(limit, settled_snapshot(handle, &mut events)).await;

    handle.unsubscribe(id).await?;

    let snapshot = waited
        .map_err(|_| anyhow!("server '{}' did not answer within {limit:?}", handle.name()))??;
    if snapshot.connect_state != ConnectState::Normal {
        bail!(
            "server '{}' is not reachable: {}",
            handle.name(),
            snapshot.connect_error.as_deref().unwrap_or("no connection")
        );
    }
    debug!(server = %handle.name(), suites = snapshot.mirrored_suites.len(), "server ready");
    Ok(snapshot)
}

async fn settled_snapshot(
    handle: &SessionHandle,
    events: &mut tokio::sync::mpsc::UnboundedReceiver<ObservedEvent>,
) -> errors::Result<SessionSnapshot> {
    loop {
        let snapshot = handle.snapshot().await?;
        if snapshot.queue_state != QueueState::ResetState
            && snapshot.activity != Activity::LoadActivity
        {
            return Ok(snapshot);
        }
        if events.recv().await.is_none() {
            return Err(SuitelinkError::SessionClosed(handle.name().to_string()));
        }
    }
}

/// Wait for a task and turn a failure into an error.
async fn task_text(task: &TaskRef) -> Result<String> {
    match task.wait().await {
        TaskStatus::Finished => Ok(task.text()),
        status => bail!(
            "{} task {:?}: {}",
            task.kind(),
            status,
            task.error_message().unwrap_or_default()
        ),
    }
}

async fn run_on_server(cfg: &ConfigFile, args: RunArgs) -> Result<()> {
    let mut registry = single_server(cfg, &args.server)?;
    let outcome = send_command(cfg, &registry, &args).await;
    registry.shutdown_all().await?;
    outcome
}

async fn send_command(cfg: &ConfigFile, registry: &ServerRegistry, args: &RunArgs) -> Result<()> {
    let handle = session(registry, &args.server)?;
    wait_until_ready(handle, ready_limit(cfg)).await?;

    let target = match &args.node {
        Some(path) => CommandTarget::node(&args.server, path),
        None => CommandTarget::server(&args.server),
    };

    let tasks = match args.tokens.as_slice() {
        [name] if registry.commands().contains(name) => {
            registry.command(&[target], name, true).await?
        }
        tokens => {
            let tokens = command_tokens(tokens, &target);
            handle.run_command(tokens).await?.into_iter().collect()
        }
    };

    if tasks.is_empty() {
        bail!("server '{}' is disconnected; command not sent", args.server);
    }
    for task in tasks.iter() {
        let text = task_text(task).await?;
        if !text.is_empty() {
            println!("{text}");
        }
    }
    Ok(())
}

async fn print_suites(cfg: &ConfigFile, server: &str) -> Result<()> {
    let mut registry = single_server(cfg, server)?;
    let outcome = suite_list(cfg, &registry, server).await;
    registry.shutdown_all().await?;
    let suites = outcome?;
    for name in suites {
        println!("{name}");
    }
    Ok(())
}

async fn suite_list(cfg: &ConfigFile, registry: &ServerRegistry, server: &str) -> Result<Vec<String>> {
    let handle = session(registry, server)?;
    let (observer, mut events) = ChannelObserver::channel();
    handle.subscribe(Box::new(observer)).await?;

    let snapshot = wait_until_ready(handle, ready_limit(cfg)).await?;
    if !snapshot.suite_filter.loaded.is_empty() {
        return Ok(snapshot.suite_filter.loaded);
    }

    // The suite list follows the reset; it may not have arrived yet.
    let arrived = tokio::time::timeout(ready_limit(cfg), async {
        while let Some(observed) = events.recv().await {
            if matches!(observed.event, SessionEvent::SuiteFilterChanged) {
                return true;
            }
        }
        false
    })
    .await;
    if matches!(arrived, Ok(true)) {
        return Ok(handle.snapshot().await?.suite_filter.loaded);
    }
    Ok(Vec::new())
}

async fn fetch_file(cfg: &ConfigFile, server: &str, node: &str, kind: FileKind) -> Result<()> {
    let mut registry = single_server(cfg, server)?;
    let outcome = file_text(cfg, &registry, server, node, kind).await;
    registry.shutdown_all().await?;
    println!("{}", outcome?);
    Ok(())
}

async fn file_text(
    cfg: &ConfigFile,
    registry: &ServerRegistry,
    server: &str,
    node: &str,
    kind: FileKind,
) -> Result<String> {
    let handle = session(registry, server)?;
    wait_until_ready(handle, ready_limit(cfg)).await?;

    let task_kind = match kind {
        FileKind::Script => TaskKind::Script,
        FileKind::Job => TaskKind::Job,
        FileKind::Jobout => TaskKind::Output,
        FileKind::Manual => TaskKind::Manual,
    };
    let task = Task::for_node(task_kind, node);
    handle.run(task.clone()).await?;
    task_text(&task).await
}

async fn watch(cfg: &ConfigFile, only: Option<&str>) -> Result<()> {
    let mut registry = match only {
        Some(name) => single_server(cfg, name)?,
        None => ServerRegistry::from_config(cfg)?,
    };

    for name in registry.names() {
        let handle = session(&registry, &name)?;
        handle.subscribe(Box::new(LoggingObserver)).await?;
    }
    info!(servers = ?registry.names(), "watching; press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("failed to listen for Ctrl+C: {e}");
    }

    info!("shutting down sessions");
    registry.shutdown_all().await?;
    Ok(())
}
