use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tether_agent::cli::{Cli, Command, ConfigCommand};
use tether_agent::pulse::{HookRegistry, PulseScheduler, PulseStore};
use tether_agent::state::{AgentCore, AgentPulseHost, LogBroadcaster};
use tether_domain::config::Config;
use tether_memory::RestMemory;
use tether_providers::traits::NoRealtimeTransport;
use tether_providers::{HttpProvider, LlmProvider};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = Config::load(&cli.config)
                .with_context(|| format!("loading {}", cli.config.display()))?;
            serve(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            match Config::load(&cli.config) {
                Ok(_) => {
                    println!("{}: OK", cli.config.display());
                    Ok(())
                }
                Err(e) => {
                    eprintln!("{}: {e}", cli.config.display());
                    std::process::exit(1);
                }
            }
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = Config::load(&cli.config)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("tether {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tether_agent=debug")),
        )
        .init();
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    let provider = Arc::new(
        HttpProvider::new(&config.llm, config.context.context_tokens)
            .context("constructing LLM provider")?,
    );
    let memory = Arc::new(RestMemory::new(&config.memory).context("constructing memory client")?);

    // The live transport is deployment-specific; without one, live turns
    // fall back to HTTP.
    let core = AgentCore::new(
        config.clone(),
        provider,
        memory,
        Arc::new(NoRealtimeTransport),
    )
    .context("wiring agent core")?;

    // Resolve the context window early so the first turn doesn't pay
    // the model-info round trip.
    let window = core.provider.context_window().await;
    tracing::info!(window, "context window resolved");

    // Pulse scheduler.
    let pulse_store = Arc::new(
        PulseStore::new(&config.storage.state_path, config.pulse.max_queue_size)
            .context("opening pulse store")?,
    );
    let hooks = Arc::new(HookRegistry::new());
    let host = Arc::new(AgentPulseHost::new(core.clone(), Arc::new(LogBroadcaster)));
    let pulse = PulseScheduler::new(
        pulse_store,
        hooks,
        host,
        core.sessions.clone(),
        core.log.clone(),
        config.pulse.clone(),
        core.shutdown.child_token(),
    );
    pulse.start();

    // Realtime janitor.
    let janitor = core.realtime.start_janitor(core.shutdown.child_token());

    tracing::info!("tether agent running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("shutting down");

    pulse.stop().await;
    core.shutdown.cancel();
    let _ = janitor.await;

    Ok(())
}
