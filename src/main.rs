// src/main.rs — ARF entry point

use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use arf::core::checkpoint::CheckpointStore;
use arf::core::scheduler::Engine;
use arf::docs::FsDocumentStore;
use arf::infra::config::Config;
use arf::infra::{logger, paths};
use arf::pipeline::MarkerPipeline;
use arf::sources::FsInputSource;
use arf::validate::sandbox::{env_count, SandboxExecutor};

#[derive(Parser)]
#[command(name = "arf", version, about = "Autonomous research framework engine")]
struct Cli {
    /// Path to a config file (defaults to $ARF_HOME/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine continuously (the default)
    Run,
    /// Run exactly one cycle, checkpoint, and exit
    Once,
    /// Show the current checkpoint and sandbox state
    Status,
    /// Remove stale sandbox environments
    Clean {
        /// Remove every environment regardless of age
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize logging (respects RUST_LOG)
    logger::init_logging("info");

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?
    } else {
        Config::load()?
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_engine(config, false).await,
        Commands::Once => run_engine(config, true).await,
        Commands::Status => show_status(),
        Commands::Clean { all } => clean_sandboxes(&config, all).await,
    }
}

async fn run_engine(config: Config, single_cycle: bool) -> anyhow::Result<()> {
    paths::ensure_dirs().await?;

    let source = Arc::new(FsInputSource::new(config.engine.input_dir.clone()));
    let pipeline = Arc::new(MarkerPipeline);
    let docs = Arc::new(FsDocumentStore::new(
        config.documents.output_dir.clone(),
        config.documents.main_doc.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    spawn_signal_listener(shutdown_tx);

    let mut engine = Engine::new(
        config,
        paths::checkpoint_path(),
        paths::sandbox_root(),
        source,
        pipeline,
        docs,
        shutdown_rx,
    );

    if single_cycle {
        let summary = engine.run_cycle().await;
        println!(
            "cycle complete: dispatched {}, validated {}, synthesized {}",
            summary.dispatched, summary.validated, summary.synthesized
        );
        if let Some(e) = summary.error {
            anyhow::bail!("cycle finished with error: {e}");
        }
        Ok(())
    } else {
        engine.run_forever().await
    }
}

/// Flip the shutdown flag on SIGINT or SIGTERM. The engine observes it
/// between phases and finishes with a final checkpoint.
fn spawn_signal_listener(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut term =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!("Cannot install SIGTERM handler: {}", e);
                        let _ = ctrl_c.await;
                        let _ = shutdown_tx.send(true);
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        tracing::info!("Termination signal received");
        let _ = shutdown_tx.send(true);
    });
}

fn show_status() -> anyhow::Result<()> {
    let store = CheckpointStore::new(paths::checkpoint_path());
    let state = store.load();

    println!("checkpoint:          {}", store.path().display());
    println!("last saved:          {}", state.last_checkpoint);
    println!("framework version:   {}", state.framework_version);
    println!("processed inputs:    {}", state.processed_inputs.len());
    println!("pending validations: {}", state.pending_validations.len());
    println!("pending questions:   {}", state.pending_questions.len());
    println!("queued comments:     {}", state.comment_queue.len());
    println!("sandbox envs:        {}", env_count(&paths::sandbox_root()));

    if !state.usage_stats.is_empty() {
        println!("backend usage:");
        for (name, usage) in &state.usage_stats {
            println!(
                "  {name}: {} tokens, {} requests ({})",
                usage.tokens_consumed, usage.requests_issued, usage.epoch_day
            );
        }
    }
    Ok(())
}

async fn clean_sandboxes(config: &Config, all: bool) -> anyhow::Result<()> {
    let retention = if all {
        Duration::ZERO
    } else {
        Duration::from_secs(config.sandbox.retention_hours * 3600)
    };
    let executor = SandboxExecutor::new(
        paths::sandbox_root(),
        config.sandbox.interpreter.clone(),
        retention,
    );
    let reaped = executor.reap_stale().await?;
    println!("reclaimed {reaped} sandbox environment(s)");
    Ok(())
}
