//! Spinroom - spin a wheel of names together
//!
//! `spinroom serve` runs a room store. `spinroom play` runs a wheel in the
//! terminal, hosting or watching a room when a store is reachable and
//! falling back to a purely local wheel otherwise.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use spinroom_core::{AppConfig, Role, SpinOrigin, StoreConfig, DEFAULT_ROOMS_PATH};
use spinroom_net::{RemoteStore, StoreServer, DEFAULT_PORT};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod clipboard;
mod commands;
mod error;
mod session;
mod sync;

use commands::Command;
use error::{Error, Result};
use session::{ActionOutcome, SessionEvent, SessionHandle, UserAction, WheelSession};
use sync::SyncEngine;

#[derive(Parser)]
#[command(name = "spinroom", version, about = "Spin a wheel of names together")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run a room store server
    Serve {
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Run a wheel session in this terminal
    Play {
        /// Config file (defaults to the platform config directory)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Room store address, overrides the config file
        #[arg(long, env = "SPINROOM_STORE")]
        store: Option<String>,
        /// Watch this room instead of hosting a new one
        #[arg(long)]
        join: Option<String>,
    },
}

fn main() {
    // Logs go to stderr so they don't interleave with the prompt
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
    let result = runtime.block_on(async move {
        match cli.command {
            CliCommand::Serve { port } => serve(port).await,
            CliCommand::Play {
                config,
                store,
                join,
            } => play(config, store, join).await,
        }
    });

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn serve(port: u16) -> Result<()> {
    let server = StoreServer::start(port).await?;
    println!("Room store listening on {}", server.addr());

    tokio::signal::ctrl_c()
        .await
        .map_err(spinroom_net::Error::from)?;
    server.shutdown();
    Ok(())
}

async fn play(
    config_path: Option<PathBuf>,
    store_addr: Option<String>,
    join: Option<String>,
) -> Result<()> {
    let mut config = AppConfig::load_or_default(config_path.as_deref());
    if let Some(address) = store_addr {
        let rooms_path = config
            .store
            .as_ref()
            .map(|s| s.rooms_path.clone())
            .unwrap_or_else(|| DEFAULT_ROOMS_PATH.to_string());
        config.store = Some(StoreConfig {
            address,
            rooms_path,
        });
    }

    let sync = connect_store(&config).await;
    let (mut session, events) = WheelSession::new(sync, config.sync.clone());
    info!(session = %session.context().session_id, "Starting Spinroom");

    let printer = tokio::spawn(print_events(events));

    if let Err(e) = session.startup(join.as_deref()).await {
        println!("{}", e);
    }
    if !session.context().store_available() {
        println!("No room store, running a local wheel.");
    }

    let (handle, task) = SessionHandle::spawn(session);
    repl(&handle).await;

    drop(handle);
    let _ = task.await;
    let _ = printer.await;
    Ok(())
}

/// Connect to the configured store, or `None` for local mode
async fn connect_store(config: &AppConfig) -> Option<SyncEngine<RemoteStore>> {
    let store_config = config.usable_store()?;
    match RemoteStore::connect(&store_config.address).await {
        Ok(store) => Some(SyncEngine::new(
            store,
            store_config.rooms_path.clone(),
            config.sync.spin_event_ttl(),
        )),
        Err(e) => {
            warn!(
                address = %store_config.address,
                error = %e,
                "Room store unavailable, running in local mode"
            );
            None
        }
    }
}

async fn repl(handle: &SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Type 'help' for commands.");

    while let Ok(Some(line)) = lines.next_line().await {
        let command = match commands::parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        let action = match command {
            Command::Quit => break,
            Command::Help => {
                println!("{}", commands::HELP);
                continue;
            }
            Command::Clear => {
                println!("Clear all names? [y/N]");
                let confirmed = matches!(
                    lines.next_line().await,
                    Ok(Some(answer)) if commands::is_confirmation(&answer)
                );
                UserAction::ClearAll { confirmed }
            }
            Command::Action(action) => action,
        };

        match handle.perform(action).await {
            Ok(outcome) => report(outcome),
            Err(Error::Wheel(spinroom_core::Error::ConfirmationRequired)) => {
                println!("Nothing cleared.")
            }
            Err(Error::SessionClosed) => break,
            Err(e) => println!("{}", e),
        }
    }
}

fn report(outcome: ActionOutcome) {
    match outcome {
        ActionOutcome::Done | ActionOutcome::Room(Some(_)) => {}
        ActionOutcome::Removed(name) => println!("Removed {}", name),
        ActionOutcome::SpinStarted(message) => {
            println!("Spinning for {:.1}s...", message.duration / 1000.0)
        }
        ActionOutcome::Room(None) => println!("No room store available, still local."),
        ActionOutcome::RoomId(room_id) => match clipboard::copy_text(room_id.as_str()) {
            Some(backend) => println!("Copied {} ({})", room_id, backend),
            None => println!("Room id: {}", room_id),
        },
        ActionOutcome::Status(status) => println!("{}", status),
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::RoomEntered {
                room_id,
                role: Role::Host,
            } => println!("Hosting room {}. Share the id with viewers.", room_id),
            SessionEvent::RoomEntered { room_id, .. } => println!("Watching room {}", room_id),
            SessionEvent::RoomLost => println!("Lost the room store, continuing locally."),
            SessionEvent::Synced { diff, wheel } => {
                if diff.names {
                    println!("Names: {}", wheel.names.join(", "));
                }
                if diff.winner {
                    if let Some(winner) = &wheel.winner {
                        println!("Winner: {}!", winner);
                    }
                }
                if diff.viewers {
                    println!("Viewers: {}", wheel.viewers);
                }
            }
            SessionEvent::SpinStarted {
                origin: SpinOrigin::Remote,
                message,
            } => println!("Host spins ({:.1}s)...", message.duration / 1000.0),
            SessionEvent::SpinStarted { .. } => {}
            SessionEvent::SpinFinished {
                winner: Some(winner),
                ..
            } => println!("Winner: {}!", winner),
            SessionEvent::SpinFinished { winner: None, .. } => {
                println!("The wheel stopped with no names on it.")
            }
        }
    }
}
