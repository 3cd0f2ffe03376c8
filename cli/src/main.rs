use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use kindred_core::{AppAction, AppState, ChatBackend, FfiApp, MemoryBackend, MessageDeliveryState};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "kindred")]
#[command(about = "Drive the messaging core against an in-memory backend")]
struct Cli {
    /// Data directory (config file and logs live here)
    #[arg(long, default_value = ".kindred-cli")]
    state_dir: PathBuf,

    /// Local participant id
    #[arg(long, env = "KINDRED_SELF_ID", default_value = "patient-1")]
    self_id: String,

    /// Peer participant id
    #[arg(long, default_value = "therapist-1")]
    peer: String,

    /// How long to wait for the core to settle, in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open a conversation, send messages, and print the resulting view
    Simulate {
        /// Message body to send (repeatable)
        #[arg(long)]
        message: Vec<String>,

        /// Attach an appointment reference to every message
        #[arg(long)]
        appointment: Option<String>,

        /// Number of creates the backend should reject
        #[arg(long, default_value_t = 0)]
        fail_sends: u32,

        /// Disable realtime push so delivery relies on create responses and polling
        #[arg(long)]
        no_push: bool,

        /// Seed this many messages from the peer before opening
        #[arg(long, default_value_t = 0)]
        seed_history: usize,
    },

    /// Deliver incoming messages, then print unread counts before and after focusing
    Unread {
        /// Number of incoming messages
        #[arg(long, default_value_t = 3)]
        incoming: usize,
    },

    /// Print the canonical key for a participant pair
    Key { a: String, b: String },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.state_dir)
        .with_context(|| format!("create state dir {}", cli.state_dir.display()))?;

    match &cli.cmd {
        Command::Simulate {
            message,
            appointment,
            fail_sends,
            no_push,
            seed_history,
        } => cmd_simulate(
            &cli,
            message,
            appointment.as_deref(),
            *fail_sends,
            *no_push,
            *seed_history,
        ),
        Command::Unread { incoming } => cmd_unread(&cli, *incoming),
        Command::Key { a, b } => {
            print(&json!({ "conversation_key": kindred_core::conversation_key(a, b) }));
            Ok(())
        }
    }
}

fn print(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()));
}

fn start_app(cli: &Cli, backend: &MemoryBackend) -> Arc<FfiApp> {
    FfiApp::with_backend(
        cli.state_dir.to_string_lossy().to_string(),
        cli.self_id.clone(),
        Arc::new(backend.clone()) as Arc<dyn ChatBackend>,
    )
}

fn wait_for(
    app: &FfiApp,
    timeout: Duration,
    what: &str,
    mut f: impl FnMut(&AppState) -> bool,
) -> anyhow::Result<AppState> {
    let start = Instant::now();
    loop {
        let state = app.state();
        if f(&state) {
            return Ok(state);
        }
        if start.elapsed() >= timeout {
            return Err(anyhow!("timed out waiting for {what}"));
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}

fn open(cli: &Cli, app: &FfiApp) -> anyhow::Result<()> {
    app.dispatch(AppAction::OpenConversation {
        peer_id: cli.peer.clone(),
    });
    app.dispatch(AppAction::ConversationFocused {
        peer_id: cli.peer.clone(),
    });
    wait_for(
        app,
        Duration::from_millis(cli.timeout_ms),
        "history",
        |s| {
            s.conversation
                .as_ref()
                .is_some_and(|c| c.peer_id == cli.peer && !c.loading_older)
        },
    )?;
    Ok(())
}

fn cmd_simulate(
    cli: &Cli,
    messages: &[String],
    appointment: Option<&str>,
    fail_sends: u32,
    no_push: bool,
    seed_history: usize,
) -> anyhow::Result<()> {
    let backend = MemoryBackend::new();
    backend.set_push_enabled(!no_push);
    let base = kindred_core::now_millis() - (seed_history as i64) * 60_000;
    for i in 0..seed_history {
        backend.insert_message(
            &cli.peer,
            &cli.self_id,
            &format!("history {}", i + 1),
            base + (i as i64) * 60_000,
        );
    }
    backend.fail_next_creates(fail_sends);

    let app = start_app(cli, &backend);
    open(cli, &app)?;

    for body in messages {
        app.dispatch(AppAction::SendMessage {
            body: body.clone(),
            appointment_ref: appointment.map(str::to_string),
        });
    }

    // Settled once no entry is still in flight or waiting out its grace delay.
    let timeout = Duration::from_millis(cli.timeout_ms);
    let state = wait_for(&app, timeout, "sends to settle", |s| {
        s.conversation.as_ref().is_some_and(|c| {
            c.messages().all(|m| {
                matches!(
                    m.delivery,
                    MessageDeliveryState::Delivered | MessageDeliveryState::Failed { .. }
                )
            })
        })
    })?;

    let view = state
        .conversation
        .ok_or_else(|| anyhow!("conversation closed unexpectedly"))?;
    let failed = view
        .messages()
        .filter(|m| matches!(m.delivery, MessageDeliveryState::Failed { .. }))
        .count();
    tracing::info!(failed, create_calls = backend.create_calls(), "simulation settled");
    print(&json!({
        "conversation": view,
        "create_calls": backend.create_calls(),
        "failed": failed,
    }));
    Ok(())
}

fn cmd_unread(cli: &Cli, incoming: usize) -> anyhow::Result<()> {
    let backend = MemoryBackend::new();
    let app = start_app(cli, &backend);
    let timeout = Duration::from_millis(cli.timeout_ms);
    wait_for(&app, timeout, "startup", |s| s.rev >= 1)?;

    for i in 0..incoming {
        let msg = backend.deliver_incoming(&cli.peer, &cli.self_id, &format!("incoming {}", i + 1));
        app.push_message(msg);
    }
    let before = wait_for(&app, timeout, "unread counts", |s| {
        s.unread.count_for(&cli.peer) as usize == incoming
    })?;

    open(cli, &app)?;
    let after = wait_for(&app, timeout, "read through", |s| {
        s.unread.count_for(&cli.peer) == 0
            && backend.unread_from(&cli.peer, &cli.self_id) == 0
    })?;

    print(&json!({
        "before": before.unread,
        "after": after.unread,
    }));
    Ok(())
}
