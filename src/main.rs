use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;

use hookstream::banner::{BannerInfo, print_banner};
use hookstream::client::{ClientConfig, ReconnectingClient, WsConnector};
use hookstream::consts::{
    DEFAULT_BIND, DEFAULT_BUFFER_CAPACITY, DEFAULT_OUTBOUND_QUEUE, DEFAULT_SERVER_URL,
    DEFAULT_STREAM_URL, default_db_path,
};
use hookstream::events::ClientEvent;
use hookstream::hook::HookEvent;
use hookstream::logging;
use hookstream::prefs::Preferences;
use hookstream::server::http::{self, AppState};
use hookstream::server::{Hub, ServerConfig};
use hookstream::store::sqlite::SqliteEventStore;

#[derive(Parser)]
#[command(
    name = "hookstream",
    version,
    about = "Live fan-out of agent hook events to windowed observers."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Debug-level logs for hookstream (RUST_LOG still wins)
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Accept hook events over HTTP and stream them to WebSocket observers
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = DEFAULT_BIND)]
        bind: SocketAddr,

        /// SQLite database for stored events (use :memory: for ephemeral)
        #[arg(short, long)]
        db: Option<String>,

        /// Events kept in memory for new subscribers
        #[arg(short, long, default_value_t = DEFAULT_BUFFER_CAPACITY)]
        capacity: usize,

        /// Per-connection send deadline during a broadcast, in milliseconds
        #[arg(long, default_value_t = 1000)]
        send_timeout_ms: u64,

        /// Outbound frames queued per connection before sends start failing
        #[arg(long, default_value_t = DEFAULT_OUTBOUND_QUEUE)]
        queue: usize,
    },
    /// Follow the live stream in the terminal
    Watch {
        /// Stream endpoint
        #[arg(short, long, default_value = DEFAULT_STREAM_URL)]
        url: String,

        /// Window size; stored as the new default when given
        #[arg(short, long)]
        max_events: Option<usize>,

        /// SQLite database for preferences
        #[arg(short, long)]
        db: Option<String>,

        /// Delay between reconnect attempts, in milliseconds
        #[arg(long, default_value_t = 3000)]
        reconnect_ms: u64,
    },
    /// Post a single hook event to a running server
    Emit {
        /// Server base URL
        #[arg(short, long, default_value = DEFAULT_SERVER_URL)]
        server: String,

        #[arg(long)]
        source_app: String,

        #[arg(long)]
        session_id: String,

        /// Hook event type, e.g. PreToolUse
        #[arg(short = 't', long = "type")]
        hook_event_type: String,

        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// Optional one-line summary
        #[arg(long)]
        summary: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Command::Serve {
            bind,
            db,
            capacity,
            send_timeout_ms,
            queue,
        } => {
            let config = ServerConfig {
                bind,
                buffer_capacity: capacity,
                send_timeout: Duration::from_millis(send_timeout_ms),
                outbound_queue: queue,
            };
            handle_serve(config, db).await
        }
        Command::Watch {
            url,
            max_events,
            db,
            reconnect_ms,
        } => {
            let config = ClientConfig {
                reconnect_delay: Duration::from_millis(reconnect_ms),
            };
            handle_watch(url, max_events, db, config).await
        }
        Command::Emit {
            server,
            source_app,
            session_id,
            hook_event_type,
            payload,
            summary,
        } => {
            let payload = serde_json::from_str(&payload).context("--payload is not valid JSON")?;
            let mut event = HookEvent::new(source_app, session_id, hook_event_type, payload);
            if let Some(summary) = summary {
                event = event.with_field("summary", summary.into());
            }
            handle_emit(&server, &event).await
        }
    }
}

/// Resolve `--db`, creating `~/.hookstream` for the default location.
fn resolve_db(db: Option<String>) -> Result<String> {
    if let Some(db) = db {
        return Ok(db);
    }
    let path = default_db_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    path.to_str()
        .map(str::to_owned)
        .context("database path is not valid UTF-8")
}

async fn handle_serve(config: ServerConfig, db: Option<String>) -> Result<()> {
    let db = resolve_db(db)?;
    let store = Arc::new(SqliteEventStore::open(&db)?);
    let hub = Arc::new(Hub::new(store, &config));
    let warmed = hub.warm().await?;

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    print_banner(&BannerInfo {
        bind: config.bind,
        store: if db == ":memory:" { "ephemeral" } else { &db },
        capacity: config.buffer_capacity,
        warmed,
    });
    tracing::info!(addr = %config.bind, warmed, "listening");

    let state = AppState {
        hub,
        outbound_queue: config.outbound_queue,
    };
    http::serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    println!("goodbye.");
    Ok(())
}

async fn handle_watch(
    url: String,
    max_events: Option<usize>,
    db: Option<String>,
    config: ClientConfig,
) -> Result<()> {
    let prefs = Preferences::open(&resolve_db(db)?)?;
    let max = match max_events {
        Some(n) => prefs.set_max_events(n)?,
        None => prefs.max_events()?,
    };

    let connector = Arc::new(WsConnector::new(url.clone()));
    let client = ReconnectingClient::spawn(connector, max, config);
    let mut updates = client.subscribe();

    println!("watching {url} (window {max}); commands: max <n>, show, clear, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(ClientEvent::Received(event)) => println!("{}", describe(&event)),
                Ok(ClientEvent::Baseline { count }) => println!("-- baseline: {count} event(s)"),
                Ok(ClientEvent::StateChanged(state)) => println!("-- {state:?}"),
                Ok(ClientEvent::ServerError(message)) => eprintln!("server error: {message}"),
                Err(RecvError::Lagged(n)) => eprintln!("(skipped {n} updates)"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_command(line.trim(), &client, &prefs).await? {
                        break;
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    eprintln!("input error: {e}");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

/// Returns false when the watcher should exit.
async fn handle_command(
    line: &str,
    client: &ReconnectingClient,
    prefs: &Preferences,
) -> Result<bool> {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (None, _) => {}
        (Some("quit" | "exit"), _) => return Ok(false),
        (Some("show"), _) => {
            let events = client.events().await;
            println!("-- window: {} / {}", events.len(), client.max_events().await);
            for event in &events {
                println!("{}", describe(event));
            }
        }
        (Some("clear"), _) => client.clear().await,
        (Some("max"), Some(n)) => match n.parse::<usize>() {
            Ok(n) => {
                let n = prefs.set_max_events(n)?;
                client.set_max_events(n).await;
                println!("-- window size {n}");
            }
            Err(_) => eprintln!("max expects a number, got {n:?}"),
        },
        _ => eprintln!("commands: max <n>, show, clear, quit"),
    }
    Ok(true)
}

fn describe(event: &HookEvent) -> String {
    let mut line = format!(
        "[{}] {} {} {}",
        event.id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
        event.source_app,
        event.session_id.chars().take(8).collect::<String>(),
        event.hook_event_type,
    );
    if let Some(summary) = event.extra.get("summary").and_then(|s| s.as_str()) {
        line.push_str(" | ");
        line.push_str(summary);
    }
    line
}

async fn handle_emit(server: &str, event: &HookEvent) -> Result<()> {
    let url = format!("{}/events", server.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .json(event)
        .send()
        .await
        .with_context(|| format!("failed to reach {url}"))?;

    let status = response.status();
    let body: serde_json::Value = response.json().await.context("unreadable response")?;
    if !status.is_success() {
        bail!("server rejected event ({status}): {body}");
    }
    println!("stored as {}", body["id"]);
    Ok(())
}
