//! Switchyard - Entry point
//!
//! Runs a room-based chat server: a client connecting to `/chat/<room>`
//! joins `<room>`, and every text message it sends is relayed to the other
//! members of that room.

use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

use switchyard_config::ConfigLoader;
use switchyard_server::{Server, ServerConfig};
use switchyard_telemetry::init_telemetry;
use switchyard_ws::{Connection, UpgradeRequest, WsError, WsServer};

const DEFAULT_CONFIG_FILE: &str = "switchyard.toml";
const ENV_PREFIX: &str = "SWITCHYARD";
const CHAT_ROUTE: &str = "/chat/*";

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("switchyard {}", env!("CARGO_PKG_VERSION"));
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Switchyard - WebSocket chat server

USAGE:
    switchyard [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
                           (default: ./switchyard.toml when present)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    SWITCHYARD__SERVER__HTTP_ADDR                Listen address (default: 0.0.0.0:8080)
    SWITCHYARD__WEBSOCKET__MAX_CONNECTIONS       Connection limit (default: 10000)
    SWITCHYARD__WEBSOCKET__ALLOWED_ORIGINS       Comma-separated origin rules
    SWITCHYARD__TELEMETRY__LOGGING__LEVEL        Log filter (default: info)

    A .env file in the working directory is loaded first.

EXAMPLES:
    # Run with configuration file
    switchyard --config /etc/switchyard/switchyard.toml

    # Connect to a room
    websocat ws://localhost:8080/chat/lobby
"
    );
}

/// `/chat/<room>` joins `<room>` and relays text to the rest of it.
fn chat_engine(ws: &WsServer) {
    ws.route(CHAT_ROUTE, |conn: Connection, req: UpgradeRequest| async move {
        let room = req.path().trim_start_matches("/chat/").to_string();
        if room.is_empty() {
            conn.close(1008u16, "room name required");
            return Ok::<(), WsError>(());
        }

        conn.join(&room);
        info!(connection_id = %conn.id(), room = %room, "Joined room");

        conn.on_message(move |conn, msg| {
            if msg.is_text() {
                conn.broadcast_to_room(&room, msg.clone());
            }
        });
        Ok(())
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let loader = ConfigLoader::new()
        .with_defaults()
        .with_dotenv()
        .context("failed to load .env")?;
    let loader = match &args.config {
        Some(path) => loader
            .with_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => loader.with_optional_file(DEFAULT_CONFIG_FILE)?,
    };
    let config = loader
        .with_env_prefix(ENV_PREFIX)
        .load()
        .context("invalid configuration")?;

    let metrics = init_telemetry(&config.telemetry.to_telemetry_config())
        .context("failed to initialize telemetry")?;

    let ws = WsServer::new(config.websocket.to_ws_config()?);
    chat_engine(&ws);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.http_addr,
        "Starting Switchyard"
    );

    let mut server = Server::new(ServerConfig::from_config(&config), ws)
        .with_service(&config.telemetry.service_name, env!("CARGO_PKG_VERSION"));
    if let Some(registry) = metrics {
        server = server.with_metrics(registry);
    }

    server.run().await?;
    Ok(())
}
