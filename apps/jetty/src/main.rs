use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use jetty::client::{ClientEvent, WorkspaceClient};
use jetty::config::Config;
use jetty::persist::JsonLayoutStore;
use jetty::telemetry::logging::{self, LogConfig, LogLevel};
use jetty::transport::Transport;
use jetty::transport::websocket::{WebSocketConfig, WebSocketTransport};

#[derive(Parser, Debug)]
#[command(name = "jetty", about = "Multi-device terminal workspace client")]
struct Cli {
    /// Workspace server address (host:port or ws:// url)
    #[arg(long, short = 's', env = "JETTY_SERVER")]
    server: Option<String>,

    /// Override the layout/session state file
    #[arg(long)]
    state_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(server) = cli.server {
        config.server = server;
    }
    if let Some(path) = cli.state_file {
        config.state_path = path;
    }

    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file,
    })
    .context("failed to initialize logging")?;

    let mut ws_config = WebSocketConfig::new(config.server.clone());
    ws_config.max_attempts = config.reconnect_max_attempts;
    let (transport, events) = WebSocketTransport::spawn(ws_config);
    let transport: Arc<dyn Transport> = transport;

    let layout_store = Box::new(JsonLayoutStore::new(config.state_path.clone()));
    let (client, mut ui_rx) = WorkspaceClient::new(transport, layout_store);

    let server = config.server.clone();
    tokio::spawn(async move {
        while let Some(event) = ui_rx.recv().await {
            match event {
                ClientEvent::ConnectionLost => {
                    eprintln!("jetty: disconnected from {server}");
                }
                ClientEvent::ConnectionRestored => {
                    eprintln!("jetty: connected");
                }
                _ => {}
            }
        }
    });

    client.run(events).await.context("client loop failed")
}
