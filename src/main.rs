//! Agent Bridge Server
//!
//! Listens for agents, connects to the game and runs matches until stopped.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agent_bridge::{
    game::external::{BallisticPredictor, CommandLauncher, JsonConfigProvider},
    network::server::MatchSource,
    AgentServer, ServerConfig, Services, VERSION,
};

/// Command line arguments. Anything left out comes from `AGENT_BRIDGE_*`
/// environment variables or the built-in defaults.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address agents connect to
    #[clap(long)]
    listen: Option<SocketAddr>,
    /// Address of the game process
    #[clap(long)]
    game: Option<SocketAddr>,
    /// Maximum concurrent agent connections
    #[clap(long)]
    max_connections: Option<usize>,
    /// Match configuration (JSON) to start right away
    #[clap(short, long, env = "AGENT_BRIDGE_MATCH_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::from_env();
    if let Some(listen) = args.listen {
        config.agent_addr = listen;
    }
    if let Some(game) = args.game {
        config.game_addr = game;
    }
    if let Some(max_connections) = args.max_connections {
        config.max_connections = max_connections;
    }

    info!("Agent Bridge Server v{}", VERSION);
    info!("Agents: {}  Game: {}", config.agent_addr, config.game_addr);

    let services = Services {
        launcher: Box::new(CommandLauncher::new(config.game_addr.port())),
        predictor: Box::new(BallisticPredictor::default()),
        provider: Box::new(JsonConfigProvider),
    };

    let server = AgentServer::bind(config.clone(), services)
        .await
        .with_context(|| format!("binding {}", config.agent_addr))?;
    let handle = server.handle();

    if let Some(path) = args.config {
        info!(path = %path.display(), "starting match from file");
        handle.start_match(MatchSource::Path(path));
    }

    tokio::spawn({
        let handle = handle.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received");
                    handle.shutdown();
                }
                Err(e) => error!(error = %e, "could not listen for ctrl-c"),
            }
        }
    });

    server.run().await.context("server stopped with an error")?;
    info!("bye");
    Ok(())
}
