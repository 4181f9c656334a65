use clap::Parser;
use tracing::{info, warn};

use beseda::chat::server::ChatServer;

#[derive(Parser, Debug)]
#[command(author, version, about = "Line-oriented multi-client chat relay")]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 8888)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let server = ChatServer::bind(&cli.host, cli.port).await?;
    info!("beseda listening on {}", server.local_addr()?);

    let handle = server.handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install ctrl-c handler: {e}");
            return;
        }
        info!("shutting down");
        handle.stop().await;
    });

    server.run().await?;
    Ok(())
}
