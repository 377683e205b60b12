mod events;

use anyhow::Result;
use clap::Parser;

use broadside::{MatchServer, ServerConfig, TurnRelay};

#[derive(Parser)]
#[command(name = "broadside-server")]
#[command(about = "Broadside match server")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = broadside::DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        ..Default::default()
    };

    let server = MatchServer::bind(config, TurnRelay::new()).await?;
    let mut handle = server.spawn();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                break;
            }
            event = handle.next_event() => match event {
                Some(event) => events::log_event(&event),
                None => break,
            },
        }
    }

    log::info!("Server shutting down");
    handle.shutdown().await;
    Ok(())
}
