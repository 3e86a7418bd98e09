//! Binary entry point: parses CLI flags, loads configuration, and runs
//! the gateway until a shutdown signal arrives.

use anyhow::{Context, Result};
use cable_gateway::config::Args;
use cable_gateway::Node;
use clap::Parser;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = args.resolve().context("loading configuration")?;

    let node = Node::new(&config).context("constructing Node")?;

    let (_publisher, mut subscriber) = cable_gateway::pubsub::channel(1024);
    let pubsub_node = node.clone();
    tokio::spawn(async move {
        while let Some(message) = subscriber.recv().await {
            pubsub_node.broadcast(&message.stream, &message.payload);
        }
    });

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding to {}", config.bind_addr))?;
    log::info!("cable-gateway listening on {}", config.bind_addr);

    let accept_node = node.clone();
    let accept_loop = tokio::spawn(async move {
        loop {
            if !accept_node.is_accepting() {
                break;
            }
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let node = accept_node.clone();
                    tokio::spawn(async move {
                        match cable_gateway::ws::accept(stream).await {
                            Ok((writer, reader, handshake)) => {
                                node.accept_session(writer, reader, handshake).await;
                            }
                            Err(e) => {
                                log::warn!("WebSocket handshake with {peer} failed: {e}");
                            }
                        }
                    });
                }
                Err(e) => log::warn!("accept failed: {e}"),
            }
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    log::info!("shutdown signal received, draining {} sessions", node.session_count());
    node.shutdown(config.shutdown_deadline).await;
    accept_loop.abort();

    Ok(())
}
