// Broker side of the chat system
//
// A small in-memory message broker: named queues for point-to-point
// delivery, exchanges plus bindings for group fan-out, a newline-JSON wire
// protocol, and a read-only HTTP admin API for membership listings.

pub mod admin;
pub mod connection;
pub mod engine;
pub mod protocol;
pub mod server;

pub use connection::{BrokerConnection, Channel, DeliveryCallback, TransportError};
pub use engine::Engine;
pub use protocol::{BrokerOp, ClientFrame, ExchangeKind, OpOutcome, ServerFrame};

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// A broker running in this process. Both servers stop when the process
/// exits; there is no graceful shutdown beyond that.
pub struct RunningBroker {
    pub addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub engine: Arc<Engine>,
}

/// Bind the wire-protocol and admin listeners and start serving. Pass
/// port 0 to bind an ephemeral port (used by the integration tests).
pub async fn start(
    bind: &str,
    admin_bind: &str,
    admin_user: &str,
    admin_password: &str,
) -> Result<RunningBroker> {
    let engine = Arc::new(Engine::new());

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind broker listener on {bind}"))?;
    let addr = listener.local_addr()?;

    let admin_listener = TcpListener::bind(admin_bind)
        .await
        .with_context(|| format!("failed to bind admin listener on {admin_bind}"))?;
    let admin_addr = admin_listener.local_addr()?;

    let router = admin::router(engine.clone(), admin_user, admin_password);
    tokio::spawn(async move {
        if let Err(e) = admin::serve(admin_listener, router).await {
            tracing::error!("admin API stopped: {}", e);
        }
    });

    let server_engine = engine.clone();
    tokio::spawn(server::run(listener, server_engine));

    tracing::info!("broker listening on {}, admin API on {}", addr, admin_addr);

    Ok(RunningBroker {
        addr,
        admin_addr,
        engine,
    })
}
