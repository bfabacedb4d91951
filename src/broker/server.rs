// TCP front end for the broker
//
// One task per connection. Incoming frames are newline-delimited JSON;
// outgoing frames drain through an unbounded channel so the engine never
// blocks on a slow client socket.

use crate::broker::engine::Engine;
use crate::broker::protocol::{ClientFrame, OpOutcome, ServerFrame};
use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Accept connections until the listener task is dropped.
pub async fn run(listener: TcpListener, engine: Arc<Engine>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!("connection from {}", peer);
                let engine = engine.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, engine).await {
                        tracing::warn!("connection error: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::error!("accept failed: {}", e);
                break;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, engine: Arc<Engine>) -> Result<()> {
    let conn_id = Uuid::new_v4();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame.to_bytes() {
                Ok(bytes) => {
                    if write_half.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("failed to encode frame: {}", e),
            }
        }
    });

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match ClientFrame::from_bytes(trimmed.as_bytes()) {
                    Ok(ClientFrame::Request { id, channel, op }) => {
                        let outcome = engine.apply(conn_id, channel, &tx, op);
                        if let OpOutcome::Failed { reason } = &outcome {
                            tracing::debug!("request {} failed: {}", id, reason);
                        }
                        if tx.send(ServerFrame::Response { id, outcome }).is_err() {
                            break;
                        }
                    }
                    Ok(ClientFrame::CloseChannel { channel }) => {
                        engine.close_channel(conn_id, channel);
                    }
                    Err(e) => {
                        tracing::warn!("failed to parse frame: {}", e);
                    }
                }
            }
            Err(e) => {
                tracing::warn!("error reading from client: {}", e);
                break;
            }
        }
    }

    engine.drop_connection(conn_id);
    write_task.abort();
    Ok(())
}
