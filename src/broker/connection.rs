// Client-side broker connection
//
// One TCP connection multiplexes any number of channels. Requests are
// correlated by id; deliveries are dispatched to the callback registered
// for their (channel, queue) pair. Dropping a `Channel` releases its
// broker-side consumers, so transient probe channels clean up on every
// exit path.

use crate::broker::protocol::{BrokerOp, ClientFrame, ExchangeKind, OpOutcome, ServerFrame};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};

/// Invoked once per inbound delivery. Runs on a blocking worker, so file
/// writes inside the receive pipeline are fine.
pub type DeliveryCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync + 'static>;

/// Transport-level failure talking to the broker.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("broker connection closed")]
    ConnectionClosed,

    #[error("resource not found")]
    NotFound,

    #[error("operation rejected: {0}")]
    Rejected(String),
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<OpOutcome>>>>;
type Consumers = Arc<RwLock<HashMap<(u64, String), DeliveryCallback>>>;

/// A live connection to the broker. Cheap to clone; all clones share the
/// underlying socket.
#[derive(Clone)]
pub struct BrokerConnection {
    out: mpsc::UnboundedSender<ClientFrame>,
    pending: Pending,
    consumers: Consumers,
    next_request: Arc<AtomicU64>,
    next_channel: Arc<AtomicU64>,
}

impl BrokerConnection {
    /// Connect and spawn the reader/writer tasks.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        let (out, mut out_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let consumers: Consumers = Arc::new(RwLock::new(HashMap::new()));

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
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

        let reader_pending = pending.clone();
        let reader_consumers = consumers.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match ServerFrame::from_bytes(trimmed.as_bytes()) {
                            Ok(ServerFrame::Response { id, outcome }) => {
                                let waiter = reader_pending
                                    .lock()
                                    .expect("pending lock poisoned")
                                    .remove(&id);
                                if let Some(tx) = waiter {
                                    let _ = tx.send(outcome);
                                }
                            }
                            Ok(ServerFrame::Deliver {
                                channel,
                                queue,
                                payload,
                            }) => {
                                let callback = reader_consumers
                                    .read()
                                    .expect("consumer lock poisoned")
                                    .get(&(channel, queue.clone()))
                                    .cloned();
                                match callback {
                                    Some(cb) => {
                                        tokio::task::spawn_blocking(move || cb(payload));
                                    }
                                    None => {
                                        tracing::debug!("delivery for unknown consumer {}", queue)
                                    }
                                }
                            }
                            Err(e) => tracing::warn!("failed to parse frame: {}", e),
                        }
                    }
                    Err(e) => {
                        tracing::warn!("broker read error: {}", e);
                        break;
                    }
                }
            }
            // Fail every in-flight request by dropping its waiter.
            reader_pending
                .lock()
                .expect("pending lock poisoned")
                .clear();
        });

        Ok(Self {
            out,
            pending,
            consumers,
            next_request: Arc::new(AtomicU64::new(1)),
            next_channel: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Open a logical channel. Channels are numbered locally; the broker
    /// learns about one the first time it is used.
    pub fn channel(&self) -> Channel {
        Channel {
            id: self.next_channel.fetch_add(1, Ordering::Relaxed),
            conn: self.clone(),
        }
    }

    async fn call(&self, channel: u64, op: BrokerOp) -> Result<OpOutcome, TransportError> {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(id, tx);

        let sent = self.out.send(ClientFrame::Request { id, channel, op });
        if sent.is_err() {
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&id);
            return Err(TransportError::ConnectionClosed);
        }

        rx.await.map_err(|_| TransportError::ConnectionClosed)
    }
}

/// A logical channel on a [`BrokerConnection`]. Closing (or dropping) it
/// cancels every consumer it registered.
pub struct Channel {
    id: u64,
    conn: BrokerConnection,
}

impl Channel {
    /// Idempotent queue declaration.
    pub async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), TransportError> {
        expect_ok(
            self.conn
                .call(
                    self.id,
                    BrokerOp::DeclareQueue {
                        name: name.to_string(),
                        durable,
                    },
                )
                .await?,
        )
    }

    /// Non-creating existence check for a queue.
    pub async fn declare_queue_passive(&self, name: &str) -> Result<bool, TransportError> {
        expect_exists(
            self.conn
                .call(
                    self.id,
                    BrokerOp::DeclareQueuePassive {
                        name: name.to_string(),
                    },
                )
                .await?,
        )
    }

    pub async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
    ) -> Result<(), TransportError> {
        expect_ok(
            self.conn
                .call(
                    self.id,
                    BrokerOp::DeclareExchange {
                        name: name.to_string(),
                        kind,
                    },
                )
                .await?,
        )
    }

    /// Non-creating existence check for an exchange.
    pub async fn declare_exchange_passive(&self, name: &str) -> Result<bool, TransportError> {
        expect_exists(
            self.conn
                .call(
                    self.id,
                    BrokerOp::DeclareExchangePassive {
                        name: name.to_string(),
                    },
                )
                .await?,
        )
    }

    pub async fn delete_exchange(&self, name: &str) -> Result<(), TransportError> {
        expect_ok(
            self.conn
                .call(
                    self.id,
                    BrokerOp::DeleteExchange {
                        name: name.to_string(),
                    },
                )
                .await?,
        )
    }

    pub async fn bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        expect_ok(
            self.conn
                .call(
                    self.id,
                    BrokerOp::Bind {
                        queue: queue.to_string(),
                        exchange: exchange.to_string(),
                        routing_key: routing_key.to_string(),
                    },
                )
                .await?,
        )
    }

    pub async fn unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), TransportError> {
        expect_ok(
            self.conn
                .call(
                    self.id,
                    BrokerOp::Unbind {
                        queue: queue.to_string(),
                        exchange: exchange.to_string(),
                        routing_key: routing_key.to_string(),
                    },
                )
                .await?,
        )
    }

    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        expect_ok(
            self.conn
                .call(
                    self.id,
                    BrokerOp::Publish {
                        exchange: exchange.to_string(),
                        routing_key: routing_key.to_string(),
                        payload,
                    },
                )
                .await?,
        )
    }

    /// Register `callback` for deliveries from `queue` on this channel.
    /// The callback is installed before the broker is asked to attach the
    /// consumer, so an immediate backlog drain cannot race past it.
    pub async fn consume(
        &self,
        queue: &str,
        callback: DeliveryCallback,
    ) -> Result<(), TransportError> {
        let key = (self.id, queue.to_string());
        self.conn
            .consumers
            .write()
            .expect("consumer lock poisoned")
            .insert(key.clone(), callback);

        let result = self
            .conn
            .call(
                self.id,
                BrokerOp::Consume {
                    queue: queue.to_string(),
                },
            )
            .await
            .and_then(expect_ok);
        if result.is_err() {
            self.conn
                .consumers
                .write()
                .expect("consumer lock poisoned")
                .remove(&key);
        }
        result
    }

    /// Explicit close; equivalent to dropping the channel.
    pub fn close(self) {}
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.conn
            .consumers
            .write()
            .expect("consumer lock poisoned")
            .retain(|(channel, _), _| *channel != self.id);
        let _ = self.conn.out.send(ClientFrame::CloseChannel { channel: self.id });
    }
}

fn expect_ok(outcome: OpOutcome) -> Result<(), TransportError> {
    match outcome {
        OpOutcome::Ok => Ok(()),
        OpOutcome::NotFound => Err(TransportError::NotFound),
        OpOutcome::Failed { reason } => Err(TransportError::Rejected(reason)),
    }
}

fn expect_exists(outcome: OpOutcome) -> Result<bool, TransportError> {
    match outcome {
        OpOutcome::Ok => Ok(true),
        OpOutcome::NotFound => Ok(false),
        OpOutcome::Failed { reason } => Err(TransportError::Rejected(reason)),
    }
}
