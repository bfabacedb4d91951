// In-memory queue, exchange and binding state
//
// Queues buffer messages until a consumer is attached and round-robin
// between consumers once several are. The default exchange "" routes a
// publish directly to the queue named by the routing key. Bindings are
// idempotent both ways: binding twice is one binding, unbinding an absent
// binding succeeds.

use crate::broker::protocol::{BrokerOp, ExchangeKind, OpOutcome, ServerFrame};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

struct Consumer {
    conn: Uuid,
    channel: u64,
    tx: mpsc::UnboundedSender<ServerFrame>,
}

struct Queue {
    durable: bool,
    buffer: VecDeque<Vec<u8>>,
    consumers: Vec<Consumer>,
    next: usize,
}

impl Queue {
    fn new(durable: bool) -> Self {
        Self {
            durable,
            buffer: VecDeque::new(),
            consumers: Vec::new(),
            next: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    queue: String,
    routing_key: String,
}

struct Exchange {
    kind: ExchangeKind,
    bindings: Vec<Binding>,
}

#[derive(Default)]
struct EngineState {
    queues: HashMap<String, Queue>,
    exchanges: HashMap<String, Exchange>,
}

/// The broker's routing core. Shared between the TCP server and the admin
/// API; all operations are short synchronous sections under one lock.
pub struct Engine {
    state: Mutex<EngineState>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Apply one protocol operation on behalf of `conn`/`channel`.
    /// `tx` is the connection's outgoing frame sink, retained when the
    /// operation registers a consumer.
    pub fn apply(
        &self,
        conn: Uuid,
        channel: u64,
        tx: &mpsc::UnboundedSender<ServerFrame>,
        op: BrokerOp,
    ) -> OpOutcome {
        let mut state = self.state.lock().expect("engine lock poisoned");

        match op {
            BrokerOp::DeclareQueue { name, durable } => {
                state.queues.entry(name).or_insert_with(|| Queue::new(durable));
                OpOutcome::Ok
            }
            BrokerOp::DeclareQueuePassive { name } => {
                if state.queues.contains_key(&name) {
                    OpOutcome::Ok
                } else {
                    OpOutcome::NotFound
                }
            }
            BrokerOp::DeclareExchange { name, kind } => match state.exchanges.get(&name) {
                Some(existing) if existing.kind != kind => OpOutcome::Failed {
                    reason: format!("exchange {name} already declared with a different kind"),
                },
                Some(_) => OpOutcome::Ok,
                None => {
                    state.exchanges.insert(
                        name,
                        Exchange {
                            kind,
                            bindings: Vec::new(),
                        },
                    );
                    OpOutcome::Ok
                }
            },
            BrokerOp::DeclareExchangePassive { name } => {
                if state.exchanges.contains_key(&name) {
                    OpOutcome::Ok
                } else {
                    OpOutcome::NotFound
                }
            }
            BrokerOp::DeleteExchange { name } => {
                if state.exchanges.remove(&name).is_some() {
                    OpOutcome::Ok
                } else {
                    OpOutcome::NotFound
                }
            }
            BrokerOp::Bind {
                queue,
                exchange,
                routing_key,
            } => {
                if !state.queues.contains_key(&queue) {
                    return OpOutcome::NotFound;
                }
                let Some(ex) = state.exchanges.get_mut(&exchange) else {
                    return OpOutcome::NotFound;
                };
                let binding = Binding { queue, routing_key };
                if !ex.bindings.contains(&binding) {
                    ex.bindings.push(binding);
                }
                OpOutcome::Ok
            }
            BrokerOp::Unbind {
                queue,
                exchange,
                routing_key,
            } => {
                let Some(ex) = state.exchanges.get_mut(&exchange) else {
                    return OpOutcome::NotFound;
                };
                let binding = Binding { queue, routing_key };
                ex.bindings.retain(|b| *b != binding);
                OpOutcome::Ok
            }
            BrokerOp::Publish {
                exchange,
                routing_key,
                payload,
            } => publish(&mut state, &exchange, &routing_key, payload),
            BrokerOp::Consume { queue } => {
                let Some(q) = state.queues.get_mut(&queue) else {
                    return OpOutcome::NotFound;
                };
                q.consumers.push(Consumer {
                    conn,
                    channel,
                    tx: tx.clone(),
                });
                drain(q, &queue);
                OpOutcome::Ok
            }
        }
    }

    /// Cancel every consumer a channel registered.
    pub fn close_channel(&self, conn: Uuid, channel: u64) {
        let mut state = self.state.lock().expect("engine lock poisoned");
        for queue in state.queues.values_mut() {
            queue
                .consumers
                .retain(|c| !(c.conn == conn && c.channel == channel));
        }
    }

    /// Cancel every consumer a connection registered, across all channels.
    pub fn drop_connection(&self, conn: Uuid) {
        let mut state = self.state.lock().expect("engine lock poisoned");
        for queue in state.queues.values_mut() {
            queue.consumers.retain(|c| c.conn != conn);
        }
    }

    /// Names of all declared exchanges, for the admin API.
    pub fn exchange_names(&self) -> Vec<String> {
        let state = self.state.lock().expect("engine lock poisoned");
        let mut names: Vec<String> = state.exchanges.keys().cloned().collect();
        names.sort();
        names
    }

    /// Bindings whose source is the named exchange, as
    /// (destination queue, routing key) pairs. `None` if the exchange does
    /// not exist.
    pub fn bindings_by_source(&self, exchange: &str) -> Option<Vec<(String, String)>> {
        let state = self.state.lock().expect("engine lock poisoned");
        state.exchanges.get(exchange).map(|ex| {
            ex.bindings
                .iter()
                .map(|b| (b.queue.clone(), b.routing_key.clone()))
                .collect()
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn publish(
    state: &mut EngineState,
    exchange: &str,
    routing_key: &str,
    payload: Vec<u8>,
) -> OpOutcome {
    if exchange.is_empty() {
        // Default exchange: the routing key names the queue. Unroutable
        // messages are dropped, as on the production broker.
        if let Some(q) = state.queues.get_mut(routing_key) {
            enqueue(q, routing_key, payload);
        }
        return OpOutcome::Ok;
    }

    let Some(ex) = state.exchanges.get(exchange) else {
        return OpOutcome::NotFound;
    };
    let targets: Vec<String> = ex
        .bindings
        .iter()
        .filter(|b| match ex.kind {
            ExchangeKind::Direct => b.routing_key == routing_key,
            ExchangeKind::Fanout => true,
        })
        .map(|b| b.queue.clone())
        .collect();

    for name in targets {
        if let Some(q) = state.queues.get_mut(&name) {
            enqueue(q, &name, payload.clone());
        }
    }
    OpOutcome::Ok
}

/// Hand the message to one live consumer, or buffer it. Consumers whose
/// connection has gone away are evicted on the spot.
fn enqueue(queue: &mut Queue, name: &str, payload: Vec<u8>) {
    while !queue.consumers.is_empty() {
        let idx = queue.next % queue.consumers.len();
        let consumer = &queue.consumers[idx];
        let frame = ServerFrame::Deliver {
            channel: consumer.channel,
            queue: name.to_string(),
            payload: payload.clone(),
        };
        if consumer.tx.send(frame).is_ok() {
            queue.next = idx + 1;
            return;
        }
        tracing::debug!("evicting dead consumer on {}", name);
        queue.consumers.remove(idx);
    }
    queue.buffer.push_back(payload);
}

/// Flush buffered messages into the (newly attached) consumers.
fn drain(queue: &mut Queue, name: &str) {
    while let Some(payload) = queue.buffer.pop_front() {
        let had_consumers = !queue.consumers.is_empty();
        enqueue(queue, name, payload);
        if !had_consumers {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (
        mpsc::UnboundedSender<ServerFrame>,
        mpsc::UnboundedReceiver<ServerFrame>,
    ) {
        mpsc::unbounded_channel()
    }

    fn declare_queue(engine: &Engine, name: &str) {
        let (tx, _rx) = sink();
        let outcome = engine.apply(
            Uuid::new_v4(),
            1,
            &tx,
            BrokerOp::DeclareQueue {
                name: name.to_string(),
                durable: true,
            },
        );
        assert!(matches!(outcome, OpOutcome::Ok));
    }

    #[test]
    fn passive_declare_reports_existence_without_creating() {
        let engine = Engine::new();
        let (tx, _rx) = sink();

        let missing = engine.apply(
            Uuid::new_v4(),
            1,
            &tx,
            BrokerOp::DeclareQueuePassive {
                name: "chat.text.alice".to_string(),
            },
        );
        assert!(matches!(missing, OpOutcome::NotFound));

        declare_queue(&engine, "chat.text.alice");
        let found = engine.apply(
            Uuid::new_v4(),
            1,
            &tx,
            BrokerOp::DeclareQueuePassive {
                name: "chat.text.alice".to_string(),
            },
        );
        assert!(matches!(found, OpOutcome::Ok));
    }

    #[test]
    fn default_exchange_routes_by_queue_name() {
        let engine = Engine::new();
        declare_queue(&engine, "chat.text.bob");

        let conn = Uuid::new_v4();
        let (tx, mut rx) = sink();
        engine.apply(
            conn,
            1,
            &tx,
            BrokerOp::Consume {
                queue: "chat.text.bob".to_string(),
            },
        );

        engine.apply(
            conn,
            1,
            &tx,
            BrokerOp::Publish {
                exchange: String::new(),
                routing_key: "chat.text.bob".to_string(),
                payload: b"hi".to_vec(),
            },
        );

        match rx.try_recv().unwrap() {
            ServerFrame::Deliver { queue, payload, .. } => {
                assert_eq!(queue, "chat.text.bob");
                assert_eq!(payload, b"hi");
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn buffered_messages_drain_to_late_consumer() {
        let engine = Engine::new();
        declare_queue(&engine, "chat.text.bob");

        let conn = Uuid::new_v4();
        let (tx, mut rx) = sink();
        engine.apply(
            conn,
            1,
            &tx,
            BrokerOp::Publish {
                exchange: String::new(),
                routing_key: "chat.text.bob".to_string(),
                payload: b"early".to_vec(),
            },
        );

        engine.apply(
            conn,
            1,
            &tx,
            BrokerOp::Consume {
                queue: "chat.text.bob".to_string(),
            },
        );

        match rx.try_recv().unwrap() {
            ServerFrame::Deliver { payload, .. } => assert_eq!(payload, b"early"),
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn direct_exchange_honours_routing_keys() {
        let engine = Engine::new();
        declare_queue(&engine, "chat.text.bob");
        declare_queue(&engine, "chat.file.bob");

        let conn = Uuid::new_v4();
        let (tx, mut rx) = sink();
        engine.apply(
            conn,
            1,
            &tx,
            BrokerOp::DeclareExchange {
                name: "chat.group.team".to_string(),
                kind: ExchangeKind::Direct,
            },
        );
        for (queue, key) in [("chat.text.bob", "chat.text"), ("chat.file.bob", "chat.file")] {
            engine.apply(
                conn,
                1,
                &tx,
                BrokerOp::Bind {
                    queue: queue.to_string(),
                    exchange: "chat.group.team".to_string(),
                    routing_key: key.to_string(),
                },
            );
        }
        for queue in ["chat.text.bob", "chat.file.bob"] {
            engine.apply(
                conn,
                1,
                &tx,
                BrokerOp::Consume {
                    queue: queue.to_string(),
                },
            );
        }

        engine.apply(
            conn,
            1,
            &tx,
            BrokerOp::Publish {
                exchange: "chat.group.team".to_string(),
                routing_key: "chat.text".to_string(),
                payload: b"text only".to_vec(),
            },
        );

        match rx.try_recv().unwrap() {
            ServerFrame::Deliver { queue, .. } => assert_eq!(queue, "chat.text.bob"),
            other => panic!("wrong frame: {other:?}"),
        }
        assert!(rx.try_recv().is_err(), "file queue must not receive text");
    }

    #[test]
    fn duplicate_bind_is_one_binding() {
        let engine = Engine::new();
        declare_queue(&engine, "chat.file.bob");

        let conn = Uuid::new_v4();
        let (tx, _rx) = sink();
        engine.apply(
            conn,
            1,
            &tx,
            BrokerOp::DeclareExchange {
                name: "chat.group.team".to_string(),
                kind: ExchangeKind::Direct,
            },
        );
        for _ in 0..2 {
            engine.apply(
                conn,
                1,
                &tx,
                BrokerOp::Bind {
                    queue: "chat.file.bob".to_string(),
                    exchange: "chat.group.team".to_string(),
                    routing_key: "chat.file".to_string(),
                },
            );
        }

        let bindings = engine.bindings_by_source("chat.group.team").unwrap();
        assert_eq!(bindings.len(), 1);
    }

    #[test]
    fn unbind_of_absent_binding_succeeds() {
        let engine = Engine::new();
        let conn = Uuid::new_v4();
        let (tx, _rx) = sink();
        engine.apply(
            conn,
            1,
            &tx,
            BrokerOp::DeclareExchange {
                name: "chat.group.team".to_string(),
                kind: ExchangeKind::Direct,
            },
        );

        let outcome = engine.apply(
            conn,
            1,
            &tx,
            BrokerOp::Unbind {
                queue: "chat.file.ghost".to_string(),
                exchange: "chat.group.team".to_string(),
                routing_key: "chat.file".to_string(),
            },
        );
        assert!(matches!(outcome, OpOutcome::Ok));
    }

    #[test]
    fn delete_exchange_drops_bindings() {
        let engine = Engine::new();
        declare_queue(&engine, "chat.text.bob");

        let conn = Uuid::new_v4();
        let (tx, _rx) = sink();
        engine.apply(
            conn,
            1,
            &tx,
            BrokerOp::DeclareExchange {
                name: "chat.group.team".to_string(),
                kind: ExchangeKind::Direct,
            },
        );
        engine.apply(
            conn,
            1,
            &tx,
            BrokerOp::Bind {
                queue: "chat.text.bob".to_string(),
                exchange: "chat.group.team".to_string(),
                routing_key: "chat.text".to_string(),
            },
        );
        engine.apply(
            conn,
            1,
            &tx,
            BrokerOp::DeleteExchange {
                name: "chat.group.team".to_string(),
            },
        );

        assert!(engine.bindings_by_source("chat.group.team").is_none());
        let outcome = engine.apply(
            conn,
            1,
            &tx,
            BrokerOp::DeclareExchangePassive {
                name: "chat.group.team".to_string(),
            },
        );
        assert!(matches!(outcome, OpOutcome::NotFound));
    }

    #[test]
    fn close_channel_cancels_only_that_channel() {
        let engine = Engine::new();
        declare_queue(&engine, "chat.text.bob");

        let conn = Uuid::new_v4();
        let (tx, mut rx) = sink();
        engine.apply(
            conn,
            1,
            &tx,
            BrokerOp::Consume {
                queue: "chat.text.bob".to_string(),
            },
        );
        engine.apply(
            conn,
            2,
            &tx,
            BrokerOp::Consume {
                queue: "chat.text.bob".to_string(),
            },
        );

        engine.close_channel(conn, 1);
        engine.apply(
            conn,
            2,
            &tx,
            BrokerOp::Publish {
                exchange: String::new(),
                routing_key: "chat.text.bob".to_string(),
                payload: b"still here".to_vec(),
            },
        );

        match rx.try_recv().unwrap() {
            ServerFrame::Deliver { channel, .. } => assert_eq!(channel, 2),
            other => panic!("wrong frame: {other:?}"),
        }
    }
}
