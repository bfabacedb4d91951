//! papo - queue/exchange chat over a lightweight message broker
//!
//! One library, two binaries: `papo` is the interactive chat client,
//! `papo-broker` the in-memory broker it talks to. Logical user and group
//! names map onto namespaced broker resources; group membership lives
//! entirely in broker bindings and is read back through the admin API.

pub mod broker;
pub mod chat;
