// Inbound envelope classification and rendering
//
// Runs per delivery, off the interactive thread. Malformed payloads are
// logged and dropped; a receive failure must never take the process down.

use crate::broker::DeliveryCallback;
use crate::chat::commands::{GROUP_SYMBOL, USER_SYMBOL};
use crate::chat::envelope::{Envelope, FileMeta};
use crate::chat::session::SharedSession;
use std::path::PathBuf;
use std::sync::Arc;

pub struct InboundHandler {
    state: SharedSession,
    download_dir: PathBuf,
}

impl InboundHandler {
    pub fn new(state: SharedSession, download_dir: PathBuf) -> Self {
        Self {
            state,
            download_dir,
        }
    }

    /// Adapt into the callback shape the broker connection dispatches to.
    pub fn into_callback(self) -> DeliveryCallback {
        let handler = Arc::new(self);
        Arc::new(move |payload| handler.handle(&payload))
    }

    pub fn handle(&self, payload: &[u8]) {
        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("dropping malformed envelope: {}", e);
                return;
            }
        };

        // Self-originated copies come back through group fan-out; drop
        // them. A stale read here is benign.
        if let Some(sender) = &envelope.sender {
            let me = self.state.read().expect("session lock poisoned").user.clone();
            if !me.is_empty() && *sender == me {
                return;
            }
        }

        let Some(sender) = envelope.sender.as_deref() else {
            println!("{}", format_system(&envelope));
            return;
        };

        if let Some(meta) = envelope.file.clone() {
            self.store_file(&envelope, sender, &meta);
            return;
        }

        println!("{}", format_text(&envelope, sender));
    }

    fn store_file(&self, envelope: &Envelope, sender: &str, meta: &FileMeta) {
        let target = self.download_dir.join(&meta.filename);
        match std::fs::write(&target, &envelope.body) {
            Ok(()) => println!("{}", format_file(envelope, sender, meta)),
            Err(e) => tracing::error!("could not store {}: {}", target.display(), e),
        }
    }
}

/// `(dt) System reports: ...` with destination labels symbolized.
pub fn format_system(envelope: &Envelope) -> String {
    let body = envelope
        .body_text()
        .replacen("user=", &USER_SYMBOL.to_string(), 1)
        .replacen("group=", &GROUP_SYMBOL.to_string(), 1);
    format!("({}) System reports: {}", envelope.datetime, body)
}

pub fn format_text(envelope: &Envelope, sender: &str) -> String {
    format!(
        "({}) {}{}{} says: {}",
        envelope.datetime,
        USER_SYMBOL,
        sender,
        group_suffix(envelope),
        envelope.body_text()
    )
}

pub fn format_file(envelope: &Envelope, sender: &str, meta: &FileMeta) -> String {
    format!(
        "({}) File {} received from {}{}{}",
        envelope.datetime,
        meta.filename,
        USER_SYMBOL,
        sender,
        group_suffix(envelope)
    )
}

fn group_suffix(envelope: &Envelope) -> String {
    match envelope.group.as_deref() {
        Some(group) => format!("{GROUP_SYMBOL}{group}"),
        None => String::new(),
    }
}
