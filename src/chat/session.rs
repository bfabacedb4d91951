// Session state and lifecycle
//
// One session per running client. Identity and destination are plain
// strings reassigned wholesale under a short RwLock section; the receive
// callback only ever takes a read snapshot, so delivery is never blocked
// on the foreground command loop.

use crate::broker::{BrokerConnection, Channel, DeliveryCallback};
use crate::chat::directory::{AdminClient, Directory};
use crate::chat::error::ChatError;
use crate::chat::naming::{file_queue, text_queue};
use crate::chat::receive::InboundHandler;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Mutable session fields. Empty string means unset; at most one of the
/// two destination fields is non-empty at any time.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub user: String,
    pub dest_user: String,
    pub dest_group: String,
}

impl SessionState {
    pub fn has_destination(&self) -> bool {
        !self.dest_user.is_empty() || !self.dest_group.is_empty()
    }

    /// `user=<name>` / `group=<name>` / empty, the form system notices and
    /// the prompt build on.
    pub fn destination_label(&self) -> String {
        if !self.dest_user.is_empty() {
            format!("user={}", self.dest_user)
        } else if !self.dest_group.is_empty() {
            format!("group={}", self.dest_group)
        } else {
            String::new()
        }
    }
}

pub type SharedSession = Arc<RwLock<SessionState>>;

/// The chat client: session state plus the broker resources it drives.
pub struct ChatClient {
    pub(crate) conn: BrokerConnection,
    /// Consumption channel. Replaced wholesale on logout so stale
    /// consumers are dropped broker-side.
    pub(crate) channel: Mutex<Channel>,
    pub(crate) directory: Directory,
    pub(crate) state: SharedSession,
    pub(crate) inbound: DeliveryCallback,
}

impl ChatClient {
    /// Client with the standard receive pipeline writing files into
    /// `download_dir`.
    pub fn new(conn: BrokerConnection, admin: AdminClient, download_dir: PathBuf) -> Self {
        Self::with_callback(conn, admin, |state| {
            InboundHandler::new(state, download_dir).into_callback()
        })
    }

    /// Client with a caller-supplied inbound callback. The factory receives
    /// the shared session so a custom pipeline can still read the identity.
    pub fn with_callback(
        conn: BrokerConnection,
        admin: AdminClient,
        factory: impl FnOnce(SharedSession) -> DeliveryCallback,
    ) -> Self {
        let state: SharedSession = Arc::new(RwLock::new(SessionState::default()));
        let inbound = factory(state.clone());
        let channel = Mutex::new(conn.channel());
        let directory = Directory::new(conn.clone(), admin);
        Self {
            conn,
            channel,
            directory,
            state,
            inbound,
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Point-in-time copy of the session fields.
    pub fn snapshot(&self) -> SessionState {
        self.state.read().expect("session lock poisoned").clone()
    }

    pub fn user_name(&self) -> String {
        self.snapshot().user
    }

    pub fn is_logged_in(&self) -> bool {
        !self.snapshot().user.is_empty()
    }

    pub fn has_destination(&self) -> bool {
        self.snapshot().has_destination()
    }

    /// Provision the user's queues, attach the inbound callback to both,
    /// and record the identity. Queues are durable and the declare is
    /// idempotent, so logging in as an existing user re-attaches.
    pub async fn login(&self, name: &str) -> Result<(), ChatError> {
        if self.is_logged_in() {
            return Err(ChatError::AlreadyLoggedIn);
        }

        let channel = self.channel.lock().await;
        let provision = async {
            channel.declare_queue(&file_queue(name), true).await?;
            channel.declare_queue(&text_queue(name), true).await?;
            channel
                .consume(&file_queue(name), self.inbound.clone())
                .await?;
            channel
                .consume(&text_queue(name), self.inbound.clone())
                .await
        };
        if let Err(e) = provision.await {
            tracing::warn!("login failed for {}: {}", name, e);
            return Err(ChatError::LoginFailed);
        }

        let mut state = self.state.write().expect("session lock poisoned");
        state.user = name.to_string();
        state.dest_user.clear();
        state.dest_group.clear();
        Ok(())
    }

    /// Drop the consumption channel (cancelling this session's consumers)
    /// and open a fresh one, then clear identity and destination.
    pub async fn logout(&self) -> Result<(), ChatError> {
        if !self.is_logged_in() {
            return Err(ChatError::NotLoggedIn);
        }

        {
            let mut channel = self.channel.lock().await;
            let fresh = self.conn.channel();
            let stale = std::mem::replace(&mut *channel, fresh);
            stale.close();
        }

        let mut state = self.state.write().expect("session lock poisoned");
        state.user.clear();
        state.dest_user.clear();
        state.dest_group.clear();
        Ok(())
    }

    /// Select the target of subsequent sends: a user or a group, never
    /// both. The target must exist and must not be the session user.
    pub async fn set_destination(&self, target: &str, is_group: bool) -> Result<(), ChatError> {
        if target.trim().is_empty() {
            return Err(ChatError::EmptyDestination);
        }
        if !is_group && target == self.user_name() {
            return Err(ChatError::SelfDestination);
        }
        if is_group {
            if !self.directory.group_exists(target).await {
                return Err(ChatError::UnknownGroup);
            }
        } else if !self.directory.user_exists(target).await {
            return Err(ChatError::UnknownUser);
        }

        let mut state = self.state.write().expect("session lock poisoned");
        if is_group {
            state.dest_user.clear();
            state.dest_group = target.to_string();
        } else {
            state.dest_group.clear();
            state.dest_user = target.to_string();
        }
        Ok(())
    }
}
