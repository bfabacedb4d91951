// Directory probes and admin listings
//
// Existence checks are passive declares over a transient channel that is
// released on every exit path (channel drop). Membership listings go
// through the broker's read-only admin API, since bindings are the only
// record of who is in a group.

use crate::broker::BrokerConnection;
use crate::chat::error::ChatError;
use crate::chat::naming::{group_exchange, text_queue, FILE_NAMESPACE, GROUP_NAMESPACE};
use reqwest::Url;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;

/// Admin queries must complete within this deadline.
const ADMIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ExchangeRow {
    name: String,
}

#[derive(Debug, Deserialize)]
struct BindingRow {
    destination: String,
}

/// Client for the broker's read-only admin API.
pub struct AdminClient {
    http: reqwest::Client,
    base: Url,
    vhost: String,
    user: String,
    password: String,
}

impl AdminClient {
    pub fn new(
        host: &str,
        port: u16,
        vhost: &str,
        user: &str,
        password: &str,
    ) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(ADMIN_TIMEOUT)
            .build()
            .map_err(|_| ChatError::DirectoryQuery)?;
        let base = Url::parse(&format!("http://{host}:{port}"))
            .map_err(|_| ChatError::DirectoryQuery)?;
        Ok(Self {
            http,
            base,
            vhost: vhost.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ChatError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ChatError::DirectoryQuery)?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T, ChatError> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(classify_request_error)?;
        if !response.status().is_success() {
            return Err(ChatError::DirectoryQuery);
        }
        response.json().await.map_err(classify_request_error)
    }

    /// All exchanges on the broker, by name.
    async fn exchanges(&self) -> Result<Vec<String>, ChatError> {
        let url = self.endpoint(&["api", "exchanges", &self.vhost])?;
        let rows: Vec<ExchangeRow> = self.get_json(url).await?;
        Ok(rows.into_iter().map(|row| row.name).collect())
    }

    /// Destination resources bound to `exchange`.
    async fn bindings_by_source(&self, exchange: &str) -> Result<Vec<String>, ChatError> {
        let url = self.endpoint(&["api", "exchanges", &self.vhost, exchange, "bindings", "source"])?;
        let rows: Vec<BindingRow> = self.get_json(url).await?;
        Ok(rows.into_iter().map(|row| row.destination).collect())
    }
}

fn classify_request_error(e: reqwest::Error) -> ChatError {
    if e.is_timeout() {
        ChatError::Timeout
    } else {
        ChatError::DirectoryQuery
    }
}

/// Existence and membership queries against the broker.
pub struct Directory {
    conn: BrokerConnection,
    admin: AdminClient,
}

impl Directory {
    pub fn new(conn: BrokerConnection, admin: AdminClient) -> Self {
        Self { conn, admin }
    }

    /// A user exists iff their text queue does. Any failure, including
    /// "does not exist", reads as `false`; the probe never errors.
    pub async fn user_exists(&self, name: &str) -> bool {
        let channel = self.conn.channel();
        matches!(
            channel.declare_queue_passive(&text_queue(name)).await,
            Ok(true)
        )
    }

    /// A group exists iff its exchange does. Same contract as
    /// [`Directory::user_exists`].
    pub async fn group_exists(&self, name: &str) -> bool {
        let channel = self.conn.channel();
        matches!(
            channel.declare_exchange_passive(&group_exchange(name)).await,
            Ok(true)
        )
    }

    /// Members of `group`, recovered from the file-queue bindings on its
    /// exchange.
    pub async fn list_group_members(&self, group: &str) -> Result<BTreeSet<String>, ChatError> {
        if !self.group_exists(group).await {
            return Err(ChatError::UnknownGroup);
        }

        let prefix = format!("{FILE_NAMESPACE}.");
        let destinations = self.admin.bindings_by_source(&group_exchange(group)).await?;
        Ok(destinations
            .iter()
            .filter_map(|d| d.strip_prefix(&prefix))
            .map(str::to_string)
            .collect())
    }

    /// Groups `user` belongs to. Enumerates every group exchange and tests
    /// membership; O(groups x members), fine for an interactive directory.
    pub async fn list_user_groups(&self, user: &str) -> Result<BTreeSet<String>, ChatError> {
        let prefix = format!("{GROUP_NAMESPACE}.");
        let mut groups = BTreeSet::new();
        for name in self.admin.exchanges().await? {
            let Some(group) = name.strip_prefix(&prefix) else {
                continue;
            };
            if self.list_group_members(group).await?.contains(user) {
                groups.insert(group.to_string());
            }
        }
        Ok(groups)
    }
}
