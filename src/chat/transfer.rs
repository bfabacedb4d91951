// Send pipelines
//
// Text sends block the caller until the publish is acknowledged by the
// socket. File sends run on a detached task so a large read never stalls
// the prompt; the resolved destination is captured at call time, so a
// destination change while the task runs affects neither delivery nor the
// completion notice.

use crate::broker::Channel;
use crate::chat::envelope::{Envelope, FileMeta};
use crate::chat::error::ChatError;
use crate::chat::naming::{file_queue, group_exchange, text_queue};
use crate::chat::session::ChatClient;
use std::path::PathBuf;

impl ChatClient {
    /// Publish a text envelope to the current destination.
    pub async fn send_text(&self, text: &str) -> Result<(), ChatError> {
        let snapshot = self.snapshot();
        if snapshot.user.is_empty() {
            return Err(ChatError::NotLoggedIn);
        }
        if !snapshot.has_destination() {
            return Err(ChatError::NoDestination);
        }

        let group = (!snapshot.dest_group.is_empty()).then_some(snapshot.dest_group.as_str());
        let payload = Envelope::text(&snapshot.user, group, text).encode()?;

        let channel = self.channel.lock().await;
        channel
            .publish(
                &group_exchange(&snapshot.dest_group),
                &text_queue(&snapshot.dest_user),
                payload,
            )
            .await
            .map_err(|e| {
                tracing::warn!("text publish failed: {}", e);
                ChatError::SendFailed
            })
    }

    /// Validate the path and spawn the detached file send. Returns as soon
    /// as the transfer is underway; completion is reported by a system
    /// notice on the sender's own text queue.
    pub async fn send_file(&self, raw_path: &str) -> Result<(), ChatError> {
        let snapshot = self.snapshot();
        if snapshot.user.is_empty() {
            return Err(ChatError::NotLoggedIn);
        }
        if !snapshot.has_destination() {
            return Err(ChatError::NoDestination);
        }

        let path = expand_home(raw_path);
        let path = std::fs::canonicalize(&path).map_err(|_| ChatError::FileNotFound)?;
        if !path.is_file() {
            return Err(ChatError::NotRegularFile);
        }

        let mime = mime_guess::from_path(&path)
            .first()
            .ok_or(ChatError::ProbeFailed)?
            .to_string();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or(ChatError::FileNotFound)?;

        // Capture the resolved destination now; the task must not read
        // session state at publish time.
        let exchange = group_exchange(&snapshot.dest_group);
        let routing_key = file_queue(&snapshot.dest_user);
        let group = (!snapshot.dest_group.is_empty()).then(|| snapshot.dest_group.clone());
        let label = snapshot.destination_label();
        let own_queue = text_queue(&snapshot.user);
        let sender = snapshot.user.clone();
        let conn = self.conn.clone();

        tokio::spawn(async move {
            let channel = conn.channel();
            let content = match tokio::fs::read(&path).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("could not read {}: {}", path.display(), e);
                    notify(&channel, &own_queue, &format!("Could not read file {filename}")).await;
                    return;
                }
            };

            let meta = FileMeta {
                mime,
                filename: filename.clone(),
            };
            let payload = match Envelope::file(&sender, group.as_deref(), content, meta).encode() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!("could not encode file envelope: {}", e);
                    return;
                }
            };

            match channel.publish(&exchange, &routing_key, payload).await {
                Ok(()) => {
                    notify(
                        &channel,
                        &own_queue,
                        &format!("File {filename} was sent to {label}"),
                    )
                    .await;
                }
                Err(e) => {
                    tracing::warn!("file publish failed: {}", e);
                    notify(
                        &channel,
                        &own_queue,
                        &format!("Could not send file {filename} to {label}"),
                    )
                    .await;
                }
            }
        });

        Ok(())
    }
}

/// Best-effort system notice to the session user's own text queue.
async fn notify(channel: &Channel, queue: &str, text: &str) {
    if let Ok(payload) = Envelope::system(text).encode() {
        if let Err(e) = channel.publish("", queue, payload).await {
            tracing::debug!("system notice dropped: {}", e);
        }
    }
}

/// Expand a leading `~` to the caller's home directory.
fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_expansion_only_touches_leading_tilde() {
        assert_eq!(expand_home("/tmp/x"), PathBuf::from("/tmp/x"));
        assert_eq!(expand_home("a~b"), PathBuf::from("a~b"));

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/notes.txt"), home.join("notes.txt"));
            assert_eq!(expand_home("~"), home.join(""));
        }
    }
}
