// Group membership operations
//
// A group is nothing but an exchange plus bindings; membership is one text
// binding and one file binding per member, keyed by the fixed routing
// tokens so both channels can be managed independently. Nothing is cached
// locally.

use crate::broker::ExchangeKind;
use crate::chat::error::ChatError;
use crate::chat::naming::{file_queue, group_exchange, text_queue, FILE_NAMESPACE, TEXT_NAMESPACE};
use crate::chat::session::ChatClient;

impl ChatClient {
    /// Create the group exchange, join it as first member and select it as
    /// the current destination.
    pub async fn create_group(&self, name: &str) -> Result<(), ChatError> {
        if !self.is_logged_in() {
            return Err(ChatError::NotLoggedIn);
        }
        if self.directory.group_exists(name).await {
            return Err(ChatError::GroupAlreadyExists);
        }

        {
            let channel = self.channel.lock().await;
            channel
                .declare_exchange(&group_exchange(name), ExchangeKind::Direct)
                .await
                .map_err(|e| {
                    tracing::warn!("exchange declare for {} failed: {}", name, e);
                    ChatError::GroupCreateFailed
                })?;
        }

        let me = self.user_name();
        self.add_member(&me, name)
            .await
            .map_err(|_| ChatError::GroupCreateFailed)?;
        self.set_destination(name, true).await
    }

    /// Delete the group exchange; the broker drops its bindings with it.
    pub async fn delete_group(&self, name: &str) -> Result<(), ChatError> {
        if !self.directory.group_exists(name).await {
            return Err(ChatError::UnknownGroup);
        }

        let channel = self.channel.lock().await;
        channel
            .delete_exchange(&group_exchange(name))
            .await
            .map_err(|e| {
                tracing::warn!("exchange delete for {} failed: {}", name, e);
                ChatError::GroupDeleteFailed
            })
    }

    /// Bind both of `user`'s queues to the group exchange.
    pub async fn add_member(&self, user: &str, group: &str) -> Result<(), ChatError> {
        if !self.directory.user_exists(user).await {
            return Err(ChatError::UnknownUser);
        }
        if !self.directory.group_exists(group).await {
            return Err(ChatError::UnknownGroup);
        }

        let exchange = group_exchange(group);
        let channel = self.channel.lock().await;
        let bind_both = async {
            channel
                .bind(&file_queue(user), &exchange, FILE_NAMESPACE)
                .await?;
            channel
                .bind(&text_queue(user), &exchange, TEXT_NAMESPACE)
                .await
        };
        bind_both.await.map_err(|e| {
            tracing::warn!("bind of {} to {} failed: {}", user, group, e);
            ChatError::AddMemberFailed
        })
    }

    /// Unbind both of `user`'s queues from the group exchange. The same
    /// operation backs leaving and kicking; only the failure wording
    /// differs, keyed on whether the removed identity is the caller's own.
    pub async fn remove_member(&self, user: &str, group: &str) -> Result<(), ChatError> {
        if !self.directory.user_exists(user).await {
            return Err(ChatError::UnknownUser);
        }
        if !self.directory.group_exists(group).await {
            return Err(ChatError::UnknownGroup);
        }

        let exchange = group_exchange(group);
        let channel = self.channel.lock().await;
        let unbind_both = async {
            channel
                .unbind(&file_queue(user), &exchange, FILE_NAMESPACE)
                .await?;
            channel
                .unbind(&text_queue(user), &exchange, TEXT_NAMESPACE)
                .await
        };
        unbind_both.await.map_err(|e| {
            tracing::warn!("unbind of {} from {} failed: {}", user, group, e);
            if user == self.user_name() {
                ChatError::LeaveGroupFailed
            } else {
                ChatError::RemoveMemberFailed
            }
        })
    }

    /// Self-removal.
    pub async fn leave_group(&self, group: &str) -> Result<(), ChatError> {
        let me = self.user_name();
        self.remove_member(&me, group).await
    }
}
