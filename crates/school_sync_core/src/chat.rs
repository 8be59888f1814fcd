//! crates/school_sync_core/src/chat.rs
//!
//! Sending, watching and acknowledging messages of a two-party conversation.
//!
//! Reading a conversation never changes it. Messages become read only through
//! [`ChatService::mark_read`], which the caller invokes when the reader brings
//! the conversation into view.

use chrono::Utc;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::conversation::{normalize_email, ConversationKey};
use crate::domain::{Conversation, Message, MessageStatus};
use crate::ports::{ConversationStore, PortError, PortResult};

/// Messages newest first, re-derived from the full conversation on every change.
pub type MessageFeed = Pin<Box<dyn Stream<Item = PortResult<Vec<Message>>> + Send>>;

/// Optional links stored on a message so it can be traced back to a subject or student.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageLinks {
    pub teacher_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct ChatService {
    conversations: Arc<dyn ConversationStore>,
}

impl ChatService {
    pub fn new(conversations: Arc<dyn ConversationStore>) -> Self {
        Self { conversations }
    }

    /// Returns the conversation, creating an empty one the first time it is opened.
    pub async fn get_or_create(&self, key: &ConversationKey) -> PortResult<Conversation> {
        self.conversations.get_or_create(key).await
    }

    /// Appends a message from `sender_email`. New messages always start unread.
    pub async fn send(
        &self,
        key: &ConversationKey,
        sender_email: &str,
        text: &str,
        links: MessageLinks,
    ) -> PortResult<Message> {
        if text.trim().is_empty() {
            return Err(PortError::Invalid("message text cannot be empty".to_string()));
        }
        if !key.involves(sender_email) {
            return Err(PortError::Unauthorized);
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation: key.clone(),
            created_at: Utc::now(),
            text: text.to_string(),
            sender_email: normalize_email(sender_email),
            status: MessageStatus::Unread,
            teacher_id: links.teacher_id,
            student_id: links.student_id,
        };
        self.conversations.append(key, message.clone()).await?;
        debug!("Message {} appended to {}", message.id, key);
        Ok(message)
    }

    /// Live feed of the conversation. Each item is the complete list, newest first.
    /// Dropping the feed unsubscribes.
    pub async fn subscribe(&self, key: &ConversationKey) -> PortResult<MessageFeed> {
        let updates = self.conversations.subscribe(key).await?;
        Ok(updates
            .map(|update| update.map(|conversation| conversation.newest_first()))
            .boxed())
    }

    /// Marks every message the reader did not send as read. Returns how many changed.
    pub async fn mark_read(&self, key: &ConversationKey, reader_email: &str) -> PortResult<usize> {
        if !key.involves(reader_email) {
            return Err(PortError::Unauthorized);
        }
        let flipped = self.conversations.mark_read_for(key, reader_email).await?;
        if flipped > 0 {
            info!("{} messages in {} marked read", flipped, key);
        }
        Ok(flipped)
    }
}
