//! crates/school_sync_core/src/unread.rs
//!
//! Unread counters for badges. Everything is recomputed from the stores on each
//! call; nothing is cached between calls.

use futures::future::try_join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::conversation::{normalize_email, ConversationKey};
use crate::domain::{MessageStatus, Subject};
use crate::ports::{ConversationStore, PortError, PortResult, RemarkStore};

/// Badge counts shown on a parent's home screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dashboard {
    pub unread_messages: usize,
    pub unread_remarks: usize,
}

#[derive(Clone)]
pub struct UnreadAggregator {
    conversations: Arc<dyn ConversationStore>,
    remarks: Arc<dyn RemarkStore>,
}

impl UnreadAggregator {
    pub fn new(conversations: Arc<dyn ConversationStore>, remarks: Arc<dyn RemarkStore>) -> Self {
        Self {
            conversations,
            remarks,
        }
    }

    /// Unread messages from each counterpart, keyed by the counterpart's normalized email.
    ///
    /// A message counts when it is unread and was not sent by `own_email`.
    /// Counterparts without a conversation map to zero. A counterpart listed
    /// twice, in any spelling, is counted once.
    pub async fn unread_by_counterpart(
        &self,
        own_email: &str,
        counterparts: &[String],
    ) -> PortResult<BTreeMap<String, usize>> {
        let distinct: BTreeSet<String> = counterparts.iter().map(|c| normalize_email(c)).collect();
        let lookups = distinct.into_iter().map(|counterpart| async move {
            let key = ConversationKey::between(own_email, &counterpart);
            let count = self
                .conversations
                .get(&key)
                .await?
                .map_or(0, |c| c.unread_for(own_email));
            Ok::<_, PortError>((counterpart, count))
        });

        Ok(try_join_all(lookups).await?.into_iter().collect())
    }

    pub async fn total_unread_messages(
        &self,
        own_email: &str,
        counterparts: &[String],
    ) -> PortResult<usize> {
        Ok(self
            .unread_by_counterpart(own_email, counterparts)
            .await?
            .values()
            .sum())
    }

    /// Unread remarks about the student, per subject.
    pub async fn unread_remarks_by_subject(
        &self,
        student_id: Uuid,
        subjects: &[Subject],
    ) -> PortResult<BTreeMap<Uuid, usize>> {
        let counts = subjects.iter().map(|subject| async move {
            let count = self
                .remarks
                .count_remarks_with_status(student_id, Some(subject.id), MessageStatus::Unread)
                .await?;
            Ok::<_, PortError>((subject.id, count))
        });
        Ok(try_join_all(counts).await?.into_iter().collect())
    }

    pub async fn unread_remarks(&self, student_id: Uuid) -> PortResult<usize> {
        self.remarks
            .count_remarks_with_status(student_id, None, MessageStatus::Unread)
            .await
    }

    /// Both badge counts of a parent: messages from the given teachers and remarks.
    pub async fn dashboard(
        &self,
        own_email: &str,
        student_id: Uuid,
        teacher_emails: &[String],
    ) -> PortResult<Dashboard> {
        let (unread_messages, unread_remarks) = futures::try_join!(
            self.total_unread_messages(own_email, teacher_emails),
            self.unread_remarks(student_id),
        )?;
        Ok(Dashboard {
            unread_messages,
            unread_remarks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatService, MessageLinks};
    use crate::memory::InMemoryStore;

    const PROF: &str = "prof@ecole.ma";
    const OTHER_PROF: &str = "autre@ecole.ma";
    const PARENT: &str = "parent@gmail.com";

    #[tokio::test]
    async fn test_own_messages_are_not_counted() {
        let store = Arc::new(InMemoryStore::new());
        let chat = ChatService::new(store.clone());
        let unread = UnreadAggregator::new(store.clone(), store);
        let key = ConversationKey::between(PARENT, PROF);

        for text in ["a", "b"] {
            chat.send(&key, PARENT, text, MessageLinks::default())
                .await
                .unwrap();
        }
        for text in ["c", "d", "e"] {
            chat.send(&key, PROF, text, MessageLinks::default())
                .await
                .unwrap();
        }

        let counts = unread
            .unread_by_counterpart(PARENT, &[PROF.to_string()])
            .await
            .unwrap();
        assert_eq!(counts.get(PROF), Some(&3));

        // And from the teacher's side it is the parent's two.
        let counts = unread
            .unread_by_counterpart(PROF, &[PARENT.to_string()])
            .await
            .unwrap();
        assert_eq!(counts.get(PARENT), Some(&2));
    }

    #[tokio::test]
    async fn test_counts_are_recomputed_after_mark_read() {
        let store = Arc::new(InMemoryStore::new());
        let chat = ChatService::new(store.clone());
        let unread = UnreadAggregator::new(store.clone(), store);
        let with_prof = ConversationKey::between(PARENT, PROF);
        let with_other = ConversationKey::between(PARENT, OTHER_PROF);

        chat.send(&with_prof, PROF, "x", MessageLinks::default())
            .await
            .unwrap();
        chat.send(&with_other, OTHER_PROF, "y", MessageLinks::default())
            .await
            .unwrap();

        let teachers = vec![PROF.to_string(), OTHER_PROF.to_string()];
        assert_eq!(
            unread.total_unread_messages(PARENT, &teachers).await.unwrap(),
            2
        );

        chat.mark_read(&with_prof, PARENT).await.unwrap();
        let counts = unread.unread_by_counterpart(PARENT, &teachers).await.unwrap();
        assert_eq!(counts.get(PROF), Some(&0));
        assert_eq!(counts.get(OTHER_PROF), Some(&1));
    }

    #[tokio::test]
    async fn test_repeated_counterpart_is_counted_once() {
        let store = Arc::new(InMemoryStore::new());
        let chat = ChatService::new(store.clone());
        let unread = UnreadAggregator::new(store.clone(), store);
        let key = ConversationKey::between(PARENT, PROF);
        chat.send(&key, PROF, "Réunion", MessageLinks::default())
            .await
            .unwrap();

        let teachers = vec![PROF.to_string(), " Prof@Ecole.ma".to_string()];
        let counts = unread.unread_by_counterpart(PARENT, &teachers).await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get(PROF), Some(&1));
        assert_eq!(
            unread.total_unread_messages(PARENT, &teachers).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_unknown_counterpart_counts_zero() {
        let store = Arc::new(InMemoryStore::new());
        let unread = UnreadAggregator::new(store.clone(), store);
        let counts = unread
            .unread_by_counterpart(PARENT, &["nobody@ecole.ma".to_string()])
            .await
            .unwrap();
        assert_eq!(counts.get("nobody@ecole.ma"), Some(&0));
    }
}
