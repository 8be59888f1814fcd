//! crates/school_sync_core/src/memory.rs
//!
//! An in-memory implementation of every store port. Backs the core tests and
//! lets the service run without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::conversation::{normalize_email, ConversationKey};
use crate::domain::{
    ClassAssignment, Conversation, Homework, Message, MessageStatus, Notification, Principal,
    Remark, SchoolClass, Student, Subject, Teacher, Timetable, UserCredentials, UserProfile,
};
use crate::ports::{
    ConversationStore, ConversationStream, DirectoryStore, PortError, PortResult, RemarkStore,
    SchoolStore,
};

const CHANGE_BUFFER: usize = 256;

#[derive(Default)]
struct State {
    // --- directory ---
    profiles: HashMap<Uuid, UserProfile>,
    passwords: HashMap<Uuid, String>,
    auth_sessions: HashMap<String, (Uuid, DateTime<Utc>)>,
    // --- school partitions ---
    classes: Vec<SchoolClass>,
    students: Vec<Student>,
    subjects: Vec<Subject>,
    teachers: Vec<Teacher>,
    assignments: Vec<ClassAssignment>,
    homework: Vec<Homework>,
    timetables: HashMap<Uuid, Timetable>,
    // --- messaging ---
    conversations: HashMap<ConversationKey, Conversation>,
    remarks: Vec<Remark>,
    notifications: Vec<Notification>,
}

/// Every port over one shared, lock-protected state.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    changes: broadcast::Sender<ConversationKey>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            state: Arc::new(RwLock::new(State::default())),
            changes,
        }
    }

    /// Notifications written so far, oldest first.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.read().await.notifications.clone()
    }

    fn publish(&self, key: &ConversationKey) {
        // No receivers simply means nobody is watching.
        let _ = self.changes.send(key.clone());
    }
}

fn empty_conversation(key: &ConversationKey) -> Conversation {
    Conversation {
        key: key.clone(),
        created_at: Utc::now(),
        messages: Vec::new(),
    }
}

//=========================================================================================
// `DirectoryStore` Implementation
//=========================================================================================

#[async_trait]
impl DirectoryStore for InMemoryStore {
    async fn create_account(
        &self,
        profile: UserProfile,
        hashed_password: &str,
    ) -> PortResult<UserProfile> {
        let mut state = self.state.write().await;
        let email = normalize_email(&profile.email);
        if state
            .profiles
            .values()
            .any(|p| normalize_email(&p.email) == email)
        {
            return Err(PortError::Conflict(format!("account {}", profile.email)));
        }
        state
            .passwords
            .insert(profile.user_id, hashed_password.to_string());
        state.profiles.insert(profile.user_id, profile.clone());
        Ok(profile)
    }

    async fn get_credentials_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let state = self.state.read().await;
        let email = normalize_email(email);
        let profile = state
            .profiles
            .values()
            .find(|p| normalize_email(&p.email) == email)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))?;
        let hashed_password = state
            .passwords
            .get(&profile.user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Credentials for {} not found", email)))?;
        Ok(UserCredentials {
            user_id: profile.user_id,
            email: profile.email.clone(),
            hashed_password,
        })
    }

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Option<UserProfile>> {
        Ok(self.state.read().await.profiles.get(&user_id).cloned())
    }

    async fn profile_for_teacher(&self, teacher_id: Uuid) -> PortResult<Option<UserProfile>> {
        let state = self.state.read().await;
        Ok(state
            .profiles
            .values()
            .find(|p| p.role.teacher_id() == Some(teacher_id))
            .cloned())
    }

    async fn profile_for_student(&self, student_id: Uuid) -> PortResult<Option<UserProfile>> {
        let state = self.state.read().await;
        Ok(state
            .profiles
            .values()
            .find(|p| p.role.student_id() == Some(student_id))
            .cloned())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.state
            .write()
            .await
            .auth_sessions
            .insert(session_id.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Principal> {
        let state = self.state.read().await;
        match state.auth_sessions.get(session_id) {
            Some((user_id, expires_at)) if *expires_at > Utc::now() => {
                let profile = state.profiles.get(user_id).ok_or(PortError::Unauthorized)?;
                Ok(Principal {
                    user_id: *user_id,
                    email: profile.email.clone(),
                })
            }
            _ => Err(PortError::Unauthorized),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.state.write().await.auth_sessions.remove(session_id);
        Ok(())
    }
}

//=========================================================================================
// `SchoolStore` Implementation
//=========================================================================================

#[async_trait]
impl SchoolStore for InMemoryStore {
    async fn school_partitions(&self) -> PortResult<Vec<Uuid>> {
        let state = self.state.read().await;
        let mut ids: Vec<Uuid> = state
            .profiles
            .values()
            .filter(|p| p.role.tag() == "School")
            .map(|p| p.user_id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn insert_class(&self, class: SchoolClass) -> PortResult<()> {
        self.state.write().await.classes.push(class);
        Ok(())
    }

    async fn get_class(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<Option<SchoolClass>> {
        let state = self.state.read().await;
        Ok(state
            .classes
            .iter()
            .find(|c| c.owner_id == owner_id && c.id == class_id)
            .cloned())
    }

    async fn classes(&self, owner_id: Uuid) -> PortResult<Vec<SchoolClass>> {
        let state = self.state.read().await;
        Ok(state
            .classes
            .iter()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn find_class_by_title(
        &self,
        owner_id: Uuid,
        title: &str,
    ) -> PortResult<Option<SchoolClass>> {
        let state = self.state.read().await;
        Ok(state
            .classes
            .iter()
            .find(|c| c.owner_id == owner_id && c.title == title)
            .cloned())
    }

    async fn insert_student(&self, student: Student) -> PortResult<()> {
        self.state.write().await.students.push(student);
        Ok(())
    }

    async fn update_student(&self, student: Student) -> PortResult<()> {
        let mut state = self.state.write().await;
        let slot = state
            .students
            .iter_mut()
            .find(|s| s.id == student.id)
            .ok_or_else(|| PortError::NotFound(format!("Student {} not found", student.id)))?;
        *slot = student;
        Ok(())
    }

    async fn students(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<Vec<Student>> {
        let state = self.state.read().await;
        Ok(state
            .students
            .iter()
            .filter(|s| s.owner_id == owner_id && s.class_id == class_id)
            .cloned()
            .collect())
    }

    async fn get_student(&self, student_id: Uuid) -> PortResult<Option<Student>> {
        let state = self.state.read().await;
        Ok(state.students.iter().find(|s| s.id == student_id).cloned())
    }

    async fn insert_subject(&self, subject: Subject) -> PortResult<()> {
        self.state.write().await.subjects.push(subject);
        Ok(())
    }

    async fn subjects(&self) -> PortResult<Vec<Subject>> {
        Ok(self.state.read().await.subjects.clone())
    }

    async fn get_subject(&self, subject_id: Uuid) -> PortResult<Option<Subject>> {
        let state = self.state.read().await;
        Ok(state.subjects.iter().find(|s| s.id == subject_id).cloned())
    }

    async fn find_subject_by_name(&self, name: &str) -> PortResult<Option<Subject>> {
        let state = self.state.read().await;
        Ok(state.subjects.iter().find(|s| s.name == name).cloned())
    }

    async fn insert_teacher(&self, teacher: Teacher) -> PortResult<()> {
        self.state.write().await.teachers.push(teacher);
        Ok(())
    }

    async fn update_teacher(&self, teacher: Teacher) -> PortResult<()> {
        let mut state = self.state.write().await;
        let slot = state
            .teachers
            .iter_mut()
            .find(|t| t.id == teacher.id)
            .ok_or_else(|| PortError::NotFound(format!("Teacher {} not found", teacher.id)))?;
        *slot = teacher.clone();
        for assignment in state
            .assignments
            .iter_mut()
            .filter(|a| a.teacher_id == teacher.id)
        {
            assignment.teacher_first_name = teacher.first_name.clone();
            assignment.teacher_last_name = teacher.last_name.clone();
        }
        Ok(())
    }

    async fn teachers(&self) -> PortResult<Vec<Teacher>> {
        Ok(self.state.read().await.teachers.clone())
    }

    async fn get_teacher(&self, teacher_id: Uuid) -> PortResult<Option<Teacher>> {
        let state = self.state.read().await;
        Ok(state.teachers.iter().find(|t| t.id == teacher_id).cloned())
    }

    async fn insert_assignment(&self, assignment: ClassAssignment) -> PortResult<()> {
        self.state.write().await.assignments.push(assignment);
        Ok(())
    }

    async fn update_assignment(&self, assignment: ClassAssignment) -> PortResult<()> {
        let mut state = self.state.write().await;
        let slot = state
            .assignments
            .iter_mut()
            .find(|a| a.id == assignment.id)
            .ok_or_else(|| {
                PortError::NotFound(format!("Assignment {} not found", assignment.id))
            })?;
        *slot = assignment;
        Ok(())
    }

    async fn assignments(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<Vec<ClassAssignment>> {
        let state = self.state.read().await;
        Ok(state
            .assignments
            .iter()
            .filter(|a| a.owner_id == owner_id && a.class_id == class_id)
            .cloned()
            .collect())
    }

    async fn find_assignment_for_subject(
        &self,
        owner_id: Uuid,
        class_id: Uuid,
        subject_id: Uuid,
    ) -> PortResult<Option<ClassAssignment>> {
        let state = self.state.read().await;
        Ok(state
            .assignments
            .iter()
            .find(|a| a.owner_id == owner_id && a.class_id == class_id && a.subject_id == subject_id)
            .cloned())
    }

    async fn insert_homework(&self, homework: Homework) -> PortResult<()> {
        self.state.write().await.homework.push(homework);
        Ok(())
    }

    async fn update_homework(&self, homework: Homework) -> PortResult<()> {
        let mut state = self.state.write().await;
        let slot = state
            .homework
            .iter_mut()
            .find(|h| h.id == homework.id)
            .ok_or_else(|| PortError::NotFound(format!("Homework {} not found", homework.id)))?;
        *slot = homework;
        Ok(())
    }

    async fn delete_homework(&self, homework_id: Uuid) -> PortResult<()> {
        let mut state = self.state.write().await;
        let before = state.homework.len();
        state.homework.retain(|h| h.id != homework_id);
        if state.homework.len() == before {
            return Err(PortError::NotFound(format!("Homework {} not found", homework_id)));
        }
        Ok(())
    }

    async fn get_homework(&self, homework_id: Uuid) -> PortResult<Option<Homework>> {
        let state = self.state.read().await;
        Ok(state.homework.iter().find(|h| h.id == homework_id).cloned())
    }

    async fn homework_for(&self, class_id: Uuid, subject_id: Uuid) -> PortResult<Vec<Homework>> {
        let state = self.state.read().await;
        Ok(state
            .homework
            .iter()
            .filter(|h| h.class_id == class_id && h.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn get_timetable(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<Option<Timetable>> {
        let state = self.state.read().await;
        Ok(state
            .timetables
            .get(&class_id)
            .filter(|t| t.owner_id == owner_id)
            .cloned())
    }

    async fn put_timetable(&self, timetable: Timetable) -> PortResult<()> {
        self.state
            .write()
            .await
            .timetables
            .insert(timetable.class_id, timetable);
        Ok(())
    }
}

//=========================================================================================
// `ConversationStore` Implementation
//=========================================================================================

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn get_or_create(&self, key: &ConversationKey) -> PortResult<Conversation> {
        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .entry(key.clone())
            .or_insert_with(|| empty_conversation(key));
        Ok(conversation.clone())
    }

    async fn get(&self, key: &ConversationKey) -> PortResult<Option<Conversation>> {
        Ok(self.state.read().await.conversations.get(key).cloned())
    }

    async fn append(&self, key: &ConversationKey, message: Message) -> PortResult<()> {
        {
            let mut state = self.state.write().await;
            state
                .conversations
                .entry(key.clone())
                .or_insert_with(|| empty_conversation(key))
                .messages
                .push(message);
        }
        self.publish(key);
        Ok(())
    }

    async fn mark_read_for(&self, key: &ConversationKey, reader_email: &str) -> PortResult<usize> {
        let flipped = {
            let mut state = self.state.write().await;
            let Some(conversation) = state.conversations.get_mut(key) else {
                return Ok(0);
            };
            let mut flipped = 0;
            for message in conversation
                .messages
                .iter_mut()
                .filter(|m| m.is_unread_for(reader_email))
            {
                message.status = MessageStatus::Read;
                flipped += 1;
            }
            flipped
        };
        if flipped > 0 {
            self.publish(key);
        }
        Ok(flipped)
    }

    async fn subscribe(&self, key: &ConversationKey) -> PortResult<ConversationStream> {
        // Subscribe before the first read so no change between the two is lost.
        let receiver = self.changes.subscribe();
        let initial = self.get_or_create(key).await?;
        let store = self.clone();
        let watched = key.clone();

        let updates = stream::unfold(receiver, move |mut receiver| {
            let store = store.clone();
            let watched = watched.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(changed) if changed == watched => {
                            let item = store
                                .get(&watched)
                                .await
                                .map(|c| c.unwrap_or_else(|| empty_conversation(&watched)));
                            return Some((item, receiver));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("Subscriber to {} lagged by {} changes", watched, skipped);
                            let item = store
                                .get(&watched)
                                .await
                                .map(|c| c.unwrap_or_else(|| empty_conversation(&watched)));
                            return Some((item, receiver));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream::once(async move { Ok(initial) }).chain(updates).boxed())
    }
}

//=========================================================================================
// `RemarkStore` Implementation
//=========================================================================================

#[async_trait]
impl RemarkStore for InMemoryStore {
    async fn insert_remark(&self, remark: Remark) -> PortResult<()> {
        self.state.write().await.remarks.push(remark);
        Ok(())
    }

    async fn get_remark(&self, remark_id: Uuid) -> PortResult<Option<Remark>> {
        let state = self.state.read().await;
        Ok(state.remarks.iter().find(|r| r.id == remark_id).cloned())
    }

    async fn update_remark_text(&self, remark_id: Uuid, text: &str) -> PortResult<()> {
        let mut state = self.state.write().await;
        let remark = state
            .remarks
            .iter_mut()
            .find(|r| r.id == remark_id)
            .ok_or_else(|| PortError::NotFound(format!("Remark {} not found", remark_id)))?;
        remark.text = text.to_string();
        Ok(())
    }

    async fn delete_remark(&self, remark_id: Uuid) -> PortResult<()> {
        let mut state = self.state.write().await;
        let before = state.remarks.len();
        state.remarks.retain(|r| r.id != remark_id);
        if state.remarks.len() == before {
            return Err(PortError::NotFound(format!("Remark {} not found", remark_id)));
        }
        Ok(())
    }

    async fn remarks_for(&self, student_id: Uuid, subject_id: Uuid) -> PortResult<Vec<Remark>> {
        let state = self.state.read().await;
        Ok(state
            .remarks
            .iter()
            .filter(|r| r.student_id == student_id && r.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn count_remarks_with_status(
        &self,
        student_id: Uuid,
        subject_id: Option<Uuid>,
        status: MessageStatus,
    ) -> PortResult<usize> {
        let state = self.state.read().await;
        Ok(state
            .remarks
            .iter()
            .filter(|r| r.student_id == student_id && r.status == status)
            .filter(|r| subject_id.map_or(true, |s| r.subject_id == s))
            .count())
    }

    async fn mark_remarks_read(&self, student_id: Uuid, subject_id: Uuid) -> PortResult<usize> {
        let mut state = self.state.write().await;
        let mut flipped = 0;
        for remark in state.remarks.iter_mut().filter(|r| {
            r.student_id == student_id
                && r.subject_id == subject_id
                && r.status == MessageStatus::Unread
        }) {
            remark.status = MessageStatus::Read;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn insert_notification(&self, notification: Notification) -> PortResult<()> {
        self.state.write().await.notifications.push(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use chrono::Duration;

    fn school_profile(email: &str) -> UserProfile {
        UserProfile {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: Some("Ecole Al Amal".to_string()),
            role: Role::School,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_is_a_conflict() {
        let store = InMemoryStore::new();
        store
            .create_account(school_profile("ecole@x.ma"), "hash")
            .await
            .unwrap();
        let err = store
            .create_account(school_profile(" ECOLE@x.ma"), "hash")
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected() {
        let store = InMemoryStore::new();
        let profile = store
            .create_account(school_profile("ecole@x.ma"), "hash")
            .await
            .unwrap();
        store
            .create_auth_session("live", profile.user_id, Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        store
            .create_auth_session("stale", profile.user_id, Utc::now() - Duration::hours(1))
            .await
            .unwrap();

        let principal = store.validate_auth_session("live").await.unwrap();
        assert_eq!(principal.email, "ecole@x.ma");
        assert!(matches!(
            store.validate_auth_session("stale").await,
            Err(PortError::Unauthorized)
        ));

        store.delete_auth_session("live").await.unwrap();
        assert!(store.validate_auth_session("live").await.is_err());
    }

    #[tokio::test]
    async fn test_school_partitions_only_list_school_accounts() {
        let store = InMemoryStore::new();
        let school = store
            .create_account(school_profile("ecole@x.ma"), "hash")
            .await
            .unwrap();
        store
            .create_account(
                UserProfile {
                    user_id: Uuid::new_v4(),
                    email: "prof@x.ma".to_string(),
                    display_name: None,
                    role: Role::Teacher {
                        teacher_id: Uuid::new_v4(),
                    },
                },
                "hash",
            )
            .await
            .unwrap();

        assert_eq!(store.school_partitions().await.unwrap(), vec![school.user_id]);
    }

    #[tokio::test]
    async fn test_mark_read_on_missing_conversation_is_noop() {
        let store = InMemoryStore::new();
        let key = ConversationKey::between("a@x.ma", "b@x.ma");
        assert_eq!(store.mark_read_for(&key, "a@x.ma").await.unwrap(), 0);
        assert!(store.get(&key).await.unwrap().is_none());
    }
}
