//! crates/school_sync_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete store (Postgres, in-memory, ...).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::conversation::ConversationKey;
use crate::domain::{
    ClassAssignment, Conversation, Homework, Message, MessageStatus, Notification, Principal,
    Remark, SchoolClass, Student, Subject, Teacher, Timetable, UserCredentials, UserProfile,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    Conflict(String),
    #[error("Invalid input: {0}")]
    Invalid(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Live view of one conversation. Every item is the full conversation as of a change.
/// Dropping the stream ends the subscription.
pub type ConversationStream = Pin<Box<dyn Stream<Item = PortResult<Conversation>> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Accounts, profiles and login sessions.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn create_account(
        &self,
        profile: UserProfile,
        hashed_password: &str,
    ) -> PortResult<UserProfile>;

    async fn get_credentials_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Option<UserProfile>>;

    async fn profile_for_teacher(&self, teacher_id: Uuid) -> PortResult<Option<UserProfile>>;

    async fn profile_for_student(&self, student_id: Uuid) -> PortResult<Option<UserProfile>>;

    // --- Auth Methods ---
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Returns the principal owning a live session, `Unauthorized` otherwise.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Principal>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;
}

/// Records owned by school partitions, plus the shared subject and teacher catalogues.
#[async_trait]
pub trait SchoolStore: Send + Sync {
    /// Ids of every school account; each one owns a partition.
    async fn school_partitions(&self) -> PortResult<Vec<Uuid>>;

    // --- Classes ---
    async fn insert_class(&self, class: SchoolClass) -> PortResult<()>;
    async fn get_class(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<Option<SchoolClass>>;
    async fn classes(&self, owner_id: Uuid) -> PortResult<Vec<SchoolClass>>;
    async fn find_class_by_title(
        &self,
        owner_id: Uuid,
        title: &str,
    ) -> PortResult<Option<SchoolClass>>;

    // --- Students ---
    async fn insert_student(&self, student: Student) -> PortResult<()>;
    async fn update_student(&self, student: Student) -> PortResult<()>;
    async fn students(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<Vec<Student>>;
    async fn get_student(&self, student_id: Uuid) -> PortResult<Option<Student>>;

    // --- Subject catalogue ---
    async fn insert_subject(&self, subject: Subject) -> PortResult<()>;
    async fn subjects(&self) -> PortResult<Vec<Subject>>;
    async fn get_subject(&self, subject_id: Uuid) -> PortResult<Option<Subject>>;
    async fn find_subject_by_name(&self, name: &str) -> PortResult<Option<Subject>>;

    // --- Teacher catalogue ---
    async fn insert_teacher(&self, teacher: Teacher) -> PortResult<()>;
    /// Also refreshes the teacher names copied onto class assignments.
    async fn update_teacher(&self, teacher: Teacher) -> PortResult<()>;
    async fn teachers(&self) -> PortResult<Vec<Teacher>>;
    async fn get_teacher(&self, teacher_id: Uuid) -> PortResult<Option<Teacher>>;

    // --- Class assignments ---
    async fn insert_assignment(&self, assignment: ClassAssignment) -> PortResult<()>;
    async fn update_assignment(&self, assignment: ClassAssignment) -> PortResult<()>;
    async fn assignments(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<Vec<ClassAssignment>>;
    async fn find_assignment_for_subject(
        &self,
        owner_id: Uuid,
        class_id: Uuid,
        subject_id: Uuid,
    ) -> PortResult<Option<ClassAssignment>>;

    // --- Homework ---
    async fn insert_homework(&self, homework: Homework) -> PortResult<()>;
    async fn update_homework(&self, homework: Homework) -> PortResult<()>;
    async fn delete_homework(&self, homework_id: Uuid) -> PortResult<()>;
    async fn get_homework(&self, homework_id: Uuid) -> PortResult<Option<Homework>>;
    async fn homework_for(&self, class_id: Uuid, subject_id: Uuid) -> PortResult<Vec<Homework>>;

    // --- Timetables ---
    async fn get_timetable(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<Option<Timetable>>;
    /// Replaces the whole timetable of the class.
    async fn put_timetable(&self, timetable: Timetable) -> PortResult<()>;
}

/// Per-conversation message logs.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Returns the conversation, creating an empty one if it does not exist yet.
    async fn get_or_create(&self, key: &ConversationKey) -> PortResult<Conversation>;

    async fn get(&self, key: &ConversationKey) -> PortResult<Option<Conversation>>;

    /// Appends to the log, creating the conversation when absent.
    async fn append(&self, key: &ConversationKey, message: Message) -> PortResult<()>;

    /// Marks as read every message whose sender is not `reader_email`.
    /// Returns how many messages changed.
    async fn mark_read_for(&self, key: &ConversationKey, reader_email: &str) -> PortResult<usize>;

    /// Emits the current state once, then again after every change.
    async fn subscribe(&self, key: &ConversationKey) -> PortResult<ConversationStream>;
}

/// Teacher remarks and the notifications written alongside them.
#[async_trait]
pub trait RemarkStore: Send + Sync {
    async fn insert_remark(&self, remark: Remark) -> PortResult<()>;

    async fn get_remark(&self, remark_id: Uuid) -> PortResult<Option<Remark>>;

    async fn update_remark_text(&self, remark_id: Uuid, text: &str) -> PortResult<()>;

    async fn delete_remark(&self, remark_id: Uuid) -> PortResult<()>;

    async fn remarks_for(&self, student_id: Uuid, subject_id: Uuid) -> PortResult<Vec<Remark>>;

    async fn count_remarks_with_status(
        &self,
        student_id: Uuid,
        subject_id: Option<Uuid>,
        status: MessageStatus,
    ) -> PortResult<usize>;

    /// Flips the student's unread remarks in the subject. Returns how many changed.
    async fn mark_remarks_read(&self, student_id: Uuid, subject_id: Uuid) -> PortResult<usize>;

    async fn insert_notification(&self, notification: Notification) -> PortResult<()>;
}
