//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the PostgreSQL implementation of the
//! `DirectoryStore`, `SchoolStore`, `ConversationStore` and `RemarkStore` ports from
//! the `core` crate. Conversation changes are broadcast with LISTEN/NOTIFY so that
//! every open subscription sees writes made by any instance of the service.
//! One listening connection per adapter fans the notifications out to all
//! subscriptions through a broadcast channel.

use async_stream::stream;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::{pin_mut, Stream, StreamExt};
use school_sync_core::conversation::{normalize_email, ConversationKey};
use school_sync_core::domain::{
    ClassAssignment, Conversation, Homework, Message, MessageStatus, Notification, Principal,
    Remark, Role, SchoolClass, Student, Subject, Teacher, Timetable, TimetableSlot,
    UserCredentials, UserProfile,
};
use school_sync_core::ports::{
    ConversationStore, ConversationStream, DirectoryStore, PortError, PortResult, RemarkStore,
    SchoolStore,
};
use sqlx::postgres::PgListener;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The NOTIFY channel carrying the key of every changed conversation.
const CONVERSATION_CHANNEL: &str = "conversation_changed";

const CHANGE_BUFFER: usize = 256;
const LISTENER_RETRY: Duration = Duration::from_secs(2);

/// What the shared listener tells subscriptions.
#[derive(Debug, Clone)]
enum Change {
    /// The conversation with this key was written.
    Conversation(String),
    /// The listening connection was re-established; notifications may have been missed.
    Resync,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements all of the store ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
    changes: broadcast::Sender<Change>,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`. Subscriptions only see changes once
    /// [`DbAdapter::start_change_feed`] has run.
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self { pool, changes }
    }

    /// Opens the adapter's single LISTEN connection and spawns the task that
    /// forwards its notifications to every subscription.
    pub async fn start_change_feed(&self) -> Result<(), sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CONVERSATION_CHANNEL).await?;
        info!("Listening for conversation changes on '{}'", CONVERSATION_CHANNEL);
        tokio::spawn(forward_changes(listener, self.changes.clone()));
        Ok(())
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn load_conversation(&self, key: &ConversationKey) -> PortResult<Option<Conversation>> {
        let created_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT created_at FROM conversations WHERE key = $1",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        let Some(created_at) = created_at else {
            return Ok(None);
        };

        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT id, conversation_key, created_at, text, sender_email, status, teacher_id, student_id \
             FROM messages WHERE conversation_key = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(key.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let messages = records
            .into_iter()
            .map(|r| r.to_domain())
            .collect::<PortResult<Vec<_>>>()?;

        Ok(Some(Conversation {
            key: key.clone(),
            created_at,
            messages,
        }))
    }

    async fn notify_changed(&self, key: &ConversationKey) -> PortResult<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CONVERSATION_CHANNEL)
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}

async fn forward_changes(mut listener: PgListener, changes: broadcast::Sender<Change>) {
    loop {
        // `try_recv` reports a dropped connection as `None`; the next call reconnects.
        let change = match listener.try_recv().await {
            Ok(Some(notification)) => Change::Conversation(notification.payload().to_string()),
            Ok(None) => {
                warn!("Conversation listener lost its connection; reconnecting");
                Change::Resync
            }
            Err(e) => {
                error!("Conversation listener failed: {}", e);
                tokio::time::sleep(LISTENER_RETRY).await;
                continue;
            }
        };
        // No receivers simply means nobody is watching.
        let _ = changes.send(change);
    }
}

/// Yields once for every change that may touch `watched`. Ends with the feed.
///
/// A lagging receiver has lost changes it cannot name, so it refreshes too.
fn refreshes(
    watched: ConversationKey,
    mut changes: broadcast::Receiver<Change>,
) -> impl Stream<Item = ()> {
    stream! {
        loop {
            match changes.recv().await {
                Ok(Change::Conversation(changed)) if changed == watched.as_str() => {
                    yield ();
                }
                Ok(Change::Conversation(_)) => continue,
                Ok(Change::Resync) => {
                    yield ();
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Subscriber to {} lagged by {} changes", watched, skipped);
                    yield ();
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

/// Maps a failed insert, turning unique-constraint violations into `Conflict`.
fn write_error(e: sqlx::Error, what: &str) -> PortError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PortError::Conflict(what.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn parse_status(raw: &str) -> PortResult<MessageStatus> {
    MessageStatus::parse(raw)
        .ok_or_else(|| PortError::Unexpected(format!("Unknown status '{}' in database", raw)))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    email: String,
    display_name: Option<String>,
    role: String,
    teacher_id: Option<Uuid>,
    student_id: Option<Uuid>,
    class_id: Option<Uuid>,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<UserProfile> {
        let role = Role::from_parts(&self.role, self.teacher_id, self.student_id, self.class_id)
            .ok_or_else(|| {
                PortError::Unexpected(format!(
                    "User {} has an invalid role '{}'",
                    self.user_id, self.role
                ))
            })?;
        Ok(UserProfile {
            user_id: self.user_id,
            email: self.email,
            display_name: self.display_name,
            role,
        })
    }
}

const USER_COLUMNS: &str =
    "user_id, email, display_name, role, teacher_id, student_id, class_id";

#[derive(FromRow)]
struct CredentialsRecord {
    user_id: Uuid,
    email: String,
    hashed_password: String,
}

#[derive(FromRow)]
struct ClassRecord {
    id: Uuid,
    owner_id: Uuid,
    title: String,
}
impl ClassRecord {
    fn to_domain(self) -> SchoolClass {
        SchoolClass {
            id: self.id,
            owner_id: self.owner_id,
            title: self.title,
        }
    }
}

#[derive(FromRow)]
struct StudentRecord {
    id: Uuid,
    owner_id: Uuid,
    class_id: Uuid,
    massar_code: String,
    first_name: String,
    last_name: String,
    birthdate: Option<NaiveDate>,
}
impl StudentRecord {
    fn to_domain(self) -> Student {
        Student {
            id: self.id,
            owner_id: self.owner_id,
            class_id: self.class_id,
            massar_code: self.massar_code,
            first_name: self.first_name,
            last_name: self.last_name,
            birthdate: self.birthdate,
        }
    }
}

const STUDENT_COLUMNS: &str =
    "id, owner_id, class_id, massar_code, first_name, last_name, birthdate";

#[derive(FromRow)]
struct SubjectRecord {
    id: Uuid,
    name: String,
}
impl SubjectRecord {
    fn to_domain(self) -> Subject {
        Subject {
            id: self.id,
            name: self.name,
        }
    }
}

#[derive(FromRow)]
struct TeacherRecord {
    id: Uuid,
    first_name: String,
    last_name: String,
    subject_name: String,
    birthdate: Option<NaiveDate>,
}
impl TeacherRecord {
    fn to_domain(self) -> Teacher {
        Teacher {
            id: self.id,
            first_name: self.first_name,
            last_name: self.last_name,
            subject_name: self.subject_name,
            birthdate: self.birthdate,
        }
    }
}

#[derive(FromRow)]
struct AssignmentRecord {
    id: Uuid,
    owner_id: Uuid,
    class_id: Uuid,
    subject_id: Uuid,
    subject_name: String,
    teacher_id: Uuid,
    teacher_last_name: String,
    teacher_first_name: String,
}
impl AssignmentRecord {
    fn to_domain(self) -> ClassAssignment {
        ClassAssignment {
            id: self.id,
            owner_id: self.owner_id,
            class_id: self.class_id,
            subject_id: self.subject_id,
            subject_name: self.subject_name,
            teacher_id: self.teacher_id,
            teacher_last_name: self.teacher_last_name,
            teacher_first_name: self.teacher_first_name,
        }
    }
}

const ASSIGNMENT_COLUMNS: &str = "id, owner_id, class_id, subject_id, subject_name, teacher_id, \
                                  teacher_last_name, teacher_first_name";

#[derive(FromRow)]
struct HomeworkRecord {
    id: Uuid,
    owner_id: Uuid,
    class_id: Uuid,
    subject_id: Uuid,
    teacher_id: Uuid,
    title: String,
    description: String,
    deadline: DateTime<Utc>,
    created_at: DateTime<Utc>,
}
impl HomeworkRecord {
    fn to_domain(self) -> Homework {
        Homework {
            id: self.id,
            owner_id: self.owner_id,
            class_id: self.class_id,
            subject_id: self.subject_id,
            teacher_id: self.teacher_id,
            title: self.title,
            description: self.description,
            deadline: self.deadline,
            created_at: self.created_at,
        }
    }
}

const HOMEWORK_COLUMNS: &str =
    "id, owner_id, class_id, subject_id, teacher_id, title, description, deadline, created_at";

#[derive(FromRow)]
struct TimetableRecord {
    owner_id: Uuid,
    class_id: Uuid,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct TimetableSlotRecord {
    day: String,
    period: String,
    subject_name: String,
}
impl TimetableSlotRecord {
    fn to_domain(self) -> TimetableSlot {
        TimetableSlot {
            day: self.day,
            period: self.period,
            subject_name: self.subject_name,
        }
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_key: String,
    created_at: DateTime<Utc>,
    text: String,
    sender_email: String,
    status: String,
    teacher_id: Option<Uuid>,
    student_id: Option<Uuid>,
}
impl MessageRecord {
    fn to_domain(self) -> PortResult<Message> {
        Ok(Message {
            id: self.id,
            conversation: ConversationKey::from_stored(self.conversation_key),
            created_at: self.created_at,
            text: self.text,
            sender_email: self.sender_email,
            status: parse_status(&self.status)?,
            teacher_id: self.teacher_id,
            student_id: self.student_id,
        })
    }
}

#[derive(FromRow)]
struct RemarkRecord {
    id: Uuid,
    student_id: Uuid,
    class_id: Uuid,
    subject_id: Uuid,
    teacher_id: Uuid,
    text: String,
    status: String,
    created_at: DateTime<Utc>,
}
impl RemarkRecord {
    fn to_domain(self) -> PortResult<Remark> {
        Ok(Remark {
            id: self.id,
            student_id: self.student_id,
            class_id: self.class_id,
            subject_id: self.subject_id,
            teacher_id: self.teacher_id,
            text: self.text,
            status: parse_status(&self.status)?,
            created_at: self.created_at,
        })
    }
}

//=========================================================================================
// `DirectoryStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DirectoryStore for DbAdapter {
    async fn create_account(
        &self,
        profile: UserProfile,
        hashed_password: &str,
    ) -> PortResult<UserProfile> {
        let email = normalize_email(&profile.email);
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "INSERT INTO users (user_id, email, hashed_password, role, display_name, teacher_id, student_id, class_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(profile.user_id)
        .bind(&email)
        .bind(hashed_password)
        .bind(profile.role.tag())
        .bind(&profile.display_name)
        .bind(profile.role.teacher_id())
        .bind(profile.role.student_id())
        .bind(profile.role.class_id())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| write_error(e, &format!("account {}", email)))?;

        record.to_domain()
    }

    async fn get_credentials_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let email = normalize_email(email);
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT user_id, email, hashed_password FROM users WHERE email = $1",
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))?;

        Ok(UserCredentials {
            user_id: record.user_id,
            email: record.email,
            hashed_password: record.hashed_password,
        })
    }

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Option<UserProfile>> {
        sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users WHERE user_id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .map(UserRecord::to_domain)
        .transpose()
    }

    async fn profile_for_teacher(&self, teacher_id: Uuid) -> PortResult<Option<UserProfile>> {
        sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users WHERE teacher_id = $1 LIMIT 1",
            USER_COLUMNS
        ))
        .bind(teacher_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .map(UserRecord::to_domain)
        .transpose()
    }

    async fn profile_for_student(&self, student_id: Uuid) -> PortResult<Option<UserProfile>> {
        sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users WHERE student_id = $1 LIMIT 1",
            USER_COLUMNS
        ))
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .map(UserRecord::to_domain)
        .transpose()
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Principal> {
        let row = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT u.user_id, u.email FROM auth_sessions s \
             JOIN users u ON u.user_id = s.user_id \
             WHERE s.id = $1 AND s.expires_at > now()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        let (user_id, email) = row.ok_or(PortError::Unauthorized)?;
        Ok(Principal { user_id, email })
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `SchoolStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SchoolStore for DbAdapter {
    async fn school_partitions(&self) -> PortResult<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>("SELECT user_id FROM users WHERE role = $1 ORDER BY user_id")
            .bind(Role::School.tag())
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)
    }

    async fn insert_class(&self, class: SchoolClass) -> PortResult<()> {
        sqlx::query("INSERT INTO classes (id, owner_id, title) VALUES ($1, $2, $3)")
            .bind(class.id)
            .bind(class.owner_id)
            .bind(&class.title)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(e, &format!("class {}", class.title)))?;
        Ok(())
    }

    async fn get_class(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<Option<SchoolClass>> {
        let record = sqlx::query_as::<_, ClassRecord>(
            "SELECT id, owner_id, title FROM classes WHERE owner_id = $1 AND id = $2",
        )
        .bind(owner_id)
        .bind(class_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(ClassRecord::to_domain))
    }

    async fn classes(&self, owner_id: Uuid) -> PortResult<Vec<SchoolClass>> {
        let records = sqlx::query_as::<_, ClassRecord>(
            "SELECT id, owner_id, title FROM classes WHERE owner_id = $1 ORDER BY title ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(ClassRecord::to_domain).collect())
    }

    async fn find_class_by_title(
        &self,
        owner_id: Uuid,
        title: &str,
    ) -> PortResult<Option<SchoolClass>> {
        let record = sqlx::query_as::<_, ClassRecord>(
            "SELECT id, owner_id, title FROM classes WHERE owner_id = $1 AND title = $2",
        )
        .bind(owner_id)
        .bind(title)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(ClassRecord::to_domain))
    }

    async fn insert_student(&self, student: Student) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO students (id, owner_id, class_id, massar_code, first_name, last_name, birthdate) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(student.id)
        .bind(student.owner_id)
        .bind(student.class_id)
        .bind(&student.massar_code)
        .bind(&student.first_name)
        .bind(&student.last_name)
        .bind(student.birthdate)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn update_student(&self, student: Student) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE students SET massar_code = $1, first_name = $2, last_name = $3, birthdate = $4 \
             WHERE id = $5",
        )
        .bind(&student.massar_code)
        .bind(&student.first_name)
        .bind(&student.last_name)
        .bind(student.birthdate)
        .bind(student.id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Student {} not found", student.id)));
        }
        Ok(())
    }

    async fn students(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<Vec<Student>> {
        let records = sqlx::query_as::<_, StudentRecord>(&format!(
            "SELECT {} FROM students WHERE owner_id = $1 AND class_id = $2 \
             ORDER BY last_name ASC, first_name ASC",
            STUDENT_COLUMNS
        ))
        .bind(owner_id)
        .bind(class_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(StudentRecord::to_domain).collect())
    }

    async fn get_student(&self, student_id: Uuid) -> PortResult<Option<Student>> {
        let record = sqlx::query_as::<_, StudentRecord>(&format!(
            "SELECT {} FROM students WHERE id = $1",
            STUDENT_COLUMNS
        ))
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(StudentRecord::to_domain))
    }

    async fn insert_subject(&self, subject: Subject) -> PortResult<()> {
        sqlx::query("INSERT INTO subjects (id, name) VALUES ($1, $2)")
            .bind(subject.id)
            .bind(&subject.name)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(e, &format!("subject {}", subject.name)))?;
        Ok(())
    }

    async fn subjects(&self) -> PortResult<Vec<Subject>> {
        let records =
            sqlx::query_as::<_, SubjectRecord>("SELECT id, name FROM subjects ORDER BY name ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(unexpected)?;
        Ok(records.into_iter().map(SubjectRecord::to_domain).collect())
    }

    async fn get_subject(&self, subject_id: Uuid) -> PortResult<Option<Subject>> {
        let record =
            sqlx::query_as::<_, SubjectRecord>("SELECT id, name FROM subjects WHERE id = $1")
                .bind(subject_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
        Ok(record.map(SubjectRecord::to_domain))
    }

    async fn find_subject_by_name(&self, name: &str) -> PortResult<Option<Subject>> {
        let record =
            sqlx::query_as::<_, SubjectRecord>("SELECT id, name FROM subjects WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
        Ok(record.map(SubjectRecord::to_domain))
    }

    async fn insert_teacher(&self, teacher: Teacher) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO teachers (id, first_name, last_name, subject_name, birthdate) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(teacher.id)
        .bind(&teacher.first_name)
        .bind(&teacher.last_name)
        .bind(&teacher.subject_name)
        .bind(teacher.birthdate)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn update_teacher(&self, teacher: Teacher) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let result = sqlx::query(
            "UPDATE teachers SET first_name = $1, last_name = $2, subject_name = $3, birthdate = $4 \
             WHERE id = $5",
        )
        .bind(&teacher.first_name)
        .bind(&teacher.last_name)
        .bind(&teacher.subject_name)
        .bind(teacher.birthdate)
        .bind(teacher.id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Teacher {} not found", teacher.id)));
        }

        sqlx::query(
            "UPDATE class_assignments SET teacher_first_name = $1, teacher_last_name = $2 \
             WHERE teacher_id = $3",
        )
        .bind(&teacher.first_name)
        .bind(&teacher.last_name)
        .bind(teacher.id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn teachers(&self) -> PortResult<Vec<Teacher>> {
        let records = sqlx::query_as::<_, TeacherRecord>(
            "SELECT id, first_name, last_name, subject_name, birthdate FROM teachers \
             ORDER BY last_name ASC, first_name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(TeacherRecord::to_domain).collect())
    }

    async fn get_teacher(&self, teacher_id: Uuid) -> PortResult<Option<Teacher>> {
        let record = sqlx::query_as::<_, TeacherRecord>(
            "SELECT id, first_name, last_name, subject_name, birthdate FROM teachers WHERE id = $1",
        )
        .bind(teacher_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(TeacherRecord::to_domain))
    }

    async fn insert_assignment(&self, assignment: ClassAssignment) -> PortResult<()> {
        sqlx::query(&format!(
            "INSERT INTO class_assignments ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            ASSIGNMENT_COLUMNS
        ))
        .bind(assignment.id)
        .bind(assignment.owner_id)
        .bind(assignment.class_id)
        .bind(assignment.subject_id)
        .bind(&assignment.subject_name)
        .bind(assignment.teacher_id)
        .bind(&assignment.teacher_last_name)
        .bind(&assignment.teacher_first_name)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            write_error(
                e,
                &format!("assignment of {} for this class", assignment.subject_name),
            )
        })?;
        Ok(())
    }

    async fn update_assignment(&self, assignment: ClassAssignment) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE class_assignments \
             SET teacher_id = $1, teacher_first_name = $2, teacher_last_name = $3 \
             WHERE id = $4",
        )
        .bind(assignment.teacher_id)
        .bind(&assignment.teacher_first_name)
        .bind(&assignment.teacher_last_name)
        .bind(assignment.id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Assignment {} not found",
                assignment.id
            )));
        }
        Ok(())
    }

    async fn assignments(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<Vec<ClassAssignment>> {
        let records = sqlx::query_as::<_, AssignmentRecord>(&format!(
            "SELECT {} FROM class_assignments WHERE owner_id = $1 AND class_id = $2 \
             ORDER BY subject_name ASC",
            ASSIGNMENT_COLUMNS
        ))
        .bind(owner_id)
        .bind(class_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(AssignmentRecord::to_domain).collect())
    }

    async fn find_assignment_for_subject(
        &self,
        owner_id: Uuid,
        class_id: Uuid,
        subject_id: Uuid,
    ) -> PortResult<Option<ClassAssignment>> {
        let record = sqlx::query_as::<_, AssignmentRecord>(&format!(
            "SELECT {} FROM class_assignments \
             WHERE owner_id = $1 AND class_id = $2 AND subject_id = $3",
            ASSIGNMENT_COLUMNS
        ))
        .bind(owner_id)
        .bind(class_id)
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(AssignmentRecord::to_domain))
    }

    async fn insert_homework(&self, homework: Homework) -> PortResult<()> {
        sqlx::query(&format!(
            "INSERT INTO homework ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            HOMEWORK_COLUMNS
        ))
        .bind(homework.id)
        .bind(homework.owner_id)
        .bind(homework.class_id)
        .bind(homework.subject_id)
        .bind(homework.teacher_id)
        .bind(&homework.title)
        .bind(&homework.description)
        .bind(homework.deadline)
        .bind(homework.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn update_homework(&self, homework: Homework) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE homework SET title = $1, description = $2, deadline = $3 WHERE id = $4",
        )
        .bind(&homework.title)
        .bind(&homework.description)
        .bind(homework.deadline)
        .bind(homework.id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Homework {} not found", homework.id)));
        }
        Ok(())
    }

    async fn delete_homework(&self, homework_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM homework WHERE id = $1")
            .bind(homework_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Homework {} not found", homework_id)));
        }
        Ok(())
    }

    async fn get_homework(&self, homework_id: Uuid) -> PortResult<Option<Homework>> {
        let record = sqlx::query_as::<_, HomeworkRecord>(&format!(
            "SELECT {} FROM homework WHERE id = $1",
            HOMEWORK_COLUMNS
        ))
        .bind(homework_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(HomeworkRecord::to_domain))
    }

    async fn homework_for(&self, class_id: Uuid, subject_id: Uuid) -> PortResult<Vec<Homework>> {
        let records = sqlx::query_as::<_, HomeworkRecord>(&format!(
            "SELECT {} FROM homework WHERE class_id = $1 AND subject_id = $2",
            HOMEWORK_COLUMNS
        ))
        .bind(class_id)
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(HomeworkRecord::to_domain).collect())
    }

    async fn get_timetable(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<Option<Timetable>> {
        let Some(record) = sqlx::query_as::<_, TimetableRecord>(
            "SELECT owner_id, class_id, updated_at FROM timetables \
             WHERE owner_id = $1 AND class_id = $2",
        )
        .bind(owner_id)
        .bind(class_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        else {
            return Ok(None);
        };

        let slots = sqlx::query_as::<_, TimetableSlotRecord>(
            "SELECT day, period, subject_name FROM timetable_slots WHERE class_id = $1",
        )
        .bind(class_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(Some(Timetable::new(
            record.owner_id,
            record.class_id,
            slots.into_iter().map(TimetableSlotRecord::to_domain).collect(),
            record.updated_at,
        )))
    }

    async fn put_timetable(&self, timetable: Timetable) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query(
            "INSERT INTO timetables (class_id, owner_id, updated_at) VALUES ($1, $2, $3) \
             ON CONFLICT (class_id) DO UPDATE SET updated_at = EXCLUDED.updated_at",
        )
        .bind(timetable.class_id)
        .bind(timetable.owner_id)
        .bind(timetable.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        sqlx::query("DELETE FROM timetable_slots WHERE class_id = $1")
            .bind(timetable.class_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        for slot in &timetable.slots {
            sqlx::query(
                "INSERT INTO timetable_slots (class_id, day, period, subject_name) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(timetable.class_id)
            .bind(&slot.day)
            .bind(&slot.period)
            .bind(&slot.subject_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(e, &format!("{} on {}", slot.period, slot.day)))?;
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `ConversationStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ConversationStore for DbAdapter {
    async fn get_or_create(&self, key: &ConversationKey) -> PortResult<Conversation> {
        sqlx::query("INSERT INTO conversations (key) VALUES ($1) ON CONFLICT (key) DO NOTHING")
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        self.load_conversation(key)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Conversation {} not found", key)))
    }

    async fn get(&self, key: &ConversationKey) -> PortResult<Option<Conversation>> {
        self.load_conversation(key).await
    }

    async fn append(&self, key: &ConversationKey, message: Message) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query("INSERT INTO conversations (key) VALUES ($1) ON CONFLICT (key) DO NOTHING")
            .bind(key.as_str())
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        sqlx::query(
            "INSERT INTO messages (id, conversation_key, created_at, text, sender_email, status, teacher_id, student_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(message.id)
        .bind(key.as_str())
        .bind(message.created_at)
        .bind(&message.text)
        .bind(&message.sender_email)
        .bind(message.status.as_str())
        .bind(message.teacher_id)
        .bind(message.student_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        // Delivered to listeners on commit.
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CONVERSATION_CHANNEL)
            .bind(key.as_str())
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn mark_read_for(&self, key: &ConversationKey, reader_email: &str) -> PortResult<usize> {
        let result = sqlx::query(
            "UPDATE messages SET status = $1 \
             WHERE conversation_key = $2 AND status = $3 AND lower(sender_email) <> lower($4)",
        )
        .bind(MessageStatus::Read.as_str())
        .bind(key.as_str())
        .bind(MessageStatus::Unread.as_str())
        .bind(reader_email)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        let flipped = result.rows_affected() as usize;
        if flipped > 0 {
            self.notify_changed(key).await?;
        }
        Ok(flipped)
    }

    async fn subscribe(&self, key: &ConversationKey) -> PortResult<ConversationStream> {
        // Subscribe before the first read so no change between the two is lost.
        let changes = self.changes.subscribe();
        let initial = self.get_or_create(key).await?;
        let adapter = self.clone();
        let watched = key.clone();

        let updates = stream! {
            yield Ok(initial);
            let relevant = refreshes(watched.clone(), changes);
            pin_mut!(relevant);
            while relevant.next().await.is_some() {
                yield adapter.get_or_create(&watched).await;
            }
        };

        Ok(Box::pin(updates))
    }
}

//=========================================================================================
// `RemarkStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl RemarkStore for DbAdapter {
    async fn insert_remark(&self, remark: Remark) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO remarks (id, student_id, class_id, subject_id, teacher_id, text, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(remark.id)
        .bind(remark.student_id)
        .bind(remark.class_id)
        .bind(remark.subject_id)
        .bind(remark.teacher_id)
        .bind(&remark.text)
        .bind(remark.status.as_str())
        .bind(remark.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_remark(&self, remark_id: Uuid) -> PortResult<Option<Remark>> {
        sqlx::query_as::<_, RemarkRecord>(
            "SELECT id, student_id, class_id, subject_id, teacher_id, text, status, created_at \
             FROM remarks WHERE id = $1",
        )
        .bind(remark_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .map(RemarkRecord::to_domain)
        .transpose()
    }

    async fn update_remark_text(&self, remark_id: Uuid, text: &str) -> PortResult<()> {
        let result = sqlx::query("UPDATE remarks SET text = $1 WHERE id = $2")
            .bind(text)
            .bind(remark_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Remark {} not found", remark_id)));
        }
        Ok(())
    }

    async fn delete_remark(&self, remark_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM remarks WHERE id = $1")
            .bind(remark_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Remark {} not found", remark_id)));
        }
        Ok(())
    }

    async fn remarks_for(&self, student_id: Uuid, subject_id: Uuid) -> PortResult<Vec<Remark>> {
        sqlx::query_as::<_, RemarkRecord>(
            "SELECT id, student_id, class_id, subject_id, teacher_id, text, status, created_at \
             FROM remarks WHERE student_id = $1 AND subject_id = $2 ORDER BY created_at ASC",
        )
        .bind(student_id)
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?
        .into_iter()
        .map(RemarkRecord::to_domain)
        .collect()
    }

    async fn count_remarks_with_status(
        &self,
        student_id: Uuid,
        subject_id: Option<Uuid>,
        status: MessageStatus,
    ) -> PortResult<usize> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM remarks \
             WHERE student_id = $1 AND status = $2 AND ($3::uuid IS NULL OR subject_id = $3)",
        )
        .bind(student_id)
        .bind(status.as_str())
        .bind(subject_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(count as usize)
    }

    async fn mark_remarks_read(&self, student_id: Uuid, subject_id: Uuid) -> PortResult<usize> {
        let result = sqlx::query(
            "UPDATE remarks SET status = $1 \
             WHERE student_id = $2 AND subject_id = $3 AND status = $4",
        )
        .bind(MessageStatus::Read.as_str())
        .bind(student_id)
        .bind(subject_id)
        .bind(MessageStatus::Unread.as_str())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() as usize)
    }

    async fn insert_notification(&self, notification: Notification) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO notifications (id, student_id, message, created_at, read) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(notification.id)
        .bind(notification.student_id)
        .bind(&notification.message)
        .bind(notification.created_at)
        .bind(notification.read)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}
