//! crates/school_sync_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use uuid::Uuid;

use crate::conversation::ConversationKey;

//=========================================================================================
// Identity
//=========================================================================================

/// The authenticated user as handed over by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
}

/// What an account is allowed to see, with the foreign keys each role carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A school administrator. Owns its own partition of classes and students.
    School,
    /// A teacher, linked to a record of the teacher catalogue.
    Teacher { teacher_id: Uuid },
    /// A parent account, linked to one student and that student's class.
    Parent { student_id: Uuid, class_id: Uuid },
}

impl Role {
    /// The tag under which the role is persisted.
    pub fn tag(&self) -> &'static str {
        match self {
            Role::School => "School",
            Role::Teacher { .. } => "Professeur",
            Role::Parent { .. } => "Student",
        }
    }

    /// Rebuilds a role from its persisted tag and the linked ids.
    ///
    /// Returns `None` when the tag is unknown or a required link is missing.
    pub fn from_parts(
        tag: &str,
        teacher_id: Option<Uuid>,
        student_id: Option<Uuid>,
        class_id: Option<Uuid>,
    ) -> Option<Role> {
        match tag {
            "School" => Some(Role::School),
            "Professeur" => teacher_id.map(|teacher_id| Role::Teacher { teacher_id }),
            "Student" => match (student_id, class_id) {
                (Some(student_id), Some(class_id)) => Some(Role::Parent {
                    student_id,
                    class_id,
                }),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn teacher_id(&self) -> Option<Uuid> {
        match self {
            Role::Teacher { teacher_id } => Some(*teacher_id),
            _ => None,
        }
    }

    pub fn student_id(&self) -> Option<Uuid> {
        match self {
            Role::Parent { student_id, .. } => Some(*student_id),
            _ => None,
        }
    }

    pub fn class_id(&self) -> Option<Uuid> {
        match self {
            Role::Parent { class_id, .. } => Some(*class_id),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The profile document stored for every account.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub role: Role,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

/// A resolved session identity. Built once per request from the profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

//=========================================================================================
// School records
//=========================================================================================

/// A class, owned by the partition of the school account that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchoolClass {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub class_id: Uuid,
    /// National education-system identifier, opaque to this system.
    pub massar_code: String,
    pub first_name: String,
    pub last_name: String,
    pub birthdate: Option<NaiveDate>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A school subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Teacher {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub subject_name: String,
    pub birthdate: Option<NaiveDate>,
}

/// Links a class, a subject and the teacher who teaches it.
///
/// Subject and teacher names are denormalized onto the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassAssignment {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub class_id: Uuid,
    pub subject_id: Uuid,
    pub subject_name: String,
    pub teacher_id: Uuid,
    pub teacher_last_name: String,
    pub teacher_first_name: String,
}

impl ClassAssignment {
    /// "First Last", falling back to "Unknown" when the first name is blank.
    pub fn teacher_display_name(&self) -> String {
        let first = if self.teacher_first_name.trim().is_empty() {
            "Unknown"
        } else {
            self.teacher_first_name.trim()
        };
        format!("{} {}", first, self.teacher_last_name.trim())
            .trim()
            .to_string()
    }
}

/// One row of an aggregated roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub owner_id: Uuid,
    pub class_id: Uuid,
    pub class_title: String,
    pub assignment: ClassAssignment,
}

/// A homework assignment given to a class for a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Homework {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub class_id: Uuid,
    pub subject_id: Uuid,
    pub teacher_id: Uuid,
    pub title: String,
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Homework {
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }
}

/// School days of a timetable, in display order.
pub const TIMETABLE_DAYS: [&str; 5] = ["Lundi", "Mardi", "Mercredi", "Jeudi", "Vendredi"];

/// Teaching periods of a school day, in display order.
pub const TIMETABLE_PERIODS: [&str; 4] =
    ["8H30-10H30", "10H30-12H30", "14H30-16H30", "16H30-18H30"];

/// One taught period of a weekly timetable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimetableSlot {
    pub day: String,
    pub period: String,
    pub subject_name: String,
}

impl TimetableSlot {
    /// Position of the slot in the week grid, `None` for an unknown day or period.
    pub fn position(&self) -> Option<(usize, usize)> {
        let day = TIMETABLE_DAYS.iter().position(|d| *d == self.day)?;
        let period = TIMETABLE_PERIODS.iter().position(|p| *p == self.period)?;
        Some((day, period))
    }
}

/// The weekly timetable of a class. Periods without a slot are free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timetable {
    pub owner_id: Uuid,
    pub class_id: Uuid,
    pub slots: Vec<TimetableSlot>,
    pub updated_at: DateTime<Utc>,
}

impl Timetable {
    /// Builds a timetable with its slots in week order.
    pub fn new(
        owner_id: Uuid,
        class_id: Uuid,
        mut slots: Vec<TimetableSlot>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        slots.sort_by_key(|slot| slot.position());
        Self {
            owner_id,
            class_id,
            slots,
            updated_at,
        }
    }

    pub fn subject_at(&self, day: &str, period: &str) -> Option<&str> {
        self.slots
            .iter()
            .find(|s| s.day == day && s.period == period)
            .map(|s| s.subject_name.as_str())
    }
}

//=========================================================================================
// Messaging
//=========================================================================================

/// Read state shared by messages and remarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Unread,
    Read,
}

impl MessageStatus {
    /// The label stored in the database and shown to users.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Unread => "Non Lu",
            MessageStatus::Read => "Lu",
        }
    }

    pub fn parse(value: &str) -> Option<MessageStatus> {
        match value {
            "Non Lu" => Some(MessageStatus::Unread),
            "Lu" => Some(MessageStatus::Read),
            _ => None,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub conversation: ConversationKey,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub sender_email: String,
    pub status: MessageStatus,
    pub teacher_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
}

impl Message {
    pub fn is_unread_for(&self, reader_email: &str) -> bool {
        self.status == MessageStatus::Unread && !self.sender_email.eq_ignore_ascii_case(reader_email)
    }
}

/// A two-party conversation. Messages are kept in storage order (oldest first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub key: ConversationKey,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn unread_for(&self, reader_email: &str) -> usize {
        self.messages
            .iter()
            .filter(|m| m.is_unread_for(reader_email))
            .count()
    }

    /// Messages newest first, as the chat view displays them.
    pub fn newest_first(&self) -> Vec<Message> {
        self.messages.iter().rev().cloned().collect()
    }
}

/// A teacher's note about a student in one subject, read-tracked per student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remark {
    pub id: Uuid,
    pub student_id: Uuid,
    pub class_id: Uuid,
    pub subject_id: Uuid,
    pub teacher_id: Uuid,
    pub text: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

/// Side record written alongside each remark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: Uuid,
    pub student_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}
