pub mod chat;
pub mod conversation;
pub mod domain;
pub mod homework;
pub mod identity;
pub mod memory;
pub mod ports;
pub mod remarks;
pub mod roster;
pub mod school;
pub mod unread;

pub use chat::{ChatService, MessageFeed, MessageLinks};
pub use conversation::ConversationKey;
pub use domain::{
    ClassAssignment, Conversation, Homework, Identity, Message, MessageStatus, Notification,
    Principal, Remark, Role, RosterEntry, SchoolClass, Student, Subject, Teacher, Timetable,
    TimetableSlot, UserCredentials, UserProfile,
};
pub use homework::{HomeworkDraft, HomeworkService};
pub use identity::IdentityResolver;
pub use memory::InMemoryStore;
pub use ports::{
    ConversationStore, ConversationStream, DirectoryStore, PortError, PortResult, RemarkStore,
    SchoolStore,
};
pub use remarks::RemarkService;
pub use roster::{RosterAggregator, RosterFilter, TaughtClass};
pub use school::{NewStudent, NewTeacher, SchoolDirectory};
pub use unread::{Dashboard, UnreadAggregator};
