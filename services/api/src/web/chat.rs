//! services/api/src/web/chat.rs
//!
//! REST endpoints for parent/teacher conversations, and the contact rules that
//! decide who may talk to whom.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use school_sync_core::conversation::normalize_email;
use school_sync_core::domain::{Identity, Message, Role};
use school_sync_core::ports::{PortError, PortResult};
use school_sync_core::{ConversationKey, MessageLinks};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{reject, Rejection};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

/// Someone the caller may chat with.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Contact {
    pub email: String,
    pub name: String,
    /// The subjects taught, for a teacher. The class title, for a parent.
    pub context: String,
    pub teacher_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub contact: Contact,
    pub unread: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub sender_email: String,
    pub status: String,
    /// Whether the caller sent the message.
    pub mine: bool,
}

impl MessageView {
    pub fn new(message: Message, own_email: &str) -> Self {
        Self {
            mine: message.sender_email.eq_ignore_ascii_case(own_email.trim()),
            id: message.id,
            created_at: message.created_at,
            text: message.text,
            sender_email: message.sender_email,
            status: message.status.as_str().to_string(),
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Serialize, ToSchema)]
pub struct MarkReadResponse {
    pub marked: usize,
}

//=========================================================================================
// Contact Rules
//=========================================================================================

/// The accounts the caller may chat with.
///
/// A parent sees the teachers of the child's class; a teacher sees the parents of
/// the students in the classes they teach. Records without an account are skipped.
pub(crate) async fn contacts(state: &AppState, identity: &Identity) -> PortResult<Vec<Contact>> {
    match identity.role {
        Role::Parent { class_id, .. } => {
            let mut subjects: BTreeMap<Uuid, (String, Vec<String>)> = BTreeMap::new();
            for entry in state.roster.teachers_for_class(class_id).await? {
                let assignment = entry.assignment;
                subjects
                    .entry(assignment.teacher_id)
                    .or_insert_with(|| (assignment.teacher_display_name(), Vec::new()))
                    .1
                    .push(assignment.subject_name);
            }

            let lookups = subjects.into_iter().map(|(teacher_id, (name, taught))| async move {
                let profile = state.directory.profile_for_teacher(teacher_id).await?;
                Ok::<_, PortError>(profile.map(|p| Contact {
                    email: p.email,
                    name,
                    context: taught.join(", "),
                    teacher_id: Some(teacher_id),
                    student_id: None,
                }))
            });
            Ok(try_join_all(lookups).await?.into_iter().flatten().collect())
        }
        Role::Teacher { teacher_id } => {
            let students = state
                .roster
                .classes_for_teacher(teacher_id)
                .await?
                .into_iter()
                .flat_map(|class| {
                    let title = class.class_title;
                    class
                        .students
                        .into_iter()
                        .map(move |student| (student, title.clone()))
                });

            let lookups = students.map(|(student, class_title)| async move {
                let profile = state.directory.profile_for_student(student.id).await?;
                Ok::<_, PortError>(profile.map(|p| Contact {
                    email: p.email,
                    name: student.full_name(),
                    context: class_title,
                    teacher_id: None,
                    student_id: Some(student.id),
                }))
            });
            Ok(try_join_all(lookups).await?.into_iter().flatten().collect())
        }
        Role::School => Ok(Vec::new()),
    }
}

/// Checks that the caller may talk to `counterpart_email` and returns the
/// conversation key and the links every message of it carries.
pub(crate) async fn authorize_counterpart(
    state: &AppState,
    identity: &Identity,
    counterpart_email: &str,
) -> Result<(ConversationKey, MessageLinks), Rejection> {
    let wanted = normalize_email(counterpart_email);
    let contact = contacts(state, identity)
        .await
        .map_err(|e| reject("load contacts", e))?
        .into_iter()
        .find(|c| normalize_email(&c.email) == wanted)
        .ok_or_else(|| {
            warn!(
                "User {} tried to reach {} outside their contacts",
                identity.user_id, wanted
            );
            (StatusCode::FORBIDDEN, "Not one of your contacts".to_string())
        })?;

    let key = ConversationKey::try_between(&identity.email, &contact.email)
        .map_err(|e| reject("open conversation", e))?;
    let links = match identity.role {
        Role::Parent { student_id, .. } => MessageLinks {
            teacher_id: contact.teacher_id,
            student_id: Some(student_id),
        },
        Role::Teacher { teacher_id } => MessageLinks {
            teacher_id: Some(teacher_id),
            student_id: contact.student_id,
        },
        Role::School => MessageLinks::default(),
    };
    Ok((key, links))
}

//=========================================================================================
// Handlers
//=========================================================================================

/// List the caller's contacts with the number of unread messages from each.
#[utoipa::path(
    get,
    path = "/conversations",
    responses((status = 200, description = "Contacts and unread counts", body = [ConversationSummary]))
)]
pub async fn list_conversations_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<ConversationSummary>>, Rejection> {
    let contacts = contacts(&state, &identity)
        .await
        .map_err(|e| reject("load contacts", e))?;
    let emails: Vec<String> = contacts.iter().map(|c| c.email.clone()).collect();
    let unread = state
        .unread
        .unread_by_counterpart(&identity.email, &emails)
        .await
        .map_err(|e| reject("count unread messages", e))?;

    let summaries = contacts
        .into_iter()
        .map(|contact| {
            let unread = unread
                .get(&normalize_email(&contact.email))
                .copied()
                .unwrap_or(0);
            ConversationSummary { contact, unread }
        })
        .collect();
    Ok(Json(summaries))
}

/// The messages exchanged with a contact, newest first.
#[utoipa::path(
    get,
    path = "/conversations/{email}/messages",
    params(("email" = String, Path, description = "The contact's email")),
    responses(
        (status = 200, description = "Messages, newest first", body = [MessageView]),
        (status = 403, description = "Not one of the caller's contacts")
    )
)]
pub async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(email): Path<String>,
) -> Result<Json<Vec<MessageView>>, Rejection> {
    let (key, _) = authorize_counterpart(&state, &identity, &email).await?;
    let conversation = state
        .chat
        .get_or_create(&key)
        .await
        .map_err(|e| reject("load messages", e))?;
    Ok(Json(
        conversation
            .newest_first()
            .into_iter()
            .map(|m| MessageView::new(m, &identity.email))
            .collect(),
    ))
}

/// Send a message to a contact.
#[utoipa::path(
    post,
    path = "/conversations/{email}/messages",
    params(("email" = String, Path, description = "The contact's email")),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message sent", body = MessageView),
        (status = 400, description = "Empty message"),
        (status = 403, description = "Not one of the caller's contacts")
    )
)]
pub async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(email): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let (key, links) = authorize_counterpart(&state, &identity, &email).await?;
    let message = state
        .chat
        .send(&key, &identity.email, &req.text, links)
        .await
        .map_err(|e| reject("send message", e))?;
    debug!("User {} sent message {}", identity.user_id, message.id);
    Ok((
        StatusCode::CREATED,
        Json(MessageView::new(message, &identity.email)),
    ))
}

/// Mark every message received from a contact as read.
#[utoipa::path(
    post,
    path = "/conversations/{email}/read",
    params(("email" = String, Path, description = "The contact's email")),
    responses(
        (status = 200, description = "Messages marked read", body = MarkReadResponse),
        (status = 403, description = "Not one of the caller's contacts")
    )
)]
pub async fn mark_read_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(email): Path<String>,
) -> Result<Json<MarkReadResponse>, Rejection> {
    let (key, _) = authorize_counterpart(&state, &identity, &email).await?;
    let marked = state
        .chat
        .mark_read(&key, &identity.email)
        .await
        .map_err(|e| reject("mark messages read", e))?;
    Ok(Json(MarkReadResponse { marked }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::test_support::fixture;

    #[tokio::test]
    async fn test_parent_and_teacher_see_each_other() {
        let f = fixture().await;

        let parent_contacts = contacts(&f.state, &f.parent).await.unwrap();
        assert_eq!(parent_contacts.len(), 1);
        assert_eq!(parent_contacts[0].email, "prof@example.ma");
        assert_eq!(parent_contacts[0].name, "Omar Fassi");
        assert_eq!(parent_contacts[0].context, "Math");

        let teacher_contacts = contacts(&f.state, &f.teacher).await.unwrap();
        assert_eq!(teacher_contacts.len(), 1);
        assert_eq!(teacher_contacts[0].email, "parent@example.ma");
        assert_eq!(teacher_contacts[0].name, "Rania Tazi");
        assert_eq!(teacher_contacts[0].context, "CM2");
    }

    #[tokio::test]
    async fn test_links_follow_the_sender_role() {
        let f = fixture().await;
        let student_id = f.parent.role.student_id();
        let teacher_id = f.teacher.role.teacher_id();

        let (parent_key, parent_links) = authorize_counterpart(&f.state, &f.parent, "Prof@Example.ma")
            .await
            .unwrap();
        assert_eq!(parent_links.student_id, student_id);
        assert_eq!(parent_links.teacher_id, teacher_id);

        let (teacher_key, teacher_links) =
            authorize_counterpart(&f.state, &f.teacher, "parent@example.ma")
                .await
                .unwrap();
        assert_eq!(teacher_links.student_id, student_id);
        assert_eq!(teacher_links.teacher_id, teacher_id);

        assert_eq!(parent_key, teacher_key);
    }

    #[tokio::test]
    async fn test_strangers_cannot_talk() {
        let f = fixture().await;

        let err = authorize_counterpart(&f.state, &f.outsider, "parent@example.ma")
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);

        let err = authorize_counterpart(&f.state, &f.parent, "other@example.ma")
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_message_list_is_newest_first() {
        let f = fixture().await;
        for text in ["Bonjour", "Merci"] {
            let sent = send_message_handler(
                State(f.state.clone()),
                Extension(f.parent.clone()),
                Path("prof@example.ma".to_string()),
                Json(SendMessageRequest {
                    text: text.to_string(),
                }),
            )
            .await;
            assert!(sent.is_ok());
        }

        let Json(listed) = list_messages_handler(
            State(f.state.clone()),
            Extension(f.teacher.clone()),
            Path("parent@example.ma".to_string()),
        )
        .await
        .unwrap();
        let texts: Vec<&str> = listed.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["Merci", "Bonjour"]);
        assert!(listed.iter().all(|m| !m.mine));
    }

    #[test]
    fn test_message_view_flags_own_messages() {
        let key = ConversationKey::between("a@x.ma", "b@x.ma");
        let message = Message {
            id: Uuid::new_v4(),
            conversation: key,
            created_at: Utc::now(),
            text: "Bonjour".to_string(),
            sender_email: "a@x.ma".to_string(),
            status: school_sync_core::MessageStatus::Unread,
            teacher_id: None,
            student_id: None,
        };
        assert!(MessageView::new(message.clone(), " A@X.ma").mine);
        let view = MessageView::new(message, "b@x.ma");
        assert!(!view.mine);
        assert_eq!(view.status, "Non Lu");
    }
}
