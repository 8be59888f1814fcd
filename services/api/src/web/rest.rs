//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the session-level REST endpoints (identity,
//! roster, dashboard) and the master definition for the OpenAPI specification.

use crate::error::{reject, Rejection};
use crate::web::state::AppState;
use crate::web::{auth, chat, homework, remarks, school, timetable};
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    Extension,
};
use school_sync_core::domain::{Identity, RosterEntry, Role};
use school_sync_core::TaughtClass;
use serde::Serialize;
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        me_handler,
        roster_handler,
        dashboard_handler,
        school::create_class_handler,
        school::list_classes_handler,
        school::create_student_handler,
        school::update_student_handler,
        school::list_students_handler,
        school::create_assignment_handler,
        school::reassign_teacher_handler,
        school::list_assignments_handler,
        school::create_subject_handler,
        school::list_subjects_handler,
        school::create_teacher_handler,
        school::update_teacher_handler,
        school::list_teachers_handler,
        school::create_teacher_account_handler,
        school::create_parent_account_handler,
        chat::list_conversations_handler,
        chat::list_messages_handler,
        chat::send_message_handler,
        chat::mark_read_handler,
        remarks::create_remark_handler,
        remarks::list_remarks_handler,
        remarks::edit_remark_handler,
        remarks::delete_remark_handler,
        remarks::mark_remarks_seen_handler,
        remarks::unread_remarks_handler,
        homework::create_homework_handler,
        homework::update_homework_handler,
        homework::delete_homework_handler,
        homework::list_homework_handler,
        timetable::put_timetable_handler,
        timetable::get_timetable_handler,
        timetable::child_timetable_handler,
    ),
    components(
        schemas(
            MeResponse, RosterView, TaughtClassView, RosterEntryView, DashboardResponse,
            auth::SignupRequest, auth::LoginRequest, auth::AuthResponse,
            school::CreateClassRequest, school::ClassView,
            school::CreateStudentRequest, school::StudentView,
            school::CreateSubjectRequest, school::SubjectView,
            school::CreateTeacherRequest, school::TeacherView,
            school::AssignTeacherRequest, school::ReassignTeacherRequest, school::AssignmentView,
            school::CreateTeacherAccountRequest, school::CreateParentAccountRequest,
            school::AccountView,
            chat::Contact, chat::ConversationSummary, chat::MessageView,
            chat::SendMessageRequest, chat::MarkReadResponse,
            remarks::CreateRemarkRequest, remarks::EditRemarkRequest, remarks::MarkSeenRequest,
            remarks::RemarkView,
            remarks::SubjectUnread,
            homework::CreateHomeworkRequest, homework::UpdateHomeworkRequest,
            homework::HomeworkView,
            timetable::SlotView, timetable::PutTimetableRequest, timetable::TimetableView,
        )
    ),
    tags(
        (name = "School Sync API", description = "Rosters, timetables, parent/teacher messaging, remarks and homework.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The caller's resolved identity.
#[derive(Serialize, ToSchema)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
    pub teacher_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub class_id: Option<Uuid>,
}

impl From<Identity> for MeResponse {
    fn from(identity: Identity) -> Self {
        Self {
            role: identity.role.tag().to_string(),
            teacher_id: identity.role.teacher_id(),
            student_id: identity.role.student_id(),
            class_id: identity.role.class_id(),
            user_id: identity.user_id,
            email: identity.email,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct TaughtClassView {
    pub class_id: Uuid,
    pub class_title: String,
    pub subjects: Vec<String>,
    pub students: Vec<school::StudentView>,
}

impl From<TaughtClass> for TaughtClassView {
    fn from(class: TaughtClass) -> Self {
        Self {
            class_id: class.class_id,
            class_title: class.class_title,
            subjects: class
                .assignments
                .into_iter()
                .map(|a| a.subject_name)
                .collect(),
            students: class
                .students
                .into_iter()
                .map(school::StudentView::from)
                .collect(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct RosterEntryView {
    pub class_id: Uuid,
    pub class_title: String,
    pub subject_id: Uuid,
    pub subject_name: String,
    pub teacher_id: Uuid,
    pub teacher_name: String,
}

impl From<RosterEntry> for RosterEntryView {
    fn from(entry: RosterEntry) -> Self {
        Self {
            teacher_name: entry.assignment.teacher_display_name(),
            class_id: entry.class_id,
            class_title: entry.class_title,
            subject_id: entry.assignment.subject_id,
            subject_name: entry.assignment.subject_name,
            teacher_id: entry.assignment.teacher_id,
        }
    }
}

/// What the caller teaches, or who teaches the caller's child.
#[derive(Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RosterView {
    Teacher { classes: Vec<TaughtClassView> },
    Parent { teachers: Vec<RosterEntryView> },
}

#[derive(Serialize, ToSchema)]
pub struct DashboardResponse {
    pub unread_messages: usize,
    pub unread_remarks: usize,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// The identity behind the current session.
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "The caller's identity", body = MeResponse),
        (status = 401, description = "No valid session")
    )
)]
pub async fn me_handler(Extension(identity): Extension<Identity>) -> Json<MeResponse> {
    Json(MeResponse::from(identity))
}

/// The roster visible to the caller.
///
/// A teacher gets the classes they teach with their students; a parent gets the
/// teachers of their child's class.
#[utoipa::path(
    get,
    path = "/roster",
    responses(
        (status = 200, description = "The caller's roster", body = RosterView),
        (status = 403, description = "School accounts have no roster")
    )
)]
pub async fn roster_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<RosterView>, Rejection> {
    let view = match identity.role {
        Role::Teacher { teacher_id } => {
            let classes = state
                .roster
                .classes_for_teacher(teacher_id)
                .await
                .map_err(|e| reject("load roster", e))?;
            RosterView::Teacher {
                classes: classes.into_iter().map(TaughtClassView::from).collect(),
            }
        }
        Role::Parent { class_id, .. } => {
            let entries = state
                .roster
                .teachers_for_class(class_id)
                .await
                .map_err(|e| reject("load roster", e))?;
            RosterView::Parent {
                teachers: entries.into_iter().map(RosterEntryView::from).collect(),
            }
        }
        Role::School => {
            return Err((
                StatusCode::FORBIDDEN,
                "School accounts manage classes directly".to_string(),
            ))
        }
    };
    Ok(Json(view))
}

/// Badge counts of a parent: unread messages from teachers and unread remarks.
#[utoipa::path(
    get,
    path = "/dashboard",
    responses(
        (status = 200, description = "Unread counts", body = DashboardResponse),
        (status = 403, description = "Not a parent account")
    )
)]
pub async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<DashboardResponse>, Rejection> {
    let (student_id, _) = crate::web::middleware::require_parent(&identity)?;
    let teacher_emails: Vec<String> = chat::contacts(&state, &identity)
        .await
        .map_err(|e| reject("load contacts", e))?
        .into_iter()
        .map(|c| c.email)
        .collect();

    let dashboard = state
        .unread
        .dashboard(&identity.email, student_id, &teacher_emails)
        .await
        .map_err(|e| reject("load dashboard", e))?;

    Ok(Json(DashboardResponse {
        unread_messages: dashboard.unread_messages,
        unread_remarks: dashboard.unread_remarks,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use school_sync_core::domain::UserProfile;
    use school_sync_core::ports::DirectoryStore;
    use school_sync_core::{InMemoryStore, MessageLinks, NewStudent, NewTeacher};

    #[tokio::test]
    async fn test_dashboard_counts_messages_and_remarks() {
        let store = Arc::new(InMemoryStore::new());
        let config = Arc::new(Config::from_lookup(|_| None).unwrap());
        let state = Arc::new(AppState::from_stores(store.clone(), config));

        let school_id = Uuid::new_v4();
        store
            .create_account(
                UserProfile {
                    user_id: school_id,
                    email: "school@example.ma".to_string(),
                    display_name: None,
                    role: Role::School,
                },
                "hash",
            )
            .await
            .unwrap();
        let class = state.school.add_class(school_id, "CE5").await.unwrap();
        let student = state
            .school
            .add_student(
                school_id,
                class.id,
                NewStudent {
                    massar_code: "M7".to_string(),
                    first_name: "Ilyas".to_string(),
                    last_name: "Amrani".to_string(),
                    birthdate: None,
                },
            )
            .await
            .unwrap();
        let french = state.school.add_subject("Français").await.unwrap();
        let teacher = state
            .school
            .add_teacher(NewTeacher {
                first_name: "Nadia".to_string(),
                last_name: "Kettani".to_string(),
                subject_name: "Français".to_string(),
                birthdate: None,
            })
            .await
            .unwrap();
        state
            .school
            .assign_teacher(school_id, class.id, french.id, teacher.id)
            .await
            .unwrap();
        store
            .create_account(
                UserProfile {
                    user_id: Uuid::new_v4(),
                    email: "nadia@example.ma".to_string(),
                    display_name: None,
                    role: Role::Teacher {
                        teacher_id: teacher.id,
                    },
                },
                "hash",
            )
            .await
            .unwrap();

        let parent = Identity {
            user_id: Uuid::new_v4(),
            email: "parent@example.ma".to_string(),
            role: Role::Parent {
                student_id: student.id,
                class_id: class.id,
            },
        };

        let key = school_sync_core::ConversationKey::between(&parent.email, "nadia@example.ma");
        for text in ["Bonjour", "Réunion demain"] {
            state
                .chat
                .send(&key, "nadia@example.ma", text, MessageLinks::default())
                .await
                .unwrap();
        }
        state
            .remarks
            .add(teacher.id, student.id, french.id, "Bon travail")
            .await
            .unwrap();

        let Json(dashboard) = dashboard_handler(State(state.clone()), Extension(parent.clone()))
            .await
            .unwrap();
        assert_eq!(dashboard.unread_messages, 2);
        assert_eq!(dashboard.unread_remarks, 1);

        let Json(roster) = roster_handler(State(state), Extension(parent)).await.unwrap();
        match roster {
            RosterView::Parent { teachers } => {
                assert_eq!(teachers.len(), 1);
                assert_eq!(teachers[0].teacher_name, "Nadia Kettani");
            }
            RosterView::Teacher { .. } => panic!("expected the parent roster"),
        }
    }

    #[test]
    fn test_me_response_exposes_role_links() {
        let teacher_id = Uuid::new_v4();
        let me = MeResponse::from(Identity {
            user_id: Uuid::new_v4(),
            email: "prof@example.ma".to_string(),
            role: Role::Teacher { teacher_id },
        });
        assert_eq!(me.role, "Professeur");
        assert_eq!(me.teacher_id, Some(teacher_id));
        assert_eq!(me.student_id, None);
    }
}
