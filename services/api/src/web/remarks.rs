//! services/api/src/web/remarks.rs
//!
//! Teacher remarks about students, read by the student's parent.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use school_sync_core::domain::{Identity, Remark, Role, Subject};
use school_sync_core::ports::PortResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{reject, Rejection};
use crate::web::chat::MarkReadResponse;
use crate::web::middleware::{require_parent, require_teacher};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateRemarkRequest {
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub text: String,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RemarkQuery {
    pub subject_id: Uuid,
    /// Required for teachers; parents always read their own child's remarks.
    pub student_id: Option<Uuid>,
}

#[derive(Deserialize, ToSchema)]
pub struct EditRemarkRequest {
    pub text: String,
}

#[derive(Deserialize, ToSchema)]
pub struct MarkSeenRequest {
    pub subject_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RemarkView {
    pub id: Uuid,
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub teacher_id: Uuid,
    pub text: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<Remark> for RemarkView {
    fn from(remark: Remark) -> Self {
        Self {
            id: remark.id,
            student_id: remark.student_id,
            subject_id: remark.subject_id,
            teacher_id: remark.teacher_id,
            text: remark.text,
            status: remark.status.as_str().to_string(),
            created_at: remark.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SubjectUnread {
    pub subject_id: Uuid,
    pub subject_name: String,
    pub unread: usize,
}

/// The subjects taught in a class, from its assignments.
pub(crate) async fn class_subjects(state: &AppState, class_id: Uuid) -> PortResult<Vec<Subject>> {
    let subjects: BTreeMap<Uuid, String> = state
        .roster
        .teachers_for_class(class_id)
        .await?
        .into_iter()
        .map(|entry| (entry.assignment.subject_id, entry.assignment.subject_name))
        .collect();
    Ok(subjects
        .into_iter()
        .map(|(id, name)| Subject { id, name })
        .collect())
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Write a remark about a student. Only the subject's teacher in the student's class may.
#[utoipa::path(
    post,
    path = "/remarks",
    request_body = CreateRemarkRequest,
    responses(
        (status = 201, description = "Remark saved", body = RemarkView),
        (status = 403, description = "The caller does not teach this subject to the student"),
        (status = 404, description = "Student or assignment not found")
    )
)]
pub async fn create_remark_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateRemarkRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let teacher_id = require_teacher(&identity)?;
    let remark = state
        .remarks
        .add(teacher_id, req.student_id, req.subject_id, &req.text)
        .await
        .map_err(|e| reject("add remark", e))?;
    Ok((StatusCode::CREATED, Json(RemarkView::from(remark))))
}

/// Rewrite the text of a remark the caller wrote.
#[utoipa::path(
    put,
    path = "/remarks/{id}",
    params(("id" = Uuid, Path, description = "The remark")),
    request_body = EditRemarkRequest,
    responses(
        (status = 200, description = "Remark updated", body = RemarkView),
        (status = 400, description = "Empty remark"),
        (status = 403, description = "Written by another teacher"),
        (status = 404, description = "Remark not found")
    )
)]
pub async fn edit_remark_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(req): Json<EditRemarkRequest>,
) -> Result<Json<RemarkView>, Rejection> {
    let teacher_id = require_teacher(&identity)?;
    let remark = state
        .remarks
        .edit(id, teacher_id, &req.text)
        .await
        .map_err(|e| reject("edit remark", e))?;
    Ok(Json(RemarkView::from(remark)))
}

/// Delete a remark the caller wrote.
#[utoipa::path(
    delete,
    path = "/remarks/{id}",
    params(("id" = Uuid, Path, description = "The remark")),
    responses(
        (status = 204, description = "Remark deleted"),
        (status = 403, description = "Written by another teacher"),
        (status = 404, description = "Remark not found")
    )
)]
pub async fn delete_remark_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, Rejection> {
    let teacher_id = require_teacher(&identity)?;
    state
        .remarks
        .delete(id, teacher_id)
        .await
        .map_err(|e| reject("delete remark", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Remarks in a subject, newest first.
///
/// Parents get every remark about their child; teachers get the ones they wrote.
#[utoipa::path(
    get,
    path = "/remarks",
    params(RemarkQuery),
    responses(
        (status = 200, description = "Remarks, newest first", body = [RemarkView]),
        (status = 400, description = "A teacher did not name the student"),
        (status = 403, description = "Not available to school accounts")
    )
)]
pub async fn list_remarks_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<RemarkQuery>,
) -> Result<Json<Vec<RemarkView>>, Rejection> {
    let remarks = match identity.role {
        Role::Parent { student_id, .. } => {
            state.remarks.for_student(student_id, query.subject_id).await
        }
        Role::Teacher { teacher_id } => {
            let student_id = query
                .student_id
                .ok_or((StatusCode::BAD_REQUEST, "student_id is required".to_string()))?;
            state
                .remarks
                .by_teacher(teacher_id, student_id, query.subject_id)
                .await
        }
        Role::School => {
            return Err((StatusCode::FORBIDDEN, "Not available to schools".to_string()))
        }
    }
    .map_err(|e| reject("list remarks", e))?;

    Ok(Json(remarks.into_iter().map(RemarkView::from).collect()))
}

/// Mark the child's remarks in a subject as seen.
#[utoipa::path(
    post,
    path = "/remarks/seen",
    request_body = MarkSeenRequest,
    responses((status = 200, description = "Remarks marked read", body = MarkReadResponse))
)]
pub async fn mark_remarks_seen_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<MarkSeenRequest>,
) -> Result<Json<MarkReadResponse>, Rejection> {
    let (student_id, _) = require_parent(&identity)?;
    let marked = state
        .remarks
        .mark_seen(student_id, req.subject_id)
        .await
        .map_err(|e| reject("mark remarks seen", e))?;
    Ok(Json(MarkReadResponse { marked }))
}

/// Unread remark counts per subject of the child's class.
#[utoipa::path(
    get,
    path = "/remarks/unread",
    responses((status = 200, description = "Unread remarks per subject", body = [SubjectUnread]))
)]
pub async fn unread_remarks_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<SubjectUnread>>, Rejection> {
    let (student_id, class_id) = require_parent(&identity)?;
    let subjects = class_subjects(&state, class_id)
        .await
        .map_err(|e| reject("load subjects", e))?;
    let counts = state
        .unread
        .unread_remarks_by_subject(student_id, &subjects)
        .await
        .map_err(|e| reject("count unread remarks", e))?;

    Ok(Json(
        subjects
            .into_iter()
            .map(|subject| SubjectUnread {
                unread: counts.get(&subject.id).copied().unwrap_or(0),
                subject_id: subject.id,
                subject_name: subject.name,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::test_support::fixture;

    fn query(subject_id: Uuid, student_id: Option<Uuid>) -> Query<RemarkQuery> {
        Query(RemarkQuery {
            subject_id,
            student_id,
        })
    }

    #[tokio::test]
    async fn test_remark_listing_depends_on_role() {
        let f = fixture().await;
        f.state
            .remarks
            .add(f.teacher_id, f.student_id, f.subject_id, "Bon travail")
            .await
            .unwrap();

        let Json(for_parent) = list_remarks_handler(
            State(f.state.clone()),
            Extension(f.parent.clone()),
            query(f.subject_id, None),
        )
        .await
        .unwrap();
        assert_eq!(for_parent.len(), 1);
        assert_eq!(for_parent[0].status, "Non Lu");

        let err = list_remarks_handler(
            State(f.state.clone()),
            Extension(f.teacher.clone()),
            query(f.subject_id, None),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let Json(for_teacher) = list_remarks_handler(
            State(f.state.clone()),
            Extension(f.teacher.clone()),
            query(f.subject_id, Some(f.student_id)),
        )
        .await
        .unwrap();
        assert_eq!(for_teacher.len(), 1);

        let err = list_remarks_handler(
            State(f.state.clone()),
            Extension(f.school.clone()),
            query(f.subject_id, Some(f.student_id)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_remark_edit_and_delete_are_author_only() {
        let f = fixture().await;
        let remark = f
            .state
            .remarks
            .add(f.teacher_id, f.student_id, f.subject_id, "Bon travail")
            .await
            .unwrap();

        let err = edit_remark_handler(
            State(f.state.clone()),
            Extension(f.outsider.clone()),
            Path(remark.id),
            Json(EditRemarkRequest {
                text: "Autre".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);

        let Json(edited) = edit_remark_handler(
            State(f.state.clone()),
            Extension(f.teacher.clone()),
            Path(remark.id),
            Json(EditRemarkRequest {
                text: " Très bon travail ".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(edited.text, "Très bon travail");

        let err = delete_remark_handler(
            State(f.state.clone()),
            Extension(f.parent.clone()),
            Path(remark.id),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);

        let status = delete_remark_handler(
            State(f.state.clone()),
            Extension(f.teacher.clone()),
            Path(remark.id),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let err = delete_remark_handler(
            State(f.state.clone()),
            Extension(f.teacher.clone()),
            Path(remark.id),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }
}
