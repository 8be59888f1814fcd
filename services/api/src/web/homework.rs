//! services/api/src/web/homework.rs
//!
//! Homework posted by teachers for a class and subject.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use school_sync_core::domain::{Homework, Identity, Role};
use school_sync_core::HomeworkDraft;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{reject, Rejection};
use crate::web::middleware::require_teacher;
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateHomeworkRequest {
    pub class_id: Uuid,
    pub subject_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub deadline: DateTime<Utc>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateHomeworkRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub deadline: DateTime<Utc>,
}

impl From<UpdateHomeworkRequest> for HomeworkDraft {
    fn from(req: UpdateHomeworkRequest) -> Self {
        Self {
            title: req.title,
            description: req.description,
            deadline: req.deadline,
        }
    }
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HomeworkQuery {
    pub class_id: Uuid,
    pub subject_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HomeworkView {
    pub id: Uuid,
    pub class_id: Uuid,
    pub subject_id: Uuid,
    pub teacher_id: Uuid,
    pub title: String,
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub past_deadline: bool,
}

impl HomeworkView {
    fn new(homework: Homework, now: DateTime<Utc>) -> Self {
        Self {
            past_deadline: homework.is_past_deadline(now),
            id: homework.id,
            class_id: homework.class_id,
            subject_id: homework.subject_id,
            teacher_id: homework.teacher_id,
            title: homework.title,
            description: homework.description,
            deadline: homework.deadline,
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Post homework for a class and subject the caller teaches.
#[utoipa::path(
    post,
    path = "/homework",
    request_body = CreateHomeworkRequest,
    responses(
        (status = 201, description = "Homework posted", body = HomeworkView),
        (status = 403, description = "The caller does not teach this subject in this class"),
        (status = 409, description = "Homework with this title already exists")
    )
)]
pub async fn create_homework_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateHomeworkRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let teacher_id = require_teacher(&identity)?;

    let owner_id = state
        .roster
        .classes_for_teacher(teacher_id)
        .await
        .map_err(|e| reject("load classes", e))?
        .into_iter()
        .find(|class| {
            class.class_id == req.class_id
                && class.assignments.iter().any(|a| a.subject_id == req.subject_id)
        })
        .map(|class| class.owner_id)
        .ok_or_else(|| {
            warn!(
                "Teacher {} posted homework outside their assignments",
                teacher_id
            );
            (
                StatusCode::FORBIDDEN,
                "You do not teach this subject in this class".to_string(),
            )
        })?;

    let draft = HomeworkDraft {
        title: req.title,
        description: req.description,
        deadline: req.deadline,
    };
    let homework = state
        .homework
        .add(owner_id, req.class_id, req.subject_id, teacher_id, draft)
        .await
        .map_err(|e| reject("add homework", e))?;
    Ok((StatusCode::CREATED, Json(HomeworkView::new(homework, Utc::now()))))
}

/// Edit homework the caller posted.
#[utoipa::path(
    put,
    path = "/homework/{id}",
    params(("id" = Uuid, Path, description = "The homework")),
    request_body = UpdateHomeworkRequest,
    responses(
        (status = 200, description = "Homework updated", body = HomeworkView),
        (status = 403, description = "Posted by another teacher"),
        (status = 404, description = "Homework not found")
    )
)]
pub async fn update_homework_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateHomeworkRequest>,
) -> Result<Json<HomeworkView>, Rejection> {
    let teacher_id = require_teacher(&identity)?;
    let homework = state
        .homework
        .update(id, teacher_id, req.into())
        .await
        .map_err(|e| reject("update homework", e))?;
    Ok(Json(HomeworkView::new(homework, Utc::now())))
}

/// Delete homework the caller posted.
#[utoipa::path(
    delete,
    path = "/homework/{id}",
    params(("id" = Uuid, Path, description = "The homework")),
    responses(
        (status = 204, description = "Homework deleted"),
        (status = 403, description = "Posted by another teacher"),
        (status = 404, description = "Homework not found")
    )
)]
pub async fn delete_homework_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, Rejection> {
    let teacher_id = require_teacher(&identity)?;
    state
        .homework
        .delete(id, teacher_id)
        .await
        .map_err(|e| reject("delete homework", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Homework of a class in a subject, nearest deadline first.
#[utoipa::path(
    get,
    path = "/homework",
    params(HomeworkQuery),
    responses(
        (status = 200, description = "Homework list", body = [HomeworkView]),
        (status = 403, description = "A parent asked for another class")
    )
)]
pub async fn list_homework_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<HomeworkQuery>,
) -> Result<Json<Vec<HomeworkView>>, Rejection> {
    if let Role::Parent { class_id, .. } = identity.role {
        if class_id != query.class_id {
            return Err((StatusCode::FORBIDDEN, "Not your child's class".to_string()));
        }
    }

    let homework = state
        .homework
        .for_class_subject(query.class_id, query.subject_id)
        .await
        .map_err(|e| reject("list homework", e))?;
    let now = Utc::now();
    Ok(Json(
        homework
            .into_iter()
            .map(|h| HomeworkView::new(h, now))
            .collect(),
    ))
}
