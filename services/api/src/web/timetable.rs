//! services/api/src/web/timetable.rs
//!
//! Weekly class timetables: written by the school, read by the school and by parents.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use school_sync_core::domain::{
    Identity, Timetable, TimetableSlot, TIMETABLE_DAYS, TIMETABLE_PERIODS,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{reject, Rejection};
use crate::web::middleware::{require_parent, require_school};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SlotView {
    /// One of the school days, e.g. "Lundi".
    pub day: String,
    /// One of the periods, e.g. "8H30-10H30".
    pub period: String,
    pub subject_name: String,
}

impl From<TimetableSlot> for SlotView {
    fn from(slot: TimetableSlot) -> Self {
        Self {
            day: slot.day,
            period: slot.period,
            subject_name: slot.subject_name,
        }
    }
}

impl From<SlotView> for TimetableSlot {
    fn from(view: SlotView) -> Self {
        Self {
            day: view.day,
            period: view.period,
            subject_name: view.subject_name,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct PutTimetableRequest {
    pub slots: Vec<SlotView>,
}

/// The week grid of a class. Periods without a slot are free.
#[derive(Debug, Serialize, ToSchema)]
pub struct TimetableView {
    pub class_id: Uuid,
    pub days: Vec<String>,
    pub periods: Vec<String>,
    pub slots: Vec<SlotView>,
    /// `None` while no timetable has been saved.
    pub updated_at: Option<DateTime<Utc>>,
}

impl TimetableView {
    fn new(class_id: Uuid, timetable: Option<Timetable>) -> Self {
        let (slots, updated_at) = match timetable {
            Some(t) => (
                t.slots.into_iter().map(SlotView::from).collect(),
                Some(t.updated_at),
            ),
            None => (Vec::new(), None),
        };
        Self {
            class_id,
            days: TIMETABLE_DAYS.iter().map(|d| d.to_string()).collect(),
            periods: TIMETABLE_PERIODS.iter().map(|p| p.to_string()).collect(),
            slots,
            updated_at,
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Replace the timetable of a class of the caller's school.
#[utoipa::path(
    put,
    path = "/classes/{class_id}/timetable",
    params(("class_id" = Uuid, Path, description = "The class")),
    request_body = PutTimetableRequest,
    responses(
        (status = 200, description = "Timetable saved", body = TimetableView),
        (status = 400, description = "Unknown day, period or subject, or a period filled twice"),
        (status = 403, description = "Not a school account"),
        (status = 404, description = "Class not found")
    )
)]
pub async fn put_timetable_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<PutTimetableRequest>,
) -> Result<Json<TimetableView>, Rejection> {
    let owner_id = require_school(&identity)?;
    let slots = req.slots.into_iter().map(TimetableSlot::from).collect();
    let timetable = state
        .school
        .set_timetable(owner_id, class_id, slots)
        .await
        .map_err(|e| reject("save timetable", e))?;
    Ok(Json(TimetableView::new(class_id, Some(timetable))))
}

/// The timetable of a class of the caller's school.
#[utoipa::path(
    get,
    path = "/classes/{class_id}/timetable",
    params(("class_id" = Uuid, Path, description = "The class")),
    responses(
        (status = 200, description = "The week grid, empty until saved", body = TimetableView),
        (status = 404, description = "Class not found")
    )
)]
pub async fn get_timetable_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(class_id): Path<Uuid>,
) -> Result<Json<TimetableView>, Rejection> {
    let owner_id = require_school(&identity)?;
    let timetable = state
        .school
        .timetable(owner_id, class_id)
        .await
        .map_err(|e| reject("load timetable", e))?;
    Ok(Json(TimetableView::new(class_id, timetable)))
}

/// The timetable of the child's class.
#[utoipa::path(
    get,
    path = "/timetable",
    responses(
        (status = 200, description = "The week grid, empty until saved", body = TimetableView),
        (status = 403, description = "Not a parent account")
    )
)]
pub async fn child_timetable_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<TimetableView>, Rejection> {
    let (student_id, class_id) = require_parent(&identity)?;
    let timetable = state
        .school
        .timetable_for_student(student_id)
        .await
        .map_err(|e| reject("load timetable", e))?;
    Ok(Json(TimetableView::new(class_id, timetable)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::test_support::fixture;
    use axum::http::StatusCode;

    fn slot(day: &str, period: &str, subject_name: &str) -> SlotView {
        SlotView {
            day: day.to_string(),
            period: period.to_string(),
            subject_name: subject_name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_school_saves_and_parent_reads_timetable() {
        let f = fixture().await;

        let Json(empty) = child_timetable_handler(State(f.state.clone()), Extension(f.parent.clone()))
            .await
            .unwrap();
        assert!(empty.slots.is_empty());
        assert!(empty.updated_at.is_none());
        assert_eq!(empty.days.len(), 5);
        assert_eq!(empty.periods.len(), 4);

        let Json(saved) = put_timetable_handler(
            State(f.state.clone()),
            Extension(f.school.clone()),
            Path(f.class_id),
            Json(PutTimetableRequest {
                slots: vec![
                    slot("Mardi", "8H30-10H30", "Math"),
                    slot("Lundi", "14H30-16H30", "Math"),
                ],
            }),
        )
        .await
        .unwrap();
        assert_eq!(saved.slots[0].day, "Lundi");

        let Json(for_school) = get_timetable_handler(
            State(f.state.clone()),
            Extension(f.school.clone()),
            Path(f.class_id),
        )
        .await
        .unwrap();
        assert_eq!(for_school.slots.len(), 2);

        let Json(for_parent) = child_timetable_handler(State(f.state.clone()), Extension(f.parent.clone()))
            .await
            .unwrap();
        assert_eq!(for_parent.class_id, f.class_id);
        assert_eq!(for_parent.slots.len(), 2);
        assert_eq!(for_parent.slots[1].day, "Mardi");
        assert!(for_parent.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_timetable_writes_are_checked() {
        let f = fixture().await;

        let err = put_timetable_handler(
            State(f.state.clone()),
            Extension(f.teacher.clone()),
            Path(f.class_id),
            Json(PutTimetableRequest { slots: Vec::new() }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);

        let err = put_timetable_handler(
            State(f.state.clone()),
            Extension(f.school.clone()),
            Path(f.class_id),
            Json(PutTimetableRequest {
                slots: vec![slot("Samedi", "8H30-10H30", "Math")],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let err = get_timetable_handler(
            State(f.state.clone()),
            Extension(f.school.clone()),
            Path(Uuid::new_v4()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }
}
