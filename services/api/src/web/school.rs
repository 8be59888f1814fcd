//! services/api/src/web/school.rs
//!
//! Endpoints for school accounts: classes, students, the subject and teacher
//! catalogues, assignments, and the teacher and parent accounts of the school.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::NaiveDate;
use school_sync_core::domain::{
    ClassAssignment, Identity, Role, SchoolClass, Student, Subject, Teacher, UserProfile,
};
use school_sync_core::{NewStudent, NewTeacher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{reject, Rejection};
use crate::web::auth::hash_new_password;
use crate::web::middleware::require_school;
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateClassRequest {
    pub title: String,
}

#[derive(Serialize, ToSchema)]
pub struct ClassView {
    pub id: Uuid,
    pub title: String,
}

impl From<SchoolClass> for ClassView {
    fn from(class: SchoolClass) -> Self {
        Self {
            id: class.id,
            title: class.title,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateStudentRequest {
    #[serde(default)]
    pub massar_code: String,
    pub first_name: String,
    pub last_name: String,
    pub birthdate: Option<NaiveDate>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StudentView {
    pub id: Uuid,
    pub class_id: Uuid,
    pub massar_code: String,
    pub first_name: String,
    pub last_name: String,
    pub birthdate: Option<NaiveDate>,
}

impl From<Student> for StudentView {
    fn from(student: Student) -> Self {
        Self {
            id: student.id,
            class_id: student.class_id,
            massar_code: student.massar_code,
            first_name: student.first_name,
            last_name: student.last_name,
            birthdate: student.birthdate,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateSubjectRequest {
    pub name: String,
}

#[derive(Serialize, ToSchema)]
pub struct SubjectView {
    pub id: Uuid,
    pub name: String,
}

impl From<Subject> for SubjectView {
    fn from(subject: Subject) -> Self {
        Self {
            id: subject.id,
            name: subject.name,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateTeacherRequest {
    pub first_name: String,
    pub last_name: String,
    pub subject_name: String,
    pub birthdate: Option<NaiveDate>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TeacherView {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub subject_name: String,
    pub birthdate: Option<NaiveDate>,
}

impl From<Teacher> for TeacherView {
    fn from(teacher: Teacher) -> Self {
        Self {
            id: teacher.id,
            first_name: teacher.first_name,
            last_name: teacher.last_name,
            subject_name: teacher.subject_name,
            birthdate: teacher.birthdate,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct AssignTeacherRequest {
    pub subject_id: Uuid,
    pub teacher_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
pub struct ReassignTeacherRequest {
    pub teacher_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AssignmentView {
    pub id: Uuid,
    pub class_id: Uuid,
    pub subject_id: Uuid,
    pub subject_name: String,
    pub teacher_id: Uuid,
    pub teacher_name: String,
}

impl From<ClassAssignment> for AssignmentView {
    fn from(assignment: ClassAssignment) -> Self {
        Self {
            teacher_name: assignment.teacher_display_name(),
            id: assignment.id,
            class_id: assignment.class_id,
            subject_id: assignment.subject_id,
            subject_name: assignment.subject_name,
            teacher_id: assignment.teacher_id,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateTeacherAccountRequest {
    pub email: String,
    pub password: String,
    pub teacher_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateParentAccountRequest {
    pub email: String,
    pub password: String,
    pub student_id: Uuid,
}

#[derive(Serialize, ToSchema)]
pub struct AccountView {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub role: String,
}

impl From<UserProfile> for AccountView {
    fn from(profile: UserProfile) -> Self {
        Self {
            user_id: profile.user_id,
            email: profile.email,
            display_name: profile.display_name,
            role: profile.role.tag().to_string(),
        }
    }
}

//=========================================================================================
// Classes and Students
//=========================================================================================

/// Create a class in the caller's school.
#[utoipa::path(
    post,
    path = "/classes",
    request_body = CreateClassRequest,
    responses(
        (status = 201, description = "Class created", body = ClassView),
        (status = 403, description = "Not a school account"),
        (status = 409, description = "A class with this title already exists")
    )
)]
pub async fn create_class_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateClassRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let owner_id = require_school(&identity)?;
    let class = state
        .school
        .add_class(owner_id, &req.title)
        .await
        .map_err(|e| reject("create class", e))?;
    Ok((StatusCode::CREATED, Json(ClassView::from(class))))
}

/// List the classes of the caller's school.
#[utoipa::path(
    get,
    path = "/classes",
    responses((status = 200, description = "Classes of the school", body = [ClassView]))
)]
pub async fn list_classes_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<ClassView>>, Rejection> {
    let owner_id = require_school(&identity)?;
    let classes = state
        .school
        .classes(owner_id)
        .await
        .map_err(|e| reject("list classes", e))?;
    Ok(Json(classes.into_iter().map(ClassView::from).collect()))
}

/// Add a student to a class.
#[utoipa::path(
    post,
    path = "/classes/{class_id}/students",
    params(("class_id" = Uuid, Path, description = "The class")),
    request_body = CreateStudentRequest,
    responses(
        (status = 201, description = "Student added", body = StudentView),
        (status = 404, description = "Class not found")
    )
)]
pub async fn create_student_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<CreateStudentRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let owner_id = require_school(&identity)?;
    let new = NewStudent {
        massar_code: req.massar_code,
        first_name: req.first_name,
        last_name: req.last_name,
        birthdate: req.birthdate,
    };
    let student = state
        .school
        .add_student(owner_id, class_id, new)
        .await
        .map_err(|e| reject("add student", e))?;
    Ok((StatusCode::CREATED, Json(StudentView::from(student))))
}

/// Edit a student of the caller's school. The student stays in their class.
#[utoipa::path(
    put,
    path = "/students/{student_id}",
    params(("student_id" = Uuid, Path, description = "The student")),
    request_body = CreateStudentRequest,
    responses(
        (status = 200, description = "Student updated", body = StudentView),
        (status = 400, description = "Missing name"),
        (status = 404, description = "Student not found")
    )
)]
pub async fn update_student_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(student_id): Path<Uuid>,
    Json(req): Json<CreateStudentRequest>,
) -> Result<Json<StudentView>, Rejection> {
    let owner_id = require_school(&identity)?;
    let changes = NewStudent {
        massar_code: req.massar_code,
        first_name: req.first_name,
        last_name: req.last_name,
        birthdate: req.birthdate,
    };
    let student = state
        .school
        .update_student(owner_id, student_id, changes)
        .await
        .map_err(|e| reject("update student", e))?;
    Ok(Json(StudentView::from(student)))
}

/// List the students of a class.
#[utoipa::path(
    get,
    path = "/classes/{class_id}/students",
    params(("class_id" = Uuid, Path, description = "The class")),
    responses((status = 200, description = "Students of the class", body = [StudentView]))
)]
pub async fn list_students_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(class_id): Path<Uuid>,
) -> Result<Json<Vec<StudentView>>, Rejection> {
    let owner_id = require_school(&identity)?;
    let students = state
        .school
        .students(owner_id, class_id)
        .await
        .map_err(|e| reject("list students", e))?;
    Ok(Json(students.into_iter().map(StudentView::from).collect()))
}

//=========================================================================================
// Assignments
//=========================================================================================

/// Assign a teacher to a subject of a class.
#[utoipa::path(
    post,
    path = "/classes/{class_id}/assignments",
    params(("class_id" = Uuid, Path, description = "The class")),
    request_body = AssignTeacherRequest,
    responses(
        (status = 201, description = "Teacher assigned", body = AssignmentView),
        (status = 404, description = "Class, subject or teacher not found"),
        (status = 409, description = "The subject already has a teacher in this class")
    )
)]
pub async fn create_assignment_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<AssignTeacherRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let owner_id = require_school(&identity)?;
    let assignment = state
        .school
        .assign_teacher(owner_id, class_id, req.subject_id, req.teacher_id)
        .await
        .map_err(|e| reject("assign teacher", e))?;
    Ok((StatusCode::CREATED, Json(AssignmentView::from(assignment))))
}

/// Hand an assignment of a class over to another teacher.
#[utoipa::path(
    put,
    path = "/classes/{class_id}/assignments/{assignment_id}",
    params(
        ("class_id" = Uuid, Path, description = "The class"),
        ("assignment_id" = Uuid, Path, description = "The assignment")
    ),
    request_body = ReassignTeacherRequest,
    responses(
        (status = 200, description = "Teacher reassigned", body = AssignmentView),
        (status = 404, description = "Class, assignment or teacher not found")
    )
)]
pub async fn reassign_teacher_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((class_id, assignment_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ReassignTeacherRequest>,
) -> Result<Json<AssignmentView>, Rejection> {
    let owner_id = require_school(&identity)?;
    let assignment = state
        .school
        .reassign_teacher(owner_id, class_id, assignment_id, req.teacher_id)
        .await
        .map_err(|e| reject("reassign teacher", e))?;
    Ok(Json(AssignmentView::from(assignment)))
}

/// List the assignments of a class.
#[utoipa::path(
    get,
    path = "/classes/{class_id}/assignments",
    params(("class_id" = Uuid, Path, description = "The class")),
    responses((status = 200, description = "Assignments of the class", body = [AssignmentView]))
)]
pub async fn list_assignments_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(class_id): Path<Uuid>,
) -> Result<Json<Vec<AssignmentView>>, Rejection> {
    let owner_id = require_school(&identity)?;
    let assignments = state
        .school
        .assignments(owner_id, class_id)
        .await
        .map_err(|e| reject("list assignments", e))?;
    Ok(Json(assignments.into_iter().map(AssignmentView::from).collect()))
}

//=========================================================================================
// Catalogues
//=========================================================================================

/// Add a subject to the catalogue.
#[utoipa::path(
    post,
    path = "/subjects",
    request_body = CreateSubjectRequest,
    responses(
        (status = 201, description = "Subject added", body = SubjectView),
        (status = 409, description = "Subject already exists")
    )
)]
pub async fn create_subject_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateSubjectRequest>,
) -> Result<impl IntoResponse, Rejection> {
    require_school(&identity)?;
    let subject = state
        .school
        .add_subject(&req.name)
        .await
        .map_err(|e| reject("add subject", e))?;
    Ok((StatusCode::CREATED, Json(SubjectView::from(subject))))
}

/// List the subject catalogue.
#[utoipa::path(
    get,
    path = "/subjects",
    responses((status = 200, description = "All subjects", body = [SubjectView]))
)]
pub async fn list_subjects_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SubjectView>>, Rejection> {
    let subjects = state
        .school
        .subjects()
        .await
        .map_err(|e| reject("list subjects", e))?;
    Ok(Json(subjects.into_iter().map(SubjectView::from).collect()))
}

/// Add a teacher to the catalogue.
#[utoipa::path(
    post,
    path = "/teachers",
    request_body = CreateTeacherRequest,
    responses(
        (status = 201, description = "Teacher added", body = TeacherView),
        (status = 400, description = "Missing name or subject")
    )
)]
pub async fn create_teacher_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateTeacherRequest>,
) -> Result<impl IntoResponse, Rejection> {
    require_school(&identity)?;
    let new = NewTeacher {
        first_name: req.first_name,
        last_name: req.last_name,
        subject_name: req.subject_name,
        birthdate: req.birthdate,
    };
    let teacher = state
        .school
        .add_teacher(new)
        .await
        .map_err(|e| reject("add teacher", e))?;
    Ok((StatusCode::CREATED, Json(TeacherView::from(teacher))))
}

/// Edit a catalogue teacher. Assignments pick up the new name.
#[utoipa::path(
    put,
    path = "/teachers/{teacher_id}",
    params(("teacher_id" = Uuid, Path, description = "The teacher")),
    request_body = CreateTeacherRequest,
    responses(
        (status = 200, description = "Teacher updated", body = TeacherView),
        (status = 400, description = "Missing name or subject"),
        (status = 404, description = "Teacher not found")
    )
)]
pub async fn update_teacher_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(teacher_id): Path<Uuid>,
    Json(req): Json<CreateTeacherRequest>,
) -> Result<Json<TeacherView>, Rejection> {
    require_school(&identity)?;
    let changes = NewTeacher {
        first_name: req.first_name,
        last_name: req.last_name,
        subject_name: req.subject_name,
        birthdate: req.birthdate,
    };
    let teacher = state
        .school
        .update_teacher(teacher_id, changes)
        .await
        .map_err(|e| reject("update teacher", e))?;
    Ok(Json(TeacherView::from(teacher)))
}

/// List the teacher catalogue.
#[utoipa::path(
    get,
    path = "/teachers",
    responses((status = 200, description = "All teachers", body = [TeacherView]))
)]
pub async fn list_teachers_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<TeacherView>>, Rejection> {
    require_school(&identity)?;
    let teachers = state
        .school
        .teachers()
        .await
        .map_err(|e| reject("list teachers", e))?;
    Ok(Json(teachers.into_iter().map(TeacherView::from).collect()))
}

//=========================================================================================
// Accounts
//=========================================================================================

async fn create_account(
    state: &AppState,
    email: &str,
    password: &str,
    display_name: String,
    role: Role,
) -> Result<AccountView, Rejection> {
    let password_hash = hash_new_password(email.trim(), password)?;
    let profile = UserProfile {
        user_id: Uuid::new_v4(),
        email: email.trim().to_string(),
        display_name: Some(display_name),
        role,
    };
    let profile = state
        .directory
        .create_account(profile, &password_hash)
        .await
        .map_err(|e| reject("create account", e))?;
    info!("{} account {} created", profile.role, profile.user_id);
    Ok(AccountView::from(profile))
}

/// Create the login of a teacher from the catalogue.
#[utoipa::path(
    post,
    path = "/accounts/teachers",
    request_body = CreateTeacherAccountRequest,
    responses(
        (status = 201, description = "Account created", body = AccountView),
        (status = 404, description = "Teacher not found"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn create_teacher_account_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateTeacherAccountRequest>,
) -> Result<impl IntoResponse, Rejection> {
    require_school(&identity)?;
    let teacher = state
        .school
        .teacher(req.teacher_id)
        .await
        .map_err(|e| reject("create teacher account", e))?;

    let account = create_account(
        &state,
        &req.email,
        &req.password,
        format!("{} {}", teacher.first_name, teacher.last_name),
        Role::Teacher {
            teacher_id: teacher.id,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// Create the parent login of a student of the caller's school.
#[utoipa::path(
    post,
    path = "/accounts/parents",
    request_body = CreateParentAccountRequest,
    responses(
        (status = 201, description = "Account created", body = AccountView),
        (status = 404, description = "Student not found"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn create_parent_account_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateParentAccountRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let owner_id = require_school(&identity)?;
    let student = state
        .school
        .student(owner_id, req.student_id)
        .await
        .map_err(|e| reject("create parent account", e))?;

    let account = create_account(
        &state,
        &req.email,
        &req.password,
        student.full_name(),
        Role::Parent {
            student_id: student.id,
            class_id: student.class_id,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::test_support::{account, fixture};
    use school_sync_core::ports::DirectoryStore;

    fn parent_request(email: &str, student_id: Uuid) -> Json<CreateParentAccountRequest> {
        Json(CreateParentAccountRequest {
            email: email.to_string(),
            password: "secret".to_string(),
            student_id,
        })
    }

    #[tokio::test]
    async fn test_parent_accounts_stay_in_the_school_partition() {
        let f = fixture().await;
        let second_school = account(&f.store, "lycee@example.ma", Role::School).await;

        let foreign = create_parent_account_handler(
            State(f.state.clone()),
            Extension(second_school),
            parent_request("intrus@example.ma", f.student_id),
        )
        .await;
        let Err((status, _)) = foreign else {
            panic!("another school created a parent account for this student");
        };
        assert_eq!(status, StatusCode::NOT_FOUND);

        let sibling = f
            .state
            .school
            .add_student(
                f.school.user_id,
                f.class_id,
                NewStudent {
                    massar_code: "M101".to_string(),
                    first_name: "Yassine".to_string(),
                    last_name: "Tazi".to_string(),
                    birthdate: None,
                },
            )
            .await
            .unwrap();
        let created = create_parent_account_handler(
            State(f.state.clone()),
            Extension(f.school.clone()),
            parent_request("tazi@example.ma", sibling.id),
        )
        .await;
        let Ok(response) = created else {
            panic!("the school could not create a parent account");
        };
        assert_eq!(response.into_response().status(), StatusCode::CREATED);

        let profile = f.store.profile_for_student(sibling.id).await.unwrap().unwrap();
        assert_eq!(profile.email, "tazi@example.ma");
        assert_eq!(profile.display_name.as_deref(), Some("Yassine Tazi"));
        assert_eq!(
            profile.role,
            Role::Parent {
                student_id: sibling.id,
                class_id: f.class_id,
            }
        );

        let duplicate = create_parent_account_handler(
            State(f.state.clone()),
            Extension(f.school.clone()),
            parent_request("Parent@example.ma", sibling.id),
        )
        .await;
        let Err((status, _)) = duplicate else {
            panic!("an email was registered twice");
        };
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_school_edits_records_and_reassigns() {
        let f = fixture().await;

        let Json(student) = update_student_handler(
            State(f.state.clone()),
            Extension(f.school.clone()),
            Path(f.student_id),
            Json(CreateStudentRequest {
                massar_code: "M200".to_string(),
                first_name: "Rania".to_string(),
                last_name: "El Tazi".to_string(),
                birthdate: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(student.last_name, "El Tazi");
        assert_eq!(student.class_id, f.class_id);

        let err = update_student_handler(
            State(f.state.clone()),
            Extension(f.parent.clone()),
            Path(f.student_id),
            Json(CreateStudentRequest {
                massar_code: String::new(),
                first_name: "X".to_string(),
                last_name: "Y".to_string(),
                birthdate: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);

        let Json(teacher) = update_teacher_handler(
            State(f.state.clone()),
            Extension(f.school.clone()),
            Path(f.teacher_id),
            Json(CreateTeacherRequest {
                first_name: "Omar".to_string(),
                last_name: "El Fassi".to_string(),
                subject_name: "Math".to_string(),
                birthdate: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(teacher.last_name, "El Fassi");

        let replacement = f
            .state
            .school
            .add_teacher(NewTeacher {
                first_name: "Salma".to_string(),
                last_name: "Idrissi".to_string(),
                subject_name: "Math".to_string(),
                birthdate: None,
            })
            .await
            .unwrap();
        let assignment = f
            .state
            .school
            .assignments(f.school.user_id, f.class_id)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(assignment.teacher_display_name(), "Omar El Fassi");

        let Json(reassigned) = reassign_teacher_handler(
            State(f.state.clone()),
            Extension(f.school.clone()),
            Path((f.class_id, assignment.id)),
            Json(ReassignTeacherRequest {
                teacher_id: replacement.id,
            }),
        )
        .await
        .unwrap();
        assert_eq!(reassigned.teacher_id, replacement.id);
        assert_eq!(reassigned.teacher_name, "Salma Idrissi");

        let err = reassign_teacher_handler(
            State(f.state.clone()),
            Extension(f.school.clone()),
            Path((f.class_id, Uuid::new_v4())),
            Json(ReassignTeacherRequest {
                teacher_id: replacement.id,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }
}
