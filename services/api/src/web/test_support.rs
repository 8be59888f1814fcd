//! services/api/src/web/test_support.rs
//!
//! A small school on the in-memory store, shared by the handler tests.

use std::sync::Arc;

use school_sync_core::domain::{Identity, Role, UserProfile};
use school_sync_core::ports::DirectoryStore;
use school_sync_core::{InMemoryStore, NewStudent, NewTeacher};
use uuid::Uuid;

use crate::config::Config;
use crate::web::state::AppState;

pub(crate) struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub state: Arc<AppState>,
    pub school: Identity,
    pub parent: Identity,
    pub teacher: Identity,
    /// A teacher account with no assignment in this school.
    pub outsider: Identity,
    pub class_id: Uuid,
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub teacher_id: Uuid,
}

pub(crate) async fn account(store: &InMemoryStore, email: &str, role: Role) -> Identity {
    let profile = store
        .create_account(
            UserProfile {
                user_id: Uuid::new_v4(),
                email: email.to_string(),
                display_name: None,
                role,
            },
            "hash",
        )
        .await
        .unwrap();
    Identity {
        user_id: profile.user_id,
        email: profile.email,
        role: profile.role,
    }
}

/// One school, one class "CM2" with one student, one teacher assigned to Math.
pub(crate) async fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let config = Arc::new(Config::from_lookup(|_| None).unwrap());
    let state = Arc::new(AppState::from_stores(store.clone(), config));

    let school = account(&store, "school@example.ma", Role::School).await;
    let class = state.school.add_class(school.user_id, "CM2").await.unwrap();
    let student = state
        .school
        .add_student(
            school.user_id,
            class.id,
            NewStudent {
                massar_code: "M100".to_string(),
                first_name: "Rania".to_string(),
                last_name: "Tazi".to_string(),
                birthdate: None,
            },
        )
        .await
        .unwrap();
    let math = state.school.add_subject("Math").await.unwrap();
    let teacher_record = state
        .school
        .add_teacher(NewTeacher {
            first_name: "Omar".to_string(),
            last_name: "Fassi".to_string(),
            subject_name: "Math".to_string(),
            birthdate: None,
        })
        .await
        .unwrap();
    state
        .school
        .assign_teacher(school.user_id, class.id, math.id, teacher_record.id)
        .await
        .unwrap();

    let parent = account(
        &store,
        "parent@example.ma",
        Role::Parent {
            student_id: student.id,
            class_id: class.id,
        },
    )
    .await;
    let teacher = account(
        &store,
        "prof@example.ma",
        Role::Teacher {
            teacher_id: teacher_record.id,
        },
    )
    .await;
    let outsider = account(
        &store,
        "other@example.ma",
        Role::Teacher {
            teacher_id: Uuid::new_v4(),
        },
    )
    .await;

    Fixture {
        store,
        state,
        school,
        parent,
        teacher,
        outsider,
        class_id: class.id,
        student_id: student.id,
        subject_id: math.id,
        teacher_id: teacher_record.id,
    }
}
