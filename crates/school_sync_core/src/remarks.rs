//! crates/school_sync_core/src/remarks.rs
//!
//! Teacher remarks about a student in a subject, and their read tracking.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{MessageStatus, Notification, Remark};
use crate::ports::{PortError, PortResult, RemarkStore, SchoolStore};

#[derive(Clone)]
pub struct RemarkService {
    remarks: Arc<dyn RemarkStore>,
    school: Arc<dyn SchoolStore>,
}

impl RemarkService {
    pub fn new(remarks: Arc<dyn RemarkStore>, school: Arc<dyn SchoolStore>) -> Self {
        Self { remarks, school }
    }

    /// Records a remark from `teacher_id` about a student in a subject.
    ///
    /// The teacher must be the one assigned to that subject in the student's class.
    /// A notification record is written alongside the remark.
    pub async fn add(
        &self,
        teacher_id: Uuid,
        student_id: Uuid,
        subject_id: Uuid,
        text: &str,
    ) -> PortResult<Remark> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PortError::Invalid("remark cannot be empty".to_string()));
        }
        let student = self
            .school
            .get_student(student_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Student {} not found", student_id)))?;
        let assignment = self
            .school
            .find_assignment_for_subject(student.owner_id, student.class_id, subject_id)
            .await?
            .ok_or_else(|| {
                PortError::NotFound(format!(
                    "Subject {} is not taught in class {}",
                    subject_id, student.class_id
                ))
            })?;
        if assignment.teacher_id != teacher_id {
            return Err(PortError::Unauthorized);
        }

        let now = Utc::now();
        let remark = Remark {
            id: Uuid::new_v4(),
            student_id,
            class_id: student.class_id,
            subject_id,
            teacher_id,
            text: text.to_string(),
            status: MessageStatus::Unread,
            created_at: now,
        };
        self.remarks.insert_remark(remark.clone()).await?;

        let notification = Notification {
            id: Uuid::new_v4(),
            student_id,
            message: format!(
                "New remark added for {} in {}.",
                student.first_name, assignment.subject_name
            ),
            created_at: now,
            read: false,
        };
        if let Err(e) = self.remarks.insert_notification(notification).await {
            warn!("Remark {} saved but its notification was not: {:?}", remark.id, e);
        }

        info!("Remark {} added for student {}", remark.id, student_id);
        Ok(remark)
    }

    /// Rewrites the text of a remark. Only its author may; the read state is kept.
    pub async fn edit(&self, remark_id: Uuid, teacher_id: Uuid, text: &str) -> PortResult<Remark> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PortError::Invalid("remark cannot be empty".to_string()));
        }
        let mut remark = self.authored(remark_id, teacher_id).await?;
        self.remarks.update_remark_text(remark_id, text).await?;
        remark.text = text.to_string();
        Ok(remark)
    }

    pub async fn delete(&self, remark_id: Uuid, teacher_id: Uuid) -> PortResult<()> {
        self.authored(remark_id, teacher_id).await?;
        self.remarks.delete_remark(remark_id).await?;
        info!("Remark {} deleted by teacher {}", remark_id, teacher_id);
        Ok(())
    }

    async fn authored(&self, remark_id: Uuid, teacher_id: Uuid) -> PortResult<Remark> {
        let remark = self
            .remarks
            .get_remark(remark_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Remark {} not found", remark_id)))?;
        if remark.teacher_id != teacher_id {
            return Err(PortError::Unauthorized);
        }
        Ok(remark)
    }

    /// Remarks about the student in the subject, newest first.
    pub async fn for_student(&self, student_id: Uuid, subject_id: Uuid) -> PortResult<Vec<Remark>> {
        let mut remarks = self.remarks.remarks_for(student_id, subject_id).await?;
        remarks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(remarks)
    }

    /// The remarks a given teacher wrote about the student in the subject.
    pub async fn by_teacher(
        &self,
        teacher_id: Uuid,
        student_id: Uuid,
        subject_id: Uuid,
    ) -> PortResult<Vec<Remark>> {
        Ok(self
            .for_student(student_id, subject_id)
            .await?
            .into_iter()
            .filter(|r| r.teacher_id == teacher_id)
            .collect())
    }

    /// Marks the student's remarks in the subject as read, once the parent has seen them.
    pub async fn mark_seen(&self, student_id: Uuid, subject_id: Uuid) -> PortResult<usize> {
        let flipped = self.remarks.mark_remarks_read(student_id, subject_id).await?;
        if flipped > 0 {
            info!(
                "{} remarks of student {} in subject {} marked read",
                flipped, student_id, subject_id
            );
        }
        Ok(flipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClassAssignment, SchoolClass, Student};
    use crate::memory::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        service: RemarkService,
        teacher_id: Uuid,
        subject_id: Uuid,
        student: Uuid,
        classmate: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let owner_id = Uuid::new_v4();
        let class = SchoolClass {
            id: Uuid::new_v4(),
            owner_id,
            title: "6eme Année A".to_string(),
        };
        store.insert_class(class.clone()).await.unwrap();

        let mut ids = Vec::new();
        for first_name in ["Salma", "Omar"] {
            let student = Student {
                id: Uuid::new_v4(),
                owner_id,
                class_id: class.id,
                massar_code: String::new(),
                first_name: first_name.to_string(),
                last_name: "Tazi".to_string(),
                birthdate: None,
            };
            ids.push(student.id);
            store.insert_student(student).await.unwrap();
        }

        let teacher_id = Uuid::new_v4();
        let subject_id = Uuid::new_v4();
        store
            .insert_assignment(ClassAssignment {
                id: Uuid::new_v4(),
                owner_id,
                class_id: class.id,
                subject_id,
                subject_name: "Arabe".to_string(),
                teacher_id,
                teacher_last_name: "Fassi".to_string(),
                teacher_first_name: "Nadia".to_string(),
            })
            .await
            .unwrap();

        Fixture {
            service: RemarkService::new(store.clone(), store.clone()),
            store,
            teacher_id,
            subject_id,
            student: ids[0],
            classmate: ids[1],
        }
    }

    #[tokio::test]
    async fn test_add_writes_remark_and_notification() {
        let f = fixture().await;
        let remark = f
            .service
            .add(f.teacher_id, f.student, f.subject_id, "Très bon travail")
            .await
            .unwrap();
        assert_eq!(remark.status, MessageStatus::Unread);

        let notifications = f.store.notifications().await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].student_id, f.student);
        assert_eq!(notifications[0].message, "New remark added for Salma in Arabe.");
        assert!(!notifications[0].read);
    }

    #[tokio::test]
    async fn test_only_assigned_teacher_may_add() {
        let f = fixture().await;
        let err = f
            .service
            .add(Uuid::new_v4(), f.student, f.subject_id, "Bavard")
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Unauthorized));
    }

    #[tokio::test]
    async fn test_only_author_edits_or_deletes() {
        let f = fixture().await;
        let remark = f
            .service
            .add(f.teacher_id, f.student, f.subject_id, "Bavard")
            .await
            .unwrap();

        let err = f
            .service
            .edit(remark.id, Uuid::new_v4(), "Calme")
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Unauthorized));
        let err = f.service.delete(remark.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PortError::Unauthorized));

        let edited = f
            .service
            .edit(remark.id, f.teacher_id, " Plus calme ")
            .await
            .unwrap();
        assert_eq!(edited.text, "Plus calme");
        assert_eq!(edited.status, MessageStatus::Unread);
        let listed = f.service.for_student(f.student, f.subject_id).await.unwrap();
        assert_eq!(listed[0].text, "Plus calme");

        f.service.delete(remark.id, f.teacher_id).await.unwrap();
        assert!(f
            .service
            .for_student(f.student, f.subject_id)
            .await
            .unwrap()
            .is_empty());
        let err = f.service.delete(remark.id, f.teacher_id).await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mark_seen_leaves_other_students_untouched() {
        let f = fixture().await;
        for text in ["Absent", "En retard"] {
            f.service
                .add(f.teacher_id, f.student, f.subject_id, text)
                .await
                .unwrap();
        }
        f.service
            .add(f.teacher_id, f.classmate, f.subject_id, "Excellent")
            .await
            .unwrap();

        assert_eq!(f.service.mark_seen(f.student, f.subject_id).await.unwrap(), 2);

        let seen = f.service.for_student(f.student, f.subject_id).await.unwrap();
        assert!(seen.iter().all(|r| r.status == MessageStatus::Read));

        let untouched = f
            .service
            .for_student(f.classmate, f.subject_id)
            .await
            .unwrap();
        assert_eq!(untouched.len(), 1);
        assert_eq!(untouched[0].status, MessageStatus::Unread);
    }

    #[tokio::test]
    async fn test_unread_counts_follow_mark_seen() {
        use crate::unread::UnreadAggregator;

        let f = fixture().await;
        f.service
            .add(f.teacher_id, f.student, f.subject_id, "Devoir non rendu")
            .await
            .unwrap();
        let unread = UnreadAggregator::new(f.store.clone(), f.store.clone());
        let subject = crate::domain::Subject {
            id: f.subject_id,
            name: "Arabe".to_string(),
        };

        let before = unread
            .unread_remarks_by_subject(f.student, &[subject.clone()])
            .await
            .unwrap();
        assert_eq!(before.get(&f.subject_id), Some(&1));

        f.service.mark_seen(f.student, f.subject_id).await.unwrap();
        let after = unread
            .unread_remarks_by_subject(f.student, &[subject])
            .await
            .unwrap();
        assert_eq!(after.get(&f.subject_id), Some(&0));
        assert_eq!(unread.unread_remarks(f.student).await.unwrap(), 0);
    }
}
