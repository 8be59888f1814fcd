//! crates/school_sync_core/src/homework.rs
//!
//! Homework given by a teacher to a class for one subject.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::Homework;
use crate::ports::{PortError, PortResult, SchoolStore};

/// Fields a teacher fills in when posting or editing homework.
#[derive(Debug, Clone)]
pub struct HomeworkDraft {
    pub title: String,
    pub description: String,
    pub deadline: DateTime<Utc>,
}

#[derive(Clone)]
pub struct HomeworkService {
    school: Arc<dyn SchoolStore>,
}

impl HomeworkService {
    pub fn new(school: Arc<dyn SchoolStore>) -> Self {
        Self { school }
    }

    /// Posts homework. The same title twice for a class and subject is a conflict.
    pub async fn add(
        &self,
        owner_id: Uuid,
        class_id: Uuid,
        subject_id: Uuid,
        teacher_id: Uuid,
        draft: HomeworkDraft,
    ) -> PortResult<Homework> {
        let title = checked_title(&draft)?;
        self.ensure_title_free(class_id, subject_id, &title, None).await?;

        let homework = Homework {
            id: Uuid::new_v4(),
            owner_id,
            class_id,
            subject_id,
            teacher_id,
            title,
            description: draft.description,
            deadline: draft.deadline,
            created_at: Utc::now(),
        };
        self.school.insert_homework(homework.clone()).await?;
        Ok(homework)
    }

    /// Edits homework. Only the teacher who posted it may change it, and the new
    /// title must not clash with other homework of the class and subject.
    pub async fn update(
        &self,
        homework_id: Uuid,
        teacher_id: Uuid,
        draft: HomeworkDraft,
    ) -> PortResult<Homework> {
        let mut homework = self.owned(homework_id, teacher_id).await?;
        let title = checked_title(&draft)?;
        self.ensure_title_free(homework.class_id, homework.subject_id, &title, Some(homework.id))
            .await?;
        homework.title = title;
        homework.description = draft.description;
        homework.deadline = draft.deadline;
        self.school.update_homework(homework.clone()).await?;
        Ok(homework)
    }

    pub async fn delete(&self, homework_id: Uuid, teacher_id: Uuid) -> PortResult<()> {
        self.owned(homework_id, teacher_id).await?;
        self.school.delete_homework(homework_id).await
    }

    /// Homework of a class in a subject, nearest deadline first.
    pub async fn for_class_subject(
        &self,
        class_id: Uuid,
        subject_id: Uuid,
    ) -> PortResult<Vec<Homework>> {
        let mut homework = self.school.homework_for(class_id, subject_id).await?;
        homework.sort_by(|a, b| a.deadline.cmp(&b.deadline));
        Ok(homework)
    }

    async fn ensure_title_free(
        &self,
        class_id: Uuid,
        subject_id: Uuid,
        title: &str,
        except: Option<Uuid>,
    ) -> PortResult<()> {
        let existing = self.school.homework_for(class_id, subject_id).await?;
        if existing
            .iter()
            .any(|h| h.title == title && Some(h.id) != except)
        {
            return Err(PortError::Conflict(format!("homework '{}'", title)));
        }
        Ok(())
    }

    async fn owned(&self, homework_id: Uuid, teacher_id: Uuid) -> PortResult<Homework> {
        let homework = self
            .school
            .get_homework(homework_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Homework {} not found", homework_id)))?;
        if homework.teacher_id != teacher_id {
            return Err(PortError::Unauthorized);
        }
        Ok(homework)
    }
}

fn checked_title(draft: &HomeworkDraft) -> PortResult<String> {
    let title = draft.title.trim();
    if title.is_empty() {
        return Err(PortError::Invalid("homework text cannot be empty".to_string()));
    }
    Ok(title.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use chrono::Duration;

    fn draft(title: &str, deadline: DateTime<Utc>) -> HomeworkDraft {
        HomeworkDraft {
            title: title.to_string(),
            description: "Exercices page 12".to_string(),
            deadline,
        }
    }

    #[tokio::test]
    async fn test_duplicate_homework_is_rejected() {
        let service = HomeworkService::new(Arc::new(InMemoryStore::new()));
        let (owner, class, subject, teacher) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let deadline = Utc::now() + Duration::days(2);

        service
            .add(owner, class, subject, teacher, draft("Lecture", deadline))
            .await
            .unwrap();
        let err = service
            .add(owner, class, subject, teacher, draft("Lecture", deadline))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_edit_cannot_duplicate_another_title() {
        let service = HomeworkService::new(Arc::new(InMemoryStore::new()));
        let (owner, class, subject, teacher) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let deadline = Utc::now() + Duration::days(1);
        service
            .add(owner, class, subject, teacher, draft("Lecture", deadline))
            .await
            .unwrap();
        let second = service
            .add(owner, class, subject, teacher, draft("Dictée", deadline))
            .await
            .unwrap();

        let err = service
            .update(second.id, teacher, draft("Lecture", deadline))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));

        let mut titles: Vec<String> = service
            .for_class_subject(class, subject)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.title)
            .collect();
        titles.sort();
        assert_eq!(titles, vec!["Dictée", "Lecture"]);

        // Keeping its own title is not a clash.
        let kept = service
            .update(second.id, teacher, draft("Dictée", deadline + Duration::days(1)))
            .await
            .unwrap();
        assert_eq!(kept.deadline, deadline + Duration::days(1));
    }

    #[tokio::test]
    async fn test_only_author_can_edit_or_delete() {
        let service = HomeworkService::new(Arc::new(InMemoryStore::new()));
        let (owner, class, subject, teacher) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let homework = service
            .add(owner, class, subject, teacher, draft("Dictée", Utc::now()))
            .await
            .unwrap();

        let err = service
            .update(homework.id, Uuid::new_v4(), draft("Autre", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Unauthorized));

        let updated = service
            .update(homework.id, teacher, draft("Dictée 2", Utc::now()))
            .await
            .unwrap();
        assert_eq!(updated.title, "Dictée 2");

        service.delete(homework.id, teacher).await.unwrap();
        assert!(service
            .for_class_subject(class, subject)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_listing_is_ordered_by_deadline_and_flags_past_ones() {
        let service = HomeworkService::new(Arc::new(InMemoryStore::new()));
        let (owner, class, subject, teacher) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        service
            .add(owner, class, subject, teacher, draft("Later", now + Duration::days(3)))
            .await
            .unwrap();
        service
            .add(owner, class, subject, teacher, draft("Past", now - Duration::days(1)))
            .await
            .unwrap();

        let listed = service.for_class_subject(class, subject).await.unwrap();
        assert_eq!(listed[0].title, "Past");
        assert!(listed[0].is_past_deadline(now));
        assert!(!listed[1].is_past_deadline(now));
    }
}
