//! crates/school_sync_core/src/school.rs
//!
//! Record management for school accounts: classes, students, the subject and
//! teacher catalogues, teacher-to-class assignments, and class timetables.

use chrono::{NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{
    ClassAssignment, SchoolClass, Student, Subject, Teacher, Timetable, TimetableSlot,
};
use crate::ports::{PortError, PortResult, SchoolStore};

/// Input for a new student record.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub massar_code: String,
    pub first_name: String,
    pub last_name: String,
    pub birthdate: Option<NaiveDate>,
}

/// Input for a new teacher record.
#[derive(Debug, Clone)]
pub struct NewTeacher {
    pub first_name: String,
    pub last_name: String,
    pub subject_name: String,
    pub birthdate: Option<NaiveDate>,
}

#[derive(Clone)]
pub struct SchoolDirectory {
    school: Arc<dyn SchoolStore>,
}

fn required(field: &str, value: &str) -> PortResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(PortError::Invalid(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

impl SchoolDirectory {
    pub fn new(school: Arc<dyn SchoolStore>) -> Self {
        Self { school }
    }

    // --- Classes ---

    /// Creates a class in the owner's partition. Titles are unique per partition.
    pub async fn add_class(&self, owner_id: Uuid, title: &str) -> PortResult<SchoolClass> {
        let title = required("class title", title)?;
        if self.school.find_class_by_title(owner_id, &title).await?.is_some() {
            return Err(PortError::Conflict(format!("class '{}'", title)));
        }
        let class = SchoolClass {
            id: Uuid::new_v4(),
            owner_id,
            title,
        };
        self.school.insert_class(class.clone()).await?;
        info!("Class {} created in partition {}", class.id, owner_id);
        Ok(class)
    }

    pub async fn classes(&self, owner_id: Uuid) -> PortResult<Vec<SchoolClass>> {
        self.school.classes(owner_id).await
    }

    async fn owned_class(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<SchoolClass> {
        self.school
            .get_class(owner_id, class_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Class {} not found", class_id)))
    }

    // --- Students ---

    pub async fn add_student(
        &self,
        owner_id: Uuid,
        class_id: Uuid,
        new: NewStudent,
    ) -> PortResult<Student> {
        self.owned_class(owner_id, class_id).await?;
        let student = Student {
            id: Uuid::new_v4(),
            owner_id,
            class_id,
            massar_code: new.massar_code.trim().to_string(),
            first_name: required("first name", &new.first_name)?,
            last_name: required("last name", &new.last_name)?,
            birthdate: new.birthdate,
        };
        self.school.insert_student(student.clone()).await?;
        Ok(student)
    }

    pub async fn students(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<Vec<Student>> {
        self.school.students(owner_id, class_id).await
    }

    /// Rewrites a student's names, Massar code and birthdate. The class is kept.
    pub async fn update_student(
        &self,
        owner_id: Uuid,
        student_id: Uuid,
        changes: NewStudent,
    ) -> PortResult<Student> {
        let mut student = self.student(owner_id, student_id).await?;
        student.first_name = required("first name", &changes.first_name)?;
        student.last_name = required("last name", &changes.last_name)?;
        student.massar_code = changes.massar_code.trim().to_string();
        student.birthdate = changes.birthdate;
        self.school.update_student(student.clone()).await?;
        Ok(student)
    }

    /// A student of the owner's partition. Students of other schools are not found.
    pub async fn student(&self, owner_id: Uuid, student_id: Uuid) -> PortResult<Student> {
        self.school
            .get_student(student_id)
            .await?
            .filter(|s| s.owner_id == owner_id)
            .ok_or_else(|| PortError::NotFound(format!("Student {} not found", student_id)))
    }

    // --- Subjects ---

    /// Adds a subject to the shared catalogue. Names are unique.
    pub async fn add_subject(&self, name: &str) -> PortResult<Subject> {
        let name = required("subject name", name)?;
        if self.school.find_subject_by_name(&name).await?.is_some() {
            return Err(PortError::Conflict(format!("subject '{}'", name)));
        }
        let subject = Subject {
            id: Uuid::new_v4(),
            name,
        };
        self.school.insert_subject(subject.clone()).await?;
        Ok(subject)
    }

    pub async fn subjects(&self) -> PortResult<Vec<Subject>> {
        self.school.subjects().await
    }

    // --- Teachers ---

    pub async fn add_teacher(&self, new: NewTeacher) -> PortResult<Teacher> {
        let teacher = Teacher {
            id: Uuid::new_v4(),
            first_name: required("first name", &new.first_name)?,
            last_name: required("last name", &new.last_name)?,
            subject_name: required("subject", &new.subject_name)?,
            birthdate: new.birthdate,
        };
        self.school.insert_teacher(teacher.clone()).await?;
        Ok(teacher)
    }

    pub async fn teachers(&self) -> PortResult<Vec<Teacher>> {
        self.school.teachers().await
    }

    pub async fn teacher(&self, teacher_id: Uuid) -> PortResult<Teacher> {
        self.school
            .get_teacher(teacher_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Teacher {} not found", teacher_id)))
    }

    /// Rewrites a catalogue teacher. Assignments show the new names afterwards.
    pub async fn update_teacher(&self, teacher_id: Uuid, changes: NewTeacher) -> PortResult<Teacher> {
        let mut teacher = self.teacher(teacher_id).await?;
        teacher.first_name = required("first name", &changes.first_name)?;
        teacher.last_name = required("last name", &changes.last_name)?;
        teacher.subject_name = required("subject", &changes.subject_name)?;
        teacher.birthdate = changes.birthdate;
        self.school.update_teacher(teacher.clone()).await?;
        Ok(teacher)
    }

    // --- Assignments ---

    /// Assigns a teacher to teach a subject in a class.
    ///
    /// A class has at most one assignment per subject. The check runs before any
    /// write; two concurrent writers can still both pass it, so stores that can
    /// enforce uniqueness report the loser as a `Conflict` too.
    pub async fn assign_teacher(
        &self,
        owner_id: Uuid,
        class_id: Uuid,
        subject_id: Uuid,
        teacher_id: Uuid,
    ) -> PortResult<ClassAssignment> {
        self.owned_class(owner_id, class_id).await?;
        if self
            .school
            .find_assignment_for_subject(owner_id, class_id, subject_id)
            .await?
            .is_some()
        {
            return Err(PortError::Conflict(
                "this subject is already assigned to this class".to_string(),
            ));
        }

        let subject = self
            .school
            .get_subject(subject_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Subject {} not found", subject_id)))?;
        let teacher = self
            .school
            .get_teacher(teacher_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Teacher {} not found", teacher_id)))?;

        let assignment = ClassAssignment {
            id: Uuid::new_v4(),
            owner_id,
            class_id,
            subject_id,
            subject_name: subject.name,
            teacher_id,
            teacher_last_name: teacher.last_name,
            teacher_first_name: teacher.first_name,
        };
        self.school.insert_assignment(assignment.clone()).await?;
        info!(
            "Teacher {} assigned to subject {} in class {}",
            teacher_id, subject_id, class_id
        );
        Ok(assignment)
    }

    /// Hands an existing assignment of the class over to another teacher.
    pub async fn reassign_teacher(
        &self,
        owner_id: Uuid,
        class_id: Uuid,
        assignment_id: Uuid,
        teacher_id: Uuid,
    ) -> PortResult<ClassAssignment> {
        self.owned_class(owner_id, class_id).await?;
        let mut assignment = self
            .school
            .assignments(owner_id, class_id)
            .await?
            .into_iter()
            .find(|a| a.id == assignment_id)
            .ok_or_else(|| {
                PortError::NotFound(format!("Assignment {} not found", assignment_id))
            })?;
        let teacher = self.teacher(teacher_id).await?;

        assignment.teacher_id = teacher.id;
        assignment.teacher_first_name = teacher.first_name;
        assignment.teacher_last_name = teacher.last_name;
        self.school.update_assignment(assignment.clone()).await?;
        info!(
            "Subject {} of class {} handed to teacher {}",
            assignment.subject_id, class_id, teacher_id
        );
        Ok(assignment)
    }

    pub async fn assignments(
        &self,
        owner_id: Uuid,
        class_id: Uuid,
    ) -> PortResult<Vec<ClassAssignment>> {
        self.school.assignments(owner_id, class_id).await
    }

    // --- Timetables ---

    /// Replaces the weekly timetable of a class.
    ///
    /// Every slot must name a known day, a known period and a catalogue subject,
    /// and a period may be filled once. Slots with a blank subject are dropped.
    pub async fn set_timetable(
        &self,
        owner_id: Uuid,
        class_id: Uuid,
        slots: Vec<TimetableSlot>,
    ) -> PortResult<Timetable> {
        self.owned_class(owner_id, class_id).await?;
        let catalogue: HashSet<String> = self
            .school
            .subjects()
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();

        let mut taken = HashSet::new();
        let mut kept = Vec::with_capacity(slots.len());
        for slot in slots {
            let position = slot.position().ok_or_else(|| {
                PortError::Invalid(format!("no period '{}' on '{}'", slot.period, slot.day))
            })?;
            let subject_name = slot.subject_name.trim().to_string();
            if subject_name.is_empty() {
                continue;
            }
            if !catalogue.contains(&subject_name) {
                return Err(PortError::Invalid(format!("unknown subject '{}'", subject_name)));
            }
            if !taken.insert(position) {
                return Err(PortError::Invalid(format!(
                    "'{}' on '{}' is filled twice",
                    slot.period, slot.day
                )));
            }
            kept.push(TimetableSlot {
                subject_name,
                ..slot
            });
        }

        let timetable = Timetable::new(owner_id, class_id, kept, Utc::now());
        self.school.put_timetable(timetable.clone()).await?;
        info!("Timetable of class {} saved", class_id);
        Ok(timetable)
    }

    /// The timetable of one of the owner's classes, `None` until one is saved.
    pub async fn timetable(&self, owner_id: Uuid, class_id: Uuid) -> PortResult<Option<Timetable>> {
        self.owned_class(owner_id, class_id).await?;
        self.school.get_timetable(owner_id, class_id).await
    }

    /// The timetable of the student's class, looked up in the student's partition.
    pub async fn timetable_for_student(&self, student_id: Uuid) -> PortResult<Option<Timetable>> {
        let student = self
            .school
            .get_student(student_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Student {} not found", student_id)))?;
        self.school
            .get_timetable(student.owner_id, student.class_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    fn teacher_input() -> NewTeacher {
        NewTeacher {
            first_name: "Sara".to_string(),
            last_name: "Alaoui".to_string(),
            subject_name: "Math".to_string(),
            birthdate: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_class_title_is_rejected() {
        let directory = SchoolDirectory::new(Arc::new(InMemoryStore::new()));
        let owner = Uuid::new_v4();
        directory.add_class(owner, "1ere Année A").await.unwrap();

        let err = directory.add_class(owner, "1ere Année A").await.unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));

        // Another school may reuse the title.
        directory.add_class(Uuid::new_v4(), "1ere Année A").await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_subject_is_rejected() {
        let directory = SchoolDirectory::new(Arc::new(InMemoryStore::new()));
        directory.add_subject("Math").await.unwrap();
        let err = directory.add_subject("Math").await.unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_student_requires_existing_class() {
        let directory = SchoolDirectory::new(Arc::new(InMemoryStore::new()));
        let err = directory
            .add_student(
                Uuid::new_v4(),
                Uuid::new_v4(),
                NewStudent {
                    massar_code: "M1".to_string(),
                    first_name: "Amine".to_string(),
                    last_name: "Idrissi".to_string(),
                    birthdate: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_second_assignment_for_subject_is_rejected_before_write() {
        let store = Arc::new(InMemoryStore::new());
        let directory = SchoolDirectory::new(store.clone());
        let owner = Uuid::new_v4();
        let class = directory.add_class(owner, "5eme Année B").await.unwrap();
        let math = directory.add_subject("Math").await.unwrap();
        let first = directory.add_teacher(teacher_input()).await.unwrap();
        let second = directory.add_teacher(teacher_input()).await.unwrap();

        let assignment = directory
            .assign_teacher(owner, class.id, math.id, first.id)
            .await
            .unwrap();
        assert_eq!(assignment.subject_name, "Math");
        assert_eq!(assignment.teacher_display_name(), "Sara Alaoui");

        let err = directory
            .assign_teacher(owner, class.id, math.id, second.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Conflict(_)));

        let stored = store.assignments(owner, class.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].teacher_id, first.id);
    }

    #[tokio::test]
    async fn test_teacher_names_are_required() {
        let directory = SchoolDirectory::new(Arc::new(InMemoryStore::new()));
        let err = directory
            .add_teacher(NewTeacher {
                first_name: " ".to_string(),
                ..teacher_input()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Invalid(_)));
    }

    fn slot(day: &str, period: &str, subject: &str) -> TimetableSlot {
        TimetableSlot {
            day: day.to_string(),
            period: period.to_string(),
            subject_name: subject.to_string(),
        }
    }

    #[tokio::test]
    async fn test_timetable_is_validated_and_ordered() {
        let directory = SchoolDirectory::new(Arc::new(InMemoryStore::new()));
        let owner = Uuid::new_v4();
        let class = directory.add_class(owner, "CE4").await.unwrap();
        directory.add_subject("Math").await.unwrap();
        directory.add_subject("Arabe").await.unwrap();
        assert!(directory.timetable(owner, class.id).await.unwrap().is_none());

        let saved = directory
            .set_timetable(
                owner,
                class.id,
                vec![
                    slot("Mardi", "8H30-10H30", "Arabe"),
                    slot("Lundi", "14H30-16H30", " Math "),
                    slot("Lundi", "8H30-10H30", "Math"),
                    slot("Jeudi", "8H30-10H30", ""),
                ],
            )
            .await
            .unwrap();
        let order: Vec<(&str, &str)> = saved
            .slots
            .iter()
            .map(|s| (s.day.as_str(), s.period.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Lundi", "8H30-10H30"),
                ("Lundi", "14H30-16H30"),
                ("Mardi", "8H30-10H30")
            ]
        );
        assert_eq!(saved.subject_at("Lundi", "14H30-16H30"), Some("Math"));
        assert_eq!(saved.subject_at("Jeudi", "8H30-10H30"), None);

        for bad in [
            vec![slot("Samedi", "8H30-10H30", "Math")],
            vec![slot("Lundi", "8H30-10H30", "Physique")],
            vec![
                slot("Lundi", "8H30-10H30", "Math"),
                slot("Lundi", "8H30-10H30", "Arabe"),
            ],
        ] {
            let err = directory.set_timetable(owner, class.id, bad).await.unwrap_err();
            assert!(matches!(err, PortError::Invalid(_)));
        }

        // Rejected saves leave the stored timetable alone.
        let stored = directory.timetable(owner, class.id).await.unwrap().unwrap();
        assert_eq!(stored.slots.len(), 3);

        // Another school cannot read it.
        let err = directory
            .timetable(Uuid::new_v4(), class.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_teacher_edit_reaches_assignments_and_reassign_swaps_teacher() {
        let store = Arc::new(InMemoryStore::new());
        let directory = SchoolDirectory::new(store.clone());
        let owner = Uuid::new_v4();
        let class = directory.add_class(owner, "CM1").await.unwrap();
        let math = directory.add_subject("Math").await.unwrap();
        let first = directory.add_teacher(teacher_input()).await.unwrap();
        let second = directory
            .add_teacher(NewTeacher {
                first_name: "Karim".to_string(),
                last_name: "Berrada".to_string(),
                ..teacher_input()
            })
            .await
            .unwrap();
        let assignment = directory
            .assign_teacher(owner, class.id, math.id, first.id)
            .await
            .unwrap();

        directory
            .update_teacher(
                first.id,
                NewTeacher {
                    last_name: "Alaoui-Idrissi".to_string(),
                    ..teacher_input()
                },
            )
            .await
            .unwrap();
        let stored = directory.assignments(owner, class.id).await.unwrap();
        assert_eq!(stored[0].teacher_display_name(), "Sara Alaoui-Idrissi");

        let moved = directory
            .reassign_teacher(owner, class.id, assignment.id, second.id)
            .await
            .unwrap();
        assert_eq!(moved.id, assignment.id);
        assert_eq!(moved.teacher_display_name(), "Karim Berrada");
        let stored = directory.assignments(owner, class.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].teacher_id, second.id);

        let err = directory
            .reassign_teacher(owner, class.id, Uuid::new_v4(), second.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_student_lookup_is_scoped_to_partition() {
        let directory = SchoolDirectory::new(Arc::new(InMemoryStore::new()));
        let owner = Uuid::new_v4();
        let class = directory.add_class(owner, "CE6").await.unwrap();
        let student = directory
            .add_student(
                owner,
                class.id,
                NewStudent {
                    massar_code: "M2".to_string(),
                    first_name: "Yasmine".to_string(),
                    last_name: "Bennani".to_string(),
                    birthdate: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(directory.student(owner, student.id).await.unwrap(), student);
        let err = directory
            .student(Uuid::new_v4(), student.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));

        let changes = NewStudent {
            massar_code: " M2B ".to_string(),
            first_name: "Yasmina".to_string(),
            last_name: "Bennani".to_string(),
            birthdate: None,
        };
        let err = directory
            .update_student(Uuid::new_v4(), student.id, changes.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));

        let updated = directory
            .update_student(owner, student.id, changes)
            .await
            .unwrap();
        assert_eq!(updated.class_id, class.id);
        assert_eq!(updated.massar_code, "M2B");
        assert_eq!(directory.student(owner, student.id).await.unwrap(), updated);
    }
}
