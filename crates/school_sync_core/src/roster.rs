//! crates/school_sync_core/src/roster.rs
//!
//! Collects class assignments across every school partition.
//!
//! Teachers and parents own nothing; they read by scanning all partitions. The
//! scan fans out over partitions and classes concurrently and joins once every
//! query has settled. A failed query is logged and contributes nothing.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::domain::{ClassAssignment, RosterEntry, SchoolClass, Student};
use crate::ports::{PortResult, SchoolStore};

/// Which assignments a roster scan keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterFilter {
    /// Assignments taught by this teacher.
    Teacher(Uuid),
    /// Assignments of this class.
    Class(Uuid),
}

impl RosterFilter {
    fn keeps_class(&self, class: &SchoolClass) -> bool {
        match self {
            RosterFilter::Teacher(_) => true,
            RosterFilter::Class(class_id) => class.id == *class_id,
        }
    }

    fn keeps(&self, assignment: &ClassAssignment) -> bool {
        match self {
            RosterFilter::Teacher(teacher_id) => assignment.teacher_id == *teacher_id,
            RosterFilter::Class(class_id) => assignment.class_id == *class_id,
        }
    }
}

/// A class a teacher teaches in, with its students.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaughtClass {
    pub owner_id: Uuid,
    pub class_id: Uuid,
    pub class_title: String,
    pub assignments: Vec<ClassAssignment>,
    pub students: Vec<Student>,
}

#[derive(Clone)]
pub struct RosterAggregator {
    school: Arc<dyn SchoolStore>,
}

impl RosterAggregator {
    pub fn new(school: Arc<dyn SchoolStore>) -> Self {
        Self { school }
    }

    /// Flat list of the assignments matching `filter`, across every partition.
    pub async fn aggregate(&self, filter: RosterFilter) -> PortResult<Vec<RosterEntry>> {
        let partitions = self.school.school_partitions().await?;
        debug!("Scanning {} school partitions for {:?}", partitions.len(), filter);

        let scans = partitions
            .into_iter()
            .map(|owner_id| self.scan_partition(owner_id, filter));
        let entries = join_all(scans).await.into_iter().flatten().collect();
        Ok(entries)
    }

    async fn scan_partition(&self, owner_id: Uuid, filter: RosterFilter) -> Vec<RosterEntry> {
        let classes = match self.school.classes(owner_id).await {
            Ok(classes) => classes,
            Err(e) => {
                error!("Failed to list classes of partition {}: {:?}", owner_id, e);
                return Vec::new();
            }
        };

        let scans = classes
            .into_iter()
            .filter(|class| filter.keeps_class(class))
            .map(|class| self.scan_class(class, filter));
        join_all(scans).await.into_iter().flatten().collect()
    }

    async fn scan_class(&self, class: SchoolClass, filter: RosterFilter) -> Vec<RosterEntry> {
        match self.school.assignments(class.owner_id, class.id).await {
            Ok(assignments) => assignments
                .into_iter()
                .filter(|a| filter.keeps(a))
                .map(|assignment| RosterEntry {
                    owner_id: class.owner_id,
                    class_id: class.id,
                    class_title: class.title.clone(),
                    assignment,
                })
                .collect(),
            Err(e) => {
                error!("Failed to list assignments of class {}: {:?}", class.id, e);
                Vec::new()
            }
        }
    }

    /// Assignments of a class: the subjects taught there and by whom.
    pub async fn teachers_for_class(&self, class_id: Uuid) -> PortResult<Vec<RosterEntry>> {
        self.aggregate(RosterFilter::Class(class_id)).await
    }

    /// Every class the teacher teaches in, grouped, with the class's students.
    pub async fn classes_for_teacher(&self, teacher_id: Uuid) -> PortResult<Vec<TaughtClass>> {
        let entries = self.aggregate(RosterFilter::Teacher(teacher_id)).await?;

        let mut grouped: BTreeMap<(Uuid, Uuid), TaughtClass> = BTreeMap::new();
        for entry in entries {
            grouped
                .entry((entry.owner_id, entry.class_id))
                .or_insert_with(|| TaughtClass {
                    owner_id: entry.owner_id,
                    class_id: entry.class_id,
                    class_title: entry.class_title.clone(),
                    assignments: Vec::new(),
                    students: Vec::new(),
                })
                .assignments
                .push(entry.assignment);
        }

        let loads = grouped.into_values().map(|mut class| async move {
            match self.school.students(class.owner_id, class.class_id).await {
                Ok(students) => class.students = students,
                Err(e) => error!("Failed to list students of class {}: {:?}", class.class_id, e),
            }
            class
        });
        Ok(join_all(loads).await)
    }
}
