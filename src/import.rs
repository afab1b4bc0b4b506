//! Import orchestrator: commits a resolved batch to the record store. Each
//! record stands alone; a failed school fails its students but never the
//! batch, and cancellation stops cleanly between records.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::model::{
    EntityKind, ImportOutcome, OutcomeAction, ProgressEvent, ProgressStage, RecordOutcome,
    ResolutionAction, SchoolDraft, StagingDocument, StudentDraft,
};
use crate::store::{NewSchool, NewStudent, RecordStore, SchoolPatch, StudentPatch};

/// Contract violations caught before any write happens. Per-record store
/// failures are not errors at this level; they land in the outcome.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ImportError {
    #[error("student {name:?} in {school:?} is marked for merge but has no target id")]
    MergeWithoutTarget { school: String, name: String },
    #[error("school {name:?} is marked to reuse an existing record but has no target id")]
    ReuseWithoutTarget { name: String },
}

pub fn import_batch(
    store: &mut dyn RecordStore,
    doc: &StagingDocument,
    cancel: Option<&AtomicBool>,
    progress: &mut dyn FnMut(&ProgressEvent),
) -> Result<ImportOutcome, ImportError> {
    preflight(doc)?;

    let mut outcome = ImportOutcome::default();
    let total = doc.schools.len();

    for (index, school) in doc.schools.iter().enumerate() {
        if is_cancelled(cancel) {
            finish_cancelled(&mut outcome, index, total, progress);
            return Ok(outcome);
        }

        if school.skip_import {
            outcome.results.push(RecordOutcome {
                entity: EntityKind::School,
                name: school.name.clone(),
                success: true,
                action: Some(OutcomeAction::Skipped),
                id: None,
                error: None,
            });
            continue;
        }

        let importable = school
            .students
            .iter()
            .filter(|s| !s.skip_import)
            .count();

        let (school_id, action) = match process_school(store, school) {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("school {:?} failed: {:#}", school.name, err);
                // The school and every student that depended on it fail
                // together; the rest of the batch continues.
                outcome.failure_count += 1 + importable;
                outcome
                    .errors
                    .push(format!("school {:?}: {:#}", school.name, err));
                outcome.results.push(RecordOutcome {
                    entity: EntityKind::School,
                    name: school.name.clone(),
                    success: false,
                    action: None,
                    id: None,
                    error: Some(format!("{:#}", err)),
                });
                progress(&ProgressEvent {
                    stage: ProgressStage::ProcessingSchool,
                    current: index + 1,
                    total,
                    current_school: Some(school.name.clone()),
                    current_student: None,
                    message: format!("school {:?} failed", school.name),
                });
                continue;
            }
        };

        // A committed school is a unit of work in its own right; it counts
        // alongside its students.
        outcome.success_count += 1;
        outcome.results.push(RecordOutcome {
            entity: EntityKind::School,
            name: school.name.clone(),
            success: true,
            action: Some(action),
            id: Some(school_id.clone()),
            error: None,
        });
        progress(&ProgressEvent {
            stage: ProgressStage::ProcessingSchool,
            current: index + 1,
            total,
            current_school: Some(school.name.clone()),
            current_student: None,
            message: format!("school {:?} committed", school.name),
        });

        for student in &school.students {
            if is_cancelled(cancel) {
                finish_cancelled(&mut outcome, index, total, progress);
                return Ok(outcome);
            }

            if student.skip_import {
                outcome.results.push(RecordOutcome {
                    entity: EntityKind::Student,
                    name: student.display_name().to_string(),
                    success: true,
                    action: Some(OutcomeAction::Skipped),
                    id: None,
                    error: None,
                });
                continue;
            }

            match process_student(store, student, &school_id) {
                Ok((id, action)) => {
                    outcome.success_count += 1;
                    outcome.results.push(RecordOutcome {
                        entity: EntityKind::Student,
                        name: student.display_name().to_string(),
                        success: true,
                        action: Some(action),
                        id: Some(id),
                        error: None,
                    });
                }
                Err(err) => {
                    log::warn!(
                        "student {:?} in {:?} failed: {:#}",
                        student.display_name(),
                        school.name,
                        err
                    );
                    outcome.failure_count += 1;
                    outcome.errors.push(format!(
                        "student {:?} in {:?}: {:#}",
                        student.display_name(),
                        school.name,
                        err
                    ));
                    outcome.results.push(RecordOutcome {
                        entity: EntityKind::Student,
                        name: student.display_name().to_string(),
                        success: false,
                        action: None,
                        id: None,
                        error: Some(format!("{:#}", err)),
                    });
                }
            }

            // One event per attempted record, emitted once its write has
            // settled either way.
            progress(&ProgressEvent {
                stage: ProgressStage::ProcessingStudent,
                current: index + 1,
                total,
                current_school: Some(school.name.clone()),
                current_student: Some(student.display_name().to_string()),
                message: format!("student {:?} processed", student.display_name()),
            });
        }
    }

    progress(&ProgressEvent {
        stage: ProgressStage::Completed,
        current: total,
        total,
        current_school: None,
        current_student: None,
        message: format!(
            "import finished: {} succeeded, {} failed",
            outcome.success_count, outcome.failure_count
        ),
    });

    log::info!(
        "import finished: {} succeeded, {} failed",
        outcome.success_count,
        outcome.failure_count
    );
    Ok(outcome)
}

/// Reject malformed resolutions before touching the store.
fn preflight(doc: &StagingDocument) -> Result<(), ImportError> {
    for school in &doc.schools {
        if school.skip_import {
            continue;
        }
        if school.use_existing && school.existing_id.is_none() {
            return Err(ImportError::ReuseWithoutTarget {
                name: school.name.clone(),
            });
        }
        for student in &school.students {
            if student.skip_import {
                continue;
            }
            if student.resolution == Some(ResolutionAction::Merge)
                && student.merge_with_student_id.is_none()
            {
                return Err(ImportError::MergeWithoutTarget {
                    school: school.name.clone(),
                    name: student.display_name().to_string(),
                });
            }
        }
    }
    Ok(())
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.map(|c| c.load(Ordering::Relaxed)).unwrap_or(false)
}

fn finish_cancelled(
    outcome: &mut ImportOutcome,
    current: usize,
    total: usize,
    progress: &mut dyn FnMut(&ProgressEvent),
) {
    outcome.cancelled = true;
    log::info!("import cancelled by operator");
    progress(&ProgressEvent {
        stage: ProgressStage::Cancelled,
        current,
        total,
        current_school: None,
        current_student: None,
        message: "import cancelled".to_string(),
    });
}

fn process_school(
    store: &mut dyn RecordStore,
    school: &SchoolDraft,
) -> anyhow::Result<(String, OutcomeAction)> {
    if school.use_existing {
        // Checked in preflight.
        let existing_id = school.existing_id.clone().unwrap_or_default();

        if school.update_existing_data {
            match store.update_school(&existing_id, &school_patch(school)) {
                Ok(()) => return Ok((existing_id, OutcomeAction::Updated)),
                Err(err) => {
                    // Update is best-effort; the staged students still import
                    // under the existing record.
                    log::warn!(
                        "updating existing school {:?} failed, reusing as-is: {:#}",
                        school.name,
                        err
                    );
                }
            }
        }
        return Ok((existing_id, OutcomeAction::Reused));
    }

    let created = store.create_school(&new_school_record(school))?;
    Ok((created.id, OutcomeAction::Created))
}

fn process_student(
    store: &mut dyn RecordStore,
    student: &StudentDraft,
    school_id: &str,
) -> anyhow::Result<(String, OutcomeAction)> {
    if student.resolution == Some(ResolutionAction::Merge) {
        let target = student.merge_with_student_id.clone().unwrap_or_default();
        store.update_student(&target, &student_patch(student))?;
        return Ok((target, OutcomeAction::Merged));
    }

    let created = store.create_student(&new_student_record(student, school_id))?;
    Ok((created.id, OutcomeAction::Created))
}

fn new_school_record(school: &SchoolDraft) -> NewSchool {
    NewSchool {
        name: school.name.clone(),
        name_en: school.name_en.clone(),
        name_ch: school.name_ch.clone().or_else(|| Some(school.name.clone())),
        school_type: Some(school.school_type),
        district: school.district.clone(),
        address: school.address.clone(),
        contact_person: school.contact_person.clone(),
        email: school.email.clone(),
        phone: school.phone.clone(),
        description: school.description.clone(),
    }
}

fn school_patch(school: &SchoolDraft) -> SchoolPatch {
    SchoolPatch {
        name: Some(school.name.clone()),
        name_en: school.name_en.clone(),
        name_ch: school.name_ch.clone(),
        school_type: Some(school.school_type),
        district: school.district.clone(),
        address: school.address.clone(),
        contact_person: school.contact_person.clone(),
        email: school.email.clone(),
        phone: school.phone.clone(),
        description: school.description.clone(),
    }
}

fn new_student_record(student: &StudentDraft, school_id: &str) -> NewStudent {
    NewStudent {
        school_id: school_id.to_string(),
        name: student.name.clone(),
        name_en: student.name_en.clone(),
        name_ch: student.name_ch.clone().or_else(|| student.name.clone()),
        student_no: student.student_id.clone(),
        grade: student.grade.clone(),
        class: student.class.clone(),
        class_number: student.class_number,
        gender: student.gender,
        date_of_birth: student.date_of_birth.clone(),
        phone: student.phone.clone(),
        email: student.email.clone(),
        address: student.address.clone(),
    }
}

fn student_patch(student: &StudentDraft) -> StudentPatch {
    StudentPatch {
        name: student.name.clone(),
        name_en: student.name_en.clone(),
        name_ch: student.name_ch.clone(),
        student_no: student.student_id.clone(),
        grade: student.grade.clone(),
        class: student.class.clone(),
        class_number: student.class_number,
        gender: student.gender,
        date_of_birth: student.date_of_birth.clone(),
        phone: student.phone.clone(),
        email: student.email.clone(),
        address: student.address.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use std::sync::atomic::AtomicBool;

    use crate::model::SchoolType;
    use crate::store::{StoredSchool, StoredStudent};

    /// In-memory store that can be scripted to fail specific operations.
    #[derive(Default)]
    struct ScriptedStore {
        schools: Vec<StoredSchool>,
        students: Vec<StoredStudent>,
        fail_school_names: Vec<String>,
        fail_student_names: Vec<String>,
        fail_updates: bool,
        ops: Vec<String>,
        next_id: usize,
    }

    impl ScriptedStore {
        fn next_id(&mut self) -> String {
            self.next_id += 1;
            format!("id-{}", self.next_id)
        }
    }

    impl RecordStore for ScriptedStore {
        fn list_schools(&self) -> Result<Vec<StoredSchool>> {
            Ok(self.schools.clone())
        }

        fn create_school(&mut self, school: &NewSchool) -> Result<StoredSchool> {
            self.ops.push(format!("school:{}", school.name));
            if self.fail_school_names.contains(&school.name) {
                return Err(anyhow!("disk full"));
            }
            let stored = StoredSchool {
                id: self.next_id(),
                name: school.name.clone(),
                name_en: school.name_en.clone(),
                name_ch: school.name_ch.clone(),
                school_type: school.school_type.unwrap_or(SchoolType::Primary),
                district: school.district.clone(),
                address: school.address.clone(),
                contact_person: school.contact_person.clone(),
                email: school.email.clone(),
                phone: school.phone.clone(),
                description: school.description.clone(),
            };
            self.schools.push(stored.clone());
            Ok(stored)
        }

        fn update_school(&mut self, id: &str, _patch: &SchoolPatch) -> Result<()> {
            self.ops.push(format!("update_school:{}", id));
            if self.fail_updates {
                return Err(anyhow!("constraint violation"));
            }
            Ok(())
        }

        fn list_students(&self, _school_id: Option<&str>) -> Result<Vec<StoredStudent>> {
            Ok(self.students.clone())
        }

        fn create_student(&mut self, student: &NewStudent) -> Result<StoredStudent> {
            let name = student.name.clone().unwrap_or_default();
            self.ops.push(format!("student:{}", name));
            if self.fail_student_names.contains(&name) {
                return Err(anyhow!("constraint violation"));
            }
            let stored = StoredStudent {
                id: self.next_id(),
                school_id: student.school_id.clone(),
                name: student.name.clone(),
                name_en: student.name_en.clone(),
                name_ch: student.name_ch.clone(),
                student_no: student.student_no.clone(),
                grade: student.grade.clone(),
                class: student.class.clone(),
                class_number: student.class_number,
                gender: student.gender,
                date_of_birth: student.date_of_birth.clone(),
                phone: student.phone.clone(),
                email: student.email.clone(),
                address: student.address.clone(),
            };
            self.students.push(stored.clone());
            Ok(stored)
        }

        fn update_student(&mut self, id: &str, _patch: &StudentPatch) -> Result<()> {
            self.ops.push(format!("update_student:{}", id));
            if self.fail_updates {
                return Err(anyhow!("constraint violation"));
            }
            Ok(())
        }
    }

    fn student(name: &str) -> StudentDraft {
        StudentDraft {
            name: Some(name.to_string()),
            ..StudentDraft::default()
        }
    }

    fn school(name: &str, students: Vec<StudentDraft>) -> SchoolDraft {
        let mut s = SchoolDraft::new(name.to_string(), SchoolType::Primary);
        s.students = students;
        s
    }

    fn run(
        store: &mut ScriptedStore,
        doc: &StagingDocument,
    ) -> (ImportOutcome, Vec<ProgressEvent>) {
        let mut events = Vec::new();
        let outcome = import_batch(store, doc, None, &mut |e| events.push(e.clone())).unwrap();
        (outcome, events)
    }

    #[test]
    fn clean_batch_imports_everything_in_order() {
        let mut store = ScriptedStore::default();
        let doc = StagingDocument::new(
            vec![
                school("Oak Primary", vec![student("Amy"), student("Ben")]),
                school("Elm Primary", vec![student("Cho")]),
            ],
            "test",
        );

        let (outcome, events) = run(&mut store, &doc);

        assert_eq!(outcome.success_count, 5); // 2 schools + 3 students
        assert_eq!(outcome.failure_count, 0);
        assert!(!outcome.cancelled);
        // Each school is written before any of its students.
        assert_eq!(
            store.ops,
            vec![
                "school:Oak Primary",
                "student:Amy",
                "student:Ben",
                "school:Elm Primary",
                "student:Cho",
            ]
        );
        assert_eq!(events.first().unwrap().stage, ProgressStage::ProcessingSchool);
        assert_eq!(events.last().unwrap().stage, ProgressStage::Completed);
    }

    #[test]
    fn single_school_counts_itself_and_emits_one_event_per_record() {
        let mut store = ScriptedStore::default();
        let doc = StagingDocument::new(
            vec![school("Oak Primary", vec![student("Amy"), student("Ben")])],
            "test",
        );

        let (outcome, events) = run(&mut store, &doc);

        assert_eq!(outcome.success_count, 3); // the school and both students
        assert_eq!(outcome.failure_count, 0);
        let stages: Vec<ProgressStage> = events.iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![
                ProgressStage::ProcessingSchool,
                ProgressStage::ProcessingStudent,
                ProgressStage::ProcessingStudent,
                ProgressStage::Completed,
            ]
        );
    }

    #[test]
    fn failed_school_fails_its_students_and_batch_continues() {
        let mut store = ScriptedStore {
            fail_school_names: vec!["Oak Primary".to_string()],
            ..ScriptedStore::default()
        };
        let doc = StagingDocument::new(
            vec![
                school("Oak Primary", vec![student("Amy"), student("Ben")]),
                school("Elm Primary", vec![student("Cho")]),
            ],
            "test",
        );

        let (outcome, _) = run(&mut store, &doc);

        assert_eq!(outcome.failure_count, 3); // school + its two students
        assert_eq!(outcome.success_count, 2); // the other school and its student
        assert_eq!(outcome.errors.len(), 1);
        // No student write was attempted for the failed school.
        assert!(!store.ops.iter().any(|op| op == "student:Amy"));
        assert!(store.ops.iter().any(|op| op == "student:Cho"));
    }

    #[test]
    fn failed_student_does_not_stop_siblings() {
        let mut store = ScriptedStore {
            fail_student_names: vec!["Amy".to_string()],
            ..ScriptedStore::default()
        };
        let doc = StagingDocument::new(
            vec![school("Oak Primary", vec![student("Amy"), student("Ben")])],
            "test",
        );

        let (outcome, _) = run(&mut store, &doc);
        assert_eq!(outcome.failure_count, 1);
        assert_eq!(outcome.success_count, 2); // the school and Ben
        assert!(store.ops.iter().any(|op| op == "student:Ben"));
    }

    #[test]
    fn reuse_and_merge_paths() {
        let mut store = ScriptedStore::default();
        let mut reused = school("Oak Primary", vec![]);
        reused.use_existing = true;
        reused.existing_id = Some("existing-school".to_string());
        let mut merged = student("Amy");
        merged.resolution = Some(ResolutionAction::Merge);
        merged.merge_with_student_id = Some("existing-student".to_string());
        reused.students = vec![merged];

        let doc = StagingDocument::new(vec![reused], "test");
        let (outcome, _) = run(&mut store, &doc);

        assert_eq!(outcome.success_count, 2); // reused school + merged student
        assert_eq!(store.ops, vec!["update_student:existing-student"]);
        let school_result = &outcome.results[0];
        assert_eq!(school_result.action, Some(OutcomeAction::Reused));
        assert_eq!(school_result.id.as_deref(), Some("existing-school"));
        assert_eq!(outcome.results[1].action, Some(OutcomeAction::Merged));
    }

    #[test]
    fn failed_update_degrades_to_reuse() {
        let mut store = ScriptedStore {
            fail_updates: true,
            ..ScriptedStore::default()
        };

        let mut s = school("Oak Primary", vec![]);
        s.use_existing = true;
        s.existing_id = Some("existing-school".to_string());
        s.update_existing_data = true;

        let doc = StagingDocument::new(vec![s], "test");
        let (outcome, _) = run(&mut store, &doc);

        assert_eq!(outcome.failure_count, 0);
        assert_eq!(outcome.results[0].action, Some(OutcomeAction::Reused));
    }

    #[test]
    fn merge_without_target_aborts_before_any_write() {
        let mut store = ScriptedStore::default();
        let mut bad = student("Amy");
        bad.resolution = Some(ResolutionAction::Merge);
        let doc = StagingDocument::new(
            vec![
                school("Elm Primary", vec![student("Cho")]),
                school("Oak Primary", vec![bad]),
            ],
            "test",
        );

        let err = import_batch(&mut store, &doc, None, &mut |_| {}).unwrap_err();
        assert_eq!(
            err,
            ImportError::MergeWithoutTarget {
                school: "Oak Primary".to_string(),
                name: "Amy".to_string(),
            }
        );
        assert!(store.ops.is_empty());
    }

    #[test]
    fn skipped_records_are_reported_but_not_counted() {
        let mut store = ScriptedStore::default();
        let mut skipped = student("Amy");
        skipped.skip_import = true;
        let doc = StagingDocument::new(
            vec![school("Oak Primary", vec![skipped, student("Ben")])],
            "test",
        );

        let (outcome, _) = run(&mut store, &doc);
        assert_eq!(outcome.success_count, 2); // school + Ben; Amy only reported
        assert_eq!(outcome.failure_count, 0);
        assert!(outcome
            .results
            .iter()
            .any(|r| r.action == Some(OutcomeAction::Skipped) && r.name == "Amy"));
        assert!(!store.ops.iter().any(|op| op == "student:Amy"));
    }

    #[test]
    fn cancellation_stops_between_records() {
        let mut store = ScriptedStore::default();
        let doc = StagingDocument::new(
            vec![
                school("Oak Primary", vec![student("Amy")]),
                school("Elm Primary", vec![student("Cho")]),
            ],
            "test",
        );

        // Already-set flag: nothing at all gets written.
        let cancel = AtomicBool::new(true);
        let mut events = Vec::new();
        let outcome =
            import_batch(&mut store, &doc, Some(&cancel), &mut |e| events.push(e.clone()))
                .unwrap();
        assert!(outcome.cancelled);
        assert!(store.ops.is_empty());
        assert_eq!(events.last().unwrap().stage, ProgressStage::Cancelled);
    }
}
