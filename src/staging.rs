//! Staging store: holds the current batch with bounded snapshot history.
//! Every mutation clones the document, applies the change, and pushes the
//! result, so undo and redo are pointer moves over full snapshots.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::model::{
    Gender, ProcessingStage, SchoolType, StagingDocument, StudentDraft, ValidationReport,
};
use crate::tabular;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StagingError {
    #[error("no batch is staged")]
    NoBatch,
    #[error("school index {0} out of range")]
    SchoolIndex(usize),
    #[error("student index {1} out of range for school {0}")]
    StudentIndex(usize, usize),
}

/// Editable school fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolEdit {
    pub name: Option<String>,
    pub name_en: Option<String>,
    pub name_ch: Option<String>,
    pub school_type: Option<SchoolType>,
    pub district: Option<String>,
    pub address: Option<String>,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub description: Option<String>,
    pub skip_import: Option<bool>,
}

/// Editable student fields. Grades are re-normalized on the way in so manual
/// fixes go through the same synonym mapping as parsed cells.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentEdit {
    pub name: Option<String>,
    pub name_en: Option<String>,
    pub name_ch: Option<String>,
    pub student_id: Option<String>,
    pub grade: Option<String>,
    pub class: Option<String>,
    pub class_number: Option<i64>,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub parent_contact: Option<String>,
    pub emergency_contact: Option<String>,
    pub notes: Option<String>,
    pub skip_import: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BatchEdit {
    School {
        school_index: usize,
        #[serde(flatten)]
        edit: SchoolEdit,
    },
    Student {
        school_index: usize,
        student_index: usize,
        #[serde(flatten)]
        edit: StudentEdit,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStatus {
    pub can_undo: bool,
    pub can_redo: bool,
    pub depth: usize,
    pub pointer: usize,
}

pub struct StagingStore {
    history: Vec<StagingDocument>,
    pointer: usize,
    max_history: usize,
}

impl Default for StagingStore {
    fn default() -> Self {
        StagingStore::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl StagingStore {
    pub fn new(max_history: usize) -> Self {
        StagingStore {
            history: Vec::new(),
            pointer: 0,
            max_history: max_history.max(1),
        }
    }

    /// Stage a fresh batch, discarding any previous one and its history.
    pub fn load(&mut self, doc: StagingDocument) {
        self.history = vec![doc];
        self.pointer = 0;
        log::info!("staged new batch ({} schools)", self.current().map(|d| d.schools.len()).unwrap_or(0));
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.pointer = 0;
    }

    pub fn current(&self) -> Option<&StagingDocument> {
        self.history.get(self.pointer)
    }

    pub fn is_loaded(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn history_status(&self) -> HistoryStatus {
        HistoryStatus {
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
            depth: self.history.len(),
            pointer: self.pointer,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.pointer > 0
    }

    pub fn can_redo(&self) -> bool {
        !self.history.is_empty() && self.pointer < self.history.len() - 1
    }

    pub fn undo(&mut self) -> bool {
        if self.can_undo() {
            self.pointer -= 1;
            true
        } else {
            false
        }
    }

    pub fn redo(&mut self) -> bool {
        if self.can_redo() {
            self.pointer += 1;
            true
        } else {
            false
        }
    }

    /// Snapshot-mutate-push. Redo states beyond the pointer are discarded;
    /// the oldest snapshot falls off once the cap is reached.
    pub fn mutate<F>(&mut self, f: F) -> Result<(), StagingError>
    where
        F: FnOnce(&mut StagingDocument),
    {
        let mut next = self.current().ok_or(StagingError::NoBatch)?.clone();
        f(&mut next);

        self.history.truncate(self.pointer + 1);
        self.history.push(next);
        self.pointer += 1;
        if self.history.len() > self.max_history {
            self.history.remove(0);
            self.pointer -= 1;
        }
        Ok(())
    }

    /// Like [`mutate`] but the closure can refuse, leaving history untouched.
    pub fn try_mutate<F>(&mut self, f: F) -> Result<(), StagingError>
    where
        F: FnOnce(&mut StagingDocument) -> Result<(), StagingError>,
    {
        let mut next = self.current().ok_or(StagingError::NoBatch)?.clone();
        f(&mut next)?;

        self.history.truncate(self.pointer + 1);
        self.history.push(next);
        self.pointer += 1;
        if self.history.len() > self.max_history {
            self.history.remove(0);
            self.pointer -= 1;
        }
        Ok(())
    }

    pub fn update_school(&mut self, index: usize, edit: &SchoolEdit) -> Result<(), StagingError> {
        self.try_mutate(|doc| {
            let school = doc
                .schools
                .get_mut(index)
                .ok_or(StagingError::SchoolIndex(index))?;
            apply_school_edit(school, edit);
            Ok(())
        })
    }

    pub fn update_student(
        &mut self,
        school_index: usize,
        student_index: usize,
        edit: &StudentEdit,
    ) -> Result<(), StagingError> {
        self.try_mutate(|doc| {
            let school = doc
                .schools
                .get_mut(school_index)
                .ok_or(StagingError::SchoolIndex(school_index))?;
            let student = school
                .students
                .get_mut(student_index)
                .ok_or(StagingError::StudentIndex(school_index, student_index))?;
            apply_student_edit(student, edit);
            Ok(())
        })
    }

    /// Append a hand-entered student. The new record starts unvalidated.
    pub fn add_student(
        &mut self,
        school_index: usize,
        edit: &StudentEdit,
    ) -> Result<(), StagingError> {
        self.try_mutate(|doc| {
            let school = doc
                .schools
                .get_mut(school_index)
                .ok_or(StagingError::SchoolIndex(school_index))?;
            let mut student = StudentDraft::default();
            apply_student_edit(&mut student, edit);
            student.validation = ValidationReport::default();
            school.students.push(student);
            school.metadata.student_count = school.students.len();
            doc.metadata.total_students = doc.schools.iter().map(|s| s.students.len()).sum();
            Ok(())
        })
    }

    pub fn remove_student(
        &mut self,
        school_index: usize,
        student_index: usize,
    ) -> Result<(), StagingError> {
        self.try_mutate(|doc| {
            let school = doc
                .schools
                .get_mut(school_index)
                .ok_or(StagingError::SchoolIndex(school_index))?;
            if student_index >= school.students.len() {
                return Err(StagingError::StudentIndex(school_index, student_index));
            }
            school.students.remove(student_index);
            school.metadata.student_count = school.students.len();
            doc.metadata.total_students = doc.schools.iter().map(|s| s.students.len()).sum();
            Ok(())
        })
    }

    pub fn confirm_school(
        &mut self,
        school_index: usize,
        confirmed: bool,
    ) -> Result<(), StagingError> {
        self.try_mutate(|doc| {
            let school = doc
                .schools
                .get_mut(school_index)
                .ok_or(StagingError::SchoolIndex(school_index))?;
            school.is_confirmed = confirmed;
            school.confirmed_at = confirmed.then(Utc::now);
            Ok(())
        })
    }

    /// Apply several edits as one undoable step.
    pub fn batch_update(&mut self, edits: &[BatchEdit]) -> Result<(), StagingError> {
        self.try_mutate(|doc| {
            for item in edits {
                match item {
                    BatchEdit::School { school_index, edit } => {
                        let school = doc
                            .schools
                            .get_mut(*school_index)
                            .ok_or(StagingError::SchoolIndex(*school_index))?;
                        apply_school_edit(school, edit);
                    }
                    BatchEdit::Student {
                        school_index,
                        student_index,
                        edit,
                    } => {
                        let school = doc
                            .schools
                            .get_mut(*school_index)
                            .ok_or(StagingError::SchoolIndex(*school_index))?;
                        let student = school.students.get_mut(*student_index).ok_or(
                            StagingError::StudentIndex(*school_index, *student_index),
                        )?;
                        apply_student_edit(student, edit);
                    }
                }
            }
            Ok(())
        })
    }

    pub fn set_stage(&mut self, stage: ProcessingStage) -> Result<(), StagingError> {
        self.mutate(|doc| doc.stage = stage)
    }
}

fn apply_school_edit(school: &mut crate::model::SchoolDraft, edit: &SchoolEdit) {
    if let Some(v) = &edit.name {
        school.name = v.clone();
    }
    merge(&mut school.name_en, &edit.name_en);
    merge(&mut school.name_ch, &edit.name_ch);
    if let Some(v) = edit.school_type {
        school.school_type = v;
    }
    merge(&mut school.district, &edit.district);
    merge(&mut school.address, &edit.address);
    merge(&mut school.contact_person, &edit.contact_person);
    merge(&mut school.email, &edit.email);
    merge(&mut school.phone, &edit.phone);
    merge(&mut school.description, &edit.description);
    if let Some(v) = edit.skip_import {
        school.skip_import = v;
    }
}

fn apply_student_edit(student: &mut StudentDraft, edit: &StudentEdit) {
    merge(&mut student.name, &edit.name);
    merge(&mut student.name_en, &edit.name_en);
    merge(&mut student.name_ch, &edit.name_ch);
    merge(&mut student.student_id, &edit.student_id);
    if let Some(raw) = &edit.grade {
        student.grade = tabular::normalize_grade(raw);
    }
    merge(&mut student.class, &edit.class);
    if let Some(v) = edit.class_number {
        student.class_number = Some(v);
    }
    if let Some(v) = edit.gender {
        student.gender = Some(v);
    }
    merge(&mut student.date_of_birth, &edit.date_of_birth);
    merge(&mut student.phone, &edit.phone);
    merge(&mut student.email, &edit.email);
    merge(&mut student.address, &edit.address);
    merge(&mut student.parent_contact, &edit.parent_contact);
    merge(&mut student.emergency_contact, &edit.emergency_contact);
    merge(&mut student.notes, &edit.notes);
    if let Some(v) = edit.skip_import {
        student.skip_import = v;
    }
}

/// An edit carrying an empty string clears the field.
fn merge(target: &mut Option<String>, edit: &Option<String>) {
    if let Some(v) = edit {
        *target = if v.trim().is_empty() {
            None
        } else {
            Some(v.clone())
        };
    }
}

/// Names of schools still awaiting confirmation before import may run.
pub fn unconfirmed_schools(doc: &StagingDocument) -> Vec<String> {
    doc.schools
        .iter()
        .filter(|s| !s.skip_import && crate::identity::needs_confirmation(s) && !s.is_confirmed)
        .map(|s| s.name.clone())
        .collect()
}

/// Operator-facing progress view of the staged batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub stage: ProcessingStage,
    pub total_schools: usize,
    pub total_students: usize,
    pub confirmed_schools: usize,
    pub blocking_errors: usize,
    pub warnings: usize,
    pub unresolved_duplicates: usize,
    pub unconfirmed_schools: usize,
    pub can_proceed_to_import: bool,
    pub progress_percent: u8,
}

pub fn batch_summary(doc: &StagingDocument) -> BatchSummary {
    let blocking_errors: usize = doc
        .schools
        .iter()
        .map(|s| {
            s.validation.errors.len()
                + s.students
                    .iter()
                    .map(|t| t.validation.errors.len())
                    .sum::<usize>()
        })
        .sum();
    let warnings: usize = doc
        .schools
        .iter()
        .map(|s| {
            s.validation.warnings.len()
                + s.students
                    .iter()
                    .map(|t| t.validation.warnings.len())
                    .sum::<usize>()
        })
        .sum();

    let unresolved = crate::identity::validate_resolutions(doc).total_unresolved;
    let unconfirmed = unconfirmed_schools(doc).len();
    let gate_errors = crate::validate::validate_for_import(doc);

    let progress_percent = match doc.stage {
        ProcessingStage::Parsed => 25,
        ProcessingStage::DuplicatesChecked => 50,
        ProcessingStage::Validated => 75,
        ProcessingStage::Importing => 90,
        ProcessingStage::Imported => 100,
    };

    BatchSummary {
        stage: doc.stage,
        total_schools: doc.schools.len(),
        total_students: doc.schools.iter().map(|s| s.students.len()).sum(),
        confirmed_schools: doc.schools.iter().filter(|s| s.is_confirmed).count(),
        blocking_errors,
        warnings,
        unresolved_duplicates: unresolved,
        unconfirmed_schools: unconfirmed,
        can_proceed_to_import: doc.stage != ProcessingStage::Parsed
            && gate_errors.is_empty()
            && unconfirmed == 0,
        progress_percent,
    }
}
