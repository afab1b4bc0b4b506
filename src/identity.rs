//! Identity resolution: ranks staged records against the record store,
//! annotates candidates, and applies resolution decisions.

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::model::{
    school_decision_key, student_decision_key, DuplicateCandidate, MatchType, ProcessingStage,
    ResolutionAction, ResolutionDecision, SchoolDraft, StagingDocument, StudentDraft,
};
use crate::store::{RecordStore, StoredSchool, StoredStudent};
use crate::text;

/// School names above this similarity rank as `similar`.
pub const SCHOOL_SIMILAR_MIN: f64 = 0.8;
/// Floor for containment matches ranking as `partial`.
pub const SCHOOL_PARTIAL_MIN: f64 = 0.6;
/// Student names above this similarity, within the same class, rank as `similar`.
pub const STUDENT_SIMILAR_MIN: f64 = 0.85;
/// Candidates whose best confidence stays below this can be resolved without
/// an operator.
pub const AUTO_RESOLVE_MAX: f64 = 0.7;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateSummary {
    pub school_duplicates: usize,
    pub student_duplicates: usize,
    pub total_duplicates: usize,
    pub requires_user_action: bool,
    pub schools_requiring_confirmation: usize,
}

/// Annotate every staged record with its duplicate candidates. Moves the
/// batch to the duplicates-checked stage.
pub fn check_duplicates(
    doc: &mut StagingDocument,
    store: &dyn RecordStore,
) -> Result<DuplicateSummary> {
    let existing_schools = store.list_schools()?;
    let mut summary = DuplicateSummary::default();

    for school in &mut doc.schools {
        let candidates = find_school_candidates(school, &existing_schools);
        school.has_duplicates = !candidates.is_empty();
        school.requires_user_decision = school.has_duplicates;
        if school.has_duplicates {
            summary.school_duplicates += 1;
            log::debug!(
                "school {:?}: {} duplicate candidates",
                school.name,
                candidates.len()
            );
        }

        // Students can only collide with students of a school that already
        // exists; check against the best-ranked candidate.
        let existing_students = match candidates.first() {
            Some(best) => store.list_students(Some(&best.existing_id))?,
            None => Vec::new(),
        };
        school.duplicates = candidates;

        for student in &mut school.students {
            let candidates = find_student_candidates(student, &existing_students);
            // Sibling hints from parsing count as duplicate signal even when
            // the store holds no candidate yet.
            student.has_duplicates = !candidates.is_empty() || !student.sibling_hints.is_empty();
            student.requires_user_decision = student.has_duplicates;
            if student.has_duplicates {
                summary.student_duplicates += 1;
            }
            student.duplicates = candidates;
        }
    }

    summary.total_duplicates = summary.school_duplicates + summary.student_duplicates;
    summary.requires_user_action = summary.total_duplicates > 0;
    summary.schools_requiring_confirmation =
        doc.schools.iter().filter(|s| needs_confirmation(s)).count();
    doc.stage = ProcessingStage::DuplicatesChecked;

    log::info!(
        "duplicate check: {} schools, {} students flagged",
        summary.school_duplicates,
        summary.student_duplicates
    );
    Ok(summary)
}

/// Rank existing schools against a staged one. Candidates are sorted by
/// confidence and deduplicated by id, keeping the strongest match.
pub fn find_school_candidates(
    school: &SchoolDraft,
    existing: &[StoredSchool],
) -> Vec<DuplicateCandidate> {
    let staged_name = text::normalize(&school.name);
    let mut candidates: Vec<DuplicateCandidate> = Vec::new();

    for stored in existing {
        if stored.school_type != school.school_type {
            continue;
        }
        let stored_name = text::normalize(&stored.name);

        let (match_type, confidence, reason) = if stored_name == staged_name {
            (
                MatchType::Exact,
                1.0,
                "name and school type match exactly".to_string(),
            )
        } else {
            let similarity = text::similarity(&staged_name, &stored_name);
            let contained =
                staged_name.contains(&stored_name) || stored_name.contains(&staged_name);
            if similarity > SCHOOL_SIMILAR_MIN {
                (
                    MatchType::Similar,
                    similarity,
                    format!("school name {}% similar", (similarity * 100.0).round()),
                )
            } else if contained && similarity > SCHOOL_PARTIAL_MIN {
                (
                    MatchType::Partial,
                    similarity,
                    "school name partially matches".to_string(),
                )
            } else {
                continue;
            }
        };

        candidates.push(DuplicateCandidate {
            existing_id: stored.id.clone(),
            name: stored.name.clone(),
            school_type: Some(stored.school_type),
            grade: None,
            class: None,
            class_number: None,
            match_type,
            confidence,
            reason,
        });
    }

    rank(candidates)
}

/// Rank existing students of one school against a staged student.
pub fn find_student_candidates(
    student: &StudentDraft,
    existing: &[StoredStudent],
) -> Vec<DuplicateCandidate> {
    if !student.has_any_name() {
        return Vec::new();
    }
    let staged_name = text::normalize(student.display_name());
    let mut candidates: Vec<DuplicateCandidate> = Vec::new();

    for stored in existing {
        let stored_name = text::normalize(stored.display_name());
        let same_class = stored.grade == student.grade && stored.class == student.class;

        let (match_type, confidence, reason) = if stored_name == staged_name {
            if same_class && stored.class_number == student.class_number {
                (
                    MatchType::Exact,
                    1.0,
                    "name, grade, class and class number all match".to_string(),
                )
            } else {
                (
                    MatchType::NameOnly,
                    0.8,
                    "same name, different grade or class".to_string(),
                )
            }
        } else {
            let similarity = text::similarity(&staged_name, &stored_name);
            if similarity > STUDENT_SIMILAR_MIN && same_class {
                (
                    MatchType::Similar,
                    similarity,
                    format!("classmate name {}% similar", (similarity * 100.0).round()),
                )
            } else {
                continue;
            }
        };

        candidates.push(DuplicateCandidate {
            existing_id: stored.id.clone(),
            name: stored.display_name().to_string(),
            school_type: None,
            grade: stored.grade.clone(),
            class: stored.class.clone(),
            class_number: stored.class_number,
            match_type,
            confidence,
            reason,
        });
    }

    rank(candidates)
}

fn rank(mut candidates: Vec<DuplicateCandidate>) -> Vec<DuplicateCandidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut seen = Vec::new();
    candidates.retain(|c| {
        if seen.contains(&c.existing_id) {
            false
        } else {
            seen.push(c.existing_id.clone());
            true
        }
    });
    candidates
}

/// A school must be explicitly confirmed when it, or any of its students,
/// carries duplicates or validation warnings.
pub fn needs_confirmation(school: &SchoolDraft) -> bool {
    school.has_duplicates
        || school.validation.has_warnings()
        || school
            .students
            .iter()
            .any(|s| s.has_duplicates || s.validation.has_warnings())
}

/// Apply decisions keyed by composite record keys. Unknown keys are ignored;
/// returns how many records were resolved.
pub fn apply_decisions(
    doc: &mut StagingDocument,
    decisions: &HashMap<String, ResolutionDecision>,
) -> usize {
    let mut applied = 0;

    for school in &mut doc.schools {
        let key = school_decision_key(&school.name, school.school_type);
        if let Some(decision) = decisions.get(&key) {
            if school.has_duplicates {
                school.resolution = Some(decision.action);
                school.use_existing = decision.action == ResolutionAction::UseExisting;
                school.existing_id = if school.use_existing {
                    decision.existing_id.clone()
                } else {
                    None
                };
                school.update_existing_data = decision.update_existing_data;
                school.skip_import = decision.action == ResolutionAction::Skip;
                school.requires_user_decision = false;
                applied += 1;
            }
        }

        let school_name = school.name.clone();
        for student in &mut school.students {
            let key = student_decision_key(&school_name, student);
            if let Some(decision) = decisions.get(&key) {
                if student.has_duplicates {
                    student.resolution = Some(decision.action);
                    student.merge_with_student_id = match decision.action {
                        ResolutionAction::Merge | ResolutionAction::UseExisting => {
                            decision.existing_id.clone()
                        }
                        _ => None,
                    };
                    student.update_existing_data = decision.update_existing_data;
                    student.skip_import = decision.action == ResolutionAction::Skip;
                    student.requires_user_decision = false;
                    applied += 1;
                }
            }
        }
    }

    log::info!("applied {} duplicate decisions", applied);
    applied
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionStatus {
    pub is_valid: bool,
    pub unresolved_schools: Vec<String>,
    pub unresolved_students: Vec<String>,
    pub total_unresolved: usize,
}

/// Report every flagged record still awaiting a decision, by composite key.
pub fn validate_resolutions(doc: &StagingDocument) -> ResolutionStatus {
    let mut status = ResolutionStatus::default();

    for school in &doc.schools {
        if school.has_duplicates && school.requires_user_decision {
            status
                .unresolved_schools
                .push(school_decision_key(&school.name, school.school_type));
        }
        for student in &school.students {
            if student.has_duplicates && student.requires_user_decision {
                status
                    .unresolved_students
                    .push(student_decision_key(&school.name, student));
            }
        }
    }

    status.total_unresolved = status.unresolved_schools.len() + status.unresolved_students.len();
    status.is_valid = status.total_unresolved == 0;
    status
}

/// Resolve low-confidence flags without an operator: when every candidate for
/// a record sits below [`AUTO_RESOLVE_MAX`], the record defaults to creating a
/// new entry. Returns how many records were auto-resolved.
pub fn auto_resolve(doc: &mut StagingDocument) -> usize {
    let mut resolved = 0;

    let low_confidence = |candidates: &[DuplicateCandidate]| {
        candidates.iter().all(|c| c.confidence < AUTO_RESOLVE_MAX)
    };

    for school in &mut doc.schools {
        if school.has_duplicates
            && school.requires_user_decision
            && low_confidence(&school.duplicates)
        {
            school.resolution = Some(ResolutionAction::CreateNew);
            school.requires_user_decision = false;
            resolved += 1;
        }
        for student in &mut school.students {
            // Sibling collisions carry no confidence score and stay manual.
            if student.has_duplicates
                && student.requires_user_decision
                && student.sibling_hints.is_empty()
                && low_confidence(&student.duplicates)
            {
                student.resolution = Some(ResolutionAction::CreateNew);
                student.requires_user_decision = false;
                resolved += 1;
            }
        }
    }

    log::info!("auto-resolved {} low-confidence records", resolved);
    resolved
}
