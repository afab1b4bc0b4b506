//! Validation engine: declarative rule tables over staged schools and
//! students. Running it replaces every record's report wholesale, so repeated
//! runs after edits never accumulate stale findings.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    is_canonical_grade, is_primary_grade, is_secondary_grade, ProcessingStage, SchoolDraft,
    SchoolType, StagingDocument, StudentDraft, ValidationReport,
};
use crate::text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Blocks import until fixed.
    Error,
    /// Surfaced to the operator, never blocks.
    Warning,
}

struct SchoolRule {
    severity: Severity,
    check: fn(&SchoolDraft) -> Option<String>,
}

/// Grade/school-type consistency needs the school context, so student rules
/// see the whole school record too.
struct StudentRule {
    severity: Severity,
    check: fn(&StudentDraft, &SchoolDraft) -> Option<String>,
}

const SCHOOL_RULES: &[SchoolRule] = &[
    SchoolRule {
        severity: Severity::Error,
        check: |s| {
            if s.name.trim().is_empty() {
                Some("school name is required".to_string())
            } else {
                None
            }
        },
    },
    SchoolRule {
        severity: Severity::Error,
        check: |s| over_limit("school name", Some(&s.name), 100),
    },
    SchoolRule {
        severity: Severity::Error,
        check: |s| over_limit("english name", s.name_en.as_deref(), 100),
    },
    SchoolRule {
        severity: Severity::Error,
        check: |s| over_limit("chinese name", s.name_ch.as_deref(), 100),
    },
    SchoolRule {
        severity: Severity::Error,
        check: |s| {
            s.email
                .as_deref()
                .filter(|e| !text::is_valid_email(e))
                .map(|e| format!("invalid email address {:?}", e))
        },
    },
    SchoolRule {
        severity: Severity::Warning,
        check: |s| {
            s.phone
                .as_deref()
                .filter(|p| !text::is_valid_phone(p))
                .map(|p| format!("phone number {:?} does not look valid", p))
        },
    },
    SchoolRule {
        severity: Severity::Warning,
        check: |s| over_limit("district", s.district.as_deref(), 50),
    },
    SchoolRule {
        severity: Severity::Warning,
        check: |s| over_limit("address", s.address.as_deref(), 200),
    },
    SchoolRule {
        severity: Severity::Warning,
        check: |s| over_limit("contact person", s.contact_person.as_deref(), 50),
    },
    SchoolRule {
        severity: Severity::Warning,
        check: |s| over_limit("description", s.description.as_deref(), 500),
    },
];

const STUDENT_RULES: &[StudentRule] = &[
    StudentRule {
        severity: Severity::Error,
        check: |s, _| {
            if s.has_any_name() {
                None
            } else {
                Some("at least one name field is required".to_string())
            }
        },
    },
    StudentRule {
        severity: Severity::Error,
        check: |s, _| over_limit("name", s.name.as_deref(), 50),
    },
    StudentRule {
        severity: Severity::Error,
        check: |s, _| over_limit("english name", s.name_en.as_deref(), 50),
    },
    StudentRule {
        severity: Severity::Error,
        check: |s, _| over_limit("chinese name", s.name_ch.as_deref(), 50),
    },
    StudentRule {
        severity: Severity::Error,
        check: |s, _| over_limit("student id", s.student_id.as_deref(), 20),
    },
    StudentRule {
        severity: Severity::Error,
        check: |s, _| {
            s.grade
                .as_deref()
                .filter(|g| !is_canonical_grade(g))
                .map(|g| format!("invalid grade {:?}, expected P1-P6 or S1-S6", g))
        },
    },
    StudentRule {
        severity: Severity::Warning,
        check: |s, school| grade_type_mismatch(s, school),
    },
    StudentRule {
        severity: Severity::Error,
        check: |s, _| over_limit("class", s.class.as_deref(), 10),
    },
    StudentRule {
        severity: Severity::Error,
        check: |s, _| {
            s.class_number
                .filter(|n| !(1..=50).contains(n))
                .map(|n| format!("class number {} must be between 1 and 50", n))
        },
    },
    StudentRule {
        severity: Severity::Error,
        check: |s, _| {
            let raw = s.date_of_birth.as_deref()?;
            if parse_birth_date(raw).is_none() {
                Some(format!("unparseable date of birth {:?}", raw))
            } else {
                None
            }
        },
    },
    StudentRule {
        severity: Severity::Warning,
        check: |s, _| {
            let date = parse_birth_date(s.date_of_birth.as_deref()?)?;
            let year = date.year();
            let current = Utc::now().year();
            if year < current - 25 || year > current - 3 {
                Some(format!("birth year {} looks implausible for a student", year))
            } else {
                None
            }
        },
    },
    StudentRule {
        severity: Severity::Error,
        check: |s, _| {
            s.email
                .as_deref()
                .filter(|e| !text::is_valid_email(e))
                .map(|e| format!("invalid email address {:?}", e))
        },
    },
    StudentRule {
        severity: Severity::Warning,
        check: |s, _| {
            s.phone
                .as_deref()
                .filter(|p| !text::is_valid_phone(p))
                .map(|p| format!("phone number {:?} does not look valid", p))
        },
    },
    StudentRule {
        severity: Severity::Warning,
        check: |s, _| over_limit("address", s.address.as_deref(), 200),
    },
    StudentRule {
        severity: Severity::Warning,
        check: |s, _| over_limit("parent contact", s.parent_contact.as_deref(), 100),
    },
    StudentRule {
        severity: Severity::Warning,
        check: |s, _| over_limit("emergency contact", s.emergency_contact.as_deref(), 100),
    },
    StudentRule {
        severity: Severity::Warning,
        check: |s, _| over_limit("notes", s.notes.as_deref(), 500),
    },
];

fn over_limit(label: &str, value: Option<&str>, max: usize) -> Option<String> {
    let value = value?;
    if value.chars().count() > max {
        Some(format!("{} exceeds {} characters", label, max))
    } else {
        None
    }
}

fn grade_type_mismatch(student: &StudentDraft, school: &SchoolDraft) -> Option<String> {
    let grade = student.grade.as_deref().filter(|g| is_canonical_grade(g))?;
    match school.school_type {
        SchoolType::Primary if is_secondary_grade(grade) => Some(format!(
            "{} has secondary grade {} but {:?} is a primary school",
            student.display_name(),
            grade,
            school.name
        )),
        SchoolType::Secondary if is_primary_grade(grade) => Some(format!(
            "{} has primary grade {} but {:?} is a secondary school",
            student.display_name(),
            grade,
            school.name
        )),
        // Special schools span both bands.
        _ => None,
    }
}

/// Accepted date-of-birth formats, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"];

fn parse_birth_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub is_valid: bool,
    pub total_schools: usize,
    pub total_students: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

fn run_school_rules(school: &SchoolDraft) -> ValidationReport {
    let mut report = ValidationReport::default();
    for rule in SCHOOL_RULES {
        if let Some(message) = (rule.check)(school) {
            match rule.severity {
                Severity::Error => report.errors.push(message),
                Severity::Warning => report.warnings.push(message),
            }
        }
    }
    report
}

fn run_student_rules(student: &StudentDraft, school: &SchoolDraft) -> ValidationReport {
    let mut report = ValidationReport::default();
    for rule in STUDENT_RULES {
        if let Some(message) = (rule.check)(student, school) {
            match rule.severity {
                Severity::Error => report.errors.push(message),
                Severity::Warning => report.warnings.push(message),
            }
        }
    }
    report
}

/// Validate every record in the batch, replacing each record's report, and
/// return the aggregated summary. Skipped records still get annotated so the
/// operator can see why they were skipped.
pub fn validate_document(doc: &mut StagingDocument) -> ValidationSummary {
    let mut summary = ValidationSummary {
        total_schools: doc.schools.len(),
        ..ValidationSummary::default()
    };

    for school in &mut doc.schools {
        let school_report = run_school_rules(school);
        prefix_into(&mut summary, &school.name, None, &school_report);
        school.validation = school_report;

        let school_ctx = school.clone();
        for student in &mut school.students {
            summary.total_students += 1;
            let report = run_student_rules(student, &school_ctx);
            prefix_into(&mut summary, &school_ctx.name, Some(&*student), &report);
            student.validation = report;
        }
    }

    summary.error_count = summary.errors.len();
    summary.warning_count = summary.warnings.len();
    summary.is_valid = summary.errors.is_empty();

    // Duplicate checking stays a prerequisite; a batch validated straight
    // after parsing keeps its parsed stage.
    if doc.stage == ProcessingStage::DuplicatesChecked {
        doc.stage = ProcessingStage::Validated;
    }

    log::info!(
        "validated {} schools / {} students: {} errors, {} warnings",
        summary.total_schools,
        summary.total_students,
        summary.error_count,
        summary.warning_count
    );

    summary
}

fn prefix_into(
    summary: &mut ValidationSummary,
    school_name: &str,
    student: Option<&StudentDraft>,
    report: &ValidationReport,
) {
    let context = match student {
        Some(s) => format!("{} / {} (row {})", school_name, s.display_name(), s.source_row),
        None => school_name.to_string(),
    };
    summary
        .errors
        .extend(report.errors.iter().map(|m| format!("{}: {}", context, m)));
    summary
        .warnings
        .extend(report.warnings.iter().map(|m| format!("{}: {}", context, m)));
}

/// Final pre-import gate: blocking errors plus unresolved duplicate
/// decisions. A batch passing this is safe to hand to the orchestrator.
pub fn validate_for_import(doc: &StagingDocument) -> Vec<String> {
    let mut errors = Vec::new();

    for school in &doc.schools {
        if school.skip_import {
            continue;
        }
        if school.has_duplicates && school.requires_user_decision {
            errors.push(format!(
                "school {:?} has an unresolved duplicate decision",
                school.name
            ));
        }
        errors.extend(
            school
                .validation
                .errors
                .iter()
                .map(|m| format!("{}: {}", school.name, m)),
        );

        for student in &school.students {
            if student.skip_import {
                continue;
            }
            if student.has_duplicates && student.resolution.is_none() {
                errors.push(format!(
                    "student {:?} in {:?} has an unresolved duplicate decision",
                    student.display_name(),
                    school.name
                ));
            }
            errors.extend(student.validation.errors.iter().map(|m| {
                format!("{} / {}: {}", school.name, student.display_name(), m)
            }));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Gender, SchoolType};

    fn school_with(students: Vec<StudentDraft>) -> StagingDocument {
        let mut school = SchoolDraft::new("Oak Primary".to_string(), SchoolType::Primary);
        school.students = students;
        StagingDocument::new(vec![school], "test")
    }

    fn named(name: &str) -> StudentDraft {
        StudentDraft {
            name: Some(name.to_string()),
            ..StudentDraft::default()
        }
    }

    #[test]
    fn nameless_student_is_a_blocking_error() {
        let mut doc = school_with(vec![StudentDraft::default()]);
        let summary = validate_document(&mut doc);
        assert!(!summary.is_valid);
        assert_eq!(summary.error_count, 1);
        assert!(doc.schools[0].students[0].validation.has_blocking_errors());
    }

    #[test]
    fn non_canonical_grade_is_an_error() {
        let mut student = named("Amy");
        student.grade = Some("P7".to_string());
        let mut doc = school_with(vec![student]);
        let summary = validate_document(&mut doc);
        assert_eq!(summary.error_count, 1);
        assert!(summary.errors[0].contains("invalid grade"));
    }

    #[test]
    fn grade_band_mismatch_is_a_warning_not_an_error() {
        let mut student = named("Ben");
        student.grade = Some("S2".to_string());
        let mut doc = school_with(vec![student]);
        let summary = validate_document(&mut doc);
        assert!(summary.is_valid);
        assert_eq!(summary.warning_count, 1);
        assert!(summary.warnings[0].contains("secondary grade S2"));
    }

    #[test]
    fn special_school_accepts_both_bands() {
        let mut a = named("a");
        a.grade = Some("P1".to_string());
        let mut b = named("b");
        b.grade = Some("S6".to_string());
        let mut school = SchoolDraft::new("Mixed".to_string(), SchoolType::Special);
        school.students = vec![a, b];
        let mut doc = StagingDocument::new(vec![school], "test");
        let summary = validate_document(&mut doc);
        assert!(summary.is_valid);
        assert_eq!(summary.warning_count, 0);
    }

    #[test]
    fn contact_formats() {
        let mut student = named("Amy");
        student.email = Some("not-an-email".to_string());
        student.phone = Some("123".to_string());
        let mut doc = school_with(vec![student]);
        let summary = validate_document(&mut doc);
        // Bad email blocks, bad phone only warns.
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.warning_count, 1);
    }

    #[test]
    fn birth_date_parsing_and_plausibility() {
        let mut ok = named("a");
        ok.date_of_birth = Some("2015-09-01".to_string());
        let mut garbled = named("b");
        garbled.date_of_birth = Some("next tuesday".to_string());
        let mut implausible = named("c");
        implausible.date_of_birth = Some("1950-01-01".to_string());

        let mut doc = school_with(vec![ok, garbled, implausible]);
        let summary = validate_document(&mut doc);
        assert_eq!(summary.error_count, 1);
        assert!(summary.errors[0].contains("unparseable date of birth"));
        assert_eq!(summary.warning_count, 1);
        assert!(summary.warnings[0].contains("implausible"));
    }

    #[test]
    fn length_limits() {
        let mut student = named(&"x".repeat(51));
        student.class = Some("very-long-class".to_string());
        student.class_number = Some(51);
        let mut doc = school_with(vec![student]);
        let summary = validate_document(&mut doc);
        assert_eq!(summary.error_count, 3);
    }

    #[test]
    fn revalidation_replaces_reports() {
        let mut doc = school_with(vec![StudentDraft::default()]);
        validate_document(&mut doc);
        doc.schools[0].students[0].name = Some("Fixed".to_string());
        let second = validate_document(&mut doc);
        assert!(second.is_valid);
        assert!(doc.schools[0].students[0].validation.errors.is_empty());
    }

    #[test]
    fn import_gate_reports_unresolved_duplicates() {
        let mut student = named("Amy");
        student.has_duplicates = true;
        let mut doc = school_with(vec![student]);
        validate_document(&mut doc);
        let errors = validate_for_import(&doc);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unresolved duplicate"));

        doc.schools[0].students[0].resolution = Some(crate::model::ResolutionAction::CreateNew);
        assert!(validate_for_import(&doc).is_empty());
    }

    #[test]
    fn import_gate_skips_skipped_records() {
        let mut student = named("Amy");
        student.has_duplicates = true;
        student.skip_import = true;
        let mut doc = school_with(vec![student]);
        validate_document(&mut doc);
        assert!(validate_for_import(&doc).is_empty());
    }

    #[test]
    fn gender_field_is_typed_and_needs_no_rule() {
        let mut student = named("Amy");
        student.gender = Some(Gender::Other);
        let mut doc = school_with(vec![student]);
        assert!(validate_document(&mut doc).is_valid);
    }
}
