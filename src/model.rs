use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The 12 canonical grade codes of the HK school system.
pub const CANONICAL_GRADES: [&str; 12] = [
    "P1", "P2", "P3", "P4", "P5", "P6", "S1", "S2", "S3", "S4", "S5", "S6",
];

pub fn is_canonical_grade(grade: &str) -> bool {
    CANONICAL_GRADES.contains(&grade)
}

pub fn is_primary_grade(grade: &str) -> bool {
    matches!(grade, "P1" | "P2" | "P3" | "P4" | "P5" | "P6")
}

pub fn is_secondary_grade(grade: &str) -> bool {
    matches!(grade, "S1" | "S2" | "S3" | "S4" | "S5" | "S6")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchoolType {
    Primary,
    Secondary,
    Special,
}

impl SchoolType {
    pub fn as_str(self) -> &'static str {
        match self {
            SchoolType::Primary => "primary",
            SchoolType::Secondary => "secondary",
            SchoolType::Special => "special",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(SchoolType::Primary),
            "secondary" => Some(SchoolType::Secondary),
            "special" => Some(SchoolType::Special),
            // Legacy value from pre-migration data; folded into special.
            "both" => Some(SchoolType::Special),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "other" => Some(Gender::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Similar,
    Partial,
    NameOnly,
}

/// A ranked candidate match against an already-stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCandidate {
    pub existing_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub school_type: Option<SchoolType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_number: Option<i64>,
    pub match_type: MatchType,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    CreateNew,
    UseExisting,
    Merge,
    Skip,
}

/// Operator- or policy-supplied answer to a duplicate candidate set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionDecision {
    pub action: ResolutionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<String>,
    #[serde(default)]
    pub update_existing_data: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn has_blocking_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiblingHintKind {
    SameName,
    SeatCollision,
}

/// Intra-batch duplicate hint recorded by the normalizer; identity resolution
/// turns these into a pending decision alongside store candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiblingHint {
    pub other_index: usize,
    pub kind: SiblingHintKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_ch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// 1-based row in the source sheet this student came from.
    #[serde(default)]
    pub source_row: usize,

    #[serde(default)]
    pub validation: ValidationReport,
    #[serde(default)]
    pub duplicates: Vec<DuplicateCandidate>,
    #[serde(default)]
    pub has_duplicates: bool,
    #[serde(default)]
    pub requires_user_decision: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_with_student_id: Option<String>,
    #[serde(default)]
    pub update_existing_data: bool,
    #[serde(default)]
    pub skip_import: bool,
    #[serde(default)]
    pub sibling_hints: Vec<SiblingHint>,
}

impl StudentDraft {
    /// Best display name across the three name fields.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.name_ch.as_deref())
            .or(self.name_en.as_deref())
            .unwrap_or("(unnamed)")
    }

    pub fn has_any_name(&self) -> bool {
        self.name.is_some() || self.name_en.is_some() || self.name_ch.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolMetadata {
    pub student_count: usize,
    pub has_grades: bool,
    pub has_classes: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolDraft {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_ch: Option<String>,
    pub school_type: SchoolType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_person: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub students: Vec<StudentDraft>,
    #[serde(default)]
    pub metadata: SchoolMetadata,

    #[serde(default)]
    pub validation: ValidationReport,
    #[serde(default)]
    pub duplicates: Vec<DuplicateCandidate>,
    #[serde(default)]
    pub has_duplicates: bool,
    #[serde(default)]
    pub requires_user_decision: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionAction>,
    #[serde(default)]
    pub use_existing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<String>,
    #[serde(default)]
    pub update_existing_data: bool,
    #[serde(default)]
    pub skip_import: bool,
    #[serde(default)]
    pub is_confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl SchoolDraft {
    pub fn new(name: String, school_type: SchoolType) -> Self {
        SchoolDraft {
            name,
            name_en: None,
            name_ch: None,
            school_type,
            district: None,
            address: None,
            contact_person: None,
            email: None,
            phone: None,
            description: None,
            students: Vec::new(),
            metadata: SchoolMetadata::default(),
            validation: ValidationReport::default(),
            duplicates: Vec::new(),
            has_duplicates: false,
            requires_user_decision: false,
            resolution: None,
            use_existing: false,
            existing_id: None,
            update_existing_data: false,
            skip_import: false,
            is_confirmed: false,
            confirmed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Parsed,
    DuplicatesChecked,
    Validated,
    Importing,
    Imported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadata {
    pub total_schools: usize,
    pub total_students: usize,
    pub created_at: DateTime<Utc>,
    pub source: String,
}

/// The versioned in-memory aggregate holding one import batch's full state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingDocument {
    pub schools: Vec<SchoolDraft>,
    pub metadata: BatchMetadata,
    pub stage: ProcessingStage,
}

impl StagingDocument {
    pub fn new(schools: Vec<SchoolDraft>, source: &str) -> Self {
        let total_students = schools.iter().map(|s| s.students.len()).sum();
        StagingDocument {
            metadata: BatchMetadata {
                total_schools: schools.len(),
                total_students,
                created_at: Utc::now(),
                source: source.to_string(),
            },
            schools,
            stage: ProcessingStage::Parsed,
        }
    }
}

/// Composite key identifying a school in a decision map.
pub fn school_decision_key(name: &str, school_type: SchoolType) -> String {
    format!("school:{}|{}", name, school_type.as_str())
}

/// Composite key identifying a student in a decision map, scoped by school.
pub fn student_decision_key(school: &str, student: &StudentDraft) -> String {
    format!(
        "student:{}|{}|{}|{}",
        school,
        student.display_name(),
        student.grade.as_deref().unwrap_or(""),
        student.class.as_deref().unwrap_or("")
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    School,
    Student,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeAction {
    Created,
    Reused,
    Updated,
    Merged,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    pub entity: EntityKind,
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<OutcomeAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<RecordOutcome>,
    pub errors: Vec<String>,
    #[serde(default)]
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    ProcessingSchool,
    ProcessingStudent,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub current: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_school: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_student: Option<String>,
    pub message: String,
}
