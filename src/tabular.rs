//! Tabular normalizer: turns a raw sheet (delimited text, workbook, or rows
//! handed over by the extraction service) into an unvalidated staging
//! document, grouping students under schools with carry-forward context.

use std::collections::HashMap;
use std::path::Path;

use crate::model::{
    is_primary_grade, is_secondary_grade, SchoolDraft, SchoolMetadata, SchoolType, SiblingHint,
    SiblingHintKind, StagingDocument, StudentDraft,
};
use crate::synonyms::{
    Field, GENDER_SYNONYMS, GRADE_SYNONYMS, HEADER_SYNONYMS, SCHOOL_TYPE_SYNONYMS,
};
use crate::text;

/// Minimum fuzzy similarity for a header cell to claim a canonical column.
pub const HEADER_SIMILARITY_MIN: f64 = 0.7;

/// Structural failures that abort normalization before a staging document
/// exists. Everything softer becomes a per-record warning downstream.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("input is empty")]
    Empty,
    #[error("input has a header row but no data rows")]
    NoDataRows,
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("workbook error: {0}")]
    Workbook(#[from] calamine::Error),
}

/// Parse a delimited-text or workbook file into a staging document.
pub fn parse_file(path: &Path) -> Result<StagingDocument, ParseError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let rows = match ext.as_str() {
        "csv" | "tsv" | "txt" => read_delimited(path)?,
        "xlsx" | "xls" | "ods" => read_workbook(path)?,
        other => return Err(ParseError::UnsupportedFormat(other.to_string())),
    };

    from_rows(rows, &format!("file:{}", ext))
}

/// Read a delimited text file, sniffing the delimiter from the header line.
fn read_delimited(path: &Path) -> Result<Vec<Vec<String>>, ParseError> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let header_line = content.lines().next().unwrap_or("");
    let delimiter = sniff_delimiter(header_line);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|c| c.to_string()).collect());
    }
    Ok(rows)
}

fn sniff_delimiter(header: &str) -> u8 {
    let candidates: [(u8, usize); 4] = [
        (b',', header.matches(',').count()),
        (b'\t', header.matches('\t').count()),
        (b';', header.matches(';').count()),
        (b'|', header.matches('|').count()),
    ];
    candidates
        .iter()
        .max_by_key(|(_, n)| *n)
        .filter(|(_, n)| *n > 0)
        .map(|(d, _)| *d)
        .unwrap_or(b',')
}

/// Read the first sheet of a workbook, stringifying every cell.
fn read_workbook(path: &Path) -> Result<Vec<Vec<String>>, ParseError> {
    use calamine::{open_workbook_auto, Data, Reader};

    let mut workbook = open_workbook_auto(path)?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(ParseError::Empty)?;
    let range = workbook.worksheet_range(&sheet)?;

    let mut rows = Vec::new();
    for row in range.rows() {
        let cells = row
            .iter()
            .map(|cell| match cell {
                Data::Empty => String::new(),
                Data::String(s) => s.trim().to_string(),
                Data::Float(f) => {
                    if f.fract() == 0.0 {
                        format!("{}", *f as i64)
                    } else {
                        f.to_string()
                    }
                }
                Data::Int(i) => i.to_string(),
                Data::Bool(b) => b.to_string(),
                Data::DateTime(d) => d.to_string(),
                Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
                Data::Error(_) => String::new(),
            })
            .collect();
        rows.push(cells);
    }
    Ok(rows)
}

/// Normalize raw rows (first row = headers) into a staging document.
pub fn from_rows(rows: Vec<Vec<String>>, source: &str) -> Result<StagingDocument, ParseError> {
    if rows.is_empty() || rows.iter().all(|r| r.iter().all(|c| c.trim().is_empty())) {
        return Err(ParseError::Empty);
    }

    let columns = resolve_headers(&rows[0])?;
    if rows.len() < 2 {
        return Err(ParseError::NoDataRows);
    }

    let groups = group_by_school(&rows[1..], &columns);

    let schools = groups
        .into_iter()
        .map(|group| {
            let school_type = group
                .explicit_type
                .as_deref()
                .and_then(parse_school_type)
                .unwrap_or_else(|| infer_school_type(&group.students));

            let mut school = SchoolDraft::new(group.name, school_type);
            school.district = group.district;
            school.contact_person = group.contact_person;
            school.metadata = SchoolMetadata {
                student_count: group.students.len(),
                has_grades: group.students.iter().any(|s| s.grade.is_some()),
                has_classes: group.students.iter().any(|s| s.class.is_some()),
            };
            school.students = with_sibling_hints(group.students);
            school
        })
        .collect();

    Ok(StagingDocument::new(schools, source))
}

struct ColumnMap(HashMap<Field, usize>);

impl ColumnMap {
    fn cell<'a>(&self, row: &'a [String], field: Field) -> Option<&'a str> {
        let idx = *self.0.get(&field)?;
        let cell = row.get(idx)?.trim();
        if cell.is_empty() {
            None
        } else {
            Some(cell)
        }
    }
}

/// Map header cells to canonical columns: exact synonym, then substring
/// containment, then fuzzy similarity. Unmatched headers are dropped with a
/// warning; missing mandatory columns fail normalization.
fn resolve_headers(headers: &[String]) -> Result<ColumnMap, ParseError> {
    let mut map: HashMap<Field, usize> = HashMap::new();

    for (idx, raw) in headers.iter().enumerate() {
        let cell = text::normalize(raw);
        if cell.is_empty() {
            continue;
        }
        let Some(field) = match_header(&cell) else {
            log::warn!("dropping unrecognized header column {:?}", raw);
            continue;
        };
        // First column wins when a sheet repeats a field.
        map.entry(field).or_insert(idx);
    }

    let mut missing = Vec::new();
    for (field, label) in [(Field::Name, "name"), (Field::SchoolName, "school")] {
        if !map.contains_key(&field) {
            missing.push(label.to_string());
        }
    }
    if !missing.is_empty() {
        return Err(ParseError::MissingColumns(missing));
    }

    Ok(ColumnMap(map))
}

fn match_header(cell: &str) -> Option<Field> {
    for (field, synonyms) in HEADER_SYNONYMS {
        if synonyms.iter().any(|s| *s == cell) {
            return Some(*field);
        }
    }

    for (field, synonyms) in HEADER_SYNONYMS {
        if synonyms
            .iter()
            .any(|s| cell.contains(s) || s.contains(cell))
        {
            return Some(*field);
        }
    }

    let mut best: Option<(Field, f64)> = None;
    for (field, synonyms) in HEADER_SYNONYMS {
        for synonym in *synonyms {
            let score = text::similarity(cell, synonym);
            if score >= HEADER_SIMILARITY_MIN && best.map(|(_, b)| score > b).unwrap_or(true) {
                best = Some((*field, score));
            }
        }
    }
    best.map(|(field, _)| field)
}

struct SchoolGroup {
    name: String,
    explicit_type: Option<String>,
    district: Option<String>,
    contact_person: Option<String>,
    students: Vec<StudentDraft>,
}

/// Scan data rows in order. A non-empty school cell sets the current school
/// context which persists until overwritten; rows without any context are
/// skipped with a warning.
fn group_by_school(data_rows: &[Vec<String>], columns: &ColumnMap) -> Vec<SchoolGroup> {
    let mut groups: Vec<SchoolGroup> = Vec::new();
    let mut index_by_key: HashMap<String, usize> = HashMap::new();
    let mut current_key: Option<String> = None;
    let mut current_type: Option<String> = None;

    for (offset, row) in data_rows.iter().enumerate() {
        let source_row = offset + 2; // 1-based, after the header row

        let school_cell = columns.cell(row, Field::SchoolName).and_then(text::sanitize);
        let type_cell = columns.cell(row, Field::SchoolType).map(text::normalize);

        if let Some(name) = school_cell {
            if let Some(t) = type_cell.clone() {
                current_type = Some(t);
            }
            let key = format!(
                "{}|{}",
                text::normalize(&name),
                current_type.as_deref().unwrap_or("")
            );
            if !index_by_key.contains_key(&key) {
                index_by_key.insert(key.clone(), groups.len());
                groups.push(SchoolGroup {
                    name,
                    explicit_type: current_type.clone(),
                    district: columns.cell(row, Field::District).and_then(text::sanitize),
                    contact_person: columns
                        .cell(row, Field::ContactPerson)
                        .and_then(text::sanitize),
                    students: Vec::new(),
                });
            }
            current_key = Some(key);
        }

        let Some(key) = current_key.as_ref() else {
            log::warn!("row {} has no school context yet, skipping", source_row);
            continue;
        };

        let student = extract_student(row, columns, source_row);
        if !student.has_any_name() {
            continue;
        }

        let idx = index_by_key[key];
        groups[idx].students.push(student);
    }

    groups
}

fn extract_student(row: &[String], columns: &ColumnMap, source_row: usize) -> StudentDraft {
    let class_number = columns
        .cell(row, Field::ClassNumber)
        .and_then(|c| normalize_class_number(c, source_row));

    StudentDraft {
        name: columns.cell(row, Field::Name).and_then(text::sanitize),
        name_en: columns.cell(row, Field::NameEn).and_then(text::sanitize),
        name_ch: None,
        student_id: columns.cell(row, Field::StudentId).and_then(text::sanitize),
        grade: columns.cell(row, Field::Grade).and_then(normalize_grade),
        class: columns.cell(row, Field::Class).and_then(text::sanitize),
        class_number,
        gender: columns.cell(row, Field::Gender).and_then(normalize_gender),
        date_of_birth: columns
            .cell(row, Field::DateOfBirth)
            .and_then(text::sanitize),
        phone: columns.cell(row, Field::Phone).and_then(text::sanitize),
        email: columns.cell(row, Field::Email).and_then(text::sanitize),
        address: columns.cell(row, Field::Address).and_then(text::sanitize),
        source_row,
        ..StudentDraft::default()
    }
}

/// Map a raw grade cell to one of the 12 canonical codes. Unknown values pass
/// through sanitized, never remapped to a wrong code.
pub fn normalize_grade(raw: &str) -> Option<String> {
    let cell = text::normalize(raw);
    if cell.is_empty() {
        return None;
    }

    for (synonym, code) in GRADE_SYNONYMS {
        if *synonym == cell {
            return Some((*code).to_string());
        }
    }

    // Bare codes and band-prefix forms: p3 / S2 / 小4 / primary 5 / 中6.
    if let Some(last) = cell.chars().last().filter(|c| ('1'..='6').contains(c)) {
        let prefix = cell[..cell.len() - last.len_utf8()].trim_end();
        let band = match prefix {
            "p" | "小" | "primary" => Some('P'),
            "s" | "中" | "secondary" => Some('S'),
            _ => None,
        };
        if let Some(band) = band {
            return Some(format!("{}{}", band, last));
        }
    }

    log::warn!("could not normalize grade {:?}", raw);
    text::sanitize(raw)
}

fn normalize_class_number(raw: &str, source_row: usize) -> Option<i64> {
    let n = text::extract_number(raw)?;
    if (1..=50).contains(&n) {
        Some(n)
    } else {
        log::warn!(
            "class number {} out of range 1-50 at row {}, dropping",
            n,
            source_row
        );
        None
    }
}

pub fn normalize_gender(raw: &str) -> Option<crate::model::Gender> {
    let cell = text::normalize(raw);
    if cell.is_empty() {
        return None;
    }
    for (needle, gender) in GENDER_SYNONYMS {
        if *needle == cell {
            return Some(*gender);
        }
    }
    for (needle, gender) in GENDER_SYNONYMS {
        if needle.chars().count() > 1 && cell.contains(needle) {
            return Some(*gender);
        }
    }
    None
}

/// Map a type cell (Chinese or English, any phrasing) to a school type.
pub fn parse_school_type(raw: &str) -> Option<SchoolType> {
    let cell = text::normalize(raw);
    if cell.is_empty() {
        return None;
    }
    SCHOOL_TYPE_SYNONYMS
        .iter()
        .find(|(needle, _)| cell.contains(needle))
        .map(|(_, ty)| *ty)
}

/// Infer a school's type from the grade bands its students carry. Mixed bands
/// mean a special school; no grades defaults to primary.
fn infer_school_type(students: &[StudentDraft]) -> SchoolType {
    let mut has_primary = false;
    let mut has_secondary = false;
    for grade in students.iter().filter_map(|s| s.grade.as_deref()) {
        has_primary |= is_primary_grade(grade);
        has_secondary |= is_secondary_grade(grade);
    }
    match (has_primary, has_secondary) {
        (true, true) => SchoolType::Special,
        (false, true) => SchoolType::Secondary,
        _ => SchoolType::Primary,
    }
}

/// Pairwise duplicate hints inside one school: identical names, or identical
/// (grade, class, class number) seat triples. Recorded on the earlier student.
fn with_sibling_hints(mut students: Vec<StudentDraft>) -> Vec<StudentDraft> {
    for i in 0..students.len() {
        let mut hints = Vec::new();
        for j in (i + 1)..students.len() {
            let (a, b) = (&students[i], &students[j]);

            if a.has_any_name() && a.display_name() == b.display_name() {
                hints.push(SiblingHint {
                    other_index: j,
                    kind: SiblingHintKind::SameName,
                    reason: format!("same name as row {}", b.source_row),
                });
            }

            let same_seat = a.grade.is_some()
                && a.class.is_some()
                && a.class_number.is_some()
                && a.grade == b.grade
                && a.class == b.class
                && a.class_number == b.class_number;
            if same_seat {
                hints.push(SiblingHint {
                    other_index: j,
                    kind: SiblingHintKind::SeatCollision,
                    reason: format!(
                        "same grade, class and class number as row {}",
                        b.source_row
                    ),
                });
            }
        }
        students[i].sibling_hints = hints;
    }
    students
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Gender;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn carry_forward_groups_rows_under_last_school() {
        let doc = from_rows(
            rows(&[
                &["學校", "姓名", "年級"],
                &["School A", "s1", "P1"],
                &["", "s2", "P2"],
                &["School B", "s3", "P3"],
            ]),
            "test",
        )
        .expect("parse");

        assert_eq!(doc.schools.len(), 2);
        assert_eq!(doc.schools[0].name, "School A");
        assert_eq!(doc.schools[0].students.len(), 2);
        assert_eq!(doc.schools[1].students.len(), 1);
        assert_eq!(doc.schools[1].students[0].source_row, 4);
    }

    #[test]
    fn rows_before_any_school_are_skipped() {
        let doc = from_rows(
            rows(&[
                &["school", "name"],
                &["", "orphan"],
                &["School A", "kept"],
            ]),
            "test",
        )
        .expect("parse");

        assert_eq!(doc.schools.len(), 1);
        assert_eq!(doc.schools[0].students.len(), 1);
        assert_eq!(doc.schools[0].students[0].name.as_deref(), Some("kept"));
    }

    #[test]
    fn missing_mandatory_columns_fail() {
        let err = from_rows(rows(&[&["年級", "班別"], &["P1", "1A"]]), "test").unwrap_err();
        match err {
            ParseError::MissingColumns(cols) => {
                assert!(cols.contains(&"name".to_string()));
                assert!(cols.contains(&"school".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_input_fails() {
        assert!(matches!(from_rows(vec![], "t"), Err(ParseError::Empty)));
        assert!(matches!(
            from_rows(rows(&[&["學校", "姓名"]]), "t"),
            Err(ParseError::NoDataRows)
        ));
    }

    #[test]
    fn header_matching_survives_typos_and_decoration() {
        // Exact, containment and fuzzy paths.
        let doc = from_rows(
            rows(&[
                &["學校名稱", "學生姓名欄", "gradee"],
                &["School A", "Amy", "P1"],
            ]),
            "test",
        )
        .expect("parse");
        let s = &doc.schools[0].students[0];
        assert_eq!(s.name.as_deref(), Some("Amy"));
        assert_eq!(s.grade.as_deref(), Some("P1"));
    }

    #[test]
    fn grade_synonyms_cover_all_twelve_codes() {
        // At least one Chinese, one Form-system and one numeric synonym per band.
        let cases = [
            ("小一", "P1"),
            ("小六", "P6"),
            ("中三", "S3"),
            ("初二", "S2"),
            ("高三", "S6"),
            ("form4", "S4"),
            ("F5", "S5"),
            ("3年級", "P3"),
            ("7年級", "S1"),
            ("primary-2", "P2"),
            ("secondary-6", "S6"),
            ("p4", "P4"),
            ("S 2", "S2"),
            ("小5", "P5"),
        ];
        for (raw, want) in cases {
            assert_eq!(normalize_grade(raw).as_deref(), Some(want), "raw={raw}");
        }
        for code in crate::model::CANONICAL_GRADES {
            assert_eq!(normalize_grade(code).as_deref(), Some(code));
        }
    }

    #[test]
    fn unknown_grade_passes_through_sanitized() {
        assert_eq!(
            normalize_grade("  Kindergarten   2 ").as_deref(),
            Some("Kindergarten 2")
        );
        assert_eq!(normalize_grade("p9").as_deref(), Some("p9"));
    }

    #[test]
    fn class_number_range_checked() {
        let doc = from_rows(
            rows(&[
                &["學校", "姓名", "班內號碼"],
                &["School A", "a", "no. 12"],
                &["", "b", "99"],
            ]),
            "test",
        )
        .expect("parse");
        let students = &doc.schools[0].students;
        assert_eq!(students[0].class_number, Some(12));
        assert_eq!(students[1].class_number, None);
    }

    #[test]
    fn gender_mapping() {
        assert_eq!(normalize_gender("男"), Some(Gender::Male));
        assert_eq!(normalize_gender("Female"), Some(Gender::Female));
        assert_eq!(normalize_gender("M"), Some(Gender::Male));
        assert_eq!(normalize_gender("unknown"), None);
    }

    #[test]
    fn school_type_explicit_beats_inference() {
        let doc = from_rows(
            rows(&[
                &["學校", "學校類別", "姓名", "年級"],
                &["School A", "中學", "a", "P1"],
            ]),
            "test",
        )
        .expect("parse");
        assert_eq!(doc.schools[0].school_type, SchoolType::Secondary);
    }

    #[test]
    fn school_type_inferred_from_grade_bands() {
        let mixed = from_rows(
            rows(&[
                &["學校", "姓名", "年級"],
                &["A", "a", "P1"],
                &["", "b", "S1"],
            ]),
            "test",
        )
        .expect("parse");
        assert_eq!(mixed.schools[0].school_type, SchoolType::Special);

        let secondary = from_rows(
            rows(&[&["學校", "姓名", "年級"], &["A", "a", "S3"]]),
            "test",
        )
        .expect("parse");
        assert_eq!(secondary.schools[0].school_type, SchoolType::Secondary);

        let no_grades = from_rows(rows(&[&["學校", "姓名"], &["A", "a"]]), "test").expect("parse");
        assert_eq!(no_grades.schools[0].school_type, SchoolType::Primary);
    }

    #[test]
    fn legacy_both_maps_to_special() {
        assert_eq!(parse_school_type("both"), Some(SchoolType::Special));
    }

    #[test]
    fn sibling_hints_for_names_and_seats() {
        let doc = from_rows(
            rows(&[
                &["學校", "姓名", "年級", "班別", "班內號碼"],
                &["A", "陳大文", "P1", "1A", "3"],
                &["", "李小明", "P1", "1A", "3"],
                &["", "陳大文", "P2", "2B", "9"],
            ]),
            "test",
        )
        .expect("parse");

        let students = &doc.schools[0].students;
        assert_eq!(students[0].sibling_hints.len(), 2);
        assert!(students[0]
            .sibling_hints
            .iter()
            .any(|h| h.kind == SiblingHintKind::SameName && h.other_index == 2));
        assert!(students[0]
            .sibling_hints
            .iter()
            .any(|h| h.kind == SiblingHintKind::SeatCollision && h.other_index == 1));
        assert!(students[2].sibling_hints.is_empty());
    }

    #[test]
    fn delimiter_sniffing() {
        assert_eq!(sniff_delimiter("a,b,c"), b',');
        assert_eq!(sniff_delimiter("a\tb\tc"), b'\t');
        assert_eq!(sniff_delimiter("a;b;c"), b';');
        assert_eq!(sniff_delimiter("lone-header"), b',');
    }

    #[test]
    fn metadata_counts() {
        let doc = from_rows(
            rows(&[
                &["學校", "姓名", "年級", "班別"],
                &["A", "a", "P1", ""],
                &["", "b", "", "1A"],
            ]),
            "test",
        )
        .expect("parse");
        let meta = &doc.schools[0].metadata;
        assert_eq!(meta.student_count, 2);
        assert!(meta.has_grades);
        assert!(meta.has_classes);
        assert_eq!(doc.metadata.total_students, 2);
    }
}
