//! Record store: the persistence contract the import orchestrator and
//! identity resolution run against. Production uses sqlite in the workspace;
//! tests substitute scripted in-memory stores.

use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Gender, SchoolType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSchool {
    pub id: String,
    pub name: String,
    pub name_en: Option<String>,
    pub name_ch: Option<String>,
    pub school_type: SchoolType,
    pub district: Option<String>,
    pub address: Option<String>,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredStudent {
    pub id: String,
    pub school_id: String,
    pub name: Option<String>,
    pub name_en: Option<String>,
    pub name_ch: Option<String>,
    pub student_no: Option<String>,
    pub grade: Option<String>,
    pub class: Option<String>,
    pub class_number: Option<i64>,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

impl StoredStudent {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.name_ch.as_deref())
            .or(self.name_en.as_deref())
            .unwrap_or("(unnamed)")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewSchool {
    pub name: String,
    pub name_en: Option<String>,
    pub name_ch: Option<String>,
    pub school_type: Option<SchoolType>,
    pub district: Option<String>,
    pub address: Option<String>,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub description: Option<String>,
}

/// Only `Some` fields are written; everything else keeps its stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchoolPatch {
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
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewStudent {
    pub school_id: String,
    pub name: Option<String>,
    pub name_en: Option<String>,
    pub name_ch: Option<String>,
    pub student_no: Option<String>,
    pub grade: Option<String>,
    pub class: Option<String>,
    pub class_number: Option<i64>,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentPatch {
    pub name: Option<String>,
    pub name_en: Option<String>,
    pub name_ch: Option<String>,
    pub student_no: Option<String>,
    pub grade: Option<String>,
    pub class: Option<String>,
    pub class_number: Option<i64>,
    pub gender: Option<Gender>,
    pub date_of_birth: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

/// The narrow persistence contract. Calls are strictly sequential; a failed
/// call fails that record only, never the batch.
pub trait RecordStore {
    fn list_schools(&self) -> Result<Vec<StoredSchool>>;
    fn create_school(&mut self, school: &NewSchool) -> Result<StoredSchool>;
    fn update_school(&mut self, id: &str, patch: &SchoolPatch) -> Result<()>;
    /// `school_id = None` lists every student in the workspace.
    fn list_students(&self, school_id: Option<&str>) -> Result<Vec<StoredStudent>>;
    fn create_student(&mut self, student: &NewStudent) -> Result<StoredStudent>;
    fn update_student(&mut self, id: &str, patch: &StudentPatch) -> Result<()>;
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SqliteStore { conn }
    }
}

fn school_from_row(row: &Row) -> rusqlite::Result<StoredSchool> {
    let type_raw: String = row.get("school_type")?;
    Ok(StoredSchool {
        id: row.get("id")?,
        name: row.get("name")?,
        name_en: row.get("name_en")?,
        name_ch: row.get("name_ch")?,
        school_type: SchoolType::parse(&type_raw).unwrap_or(SchoolType::Primary),
        district: row.get("district")?,
        address: row.get("address")?,
        contact_person: row.get("contact_person")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        description: row.get("description")?,
    })
}

fn student_from_row(row: &Row) -> rusqlite::Result<StoredStudent> {
    let gender_raw: Option<String> = row.get("gender")?;
    Ok(StoredStudent {
        id: row.get("id")?,
        school_id: row.get("school_id")?,
        name: row.get("name")?,
        name_en: row.get("name_en")?,
        name_ch: row.get("name_ch")?,
        student_no: row.get("student_no")?,
        grade: row.get("grade")?,
        class: row.get("class")?,
        class_number: row.get("class_number")?,
        gender: gender_raw.as_deref().and_then(Gender::parse),
        date_of_birth: row.get("date_of_birth")?,
        phone: row.get("phone")?,
        email: row.get("email")?,
        address: row.get("address")?,
    })
}

impl RecordStore for SqliteStore<'_> {
    fn list_schools(&self) -> Result<Vec<StoredSchool>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, name_en, name_ch, school_type, district, address,
                    contact_person, email, phone, description
             FROM schools ORDER BY name",
        )?;
        let schools = stmt
            .query_map([], school_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(schools)
    }

    fn create_school(&mut self, school: &NewSchool) -> Result<StoredSchool> {
        let id = Uuid::new_v4().to_string();
        let school_type = school.school_type.unwrap_or(SchoolType::Primary);
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO schools(id, name, name_en, name_ch, school_type, district,
                                 address, contact_person, email, phone, description,
                                 created_by, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'bulk_import', ?12)",
            params![
                id,
                school.name,
                school.name_en,
                school.name_ch,
                school_type.as_str(),
                school.district,
                school.address,
                school.contact_person,
                school.email,
                school.phone,
                school.description,
                now,
            ],
        )?;
        Ok(StoredSchool {
            id,
            name: school.name.clone(),
            name_en: school.name_en.clone(),
            name_ch: school.name_ch.clone(),
            school_type,
            district: school.district.clone(),
            address: school.address.clone(),
            contact_person: school.contact_person.clone(),
            email: school.email.clone(),
            phone: school.phone.clone(),
            description: school.description.clone(),
        })
    }

    fn update_school(&mut self, id: &str, patch: &SchoolPatch) -> Result<()> {
        let existing: Option<StoredSchool> = self
            .conn
            .query_row(
                "SELECT id, name, name_en, name_ch, school_type, district, address,
                        contact_person, email, phone, description
                 FROM schools WHERE id = ?1",
                [id],
                school_from_row,
            )
            .optional()?;
        let existing = existing.ok_or_else(|| anyhow!("school {} not found", id))?;

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE schools SET name = ?2, name_en = ?3, name_ch = ?4, school_type = ?5,
                                district = ?6, address = ?7, contact_person = ?8,
                                email = ?9, phone = ?10, description = ?11, updated_at = ?12
             WHERE id = ?1",
            params![
                id,
                patch.name.as_ref().unwrap_or(&existing.name),
                patch.name_en.as_ref().or(existing.name_en.as_ref()),
                patch.name_ch.as_ref().or(existing.name_ch.as_ref()),
                patch.school_type.unwrap_or(existing.school_type).as_str(),
                patch.district.as_ref().or(existing.district.as_ref()),
                patch.address.as_ref().or(existing.address.as_ref()),
                patch
                    .contact_person
                    .as_ref()
                    .or(existing.contact_person.as_ref()),
                patch.email.as_ref().or(existing.email.as_ref()),
                patch.phone.as_ref().or(existing.phone.as_ref()),
                patch.description.as_ref().or(existing.description.as_ref()),
                now,
            ],
        )?;
        Ok(())
    }

    fn list_students(&self, school_id: Option<&str>) -> Result<Vec<StoredStudent>> {
        let sql_base = "SELECT id, school_id, name, name_en, name_ch, student_no, grade,
                               class, class_number, gender, date_of_birth, phone, email, address
                        FROM students";
        let students = match school_id {
            Some(sid) => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("{} WHERE school_id = ?1 ORDER BY name", sql_base))?;
                let rows = stmt
                    .query_map([sid], student_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("{} ORDER BY school_id, name", sql_base))?;
                let rows = stmt
                    .query_map([], student_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(students)
    }

    fn create_student(&mut self, student: &NewStudent) -> Result<StoredStudent> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO students(id, school_id, name, name_en, name_ch, student_no,
                                  grade, class, class_number, gender, date_of_birth,
                                  phone, email, address, created_by, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                    'bulk_import', ?15)",
            params![
                id,
                student.school_id,
                student.name,
                student.name_en,
                student.name_ch,
                student.student_no,
                student.grade,
                student.class,
                student.class_number,
                student.gender.map(Gender::as_str),
                student.date_of_birth,
                student.phone,
                student.email,
                student.address,
                now,
            ],
        )?;
        Ok(StoredStudent {
            id,
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
        })
    }

    fn update_student(&mut self, id: &str, patch: &StudentPatch) -> Result<()> {
        let existing: Option<StoredStudent> = self
            .conn
            .query_row(
                "SELECT id, school_id, name, name_en, name_ch, student_no, grade,
                        class, class_number, gender, date_of_birth, phone, email, address
                 FROM students WHERE id = ?1",
                [id],
                student_from_row,
            )
            .optional()?;
        let existing = existing.ok_or_else(|| anyhow!("student {} not found", id))?;

        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE students SET name = ?2, name_en = ?3, name_ch = ?4, student_no = ?5,
                                 grade = ?6, class = ?7, class_number = ?8, gender = ?9,
                                 date_of_birth = ?10, phone = ?11, email = ?12,
                                 address = ?13, updated_at = ?14
             WHERE id = ?1",
            params![
                id,
                patch.name.as_ref().or(existing.name.as_ref()),
                patch.name_en.as_ref().or(existing.name_en.as_ref()),
                patch.name_ch.as_ref().or(existing.name_ch.as_ref()),
                patch.student_no.as_ref().or(existing.student_no.as_ref()),
                patch.grade.as_ref().or(existing.grade.as_ref()),
                patch.class.as_ref().or(existing.class.as_ref()),
                patch.class_number.or(existing.class_number),
                patch.gender.or(existing.gender).map(Gender::as_str),
                patch
                    .date_of_birth
                    .as_ref()
                    .or(existing.date_of_birth.as_ref()),
                patch.phone.as_ref().or(existing.phone.as_ref()),
                patch.email.as_ref().or(existing.email.as_ref()),
                patch.address.as_ref().or(existing.address.as_ref()),
                now,
            ],
        )?;
        Ok(())
    }
}
