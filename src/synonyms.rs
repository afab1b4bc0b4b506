//! Synonym tables used by the tabular normalizer.
//!
//! These are data, not logic: extending a synonym set (for a new spreadsheet
//! dialect) must never require touching the matching code in `tabular.rs`.

use crate::model::{Gender, SchoolType};

/// Canonical spreadsheet columns the normalizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    SchoolName,
    SchoolType,
    District,
    ContactPerson,
    Name,
    NameEn,
    StudentId,
    Grade,
    Class,
    ClassNumber,
    Gender,
    DateOfBirth,
    Phone,
    Email,
    Address,
}

impl Field {
    pub fn label(self) -> &'static str {
        match self {
            Field::SchoolName => "school",
            Field::SchoolType => "schoolType",
            Field::District => "district",
            Field::ContactPerson => "contactPerson",
            Field::Name => "name",
            Field::NameEn => "nameEn",
            Field::StudentId => "studentId",
            Field::Grade => "grade",
            Field::Class => "class",
            Field::ClassNumber => "classNumber",
            Field::Gender => "gender",
            Field::DateOfBirth => "dateOfBirth",
            Field::Phone => "phone",
            Field::Email => "email",
            Field::Address => "address",
        }
    }
}

/// Header synonyms, matched after whitespace collapsing and lowercasing.
/// Order matters: earlier entries win when containment matching is ambiguous.
pub const HEADER_SYNONYMS: &[(Field, &[&str])] = &[
    (
        Field::Name,
        &[
            "姓名",
            "學生姓名",
            "學生名稱",
            "學生名字",
            "中文姓名",
            "全名",
            "name",
            "student_name",
            "studentname",
            "full_name",
            "fullname",
        ],
    ),
    (
        Field::NameEn,
        &[
            "英文姓名",
            "英文名",
            "英文名字",
            "英語姓名",
            "english_name",
            "english name",
            "name_en",
            "eng_name",
            "englishname",
        ],
    ),
    (
        Field::SchoolName,
        &[
            "學校",
            "學校名稱",
            "校名",
            "學校名",
            "院校",
            "school",
            "school_name",
            "schoolname",
            "institution",
            "academy",
        ],
    ),
    (
        Field::SchoolType,
        &[
            "學校類別",
            "學校類型",
            "校別",
            "學校性質",
            "辦學類型",
            "school_type",
            "school_category",
            "category",
            "type",
        ],
    ),
    (
        Field::District,
        &["地區", "區域", "分區", "district", "region"],
    ),
    (
        Field::ContactPerson,
        &["聯絡人", "負責人", "contact_person", "contact person"],
    ),
    (
        Field::Grade,
        &[
            "年級", "級別", "學年", "年班", "學級", "級數", "grade", "level", "form", "year",
        ],
    ),
    (
        Field::Class,
        &[
            "班別",
            "班級名稱",
            "班級",
            "班名",
            "班",
            "class",
            "class_name",
            "classname",
            "section",
        ],
    ),
    (
        Field::ClassNumber,
        &[
            "班內號碼",
            "座號",
            "學號",
            "班內編號",
            "座位號",
            "class_number",
            "seat_number",
            "student_number",
            "roll_number",
            "number",
        ],
    ),
    (
        Field::StudentId,
        &["學生編號", "學籍編號", "student_id", "studentid"],
    ),
    (
        Field::Gender,
        &["性別", "男女", "gender", "sex", "m_f"],
    ),
    (
        Field::DateOfBirth,
        &[
            "出生日期",
            "生日",
            "date_of_birth",
            "birth_date",
            "birthdate",
            "dob",
        ],
    ),
    (
        Field::Phone,
        &[
            "電話",
            "聯絡電話",
            "電話號碼",
            "手機",
            "phone",
            "telephone",
            "mobile",
            "tel",
        ],
    ),
    (
        Field::Email,
        &[
            "電郵",
            "電子郵件",
            "郵箱",
            "電郵地址",
            "email",
            "e-mail",
            "mail",
            "email_address",
        ],
    ),
    (
        Field::Address,
        &[
            "地址",
            "住址",
            "居住地址",
            "家庭地址",
            "address",
            "home_address",
            "residence",
        ],
    ),
];

/// Grade synonyms → canonical codes. Chinese numerals, mainland forms, the
/// Form system, and numeric grades 1–12. Matched after lowercasing.
pub const GRADE_SYNONYMS: &[(&str, &str)] = &[
    ("小一", "P1"),
    ("小二", "P2"),
    ("小三", "P3"),
    ("小四", "P4"),
    ("小五", "P5"),
    ("小六", "P6"),
    ("中一", "S1"),
    ("中二", "S2"),
    ("中三", "S3"),
    ("中四", "S4"),
    ("中五", "S5"),
    ("中六", "S6"),
    ("小學一年級", "P1"),
    ("小學二年級", "P2"),
    ("小學三年級", "P3"),
    ("小學四年級", "P4"),
    ("小學五年級", "P5"),
    ("小學六年級", "P6"),
    ("中學一年級", "S1"),
    ("中學二年級", "S2"),
    ("中學三年級", "S3"),
    ("中學四年級", "S4"),
    ("中學五年級", "S5"),
    ("中學六年級", "S6"),
    ("初一", "S1"),
    ("初二", "S2"),
    ("初三", "S3"),
    ("高一", "S4"),
    ("高二", "S5"),
    ("高三", "S6"),
    ("primary-1", "P1"),
    ("primary-2", "P2"),
    ("primary-3", "P3"),
    ("primary-4", "P4"),
    ("primary-5", "P5"),
    ("primary-6", "P6"),
    ("secondary-1", "S1"),
    ("secondary-2", "S2"),
    ("secondary-3", "S3"),
    ("secondary-4", "S4"),
    ("secondary-5", "S5"),
    ("secondary-6", "S6"),
    ("1年級", "P1"),
    ("2年級", "P2"),
    ("3年級", "P3"),
    ("4年級", "P4"),
    ("5年級", "P5"),
    ("6年級", "P6"),
    ("7年級", "S1"),
    ("8年級", "S2"),
    ("9年級", "S3"),
    ("10年級", "S4"),
    ("11年級", "S5"),
    ("12年級", "S6"),
    ("form1", "S1"),
    ("form2", "S2"),
    ("form3", "S3"),
    ("form4", "S4"),
    ("form5", "S5"),
    ("form6", "S6"),
    ("f1", "S1"),
    ("f2", "S2"),
    ("f3", "S3"),
    ("f4", "S4"),
    ("f5", "S5"),
    ("f6", "S6"),
];

/// School type needles, matched by substring containment against the
/// normalized type cell. `both` is a legacy value folded into special.
pub const SCHOOL_TYPE_SYNONYMS: &[(&str, SchoolType)] = &[
    ("小學", SchoolType::Primary),
    ("國小", SchoolType::Primary),
    ("primary", SchoolType::Primary),
    ("中學", SchoolType::Secondary),
    ("國中", SchoolType::Secondary),
    ("高中", SchoolType::Secondary),
    ("secondary", SchoolType::Secondary),
    ("特殊", SchoolType::Special),
    ("特校", SchoolType::Special),
    ("sen", SchoolType::Special),
    ("special", SchoolType::Special),
    ("綜合", SchoolType::Special),
    ("both", SchoolType::Special),
];

/// Gender needles. Exact matches are tried first, then substring containment
/// for multi-character needles. "female" must precede "male" so containment
/// never misreads it.
pub const GENDER_SYNONYMS: &[(&str, Gender)] = &[
    ("female", Gender::Female),
    ("male", Gender::Male),
    ("女", Gender::Female),
    ("男", Gender::Male),
    ("其他", Gender::Other),
    ("other", Gender::Other),
    ("f", Gender::Female),
    ("m", Gender::Male),
];
