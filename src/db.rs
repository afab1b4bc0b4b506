use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("roster.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            name_en TEXT,
            name_ch TEXT,
            school_type TEXT NOT NULL,
            district TEXT,
            address TEXT,
            contact_person TEXT,
            email TEXT,
            phone TEXT,
            description TEXT,
            created_by TEXT NOT NULL DEFAULT 'bulk_import',
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schools_name ON schools(name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT,
            name_en TEXT,
            name_ch TEXT,
            student_no TEXT,
            grade TEXT,
            class TEXT,
            class_number INTEGER,
            gender TEXT,
            date_of_birth TEXT,
            phone TEXT,
            email TEXT,
            address TEXT,
            created_by TEXT NOT NULL DEFAULT 'bulk_import',
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school_name ON students(school_id, name)",
        [],
    )?;

    // Databases created before school types were normalized may still carry
    // the legacy value. Fold it into special.
    conn.execute(
        "UPDATE schools SET school_type = 'special' WHERE school_type = 'both'",
        [],
    )?;

    ensure_students_gender(&conn)?;

    Ok(conn)
}

fn ensure_students_gender(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "gender")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN gender TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
