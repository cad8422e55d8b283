//! Student roster and attendance marks kept in SQLite

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ALUMNOS (
    NUMERO_CONTROL   TEXT PRIMARY KEY,
    NOMBRE           TEXT NOT NULL,
    CARRERA          TEXT NOT NULL,
    SEMESTRE         TEXT NOT NULL,
    AVANCE_RETICULAR TEXT NOT NULL,
    ASISTENCIA       INTEGER NOT NULL DEFAULT 0,
    ASISTENCIA_EN    TEXT
);
";

const SELECT_COLUMNS: &str = "NUMERO_CONTROL, NOMBRE, CARRERA, SEMESTRE, AVANCE_RETICULAR, ASISTENCIA, ASISTENCIA_EN";

/// Columns a roster CSV must provide (after trimming and uppercasing headers)
pub const CSV_COLUMNS: [&str; 5] = [
    "NUMERO_CONTROL",
    "NOMBRE",
    "CARRERA",
    "SEMESTRE",
    "AVANCE_RETICULAR",
];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Faltan las siguientes columnas en el CSV: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("roster lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Fields supplied when registering a student
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStudent {
    pub numero_control: String,
    pub nombre: String,
    pub carrera: String,
    pub semestre: String,
    pub avance_reticular: String,
}

/// A roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub numero_control: String,
    pub nombre: String,
    pub carrera: String,
    pub semestre: String,
    pub avance_reticular: String,
    pub asistencia: bool,
    pub asistencia_en: Option<DateTime<Utc>>,
}

impl Student {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let asistencia_en: Option<String> = row.get(6)?;
        Ok(Self {
            numero_control: row.get(0)?,
            nombre: row.get(1)?,
            carrera: row.get(2)?,
            semestre: row.get(3)?,
            avance_reticular: row.get(4)?,
            asistencia: row.get::<_, i64>(5)? != 0,
            asistencia_en: asistencia_en
                .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
                .map(|ts| ts.with_timezone(&Utc)),
        })
    }
}

/// Which students a listing returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RosterFilter {
    #[default]
    All,
    Present,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Result of a CSV import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub errors: Vec<String>,
}

impl ImportSummary {
    pub fn message(&self) -> String {
        let mut message = format!("Se insertaron {} registros correctamente", self.inserted);
        if self.duplicates > 0 {
            message.push_str(&format!(
                ". {} registros duplicados fueron omitidos",
                self.duplicates
            ));
        }
        if !self.errors.is_empty() {
            message.push_str(&format!(". {} errores encontrados", self.errors.len()));
        }
        message
    }
}

/// Shared roster handle
#[derive(Debug)]
pub struct Roster {
    conn: Mutex<Connection>,
}

impl Roster {
    /// Open (and create if needed) the roster database at `path`
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    log::warn!("Could not create {}: {}", parent.display(), e);
                }
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(1_000))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("Roster journal mode: {}", mode);
        let roster = Self::init(conn)?;
        log::info!("Roster ready at {}", path.display());
        Ok(roster)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn list(&self, filter: RosterFilter) -> StoreResult<Vec<Student>> {
        let conn = self.lock()?;
        let sql = match filter {
            RosterFilter::All => {
                format!("SELECT {SELECT_COLUMNS} FROM ALUMNOS ORDER BY NUMERO_CONTROL")
            }
            RosterFilter::Present => format!(
                "SELECT {SELECT_COLUMNS} FROM ALUMNOS WHERE ASISTENCIA = 1 ORDER BY NUMERO_CONTROL"
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let students = stmt
            .query_map([], Student::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(students)
    }

    pub fn find(&self, numero_control: &str) -> StoreResult<Option<Student>> {
        let conn = self.lock()?;
        Self::find_locked(&conn, numero_control)
    }

    fn find_locked(conn: &Connection, numero_control: &str) -> StoreResult<Option<Student>> {
        let student = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM ALUMNOS WHERE NUMERO_CONTROL = ?1"),
                params![numero_control],
                Student::from_row,
            )
            .optional()?;
        Ok(student)
    }

    pub fn insert(&self, student: &NewStudent) -> StoreResult<InsertOutcome> {
        let conn = self.lock()?;
        Self::insert_locked(&conn, student)
    }

    fn insert_locked(conn: &Connection, student: &NewStudent) -> StoreResult<InsertOutcome> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO ALUMNOS(NUMERO_CONTROL, NOMBRE, CARRERA, SEMESTRE, AVANCE_RETICULAR)
             VALUES(?1, ?2, ?3, ?4, ?5)",
            params![
                student.numero_control,
                student.nombre,
                student.carrera,
                student.semestre,
                student.avance_reticular
            ],
        )?;
        Ok(if inserted == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    /// Mark a student present. Returns the updated entry, or `None` if unknown.
    pub fn mark_attendance(
        &self,
        numero_control: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Student>> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE ALUMNOS SET ASISTENCIA = 1, ASISTENCIA_EN = ?2 WHERE NUMERO_CONTROL = ?1",
            params![numero_control, at.to_rfc3339()],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        Self::find_locked(&conn, numero_control)
    }

    /// Import students from CSV text in one transaction
    pub fn import_csv(&self, text: &str) -> StoreResult<ImportSummary> {
        let mut records = split_csv_records(text).into_iter();

        let header: Vec<String> = match records.next() {
            Some((_, fields)) => fields
                .into_iter()
                .map(|h| h.trim().to_uppercase())
                .collect(),
            None => Vec::new(),
        };

        let missing: Vec<String> = CSV_COLUMNS
            .iter()
            .filter(|col| !header.iter().any(|h| h == *col))
            .map(|col| col.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::MissingColumns(missing));
        }

        let index = |name: &str| header.iter().position(|h| h == name).unwrap_or_default();
        let columns: Vec<usize> = CSV_COLUMNS.iter().map(|c| index(*c)).collect();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut summary = ImportSummary::default();

        for (line_no, fields) in records {
            let field = |i: usize| fields.get(columns[i]).map(|f| f.trim().to_string());
            let student = match (field(0), field(1), field(2), field(3), field(4)) {
                (Some(numero_control), Some(nombre), Some(carrera), Some(semestre), Some(avance))
                    if !numero_control.is_empty() =>
                {
                    NewStudent {
                        numero_control,
                        nombre,
                        carrera,
                        semestre,
                        avance_reticular: avance,
                    }
                }
                _ => {
                    summary.errors.push(format!("Error en fila {}", line_no));
                    continue;
                }
            };

            match Self::insert_locked(&tx, &student) {
                Ok(InsertOutcome::Inserted) => summary.inserted += 1,
                Ok(InsertOutcome::Duplicate) => summary.duplicates += 1,
                Err(e) => summary
                    .errors
                    .push(format!("Error en fila {}: {}", line_no, e)),
            }
        }

        tx.commit()?;
        log::info!("CSV import: {}", summary.message());
        Ok(summary)
    }
}

/// Split CSV text into records, tagged with the 1-based line each starts on
///
/// Double-quoted fields may hold commas, `""` escapes and line breaks.
/// Blank lines outside quotes are skipped.
fn split_csv_records(text: &str) -> Vec<(usize, Vec<String>)> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    // Set once the record has any content, quoted empties included
    let mut started = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => {
                in_quotes = !in_quotes;
                started = true;
            }
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if in_quotes => {
                line += 1;
                current.push('\n');
            }
            '\n' => {
                fields.push(std::mem::take(&mut current));
                if started || fields.iter().any(|f| !f.trim().is_empty()) {
                    records.push((record_line, std::mem::take(&mut fields)));
                }
                fields.clear();
                started = false;
                line += 1;
                record_line = line;
            }
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
                started = true;
            }
            _ => current.push(c),
        }
    }

    fields.push(current);
    if started || fields.iter().any(|f| !f.trim().is_empty()) {
        records.push((record_line, fields));
    }
    records
}
