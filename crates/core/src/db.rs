//! SQLite storage.
//!
//! MedLink keeps every record in a single SQLite database. [`Database`] is a cheap, cloneable
//! handle around one connection guarded by a mutex; services borrow the connection for the
//! duration of a closure via [`Database::with_conn`] or [`Database::transaction`].
//!
//! ## Migrations
//!
//! The schema is defined as an ordered list of SQL batches. The number of applied batches is
//! stored in `PRAGMA user_version`, so opening an up-to-date database is a no-op and opening an
//! older one applies only the missing batches, each inside its own transaction.

use crate::error::{MedLinkError, MedLinkResult};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Ordered schema migrations. Never edit an entry once released; append a new one.
const MIGRATIONS: &[&str] = &[
    // 1: core schema
    r#"
    CREATE TABLE patients (
        national_id        TEXT PRIMARY KEY NOT NULL,
        full_name          TEXT NOT NULL,
        date_of_birth      TEXT NOT NULL,
        gender             TEXT NOT NULL CHECK (gender IN ('male', 'female')),
        phone              TEXT,
        address            TEXT,
        blood_type         TEXT,
        emergency_contact  TEXT,
        allergies          TEXT,
        chronic_conditions TEXT,
        created_at         TEXT NOT NULL,
        updated_at         TEXT NOT NULL
    );
    CREATE INDEX idx_patients_name ON patients (full_name COLLATE NOCASE);

    CREATE TABLE users (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        username            TEXT NOT NULL UNIQUE,
        password_hash       TEXT NOT NULL,
        full_name           TEXT NOT NULL,
        role                TEXT NOT NULL CHECK (role IN ('admin', 'doctor', 'patient')),
        specialty           TEXT,
        phone               TEXT,
        email               TEXT,
        patient_national_id TEXT REFERENCES patients (national_id) ON DELETE CASCADE,
        active              INTEGER NOT NULL DEFAULT 1,
        created_at          TEXT NOT NULL
    );

    CREATE TABLE visits (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_national_id TEXT NOT NULL REFERENCES patients (national_id) ON DELETE CASCADE,
        doctor_id           INTEGER REFERENCES users (id) ON DELETE SET NULL,
        visit_date          TEXT NOT NULL,
        reason              TEXT NOT NULL,
        diagnosis           TEXT,
        treatment           TEXT,
        notes               TEXT,
        follow_up           TEXT,
        created_at          TEXT NOT NULL
    );
    CREATE INDEX idx_visits_patient ON visits (patient_national_id, visit_date);
    CREATE INDEX idx_visits_doctor ON visits (doctor_id);

    CREATE TABLE lab_results (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_national_id TEXT NOT NULL REFERENCES patients (national_id) ON DELETE CASCADE,
        visit_id            INTEGER REFERENCES visits (id) ON DELETE SET NULL,
        test_name           TEXT NOT NULL,
        result_value        TEXT NOT NULL,
        unit                TEXT,
        reference_range     TEXT,
        status              TEXT NOT NULL,
        performed_at        TEXT NOT NULL,
        notes               TEXT,
        created_at          TEXT NOT NULL
    );
    CREATE INDEX idx_lab_results_patient ON lab_results (patient_national_id, performed_at);

    CREATE TABLE imaging (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        patient_national_id TEXT NOT NULL REFERENCES patients (national_id) ON DELETE CASCADE,
        visit_id            INTEGER REFERENCES visits (id) ON DELETE SET NULL,
        modality            TEXT NOT NULL,
        body_part           TEXT NOT NULL,
        findings            TEXT,
        image_path          TEXT,
        performed_at        TEXT NOT NULL,
        created_at          TEXT NOT NULL
    );
    CREATE INDEX idx_imaging_patient ON imaging (patient_national_id, performed_at);

    CREATE TABLE doctor_cards (
        card_uid  TEXT PRIMARY KEY NOT NULL,
        user_id   INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
        active    INTEGER NOT NULL DEFAULT 1,
        issued_at TEXT NOT NULL
    );

    CREATE TABLE patient_cards (
        card_uid            TEXT PRIMARY KEY NOT NULL,
        patient_national_id TEXT NOT NULL REFERENCES patients (national_id) ON DELETE CASCADE,
        active              INTEGER NOT NULL DEFAULT 1,
        issued_at           TEXT NOT NULL
    );

    CREATE TABLE fingerprints (
        slot                INTEGER PRIMARY KEY NOT NULL,
        user_id             INTEGER REFERENCES users (id) ON DELETE CASCADE,
        patient_national_id TEXT REFERENCES patients (national_id) ON DELETE CASCADE,
        enrolled_at         TEXT NOT NULL,
        CHECK ((user_id IS NULL) <> (patient_national_id IS NULL))
    );

    CREATE TABLE audit_log (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        at         TEXT NOT NULL,
        actor      TEXT NOT NULL,
        actor_role TEXT,
        action     TEXT NOT NULL,
        entity     TEXT NOT NULL,
        entity_id  TEXT,
        details    TEXT
    );
    CREATE INDEX idx_audit_entity ON audit_log (entity, entity_id);
    "#,
];

/// Cloneable handle to the MedLink SQLite database.
#[derive(Clone, Debug)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (creating if needed) the database file at `path` and applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `MedLinkError` if:
    /// - the parent directory cannot be created
    /// - the file cannot be opened as SQLite
    /// - a migration fails
    pub fn open(path: &Path) -> MedLinkResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(MedLinkError::DatabaseDirCreation)?;
            }
        }

        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("journal mode: {}", mode);
        tracing::info!("opened database at {}", path.display());
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database with the full schema.
    pub fn open_in_memory() -> MedLinkResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> MedLinkResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MedLinkResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| MedLinkError::LockPoisoned)
    }

    /// Runs `f` with exclusive access to the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> MedLinkResult<T>,
    ) -> MedLinkResult<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` inside a transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back when it returns `Err`.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> MedLinkResult<T>,
    ) -> MedLinkResult<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Number of migrations applied to this database.
    pub fn schema_version(&self) -> MedLinkResult<u32> {
        self.with_conn(|conn| Ok(user_version(conn)?))
    }
}

fn user_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

fn migrate(conn: &mut Connection) -> MedLinkResult<()> {
    let applied = user_version(conn)? as usize;
    if applied > MIGRATIONS.len() {
        return Err(MedLinkError::InvalidInput(format!(
            "database schema version {applied} is newer than this build supports ({})",
            MIGRATIONS.len()
        )));
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(applied) {
        let version = index + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version as u32)?;
        tx.commit()?;
        tracing::info!("applied database migration {}", version);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_in_memory_applies_all_migrations() {
        let db = Database::open_in_memory().expect("open should succeed");
        assert_eq!(db.schema_version().unwrap() as usize, MIGRATIONS.len());
    }

    #[test]
    fn reopening_file_database_is_idempotent() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("nested").join("medlink.db");

        {
            let db = Database::open(&path).expect("first open should succeed");
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO audit_log (at, actor, action, entity) VALUES ('t', 'a', 'x', 'y')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        }

        let db = Database::open(&path).expect("second open should succeed");
        let rows: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM audit_log", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(rows, 1, "data should survive reopening");
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();

        let result: MedLinkResult<()> = db.transaction(|tx| {
            tx.execute(
                "INSERT INTO audit_log (at, actor, action, entity) VALUES ('t', 'a', 'x', 'y')",
                [],
            )?;
            Err(MedLinkError::InvalidInput("abort".into()))
        });
        assert!(result.is_err());

        let rows: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM audit_log", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(rows, 0, "insert should have been rolled back");
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO patient_cards (card_uid, patient_national_id, issued_at)
                     VALUES ('04A21B7F', '29001011234567', 't')",
                    [],
                )?;
                Ok(())
            })
            .expect_err("orphan card should be rejected");
        assert!(matches!(err, MedLinkError::Database(_)));
    }
}
