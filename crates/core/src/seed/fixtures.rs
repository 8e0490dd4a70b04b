//! JSON fixture import.
//!
//! A fixture document holds one array per entity kind:
//!
//! ```json
//! {
//!   "patients": [{ "national_id": "29001011234567", "full_name": "Mona Adel" }],
//!   "doctors": [{ "username": "dr.salma", "password": "initial-pass", "full_name": "Salma Nabil" }],
//!   "visits": [{ "patient_national_id": "29001011234567", "doctor_username": "dr.salma",
//!                "visit_date": "2024-01-05T09:00:00Z", "reason": "Cough" }],
//!   "lab_results": [],
//!   "imaging": [],
//!   "patient_cards": [{ "card_uid": "04A21B7F", "national_id": "29001011234567" }],
//!   "doctor_cards": [{ "card_uid": "04112233445566", "username": "dr.salma" }]
//! }
//! ```
//!
//! Every array is optional. Rows are decoded one at a time, so a malformed row is skipped without
//! losing the rest of the document. Kinds are imported in dependency order, each in its own
//! transaction, and every row runs inside a savepoint so that a rejected row leaves no partial
//! writes behind.

use crate::actor::Actor;
use crate::auth::hash_password;
use crate::db::Database;
use crate::error::{MedLinkError, MedLinkResult};
use crate::repositories::audit::{self, actions};
use crate::repositories::cards;
use crate::repositories::imaging::{self, NewImagingStudy};
use crate::repositories::lab_results::{self, NewLabResult};
use crate::repositories::patients::{self, NewPatient};
use crate::repositories::users::{self, NewUser};
use crate::repositories::visits::{self, NewVisit};
use chrono::{DateTime, NaiveDate, Utc};
use medlink_types::{CardUid, NationalId, NonEmptyText, Role};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

// ============================================================================
// DOCUMENT
// ============================================================================

/// A fixture document. Rows stay as raw JSON until import so each can fail on its own.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FixtureSet {
    #[serde(default)]
    pub patients: Vec<Value>,
    #[serde(default)]
    pub doctors: Vec<Value>,
    #[serde(default)]
    pub visits: Vec<Value>,
    #[serde(default)]
    pub lab_results: Vec<Value>,
    #[serde(default)]
    pub imaging: Vec<Value>,
    #[serde(default)]
    pub patient_cards: Vec<Value>,
    #[serde(default)]
    pub doctor_cards: Vec<Value>,
}

/// Staff account row. The password is plaintext and hashed on import.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixtureDoctor {
    pub username: String,
    pub password: String,
    pub full_name: NonEmptyText,
    #[serde(default = "default_staff_role")]
    pub role: Role,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

fn default_staff_role() -> Role {
    Role::Doctor
}

/// Visit row. Doctors are referenced by username because ids differ between systems.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixtureVisit {
    pub patient_national_id: NationalId,
    #[serde(default)]
    pub doctor_username: Option<String>,
    #[serde(default)]
    pub visit_date: Option<DateTime<Utc>>,
    pub reason: NonEmptyText,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub treatment: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub follow_up: Option<NaiveDate>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixturePatientCard {
    pub card_uid: CardUid,
    pub national_id: NationalId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixtureDoctorCard {
    pub card_uid: CardUid,
    pub username: String,
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ImportCount {
    pub inserted: usize,
    pub skipped: usize,
}

/// Inserted and skipped row counts per entity kind.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ImportReport {
    pub patients: ImportCount,
    pub doctors: ImportCount,
    pub visits: ImportCount,
    pub lab_results: ImportCount,
    pub imaging: ImportCount,
    pub patient_cards: ImportCount,
    pub doctor_cards: ImportCount,
}

impl ImportReport {
    fn counts(&self) -> [(&'static str, ImportCount); 7] {
        [
            ("patients", self.patients),
            ("doctors", self.doctors),
            ("visits", self.visits),
            ("lab_results", self.lab_results),
            ("imaging", self.imaging),
            ("patient_cards", self.patient_cards),
            ("doctor_cards", self.doctor_cards),
        ]
    }

    pub fn total_inserted(&self) -> usize {
        self.counts().iter().map(|(_, c)| c.inserted).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.counts().iter().map(|(_, c)| c.skipped).sum()
    }

    /// One line such as `patients=3/4 doctors=1/1 ...` (inserted / seen).
    pub fn summary(&self) -> String {
        self.counts()
            .iter()
            .map(|(kind, c)| format!("{kind}={}/{}", c.inserted, c.inserted + c.skipped))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============================================================================
// IMPORT
// ============================================================================

/// Reads and parses a fixture document.
///
/// # Errors
///
/// Returns `MedLinkError::FileRead` or `MedLinkError::Deserialization` if the file cannot be
/// read or is not a JSON object of arrays.
pub fn load_fixtures(path: &Path) -> MedLinkResult<FixtureSet> {
    let raw = fs::read_to_string(path).map_err(MedLinkError::FileRead)?;
    let set: FixtureSet = serde_json::from_str(&raw).map_err(MedLinkError::Deserialization)?;
    tracing::info!("loaded fixtures from {}", path.display());
    Ok(set)
}

/// Runs `f` inside a savepoint, undoing its writes if it fails.
fn within_savepoint<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> MedLinkResult<T>,
) -> MedLinkResult<T> {
    conn.execute_batch("SAVEPOINT fixture_row")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("RELEASE fixture_row")?;
            Ok(value)
        }
        Err(e) => {
            conn.execute_batch("ROLLBACK TO fixture_row; RELEASE fixture_row")?;
            Err(e)
        }
    }
}

/// Imports one kind of rows in a single transaction.
///
/// Rows that fail to decode or are rejected by validation are skipped with a warning. System
/// failures (database, I/O) abort the kind and are returned.
fn import_kind<T, F>(
    db: &Database,
    kind: &str,
    rows: &[Value],
    mut insert: F,
) -> MedLinkResult<ImportCount>
where
    T: DeserializeOwned,
    F: FnMut(&Connection, T) -> MedLinkResult<()>,
{
    if rows.is_empty() {
        return Ok(ImportCount::default());
    }

    db.transaction(|tx| {
        let mut count = ImportCount::default();
        for (index, raw) in rows.iter().enumerate() {
            let row = match T::deserialize(raw) {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!("skipping {} #{}: {}", kind, index, e);
                    count.skipped += 1;
                    continue;
                }
            };
            match within_savepoint(tx, |conn| insert(conn, row)) {
                Ok(()) => count.inserted += 1,
                Err(e) if e.is_client_error() => {
                    tracing::warn!("skipping {} #{}: {}", kind, index, e);
                    count.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(count)
    })
}

fn user_id_for(conn: &Connection, username: &str) -> MedLinkResult<i64> {
    users::fetch_by_username(conn, username.trim())?
        .map(|user| user.id)
        .ok_or_else(|| MedLinkError::not_found("user", username))
}

/// Imports a fixture document.
///
/// Kinds are processed in dependency order: patients, staff, visits, lab results, imaging, then
/// cards. Rows that already exist are counted as skipped, so importing the same document twice
/// is harmless.
///
/// # Errors
///
/// Returns `MedLinkError` only for system failures; invalid rows never fail the import.
pub fn import_fixtures(
    db: &Database,
    set: &FixtureSet,
    actor: &Actor,
) -> MedLinkResult<ImportReport> {
    let mut report = ImportReport::default();

    report.patients = import_kind(db, "patient", &set.patients, |conn, row: NewPatient| {
        patients::insert(conn, actor, row).map(drop)
    })?;

    report.doctors = import_kind(db, "doctor", &set.doctors, |conn, row: FixtureDoctor| {
        if row.role == Role::Patient {
            return Err(MedLinkError::InvalidInput(
                "staff fixtures cannot create patient accounts".into(),
            ));
        }
        let password_hash = hash_password(&row.password);
        let new = NewUser {
            username: row.username,
            password: row.password,
            full_name: row.full_name,
            role: row.role,
            specialty: row.specialty,
            phone: row.phone,
            email: row.email,
            patient_national_id: None,
        };
        users::insert(conn, actor, new, &password_hash).map(drop)
    })?;

    report.visits = import_kind(db, "visit", &set.visits, |conn, row: FixtureVisit| {
        let doctor_id = row
            .doctor_username
            .as_deref()
            .map(|username| user_id_for(conn, username))
            .transpose()?;
        let new = NewVisit {
            patient_national_id: row.patient_national_id,
            doctor_id,
            visit_date: row.visit_date,
            reason: row.reason,
            diagnosis: row.diagnosis,
            treatment: row.treatment,
            notes: row.notes,
            follow_up: row.follow_up,
        };
        visits::insert(conn, actor, new).map(drop)
    })?;

    report.lab_results = import_kind(
        db,
        "lab result",
        &set.lab_results,
        |conn, row: NewLabResult| lab_results::insert(conn, actor, row).map(drop),
    )?;

    report.imaging = import_kind(
        db,
        "imaging study",
        &set.imaging,
        |conn, row: NewImagingStudy| imaging::insert(conn, actor, row).map(drop),
    )?;

    report.patient_cards = import_kind(
        db,
        "patient card",
        &set.patient_cards,
        |conn, row: FixturePatientCard| {
            cards::insert_patient_card(conn, actor, &row.card_uid, &row.national_id).map(drop)
        },
    )?;

    report.doctor_cards = import_kind(
        db,
        "doctor card",
        &set.doctor_cards,
        |conn, row: FixtureDoctorCard| {
            let user_id = user_id_for(conn, &row.username)?;
            cards::insert_doctor_card(conn, actor, &row.card_uid, user_id).map(drop)
        },
    )?;

    let summary = report.summary();
    db.transaction(|tx| {
        audit::record(tx, actor, actions::IMPORT, "fixtures", None, Some(&summary))
    })?;
    tracing::info!(
        "fixture import finished: {} inserted, {} skipped ({})",
        report.total_inserted(),
        report.total_skipped(),
        summary
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityResolver;
    use crate::repositories::helpers::Page;
    use crate::repositories::patients::PatientService;
    use crate::repositories::visits::{VisitFilter, VisitService};
    use serde_json::json;
    use tempfile::TempDir;

    fn document() -> FixtureSet {
        serde_json::from_value(json!({
            "patients": [
                { "national_id": "29001011234567", "full_name": "Mona Adel", "blood_type": "a+" },
                { "national_id": "30512250100171", "full_name": "Omar Khaled" },
                { "national_id": "123", "full_name": "Bad Id" },
                { "national_id": "29001011234567", "full_name": "Duplicate Mona" }
            ],
            "doctors": [
                { "username": "dr.salma", "password": "initial-pass", "full_name": "Salma Nabil",
                  "specialty": "Internal Medicine" },
                { "username": "x", "password": "initial-pass", "full_name": "Too Short" }
            ],
            "visits": [
                { "patient_national_id": "29001011234567", "doctor_username": "dr.salma",
                  "visit_date": "2024-01-05T09:00:00Z", "reason": "Cough" },
                { "patient_national_id": "30512250100171", "doctor_username": "dr.nobody",
                  "reason": "Fever" }
            ],
            "lab_results": [
                { "patient_national_id": "29001011234567", "test_name": "CBC",
                  "result_value": "normal", "status": "normal" },
                { "patient_national_id": "29001011234567", "test_name": "CBC",
                  "result_value": "x", "status": "weird" }
            ],
            "imaging": [
                { "patient_national_id": "30512250100171", "modality": "mri", "body_part": "Knee" }
            ],
            "patient_cards": [
                { "card_uid": "04:A2:1B:7F", "national_id": "29001011234567" }
            ],
            "doctor_cards": [
                { "card_uid": "04112233445566", "username": "dr.salma" },
                { "card_uid": "04A21B7F", "username": "dr.salma" }
            ]
        }))
        .expect("fixture document should parse")
    }

    #[test]
    fn import_counts_inserted_and_skipped_rows() {
        let db = Database::open_in_memory().unwrap();
        let report = import_fixtures(&db, &document(), &Actor::system()).expect("import");

        assert_eq!(report.patients, ImportCount { inserted: 2, skipped: 2 });
        assert_eq!(report.doctors, ImportCount { inserted: 1, skipped: 1 });
        assert_eq!(report.visits, ImportCount { inserted: 1, skipped: 1 });
        assert_eq!(report.lab_results, ImportCount { inserted: 1, skipped: 1 });
        assert_eq!(report.imaging, ImportCount { inserted: 1, skipped: 0 });
        assert_eq!(report.patient_cards, ImportCount { inserted: 1, skipped: 0 });
        assert_eq!(report.doctor_cards, ImportCount { inserted: 1, skipped: 1 });
        assert_eq!(report.total_inserted(), 8);
        assert_eq!(report.total_skipped(), 6);

        let mona = PatientService::new(db.clone())
            .get(&NationalId::parse("29001011234567").unwrap())
            .unwrap();
        assert_eq!(mona.full_name, "Mona Adel");
        assert_eq!(mona.blood_type.as_deref(), Some("A+"));

        let visits = VisitService::new(db.clone())
            .search(&VisitFilter::default(), &Page::default())
            .unwrap();
        assert_eq!(visits.len(), 1);
        assert!(visits[0].doctor_id.is_some());

        let identity = IdentityResolver::new(db)
            .resolve_card(&CardUid::parse("04112233445566").unwrap())
            .unwrap();
        assert_eq!(identity.subject(), "dr.salma");
    }

    #[test]
    fn reimport_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let first = import_fixtures(&db, &document(), &Actor::system()).unwrap();
        let second = import_fixtures(&db, &document(), &Actor::system()).unwrap();

        assert_eq!(second.patients.inserted, 0);
        assert_eq!(second.doctors.inserted, 0);
        assert_eq!(second.patient_cards.inserted, 0);
        assert_eq!(second.doctor_cards.inserted, 0);
        // Visits, lab results and imaging have no natural key and are inserted again.
        assert_eq!(second.visits.inserted, first.visits.inserted);
    }

    #[test]
    fn load_fixtures_from_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("fixtures.json");
        fs::write(
            &path,
            r#"{ "patients": [{ "national_id": "29001011234567", "full_name": "Mona" }] }"#,
        )
        .unwrap();

        let set = load_fixtures(&path).expect("load should succeed");
        assert_eq!(set.patients.len(), 1);
        assert!(set.visits.is_empty());

        fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(matches!(
            load_fixtures(&path),
            Err(MedLinkError::Deserialization(_))
        ));
        assert!(matches!(
            load_fixtures(&temp_dir.path().join("missing.json")),
            Err(MedLinkError::FileRead(_))
        ));
    }
}
