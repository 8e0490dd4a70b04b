//! Patient records.
//!
//! Patients are keyed by their [`NationalId`]. Birth date and gender are encoded in the national
//! id itself; when a caller omits them they are derived, and when a caller supplies them they must
//! agree with the id.
//!
//! Deleting a patient cascades to visits, lab results, imaging studies, cards, fingerprint
//! enrolments and any linked patient login.

use crate::actor::Actor;
use crate::db::Database;
use crate::error::{MedLinkError, MedLinkResult};
use crate::repositories::audit::{self, actions};
use crate::repositories::cards::{self, CardRecord};
use crate::repositories::helpers::{clean, like_escape, parse_column, Page, QueryFilter};
use crate::repositories::imaging::{self, ImagingStudy};
use crate::repositories::lab_results::{self, LabResult};
use crate::repositories::visits::{self, Visit};
use crate::validation::{normalise_blood_type, normalise_phone};
use chrono::{DateTime, NaiveDate, Utc};
use medlink_types::{Gender, NationalId, NonEmptyText};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

const ENTITY: &str = "patient";

// ============================================================================
// MODELS
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Patient {
    pub national_id: NationalId,
    pub full_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub blood_type: Option<String>,
    pub emergency_contact: Option<String>,
    pub allergies: Option<String>,
    pub chronic_conditions: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`PatientService::add`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewPatient {
    pub national_id: NationalId,
    pub full_name: NonEmptyText,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub blood_type: Option<String>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
    #[serde(default)]
    pub allergies: Option<String>,
    #[serde(default)]
    pub chronic_conditions: Option<String>,
}

impl NewPatient {
    /// A minimal new patient with everything optional left empty.
    pub fn new(national_id: NationalId, full_name: NonEmptyText) -> Self {
        Self {
            national_id,
            full_name,
            date_of_birth: None,
            gender: None,
            phone: None,
            address: None,
            blood_type: None,
            emergency_contact: None,
            allergies: None,
            chronic_conditions: None,
        }
    }
}

/// Partial update for [`PatientService::update`].
///
/// `None` leaves a field unchanged. For optional text fields, an empty string clears the value.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PatientUpdate {
    #[serde(default)]
    pub full_name: Option<NonEmptyText>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub blood_type: Option<String>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
    #[serde(default)]
    pub allergies: Option<String>,
    #[serde(default)]
    pub chronic_conditions: Option<String>,
}

/// Search criteria for [`PatientService::search`].
#[derive(Clone, Debug, Default, Deserialize)]
#[cfg_attr(
    feature = "openapi",
    derive(utoipa::IntoParams),
    into_params(parameter_in = Query)
)]
pub struct PatientFilter {
    /// Matches a name substring, a national id prefix or a phone prefix.
    pub query: Option<String>,
    pub gender: Option<Gender>,
    pub blood_type: Option<String>,
}

/// A patient together with their clinical history.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PatientRecord {
    pub patient: Patient,
    pub visits: Vec<Visit>,
    pub lab_results: Vec<LabResult>,
    pub imaging: Vec<ImagingStudy>,
    pub cards: Vec<CardRecord>,
}

// ============================================================================
// ROW ACCESS
// ============================================================================

fn map_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    Ok(Patient {
        national_id: parse_column(row, "national_id")?,
        full_name: row.get("full_name")?,
        date_of_birth: row.get("date_of_birth")?,
        gender: parse_column(row, "gender")?,
        phone: row.get("phone")?,
        address: row.get("address")?,
        blood_type: row.get("blood_type")?,
        emergency_contact: row.get("emergency_contact")?,
        allergies: row.get("allergies")?,
        chronic_conditions: row.get("chronic_conditions")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub(crate) fn fetch(conn: &Connection, national_id: &NationalId) -> MedLinkResult<Option<Patient>> {
    Ok(conn
        .query_row(
            "SELECT * FROM patients WHERE national_id = ?1",
            params![national_id.as_str()],
            map_row,
        )
        .optional()?)
}

pub(crate) fn require(conn: &Connection, national_id: &NationalId) -> MedLinkResult<Patient> {
    fetch(conn, national_id)?.ok_or_else(|| MedLinkError::not_found(ENTITY, national_id))
}

fn clean_phone(value: Option<String>) -> MedLinkResult<Option<String>> {
    clean(value).map(|p| normalise_phone(&p)).transpose()
}

fn clean_blood_type(value: Option<String>) -> MedLinkResult<Option<String>> {
    clean(value).map(|b| normalise_blood_type(&b)).transpose()
}

pub(crate) fn insert(conn: &Connection, actor: &Actor, new: NewPatient) -> MedLinkResult<Patient> {
    let derived_dob = new.national_id.birth_date();
    let derived_gender = new.national_id.gender();

    if let Some(dob) = new.date_of_birth {
        if dob != derived_dob {
            return Err(MedLinkError::InvalidInput(format!(
                "date of birth {dob} does not match national id (expected {derived_dob})"
            )));
        }
    }
    if let Some(gender) = new.gender {
        if gender != derived_gender {
            return Err(MedLinkError::InvalidInput(format!(
                "gender {gender} does not match national id (expected {derived_gender})"
            )));
        }
    }

    if fetch(conn, &new.national_id)?.is_some() {
        return Err(MedLinkError::Conflict(format!(
            "patient {} already exists",
            new.national_id
        )));
    }

    let now = Utc::now();
    let patient = Patient {
        national_id: new.national_id,
        full_name: new.full_name.into_inner(),
        date_of_birth: derived_dob,
        gender: derived_gender,
        phone: clean_phone(new.phone)?,
        address: clean(new.address),
        blood_type: clean_blood_type(new.blood_type)?,
        emergency_contact: clean(new.emergency_contact),
        allergies: clean(new.allergies),
        chronic_conditions: clean(new.chronic_conditions),
        created_at: now,
        updated_at: now,
    };

    conn.execute(
        "INSERT INTO patients (national_id, full_name, date_of_birth, gender, phone, address,
                               blood_type, emergency_contact, allergies, chronic_conditions,
                               created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            patient.national_id.as_str(),
            patient.full_name,
            patient.date_of_birth,
            patient.gender.as_str(),
            patient.phone,
            patient.address,
            patient.blood_type,
            patient.emergency_contact,
            patient.allergies,
            patient.chronic_conditions,
            patient.created_at,
            patient.updated_at,
        ],
    )?;

    audit::record(
        conn,
        actor,
        actions::CREATE,
        ENTITY,
        Some(patient.national_id.as_str()),
        None,
    )?;

    Ok(patient)
}

// ============================================================================
// PATIENT SERVICE
// ============================================================================

/// Manager for patient records.
#[derive(Clone, Debug)]
pub struct PatientService {
    db: Database,
}

impl PatientService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fetches one patient.
    ///
    /// # Errors
    ///
    /// Returns `MedLinkError::NotFound` if no patient has this national id.
    pub fn get(&self, national_id: &NationalId) -> MedLinkResult<Patient> {
        self.db.with_conn(|conn| require(conn, national_id))
    }

    /// Searches patients, ordered by name.
    pub fn search(&self, filter: &PatientFilter, page: &Page) -> MedLinkResult<Vec<Patient>> {
        let mut query = QueryFilter::new();
        if let Some(q) = clean(filter.query.clone()) {
            query.push(
                "(full_name LIKE '%' || ? || '%' ESCAPE '\\' \
                 OR national_id LIKE ? || '%' ESCAPE '\\' \
                 OR phone LIKE ? || '%' ESCAPE '\\')",
                like_escape(&q),
            );
        }
        if let Some(gender) = filter.gender {
            query.push("gender = ?", gender.as_str());
        }
        if let Some(blood_type) = clean(filter.blood_type.clone()) {
            query.push("blood_type = ?", normalise_blood_type(&blood_type)?);
        }
        let (clause, values) = query.finish("full_name COLLATE NOCASE, national_id", page);

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT * FROM patients{clause}"))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Registers a new patient.
    ///
    /// # Errors
    ///
    /// Returns `MedLinkError` if:
    /// - a patient with the same national id exists ([`MedLinkError::Conflict`])
    /// - a supplied birth date or gender disagrees with the national id
    /// - the phone number or blood type is malformed
    pub fn add(&self, actor: &Actor, new: NewPatient) -> MedLinkResult<Patient> {
        let patient = self.db.transaction(|tx| insert(tx, actor, new))?;
        tracing::info!("registered patient {}", patient.national_id);
        Ok(patient)
    }

    /// Applies a partial update and bumps `updated_at`.
    pub fn update(
        &self,
        actor: &Actor,
        national_id: &NationalId,
        update: PatientUpdate,
    ) -> MedLinkResult<Patient> {
        self.db.transaction(|tx| {
            let mut patient = require(tx, national_id)?;
            let mut changed = Vec::new();

            if let Some(name) = update.full_name {
                patient.full_name = name.into_inner();
                changed.push("full_name");
            }
            if update.phone.is_some() {
                patient.phone = clean_phone(update.phone)?;
                changed.push("phone");
            }
            if update.address.is_some() {
                patient.address = clean(update.address);
                changed.push("address");
            }
            if update.blood_type.is_some() {
                patient.blood_type = clean_blood_type(update.blood_type)?;
                changed.push("blood_type");
            }
            if update.emergency_contact.is_some() {
                patient.emergency_contact = clean(update.emergency_contact);
                changed.push("emergency_contact");
            }
            if update.allergies.is_some() {
                patient.allergies = clean(update.allergies);
                changed.push("allergies");
            }
            if update.chronic_conditions.is_some() {
                patient.chronic_conditions = clean(update.chronic_conditions);
                changed.push("chronic_conditions");
            }

            if changed.is_empty() {
                return Ok(patient);
            }
            patient.updated_at = Utc::now();

            tx.execute(
                "UPDATE patients
                 SET full_name = ?2, phone = ?3, address = ?4, blood_type = ?5,
                     emergency_contact = ?6, allergies = ?7, chronic_conditions = ?8,
                     updated_at = ?9
                 WHERE national_id = ?1",
                params![
                    patient.national_id.as_str(),
                    patient.full_name,
                    patient.phone,
                    patient.address,
                    patient.blood_type,
                    patient.emergency_contact,
                    patient.allergies,
                    patient.chronic_conditions,
                    patient.updated_at,
                ],
            )?;

            audit::record(
                tx,
                actor,
                actions::UPDATE,
                ENTITY,
                Some(national_id.as_str()),
                Some(&changed.join(",")),
            )?;

            Ok(patient)
        })
    }

    /// Deletes a patient and, through cascading foreign keys, their whole history.
    pub fn delete(&self, actor: &Actor, national_id: &NationalId) -> MedLinkResult<()> {
        self.db.transaction(|tx| {
            let removed = tx.execute(
                "DELETE FROM patients WHERE national_id = ?1",
                params![national_id.as_str()],
            )?;
            if removed == 0 {
                return Err(MedLinkError::not_found(ENTITY, national_id));
            }
            audit::record(tx, actor, actions::DELETE, ENTITY, Some(national_id.as_str()), None)
        })?;
        tracing::info!("deleted patient {}", national_id);
        Ok(())
    }

    /// Loads a patient with visits (newest first), lab results, imaging studies and active cards.
    pub fn summary(&self, national_id: &NationalId) -> MedLinkResult<PatientRecord> {
        self.db.with_conn(|conn| {
            let patient = require(conn, national_id)?;
            Ok(PatientRecord {
                visits: visits::list_for_patient(conn, national_id)?,
                lab_results: lab_results::list_for_patient(conn, national_id)?,
                imaging: imaging::list_for_patient(conn, national_id)?,
                cards: cards::list_for_patient(conn, national_id)?
                    .into_iter()
                    .filter(|card| card.active)
                    .collect(),
                patient,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::audit::{AuditFilter, AuditService};
    use medlink_types::Role;

    fn nid(value: &str) -> NationalId {
        NationalId::parse(value).expect("valid national id")
    }

    fn doctor() -> Actor {
        Actor::new("dr.salma", Role::Doctor)
    }

    fn new_patient(id: &str, name: &str) -> NewPatient {
        NewPatient::new(nid(id), NonEmptyText::new(name).unwrap())
    }

    #[test]
    fn add_derives_birth_date_and_gender() {
        let service = PatientService::new(Database::open_in_memory().unwrap());

        let patient = service
            .add(&doctor(), new_patient("29001011234567", "Mona Adel"))
            .expect("add should succeed");

        assert_eq!(patient.date_of_birth, NaiveDate::from_ymd_opt(1990, 1, 1).unwrap());
        assert_eq!(patient.gender, Gender::Female);

        let fetched = service.get(&patient.national_id).unwrap();
        assert_eq!(fetched, patient);
    }

    #[test]
    fn add_rejects_mismatched_birth_date() {
        let service = PatientService::new(Database::open_in_memory().unwrap());
        let mut new = new_patient("29001011234567", "Mona Adel");
        new.date_of_birth = NaiveDate::from_ymd_opt(1991, 1, 1);

        let err = service.add(&doctor(), new).expect_err("mismatch should fail");
        assert!(matches!(err, MedLinkError::InvalidInput(_)));
    }

    #[test]
    fn add_rejects_duplicate_national_id() {
        let service = PatientService::new(Database::open_in_memory().unwrap());
        service
            .add(&doctor(), new_patient("29001011234567", "Mona Adel"))
            .unwrap();

        let err = service
            .add(&doctor(), new_patient("29001011234567", "Someone Else"))
            .expect_err("duplicate should fail");
        assert!(matches!(err, MedLinkError::Conflict(_)));
    }

    #[test]
    fn add_normalises_phone_and_blood_type() {
        let service = PatientService::new(Database::open_in_memory().unwrap());
        let mut new = new_patient("29001011234567", "Mona Adel");
        new.phone = Some("0100 123 4567".into());
        new.blood_type = Some("o+".into());
        new.allergies = Some("   ".into());

        let patient = service.add(&doctor(), new).unwrap();
        assert_eq!(patient.phone.as_deref(), Some("01001234567"));
        assert_eq!(patient.blood_type.as_deref(), Some("O+"));
        assert_eq!(patient.allergies, None);
    }

    #[test]
    fn add_rejects_unknown_blood_type() {
        let service = PatientService::new(Database::open_in_memory().unwrap());
        let mut new = new_patient("29001011234567", "Mona Adel");
        new.blood_type = Some("Z".into());
        assert!(service.add(&doctor(), new).is_err());
    }

    #[test]
    fn get_missing_patient_is_not_found() {
        let service = PatientService::new(Database::open_in_memory().unwrap());
        let err = service.get(&nid("29001011234567")).expect_err("should be missing");
        assert!(matches!(err, MedLinkError::NotFound { entity: "patient", .. }));
    }

    #[test]
    fn search_matches_name_id_prefix_and_phone() {
        let service = PatientService::new(Database::open_in_memory().unwrap());
        let mut mona = new_patient("29001011234567", "Mona Adel");
        mona.phone = Some("01001234567".into());
        service.add(&doctor(), mona).unwrap();
        service
            .add(&doctor(), new_patient("30512250100171", "Omar Khaled"))
            .unwrap();

        let by_name = service
            .search(
                &PatientFilter {
                    query: Some("adel".into()),
                    ..Default::default()
                },
                &Page::default(),
            )
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].full_name, "Mona Adel");

        let by_id_prefix = service
            .search(
                &PatientFilter {
                    query: Some("305".into()),
                    ..Default::default()
                },
                &Page::default(),
            )
            .unwrap();
        assert_eq!(by_id_prefix.len(), 1);
        assert_eq!(by_id_prefix[0].full_name, "Omar Khaled");

        let by_phone = service
            .search(
                &PatientFilter {
                    query: Some("0100".into()),
                    ..Default::default()
                },
                &Page::default(),
            )
            .unwrap();
        assert_eq!(by_phone.len(), 1);

        let males = service
            .search(
                &PatientFilter {
                    gender: Some(Gender::Male),
                    ..Default::default()
                },
                &Page::default(),
            )
            .unwrap();
        assert_eq!(males.len(), 1);
        assert_eq!(males[0].full_name, "Omar Khaled");

        let all = service.search(&PatientFilter::default(), &Page::default()).unwrap();
        assert_eq!(
            all.iter().map(|p| p.full_name.as_str()).collect::<Vec<_>>(),
            vec!["Mona Adel", "Omar Khaled"]
        );
    }

    #[test]
    fn search_treats_wildcards_literally() {
        let service = PatientService::new(Database::open_in_memory().unwrap());
        service
            .add(&doctor(), new_patient("29001011234567", "Mona Adel"))
            .unwrap();

        let found = service
            .search(
                &PatientFilter {
                    query: Some("%".into()),
                    ..Default::default()
                },
                &Page::default(),
            )
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn update_changes_only_supplied_fields_and_clears_blank() {
        let db = Database::open_in_memory().unwrap();
        let service = PatientService::new(db.clone());
        let mut new = new_patient("29001011234567", "Mona Adel");
        new.address = Some("Mansoura".into());
        new.allergies = Some("Penicillin".into());
        let created = service.add(&doctor(), new).unwrap();

        let updated = service
            .update(
                &doctor(),
                &created.national_id,
                PatientUpdate {
                    full_name: Some(NonEmptyText::new("Mona Adel Hassan").unwrap()),
                    allergies: Some(String::new()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.full_name, "Mona Adel Hassan");
        assert_eq!(updated.address.as_deref(), Some("Mansoura"));
        assert_eq!(updated.allergies, None);
        assert!(updated.updated_at >= created.updated_at);

        let audit = AuditService::new(db)
            .search(
                &AuditFilter {
                    action: Some(actions::UPDATE.into()),
                    ..Default::default()
                },
                &Page::default(),
            )
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].details.as_deref(), Some("full_name,allergies"));
    }

    #[test]
    fn delete_removes_patient_and_is_audited() {
        let db = Database::open_in_memory().unwrap();
        let service = PatientService::new(db.clone());
        let patient = service
            .add(&doctor(), new_patient("29001011234567", "Mona Adel"))
            .unwrap();

        service.delete(&doctor(), &patient.national_id).unwrap();
        assert!(service.get(&patient.national_id).is_err());

        let err = service
            .delete(&doctor(), &patient.national_id)
            .expect_err("second delete should fail");
        assert!(matches!(err, MedLinkError::NotFound { .. }));

        let deletes = AuditService::new(db)
            .search(
                &AuditFilter {
                    action: Some(actions::DELETE.into()),
                    ..Default::default()
                },
                &Page::default(),
            )
            .unwrap();
        assert_eq!(deletes.len(), 1);
    }

    #[test]
    fn summary_collects_history_and_active_cards() {
        use crate::repositories::cards::CardService;
        use crate::repositories::lab_results::{LabResultService, NewLabResult};
        use crate::repositories::visits::{NewVisit, VisitService};
        use chrono::TimeZone;
        use medlink_types::CardUid;

        let db = Database::open_in_memory().unwrap();
        let actor = doctor();
        let patients = PatientService::new(db.clone());
        let mona = patients
            .add(&actor, new_patient("29001011234567", "Mona Adel"))
            .unwrap();
        let id = mona.national_id.clone();

        let visits = VisitService::new(db.clone());
        let mut first = NewVisit::new(id.clone(), NonEmptyText::new("Cough").unwrap());
        first.visit_date = Some(Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap());
        visits.add(&actor, first).unwrap();
        let mut second = NewVisit::new(id.clone(), NonEmptyText::new("Follow-up").unwrap());
        second.visit_date = Some(Utc.with_ymd_and_hms(2024, 2, 5, 9, 0, 0).unwrap());
        visits.add(&actor, second).unwrap();

        LabResultService::new(db.clone())
            .add(
                &actor,
                NewLabResult::new(
                    id.clone(),
                    NonEmptyText::new("CBC").unwrap(),
                    NonEmptyText::new("normal").unwrap(),
                ),
            )
            .unwrap();

        let cards = CardService::new(db.clone());
        let lost = CardUid::parse("04A21B7F").unwrap();
        let current = CardUid::parse("04A21B80").unwrap();
        cards.issue_patient_card(&actor, &lost, &id).unwrap();
        cards.issue_patient_card(&actor, &current, &id).unwrap();
        cards.revoke(&actor, &lost).unwrap();

        let record = patients.summary(&id).expect("summary should load");
        assert_eq!(record.patient, mona);
        assert_eq!(record.visits.len(), 2);
        assert_eq!(record.visits[0].reason, "Follow-up");
        assert_eq!(record.lab_results.len(), 1);
        assert!(record.imaging.is_empty());
        assert_eq!(record.cards.len(), 1);
        assert_eq!(record.cards[0].card_uid, current);
    }
}
