//! Clinical visits (encounters) between a patient and, optionally, a doctor.

use crate::actor::Actor;
use crate::db::Database;
use crate::error::{MedLinkError, MedLinkResult};
use crate::repositories::audit::{self, actions};
use crate::repositories::helpers::{clean, parse_column, Page, QueryFilter};
use crate::repositories::{patients, users};
use chrono::{DateTime, NaiveDate, Utc};
use medlink_types::{NationalId, NonEmptyText, Role};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

const ENTITY: &str = "visit";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Visit {
    pub id: i64,
    pub patient_national_id: NationalId,
    /// `None` when no doctor was recorded or the doctor's account has since been deleted.
    pub doctor_id: Option<i64>,
    pub visit_date: DateTime<Utc>,
    pub reason: String,
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
    pub notes: Option<String>,
    pub follow_up: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewVisit {
    pub patient_national_id: NationalId,
    #[serde(default)]
    pub doctor_id: Option<i64>,
    /// Defaults to now.
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

impl NewVisit {
    pub fn new(patient_national_id: NationalId, reason: NonEmptyText) -> Self {
        Self {
            patient_national_id,
            doctor_id: None,
            visit_date: None,
            reason,
            diagnosis: None,
            treatment: None,
            notes: None,
            follow_up: None,
        }
    }
}

/// Partial update; blank text clears a field.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct VisitUpdate {
    #[serde(default)]
    pub visit_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<NonEmptyText>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub treatment: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub follow_up: Option<NaiveDate>,
}

/// Search criteria; `from` and `to` are inclusive calendar dates.
#[derive(Clone, Debug, Default, Deserialize)]
#[cfg_attr(
    feature = "openapi",
    derive(utoipa::IntoParams),
    into_params(parameter_in = Query)
)]
pub struct VisitFilter {
    pub patient: Option<NationalId>,
    pub doctor_id: Option<i64>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<Visit> {
    Ok(Visit {
        id: row.get("id")?,
        patient_national_id: parse_column(row, "patient_national_id")?,
        doctor_id: row.get("doctor_id")?,
        visit_date: row.get("visit_date")?,
        reason: row.get("reason")?,
        diagnosis: row.get("diagnosis")?,
        treatment: row.get("treatment")?,
        notes: row.get("notes")?,
        follow_up: row.get("follow_up")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn require(conn: &Connection, id: i64) -> MedLinkResult<Visit> {
    conn.query_row("SELECT * FROM visits WHERE id = ?1", params![id], map_row)
        .optional()?
        .ok_or_else(|| MedLinkError::not_found(ENTITY, id))
}

pub(crate) fn list_for_patient(
    conn: &Connection,
    national_id: &NationalId,
) -> MedLinkResult<Vec<Visit>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM visits WHERE patient_national_id = ?1 ORDER BY visit_date DESC, id DESC",
    )?;
    let rows = stmt
        .query_map(params![national_id.as_str()], map_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Checks that an optional visit reference points at a visit of the same patient.
pub(crate) fn ensure_belongs_to(
    conn: &Connection,
    visit_id: Option<i64>,
    national_id: &NationalId,
) -> MedLinkResult<()> {
    if let Some(visit_id) = visit_id {
        let visit = require(conn, visit_id)?;
        if &visit.patient_national_id != national_id {
            return Err(MedLinkError::InvalidInput(format!(
                "visit {visit_id} belongs to a different patient"
            )));
        }
    }
    Ok(())
}

fn ensure_doctor(conn: &Connection, doctor_id: i64) -> MedLinkResult<()> {
    let user = users::require(conn, doctor_id)?;
    if user.role != Role::Doctor {
        return Err(MedLinkError::InvalidInput(format!(
            "user {doctor_id} is not a doctor"
        )));
    }
    Ok(())
}

pub(crate) fn insert(conn: &Connection, actor: &Actor, new: NewVisit) -> MedLinkResult<Visit> {
    patients::require(conn, &new.patient_national_id)?;
    if let Some(doctor_id) = new.doctor_id {
        ensure_doctor(conn, doctor_id)?;
    }

    let created_at = Utc::now();
    let mut visit = Visit {
        id: 0,
        patient_national_id: new.patient_national_id,
        doctor_id: new.doctor_id,
        visit_date: new.visit_date.unwrap_or(created_at),
        reason: new.reason.into_inner(),
        diagnosis: clean(new.diagnosis),
        treatment: clean(new.treatment),
        notes: clean(new.notes),
        follow_up: new.follow_up,
        created_at,
    };

    conn.execute(
        "INSERT INTO visits (patient_national_id, doctor_id, visit_date, reason, diagnosis,
                             treatment, notes, follow_up, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            visit.patient_national_id.as_str(),
            visit.doctor_id,
            visit.visit_date,
            visit.reason,
            visit.diagnosis,
            visit.treatment,
            visit.notes,
            visit.follow_up,
            visit.created_at,
        ],
    )?;
    visit.id = conn.last_insert_rowid();

    audit::record(
        conn,
        actor,
        actions::CREATE,
        ENTITY,
        Some(&visit.id.to_string()),
        Some(visit.patient_national_id.as_str()),
    )?;

    Ok(visit)
}

/// Manager for visits.
#[derive(Clone, Debug)]
pub struct VisitService {
    db: Database,
}

impl VisitService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, id: i64) -> MedLinkResult<Visit> {
        self.db.with_conn(|conn| require(conn, id))
    }

    /// Searches visits, newest first.
    pub fn search(&self, filter: &VisitFilter, page: &Page) -> MedLinkResult<Vec<Visit>> {
        let mut query = QueryFilter::new();
        if let Some(patient) = &filter.patient {
            query.push("patient_national_id = ?", patient.as_str().to_string());
        }
        if let Some(doctor_id) = filter.doctor_id {
            query.push("doctor_id = ?", doctor_id);
        }
        if let Some(from) = filter.from {
            query.push("date(visit_date) >= ?", from);
        }
        if let Some(to) = filter.to {
            query.push("date(visit_date) <= ?", to);
        }
        let (clause, values) = query.finish("visit_date DESC, id DESC", page);

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT * FROM visits{clause}"))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Records a visit.
    ///
    /// # Errors
    ///
    /// Returns `MedLinkError` if:
    /// - the patient does not exist
    /// - `doctor_id` is given but is not an existing user with the doctor role
    pub fn add(&self, actor: &Actor, new: NewVisit) -> MedLinkResult<Visit> {
        self.db.transaction(|tx| insert(tx, actor, new))
    }

    pub fn update(&self, actor: &Actor, id: i64, update: VisitUpdate) -> MedLinkResult<Visit> {
        self.db.transaction(|tx| {
            let mut visit = require(tx, id)?;
            let mut changed = Vec::new();

            if let Some(date) = update.visit_date {
                visit.visit_date = date;
                changed.push("visit_date");
            }
            if let Some(reason) = update.reason {
                visit.reason = reason.into_inner();
                changed.push("reason");
            }
            if update.diagnosis.is_some() {
                visit.diagnosis = clean(update.diagnosis);
                changed.push("diagnosis");
            }
            if update.treatment.is_some() {
                visit.treatment = clean(update.treatment);
                changed.push("treatment");
            }
            if update.notes.is_some() {
                visit.notes = clean(update.notes);
                changed.push("notes");
            }
            if update.follow_up.is_some() {
                visit.follow_up = update.follow_up;
                changed.push("follow_up");
            }
            if changed.is_empty() {
                return Ok(visit);
            }

            tx.execute(
                "UPDATE visits SET visit_date = ?2, reason = ?3, diagnosis = ?4, treatment = ?5,
                                   notes = ?6, follow_up = ?7
                 WHERE id = ?1",
                params![
                    visit.id,
                    visit.visit_date,
                    visit.reason,
                    visit.diagnosis,
                    visit.treatment,
                    visit.notes,
                    visit.follow_up,
                ],
            )?;
            audit::record(
                tx,
                actor,
                actions::UPDATE,
                ENTITY,
                Some(&id.to_string()),
                Some(&changed.join(",")),
            )?;
            Ok(visit)
        })
    }

    /// Deletes a visit. Lab results and imaging linked to it are kept and unlinked.
    pub fn delete(&self, actor: &Actor, id: i64) -> MedLinkResult<()> {
        self.db.transaction(|tx| {
            let removed = tx.execute("DELETE FROM visits WHERE id = ?1", params![id])?;
            if removed == 0 {
                return Err(MedLinkError::not_found(ENTITY, id));
            }
            audit::record(tx, actor, actions::DELETE, ENTITY, Some(&id.to_string()), None)
        })
    }
}
