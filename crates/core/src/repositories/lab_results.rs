//! Laboratory test results.

use crate::actor::Actor;
use crate::db::Database;
use crate::error::{MedLinkError, MedLinkResult};
use crate::repositories::audit::{self, actions};
use crate::repositories::helpers::{clean, like_escape, parse_column, Page, QueryFilter};
use crate::repositories::{patients, visits};
use chrono::{DateTime, NaiveDate, Utc};
use medlink_types::{NationalId, NonEmptyText, ParseEnumError};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

const ENTITY: &str = "lab_result";

/// Interpretation of a lab result against its reference range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum LabStatus {
    Normal,
    Abnormal,
    Critical,
    Pending,
}

impl LabStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LabStatus::Normal => "normal",
            LabStatus::Abnormal => "abnormal",
            LabStatus::Critical => "critical",
            LabStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for LabStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LabStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(LabStatus::Normal),
            "abnormal" => Ok(LabStatus::Abnormal),
            "critical" => Ok(LabStatus::Critical),
            "pending" => Ok(LabStatus::Pending),
            _ => Err(ParseEnumError {
                kind: "lab status",
                value: s.to_owned(),
            }),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LabResult {
    pub id: i64,
    pub patient_national_id: NationalId,
    pub visit_id: Option<i64>,
    pub test_name: String,
    pub result_value: String,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
    pub status: LabStatus,
    pub performed_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewLabResult {
    pub patient_national_id: NationalId,
    #[serde(default)]
    pub visit_id: Option<i64>,
    pub test_name: NonEmptyText,
    pub result_value: NonEmptyText,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub reference_range: Option<String>,
    /// Defaults to `pending`.
    #[serde(default)]
    pub status: Option<LabStatus>,
    /// Defaults to now.
    #[serde(default)]
    pub performed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewLabResult {
    pub fn new(
        patient_national_id: NationalId,
        test_name: NonEmptyText,
        result_value: NonEmptyText,
    ) -> Self {
        Self {
            patient_national_id,
            visit_id: None,
            test_name,
            result_value,
            unit: None,
            reference_range: None,
            status: None,
            performed_at: None,
            notes: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LabResultUpdate {
    #[serde(default)]
    pub result_value: Option<NonEmptyText>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub reference_range: Option<String>,
    #[serde(default)]
    pub status: Option<LabStatus>,
    #[serde(default)]
    pub performed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[cfg_attr(
    feature = "openapi",
    derive(utoipa::IntoParams),
    into_params(parameter_in = Query)
)]
pub struct LabFilter {
    pub patient: Option<NationalId>,
    /// Case-insensitive substring of the test name.
    pub test_name: Option<String>,
    pub status: Option<LabStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<LabResult> {
    Ok(LabResult {
        id: row.get("id")?,
        patient_national_id: parse_column(row, "patient_national_id")?,
        visit_id: row.get("visit_id")?,
        test_name: row.get("test_name")?,
        result_value: row.get("result_value")?,
        unit: row.get("unit")?,
        reference_range: row.get("reference_range")?,
        status: parse_column(row, "status")?,
        performed_at: row.get("performed_at")?,
        notes: row.get("notes")?,
        created_at: row.get("created_at")?,
    })
}

fn require(conn: &Connection, id: i64) -> MedLinkResult<LabResult> {
    conn.query_row("SELECT * FROM lab_results WHERE id = ?1", params![id], map_row)
        .optional()?
        .ok_or_else(|| MedLinkError::not_found(ENTITY, id))
}

pub(crate) fn list_for_patient(
    conn: &Connection,
    national_id: &NationalId,
) -> MedLinkResult<Vec<LabResult>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM lab_results WHERE patient_national_id = ?1
         ORDER BY performed_at DESC, id DESC",
    )?;
    let rows = stmt
        .query_map(params![national_id.as_str()], map_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn insert(
    conn: &Connection,
    actor: &Actor,
    new: NewLabResult,
) -> MedLinkResult<LabResult> {
    patients::require(conn, &new.patient_national_id)?;
    visits::ensure_belongs_to(conn, new.visit_id, &new.patient_national_id)?;

    let created_at = Utc::now();
    let mut result = LabResult {
        id: 0,
        patient_national_id: new.patient_national_id,
        visit_id: new.visit_id,
        test_name: new.test_name.into_inner(),
        result_value: new.result_value.into_inner(),
        unit: clean(new.unit),
        reference_range: clean(new.reference_range),
        status: new.status.unwrap_or(LabStatus::Pending),
        performed_at: new.performed_at.unwrap_or(created_at),
        notes: clean(new.notes),
        created_at,
    };

    conn.execute(
        "INSERT INTO lab_results (patient_national_id, visit_id, test_name, result_value, unit,
                                  reference_range, status, performed_at, notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            result.patient_national_id.as_str(),
            result.visit_id,
            result.test_name,
            result.result_value,
            result.unit,
            result.reference_range,
            result.status.as_str(),
            result.performed_at,
            result.notes,
            result.created_at,
        ],
    )?;
    result.id = conn.last_insert_rowid();

    audit::record(
        conn,
        actor,
        actions::CREATE,
        ENTITY,
        Some(&result.id.to_string()),
        Some(result.patient_national_id.as_str()),
    )?;

    Ok(result)
}

/// Manager for lab results.
#[derive(Clone, Debug)]
pub struct LabResultService {
    db: Database,
}

impl LabResultService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, id: i64) -> MedLinkResult<LabResult> {
        self.db.with_conn(|conn| require(conn, id))
    }

    /// Searches results, most recently performed first.
    pub fn search(&self, filter: &LabFilter, page: &Page) -> MedLinkResult<Vec<LabResult>> {
        let mut query = QueryFilter::new();
        if let Some(patient) = &filter.patient {
            query.push("patient_national_id = ?", patient.as_str().to_string());
        }
        if let Some(test_name) = clean(filter.test_name.clone()) {
            query.push("test_name LIKE '%' || ? || '%' ESCAPE '\\'", like_escape(&test_name));
        }
        if let Some(status) = filter.status {
            query.push("status = ?", status.as_str());
        }
        if let Some(from) = filter.from {
            query.push("date(performed_at) >= ?", from);
        }
        if let Some(to) = filter.to {
            query.push("date(performed_at) <= ?", to);
        }
        let (clause, values) = query.finish("performed_at DESC, id DESC", page);

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT * FROM lab_results{clause}"))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Records a result.
    ///
    /// # Errors
    ///
    /// Returns `MedLinkError` if the patient does not exist or `visit_id` refers to a visit of a
    /// different patient.
    pub fn add(&self, actor: &Actor, new: NewLabResult) -> MedLinkResult<LabResult> {
        let result = self.db.transaction(|tx| insert(tx, actor, new))?;
        if result.status == LabStatus::Critical {
            tracing::warn!(
                "critical {} result recorded for patient {}",
                result.test_name,
                result.patient_national_id
            );
        }
        Ok(result)
    }

    pub fn update(
        &self,
        actor: &Actor,
        id: i64,
        update: LabResultUpdate,
    ) -> MedLinkResult<LabResult> {
        self.db.transaction(|tx| {
            let mut result = require(tx, id)?;
            let mut changed = Vec::new();

            if let Some(value) = update.result_value {
                result.result_value = value.into_inner();
                changed.push("result_value");
            }
            if update.unit.is_some() {
                result.unit = clean(update.unit);
                changed.push("unit");
            }
            if update.reference_range.is_some() {
                result.reference_range = clean(update.reference_range);
                changed.push("reference_range");
            }
            if let Some(status) = update.status {
                result.status = status;
                changed.push("status");
            }
            if let Some(performed_at) = update.performed_at {
                result.performed_at = performed_at;
                changed.push("performed_at");
            }
            if update.notes.is_some() {
                result.notes = clean(update.notes);
                changed.push("notes");
            }
            if changed.is_empty() {
                return Ok(result);
            }

            tx.execute(
                "UPDATE lab_results SET result_value = ?2, unit = ?3, reference_range = ?4,
                                        status = ?5, performed_at = ?6, notes = ?7
                 WHERE id = ?1",
                params![
                    result.id,
                    result.result_value,
                    result.unit,
                    result.reference_range,
                    result.status.as_str(),
                    result.performed_at,
                    result.notes,
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
            Ok(result)
        })
    }

    pub fn delete(&self, actor: &Actor, id: i64) -> MedLinkResult<()> {
        self.db.transaction(|tx| {
            let removed = tx.execute("DELETE FROM lab_results WHERE id = ?1", params![id])?;
            if removed == 0 {
                return Err(MedLinkError::not_found(ENTITY, id));
            }
            audit::record(tx, actor, actions::DELETE, ENTITY, Some(&id.to_string()), None)
        })
    }
}
