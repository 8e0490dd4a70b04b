//! Imaging studies (X-ray, CT, MRI, ...). Only the metadata and an optional path to the stored
//! image are kept here; image files themselves live outside the database.

use crate::actor::Actor;
use crate::db::Database;
use crate::error::{MedLinkError, MedLinkResult};
use crate::repositories::audit::{self, actions};
use crate::repositories::helpers::{clean, parse_column, Page, QueryFilter};
use crate::repositories::{patients, visits};
use chrono::{DateTime, NaiveDate, Utc};
use medlink_types::{NationalId, NonEmptyText, ParseEnumError};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

const ENTITY: &str = "imaging";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    XRay,
    Ct,
    Mri,
    Ultrasound,
    Mammography,
    Other,
}

impl Modality {
    pub const ALL: [Modality; 6] = [
        Modality::XRay,
        Modality::Ct,
        Modality::Mri,
        Modality::Ultrasound,
        Modality::Mammography,
        Modality::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::XRay => "xray",
            Modality::Ct => "ct",
            Modality::Mri => "mri",
            Modality::Ultrasound => "ultrasound",
            Modality::Mammography => "mammography",
            Modality::Other => "other",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = ParseEnumError;

    /// Accepts the canonical names plus the spellings found in legacy fixtures
    /// (`X-Ray`, `x_ray`, `US`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "xray" => Ok(Modality::XRay),
            "ct" => Ok(Modality::Ct),
            "mri" => Ok(Modality::Mri),
            "ultrasound" | "us" => Ok(Modality::Ultrasound),
            "mammography" => Ok(Modality::Mammography),
            "other" => Ok(Modality::Other),
            _ => Err(ParseEnumError {
                kind: "imaging modality",
                value: s.to_owned(),
            }),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ImagingStudy {
    pub id: i64,
    pub patient_national_id: NationalId,
    pub visit_id: Option<i64>,
    pub modality: Modality,
    pub body_part: String,
    pub findings: Option<String>,
    pub image_path: Option<String>,
    pub performed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewImagingStudy {
    pub patient_national_id: NationalId,
    #[serde(default)]
    pub visit_id: Option<i64>,
    pub modality: Modality,
    pub body_part: NonEmptyText,
    #[serde(default)]
    pub findings: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub performed_at: Option<DateTime<Utc>>,
}

impl NewImagingStudy {
    pub fn new(
        patient_national_id: NationalId,
        modality: Modality,
        body_part: NonEmptyText,
    ) -> Self {
        Self {
            patient_national_id,
            visit_id: None,
            modality,
            body_part,
            findings: None,
            image_path: None,
            performed_at: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ImagingUpdate {
    #[serde(default)]
    pub body_part: Option<NonEmptyText>,
    #[serde(default)]
    pub findings: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub performed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[cfg_attr(
    feature = "openapi",
    derive(utoipa::IntoParams),
    into_params(parameter_in = Query)
)]
pub struct ImagingFilter {
    pub patient: Option<NationalId>,
    pub modality: Option<Modality>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<ImagingStudy> {
    Ok(ImagingStudy {
        id: row.get("id")?,
        patient_national_id: parse_column(row, "patient_national_id")?,
        visit_id: row.get("visit_id")?,
        modality: parse_column(row, "modality")?,
        body_part: row.get("body_part")?,
        findings: row.get("findings")?,
        image_path: row.get("image_path")?,
        performed_at: row.get("performed_at")?,
        created_at: row.get("created_at")?,
    })
}

fn require(conn: &Connection, id: i64) -> MedLinkResult<ImagingStudy> {
    conn.query_row("SELECT * FROM imaging WHERE id = ?1", params![id], map_row)
        .optional()?
        .ok_or_else(|| MedLinkError::not_found(ENTITY, id))
}

pub(crate) fn list_for_patient(
    conn: &Connection,
    national_id: &NationalId,
) -> MedLinkResult<Vec<ImagingStudy>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM imaging WHERE patient_national_id = ?1 ORDER BY performed_at DESC, id DESC",
    )?;
    let rows = stmt
        .query_map(params![national_id.as_str()], map_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn insert(
    conn: &Connection,
    actor: &Actor,
    new: NewImagingStudy,
) -> MedLinkResult<ImagingStudy> {
    patients::require(conn, &new.patient_national_id)?;
    visits::ensure_belongs_to(conn, new.visit_id, &new.patient_national_id)?;

    let created_at = Utc::now();
    let mut study = ImagingStudy {
        id: 0,
        patient_national_id: new.patient_national_id,
        visit_id: new.visit_id,
        modality: new.modality,
        body_part: new.body_part.into_inner(),
        findings: clean(new.findings),
        image_path: clean(new.image_path),
        performed_at: new.performed_at.unwrap_or(created_at),
        created_at,
    };

    conn.execute(
        "INSERT INTO imaging (patient_national_id, visit_id, modality, body_part, findings,
                              image_path, performed_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            study.patient_national_id.as_str(),
            study.visit_id,
            study.modality.as_str(),
            study.body_part,
            study.findings,
            study.image_path,
            study.performed_at,
            study.created_at,
        ],
    )?;
    study.id = conn.last_insert_rowid();

    audit::record(
        conn,
        actor,
        actions::CREATE,
        ENTITY,
        Some(&study.id.to_string()),
        Some(study.patient_national_id.as_str()),
    )?;

    Ok(study)
}

/// Manager for imaging studies.
#[derive(Clone, Debug)]
pub struct ImagingService {
    db: Database,
}

impl ImagingService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, id: i64) -> MedLinkResult<ImagingStudy> {
        self.db.with_conn(|conn| require(conn, id))
    }

    pub fn search(&self, filter: &ImagingFilter, page: &Page) -> MedLinkResult<Vec<ImagingStudy>> {
        let mut query = QueryFilter::new();
        if let Some(patient) = &filter.patient {
            query.push("patient_national_id = ?", patient.as_str().to_string());
        }
        if let Some(modality) = filter.modality {
            query.push("modality = ?", modality.as_str());
        }
        if let Some(from) = filter.from {
            query.push("date(performed_at) >= ?", from);
        }
        if let Some(to) = filter.to {
            query.push("date(performed_at) <= ?", to);
        }
        let (clause, values) = query.finish("performed_at DESC, id DESC", page);

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT * FROM imaging{clause}"))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn add(&self, actor: &Actor, new: NewImagingStudy) -> MedLinkResult<ImagingStudy> {
        self.db.transaction(|tx| insert(tx, actor, new))
    }

    pub fn update(
        &self,
        actor: &Actor,
        id: i64,
        update: ImagingUpdate,
    ) -> MedLinkResult<ImagingStudy> {
        self.db.transaction(|tx| {
            let mut study = require(tx, id)?;
            let mut changed = Vec::new();

            if let Some(body_part) = update.body_part {
                study.body_part = body_part.into_inner();
                changed.push("body_part");
            }
            if update.findings.is_some() {
                study.findings = clean(update.findings);
                changed.push("findings");
            }
            if update.image_path.is_some() {
                study.image_path = clean(update.image_path);
                changed.push("image_path");
            }
            if let Some(performed_at) = update.performed_at {
                study.performed_at = performed_at;
                changed.push("performed_at");
            }
            if changed.is_empty() {
                return Ok(study);
            }

            tx.execute(
                "UPDATE imaging SET body_part = ?2, findings = ?3, image_path = ?4, performed_at = ?5
                 WHERE id = ?1",
                params![
                    study.id,
                    study.body_part,
                    study.findings,
                    study.image_path,
                    study.performed_at,
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
            Ok(study)
        })
    }

    pub fn delete(&self, actor: &Actor, id: i64) -> MedLinkResult<()> {
        self.db.transaction(|tx| {
            let removed = tx.execute("DELETE FROM imaging WHERE id = ?1", params![id])?;
            if removed == 0 {
                return Err(MedLinkError::not_found(ENTITY, id));
            }
            audit::record(tx, actor, actions::DELETE, ENTITY, Some(&id.to_string()), None)
        })
    }
}
