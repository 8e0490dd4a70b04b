//! Card and fingerprint → identity resolution.
//!
//! A scan at a terminal yields either a card UID or a fingerprint sensor slot. Resolution looks the
//! value up by primary key, checks that both the credential and its holder are active, and returns
//! who the holder is. Every attempt is written to the audit log whether it succeeds or not, so that
//! repeated scans of unknown or revoked cards are visible to administrators.

use crate::actor::Actor;
use crate::constants::FINGERPRINT_SLOTS;
use crate::db::Database;
use crate::error::{MedLinkError, MedLinkResult};
use crate::hardware::{CardReader, FingerprintSensor};
use crate::repositories::audit::{self, actions};
use crate::repositories::cards::{self, Holder};
use crate::repositories::helpers::parse_optional_column;
use crate::repositories::patients::{self, Patient};
use crate::repositories::users::{self, User};
use chrono::{DateTime, Utc};
use medlink_types::{CardUid, NationalId, Role};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// The principal behind a credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    /// An admin or doctor account.
    Staff(User),
    Patient(Patient),
}

impl Identity {
    /// Stable identifier: the username for staff, the national id for patients.
    pub fn subject(&self) -> &str {
        match self {
            Identity::Staff(user) => &user.username,
            Identity::Patient(patient) => patient.national_id.as_str(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Identity::Staff(user) => user.role,
            Identity::Patient(_) => Role::Patient,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Identity::Staff(user) => &user.full_name,
            Identity::Patient(patient) => &patient.full_name,
        }
    }

    /// National id of the patient this identity may see records for, if it is a patient.
    pub fn patient_national_id(&self) -> Option<&NationalId> {
        match self {
            Identity::Staff(_) => None,
            Identity::Patient(patient) => Some(&patient.national_id),
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.subject(), self.role())
    }
}

/// A fingerprint template slot bound to its holder.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FingerprintEnrolment {
    pub slot: u16,
    pub holder: Holder,
    pub enrolled_at: DateTime<Utc>,
}

fn map_enrolment(row: &Row<'_>) -> rusqlite::Result<FingerprintEnrolment> {
    let user_id: Option<i64> = row.get("user_id")?;
    let national_id: Option<NationalId> = parse_optional_column(row, "patient_national_id")?;
    let holder = match (user_id, national_id) {
        (Some(user_id), _) => Holder::Staff { user_id },
        (None, Some(national_id)) => Holder::Patient { national_id },
        // Excluded by the table's CHECK constraint.
        (None, None) => {
            return Err(rusqlite::Error::InvalidColumnType(
                0,
                "user_id".into(),
                rusqlite::types::Type::Null,
            ))
        }
    };
    Ok(FingerprintEnrolment {
        slot: row.get("slot")?,
        holder,
        enrolled_at: row.get("enrolled_at")?,
    })
}

fn fetch_enrolment(conn: &Connection, slot: u16) -> MedLinkResult<Option<FingerprintEnrolment>> {
    Ok(conn
        .query_row(
            "SELECT * FROM fingerprints WHERE slot = ?1",
            params![slot],
            map_enrolment,
        )
        .optional()?)
}

/// Resolves a holder to an identity, treating deactivated staff accounts as inactive.
fn identity_of(conn: &Connection, holder: &Holder) -> MedLinkResult<Identity> {
    match holder {
        Holder::Staff { user_id } => {
            let user = users::require(conn, *user_id)?;
            if !user.active {
                return Err(MedLinkError::InactiveCard);
            }
            Ok(Identity::Staff(user))
        }
        Holder::Patient { national_id } => {
            Ok(Identity::Patient(patients::require(conn, national_id)?))
        }
    }
}

/// Records the outcome of a scan and hands the outcome back to the caller.
fn audit_scan(
    conn: &Connection,
    action: &str,
    entity: &str,
    key: &str,
    outcome: MedLinkResult<Identity>,
) -> MedLinkResult<MedLinkResult<Identity>> {
    let (actor, detail) = match &outcome {
        Ok(identity) => (identity.actor(), "ok".to_string()),
        Err(e) => (
            Actor {
                subject: format!("{entity}:{key}"),
                role: None,
            },
            e.to_string(),
        ),
    };
    audit::record(conn, &actor, action, entity, Some(key), Some(&detail))?;
    Ok(outcome)
}

fn check_slot(slot: u16) -> MedLinkResult<()> {
    if slot >= FINGERPRINT_SLOTS {
        return Err(MedLinkError::InvalidInput(format!(
            "fingerprint slot must be below {FINGERPRINT_SLOTS}"
        )));
    }
    Ok(())
}

/// Resolves scanned credentials to identities and manages fingerprint enrolments.
#[derive(Clone, Debug)]
pub struct IdentityResolver {
    db: Database,
}

impl IdentityResolver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Resolves a card UID.
    ///
    /// Staff cards are checked before patient cards.
    ///
    /// # Errors
    ///
    /// - [`MedLinkError::UnknownCard`] if the UID is not registered
    /// - [`MedLinkError::InactiveCard`] if the card is revoked or its staff holder is deactivated
    pub fn resolve_card(&self, uid: &CardUid) -> MedLinkResult<Identity> {
        let outcome = self.db.transaction(|tx| {
            let outcome = match cards::lookup(tx, uid)? {
                None => Err(MedLinkError::UnknownCard),
                Some(card) if !card.active => Err(MedLinkError::InactiveCard),
                Some(card) => match identity_of(tx, &card.holder) {
                    Err(e @ MedLinkError::Database(_)) => return Err(e),
                    other => other,
                },
            };
            audit_scan(tx, actions::CARD_SCAN, "card", uid.as_str(), outcome)
        })?;

        match &outcome {
            Ok(identity) => tracing::info!(
                "card {} resolved to {} {}",
                uid,
                identity.role(),
                identity.subject()
            ),
            Err(e) => tracing::warn!("card {} rejected: {}", uid, e),
        }
        outcome
    }

    /// Reads one UID from `reader` and resolves it.
    pub fn scan_card(&self, reader: &mut impl CardReader) -> MedLinkResult<Identity> {
        let uid = reader.read_uid()?;
        self.resolve_card(&uid)
    }

    /// Resolves a matched fingerprint sensor slot.
    ///
    /// # Errors
    ///
    /// - [`MedLinkError::UnknownFingerprint`] if nothing is enrolled in `slot`
    /// - [`MedLinkError::InactiveCard`] if the staff holder is deactivated
    pub fn resolve_fingerprint(&self, slot: u16) -> MedLinkResult<Identity> {
        let key = slot.to_string();
        let outcome = self.db.transaction(|tx| {
            let outcome = match fetch_enrolment(tx, slot)? {
                None => Err(MedLinkError::UnknownFingerprint),
                Some(enrolment) => match identity_of(tx, &enrolment.holder) {
                    Err(e @ MedLinkError::Database(_)) => return Err(e),
                    other => other,
                },
            };
            audit_scan(tx, actions::FINGERPRINT_SCAN, "fingerprint", &key, outcome)
        })?;

        if let Err(e) = &outcome {
            tracing::warn!("fingerprint slot {} rejected: {}", slot, e);
        }
        outcome
    }

    /// Captures a finger on `sensor` and resolves the matched slot.
    pub fn scan_fingerprint(
        &self,
        sensor: &mut impl FingerprintSensor,
    ) -> MedLinkResult<Identity> {
        let slot = sensor.capture()?;
        self.resolve_fingerprint(slot)
    }

    pub fn get_fingerprint(&self, slot: u16) -> MedLinkResult<FingerprintEnrolment> {
        self.db.with_conn(|conn| {
            fetch_enrolment(conn, slot)?
                .ok_or_else(|| MedLinkError::not_found("fingerprint", slot))
        })
    }

    /// Binds a sensor slot to a staff account or patient.
    ///
    /// # Errors
    ///
    /// Returns `MedLinkError` if:
    /// - the slot is out of range
    /// - the slot is already enrolled ([`MedLinkError::Conflict`])
    /// - the holder does not exist
    /// - a staff holder is not an active doctor or admin
    pub fn enroll_fingerprint(
        &self,
        actor: &Actor,
        slot: u16,
        holder: Holder,
    ) -> MedLinkResult<FingerprintEnrolment> {
        check_slot(slot)?;
        self.db.transaction(|tx| {
            if fetch_enrolment(tx, slot)?.is_some() {
                return Err(MedLinkError::Conflict(format!(
                    "fingerprint slot {slot} is already enrolled"
                )));
            }

            let (user_id, national_id) = match &holder {
                Holder::Staff { user_id } => {
                    users::require_active_staff(tx, *user_id)?;
                    (Some(*user_id), None)
                }
                Holder::Patient { national_id } => {
                    patients::require(tx, national_id)?;
                    (None, Some(national_id.as_str()))
                }
            };

            let enrolment = FingerprintEnrolment {
                slot,
                holder: holder.clone(),
                enrolled_at: Utc::now(),
            };
            tx.execute(
                "INSERT INTO fingerprints (slot, user_id, patient_national_id, enrolled_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![slot, user_id, national_id, enrolment.enrolled_at],
            )?;
            audit::record(
                tx,
                actor,
                actions::ENROLL,
                "fingerprint",
                Some(&slot.to_string()),
                None,
            )?;
            Ok(enrolment)
        })
    }

    /// Frees a sensor slot.
    pub fn remove_fingerprint(&self, actor: &Actor, slot: u16) -> MedLinkResult<()> {
        self.db.transaction(|tx| {
            let removed = tx.execute("DELETE FROM fingerprints WHERE slot = ?1", params![slot])?;
            if removed == 0 {
                return Err(MedLinkError::not_found("fingerprint", slot));
            }
            audit::record(
                tx,
                actor,
                actions::DELETE,
                "fingerprint",
                Some(&slot.to_string()),
                None,
            )
        })
    }
}
