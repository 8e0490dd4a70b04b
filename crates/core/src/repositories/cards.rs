//! NFC card registry.
//!
//! Staff cards live in `doctor_cards` and patient cards in `patient_cards`, both keyed by the
//! canonical [`CardUid`]. A UID is registered in at most one of the two tables. Cards are revoked
//! rather than deleted when lost so that later scans of the same UID are recognised and refused.

use crate::actor::Actor;
use crate::db::Database;
use crate::error::{MedLinkError, MedLinkResult};
use crate::repositories::audit::{self, actions};
use crate::repositories::helpers::parse_column;
use crate::repositories::{patients, users};
use chrono::{DateTime, Utc};
use medlink_types::{CardUid, NationalId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

const ENTITY: &str = "card";

/// Owner of a card or fingerprint enrolment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Holder {
    /// An admin or doctor account.
    Staff { user_id: i64 },
    Patient { national_id: NationalId },
}

impl Holder {
    fn describe(&self) -> String {
        match self {
            Holder::Staff { user_id } => format!("user:{user_id}"),
            Holder::Patient { national_id } => format!("patient:{national_id}"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CardRecord {
    pub card_uid: CardUid,
    pub holder: Holder,
    pub active: bool,
    pub issued_at: DateTime<Utc>,
}

fn map_doctor_card(row: &Row<'_>) -> rusqlite::Result<CardRecord> {
    Ok(CardRecord {
        card_uid: parse_column(row, "card_uid")?,
        holder: Holder::Staff {
            user_id: row.get("user_id")?,
        },
        active: row.get("active")?,
        issued_at: row.get("issued_at")?,
    })
}

fn map_patient_card(row: &Row<'_>) -> rusqlite::Result<CardRecord> {
    Ok(CardRecord {
        card_uid: parse_column(row, "card_uid")?,
        holder: Holder::Patient {
            national_id: parse_column(row, "patient_national_id")?,
        },
        active: row.get("active")?,
        issued_at: row.get("issued_at")?,
    })
}

/// Looks a UID up by primary key, staff cards first.
pub(crate) fn lookup(conn: &Connection, uid: &CardUid) -> MedLinkResult<Option<CardRecord>> {
    let staff = conn
        .query_row(
            "SELECT * FROM doctor_cards WHERE card_uid = ?1",
            params![uid.as_str()],
            map_doctor_card,
        )
        .optional()?;
    if staff.is_some() {
        return Ok(staff);
    }
    Ok(conn
        .query_row(
            "SELECT * FROM patient_cards WHERE card_uid = ?1",
            params![uid.as_str()],
            map_patient_card,
        )
        .optional()?)
}

fn require(conn: &Connection, uid: &CardUid) -> MedLinkResult<CardRecord> {
    lookup(conn, uid)?.ok_or_else(|| MedLinkError::not_found(ENTITY, uid))
}

pub(crate) fn list_for_patient(
    conn: &Connection,
    national_id: &NationalId,
) -> MedLinkResult<Vec<CardRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM patient_cards WHERE patient_national_id = ?1 ORDER BY issued_at DESC",
    )?;
    let rows = stmt
        .query_map(params![national_id.as_str()], map_patient_card)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn ensure_unregistered(conn: &Connection, uid: &CardUid) -> MedLinkResult<()> {
    if lookup(conn, uid)?.is_some() {
        return Err(MedLinkError::Conflict(format!(
            "card {uid} is already registered"
        )));
    }
    Ok(())
}

pub(crate) fn insert_doctor_card(
    conn: &Connection,
    actor: &Actor,
    uid: &CardUid,
    user_id: i64,
) -> MedLinkResult<CardRecord> {
    users::require_active_staff(conn, user_id)?;
    ensure_unregistered(conn, uid)?;

    let card = CardRecord {
        card_uid: uid.clone(),
        holder: Holder::Staff { user_id },
        active: true,
        issued_at: Utc::now(),
    };
    conn.execute(
        "INSERT INTO doctor_cards (card_uid, user_id, active, issued_at) VALUES (?1, ?2, 1, ?3)",
        params![uid.as_str(), user_id, card.issued_at],
    )?;
    audit::record(
        conn,
        actor,
        actions::CREATE,
        ENTITY,
        Some(uid.as_str()),
        Some(&card.holder.describe()),
    )?;
    Ok(card)
}

pub(crate) fn insert_patient_card(
    conn: &Connection,
    actor: &Actor,
    uid: &CardUid,
    national_id: &NationalId,
) -> MedLinkResult<CardRecord> {
    patients::require(conn, national_id)?;
    ensure_unregistered(conn, uid)?;

    let card = CardRecord {
        card_uid: uid.clone(),
        holder: Holder::Patient {
            national_id: national_id.clone(),
        },
        active: true,
        issued_at: Utc::now(),
    };
    conn.execute(
        "INSERT INTO patient_cards (card_uid, patient_national_id, active, issued_at)
         VALUES (?1, ?2, 1, ?3)",
        params![uid.as_str(), national_id.as_str(), card.issued_at],
    )?;
    audit::record(
        conn,
        actor,
        actions::CREATE,
        ENTITY,
        Some(uid.as_str()),
        Some(&card.holder.describe()),
    )?;
    Ok(card)
}

/// Manager for NFC cards.
#[derive(Clone, Debug)]
pub struct CardService {
    db: Database,
}

impl CardService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, uid: &CardUid) -> MedLinkResult<CardRecord> {
        self.db.with_conn(|conn| require(conn, uid))
    }

    /// Issues a staff card.
    ///
    /// # Errors
    ///
    /// Returns `MedLinkError` if:
    /// - the user does not exist, is not a doctor or admin, or is deactivated
    /// - the UID is already registered to anyone ([`MedLinkError::Conflict`])
    pub fn issue_doctor_card(
        &self,
        actor: &Actor,
        uid: &CardUid,
        user_id: i64,
    ) -> MedLinkResult<CardRecord> {
        let card = self
            .db
            .transaction(|tx| insert_doctor_card(tx, actor, uid, user_id))?;
        tracing::info!("issued staff card {} to user {}", uid, user_id);
        Ok(card)
    }

    /// Issues a patient card. A patient may hold several cards, for example after a replacement.
    pub fn issue_patient_card(
        &self,
        actor: &Actor,
        uid: &CardUid,
        national_id: &NationalId,
    ) -> MedLinkResult<CardRecord> {
        let card = self
            .db
            .transaction(|tx| insert_patient_card(tx, actor, uid, national_id))?;
        tracing::info!("issued patient card {} to {}", uid, national_id);
        Ok(card)
    }

    fn set_active(
        &self,
        actor: &Actor,
        uid: &CardUid,
        active: bool,
    ) -> MedLinkResult<CardRecord> {
        self.db.transaction(|tx| {
            let mut card = require(tx, uid)?;
            let table = match card.holder {
                Holder::Staff { .. } => "doctor_cards",
                Holder::Patient { .. } => "patient_cards",
            };
            tx.execute(
                &format!("UPDATE {table} SET active = ?2 WHERE card_uid = ?1"),
                params![uid.as_str(), active],
            )?;
            card.active = active;

            let action = if active {
                actions::REACTIVATE
            } else {
                actions::REVOKE
            };
            audit::record(tx, actor, action, ENTITY, Some(uid.as_str()), None)?;
            Ok(card)
        })
    }

    /// Marks a card inactive. Subsequent scans fail with [`MedLinkError::InactiveCard`].
    pub fn revoke(&self, actor: &Actor, uid: &CardUid) -> MedLinkResult<CardRecord> {
        let card = self.set_active(actor, uid, false)?;
        tracing::info!("revoked card {}", uid);
        Ok(card)
    }

    pub fn reactivate(&self, actor: &Actor, uid: &CardUid) -> MedLinkResult<CardRecord> {
        self.set_active(actor, uid, true)
    }

    /// Removes a card registration entirely, freeing the UID for reissue.
    pub fn delete(&self, actor: &Actor, uid: &CardUid) -> MedLinkResult<()> {
        self.db.transaction(|tx| {
            let removed = tx.execute(
                "DELETE FROM doctor_cards WHERE card_uid = ?1",
                params![uid.as_str()],
            )? + tx.execute(
                "DELETE FROM patient_cards WHERE card_uid = ?1",
                params![uid.as_str()],
            )?;
            if removed == 0 {
                return Err(MedLinkError::not_found(ENTITY, uid));
            }
            audit::record(tx, actor, actions::DELETE, ENTITY, Some(uid.as_str()), None)
        })
    }

    /// All cards issued to a patient, newest first.
    pub fn list_for_patient(&self, national_id: &NationalId) -> MedLinkResult<Vec<CardRecord>> {
        self.db.with_conn(|conn| {
            patients::require(conn, national_id)?;
            list_for_patient(conn, national_id)
        })
    }

    /// All cards issued to a staff account, newest first.
    pub fn list_for_user(&self, user_id: i64) -> MedLinkResult<Vec<CardRecord>> {
        self.db.with_conn(|conn| {
            users::require(conn, user_id)?;
            let mut stmt = conn.prepare(
                "SELECT * FROM doctor_cards WHERE user_id = ?1 ORDER BY issued_at DESC",
            )?;
            let rows = stmt
                .query_map(params![user_id], map_doctor_card)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::patients::{NewPatient, PatientService};
    use crate::repositories::users::{NewUser, UserService, UserUpdate};
    use medlink_types::{NonEmptyText, Role};

    fn text(value: &str) -> NonEmptyText {
        NonEmptyText::new(value).unwrap()
    }

    fn uid(value: &str) -> CardUid {
        CardUid::parse(value).unwrap()
    }

    struct Fixture {
        db: Database,
        cards: CardService,
        doctor_id: i64,
        mona: NationalId,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let actor = Actor::system();
        let mona = NationalId::parse("29001011234567").unwrap();
        PatientService::new(db.clone())
            .add(&actor, NewPatient::new(mona.clone(), text("Mona Adel")))
            .unwrap();
        let doctor = UserService::new(db.clone())
            .add(&actor, NewUser::new("dr.salma", "password1", text("Salma"), Role::Doctor))
            .unwrap();
        Fixture {
            cards: CardService::new(db.clone()),
            db,
            doctor_id: doctor.id,
            mona,
        }
    }

    #[test]
    fn issue_and_get_both_kinds() {
        let f = fixture();
        let actor = Actor::system();

        let staff = f
            .cards
            .issue_doctor_card(&actor, &uid("04:a2:1b:7f"), f.doctor_id)
            .unwrap();
        assert_eq!(staff.card_uid.as_str(), "04A21B7F");
        assert_eq!(staff.holder, Holder::Staff { user_id: f.doctor_id });

        let patient = f
            .cards
            .issue_patient_card(&actor, &uid("04112233445566"), &f.mona)
            .unwrap();
        assert_eq!(
            f.cards.get(&uid("04-11-22-33-44-55-66")).unwrap(),
            patient
        );
        assert_eq!(f.cards.list_for_patient(&f.mona).unwrap(), vec![patient]);
        assert_eq!(f.cards.list_for_user(f.doctor_id).unwrap(), vec![staff]);
    }

    #[test]
    fn uid_is_unique_across_tables() {
        let f = fixture();
        let actor = Actor::system();
        f.cards
            .issue_doctor_card(&actor, &uid("04A21B7F"), f.doctor_id)
            .unwrap();

        let err = f
            .cards
            .issue_patient_card(&actor, &uid("04A21B7F"), &f.mona)
            .expect_err("reuse across tables should fail");
        assert!(matches!(err, MedLinkError::Conflict(_)));
    }

    #[test]
    fn staff_cards_need_active_staff() {
        let f = fixture();
        let actor = Actor::system();
        let users = UserService::new(f.db.clone());

        let mut patient_user = NewUser::new("mona", "password1", text("Mona"), Role::Patient);
        patient_user.patient_national_id = Some(f.mona.clone());
        let patient_user = users.add(&actor, patient_user).unwrap();
        assert!(matches!(
            f.cards.issue_doctor_card(&actor, &uid("04A21B7F"), patient_user.id),
            Err(MedLinkError::InvalidInput(_))
        ));

        users
            .update(
                &actor,
                f.doctor_id,
                UserUpdate {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(matches!(
            f.cards.issue_doctor_card(&actor, &uid("04A21B7F"), f.doctor_id),
            Err(MedLinkError::InvalidInput(_))
        ));

        assert!(matches!(
            f.cards.issue_doctor_card(&actor, &uid("04A21B7F"), 999),
            Err(MedLinkError::NotFound { entity: "user", .. })
        ));
    }

    #[test]
    fn revoke_reactivate_delete() {
        let f = fixture();
        let actor = Actor::system();
        let card = uid("04A21B7F");
        f.cards.issue_patient_card(&actor, &card, &f.mona).unwrap();

        assert!(!f.cards.revoke(&actor, &card).unwrap().active);
        assert!(!f.cards.get(&card).unwrap().active);
        assert!(f.cards.reactivate(&actor, &card).unwrap().active);

        f.cards.delete(&actor, &card).unwrap();
        assert!(matches!(
            f.cards.get(&card),
            Err(MedLinkError::NotFound { entity: "card", .. })
        ));
        assert!(f.cards.revoke(&actor, &card).is_err());
    }

    #[test]
    fn holder_serialises_with_kind_tag() {
        let json = serde_json::to_value(Holder::Staff { user_id: 7 }).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "staff", "user_id": 7 }));
    }
}
