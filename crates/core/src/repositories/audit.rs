//! Append-only audit log.
//!
//! Services call [`record`] with the transaction that performs the change, so an audit row exists
//! if and only if the change committed. There is deliberately no update or delete operation.

use crate::actor::Actor;
use crate::db::Database;
use crate::error::MedLinkResult;
use crate::repositories::helpers::{parse_optional_column, Page, QueryFilter};
use chrono::{DateTime, Utc};
use medlink_types::Role;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};

/// Action names written to the audit log.
pub mod actions {
    pub const CREATE: &str = "create";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    pub const REVOKE: &str = "revoke";
    pub const REACTIVATE: &str = "reactivate";
    pub const ENROLL: &str = "enroll";
    pub const CARD_SCAN: &str = "card_scan";
    pub const FINGERPRINT_SCAN: &str = "fingerprint_scan";
    pub const LOGIN: &str = "login";
    pub const LOGIN_FAILED: &str = "login_failed";
    pub const IMPORT: &str = "import";
}

/// One audit log row.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AuditEntry {
    pub id: i64,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub actor_role: Option<Role>,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
    pub details: Option<String>,
}

/// Search criteria for the audit log. All fields are optional and combined with AND.
#[derive(Clone, Debug, Default, Deserialize)]
#[cfg_attr(
    feature = "openapi",
    derive(utoipa::IntoParams),
    into_params(parameter_in = Query)
)]
pub struct AuditFilter {
    pub actor: Option<String>,
    pub action: Option<String>,
    pub entity: Option<String>,
    pub entity_id: Option<String>,
}

/// Appends an audit row using `conn`, which is normally the caller's open transaction.
pub(crate) fn record(
    conn: &Connection,
    actor: &Actor,
    action: &str,
    entity: &str,
    entity_id: Option<&str>,
    details: Option<&str>,
) -> MedLinkResult<()> {
    conn.execute(
        "INSERT INTO audit_log (at, actor, actor_role, action, entity, entity_id, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            Utc::now(),
            actor.subject,
            actor.role.map(|r| r.as_str()),
            action,
            entity,
            entity_id,
            details
        ],
    )?;
    tracing::debug!(
        actor = %actor.subject,
        action,
        entity,
        entity_id = entity_id.unwrap_or("-"),
        "audit"
    );
    Ok(())
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        id: row.get("id")?,
        at: row.get("at")?,
        actor: row.get("actor")?,
        actor_role: parse_optional_column(row, "actor_role")?,
        action: row.get("action")?,
        entity: row.get("entity")?,
        entity_id: row.get("entity_id")?,
        details: row.get("details")?,
    })
}

/// Read access to the audit log.
#[derive(Clone, Debug)]
pub struct AuditService {
    db: Database,
}

impl AuditService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns matching entries, newest first.
    pub fn search(&self, filter: &AuditFilter, page: &Page) -> MedLinkResult<Vec<AuditEntry>> {
        let mut query = QueryFilter::new();
        if let Some(actor) = &filter.actor {
            query.push("actor = ?", actor.clone());
        }
        if let Some(action) = &filter.action {
            query.push("action = ?", action.clone());
        }
        if let Some(entity) = &filter.entity {
            query.push("entity = ?", entity.clone());
        }
        if let Some(entity_id) = &filter.entity_id {
            query.push("entity_id = ?", entity_id.clone());
        }
        let (clause, values) = query.finish("id DESC", page);

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT * FROM audit_log{clause}"))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_search_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let doctor = Actor::new("dr.salma", Role::Doctor);

        db.transaction(|tx| {
            record(tx, &doctor, actions::CREATE, "patient", Some("29001011234567"), None)?;
            record(tx, &Actor::system(), actions::IMPORT, "patient", None, Some("3 rows"))?;
            record(tx, &doctor, actions::UPDATE, "patient", Some("29001011234567"), None)
        })
        .unwrap();

        let service = AuditService::new(db);
        let all = service.search(&AuditFilter::default(), &Page::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].action, actions::UPDATE);
        assert_eq!(all[2].action, actions::CREATE);
        assert_eq!(all[1].actor_role, None);
        assert_eq!(all[0].actor_role, Some(Role::Doctor));

        let by_actor = service
            .search(
                &AuditFilter {
                    actor: Some("dr.salma".into()),
                    ..Default::default()
                },
                &Page::default(),
            )
            .unwrap();
        assert_eq!(by_actor.len(), 2);

        let paged = service
            .search(&AuditFilter::default(), &Page::new(1, 1))
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].action, actions::IMPORT);
    }
}
