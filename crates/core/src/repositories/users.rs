//! Staff and patient login accounts.
//!
//! Admins and doctors always have an account. A patient may optionally have one, linked to their
//! patient record through `patient_national_id`; patients without an account can still sign in
//! with their card.

use crate::actor::Actor;
use crate::auth::hash_password;
use crate::db::Database;
use crate::error::{MedLinkError, MedLinkResult};
use crate::repositories::audit::{self, actions};
use crate::repositories::helpers::{
    clean, like_escape, parse_column, parse_optional_column, Page, QueryFilter,
};
use crate::repositories::patients;
use crate::validation::{normalise_phone, validate_email, validate_password, validate_username};
use chrono::{DateTime, Utc};
use medlink_types::{NationalId, NonEmptyText, Role};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;

const ENTITY: &str = "user";

/// A login account. The password hash is never part of this model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct User {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub role: Role,
    pub specialty: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub patient_national_id: Option<NationalId>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NewUser {
    pub username: String,
    /// Plaintext initial password; hashed before storage.
    pub password: String,
    pub full_name: NonEmptyText,
    pub role: Role,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Required for, and only allowed on, patient accounts.
    #[serde(default)]
    pub patient_national_id: Option<NationalId>,
}

impl NewUser {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        full_name: NonEmptyText,
        role: Role,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            full_name,
            role,
            specialty: None,
            phone: None,
            email: None,
            patient_national_id: None,
        }
    }
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("full_name", &self.full_name)
            .field("role", &self.role)
            .field("specialty", &self.specialty)
            .field("patient_national_id", &self.patient_national_id)
            .finish_non_exhaustive()
    }
}

/// Partial update for [`UserService::update`]. Blank optional text clears the field.
#[derive(Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UserUpdate {
    #[serde(default)]
    pub full_name: Option<NonEmptyText>,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// New plaintext password.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl fmt::Debug for UserUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserUpdate")
            .field("full_name", &self.full_name)
            .field("specialty", &self.specialty)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[cfg_attr(
    feature = "openapi",
    derive(utoipa::IntoParams),
    into_params(parameter_in = Query)
)]
pub struct UserFilter {
    /// Matches a username or full name substring.
    pub query: Option<String>,
    pub role: Option<Role>,
    pub specialty: Option<String>,
    pub active: Option<bool>,
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        full_name: row.get("full_name")?,
        role: parse_column(row, "role")?,
        specialty: row.get("specialty")?,
        phone: row.get("phone")?,
        email: row.get("email")?,
        patient_national_id: parse_optional_column(row, "patient_national_id")?,
        active: row.get("active")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn fetch(conn: &Connection, id: i64) -> MedLinkResult<Option<User>> {
    Ok(conn
        .query_row("SELECT * FROM users WHERE id = ?1", params![id], map_row)
        .optional()?)
}

pub(crate) fn require(conn: &Connection, id: i64) -> MedLinkResult<User> {
    fetch(conn, id)?.ok_or_else(|| MedLinkError::not_found(ENTITY, id))
}

/// Loads a user that may hold staff credentials (cards, fingerprints): an active doctor or admin.
pub(crate) fn require_active_staff(conn: &Connection, id: i64) -> MedLinkResult<User> {
    let user = require(conn, id)?;
    if !user.role.is_staff() {
        return Err(MedLinkError::InvalidInput(format!(
            "staff credentials can only be issued to doctors or admins, user {id} is a {}",
            user.role
        )));
    }
    if !user.active {
        return Err(MedLinkError::InvalidInput(format!(
            "user {id} is deactivated"
        )));
    }
    Ok(user)
}

pub(crate) fn fetch_by_username(conn: &Connection, username: &str) -> MedLinkResult<Option<User>> {
    Ok(conn
        .query_row(
            "SELECT * FROM users WHERE username = ?1",
            params![username],
            map_row,
        )
        .optional()?)
}

/// Loads a user together with their stored password hash, for credential checks only.
pub(crate) fn fetch_with_hash(
    conn: &Connection,
    username: &str,
) -> MedLinkResult<Option<(User, String)>> {
    Ok(conn
        .query_row(
            "SELECT * FROM users WHERE username = ?1",
            params![username],
            |row| Ok((map_row(row)?, row.get("password_hash")?)),
        )
        .optional()?)
}

/// Account linked to a patient record, if any.
pub(crate) fn fetch_for_patient(
    conn: &Connection,
    national_id: &NationalId,
) -> MedLinkResult<Option<User>> {
    Ok(conn
        .query_row(
            "SELECT * FROM users WHERE patient_national_id = ?1",
            params![national_id.as_str()],
            map_row,
        )
        .optional()?)
}

fn clean_email(value: Option<String>) -> MedLinkResult<Option<String>> {
    let email = clean(value).map(|e| e.to_ascii_lowercase());
    if let Some(email) = &email {
        validate_email(email)?;
    }
    Ok(email)
}

/// Inserts an account whose password was already hashed with [`hash_password`].
pub(crate) fn insert(
    conn: &Connection,
    actor: &Actor,
    new: NewUser,
    password_hash: &str,
) -> MedLinkResult<User> {
    let username = new.username.trim().to_string();
    validate_username(&username)?;
    validate_password(&new.password)?;

    match (new.role, &new.patient_national_id) {
        (Role::Patient, None) => {
            return Err(MedLinkError::InvalidInput(
                "patient accounts must reference a patient national id".into(),
            ))
        }
        (Role::Patient, Some(national_id)) => {
            patients::require(conn, national_id)?;
            if fetch_for_patient(conn, national_id)?.is_some() {
                return Err(MedLinkError::Conflict(format!(
                    "patient {national_id} already has an account"
                )));
            }
        }
        (_, Some(_)) => {
            return Err(MedLinkError::InvalidInput(format!(
                "{} accounts cannot reference a patient",
                new.role
            )))
        }
        (_, None) => {}
    }

    if fetch_by_username(conn, &username)?.is_some() {
        return Err(MedLinkError::Conflict(format!(
            "username '{username}' is already taken"
        )));
    }

    let phone = clean(new.phone).map(|p| normalise_phone(&p)).transpose()?;
    let email = clean_email(new.email)?;
    let specialty = clean(new.specialty);
    let created_at = Utc::now();

    conn.execute(
        "INSERT INTO users (username, password_hash, full_name, role, specialty, phone, email,
                            patient_national_id, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)",
        params![
            username,
            password_hash,
            new.full_name.as_str(),
            new.role.as_str(),
            specialty,
            phone,
            email,
            new.patient_national_id.as_ref().map(|n| n.as_str()),
            created_at,
        ],
    )?;
    let id = conn.last_insert_rowid();

    audit::record(
        conn,
        actor,
        actions::CREATE,
        ENTITY,
        Some(&id.to_string()),
        Some(new.role.as_str()),
    )?;

    Ok(User {
        id,
        username,
        full_name: new.full_name.into_inner(),
        role: new.role,
        specialty,
        phone,
        email,
        patient_national_id: new.patient_national_id,
        active: true,
        created_at,
    })
}

/// Manager for login accounts.
#[derive(Clone, Debug)]
pub struct UserService {
    db: Database,
}

impl UserService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, id: i64) -> MedLinkResult<User> {
        self.db.with_conn(|conn| require(conn, id))
    }

    pub fn get_by_username(&self, username: &str) -> MedLinkResult<User> {
        let username = username.trim();
        self.db.with_conn(|conn| {
            fetch_by_username(conn, username)?
                .ok_or_else(|| MedLinkError::not_found(ENTITY, username))
        })
    }

    /// Searches accounts ordered by full name.
    pub fn search(&self, filter: &UserFilter, page: &Page) -> MedLinkResult<Vec<User>> {
        let mut query = QueryFilter::new();
        if let Some(q) = clean(filter.query.clone()) {
            query.push(
                "(username LIKE '%' || ? || '%' ESCAPE '\\' \
                 OR full_name LIKE '%' || ? || '%' ESCAPE '\\')",
                like_escape(&q),
            );
        }
        if let Some(role) = filter.role {
            query.push("role = ?", role.as_str());
        }
        if let Some(specialty) = clean(filter.specialty.clone()) {
            query.push("specialty = ? COLLATE NOCASE", specialty);
        }
        if let Some(active) = filter.active {
            query.push("active = ?", active);
        }
        let (clause, values) = query.finish("full_name COLLATE NOCASE, id", page);

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT * FROM users{clause}"))?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), map_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Creates an account, hashing the initial password.
    ///
    /// # Errors
    ///
    /// Returns `MedLinkError` if:
    /// - the username is malformed or already taken
    /// - the password is too short
    /// - a patient account lacks an existing patient, or a staff account references one
    pub fn add(&self, actor: &Actor, new: NewUser) -> MedLinkResult<User> {
        validate_password(&new.password)?;
        let password_hash = hash_password(&new.password);
        let user = self
            .db
            .transaction(|tx| insert(tx, actor, new, &password_hash))?;
        tracing::info!("created {} account '{}'", user.role, user.username);
        Ok(user)
    }

    /// Applies a partial update. A supplied password replaces the stored hash.
    pub fn update(&self, actor: &Actor, id: i64, update: UserUpdate) -> MedLinkResult<User> {
        let password_hash = match &update.password {
            Some(password) => {
                validate_password(password)?;
                Some(hash_password(password))
            }
            None => None,
        };

        self.db.transaction(|tx| {
            let mut user = require(tx, id)?;
            let mut changed = Vec::new();

            if let Some(name) = update.full_name {
                user.full_name = name.into_inner();
                changed.push("full_name");
            }
            if update.specialty.is_some() {
                user.specialty = clean(update.specialty);
                changed.push("specialty");
            }
            if update.phone.is_some() {
                user.phone = clean(update.phone)
                    .map(|p| normalise_phone(&p))
                    .transpose()?;
                changed.push("phone");
            }
            if update.email.is_some() {
                user.email = clean_email(update.email)?;
                changed.push("email");
            }
            if let Some(active) = update.active {
                user.active = active;
                changed.push("active");
            }

            tx.execute(
                "UPDATE users SET full_name = ?2, specialty = ?3, phone = ?4, email = ?5, active = ?6
                 WHERE id = ?1",
                params![
                    user.id,
                    user.full_name,
                    user.specialty,
                    user.phone,
                    user.email,
                    user.active,
                ],
            )?;

            if let Some(password_hash) = &password_hash {
                tx.execute(
                    "UPDATE users SET password_hash = ?2 WHERE id = ?1",
                    params![user.id, password_hash],
                )?;
                changed.push("password");
            }

            if !changed.is_empty() {
                audit::record(
                    tx,
                    actor,
                    actions::UPDATE,
                    ENTITY,
                    Some(&id.to_string()),
                    Some(&changed.join(",")),
                )?;
            }
            Ok(user)
        })
    }

    /// Deletes an account. Cards and fingerprints of the user go with it; their visits remain with
    /// no doctor attached.
    pub fn delete(&self, actor: &Actor, id: i64) -> MedLinkResult<()> {
        self.db.transaction(|tx| {
            let removed = tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
            if removed == 0 {
                return Err(MedLinkError::not_found(ENTITY, id));
            }
            audit::record(tx, actor, actions::DELETE, ENTITY, Some(&id.to_string()), None)
        })?;
        tracing::info!("deleted user {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::verify_password;
    use crate::repositories::patients::{NewPatient, PatientService};

    fn text(value: &str) -> NonEmptyText {
        NonEmptyText::new(value).unwrap()
    }

    fn admin() -> Actor {
        Actor::new("admin", Role::Admin)
    }

    fn stored_hash(db: &Database, id: i64) -> String {
        db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT password_hash FROM users WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?)
        })
        .unwrap()
    }

    #[test]
    fn add_hashes_password_and_hides_it() {
        let db = Database::open_in_memory().unwrap();
        let service = UserService::new(db.clone());
        let mut new = NewUser::new("dr.salma", "s3cret-pass", text("Salma Nabil"), Role::Doctor);
        new.specialty = Some("Cardiology".into());
        new.email = Some("Salma@Clinic.EG".into());

        let user = service.add(&admin(), new).expect("add should succeed");
        assert_eq!(user.email.as_deref(), Some("salma@clinic.eg"));
        assert!(user.active);

        let hash = stored_hash(&db, user.id);
        assert!(hash.starts_with("pbkdf2-sha256$"));
        assert!(verify_password("s3cret-pass", &hash));

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("pbkdf2-sha256$"));
    }

    #[test]
    fn duplicate_username_conflicts() {
        let service = UserService::new(Database::open_in_memory().unwrap());
        service
            .add(&admin(), NewUser::new("dr.salma", "password1", text("A"), Role::Doctor))
            .unwrap();
        let err = service
            .add(&admin(), NewUser::new("dr.salma", "password2", text("B"), Role::Admin))
            .expect_err("duplicate should fail");
        assert!(matches!(err, MedLinkError::Conflict(_)));
    }

    #[test]
    fn patient_accounts_require_existing_patient() {
        let db = Database::open_in_memory().unwrap();
        let service = UserService::new(db.clone());
        let nid = NationalId::parse("29001011234567").unwrap();

        let missing_link = NewUser::new("mona", "password1", text("Mona"), Role::Patient);
        assert!(matches!(
            service.add(&admin(), missing_link),
            Err(MedLinkError::InvalidInput(_))
        ));

        let mut unknown = NewUser::new("mona", "password1", text("Mona"), Role::Patient);
        unknown.patient_national_id = Some(nid.clone());
        assert!(matches!(
            service.add(&admin(), unknown),
            Err(MedLinkError::NotFound { entity: "patient", .. })
        ));

        PatientService::new(db)
            .add(&admin(), NewPatient::new(nid.clone(), text("Mona Adel")))
            .unwrap();
        let mut linked = NewUser::new("mona", "password1", text("Mona"), Role::Patient);
        linked.patient_national_id = Some(nid.clone());
        let user = service.add(&admin(), linked).expect("linked account should succeed");
        assert_eq!(user.patient_national_id, Some(nid.clone()));

        let mut doctor = NewUser::new("dr.x", "password1", text("X"), Role::Doctor);
        doctor.patient_national_id = Some(nid);
        assert!(matches!(
            service.add(&admin(), doctor),
            Err(MedLinkError::InvalidInput(_))
        ));
    }

    #[test]
    fn update_resets_password_and_deactivates() {
        let db = Database::open_in_memory().unwrap();
        let service = UserService::new(db.clone());
        let user = service
            .add(&admin(), NewUser::new("dr.salma", "password1", text("Salma"), Role::Doctor))
            .unwrap();

        let updated = service
            .update(
                &admin(),
                user.id,
                UserUpdate {
                    password: Some("new-password".into()),
                    active: Some(false),
                    specialty: Some("Neurology".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!updated.active);
        assert_eq!(updated.specialty.as_deref(), Some("Neurology"));
        assert!(verify_password("new-password", &stored_hash(&db, user.id)));

        let err = service
            .update(
                &admin(),
                user.id,
                UserUpdate {
                    password: Some("short".into()),
                    ..Default::default()
                },
            )
            .expect_err("short password should fail");
        assert!(matches!(err, MedLinkError::InvalidInput(_)));
        assert!(verify_password("new-password", &stored_hash(&db, user.id)));
    }

    #[test]
    fn rejected_password_is_caught_before_anything_is_written() {
        let db = Database::open_in_memory().unwrap();
        let service = UserService::new(db.clone());
        let user = service
            .add(&admin(), NewUser::new("dr.salma", "password1", text("Salma"), Role::Doctor))
            .unwrap();

        let err = service
            .update(
                &admin(),
                user.id,
                UserUpdate {
                    specialty: Some("Cardiology".into()),
                    password: Some("short".into()),
                    ..Default::default()
                },
            )
            .expect_err("short password should fail");
        assert!(matches!(err, MedLinkError::InvalidInput(_)));
        assert_eq!(service.get(user.id).unwrap().specialty, None);

        let err = service
            .add(&admin(), NewUser::new("dr.karim", "short", text("Karim"), Role::Doctor))
            .expect_err("short password should fail");
        assert!(matches!(err, MedLinkError::InvalidInput(_)));
        assert!(service.get_by_username("dr.karim").is_err());
    }

    #[test]
    fn search_by_role_and_query() {
        let service = UserService::new(Database::open_in_memory().unwrap());
        service
            .add(&admin(), NewUser::new("dr.salma", "password1", text("Salma Nabil"), Role::Doctor))
            .unwrap();
        service
            .add(&admin(), NewUser::new("dr.omar", "password1", text("Omar Fathy"), Role::Doctor))
            .unwrap();
        service
            .add(&admin(), NewUser::new("root", "password1", text("Admin"), Role::Admin))
            .unwrap();

        let doctors = service
            .search(
                &UserFilter {
                    role: Some(Role::Doctor),
                    ..Default::default()
                },
                &Page::default(),
            )
            .unwrap();
        assert_eq!(
            doctors.iter().map(|u| u.username.as_str()).collect::<Vec<_>>(),
            vec!["dr.omar", "dr.salma"]
        );

        let by_name = service
            .search(
                &UserFilter {
                    query: Some("nabil".into()),
                    ..Default::default()
                },
                &Page::default(),
            )
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].username, "dr.salma");
    }

    #[test]
    fn delete_and_get_by_username() {
        let service = UserService::new(Database::open_in_memory().unwrap());
        let user = service
            .add(&admin(), NewUser::new("dr.salma", "password1", text("Salma"), Role::Doctor))
            .unwrap();
        assert_eq!(service.get_by_username("dr.salma").unwrap().id, user.id);

        service.delete(&admin(), user.id).unwrap();
        assert!(matches!(
            service.get(user.id),
            Err(MedLinkError::NotFound { .. })
        ));
        assert!(service.get_by_username("dr.salma").is_err());
    }
}
