//! Password hashing, username/password login and session re-validation.
//!
//! Stored hashes have the form `pbkdf2-sha256$<rounds>$<salt hex>$<digest hex>`, where the digest
//! is PBKDF2-HMAC-SHA256 of the password. Keeping the round count inside the stored value lets it
//! be raised later without invalidating existing hashes.
//!
//! Hashing is slow on purpose, so it never runs while the database lock is held: callers hash
//! first and then open a short transaction for the write.

use crate::actor::Actor;
use crate::constants::PASSWORD_HASH_ITERATIONS;
use crate::db::Database;
use crate::error::{MedLinkError, MedLinkResult};
use crate::repositories::audit::{self, actions};
use crate::repositories::patients;
use crate::repositories::users::{self, User};
use medlink_types::{NationalId, Role};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const DIGEST_LEN: usize = 32;

fn derive(salt: &[u8], password: &[u8], rounds: u32) -> [u8; DIGEST_LEN] {
    let mut digest = [0u8; DIGEST_LEN];
    pbkdf2_hmac::<Sha256>(password, salt, rounds, &mut digest);
    digest
}

/// Hashes `password` with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    hash_password_with(password, PASSWORD_HASH_ITERATIONS)
}

fn hash_password_with(password: &str, rounds: u32) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = derive(&salt, password.as_bytes(), rounds);
    format!(
        "{SCHEME}${rounds}${}${}",
        hex::encode(salt),
        hex::encode(digest)
    )
}

/// Checks `password` against a value produced by [`hash_password`].
///
/// Malformed stored values never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(rounds), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    if scheme != SCHEME {
        return false;
    }
    let Ok(rounds) = rounds.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(expected)) else {
        return false;
    };
    if rounds == 0 || expected.len() != DIGEST_LEN {
        return false;
    }

    let actual = derive(&salt, password.as_bytes(), rounds);
    actual[..].ct_eq(&expected[..]).into()
}

/// Username/password authentication.
#[derive(Clone, Debug)]
pub struct AuthService {
    db: Database,
}

impl AuthService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Verifies credentials and returns the user.
    ///
    /// Unknown usernames, wrong passwords and deactivated accounts all produce
    /// [`MedLinkError::InvalidCredentials`] so the response does not reveal which check failed.
    /// Both outcomes are written to the audit log.
    pub fn login(&self, username: &str, password: &str) -> MedLinkResult<User> {
        let username = username.trim();
        let found = self
            .db
            .with_conn(|conn| users::fetch_with_hash(conn, username))?;

        let verified = match found {
            Some((user, hash)) if user.active && verify_password(password, &hash) => Some(user),
            _ => None,
        };

        self.db.transaction(|tx| match &verified {
            Some(user) => audit::record(
                tx,
                &Actor::new(user.username.clone(), user.role),
                actions::LOGIN,
                "user",
                Some(&user.id.to_string()),
                None,
            ),
            None => {
                let actor = Actor {
                    subject: username.to_string(),
                    role: None,
                };
                audit::record(tx, &actor, actions::LOGIN_FAILED, "user", None, None)
            }
        })?;

        match verified {
            Some(user) => {
                tracing::info!("user {} logged in", user.username);
                Ok(user)
            }
            None => {
                tracing::warn!("failed login for '{}'", username);
                Err(MedLinkError::InvalidCredentials)
            }
        }
    }

    /// Confirms that the holder of an earlier issued session may still act.
    ///
    /// An account subject must still exist, be active and carry `role`. A card-only patient, whose
    /// subject is their own national id, must still have a patient record.
    ///
    /// # Errors
    ///
    /// Returns [`MedLinkError::SessionRevoked`] when any of those no longer holds.
    pub fn confirm_session(
        &self,
        subject: &str,
        role: Role,
        patient: Option<&NationalId>,
    ) -> MedLinkResult<()> {
        let card_only_patient =
            patient.filter(|id| role == Role::Patient && id.as_str() == subject);

        let still_valid = self.db.with_conn(|conn| {
            if let Some(national_id) = card_only_patient {
                return Ok(patients::fetch(conn, national_id)?.is_some());
            }
            Ok(users::fetch_by_username(conn, subject)?
                .is_some_and(|user| user.active && user.role == role))
        })?;

        if still_valid {
            Ok(())
        } else {
            tracing::warn!("rejected session of '{}': account no longer active", subject);
            Err(MedLinkError::SessionRevoked)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::audit::{AuditFilter, AuditService};
    use crate::repositories::helpers::Page;
    use crate::repositories::users::{NewUser, UserService, UserUpdate};
    use medlink_types::{NonEmptyText, Role};

    #[test]
    fn hash_round_trip_and_format() {
        let stored = hash_password_with("correct horse", 10);
        let parts: Vec<&str> = stored.split('$').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "pbkdf2-sha256");
        assert_eq!(parts[1], "10");
        assert_eq!(parts[2].len(), SALT_LEN * 2);
        assert_eq!(parts[3].len(), 64);

        assert!(verify_password("correct horse", &stored));
        assert!(!verify_password("wrong horse", &stored));
    }

    #[test]
    fn derive_matches_rfc_7914_vector() {
        assert_eq!(
            hex::encode(derive(b"salt", b"passwd", 1)),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn salts_differ_between_hashes() {
        assert_ne!(
            hash_password_with("same", 2),
            hash_password_with("same", 2)
        );
    }

    #[test]
    fn malformed_hashes_never_verify() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "plain-text"));
        assert!(!verify_password("x", "md5$1$00$00"));
        assert!(!verify_password("x", "pbkdf2-sha256$0$00$00"));
        assert!(!verify_password("x", "pbkdf2-sha256$1$zz$00"));
        assert!(!verify_password("x", "pbkdf2-sha256$1$00$00"));
    }

    fn setup() -> (Database, User) {
        let db = Database::open_in_memory().unwrap();
        let user = UserService::new(db.clone())
            .add(
                &Actor::system(),
                NewUser::new(
                    "dr.salma",
                    "s3cret-pass",
                    NonEmptyText::new("Salma Nabil").unwrap(),
                    Role::Doctor,
                ),
            )
            .expect("user should be created");
        (db, user)
    }

    #[test]
    fn login_succeeds_with_correct_password() {
        let (db, user) = setup();
        let logged_in = AuthService::new(db)
            .login("dr.salma", "s3cret-pass")
            .expect("login should succeed");
        assert_eq!(logged_in.id, user.id);
    }

    #[test]
    fn login_failures_are_indistinguishable_and_audited() {
        let (db, user) = setup();
        let auth = AuthService::new(db.clone());

        assert!(matches!(
            auth.login("dr.salma", "wrong-pass"),
            Err(MedLinkError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login("nobody", "whatever"),
            Err(MedLinkError::InvalidCredentials)
        ));

        UserService::new(db.clone())
            .update(
                &Actor::system(),
                user.id,
                UserUpdate {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(matches!(
            auth.login("dr.salma", "s3cret-pass"),
            Err(MedLinkError::InvalidCredentials)
        ));

        let failures = AuditService::new(db)
            .search(
                &AuditFilter {
                    action: Some(actions::LOGIN_FAILED.into()),
                    ..Default::default()
                },
                &Page::default(),
            )
            .unwrap();
        assert_eq!(failures.len(), 3);
    }

    #[test]
    fn sessions_end_when_the_account_is_deactivated_or_deleted() {
        let (db, user) = setup();
        let auth = AuthService::new(db.clone());
        let users = UserService::new(db);

        auth.confirm_session("dr.salma", Role::Doctor, None)
            .expect("active account keeps its session");
        assert!(matches!(
            auth.confirm_session("dr.salma", Role::Admin, None),
            Err(MedLinkError::SessionRevoked)
        ));

        users
            .update(
                &Actor::system(),
                user.id,
                UserUpdate {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(matches!(
            auth.confirm_session("dr.salma", Role::Doctor, None),
            Err(MedLinkError::SessionRevoked)
        ));

        users.delete(&Actor::system(), user.id).unwrap();
        assert!(matches!(
            auth.confirm_session("dr.salma", Role::Doctor, None),
            Err(MedLinkError::SessionRevoked)
        ));
    }

    #[test]
    fn card_only_patient_sessions_follow_the_patient_record() {
        use crate::repositories::patients::{NewPatient, PatientService};

        let db = Database::open_in_memory().unwrap();
        let auth = AuthService::new(db.clone());
        let patients = PatientService::new(db);
        let national_id = NationalId::parse("29001011234567").unwrap();
        patients
            .add(
                &Actor::system(),
                NewPatient::new(national_id.clone(), NonEmptyText::new("Mona Adel").unwrap()),
            )
            .unwrap();

        auth.confirm_session(national_id.as_str(), Role::Patient, Some(&national_id))
            .expect("patient record still exists");

        patients.delete(&Actor::system(), &national_id).unwrap();
        assert!(matches!(
            auth.confirm_session(national_id.as_str(), Role::Patient, Some(&national_id)),
            Err(MedLinkError::SessionRevoked)
        ));
    }
}
