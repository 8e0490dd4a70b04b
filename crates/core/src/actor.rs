//! The principal on whose behalf a change is made.
//!
//! Every mutating service call takes an [`Actor`], which is written to the audit log in the same
//! transaction as the change itself.

use crate::constants::SYSTEM_ACTOR;
use medlink_types::Role;

/// Who performed an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    /// Stable identifier: a username, a patient national id, or `system`.
    pub subject: String,

    /// Role of the principal, absent for tooling.
    pub role: Option<Role>,
}

impl Actor {
    pub fn new(subject: impl Into<String>, role: Role) -> Self {
        Self {
            subject: subject.into(),
            role: Some(role),
        }
    }

    /// The actor used by migrations, seeding and other tooling.
    pub fn system() -> Self {
        Self {
            subject: SYSTEM_ACTOR.to_string(),
            role: None,
        }
    }
}
