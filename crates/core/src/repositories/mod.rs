//! Entity repositories.
//!
//! Each module pairs crate-private row helpers (used inside another service's transaction) with a
//! public service that wraps them in a transaction and an audit record.

pub mod audit;
pub mod cards;
pub mod helpers;
pub mod imaging;
pub mod lab_results;
pub mod patients;
pub mod users;
pub mod visits;
