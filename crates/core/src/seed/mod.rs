//! Bulk data loading.
//!
//! - [`fixtures`]: import of JSON fixture documents exported from other clinic systems
//! - [`fake`]: generation of plausible random data for demos and load testing
//!
//! Both paths go through the same validation as the entity services; the fake seeder produces a
//! [`FixtureSet`] and imports it like any other document.

pub mod fake;
pub mod fixtures;

pub use fake::{FakeSeeder, SeedPlan};
pub use fixtures::{
    import_fixtures, load_fixtures, FixtureDoctor, FixtureDoctorCard, FixturePatientCard,
    FixtureSet, FixtureVisit, ImportCount, ImportReport,
};
