//! Random demo data.
//!
//! [`FakeSeeder`] generates a [`FixtureSet`] of plausible Egyptian patients, doctors and clinical
//! history. Generated national ids are structurally valid and agree with the generated birth date
//! and gender, so the data passes the same validation as real input. With a fixed seed the same
//! plan always produces the same people.

use super::fixtures::{
    import_fixtures, FixtureDoctor, FixtureDoctorCard, FixturePatientCard, FixtureSet,
    FixtureVisit, ImportReport,
};
use crate::actor::Actor;
use crate::constants::BLOOD_TYPES;
use crate::db::Database;
use crate::error::{MedLinkError, MedLinkResult};
use crate::repositories::imaging::{Modality, NewImagingStudy};
use crate::repositories::lab_results::{LabStatus, NewLabResult};
use crate::repositories::patients::NewPatient;
use chrono::{Duration, Utc};
use medlink_types::{CardUid, Gender, NationalId, NonEmptyText, Role};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashSet;

const MALE_NAMES: &[&str] = &[
    "Ahmed", "Mohamed", "Mahmoud", "Omar", "Youssef", "Khaled", "Mostafa", "Hassan", "Karim",
    "Tarek", "Amr", "Ibrahim",
];
const FEMALE_NAMES: &[&str] = &[
    "Mona", "Fatma", "Aya", "Nour", "Salma", "Heba", "Mariam", "Yasmin", "Dina", "Rana", "Sara",
    "Laila",
];
const FAMILY_NAMES: &[&str] = &[
    "Adel", "Hassan", "Khaled", "Nabil", "Fathy", "Mansour", "Saeed", "Gaber", "Farouk", "Shawky",
    "Ezzat", "Ramadan",
];
const CITIES: &[&str] = &[
    "Cairo", "Giza", "Alexandria", "Mansoura", "Tanta", "Zagazig", "Assiut", "Luxor", "Aswan",
];
const GOVERNORATES: &[u8] = &[1, 2, 3, 12, 13, 14, 16, 21, 25, 29];
const SPECIALTIES: &[&str] = &[
    "Internal Medicine",
    "Cardiology",
    "Pediatrics",
    "Dermatology",
    "Orthopedics",
    "Radiology",
];
const ALLERGIES: &[&str] = &["Penicillin", "Sulfa drugs", "Peanuts", "Latex", "Aspirin"];
const CHRONIC: &[&str] = &["Hypertension", "Type 2 diabetes", "Asthma", "Hypothyroidism"];
const REASONS: &[(&str, &str, &str)] = &[
    ("Persistent cough", "Upper respiratory infection", "Rest and fluids"),
    ("Headache", "Tension headache", "Paracetamol 500mg as needed"),
    ("Routine check-up", "Healthy", "None"),
    ("Chest pain", "Musculoskeletal pain", "NSAIDs for 5 days"),
    ("High blood sugar", "Type 2 diabetes", "Metformin 500mg twice daily"),
    ("Knee pain", "Osteoarthritis", "Physiotherapy"),
    ("Skin rash", "Contact dermatitis", "Topical corticosteroid"),
];
const LAB_TESTS: &[(&str, &str, &str, f64, f64)] = &[
    ("Hemoglobin", "g/dL", "12-16", 9.0, 17.5),
    ("Fasting Glucose", "mg/dL", "70-100", 65.0, 240.0),
    ("Creatinine", "mg/dL", "0.6-1.2", 0.4, 2.5),
    ("TSH", "mIU/L", "0.4-4.0", 0.1, 9.0),
    ("Potassium", "mmol/L", "3.5-5.0", 2.8, 6.5),
];
const BODY_PARTS: &[&str] = &["Chest", "Knee", "Abdomen", "Brain", "Spine", "Breast"];

/// How much data to generate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedPlan {
    pub patients: usize,
    pub doctors: usize,
    /// Upper bound on visits per patient; each patient gets between zero and this many.
    pub max_visits_per_patient: usize,
    /// Initial password given to every generated doctor account.
    pub doctor_password: String,
    /// Issue an NFC card to every generated patient and doctor.
    pub issue_cards: bool,
}

impl Default for SeedPlan {
    fn default() -> Self {
        Self {
            patients: 20,
            doctors: 3,
            max_visits_per_patient: 3,
            doctor_password: "medlink-demo".into(),
            issue_cards: true,
        }
    }
}

/// Deterministic-when-seeded generator of demo data.
pub struct FakeSeeder {
    rng: StdRng,
    used_ids: HashSet<String>,
    used_uids: HashSet<String>,
}

impl FakeSeeder {
    /// Creates a seeder; `None` draws the seed from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            used_ids: HashSet::new(),
            used_uids: HashSet::new(),
        }
    }

    fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items.choose(&mut self.rng).copied().unwrap_or_default()
    }

    fn national_id(&mut self, gender: Gender) -> NationalId {
        loop {
            let age_days = self.rng.gen_range(365..=85 * 365);
            let birth = Utc::now().date_naive() - Duration::days(age_days);
            let governorate = *GOVERNORATES.choose(&mut self.rng).unwrap_or(&1);
            let sequence = self.rng.gen_range(0..10_000);
            let check = self.rng.gen_range(0..10);
            if let Ok(id) = NationalId::compose(birth, governorate, sequence, gender, check) {
                if self.used_ids.insert(id.as_str().to_string()) {
                    return id;
                }
            }
        }
    }

    fn card_uid(&mut self, bytes: usize) -> CardUid {
        loop {
            let raw: String = (0..bytes)
                .map(|_| format!("{:02X}", self.rng.gen::<u8>()))
                .collect();
            if let Ok(uid) = CardUid::parse(&raw) {
                if self.used_uids.insert(uid.as_str().to_string()) {
                    return uid;
                }
            }
        }
    }

    fn phone(&mut self) -> String {
        let operator = *[0u8, 1, 2, 5].choose(&mut self.rng).unwrap_or(&0);
        format!("01{operator}{:08}", self.rng.gen_range(0..100_000_000u32))
    }

    fn maybe<'a>(&mut self, probability: f64, items: &'a [&'a str]) -> Option<String> {
        self.rng
            .gen_bool(probability)
            .then(|| self.pick(items).to_string())
    }

    fn text(value: impl AsRef<str>) -> MedLinkResult<NonEmptyText> {
        Ok(NonEmptyText::new(value)?)
    }

    /// Generates a fixture document according to `plan`.
    ///
    /// # Errors
    ///
    /// Returns `MedLinkError::Serialization` if a generated row cannot be encoded.
    pub fn generate(&mut self, plan: &SeedPlan) -> MedLinkResult<FixtureSet> {
        let mut set = FixtureSet::default();
        let now = Utc::now();

        let mut doctor_usernames = Vec::with_capacity(plan.doctors);
        for index in 0..plan.doctors {
            let gender = if self.rng.gen_bool(0.5) {
                Gender::Male
            } else {
                Gender::Female
            };
            let first = match gender {
                Gender::Male => self.pick(MALE_NAMES),
                Gender::Female => self.pick(FEMALE_NAMES),
            };
            let last = self.pick(FAMILY_NAMES);
            let username = format!("dr.{}.{}", first.to_ascii_lowercase(), index + 1);
            let doctor = FixtureDoctor {
                username: username.clone(),
                password: plan.doctor_password.clone(),
                full_name: Self::text(format!("{first} {last}"))?,
                role: Role::Doctor,
                specialty: Some(self.pick(SPECIALTIES).to_string()),
                phone: Some(self.phone()),
                email: Some(format!("{username}@medlink.example")),
            };
            set.doctors.push(to_value(&doctor)?);

            if plan.issue_cards {
                let card = FixtureDoctorCard {
                    card_uid: self.card_uid(7),
                    username: username.clone(),
                };
                set.doctor_cards.push(to_value(&card)?);
            }
            doctor_usernames.push(username);
        }

        for _ in 0..plan.patients {
            let gender = if self.rng.gen_bool(0.5) {
                Gender::Male
            } else {
                Gender::Female
            };
            let national_id = self.national_id(gender);
            let first = match gender {
                Gender::Male => self.pick(MALE_NAMES),
                Gender::Female => self.pick(FEMALE_NAMES),
            };
            let father = self.pick(MALE_NAMES);
            let family = self.pick(FAMILY_NAMES);

            let full_name = Self::text(format!("{first} {father} {family}"))?;
            let mut patient = NewPatient::new(national_id.clone(), full_name);
            patient.phone = Some(self.phone());
            patient.address = Some(format!(
                "{} {} St., {}",
                self.rng.gen_range(1..200),
                self.pick(FAMILY_NAMES),
                self.pick(CITIES)
            ));
            patient.blood_type = Some(self.pick(BLOOD_TYPES).to_string());
            patient.emergency_contact = Some(format!("{} {}", father, self.phone()));
            patient.allergies = self.maybe(0.2, ALLERGIES);
            patient.chronic_conditions = self.maybe(0.3, CHRONIC);
            set.patients.push(to_value(&patient)?);

            if plan.issue_cards {
                let card = FixturePatientCard {
                    card_uid: self.card_uid(4),
                    national_id: national_id.clone(),
                };
                set.patient_cards.push(to_value(&card)?);
            }

            let birth = national_id.birth_date();
            let visits = self.rng.gen_range(0..=plan.max_visits_per_patient);
            for _ in 0..visits {
                let days_ago = self.rng.gen_range(1..=730);
                let visit_date = now - Duration::days(days_ago);
                if visit_date.date_naive() < birth {
                    continue;
                }
                let (reason, diagnosis, treatment) =
                    *REASONS.choose(&mut self.rng).unwrap_or(&REASONS[0]);
                let visit = FixtureVisit {
                    patient_national_id: national_id.clone(),
                    doctor_username: doctor_usernames.choose(&mut self.rng).cloned(),
                    visit_date: Some(visit_date),
                    reason: Self::text(reason)?,
                    diagnosis: Some(diagnosis.to_string()),
                    treatment: Some(treatment.to_string()),
                    notes: None,
                    follow_up: self
                        .rng
                        .gen_bool(0.3)
                        .then(|| visit_date.date_naive() + Duration::days(14)),
                };
                set.visits.push(to_value(&visit)?);

                if self.rng.gen_bool(0.6) {
                    let (test, unit, range, low, high) =
                        *LAB_TESTS.choose(&mut self.rng).unwrap_or(&LAB_TESTS[0]);
                    let value: f64 = self.rng.gen_range(low..high);
                    let status = lab_status(value, range);
                    let mut lab = NewLabResult::new(
                        national_id.clone(),
                        Self::text(test)?,
                        Self::text(format!("{value:.1}"))?,
                    );
                    lab.unit = Some(unit.to_string());
                    lab.reference_range = Some(range.to_string());
                    lab.status = Some(status);
                    lab.performed_at = Some(visit_date + Duration::hours(2));
                    set.lab_results.push(to_value(&lab)?);
                }

                if self.rng.gen_bool(0.2) {
                    let modality = *Modality::ALL
                        .choose(&mut self.rng)
                        .unwrap_or(&Modality::XRay);
                    let mut study = NewImagingStudy::new(
                        national_id.clone(),
                        modality,
                        Self::text(self.pick(BODY_PARTS))?,
                    );
                    study.performed_at = Some(visit_date + Duration::hours(3));
                    study.findings = Some("No acute findings".into());
                    set.imaging.push(to_value(&study)?);
                }
            }
        }

        Ok(set)
    }

    /// Generates data for `plan` and imports it into `db`.
    pub fn seed(
        &mut self,
        db: &Database,
        actor: &Actor,
        plan: &SeedPlan,
    ) -> MedLinkResult<ImportReport> {
        let set = self.generate(plan)?;
        tracing::info!(
            "seeding {} patients and {} doctors",
            set.patients.len(),
            set.doctors.len()
        );
        import_fixtures(db, &set, actor)
    }
}

fn to_value(row: &impl Serialize) -> MedLinkResult<serde_json::Value> {
    serde_json::to_value(row).map_err(MedLinkError::Serialization)
}

/// Classifies a numeric value against a `low-high` reference range.
fn lab_status(value: f64, range: &str) -> LabStatus {
    let Some((low, high)) = range.split_once('-') else {
        return LabStatus::Pending;
    };
    let (Ok(low), Ok(high)) = (low.parse::<f64>(), high.parse::<f64>()) else {
        return LabStatus::Pending;
    };
    let span = high - low;
    if value < low - span || value > high + span {
        LabStatus::Critical
    } else if value < low || value > high {
        LabStatus::Abnormal
    } else {
        LabStatus::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::helpers::Page;
    use crate::repositories::patients::{PatientFilter, PatientService};

    #[test]
    fn same_seed_same_people() {
        let plan = SeedPlan {
            patients: 5,
            doctors: 2,
            ..Default::default()
        };
        let a = FakeSeeder::new(Some(7)).generate(&plan).unwrap();
        let b = FakeSeeder::new(Some(7)).generate(&plan).unwrap();

        let names = |set: &FixtureSet| {
            set.patients
                .iter()
                .map(|p| p["full_name"].as_str().unwrap_or_default().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&a), names(&b));
        assert_eq!(a.patients.len(), 5);
        assert_eq!(a.doctors.len(), 2);
        assert_eq!(a.patient_cards.len(), 5);
        assert_eq!(a.doctor_cards.len(), 2);
    }

    #[test]
    fn generated_ids_match_gender_and_birth_date() {
        let set = FakeSeeder::new(Some(42))
            .generate(&SeedPlan {
                patients: 30,
                doctors: 0,
                ..Default::default()
            })
            .unwrap();

        for raw in &set.patients {
            let patient: NewPatient = serde_json::from_value(raw.clone()).unwrap();
            let first = patient.full_name.as_str().split(' ').next().unwrap();
            let expected = if MALE_NAMES.contains(&first) {
                Gender::Male
            } else {
                Gender::Female
            };
            assert_eq!(patient.national_id.gender(), expected);
            assert!(patient.national_id.birth_date() < Utc::now().date_naive());
        }
    }

    #[test]
    fn seed_imports_everything() {
        let db = Database::open_in_memory().unwrap();
        let plan = SeedPlan {
            patients: 12,
            doctors: 3,
            ..Default::default()
        };
        let report = FakeSeeder::new(Some(1))
            .seed(&db, &Actor::system(), &plan)
            .expect("seed should succeed");

        assert_eq!(report.patients.inserted, 12);
        assert_eq!(report.doctors.inserted, 3);
        assert_eq!(report.patient_cards.inserted, 12);
        assert_eq!(report.doctor_cards.inserted, 3);
        assert_eq!(report.total_skipped(), 0);

        let patients = PatientService::new(db)
            .search(&PatientFilter::default(), &Page::default())
            .unwrap();
        assert_eq!(patients.len(), 12);
    }

    #[test]
    fn lab_status_classification() {
        assert_eq!(lab_status(80.0, "70-100"), LabStatus::Normal);
        assert_eq!(lab_status(110.0, "70-100"), LabStatus::Abnormal);
        assert_eq!(lab_status(240.0, "70-100"), LabStatus::Critical);
        assert_eq!(lab_status(1.0, "n/a"), LabStatus::Pending);
    }
}
