use anyhow::Context;
use clap::{Parser, Subcommand};
use medlink_core::config::database_path_from_env_value;
use medlink_core::hardware::{CardReader, SerialCardReader};
use medlink_core::seed::{import_fixtures, load_fixtures, FakeSeeder, SeedPlan};
use medlink_core::{
    Actor, AuditFilter, AuditService, CardService, Database, Identity, IdentityResolver,
    MedLinkError, MedLinkResult, NewUser, Page, PatientFilter, PatientService, UserService,
};
use medlink_types::{CardUid, NationalId, NonEmptyText, Role};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "medlink")]
#[command(about = "MedLink clinic records CLI")]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "MEDLINK_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database (or apply pending migrations)
    InitDb,
    /// Create a login account
    CreateUser {
        username: String,
        /// Full name as shown to patients
        full_name: String,
        /// admin, doctor or patient
        #[arg(long, default_value = "doctor")]
        role: Role,
        /// Initial password
        #[arg(long, env = "MEDLINK_NEW_PASSWORD")]
        password: String,
        #[arg(long)]
        specialty: Option<String>,
        /// National id of the patient a patient account belongs to
        #[arg(long)]
        patient: Option<NationalId>,
    },
    /// List patients, optionally filtered by name, national id or phone
    ListPatients {
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Print a patient's full record as JSON
    ShowPatient { national_id: NationalId },
    /// Register an NFC card
    IssueCard {
        #[command(subcommand)]
        holder: CardHolder,
    },
    /// Revoke a lost or stolen card
    RevokeCard { uid: CardUid },
    /// Resolve a card UID to its holder, reading from the card reader when no UID is given
    ResolveCard {
        uid: Option<CardUid>,
        /// Serial device of the reader (defaults to MEDLINK_CARD_READER)
        #[arg(long, env = "MEDLINK_CARD_READER")]
        device: Option<PathBuf>,
        /// Keep resolving scans until the reader closes
        #[arg(long)]
        watch: bool,
    },
    /// Import a JSON fixture document
    Import { path: PathBuf },
    /// Fill the database with random demo data
    Seed {
        #[arg(long, default_value_t = 20)]
        patients: usize,
        #[arg(long, default_value_t = 3)]
        doctors: usize,
        /// RNG seed for reproducible data
        #[arg(long)]
        seed: Option<u64>,
        /// Do not issue NFC cards
        #[arg(long)]
        no_cards: bool,
    },
    /// Show recent audit log entries
    Audit {
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        action: Option<String>,
    },
}

#[derive(Subcommand)]
enum CardHolder {
    /// Staff card for a doctor or admin account
    Doctor { uid: CardUid, username: String },
    /// Patient card
    Patient { uid: CardUid, national_id: NationalId },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("medlink_core=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'medlink --help' for commands");
        return Ok(());
    };

    let path = cli
        .database
        .unwrap_or_else(|| database_path_from_env_value(None));
    let db = Database::open(&path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    let actor = Actor::system();

    match command {
        Commands::InitDb => {
            println!(
                "Database {} is at schema version {}",
                path.display(),
                db.schema_version()?
            );
        }
        Commands::CreateUser {
            username,
            full_name,
            role,
            password,
            specialty,
            patient,
        } => {
            let mut new = NewUser::new(username, password, NonEmptyText::new(full_name)?, role);
            new.specialty = specialty;
            new.patient_national_id = patient;
            let user = UserService::new(db).add(&actor, new)?;
            println!("Created {} account '{}' (id {})", user.role, user.username, user.id);
        }
        Commands::ListPatients { query, limit } => {
            let filter = PatientFilter {
                query,
                ..PatientFilter::default()
            };
            let patients = PatientService::new(db).search(&filter, &Page::new(limit, 0))?;
            if patients.is_empty() {
                println!("No patients found.");
            }
            for patient in patients {
                println!(
                    "{}  {:<30} {} {}",
                    patient.national_id, patient.full_name, patient.gender, patient.date_of_birth
                );
            }
        }
        Commands::ShowPatient { national_id } => {
            let record = PatientService::new(db).summary(&national_id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::IssueCard { holder } => {
            let cards = CardService::new(db.clone());
            let card = match holder {
                CardHolder::Doctor { uid, username } => {
                    let user = UserService::new(db).get_by_username(&username)?;
                    cards.issue_doctor_card(&actor, &uid, user.id)?
                }
                CardHolder::Patient { uid, national_id } => {
                    cards.issue_patient_card(&actor, &uid, &national_id)?
                }
            };
            println!("Issued card {}", card.card_uid);
        }
        Commands::RevokeCard { uid } => {
            CardService::new(db).revoke(&actor, &uid)?;
            println!("Revoked card {}", uid);
        }
        Commands::ResolveCard { uid, device, watch } => {
            let resolver = IdentityResolver::new(db);
            if let Some(uid) = uid {
                print_resolution(&uid, resolver.resolve_card(&uid));
                return Ok(());
            }

            let device = device.context("no card UID given and no reader device configured")?;
            let mut reader = SerialCardReader::open(&device)?;
            println!("Waiting for cards on {} ...", device.display());
            loop {
                match reader.read_uid() {
                    Ok(uid) => print_resolution(&uid, resolver.resolve_card(&uid)),
                    Err(MedLinkError::Hardware(reason)) => {
                        eprintln!("Card reader stopped: {}", reason);
                        break;
                    }
                    Err(e) => eprintln!("Unreadable scan: {}", e),
                }
                if !watch {
                    break;
                }
            }
        }
        Commands::Import { path } => {
            let set = load_fixtures(&path)?;
            let report = import_fixtures(&db, &set, &actor)?;
            println!(
                "Imported {} rows, skipped {}: {}",
                report.total_inserted(),
                report.total_skipped(),
                report.summary()
            );
        }
        Commands::Seed {
            patients,
            doctors,
            seed,
            no_cards,
        } => {
            let plan = SeedPlan {
                patients,
                doctors,
                issue_cards: !no_cards,
                ..SeedPlan::default()
            };
            let report = FakeSeeder::new(seed).seed(&db, &actor, &plan)?;
            println!("Seeded {} rows: {}", report.total_inserted(), report.summary());
            println!("Generated doctors use the password '{}'", plan.doctor_password);
        }
        Commands::Audit {
            limit,
            actor,
            action,
        } => {
            let filter = AuditFilter {
                actor,
                action,
                ..AuditFilter::default()
            };
            let entries = AuditService::new(db).search(&filter, &Page::new(limit, 0))?;
            for entry in entries {
                println!(
                    "{} {:<16} {:<16} {}:{} {}",
                    entry.at.format("%Y-%m-%d %H:%M:%S"),
                    entry.actor,
                    entry.action,
                    entry.entity,
                    entry.entity_id.as_deref().unwrap_or("-"),
                    entry.details.as_deref().unwrap_or("")
                );
            }
        }
    }

    Ok(())
}

fn print_resolution(uid: &CardUid, outcome: MedLinkResult<Identity>) {
    match outcome {
        Ok(identity) => println!(
            "{} -> {} {} ({})",
            uid,
            identity.role(),
            identity.subject(),
            identity.display_name()
        ),
        Err(e) => eprintln!("{} -> rejected: {}", uid, e),
    }
}
