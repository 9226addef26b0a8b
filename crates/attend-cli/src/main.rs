use anyhow::{bail, Context, Result};
use attend_core::evaluator::EvaluationReport;
use attend_core::gallery::{display_fragment, is_allowed_image_name};
use attend_core::{
    evaluate_gallery, AttendanceDesk, CascadeDetector, DebugLog, Gallery, Normalizer, Predictor, SubjectId, Trainer,
};
use attend_store::{export_csv, Account, AccountDetails, NewAccount, Role, Store};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "attend", about = "Face recognition attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create data directories and database tables
    Init,
    /// Add training photos for a subject
    Enroll {
        #[arg(short, long)]
        subject: SubjectId,
        /// Display name used in sample file names and as the face name
        #[arg(short, long)]
        name: Option<String>,
        /// External id (student number, badge) used in sample file names
        #[arg(short, long)]
        uid: Option<String>,
        /// Retrain once all photos are saved
        #[arg(long)]
        train: bool,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Retrain both models from the gallery
    Train,
    /// Recognize the face in a photo
    Predict {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Score the gallery against the histogram model
    Evaluate {
        #[arg(long)]
        json: bool,
    },
    /// Inspect or prune training samples
    Gallery {
        #[command(subcommand)]
        command: GalleryCommands,
    },
    /// Manage login accounts
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// Manage subject display names
    FaceName {
        #[command(subcommand)]
        command: FaceNameCommands,
    },
    /// Mark attendance for an account from a photo
    Mark {
        #[arg(short, long)]
        account: String,
        file: PathBuf,
    },
    /// Show attendance records, newest first
    Records {
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Only this account's enrolled subject
        #[arg(short, long)]
        account: Option<String>,
        /// Write CSV to this file instead of printing
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Delete attendance records
    Clear {
        /// Only this date (YYYY-MM-DD); all records when omitted
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
enum GalleryCommands {
    /// List samples for a subject
    List {
        #[arg(short, long)]
        subject: SubjectId,
    },
    /// Delete one sample file
    Delete { path: PathBuf },
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Create an account
    Add {
        username: String,
        #[arg(short, long)]
        password: String,
        #[arg(long, default_value = "user")]
        role: Role,
        #[arg(long)]
        subject: Option<SubjectId>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        uid: Option<String>,
        #[arg(long)]
        section: Option<String>,
        #[arg(long)]
        course: Option<String>,
    },
    /// List accounts
    List,
    /// Change profile fields; omitted fields keep their current value
    Update {
        username: String,
        #[command(flatten)]
        changes: DetailChanges,
    },
    /// Bind an account to an enrolled subject
    Assign {
        username: String,
        #[arg(short, long)]
        subject: SubjectId,
    },
}

#[derive(Args, Default)]
struct DetailChanges {
    #[arg(long)]
    role: Option<Role>,
    #[arg(long)]
    subject: Option<SubjectId>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    uid: Option<String>,
    #[arg(long)]
    section: Option<String>,
    #[arg(long)]
    course: Option<String>,
}

impl DetailChanges {
    fn apply(self, account: &Account) -> AccountDetails {
        AccountDetails {
            role: self.role.unwrap_or(account.role),
            subject: self.subject.or(account.subject),
            name: self.name.or_else(|| account.name.clone()),
            uid: self.uid.or_else(|| account.uid.clone()),
            section: self.section.or_else(|| account.section.clone()),
            course: self.course.or_else(|| account.course.clone()),
        }
    }
}

#[derive(Subcommand)]
enum FaceNameCommands {
    /// Set the display name for a subject
    Set { subject: SubjectId, name: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Init => init(&config),
        Commands::Enroll {
            subject,
            name,
            uid,
            train: retrain,
            files,
        } => {
            enroll(&config, subject, name, uid, &files)?;
            if retrain {
                train(&config)?;
            }
            Ok(())
        }
        Commands::Train => train(&config),
        Commands::Predict { file, json } => predict(&config, &file, json),
        Commands::Evaluate { json } => evaluate(&config, json),
        Commands::Gallery { command } => gallery(&config, command),
        Commands::Account { command } => account(&config, command),
        Commands::FaceName {
            command: FaceNameCommands::Set { subject, name },
        } => {
            open_store(&config)?.set_face_name(subject, &name)?;
            println!("Subject {subject} is now '{name}'");
            Ok(())
        }
        Commands::Mark { account, file } => mark(&config, &account, &file),
        Commands::Records { date, account, csv } => records(&config, date, account.as_deref(), csv.as_deref()),
        Commands::Clear { date } => {
            let removed = open_store(&config)?.clear_attendance(date)?;
            println!("Removed {removed} attendance record(s)");
            Ok(())
        }
    }
}

fn init(config: &Config) -> Result<()> {
    for dir in [&config.data_dir, &config.attendance_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    if let Some(models) = config.recognition.histogram_model_path.parent() {
        std::fs::create_dir_all(models).with_context(|| format!("creating {}", models.display()))?;
    }
    Gallery::open(config.gallery.clone())?;
    open_store(config)?;
    println!("Initialized {}", config.data_dir.display());
    if !config.detector_model.exists() {
        println!(
            "Face detector model missing: place {} there or set ATTEND_DETECTOR_MODEL",
            config.detector_model.display()
        );
    }
    Ok(())
}

fn open_store(config: &Config) -> Result<Store> {
    let store = Store::open(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?
        .with_attendance_dir(&config.attendance_dir);
    store.initialize()?;
    Ok(store)
}

fn normalizer(config: &Config) -> Result<Normalizer<CascadeDetector>> {
    let detector = CascadeDetector::load(&config.detector_model)?;
    Ok(Normalizer::new(detector, &config.recognition))
}

fn enroll(
    config: &Config,
    subject: SubjectId,
    name: Option<String>,
    uid: Option<String>,
    files: &[PathBuf],
) -> Result<()> {
    let gallery = Gallery::open(config.gallery.clone())?;
    let normalizer = normalizer(config)?;
    let store = open_store(config)?;

    let (name, uid) = match (name, uid) {
        (None, None) => match store.account_by_subject(subject)? {
            Some(account) => (account.name, account.uid),
            None => (None, None),
        },
        given => given,
    };
    if let Some(name) = &name {
        store.set_face_name(subject, name)?;
    }
    let fragment = display_fragment(name.as_deref(), uid.as_deref());

    let mut saved = 0;
    for file in files {
        let file_name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if !is_allowed_image_name(file_name) {
            println!("skipped {}: not a jpg/jpeg/png file", file.display());
            continue;
        }
        let result = std::fs::read(file)
            .with_context(|| format!("reading {}", file.display()))
            .and_then(|bytes| Ok(normalizer.normalize_bytes_for_enrollment(&bytes)?))
            .and_then(|sample| Ok(gallery.save(subject, &sample, fragment.as_deref())?));
        match result {
            Ok(path) => {
                saved += 1;
                println!("saved {}", path.display());
            }
            Err(e) => println!("failed {}: {e:#}", file.display()),
        }
    }
    println!("Saved {saved} of {} image(s) for subject {subject}", files.len());
    Ok(())
}

fn train(config: &Config) -> Result<()> {
    let gallery = Gallery::open(config.gallery.clone())?;
    let report = Trainer::new(&gallery, &config.recognition).train()?;
    if !report.ok() {
        bail!(report.message());
    }
    println!("{}", report.message());
    if report.skipped > 0 {
        println!("Skipped {} unreadable gallery file(s)", report.skipped);
    }
    Ok(())
}

fn predict(config: &Config, file: &Path, json: bool) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let sample = normalizer(config)?.normalize_bytes(&bytes)?;
    let prediction = Predictor::load(&config.recognition)?.predict(&sample);
    if json {
        println!("{}", serde_json::to_string_pretty(&prediction)?);
    } else {
        println!("{}", prediction.describe());
        println!("{}", if prediction.accepted { "accepted" } else { "rejected" });
    }
    Ok(())
}

fn evaluate(config: &Config, json: bool) -> Result<()> {
    let gallery = Gallery::open(config.gallery.clone())?;
    let predictor = Predictor::load(&config.recognition)?;
    let report = evaluate_gallery(&gallery, &predictor)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_evaluation(&report);
    }
    Ok(())
}

fn print_evaluation(report: &EvaluationReport) {
    let o = &report.overall;
    println!("Samples evaluated: {} (skipped {})", o.count, report.skipped);
    println!(
        "Distances: min {:.2}, median {:.2}, mean {:.2}, max {:.2}",
        o.min, o.median, o.mean, o.max
    );
    println!();
    for s in &report.per_subject {
        println!(
            "subject {}: count={}, min={:.2}, median={:.2}, mean={:.2}, max={:.2}",
            s.subject, s.stats.count, s.stats.min, s.stats.median, s.stats.mean, s.stats.max
        );
    }
    println!();
    println!("Median of subject medians: {:.2}", report.median_of_medians);
    println!(
        "Recommended confidence threshold (lower is better): {:.2}",
        report.recommended_threshold
    );
    if !report.mismatches.is_empty() {
        println!();
        println!("Mismatches: {}", report.mismatches.len());
        for m in &report.mismatches {
            println!(
                "  {} expected={} predicted={} distance={:.2}",
                m.path.display(),
                m.expected,
                m.predicted,
                m.score
            );
        }
    }
}

fn gallery(config: &Config, command: GalleryCommands) -> Result<()> {
    let gallery = Gallery::open(config.gallery.clone())?;
    match command {
        GalleryCommands::List { subject } => {
            let paths = gallery.list(subject)?;
            for path in &paths {
                println!("{}", path.display());
            }
            println!("{} sample(s) for subject {subject}", paths.len());
        }
        GalleryCommands::Delete { path } => {
            gallery.delete(&path)?;
            println!("Deleted {}", path.display());
        }
    }
    Ok(())
}

fn account(config: &Config, command: AccountCommands) -> Result<()> {
    let store = open_store(config)?;
    match command {
        AccountCommands::Add {
            username,
            password,
            role,
            subject,
            name,
            uid,
            section,
            course,
        } => {
            let id = store.create_account(&NewAccount {
                username: username.clone(),
                password,
                details: AccountDetails {
                    role,
                    subject,
                    name,
                    uid,
                    section,
                    course,
                },
            })?;
            println!("Created account {username} (id {id})");
        }
        AccountCommands::List => {
            for a in store.list_accounts()? {
                println!(
                    "{:>4}  {:<20} {:<6} subject={:<6} {}",
                    a.id,
                    a.username,
                    a.role,
                    a.subject.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                    a.name.unwrap_or_default()
                );
            }
        }
        AccountCommands::Update { username, changes } => {
            let account = find_account(&store, &username)?;
            store.update_details(account.id, &changes.apply(&account))?;
            println!("Updated account {username}");
        }
        AccountCommands::Assign { username, subject } => {
            let account = find_account(&store, &username)?;
            store.assign_subject(account.id, subject)?;
            println!("Assigned subject {subject} to {username}");
        }
    }
    Ok(())
}

fn find_account(store: &Store, username: &str) -> Result<Account> {
    store
        .account_by_username(username)?
        .with_context(|| format!("no account named {username}"))
}

/// Subject enrolled for `username`; an account without one has no history.
fn enrolled_subject(store: &Store, username: &str) -> Result<SubjectId> {
    find_account(store, username)?
        .subject
        .with_context(|| format!("account {username} has no enrolled face"))
}

fn mark(config: &Config, account: &str, file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let normalizer = normalizer(config)?;
    let store = open_store(config)?;
    let desk = AttendanceDesk::new(&normalizer, &config.recognition, &store)
        .with_debug_log(DebugLog::new(&config.debug_log));

    let outcome = desk.mark_bytes(account, &bytes)?;
    println!("{}", outcome.prediction().describe());
    if !outcome.is_recorded() {
        bail!(outcome.message());
    }
    println!("{}", outcome.message());
    Ok(())
}

fn records(config: &Config, date: Option<NaiveDate>, account: Option<&str>, csv: Option<&Path>) -> Result<()> {
    let store = open_store(config)?;
    let rows = match account {
        Some(username) => store.read_subject_attendance(enrolled_subject(&store, username)?, date)?,
        None => store.read_attendance(date)?,
    };
    match csv {
        Some(path) => {
            let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
            export_csv(&rows, file)?;
            println!("Wrote {} record(s) to {}", rows.len(), path.display());
        }
        None => {
            for r in &rows {
                println!("{}  {:>6}  {}", r.timestamp, r.subject, r.name);
            }
            println!("{} record(s)", rows.len());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_accounts() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.initialize().unwrap();
        store
            .create_account(&NewAccount {
                username: "ada".into(),
                password: "pw".into(),
                details: AccountDetails {
                    subject: Some(SubjectId(7)),
                    name: Some("Ada".into()),
                    section: Some("A".into()),
                    ..AccountDetails::default()
                },
            })
            .unwrap();
        store
            .create_account(&NewAccount {
                username: "bob".into(),
                password: "pw".into(),
                details: AccountDetails::default(),
            })
            .unwrap();
        store
    }

    #[test]
    fn test_enrolled_subject_lookup() {
        let store = store_with_accounts();
        assert_eq!(enrolled_subject(&store, "ada").unwrap(), SubjectId(7));
        assert!(enrolled_subject(&store, "bob").is_err());
        assert!(enrolled_subject(&store, "nobody").is_err());
    }

    #[test]
    fn test_account_history_only_shows_own_rows() {
        let store = store_with_accounts();
        store.record_attendance(SubjectId(7), "Ada").unwrap();
        store.record_attendance(SubjectId(9), "Eve").unwrap();

        let subject = enrolled_subject(&store, "ada").unwrap();
        let rows = store.read_subject_attendance(subject, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Ada");
    }

    #[test]
    fn test_detail_changes_keep_omitted_fields() {
        let store = store_with_accounts();
        let account = find_account(&store, "ada").unwrap();
        let changes = DetailChanges {
            role: Some(Role::Admin),
            course: Some("CS".into()),
            ..DetailChanges::default()
        };
        store.update_details(account.id, &changes.apply(&account)).unwrap();

        let updated = find_account(&store, "ada").unwrap();
        assert_eq!(updated.role, Role::Admin);
        assert_eq!(updated.course.as_deref(), Some("CS"));
        assert_eq!(updated.subject, Some(SubjectId(7)));
        assert_eq!(updated.name.as_deref(), Some("Ada"));
        assert_eq!(updated.section.as_deref(), Some("A"));
    }

    #[test]
    fn test_cli_parses_update_and_history() {
        let cli = Cli::try_parse_from(["attend", "account", "update", "ada", "--role", "admin", "--subject", "7"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Account {
                command: AccountCommands::Update { ref username, ref changes }
            } if username == "ada" && changes.role == Some(Role::Admin) && changes.subject == Some(SubjectId(7))
        ));
        let cli = Cli::try_parse_from(["attend", "records", "--account", "ada"]).unwrap();
        assert!(matches!(cli.command, Commands::Records { account: Some(ref a), .. } if a == "ada"));
    }
}
