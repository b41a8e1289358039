use std::fmt;

use mentor_core::model::{CourseFilter, CourseId, LessonId, ViewerId};
use services::{AppServices, Clock, SyncConfig, ViewerSession};
use storage::rest::RestConfig;
use storage::seed::seed_sample_catalog;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingArgument { name: &'static str },
    MissingViewer,
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidViewer { raw: String },
    InvalidCourseId { raw: String },
    InvalidLessonId { raw: String },
    InvalidFilter { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingArgument { name } => write!(f, "missing <{name}>"),
            ArgsError::MissingViewer => {
                write!(f, "a viewer id is required (--viewer or MENTOR_VIEWER_ID)")
            }
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidViewer { raw } => write!(f, "invalid viewer id (expected UUID): {raw}"),
            ArgsError::InvalidCourseId { raw } => write!(f, "invalid course id: {raw:?}"),
            ArgsError::InvalidLessonId { raw } => write!(f, "invalid lesson id: {raw:?}"),
            ArgsError::InvalidFilter { raw } => write!(
                f,
                "invalid --filter value: {raw} (expected all, in-progress, completed, not-started)"
            ),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- seed     [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- courses  [--db <sqlite_url>] [--viewer <uuid>] [--filter <filter>]");
    eprintln!("  cargo run -p app -- progress [--db <sqlite_url>] [--viewer <uuid>]");
    eprintln!("  cargo run -p app -- complete <course_id> <lesson_id> [--db <sqlite_url>] [--viewer <uuid>]");
    eprintln!("  cargo run -p app -- enroll   <course_id> [--db <sqlite_url>] [--viewer <uuid>]");
    eprintln!("  cargo run -p app -- sync     [--db <sqlite_url>] [--watch]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://mentor.sqlite3");
    eprintln!("  --filter all");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  MENTOR_DB_URL, MENTOR_VIEWER_ID, MENTOR_LOG");
    eprintln!("  MENTOR_BACKEND_URL, MENTOR_BACKEND_KEY, MENTOR_BACKEND_TIMEOUT_SECS");
    eprintln!("  MENTOR_SYNC_INTERVAL_SECS, MENTOR_SYNC_MAX_ATTEMPTS");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Seed,
    Courses,
    Progress,
    Complete,
    Enroll,
    Sync,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "seed" => Some(Self::Seed),
            "courses" => Some(Self::Courses),
            "progress" => Some(Self::Progress),
            "complete" => Some(Self::Complete),
            "enroll" => Some(Self::Enroll),
            "sync" => Some(Self::Sync),
            _ => None,
        }
    }

    fn needs_viewer(self) -> bool {
        matches!(
            self,
            Self::Courses | Self::Progress | Self::Complete | Self::Enroll
        )
    }
}

struct Args {
    db_url: String,
    viewer: Option<ViewerId>,
    filter: CourseFilter,
    watch: bool,
    positionals: Vec<String>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("MENTOR_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://mentor.sqlite3".into(), normalize_sqlite_url);
        let mut viewer = match std::env::var("MENTOR_VIEWER_ID") {
            Ok(raw) => Some(parse_viewer(raw)?),
            Err(_) => None,
        };
        let mut filter = CourseFilter::All;
        let mut watch = false;
        let mut positionals = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--viewer" => {
                    viewer = Some(parse_viewer(require_value(args, "--viewer")?)?);
                }
                "--filter" => {
                    filter = parse_filter(require_value(args, "--filter")?)?;
                }
                "--watch" => watch = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                other if other.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ => positionals.push(arg),
            }
        }

        Ok(Self {
            db_url,
            viewer,
            filter,
            watch,
            positionals,
        })
    }

    fn viewer(&self) -> Result<ViewerId, ArgsError> {
        self.viewer.ok_or(ArgsError::MissingViewer)
    }

    fn course_id(&self) -> Result<CourseId, ArgsError> {
        let raw = self
            .positionals
            .first()
            .ok_or(ArgsError::MissingArgument { name: "course_id" })?;
        CourseId::new(raw.as_str()).map_err(|_| ArgsError::InvalidCourseId { raw: raw.clone() })
    }

    fn lesson_id(&self) -> Result<LessonId, ArgsError> {
        let raw = self
            .positionals
            .get(1)
            .ok_or(ArgsError::MissingArgument { name: "lesson_id" })?;
        LessonId::new(raw.as_str()).map_err(|_| ArgsError::InvalidLessonId { raw: raw.clone() })
    }
}

fn parse_viewer(raw: String) -> Result<ViewerId, ArgsError> {
    raw.parse().map_err(|_| ArgsError::InvalidViewer { raw })
}

fn parse_filter(raw: String) -> Result<CourseFilter, ArgsError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "all" => Ok(CourseFilter::All),
        "in-progress" => Ok(CourseFilter::InProgress),
        "completed" => Ok(CourseFilter::Completed),
        "not-started" => Ok(CourseFilter::NotStarted),
        _ => Err(ArgsError::InvalidFilter { raw }),
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("MENTOR_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn list_courses(services: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let session = ViewerSession::sign_in(services, args.viewer()?).await;
    let progress = session.progress();
    let courses = progress.filter_courses(args.filter);
    if courses.is_empty() {
        println!("No courses.");
    }
    for course in courses {
        let snapshot = progress.get_progress(course.id());
        let meta = course.meta();
        println!(
            "{:<8} {:<32} {:>3}%  {}/{} lessons  {}{}",
            course.id(),
            course.title(),
            snapshot.percent_complete(),
            snapshot.completed_count(),
            snapshot.total_lessons(),
            meta.level.as_deref().unwrap_or("-"),
            meta.duration_label
                .as_deref()
                .map(|d| format!(", {d}"))
                .unwrap_or_default(),
        );
    }
    if !session.is_entitled() {
        println!("(no active subscription: lessons are locked)");
    }
    Ok(())
}

async fn show_progress(services: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let session = ViewerSession::sign_in(services, args.viewer()?).await;
    let progress = session.progress();
    for course in progress.catalog().courses() {
        let snapshot = progress.get_progress(course.id());
        let resume = progress
            .resume_lesson(course.id())
            .map_or_else(|| "done".to_string(), |l| format!("next: {}", l.title()));
        println!(
            "{:<8} {:?}  {}%  ({resume})",
            course.id(),
            snapshot.state(),
            snapshot.percent_complete(),
        );
    }
    let totals = progress.aggregate();
    println!(
        "started {} | completed {} | lessons {}/{}",
        totals.total_courses_started,
        totals.total_courses_completed,
        totals.total_lessons_completed,
        totals.total_lessons_available,
    );
    Ok(())
}

async fn complete_lesson(services: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let course_id = args.course_id()?;
    let lesson_id = args.lesson_id()?;
    let mut session = ViewerSession::sign_in(services, args.viewer()?).await;
    let snapshot = session.complete_lesson(&course_id, &lesson_id).await?;

    let catalog = session.progress().catalog();
    if let Some(position) = catalog.lesson_position(&course_id, &lesson_id) {
        println!("Completed lesson {} of {}.", position.number, position.of);
    }
    println!(
        "{course_id}: {}% ({}/{})",
        snapshot.percent_complete(),
        snapshot.completed_count(),
        snapshot.total_lessons()
    );
    match catalog.next_lesson(&course_id, &lesson_id) {
        Some(next) => println!("Up next: {} [{}]", next.title(), next.id()),
        None => println!("That was the last lesson in this course."),
    }
    session.sign_out().await;
    Ok(())
}

async fn enroll(services: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let course_id = args.course_id()?;
    let mut session = ViewerSession::sign_in(services, args.viewer()?).await;
    let snapshot = session.enroll(&course_id).await?;
    println!("Enrolled in {course_id} ({}%).", snapshot.percent_complete());
    session.sign_out().await;
    Ok(())
}

async fn sync(services: &AppServices, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let relay = services.relay();
    if !args.watch {
        let report = relay.drain_once().await?;
        println!(
            "delivered {} | retrying {} | dead {} | pruned {} | pending {}",
            report.delivered,
            report.retried,
            report.dead,
            report.pruned,
            relay.pending_count().await?
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });
    relay.run(shutdown_rx).await;
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let args = Args::parse(&mut argv)
        .and_then(|args| {
            if cmd.needs_viewer() {
                args.viewer()?;
            }
            Ok(args)
        })
        .map_err(|e| {
            eprintln!("{e}");
            print_usage();
            e
        })?;

    init_logging();

    prepare_sqlite_file(&args.db_url)?;
    let services = AppServices::new_sqlite(
        &args.db_url,
        Clock::default(),
        RestConfig::from_env()?,
        SyncConfig::from_env(),
    )
    .await?;
    tracing::debug!(db = %args.db_url, ?cmd, "services ready");

    match cmd {
        Command::Seed => {
            let seeded = seed_sample_catalog(services.courses().as_ref()).await?;
            println!("Seeded {seeded} courses into {}", args.db_url);
            Ok(())
        }
        Command::Courses => list_courses(&services, &args).await,
        Command::Progress => show_progress(&services, &args).await,
        Command::Complete => complete_lesson(&services, &args).await,
        Command::Enroll => enroll(&services, &args).await,
        Command::Sync => sync(&services, &args).await,
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
