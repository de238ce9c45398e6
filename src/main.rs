mod config;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use lms_sync::lms::{Assignment, Course, GetAssignments, GetCourses, GetPlannables, IgnoreTodo, Plannable};
use lms_sync::session::Session;
use lms_sync::store::{CacheResult, CacheSource, Database, SqliteStorage};
use lms_sync::sync::{CancelHandle, FetchOptions, ProgressReporter, SyncEngine, SyncProgress, UseCase};
use lms_sync::transport::HttpTransport;

#[derive(Parser, Debug)]
#[command(name = "lms-sync")]
#[command(about = "Sync courses, to-dos and assignments from an LMS into a local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/lms-sync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Ignore cache freshness and always fetch
  #[arg(short, long, global = true)]
  force: bool,

  /// Fetch only the first page
  #[arg(long, global = true)]
  first_page: bool,

  /// Serve everything from the local cache
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Sync and list courses
  Courses,
  /// Sync and list planner to-dos
  Todos,
  /// Sync and list the assignments of a course
  Assignments { course: String },
  /// Hide a to-do on the server and locally
  IgnoreTodo {
    /// Plannable type, e.g. assignment
    plannable_type: String,
    plannable_id: String,
  },
  /// List cached records without syncing
  Show { what: Cached },
  /// Forget cache freshness so the next sync fetches
  ClearCache,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Cached {
  Courses,
  Todos,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging()?;

  let config = config::Config::load(args.config.as_deref())?;
  let offline = args.offline || config.cache.offline;

  let token = if offline {
    config::Config::get_api_token().ok()
  } else {
    Some(config::Config::get_api_token()?)
  };
  let mut session = Session::new(&config.api.url, config.api.user_id.clone())?
    .acting_as(config.api.act_as_user_id.clone());
  if let Some(token) = token {
    session = session.with_token(token);
  }

  let db_path = match &config.cache.path {
    Some(path) => path.clone(),
    None => SqliteStorage::default_path()?,
  };
  debug!(path = %db_path.display(), "opening store");
  let db = Database::new(SqliteStorage::open(&db_path)?);
  let transport = Arc::new(HttpTransport::new(config.api.timeout())?);
  let engine = SyncEngine::new(transport, db)
    .with_offline_mode(offline)
    .with_ttl(config.cache.ttl());

  let per_page = config.api.per_page;
  let options = fetch_options(&args);

  match args.command {
    Command::Courses => {
      let courses = engine
        .get_entities(&session, &GetCourses::new(per_page), options)
        .await?;
      print_source(&courses);
      print_courses(&courses.data);
    }
    Command::Todos => {
      let todos = GetPlannables::new(config.api.user_id.clone()).with_per_page(per_page);
      let result = engine.get_entities(&session, &todos, options).await?;
      print_source(&result);
      print_todos(&result.data);
    }
    Command::Assignments { course } => {
      let assignments = GetAssignments::new(course).with_per_page(per_page);
      let result = engine.get_entities(&session, &assignments, options).await?;
      print_source(&result);
      print_assignments(&result.data);
    }
    Command::IgnoreTodo {
      plannable_type,
      plannable_id,
    } => {
      if offline {
        return Err(eyre!("Cannot ignore a to-do in offline mode"));
      }
      let outcome = engine
        .fetch(&session, &IgnoreTodo::new(plannable_type, plannable_id), options)
        .await?;
      println!("Ignored ({} local record(s) removed)", outcome.deleted);
    }
    Command::Show { what } => match what {
      Cached::Courses => {
        let courses: Vec<Course> = engine.database().fetch(&GetCourses::new(per_page).scope())?;
        print_courses(&courses);
      }
      Cached::Todos => {
        let scope = GetPlannables::new(config.api.user_id.clone()).scope();
        let todos: Vec<Plannable> = engine.database().fetch(&scope)?;
        print_todos(&todos);
      }
    },
    Command::ClearCache => {
      let cleared = engine.clear_cache()?;
      println!("Cleared {} cache entries", cleared);
    }
  }

  Ok(())
}

/// Options for this invocation, cancelled on Ctrl-C, with progress logged.
fn fetch_options(args: &Args) -> FetchOptions {
  let mut options = FetchOptions {
    force: args.force,
    ..FetchOptions::default()
  };
  if args.first_page {
    options = options.first_page_only();
  }

  let cancel = CancelHandle::new();
  options = options.with_cancel(cancel.token());
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("interrupted, cancelling sync");
      cancel.cancel();
    }
  });

  let (progress, mut updates) = ProgressReporter::new();
  tokio::spawn(async move {
    while updates.changed().await.is_ok() {
      let state = updates.borrow_and_update().clone();
      match state {
        SyncProgress::Loading { pages, items } if pages > 0 => {
          eprintln!("  fetched {} page(s), {} item(s)", pages, items)
        }
        SyncProgress::Downloaded { pages, items, deleted } => {
          debug!(pages, items, deleted, "download finished")
        }
        _ => {}
      }
    }
  });

  options.with_progress(progress)
}

/// Log to <data dir>/lms-sync/lms-sync.log, filtered by LMS_SYNC_LOG (default: info).
fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let dir = dirs::data_dir()
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("lms-sync");
  std::fs::create_dir_all(&dir)?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, "lms-sync.log"));
  let filter = EnvFilter::try_from_env("LMS_SYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_ansi(false)
    .with_writer(writer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

fn print_source<T>(result: &CacheResult<T>) {
  let when = result
    .cached_at
    .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
    .unwrap_or_else(|| "never".to_string());
  match result.source {
    CacheSource::Network => println!("(synced just now)"),
    CacheSource::CacheFresh => println!("(cached, last synced {})", when),
    CacheSource::Offline => println!("(offline, last synced {})", when),
  }
}

fn print_courses(courses: &[Course]) {
  if courses.is_empty() {
    println!("No courses");
  }
  for course in courses {
    let favorite = if course.is_favorite { "*" } else { " " };
    let offline = if course.has_offline_content { " [offline]" } else { "" };
    println!(
      "{} {:>8}  {}{}",
      favorite,
      course.id,
      course.display_name(),
      offline
    );
  }
}

fn print_todos(todos: &[Plannable]) {
  if todos.is_empty() {
    println!("Nothing to do");
  }
  for todo in todos {
    let done = if todo.marked_complete { "x" } else { " " };
    println!(
      "[{}] {}  {:<12} {}  ({})",
      done,
      todo.plannable_date.format("%Y-%m-%d"),
      todo.plannable_type,
      todo.title,
      todo.id
    );
  }
}

fn print_assignments(assignments: &[Assignment]) {
  if assignments.is_empty() {
    println!("No assignments");
  }
  for assignment in assignments {
    let due = assignment
      .due_at
      .map(|d| d.format("%Y-%m-%d").to_string())
      .unwrap_or_else(|| "no due date".to_string());
    println!("{:>8}  {:<40} {}", assignment.id, assignment.name, due);
  }
}
