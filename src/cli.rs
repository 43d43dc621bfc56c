use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::auth::{AuthError, AuthService, LocalAuthService};
use crate::calendar;
use crate::config::Config;
use crate::database::{Database, DatabaseError};
use crate::guard::{
    format_countdown, AttemptGuard, Credentials, InactivityEvent, InactivityMonitor, LoginFlow,
    LoginOutcome, PasswordResetOutcome, RegisterOutcome, SystemClock,
};
use crate::models::{Task, User};
use crate::storage::{SqliteDocumentStore, SqliteKeyValueStore};
use crate::sync::{SyncError, TaskSync};
use crate::utils::{format_date, parse_date, today};

#[derive(Parser)]
#[command(name = "smarttask")]
#[command(about = "SmartTask - tasks, calendar and a lockout-guarded login")]
#[command(version)]
pub struct Cli {
    /// Custom config file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Use development mode (uses separate dev config/database)
    #[arg(long)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an account
    Register {
        email: String,
        #[arg(long)]
        password: String,
        /// Repeat the password
        #[arg(long)]
        confirm: String,
    },
    /// Sign in; prompts for anything not given
    Login {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// If the address is unverified, send the verification email again
        #[arg(long)]
        resend_verification: bool,
    },
    /// Sign out
    Logout,
    /// Show the signed-in account
    Whoami,
    /// Request a password reset
    ResetPassword { email: String },
    /// Add a task
    Add {
        title: String,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,
    },
    /// List tasks
    List,
    /// Mark a task done or not done
    Toggle { id: String },
    /// Change a task's title and due date
    Edit {
        id: String,
        title: String,
        /// Due date (YYYY-MM-DD); omitted clears it
        #[arg(long)]
        due: Option<String>,
    },
    /// Delete a task
    Delete { id: String },
    /// Show marked dates and the tasks due on one day
    Calendar {
        /// Day to show (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<String>,
    },
    /// Task totals
    Dashboard,
    /// Keep the task list refreshed and print it when it changes
    Watch,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),
    #[error("Sync error: {0}")]
    SyncError(#[from] SyncError),
    #[error("{}", .0.message())]
    AuthError(#[from] AuthError),
    #[error("Failed to parse date: {0}")]
    DateParseError(String),
    #[error("Not signed in. Run `smarttask login` first.")]
    NotSignedIn,
    #[error("No task with id {0}")]
    TaskNotFound(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Everything a command needs, wired from the loaded config
pub struct Context {
    pub config: Config,
    pub kv: Arc<SqliteKeyValueStore>,
    pub auth: Arc<LocalAuthService>,
    pub sync: TaskSync,
}

impl Context {
    pub fn open(config: Config) -> Result<Self, CliError> {
        let db_path = config.get_database_path();
        let db = Database::new(&db_path.to_string_lossy())?;
        Ok(Self::with_database(config, db))
    }

    pub fn with_database(config: Config, db: Database) -> Self {
        let kv = Arc::new(SqliteKeyValueStore::new(db.clone()));
        let auth = Arc::new(LocalAuthService::new(db.clone(), kv.clone()));
        let store = Arc::new(SqliteDocumentStore::new(db));
        let sync = TaskSync::new(store, config.tasks_collection.clone());
        Self { config, kv, auth, sync }
    }

    pub fn login_flow(&self) -> LoginFlow {
        let guard = AttemptGuard::load(self.kv.clone(), &self.config.security, Arc::new(SystemClock));
        LoginFlow::new(self.auth.clone(), guard)
    }

    async fn require_user(&self) -> Result<User, CliError> {
        self.auth.current_user().await.ok_or(CliError::NotSignedIn)
    }

    /// Refresh, surfacing a store failure instead of showing stale data
    async fn load_tasks(&self) -> Result<Vec<Task>, CliError> {
        self.sync.try_refresh().await?;
        Ok(self.sync.tasks().await)
    }

    async fn find_task(&self, id: &str) -> Result<Task, CliError> {
        self.sync.try_refresh().await?;
        self.sync
            .task(id)
            .await
            .ok_or_else(|| CliError::TaskNotFound(id.to_string()))
    }
}

fn parse_due(due: Option<String>) -> Result<Option<chrono::NaiveDate>, CliError> {
    due.map(|s| {
        parse_date(&s).map_err(|e| CliError::DateParseError(format!("Invalid date format '{}': {}", s, e)))
    })
    .transpose()
}

fn print_task(task: &Task) {
    let mark = if task.completed { "x" } else { " " };
    match task.due_date {
        Some(due) => println!("[{}] {}  {}  (due {})", mark, task.id, task.title, format_date(due)),
        None => println!("[{}] {}  {}", mark, task.id, task.title),
    }
}

/// Handle the register command
pub async fn handle_register(ctx: &Context, email: String, password: String, confirm: String) -> Result<(), CliError> {
    match ctx.login_flow().register(&email, &password, &confirm).await {
        RegisterOutcome::Registered(user) => {
            println!("Account created for {}. You can now log in.", user.email);
        }
        RegisterOutcome::Invalid(errors) => {
            for error in errors {
                println!("{:?}: {}", error.field, error.message);
            }
        }
        RegisterOutcome::Failed { message, .. } => println!("Registration failed: {}", message),
    }
    Ok(())
}

/// Handle the login command
pub async fn handle_login(
    ctx: &Context,
    email: Option<String>,
    password: Option<String>,
    resend_verification: bool,
) -> Result<(), CliError> {
    let mut flow = ctx.login_flow();

    let credentials = match (email, password) {
        (Some(email), Some(password)) => Credentials { email, password },
        (email, _) => {
            let prefilled = Credentials {
                email: email.unwrap_or_default(),
                password: String::new(),
            };
            match prompt_credentials(ctx, prefilled).await? {
                Some(credentials) => credentials,
                None => return Ok(()),
            }
        }
    };

    match flow.login(&credentials.email, &credentials.password).await {
        LoginOutcome::SignedIn(user) => println!("Signed in as {}.", user.email),
        LoginOutcome::Invalid(errors) => {
            for error in errors {
                println!("{:?}: {}", error.field, error.message);
            }
        }
        LoginOutcome::Locked { remaining_secs, message } => {
            println!("Account locked. {}", message);
            println!("Unlocks in {}.", format_countdown(remaining_secs));
            // Let the countdown clear the persisted state if the user waits it out.
            if let Some(mut countdown) = flow.start_lockout_countdown() {
                tokio::select! {
                    _ = async { while let Some(secs) = countdown.recv().await { if secs == 0 { break; } } } => {
                        println!("Lockout over. You can try again.");
                    }
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
        }
        LoginOutcome::Failed { message, .. } => println!("Login failed: {}", message),
        LoginOutcome::Unverified { email } => {
            println!("Please verify {} before logging in. Check your inbox for the verification email.", email);
            if !resend_verification {
                println!("Run again with --resend-verification to get a new email.");
            } else {
                match flow.resend_verification(&email, &credentials.password).await {
                    Ok(_) => println!("Verification email sent. Check your inbox and spam folder."),
                    Err(e) => {
                        tracing::warn!(code = e.code(), "resending verification failed");
                        println!("Unable to send verification email. Please try again later.");
                    }
                }
            }
        }
    }
    Ok(())
}

/// Read email then password from stdin while the inactivity monitor runs.
/// Returns `None` if stdin closes.
async fn prompt_credentials(ctx: &Context, prefilled: Credentials) -> Result<Option<Credentials>, CliError> {
    let credentials = Arc::new(Mutex::new(prefilled));
    let (monitor, mut events) = InactivityMonitor::from_config(&ctx.config.security, credentials.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let needs_email = |c: &Arc<Mutex<Credentials>>| c.lock().unwrap_or_else(|e| e.into_inner()).email.is_empty();
    prompt(if needs_email(&credentials) { "Email: " } else { "Password: " })?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(None);
                };
                monitor.on_keystroke();
                let mut creds = credentials.lock().unwrap_or_else(|e| e.into_inner());
                if creds.email.is_empty() {
                    creds.email = line.trim().to_string();
                    drop(creds);
                    prompt("Password: ")?;
                } else {
                    creds.password = line;
                    break;
                }
            }
            Some(event) = events.recv() => match event {
                InactivityEvent::Warning { seconds_left } => {
                    if seconds_left % 15 == 0 || seconds_left <= 5 {
                        eprintln!("\nSession expires in {} unless you type something.", format_countdown(seconds_left));
                    }
                }
                InactivityEvent::WarningCancelled => {}
                InactivityEvent::SessionExpired => {
                    eprintln!("\nSession expired. You've been logged out due to inactivity.");
                    prompt("Email: ")?;
                }
            }
        }
    }

    monitor.stop();
    let credentials = credentials.lock().unwrap_or_else(|e| e.into_inner()).clone();
    Ok(Some(credentials))
}

fn prompt(text: &str) -> Result<(), CliError> {
    print!("{}", text);
    std::io::stdout().flush()?;
    Ok(())
}

pub async fn handle_logout(ctx: &Context) -> Result<(), CliError> {
    ctx.login_flow().logout().await?;
    println!("Logged out.");
    Ok(())
}

pub async fn handle_whoami(ctx: &Context) -> Result<(), CliError> {
    let user = ctx.require_user().await?;
    let state = if user.verified { "verified" } else { "unverified" };
    println!("Logged in as {} ({})", user.email, state);
    Ok(())
}

pub async fn handle_reset_password(ctx: &Context, email: String) -> Result<(), CliError> {
    match ctx.login_flow().request_password_reset(&email).await {
        PasswordResetOutcome::Sent { email } => {
            println!("Password reset requested for {}. The link expires in 1 hour.", email);
        }
        PasswordResetOutcome::Invalid(error) => println!("{}", error.message),
        PasswordResetOutcome::Failed { message, .. } => println!("Reset failed: {}", message),
    }
    Ok(())
}

/// Handle the add command
pub async fn handle_add(ctx: &Context, title: String, due: Option<String>) -> Result<(), CliError> {
    ctx.require_user().await?;
    let due_date = parse_due(due)?;
    match ctx.sync.create(&title, due_date).await? {
        Some(id) => println!("Task created successfully (ID: {})", id),
        None => println!("Title is required; nothing was added."),
    }
    Ok(())
}

pub async fn handle_list(ctx: &Context) -> Result<(), CliError> {
    ctx.require_user().await?;
    let tasks = ctx.load_tasks().await?;
    if tasks.is_empty() {
        println!("No tasks yet.");
    }
    for task in &tasks {
        print_task(task);
    }
    Ok(())
}

pub async fn handle_toggle(ctx: &Context, id: String) -> Result<(), CliError> {
    ctx.require_user().await?;
    let task = ctx.find_task(&id).await?;
    ctx.sync.toggle(&task).await?;
    let state = if task.completed { "not done" } else { "done" };
    println!("Marked '{}' as {}.", task.title, state);
    Ok(())
}

pub async fn handle_edit(ctx: &Context, id: String, title: String, due: Option<String>) -> Result<(), CliError> {
    ctx.require_user().await?;
    let due_date = parse_due(due)?;
    ctx.find_task(&id).await?;
    if ctx.sync.update(&id, &title, due_date).await? {
        println!("Task {} updated.", id);
    } else {
        println!("Title is required; task left unchanged.");
    }
    Ok(())
}

pub async fn handle_delete(ctx: &Context, id: String) -> Result<(), CliError> {
    ctx.require_user().await?;
    let task = ctx.find_task(&id).await?;
    ctx.sync.delete(&id).await?;
    println!("Deleted '{}'.", task.title);
    Ok(())
}

pub async fn handle_calendar(ctx: &Context, date: Option<String>) -> Result<(), CliError> {
    ctx.require_user().await?;
    let selected = parse_due(date)?.unwrap_or_else(today);
    let tasks = ctx.load_tasks().await?;

    for (day, marker) in calendar::marked_dates(&tasks) {
        let selected_mark = if day == selected { "*" } else { " " };
        println!(
            "{} {}  {}/{} done  ({})",
            selected_mark,
            format_date(day),
            marker.completed,
            marker.total,
            marker.status().dot_color()
        );
    }

    let on_day = calendar::tasks_on(&tasks, Some(selected));
    println!("\nTasks on {} ({})", format_date(selected), on_day.len());
    if on_day.is_empty() {
        println!("No tasks scheduled for this day.");
    }
    for task in &on_day {
        print_task(task);
    }
    Ok(())
}

pub async fn handle_dashboard(ctx: &Context) -> Result<(), CliError> {
    let user = ctx.require_user().await?;
    let summary = calendar::summarize(&ctx.load_tasks().await?);
    println!("Dashboard for {}", user.email);
    println!("Total Tasks: {}", summary.total);
    println!("Completed: {}", summary.completed);
    println!("Pending: {}", summary.pending);
    println!("{}", summary.message());
    Ok(())
}

/// Poll the store and reprint the list whenever the cached tasks change
pub async fn handle_watch(ctx: &Context) -> Result<(), CliError> {
    ctx.require_user().await?;
    let poll_interval = ctx.config.poll_interval();
    ctx.sync.refresh().await;
    let polling = ctx.sync.start_polling(poll_interval);

    let mut shown: Option<Vec<Task>> = None;
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let tasks = ctx.sync.tasks().await;
                if shown.as_ref() != Some(&tasks) {
                    println!("--- {} task(s) ---", tasks.len());
                    for task in &tasks {
                        print_task(task);
                    }
                    shown = Some(tasks);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    polling.cancel();
    Ok(())
}
