//! attendance: command-line client for the attendance daemon.
//!
//! Resolves the device location for office check-ins and issues session
//! operations over the daemon socket.
//!
//! ## Subcommands
//!
//! - `start`, `pause`, `resume`, `end`, `status`: today's work session
//! - `watch`: live transitions for one employee or everyone
//! - `progress`: record today's daily progress note
//! - `review`: admin review queue for force-closed days
//! - `history`, `health`

mod commands;
mod daemon_client;
mod device;
mod error;
mod ip;
mod locate;
mod logging;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use error::ClientError;

const EMPLOYEE_ENV: &str = "ATTENDANCE_EMPLOYEE_ID";

#[derive(Parser)]
#[command(name = "attendance")]
#[command(about = "Attendance session client")]
#[command(version)]
struct Cli {
    /// Employee id (defaults to $ATTENDANCE_EMPLOYEE_ID)
    #[arg(long, global = true)]
    employee: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start today's session
    Start {
        /// Work from home; skips location and geofence checks
        #[arg(long)]
        remote: bool,

        /// Device fix file written by the platform location agent
        #[arg(long, value_name = "PATH")]
        device_fix: Option<PathBuf>,

        /// Do not fall back to IP geolocation
        #[arg(long)]
        no_ip_fallback: bool,
    },

    /// Pause the running session
    Pause,

    /// Resume a paused session
    Resume,

    /// End today's session
    End {
        /// Attach a best-effort location fix
        #[arg(long)]
        locate: bool,

        #[arg(long, value_name = "PATH")]
        device_fix: Option<PathBuf>,
    },

    /// Show today's session
    Status,

    /// Stream live status transitions
    Watch {
        /// Every employee instead of one
        #[arg(long)]
        all: bool,
    },

    /// Record today's progress note
    Progress {
        #[arg(value_name = "NOTE")]
        note: String,
    },

    /// Admin review queue
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },

    /// Credited hours history
    History {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Daemon health
    Health,
}

#[derive(Subcommand)]
enum ReviewAction {
    /// List entries awaiting a decision
    List,

    /// Credit hours for an entry (clamped to its capped hours)
    Approve {
        #[arg(value_name = "ID")]
        entry_id: i64,

        #[arg(value_name = "HOURS")]
        hours: f64,
    },

    /// Credit zero hours for an entry
    Reject {
        #[arg(value_name = "ID")]
        entry_id: i64,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        let (message, informational) = commands::describe_error(&err);
        if informational {
            println!("{}", message);
            return;
        }
        tracing::error!(error = %err, code = ?err.code(), "attendance command failed");
        eprintln!("{}", message);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), ClientError> {
    let employee = cli
        .employee
        .or_else(|| std::env::var(EMPLOYEE_ENV).ok())
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());
    let require_employee = || {
        employee.clone().ok_or_else(|| {
            ClientError::Usage(format!(
                "An employee id is required (--employee or {})",
                EMPLOYEE_ENV
            ))
        })
    };

    match cli.command {
        Commands::Start {
            remote,
            device_fix,
            no_ip_fallback,
        } => commands::start(
            &require_employee()?,
            commands::StartOptions {
                remote,
                device_fix,
                ip_fallback: !no_ip_fallback,
            },
        ),
        Commands::Pause => commands::pause(&require_employee()?),
        Commands::Resume => commands::resume(&require_employee()?),
        Commands::End { locate, device_fix } => {
            commands::end(&require_employee()?, locate, device_fix)
        }
        Commands::Status => commands::status(&require_employee()?),
        Commands::Watch { all } => {
            if all {
                commands::watch(None)
            } else {
                commands::watch(Some(&require_employee()?))
            }
        }
        Commands::Progress { note } => commands::progress(&require_employee()?, &note),
        Commands::Review { action } => match action {
            ReviewAction::List => commands::review_list(),
            ReviewAction::Approve { entry_id, hours } => commands::review_approve(entry_id, hours),
            ReviewAction::Reject { entry_id } => commands::review_reject(entry_id),
        },
        Commands::History { limit } => commands::history(&require_employee()?, limit),
        Commands::Health => commands::health(),
    }
}
